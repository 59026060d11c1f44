//! Plug Values
//!
//! Values flowing through plugs form a closed set ([`Value`]) plus one escape
//! hatch for domain data the engine never looks inside ([`OpaqueValue`]).
//! Opaque payloads only need to say what they are and how to hash
//! themselves; consumers recover the concrete type with a checked downcast.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hash::{Hash, Hasher};

/// The type tag of a plug or value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    FloatArray,
    /// An opaque payload, identified by its type name.
    Opaque(String),
    /// Accepts a value of any type.
    Any,
}

impl ValueType {
    /// Whether a value of type `other` may flow into a slot of this type.
    pub fn accepts(&self, other: &ValueType) -> bool {
        matches!(self, Self::Any) || matches!(other, Self::Any) || self == other
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::String => f.write_str("string"),
            Self::FloatArray => f.write_str("float[]"),
            Self::Opaque(name) => write!(f, "opaque<{name}>"),
            Self::Any => f.write_str("any"),
        }
    }
}

/// Domain data carried through the graph without interpretation.
///
/// Implementors must make `hash_into` cover everything that distinguishes
/// one payload from another: two payloads that hash alike will be treated
/// as the same value.
pub trait Payload: Any + Send + Sync + fmt::Debug {
    /// Stable name used for type checking connections.
    fn type_name(&self) -> &'static str;

    /// Feed the payload's content into the hasher.
    fn hash_into(&self, hasher: &mut Hasher);

    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// A shared, immutable opaque payload.
#[derive(Clone)]
pub struct OpaqueValue(Arc<dyn Payload>);

impl OpaqueValue {
    pub fn new<P: Payload>(payload: P) -> Self {
        Self(Arc::new(payload))
    }

    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    /// Borrow the payload as `T` if that is what it holds.
    pub fn downcast_ref<T: Payload>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Whether both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &OpaqueValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn content_hash(&self) -> Hash {
        let mut h = Hasher::new();
        self.0.hash_into(&mut h);
        h.finish()
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl PartialEq for OpaqueValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.type_name() == other.type_name() && self.content_hash() == other.content_hash())
    }
}

/// A value held by a plug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    FloatArray(Arc<[f64]>),
    /// Opaque payloads are never serialized.
    #[serde(skip)]
    Opaque(OpaqueValue),
}

impl Value {
    /// Wrap a payload.
    pub fn opaque<P: Payload>(payload: P) -> Self {
        Self::Opaque(OpaqueValue::new(payload))
    }

    /// The zero value for a type. `Any` and opaque types default to `Bool(false)`
    /// since there is nothing better to offer.
    pub fn default_for(ty: &ValueType) -> Self {
        match ty {
            ValueType::Int => Self::Int(0),
            ValueType::Float => Self::Float(0.0),
            ValueType::String => Self::String(Arc::from("")),
            ValueType::FloatArray => Self::FloatArray(Arc::from(Vec::new())),
            ValueType::Bool | ValueType::Any | ValueType::Opaque(_) => Self::Bool(false),
        }
    }

    /// The type tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::String(_) => ValueType::String,
            Self::FloatArray(_) => ValueType::FloatArray,
            Self::Opaque(o) => ValueType::Opaque(o.type_name().to_string()),
        }
    }

    /// Feed this value, including its type tag, into `hasher`.
    pub fn hash_into(&self, hasher: &mut Hasher) {
        match self {
            Self::Bool(b) => {
                hasher.append_u8(0).append_u8(u8::from(*b));
            }
            Self::Int(i) => {
                hasher.append_u8(1).append_i64(*i);
            }
            Self::Float(v) => {
                hasher.append_u8(2).append_f64(*v);
            }
            Self::String(s) => {
                hasher.append_u8(3).append_str(s);
            }
            Self::FloatArray(values) => {
                hasher.append_u8(4).append_u64(values.len() as u64);
                for v in values.iter() {
                    hasher.append_f64(*v);
                }
            }
            Self::Opaque(o) => {
                hasher.append_u8(5).append_str(o.type_name());
                o.0.hash_into(hasher);
            }
        }
    }

    /// Digest of this value alone.
    pub fn hash(&self) -> Hash {
        let mut h = Hasher::new();
        self.hash_into(&mut h);
        h.finish()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Floats, with ints widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn as_float_array(&self) -> Option<&[f64]> {
        match self {
            Self::FloatArray(values) => Some(values.as_ref()),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&OpaqueValue> {
        match self {
            Self::Opaque(o) => Some(o),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(Arc::from(v))
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Self::FloatArray(Arc::from(v))
    }
}
