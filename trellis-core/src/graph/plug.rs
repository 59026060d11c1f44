//! Plugs
//!
//! A plug is a typed value slot on a node. Input plugs own a locally stored
//! value and may instead be connected to exactly one upstream plug, in which
//! case the upstream's value wins. Output plugs hold no value of their own:
//! they are computed on demand and cached by hash.
//!
//! Each plug also keeps the ordered set of downstream consumers so dirty
//! propagation can walk forward without scanning the whole graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::node::NodeId;
use crate::hash::Hash;
use crate::value::{Value, ValueType};

/// Unique identifier for a plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlugId(u64);

impl PlugId {
    /// Generate a new unique plug ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for PlugId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlugId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plug#{}", self.0)
    }
}

/// Which way data flows through a plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Receives a value, either stored locally or from an upstream connection.
    In,
    /// Produced by the owning node's compute function.
    Out,
}

/// A plug as stored in the graph.
#[derive(Debug, Clone)]
pub(crate) struct Plug {
    pub(crate) id: PlugId,
    pub(crate) node: NodeId,
    pub(crate) name: String,
    pub(crate) direction: Direction,
    pub(crate) value_type: ValueType,
    pub(crate) default: Value,
    /// Locally stored value; meaningful for inputs only.
    pub(crate) value: Value,
    /// Digest of `value`, kept in step with every write.
    pub(crate) value_hash: Hash,
    /// Upstream connection, if any.
    pub(crate) input: Option<PlugId>,
    /// Downstream consumers, in connection order.
    pub(crate) outputs: IndexSet<PlugId>,
}

impl Plug {
    pub(crate) fn new(
        node: NodeId,
        name: String,
        direction: Direction,
        value_type: ValueType,
        default: Value,
    ) -> Self {
        let value_hash = default.hash();
        Self {
            id: PlugId::new(),
            node,
            name,
            direction,
            value_type,
            value: default.clone(),
            default,
            value_hash,
            input: None,
            outputs: IndexSet::new(),
        }
    }

    /// Replace the stored value. Returns `true` if the digest changed.
    pub(crate) fn store(&mut self, value: Value) -> bool {
        let hash = value.hash();
        let changed = hash != self.value_hash;
        self.value = value;
        self.value_hash = hash;
        changed
    }

    pub(crate) fn is_input(&self) -> bool {
        self.direction == Direction::In
    }

    pub(crate) fn info(&self, full_name: String) -> PlugInfo {
        PlugInfo {
            id: self.id,
            node: self.node,
            name: self.name.clone(),
            full_name,
            direction: self.direction,
            value_type: self.value_type.clone(),
            input: self.input,
            outputs: self.outputs.iter().copied().collect(),
        }
    }
}

/// Read-only description of a plug, for presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub struct PlugInfo {
    pub id: PlugId,
    pub node: NodeId,
    pub name: String,
    /// `node.plug` form used in error messages.
    pub full_name: String,
    pub direction: Direction,
    pub value_type: ValueType,
    pub input: Option<PlugId>,
    pub outputs: Vec<PlugId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plug_ids_are_unique() {
        assert_ne!(PlugId::new(), PlugId::new());
    }

    #[test]
    fn store_reports_hash_changes() {
        let mut plug = Plug::new(
            NodeId::new(),
            "in".into(),
            Direction::In,
            ValueType::Float,
            Value::Float(0.0),
        );
        assert!(!plug.store(Value::Float(-0.0)));
        assert!(plug.store(Value::Float(2.0)));
        assert_eq!(plug.value_hash, Value::Float(2.0).hash());
    }
}
