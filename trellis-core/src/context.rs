//! Evaluation Context
//!
//! A [`Context`] is the immutable environment a plug is evaluated in: the
//! current frame plus any named variables. The same output may hold a
//! different value in every distinct context.
//!
//! Contexts are cheap to clone (one `Arc`) and are never mutated in place;
//! [`Context::with`] returns a new context. The digest over all variables is
//! computed once at construction and used to key per-plug state. Output
//! hashes only include the variables an output declares, so two contexts
//! that differ in an unread variable still share cache entries.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::hash::{Hash, Hasher};
use crate::value::Value;

/// Name of the variable holding the current time.
pub const FRAME: &str = "frame";

/// An immutable set of named variables.
#[derive(Clone)]
pub struct Context {
    vars: Arc<BTreeMap<Arc<str>, Value>>,
    hash: Hash,
}

impl Context {
    /// An empty context.
    pub fn new() -> Self {
        Self::from_vars(BTreeMap::new())
    }

    fn from_vars(vars: BTreeMap<Arc<str>, Value>) -> Self {
        // BTreeMap iteration is sorted, so insertion order never affects the digest.
        let mut h = Hasher::new();
        h.append_u64(vars.len() as u64);
        for (name, value) in &vars {
            h.append_str(name);
            value.hash_into(&mut h);
        }
        Self {
            vars: Arc::new(vars),
            hash: h.finish(),
        }
    }

    /// Return a copy of this context with `name` set to `value`.
    pub fn with(&self, name: &str, value: impl Into<Value>) -> Self {
        let mut vars = (*self.vars).clone();
        vars.insert(Arc::from(name), value.into());
        Self::from_vars(vars)
    }

    /// Return a copy of this context without `name`.
    pub fn without(&self, name: &str) -> Self {
        if !self.vars.contains_key(name) {
            return self.clone();
        }
        let mut vars = (*self.vars).clone();
        vars.remove(name);
        Self::from_vars(vars)
    }

    pub fn with_frame(&self, frame: f64) -> Self {
        self.with(FRAME, frame)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// The current frame, or `0.0` when unset.
    pub fn frame(&self) -> f64 {
        self.get(FRAME).and_then(Value::as_float).unwrap_or(0.0)
    }

    /// Digest over every variable.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_ref(), v))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_does_not_mutate_original() {
        let base = Context::new();
        let at_ten = base.with_frame(10.0);
        assert!(base.get(FRAME).is_none());
        assert_eq!(at_ten.frame(), 10.0);
        assert_ne!(base.hash(), at_ten.hash());
    }

    #[test]
    fn hash_ignores_insertion_order() {
        let a = Context::new().with("x", 1i64).with("y", 2i64);
        let b = Context::new().with("y", 2i64).with("x", 1i64);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);
    }

    #[test]
    fn without_removes_variable() {
        let ctx = Context::new().with("x", 1i64);
        let cleared = ctx.without("x");
        assert!(cleared.is_empty());
        assert_eq!(cleared.hash(), Context::new().hash());
    }

    #[test]
    fn frame_defaults_to_zero() {
        assert_eq!(Context::new().frame(), 0.0);
    }
}
