//! Node Type Registry
//!
//! Maps type names to factories so nodes can be created by name, for
//! example when restoring a snapshot. There is no global registry: callers
//! build one and pass it where it is needed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::node_type::NodeType;
use crate::error::{GraphError, Result};

type Factory = Arc<dyn Fn() -> Arc<dyn NodeType> + Send + Sync>;

/// A table of node type factories keyed by type name.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: BTreeMap<String, Factory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `type_name`, replacing any previous one.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn NodeType> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Arc::new(factory));
        self
    }

    /// Register a shared node type instance under its own type name.
    pub fn register_type(&mut self, node_type: Arc<dyn NodeType>) -> &mut Self {
        let name = node_type.type_name().to_string();
        self.register(name, move || node_type.clone())
    }

    /// Make a new instance of `type_name`.
    pub fn create(&self, type_name: &str) -> Result<Arc<dyn NodeType>> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| GraphError::UnknownNodeType(type_name.to_string()))?;
        Ok(factory())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered names in sorted order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.type_names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node_type::{Dependencies, FnNode};
    use crate::value::{Value, ValueType};

    fn constant() -> Arc<dyn NodeType> {
        FnNode::new("Constant")
            .output("out", ValueType::Int, Dependencies::none(), |_| Ok(Value::Int(1)))
            .build()
    }

    #[test]
    fn create_by_name() {
        let mut registry = NodeRegistry::new();
        registry.register("Constant", constant);

        assert!(registry.contains("Constant"));
        assert_eq!(registry.create("Constant").unwrap().type_name(), "Constant");
        assert!(matches!(
            registry.create("Missing"),
            Err(GraphError::UnknownNodeType(name)) if name == "Missing"
        ));
    }

    #[test]
    fn register_type_uses_its_name() {
        let mut registry = NodeRegistry::new();
        registry.register_type(constant());
        assert_eq!(registry.type_names().collect::<Vec<_>>(), ["Constant"]);
    }
}
