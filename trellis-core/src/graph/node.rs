//! Graph Nodes
//!
//! A [`Node`] is an instance of a [`NodeType`] living in a graph. On
//! creation the type's declarations are resolved once into plug-id tables:
//! for every output the plugs and context variables it depends on, and the
//! inverse `affects` map from each plug to the outputs that read it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::node_type::NodeType;
use super::plug::{Direction, Plug, PlugId};
use crate::error::{GraphError, Result};
use crate::value::{Value, ValueType};

/// Unique identifier for a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// The resolved dependency declaration of one output.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResolvedDependencies {
    /// Plugs read, in declaration order.
    pub(crate) plugs: SmallVec<[PlugId; 4]>,
    /// Context variables read, in declaration order.
    pub(crate) context: SmallVec<[Arc<str>; 2]>,
}

/// A node in the graph.
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// User-facing name, unique only by convention.
    name: String,

    /// The type this node is an instance of.
    node_type: Arc<dyn NodeType>,

    /// Plugs by name, in declaration order.
    plugs: IndexMap<String, PlugId>,

    /// For each output, what it reads.
    dependencies: HashMap<PlugId, ResolvedDependencies>,

    /// For each plug, the outputs of this node that read it.
    affects: HashMap<PlugId, SmallVec<[PlugId; 4]>>,

    /// Presentation data (positions, colours, notes). Never hashed.
    metadata: BTreeMap<String, Value>,
}

impl Node {
    /// Resolve `node_type` into a node plus its freshly created plugs.
    pub(crate) fn instantiate(name: String, node_type: Arc<dyn NodeType>) -> Result<(Self, Vec<Plug>)> {
        let id = NodeId::new();
        let type_name = node_type.type_name().to_string();
        let invalid = |reason: String| GraphError::InvalidNodeType {
            type_name: type_name.clone(),
            reason,
        };

        let mut plugs = IndexMap::new();
        let mut created = Vec::new();
        for spec in node_type.plugs() {
            if plugs.contains_key(&spec.name) {
                return Err(invalid(format!("duplicate plug `{}`", spec.name)));
            }
            // Opaque plugs have no meaningful zero value, so their placeholder default is exempt.
            let opaque = matches!(spec.value_type, ValueType::Opaque(_));
            if spec.direction == Direction::In
                && !opaque
                && !spec.value_type.accepts(&spec.default.value_type())
            {
                return Err(invalid(format!("default of `{}` does not match its type", spec.name)));
            }
            let plug = Plug::new(id, spec.name.clone(), spec.direction, spec.value_type, spec.default);
            plugs.insert(spec.name, plug.id);
            created.push(plug);
        }

        let mut dependencies = HashMap::new();
        let mut affects: HashMap<PlugId, SmallVec<[PlugId; 4]>> = HashMap::new();
        for plug in created.iter().filter(|p| !p.is_input()) {
            let declared = node_type.dependencies(&plug.name);
            let mut resolved = ResolvedDependencies::default();
            for dep in declared.plugs() {
                let dep_id = *plugs
                    .get(dep)
                    .ok_or_else(|| invalid(format!("`{}` depends on unknown plug `{dep}`", plug.name)))?;
                if dep_id == plug.id {
                    return Err(invalid(format!("`{}` depends on itself", plug.name)));
                }
                if !resolved.plugs.contains(&dep_id) {
                    resolved.plugs.push(dep_id);
                    affects.entry(dep_id).or_default().push(plug.id);
                }
            }
            resolved.context = declared.context_vars().iter().map(|v| Arc::from(v.as_str())).collect();
            dependencies.insert(plug.id, resolved);
        }

        let node = Self {
            id,
            name,
            node_type,
            plugs,
            dependencies,
            affects,
            metadata: BTreeMap::new(),
        };
        if let Some(output) = node.internal_cycle() {
            return Err(invalid(format!("outputs depending on `{output}` form a cycle")));
        }
        Ok((node, created))
    }

    /// Find an output whose dependencies loop back on themselves within the node.
    fn internal_cycle(&self) -> Option<&str> {
        fn visit(
            node: &Node,
            plug: PlugId,
            in_progress: &mut HashSet<PlugId>,
            done: &mut HashSet<PlugId>,
        ) -> bool {
            if done.contains(&plug) {
                return false;
            }
            if !in_progress.insert(plug) {
                return true;
            }
            for &next in node.affects(plug) {
                if visit(node, next, in_progress, done) {
                    return true;
                }
            }
            in_progress.remove(&plug);
            done.insert(plug);
            false
        }

        let mut done = HashSet::new();
        for (name, &plug) in &self.plugs {
            let mut in_progress = HashSet::new();
            if visit(self, plug, &mut in_progress, &mut done) {
                return Some(name);
            }
        }
        None
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        self.node_type.type_name()
    }

    pub(crate) fn node_type(&self) -> &Arc<dyn NodeType> {
        &self.node_type
    }

    /// Look up a plug by name.
    pub fn plug(&self, name: &str) -> Option<PlugId> {
        self.plugs.get(name).copied()
    }

    /// Plugs in declaration order.
    pub fn plugs(&self) -> impl Iterator<Item = (&str, PlugId)> {
        self.plugs.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// The outputs of this node that read `plug`.
    pub fn affects(&self, plug: PlugId) -> &[PlugId] {
        self.affects.get(&plug).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub(crate) fn dependencies(&self, output: PlugId) -> Option<&ResolvedDependencies> {
        self.dependencies.get(&output)
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub(crate) fn set_metadata(&mut self, key: String, value: Value) {
        self.metadata.insert(key, value);
    }

    pub(crate) fn metadata_entries(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.type_name())
            .field("plugs", &self.plugs)
            .finish()
    }
}
