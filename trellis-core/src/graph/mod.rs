//! Dependency Graph
//!
//! The [`Graph`] owns nodes, their plugs and the connections between them,
//! and is the entry point for every edit and every value request.
//!
//! # Overview
//!
//! - Inputs hold a stored value or follow exactly one upstream plug.
//! - Outputs are computed on demand by their node's type and cached by a
//!   content hash derived from what they declare they read.
//! - Any edit (stored value, connection) walks forward through connections
//!   and each node's `affects` relation, forgetting the state of every
//!   reachable plug exactly once, and reports the walk on the
//!   [`Graph::dirtied`] signal.
//!
//! # Locking
//!
//! The topology sits behind a read-write lock. Value requests hold a read
//! guard for the whole pull, so any number of them run side by side;
//! edits and dirty propagation take the write guard and therefore never
//! overlap a pull. Signals are emitted after the guard is released, so a
//! slot may call back into the graph.

pub(crate) mod node;
pub(crate) mod node_type;
pub(crate) mod plug;
mod registry;
mod snapshot;
pub(crate) mod topology;

use std::sync::Arc;

use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::debug;

pub use node::{Node, NodeId};
pub use node_type::{Dependencies, FnNode, NodeType, PlugSpec};
pub use plug::{Direction, PlugId, PlugInfo};
pub use registry::NodeRegistry;
pub use snapshot::{ConnectionRecord, GraphSnapshot, NodeRecord, PlugRef, SNAPSHOT_VERSION};

use topology::Topology;

use crate::config::{Config, GraphConfig};
use crate::context::Context;
use crate::error::{GraphError, Result};
use crate::eval::{ComputeCache, Evaluation, PlugState, StateTable};
use crate::hash::Hash;
use crate::signal::Signal;
use crate::value::Value;

/// Emitted once per dirty propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirtied {
    /// The plug whose value or connection changed.
    pub source: PlugId,
    /// Every plug reached from `source`, including it, each listed once.
    pub plugs: Vec<PlugId>,
}

/// Emitted when an input gains, changes or loses its upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionChanged {
    pub destination: PlugId,
    /// The new upstream, or `None` after a disconnect.
    pub source: Option<PlugId>,
}

/// A lazily evaluated, hash-memoized computation graph.
pub struct Graph {
    topology: RwLock<Topology>,
    states: StateTable,
    cache: Arc<ComputeCache>,
    config: GraphConfig,
    dirtied: Signal<Dirtied>,
    connection_changed: Signal<ConnectionChanged>,
}

impl Graph {
    /// An empty graph backed by the process-wide cache.
    pub fn new() -> Self {
        Self::with_cache(ComputeCache::global())
    }

    /// An empty graph backed by `cache`.
    pub fn with_cache(cache: Arc<ComputeCache>) -> Self {
        Self::with_config(GraphConfig::default(), cache)
    }

    /// An empty graph with explicit settings. Each output remembers its
    /// state in at most as many contexts as `cache` holds values.
    pub fn with_config(config: GraphConfig, cache: Arc<ComputeCache>) -> Self {
        Self {
            topology: RwLock::new(Topology::new()),
            states: StateTable::new(cache.capacity()),
            cache,
            config,
            dirtied: Signal::new(),
            connection_changed: Signal::new(),
        }
    }

    /// An empty graph backed by the process-wide cache, resized to the
    /// configured capacity.
    pub fn from_config(config: &Config) -> Self {
        let cache = ComputeCache::global();
        cache.set_capacity(config.cache.capacity);
        Self::with_config(config.graph.clone(), cache)
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ComputeCache> {
        &self.cache
    }

    /// Fired after every dirty propagation.
    pub fn dirtied(&self) -> &Signal<Dirtied> {
        &self.dirtied
    }

    /// Fired after every connection edit.
    pub fn connection_changed(&self) -> &Signal<ConnectionChanged> {
        &self.connection_changed
    }

    // ------------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------------

    /// Add a node of `node_type` named `name`.
    pub fn add_node(&self, name: impl Into<String>, node_type: Arc<dyn NodeType>) -> Result<NodeId> {
        let (node, plugs) = Node::instantiate(name.into(), node_type)?;
        debug!(node = node.name(), node_type = node.type_name(), "adding node");
        Ok(self.topology.write().add_node(node, plugs))
    }

    /// Add a node of a registered type.
    pub fn create_node(
        &self,
        registry: &NodeRegistry,
        type_name: &str,
        name: impl Into<String>,
    ) -> Result<NodeId> {
        let node_type = registry.create(type_name)?;
        self.add_node(name, node_type)
    }

    /// Remove a node, disconnecting it from everything first.
    ///
    /// Downstream plugs are dirtied; values already in the cache stay there.
    pub fn remove_node(&self, id: NodeId) -> Result<()> {
        let mut changes = Vec::new();
        let mut events = Vec::new();
        {
            let mut topology = self.topology.write();
            let plugs: Vec<PlugId> = topology.node(id)?.plugs().map(|(_, plug)| plug).collect();

            for &plug in &plugs {
                if topology.remove_edge(plug)?.is_some() {
                    changes.push(ConnectionChanged {
                        destination: plug,
                        source: None,
                    });
                }
                let consumers: Vec<PlugId> = topology.plug(plug)?.outputs.iter().copied().collect();
                for consumer in consumers {
                    topology.remove_edge(consumer)?;
                    changes.push(ConnectionChanged {
                        destination: consumer,
                        source: None,
                    });
                    events.push(self.propagate(&topology, consumer));
                }
                self.states.invalidate(plug);
            }

            if let Some(node) = topology.remove_node(id) {
                debug!(node = node.name(), "removed node");
            }
        }

        for change in &changes {
            self.connection_changed.emit(change);
        }
        for event in &events {
            self.dirtied.emit(event);
        }
        Ok(())
    }

    /// Node ids in creation order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.topology.read().nodes().map(Node::id).collect()
    }

    pub fn node_count(&self) -> usize {
        self.topology.read().node_count()
    }

    pub fn node_name(&self, id: NodeId) -> Result<String> {
        Ok(self.topology.read().node(id)?.name().to_string())
    }

    pub fn node_type_name(&self, id: NodeId) -> Result<String> {
        Ok(self.topology.read().node(id)?.type_name().to_string())
    }

    /// Look up a plug of `node` by name.
    pub fn plug(&self, node: NodeId, name: &str) -> Result<PlugId> {
        let topology = self.topology.read();
        let n = topology.node(node)?;
        n.plug(name).ok_or_else(|| GraphError::UnknownPlug {
            node: n.name().to_string(),
            name: name.to_string(),
        })
    }

    /// Plugs of `node` in declaration order.
    pub fn node_plugs(&self, node: NodeId) -> Result<Vec<PlugId>> {
        Ok(self.topology.read().node(node)?.plugs().map(|(_, id)| id).collect())
    }

    /// Every connection as `(source, destination)`.
    pub fn connections(&self) -> Vec<(PlugId, PlugId)> {
        self.topology.read().edges()
    }

    pub fn plug_info(&self, plug: PlugId) -> Result<PlugInfo> {
        let topology = self.topology.read();
        Ok(topology.plug(plug)?.info(topology.full_name(plug)))
    }

    /// The upstream plug feeding `plug`, if connected.
    pub fn input_of(&self, plug: PlugId) -> Result<Option<PlugId>> {
        Ok(self.topology.read().plug(plug)?.input)
    }

    /// Plugs fed by `plug`, in connection order.
    pub fn consumers(&self, plug: PlugId) -> Result<Vec<PlugId>> {
        Ok(self.topology.read().plug(plug)?.outputs.iter().copied().collect())
    }

    /// Outputs of the owning node that read `plug`.
    pub fn affects(&self, plug: PlugId) -> Result<Vec<PlugId>> {
        let topology = self.topology.read();
        let node = topology.plug(plug)?.node;
        Ok(topology.node(node)?.affects(plug).to_vec())
    }

    /// Attach presentation data to a node. Never hashed, never dirties.
    pub fn set_metadata(&self, node: NodeId, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.topology.write().node_mut(node)?.set_metadata(key.into(), value.into());
        Ok(())
    }

    pub fn metadata(&self, node: NodeId, key: &str) -> Result<Option<Value>> {
        Ok(self.topology.read().node(node)?.metadata(key).cloned())
    }

    // ------------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------------

    /// Forget the state of everything downstream of `source`.
    fn propagate(&self, topology: &Topology, source: PlugId) -> Dirtied {
        let plugs = topology.downstream(source);
        for &plug in &plugs {
            self.states.invalidate(plug);
        }
        debug!(source = %topology.full_name(source), count = plugs.len(), "dirtied");
        Dirtied { source, plugs }
    }

    /// Connect `source` into the input `destination`, replacing any
    /// existing connection. The graph is unchanged on error.
    pub fn connect(&self, source: PlugId, destination: PlugId) -> Result<()> {
        let dirtied = {
            let mut topology = self.topology.write();
            let src = topology.plug(source)?;
            let dst = topology.plug(destination)?;

            if !dst.is_input() {
                return Err(GraphError::InvalidConnection {
                    upstream: topology.full_name(source),
                    downstream: topology.full_name(destination),
                    reason: "destination is not an input",
                });
            }
            if dst.input == Some(source) {
                return Ok(());
            }
            if !dst.value_type.accepts(&src.value_type) {
                return Err(GraphError::TypeMismatch {
                    expected: dst.value_type.clone(),
                    got: src.value_type.clone(),
                });
            }
            if topology.would_cycle(source, destination) {
                return Err(GraphError::Cycle {
                    upstream: topology.full_name(source),
                    downstream: topology.full_name(destination),
                });
            }

            topology.add_edge(source, destination)?;
            debug!(
                upstream = %topology.full_name(source),
                downstream = %topology.full_name(destination),
                "connected"
            );
            self.propagate(&topology, destination)
        };

        self.connection_changed.emit(&ConnectionChanged {
            destination,
            source: Some(source),
        });
        self.dirtied.emit(&dirtied);
        Ok(())
    }

    /// Remove the upstream connection of `destination`. Returns whether
    /// there was one.
    pub fn disconnect(&self, destination: PlugId) -> Result<bool> {
        let dirtied = {
            let mut topology = self.topology.write();
            if topology.remove_edge(destination)?.is_none() {
                return Ok(false);
            }
            debug!(downstream = %topology.full_name(destination), "disconnected");
            self.propagate(&topology, destination)
        };

        self.connection_changed.emit(&ConnectionChanged {
            destination,
            source: None,
        });
        self.dirtied.emit(&dirtied);
        Ok(true)
    }

    /// Store a value on an unconnected input.
    pub fn set_value(&self, plug: PlugId, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let dirtied = {
            let mut topology = self.topology.write();
            let p = topology.plug(plug)?;
            if !p.is_input() {
                return Err(GraphError::ReadOnly {
                    plug: topology.full_name(plug),
                    reason: "outputs are computed",
                });
            }
            if p.input.is_some() {
                return Err(GraphError::ReadOnly {
                    plug: topology.full_name(plug),
                    reason: "input is connected",
                });
            }
            let got = value.value_type();
            if !p.value_type.accepts(&got) {
                return Err(GraphError::TypeMismatch {
                    expected: p.value_type.clone(),
                    got,
                });
            }

            let changed = topology.plug_mut(plug)?.store(value);
            if !changed && self.config.skip_unchanged_values {
                return Ok(());
            }
            debug!(plug = %topology.full_name(plug), "value set");
            self.propagate(&topology, plug)
        };

        self.dirtied.emit(&dirtied);
        Ok(())
    }

    /// Restore an input's default value.
    pub fn reset_value(&self, plug: PlugId) -> Result<()> {
        let default = self.topology.read().plug(plug)?.default.clone();
        self.set_value(plug, default)
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    fn evaluation<'g>(&'g self, topology: &'g Topology) -> Evaluation<'g> {
        Evaluation::new(topology, &self.states, &self.cache, &self.config)
    }

    /// The effective value of `plug` in `context`, computing it if needed.
    pub fn get_value(&self, plug: PlugId, context: &Context) -> Result<Value> {
        let topology = self.topology.read();
        self.evaluation(&topology).value(plug, context)
    }

    /// The content hash of `plug` in `context`, without computing its value.
    pub fn hash(&self, plug: PlugId, context: &Context) -> Result<Hash> {
        let topology = self.topology.read();
        self.evaluation(&topology).hash(plug, context)
    }

    /// Evaluation state of `plug` in `context`.
    ///
    /// Inputs report the state of their upstream when connected and are
    /// otherwise always clean.
    pub fn state(&self, plug: PlugId, context: &Context) -> Result<PlugState> {
        let topology = self.topology.read();
        let mut current = topology.plug(plug)?;
        while current.is_input() {
            match current.input {
                Some(source) => current = topology.plug(source)?,
                None => return Ok(PlugState::Clean(current.value_hash)),
            }
        }
        Ok(self.states.get(current.id, context.hash()))
    }

    pub fn is_dirty(&self, plug: PlugId, context: &Context) -> Result<bool> {
        Ok(!self.state(plug, context)?.is_clean())
    }

    /// Pull several plugs in parallel. Results are in request order.
    pub fn evaluate_many(&self, plugs: &[PlugId], context: &Context) -> Vec<Result<Value>> {
        let topology = self.topology.read();
        let evaluation = self.evaluation(&topology);
        plugs
            .par_iter()
            .map(|&plug| evaluation.value(plug, context))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Capture the graph's structure and stored values.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot::capture(&self.topology.read())
    }

    /// Rebuild a graph from `snapshot` with default settings, creating
    /// nodes through `registry`.
    pub fn restore(
        snapshot: &GraphSnapshot,
        registry: &NodeRegistry,
        cache: Arc<ComputeCache>,
    ) -> Result<Self> {
        Self::restore_with_config(snapshot, registry, GraphConfig::default(), cache)
    }

    /// Rebuild a graph from `snapshot` with explicit settings.
    pub fn restore_with_config(
        snapshot: &GraphSnapshot,
        registry: &NodeRegistry,
        config: GraphConfig,
        cache: Arc<ComputeCache>,
    ) -> Result<Self> {
        let graph = Self::with_config(config, cache);
        let mut ids = Vec::with_capacity(snapshot.nodes.len());

        for record in &snapshot.nodes {
            let id = graph.create_node(registry, &record.type_name, record.name.clone())?;
            for (key, value) in &record.metadata {
                graph.set_metadata(id, key.clone(), value.clone())?;
            }
            for (name, value) in &record.values {
                graph.set_value(graph.plug(id, name)?, value.clone())?;
            }
            ids.push(id);
        }

        let resolve = |plug_ref: &PlugRef| -> Result<PlugId> {
            let node = ids.get(plug_ref.node).copied().ok_or_else(|| {
                GraphError::Serialization(format!("connection refers to missing node {}", plug_ref.node))
            })?;
            graph.plug(node, &plug_ref.plug)
        };
        for connection in &snapshot.connections {
            graph.connect(resolve(&connection.source)?, resolve(&connection.destination)?)?;
        }

        debug!(nodes = ids.len(), connections = snapshot.connections.len(), "restored graph");
        Ok(graph)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topology = self.topology.read();
        f.debug_struct("Graph")
            .field("nodes", &topology.node_count())
            .field("connections", &topology.edges().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::CacheConfig;
    use crate::signal::SlotError;
    use crate::value::ValueType;

    fn graph() -> Graph {
        Graph::with_cache(Arc::new(ComputeCache::new(CacheConfig { capacity: 256 })))
    }

    fn add_type() -> Arc<dyn NodeType> {
        FnNode::new("Add")
            .input("a", ValueType::Float)
            .input("b", ValueType::Float)
            .output("sum", ValueType::Float, Dependencies::on(["a", "b"]), |i| {
                Ok(Value::Float(i.float("a")? + i.float("b")?))
            })
            .build()
    }

    #[test]
    fn set_value_rejects_outputs_and_connected_inputs() {
        let g = graph();
        let x = g.add_node("x", add_type()).unwrap();
        let y = g.add_node("y", add_type()).unwrap();
        let x_sum = g.plug(x, "sum").unwrap();
        let y_a = g.plug(y, "a").unwrap();

        assert!(matches!(g.set_value(x_sum, 1.0), Err(GraphError::ReadOnly { .. })));
        g.connect(x_sum, y_a).unwrap();
        assert!(matches!(g.set_value(y_a, 1.0), Err(GraphError::ReadOnly { .. })));
    }

    #[test]
    fn set_value_type_checks() {
        let g = graph();
        let x = g.add_node("x", add_type()).unwrap();
        let a = g.plug(x, "a").unwrap();
        assert!(matches!(
            g.set_value(a, "text"),
            Err(GraphError::TypeMismatch { expected: ValueType::Float, got: ValueType::String })
        ));
    }

    #[test]
    fn connections_into_outputs_are_invalid() {
        let g = graph();
        let x = g.add_node("x", add_type()).unwrap();
        let y = g.add_node("y", add_type()).unwrap();
        let err = g
            .connect(g.plug(x, "sum").unwrap(), g.plug(y, "sum").unwrap())
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidConnection { .. }));
    }

    #[test]
    fn unknown_plug_names_are_reported() {
        let g = graph();
        let x = g.add_node("x", add_type()).unwrap();
        assert!(matches!(
            g.plug(x, "nope"),
            Err(GraphError::UnknownPlug { name, .. }) if name == "nope"
        ));
    }

    #[test]
    fn unchanged_values_do_not_dirty() {
        let g = graph();
        let x = g.add_node("x", add_type()).unwrap();
        let a = g.plug(x, "a").unwrap();

        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        let _sub = g.dirtied().subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        g.set_value(a, 1.0).unwrap();
        g.set_value(a, 1.0).unwrap();
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connection_changes_are_signalled() {
        let g = graph();
        let x = g.add_node("x", add_type()).unwrap();
        let y = g.add_node("y", add_type()).unwrap();
        let (x_sum, y_a) = (g.plug(x, "sum").unwrap(), g.plug(y, "a").unwrap());

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = seen.clone();
        let _sub = g.connection_changed().subscribe(move |change: &ConnectionChanged| {
            log.lock().push(*change);
            Ok(())
        });

        g.connect(x_sum, y_a).unwrap();
        assert!(g.disconnect(y_a).unwrap());
        assert!(!g.disconnect(y_a).unwrap());

        assert_eq!(
            *seen.lock(),
            [
                ConnectionChanged { destination: y_a, source: Some(x_sum) },
                ConnectionChanged { destination: y_a, source: None },
            ]
        );
    }

    #[test]
    fn failing_slots_do_not_block_edits() {
        let g = graph();
        let x = g.add_node("x", add_type()).unwrap();
        let _sub = g.dirtied().subscribe(|_| Err(SlotError::new("listener broke")));
        g.set_value(g.plug(x, "a").unwrap(), 2.0).unwrap();
        assert_eq!(
            g.get_value(g.plug(x, "sum").unwrap(), &Context::new()).unwrap(),
            Value::Float(2.0)
        );
    }

    #[test]
    fn remove_node_disconnects_and_dirties() {
        let g = graph();
        let x = g.add_node("x", add_type()).unwrap();
        let y = g.add_node("y", add_type()).unwrap();
        let (x_sum, y_a, y_sum) = (
            g.plug(x, "sum").unwrap(),
            g.plug(y, "a").unwrap(),
            g.plug(y, "sum").unwrap(),
        );
        g.connect(x_sum, y_a).unwrap();

        let ctx = Context::new();
        g.get_value(y_sum, &ctx).unwrap();
        assert!(!g.is_dirty(y_sum, &ctx).unwrap());

        g.remove_node(x).unwrap();
        assert_eq!(g.nodes(), [y]);
        assert!(g.connections().is_empty());
        assert_eq!(g.input_of(y_a).unwrap(), None);
        assert!(g.is_dirty(y_sum, &ctx).unwrap());
        assert!(matches!(g.remove_node(x), Err(GraphError::NodeNotFound(_))));
    }

    #[test]
    fn metadata_is_not_hashed() {
        let g = graph();
        let x = g.add_node("x", add_type()).unwrap();
        let sum = g.plug(x, "sum").unwrap();
        let ctx = Context::new();

        g.get_value(sum, &ctx).unwrap();
        g.set_metadata(x, "position", vec![1.0, 2.0]).unwrap();
        assert!(!g.is_dirty(sum, &ctx).unwrap());
        assert_eq!(g.metadata(x, "position").unwrap(), Some(Value::from(vec![1.0, 2.0])));
    }

    #[test]
    fn reset_value_restores_default() {
        let g = graph();
        let x = g.add_node("x", add_type()).unwrap();
        let a = g.plug(x, "a").unwrap();
        g.set_value(a, 5.0).unwrap();
        g.reset_value(a).unwrap();
        assert_eq!(g.get_value(a, &Context::new()).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn introspection() {
        let g = graph();
        let x = g.add_node("x", add_type()).unwrap();
        let (a, sum) = (g.plug(x, "a").unwrap(), g.plug(x, "sum").unwrap());

        assert_eq!(g.node_name(x).unwrap(), "x");
        assert_eq!(g.node_type_name(x).unwrap(), "Add");
        assert_eq!(g.node_plugs(x).unwrap().len(), 3);
        assert_eq!(g.affects(a).unwrap(), [sum]);

        let info = g.plug_info(sum).unwrap();
        assert_eq!(info.full_name, "x.sum");
        assert_eq!(info.direction, Direction::Out);
    }

    #[test]
    fn scrubbing_frames_keeps_state_bounded() {
        let g = Graph::with_cache(Arc::new(ComputeCache::new(CacheConfig { capacity: 16 })));
        let timed = FnNode::new("Timed")
            .output("now", ValueType::Float, Dependencies::none().context("frame"), |i| {
                Ok(Value::Float(i.frame()?))
            })
            .build();
        let x = g.add_node("t", timed).unwrap();
        let now = g.plug(x, "now").unwrap();

        for frame in 0..2000 {
            let ctx = Context::new().with_frame(frame as f64);
            assert_eq!(g.get_value(now, &ctx).unwrap(), Value::Float(frame as f64));
        }
        assert!(g.cache().len() <= 16);
        assert!(g.states.contexts(now) <= 16);

        // A forgotten frame is simply evaluated again.
        assert_eq!(
            g.get_value(now, &Context::new().with_frame(0.0)).unwrap(),
            Value::Float(0.0)
        );
    }
}
