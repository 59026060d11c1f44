//! Graph Topology
//!
//! Storage for nodes, plugs and connections, plus the forward walk that both
//! dirty propagation and cycle detection are built on.
//!
//! # Algorithm
//!
//! The forward relation from a plug is the union of:
//!
//! 1. its downstream consumers (connections), and
//! 2. the outputs of its own node that it `affects`.
//!
//! [`Topology::downstream`] is a breadth-first walk of that relation with a
//! visited set, so each reachable plug appears exactly once even when the
//! graph has diamonds. A connection `source -> destination` closes a cycle
//! exactly when `source` is reachable from `destination`.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use super::node::{Node, NodeId};
use super::plug::{Plug, PlugId};
use crate::error::{GraphError, Result};

/// All nodes, plugs and connections of a graph.
#[derive(Default)]
pub(crate) struct Topology {
    /// Nodes in creation order.
    nodes: IndexMap<NodeId, Node>,
    plugs: HashMap<PlugId, Plug>,
}

impl Topology {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a node and its plugs.
    pub(crate) fn add_node(&mut self, node: Node, plugs: Vec<Plug>) -> NodeId {
        let id = node.id();
        for plug in plugs {
            self.plugs.insert(plug.id, plug);
        }
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node and its plugs. The node must have no connections left.
    pub(crate) fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.shift_remove(&node_id)?;
        for (_, plug) in node.plugs() {
            self.plugs.remove(&plug);
        }
        Some(node)
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))
    }

    pub(crate) fn plug(&self, id: PlugId) -> Result<&Plug> {
        self.plugs.get(&id).ok_or(GraphError::PlugNotFound(id))
    }

    pub(crate) fn plug_mut(&mut self, id: PlugId) -> Result<&mut Plug> {
        self.plugs.get_mut(&id).ok_or(GraphError::PlugNotFound(id))
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// `node.plug`, for messages.
    pub(crate) fn full_name(&self, id: PlugId) -> String {
        match self.plugs.get(&id) {
            Some(plug) => match self.nodes.get(&plug.node) {
                Some(node) => format!("{}.{}", node.name(), plug.name),
                None => plug.name.clone(),
            },
            None => id.to_string(),
        }
    }

    /// Record the edge `source -> destination`, replacing any previous
    /// input of `destination`. Returns the replaced upstream plug.
    ///
    /// Validation is the caller's job.
    pub(crate) fn add_edge(&mut self, source: PlugId, destination: PlugId) -> Result<Option<PlugId>> {
        let previous = self.remove_edge(destination)?;
        self.plug_mut(source)?.outputs.insert(destination);
        self.plug_mut(destination)?.input = Some(source);
        Ok(previous)
    }

    /// Remove the input connection of `destination`, if any.
    pub(crate) fn remove_edge(&mut self, destination: PlugId) -> Result<Option<PlugId>> {
        let previous = self.plug_mut(destination)?.input.take();
        if let Some(source) = previous {
            if let Some(src) = self.plugs.get_mut(&source) {
                src.outputs.shift_remove(&destination);
            }
        }
        Ok(previous)
    }

    /// Every connection as `(source, destination)`, grouped by node in
    /// creation order.
    pub(crate) fn edges(&self) -> Vec<(PlugId, PlugId)> {
        let mut edges = Vec::new();
        for node in self.nodes.values() {
            for (_, id) in node.plugs() {
                if let Some(source) = self.plugs.get(&id).and_then(|p| p.input) {
                    edges.push((source, id));
                }
            }
        }
        edges
    }

    /// Plugs directly reachable from `id` in one step.
    fn successors(&self, id: PlugId) -> impl Iterator<Item = PlugId> + '_ {
        let plug = self.plugs.get(&id);
        let consumers = plug.into_iter().flat_map(|p| p.outputs.iter().copied());
        let affected = plug
            .and_then(|p| self.nodes.get(&p.node))
            .into_iter()
            .flat_map(move |node| node.affects(id).iter().copied());
        consumers.chain(affected)
    }

    /// Breadth-first walk from `start`, including `start` itself.
    pub(crate) fn downstream(&self, start: PlugId) -> Vec<PlugId> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id);
            for next in self.successors(id) {
                if !visited.contains(&next) {
                    queue.push_back(next);
                }
            }
        }

        order
    }

    /// Whether connecting `source -> destination` would close a loop.
    pub(crate) fn would_cycle(&self, source: PlugId, destination: PlugId) -> bool {
        if source == destination {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![destination];
        while let Some(id) = stack.pop() {
            if id == source {
                return true;
            }
            if visited.insert(id) {
                stack.extend(self.successors(id));
            }
        }
        false
    }
}
