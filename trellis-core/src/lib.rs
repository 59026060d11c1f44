//! Trellis Core
//!
//! A lazily evaluated, hash-memoized dependency graph for node-based
//! authoring tools. It implements:
//!
//! - Typed nodes and plugs with declared dependencies
//! - Dirty propagation through connections and `affects` relations
//! - Content-hash memoization in a shared, bounded LRU cache
//! - Parallel pulls with at-most-once computation per hash
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: nodes, plugs, connections and the [`Graph`] façade
//! - `eval`: hashing, value pulls and the [`ComputeCache`]
//! - `value` / `context`: what flows through plugs and what they are
//!   evaluated in
//! - `signal`: change notification for presentation layers
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{Context, Dependencies, FnNode, Graph, Value, ValueType};
//!
//! let add = FnNode::new("Add")
//!     .input("a", ValueType::Float)
//!     .input("b", ValueType::Float)
//!     .output("sum", ValueType::Float, Dependencies::on(["a", "b"]), |i| {
//!         Ok(Value::Float(i.float("a")? + i.float("b")?))
//!     })
//!     .build();
//!
//! let graph = Graph::new();
//! let node = graph.add_node("add", add)?;
//! graph.set_value(graph.plug(node, "a")?, 2.0)?;
//! graph.set_value(graph.plug(node, "b")?, 3.0)?;
//!
//! let sum = graph.get_value(graph.plug(node, "sum")?, &Context::new())?;
//! assert_eq!(sum, Value::Float(5.0));
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod eval;
pub mod graph;
pub mod hash;
pub mod signal;
pub mod value;

pub use config::{CacheConfig, Config, GraphConfig};
pub use context::Context;
pub use error::{ConfigError, GraphError, Result};
pub use eval::{CacheStats, ComputeCache, ComputeInputs, PlugState};
pub use graph::{
    ConnectionChanged, Dependencies, Direction, Dirtied, FnNode, Graph, GraphSnapshot, Node, NodeId,
    NodeRegistry, NodeType, PlugId, PlugInfo, PlugSpec,
};
pub use hash::Hash;
pub use signal::{Signal, SlotError, Subscription};
pub use value::{OpaqueValue, Payload, Value, ValueType};
