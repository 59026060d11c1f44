//! Error Types
//!
//! Every fallible graph operation returns [`GraphError`]. Structural errors
//! (cycles, type mismatches, read-only writes) are raised before the graph is
//! touched, so the caller can simply choose a different action. Compute
//! errors are wrapped with the node and plug that failed and handed to
//! whoever asked for the value.
//!
//! `GraphError` is `Clone` because a single failed computation may have
//! several requesters waiting on it.

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::{NodeId, PlugId};
use crate::value::ValueType;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by graph edits and evaluation.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// No node with this id exists in the graph.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// No plug with this id exists in the graph.
    #[error("plug not found: {0}")]
    PlugNotFound(PlugId),

    /// A node has no plug with the given name.
    #[error("node {node} has no plug named `{name}`")]
    UnknownPlug {
        /// The node that was searched.
        node: String,
        /// The missing plug name.
        name: String,
    },

    /// Connecting `upstream` into `downstream` would close a loop.
    #[error("connecting {upstream} -> {downstream} would create a cycle")]
    Cycle {
        /// Upstream end of the rejected connection.
        upstream: String,
        /// Downstream end of the rejected connection.
        downstream: String,
    },

    /// Value or connection types are incompatible.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Type required by the plug.
        expected: ValueType,
        /// Type that was offered.
        got: ValueType,
    },

    /// Attempted to write a plug whose value is not locally owned.
    #[error("plug {plug} is read-only: {reason}")]
    ReadOnly {
        /// Full name of the plug.
        plug: String,
        /// Why the write was refused.
        reason: &'static str,
    },

    /// The connection is structurally invalid (e.g. into an output).
    #[error("invalid connection {upstream} -> {downstream}: {reason}")]
    InvalidConnection {
        /// Upstream end.
        upstream: String,
        /// Downstream end.
        downstream: String,
        /// Why the connection was refused.
        reason: &'static str,
    },

    /// A compute function asked for a plug or context variable that its
    /// output does not declare as a dependency.
    #[error("undeclared dependency `{name}` read while computing {plug}")]
    UndeclaredDependency {
        /// The output being computed.
        plug: String,
        /// The plug or context variable that was requested.
        name: String,
    },

    /// A plug was re-entered while already being evaluated on this thread.
    #[error("re-entrant evaluation of {plug}")]
    EvaluationCycle {
        /// Full name of the plug.
        plug: String,
    },

    /// The upstream chain is deeper than the configured limit.
    #[error("evaluation depth limit of {limit} exceeded")]
    DepthExceeded {
        /// Configured limit.
        limit: usize,
    },

    /// A node's compute function failed.
    #[error("compute failed for {plug}: {source}")]
    Compute {
        /// Full name of the output plug.
        plug: String,
        /// The underlying failure.
        #[source]
        source: Box<GraphError>,
    },

    /// A compute function panicked.
    #[error("compute panicked: {0}")]
    Panicked(String),

    /// The node registry has no factory for this type name.
    #[error("unknown node type `{0}`")]
    UnknownNodeType(String),

    /// A node type declared an inconsistent plug layout.
    #[error("invalid node type `{type_name}`: {reason}")]
    InvalidNodeType {
        /// Offending type.
        type_name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Snapshot encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Free-form error raised by node implementations.
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    /// Convenience constructor for node implementations.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Whether this error came out of a node's compute function.
    pub fn is_compute(&self) -> bool {
        matches!(self, Self::Compute { .. } | Self::Panicked(_))
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The contents were not valid configuration JSON.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value parsed but is out of range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}
