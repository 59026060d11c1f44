//! Evaluation
//!
//! Pull-based, depth-first evaluation of output plugs.
//!
//! # How It Works
//!
//! 1. **Hash.** An output's hash is derived from its declaration alone: the
//!    node type name, the plug name, the node type's own parameters, the
//!    hash of every declared plug dependency and the value of every
//!    declared context variable. Input
//!    hashes come from the upstream plug when connected, otherwise from the
//!    stored value. Nothing is computed to get a hash, and a known hash is
//!    reused until dirty propagation forgets it.
//!
//! 2. **Value.** With the hash in hand the shared [`ComputeCache`] is asked
//!    for it. A hit makes the plug clean without calling `compute`; a miss
//!    runs the node's compute function (at most once per hash across all
//!    threads) and stores the result.
//!
//! 3. **Failure.** Compute errors and panics are wrapped with the name of
//!    the failing output and returned to the caller. Nothing is cached and
//!    the plug does not become clean, so the next request tries again.
//!
//! An [`Evaluation`] borrows the graph's topology for its whole run; the
//! graph holds a read lock for that time so structural edits and dirty
//! propagation cannot interleave with it.

mod cache;
mod inputs;
mod stack;
mod state;

use std::panic::{self, AssertUnwindSafe};

use tracing::trace;

pub use cache::{CacheStats, ComputeCache};
pub use inputs::ComputeInputs;
pub use state::PlugState;

pub(crate) use state::StateTable;

use stack::{EnterError, EvalFrame};

use crate::config::GraphConfig;
use crate::context::Context;
use crate::error::{GraphError, Result};
use crate::graph::node::{Node, ResolvedDependencies};
use crate::graph::topology::Topology;
use crate::graph::PlugId;
use crate::graph::plug::Plug;
use crate::hash::{Hash, Hasher};
use crate::signal::panic_message;
use crate::value::Value;

/// One pull through a borrowed graph.
pub(crate) struct Evaluation<'g> {
    topology: &'g Topology,
    states: &'g StateTable,
    cache: &'g ComputeCache,
    config: &'g GraphConfig,
}

impl<'g> Evaluation<'g> {
    pub(crate) fn new(
        topology: &'g Topology,
        states: &'g StateTable,
        cache: &'g ComputeCache,
        config: &'g GraphConfig,
    ) -> Self {
        Self {
            topology,
            states,
            cache,
            config,
        }
    }

    pub(crate) fn full_name(&self, plug: PlugId) -> String {
        self.topology.full_name(plug)
    }

    fn enter(&self, plug: PlugId, context: &Context) -> Result<EvalFrame> {
        EvalFrame::enter(plug, context.hash(), self.config.max_evaluation_depth).map_err(|err| match err {
            EnterError::Reentrant => GraphError::EvaluationCycle {
                plug: self.full_name(plug),
            },
            EnterError::TooDeep { limit } => GraphError::DepthExceeded { limit },
        })
    }

    /// The content hash of `plug` in `context`.
    pub(crate) fn hash(&self, plug: PlugId, context: &Context) -> Result<Hash> {
        let p = self.topology.plug(plug)?;
        if p.is_input() {
            return match p.input {
                Some(source) => self.hash(source, context),
                None => Ok(p.value_hash),
            };
        }

        if let Some(known) = self.states.get(plug, context.hash()).hash() {
            return Ok(known);
        }

        let _frame = self.enter(plug, context)?;
        let node = self.topology.node(p.node)?;
        let mut hasher = Hasher::new();
        hasher.append_str(node.type_name()).append_str(&p.name);
        let mut parameters = Hasher::new();
        node.node_type().hash_parameters(&p.name, &mut parameters);
        hasher.append_hash(&parameters.finish());
        if let Some(deps) = node.dependencies(plug) {
            for &dep in &deps.plugs {
                hasher.append_hash(&self.hash(dep, context)?);
            }
            for var in &deps.context {
                hasher.append_str(var);
                match context.get(var) {
                    Some(value) => {
                        hasher.append_u8(1);
                        value.hash_into(&mut hasher);
                    }
                    None => {
                        hasher.append_u8(0);
                    }
                }
            }
        }
        let hash = hasher.finish();
        self.states.record_hash(plug, context.hash(), hash);
        Ok(hash)
    }

    /// The effective value of `plug` in `context`.
    pub(crate) fn value(&self, plug: PlugId, context: &Context) -> Result<Value> {
        let p = self.topology.plug(plug)?;
        if p.is_input() {
            return match p.input {
                Some(source) => self.value(source, context),
                None => Ok(p.value.clone()),
            };
        }

        let hash = self.hash(plug, context)?;
        let _frame = self.enter(plug, context)?;
        trace!(plug = %self.full_name(plug), %hash, "pulling output");

        let node = self.topology.node(p.node)?;
        let value = self
            .cache
            .get_or_compute(hash, || self.compute(node, p, context))?;
        self.states.mark_clean(plug, context.hash(), hash);
        Ok(value)
    }

    /// Run the node's compute function for output `p`.
    fn compute(&self, node: &Node, p: &Plug, context: &Context) -> Result<Value> {
        let empty = ResolvedDependencies::default();
        let deps = node.dependencies(p.id).unwrap_or(&empty);
        let inputs = ComputeInputs::new(self, node, p.id, &p.name, deps, context);

        let wrap = |source: GraphError| GraphError::Compute {
            plug: self.full_name(p.id),
            source: Box::new(source),
        };

        trace!(node = node.name(), output = %p.name, "computing");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            node.node_type().compute(&p.name, &inputs)
        }));
        let value = match outcome {
            Ok(result) => result.map_err(wrap)?,
            Err(payload) => return Err(wrap(GraphError::Panicked(panic_message(&*payload)))),
        };

        let got = value.value_type();
        if !p.value_type.accepts(&got) {
            return Err(wrap(GraphError::TypeMismatch {
                expected: p.value_type.clone(),
                got,
            }));
        }
        Ok(value)
    }
}
