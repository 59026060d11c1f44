//! Node Types
//!
//! A [`NodeType`] describes one kind of node: its plugs, what each output
//! depends on, and how each output is computed. Nodes in a graph are
//! instances of a type.
//!
//! The dependency declaration is the single source of truth. From it the
//! graph derives:
//!
//! - the `affects` relation used for dirty propagation (by inverting it),
//! - the output's content hash (by hashing each declared dependency),
//! - the set of plugs and context variables `compute` is allowed to read.
//!
//! A compute function therefore cannot read something its hash does not
//! cover: [`ComputeInputs`] refuses any undeclared name. State carried by
//! the node type itself (a scale factor, a mode) is not a plug, so it enters
//! the hash through [`NodeType::hash_parameters`] instead.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::plug::Direction;
use crate::error::{GraphError, Result};
use crate::eval::ComputeInputs;
use crate::hash::Hasher;
use crate::value::{Value, ValueType};

/// Declaration of one plug on a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct PlugSpec {
    pub name: String,
    pub direction: Direction,
    pub value_type: ValueType,
    /// Initial value for inputs.
    pub default: Value,
}

impl PlugSpec {
    /// An input plug defaulting to the zero value of its type.
    pub fn input(name: impl Into<String>, value_type: ValueType) -> Self {
        let default = Value::default_for(&value_type);
        Self {
            name: name.into(),
            direction: Direction::In,
            value_type,
            default,
        }
    }

    /// An output plug.
    pub fn output(name: impl Into<String>, value_type: ValueType) -> Self {
        let default = Value::default_for(&value_type);
        Self {
            name: name.into(),
            direction: Direction::Out,
            value_type,
            default,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }
}

/// What an output reads: plugs on the same node (inputs, or other outputs)
/// and context variables, in the order they are hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    plugs: SmallVec<[String; 4]>,
    context: SmallVec<[String; 2]>,
}

impl Dependencies {
    /// An output that reads nothing (a constant).
    pub fn none() -> Self {
        Self::default()
    }

    /// An output reading the named plugs.
    pub fn on<I, S>(plugs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            plugs: plugs.into_iter().map(Into::into).collect(),
            context: SmallVec::new(),
        }
    }

    pub fn plug(mut self, name: impl Into<String>) -> Self {
        self.plugs.push(name.into());
        self
    }

    /// Also read a context variable.
    pub fn context(mut self, name: impl Into<String>) -> Self {
        self.context.push(name.into());
        self
    }

    pub fn plugs(&self) -> &[String] {
        &self.plugs
    }

    pub fn context_vars(&self) -> &[String] {
        &self.context
    }
}

/// A kind of node.
///
/// Implementations must be pure: `plugs` and `dependencies` return the same
/// answer every time, and `compute` depends only on what `inputs` hands it
/// and on what `hash_parameters` feeds into the hash.
///
/// The compute cache is keyed by hash alone and may be shared between
/// graphs, so two types with the same name must either compute the same
/// thing or hash their differences.
pub trait NodeType: Send + Sync + 'static {
    /// Name used for registration, hashing and snapshots.
    fn type_name(&self) -> &str;

    /// Plugs in enumeration order.
    fn plugs(&self) -> Vec<PlugSpec>;

    /// What `output` reads. Only called for output plugs.
    fn dependencies(&self, output: &str) -> Dependencies;

    /// Produce the value of `output`.
    fn compute(&self, output: &str, inputs: &ComputeInputs<'_>) -> Result<Value>;

    /// Feed node-local parameters of `output` into its hash.
    ///
    /// Anything `compute` reads that is not a declared plug or context
    /// variable belongs here. The default hashes nothing.
    fn hash_parameters(&self, output: &str, hasher: &mut Hasher) {
        let _ = (output, hasher);
    }
}

type ComputeFn = Arc<dyn Fn(&ComputeInputs<'_>) -> Result<Value> + Send + Sync>;

/// A node type assembled from closures.
///
/// ```rust,ignore
/// let add = FnNode::new("Add")
///     .input("a", ValueType::Float)
///     .input("b", ValueType::Float)
///     .output("sum", ValueType::Float, Dependencies::on(["a", "b"]), |inputs| {
///         Ok(Value::Float(inputs.float("a")? + inputs.float("b")?))
///     });
/// ```
///
/// Closures that capture configuration must declare it with
/// [`FnNode::parameter`], otherwise two builds with the same type name
/// share cache entries.
#[derive(Clone)]
pub struct FnNode {
    type_name: String,
    plugs: Vec<PlugSpec>,
    parameters: Vec<(String, Value)>,
    outputs: HashMap<String, (Dependencies, ComputeFn)>,
}

impl FnNode {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            plugs: Vec::new(),
            parameters: Vec::new(),
            outputs: HashMap::new(),
        }
    }

    /// Declare a node-local parameter. It is hashed into every output.
    /// Setting the same name twice replaces the earlier value.
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.parameters.push((name, value)),
        }
        self
    }

    pub fn parameters(&self) -> &[(String, Value)] {
        &self.parameters
    }

    pub fn input(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.plugs.push(PlugSpec::input(name, value_type));
        self
    }

    /// An input with an explicit default value.
    pub fn input_with_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        let default = default.into();
        self.plugs
            .push(PlugSpec::input(name, default.value_type()).with_default(default));
        self
    }

    pub fn output<F>(
        mut self,
        name: impl Into<String>,
        value_type: ValueType,
        dependencies: Dependencies,
        compute: F,
    ) -> Self
    where
        F: Fn(&ComputeInputs<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        self.plugs.push(PlugSpec::output(name.clone(), value_type));
        self.outputs.insert(name, (dependencies, Arc::new(compute)));
        self
    }

    /// Finish building.
    pub fn build(self) -> Arc<dyn NodeType> {
        Arc::new(self)
    }
}

impl NodeType for FnNode {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn plugs(&self) -> Vec<PlugSpec> {
        self.plugs.clone()
    }

    fn dependencies(&self, output: &str) -> Dependencies {
        self.outputs
            .get(output)
            .map(|(deps, _)| deps.clone())
            .unwrap_or_default()
    }

    fn compute(&self, output: &str, inputs: &ComputeInputs<'_>) -> Result<Value> {
        let (_, compute) = self
            .outputs
            .get(output)
            .ok_or_else(|| GraphError::custom(format!("{} has no output `{output}`", self.type_name)))?;
        compute(inputs)
    }

    fn hash_parameters(&self, _output: &str, hasher: &mut Hasher) {
        for (name, value) in &self.parameters {
            hasher.append_str(name);
            value.hash_into(hasher);
        }
    }
}

impl fmt::Debug for FnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnNode")
            .field("type_name", &self.type_name)
            .field("plugs", &self.plugs.iter().map(|p| &p.name).collect::<Vec<_>>())
            .field("parameters", &self.parameters)
            .finish()
    }
}
