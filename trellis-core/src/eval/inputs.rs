//! Compute Inputs
//!
//! The view a compute function gets of the graph. Values are pulled lazily,
//! one name at a time, and only names the output declared as dependencies
//! are served. Anything else fails with
//! [`GraphError::UndeclaredDependency`], which keeps `compute` honest about
//! what its hash covers.

use std::sync::Arc;

use super::Evaluation;
use crate::context::{Context, FRAME};
use crate::error::{GraphError, Result};
use crate::graph::node::{Node, ResolvedDependencies};
use crate::graph::PlugId;
use crate::value::{OpaqueValue, Value, ValueType};

/// Read access to the declared dependencies of one output.
pub struct ComputeInputs<'a> {
    evaluation: &'a Evaluation<'a>,
    node: &'a Node,
    output: PlugId,
    output_name: &'a str,
    dependencies: &'a ResolvedDependencies,
    context: &'a Context,
}

impl<'a> ComputeInputs<'a> {
    pub(crate) fn new(
        evaluation: &'a Evaluation<'a>,
        node: &'a Node,
        output: PlugId,
        output_name: &'a str,
        dependencies: &'a ResolvedDependencies,
        context: &'a Context,
    ) -> Self {
        Self {
            evaluation,
            node,
            output,
            output_name,
            dependencies,
            context,
        }
    }

    /// Name of the output being computed.
    pub fn output(&self) -> &str {
        self.output_name
    }

    fn undeclared(&self, name: &str) -> GraphError {
        GraphError::UndeclaredDependency {
            plug: self.evaluation.full_name(self.output),
            name: name.to_string(),
        }
    }

    /// The effective value of a declared plug.
    pub fn get(&self, name: &str) -> Result<Value> {
        let plug = self
            .node
            .plug(name)
            .filter(|id| self.dependencies.plugs.contains(id))
            .ok_or_else(|| self.undeclared(name))?;
        self.evaluation.value(plug, self.context)
    }

    /// A declared context variable, or `None` if the context does not set it.
    pub fn var(&self, name: &str) -> Result<Option<&'a Value>> {
        if !self.dependencies.context.iter().any(|v| v.as_ref() == name) {
            return Err(self.undeclared(name));
        }
        Ok(self.context.get(name))
    }

    /// The current frame. The output must declare the frame variable.
    pub fn frame(&self) -> Result<f64> {
        self.var(FRAME)?;
        Ok(self.context.frame())
    }

    pub fn float(&self, name: &str) -> Result<f64> {
        let value = self.get(name)?;
        value.as_float().ok_or_else(|| mismatch(ValueType::Float, &value))
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        let value = self.get(name)?;
        value.as_int().ok_or_else(|| mismatch(ValueType::Int, &value))
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        let value = self.get(name)?;
        value.as_bool().ok_or_else(|| mismatch(ValueType::Bool, &value))
    }

    pub fn string(&self, name: &str) -> Result<Arc<str>> {
        match self.get(name)? {
            Value::String(s) => Ok(s),
            other => Err(mismatch(ValueType::String, &other)),
        }
    }

    pub fn float_array(&self, name: &str) -> Result<Arc<[f64]>> {
        match self.get(name)? {
            Value::FloatArray(values) => Ok(values),
            other => Err(mismatch(ValueType::FloatArray, &other)),
        }
    }

    /// An opaque payload; downcast it with [`OpaqueValue::downcast_ref`].
    pub fn opaque(&self, name: &str) -> Result<OpaqueValue> {
        match self.get(name)? {
            Value::Opaque(payload) => Ok(payload),
            other => Err(mismatch(ValueType::Opaque(String::new()), &other)),
        }
    }
}

fn mismatch(expected: ValueType, got: &Value) -> GraphError {
    GraphError::TypeMismatch {
        expected,
        got: got.value_type(),
    }
}
