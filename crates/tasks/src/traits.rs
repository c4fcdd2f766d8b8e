//! `TaskCallable`: the contract every task body must fulfil.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::TaskError;

/// Concrete parameter values handed to a task, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskInputs {
    values: BTreeMap<String, Value>,
}

impl TaskInputs {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Result<&Value, TaskError> {
        self.values
            .get(name)
            .ok_or_else(|| TaskError::MissingInput(name.to_owned()))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, TaskError> {
        self.get(name)?.as_i64().ok_or(TaskError::InvalidInput {
            name: name.to_owned(),
            expected: "integer",
        })
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, TaskError> {
        self.get(name)?.as_f64().ok_or(TaskError::InvalidInput {
            name: name.to_owned(),
            expected: "float",
        })
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, TaskError> {
        self.get(name)?.as_bool().ok_or(TaskError::InvalidInput {
            name: name.to_owned(),
            expected: "boolean",
        })
    }

    pub fn get_str(&self, name: &str) -> Result<&str, TaskError> {
        self.get(name)?.as_str().ok_or(TaskError::InvalidInput {
            name: name.to_owned(),
            expected: "string",
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// What a task hands back to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// The task declares no outputs.
    Unit,
    /// The task declares exactly one output.
    Single(Value),
    /// The task declares several outputs; values are given in declaration order.
    Tuple(Vec<Value>),
}

impl TaskOutput {
    /// Flatten into a positional list of values.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            TaskOutput::Unit => Vec::new(),
            TaskOutput::Single(v) => vec![v],
            TaskOutput::Tuple(vs) => vs,
        }
    }
}

/// The core task trait.
///
/// Task bodies are treated as pure functions over their declared inputs.
pub trait TaskCallable: Send + Sync {
    fn call(&self, inputs: &TaskInputs) -> Result<TaskOutput, TaskError>;
}

impl<F> TaskCallable for F
where
    F: Fn(&TaskInputs) -> Result<TaskOutput, TaskError> + Send + Sync,
{
    fn call(&self, inputs: &TaskInputs) -> Result<TaskOutput, TaskError> {
        self(inputs)
    }
}
