//! A recording test double for `TaskCallable`.
//!
//! Every call is appended to a [`CallLog`] that can be shared between many
//! mocks, so tests can assert the exact order in which tasks ran.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::{TaskCallable, TaskError, TaskInputs, TaskOutput};

/// Shared, ordered record of task invocations.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.into());
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Behaviour injected into `MockTask` at construction time.
pub enum MockBehaviour {
    /// Return a fixed output.
    Return(TaskOutput),
    /// Compute the output from the inputs.
    Compute(Box<dyn Fn(&TaskInputs) -> Result<TaskOutput, TaskError> + Send + Sync>),
    /// Fail with the given message.
    Fail(String),
}

/// A mock task that records every call it receives.
pub struct MockTask {
    /// Label written to the call log.
    pub name: String,
    /// What the task will do when `call` is invoked.
    pub behaviour: MockBehaviour,
    /// All inputs seen by this task (in call order).
    pub calls: Arc<Mutex<Vec<TaskInputs>>>,
    log: CallLog,
}

impl MockTask {
    fn with_behaviour(name: impl Into<String>, log: &CallLog, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            log: log.clone(),
        }
    }

    /// A mock with no outputs.
    pub fn unit(name: impl Into<String>, log: &CallLog) -> Self {
        Self::with_behaviour(name, log, MockBehaviour::Return(TaskOutput::Unit))
    }

    /// A mock that always returns `value`.
    pub fn returning(name: impl Into<String>, log: &CallLog, value: Value) -> Self {
        Self::with_behaviour(name, log, MockBehaviour::Return(TaskOutput::Single(value)))
    }

    /// A mock whose output is computed from its inputs.
    pub fn computing<F>(name: impl Into<String>, log: &CallLog, f: F) -> Self
    where
        F: Fn(&TaskInputs) -> Result<TaskOutput, TaskError> + Send + Sync + 'static,
    {
        Self::with_behaviour(name, log, MockBehaviour::Compute(Box::new(f)))
    }

    /// A mock that always fails.
    pub fn failing(name: impl Into<String>, log: &CallLog, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, log, MockBehaviour::Fail(msg.into()))
    }

    /// Number of times this task has been called.
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl TaskCallable for MockTask {
    fn call(&self, inputs: &TaskInputs) -> Result<TaskOutput, TaskError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(inputs.clone());
        self.log.record(self.name.clone());
        debug!(task = %self.name, "mock task called");

        match &self.behaviour {
            MockBehaviour::Return(output) => Ok(output.clone()),
            MockBehaviour::Compute(f) => f(inputs),
            MockBehaviour::Fail(msg) => Err(TaskError::Failed(msg.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shared_log_records_call_order() {
        let log = CallLog::new();
        let a = MockTask::unit("a", &log);
        let b = MockTask::returning("b", &log, json!(2));

        b.call(&TaskInputs::default()).unwrap();
        a.call(&TaskInputs::default()).unwrap();
        b.call(&TaskInputs::default()).unwrap();

        assert_eq!(log.entries(), vec!["b", "a", "b"]);
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 2);
    }

    #[test]
    fn failing_mock_still_records_the_call() {
        let log = CallLog::new();
        let boom = MockTask::failing("boom", &log, "kaput");
        let err = boom.call(&TaskInputs::default()).unwrap_err();
        assert_eq!(err, TaskError::Failed("kaput".into()));
        assert_eq!(log.entries(), vec!["boom"]);
    }
}
