//! Task-level error type.

use thiserror::Error;

/// Errors returned by a task's `call` method.
///
/// The engine never retries: whichever variant a task returns is surfaced to
/// the caller of the simulated run as-is.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    /// The task body itself failed.
    #[error("task failed: {0}")]
    Failed(String),

    /// A parameter the task expected was not supplied.
    #[error("missing task input '{0}'")]
    MissingInput(String),

    /// A parameter was supplied but could not be read as the expected type.
    #[error("task input '{name}' is not a valid {expected}")]
    InvalidInput {
        name: String,
        expected: &'static str,
    },
}
