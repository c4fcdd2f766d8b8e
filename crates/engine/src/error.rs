//! Engine-level error types.

use tasks::TaskError;
use thiserror::Error;

/// Errors produced by the workflow engine (declaration, validation,
/// simulated execution and compilation).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Graph errors ------

    /// Merged data and control edges contain a cycle.
    #[error("workflow '{workflow}' contains a dependency cycle involving: {involved}")]
    Cycle { workflow: String, involved: String },

    /// A workflow (directly or transitively) invokes itself.
    #[error("workflow '{0}' invokes itself recursively")]
    RecursiveWorkflow(String),

    /// A binding or ordering declaration points at a node that is not
    /// visible from the current graph scope.
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    // ------ Declaration errors ------

    /// A promise, literal or branch output does not fit the declared type.
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    /// A declared parameter was not bound.
    #[error("missing input '{name}' for '{target}'")]
    MissingInput { target: String, name: String },

    /// The same parameter was bound twice.
    #[error("input '{name}' bound more than once for '{target}'")]
    DuplicateInput { target: String, name: String },

    /// A binding names a parameter that does not exist.
    #[error("'{target}' has no parameter named '{name}'")]
    UnknownParameter { target: String, name: String },

    /// Number of produced outputs differs from the declared interface.
    #[error("'{target}' declares {expected} output(s) but {found} were provided")]
    OutputArity {
        target: String,
        expected: usize,
        found: usize,
    },

    /// Serialization settings are incomplete or inconsistent.
    #[error("invalid serialization settings: {0}")]
    InvalidSettings(String),

    // ------ Simulated execution errors ------

    /// No predicate matched and the conditional has no default branch.
    #[error("conditional '{0}': no branch matched and no default branch was declared")]
    NoBranchMatched(String),

    /// The selected branch was declared as a failure.
    #[error("conditional '{conditional}' selected a failing branch: {message}")]
    BranchFailed { conditional: String, message: String },

    /// A task body failed; surfaced exactly as the task reported it.
    #[error(transparent)]
    Task(#[from] TaskError),
}
