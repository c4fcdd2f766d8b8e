//! The boundary between the workflow engine and the code
//! that actually runs a task.
//!
//! The engine never looks inside a task: it hands a [`TaskCallable`] the
//! concrete value of every declared parameter and gets back a [`TaskOutput`].

pub mod error;
pub mod traits;
pub mod mock;

pub use error::TaskError;
pub use traits::{TaskCallable, TaskInputs, TaskOutput};
