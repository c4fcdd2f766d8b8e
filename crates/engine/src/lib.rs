//! Dependency graph builder, local simulator and template
//! compiler for declared workflows.
//!
//! A workflow body runs once against a [`WorkflowBuilder`]: task calls,
//! nested workflow calls and conditionals become nodes, consumed promises
//! become data edges and `declare_after` becomes control edges. The frozen
//! [`WorkflowGraph`] is then either simulated by [`LocalExecutor`] or
//! compiled by [`TemplateCompiler`].

pub mod types;
pub mod promise;
pub mod node;
pub mod error;
pub mod workflow;
pub mod builder;
pub mod conditional;
pub mod subworkflow;
pub mod dag;
pub mod executor;
pub mod config;
pub mod template;
pub mod compiler;

pub use builder::WorkflowBuilder;
pub use compiler::TemplateCompiler;
pub use conditional::Predicate;
pub use config::{Image, ImageConfig, SerializationSettings};
pub use dag::validate_dag;
pub use error::EngineError;
pub use executor::{LocalExecutor, SimulationResult, TraceEntry};
pub use node::{EdgeKind, NodeKind};
pub use promise::{Binding, NodeId, NodeOutput, NodeRef, Promise};
pub use template::{CompiledWorkflow, WorkflowTemplate};
pub use types::{LiteralType, TypedInterface, Variable};
pub use workflow::{FailurePolicy, TaskDefinition, WorkflowDefinition, WorkflowGraph};
