//! Task and workflow definitions, and the frozen graph a workflow body
//! declares.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tasks::TaskCallable;

use crate::builder::WorkflowBuilder;
use crate::node::{Edge, Node};
use crate::promise::{Binding, NodeId};
use crate::types::{LiteralType, TypedInterface, Variable};
use crate::EngineError;

// ---------------------------------------------------------------------------
// TaskDefinition
// ---------------------------------------------------------------------------

/// A declared unit of work: a stable name, a typed signature and the
/// callable that implements it.
pub struct TaskDefinition {
    name: String,
    interface: TypedInterface,
    image: Option<String>,
    callable: Arc<dyn TaskCallable>,
}

impl TaskDefinition {
    /// Start declaring a task. `name` should be fully qualified by the
    /// declaring module, e.g. `app.pipelines.clean.dedupe`.
    pub fn builder(name: impl Into<String>) -> TaskDefinitionBuilder {
        TaskDefinitionBuilder {
            name: name.into(),
            interface: TypedInterface::default(),
            image: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> &TypedInterface {
        &self.interface
    }

    /// Name of the container image this task asks for, if not the default.
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn callable(&self) -> &dyn TaskCallable {
        self.callable.as_ref()
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("interface", &self.interface)
            .field("image", &self.image)
            .finish_non_exhaustive()
    }
}

pub struct TaskDefinitionBuilder {
    name: String,
    interface: TypedInterface,
    image: Option<String>,
}

impl TaskDefinitionBuilder {
    pub fn input(mut self, name: impl Into<String>, ty: LiteralType) -> Self {
        self.interface.inputs.push(Variable::new(name, ty));
        self
    }

    pub fn output(mut self, name: impl Into<String>, ty: LiteralType) -> Self {
        self.interface.outputs.push(Variable::new(name, ty));
        self
    }

    /// Run on a named image from the serialization settings.
    pub fn image(mut self, name: impl Into<String>) -> Self {
        self.image = Some(name.into());
        self
    }

    pub fn build(self, callable: impl TaskCallable + 'static) -> Arc<TaskDefinition> {
        Arc::new(TaskDefinition {
            name: self.name,
            interface: self.interface,
            image: self.image,
            callable: Arc::new(callable),
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// What the remote engine should do when a node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    FailImmediately,
    FailAfterExecutableNodesComplete,
}

/// A workflow body: runs once against a builder and returns the bindings of
/// the declared outputs, in order.
pub type WorkflowBody = dyn Fn(&mut WorkflowBuilder) -> Result<Vec<Binding>, EngineError> + Send + Sync;

/// A declared workflow. The body is not a computation; running it declares
/// the graph.
pub struct WorkflowDefinition {
    name: String,
    interface: TypedInterface,
    on_failure: FailurePolicy,
    body: Box<WorkflowBody>,
}

impl WorkflowDefinition {
    pub fn builder(name: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder {
            name: name.into(),
            interface: TypedInterface::default(),
            on_failure: FailurePolicy::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> &TypedInterface {
        &self.interface
    }

    pub fn on_failure(&self) -> FailurePolicy {
        self.on_failure
    }

    pub(crate) fn run_body(&self, builder: &mut WorkflowBuilder) -> Result<Vec<Binding>, EngineError> {
        (self.body)(builder)
    }

    /// Run the body once and freeze the resulting graph.
    pub fn build_graph(self: &Arc<Self>) -> Result<Arc<WorkflowGraph>, EngineError> {
        crate::subworkflow::build_graph(self)
    }
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("interface", &self.interface)
            .field("on_failure", &self.on_failure)
            .finish_non_exhaustive()
    }
}

pub struct WorkflowDefinitionBuilder {
    name: String,
    interface: TypedInterface,
    on_failure: FailurePolicy,
}

impl WorkflowDefinitionBuilder {
    pub fn input(mut self, name: impl Into<String>, ty: LiteralType) -> Self {
        self.interface.inputs.push(Variable::new(name, ty));
        self
    }

    pub fn output(mut self, name: impl Into<String>, ty: LiteralType) -> Self {
        self.interface.outputs.push(Variable::new(name, ty));
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn body<F>(self, body: F) -> Arc<WorkflowDefinition>
    where
        F: Fn(&mut WorkflowBuilder) -> Result<Vec<Binding>, EngineError> + Send + Sync + 'static,
    {
        Arc::new(WorkflowDefinition {
            name: self.name,
            interface: self.interface,
            on_failure: self.on_failure,
            body: Box::new(body),
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// A finished, validated workflow graph. Never mutated after construction.
#[derive(Debug)]
pub struct WorkflowGraph {
    pub(crate) name: String,
    pub(crate) interface: TypedInterface,
    pub(crate) on_failure: FailurePolicy,
    /// Every node declared by the body, including branch members,
    /// indexed by `NodeId`.
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: Vec<Edge>,
    /// Top-level nodes in execution order.
    pub(crate) order: Vec<NodeId>,
    pub(crate) outputs: Vec<Binding>,
}

impl WorkflowGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> &TypedInterface {
        &self.interface
    }

    pub fn on_failure(&self) -> FailurePolicy {
        self.on_failure
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// All nodes, branch members included.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Top-level nodes in the deterministic order both the executor and the
    /// compiler use.
    pub fn execution_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Output bindings, aligned with `interface().outputs`.
    pub fn outputs(&self) -> &[Binding] {
        &self.outputs
    }
}
