//! Graph vertices and edges.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::conditional::ConditionalNode;
use crate::promise::{Binding, NodeId};
use crate::types::Variable;
use crate::workflow::{TaskDefinition, WorkflowDefinition, WorkflowGraph};

/// Index of a declaration scope. Scope 0 is the workflow body itself; each
/// conditional branch opens a child scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub usize);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Task,
    Conditional,
    SubWorkflow,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Task => "task",
            NodeKind::Conditional => "conditional",
            NodeKind::SubWorkflow => "sub_workflow",
        })
    }
}

/// How an edge came to exist. Only kept for diagnostics: for scheduling,
/// both kinds are plain "must run before" constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// A promise was consumed.
    Data,
    /// An explicit ordering declaration.
    Control,
}

/// Directed edge `from` → `to` (`from` runs first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EdgeKind::Data => "data",
            EdgeKind::Control => "control",
        };
        write!(f, "{} -> {} ({kind})", self.from, self.to)
    }
}

/// What a node wraps.
pub enum NodePayload {
    Task(Arc<TaskDefinition>),
    SubWorkflow {
        definition: Arc<WorkflowDefinition>,
        graph: Arc<WorkflowGraph>,
    },
    Conditional(ConditionalNode),
}

impl fmt::Debug for NodePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodePayload::Task(task) => f.debug_tuple("Task").field(&task.name()).finish(),
            NodePayload::SubWorkflow { graph, .. } => {
                f.debug_tuple("SubWorkflow").field(&graph.name()).finish()
            }
            NodePayload::Conditional(c) => f.debug_tuple("Conditional").field(c).finish(),
        }
    }
}

/// A vertex of a workflow graph.
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    /// Task or workflow name, or the conditional's label.
    pub name: String,
    /// Scope the node was declared in.
    pub scope: ScopeId,
    /// Parameter bindings, in the callee's declared input order.
    pub inputs: Vec<(String, Binding)>,
    pub upstream: BTreeSet<NodeId>,
    pub downstream: BTreeSet<NodeId>,
    pub payload: NodePayload,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self.payload {
            NodePayload::Task(_) => NodeKind::Task,
            NodePayload::SubWorkflow { .. } => NodeKind::SubWorkflow,
            NodePayload::Conditional(_) => NodeKind::Conditional,
        }
    }

    /// Declared outputs of this node.
    pub fn outputs(&self) -> &[Variable] {
        match &self.payload {
            NodePayload::Task(task) => &task.interface().outputs,
            NodePayload::SubWorkflow { graph, .. } => &graph.interface().outputs,
            NodePayload::Conditional(c) => &c.outputs,
        }
    }
}
