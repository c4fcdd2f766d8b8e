//! Serializable workflow templates: the contract handed to a remote
//! orchestration transport.
//!
//! Encoding is the transport's business; everything here derives `serde`
//! so JSON is available out of the box.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conditional::{ComparisonOp, ConjunctionOp};
use crate::types::TypedInterface;
use crate::workflow::FailurePolicy;

/// Node id used for bindings that read a workflow input.
pub const START_NODE_ID: &str = "start-node";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Task,
    Workflow,
}

/// Globally stable, remote-addressable name of a task or workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub resource_type: ResourceType,
    pub project: String,
    pub domain: String,
    pub name: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputReference {
    pub node_id: String,
    pub var: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BindingData {
    Promise(OutputReference),
    Scalar { value: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingTemplate {
    pub var: String,
    pub binding: BindingData,
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BooleanExpression {
    Comparison {
        operator: ComparisonOp,
        left_value: BindingData,
        right_value: BindingData,
    },
    Conjunction {
        operator: ConjunctionOp,
        left_expression: Box<BooleanExpression>,
        right_expression: Box<BooleanExpression>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchTarget {
    Nodes {
        nodes: Vec<NodeTemplate>,
        outputs: Vec<BindingTemplate>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBlock {
    pub condition: BooleanExpression,
    pub then_node: BranchTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfElseBlock {
    pub cases: Vec<IfBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_node: Option<BranchTarget>,
}

// ---------------------------------------------------------------------------
// Nodes and workflows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeTarget {
    TaskNode { reference_id: Identifier },
    WorkflowNode { sub_workflow_ref: Identifier },
    BranchNode { if_else: IfElseBlock },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTemplate {
    /// `n<declaration id>`, stable across compiles.
    pub id: String,
    pub metadata: NodeMetadata,
    pub inputs: Vec<BindingTemplate>,
    pub upstream_node_ids: Vec<String>,
    pub target: NodeTarget,
}

impl NodeTemplate {
    pub fn task_reference(&self) -> Option<&Identifier> {
        match &self.target {
            NodeTarget::TaskNode { reference_id } => Some(reference_id),
            _ => None,
        }
    }

    pub fn sub_workflow_reference(&self) -> Option<&Identifier> {
        match &self.target {
            NodeTarget::WorkflowNode { sub_workflow_ref } => Some(sub_workflow_ref),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub on_failure: FailurePolicy,
}

/// Compiled form of one workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: Identifier,
    pub metadata: WorkflowMetadata,
    pub interface: TypedInterface,
    /// Top-level nodes in execution order.
    pub nodes: Vec<NodeTemplate>,
    pub outputs: Vec<BindingTemplate>,
    /// Templates of the workflows this one invokes, first use first.
    pub sub_workflows: Vec<WorkflowTemplate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: Identifier,
    pub interface: TypedInterface,
    pub container: Container,
}

/// Everything needed to register a workflow remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledWorkflow {
    pub template: WorkflowTemplate,
    /// Every task referenced anywhere in the template, first use first.
    pub tasks: Vec<TaskTemplate>,
}
