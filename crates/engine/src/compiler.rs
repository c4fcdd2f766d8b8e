//! Template compiler: turns a finished graph into a [`CompiledWorkflow`].
//!
//! Compilation never runs a task body. Nodes come out in the executor's
//! order, so compiling the same declaration twice gives identical templates.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::conditional::{BranchBody, Predicate};
use crate::config::SerializationSettings;
use crate::node::NodePayload;
use crate::promise::{Binding, NodeId};
use crate::template::{
    BindingData, BindingTemplate, BooleanExpression, BranchTarget, CompiledWorkflow, Container,
    Identifier, IfBlock, IfElseBlock, NodeMetadata, NodeTarget, NodeTemplate, OutputReference,
    ResourceType, TaskTemplate, WorkflowMetadata, WorkflowTemplate, START_NODE_ID,
};
use crate::workflow::{TaskDefinition, WorkflowDefinition, WorkflowGraph};
use crate::EngineError;

/// Compiles workflows against one set of serialization settings.
#[derive(Debug, Clone)]
pub struct TemplateCompiler {
    settings: SerializationSettings,
}

impl TemplateCompiler {
    pub fn new(settings: SerializationSettings) -> Result<Self, EngineError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &SerializationSettings {
        &self.settings
    }

    /// Declare `workflow` and compile the resulting graph.
    #[instrument(skip(self, workflow), fields(workflow = %workflow.name()))]
    pub fn compile(&self, workflow: &Arc<WorkflowDefinition>) -> Result<CompiledWorkflow, EngineError> {
        let graph = workflow.build_graph()?;
        self.compile_graph(&graph)
    }

    /// Compile an already built graph.
    pub fn compile_graph(&self, graph: &WorkflowGraph) -> Result<CompiledWorkflow, EngineError> {
        let mut tasks: Vec<Arc<TaskDefinition>> = Vec::new();
        let template = self.workflow_template(graph, &mut tasks);

        let tasks = tasks
            .iter()
            .map(|task| self.task_template(task))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            workflow = %graph.name(),
            nodes = template.nodes.len(),
            sub_workflows = template.sub_workflows.len(),
            tasks = tasks.len(),
            "compiled workflow template"
        );
        Ok(CompiledWorkflow { template, tasks })
    }

    fn identifier(&self, resource_type: ResourceType, name: &str) -> Identifier {
        Identifier {
            resource_type,
            project: self.settings.project.clone(),
            domain: self.settings.domain.clone(),
            name: name.to_owned(),
            version: self.settings.version.clone(),
        }
    }

    fn workflow_template(&self, graph: &WorkflowGraph, tasks: &mut Vec<Arc<TaskDefinition>>) -> WorkflowTemplate {
        let nodes = graph
            .execution_order()
            .iter()
            .map(|id| self.node_template(graph, *id, tasks))
            .collect();

        let outputs = graph
            .interface()
            .outputs
            .iter()
            .zip(graph.outputs())
            .map(|(var, binding)| binding_template(&var.name, binding))
            .collect();

        // One template per distinct nested graph, in first-use order.
        let mut nested: Vec<Arc<WorkflowGraph>> = Vec::new();
        collect_sub_workflows(graph, graph.execution_order(), &mut nested);
        let sub_workflows = nested
            .iter()
            .map(|sub| self.workflow_template(sub, tasks))
            .collect();

        debug!(workflow = %graph.name(), "built workflow template");
        WorkflowTemplate {
            id: self.identifier(ResourceType::Workflow, graph.name()),
            metadata: WorkflowMetadata {
                on_failure: graph.on_failure(),
            },
            interface: graph.interface().clone(),
            nodes,
            outputs,
            sub_workflows,
        }
    }

    fn node_template(
        &self,
        graph: &WorkflowGraph,
        id: NodeId,
        tasks: &mut Vec<Arc<TaskDefinition>>,
    ) -> NodeTemplate {
        let node = graph.node(id);
        let target = match &node.payload {
            NodePayload::Task(task) => {
                if !tasks.iter().any(|t| Arc::ptr_eq(t, task)) {
                    tasks.push(Arc::clone(task));
                }
                NodeTarget::TaskNode {
                    reference_id: self.identifier(ResourceType::Task, task.name()),
                }
            }
            NodePayload::SubWorkflow { graph: nested, .. } => NodeTarget::WorkflowNode {
                sub_workflow_ref: self.identifier(ResourceType::Workflow, nested.name()),
            },
            NodePayload::Conditional(conditional) => {
                let mut branch = |body: &BranchBody| match body {
                    BranchBody::Fail(message) => BranchTarget::Error {
                        message: message.clone(),
                    },
                    BranchBody::Subgraph(sub) => BranchTarget::Nodes {
                        nodes: sub
                            .order
                            .iter()
                            .map(|member| self.node_template(graph, *member, tasks))
                            .collect(),
                        outputs: conditional
                            .outputs
                            .iter()
                            .zip(&sub.outputs)
                            .map(|(var, b)| binding_template(&var.name, b))
                            .collect(),
                    },
                };
                let cases = conditional
                    .cases
                    .iter()
                    .map(|case| IfBlock {
                        condition: boolean_expression(&case.predicate),
                        then_node: branch(&case.body),
                    })
                    .collect();
                let else_node = conditional.else_case.as_ref().map(&mut branch);
                NodeTarget::BranchNode {
                    if_else: IfElseBlock { cases, else_node },
                }
            }
        };

        NodeTemplate {
            id: id.to_string(),
            metadata: NodeMetadata {
                name: node.name.clone(),
            },
            inputs: node
                .inputs
                .iter()
                .map(|(name, binding)| binding_template(name, binding))
                .collect(),
            upstream_node_ids: node.upstream.iter().map(NodeId::to_string).collect(),
            target,
        }
    }

    fn task_template(&self, task: &TaskDefinition) -> Result<TaskTemplate, EngineError> {
        let image = match task.image() {
            None => &self.settings.image_config.default_image,
            Some(name) => self.settings.image_config.find(name).ok_or_else(|| {
                EngineError::InvalidSettings(format!(
                    "task '{}' asks for unknown image '{name}'",
                    task.name()
                ))
            })?,
        };
        Ok(TaskTemplate {
            id: self.identifier(ResourceType::Task, task.name()),
            interface: task.interface().clone(),
            container: Container {
                image: image.full(),
                env: self.settings.env.clone().unwrap_or_default(),
            },
        })
    }
}

fn collect_sub_workflows(graph: &WorkflowGraph, order: &[NodeId], out: &mut Vec<Arc<WorkflowGraph>>) {
    for id in order {
        match &graph.node(*id).payload {
            NodePayload::SubWorkflow { graph: nested, .. } => {
                if !out.iter().any(|seen| Arc::ptr_eq(seen, nested)) {
                    out.push(Arc::clone(nested));
                }
            }
            NodePayload::Conditional(conditional) => {
                for sub in conditional.subgraphs() {
                    collect_sub_workflows(graph, &sub.order, out);
                }
            }
            NodePayload::Task(_) => {}
        }
    }
}

fn binding_data(binding: &Binding) -> BindingData {
    match binding {
        Binding::Promise(p) => BindingData::Promise(OutputReference {
            node_id: p.node().to_string(),
            var: p.output_name().to_owned(),
        }),
        Binding::Input(var) => BindingData::Promise(OutputReference {
            node_id: START_NODE_ID.to_owned(),
            var: var.name.clone(),
        }),
        Binding::Literal(value) => BindingData::Scalar {
            value: value.clone(),
        },
    }
}

fn binding_template(var: &str, binding: &Binding) -> BindingTemplate {
    BindingTemplate {
        var: var.to_owned(),
        binding: binding_data(binding),
    }
}

fn boolean_expression(predicate: &Predicate) -> BooleanExpression {
    match predicate {
        Predicate::Compare { left, op, right } => BooleanExpression::Comparison {
            operator: *op,
            left_value: binding_data(left),
            right_value: binding_data(right),
        },
        Predicate::Conjunction { op, left, right } => BooleanExpression::Conjunction {
            operator: *op,
            left_expression: Box::new(boolean_expression(left)),
            right_expression: Box::new(boolean_expression(right)),
        },
    }
}
