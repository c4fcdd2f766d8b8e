//! Local executor ("simulate" mode).
//!
//! `LocalExecutor` walks a finished graph in the same deterministic order
//! the compiler emits and invokes every task in turn:
//! 1. Builds the workflow graph (one declaration pass, cycle-checked).
//! 2. Visits top-level nodes in order, resolving promises to computed values.
//! 3. Descends into sub-workflows recursively and into the one selected
//!    branch of each conditional.
//! 4. Stops at the first failure; the error reaches the caller untouched.
//!
//! Execution is synchronous and single-threaded: the point is to expose
//! ordering, not to go fast.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tasks::TaskInputs;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::conditional::BranchBody;
use crate::node::{NodeKind, NodePayload};
use crate::promise::{Binding, NodeId};
use crate::types::Variable;
use crate::workflow::{WorkflowDefinition, WorkflowGraph};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Output of a simulated run
// ---------------------------------------------------------------------------

/// One visited node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    /// Node id, prefixed by the ids of enclosing sub-workflow nodes
    /// (e.g. `n1-n0`).
    pub path: String,
    pub kind: NodeKind,
    pub name: String,
}

/// The result of simulating a full workflow.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub execution_id: Uuid,
    /// Workflow outputs in declaration order.
    pub outputs: Vec<(String, Value)>,
    /// Every visited node, in visitation order.
    pub trace: Vec<TraceEntry>,
}

impl SimulationResult {
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Names of the task nodes that ran, in order.
    pub fn task_names(&self) -> Vec<&str> {
        self.trace
            .iter()
            .filter(|e| e.kind == NodeKind::Task)
            .map(|e| e.name.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// LocalExecutor
// ---------------------------------------------------------------------------

/// Values computed so far while walking one graph.
struct Frame {
    inputs: BTreeMap<String, Value>,
    results: HashMap<NodeId, Vec<Value>>,
}

impl Frame {
    fn resolve(&self, binding: &Binding) -> Result<Value, EngineError> {
        match binding {
            Binding::Literal(v) => Ok(v.clone()),
            Binding::Input(var) => self.inputs.get(&var.name).cloned().ok_or_else(|| {
                EngineError::MissingInput {
                    target: "workflow".into(),
                    name: var.name.clone(),
                }
            }),
            Binding::Promise(p) => self
                .results
                .get(&p.node())
                .and_then(|values| values.get(p.index()))
                .cloned()
                .ok_or_else(|| {
                    EngineError::UnresolvedReference(format!(
                        "output '{}' of node {} consumed before it was produced",
                        p.output_name(),
                        p.node()
                    ))
                }),
        }
    }
}

/// Stateless, sequential workflow simulator.
#[derive(Debug, Default, Clone)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Declare `workflow`, then run it with the given inputs.
    ///
    /// # Errors
    /// Declaration errors, [`EngineError::NoBranchMatched`],
    /// [`EngineError::BranchFailed`], type errors on inputs and outputs, and
    /// any task failure as [`EngineError::Task`].
    #[instrument(skip(self, workflow, inputs), fields(workflow = %workflow.name()))]
    pub fn simulate(
        &self,
        workflow: &Arc<WorkflowDefinition>,
        inputs: BTreeMap<String, Value>,
    ) -> Result<SimulationResult, EngineError> {
        let graph = workflow.build_graph()?;
        self.execute_graph(&graph, inputs)
    }

    /// Run an already built graph.
    pub fn execute_graph(
        &self,
        graph: &WorkflowGraph,
        inputs: BTreeMap<String, Value>,
    ) -> Result<SimulationResult, EngineError> {
        let execution_id = Uuid::new_v4();
        info!(
            %execution_id,
            workflow = %graph.name(),
            nodes = graph.execution_order().len(),
            "starting simulated run"
        );

        let mut trace = Vec::new();
        let values = self.run_graph(graph, inputs, "", &mut trace)?;
        let outputs = graph
            .interface()
            .outputs
            .iter()
            .map(|v| v.name.clone())
            .zip(values)
            .collect();

        info!(%execution_id, visited = trace.len(), "simulated run succeeded");
        Ok(SimulationResult {
            execution_id,
            outputs,
            trace,
        })
    }

    fn run_graph(
        &self,
        graph: &WorkflowGraph,
        inputs: BTreeMap<String, Value>,
        prefix: &str,
        trace: &mut Vec<TraceEntry>,
    ) -> Result<Vec<Value>, EngineError> {
        check_values(graph.name(), &graph.interface().inputs, &inputs)?;
        if let Some(extra) = inputs.keys().find(|k| graph.interface().input(k).is_none()) {
            return Err(EngineError::UnknownParameter {
                target: graph.name().to_owned(),
                name: extra.clone(),
            });
        }

        let mut frame = Frame {
            inputs,
            results: HashMap::new(),
        };
        self.run_nodes(graph, graph.execution_order(), &mut frame, prefix, trace)?;

        graph.outputs().iter().map(|b| frame.resolve(b)).collect()
    }

    fn run_nodes(
        &self,
        graph: &WorkflowGraph,
        order: &[NodeId],
        frame: &mut Frame,
        prefix: &str,
        trace: &mut Vec<TraceEntry>,
    ) -> Result<(), EngineError> {
        for &id in order {
            let node = graph.node(id);
            let path = format!("{prefix}{id}");
            info!(node = %path, kind = %node.kind(), name = %node.name, "visiting node");
            trace.push(TraceEntry {
                path: path.clone(),
                kind: node.kind(),
                name: node.name.clone(),
            });

            let values = match &node.payload {
                NodePayload::Task(task) => {
                    let inputs = resolve_inputs(frame, &node.inputs)?;
                    let output = task.callable().call(&TaskInputs::new(inputs))?;
                    let values = output.into_values();
                    check_outputs(task.name(), &task.interface().outputs, &values)?;
                    values
                }
                NodePayload::SubWorkflow { graph: nested, .. } => {
                    let inputs = resolve_inputs(frame, &node.inputs)?;
                    self.run_graph(nested, inputs, &format!("{path}-"), trace)?
                }
                NodePayload::Conditional(conditional) => {
                    let selected = conditional.select(|b| frame.resolve(b))?;
                    match selected {
                        None => return Err(EngineError::NoBranchMatched(node.name.clone())),
                        Some(BranchBody::Fail(message)) => {
                            return Err(EngineError::BranchFailed {
                                conditional: node.name.clone(),
                                message: message.clone(),
                            })
                        }
                        Some(BranchBody::Subgraph(branch)) => {
                            debug!(node = %path, members = branch.order.len(), "running selected branch");
                            self.run_nodes(graph, &branch.order, frame, prefix, trace)?;
                            branch
                                .outputs
                                .iter()
                                .map(|b| frame.resolve(b))
                                .collect::<Result<Vec<_>, _>>()?
                        }
                    }
                }
            };

            debug!(node = %path, outputs = values.len(), "node completed");
            frame.results.insert(id, values);
        }
        Ok(())
    }
}

fn resolve_inputs(
    frame: &Frame,
    bindings: &[(String, Binding)],
) -> Result<BTreeMap<String, Value>, EngineError> {
    bindings
        .iter()
        .map(|(name, binding)| Ok((name.clone(), frame.resolve(binding)?)))
        .collect()
}

fn check_values(
    target: &str,
    declared: &[Variable],
    values: &BTreeMap<String, Value>,
) -> Result<(), EngineError> {
    for var in declared {
        let value = values.get(&var.name).ok_or_else(|| EngineError::MissingInput {
            target: target.to_owned(),
            name: var.name.clone(),
        })?;
        if !var.ty.accepts(value) {
            return Err(EngineError::TypeMismatch {
                context: format!("input '{}' of '{target}'", var.name),
                expected: var.ty.to_string(),
                found: value.to_string(),
            });
        }
    }
    Ok(())
}

fn check_outputs(target: &str, declared: &[Variable], values: &[Value]) -> Result<(), EngineError> {
    if declared.len() != values.len() {
        return Err(EngineError::OutputArity {
            target: target.to_owned(),
            expected: declared.len(),
            found: values.len(),
        });
    }
    for (var, value) in declared.iter().zip(values) {
        if !var.ty.accepts(value) {
            return Err(EngineError::TypeMismatch {
                context: format!("output '{}' of '{target}'", var.name),
                expected: var.ty.to_string(),
                found: value.to_string(),
            });
        }
    }
    Ok(())
}
