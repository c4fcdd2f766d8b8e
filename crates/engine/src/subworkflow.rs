//! Sub-workflow folding.
//!
//! A nested workflow is built by its own builder pass (with its own cycle
//! check) before the outer declaration returns, and appears in the parent
//! as one opaque node whose outputs are the nested workflow's outputs.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::builder::WorkflowBuilder;
use crate::node::NodePayload;
use crate::promise::{Binding, NodeOutput};
use crate::workflow::{WorkflowDefinition, WorkflowGraph};
use crate::EngineError;

/// State shared by one top-level build and all builds nested inside it.
#[derive(Debug, Default)]
pub(crate) struct BuildContext {
    /// Graphs already built, keyed by definition identity.
    compiled: HashMap<usize, Arc<WorkflowGraph>>,
    /// Definitions whose bodies are currently running.
    in_progress: Vec<usize>,
}

fn identity(definition: &Arc<WorkflowDefinition>) -> usize {
    Arc::as_ptr(definition) as usize
}

/// Build a workflow graph from scratch.
pub(crate) fn build_graph(definition: &Arc<WorkflowDefinition>) -> Result<Arc<WorkflowGraph>, EngineError> {
    build_with(definition, BuildContext::default()).0
}

/// Build `definition` inside an ongoing build. The context is handed back
/// whether or not the build succeeds, with `definition` no longer in
/// progress.
fn build_with(
    definition: &Arc<WorkflowDefinition>,
    mut ctx: BuildContext,
) -> (Result<Arc<WorkflowGraph>, EngineError>, BuildContext) {
    let key = identity(definition);
    if let Some(graph) = ctx.compiled.get(&key) {
        debug!(workflow = %definition.name(), "reusing already built sub-workflow graph");
        let graph = Arc::clone(graph);
        return (Ok(graph), ctx);
    }
    if ctx.in_progress.contains(&key) {
        return (Err(EngineError::RecursiveWorkflow(definition.name().to_owned())), ctx);
    }

    ctx.in_progress.push(key);
    let mut builder = WorkflowBuilder::new(definition, ctx);
    let outputs = definition.run_body(&mut builder);
    let mut ctx = std::mem::take(&mut builder.ctx);
    ctx.in_progress.retain(|k| *k != key);

    let graph = outputs
        .and_then(|outputs| builder.finalize(outputs))
        .map(Arc::new);
    match &graph {
        Ok(graph) => {
            ctx.compiled.insert(key, Arc::clone(graph));
        }
        Err(err) => debug!(workflow = %definition.name(), %err, "sub-workflow build failed"),
    }
    (graph, ctx)
}

impl WorkflowBuilder {
    /// Declare an invocation of a nested workflow.
    ///
    /// The nested graph is never merged into this one: the returned node is
    /// the only thing the parent can depend on or order against.
    pub fn declare_subworkflow(
        &mut self,
        workflow: &Arc<WorkflowDefinition>,
        inputs: &[(&str, Binding)],
    ) -> Result<NodeOutput, EngineError> {
        let bound = self.bind_inputs(workflow.name(), &workflow.interface().inputs, inputs)?;

        let (graph, ctx) = build_with(workflow, std::mem::take(&mut self.ctx));
        self.ctx = ctx;
        let graph = graph?;

        let id = self.add_node(
            workflow.name().to_owned(),
            bound,
            NodePayload::SubWorkflow {
                definition: Arc::clone(workflow),
                graph,
            },
        )?;
        debug!(workflow = %self.name, node = %id, sub_workflow = %workflow.name(), "declared sub-workflow node");
        Ok(self.output_of(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeKind, NodePayload};
    use crate::types::LiteralType;
    use crate::workflow::TaskDefinition;
    use serde_json::json;
    use std::sync::Mutex;
    use tasks::{TaskInputs, TaskOutput};

    fn add_five() -> Arc<TaskDefinition> {
        TaskDefinition::builder("tests.sub.add_five")
            .input("a", LiteralType::Integer)
            .output("o0", LiteralType::Integer)
            .build(|i: &TaskInputs| Ok(TaskOutput::Single(json!(i.get_i64("a")? + 5))))
    }

    fn inner() -> Arc<WorkflowDefinition> {
        let t = add_five();
        WorkflowDefinition::builder("tests.sub.inner")
            .input("x", LiteralType::Integer)
            .output("o0", LiteralType::Integer)
            .body(move |b| {
                let x = b.input("x")?;
                let first = b.declare_task(&t, &[("a", x)])?;
                let second = b.declare_task(&t, &[("a", first.single()?.into())])?;
                Ok(vec![second.single()?.into()])
            })
    }

    #[test]
    fn nested_workflow_is_one_opaque_node() {
        let inner = inner();
        let outer = WorkflowDefinition::builder("tests.sub.outer")
            .output("o0", LiteralType::Integer)
            .body(move |b| {
                let out = b.declare_subworkflow(&inner, &[("x", Binding::literal(1))])?;
                Ok(vec![out.single()?.into()])
            });

        let graph = outer.build_graph().unwrap();
        assert_eq!(graph.nodes().len(), 1);
        let node = graph.node(graph.execution_order()[0]);
        assert_eq!(node.kind(), NodeKind::SubWorkflow);
        match &node.payload {
            NodePayload::SubWorkflow { graph: nested, .. } => {
                assert_eq!(nested.nodes().len(), 2);
                assert_eq!(nested.name(), "tests.sub.inner");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn reused_definition_is_built_once() {
        let inner = inner();
        let runs = Arc::new(Mutex::new(0usize));
        let counted = {
            let runs = Arc::clone(&runs);
            let t = add_five();
            WorkflowDefinition::builder("tests.sub.counted")
                .input("x", LiteralType::Integer)
                .output("o0", LiteralType::Integer)
                .body(move |b| {
                    *runs.lock().unwrap() += 1;
                    let out = b.declare_task(&t, &[("a", b.input("x")?)])?;
                    Ok(vec![out.single()?.into()])
                })
        };
        let outer = WorkflowDefinition::builder("tests.sub.twice").body(move |b| {
            b.declare_subworkflow(&counted, &[("x", Binding::literal(1))])?;
            b.declare_subworkflow(&counted, &[("x", Binding::literal(2))])?;
            b.declare_subworkflow(&inner, &[("x", Binding::literal(3))])?;
            Ok(vec![])
        });

        let graph = outer.build_graph().unwrap();
        assert_eq!(*runs.lock().unwrap(), 1);
        let nested: Vec<&Arc<WorkflowGraph>> = graph
            .nodes()
            .iter()
            .filter_map(|n| match &n.payload {
                NodePayload::SubWorkflow { graph, .. } => Some(graph),
                _ => None,
            })
            .collect();
        assert!(Arc::ptr_eq(nested[0], nested[1]));
        assert!(!Arc::ptr_eq(nested[0], nested[2]));
    }

    #[test]
    fn inner_promises_are_invisible_to_the_parent() {
        let t = add_five();
        let leaked = Arc::new(Mutex::new(None));
        let inner = {
            let leaked = Arc::clone(&leaked);
            let t = Arc::clone(&t);
            WorkflowDefinition::builder("tests.sub.leaky").body(move |b| {
                let out = b.declare_task(&t, &[("a", Binding::literal(1))])?;
                *leaked.lock().unwrap() = Some(out.single()?);
                Ok(vec![])
            })
        };
        let outer = WorkflowDefinition::builder("tests.sub.peek").body(move |b| {
            b.declare_subworkflow(&inner, &[])?;
            let stolen = leaked.lock().unwrap().clone().expect("inner body ran");
            b.declare_task(&t, &[("a", stolen.into())])?;
            Ok(vec![])
        });

        let err = outer.build_graph().unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedReference(_)), "got {err}");
    }

    #[test]
    fn inner_node_refs_cannot_order_parent_nodes() {
        let unit = TaskDefinition::builder("tests.sub.unit").build(|_: &TaskInputs| Ok(TaskOutput::Unit));
        let leaked = Arc::new(Mutex::new(None));
        let inner = {
            let leaked = Arc::clone(&leaked);
            let unit = Arc::clone(&unit);
            WorkflowDefinition::builder("tests.sub.leaky_ref").body(move |b| {
                let x = b.declare_task(&unit, &[])?;
                *leaked.lock().unwrap() = Some(x.node_ref());
                Ok(vec![])
            })
        };
        let outer = WorkflowDefinition::builder("tests.sub.reorder").body(move |b| {
            // n0 is a task here as well, so only the graph identity differs.
            let a = b.declare_task(&unit, &[])?;
            let sub = b.declare_subworkflow(&inner, &[])?;
            let stolen = leaked.lock().unwrap().expect("inner body ran");
            assert_eq!((stolen.id(), stolen.kind()), (a.node_ref().id(), NodeKind::Task));
            b.declare_after(&sub, stolen)?;
            Ok(vec![])
        });

        let err = outer.build_graph().unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedReference(_)), "got {err}");
    }

    #[test]
    fn node_refs_from_another_build_are_rejected() {
        let unit = TaskDefinition::builder("tests.sub.unit").build(|_: &TaskInputs| Ok(TaskOutput::Unit));
        let leaked = Arc::new(Mutex::new(None));
        let first = {
            let (leaked, unit) = (Arc::clone(&leaked), Arc::clone(&unit));
            WorkflowDefinition::builder("tests.sub.first").body(move |b| {
                *leaked.lock().unwrap() = Some(b.declare_task(&unit, &[])?.node_ref());
                Ok(vec![])
            })
        };
        first.build_graph().unwrap();

        let second = WorkflowDefinition::builder("tests.sub.second").body(move |b| {
            b.declare_task(&unit, &[])?;
            let y = b.declare_task(&unit, &[])?;
            let stolen = leaked.lock().unwrap().expect("first body ran");
            b.declare_after(&y, stolen)?;
            Ok(vec![])
        });
        assert!(matches!(
            second.build_graph(),
            Err(EngineError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn failed_nested_build_keeps_recursion_tracking() {
        let unit = TaskDefinition::builder("tests.sub.unit").build(|_: &TaskInputs| Ok(TaskOutput::Unit));
        let broken = WorkflowDefinition::builder("tests.sub.broken").body(move |b| {
            let x = b.declare_task(&unit, &[])?;
            b.declare_after(&x, &x)?;
            Ok(vec![])
        });

        let slot: Arc<Mutex<Option<Arc<WorkflowDefinition>>>> = Arc::new(Mutex::new(None));
        let runs = Arc::new(Mutex::new(0usize));
        let stubborn = {
            let (slot, runs) = (Arc::clone(&slot), Arc::clone(&runs));
            WorkflowDefinition::builder("tests.sub.stubborn").body(move |b| {
                *runs.lock().unwrap() += 1;
                let ignored = b.declare_subworkflow(&broken, &[]);
                assert!(matches!(ignored, Err(EngineError::Cycle { .. })));
                let me = slot.lock().unwrap().clone().expect("slot filled");
                b.declare_subworkflow(&me, &[])?;
                Ok(vec![])
            })
        };
        *slot.lock().unwrap() = Some(Arc::clone(&stubborn));

        assert!(matches!(
            stubborn.build_graph(),
            Err(EngineError::RecursiveWorkflow(name)) if name == "tests.sub.stubborn"
        ));
        assert_eq!(*runs.lock().unwrap(), 1);
    }

    #[test]
    fn nested_cycles_fail_the_nested_build() {
        let t = TaskDefinition::builder("tests.sub.unit").build(|_: &TaskInputs| Ok(TaskOutput::Unit));
        let inner = WorkflowDefinition::builder("tests.sub.cyclic").body(move |b| {
            let x = b.declare_task(&t, &[])?;
            let y = b.declare_task(&t, &[])?;
            b.declare_after(&x, &y)?;
            b.declare_after(&y, &x)?;
            Ok(vec![])
        });
        let outer = WorkflowDefinition::builder("tests.sub.host").body(move |b| {
            b.declare_subworkflow(&inner, &[])?;
            Ok(vec![])
        });

        match outer.build_graph() {
            Err(EngineError::Cycle { workflow, .. }) => assert_eq!(workflow, "tests.sub.cyclic"),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_invocation_is_rejected() {
        let slot: Arc<Mutex<Option<Arc<WorkflowDefinition>>>> = Arc::new(Mutex::new(None));
        let looping = {
            let slot = Arc::clone(&slot);
            WorkflowDefinition::builder("tests.sub.looping").body(move |b| {
                let me = slot.lock().unwrap().clone().expect("slot filled");
                b.declare_subworkflow(&me, &[])?;
                Ok(vec![])
            })
        };
        *slot.lock().unwrap() = Some(Arc::clone(&looping));

        assert!(matches!(
            looping.build_graph(),
            Err(EngineError::RecursiveWorkflow(name)) if name == "tests.sub.looping"
        ));
    }
}
