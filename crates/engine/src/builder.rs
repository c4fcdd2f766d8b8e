//! The graph builder: records nodes and edges while a workflow body runs.
//!
//! Consuming a promise adds a data edge; `declare_after` adds a control
//! edge. Both end up in the same upstream/downstream sets. Validation of the
//! merged edge set happens once, in `finalize`, after the body returns.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::dag::validate_dag;
use crate::node::{Edge, EdgeKind, Node, NodePayload, ScopeId};
use crate::promise::{Binding, NodeId, NodeOutput, NodeRef, Promise};
use crate::subworkflow::BuildContext;
use crate::types::{TypedInterface, Variable};
use crate::workflow::{FailurePolicy, TaskDefinition, WorkflowDefinition, WorkflowGraph};
use crate::EngineError;

/// A declaration scope: the workflow body, or one branch of a conditional.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScopeFrame {
    pub parent: Option<ScopeId>,
    /// Conditional node owning this branch scope.
    pub owner: Option<NodeId>,
}

/// Declaration context handed to a workflow body.
///
/// One builder exists per graph build; it is never shared between threads
/// or between workflows.
pub struct WorkflowBuilder {
    /// Stamped on every promise and node reference this builder hands out.
    pub(crate) graph_id: Uuid,
    pub(crate) name: String,
    pub(crate) interface: TypedInterface,
    pub(crate) on_failure: FailurePolicy,
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) scopes: Vec<ScopeFrame>,
    pub(crate) current: ScopeId,
    pub(crate) ctx: BuildContext,
}

impl WorkflowBuilder {
    pub(crate) fn new(definition: &WorkflowDefinition, ctx: BuildContext) -> Self {
        Self {
            graph_id: Uuid::new_v4(),
            name: definition.name().to_owned(),
            interface: definition.interface().clone(),
            on_failure: definition.on_failure(),
            nodes: Vec::new(),
            edges: Vec::new(),
            scopes: vec![ScopeFrame {
                parent: None,
                owner: None,
            }],
            current: ScopeId::ROOT,
            ctx,
        }
    }

    /// Name of the workflow being declared.
    pub fn workflow_name(&self) -> &str {
        &self.name
    }

    /// One of the workflow's own declared inputs.
    pub fn input(&self, name: &str) -> Result<Binding, EngineError> {
        self.interface
            .input(name)
            .cloned()
            .map(Binding::Input)
            .ok_or_else(|| EngineError::UnknownParameter {
                target: self.name.clone(),
                name: name.to_owned(),
            })
    }

    /// Declare an invocation of `task` and return its output promises.
    pub fn declare_task(
        &mut self,
        task: &Arc<TaskDefinition>,
        inputs: &[(&str, Binding)],
    ) -> Result<NodeOutput, EngineError> {
        let bound = self.bind_inputs(task.name(), &task.interface().inputs, inputs)?;
        let id = self.add_node(task.name().to_owned(), bound, NodePayload::Task(Arc::clone(task)))?;
        debug!(workflow = %self.name, node = %id, task = %task.name(), "declared task node");
        Ok(self.output_of(id))
    }

    /// Declare that `downstream` runs after `upstream`.
    ///
    /// Adds one control edge per (sink of upstream, source of downstream)
    /// pair. Cycles are reported when the graph is finalized.
    pub fn declare_after(
        &mut self,
        downstream: impl Into<NodeRef>,
        upstream: impl Into<NodeRef>,
    ) -> Result<(), EngineError> {
        let (downstream, upstream) = (downstream.into(), upstream.into());
        self.check_node_ref(upstream)?;
        self.check_node_ref(downstream)?;
        for from in upstream.sinks() {
            for to in downstream.sources() {
                let (from_scope, to_scope) = (self.scope_of(from), self.scope_of(to));
                let (from, to) = if self.is_ancestor(from_scope, to_scope) {
                    (from, self.lift(to, from_scope)?)
                } else {
                    (self.lift(from, to_scope)?, to)
                };
                self.add_edge(from, to, EdgeKind::Control);
            }
        }
        Ok(())
    }

    /// Run `refs` in the given order: each element after the previous one.
    ///
    /// Only adjacent pairs get an edge; anything further apart is ordered
    /// by transitivity alone.
    pub fn sequence(&mut self, refs: &[NodeRef]) -> Result<(), EngineError> {
        for pair in refs.windows(2) {
            self.declare_after(pair[1], pair[0])?;
        }
        Ok(())
    }

    /// Reference to the node producing `promise`.
    pub fn node_ref(&self, promise: &Promise) -> Result<NodeRef, EngineError> {
        self.check_promise(promise)?;
        Ok(self.node_ref_of(promise.node()))
    }

    // -----------------------------------------------------------------------
    // Internals shared with the conditional and sub-workflow modules
    // -----------------------------------------------------------------------

    pub(crate) fn bind_inputs(
        &self,
        target: &str,
        params: &[Variable],
        inputs: &[(&str, Binding)],
    ) -> Result<Vec<(String, Binding)>, EngineError> {
        for (i, (name, _)) in inputs.iter().enumerate() {
            if inputs[..i].iter().any(|(seen, _)| seen == name) {
                return Err(EngineError::DuplicateInput {
                    target: target.to_owned(),
                    name: (*name).to_owned(),
                });
            }
            if !params.iter().any(|p| p.name == *name) {
                return Err(EngineError::UnknownParameter {
                    target: target.to_owned(),
                    name: (*name).to_owned(),
                });
            }
        }

        params
            .iter()
            .map(|param| {
                let binding = inputs
                    .iter()
                    .find(|(name, _)| *name == param.name)
                    .map(|(_, b)| b.clone())
                    .ok_or_else(|| EngineError::MissingInput {
                        target: target.to_owned(),
                        name: param.name.clone(),
                    })?;
                binding.check_assignable(param.ty, || {
                    format!("input '{}' of '{target}'", param.name)
                })?;
                self.check_binding(&binding)?;
                Ok((param.name.clone(), binding))
            })
            .collect()
    }

    /// Append a node to the current scope and wire a data edge from the
    /// producer of every promise it consumes.
    pub(crate) fn add_node(
        &mut self,
        name: String,
        inputs: Vec<(String, Binding)>,
        payload: NodePayload,
    ) -> Result<NodeId, EngineError> {
        let id = NodeId(self.nodes.len());
        let producers: Vec<NodeId> = inputs
            .iter()
            .filter_map(|(_, b)| match b {
                Binding::Promise(p) => Some(p.node()),
                _ => None,
            })
            .collect();

        self.nodes.push(Node {
            id,
            name,
            scope: self.current,
            inputs,
            upstream: BTreeSet::new(),
            downstream: BTreeSet::new(),
            payload,
        });

        for producer in producers {
            self.add_dependency(producer, self.current, Some(id), EdgeKind::Data)?;
        }
        Ok(id)
    }

    /// Make `consumer` (or, when `None`, the scope `consumer_scope` itself)
    /// depend on `producer`. The edge is placed at the producer's scope level.
    pub(crate) fn add_dependency(
        &mut self,
        producer: NodeId,
        consumer_scope: ScopeId,
        consumer: Option<NodeId>,
        kind: EdgeKind,
    ) -> Result<(), EngineError> {
        let level = self.scope_of(producer);
        let target = match consumer {
            Some(node) if self.scope_of(node) == level => Some(node),
            _ => self.lift_scope(consumer_scope, level)?,
        };
        if let Some(to) = target {
            self.add_edge(producer, to, kind);
        }
        Ok(())
    }

    pub(crate) fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        if self.nodes[to.0].upstream.insert(from) {
            self.nodes[from.0].downstream.insert(to);
            let edge = Edge { from, to, kind };
            debug!(workflow = %self.name, %edge, "added edge");
            self.edges.push(edge);
        }
    }

    pub(crate) fn output_of(&self, id: NodeId) -> NodeOutput {
        let node = &self.nodes[id.0];
        let promises = node
            .outputs()
            .iter()
            .enumerate()
            .map(|(i, var)| Promise::new(self.graph_id, id, i, var))
            .collect();
        NodeOutput::new(self.node_ref_of(id), promises)
    }

    pub(crate) fn node_ref_of(&self, id: NodeId) -> NodeRef {
        NodeRef::new(self.graph_id, id, self.nodes[id.0].kind())
    }

    /// Bindings may only read promises visible from the current scope.
    pub(crate) fn check_binding(&self, binding: &Binding) -> Result<(), EngineError> {
        match binding {
            Binding::Promise(p) => self.check_promise(p),
            Binding::Input(v) => match self.interface.input(&v.name) {
                Some(declared) if declared == v => Ok(()),
                _ => Err(EngineError::UnresolvedReference(format!(
                    "'{}' is not an input of workflow '{}'",
                    v.name, self.name
                ))),
            },
            Binding::Literal(_) => Ok(()),
        }
    }

    fn check_promise(&self, promise: &Promise) -> Result<(), EngineError> {
        if promise.graph() != self.graph_id || promise.node().0 >= self.nodes.len() {
            return Err(EngineError::UnresolvedReference(format!(
                "promise '{}' of node {} does not belong to workflow '{}'",
                promise.output_name(),
                promise.node(),
                self.name
            )));
        }
        let producer = self.scope_of(promise.node());
        if !self.is_ancestor(producer, self.current) {
            return Err(EngineError::UnresolvedReference(format!(
                "node {} is declared inside a branch that is not visible here",
                promise.node()
            )));
        }
        Ok(())
    }

    fn check_node_ref(&self, node_ref: NodeRef) -> Result<(), EngineError> {
        let id = node_ref.id();
        let node = self
            .nodes
            .get(id.0)
            .filter(|_| node_ref.graph() == self.graph_id)
            .ok_or_else(|| {
                EngineError::UnresolvedReference(format!(
                    "node {id} is not part of workflow '{}'",
                    self.name
                ))
            })?;
        if node.kind() != node_ref.kind() {
            return Err(EngineError::UnresolvedReference(format!(
                "node {id} of workflow '{}' is a {}, not a {}",
                self.name,
                node.kind(),
                node_ref.kind()
            )));
        }
        if !self.is_ancestor(node.scope, self.current) {
            return Err(EngineError::UnresolvedReference(format!(
                "node {id} is declared inside a branch that is not visible here"
            )));
        }
        Ok(())
    }

    pub(crate) fn scope_of(&self, id: NodeId) -> ScopeId {
        self.nodes[id.0].scope
    }

    /// Whether `ancestor` is `scope` or one of its enclosing scopes.
    pub(crate) fn is_ancestor(&self, ancestor: ScopeId, scope: ScopeId) -> bool {
        let mut cursor = Some(scope);
        while let Some(s) = cursor {
            if s == ancestor {
                return true;
            }
            cursor = self.scopes[s.0].parent;
        }
        false
    }

    /// The conditional node that stands for `scope` at the `level` scope,
    /// or `None` when `scope` is `level` itself.
    fn lift_scope(&self, scope: ScopeId, level: ScopeId) -> Result<Option<NodeId>, EngineError> {
        let mut cursor = scope;
        let mut representative = None;
        while cursor != level {
            let frame = self.scopes[cursor.0];
            match (frame.parent, frame.owner) {
                (Some(parent), Some(owner)) => {
                    representative = Some(owner);
                    cursor = parent;
                }
                _ => {
                    return Err(EngineError::UnresolvedReference(format!(
                        "scope {} is not nested inside scope {}",
                        scope.0, level.0
                    )))
                }
            }
        }
        Ok(representative)
    }

    /// `node` itself, or its enclosing conditional at the `level` scope.
    fn lift(&self, node: NodeId, level: ScopeId) -> Result<NodeId, EngineError> {
        Ok(self.lift_scope(self.scope_of(node), level)?.unwrap_or(node))
    }

    pub(crate) fn push_scope(&mut self, owner: NodeId) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(ScopeFrame {
            parent: Some(self.current),
            owner: Some(owner),
        });
        self.current = id;
        id
    }

    pub(crate) fn pop_scope(&mut self) {
        if let Some(parent) = self.scopes[self.current.0].parent {
            self.current = parent;
        }
    }

    /// Validate the declared outputs, order every scope and freeze the graph.
    pub(crate) fn finalize(mut self, outputs: Vec<Binding>) -> Result<WorkflowGraph, EngineError> {
        if outputs.len() != self.interface.outputs.len() {
            return Err(EngineError::OutputArity {
                target: self.name.clone(),
                expected: self.interface.outputs.len(),
                found: outputs.len(),
            });
        }
        for (var, binding) in self.interface.outputs.iter().zip(&outputs) {
            binding.check_assignable(var.ty, || {
                format!("output '{}' of workflow '{}'", var.name, self.name)
            })?;
            self.check_binding(binding)?;
        }

        // Branch subgraphs are ordered independently of the top level.
        let mut branch_orders = Vec::new();
        for node in &self.nodes {
            if let NodePayload::Conditional(conditional) = &node.payload {
                let orders = conditional
                    .subgraphs()
                    .map(|sub| validate_dag(&self.name, &self.nodes, &self.edges, &sub.order))
                    .collect::<Result<Vec<_>, _>>()?;
                branch_orders.push((node.id, orders));
            }
        }
        for (id, orders) in branch_orders {
            if let NodePayload::Conditional(conditional) = &mut self.nodes[id.0].payload {
                for (sub, order) in conditional.subgraphs_mut().zip(orders) {
                    sub.order = order;
                }
            }
        }

        let roots: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.scope == ScopeId::ROOT)
            .map(|n| n.id)
            .collect();
        let order = validate_dag(&self.name, &self.nodes, &self.edges, &roots)?;

        debug!(
            workflow = %self.name,
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            ?order,
            "workflow graph finalized"
        );

        Ok(WorkflowGraph {
            name: self.name,
            interface: self.interface,
            on_failure: self.on_failure,
            nodes: self.nodes,
            edges: self.edges,
            order,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use crate::types::LiteralType;
    use serde_json::json;
    use tasks::{TaskInputs, TaskOutput};

    fn task(name: &str, inputs: &[&str], output: bool) -> Arc<TaskDefinition> {
        let mut builder = TaskDefinition::builder(name);
        for input in inputs {
            builder = builder.input(*input, LiteralType::Integer);
        }
        if output {
            builder = builder.output("o0", LiteralType::Integer);
        }
        builder.build(|_: &TaskInputs| Ok(TaskOutput::Single(json!(0))))
    }

    fn graph_of<F>(body: F) -> Result<Arc<WorkflowGraph>, EngineError>
    where
        F: Fn(&mut WorkflowBuilder) -> Result<Vec<Binding>, EngineError> + Send + Sync + 'static,
    {
        WorkflowDefinition::builder("tests.wf").body(body).build_graph()
    }

    fn names(graph: &WorkflowGraph) -> Vec<&str> {
        graph
            .execution_order()
            .iter()
            .map(|id| graph.node(*id).name.as_str())
            .collect()
    }

    #[test]
    fn consuming_a_promise_adds_a_data_edge() {
        let producer = task("p", &[], true);
        let consumer = task("c", &["a"], true);
        let graph = graph_of(move |b| {
            let p = b.declare_task(&producer, &[])?;
            b.declare_task(&consumer, &[("a", p.single()?.into())])?;
            Ok(vec![])
        })
        .unwrap();

        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].kind, EdgeKind::Data);
        assert!(graph.node(NodeId(1)).upstream.contains(&NodeId(0)));
        assert!(graph.node(NodeId(0)).downstream.contains(&NodeId(1)));
    }

    #[test]
    fn chained_ordering_adds_only_adjacent_edges() {
        let (a, b_, c) = (task("a", &[], false), task("b", &[], false), task("c", &[], false));
        let graph = graph_of(move |b| {
            let a = b.declare_task(&a, &[])?;
            let bb = b.declare_task(&b_, &[])?;
            let c = b.declare_task(&c, &[])?;
            b.sequence(&[c.node_ref(), bb.node_ref(), a.node_ref()])?;
            Ok(vec![])
        })
        .unwrap();

        assert_eq!(names(&graph), vec!["c", "b", "a"]);
        let pairs: Vec<(usize, usize)> = graph.edges().iter().map(|e| (e.from.0, e.to.0)).collect();
        assert_eq!(pairs, vec![(2, 1), (1, 0)]);
        assert!(graph.edges().iter().all(|e| e.kind == EdgeKind::Control));
    }

    #[test]
    fn independent_nodes_keep_declaration_order() {
        let (x, y) = (task("x", &[], false), task("y", &[], false));
        let graph = graph_of(move |b| {
            b.declare_task(&x, &[])?;
            b.declare_task(&y, &[])?;
            Ok(vec![])
        })
        .unwrap();
        assert_eq!(names(&graph), vec!["x", "y"]);
        assert_eq!(graph.node(NodeId(0)).kind(), NodeKind::Task);
    }

    #[test]
    fn control_edge_against_data_flow_is_a_cycle() {
        let producer = task("p", &[], true);
        let consumer = task("c", &["a"], true);
        let err = graph_of(move |b| {
            let p = b.declare_task(&producer, &[])?;
            let c = b.declare_task(&consumer, &[("a", p.single()?.into())])?;
            b.declare_after(&p, &c)?;
            Ok(vec![])
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::Cycle { .. }), "got {err}");
    }

    #[test]
    fn binding_errors_are_reported_at_declaration() {
        let consumer = task("c", &["a"], true);

        let missing = {
            let consumer = Arc::clone(&consumer);
            graph_of(move |b| b.declare_task(&consumer, &[]).map(|_| vec![]))
        };
        assert!(matches!(missing, Err(EngineError::MissingInput { .. })));

        let unknown = {
            let consumer = Arc::clone(&consumer);
            graph_of(move |b| {
                b.declare_task(&consumer, &[("a", Binding::literal(1)), ("zz", Binding::literal(1))])
                    .map(|_| vec![])
            })
        };
        assert!(matches!(unknown, Err(EngineError::UnknownParameter { .. })));

        let duplicate = {
            let consumer = Arc::clone(&consumer);
            graph_of(move |b| {
                b.declare_task(&consumer, &[("a", Binding::literal(1)), ("a", Binding::literal(2))])
                    .map(|_| vec![])
            })
        };
        assert!(matches!(duplicate, Err(EngineError::DuplicateInput { .. })));

        let mistyped = graph_of(move |b| {
            b.declare_task(&consumer, &[("a", Binding::literal("five"))]).map(|_| vec![])
        });
        assert!(matches!(mistyped, Err(EngineError::TypeMismatch { .. })));
    }

    #[test]
    fn promise_from_another_workflow_is_unresolved() {
        let producer = task("p", &[], true);
        let consumer = task("c", &["a"], true);

        let mut other = WorkflowBuilder::new(
            &WorkflowDefinition::builder("tests.other").body(|_| Ok(vec![])),
            BuildContext::default(),
        );
        let foreign = other.declare_task(&producer, &[]).unwrap().single().unwrap();

        let err = graph_of(move |b| {
            b.declare_task(&consumer, &[("a", foreign.clone().into())])?;
            Ok(vec![])
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedReference(_)), "got {err}");
    }

    #[test]
    fn every_build_gets_its_own_graph_identity() {
        let def = WorkflowDefinition::builder("tests.ids").body(|_| Ok(vec![]));
        let first = WorkflowBuilder::new(&def, BuildContext::default());
        let second = WorkflowBuilder::new(&def, BuildContext::default());
        assert_ne!(first.graph_id, second.graph_id);
    }

    #[test]
    fn outputs_must_match_the_interface() {
        let producer = task("p", &[], true);
        let def = WorkflowDefinition::builder("tests.out")
            .output("o0", LiteralType::String)
            .body(move |b| Ok(vec![b.declare_task(&producer, &[])?.single()?.into()]));
        assert!(matches!(def.build_graph(), Err(EngineError::TypeMismatch { .. })));

        let arity = WorkflowDefinition::builder("tests.arity")
            .output("o0", LiteralType::Integer)
            .body(|_| Ok(vec![]));
        assert!(matches!(
            arity.build_graph(),
            Err(EngineError::OutputArity { expected: 1, found: 0, .. })
        ));
    }

    #[test]
    fn workflow_inputs_bind_without_edges() {
        let consumer = task("c", &["a"], true);
        let def = WorkflowDefinition::builder("tests.inputs")
            .input("x", LiteralType::Integer)
            .output("o0", LiteralType::Integer)
            .body(move |b| {
                let x = b.input("x")?;
                let c = b.declare_task(&consumer, &[("a", x)])?;
                Ok(vec![c.single()?.into()])
            });
        let graph = def.build_graph().unwrap();
        assert!(graph.edges().is_empty());
        assert_eq!(graph.outputs().len(), 1);
    }
}
