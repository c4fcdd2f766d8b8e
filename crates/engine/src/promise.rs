//! Promises, bindings and node references: the values a workflow body
//! passes around while the graph is being declared.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::node::NodeKind;
use crate::types::{LiteralType, Variable};
use crate::EngineError;

/// Identifier of a node, assigned in declaration order.
///
/// Used as a tie-break when ordering independent nodes, never as the
/// execution order itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Typed placeholder for one output of a node that has not run yet.
///
/// Each promise has exactly one producer; consuming it anywhere adds a data
/// edge from that producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promise {
    graph: Uuid,
    node: NodeId,
    index: usize,
    output: String,
    ty: LiteralType,
}

impl Promise {
    pub(crate) fn new(graph: Uuid, node: NodeId, index: usize, output: &Variable) -> Self {
        Self {
            graph,
            node,
            index,
            output: output.name.clone(),
            ty: output.ty,
        }
    }

    /// Identity of the builder that declared the producer.
    pub(crate) fn graph(&self) -> Uuid {
        self.graph
    }

    /// The producing node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Position of this output in the producer's output list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn output_name(&self) -> &str {
        &self.output
    }

    pub fn ty(&self) -> LiteralType {
        self.ty
    }
}

/// Where a parameter gets its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Another node's output.
    Promise(Promise),
    /// One of the enclosing workflow's own inputs.
    Input(Variable),
    /// A constant.
    Literal(Value),
}

impl Binding {
    pub fn literal(value: impl Into<Value>) -> Self {
        Binding::Literal(value.into())
    }

    /// Static type, when one is known before execution.
    pub fn static_type(&self) -> Option<LiteralType> {
        match self {
            Binding::Promise(p) => Some(p.ty()),
            Binding::Input(v) => Some(v.ty),
            Binding::Literal(value) => Some(LiteralType::of(value)),
        }
    }

    /// Check this binding can feed a parameter declared as `target`.
    pub(crate) fn check_assignable(
        &self,
        target: LiteralType,
        context: impl FnOnce() -> String,
    ) -> Result<(), EngineError> {
        let ok = match self {
            Binding::Literal(value) => target.accepts(value),
            Binding::Promise(p) => p.ty().is_assignable_to(target),
            Binding::Input(v) => v.ty.is_assignable_to(target),
        };
        if ok {
            return Ok(());
        }
        Err(EngineError::TypeMismatch {
            context: context(),
            expected: target.to_string(),
            found: self
                .static_type()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unknown".into()),
        })
    }
}

impl From<bool> for Binding {
    fn from(v: bool) -> Self {
        Binding::Literal(Value::from(v))
    }
}

impl From<i64> for Binding {
    fn from(v: i64) -> Self {
        Binding::Literal(Value::from(v))
    }
}

impl From<f64> for Binding {
    fn from(v: f64) -> Self {
        Binding::Literal(Value::from(v))
    }
}

impl From<&str> for Binding {
    fn from(v: &str) -> Self {
        Binding::Literal(Value::from(v))
    }
}

impl From<Promise> for Binding {
    fn from(p: Promise) -> Self {
        Binding::Promise(p)
    }
}

impl From<&Promise> for Binding {
    fn from(p: &Promise) -> Self {
        Binding::Promise(p.clone())
    }
}

/// Reference to a declared construct, used by ordering declarations.
///
/// Like a promise, it remembers the builder that declared the node, so it
/// cannot be replayed against another workflow's graph.
///
/// Composite constructs are opaque single nodes in their parent graph, so
/// their source and sink sets both resolve to that one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    graph: Uuid,
    id: NodeId,
    kind: NodeKind,
}

impl NodeRef {
    pub(crate) fn new(graph: Uuid, id: NodeId, kind: NodeKind) -> Self {
        Self { graph, id, kind }
    }

    pub(crate) fn graph(&self) -> Uuid {
        self.graph
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Node(s) that must complete before anything ordered after this construct.
    pub fn sinks(&self) -> Vec<NodeId> {
        vec![self.id]
    }

    /// Node(s) that start this construct.
    pub fn sources(&self) -> Vec<NodeId> {
        vec![self.id]
    }
}

/// What a declaration returns: the node it created and its output promises.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    node: NodeRef,
    promises: Vec<Promise>,
}

impl NodeOutput {
    pub(crate) fn new(node: NodeRef, promises: Vec<Promise>) -> Self {
        Self { node, promises }
    }

    pub fn node_ref(&self) -> NodeRef {
        self.node
    }

    pub fn promises(&self) -> &[Promise] {
        &self.promises
    }

    /// The only output of a single-output node.
    pub fn single(&self) -> Result<Promise, EngineError> {
        match self.promises.as_slice() {
            [p] => Ok(p.clone()),
            other => Err(EngineError::OutputArity {
                target: self.node.id().to_string(),
                expected: 1,
                found: other.len(),
            }),
        }
    }

    /// A named output.
    pub fn get(&self, name: &str) -> Result<Promise, EngineError> {
        self.promises
            .iter()
            .find(|p| p.output_name() == name)
            .cloned()
            .ok_or_else(|| {
                EngineError::UnresolvedReference(format!(
                    "node {} has no output named '{name}'",
                    self.node.id()
                ))
            })
    }

    /// All outputs as bindings, in declaration order.
    pub fn bindings(&self) -> Vec<Binding> {
        self.promises.iter().map(Binding::from).collect()
    }
}

impl From<&NodeOutput> for NodeRef {
    fn from(out: &NodeOutput) -> Self {
        out.node
    }
}

impl From<NodeOutput> for NodeRef {
    fn from(out: NodeOutput) -> Self {
        out.node
    }
}
