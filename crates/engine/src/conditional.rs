//! Conditional branches.
//!
//! A conditional is one selector node in its parent scope. Each case body
//! runs in a child scope, so the nodes it declares belong to that branch's
//! subgraph and are only executed when the branch is selected.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::builder::WorkflowBuilder;
use crate::node::{EdgeKind, NodePayload, ScopeId};
use crate::promise::{Binding, NodeId, NodeOutput};
use crate::types::{LiteralType, Variable};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            ComparisonOp::Eq => ordering == Ordering::Equal,
            ComparisonOp::Ne => ordering != Ordering::Equal,
            ComparisonOp::Lt => ordering == Ordering::Less,
            ComparisonOp::Le => ordering != Ordering::Greater,
            ComparisonOp::Gt => ordering == Ordering::Greater,
            ComparisonOp::Ge => ordering != Ordering::Less,
        }
    }

    fn is_equality(self) -> bool {
        matches!(self, ComparisonOp::Eq | ComparisonOp::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConjunctionOp {
    And,
    Or,
}

/// Pure boolean expression over promises, workflow inputs and literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: Binding,
        op: ComparisonOp,
        right: Binding,
    },
    Conjunction {
        op: ConjunctionOp,
        left: Box<Predicate>,
        right: Box<Predicate>,
    },
}

impl Predicate {
    pub fn compare(left: impl Into<Binding>, op: ComparisonOp, right: impl Into<Binding>) -> Self {
        Predicate::Compare {
            left: left.into(),
            op,
            right: right.into(),
        }
    }

    pub fn eq(left: impl Into<Binding>, right: impl Into<Binding>) -> Self {
        Self::compare(left, ComparisonOp::Eq, right)
    }

    pub fn ne(left: impl Into<Binding>, right: impl Into<Binding>) -> Self {
        Self::compare(left, ComparisonOp::Ne, right)
    }

    pub fn lt(left: impl Into<Binding>, right: impl Into<Binding>) -> Self {
        Self::compare(left, ComparisonOp::Lt, right)
    }

    pub fn le(left: impl Into<Binding>, right: impl Into<Binding>) -> Self {
        Self::compare(left, ComparisonOp::Le, right)
    }

    pub fn gt(left: impl Into<Binding>, right: impl Into<Binding>) -> Self {
        Self::compare(left, ComparisonOp::Gt, right)
    }

    pub fn ge(left: impl Into<Binding>, right: impl Into<Binding>) -> Self {
        Self::compare(left, ComparisonOp::Ge, right)
    }

    pub fn is_true(operand: impl Into<Binding>) -> Self {
        Self::compare(operand, ComparisonOp::Eq, true)
    }

    pub fn is_false(operand: impl Into<Binding>) -> Self {
        Self::compare(operand, ComparisonOp::Eq, false)
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::Conjunction {
            op: ConjunctionOp::And,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Conjunction {
            op: ConjunctionOp::Or,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// Every operand, left to right.
    pub fn operands(&self) -> Vec<&Binding> {
        match self {
            Predicate::Compare { left, right, .. } => vec![left, right],
            Predicate::Conjunction { left, right, .. } => {
                let mut all = left.operands();
                all.extend(right.operands());
                all
            }
        }
    }

    fn check_types(&self, conditional: &str) -> Result<(), EngineError> {
        match self {
            Predicate::Compare { left, op, right } => {
                let (Some(l), Some(r)) = (left.static_type(), right.static_type()) else {
                    return Ok(());
                };
                let comparable = if l.is_numeric() && r.is_numeric() {
                    true
                } else if l == r {
                    l == LiteralType::String || op.is_equality()
                } else {
                    false
                };
                if comparable {
                    Ok(())
                } else {
                    Err(EngineError::TypeMismatch {
                        context: format!("predicate of conditional '{conditional}'"),
                        expected: format!("operands comparable with {op:?}"),
                        found: format!("{l} and {r}"),
                    })
                }
            }
            Predicate::Conjunction { left, right, .. } => {
                left.check_types(conditional)?;
                right.check_types(conditional)
            }
        }
    }

    /// Evaluate left to right, short-circuiting conjunctions.
    pub fn evaluate<F>(&self, resolve: &mut F) -> Result<bool, EngineError>
    where
        F: FnMut(&Binding) -> Result<Value, EngineError>,
    {
        match self {
            Predicate::Compare { left, op, right } => {
                let (l, r) = (resolve(left)?, resolve(right)?);
                compare_values(&l, *op, &r)
            }
            Predicate::Conjunction { op, left, right } => {
                let l = left.evaluate(resolve)?;
                match (op, l) {
                    (ConjunctionOp::And, false) => Ok(false),
                    (ConjunctionOp::Or, true) => Ok(true),
                    _ => right.evaluate(resolve),
                }
            }
        }
    }
}

fn compare_values(left: &Value, op: ComparisonOp, right: &Value) -> Result<bool, EngineError> {
    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            match (l.as_f64(), r.as_f64()) {
                (Some(l), Some(r)) => l.partial_cmp(&r),
                _ => None,
            }
        }
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) if op.is_equality() => Some(l.cmp(r)),
        (Value::Null, Value::Null) if op.is_equality() => Some(Ordering::Equal),
        _ => {
            return Err(EngineError::TypeMismatch {
                context: "predicate evaluation".into(),
                expected: format!("operands comparable with {op:?}"),
                found: format!("{} and {}", LiteralType::of(left), LiteralType::of(right)),
            })
        }
    };
    // NaN compares as false for everything but `!=`.
    Ok(ordering.map_or(op == ComparisonOp::Ne, |o| op.holds(o)))
}

// ---------------------------------------------------------------------------
// Conditional node payload
// ---------------------------------------------------------------------------

/// Nodes declared inside one branch.
#[derive(Debug, Clone)]
pub struct BranchSubgraph {
    pub scope: ScopeId,
    /// Branch members; in execution order once the graph is finalized.
    pub order: Vec<NodeId>,
    /// The branch's results, in output order.
    pub outputs: Vec<Binding>,
}

#[derive(Debug, Clone)]
pub enum BranchBody {
    Subgraph(BranchSubgraph),
    /// Selecting this branch fails the run with the message.
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct Case {
    pub predicate: Predicate,
    pub body: BranchBody,
}

/// Payload of a conditional node.
#[derive(Debug, Clone, Default)]
pub struct ConditionalNode {
    pub cases: Vec<Case>,
    pub else_case: Option<BranchBody>,
    /// Unified outputs across all non-failing branches.
    pub outputs: Vec<Variable>,
}

impl ConditionalNode {
    /// Case bodies in declaration order, then the default.
    pub fn bodies(&self) -> impl Iterator<Item = &BranchBody> {
        self.cases.iter().map(|c| &c.body).chain(self.else_case.iter())
    }

    pub(crate) fn subgraphs(&self) -> impl Iterator<Item = &BranchSubgraph> {
        self.bodies().filter_map(|body| match body {
            BranchBody::Subgraph(sub) => Some(sub),
            BranchBody::Fail(_) => None,
        })
    }

    pub(crate) fn subgraphs_mut(&mut self) -> impl Iterator<Item = &mut BranchSubgraph> {
        self.cases
            .iter_mut()
            .map(|c| &mut c.body)
            .chain(self.else_case.iter_mut())
            .filter_map(|body| match body {
                BranchBody::Subgraph(sub) => Some(sub),
                BranchBody::Fail(_) => None,
            })
    }

    /// Pick the branch to run: the first case whose predicate holds, else the
    /// default. `None` when nothing matches and there is no default.
    pub fn select<F>(&self, mut resolve: F) -> Result<Option<&BranchBody>, EngineError>
    where
        F: FnMut(&Binding) -> Result<Value, EngineError>,
    {
        for case in &self.cases {
            if case.predicate.evaluate(&mut resolve)? {
                return Ok(Some(&case.body));
            }
        }
        Ok(self.else_case.as_ref())
    }

    fn unify_outputs(&self, conditional: &str) -> Result<Vec<Variable>, EngineError> {
        let mut unified: Option<Vec<Variable>> = None;
        for (index, sub) in self.subgraphs().enumerate() {
            let shape: Vec<Variable> = sub
                .outputs
                .iter()
                .enumerate()
                .map(|(i, b)| {
                    let name = match b {
                        Binding::Promise(p) => p.output_name().to_owned(),
                        Binding::Input(v) => v.name.clone(),
                        Binding::Literal(_) => format!("o{i}"),
                    };
                    Variable::new(name, b.static_type().unwrap_or(LiteralType::None))
                })
                .collect();

            let Some(current) = unified.as_mut() else {
                unified = Some(shape);
                continue;
            };
            if current.len() != shape.len() {
                return Err(EngineError::TypeMismatch {
                    context: format!("branch {index} of conditional '{conditional}'"),
                    expected: format!("{} output(s)", current.len()),
                    found: format!("{} output(s)", shape.len()),
                });
            }
            for (have, next) in current.iter_mut().zip(&shape) {
                if next.ty.is_assignable_to(have.ty) {
                    continue;
                }
                if have.ty.is_assignable_to(next.ty) {
                    have.ty = next.ty;
                    continue;
                }
                return Err(EngineError::TypeMismatch {
                    context: format!("output '{}' of conditional '{conditional}'", have.name),
                    expected: have.ty.to_string(),
                    found: next.ty.to_string(),
                });
            }
        }
        Ok(unified.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Declaration API
// ---------------------------------------------------------------------------

impl WorkflowBuilder {
    /// Start declaring a conditional.
    pub fn conditional(&mut self, name: impl Into<String>) -> ConditionalStart<'_> {
        ConditionalStart {
            builder: self,
            name: name.into(),
        }
    }

    fn conditional_mut(&mut self, id: NodeId) -> &mut ConditionalNode {
        match &mut self.nodes[id.0].payload {
            NodePayload::Conditional(c) => c,
            _ => unreachable!("node {id} was allocated as a conditional"),
        }
    }
}

#[must_use = "start the conditional with `if_`"]
pub struct ConditionalStart<'b> {
    builder: &'b mut WorkflowBuilder,
    name: String,
}

impl<'b> ConditionalStart<'b> {
    pub fn if_(self, predicate: Predicate) -> Result<CaseBuilder<'b>, EngineError> {
        let node = self.builder.add_node(
            self.name.clone(),
            Vec::new(),
            NodePayload::Conditional(ConditionalNode::default()),
        )?;
        debug!(workflow = %self.builder.name, node = %node, conditional = %self.name, "declared conditional node");
        ConditionalBuilder {
            builder: self.builder,
            node,
            name: self.name,
        }
        .case(predicate)
    }
}

/// A conditional with at least one case.
#[must_use = "finish the conditional with `else_` or `end`"]
pub struct ConditionalBuilder<'b> {
    builder: &'b mut WorkflowBuilder,
    node: NodeId,
    name: String,
}

impl<'b> ConditionalBuilder<'b> {
    fn case(self, predicate: Predicate) -> Result<CaseBuilder<'b>, EngineError> {
        predicate.check_types(&self.name)?;
        for operand in predicate.operands() {
            self.builder.check_binding(operand)?;
        }
        let scope = self.builder.current;
        for operand in predicate.operands() {
            if let Binding::Promise(p) = operand {
                self.builder
                    .add_dependency(p.node(), scope, Some(self.node), EdgeKind::Data)?;
            }
        }
        Ok(CaseBuilder {
            cond: self,
            predicate,
        })
    }

    pub fn elif_(self, predicate: Predicate) -> Result<CaseBuilder<'b>, EngineError> {
        self.case(predicate)
    }

    pub fn else_(self) -> ElseBuilder<'b> {
        ElseBuilder { cond: self }
    }

    /// Finish without a default branch.
    pub fn end(self) -> Result<NodeOutput, EngineError> {
        self.finish()
    }

    /// Run `body` in a fresh branch scope and collect what it declared.
    fn run_branch<F>(&mut self, body: F) -> Result<BranchBody, EngineError>
    where
        F: FnOnce(&mut WorkflowBuilder) -> Result<NodeOutput, EngineError>,
    {
        let builder = &mut *self.builder;
        let first = builder.nodes.len();
        let scope = builder.push_scope(self.node);

        let declared = body(builder).and_then(|out| {
            let outputs = out.bindings();
            for binding in &outputs {
                builder.check_binding(binding)?;
            }
            Ok(outputs)
        });
        builder.pop_scope();
        let outputs = declared?;

        for binding in &outputs {
            if let Binding::Promise(p) = binding {
                builder.add_dependency(p.node(), scope, None, EdgeKind::Data)?;
            }
        }
        let members = builder.nodes[first..]
            .iter()
            .filter(|n| n.scope == scope)
            .map(|n| n.id)
            .collect();

        Ok(BranchBody::Subgraph(BranchSubgraph {
            scope,
            order: members,
            outputs,
        }))
    }

    /// Re-derive the node's outputs from every branch declared so far, so
    /// they are never stale even if the conditional is left unfinished.
    fn unify(&mut self) -> Result<(), EngineError> {
        let conditional = self.builder.conditional_mut(self.node);
        conditional.outputs = conditional.unify_outputs(&self.name)?;
        Ok(())
    }

    fn finish(mut self) -> Result<NodeOutput, EngineError> {
        self.unify()?;
        let conditional = self.builder.conditional_mut(self.node);
        debug!(
            conditional = %self.name,
            cases = conditional.cases.len(),
            has_default = conditional.else_case.is_some(),
            outputs = conditional.outputs.len(),
            "conditional finished"
        );
        Ok(self.builder.output_of(self.node))
    }
}

/// A case whose predicate is known and whose body is pending.
#[must_use = "give the case a body with `then` or `fail`"]
pub struct CaseBuilder<'b> {
    cond: ConditionalBuilder<'b>,
    predicate: Predicate,
}

impl<'b> CaseBuilder<'b> {
    pub fn then<F>(mut self, body: F) -> Result<ConditionalBuilder<'b>, EngineError>
    where
        F: FnOnce(&mut WorkflowBuilder) -> Result<NodeOutput, EngineError>,
    {
        let body = self.cond.run_branch(body)?;
        self.cond.builder.conditional_mut(self.cond.node).cases.push(Case {
            predicate: self.predicate,
            body,
        });
        self.cond.unify()?;
        Ok(self.cond)
    }

    pub fn fail(self, message: impl Into<String>) -> ConditionalBuilder<'b> {
        let cond = self.cond;
        cond.builder.conditional_mut(cond.node).cases.push(Case {
            predicate: self.predicate,
            body: BranchBody::Fail(message.into()),
        });
        cond
    }
}

/// The default branch.
#[must_use = "give the default branch a body with `then` or `fail`"]
pub struct ElseBuilder<'b> {
    cond: ConditionalBuilder<'b>,
}

impl<'b> ElseBuilder<'b> {
    pub fn then<F>(mut self, body: F) -> Result<NodeOutput, EngineError>
    where
        F: FnOnce(&mut WorkflowBuilder) -> Result<NodeOutput, EngineError>,
    {
        let body = self.cond.run_branch(body)?;
        self.cond.builder.conditional_mut(self.cond.node).else_case = Some(body);
        self.cond.finish()
    }

    pub fn fail(self, message: impl Into<String>) -> Result<NodeOutput, EngineError> {
        self.cond.builder.conditional_mut(self.cond.node).else_case =
            Some(BranchBody::Fail(message.into()));
        self.cond.finish()
    }
}
