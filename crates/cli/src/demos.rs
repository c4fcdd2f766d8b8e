//! Built-in demo workflows, runnable by name from the command line.

use std::sync::Arc;

use engine::{Binding, LiteralType, Predicate, TaskDefinition, WorkflowDefinition};
use serde_json::json;
use tasks::{TaskInputs, TaskOutput};
use tracing::info;

pub struct Demo {
    pub name: &'static str,
    pub about: &'static str,
    pub build: fn() -> Arc<WorkflowDefinition>,
}

pub const DEMOS: &[Demo] = &[
    Demo {
        name: "ordering",
        about: "three side-effect tasks ordered only by control edges (c, b, a)",
        build: ordering,
    },
    Demo {
        name: "add",
        about: "five and six feed add; six is ordered after five",
        build: add,
    },
    Demo {
        name: "nested",
        about: "a sub-workflow that must finish before a task in the parent",
        build: nested,
    },
    Demo {
        name: "multiplier",
        about: "two conditionals over a float input, the second ordered first",
        build: multiplier,
    },
];

pub fn find(name: &str) -> Option<&'static Demo> {
    DEMOS.iter().find(|d| d.name == name)
}

fn say(name: &'static str) -> Arc<TaskDefinition> {
    TaskDefinition::builder(format!("demos.{name}")).build(move |_: &TaskInputs| {
        info!(task = name, "running");
        println!("{name}");
        Ok(TaskOutput::Unit)
    })
}

fn constant(name: &'static str, value: i64) -> Arc<TaskDefinition> {
    TaskDefinition::builder(format!("demos.{name}"))
        .output("o0", LiteralType::Integer)
        .build(move |_: &TaskInputs| {
            println!("{name}");
            Ok(TaskOutput::Single(json!(value)))
        })
}

fn ordering() -> Arc<WorkflowDefinition> {
    let (a, b, c) = (say("a"), say("b"), say("c"));
    WorkflowDefinition::builder("demos.ordering").body(move |w| {
        let a = w.declare_task(&a, &[])?;
        let b = w.declare_task(&b, &[])?;
        let c = w.declare_task(&c, &[])?;
        w.sequence(&[c.node_ref(), b.node_ref(), a.node_ref()])?;
        Ok(vec![])
    })
}

fn add_task() -> Arc<TaskDefinition> {
    TaskDefinition::builder("demos.add")
        .input("a", LiteralType::Integer)
        .input("b", LiteralType::Integer)
        .output("o0", LiteralType::Integer)
        .build(|i: &TaskInputs| {
            let sum = i.get_i64("a")? + i.get_i64("b")?;
            println!("add {sum}");
            Ok(TaskOutput::Single(json!(sum)))
        })
}

fn add() -> Arc<WorkflowDefinition> {
    let (five, six, add) = (constant("five", 5), constant("six", 6), add_task());
    WorkflowDefinition::builder("demos.add")
        .output("o0", LiteralType::Integer)
        .body(move |w| {
            let f = w.declare_task(&five, &[])?;
            let s = w.declare_task(&six, &[])?;
            let sum = w.declare_task(&add, &[("a", f.single()?.into()), ("b", s.single()?.into())])?;
            w.declare_after(&s, &f)?;
            Ok(vec![sum.single()?.into()])
        })
}

fn plus_five() -> Arc<TaskDefinition> {
    TaskDefinition::builder("demos.plus_five")
        .input("a", LiteralType::Integer)
        .output("o0", LiteralType::Integer)
        .build(|i: &TaskInputs| {
            let a = i.get_i64("a")?;
            println!("plus_five {a}");
            Ok(TaskOutput::Single(json!(a + 5)))
        })
}

fn nested() -> Arc<WorkflowDefinition> {
    let t1 = plus_five();
    let inner = {
        let t1 = Arc::clone(&t1);
        WorkflowDefinition::builder("demos.nested.inner")
            .input("x", LiteralType::Integer)
            .output("o0", LiteralType::Integer)
            .body(move |w| {
                let out = w.declare_task(&t1, &[("a", w.input("x")?)])?;
                Ok(vec![out.single()?.into()])
            })
    };
    WorkflowDefinition::builder("demos.nested")
        .input("x", LiteralType::Integer)
        .output("o0", LiteralType::Integer)
        .output("o1", LiteralType::Integer)
        .body(move |w| {
            let ft = w.declare_task(&t1, &[("a", Binding::literal(3))])?;
            let sub = w.declare_subworkflow(&inner, &[("x", w.input("x")?)])?;
            w.declare_after(&ft, &sub)?;
            Ok(vec![ft.single()?.into(), sub.single()?.into()])
        })
}

fn unary(name: &'static str, f: fn(f64) -> f64) -> Arc<TaskDefinition> {
    TaskDefinition::builder(format!("demos.{name}"))
        .input("n", LiteralType::Float)
        .output("o0", LiteralType::Float)
        .build(move |i: &TaskInputs| {
            let n = i.get_f64("n")?;
            println!("{name} {n}");
            Ok(TaskOutput::Single(json!(f(n))))
        })
}

fn multiplier() -> Arc<WorkflowDefinition> {
    let square = unary("square", |n| n * n);
    let double = unary("double", |n| 2.0 * n);
    WorkflowDefinition::builder("demos.multiplier")
        .input("x", LiteralType::Float)
        .output("a", LiteralType::Float)
        .output("b", LiteralType::Float)
        .body(move |w| {
            let x = w.input("x")?;
            let fraction = || Predicate::ge(x.clone(), 0.0).and(Predicate::lt(x.clone(), 1.0));

            let a = w
                .conditional("fractions")
                .if_(fraction())?
                .then(|w| w.declare_task(&double, &[("n", x.clone())]))?
                .else_()
                .then(|w| w.declare_task(&square, &[("n", x.clone())]))?;
            let b = w
                .conditional("fractions2")
                .if_(fraction())?
                .then(|w| w.declare_task(&square, &[("n", x.clone())]))?
                .elif_(Predicate::gt(x.clone(), 10.0))?
                .fail("input too large")
                .else_()
                .then(|w| w.declare_task(&double, &[("n", x.clone())]))?;
            w.declare_after(&a, &b)?;
            Ok(vec![a.single()?.into(), b.single()?.into()])
        })
}
