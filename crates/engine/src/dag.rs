//! DAG validation and ordering, run on every scope before a graph is
//! frozen.
//!
//! Rules enforced:
//! 1. The merged data + control edge set over a scope's nodes is acyclic.
//! 2. Among nodes whose upstream set is satisfied, the one declared first
//!    runs first.
//!
//! Returns the scope's nodes in execution order on success.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::warn;

use crate::node::{Edge, Node};
use crate::promise::NodeId;
use crate::EngineError;

/// Order `members` topologically (Kahn's algorithm, smallest declaration id
/// first among ready nodes).
///
/// # Errors
/// - [`EngineError::Cycle`] if the edges among `members` are not acyclic.
pub fn validate_dag(
    workflow: &str,
    nodes: &[Node],
    edges: &[Edge],
    members: &[NodeId],
) -> Result<Vec<NodeId>, EngineError> {
    let member_set: HashSet<NodeId> = members.iter().copied().collect();

    // In-degree counts only edges that stay inside this scope.
    let mut in_degree: HashMap<NodeId, usize> = members
        .iter()
        .map(|id| {
            let degree = nodes[id.0]
                .upstream
                .iter()
                .filter(|up| member_set.contains(up))
                .count();
            (*id, degree)
        })
        .collect();

    // Seed the heap with nodes that have no incoming edges.
    let mut ready: BinaryHeap<Reverse<NodeId>> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| Reverse(id))
        .collect();

    let mut sorted: Vec<NodeId> = Vec::with_capacity(members.len());

    while let Some(Reverse(id)) = ready.pop() {
        sorted.push(id);

        for next in &nodes[id.0].downstream {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(*next));
                }
            }
        }
    }

    // If we didn't visit every node the scope contains a cycle.
    if sorted.len() != members.len() {
        let mut stuck: Vec<NodeId> = in_degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id)
            .collect();
        stuck.sort();

        let stuck_set: HashSet<NodeId> = stuck.iter().copied().collect();
        for edge in edges
            .iter()
            .filter(|e| stuck_set.contains(&e.from) && stuck_set.contains(&e.to))
        {
            warn!(workflow, %edge, "edge on an unresolved cycle");
        }

        let involved = stuck
            .iter()
            .map(|id| format!("{} ({id})", nodes[id.0].name))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(EngineError::Cycle {
            workflow: workflow.to_owned(),
            involved,
        });
    }

    Ok(sorted)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{EdgeKind, NodePayload, ScopeId};
    use crate::workflow::TaskDefinition;
    use std::collections::BTreeSet;
    use tasks::{TaskInputs, TaskOutput};

    fn make_nodes(names: &[&str]) -> Vec<Node> {
        let task = TaskDefinition::builder("tests.dag.noop").build(|_: &TaskInputs| Ok(TaskOutput::Unit));
        names
            .iter()
            .enumerate()
            .map(|(i, name)| Node {
                id: NodeId(i),
                name: name.to_string(),
                scope: ScopeId::ROOT,
                inputs: Vec::new(),
                upstream: BTreeSet::new(),
                downstream: BTreeSet::new(),
                payload: NodePayload::Task(task.clone()),
            })
            .collect()
    }

    fn connect(nodes: &mut [Node], edges: &mut Vec<Edge>, from: usize, to: usize) {
        nodes[to].upstream.insert(NodeId(from));
        nodes[from].downstream.insert(NodeId(to));
        edges.push(Edge {
            from: NodeId(from),
            to: NodeId(to),
            kind: EdgeKind::Control,
        });
    }

    fn all(nodes: &[Node]) -> Vec<NodeId> {
        nodes.iter().map(|n| n.id).collect()
    }

    fn sorted_names(nodes: &[Node], edges: &[Edge]) -> Vec<String> {
        validate_dag("test", nodes, edges, &all(nodes))
            .expect("should be valid")
            .into_iter()
            .map(|id| nodes[id.0].name.clone())
            .collect()
    }

    #[test]
    fn reversed_control_chain_runs_in_edge_order() {
        // c → b → a, declared a, b, c
        let mut nodes = make_nodes(&["a", "b", "c"]);
        let mut edges = Vec::new();
        connect(&mut nodes, &mut edges, 2, 1);
        connect(&mut nodes, &mut edges, 1, 0);

        assert_eq!(sorted_names(&nodes, &edges), vec!["c", "b", "a"]);
    }

    #[test]
    fn unrelated_nodes_follow_declaration_order() {
        //   d
        //  a b c   (no edges between a, b, c)
        let mut nodes = make_nodes(&["a", "b", "c", "d"]);
        let mut edges = Vec::new();
        connect(&mut nodes, &mut edges, 3, 1);

        assert_eq!(sorted_names(&nodes, &edges), vec!["a", "c", "d", "b"]);
    }

    #[test]
    fn valid_diamond_dag() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let mut nodes = make_nodes(&["a", "b", "c", "d"]);
        let mut edges = Vec::new();
        connect(&mut nodes, &mut edges, 0, 1);
        connect(&mut nodes, &mut edges, 0, 2);
        connect(&mut nodes, &mut edges, 1, 3);
        connect(&mut nodes, &mut edges, 2, 3);

        assert_eq!(sorted_names(&nodes, &edges), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn cycle_is_detected() {
        // a → b → c → a  (cycle!)
        let mut nodes = make_nodes(&["a", "b", "c", "free"]);
        let mut edges = Vec::new();
        connect(&mut nodes, &mut edges, 0, 1);
        connect(&mut nodes, &mut edges, 1, 2);
        connect(&mut nodes, &mut edges, 2, 0);

        match validate_dag("wf", &nodes, &edges, &all(&nodes)) {
            Err(EngineError::Cycle { workflow, involved }) => {
                assert_eq!(workflow, "wf");
                assert_eq!(involved, "a (n0), b (n1), c (n2)");
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let mut nodes = make_nodes(&["solo"]);
        let mut edges = Vec::new();
        connect(&mut nodes, &mut edges, 0, 0);
        assert!(matches!(
            validate_dag("wf", &nodes, &edges, &all(&nodes)),
            Err(EngineError::Cycle { .. })
        ));
    }

    #[test]
    fn edges_leaving_the_member_set_are_ignored() {
        let mut nodes = make_nodes(&["outside", "x", "y"]);
        let mut edges = Vec::new();
        connect(&mut nodes, &mut edges, 0, 2);

        let order = validate_dag("wf", &nodes, &edges, &[NodeId(1), NodeId(2)]).unwrap();
        assert_eq!(order, vec![NodeId(1), NodeId(2)]);
    }
}
