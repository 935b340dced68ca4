//! Randomized properties of the task graph
//!
//! - random DAGs always sort, and the order respects every edge
//! - injecting a back edge makes sorting fail

use std::collections::HashMap;

use peer_scheduler::core::{CoordinationError, NewTask, TaskGraph, TaskId, TaskKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_dag(rng: &mut StdRng, n: usize) -> (TaskGraph, Vec<TaskId>, Vec<(usize, usize)>) {
    let mut graph = TaskGraph::new();
    let ids: Vec<TaskId> = (0..n)
        .map(|i| graph.add_node(NewTask::new("p", 0).with_id(format!("n{i}")), TaskKind::Local).id.clone())
        .collect();
    let mut edges = Vec::new();
    for child in 1..n {
        for parent in 0..child {
            if rng.random_bool(0.1) {
                assert!(graph.add_child(&ids[parent], &ids[child]));
                edges.push((parent, child));
            }
        }
    }
    (graph, ids, edges)
}

#[test]
fn test_random_dags_sort_consistently() {
    for seed in 0..30u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = rng.random_range(1..40);
        let (graph, ids, edges) = random_dag(&mut rng, n);

        let order = graph.topological_sort().expect("acyclic graph must sort");
        assert_eq!(order.len(), n);
        let position: HashMap<&TaskId, usize> =
            order.iter().enumerate().map(|(i, node)| (&node.id, i)).collect();
        for (parent, child) in edges {
            assert!(position[&ids[parent]] < position[&ids[child]], "seed {seed}");
        }

        let mut visits = 0;
        graph.traverse(|_, _| visits += 1, None).unwrap();
        assert_eq!(visits, n);
    }
}

#[test]
fn test_back_edge_breaks_sort() {
    let mut found = 0;
    for seed in 0..30u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut graph, ids, edges) = random_dag(&mut rng, 25);
        let Some(&(parent, child)) = edges.get(rng.random_range(0..edges.len().max(1))) else {
            continue;
        };
        graph.add_child(&ids[child], &ids[parent]);

        assert!(graph.topological_sort().is_none(), "seed {seed}");
        assert!(matches!(graph.topological_sort_checked(), Err(CoordinationError::Cycle(_))));
        found += 1;
    }
    assert!(found > 0);
}
