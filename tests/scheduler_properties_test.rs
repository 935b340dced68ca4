//! Randomized properties of the priority scheduler
//!
//! - extract_min always yields the smallest (key, insertion order) ready entry
//! - gated tasks never come out before their dependencies are marked completed

use std::collections::{HashMap, HashSet};

use peer_scheduler::core::{HeapHandle, NewTask, PriorityScheduler, TaskId, TaskKind, TaskNode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn node(id: &str, deps: &[TaskId]) -> TaskNode {
    let mut task = NewTask::new("payload", 0).with_id(id);
    task.dependencies = deps.to_vec();
    TaskNode::from_submission(task, TaskKind::Local)
}

#[test]
fn test_extract_min_matches_reference_model() {
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut scheduler = PriorityScheduler::new();
        // handle -> (key, seq, id)
        let mut model: HashMap<HeapHandle, (u64, u64, TaskId)> = HashMap::new();
        let mut seq = 0u64;

        for _ in 0..500 {
            match rng.random_range(0..10) {
                0..=4 => {
                    let id = TaskId::new(format!("t{seq}"));
                    let key = rng.random_range(0..50);
                    let handle = scheduler.insert(&node(id.as_str(), &[]), key);
                    model.insert(handle, (key, seq, id));
                    seq += 1;
                }
                5..=6 if !model.is_empty() => {
                    let handles: Vec<HeapHandle> = model.keys().copied().collect();
                    let handle = handles[rng.random_range(0..handles.len())];
                    let entry = model.get_mut(&handle).unwrap();
                    let new_key = rng.random_range(0..=entry.0);
                    scheduler.decrease_key(handle, new_key).unwrap();
                    entry.0 = new_key;
                }
                _ => {
                    let expected = model
                        .iter()
                        .min_by_key(|(_, (key, seq, _))| (*key, *seq))
                        .map(|(handle, _)| *handle);
                    let got = scheduler.extract_min();
                    match (expected, got) {
                        (None, None) => {}
                        (Some(handle), Some(entry)) => {
                            let (key, _, id) = model.remove(&handle).unwrap();
                            assert_eq!(entry.task_id, id, "seed {seed}");
                            assert_eq!(entry.key, key, "seed {seed}");
                        }
                        (expected, got) => panic!("seed {seed}: expected {expected:?}, got {got:?}"),
                    }
                }
            }
            assert_eq!(scheduler.ready_len(), model.len());
        }
    }
}

#[test]
fn test_gated_tasks_wait_for_dependencies() {
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut scheduler = PriorityScheduler::new();
        let n = 60;
        let ids: Vec<TaskId> = (0..n).map(|i| TaskId::new(format!("t{i}"))).collect();
        let mut deps: HashMap<TaskId, Vec<TaskId>> = HashMap::new();

        for i in 0..n {
            let mut d = Vec::new();
            for j in 0..i {
                if rng.random_bool(0.08) {
                    d.push(ids[j].clone());
                }
            }
            scheduler.insert(&node(ids[i].as_str(), &d), rng.random_range(0..100));
            deps.insert(ids[i].clone(), d);
        }

        let mut completed: HashSet<TaskId> = HashSet::new();
        while completed.len() < n {
            let mut batch = Vec::new();
            while let Some(entry) = scheduler.extract_min() {
                for dep in &deps[&entry.task_id] {
                    assert!(completed.contains(dep), "seed {seed}: {} ran before {dep}", entry.task_id);
                }
                batch.push(entry.task_id);
            }
            assert!(!batch.is_empty(), "seed {seed}: scheduler stalled");
            for id in batch {
                scheduler.mark_completed(&id);
                completed.insert(id);
            }
            scheduler.reschedule_pending();
        }
        assert!(scheduler.is_empty());
    }
}
