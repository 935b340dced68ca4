//! Benchmarks for the scheduling building blocks.
//!
//! Benchmarks cover:
//! - Pairing heap insert/extract and decrease-key
//! - Dependency release through the pending set
//! - Topological sort of layered graphs
//! - Clock merge and responsibility evaluation

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use peer_scheduler::core::{
    CausalClock, ClockState, NewTask, PriorityScheduler, ResponsibilityAssigner, TaskGraph,
    TaskId, TaskKind, TaskNode,
};

// ============================================================================
// Helpers
// ============================================================================

fn nodes(n: usize) -> Vec<TaskNode> {
    (0..n)
        .map(|i| TaskNode::from_submission(NewTask::new("p", 0).with_id(format!("t{i}")), TaskKind::Local))
        .collect()
}

/// Pseudo-random but deterministic keys.
fn key(i: usize) -> u64 {
    (i as u64).wrapping_mul(2_654_435_761) % 10_000
}

// ============================================================================
// Scheduler
// ============================================================================

fn bench_insert_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_insert_extract");
    for size in [100usize, 1_000, 10_000] {
        let tasks = nodes(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &tasks, |b, tasks| {
            b.iter(|| {
                let mut scheduler = PriorityScheduler::new();
                for (i, task) in tasks.iter().enumerate() {
                    scheduler.insert(task, key(i));
                }
                while let Some(entry) = scheduler.extract_min() {
                    black_box(entry);
                }
            });
        });
    }
    group.finish();
}

fn bench_decrease_key(c: &mut Criterion) {
    let tasks = nodes(1_000);
    c.bench_function("scheduler_decrease_key_1000", |b| {
        b.iter(|| {
            let mut scheduler = PriorityScheduler::new();
            let handles: Vec<_> = tasks
                .iter()
                .enumerate()
                .map(|(i, task)| scheduler.insert(task, 10_000 + key(i)))
                .collect();
            for (i, handle) in handles.iter().enumerate() {
                let _ = scheduler.decrease_key(*handle, key(i));
            }
            black_box(scheduler.extract_min());
        });
    });
}

fn bench_dependency_release(c: &mut Criterion) {
    // a chain: every task waits on its predecessor
    let tasks: Vec<TaskNode> = (0..500)
        .map(|i| {
            let mut task = NewTask::new("p", 0).with_id(format!("t{i}"));
            if i > 0 {
                task = task.depends_on(format!("t{}", i - 1));
            }
            TaskNode::from_submission(task, TaskKind::Local)
        })
        .collect();

    c.bench_function("scheduler_chain_release_500", |b| {
        b.iter(|| {
            let mut scheduler = PriorityScheduler::new();
            for task in &tasks {
                scheduler.insert(task, 1);
            }
            while let Some(entry) = scheduler.extract_min() {
                scheduler.mark_completed(&entry.task_id);
                scheduler.reschedule_pending();
            }
        });
    });
}

// ============================================================================
// Graph, clock, responsibility
// ============================================================================

fn bench_topological_sort(c: &mut Criterion) {
    let mut graph = TaskGraph::new();
    let width = 20;
    let depth = 50;
    let mut prev: Vec<TaskId> = Vec::new();
    for layer in 0..depth {
        let mut current = Vec::new();
        for j in 0..width {
            let id = graph
                .add_node(NewTask::new("p", 0).with_id(format!("n{layer}-{j}")), TaskKind::Local)
                .id
                .clone();
            for parent in prev.iter().skip(j % 3).step_by(3) {
                graph.add_child(parent, &id);
            }
            current.push(id);
        }
        prev = current;
    }

    c.bench_function("graph_topological_sort_1000", |b| {
        b.iter(|| black_box(graph.topological_sort().map(|order| order.len())));
    });
}

fn bench_clock_merge(c: &mut Criterion) {
    let remote: ClockState = (0..64).map(|i| (format!("peer-{i}"), i as u64)).collect();
    c.bench_function("clock_merge_64_peers", |b| {
        b.iter(|| {
            let mut clock = CausalClock::new("local");
            clock.merge(black_box(&remote));
            clock.tick();
            black_box(clock.head().len())
        });
    });
}

fn bench_responsibility(c: &mut Criterion) {
    let assigner = ResponsibilityAssigner::default();
    let peers: Vec<String> = (0..32).map(|i| format!("peer-{i}")).collect();
    let target = assigner.normalize("task-42");
    c.bench_function("responsibility_32_peers", |b| {
        b.iter(|| black_box(assigner.is_responsible("peer-0", &target, &peers)));
    });
}

criterion_group!(
    benches,
    bench_insert_extract,
    bench_decrease_key,
    bench_dependency_release,
    bench_topological_sort,
    bench_clock_merge,
    bench_responsibility
);
criterion_main!(benches);
