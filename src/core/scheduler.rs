//! Dependency-gated priority scheduler backed by a pairing heap.
//!
//! Ready entries live in a pairing heap stored in an index arena: insert and
//! decrease-key are amortized O(1), extract-min is amortized O(log n). Entries
//! whose dependencies have not completed are parked in a separate pending set
//! and only move into the heap through [`PriorityScheduler::reschedule_pending`].
//!
//! Ordering is by `(key, insertion sequence)`, so equal keys come out FIFO.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::core::error::{CoordinationError, Result};
use crate::core::task::{TaskId, TaskNode};

/// Stable handle returned by [`PriorityScheduler::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapHandle(u64);

impl fmt::Display for HeapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An entry yielded by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEntry {
    /// Handle the entry was inserted under.
    pub handle: HeapHandle,
    /// Task the entry refers to.
    pub task_id: TaskId,
    /// Key at extraction time.
    pub key: u64,
}

struct HeapNode {
    handle: HeapHandle,
    task_id: TaskId,
    key: u64,
    seq: u64,
    child: Option<usize>,
    sibling: Option<usize>,
    // Parent when this node is the leftmost child, left sibling otherwise.
    prev: Option<usize>,
}

struct PendingEntry {
    task_id: TaskId,
    key: u64,
    seq: u64,
    waiting_on: BTreeSet<TaskId>,
}

#[derive(Clone, Copy)]
enum Location {
    Heap(usize),
    Pending,
}

/// Priority queue with decrease-key and dependency gating.
///
/// Single-writer: callers serialize mutation.
#[derive(Default)]
pub struct PriorityScheduler {
    nodes: Vec<HeapNode>,
    free: Vec<usize>,
    root: Option<usize>,
    ready_len: usize,
    pending: BTreeMap<HeapHandle, PendingEntry>,
    locations: HashMap<HeapHandle, Location>,
    by_task: HashMap<TaskId, HeapHandle>,
    completed: HashSet<TaskId>,
    next_seq: u64,
}

impl PriorityScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task under `key`.
    ///
    /// Tasks whose dependencies are all marked completed go straight into the
    /// heap; the rest wait in the pending set. Inserting a task that is already
    /// queued returns its existing handle.
    pub fn insert(&mut self, task: &TaskNode, key: u64) -> HeapHandle {
        if let Some(&handle) = self.by_task.get(&task.id) {
            return handle;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let handle = HeapHandle(seq);

        let waiting_on: BTreeSet<TaskId> = task
            .dependencies
            .iter()
            .filter(|dep| !self.completed.contains(*dep))
            .cloned()
            .collect();

        if waiting_on.is_empty() {
            self.push_ready(handle, task.id.clone(), key, seq);
            tracing::debug!(task = %task.id, key, "inserted ready task");
        } else {
            tracing::debug!(task = %task.id, key, waiting = waiting_on.len(), "inserted pending task");
            self.pending.insert(
                handle,
                PendingEntry {
                    task_id: task.id.clone(),
                    key,
                    seq,
                    waiting_on,
                },
            );
            self.locations.insert(handle, Location::Pending);
        }
        self.by_task.insert(task.id.clone(), handle);
        handle
    }

    /// Lower the key of a queued entry.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown handle, `Validation` if `new_key` is larger
    /// than the current key.
    pub fn decrease_key(&mut self, handle: HeapHandle, new_key: u64) -> Result<()> {
        let location = self
            .locations
            .get(&handle)
            .copied()
            .ok_or_else(|| CoordinationError::NotFound(format!("heap handle {handle}")))?;

        match location {
            Location::Pending => {
                let entry = self
                    .pending
                    .get_mut(&handle)
                    .ok_or_else(|| CoordinationError::NotFound(format!("heap handle {handle}")))?;
                if new_key > entry.key {
                    return Err(CoordinationError::Validation(format!(
                        "cannot increase key of {handle} from {} to {new_key}",
                        entry.key
                    )));
                }
                entry.key = new_key;
            }
            Location::Heap(idx) => {
                let current = self.nodes[idx].key;
                if new_key > current {
                    return Err(CoordinationError::Validation(format!(
                        "cannot increase key of {handle} from {current} to {new_key}"
                    )));
                }
                self.nodes[idx].key = new_key;
                if let Some(root) = self.root {
                    if root != idx {
                        self.cut(idx);
                        self.root = Some(self.meld(root, idx));
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove and return the ready entry with the smallest key.
    ///
    /// Returns `None` when no entry is ready, including when the heap is empty.
    pub fn extract_min(&mut self) -> Option<ScheduledEntry> {
        let root = self.root?;
        let children = self.nodes[root].child.take();
        self.root = self.merge_pairs(children);
        Some(self.release(root))
    }

    /// The ready entry that [`extract_min`](Self::extract_min) would return.
    pub fn peek_min(&self) -> Option<ScheduledEntry> {
        self.root.map(|idx| {
            let node = &self.nodes[idx];
            ScheduledEntry {
                handle: node.handle,
                task_id: node.task_id.clone(),
                key: node.key,
            }
        })
    }

    /// Record that a task completed. Pending entries only move on the next
    /// [`reschedule_pending`](Self::reschedule_pending).
    pub fn mark_completed(&mut self, task_id: &TaskId) {
        self.completed.insert(task_id.clone());
    }

    /// Whether a task has been marked completed.
    pub fn is_completed(&self, task_id: &TaskId) -> bool {
        self.completed.contains(task_id)
    }

    /// Forget completed ids that no pending entry still waits on.
    ///
    /// A task inserted later that depends on a forgotten id is parked until
    /// the id is marked completed again. Returns the number of ids dropped.
    pub fn prune_completed(&mut self) -> usize {
        let waited: HashSet<&TaskId> = self
            .pending
            .values()
            .flat_map(|entry| entry.waiting_on.iter())
            .collect();
        let before = self.completed.len();
        self.completed.retain(|id| waited.contains(id));
        before - self.completed.len()
    }

    /// Number of completed ids remembered.
    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Move every pending entry whose dependencies have all completed into the
    /// heap. Returns the number of entries moved.
    pub fn reschedule_pending(&mut self) -> usize {
        let completed = &self.completed;
        let ready: Vec<HeapHandle> = self
            .pending
            .iter_mut()
            .filter_map(|(handle, entry)| {
                entry.waiting_on.retain(|dep| !completed.contains(dep));
                entry.waiting_on.is_empty().then_some(*handle)
            })
            .collect();

        for handle in &ready {
            if let Some(entry) = self.pending.remove(handle) {
                tracing::debug!(task = %entry.task_id, "dependencies satisfied, task ready");
                self.push_ready(*handle, entry.task_id, entry.key, entry.seq);
            }
        }
        ready.len()
    }

    /// Remove an entry from the heap or pending set.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown handle.
    pub fn remove(&mut self, handle: HeapHandle) -> Result<TaskId> {
        let location = self
            .locations
            .get(&handle)
            .copied()
            .ok_or_else(|| CoordinationError::NotFound(format!("heap handle {handle}")))?;

        match location {
            Location::Pending => {
                let entry = self
                    .pending
                    .remove(&handle)
                    .ok_or_else(|| CoordinationError::NotFound(format!("heap handle {handle}")))?;
                self.locations.remove(&handle);
                self.by_task.remove(&entry.task_id);
                Ok(entry.task_id)
            }
            Location::Heap(idx) if self.root == Some(idx) => self
                .extract_min()
                .map(|entry| entry.task_id)
                .ok_or_else(|| CoordinationError::NotFound(format!("heap handle {handle}"))),
            Location::Heap(idx) => {
                self.cut(idx);
                let children = self.nodes[idx].child.take();
                if let Some(sub) = self.merge_pairs(children) {
                    self.root = Some(match self.root {
                        Some(root) => self.meld(root, sub),
                        None => sub,
                    });
                }
                Ok(self.release(idx).task_id)
            }
        }
    }

    /// Handle of a queued task, if any.
    pub fn handle_of(&self, task_id: &TaskId) -> Option<HeapHandle> {
        self.by_task.get(task_id).copied()
    }

    /// Whether a task is queued (ready or pending).
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.by_task.contains_key(task_id)
    }

    /// Ready plus pending entries.
    pub fn len(&self) -> usize {
        self.ready_len + self.pending.len()
    }

    /// No entries queued at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in the heap.
    pub const fn ready_len(&self) -> usize {
        self.ready_len
    }

    /// Entries waiting on dependencies.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn push_ready(&mut self, handle: HeapHandle, task_id: TaskId, key: u64, seq: u64) {
        let node = HeapNode {
            handle,
            task_id,
            key,
            seq,
            child: None,
            sibling: None,
            prev: None,
        };
        let idx = if let Some(idx) = self.free.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        };
        self.locations.insert(handle, Location::Heap(idx));
        self.root = Some(match self.root {
            Some(root) => self.meld(root, idx),
            None => idx,
        });
        self.ready_len += 1;
    }

    fn release(&mut self, idx: usize) -> ScheduledEntry {
        let node = &self.nodes[idx];
        let entry = ScheduledEntry {
            handle: node.handle,
            task_id: node.task_id.clone(),
            key: node.key,
        };
        self.free.push(idx);
        self.locations.remove(&entry.handle);
        self.by_task.remove(&entry.task_id);
        self.ready_len -= 1;
        entry
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let (na, nb) = (&self.nodes[a], &self.nodes[b]);
        (na.key, na.seq) < (nb.key, nb.seq)
    }

    // Both arguments must be detached tree roots.
    fn meld(&mut self, a: usize, b: usize) -> usize {
        let (parent, child) = if self.less(a, b) { (a, b) } else { (b, a) };
        let first = self.nodes[parent].child;
        self.nodes[child].sibling = first;
        self.nodes[child].prev = Some(parent);
        if let Some(first) = first {
            self.nodes[first].prev = Some(child);
        }
        self.nodes[parent].child = Some(child);
        parent
    }

    fn cut(&mut self, idx: usize) {
        let prev = self.nodes[idx].prev;
        let sibling = self.nodes[idx].sibling;
        if let Some(p) = prev {
            if self.nodes[p].child == Some(idx) {
                self.nodes[p].child = sibling;
            } else {
                self.nodes[p].sibling = sibling;
            }
        }
        if let Some(s) = sibling {
            self.nodes[s].prev = prev;
        }
        self.nodes[idx].prev = None;
        self.nodes[idx].sibling = None;
    }

    // Standard two-pass pairing: left-to-right pairwise melds, then fold right-to-left.
    fn merge_pairs(&mut self, first: Option<usize>) -> Option<usize> {
        let mut trees = Vec::new();
        let mut cursor = first;
        while let Some(idx) = cursor {
            cursor = self.nodes[idx].sibling;
            self.nodes[idx].sibling = None;
            self.nodes[idx].prev = None;
            trees.push(idx);
        }

        let mut paired = Vec::with_capacity(trees.len().div_ceil(2));
        for pair in trees.chunks(2) {
            match *pair {
                [a, b] => paired.push(self.meld(a, b)),
                [a] => paired.push(a),
                _ => {}
            }
        }

        let mut result = paired.pop()?;
        while let Some(tree) = paired.pop() {
            result = self.meld(tree, result);
        }
        Some(result)
    }
}

impl fmt::Debug for PriorityScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityScheduler")
            .field("ready", &self.ready_len)
            .field("pending", &self.pending.len())
            .field("completed", &self.completed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::{NewTask, TaskKind};

    fn node(id: &str) -> TaskNode {
        TaskNode::from_submission(NewTask::new("blob", 0).with_id(id), TaskKind::Local)
    }

    fn node_with_deps(id: &str, deps: &[&str]) -> TaskNode {
        let mut task = NewTask::new("blob", 0).with_id(id);
        for dep in deps {
            task = task.depends_on(*dep);
        }
        TaskNode::from_submission(task, TaskKind::Local)
    }

    fn drain(s: &mut PriorityScheduler) -> Vec<String> {
        std::iter::from_fn(|| s.extract_min())
            .map(|e| e.task_id.to_string())
            .collect()
    }

    #[test]
    fn test_extract_in_key_order() {
        let mut s = PriorityScheduler::new();
        s.insert(&node("c"), 30);
        s.insert(&node("a"), 10);
        s.insert(&node("d"), 40);
        s.insert(&node("b"), 20);
        assert_eq!(drain(&mut s), vec!["a", "b", "c", "d"]);
        assert!(s.is_empty());
    }

    #[test]
    fn test_ties_follow_insertion_order() {
        let mut s = PriorityScheduler::new();
        for id in ["x", "y", "z", "w"] {
            s.insert(&node(id), 5);
        }
        assert_eq!(drain(&mut s), vec!["x", "y", "z", "w"]);
    }

    #[test]
    fn test_extract_empty_returns_none() {
        let mut s = PriorityScheduler::new();
        assert!(s.extract_min().is_none());
        assert!(s.peek_min().is_none());
    }

    #[test]
    fn test_decrease_key_moves_entry_forward() {
        let mut s = PriorityScheduler::new();
        s.insert(&node("a"), 10);
        s.insert(&node("b"), 20);
        let c = s.insert(&node("c"), 30);
        s.decrease_key(c, 5).unwrap();
        assert_eq!(s.peek_min().unwrap().task_id.as_str(), "c");
        assert_eq!(drain(&mut s), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_decrease_key_to_equal_keeps_insertion_tiebreak() {
        let mut s = PriorityScheduler::new();
        s.insert(&node("a"), 10);
        let b = s.insert(&node("b"), 20);
        s.decrease_key(b, 10).unwrap();
        assert_eq!(drain(&mut s), vec!["a", "b"]);
    }

    #[test]
    fn test_decrease_key_rejects_increase() {
        let mut s = PriorityScheduler::new();
        let a = s.insert(&node("a"), 10);
        let err = s.decrease_key(a, 11).unwrap_err();
        assert!(matches!(err, CoordinationError::Validation(_)));
    }

    #[test]
    fn test_decrease_key_unknown_handle() {
        let mut s = PriorityScheduler::new();
        let a = s.insert(&node("a"), 10);
        s.extract_min();
        let err = s.decrease_key(a, 1).unwrap_err();
        assert!(matches!(err, CoordinationError::NotFound(_)));
    }

    #[test]
    fn test_pending_tasks_wait_for_reschedule() {
        let mut s = PriorityScheduler::new();
        s.insert(&node("root"), 50);
        s.insert(&node_with_deps("child", &["root"]), 1);
        assert_eq!(s.pending_len(), 1);

        assert_eq!(s.extract_min().unwrap().task_id.as_str(), "root");
        assert!(s.extract_min().is_none());

        s.mark_completed(&TaskId::from("root"));
        assert!(s.extract_min().is_none(), "needs reschedule_pending");

        assert_eq!(s.reschedule_pending(), 1);
        assert_eq!(s.extract_min().unwrap().task_id.as_str(), "child");
    }

    #[test]
    fn test_insert_after_dependency_completed_is_ready() {
        let mut s = PriorityScheduler::new();
        s.mark_completed(&TaskId::from("done"));
        s.insert(&node_with_deps("t", &["done"]), 3);
        assert_eq!(s.ready_len(), 1);
        assert_eq!(s.pending_len(), 0);
    }

    #[test]
    fn test_partial_dependencies_stay_pending() {
        let mut s = PriorityScheduler::new();
        s.insert(&node_with_deps("t", &["a", "b"]), 1);
        s.mark_completed(&TaskId::from("a"));
        assert_eq!(s.reschedule_pending(), 0);
        s.mark_completed(&TaskId::from("b"));
        assert_eq!(s.reschedule_pending(), 1);
    }

    #[test]
    fn test_prune_completed_keeps_ids_still_awaited() {
        let mut s = PriorityScheduler::new();
        s.insert(&node_with_deps("t", &["a", "b"]), 1);
        s.mark_completed(&TaskId::from("a"));
        s.mark_completed(&TaskId::from("unrelated"));

        assert_eq!(s.prune_completed(), 1);
        assert!(s.is_completed(&TaskId::from("a")));

        assert_eq!(s.reschedule_pending(), 0);
        assert_eq!(s.prune_completed(), 1);
        assert_eq!(s.completed_len(), 0);

        s.mark_completed(&TaskId::from("b"));
        assert_eq!(s.reschedule_pending(), 1);
        assert_eq!(s.extract_min().unwrap().task_id.as_str(), "t");
    }

    #[test]
    fn test_decrease_key_on_pending_entry() {
        let mut s = PriorityScheduler::new();
        s.insert(&node("other"), 5);
        let h = s.insert(&node_with_deps("t", &["dep"]), 100);
        s.decrease_key(h, 1).unwrap();
        s.mark_completed(&TaskId::from("dep"));
        s.reschedule_pending();
        assert_eq!(drain(&mut s), vec!["t", "other"]);
    }

    #[test]
    fn test_remove_non_root_entry() {
        let mut s = PriorityScheduler::new();
        s.insert(&node("a"), 1);
        let b = s.insert(&node("b"), 2);
        s.insert(&node("c"), 3);
        s.insert(&node("d"), 4);
        s.extract_min();
        s.insert(&node("e"), 0);
        assert_eq!(s.remove(b).unwrap().as_str(), "b");
        assert!(!s.contains(&TaskId::from("b")));
        assert_eq!(drain(&mut s), vec!["e", "c", "d"]);
    }

    #[test]
    fn test_remove_root_and_pending() {
        let mut s = PriorityScheduler::new();
        let a = s.insert(&node("a"), 1);
        s.insert(&node("b"), 2);
        let p = s.insert(&node_with_deps("p", &["x"]), 0);
        assert_eq!(s.remove(a).unwrap().as_str(), "a");
        assert_eq!(s.remove(p).unwrap().as_str(), "p");
        assert!(matches!(s.remove(p), Err(CoordinationError::NotFound(_))));
        assert_eq!(s.len(), 1);
        assert_eq!(drain(&mut s), vec!["b"]);
    }

    #[test]
    fn test_duplicate_insert_returns_same_handle() {
        let mut s = PriorityScheduler::new();
        let first = s.insert(&node("a"), 4);
        let second = s.insert(&node("a"), 1);
        assert_eq!(first, second);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut s = PriorityScheduler::new();
        for round in 0..3u64 {
            for i in 0..10u64 {
                s.insert(&node(&format!("r{round}-{i}")), 10 - i);
            }
            let out = drain(&mut s);
            assert_eq!(out.len(), 10);
            assert_eq!(out[0], format!("r{round}-9"));
        }
        assert!(s.nodes.len() <= 10);
    }
}
