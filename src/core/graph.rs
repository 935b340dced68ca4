//! Task dependency graph.
//!
//! Nodes live in an arena addressed by [`TaskId`]; edges are explicit parent and
//! child adjacency lists so diamonds and shared ancestry need no ownership games.
//! An edge `parent -> child` means the child depends on the parent.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::error::{CoordinationError, Result};
use crate::core::task::{NewTask, TaskId, TaskKind, TaskNode, TaskStatus};
use crate::util::clock::now_ms;

#[derive(Default)]
struct Adjacency {
    parents: Vec<TaskId>,
    children: Vec<TaskId>,
}

/// Arena DAG of task nodes.
#[derive(Default)]
pub struct TaskGraph {
    nodes: HashMap<TaskId, TaskNode>,
    edges: HashMap<TaskId, Adjacency>,
    // Insertion order, used to make traversal and sorting deterministic.
    order: Vec<TaskId>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node built from `task` with the given kind.
    ///
    /// Dependencies listed in the submission are recorded on the node; edges
    /// are added separately with [`add_child`](Self::add_child). Re-adding an
    /// existing id returns the existing node unchanged.
    pub fn add_node(&mut self, task: NewTask, kind: TaskKind) -> &TaskNode {
        let node = TaskNode::from_submission(task, kind);
        let id = node.id.clone();
        if !self.nodes.contains_key(&id) {
            self.order.push(id.clone());
            self.edges.insert(id.clone(), Adjacency::default());
            self.nodes.insert(id.clone(), node);
        }
        &self.nodes[&id]
    }

    /// Add an edge so that `child` depends on `parent`.
    ///
    /// Returns false if either id is unknown. Cycles are not prevented here;
    /// use [`topological_sort`](Self::topological_sort) to detect them.
    pub fn add_child(&mut self, parent_id: &TaskId, child_id: &TaskId) -> bool {
        if !self.nodes.contains_key(parent_id) || !self.nodes.contains_key(child_id) {
            return false;
        }

        let parent_edges = self.edges.entry(parent_id.clone()).or_default();
        if parent_edges.children.contains(child_id) {
            return true;
        }
        parent_edges.children.push(child_id.clone());
        self.edges
            .entry(child_id.clone())
            .or_default()
            .parents
            .push(parent_id.clone());

        if let Some(child) = self.nodes.get_mut(child_id) {
            child.dependencies.insert(parent_id.clone());
        }
        true
    }

    /// Look up a node.
    pub fn get(&self, id: &TaskId) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    /// Look up a node mutably.
    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut TaskNode> {
        self.nodes.get_mut(id)
    }

    /// Whether the graph holds `id`.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Direct dependencies of `id`.
    pub fn parents(&self, id: &TaskId) -> &[TaskId] {
        self.edges.get(id).map_or(&[], |e| e.parents.as_slice())
    }

    /// Direct dependents of `id`.
    pub fn children(&self, id: &TaskId) -> &[TaskId] {
        self.edges.get(id).map_or(&[], |e| e.children.as_slice())
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// No nodes at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|e| e.children.len()).sum()
    }

    /// Update a node's status, enforcing the forward-only lifecycle.
    ///
    /// Setting the current status again is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidTransition` when moving backwards or
    /// out of a terminal state.
    pub fn set_status(
        &mut self,
        id: &TaskId,
        status: TaskStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| CoordinationError::NotFound(format!("task {id}")))?;

        if node.status == status {
            return Ok(());
        }
        if !node.status.can_transition_to(status) {
            return Err(CoordinationError::InvalidTransition {
                task: id.clone(),
                from: node.status.to_string(),
                to: status.to_string(),
            });
        }
        node.status = status;
        node.updated_at_ms = now_ms();
        if reason.is_some() {
            node.failure_reason = reason;
        }
        Ok(())
    }

    /// Visit nodes breadth-first, each exactly once, calling `visitor(node, depth)`.
    ///
    /// With a start id only nodes reachable from it are visited. Without one the
    /// walk starts from every root in insertion order, then from any node still
    /// unvisited (nodes that sit on cycles have no root).
    ///
    /// # Errors
    ///
    /// `NotFound` if `start` is not in the graph.
    pub fn traverse<F>(&self, mut visitor: F, start: Option<&TaskId>) -> Result<()>
    where
        F: FnMut(&TaskNode, usize),
    {
        let mut visited = HashSet::new();
        match start {
            Some(id) => {
                if !self.nodes.contains_key(id) {
                    return Err(CoordinationError::NotFound(format!("task {id}")));
                }
                self.bfs_from(id, &mut visited, &mut visitor);
            }
            None => {
                for id in self.order.iter().filter(|id| self.parents(id).is_empty()) {
                    self.bfs_from(id, &mut visited, &mut visitor);
                }
                for id in &self.order {
                    self.bfs_from(id, &mut visited, &mut visitor);
                }
            }
        }
        Ok(())
    }

    fn bfs_from<F>(&self, start: &TaskId, visited: &mut HashSet<TaskId>, visitor: &mut F)
    where
        F: FnMut(&TaskNode, usize),
    {
        if !visited.insert(start.clone()) {
            return;
        }
        let mut queue = VecDeque::from([(start.clone(), 0usize)]);
        while let Some((id, depth)) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&id) {
                visitor(node, depth);
            }
            for child in self.children(&id) {
                if visited.insert(child.clone()) {
                    queue.push_back((child.clone(), depth + 1));
                }
            }
        }
    }

    /// Every node reachable from `id`, excluding `id` itself, in BFS order.
    pub fn descendants(&self, id: &TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let _ = self.traverse(
            |node, depth| {
                if depth > 0 {
                    out.push(node.id.clone());
                }
            },
            Some(id),
        );
        out
    }

    /// Order nodes so every node follows all of its dependencies.
    ///
    /// Kahn's algorithm; nodes with equal standing keep insertion order.
    /// Returns `None` if the graph contains a cycle, so callers must check.
    pub fn topological_sort(&self) -> Option<Vec<&TaskNode>> {
        self.kahn().ok()
    }

    /// Like [`topological_sort`](Self::topological_sort) but reports the cycle.
    ///
    /// # Errors
    ///
    /// `Cycle` naming the first node (in insertion order) left unsorted.
    pub fn topological_sort_checked(&self) -> Result<Vec<&TaskNode>> {
        self.kahn().map_err(CoordinationError::Cycle)
    }

    fn kahn(&self) -> std::result::Result<Vec<&TaskNode>, TaskId> {
        let mut in_degree: HashMap<&TaskId, usize> = self
            .order
            .iter()
            .map(|id| (id, self.parents(id).len()))
            .collect();

        let mut queue: VecDeque<&TaskId> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id).copied() == Some(0))
            .collect();

        let mut sorted = Vec::with_capacity(self.order.len());
        while let Some(id) = queue.pop_front() {
            if let Some(node) = self.nodes.get(id) {
                sorted.push(node);
            }
            for child in self.children(id) {
                if let Some(deg) = in_degree.get_mut(child) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        if sorted.len() == self.order.len() {
            Ok(sorted)
        } else {
            let stuck = self
                .order
                .iter()
                .find(|id| in_degree.get(id).copied().unwrap_or(0) > 0)
                .cloned()
                .unwrap_or_else(|| TaskId::new("unknown"));
            Err(stuck)
        }
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("nodes", &self.len())
            .field("edges", &self.edge_count())
            .finish()
    }
}
