//! Per-peer coordination state machine.
//!
//! A [`Coordinator`] owns one scheduler, one task graph, one causal clock and
//! one responsibility assigner. It drives distributable tasks through
//! announce → evaluate → execute → complete → reconcile over a [`Transport`],
//! and runs local tasks in-process. All mutable state sits behind one
//! `parking_lot` mutex that is never held across an `.await`; the clock has its
//! own mutex so tick and merge stay atomic. When both are needed the state lock
//! is taken first.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use peer_scheduler::config::CoordinatorConfig;
//! use peer_scheduler::core::{Coordinator, NewTask, TaskKind};
//!
//! let coordinator = Coordinator::new(CoordinatorConfig::new("peer-a"), transport, executor)?;
//! coordinator.start().await?;
//! let id = coordinator.submit(NewTask::new("blob:abc", 5), TaskKind::Distributed)?;
//! coordinator.dispatch_ready().await?;
//! let view = coordinator.wait_for(&id, Duration::from_secs(5)).await?;
//! ```

mod origin;
mod peer;
mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::clock::{CausalClock, CausalOrder, ClockState};
use crate::core::error::{CoordinationError, Result};
use crate::core::executor::TaskExecutor;
use crate::core::message::{Announcement, CancellationNotice, CompletionRecord, Heartbeat, WireMessage};
use crate::core::responsibility::ResponsibilityAssigner;
use crate::core::task::{NewTask, TaskId, TaskKind};
use crate::core::transport::{Subscription, Transport};

use self::state::CoordinatorState;
pub use self::state::{DistributionState, TaskStatusView};

type Handler = fn(&Arc<Inner>, &[u8]);

/// Handle to a running peer. Clones share the same state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoordinatorConfig,
    transport: Arc<dyn Transport>,
    executor: Arc<dyn TaskExecutor>,
    assigner: ResponsibilityAssigner,
    clock: Mutex<CausalClock>,
    state: Mutex<CoordinatorState>,
    audit: Option<Arc<dyn AuditSink>>,
    /// Signalled when a completion releases gated tasks.
    released: Arc<Notify>,
    /// Signalled whenever a task reaches a terminal status.
    settled: Notify,
    background: Mutex<Vec<AbortHandle>>,
    started: AtomicBool,
}

impl Coordinator {
    /// Create a coordinator with SHA-256 normalization and no audit sink.
    ///
    /// # Errors
    ///
    /// `Config` when the configuration does not validate.
    pub fn new(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self> {
        let assigner = ResponsibilityAssigner::new(config.normalization_bits);
        Self::from_parts(config, transport, executor, assigner, None)
    }

    pub(crate) fn from_parts(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        executor: Arc<dyn TaskExecutor>,
        assigner: ResponsibilityAssigner,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self> {
        config.validate().map_err(CoordinationError::Config)?;
        if assigner.bits() != config.normalization_bits {
            return Err(CoordinationError::Config(format!(
                "assigner width {} does not match normalization_bits {}",
                assigner.bits(),
                config.normalization_bits
            )));
        }

        let clock =
            CausalClock::with_growth_threshold(config.peer_id.clone(), config.clock_growth_warn_threshold);
        let state = CoordinatorState::new(config.static_peers.iter().cloned());
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                executor,
                assigner,
                clock: Mutex::new(clock),
                state: Mutex::new(state),
                audit,
                released: Arc::new(Notify::new()),
                settled: Notify::new(),
                background: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
            }),
        })
    }

    /// This peer's raw identifier.
    pub fn peer_id(&self) -> &str {
        &self.inner.config.peer_id
    }

    /// Active configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Subscribe to every topic and start the listener, heartbeat and dispatch
    /// loops. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// `Transport` when a subscription fails; the coordinator stays stopped.
    pub async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let subscriptions = match self.subscribe_all().await {
            Ok(subs) => subs,
            Err(err) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        let mut handles: Vec<AbortHandle> = subscriptions
            .into_iter()
            .map(|(sub, handler)| spawn_listener(&self.inner, sub, handler))
            .collect();
        handles.push(tokio::spawn(heartbeat_loop(Arc::downgrade(&self.inner))).abort_handle());
        handles.push(
            tokio::spawn(dispatch_loop(
                Arc::downgrade(&self.inner),
                Arc::clone(&self.inner.released),
            ))
            .abort_handle(),
        );
        self.inner.background.lock().extend(handles);

        info!(
            peer = %self.inner.config.peer_id,
            static_peers = self.inner.config.static_peers.len(),
            "coordinator started"
        );
        Ok(())
    }

    async fn subscribe_all(&self) -> Result<Vec<(Subscription, Handler)>> {
        let transport = &self.inner.transport;
        Ok(vec![
            (transport.subscribe(Announcement::TOPIC).await?, Inner::handle_announcement as Handler),
            (transport.subscribe(CompletionRecord::TOPIC).await?, Inner::handle_completion as Handler),
            (transport.subscribe(CancellationNotice::TOPIC).await?, Inner::handle_cancel_notice as Handler),
            (transport.subscribe(Heartbeat::TOPIC).await?, Inner::handle_heartbeat as Handler),
        ])
    }

    /// Stop background loops, timers and in-flight executions.
    pub fn shutdown(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        for handle in self.inner.background.lock().drain(..) {
            handle.abort();
        }
        let mut state = self.inner.state.lock();
        for entry in state.outstanding.values_mut() {
            entry.disarm();
        }
        for exec in state.executions.values() {
            exec.handle.abort();
        }
        for run in state.local_runs.values() {
            run.abort();
        }
        info!(peer = %self.inner.config.peer_id, "coordinator shut down");
    }

    /// Whether [`start`](Self::start) has run and [`shutdown`](Self::shutdown) has not.
    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Add a task to the graph and scheduler.
    ///
    /// The task becomes Ready when all its dependencies have completed,
    /// otherwise it stays Pending. A task whose dependency already failed or
    /// was cancelled is cancelled immediately.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown dependency, `Validation` for a duplicate id or
    /// an empty payload reference.
    pub fn submit(&self, task: NewTask, kind: TaskKind) -> Result<TaskId> {
        self.inner.submit(task, kind)
    }

    /// Dispatch every ready task: announce distributable ones, run local ones.
    ///
    /// Returns once all announcements are published; executions and timers
    /// continue in the background. Tasks released later by completions are
    /// dispatched automatically.
    ///
    /// # Errors
    ///
    /// `Validation` if the coordinator has not been started.
    pub async fn dispatch_ready(&self) -> Result<usize> {
        self.inner.dispatch_ready().await
    }

    /// Cancel a task and every descendant still waiting on it.
    ///
    /// Before dispatch the task is simply removed from the scheduler. After
    /// dispatch a best-effort notice asks the executing peer to abandon it.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown task, `Validation` for a finished one,
    /// `Transport` if the notice cannot be published (the task is cancelled
    /// locally regardless).
    pub async fn cancel(&self, task_id: &TaskId) -> Result<()> {
        self.inner.cancel(task_id).await
    }

    /// Current view of a task submitted to this peer.
    pub fn status(&self, task_id: &TaskId) -> Option<TaskStatusView> {
        self.inner.state.lock().status_view(task_id)
    }

    /// Coordination state of a task, originator side first.
    pub fn distribution_state(&self, task_id: &TaskId) -> Option<DistributionState> {
        self.inner.state.lock().distribution(task_id)
    }

    /// Wait until a task reaches a terminal status.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown task, `Timeout` if it is still running after
    /// `timeout`.
    pub async fn wait_for(&self, task_id: &TaskId, timeout: Duration) -> Result<TaskStatusView> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let view = self
                .status(task_id)
                .ok_or_else(|| CoordinationError::NotFound(format!("task {task_id}")))?;
            if view.status.is_terminal() {
                return Ok(view);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(CoordinationError::Timeout(timeout));
            }
        }
    }

    /// Submitted tasks in dependency order.
    ///
    /// # Errors
    ///
    /// `Cycle` if the graph is not acyclic.
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        let state = self.inner.state.lock();
        let nodes = state.graph.topological_sort_checked()?;
        Ok(nodes.into_iter().map(|node| node.id.clone()).collect())
    }

    /// Queued tasks as `(ready, pending)`.
    pub fn queue_depth(&self) -> (usize, usize) {
        let state = self.inner.state.lock();
        (state.scheduler.ready_len(), state.scheduler.pending_len())
    }

    /// Current clock head.
    pub fn clock_head(&self) -> String {
        self.inner.clock.lock().head().to_string()
    }

    /// Current clock state.
    pub fn clock_state(&self) -> ClockState {
        self.inner.clock.lock().state().clone()
    }

    /// Compare this peer's clock with a remote one.
    pub fn compare_clock(&self, remote_head: &str, remote_state: &ClockState) -> CausalOrder {
        self.inner.clock.lock().compare(remote_head, remote_state)
    }

    /// Membership view used for responsibility, excluding this peer.
    pub fn known_peers(&self) -> Vec<String> {
        self.inner.known_peers()
    }

    /// Coordination records kept for duplicate suppression. Records older
    /// than the configured retention are pruned on every heartbeat tick.
    pub fn record_count(&self) -> usize {
        self.inner.state.lock().record_count()
    }

    /// Add a peer to the static membership.
    pub fn add_peer(&self, peer_id: impl Into<String>) {
        let peer_id = peer_id.into();
        if peer_id != self.inner.config.peer_id {
            self.inner.state.lock().static_peers.insert(peer_id);
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("peer_id", &self.inner.config.peer_id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn known_peers(&self) -> Vec<String> {
        self.state
            .lock()
            .membership(&self.config.peer_id, self.config.liveness_window())
    }

    /// Encode and publish a message on its topic.
    async fn publish<M: WireMessage + Sync>(&self, message: &M) -> Result<()> {
        self.transport.publish(M::TOPIC, message.encode()?).await
    }

    fn prune_records(&self) {
        let dropped = self
            .state
            .lock()
            .prune(Instant::now(), self.config.retention());
        if dropped > 0 {
            debug!(peer = %self.config.peer_id, dropped, "pruned archived records");
        }
    }

    fn audit(&self, task_id: &TaskId, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            sink.record(build_audit_event(
                task_id.as_str(),
                self.config.peer_id.as_str(),
                action,
                detail,
            ));
        }
    }
}

fn spawn_listener(inner: &Arc<Inner>, mut sub: Subscription, handler: Handler) -> AbortHandle {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        while let Some(bytes) = sub.recv().await {
            let Some(inner) = weak.upgrade() else { break };
            handler(&inner, &bytes);
        }
        debug!(topic = sub.topic(), "subscription closed");
    })
    .abort_handle()
}

async fn heartbeat_loop(weak: Weak<Inner>) {
    let Some(period) = weak.upgrade().map(|inner| inner.config.heartbeat_interval()) else {
        return;
    };
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else { break };
        inner.prune_records();
        if let Err(err) = inner.publish_heartbeat().await {
            warn!(peer = %inner.config.peer_id, error = %err, "heartbeat publish failed");
        }
    }
}

async fn dispatch_loop(weak: Weak<Inner>, released: Arc<Notify>) {
    loop {
        released.notified().await;
        let Some(inner) = weak.upgrade() else { break };
        match inner.dispatch_ready().await {
            Ok(0) => {}
            Ok(n) => debug!(peer = %inner.config.peer_id, dispatched = n, "dispatched released tasks"),
            Err(err) => warn!(peer = %inner.config.peer_id, error = %err, "dispatch of released tasks failed"),
        }
    }
}
