//! Builder assembling a [`Coordinator`] from configuration and collaborators.

use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::core::{
    AuditSink, CoordinationError, Coordinator, IdHasher, ResponsibilityAssigner, Result,
    TaskExecutor, Transport,
};

/// Collects the pieces a coordinator needs and validates them together.
#[must_use]
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    transport: Option<Arc<dyn Transport>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    hasher: Option<Arc<dyn IdHasher>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl CoordinatorBuilder {
    /// Start from a configuration.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            transport: None,
            executor: None,
            hasher: None,
            audit: None,
        }
    }

    /// Transport used for every topic.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Executor for local tasks and tasks this peer is responsible for.
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replace SHA-256 normalization. Every peer in a network must use the same
    /// hasher.
    pub fn hasher(mut self, hasher: Arc<dyn IdHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Record lifecycle decisions to `sink`.
    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// `Config` when the configuration is invalid or a collaborator is missing.
    pub fn build(self) -> Result<Coordinator> {
        self.config
            .validate()
            .map_err(|e| CoordinationError::Config(format!("config invalid: {e}")))?;
        let transport = self
            .transport
            .ok_or_else(|| CoordinationError::Config("transport is required".into()))?;
        let executor = self
            .executor
            .ok_or_else(|| CoordinationError::Config("executor is required".into()))?;

        let bits = self.config.normalization_bits;
        let assigner = match self.hasher {
            Some(hasher) => ResponsibilityAssigner::with_hasher(bits, hasher),
            None => ResponsibilityAssigner::new(bits),
        };
        Coordinator::from_parts(self.config, transport, executor, assigner, self.audit)
    }
}
