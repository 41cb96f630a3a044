//! Process-wide rollout counters.
//!
//! Incremented at the call site, emitted together by [`Metrics::flush`] at
//! the end of a rollout.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    batches_applied: AtomicU64,
    batches_failed: AtomicU64,
    scopes_created: AtomicU64,
    scopes_leaked: AtomicU64,
    agent_runs: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            batches_applied: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            scopes_created: AtomicU64::new(0),
            scopes_leaked: AtomicU64::new(0),
            agent_runs: AtomicU64::new(0),
        }
    }

    pub fn inc_batches_applied(&self) {
        self.batches_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_batches_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counted once the temporary branch of a scope exists.
    pub fn inc_scopes_created(&self) {
        self.scopes_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Counted per resource that cleanup could not remove.
    pub fn add_scopes_leaked(&self, n: u64) {
        self.scopes_leaked.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_agent_runs(&self) {
        self.agent_runs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "agent_runs", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            batches_applied = self.batches_applied(),
            batches_failed = self.batches_failed(),
            scopes_created = self.scopes_created(),
            scopes_leaked = self.scopes_leaked(),
            agent_runs = self.agent_runs(),
        );
    }

    pub fn batches_applied(&self) -> u64 {
        self.batches_applied.load(Ordering::Relaxed)
    }

    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }

    pub fn scopes_created(&self) -> u64 {
        self.scopes_created.load(Ordering::Relaxed)
    }

    pub fn scopes_leaked(&self) -> u64 {
        self.scopes_leaked.load(Ordering::Relaxed)
    }

    pub fn agent_runs(&self) -> u64 {
        self.agent_runs.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.batches_applied.store(0, Ordering::Relaxed);
        self.batches_failed.store(0, Ordering::Relaxed);
        self.scopes_created.store(0, Ordering::Relaxed);
        self.scopes_leaked.store(0, Ordering::Relaxed);
        self.agent_runs.store(0, Ordering::Relaxed);
    }
}
