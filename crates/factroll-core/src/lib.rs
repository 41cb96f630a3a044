//! factroll core: fact-batched rolling rollouts
//!
//! A revision is shipped to a node group one batch at a time, where a batch
//! is every node sharing one value of a chosen fact. Each batch is applied in
//! a temporary branch and node group of its own; the persistent branch only
//! moves once every batch has passed.

pub mod controller;
pub mod domain;
pub mod grouper;
pub mod lifecycle;
pub mod metrics;
pub mod obs;
pub mod report;
pub mod resolver;
pub mod telemetry;

/// Crate version, for `--version` output and reports.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use controller::{run_rollout, RolloutController, RolloutResult};
pub use domain::{
    scope_branch_name, scope_slug, ApplyOutcome, Batch, BatchPlan, CleanupFailure, ConfigError,
    EphemeralScope, MissingFactPolicy, Revision, RolloutConfig, RolloutConfigBuilder,
    RolloutError, RolloutFailure, RolloutState, ScopeResource, TargetGroup,
};
pub use grouper::{partition, FactGrouper};
pub use lifecycle::{BatchFailure, BatchLifecycle};
pub use metrics::METRICS;
pub use obs::{
    emit_batch_finished, emit_batch_started, emit_cleanup_failed, emit_rollout_finished,
    emit_rollout_started, emit_state_changed,
};
pub use report::{
    render_summary, write_report_json, BatchReport, BatchStatus, ResultAggregator, RolloutPath,
    RolloutReport,
};
pub use resolver::TargetResolver;
pub use telemetry::init_tracing;
