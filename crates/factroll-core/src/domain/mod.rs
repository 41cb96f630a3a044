//! Domain types shared by the rollout components.

pub mod batch;
pub mod config;
pub mod error;
pub mod state;
pub mod target;

pub use batch::{scope_branch_name, scope_slug, ApplyOutcome, Batch, BatchPlan, EphemeralScope};
pub use config::{ConfigError, MissingFactPolicy, Revision, RolloutConfig, RolloutConfigBuilder};
pub use error::{CleanupFailure, RolloutError, RolloutFailure, ScopeResource};
pub use state::RolloutState;
pub use target::TargetGroup;
