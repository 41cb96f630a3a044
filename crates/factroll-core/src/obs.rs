//! Structured lifecycle events for rollouts.
//!
//! Every phase change and batch boundary is logged as an `info!` event with a
//! stable `event` field, so JSON logs can be filtered on it.

use tracing::{info, warn};

use crate::domain::{CleanupFailure, RolloutState};

pub fn emit_rollout_started(rollout_id: &str, target_group: &str, revision: &str, noop: bool) {
    info!(
        event = "rollout.started",
        rollout_id = %rollout_id,
        group = %target_group,
        revision = %revision,
        noop = noop,
    );
}

pub fn emit_state_changed(from: &RolloutState, to: &RolloutState) {
    info!(event = "rollout.state_changed", from = %from, to = %to);
}

pub fn emit_batch_started(key: &str, index: usize, total: usize, nodes: usize) {
    info!(
        event = "batch.started",
        batch = %key,
        index = index,
        total = total,
        nodes = nodes,
    );
}

pub fn emit_batch_finished(key: &str, success: bool, failed_nodes: usize) {
    info!(
        event = "batch.finished",
        batch = %key,
        success = success,
        failed_nodes = failed_nodes,
    );
}

/// Cleanup failures leak resources, so they are warnings.
pub fn emit_cleanup_failed(batch: &str, failure: &CleanupFailure) {
    warn!(
        event = "batch.cleanup_failed",
        batch = %batch,
        resource = %failure.resource,
        name = %failure.name,
        reason = %failure.reason,
    );
}

pub fn emit_rollout_finished(rollout_id: &str, success: bool, duration_ms: u64, batches: usize) {
    info!(
        event = "rollout.finished",
        rollout_id = %rollout_id,
        success = success,
        duration_ms = duration_ms,
        batches = batches,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ScopeResource;

    #[test]
    fn events_do_not_panic_without_subscriber() {
        emit_rollout_started("r1", "web", "abc1234", true);
        emit_state_changed(&RolloutState::Resolving, &RolloutState::Approving);
        emit_batch_started("us", 1, 2, 3);
        emit_batch_finished("us", true, 0);
        emit_cleanup_failed(
            "us",
            &CleanupFailure {
                resource: ScopeResource::Branch,
                name: "us_r1".into(),
                reason: "denied".into(),
            },
        );
        emit_rollout_finished("r1", true, 10, 2);
    }
}
