//! Rollout error taxonomy.
//!
//! Collaborator errors are flattened to their message at the point they are
//! wrapped, so every variant here is `Clone` and serializable into reports.

use serde::{Deserialize, Serialize};

use super::state::RolloutState;

/// Kind of temporary resource a batch scope owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeResource {
    Branch,
    NodeGroup,
}

impl std::fmt::Display for ScopeResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeResource::Branch => write!(f, "branch"),
            ScopeResource::NodeGroup => write!(f, "node group"),
        }
    }
}

/// A temporary resource that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{resource} {name}: {reason}")]
pub struct CleanupFailure {
    pub resource: ScopeResource,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RolloutError {
    #[error("cannot resolve target group {group}: {reason}")]
    Resolution { group: String, reason: String },

    #[error("target group {group} has no nodes")]
    EmptyTarget { group: String },

    #[error("approval for environment {environment} failed: {reason}")]
    Approval { environment: String, reason: String },

    #[error("querying fact {fact} failed: {reason}")]
    FactQuery { fact: String, reason: String },

    #[error("{} node(s) have no usable value for fact {fact}: {}", .nodes.len(), .nodes.join(", "))]
    MissingFact { fact: String, nodes: Vec<String> },

    #[error("batch {batch}: creating branch {branch} failed: {reason}")]
    BranchCreate {
        batch: String,
        branch: String,
        reason: String,
    },

    #[error("{}code deploy of {branch} failed: {reason}", batch_prefix(.batch))]
    CodeDeploy {
        batch: Option<String>,
        branch: String,
        reason: String,
    },

    #[error("batch {batch}: creating node group for {branch} failed: {reason}")]
    GroupCreate {
        batch: String,
        branch: String,
        reason: String,
    },

    #[error("batch {batch}: pinning nodes to group {group_id} failed: {reason}")]
    Pin {
        batch: String,
        group_id: String,
        reason: String,
    },

    #[error("{}agent run could not be completed: {reason}", batch_prefix(.batch))]
    RunOrchestration {
        batch: Option<String>,
        reason: String,
    },

    #[error("batch {batch}: {} node(s) failed{}{}", .failed_nodes.len(), node_list(.failed_nodes), job_suffix(.job_error))]
    BatchApply {
        batch: String,
        failed_nodes: Vec<String>,
        job_error: Option<String>,
    },

    #[error("batch {batch}: cleanup failed: {}", join_failures(.failures))]
    Cleanup {
        batch: String,
        failures: Vec<CleanupFailure>,
    },

    #[error("updating branch {branch} to {revision} failed: {reason}")]
    BranchUpdate {
        branch: String,
        revision: String,
        reason: String,
    },

    #[error("enforce run failed for batch(es) {}: {}", .batches.join(", "), .details.join("; "))]
    Enforce {
        batches: Vec<String>,
        details: Vec<String>,
    },
}

fn batch_prefix(batch: &Option<String>) -> String {
    batch
        .as_deref()
        .map(|b| format!("batch {b}: "))
        .unwrap_or_default()
}

fn node_list(nodes: &[String]) -> String {
    if nodes.is_empty() {
        String::new()
    } else {
        format!(": {}", nodes.join(", "))
    }
}

fn job_suffix(job_error: &Option<String>) -> String {
    job_error
        .as_deref()
        .map(|e| format!(" (job error: {e})"))
        .unwrap_or_default()
}

fn join_failures(failures: &[CleanupFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl RolloutError {
    /// Batch the error belongs to, if any.
    pub fn batch(&self) -> Option<&str> {
        match self {
            RolloutError::BranchCreate { batch, .. }
            | RolloutError::GroupCreate { batch, .. }
            | RolloutError::Pin { batch, .. }
            | RolloutError::BatchApply { batch, .. }
            | RolloutError::Cleanup { batch, .. } => Some(batch),
            RolloutError::CodeDeploy { batch, .. }
            | RolloutError::RunOrchestration { batch, .. } => batch.as_deref(),
            _ => None,
        }
    }

    /// Stable name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RolloutError::Resolution { .. } => "resolution",
            RolloutError::EmptyTarget { .. } => "empty_target",
            RolloutError::Approval { .. } => "approval",
            RolloutError::FactQuery { .. } => "fact_query",
            RolloutError::MissingFact { .. } => "missing_fact",
            RolloutError::BranchCreate { .. } => "branch_create",
            RolloutError::CodeDeploy { .. } => "code_deploy",
            RolloutError::GroupCreate { .. } => "group_create",
            RolloutError::Pin { .. } => "pin",
            RolloutError::RunOrchestration { .. } => "run_orchestration",
            RolloutError::BatchApply { .. } => "batch_apply",
            RolloutError::Cleanup { .. } => "cleanup",
            RolloutError::BranchUpdate { .. } => "branch_update",
            RolloutError::Enforce { .. } => "enforce",
        }
    }
}

/// A failed rollout: the error that stopped it, where it stopped, and what
/// was left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("rollout {rollout_id} failed during {state}: {error}{}", cleanup_suffix(.cleanup_failures))]
pub struct RolloutFailure {
    pub rollout_id: String,
    /// Phase that was active when the error occurred.
    pub state: RolloutState,
    pub error: RolloutError,
    /// Resources that could not be removed while aborting.
    pub cleanup_failures: Vec<CleanupFailure>,
    /// Keys of batches that had completed before the failure.
    pub applied_batches: Vec<String>,
}

fn cleanup_suffix(failures: &[CleanupFailure]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!("; additionally failed to clean up {}", join_failures(failures))
    }
}

impl RolloutFailure {
    /// True when the failure left temporary resources behind.
    pub fn leaked_resources(&self) -> bool {
        !self.cleanup_failures.is_empty() || matches!(self.error, RolloutError::Cleanup { .. })
    }
}
