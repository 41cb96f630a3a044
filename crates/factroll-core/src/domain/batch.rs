//! Batches, the batch plan, and the per-batch temporary scope.

use factroll_platform::{AgentRunReport, TempGroup};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Nodes sharing one value of the grouping fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// The fact value, verbatim.
    pub key: String,
    pub nodes: Vec<String>,
}

/// Ordered partition of the target's nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub fact: String,
    pub batches: Vec<Batch>,

    /// Nodes left out under the `exclude` missing-fact policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_nodes: Vec<String>,
}

impl BatchPlan {
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Number of nodes across all batches.
    pub fn node_count(&self) -> usize {
        self.batches.iter().map(|b| b.nodes.len()).sum()
    }
}

/// Environment-safe form of a fact value.
///
/// Lowercases and maps anything outside `[a-z0-9_]` to `_`. When that was
/// lossy (or the value is empty) a short hash of the raw value is appended so
/// that distinct values never share a slug.
pub fn scope_slug(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !cleaned.is_empty() && cleaned == value {
        return cleaned;
    }
    let digest = hex::encode(Sha256::digest(value.as_bytes()));
    if cleaned.is_empty() {
        format!("h{}", &digest[..8])
    } else {
        format!("{cleaned}_{}", &digest[..8])
    }
}

/// Temporary branch name for one batch of one rollout.
pub fn scope_branch_name(prefix: &str, value: &str, rollout_id: &str) -> String {
    format!("{prefix}{}_{rollout_id}", scope_slug(value))
}

/// Temporary resources owned by one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralScope {
    pub batch_key: String,
    pub branch: String,

    /// Set once the branch has been pushed.
    pub branch_created: bool,

    /// Set once the temporary group exists.
    pub group: Option<TempGroup>,
}

impl EphemeralScope {
    pub fn new(batch_key: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            batch_key: batch_key.into(),
            branch: branch.into(),
            branch_created: false,
            group: None,
        }
    }

    /// True when nothing has been created yet.
    pub fn is_vacant(&self) -> bool {
        !self.branch_created && self.group.is_none()
    }
}

/// Result of one agent run over a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub job_id: Option<String>,
    pub failed_nodes: Vec<String>,
    pub job_error: Option<String>,
}

impl ApplyOutcome {
    pub fn is_success(&self) -> bool {
        self.failed_nodes.is_empty() && self.job_error.is_none()
    }
}

impl From<AgentRunReport> for ApplyOutcome {
    fn from(report: AgentRunReport) -> Self {
        Self {
            job_id: report.job_id,
            failed_nodes: report.failed_nodes,
            job_error: report.job_error,
        }
    }
}
