//! Rollout results: per-batch records, the final report, and its renderings.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ApplyOutcome, Batch, BatchPlan, CleanupFailure, RolloutConfig, RolloutError, RolloutFailure,
    RolloutState, TargetGroup,
};

pub const REPORT_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Applied,
    Failed,
    /// The run succeeded but the temporary scope could not be removed.
    CleanupFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub key: String,
    pub nodes: Vec<String>,
    pub branch: String,
    pub group_id: Option<String>,
    pub status: BatchStatus,
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_nodes: Vec<String>,
    pub job_error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup_failures: Vec<CleanupFailure>,
    /// Result of the enforce run, when one happened.
    pub enforce: Option<ApplyOutcome>,
}

impl BatchReport {
    pub fn pending(batch: &Batch, branch: &str) -> Self {
        Self {
            key: batch.key.clone(),
            nodes: batch.nodes.clone(),
            branch: branch.to_string(),
            group_id: None,
            status: BatchStatus::Pending,
            job_id: None,
            failed_nodes: Vec::new(),
            job_error: None,
            cleanup_failures: Vec::new(),
            enforce: None,
        }
    }

    pub fn record_outcome(&mut self, outcome: &ApplyOutcome) {
        self.job_id = outcome.job_id.clone();
        self.failed_nodes = outcome.failed_nodes.clone();
        self.job_error = outcome.job_error.clone();
    }
}

/// How the revision reached the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPath {
    /// Empty target: branch moved and deployed, no batches.
    Direct,
    Batched,
}

/// Summary of a successful rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutReport {
    pub schema_version: String,
    pub rollout_id: String,
    pub target_group: String,
    pub environment: Option<String>,
    pub fact: String,
    pub revision: String,
    pub target_branch: String,
    pub noop: bool,
    pub path: RolloutPath,
    pub batches: Vec<BatchReport>,
    pub excluded_nodes: Vec<String>,
    pub branch_updated: bool,
    pub enforced: bool,
    pub states: Vec<RolloutState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RolloutReport {
    pub fn node_count(&self) -> usize {
        self.batches.iter().map(|b| b.nodes.len()).sum()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Collects batch results while a rollout runs.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    rollout_id: String,
    target_group: String,
    fact: String,
    revision: String,
    target_branch: String,
    noop: bool,
    environment: Option<String>,
    path: RolloutPath,
    batches: Vec<BatchReport>,
    excluded_nodes: Vec<String>,
    branch_updated: bool,
    enforced: bool,
    started_at: DateTime<Utc>,
}

impl ResultAggregator {
    pub fn new(config: &RolloutConfig) -> Self {
        Self {
            rollout_id: config.rollout_id().to_string(),
            target_group: config.target_group().to_string(),
            fact: config.fact().to_string(),
            revision: config.revision().commit().to_string(),
            target_branch: config.revision().target_branch().to_string(),
            noop: config.noop(),
            environment: None,
            path: RolloutPath::Batched,
            batches: Vec::new(),
            excluded_nodes: Vec::new(),
            branch_updated: false,
            enforced: false,
            started_at: Utc::now(),
        }
    }

    pub fn record_target(&mut self, target: &TargetGroup) {
        self.environment = Some(target.environment.clone());
    }

    pub fn record_direct(&mut self) {
        self.path = RolloutPath::Direct;
    }

    pub fn record_plan(&mut self, plan: &BatchPlan) {
        self.path = RolloutPath::Batched;
        self.excluded_nodes = plan.excluded_nodes.clone();
    }

    pub fn record_batch(&mut self, report: BatchReport) {
        self.batches.push(report);
    }

    pub fn record_enforce(&mut self, key: &str, outcome: ApplyOutcome) {
        if let Some(batch) = self.batches.iter_mut().find(|b| b.key == key) {
            batch.enforce = Some(outcome);
        }
    }

    pub fn record_branch_updated(&mut self) {
        self.branch_updated = true;
    }

    pub fn record_enforced(&mut self) {
        self.enforced = true;
    }

    /// Keys of batches that completed, in order.
    pub fn applied_batches(&self) -> Vec<String> {
        self.batches
            .iter()
            .filter(|b| b.status == BatchStatus::Applied)
            .map(|b| b.key.clone())
            .collect()
    }

    pub fn batches(&self) -> &[BatchReport] {
        &self.batches
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Build the failure record for an error raised in `state`.
    pub fn fail(
        &self,
        state: RolloutState,
        error: RolloutError,
        cleanup_failures: Vec<CleanupFailure>,
    ) -> RolloutFailure {
        RolloutFailure {
            rollout_id: self.rollout_id.clone(),
            state,
            error,
            cleanup_failures,
            applied_batches: self.applied_batches(),
        }
    }

    pub fn finish(self, states: Vec<RolloutState>) -> RolloutReport {
        RolloutReport {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            rollout_id: self.rollout_id,
            target_group: self.target_group,
            environment: self.environment,
            fact: self.fact,
            revision: self.revision,
            target_branch: self.target_branch,
            noop: self.noop,
            path: self.path,
            batches: self.batches,
            excluded_nodes: self.excluded_nodes,
            branch_updated: self.branch_updated,
            enforced: self.enforced,
            states,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Write any report value as pretty JSON.
pub fn write_report_json<T: Serialize + ?Sized>(path: &Path, report: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize rollout report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Markdown summary of a finished rollout.
pub fn render_summary(report: &RolloutReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Rollout {}\n\n", report.rollout_id));
    out.push_str(&format!(
        "- group: {}\n- revision: {}\n- branch: {}\n- mode: {}\n",
        report.target_group,
        report.revision,
        report.target_branch,
        if report.noop { "noop" } else { "apply" },
    ));

    match report.path {
        RolloutPath::Direct => {
            out.push_str("- target had no nodes; branch deployed directly\n");
        }
        RolloutPath::Batched => {
            out.push_str(&format!(
                "- batches: {} ({} nodes, grouped by `{}`)\n",
                report.batches.len(),
                report.node_count(),
                report.fact
            ));
        }
    }
    if !report.excluded_nodes.is_empty() {
        out.push_str(&format!(
            "- excluded: {}\n",
            report.excluded_nodes.join(", ")
        ));
    }

    if !report.batches.is_empty() {
        out.push_str("\n## Batches\n");
        for batch in &report.batches {
            out.push_str(&format!(
                "- `{}`: {} node(s), {:?}",
                batch.key,
                batch.nodes.len(),
                batch.status
            ));
            if let Some(enforce) = &batch.enforce {
                out.push_str(if enforce.is_success() {
                    ", enforced"
                } else {
                    ", enforce failed"
                });
            }
            out.push('\n');
        }
    }
    out
}
