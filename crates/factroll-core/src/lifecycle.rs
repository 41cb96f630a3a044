//! One batch, end to end.
//!
//! A batch gets its own temporary branch (pinned at the rollout revision),
//! a code deploy of that branch, and a temporary node group pinning the
//! batch's nodes into the new environment. The agent runs there, and the
//! scope is torn down again whether or not the run succeeded.

use std::sync::Arc;

use factroll_platform::{
    AgentRunRequest, CodeDeployer, DeployHandle, DeployRequest, Platform, PlatformResult,
};
use tracing::{debug, info, warn};

use crate::domain::{
    scope_branch_name, ApplyOutcome, Batch, CleanupFailure, EphemeralScope, RolloutConfig,
    RolloutError, ScopeResource, TargetGroup,
};
use crate::metrics::{Metrics, METRICS};
use crate::obs;
use crate::report::{BatchReport, BatchStatus};

/// A batch that did not complete.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub error: RolloutError,

    /// Resources left behind while aborting. Empty when the error itself is
    /// a cleanup error.
    pub cleanup_failures: Vec<CleanupFailure>,

    pub report: BatchReport,
}

/// Deploy code for `request` and wait for the deploy to validate.
pub(crate) async fn deploy_and_validate(
    code: &dyn CodeDeployer,
    request: &DeployRequest,
) -> PlatformResult<DeployHandle> {
    let handle = code.deploy_code(request).await?;
    code.validate_deploy(&handle).await?;
    Ok(handle)
}

pub struct BatchLifecycle<'a> {
    platform: &'a Platform,
    config: &'a RolloutConfig,
    target: &'a TargetGroup,
    metrics: Arc<Metrics>,
}

impl<'a> BatchLifecycle<'a> {
    pub fn new(platform: &'a Platform, config: &'a RolloutConfig, target: &'a TargetGroup) -> Self {
        Self {
            platform,
            config,
            target,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Count into `metrics` as well as the process-wide [`METRICS`].
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn count(&self, f: impl Fn(&Metrics)) {
        f(&METRICS);
        f(&self.metrics);
    }

    /// Scope a batch will use; nothing is created yet.
    pub fn scope_for(&self, batch: &Batch) -> EphemeralScope {
        let branch = scope_branch_name(
            self.config.branch_prefix(),
            &batch.key,
            self.config.rollout_id(),
        );
        EphemeralScope::new(&batch.key, branch)
    }

    /// Apply the revision to one batch inside a fresh temporary scope.
    ///
    /// On success the scope has been removed. On failure removal has been
    /// attempted and anything left behind is listed in the returned
    /// [`BatchFailure`].
    pub async fn apply(&self, batch: &Batch) -> Result<BatchReport, BatchFailure> {
        let mut scope = self.scope_for(batch);
        let mut report = BatchReport::pending(batch, &scope.branch);

        let outcome = match self.run_in_scope(batch, &mut scope).await {
            Ok(outcome) => outcome,
            Err(error) => return Err(self.abort(&scope, error, report).await),
        };
        report.record_outcome(&outcome);

        if !outcome.is_success() {
            let error = RolloutError::BatchApply {
                batch: batch.key.clone(),
                failed_nodes: outcome.failed_nodes.clone(),
                job_error: outcome.job_error.clone(),
            };
            return Err(self.abort(&scope, error, report).await);
        }

        report.group_id = scope.group.as_ref().map(|g| g.id.clone());
        let failures = self.teardown(&scope).await;
        if !failures.is_empty() {
            self.count(Metrics::inc_batches_failed);
            report.status = BatchStatus::CleanupFailed;
            report.cleanup_failures = failures.clone();
            return Err(BatchFailure {
                error: RolloutError::Cleanup {
                    batch: batch.key.clone(),
                    failures,
                },
                cleanup_failures: Vec::new(),
                report,
            });
        }

        self.count(Metrics::inc_batches_applied);
        report.status = BatchStatus::Applied;
        info!(batch = %batch.key, nodes = batch.nodes.len(), "batch applied");
        Ok(report)
    }

    async fn run_in_scope(
        &self,
        batch: &Batch,
        scope: &mut EphemeralScope,
    ) -> Result<ApplyOutcome, RolloutError> {
        let platform = self.platform;
        let commit = self.config.revision().commit();

        platform
            .scm
            .create_branch(&scope.branch, commit, false)
            .await
            .map_err(|e| RolloutError::BranchCreate {
                batch: batch.key.clone(),
                branch: scope.branch.clone(),
                reason: e.to_string(),
            })?;
        scope.branch_created = true;
        self.count(Metrics::inc_scopes_created);
        debug!(branch = %scope.branch, revision = %commit, "temporary branch created");

        let request = DeployRequest {
            branch: scope.branch.clone(),
            environment: Some(self.target.environment.clone()),
        };
        deploy_and_validate(platform.code.as_ref(), &request)
            .await
            .map_err(|e| RolloutError::CodeDeploy {
                batch: Some(batch.key.clone()),
                branch: scope.branch.clone(),
                reason: e.to_string(),
            })?;

        let group = platform
            .groups
            .create_temp_group(&self.target.id, &scope.branch, true)
            .await
            .map_err(|e| RolloutError::GroupCreate {
                batch: batch.key.clone(),
                branch: scope.branch.clone(),
                reason: e.to_string(),
            })?;
        let group_id = group.id.clone();
        let environment = group.environment.clone();
        scope.group = Some(group);
        debug!(group = %group_id, environment = %environment, "temporary group created");

        platform
            .groups
            .pin_nodes(&batch.nodes, &group_id)
            .await
            .map_err(|e| RolloutError::Pin {
                batch: batch.key.clone(),
                group_id: group_id.clone(),
                reason: e.to_string(),
            })?;

        let run = AgentRunRequest {
            nodes: batch.nodes.clone(),
            noop: self.config.noop(),
            environment: Some(environment),
        };
        self.count(Metrics::inc_agent_runs);
        let report = platform
            .agent
            .run_agent(&run)
            .await
            .map_err(|e| RolloutError::RunOrchestration {
                batch: Some(batch.key.clone()),
                reason: e.to_string(),
            })?;
        Ok(report.into())
    }

    async fn abort(
        &self,
        scope: &EphemeralScope,
        error: RolloutError,
        mut report: BatchReport,
    ) -> BatchFailure {
        self.count(Metrics::inc_batches_failed);
        warn!(batch = %scope.batch_key, error = %error, "batch failed");
        let cleanup_failures = if scope.is_vacant() {
            Vec::new()
        } else {
            self.teardown(scope).await
        };
        report.status = BatchStatus::Failed;
        report.group_id = scope.group.as_ref().map(|g| g.id.clone());
        report.cleanup_failures = cleanup_failures.clone();
        BatchFailure {
            error,
            cleanup_failures,
            report,
        }
    }

    /// Remove the scope's group, then its branch. Both are attempted; each
    /// one that fails is returned.
    pub async fn teardown(&self, scope: &EphemeralScope) -> Vec<CleanupFailure> {
        let mut failures = Vec::new();

        if let Some(group) = &scope.group {
            if let Err(e) = self.platform.groups.delete_group(&group.id).await {
                failures.push(CleanupFailure {
                    resource: ScopeResource::NodeGroup,
                    name: group.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
        if scope.branch_created {
            if let Err(e) = self.platform.scm.delete_branch(&scope.branch).await {
                failures.push(CleanupFailure {
                    resource: ScopeResource::Branch,
                    name: scope.branch.clone(),
                    reason: e.to_string(),
                });
            }
        }

        for failure in &failures {
            obs::emit_cleanup_failed(&scope.batch_key, failure);
        }
        let leaked = failures.len() as u64;
        self.count(|m| m.add_scopes_leaked(leaked));
        failures
    }

    /// Real (non-trial) run of a batch in its normal environment.
    pub async fn enforce(&self, batch: &Batch) -> Result<ApplyOutcome, RolloutError> {
        let run = AgentRunRequest {
            nodes: batch.nodes.clone(),
            noop: false,
            environment: None,
        };
        self.count(Metrics::inc_agent_runs);
        let report = self.platform.agent.run_agent(&run).await.map_err(|e| {
            RolloutError::RunOrchestration {
                batch: Some(batch.key.clone()),
                reason: e.to_string(),
            }
        })?;
        Ok(report.into())
    }
}
