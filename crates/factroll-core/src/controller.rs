//! Rollout state machine.
//!
//! Drives one rollout from target resolution to the final deploy, one batch
//! at a time. The persistent branch is only moved once every batch has been
//! verified; any failure before that leaves it untouched.

use std::sync::Arc;
use std::time::Duration;

use factroll_platform::{DeployRequest, Platform};
use tracing::{info, instrument, warn};

use crate::domain::{
    Batch, BatchPlan, RolloutConfig, RolloutError, RolloutFailure, RolloutState, TargetGroup,
};
use crate::grouper::FactGrouper;
use crate::lifecycle::{deploy_and_validate, BatchLifecycle};
use crate::metrics::Metrics;
use crate::obs;
use crate::report::{ResultAggregator, RolloutReport};
use crate::resolver::TargetResolver;

pub type RolloutResult = Result<RolloutReport, RolloutFailure>;

pub struct RolloutController {
    platform: Platform,
    state: RolloutState,
    history: Vec<RolloutState>,
    metrics: Arc<Metrics>,
}

impl RolloutController {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            state: RolloutState::Resolving,
            history: vec![RolloutState::Resolving],
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn state(&self) -> &RolloutState {
        &self.state
    }

    /// Every state entered during the last run, in order.
    pub fn history(&self) -> &[RolloutState] {
        &self.history
    }

    /// Counters of the last run only; the process-wide totals are in
    /// [`crate::METRICS`].
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run one rollout to completion.
    #[instrument(
        name = "factroll.rollout",
        skip_all,
        fields(rollout_id = %config.rollout_id(), group = %config.target_group())
    )]
    pub async fn run(&mut self, config: &RolloutConfig) -> RolloutResult {
        self.state = RolloutState::Resolving;
        self.history = vec![RolloutState::Resolving];
        self.metrics = Arc::new(Metrics::new());

        obs::emit_rollout_started(
            config.rollout_id(),
            config.target_group(),
            config.revision().commit(),
            config.noop(),
        );

        let mut agg = ResultAggregator::new(config);
        let result = self.drive(config, &mut agg).await;
        let elapsed = (chrono::Utc::now() - agg.started_at())
            .num_milliseconds()
            .max(0) as u64;
        let batches = agg.batches().len();

        let outcome = match result {
            Ok(()) => {
                self.transition(RolloutState::Done);
                Ok(agg.finish(self.history.clone()))
            }
            Err(failure) => {
                warn!(error = %failure, "rollout failed");
                self.transition(RolloutState::Failed {
                    reason: failure.error.to_string(),
                });
                Err(failure)
            }
        };

        obs::emit_rollout_finished(config.rollout_id(), outcome.is_ok(), elapsed, batches);
        self.metrics.flush();
        outcome
    }

    fn transition(&mut self, next: RolloutState) {
        obs::emit_state_changed(&self.state, &next);
        self.state = next.clone();
        self.history.push(next);
    }

    fn fail(&self, agg: &ResultAggregator, error: RolloutError) -> RolloutFailure {
        agg.fail(self.state.clone(), error, Vec::new())
    }

    async fn drive(
        &mut self,
        config: &RolloutConfig,
        agg: &mut ResultAggregator,
    ) -> Result<(), RolloutFailure> {
        let platform = self.platform.clone();
        let resolver = TargetResolver::new(platform.groups.as_ref(), platform.approvals.as_ref());

        let target = resolver
            .resolve(config.target_group())
            .await
            .map_err(|e| self.fail(agg, e))?;
        agg.record_target(&target);

        if target.is_empty() && config.fail_if_no_nodes() {
            return Err(self.fail(
                agg,
                RolloutError::EmptyTarget {
                    group: target.id.clone(),
                },
            ));
        }

        self.transition(RolloutState::Approving);
        resolver
            .await_approval(&target)
            .await
            .map_err(|e| self.fail(agg, e))?;

        if target.is_empty() {
            warn!(group = %target.id, "target group has no nodes, deploying branch directly");
            self.transition(RolloutState::DirectDeploy);
            agg.record_direct();
            self.update_branch(config, agg).await?;
            return self.deploy_target(config, &target, agg).await;
        }

        self.transition(RolloutState::Batching {
            current: 0,
            total: 0,
        });
        let plan = FactGrouper::new(platform.facts.as_ref(), config.missing_fact_policy())
            .group(&target.nodes, config.fact())
            .await
            .map_err(|e| self.fail(agg, e))?;
        agg.record_plan(&plan);

        self.apply_batches(&platform, config, &target, &plan, agg)
            .await?;

        self.transition(RolloutState::FinalizingBranch);
        self.update_branch(config, agg).await?;

        self.transition(RolloutState::FinalDeploy);
        self.deploy_target(config, &target, agg).await?;

        if config.enforce_after_trial() {
            self.enforce(&platform, config, &target, &plan, agg).await?;
        }
        Ok(())
    }

    async fn apply_batches(
        &mut self,
        platform: &Platform,
        config: &RolloutConfig,
        target: &TargetGroup,
        plan: &BatchPlan,
        agg: &mut ResultAggregator,
    ) -> Result<(), RolloutFailure> {
        let lifecycle =
            BatchLifecycle::new(platform, config, target).with_metrics(self.metrics.clone());
        let total = plan.len();

        for (i, batch) in plan.batches.iter().enumerate() {
            if i > 0 {
                pause(config.batch_delay()).await;
            }
            self.transition(RolloutState::Batching {
                current: i + 1,
                total,
            });
            obs::emit_batch_started(&batch.key, i + 1, total, batch.nodes.len());

            match lifecycle.apply(batch).await {
                Ok(report) => {
                    obs::emit_batch_finished(&batch.key, true, 0);
                    agg.record_batch(report);
                }
                Err(failure) => {
                    obs::emit_batch_finished(&batch.key, false, failure.report.failed_nodes.len());
                    agg.record_batch(failure.report);
                    return Err(agg.fail(
                        self.state.clone(),
                        failure.error,
                        failure.cleanup_failures,
                    ));
                }
            }
        }
        Ok(())
    }

    async fn update_branch(
        &self,
        config: &RolloutConfig,
        agg: &mut ResultAggregator,
    ) -> Result<(), RolloutFailure> {
        let revision = config.revision();
        self.platform
            .scm
            .update_branch_ref(revision.target_branch(), revision.commit())
            .await
            .map_err(|e| {
                self.fail(
                    agg,
                    RolloutError::BranchUpdate {
                        branch: revision.target_branch().to_string(),
                        revision: revision.commit().to_string(),
                        reason: e.to_string(),
                    },
                )
            })?;
        agg.record_branch_updated();
        info!(branch = %revision.target_branch(), revision = %revision.short(), "branch updated");
        Ok(())
    }

    async fn deploy_target(
        &self,
        config: &RolloutConfig,
        target: &TargetGroup,
        agg: &mut ResultAggregator,
    ) -> Result<(), RolloutFailure> {
        let branch = config.revision().target_branch();
        let request = DeployRequest {
            branch: branch.to_string(),
            environment: Some(target.environment.clone()),
        };
        deploy_and_validate(self.platform.code.as_ref(), &request)
            .await
            .map_err(|e| {
                self.fail(
                    agg,
                    RolloutError::CodeDeploy {
                        batch: None,
                        branch: branch.to_string(),
                        reason: e.to_string(),
                    },
                )
            })?;
        info!(branch = %branch, environment = %target.environment, "code deployed");
        Ok(())
    }

    /// Real runs over the batches of a successful trial rollout. Every batch
    /// runs; failures are collected and reported together.
    async fn enforce(
        &mut self,
        platform: &Platform,
        config: &RolloutConfig,
        target: &TargetGroup,
        plan: &BatchPlan,
        agg: &mut ResultAggregator,
    ) -> Result<(), RolloutFailure> {
        let lifecycle =
            BatchLifecycle::new(platform, config, target).with_metrics(self.metrics.clone());
        let total = plan.len();
        let mut failed: Vec<String> = Vec::new();
        let mut details: Vec<String> = Vec::new();

        for (i, batch) in plan.batches.iter().enumerate() {
            if i > 0 {
                pause(config.batch_delay()).await;
            }
            self.transition(RolloutState::EnforcePhase {
                current: i + 1,
                total,
            });
            match lifecycle.enforce(batch).await {
                Ok(outcome) if outcome.is_success() => {
                    agg.record_enforce(&batch.key, outcome);
                }
                Ok(outcome) => {
                    details.push(enforce_detail(batch, &outcome.failed_nodes, &outcome.job_error));
                    failed.push(batch.key.clone());
                    agg.record_enforce(&batch.key, outcome);
                }
                Err(e) => {
                    warn!(batch = %batch.key, error = %e, "enforce run could not be completed");
                    details.push(format!("{}: {e}", batch.key));
                    failed.push(batch.key.clone());
                }
            }
        }

        if !failed.is_empty() {
            return Err(self.fail(
                agg,
                RolloutError::Enforce {
                    batches: failed,
                    details,
                },
            ));
        }
        agg.record_enforced();
        Ok(())
    }
}

fn enforce_detail(batch: &Batch, failed_nodes: &[String], job_error: &Option<String>) -> String {
    let mut detail = format!("{}: ", batch.key);
    if !failed_nodes.is_empty() {
        detail.push_str(&format!("failed nodes {}", failed_nodes.join(", ")));
    }
    if let Some(job_error) = job_error {
        if !failed_nodes.is_empty() {
            detail.push_str(", ");
        }
        detail.push_str(&format!("job error: {job_error}"));
    }
    detail
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        info!(delay_secs = delay.as_secs_f64(), "waiting before next batch");
        tokio::time::sleep(delay).await;
    }
}

/// Run one rollout with a fresh controller.
pub async fn run_rollout(platform: Platform, config: &RolloutConfig) -> RolloutResult {
    RolloutController::new(platform).run(config).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use factroll_platform::fakes::{FakeOp, FakePlatform};

    fn config() -> RolloutConfig {
        RolloutConfig::builder("abcdef1", "web", "production", "region")
            .rollout_id("r1")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn history_records_each_phase() {
        let fake = Arc::new(
            FakePlatform::new()
                .with_group("web", Some("production"), &["a", "b"])
                .with_fact("region", &[("a", "us"), ("b", "eu")]),
        );
        let mut controller = RolloutController::new(Platform::from_shared(fake));
        controller.run(&config()).await.unwrap();

        let names: Vec<&str> = controller.history().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "resolving",
                "approving",
                "batching",
                "batching",
                "batching",
                "finalizing_branch",
                "final_deploy",
                "done",
            ]
        );
        assert_eq!(controller.state(), &RolloutState::Done);
    }

    #[tokio::test]
    async fn failure_records_state_and_ends_failed() {
        let fake = Arc::new(
            FakePlatform::new()
                .with_group("web", Some("production"), &["a"])
                .with_fact("region", &[("a", "us")])
                .fail_on(FakeOp::UpdateBranchRef, "production", "non-fast-forward"),
        );
        let mut controller = RolloutController::new(Platform::from_shared(fake));
        let failure = controller.run(&config()).await.unwrap_err();
        assert_eq!(failure.state, RolloutState::FinalizingBranch);
        assert!(matches!(failure.error, RolloutError::BranchUpdate { .. }));
        assert_eq!(failure.applied_batches, vec!["us"]);
        assert!(matches!(controller.state(), RolloutState::Failed { .. }));
    }

    #[tokio::test]
    async fn counters_cover_only_the_current_run() {
        let fake = Arc::new(
            FakePlatform::new()
                .with_group("web", Some("production"), &["a", "b"])
                .with_fact("region", &[("a", "us"), ("b", "eu")]),
        );
        let mut controller = RolloutController::new(Platform::from_shared(fake));

        for id in ["r1", "r2"] {
            let config = RolloutConfig::builder("abcdef1", "web", "production", "region")
                .rollout_id(id)
                .build()
                .unwrap();
            controller.run(&config).await.unwrap();

            let m = controller.metrics();
            assert_eq!(m.batches_applied(), 2, "rollout {id}");
            assert_eq!(m.scopes_created(), 2, "rollout {id}");
            assert_eq!(m.agent_runs(), 2, "rollout {id}");
            assert_eq!(m.batches_failed(), 0, "rollout {id}");
        }
    }

    #[test]
    fn rollout_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let fake = Arc::new(FakePlatform::new());
        let config = config();
        let fut = run_rollout(Platform::from_shared(fake), &config);
        assert_send(&fut);
    }

    #[test]
    fn enforce_detail_text() {
        let batch = Batch {
            key: "eu".into(),
            nodes: vec![],
        };
        assert_eq!(
            enforce_detail(&batch, &["d".to_string()], &Some("stopped".into())),
            "eu: failed nodes d, job error: stopped"
        );
        assert_eq!(
            enforce_detail(&batch, &[], &Some("stopped".into())),
            "eu: job error: stopped"
        );
    }
}
