//! Lifecycle events emitted during a rollout.

use std::sync::Arc;

use factroll_core::{run_rollout, RolloutConfig};
use factroll_platform::fakes::{FakeOp, FakePlatform};
use factroll_platform::Platform;
use tracing_test::traced_test;

fn config() -> RolloutConfig {
    RolloutConfig::builder("abcdef1", "web", "production", "region")
        .rollout_id("r7")
        .build()
        .unwrap()
}

#[traced_test]
#[tokio::test]
async fn successful_rollout_emits_lifecycle_events() {
    let fake = Arc::new(
        FakePlatform::new()
            .with_group("web", Some("production"), &["a", "b"])
            .with_fact("region", &[("a", "us"), ("b", "eu")]),
    );
    run_rollout(Platform::from_shared(fake), &config())
        .await
        .unwrap();

    assert!(logs_contain("rollout.started"));
    assert!(logs_contain("rollout.state_changed"));
    assert!(logs_contain("batch.started"));
    assert!(logs_contain("batch.finished"));
    assert!(logs_contain("rollout.finished"));
    assert!(logs_contain("rollout_id=r7"));
    assert!(!logs_contain("batch.cleanup_failed"));
}

#[traced_test]
#[tokio::test]
async fn leaked_scope_is_logged_as_warning() {
    let fake = Arc::new(
        FakePlatform::new()
            .with_group("web", Some("production"), &["a"])
            .with_fact("region", &[("a", "us")])
            .fail_on(FakeOp::DeleteBranch, "us_r7", "permission denied"),
    );
    run_rollout(Platform::from_shared(fake), &config())
        .await
        .unwrap_err();

    assert!(logs_contain("batch.cleanup_failed"));
    assert!(logs_contain("us_r7"));
    assert!(logs_contain("rollout failed"));
}

#[traced_test]
#[tokio::test]
async fn each_rollout_flushes_its_own_counters() {
    let fake = Arc::new(
        FakePlatform::new()
            .with_group("web", Some("production"), &["a", "b"])
            .with_fact("region", &[("a", "us"), ("b", "eu")]),
    );
    for _ in 0..2 {
        run_rollout(Platform::from_shared(fake.clone()), &config())
            .await
            .unwrap();
    }

    assert!(logs_contain("batches_applied=2"));
    assert!(logs_contain("agent_runs=2"));
    assert!(!logs_contain("batches_applied=4"));
}

#[traced_test]
#[test]
fn metrics_flush_is_logged() {
    factroll_core::METRICS.flush();
    assert!(logs_contain("batches_applied"));
}
