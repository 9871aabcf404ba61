//! End-to-end coordination lifecycle tests against a real temp-directory
//! `SwarmKernel` — no component is mocked, since the whole point of the
//! on-disk design is that the filesystem itself is the thing under test.

use swarmkernel::{CoordinationConfig, Priority, SwarmError, SwarmKernel, WorkResult, WorkStatus};
use tempfile::TempDir;

fn kernel(dir: &TempDir) -> SwarmKernel {
    let mut config = CoordinationConfig::default();
    config.coordination_dir = dir.path().to_path_buf();
    config.ttl_hours = 1;
    config.archive_threshold = 1000;
    SwarmKernel::new(config)
}

#[tokio::test]
async fn basic_claim_progress_complete_lifecycle() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir);

    kernel.agents.register_or_update("agent_1".into(), "dev".into(), 80, "rust".into()).await.unwrap();

    let claim = kernel
        .claim_engine
        .claim("agent_1", "feature", "add retry logic", Priority::High, "dev")
        .await
        .unwrap();
    assert_eq!(claim.status, WorkStatus::Active);

    let progressed = kernel.claim_engine.progress(&claim.work_item_id, 45).await.unwrap();
    assert_eq!(progressed.status, WorkStatus::InProgress);
    assert_eq!(progressed.progress_percent, 45);

    let completed =
        kernel.claim_engine.complete(&claim.work_item_id, WorkResult::Success, Some(8)).await.unwrap();
    assert_eq!(completed.status, WorkStatus::Completed);
    assert_eq!(completed.progress_percent, 100);

    let agent = kernel.agents.by_id("agent_1").unwrap().unwrap();
    assert_eq!(agent.performance.tasks_completed, 1);
    assert_eq!(agent.performance.success_rate, 1.0);
}

#[tokio::test]
async fn concurrent_claims_never_collide() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir);

    let mut handles = Vec::new();
    for i in 0..32 {
        let kernel = kernel.clone();
        handles.push(tokio::spawn(async move {
            kernel
                .claim_engine
                .claim(&format!("agent_{i}"), "feature", "concurrent work", Priority::Medium, "dev")
                .await
                .unwrap()
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for h in handles {
        let claim = h.await.unwrap();
        assert!(ids.insert(claim.work_item_id), "claim ids must never collide under concurrency");
    }
    assert_eq!(ids.len(), 32);
}

#[tokio::test]
async fn fast_and_slow_paths_are_equivalent_once_promoted() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir);

    let fast = kernel.claim_engine.claim("agent_1", "bug", "fix flake", Priority::Low, "qa").await.unwrap();
    let slow =
        kernel.claim_engine.claim_slow("agent_2", "bug", "fix flake", Priority::Low, "qa").await.unwrap();

    // Fast claim isn't canonical yet; query still finds it via the merged view.
    assert!(kernel.query.get(&fast.work_item_id).unwrap().is_some());
    assert!(kernel.claims.get_canonical(&fast.work_item_id).unwrap().is_none());

    // Any mutation promotes it into canonical.
    kernel.claim_engine.progress(&fast.work_item_id, 10).await.unwrap();
    assert!(kernel.claims.get_canonical(&fast.work_item_id).unwrap().is_some());

    // The slow claim was always canonical.
    assert!(kernel.claims.get_canonical(&slow.work_item_id).unwrap().is_some());
}

#[tokio::test]
async fn progress_regression_is_rejected() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir);

    let claim =
        kernel.claim_engine.claim_slow("agent_1", "feature", "x", Priority::Medium, "dev").await.unwrap();
    kernel.claim_engine.progress(&claim.work_item_id, 70).await.unwrap();

    let err = kernel.claim_engine.progress(&claim.work_item_id, 20).await.unwrap_err();
    assert!(matches!(err, SwarmError::InvalidArgument { .. }));

    // The regression must not have been applied.
    let claim = kernel.query.get(&claim.work_item_id).unwrap().unwrap();
    assert_eq!(claim.progress_percent, 70);
}

#[tokio::test]
async fn completing_twice_is_an_idempotent_no_op() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir);

    let claim =
        kernel.claim_engine.claim_slow("agent_1", "feature", "x", Priority::Medium, "dev").await.unwrap();
    let first =
        kernel.claim_engine.complete(&claim.work_item_id, WorkResult::Success, None).await.unwrap();

    let second = kernel
        .claim_engine
        .complete(&claim.work_item_id, WorkResult::Success, None)
        .await
        .unwrap();
    assert_eq!(second.status, first.status);
    assert_eq!(second.completed_at, first.completed_at);

    // Only one completion should ever be recorded against the agent.
    let agent = kernel.agents.by_id("agent_1").unwrap().unwrap();
    assert_eq!(agent.performance.tasks_completed, 1);
}

#[tokio::test]
async fn progress_after_complete_is_rejected() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir);

    let claim =
        kernel.claim_engine.claim_slow("agent_1", "feature", "x", Priority::Medium, "dev").await.unwrap();
    kernel.claim_engine.complete(&claim.work_item_id, WorkResult::Success, None).await.unwrap();

    let err = kernel.claim_engine.progress(&claim.work_item_id, 50).await.unwrap_err();
    assert!(matches!(err, SwarmError::TerminalState { .. }));
}

#[tokio::test]
async fn mutating_a_claim_that_was_never_claimed_is_not_found() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir);

    let err = kernel.claim_engine.progress("work_does_not_exist", 10).await.unwrap_err();
    assert!(matches!(err, SwarmError::NotFound { .. }));
}

#[tokio::test]
async fn retention_prunes_expired_and_compacts_fast_store() {
    let dir = TempDir::new().unwrap();
    let mut config = CoordinationConfig::default();
    config.coordination_dir = dir.path().to_path_buf();
    config.ttl_hours = 1;
    config.fast_max_lines = 3;
    config.fast_keep_lines = 1;
    let kernel = SwarmKernel::new(config);

    for i in 0..5 {
        kernel
            .claim_engine
            .claim(&format!("agent_{i}"), "chore", "cleanup", Priority::Low, "dev")
            .await
            .unwrap();
    }

    let report = kernel.retention.optimize().await.unwrap();
    assert_eq!(report.fast_before, 5);
    assert!(report.fast_after <= 1);
}

#[tokio::test]
async fn health_reflects_a_missing_coordination_directory() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("gone");
    let mut config = CoordinationConfig::default();
    config.coordination_dir = missing;
    let kernel = SwarmKernel::new(config);

    let report = kernel.health.assess().await.unwrap();
    assert!(report.score < 80);
    assert!(report.issues.iter().any(|i| i.category == "filesystem"));
}
