//! A self-update survives the agent restart: the next process reports it
//! exactly once.

use edgeship_agent::application::services::self_update::{resume, take_pending};
use edgeship_common::{ConditionStatus, DeploymentCondition, MemoryBus, topics};

use crate::mocks::{MockFetcher, TestHost, self_artifact};

/// Run a self-update up to the queued restart, like the old process does.
async fn restart_pending(host: &TestHost) {
    host.deployer.apply_self(&self_artifact()).await.unwrap();
    assert!(host.paths.self_update_marker().is_file());
    assert!(host.paths.agent_binary().is_file());
}

#[tokio::test]
async fn next_boot_reports_success_once_and_removes_marker() {
    let host = TestHost::new(MockFetcher::agent());
    restart_pending(&host).await;
    let bus = MemoryBus::new();

    // First boot after the restart.
    let pending = take_pending(host.fs.as_ref(), &host.paths).await.unwrap();
    assert_eq!(pending.artifact, Some(self_artifact()));
    resume(&bus, host.fs.as_ref(), &host.paths, "pi-1", host.deployer.self_app(), &pending).await;

    let conditions = bus.published_json::<DeploymentCondition>(topics::REPO_PUSH_STATUS);
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0].status, ConditionStatus::Success);
    assert_eq!(conditions[0].manifest_name, "edgeship-agent");
    assert_eq!(conditions[0].host, "pi-1");
    assert!(!host.paths.self_update_marker().exists());

    // Second boot: nothing left to report.
    assert!(take_pending(host.fs.as_ref(), &host.paths).await.is_none());
}

#[tokio::test]
async fn marker_is_removed_even_if_the_report_fails() {
    let host = TestHost::new(MockFetcher::agent());
    restart_pending(&host).await;
    let bus = MemoryBus::new();
    bus.set_fail_publish(true);

    let pending = take_pending(host.fs.as_ref(), &host.paths).await.unwrap();
    resume(&bus, host.fs.as_ref(), &host.paths, "pi-1", host.deployer.self_app(), &pending).await;

    assert!(!host.paths.self_update_marker().exists());
    assert!(bus.published(topics::REPO_PUSH_STATUS).is_empty());
}

#[tokio::test]
async fn malformed_marker_still_counts() {
    let host = TestHost::new(MockFetcher::agent());
    std::fs::create_dir_all(&host.paths.base_dir).unwrap();
    std::fs::write(host.paths.self_update_marker(), "{ not json").unwrap();

    let pending = take_pending(host.fs.as_ref(), &host.paths).await.unwrap();
    assert_eq!(pending.artifact, None);
}

#[tokio::test]
async fn no_marker_means_nothing_pending() {
    let host = TestHost::new(MockFetcher::agent());
    assert!(take_pending(host.fs.as_ref(), &host.paths).await.is_none());
}
