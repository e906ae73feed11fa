//! Agent message handling against an in-memory bus.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use edgeship_agent::application::services::daemon::{self, Agent};
use edgeship_common::{
    AgentInventoryRecord, AppKey, Artifact, ConditionStatus, DeploymentCondition, LogLine, MemoryBus,
    MessageBus, ServiceAction, ServiceActionRequest, publish_json, topics,
};

use crate::mocks::{MockFetcher, MockJournal, MockServices, MockLookup, TestHost, artifact, self_artifact};

const WEB_MANIFEST: &str = "name: web\nexecutable: web-server\n";

fn agent(host: &TestHost, bus: &MemoryBus) -> Arc<Agent> {
    agent_with_logs(host, bus, Vec::new())
}

fn agent_with_logs(host: &TestHost, bus: &MemoryBus, entries: Vec<String>) -> Arc<Agent> {
    Arc::new(Agent::new(
        "pi-1",
        false,
        host.deployer.clone(),
        Arc::new(bus.clone()),
        Arc::new(MockJournal { entries }),
    ))
}

fn statuses(bus: &MemoryBus) -> Vec<ConditionStatus> {
    bus.published_json::<DeploymentCondition>(topics::REPO_PUSH_STATUS)
        .into_iter()
        .map(|c| c.status)
        .collect()
}

// ── Build-available ──────────────────────────────────────────────────────────

#[tokio::test]
async fn managed_push_reports_in_progress_then_success() {
    let host = TestHost::new(MockFetcher::app(WEB_MANIFEST, "web-server"));
    host.register("org/app", "web", &[]).await;
    let bus = MemoryBus::new();

    agent(&host, &bus).handle_push(artifact("org/app", "web")).await;

    assert_eq!(
        statuses(&bus),
        vec![ConditionStatus::InProgress, ConditionStatus::Success]
    );
    let last = bus
        .published_json::<DeploymentCondition>(topics::REPO_PUSH_STATUS)
        .pop()
        .unwrap();
    assert_eq!(last.host, "pi-1");
    assert_eq!(last.app_key(), AppKey::new("org/app", "web"));
}

#[tokio::test]
async fn unmanaged_push_is_ignored() {
    let host = TestHost::new(MockFetcher::app(WEB_MANIFEST, "web-server"));
    let bus = MemoryBus::new();

    agent(&host, &bus).handle_push(artifact("org/other", "web")).await;

    assert!(bus.published(topics::REPO_PUSH_STATUS).is_empty());
    assert_eq!(host.fetcher.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_update_reports_phase_tagged_error() {
    let host = TestHost::new(MockFetcher::app(WEB_MANIFEST, "web-server"));
    host.register("org/app", "web", &[("PORT", "1")]).await;
    let bus = MemoryBus::new();

    agent(&host, &bus).handle_push(artifact("org/app", "web")).await;

    let conditions = bus.published_json::<DeploymentCondition>(topics::REPO_PUSH_STATUS);
    assert_eq!(conditions.len(), 2);
    assert_eq!(conditions[1].status, ConditionStatus::Error);
    assert!(conditions[1].error.starts_with("installing: "), "{}", conditions[1].error);
}

fn build(sha: &str) -> Artifact {
    Artifact {
        sha: sha.into(),
        ..artifact("org/app", "web")
    }
}

async fn wait_idle(agent: &Agent) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while agent.busy_apps() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "pushes still running");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn pushes_of_one_app_apply_one_at_a_time_in_arrival_order() {
    let host = TestHost::new(
        MockFetcher::app(WEB_MANIFEST, "web-server").with_delay(Duration::from_millis(50)),
    );
    host.register("org/app", "web", &[]).await;
    let bus = MemoryBus::new();
    let agent = agent(&host, &bus);

    for sha in ["1111aaaa", "2222bbbb", "3333cccc"] {
        agent.submit_push(build(sha));
    }
    wait_idle(&agent).await;

    assert_eq!(host.fetcher.fetches.load(Ordering::SeqCst), 3);
    assert_eq!(host.fetcher.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(
        statuses(&bus),
        [ConditionStatus::InProgress, ConditionStatus::Success].repeat(3)
    );
    let env = std::fs::read_to_string(host.paths.app_env_file("web")).unwrap();
    assert_eq!(env, "APP_VERSION=\"3333cccc\"\n");
}

#[tokio::test]
async fn different_apps_update_concurrently() {
    let host = TestHost::new(
        MockFetcher::new(&[
            (".edgeship.yaml", "name: web\nexecutable: web\n---\nname: worker\nexecutable: worker\n", 0o644),
            ("web", "bin", 0o755),
            ("worker", "bin", 0o755),
        ])
        .with_delay(Duration::from_millis(100)),
    );
    host.register("org/app", "web", &[]).await;
    host.register("org/app", "worker", &[]).await;
    let bus = MemoryBus::new();
    let agent = agent(&host, &bus);

    tokio::join!(
        agent.handle_push(artifact("org/app", "web")),
        agent.handle_push(artifact("org/app", "worker")),
    );

    assert_eq!(host.fetcher.max_active.load(Ordering::SeqCst), 2);
    assert_eq!(
        statuses(&bus)
            .iter()
            .filter(|s| **s == ConditionStatus::Success)
            .count(),
        2
    );
}

// ── Self-update ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn self_update_reports_only_in_progress_before_restart() {
    let host = TestHost::new(MockFetcher::agent());
    let bus = MemoryBus::new();

    agent(&host, &bus).handle_push(self_artifact()).await;

    assert_eq!(statuses(&bus), vec![ConditionStatus::InProgress]);
    assert!(host.paths.self_update_marker().is_file());
    assert!(
        host.services
            .calls()
            .ends_with(&["daemon-reload".to_string(), "restart-detached edgeship-agent".to_string()])
    );
}

#[tokio::test]
async fn failed_self_restart_removes_marker_and_reports_error() {
    let host = TestHost::with(
        MockFetcher::agent(),
        MockServices::failing("restart-detached edgeship-agent"),
        MockLookup::default(),
    );
    let bus = MemoryBus::new();

    agent(&host, &bus).handle_push(self_artifact()).await;

    assert!(!host.paths.self_update_marker().exists());
    let conditions = bus.published_json::<DeploymentCondition>(topics::REPO_PUSH_STATUS);
    assert_eq!(conditions.last().unwrap().status, ConditionStatus::Error);
    assert!(conditions.last().unwrap().error.starts_with("starting: "));
}

// ── Service actions ──────────────────────────────────────────────────────────

#[tokio::test]
async fn service_actions_map_to_unit_commands() {
    let host = TestHost::new(MockFetcher::app(WEB_MANIFEST, "web-server"));
    host.register("org/app", "web", &[]).await;
    let bus = MemoryBus::new();
    let agent = agent(&host, &bus);

    for action in [ServiceAction::Stop, ServiceAction::Start, ServiceAction::Restart] {
        agent
            .handle_service(ServiceActionRequest {
                repo_name: "org/app".into(),
                manifest_name: "web".into(),
                action,
            })
            .await;
    }
    agent
        .handle_service(ServiceActionRequest {
            repo_name: "org/other".into(),
            manifest_name: "web".into(),
            action: ServiceAction::Stop,
        })
        .await;

    assert_eq!(host.services.calls(), vec!["stop web", "start web", "restart web"]);
}

// ── Inventory ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn inventory_covers_every_app_and_the_agent() {
    let host = TestHost::new(MockFetcher::agent());
    host.register("org/app", "web", &[]).await;
    let bus = MemoryBus::new();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    agent(&host, &bus).publish_inventory(now).await;

    let records = bus.published_json::<AgentInventoryRecord>(topics::AGENT_INVENTORY);
    let apps: Vec<AppKey> = records.iter().map(AgentInventoryRecord::app_key).collect();
    assert_eq!(
        apps,
        vec![
            AppKey::new("org/app", "web"),
            AppKey::new("edgeship/edgeship", "edgeship-agent"),
        ]
    );
    assert!(records.iter().all(|r| r.timestamp == now.timestamp() && !r.transient));
}

// ── Log forwarding ───────────────────────────────────────────────────────────

#[tokio::test]
async fn journal_lines_become_log_lines() {
    let host = TestHost::new(MockFetcher::agent());
    let config = host.register("org/app", "web", &[]).await;
    let bus = MemoryBus::new();
    let agent = agent_with_logs(
        &host,
        &bus,
        vec![
            r#"{"MESSAGE":"-- Logs begin at Mon --"}"#.to_string(),
            r#"{"MESSAGE":"Started web.","SYSLOG_IDENTIFIER":"systemd"}"#.to_string(),
            r#"{"MESSAGE":"listening\non :8080","SYSLOG_IDENTIFIER":"web-server"}"#.to_string(),
        ],
    );

    agent.forward_logs(config).await;

    let lines = bus.published_json::<LogLine>(topics::LOGS);
    let messages: Vec<&str> = lines.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["listening", "on :8080"]);
    assert!(lines.iter().all(|l| l.host == "pi-1" && l.config == AppKey::new("org/app", "web")));
}

// ── Consumer tasks ───────────────────────────────────────────────────────────

#[tokio::test]
async fn spawned_consumers_apply_bus_messages() {
    let host = TestHost::new(MockFetcher::app(WEB_MANIFEST, "web-server"));
    host.register("org/app", "web", &[]).await;
    let bus = MemoryBus::new();
    let handles = daemon::spawn(agent(&host, &bus)).await.unwrap();

    bus.publish(topics::REPO_PUSH, "not json".into()).await.unwrap();
    publish_json(&bus, topics::REPO_PUSH, &artifact("org/app", "web"))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !statuses(&bus).contains(&ConditionStatus::Success) {
        assert!(tokio::time::Instant::now() < deadline, "no SUCCESS published");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!bus.published(topics::AGENT_INVENTORY).is_empty());

    for handle in handles {
        handle.abort();
    }
}
