//! `systemctl` adapter behaviour with scripted process output.

use std::sync::Arc;

use edgeship_agent::application::ports::ServiceManager;
use edgeship_agent::infra::systemd::Systemctl;

use crate::mocks::{ScriptedRunner, err_output, ok_output};

#[tokio::test]
async fn stop_of_unloaded_unit_succeeds() {
    let runner = Arc::new(ScriptedRunner::new(vec![err_output(
        5,
        b"Failed to stop web.service: Unit web.service not loaded.",
    )]));
    let systemctl = Systemctl::new(runner.clone());

    systemctl.stop("web").await.unwrap();

    assert_eq!(runner.calls(), vec!["systemctl stop web"]);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let runner = Arc::new(ScriptedRunner::new(vec![ok_output(b""), ok_output(b"")]));
    let systemctl = Systemctl::new(runner.clone());

    systemctl.stop("web").await.unwrap();
    systemctl.stop("web").await.unwrap();
}

#[tokio::test]
async fn other_stop_failures_are_errors() {
    let runner = Arc::new(ScriptedRunner::new(vec![err_output(1, b"Access denied")]));
    let err = Systemctl::new(runner).stop("web").await.unwrap_err();
    assert!(err.to_string().contains("Access denied"));
}

#[tokio::test]
async fn detached_restart_does_not_block() {
    let runner = Arc::new(ScriptedRunner::new(vec![ok_output(b"")]));
    Systemctl::new(runner.clone())
        .restart_detached("edgeship-agent")
        .await
        .unwrap();
    assert_eq!(runner.calls(), vec!["systemctl --no-block restart edgeship-agent"]);
}

#[tokio::test]
async fn start_failure_carries_stderr() {
    let runner = Arc::new(ScriptedRunner::new(vec![err_output(
        1,
        b"Job for web.service failed.\n",
    )]));
    let err = Systemctl::new(runner).start("web").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "systemctl start web failed: Job for web.service failed."
    );
}
