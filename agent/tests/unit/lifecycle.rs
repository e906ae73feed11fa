//! CLI-level use-cases: install, uninstall and uninstall --all.

use edgeship_agent::application::ports::AppStore;
use edgeship_agent::application::services::install::install_app;
use edgeship_agent::application::services::uninstall::{uninstall_all, uninstall_app};
use edgeship_agent::domain::{AgentError, ManagedAppConfig};
use edgeship_common::AppKey;

use crate::mocks::{MockFetcher, TestHost};

const WEB_MANIFEST: &str = "name: web\nexecutable: web-server\n";

fn web() -> AppKey {
    AppKey::new("org/app", "web")
}

async fn installed_host() -> TestHost {
    let host = TestHost::new(MockFetcher::app(WEB_MANIFEST, "web-server"));
    install_app(&host.deployer, ManagedAppConfig::new(&web()), "EDGESHIP_AGENT_HOST=\"pi-1\"\n")
        .await
        .unwrap();
    host
}

#[tokio::test]
async fn install_registers_and_deploys_latest() {
    let host = installed_host().await;

    assert_eq!(
        std::fs::read_to_string(host.paths.agent_env_file()).unwrap(),
        "EDGESHIP_AGENT_HOST=\"pi-1\"\n"
    );
    let stored = host.apps.get(&web()).await.unwrap().unwrap();
    assert_eq!(stored.executable, "web-server");
    assert_eq!(*host.lookup.requests.lock().unwrap(), vec![(String::new(), true)]);
    assert!(host.paths.binary("web-server").is_file());
}

#[tokio::test]
async fn install_refuses_a_registered_app() {
    let host = installed_host().await;

    let err = install_app(&host.deployer, ManagedAppConfig::new(&web()), "")
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<AgentError>(),
        Some(AgentError::AlreadyInstalled(app)) if *app == web()
    ));
}

#[tokio::test]
async fn uninstall_removes_files_and_registration() {
    let host = installed_host().await;
    let before = host.services.calls().len();

    uninstall_app(&host.deployer, &web()).await.unwrap();

    let paths = &host.paths;
    assert!(!paths.unit_file("web").exists());
    assert!(!paths.binary("web-server").exists());
    assert!(!paths.app_env_file("web").exists());
    assert!(!paths.run_script("web").exists());
    assert!(host.apps.get(&web()).await.unwrap().is_none());
    assert_eq!(
        host.services.calls()[before..],
        ["stop web", "daemon-reload", "restart edgeship-agent"]
    );
}

#[tokio::test]
async fn uninstall_of_unknown_app_fails() {
    let host = TestHost::new(MockFetcher::agent());
    let err = uninstall_app(&host.deployer, &web()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AgentError>(),
        Some(AgentError::NotManaged(_))
    ));
}

#[tokio::test]
async fn uninstall_all_removes_the_agent_too() {
    let host = installed_host().await;
    let before = host.services.calls().len();

    uninstall_all(&host.deployer).await.unwrap();

    assert!(!host.paths.base_dir.exists());
    assert!(!host.paths.agent_unit_file().exists());
    assert!(!host.paths.unit_file("web").exists());
    assert_eq!(
        host.services.calls()[before..],
        ["stop web", "stop edgeship-agent", "daemon-reload"]
    );
}
