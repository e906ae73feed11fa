//! Install/update state machine against a temporary host root.

use edgeship_agent::application::ports::AppStore;
use edgeship_agent::application::services::updater::UpdateOutcome;
use edgeship_agent::domain::UpdatePhase;
use edgeship_common::AppKey;

use crate::mocks::{MockFetcher, MockLookup, MockServices, TestHost, artifact, mode};

const WEB_MANIFEST: &str = "name: web\nexecutable: web-server\nenv:\n  - PORT\n";

fn web_host() -> TestHost {
    TestHost::new(MockFetcher::app(WEB_MANIFEST, "web-server"))
}

#[tokio::test]
async fn fresh_install_places_files_and_starts_units() {
    let host = web_host();
    let config = host.register("org/app", "web", &[("PORT", "8080")]).await;

    let outcome = host
        .deployer
        .apply_app(&artifact("org/app", "web"), &config, false)
        .await
        .unwrap();

    assert_eq!(outcome, UpdateOutcome::Completed);
    let paths = &host.paths;
    assert!(
        std::fs::read_to_string(paths.unit_file("web"))
            .unwrap()
            .contains("ExecStart=")
    );
    assert_eq!(mode(&paths.run_script("web")), 0o755);
    assert_eq!(mode(&paths.binary("web-server")), 0o755);
    assert_eq!(
        std::fs::read_to_string(paths.app_env_file("web")).unwrap(),
        "APP_VERSION=\"0123abcd\"\nPORT=\"8080\"\n"
    );
    assert!(
        std::fs::read_to_string(paths.run_script("web"))
            .unwrap()
            .contains("export APP_VERSION=\"0123abcd\"\n")
    );
    assert_eq!(mode(&paths.app_env_file("web")), 0o600);
    assert!(paths.agent_unit_file().is_file());
    assert!(!paths.staging_dir(&config.app_key()).exists());

    assert_eq!(
        host.services.calls(),
        vec![
            "stop web",
            "daemon-reload",
            "start web",
            "enable web",
            "enable edgeship-agent",
            "start edgeship-agent",
        ]
    );
}

#[tokio::test]
async fn executable_is_remembered_for_uninstall() {
    let host = web_host();
    let config = host.register("org/app", "web", &[("PORT", "8080")]).await;
    assert!(config.executable.is_empty());

    host.deployer
        .apply_app(&artifact("org/app", "web"), &config, false)
        .await
        .unwrap();

    let stored = host
        .apps
        .get(&AppKey::new("org/app", "web"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.executable, "web-server");
}

#[tokio::test]
async fn existing_agent_unit_is_left_alone() {
    let host = web_host();
    let config = host.register("org/app", "web", &[("PORT", "8080")]).await;
    std::fs::create_dir_all(&host.paths.systemd_dir).unwrap();
    std::fs::write(host.paths.agent_unit_file(), "custom").unwrap();

    host.deployer
        .apply_app(&artifact("org/app", "web"), &config, false)
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(host.paths.agent_unit_file()).unwrap(),
        "custom"
    );
    assert!(
        !host
            .services
            .calls()
            .iter()
            .any(|c| c.ends_with("edgeship-agent"))
    );
}

#[tokio::test]
async fn env_mismatch_fails_before_touching_the_service() {
    let host = web_host();
    let config = host.register("org/app", "web", &[]).await;

    let err = host
        .deployer
        .apply_app(&artifact("org/app", "web"), &config, false)
        .await
        .unwrap_err();

    assert_eq!(err.phase, UpdatePhase::Installing);
    assert!(err.to_string().starts_with("installing: env var keys do not match"));
    assert!(host.services.calls().is_empty());
    assert!(!host.paths.unit_file("web").exists());
    assert!(!host.paths.staging_dir(&config.app_key()).exists());
}

#[tokio::test]
async fn missing_manifest_file_is_an_install_error() {
    let host = TestHost::new(MockFetcher::new(&[("web-server", "bin", 0o755)]));
    let config = host.register("org/app", "web", &[]).await;

    let err = host
        .deployer
        .apply_app(&artifact("org/app", "web"), &config, false)
        .await
        .unwrap_err();

    assert_eq!(err.phase, UpdatePhase::Installing);
    assert!(err.message.contains(".edgeship.yaml"));
}

#[tokio::test]
async fn unknown_manifest_name_is_an_install_error() {
    let host = web_host();
    let config = host.register("org/app", "worker", &[]).await;

    let err = host
        .deployer
        .apply_app(&artifact("org/app", "worker"), &config, false)
        .await
        .unwrap_err();

    assert_eq!(err.phase, UpdatePhase::Installing);
    assert!(err.message.contains("manifest 'worker' not found"));
}

#[tokio::test]
async fn lookup_failure_is_a_download_error() {
    let host = TestHost::with(
        MockFetcher::app(WEB_MANIFEST, "web-server"),
        MockServices::default(),
        MockLookup {
            fail: true,
            ..MockLookup::default()
        },
    );
    let config = host.register("org/app", "web", &[("PORT", "1")]).await;

    let err = host
        .deployer
        .apply_app(&artifact("org/app", "web"), &config, false)
        .await
        .unwrap_err();

    assert_eq!(err.phase, UpdatePhase::Downloading);
    assert!(err.message.contains("after 1 attempts"));
    assert_eq!(host.fetcher.fetches.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn start_failure_is_a_starting_error() {
    let host = TestHost::with(
        MockFetcher::app(WEB_MANIFEST, "web-server"),
        MockServices::failing("start web"),
        MockLookup::default(),
    );
    let config = host.register("org/app", "web", &[("PORT", "1")]).await;

    let err = host
        .deployer
        .apply_app(&artifact("org/app", "web"), &config, false)
        .await
        .unwrap_err();

    assert_eq!(err.phase, UpdatePhase::Starting);
    assert_eq!(err.to_string(), "starting: start web failed");
    // Files stay where they were placed.
    assert!(host.paths.binary("web-server").is_file());
}

#[tokio::test]
async fn executable_outside_the_base_directory_is_refused() {
    let host = TestHost::new(MockFetcher::new(&[
        (".edgeship.yaml", "name: web\nexecutable: ../escape\n", 0o644),
        ("web-server", "bin", 0o755),
    ]));
    let config = host.register("org/app", "web", &[]).await;

    let err = host
        .deployer
        .apply_app(&artifact("org/app", "web"), &config, false)
        .await
        .unwrap_err();

    assert_eq!(err.phase, UpdatePhase::Installing);
    assert!(err.message.contains("must be a plain file name"), "{}", err.message);
    assert!(host.services.calls().is_empty());
    assert!(!host.paths.base_dir.parent().unwrap().join("escape").exists());
}
