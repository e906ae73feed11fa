//! Shared test helpers: hand-written port mocks and a rooted test host.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use edgeship_agent::application::ports::{
    AppStore, ArtifactFetcher, ArtifactLookup, CommandRunner, LogSource, ServiceManager,
};
use edgeship_agent::application::services::resolver::Resolver;
use edgeship_agent::application::services::updater::Deployer;
use edgeship_agent::domain::{AgentPaths, ManagedAppConfig};
use edgeship_agent::infra::app_store::YamlAppStore;
use edgeship_agent::infra::fs::LocalFs;
use edgeship_common::{AppKey, Artifact};
use tokio::sync::mpsc;

pub const SELF_REPO: &str = "edgeship/edgeship";

// ── Output constructors ──────────────────────────────────────────────────────

pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(code << 8)
}

pub fn ok_output(stdout: &[u8]) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.to_vec(),
        stderr: Vec::new(),
    }
}

pub fn err_output(code: i32, stderr: &[u8]) -> Output {
    Output {
        status: exit_status(code),
        stdout: Vec::new(),
        stderr: stderr.to_vec(),
    }
}

// ── Command runner ───────────────────────────────────────────────────────────

/// Returns queued outputs in order and records every invocation.
#[derive(Default)]
pub struct ScriptedRunner {
    outputs: Mutex<VecDeque<Output>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(outputs: Vec<Output>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{program} {}", args.join(" ")));
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("unexpected call: {program} {args:?}"))
    }

    fn spawn_piped(&self, program: &str, _: &[&str]) -> Result<tokio::process::Child> {
        anyhow::bail!("spawn of {program} not expected in this test")
    }
}

// ── Service manager ──────────────────────────────────────────────────────────

/// Records calls as `"<verb> <unit>"`; fails calls listed in `fail`.
#[derive(Default)]
pub struct MockServices {
    calls: Mutex<Vec<String>>,
    fail: Mutex<Vec<String>>,
}

impl MockServices {
    pub fn failing(call: &str) -> Self {
        let services = Self::default();
        services.fail.lock().unwrap().push(call.to_string());
        services
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<()> {
        let failing = self.fail.lock().unwrap().contains(&call);
        self.calls.lock().unwrap().push(call.clone());
        if failing {
            anyhow::bail!("{call} failed");
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for MockServices {
    async fn start(&self, unit: &str) -> Result<()> {
        self.record(format!("start {unit}"))
    }
    async fn stop(&self, unit: &str) -> Result<()> {
        self.record(format!("stop {unit}"))
    }
    async fn restart(&self, unit: &str) -> Result<()> {
        self.record(format!("restart {unit}"))
    }
    async fn restart_detached(&self, unit: &str) -> Result<()> {
        self.record(format!("restart-detached {unit}"))
    }
    async fn enable(&self, unit: &str) -> Result<()> {
        self.record(format!("enable {unit}"))
    }
    async fn daemon_reload(&self) -> Result<()> {
        self.record("daemon-reload".to_string())
    }
}

// ── Artifact lookup and fetch ────────────────────────────────────────────────

/// Always finds the artifact, or always fails when `fail` is set.
#[derive(Default)]
pub struct MockLookup {
    pub fail: bool,
    pub requests: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl ArtifactLookup for MockLookup {
    async fn find(&self, artifact: &Artifact, want_latest: bool) -> Result<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .push((artifact.name.clone(), want_latest));
        if self.fail {
            anyhow::bail!("artifact API unavailable");
        }
        Ok(Some(format!("https://dl/{}.zip", artifact.repo_name)))
    }
}

/// "Downloads" by writing a fixed file set into the destination.
pub struct MockFetcher {
    files: BTreeMap<String, (Vec<u8>, u32)>,
    delay: Duration,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl MockFetcher {
    pub fn new(files: &[(&str, &str, u32)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(name, body, mode)| ((*name).to_string(), (body.as_bytes().to_vec(), *mode)))
                .collect(),
            delay: Duration::ZERO,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// A build of one app with a single manifest.
    pub fn app(manifest_yaml: &str, executable: &str) -> Self {
        Self::new(&[
            (".edgeship.yaml", manifest_yaml, 0o644),
            (executable, "#!/bin/sh\necho hi\n", 0o755),
        ])
    }

    pub fn agent() -> Self {
        Self::app(
            "name: edgeship-agent\nexecutable: edgeship-agent\n",
            "edgeship-agent",
        )
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ArtifactFetcher for MockFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        std::fs::create_dir_all(dest)?;
        for (name, (body, mode)) in &self.files {
            use std::os::unix::fs::PermissionsExt;
            let path = dest.join(name);
            std::fs::write(&path, body)?;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(*mode))?;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Log source ───────────────────────────────────────────────────────────────

/// Emits fixed journal entries, then ends.
pub struct MockJournal {
    pub entries: Vec<String>,
}

#[async_trait]
impl LogSource for MockJournal {
    async fn follow(&self, _unit: &str, lines: mpsc::Sender<String>) -> Result<()> {
        for entry in &self.entries {
            lines.send(entry.clone()).await?;
        }
        Ok(())
    }
}

// ── Test host ────────────────────────────────────────────────────────────────

/// A deployer wired to mocks over a temporary root directory.
pub struct TestHost {
    pub root: tempfile::TempDir,
    pub paths: AgentPaths,
    pub services: Arc<MockServices>,
    pub lookup: Arc<MockLookup>,
    pub fetcher: Arc<MockFetcher>,
    pub fs: Arc<LocalFs>,
    pub apps: Arc<YamlAppStore>,
    pub deployer: Arc<Deployer>,
}

impl TestHost {
    pub fn new(fetcher: MockFetcher) -> Self {
        Self::with(fetcher, MockServices::default(), MockLookup::default())
    }

    pub fn with(fetcher: MockFetcher, services: MockServices, lookup: MockLookup) -> Self {
        let root = tempfile::tempdir().unwrap();
        let paths = AgentPaths::rooted_at(root.path());
        let services = Arc::new(services);
        let lookup = Arc::new(lookup);
        let fetcher = Arc::new(fetcher);
        let fs = Arc::new(LocalFs::default());
        let apps = Arc::new(YamlAppStore::new(paths.apps_file(), fs.clone()));

        let deployer = Arc::new(Deployer::new(
            paths.clone(),
            SELF_REPO,
            services.clone(),
            Resolver::with_schedule(lookup.clone(), vec![Duration::ZERO]),
            fetcher.clone(),
            fs.clone(),
            apps.clone(),
        ));

        Self {
            root,
            paths,
            services,
            lookup,
            fetcher,
            fs,
            apps,
            deployer,
        }
    }

    /// Register an app the way `install` does.
    pub async fn register(&self, repo: &str, manifest: &str, env: &[(&str, &str)]) -> ManagedAppConfig {
        let mut config = ManagedAppConfig::new(&AppKey::new(repo, manifest));
        config.env_vars = env
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.apps.save(config.clone()).await.unwrap();
        config
    }
}

pub fn artifact(repo: &str, manifest: &str) -> Artifact {
    Artifact {
        sha: "0123abcd".into(),
        repo_name: repo.into(),
        name: "build-42".into(),
        archive_download_url: None,
        manifest_name: manifest.into(),
    }
}

pub fn self_artifact() -> Artifact {
    artifact(SELF_REPO, "edgeship-agent")
}

pub fn mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}
