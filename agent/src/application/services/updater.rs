//! Application service: the install/update state machine.
//!
//! `Downloading → Installing → Starting`. Every failure is tagged with the
//! phase it happened in. Nothing is rolled back.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use edgeship_common::{AppKey, Artifact};

use crate::application::ports::{AppStore, ArtifactFetcher, HostFs, ServiceManager};
use crate::application::services::resolver::Resolver;
use crate::domain::manifest::{MANIFEST_FILE, find_manifest, validate_env_keys};
use crate::domain::{
    AGENT_MANIFEST, AGENT_UNIT, AgentPaths, InPhase, ManagedAppConfig, Manifest, ManifestError,
    UpdateError, UpdatePhase, render,
};

const UNIT_MODE: u32 = 0o644;
const EXEC_MODE: u32 = 0o755;
const SECRET_MODE: u32 = 0o600;

/// How a successful apply ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The app runs the new build.
    Completed,
    /// The agent queued its own restart. The outcome is reported by the
    /// next process from the self-update marker.
    RestartPending,
}

/// Files rendered into the staging directory.
struct Staged {
    manifest: Manifest,
    unit: PathBuf,
    run_script: PathBuf,
    agent_unit: PathBuf,
}

/// Everything needed to take an artifact from the artifact store to a
/// running systemd unit.
pub struct Deployer {
    paths: AgentPaths,
    self_app: AppKey,
    services: Arc<dyn ServiceManager>,
    resolver: Resolver,
    fetcher: Arc<dyn ArtifactFetcher>,
    fs: Arc<dyn HostFs>,
    apps: Arc<dyn AppStore>,
}

impl Deployer {
    pub fn new(
        paths: AgentPaths,
        self_repo: &str,
        services: Arc<dyn ServiceManager>,
        resolver: Resolver,
        fetcher: Arc<dyn ArtifactFetcher>,
        fs: Arc<dyn HostFs>,
        apps: Arc<dyn AppStore>,
    ) -> Self {
        Self {
            paths,
            self_app: AppKey::new(self_repo, AGENT_MANIFEST),
            services,
            resolver,
            fetcher,
            fs,
            apps,
        }
    }

    pub fn paths(&self) -> &AgentPaths {
        &self.paths
    }

    /// The agent's own `(repo, manifest)`.
    pub fn self_app(&self) -> &AppKey {
        &self.self_app
    }

    pub fn is_self(&self, app: &AppKey) -> bool {
        *app == self.self_app
    }

    pub fn apps(&self) -> &Arc<dyn AppStore> {
        &self.apps
    }

    pub fn services(&self) -> &Arc<dyn ServiceManager> {
        &self.services
    }

    pub fn fs(&self) -> &Arc<dyn HostFs> {
        &self.fs
    }

    // ── Managed apps ──────────────────────────────────────────────────────────

    /// Install or update one managed app.
    ///
    /// # Errors
    ///
    /// Returns the first failing step, tagged with its phase.
    pub async fn apply_app(
        &self,
        artifact: &Artifact,
        config: &ManagedAppConfig,
        want_latest: bool,
    ) -> Result<UpdateOutcome, UpdateError> {
        let app = config.app_key();
        let staging = self.paths.staging_dir(&app);

        let result = self.run_app_phases(artifact, config, want_latest, &staging).await;
        if result.is_err() {
            self.discard_staging(&staging).await;
        }
        result
    }

    async fn run_app_phases(
        &self,
        artifact: &Artifact,
        config: &ManagedAppConfig,
        want_latest: bool,
        staging: &Path,
    ) -> Result<UpdateOutcome, UpdateError> {
        tracing::info!(app = %config.app_key(), sha = %artifact.sha, "downloading");
        self.download(artifact, want_latest, staging)
            .await
            .in_phase(UpdatePhase::Downloading)?;

        tracing::info!(app = %config.app_key(), "installing");
        let staged = self
            .stage(config, &artifact.sha, staging)
            .await
            .in_phase(UpdatePhase::Installing)?;
        let agent_unit_new = self
            .install(&staged, staging)
            .await
            .in_phase(UpdatePhase::Installing)?;

        tracing::info!(app = %config.app_key(), "starting");
        self.start(&staged.manifest, agent_unit_new)
            .await
            .in_phase(UpdatePhase::Starting)?;
        self.fs
            .remove_dir_all(staging)
            .await
            .in_phase(UpdatePhase::Starting)?;
        self.remember_executable(config, &staged.manifest)
            .await
            .in_phase(UpdatePhase::Starting)?;

        tracing::info!(app = %config.app_key(), sha = %artifact.sha, "update complete");
        Ok(UpdateOutcome::Completed)
    }

    async fn download(&self, artifact: &Artifact, want_latest: bool, staging: &Path) -> Result<()> {
        let url = self.resolver.resolve(artifact, want_latest).await?;
        self.fs.remove_dir_all(staging).await?;
        self.fetcher
            .fetch(&url, staging)
            .await
            .with_context(|| format!("fetching {}", artifact.name))
    }

    async fn read_manifest(&self, staging: &Path, name: &str) -> Result<Manifest> {
        let path = staging.join(MANIFEST_FILE);
        let yaml = self
            .fs
            .read_to_string(&path)
            .await?
            .ok_or_else(|| ManifestError::MissingFile(MANIFEST_FILE.to_string()))?;
        Ok(find_manifest(&yaml, name)?)
    }

    /// Validate the manifest and render every file into `staging`.
    async fn stage(&self, config: &ManagedAppConfig, sha: &str, staging: &Path) -> Result<Staged> {
        let manifest = self.read_manifest(staging, &config.manifest_name).await?;
        validate_env_keys(&manifest, &config.env_vars)?;

        let env_path = self.paths.app_env_file(&manifest.name);
        let env = render::app_env_file(&config.env_vars, sha);
        self.fs
            .write_file(&env_path, env.as_bytes(), SECRET_MODE)
            .await
            .with_context(|| format!("writing {}", env_path.display()))?;

        let staged = Staged {
            unit: staging.join(format!("{}.service", manifest.name)),
            run_script: staging.join(format!("run-{}.sh", manifest.name)),
            agent_unit: staging.join(format!("{AGENT_UNIT}.service")),
            manifest,
        };
        let unit = render::service_unit(&staged.manifest, config, &self.paths)?;
        let script = render::run_script(&staged.manifest, &self.paths, sha)?;
        let agent_unit = render::agent_unit(&self.paths)?;

        self.fs.write_file(&staged.unit, unit.as_bytes(), UNIT_MODE).await?;
        self.fs
            .write_file(&staged.run_script, script.as_bytes(), EXEC_MODE)
            .await?;
        self.fs
            .write_file(&staged.agent_unit, agent_unit.as_bytes(), UNIT_MODE)
            .await?;
        Ok(staged)
    }

    /// Stop the app and move staged files into place. Returns whether the
    /// agent unit was installed by this call.
    async fn install(&self, staged: &Staged, staging: &Path) -> Result<bool> {
        let name = &staged.manifest.name;
        self.services.stop(name).await?;

        self.fs
            .place(&staged.unit, &self.paths.unit_file(name), UNIT_MODE)
            .await?;
        self.fs
            .place(&staged.run_script, &self.paths.run_script(name), EXEC_MODE)
            .await?;
        let executable = &staged.manifest.executable;
        self.fs
            .place(
                &staging.join(executable),
                &self.paths.binary(executable),
                EXEC_MODE,
            )
            .await
            .with_context(|| format!("installing binary {executable}"))?;

        let agent_unit_file = self.paths.agent_unit_file();
        if self.fs.exists(&agent_unit_file).await {
            return Ok(false);
        }
        self.fs
            .place(&staged.agent_unit, &agent_unit_file, UNIT_MODE)
            .await?;
        Ok(true)
    }

    async fn start(&self, manifest: &Manifest, agent_unit_new: bool) -> Result<()> {
        self.services.daemon_reload().await?;
        self.services.start(&manifest.name).await?;
        self.services.enable(&manifest.name).await?;
        if agent_unit_new {
            self.services.enable(AGENT_UNIT).await?;
            self.services.start(AGENT_UNIT).await?;
        }
        Ok(())
    }

    /// Uninstall needs the binary name, which only the manifest knows.
    async fn remember_executable(&self, config: &ManagedAppConfig, manifest: &Manifest) -> Result<()> {
        if config.executable == manifest.executable {
            return Ok(());
        }
        let Some(mut current) = self.apps.get(&config.app_key()).await? else {
            return Ok(());
        };
        current.executable.clone_from(&manifest.executable);
        self.apps.save(current).await
    }

    async fn discard_staging(&self, staging: &Path) {
        if let Err(e) = self.fs.remove_dir_all(staging).await {
            tracing::warn!(path = %staging.display(), error = %e, "failed to clean staging directory");
        }
    }

    // ── Self-update ───────────────────────────────────────────────────────────

    /// Replace the agent's own binary and unit, then queue a restart.
    ///
    /// The marker is written just before the restart so the next process
    /// reports the outcome. On failure the marker is removed again.
    ///
    /// # Errors
    ///
    /// Returns the first failing step, tagged with its phase.
    pub async fn apply_self(&self, artifact: &Artifact) -> Result<UpdateOutcome, UpdateError> {
        let staging = self.paths.staging_dir(&self.self_app);
        let marker = self.paths.self_update_marker();

        let result = self.run_self_phases(artifact, &staging, &marker).await;
        if result.is_err() {
            self.discard_staging(&staging).await;
            if let Err(e) = self.fs.remove_file(&marker).await {
                tracing::error!(error = %e, "failed to remove self-update marker");
            }
        }
        result
    }

    async fn run_self_phases(
        &self,
        artifact: &Artifact,
        staging: &Path,
        marker: &Path,
    ) -> Result<UpdateOutcome, UpdateError> {
        tracing::info!(sha = %artifact.sha, "downloading agent update");
        self.download(artifact, false, staging)
            .await
            .in_phase(UpdatePhase::Downloading)?;

        tracing::info!("installing agent update");
        self.install_self(staging)
            .await
            .in_phase(UpdatePhase::Installing)?;

        tracing::info!("restarting agent");
        self.restart_self(artifact, marker)
            .await
            .in_phase(UpdatePhase::Starting)?;
        Ok(UpdateOutcome::RestartPending)
    }

    async fn install_self(&self, staging: &Path) -> Result<()> {
        let manifest = self.read_manifest(staging, AGENT_MANIFEST).await?;
        let unit = render::agent_unit(&self.paths)?;
        let staged_unit = staging.join(format!("{AGENT_UNIT}.service"));
        self.fs
            .write_file(&staged_unit, unit.as_bytes(), UNIT_MODE)
            .await?;

        self.fs
            .place(
                &staging.join(&manifest.executable),
                &self.paths.agent_binary(),
                EXEC_MODE,
            )
            .await
            .context("installing agent binary")?;
        self.fs
            .place(&staged_unit, &self.paths.agent_unit_file(), UNIT_MODE)
            .await?;
        self.services.daemon_reload().await
    }

    async fn restart_self(&self, artifact: &Artifact, marker: &Path) -> Result<()> {
        let record = serde_json::to_vec(artifact).context("encoding self-update marker")?;
        self.fs.write_file(marker, &record, SECRET_MODE).await?;
        self.discard_staging(&self.paths.staging_dir(&self.self_app))
            .await;
        self.services.restart_detached(AGENT_UNIT).await
    }
}
