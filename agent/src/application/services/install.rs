//! Application service: registering and installing a new app.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use anyhow::{Context, Result};
use edgeship_common::Artifact;

use crate::application::services::updater::Deployer;
use crate::domain::{AgentError, ManagedAppConfig};

/// Sha sent for installs, which always take the newest build.
pub const LATEST_SHA: &str = "HEAD";

/// Register `config` and install the newest build of its app.
///
/// Steps:
/// 1. Refuse an app that is already registered
/// 2. Write the agent environment file
/// 3. Register the app
/// 4. Run the update flow for the latest artifact
///
/// # Errors
///
/// Returns [`AgentError::AlreadyInstalled`] for a registered app, or the
/// failing step of the update flow. The app stays registered when the
/// update fails so the next push retries it.
pub async fn install_app(
    deployer: &Deployer,
    config: ManagedAppConfig,
    agent_env: &str,
) -> Result<()> {
    let app = config.app_key();
    if deployer.apps().get(&app).await?.is_some() {
        return Err(AgentError::AlreadyInstalled(app).into());
    }

    let env_path = deployer.paths().agent_env_file();
    deployer
        .fs()
        .write_file(&env_path, agent_env.as_bytes(), 0o600)
        .await
        .with_context(|| format!("writing {}", env_path.display()))?;

    deployer.apps().save(config.clone()).await?;
    tracing::info!(%app, "app registered");

    let artifact = Artifact {
        sha: LATEST_SHA.to_string(),
        repo_name: config.repo_name.clone(),
        name: String::new(),
        archive_download_url: None,
        manifest_name: config.manifest_name.clone(),
    };
    deployer
        .apply_app(&artifact, &config, true)
        .await
        .map_err(AgentError::from)?;
    Ok(())
}
