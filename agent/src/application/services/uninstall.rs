//! Application service: removing apps and the agent.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use anyhow::{Context, Result};
use edgeship_common::AppKey;

use crate::application::services::updater::Deployer;
use crate::domain::{AGENT_UNIT, AgentError, ManagedAppConfig};

async fn remove_files(deployer: &Deployer, config: &ManagedAppConfig) -> Result<()> {
    let paths = deployer.paths();
    let name = &config.manifest_name;

    deployer
        .services()
        .stop(name)
        .await
        .with_context(|| format!("stopping {name}"))?;

    let fs = deployer.fs();
    fs.remove_file(&paths.unit_file(name)).await?;
    if !config.executable.is_empty() {
        fs.remove_file(&paths.binary(&config.executable)).await?;
    }
    fs.remove_file(&paths.app_env_file(name)).await?;
    fs.remove_file(&paths.run_script(name)).await?;
    Ok(())
}

/// Stop one app, delete its files, unregister it and restart the agent.
///
/// # Errors
///
/// Returns [`AgentError::NotManaged`] for an unknown app, or the first
/// failing step.
pub async fn uninstall_app(deployer: &Deployer, app: &AppKey) -> Result<()> {
    let config = deployer
        .apps()
        .get(app)
        .await?
        .ok_or_else(|| AgentError::NotManaged(app.clone()))?;

    remove_files(deployer, &config).await?;
    deployer.apps().remove(app).await?;
    tracing::info!(%app, "app removed");

    let services = deployer.services();
    services.daemon_reload().await?;
    services
        .restart(AGENT_UNIT)
        .await
        .context("restarting agent")?;
    Ok(())
}

/// Remove every app, then the agent unit and the agent directory.
///
/// # Errors
///
/// Returns the first failing step. Apps removed before the failure stay
/// removed.
pub async fn uninstall_all(deployer: &Deployer) -> Result<()> {
    for config in deployer.apps().list().await? {
        let app = config.app_key();
        remove_files(deployer, &config).await?;
        deployer.apps().remove(&app).await?;
        tracing::info!(%app, "app removed");
    }

    let services = deployer.services();
    services.stop(AGENT_UNIT).await.context("stopping agent")?;

    let paths = deployer.paths();
    let fs = deployer.fs();
    fs.remove_file(&paths.agent_unit_file()).await?;
    services.daemon_reload().await?;
    fs.remove_dir_all(&paths.base_dir)
        .await
        .with_context(|| format!("removing {}", paths.base_dir.display()))?;
    tracing::info!("agent removed");
    Ok(())
}
