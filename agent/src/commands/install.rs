//! Install command

use std::collections::BTreeMap;

use anyhow::Result;
use clap::Args;
use edgeship_common::AppKey;
use edgeship_common::keys::validate_app_key;

use crate::app::AppContext;
use crate::application::services::install::install_app;
use crate::domain::{ManagedAppConfig, render};

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Repository publishing the app's builds, e.g. `org/app`
    #[arg(long)]
    pub repo_name: String,

    /// Manifest name inside the build's `.edgeship.yaml`
    #[arg(long)]
    pub manifest_name: String,

    /// User the app's service runs as
    #[arg(long, default_value = "pi")]
    pub app_user: String,

    /// Forward the app's journal to the coordinator
    #[arg(long)]
    pub log_forwarding: bool,

    /// Environment variable for the app, `KEY=VALUE` (repeatable)
    #[arg(long = "env-var", value_parser = parse_env_var)]
    pub env_vars: Vec<(String, String)>,
}

fn parse_env_var(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

impl InstallArgs {
    /// # Errors
    ///
    /// Returns an error if the repository or manifest name is unusable as a
    /// state key.
    pub fn into_config(self) -> Result<ManagedAppConfig> {
        let app = AppKey::new(self.repo_name, self.manifest_name);
        validate_app_key(&app).map_err(|reason| anyhow::anyhow!("invalid app {app}: {reason}"))?;

        let mut config = ManagedAppConfig::new(&app);
        config.app_user = self.app_user;
        config.log_forwarding = self.log_forwarding;
        config.env_vars = self.env_vars.into_iter().collect::<BTreeMap<_, _>>();
        Ok(config)
    }
}

/// Run the install command.
///
/// # Errors
///
/// Returns an error if the app is already installed or the install fails.
pub async fn run(ctx: &AppContext, args: InstallArgs) -> Result<()> {
    let config = args.into_config()?;
    let app = config.app_key();
    let agent_env = render::env_file(&ctx.config.to_env_vars());

    install_app(&ctx.deployer, config, &agent_env).await?;
    println!("{app} installed on {}", ctx.host);
    Ok(())
}
