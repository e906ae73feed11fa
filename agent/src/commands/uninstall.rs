//! Uninstall command

use anyhow::Result;
use clap::Args;
use edgeship_common::AppKey;

use crate::app::AppContext;
use crate::application::services::uninstall::{uninstall_all, uninstall_app};

#[derive(Args, Debug)]
pub struct UninstallArgs {
    /// Remove every app and the agent itself
    #[arg(long, conflicts_with_all = ["repo_name", "manifest_name"])]
    pub all: bool,

    /// Repository of the app to remove
    #[arg(long, required_unless_present = "all", requires = "manifest_name")]
    pub repo_name: Option<String>,

    /// Manifest name of the app to remove
    #[arg(long, required_unless_present = "all", requires = "repo_name")]
    pub manifest_name: Option<String>,
}

/// Run the uninstall command.
///
/// # Errors
///
/// Returns an error if the app is not managed or a removal step fails.
pub async fn run(ctx: &AppContext, args: &UninstallArgs) -> Result<()> {
    if args.all {
        uninstall_all(&ctx.deployer).await?;
        println!("edgeship agent and all apps removed from {}", ctx.host);
        return Ok(());
    }

    let (Some(repo), Some(manifest)) = (&args.repo_name, &args.manifest_name) else {
        anyhow::bail!("--repo-name and --manifest-name are required without --all");
    };
    let app = AppKey::new(repo, manifest);
    uninstall_app(&ctx.deployer, &app).await?;
    println!("{app} removed from {}", ctx.host);
    Ok(())
}
