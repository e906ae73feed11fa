//! CLI argument parsing with clap derive

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Per-host deployment agent
#[derive(Parser)]
#[command(
    name = "edgeship-agent",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register an app and install its latest build
    Install(commands::install::InstallArgs),

    /// Run the agent: apply pushed builds, report status and heartbeats
    Update,

    /// Remove an app, or everything with --all
    Uninstall(commands::uninstall::UninstallArgs),

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is missing or the command fails.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Version => {
                commands::version::run();
                Ok(())
            }
            Command::Install(args) => {
                let ctx = crate::app::AppContext::from_env()?;
                commands::install::run(&ctx, args).await
            }
            Command::Update => {
                let ctx = crate::app::AppContext::from_env()?;
                commands::update::run(&ctx).await
            }
            Command::Uninstall(args) => {
                let ctx = crate::app::AppContext::from_env()?;
                commands::uninstall::run(&ctx, &args).await
            }
        }
    }
}
