//! Application context: the production wiring of every port.
//!
//! Built once per command from [`AgentConfig`] and handed to the command
//! handlers.

use std::sync::Arc;

use anyhow::Result;

use crate::application::ports::{CommandRunner, HostFs};
use crate::application::services::resolver::Resolver;
use crate::application::services::updater::Deployer;
use crate::config::AgentConfig;
use crate::domain::AgentPaths;
use crate::infra::app_store::YamlAppStore;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::download::ZipFetcher;
use crate::infra::fs::LocalFs;
use crate::infra::github::GithubArtifacts;
use crate::infra::journal::Journalctl;
use crate::infra::systemd::Systemctl;

pub struct AppContext {
    pub config: AgentConfig,
    pub host: String,
    pub runner: Arc<dyn CommandRunner>,
    pub fs: Arc<dyn HostFs>,
    pub deployer: Arc<Deployer>,
}

impl AppContext {
    /// # Errors
    ///
    /// Returns an error if configuration is missing or invalid.
    pub fn from_env() -> Result<Self> {
        Self::new(AgentConfig::from_env()?, AgentPaths::default())
    }

    /// # Errors
    ///
    /// Returns an error if the hostname or the HTTP clients cannot be set up.
    pub fn new(config: AgentConfig, paths: AgentPaths) -> Result<Self> {
        let host = config.hostname()?;
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::default());
        let fs: Arc<dyn HostFs> = Arc::new(LocalFs::new(config.owner()));

        let lookup = Arc::new(GithubArtifacts::new(&config.github_api, &config.github_token)?);
        let fetcher = Arc::new(ZipFetcher::new(&config.github_token)?);
        let apps = Arc::new(YamlAppStore::new(paths.apps_file(), Arc::clone(&fs)));

        let deployer = Arc::new(Deployer::new(
            paths,
            &config.self_repo,
            Arc::new(Systemctl::new(Arc::clone(&runner))),
            Resolver::new(lookup),
            fetcher,
            Arc::clone(&fs),
            apps,
        ));

        Ok(Self {
            config,
            host,
            runner,
            fs,
            deployer,
        })
    }

    pub fn journal(&self) -> Arc<Journalctl> {
        Arc::new(Journalctl::new(Arc::clone(&self.runner)))
    }
}
