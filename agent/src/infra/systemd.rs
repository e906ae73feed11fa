//! `ServiceManager` backed by `systemctl`.

use std::process::Output;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::application::ports::{CommandRunner, ServiceManager};

const SYSTEMCTL: &str = "systemctl";

pub struct Systemctl {
    runner: Arc<dyn CommandRunner>,
}

impl Systemctl {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn systemctl(&self, args: &[&str]) -> Result<Output> {
        tracing::debug!(?args, "systemctl");
        self.runner.run(SYSTEMCTL, args).await
    }

    async fn checked(&self, args: &[&str]) -> Result<()> {
        let out = self.systemctl(args).await?;
        if out.status.success() {
            return Ok(());
        }
        bail!(
            "systemctl {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        )
    }
}

/// `systemctl stop` on a unit that does not exist.
fn not_loaded(out: &Output) -> bool {
    let stderr = String::from_utf8_lossy(&out.stderr);
    stderr.contains("not loaded") || stderr.contains("does not exist")
}

#[async_trait]
impl ServiceManager for Systemctl {
    async fn start(&self, unit: &str) -> Result<()> {
        self.checked(&["start", unit]).await
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        let out = self.systemctl(&["stop", unit]).await?;
        if out.status.success() || not_loaded(&out) {
            return Ok(());
        }
        bail!(
            "systemctl stop {unit} failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        )
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.checked(&["restart", unit]).await
    }

    async fn restart_detached(&self, unit: &str) -> Result<()> {
        self.checked(&["--no-block", "restart", unit]).await
    }

    async fn enable(&self, unit: &str) -> Result<()> {
        self.checked(&["enable", unit]).await
    }

    async fn daemon_reload(&self) -> Result<()> {
        self.checked(&["daemon-reload"]).await
    }
}
