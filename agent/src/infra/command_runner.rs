//! Infrastructure implementation of the `CommandRunner` port.
//!
//! Short-lived calls (`systemctl`) run under a timeout; the child is killed
//! when the timeout drops it. Long-lived followers (`journalctl -f`) are
//! spawned with stdout piped and live as long as their handle.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::application::ports::CommandRunner;

/// Default timeout for `systemctl` calls.
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(90);

pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CMD_TIMEOUT)
    }
}

fn command(program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        let child = command(program, args)
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("{program} timed out after {}s", self.timeout.as_secs()))?
            .with_context(|| format!("waiting for {program}"))
    }

    fn spawn_piped(&self, program: &str, args: &[&str]) -> Result<Child> {
        command(program, args)
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))
    }
}
