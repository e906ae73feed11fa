//! `LogSource` backed by `journalctl --follow`.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::application::ports::{CommandRunner, LogSource};

pub struct Journalctl {
    runner: Arc<dyn CommandRunner>,
}

impl Journalctl {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl LogSource for Journalctl {
    async fn follow(&self, unit: &str, lines: mpsc::Sender<String>) -> Result<()> {
        let mut child = self.runner.spawn_piped(
            "journalctl",
            &["-u", unit, "-f", "-n", "0", "--output", "json"],
        )?;
        let stdout = child
            .stdout
            .take()
            .context("journalctl stdout not captured")?;

        let mut reader = BufReader::new(stdout).lines();
        while let Some(line) = reader.next_line().await.context("reading journal")? {
            if lines.send(line).await.is_err() {
                break;
            }
        }

        let _ = child.kill().await;
        Ok(())
    }
}
