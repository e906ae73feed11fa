//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and shared payload types,
//! never from `crate::infra` or `crate::commands`.

use std::path::Path;
use std::process::Output;

use anyhow::Result;
use async_trait::async_trait;
use edgeship_common::{AppKey, Artifact};
use tokio::sync::mpsc;

use crate::domain::ManagedAppConfig;

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion and capture its output. A program that
    /// outlives the runner's timeout is killed.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;

    /// Spawn a long-running program with stdout piped.
    fn spawn_piped(&self, program: &str, args: &[&str]) -> Result<tokio::process::Child>;
}

// ── Service Manager Port ──────────────────────────────────────────────────────

/// OS service control for managed apps and the agent itself.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn start(&self, unit: &str) -> Result<()>;
    /// Stopping a unit that is not loaded succeeds.
    async fn stop(&self, unit: &str) -> Result<()>;
    async fn restart(&self, unit: &str) -> Result<()>;
    /// Queue a restart without waiting for it. Used when the caller runs
    /// inside the unit being restarted.
    async fn restart_detached(&self, unit: &str) -> Result<()>;
    async fn enable(&self, unit: &str) -> Result<()>;
    async fn daemon_reload(&self) -> Result<()>;
}

// ── Artifact Ports ────────────────────────────────────────────────────────────

/// Finds the download URL of a build.
#[async_trait]
pub trait ArtifactLookup: Send + Sync {
    /// `Ok(None)` when the build is not listed (yet).
    async fn find(&self, artifact: &Artifact, want_latest: bool) -> Result<Option<String>>;
}

/// Downloads an archive and unpacks it.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

// ── Log Source Port ───────────────────────────────────────────────────────────

/// Follows the output of a unit.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Send each raw journal entry to `lines` until the source ends or the
    /// receiver is dropped.
    async fn follow(&self, unit: &str, lines: mpsc::Sender<String>) -> Result<()>;
}

// ── State and Filesystem Ports ────────────────────────────────────────────────

/// The managed-app file. Every call re-reads it.
#[async_trait]
pub trait AppStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ManagedAppConfig>>;
    async fn get(&self, app: &AppKey) -> Result<Option<ManagedAppConfig>>;
    /// Insert or replace.
    async fn save(&self, config: ManagedAppConfig) -> Result<()>;
    /// Returns the removed entry.
    async fn remove(&self, app: &AppKey) -> Result<Option<ManagedAppConfig>>;
}

/// Host filesystem operations used while installing.
#[async_trait]
pub trait HostFs: Send + Sync {
    /// Write `contents` to `path` atomically with the given mode.
    async fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()>;
    /// Copy `src` to `dest` atomically, setting mode and the configured owner.
    async fn place(&self, src: &Path, dest: &Path, mode: u32) -> Result<()>;
    async fn read_to_string(&self, path: &Path) -> Result<Option<String>>;
    async fn exists(&self, path: &Path) -> bool;
    /// Removing a missing file succeeds.
    async fn remove_file(&self, path: &Path) -> Result<()>;
    /// Removing a missing directory succeeds.
    async fn remove_dir_all(&self, path: &Path) -> Result<()>;
}
