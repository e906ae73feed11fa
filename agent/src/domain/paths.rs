//! Where the agent keeps things on the host.

use std::path::{Path, PathBuf};

use edgeship_common::AppKey;

/// Manifest name the agent's own artifact is published under.
pub const AGENT_MANIFEST: &str = "edgeship-agent";

/// systemd unit name of the agent.
pub const AGENT_UNIT: &str = "edgeship-agent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    pub base_dir: PathBuf,
    pub systemd_dir: PathBuf,
    pub download_root: PathBuf,
}

impl Default for AgentPaths {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/opt/edgeship"),
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            download_root: std::env::temp_dir(),
        }
    }
}

impl AgentPaths {
    /// All three roots under one directory. Used by tests and dry runs.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            base_dir: root.join("opt/edgeship"),
            systemd_dir: root.join("etc/systemd/system"),
            download_root: root.join("tmp"),
        }
    }

    pub fn self_update_marker(&self) -> PathBuf {
        self.base_dir.join(".self-update-in-progress")
    }

    pub fn apps_file(&self) -> PathBuf {
        self.base_dir.join(".edgeship.apps.yaml")
    }

    pub fn agent_env_file(&self) -> PathBuf {
        self.base_dir.join(".edgeship-agent.env")
    }

    pub fn agent_binary(&self) -> PathBuf {
        self.base_dir.join(AGENT_MANIFEST)
    }

    pub fn agent_unit_file(&self) -> PathBuf {
        self.systemd_dir.join(format!("{AGENT_UNIT}.service"))
    }

    pub fn app_env_file(&self, manifest_name: &str) -> PathBuf {
        self.base_dir.join(format!(".{manifest_name}.env"))
    }

    pub fn run_script(&self, manifest_name: &str) -> PathBuf {
        self.base_dir.join(format!("run-{manifest_name}.sh"))
    }

    pub fn binary(&self, executable: &str) -> PathBuf {
        self.base_dir.join(executable)
    }

    pub fn unit_file(&self, manifest_name: &str) -> PathBuf {
        self.systemd_dir.join(format!("{manifest_name}.service"))
    }

    /// Scratch directory an artifact is unpacked into.
    pub fn staging_dir(&self, app: &AppKey) -> PathBuf {
        self.download_root.join(format!(
            "edgeship-{}-{}",
            app.repo_name.replace('/', "_"),
            app.manifest_name
        ))
    }
}
