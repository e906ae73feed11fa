//! Text of the files the agent installs: systemd units, run scripts and
//! environment files.

use std::collections::BTreeMap;

use crate::domain::apps::ManagedAppConfig;
use crate::domain::error::EmptyRender;
use crate::domain::manifest::Manifest;
use crate::domain::paths::AgentPaths;

/// Variable that carries the deployed commit SHA into the app.
pub const APP_VERSION_VAR: &str = "APP_VERSION";

fn non_empty(what: &'static str, text: String) -> Result<String, EmptyRender> {
    if text.trim().is_empty() {
        Err(EmptyRender(what))
    } else {
        Ok(text)
    }
}

/// systemd unit for one managed app.
pub fn service_unit(
    manifest: &Manifest,
    config: &ManagedAppConfig,
    paths: &AgentPaths,
) -> Result<String, EmptyRender> {
    if manifest.executable.trim().is_empty() {
        return Err(EmptyRender("service unit"));
    }
    let mut unit = format!("[Unit]\nDescription={}\n", manifest.unit.description);
    if !manifest.unit.after.is_empty() {
        unit.push_str(&format!("After={}\n", manifest.unit.after.join(" ")));
    }
    if !manifest.unit.requires.is_empty() {
        unit.push_str(&format!("Requires={}\n", manifest.unit.requires.join(" ")));
    }
    unit.push_str(&format!(
        "\n\
         [Service]\n\
         TimeoutStartSec={timeout}\n\
         User={user}\n\
         EnvironmentFile={env}\n\
         ExecStart={script}\n\
         Restart={restart}\n\
         RestartSec={restart_sec}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        timeout = manifest.service.timeout_start_sec,
        user = config.app_user,
        env = paths.app_env_file(&manifest.name).display(),
        script = paths.run_script(&manifest.name).display(),
        restart = manifest.service.restart,
        restart_sec = manifest.service.restart_sec,
    ));
    non_empty("service unit", unit)
}

/// Script the app unit executes. `version` is the commit SHA of the build.
pub fn run_script(
    manifest: &Manifest,
    paths: &AgentPaths,
    version: &str,
) -> Result<String, EmptyRender> {
    if manifest.executable.trim().is_empty() {
        return Err(EmptyRender("run script"));
    }
    non_empty(
        "run script",
        format!(
            "#!/usr/bin/env bash\nset -euo pipefail\n\nexport {APP_VERSION_VAR}={version}\nexec {bin}\n",
            version = quote(version),
            bin = paths.binary(&manifest.executable).display()
        ),
    )
}

/// systemd unit for the agent itself.
pub fn agent_unit(paths: &AgentPaths) -> Result<String, EmptyRender> {
    non_empty(
        "agent unit",
        format!(
            "[Unit]\n\
             Description=edgeship agent\n\
             After=network-online.target\n\
             Wants=network-online.target\n\
             \n\
             [Service]\n\
             EnvironmentFile={env}\n\
             ExecStart={bin} update\n\
             Restart=always\n\
             RestartSec=5\n\
             User=root\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            env = paths.agent_env_file().display(),
            bin = paths.agent_binary().display(),
        ),
    )
}

fn quote(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

/// `KEY="value"` lines readable by systemd's `EnvironmentFile=`.
pub fn env_file(vars: &BTreeMap<String, String>) -> String {
    vars.iter()
        .map(|(key, value)| format!("{key}={}\n", quote(value)))
        .collect()
}

/// Environment file of one app: its configured vars plus the build version.
pub fn app_env_file(vars: &BTreeMap<String, String>, version: &str) -> String {
    let mut vars = vars.clone();
    vars.insert(APP_VERSION_VAR.to_string(), version.to_string());
    env_file(&vars)
}
