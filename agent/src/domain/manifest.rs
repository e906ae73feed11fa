//! Deployment manifest bundled in every artifact.
//!
//! The file holds one YAML document per app. Optional systemd settings fall
//! back to defaults.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::domain::error::ManifestError;

/// Name of the manifest file at the root of every artifact.
pub const MANIFEST_FILE: &str = ".edgeship.yaml";

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    name: Option<String>,
    executable: Option<String>,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    systemd: RawSystemd,
}

#[derive(Debug, Default, Deserialize)]
struct RawSystemd {
    #[serde(rename = "Unit", default)]
    unit: RawUnit,
    #[serde(rename = "Service", default)]
    service: RawService,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawUnit {
    description: Option<String>,
    after: Option<Vec<String>>,
    requires: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawService {
    timeout_start_sec: Option<u32>,
    restart: Option<String>,
    restart_sec: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSettings {
    pub description: String,
    pub after: Vec<String>,
    pub requires: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub timeout_start_sec: u32,
    pub restart: String,
    pub restart_sec: u32,
}

/// One app's manifest with every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub executable: String,
    pub env: Vec<String>,
    pub unit: UnitSettings,
    pub service: ServiceSettings,
}

fn required(value: Option<String>, index: usize, field: &'static str) -> Result<String, ManifestError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ManifestError::MissingField { index, field })
}

/// The executable lands in the agent's base directory, so it must be a
/// single path component.
fn plain_file_name(executable: &str) -> bool {
    !matches!(executable, "." | "..") && !executable.contains(['/', '\\', '\0'])
}

impl Manifest {
    fn from_raw(raw: RawManifest, index: usize) -> Result<Self, ManifestError> {
        let name = required(raw.name, index, "name")?;
        let executable = required(raw.executable, index, "executable")?;
        if !plain_file_name(&executable) {
            return Err(ManifestError::InvalidExecutable { name, executable });
        }
        let RawSystemd { unit, service } = raw.systemd;

        Ok(Self {
            unit: UnitSettings {
                description: unit.description.unwrap_or_else(|| name.clone()),
                after: unit.after.unwrap_or_else(|| {
                    vec![
                        "systemd-journald.service".to_string(),
                        "network.target".to_string(),
                    ]
                }),
                requires: unit
                    .requires
                    .unwrap_or_else(|| vec!["systemd-journald.service".to_string()]),
            },
            service: ServiceSettings {
                timeout_start_sec: service.timeout_start_sec.unwrap_or(0),
                restart: service.restart.unwrap_or_else(|| "on-failure".to_string()),
                restart_sec: service.restart_sec.unwrap_or(5),
            },
            name,
            executable,
            env: raw.env,
        })
    }
}

/// Parse every document in a manifest file. Empty documents are skipped.
pub fn parse_manifests(yaml: &str) -> Result<Vec<Manifest>, ManifestError> {
    let mut manifests = Vec::new();
    let mut seen = HashSet::new();

    for (index, document) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let Some(raw) = Option::<RawManifest>::deserialize(document)? else {
            continue;
        };
        let manifest = Manifest::from_raw(raw, index)?;
        if !seen.insert(manifest.name.clone()) {
            return Err(ManifestError::Duplicate(manifest.name));
        }
        manifests.push(manifest);
    }
    Ok(manifests)
}

/// Parse the file and return the manifest called `name`.
pub fn find_manifest(yaml: &str, name: &str) -> Result<Manifest, ManifestError> {
    parse_manifests(yaml)?
        .into_iter()
        .find(|m| m.name == name)
        .ok_or_else(|| ManifestError::NotFound(name.to_string()))
}

/// The manifest's declared env keys must equal the configured keys.
pub fn validate_env_keys(
    manifest: &Manifest,
    configured: &BTreeMap<String, String>,
) -> Result<(), ManifestError> {
    let mut expected: Vec<&str> = manifest.env.iter().map(String::as_str).collect();
    expected.sort_unstable();
    expected.dedup();
    let actual: Vec<&str> = configured.keys().map(String::as_str).collect();

    if expected == actual {
        Ok(())
    } else {
        Err(ManifestError::EnvMismatch {
            expected: expected.join(", "),
            configured: actual.join(", "),
        })
    }
}
