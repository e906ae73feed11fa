//! Typed domain error enums.
//!
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use std::fmt;

use edgeship_common::AppKey;
use thiserror::Error;

// ── Manifest errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest file {0} not found in artifact")]
    MissingFile(String),

    #[error("invalid manifest YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("manifest document {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("manifest '{name}' executable '{executable}' must be a plain file name")]
    InvalidExecutable { name: String, executable: String },

    #[error("duplicate manifest name '{0}'")]
    Duplicate(String),

    #[error("manifest '{0}' not found")]
    NotFound(String),

    #[error("env var keys do not match manifest: manifest declares [{expected}], configured [{configured}]")]
    EnvMismatch { expected: String, configured: String },
}

// ── Render errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("rendered {0} is empty")]
pub struct EmptyRender(pub &'static str);

// ── Resolver errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("artifact lookup failed after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: String },
}

// ── Update errors ─────────────────────────────────────────────────────────────

/// Phase of the install/update state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Downloading,
    Installing,
    Starting,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Starting => "starting",
        })
    }
}

/// A failed install/update, tagged with the phase it failed in.
#[derive(Debug, Error)]
#[error("{phase}: {message}")]
pub struct UpdateError {
    pub phase: UpdatePhase,
    pub message: String,
}

impl UpdateError {
    pub fn new(phase: UpdatePhase, err: &anyhow::Error) -> Self {
        Self {
            phase,
            message: format!("{err:#}"),
        }
    }
}

/// Attach an [`UpdatePhase`] to any fallible step.
pub trait InPhase<T> {
    fn in_phase(self, phase: UpdatePhase) -> Result<T, UpdateError>;
}

impl<T, E> InPhase<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn in_phase(self, phase: UpdatePhase) -> Result<T, UpdateError> {
        self.map_err(|e| UpdateError::new(phase, &e.into()))
    }
}

// ── Agent errors ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0} is already installed. Remove it first: edgeship-agent uninstall --repo-name {repo} --manifest-name {manifest}", repo = .0.repo_name, manifest = .0.manifest_name)]
    AlreadyInstalled(AppKey),

    #[error("{0} is not managed by this agent")]
    NotManaged(AppKey),

    #[error(transparent)]
    Update(#[from] UpdateError),
}
