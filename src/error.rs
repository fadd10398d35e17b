//! Error types for hybrid pipeline operations.
//!
//! Defines error types for the two major subsystems:
//! - Configuration loading and validation
//! - Pipeline execution (remote session, artifact transfer, stage processes)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while loading or validating the configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON config error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid location '{value}' for stage '{stage}': must be 'local' or 'remote'")]
    InvalidLocation { stage: String, value: String },

    #[error("Missing required field '{0}'")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Direction of an artifact transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "upload"),
            TransferDirection::Download => write!(f, "download"),
        }
    }
}

/// Errors that abort a pipeline run.
///
/// Every variant is fatal; the orchestrator never retries a stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not connect to {host} after {attempts} attempt(s): {cause}")]
    Connection {
        host: String,
        attempts: u32,
        cause: String,
    },

    #[error("Remote command exited with code {exit_code}: {command}\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}")]
    RemoteExecution {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Remote channel error while running '{command}': {source}")]
    RemoteChannel {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to {direction} '{local}' <-> '{remote}': {source}")]
    Transfer {
        direction: TransferDirection,
        local: PathBuf,
        remote: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Local stage '{stage}' exited with code {exit_code}")]
    LocalExecution { stage: String, exit_code: i32 },

    #[error("Failed to spawn '{program}' for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid timing file '{path}': {reason}")]
    TimingFile { path: PathBuf, reason: String },

    #[error("Artifact '{path}' for stage '{stage}' is missing or unreadable")]
    MissingArtifact { stage: String, path: PathBuf },

    #[error("Stage '{stage}' timed out after {after:?}")]
    Timeout { stage: String, after: Duration },

    #[error("Failed to write timing report '{path}': {reason}")]
    Report { path: PathBuf, reason: String },
}

impl PipelineError {
    /// Short phase label used in the CLI failure banner.
    pub fn phase(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "configuration",
            PipelineError::Connection { .. } => "connection",
            PipelineError::RemoteExecution { .. } | PipelineError::RemoteChannel { .. } => {
                "remote execution"
            }
            PipelineError::Transfer { .. } => "artifact transfer",
            PipelineError::LocalExecution { .. } | PipelineError::Spawn { .. } => {
                "local execution"
            }
            PipelineError::TimingFile { .. } => "timing side-channel",
            PipelineError::MissingArtifact { .. } => "artifact check",
            PipelineError::Timeout { .. } => "stage timeout",
            PipelineError::Report { .. } => "report",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_execution_message_carries_output() {
        let err = PipelineError::RemoteExecution {
            command: "python x.py".to_string(),
            exit_code: 2,
            stdout: "partial".to_string(),
            stderr: "Traceback".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("code 2"));
        assert!(msg.contains("partial"));
        assert!(msg.contains("Traceback"));
        assert_eq!(err.phase(), "remote execution");
    }

    #[test]
    fn test_config_error_converts() {
        let err: PipelineError = ConfigError::MissingField("paths.timing_report".into()).into();
        assert_eq!(err.phase(), "configuration");
        assert!(err.to_string().contains("paths.timing_report"));
    }
}
