//! Configuration document for a hybrid run.
//!
//! The document has three required sections (`execution`, `paths`, `ssh`)
//! and one optional section (`runtime`). It is read from JSON by default and
//! from YAML when the file extension is `.yaml` or `.yml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable that overrides `ssh.password`.
pub const PASSWORD_ENV: &str = "HYBRID_SSH_PASSWORD";

/// Default profile initialization run before every remote command so that
/// environment managers (conda, module) are active.
pub const DEFAULT_PROFILE_INIT: &str = "source /etc/profile && source ~/.bashrc";

/// The raw configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    /// Stage report name -> `"local"` | `"remote"`.
    pub execution: BTreeMap<String, String>,
    pub paths: PathTable,
    #[serde(default)]
    pub ssh: Option<SshSettings>,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl HybridConfig {
    /// Reads a configuration document, choosing the format by extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies environment overrides.
    ///
    /// - `HYBRID_SSH_PASSWORD`: replaces `ssh.password`
    pub fn with_env_overrides(mut self) -> Self {
        if let (Ok(password), Some(ssh)) = (std::env::var(PASSWORD_ENV), self.ssh.as_mut()) {
            if !password.is_empty() {
                ssh.password = Some(password);
            }
        }
        self
    }
}

/// Local artifact paths plus the remote working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathTable {
    pub local_data_check1: PathBuf,
    pub local_data_check2: PathBuf,
    pub local_saved: PathBuf,
    pub local_results: PathBuf,
    pub local_heatmap: PathBuf,
    pub timing_report: PathBuf,
    pub remote_workdir: String,
}

impl PathTable {
    /// Validates that no local path is empty.
    ///
    /// The remote working directory is only checked when the plan needs a
    /// remote host.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let locals = [
            ("paths.local_data_check1", &self.local_data_check1),
            ("paths.local_data_check2", &self.local_data_check2),
            ("paths.local_saved", &self.local_saved),
            ("paths.local_results", &self.local_results),
            ("paths.local_heatmap", &self.local_heatmap),
            ("paths.timing_report", &self.timing_report),
        ];
        for (field, path) in locals {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::MissingField(field.to_string()));
            }
        }
        Ok(())
    }
}

/// Joins a remote directory and a file name with exactly one `/`.
pub fn remote_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Final path component as a string, or the whole path when there is none.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// SSH connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub pkey_path: Option<PathBuf>,
    /// Shell prefix joined with `&&` before every remote stage command.
    #[serde(default)]
    pub setup_cmd: Option<String>,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: f64,
    #[serde(default = "default_profile_init")]
    pub profile_init: String,
}

fn default_port() -> u16 {
    22
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> f64 {
    3.0
}

fn default_connect_timeout_secs() -> f64 {
    30.0
}

fn default_profile_init() -> String {
    DEFAULT_PROFILE_INIT.to_string()
}

/// Credentials used to authenticate a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Private key file, only set when it exists on disk.
    pub key_path: Option<PathBuf>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.key_path.is_none() && self.password.is_none()
    }
}

impl SshSettings {
    /// Creates settings with defaults for everything but the target.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            password: None,
            pkey_path: None,
            setup_cmd: None,
            connect_retries: default_connect_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            profile_init: default_profile_init(),
        }
    }

    /// Sets the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the retry budget and delay.
    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_retries = attempts;
        self.retry_delay_secs = delay.as_secs_f64();
        self
    }

    pub fn retry_delay(&self) -> Duration {
        saturating_secs(self.retry_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        saturating_secs(self.connect_timeout_secs)
    }

    /// `host:port` label for logs and errors.
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    /// Resolves credentials: the key path is `~`-expanded and dropped when
    /// the file does not exist; an empty password counts as none.
    pub fn credentials(&self) -> Credentials {
        let key_path = self
            .pkey_path
            .as_deref()
            .map(expand_home)
            .filter(|p| p.exists());
        let password = self.password.clone().filter(|p| !p.is_empty());
        Credentials { key_path, password }
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField("ssh.host".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::MissingField("ssh.username".to_string()));
        }
        if self.connect_retries == 0 {
            return Err(ConfigError::Invalid(
                "ssh.connect_retries must be greater than 0".to_string(),
            ));
        }
        parse_secs("ssh.retry_delay_secs", self.retry_delay_secs)?;
        if parse_secs("ssh.connect_timeout_secs", self.connect_timeout_secs)?.is_zero() {
            return Err(ConfigError::Invalid(
                "ssh.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.password.as_deref().unwrap_or("").is_empty() && self.pkey_path.is_none() {
            return Err(ConfigError::Invalid(
                "ssh requires a password or a pkey_path".to_string(),
            ));
        }
        Ok(())
    }
}

/// Commands and side-channel file names used to invoke stage processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Interpreter used for local stage and pre-stage scripts.
    pub local_interpreter: String,
    /// Stage script for `filter/collect/patch/plot`, local path. Uploaded to
    /// the remote working directory under its file name.
    pub stage_script: PathBuf,
    /// Script for the always-local `generate` and `check` steps.
    pub pre_script: PathBuf,
    /// File the pre-stage script writes its timings to.
    pub pre_timing_file: PathBuf,
    /// Absolute interpreter path on the remote host.
    pub remote_interpreter: String,
    /// Timing side-channel file name inside the remote working directory.
    pub remote_timing_file: String,
    /// Upper bound for one stage process, local or remote. Unbounded when unset.
    pub stage_timeout_secs: Option<f64>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            local_interpreter: "python".to_string(),
            stage_script: PathBuf::from("ioi_modules.py"),
            pre_script: PathBuf::from("ioi_local_pre.py"),
            pre_timing_file: PathBuf::from("local_pre_timing.json"),
            remote_interpreter: "/root/miniconda3/envs/ioi/bin/python".to_string(),
            remote_timing_file: "timing_remote_tmp.json".to_string(),
            stage_timeout_secs: None,
        }
    }
}

impl RuntimeSettings {
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(saturating_secs)
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_interpreter.trim().is_empty() {
            return Err(ConfigError::MissingField("runtime.local_interpreter".to_string()));
        }
        if self.remote_timing_file.trim().is_empty() {
            return Err(ConfigError::MissingField("runtime.remote_timing_file".to_string()));
        }
        if let Some(secs) = self.stage_timeout_secs {
            if parse_secs("runtime.stage_timeout_secs", secs)?.is_zero() {
                return Err(ConfigError::Invalid(
                    "runtime.stage_timeout_secs must be greater than 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Converts a seconds field, rejecting negative, non-finite and
/// out-of-range values.
fn parse_secs(field: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::Invalid(format!("{field} = {secs} is not a valid duration: {e}")))
}

/// Seconds to `Duration`, clamped to `[0, Duration::MAX]`.
fn saturating_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Expands a leading `~` to `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}
