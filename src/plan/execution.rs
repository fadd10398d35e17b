//! The immutable per-run execution plan.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::config::{HybridConfig, PathTable, RuntimeSettings, SshSettings};
use crate::error::ConfigError;
use crate::pipeline::Stage;

/// Where a stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Local,
    Remote,
}

impl Location {
    pub fn as_str(self) -> &'static str {
        match self {
            Location::Local => "local",
            Location::Remote => "remote",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Location::Local),
            "remote" => Ok(Location::Remote),
            other => Err(other.to_string()),
        }
    }
}

/// Stage locations plus the path, SSH and runtime settings of one run.
///
/// Built once from the configuration document and never mutated while the
/// pipeline runs.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    locations: BTreeMap<Stage, Location>,
    paths: PathTable,
    ssh: Option<SshSettings>,
    runtime: RuntimeSettings,
}

impl ExecutionPlan {
    /// Loads, overrides from the environment, and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = HybridConfig::load(path)?.with_env_overrides();
        Self::from_config(config)
    }

    /// Resolves and validates a parsed configuration document.
    pub fn from_config(config: HybridConfig) -> Result<Self, ConfigError> {
        let mut locations = BTreeMap::new();
        for stage in Stage::REMOTE_ELIGIBLE {
            let key = stage.report_name();
            let raw = config
                .execution
                .get(key)
                .ok_or_else(|| ConfigError::MissingField(format!("execution.{key}")))?;
            let location = raw.parse::<Location>().map_err(|value| {
                ConfigError::InvalidLocation {
                    stage: key.to_string(),
                    value,
                }
            })?;
            locations.insert(stage, location);
        }

        for key in config.execution.keys() {
            if !Stage::from_report_name(key).is_some_and(Stage::is_remote_eligible) {
                warn!(key = %key, "Ignoring unknown stage in execution section");
            }
        }

        let plan = Self {
            locations,
            paths: config.paths,
            ssh: config.ssh,
            runtime: config.runtime,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// A plan with every remote-eligible stage set to `local`.
    pub fn all_local(paths: PathTable, runtime: RuntimeSettings) -> Self {
        let locations = Stage::REMOTE_ELIGIBLE
            .into_iter()
            .map(|s| (s, Location::Local))
            .collect();
        Self {
            locations,
            paths,
            ssh: None,
            runtime,
        }
    }

    /// Returns a copy with one stage moved. Pre-stages are ignored.
    pub fn with_location(mut self, stage: Stage, location: Location) -> Self {
        if stage.is_remote_eligible() {
            self.locations.insert(stage, location);
        }
        self
    }

    /// Returns a copy with the given SSH settings.
    pub fn with_ssh(mut self, ssh: SshSettings) -> Self {
        self.ssh = Some(ssh);
        self
    }

    /// Validates cross-section constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.paths.validate()?;
        self.runtime.validate()?;
        if self.requires_remote() {
            let ssh = self.ssh.as_ref().ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "stages {:?} are remote but no ssh section is configured",
                    self.remote_stages()
                        .iter()
                        .map(|s| s.report_name())
                        .collect::<Vec<_>>()
                ))
            })?;
            ssh.validate()?;
            if self.paths.remote_workdir.trim().is_empty() {
                return Err(ConfigError::MissingField("paths.remote_workdir".to_string()));
            }
        }
        Ok(())
    }

    /// Location of a stage. Pre-stages are always local.
    pub fn location(&self, stage: Stage) -> Location {
        self.locations
            .get(&stage)
            .copied()
            .unwrap_or(Location::Local)
    }

    /// Whether any stage needs the remote host.
    pub fn requires_remote(&self) -> bool {
        self.locations.values().any(|l| *l == Location::Remote)
    }

    /// Remote stages in pipeline order.
    pub fn remote_stages(&self) -> Vec<Stage> {
        self.locations
            .iter()
            .filter(|(_, l)| **l == Location::Remote)
            .map(|(s, _)| *s)
            .collect()
    }

    pub fn paths(&self) -> &PathTable {
        &self.paths
    }

    pub fn ssh(&self) -> Option<&SshSettings> {
        self.ssh.as_ref()
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(filter: &str) -> HybridConfig {
        let json = format!(
            r#"{{
            "execution": {{
                "filter_gpt2": "{filter}",
                "collect_activations": "local",
                "patch_activations": "Local",
                "plot_heatmap": "local"
            }},
            "paths": {{
                "local_data_check1": "a.json",
                "local_data_check2": "b.json",
                "local_saved": "c.pt",
                "local_results": "d.pt",
                "local_heatmap": "e.png",
                "timing_report": "t.json",
                "remote_workdir": "/root/w"
            }},
            "ssh": {{ "host": "h", "username": "u", "password": "p" }}
        }}"#
        );
        HybridConfig::from_json_str(&json).unwrap()
    }

    #[test]
    fn test_plan_locations() {
        let plan = ExecutionPlan::from_config(config("remote")).unwrap();
        assert_eq!(plan.location(Stage::Filter), Location::Remote);
        assert_eq!(plan.location(Stage::Patch), Location::Local);
        assert_eq!(plan.location(Stage::Generate), Location::Local);
        assert!(plan.requires_remote());
        assert_eq!(plan.remote_stages(), vec![Stage::Filter]);
    }

    #[test]
    fn test_all_local_plan_needs_no_ssh() {
        let mut cfg = config("local");
        cfg.ssh = None;
        let plan = ExecutionPlan::from_config(cfg).unwrap();
        assert!(!plan.requires_remote());
        assert!(plan.remote_stages().is_empty());
    }

    #[test]
    fn test_remote_plan_requires_ssh() {
        let mut cfg = config("remote");
        cfg.ssh = None;
        let err = ExecutionPlan::from_config(cfg).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("filter_gpt2"));
    }

    #[test]
    fn test_invalid_location() {
        let err = ExecutionPlan::from_config(config("cloud")).unwrap_err();
        match err {
            ConfigError::InvalidLocation { stage, value } => {
                assert_eq!(stage, "filter_gpt2");
                assert_eq!(value, "cloud");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_execution_key() {
        let mut cfg = config("local");
        cfg.execution.remove("plot_heatmap");
        let err = ExecutionPlan::from_config(cfg).unwrap_err();
        assert!(err.to_string().contains("execution.plot_heatmap"));
    }

    #[test]
    fn test_with_location_ignores_pre_stages() {
        let plan = ExecutionPlan::from_config(config("local"))
            .unwrap()
            .with_location(Stage::Generate, Location::Remote)
            .with_location(Stage::Plot, Location::Remote);
        assert_eq!(plan.location(Stage::Generate), Location::Local);
        assert_eq!(plan.remote_stages(), vec![Stage::Plot]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hybrid_config.json");
        std::fs::write(&path, serde_json::to_string(&config("local")).unwrap()).unwrap();
        let plan = ExecutionPlan::load(&path).unwrap();
        assert_eq!(plan.paths().timing_report, PathBuf::from("t.json"));
    }
}
