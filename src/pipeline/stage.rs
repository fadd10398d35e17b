//! The fixed six-stage pipeline and the artifacts each stage declares.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::plan::PathTable;

/// One step of the fixed pipeline.
///
/// Variants are declared in execution order; the derived `Ord` is the
/// pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    Check,
    Filter,
    Collect,
    Patch,
    Plot,
}

/// Input/output artifacts declared by a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageArtifacts<'a> {
    pub input: Option<&'a Path>,
    pub output: Option<&'a Path>,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Generate,
        Stage::Check,
        Stage::Filter,
        Stage::Collect,
        Stage::Patch,
        Stage::Plot,
    ];

    /// Stages that always run locally before the plan is consulted.
    pub const PRE: [Stage; 2] = [Stage::Generate, Stage::Check];

    /// Stages whose location is chosen by the execution plan.
    pub const REMOTE_ELIGIBLE: [Stage; 4] =
        [Stage::Filter, Stage::Collect, Stage::Patch, Stage::Plot];

    /// Task name passed to the stage process (`--task` / `--step`).
    pub fn task(self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::Check => "check",
            Stage::Filter => "filter",
            Stage::Collect => "collect",
            Stage::Patch => "patch",
            Stage::Plot => "plot",
        }
    }

    /// Name used as the key prefix in the timing report and in the
    /// `execution` section of the configuration.
    pub fn report_name(self) -> &'static str {
        match self {
            Stage::Generate => "generate_data",
            Stage::Check => "check_structure",
            Stage::Filter => "filter_gpt2",
            Stage::Collect => "collect_activations",
            Stage::Patch => "patch_activations",
            Stage::Plot => "plot_heatmap",
        }
    }

    /// Looks a stage up by its report name.
    pub fn from_report_name(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.report_name() == name)
    }

    /// Human-readable banner title.
    pub fn title(self) -> &'static str {
        match self {
            Stage::Generate => "Phase 0a: generate data",
            Stage::Check => "Phase 0b: structure check",
            Stage::Filter => "Phase 1: GPT-2 sample filtering",
            Stage::Collect => "Phase 2: cache activations",
            Stage::Patch => "Phase 3: activation patching",
            Stage::Plot => "Phase 4: plot heatmap",
        }
    }

    pub fn is_remote_eligible(self) -> bool {
        !Stage::PRE.contains(&self)
    }

    /// Key under which the pre-stage script reports its compute time.
    pub fn pre_timing_key(self) -> Option<&'static str> {
        match self {
            Stage::Generate => Some("local_generate_s"),
            Stage::Check => Some("local_check_s"),
            _ => None,
        }
    }

    /// Artifacts this stage consumes and produces. Each stage's output is
    /// the next stage's input.
    pub fn artifacts(self, paths: &PathTable) -> StageArtifacts<'_> {
        let (input, output) = match self {
            Stage::Generate => (None, None),
            Stage::Check => (None, Some(paths.local_data_check1.as_path())),
            Stage::Filter => (
                Some(paths.local_data_check1.as_path()),
                Some(paths.local_data_check2.as_path()),
            ),
            Stage::Collect => (
                Some(paths.local_data_check2.as_path()),
                Some(paths.local_saved.as_path()),
            ),
            Stage::Patch => (
                Some(paths.local_saved.as_path()),
                Some(paths.local_results.as_path()),
            ),
            Stage::Plot => (
                Some(paths.local_results.as_path()),
                Some(paths.local_heatmap.as_path()),
            ),
        };
        StageArtifacts { input, output }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.report_name())
    }
}
