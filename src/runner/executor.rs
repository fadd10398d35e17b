//! The stage execution capability shared by local and remote runs.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::pipeline::{Stage, TimingRecord};
use crate::plan::Location;

/// One stage invocation: the stage and its local artifact paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub stage: Stage,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl StageInvocation {
    pub fn new(stage: Stage, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            stage,
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Runs a stage somewhere and reports a [`TimingRecord`].
///
/// Both implementations return the same record shape; only the location
/// and the transfer fields differ. Wall time is filled in by the caller.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn location(&self) -> Location;

    async fn execute(&self, invocation: &StageInvocation) -> Result<TimingRecord, PipelineError>;
}
