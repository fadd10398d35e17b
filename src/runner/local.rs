//! Local subprocess execution of stages.

use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::executor::{StageExecutor, StageInvocation};
use super::timing_file::{read_pre_timing, read_timing_file};
use crate::error::PipelineError;
use crate::pipeline::{Stage, TimingRecord};
use crate::plan::{Location, RuntimeSettings};

/// Runs stages as child processes on this machine.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    runtime: RuntimeSettings,
}

impl LocalExecutor {
    pub fn new(runtime: &RuntimeSettings) -> Self {
        Self {
            runtime: runtime.clone(),
        }
    }

    /// `<interpreter> <stage_script> --task T --input I --output O --timing-output P`
    pub fn stage_command(&self, invocation: &StageInvocation, timing: &Path) -> Command {
        let mut cmd = Command::new(&self.runtime.local_interpreter);
        cmd.arg(&self.runtime.stage_script)
            .arg("--task")
            .arg(invocation.stage.task())
            .arg("--input")
            .arg(&invocation.input)
            .arg("--output")
            .arg(&invocation.output)
            .arg("--timing-output")
            .arg(timing);
        cmd
    }

    /// `<interpreter> <pre_script> --step <task>`
    pub fn pre_stage_command(&self, stage: Stage) -> Command {
        let mut cmd = Command::new(&self.runtime.local_interpreter);
        cmd.arg(&self.runtime.pre_script)
            .arg("--step")
            .arg(stage.task());
        cmd
    }

    /// Runs `generate` or `check` and reads its compute time from the
    /// pre-stage timing file.
    ///
    /// A missing file or key is tolerated and recorded as zero. The file is
    /// removed after `check`, the last step that writes it.
    pub async fn run_pre_stage(&self, stage: Stage) -> Result<TimingRecord, PipelineError> {
        let status = self.wait(stage, self.pre_stage_command(stage)).await?;
        ensure_success(stage, status)?;

        let timing_path = &self.runtime.pre_timing_file;
        let compute = match stage
            .pre_timing_key()
            .and_then(|key| read_pre_timing(timing_path, key))
        {
            Some(seconds) => seconds,
            None => {
                warn!(
                    stage = %stage,
                    file = %timing_path.display(),
                    "No compute time reported, recording 0"
                );
                0.0
            }
        };

        if stage == Stage::Check && timing_path.exists() {
            if let Err(e) = std::fs::remove_file(timing_path) {
                warn!(file = %timing_path.display(), error = %e, "Failed to remove pre-stage timing file");
            }
        }

        Ok(TimingRecord::local(stage, compute))
    }

    fn timeout(&self) -> Option<Duration> {
        self.runtime.stage_timeout()
    }

    /// Spawns the command and waits, honouring the optional stage timeout.
    /// The child is killed if the timeout fires.
    async fn wait(&self, stage: Stage, mut cmd: Command) -> Result<ExitStatus, PipelineError> {
        let program = self.runtime.local_interpreter.clone();
        debug!(stage = %stage, command = ?cmd.as_std(), "Spawning local stage");

        let spawn_err = |source| PipelineError::Spawn {
            stage: stage.to_string(),
            program: program.clone(),
            source,
        };
        let mut child = cmd.kill_on_drop(true).spawn().map_err(spawn_err)?;

        let status = match self.timeout() {
            Some(limit) => tokio::time::timeout(limit, child.wait())
                .await
                .map_err(|_| PipelineError::Timeout {
                    stage: stage.to_string(),
                    after: limit,
                })?,
            None => child.wait().await,
        };
        status.map_err(spawn_err)
    }
}

fn ensure_success(stage: Stage, status: ExitStatus) -> Result<(), PipelineError> {
    if status.success() {
        Ok(())
    } else {
        Err(PipelineError::LocalExecution {
            stage: stage.to_string(),
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl StageExecutor for LocalExecutor {
    fn location(&self) -> Location {
        Location::Local
    }

    async fn execute(&self, invocation: &StageInvocation) -> Result<TimingRecord, PipelineError> {
        let stage = invocation.stage;
        let timing_path = tempfile::Builder::new()
            .prefix("stage-timing-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| PipelineError::TimingFile {
                path: std::env::temp_dir(),
                reason: format!("cannot create timing file: {e}"),
            })?
            .into_temp_path();

        let status = self
            .wait(stage, self.stage_command(invocation, &timing_path))
            .await?;
        ensure_success(stage, status)?;

        let timing = read_timing_file(&timing_path)?;
        if let Err(e) = timing_path.close() {
            warn!(error = %e, "Failed to remove timing file");
        }

        info!(stage = %stage, compute = timing.time, "Local stage finished");
        Ok(TimingRecord::local(stage, timing.time))
    }
}
