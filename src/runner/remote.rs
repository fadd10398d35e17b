//! Remote stage execution over an open session.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::executor::{StageExecutor, StageInvocation};
use super::timing_file::read_timing_file;
use crate::error::PipelineError;
use crate::pipeline::TimingRecord;
use crate::plan::{file_name, remote_join, Location, RuntimeSettings};
use crate::remote::{shell_quote, ArtifactStager, RemoteSession};

/// Runs stages on the remote host through a borrowed session.
///
/// Artifacts are staged by basename into the remote working directory, so
/// the remote command only ever sees relative paths.
pub struct RemoteExecutor<'a> {
    session: &'a RemoteSession,
    remote_workdir: String,
    runtime: RuntimeSettings,
    setup_cmd: Option<String>,
}

impl<'a> RemoteExecutor<'a> {
    pub fn new(
        session: &'a RemoteSession,
        remote_workdir: impl Into<String>,
        runtime: &RuntimeSettings,
    ) -> Self {
        Self {
            session,
            remote_workdir: remote_workdir.into(),
            runtime: runtime.clone(),
            setup_cmd: None,
        }
    }

    /// Command run before every stage, e.g. a conda activation.
    pub fn with_setup_cmd(mut self, setup_cmd: Option<String>) -> Self {
        self.setup_cmd = setup_cmd.filter(|c| !c.trim().is_empty());
        self
    }

    fn script_name(&self) -> String {
        file_name(&self.runtime.stage_script)
    }

    /// The stage command line, without the `cd` and profile prefix.
    pub fn stage_command(&self, invocation: &StageInvocation) -> String {
        let command = format!(
            "{} {} --task {} --input {} --output {} --timing-output {}",
            self.runtime.remote_interpreter,
            shell_quote(&self.script_name()),
            invocation.stage.task(),
            shell_quote(&file_name(&invocation.input)),
            shell_quote(&file_name(&invocation.output)),
            shell_quote(&self.runtime.remote_timing_file),
        );
        match &self.setup_cmd {
            Some(setup) => format!("{setup} && {command}"),
            None => command,
        }
    }

    async fn run_stage(&self, invocation: &StageInvocation) -> Result<(), PipelineError> {
        let command = self.stage_command(invocation);
        let run = self.session.run(&command, Some(&self.remote_workdir));
        let output = match self.runtime.stage_timeout() {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                PipelineError::Timeout {
                    stage: invocation.stage.to_string(),
                    after: limit,
                }
            })??,
            None => run.await?,
        };
        if !output.stdout.trim().is_empty() {
            debug!(stage = %invocation.stage, "Remote stdout:\n{}", output.stdout.trim_end());
        }
        Ok(())
    }

    /// Fetches and removes the remote timing file.
    async fn collect_timing(&self, stager: &ArtifactStager<'_>) -> Result<f64, PipelineError> {
        let remote_timing = remote_join(&self.remote_workdir, &self.runtime.remote_timing_file);
        let local_timing = tempfile::Builder::new()
            .prefix("remote-timing-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| PipelineError::TimingFile {
                path: std::env::temp_dir(),
                reason: format!("cannot create timing file: {e}"),
            })?
            .into_temp_path();

        stager.download(&remote_timing, &local_timing).await?;
        let timing = read_timing_file(&local_timing)?;

        if let Err(e) = self.session.remove_file(&remote_timing).await {
            warn!(file = %remote_timing, error = %e, "Failed to remove remote timing file");
        }
        if let Err(e) = local_timing.close() {
            warn!(error = %e, "Failed to remove local timing copy");
        }
        if !timing.meta.is_empty() {
            debug!(meta = %serde_json::Value::Object(timing.meta), "Remote timing metadata");
        }
        Ok(timing.time)
    }
}

#[async_trait]
impl StageExecutor for RemoteExecutor<'_> {
    fn location(&self) -> Location {
        Location::Remote
    }

    async fn execute(&self, invocation: &StageInvocation) -> Result<TimingRecord, PipelineError> {
        let stage = invocation.stage;
        let stager = ArtifactStager::new(self.session);

        self.session.ensure_directory(&self.remote_workdir).await?;

        let remote_input = remote_join(&self.remote_workdir, &file_name(&invocation.input));
        let upload = stager.upload(&invocation.input, &remote_input).await?;

        let remote_script = remote_join(&self.remote_workdir, &self.script_name());
        if let Err(e) = stager.upload(&self.runtime.stage_script, &remote_script).await {
            warn!(
                stage = %stage,
                error = %e,
                "Could not upload stage script, using the existing remote copy"
            );
        }

        self.run_stage(invocation).await?;

        let remote_output = remote_join(&self.remote_workdir, &file_name(&invocation.output));
        let download = stager.download(&remote_output, &invocation.output).await?;

        let compute = self.collect_timing(&stager).await?;

        info!(
            stage = %stage,
            host = %self.session.target(),
            compute,
            upload = upload.as_secs_f64(),
            download = download.as_secs_f64(),
            "Remote stage finished"
        );
        Ok(TimingRecord::remote(
            stage,
            compute,
            upload.as_secs_f64(),
            download.as_secs_f64(),
        ))
    }
}
