//! Pipeline orchestrator for the hybrid local/remote run.
//!
//! The `Orchestrator` drives the six stages strictly in order:
//! - local pre-stages (`generate`, `check`)
//! - at most one remote session, opened only when the plan needs it
//! - `filter`, `collect`, `patch`, `plot` dispatched by location
//! - a timing report flushed after every stage and written on exit

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::report::{TimingRecord, TimingReport};
use super::stage::Stage;
use crate::error::{ConfigError, PipelineError};
use crate::plan::{ExecutionPlan, Location};
use crate::remote::{Connector, RemoteSession, SshConnector};
use crate::runner::{LocalExecutor, RemoteExecutor, StageExecutor, StageInvocation};

/// Progress of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Pending,
    Running,
    Complete,
    Failed,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageState::Pending => write!(f, "pending"),
            StageState::Running => write!(f, "running"),
            StageState::Complete => write!(f, "complete"),
            StageState::Failed => write!(f, "failed"),
        }
    }
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineOutcome {
    Completed,
    Aborted,
}

/// Snapshot of a run: stage states, timings and timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub outcome: PipelineOutcome,
    pub states: BTreeMap<Stage, StageState>,
    pub report: TimingReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Runs one execution plan end to end.
pub struct Orchestrator {
    plan: ExecutionPlan,
    connector: Arc<dyn Connector>,
    states: BTreeMap<Stage, StageState>,
    report: TimingReport,
    run_id: String,
    started_at: DateTime<Utc>,
    aborted: bool,
}

impl Orchestrator {
    /// Creates an orchestrator that connects over SSH.
    pub fn new(plan: ExecutionPlan) -> Result<Self, ConfigError> {
        plan.validate()?;
        Ok(Self {
            plan,
            connector: Arc::new(SshConnector),
            states: Stage::ALL
                .into_iter()
                .map(|s| (s, StageState::Pending))
                .collect(),
            report: TimingReport::new(),
            run_id: format!("run-{}", Uuid::new_v4()),
            started_at: Utc::now(),
            aborted: false,
        })
    }

    /// Replaces the connector used to open the remote session.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self, stage: Stage) -> StageState {
        self.states
            .get(&stage)
            .copied()
            .unwrap_or(StageState::Pending)
    }

    pub fn report(&self) -> &TimingReport {
        &self.report
    }

    /// `Aborted` once the run has stopped on an error, `Completed` otherwise.
    pub fn outcome(&self) -> PipelineOutcome {
        if self.aborted || self.states.values().any(|s| *s == StageState::Failed) {
            PipelineOutcome::Aborted
        } else {
            PipelineOutcome::Completed
        }
    }

    /// Current state of the run. Also valid after an aborted [`Orchestrator::run`].
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            outcome: self.outcome(),
            states: self.states.clone(),
            report: self.report.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    /// Runs all stages.
    ///
    /// The timing report is written whether the run completes or aborts. On
    /// abort the first stage error is returned and later stages stay
    /// `Pending`.
    pub async fn run(&mut self) -> Result<RunSummary, PipelineError> {
        self.started_at = Utc::now();
        info!(
            run_id = %self.run_id,
            remote_stages = ?self.plan.remote_stages(),
            "Starting hybrid pipeline"
        );

        let result = self.run_stages().await;
        self.aborted = result.is_err();
        let written = self.report.write_to(&self.plan.paths().timing_report);

        match (result, written) {
            (Err(e), Err(write_err)) => {
                warn!(error = %write_err, "Failed to write timing report after abort");
                Err(e)
            }
            (Err(e), Ok(())) => {
                info!(
                    "Partial timing report saved to {}",
                    self.plan.paths().timing_report.display()
                );
                Err(e)
            }
            (Ok(()), Err(write_err)) => Err(write_err),
            (Ok(()), Ok(())) => {
                self.print_summary();
                Ok(self.summary())
            }
        }
    }

    async fn run_stages(&mut self) -> Result<(), PipelineError> {
        let local = LocalExecutor::new(self.plan.runtime());

        for stage in Stage::PRE {
            self.dispatch_pre(&local, stage).await?;
        }

        let session = if self.plan.requires_remote() {
            let ssh = self.plan.ssh().ok_or_else(|| {
                ConfigError::Invalid("remote stages configured without ssh settings".to_string())
            })?;
            Some(RemoteSession::connect(self.connector.as_ref(), ssh).await?)
        } else {
            None
        };

        let result = self.run_eligible(&local, session.as_ref()).await;

        if let Some(session) = session {
            session.close().await;
        }
        result
    }

    async fn run_eligible(
        &mut self,
        local: &LocalExecutor,
        session: Option<&RemoteSession>,
    ) -> Result<(), PipelineError> {
        let remote = session.map(|s| {
            RemoteExecutor::new(s, self.plan.paths().remote_workdir.clone(), self.plan.runtime())
                .with_setup_cmd(self.plan.ssh().and_then(|ssh| ssh.setup_cmd.clone()))
        });

        for stage in Stage::REMOTE_ELIGIBLE {
            let executor: &dyn StageExecutor = match (self.plan.location(stage), &remote) {
                (Location::Local, _) => local,
                (Location::Remote, Some(remote)) => remote,
                (Location::Remote, None) => {
                    self.states.insert(stage, StageState::Failed);
                    return Err(ConfigError::Invalid(format!(
                        "{stage} is remote but no session is open"
                    ))
                    .into());
                }
            };
            self.dispatch(stage, executor).await?;
        }
        Ok(())
    }

    async fn dispatch_pre(
        &mut self,
        local: &LocalExecutor,
        stage: Stage,
    ) -> Result<(), PipelineError> {
        self.begin(stage, Location::Local);
        let start = Instant::now();

        let outcome = local.run_pre_stage(stage).await.and_then(|record| {
            match stage.artifacts(self.plan.paths()).output {
                Some(output) => ensure_output(stage, output).map(|()| record),
                None => Ok(record),
            }
        });

        self.finish(stage, outcome.map(|r| r.with_wall_time(start.elapsed())))
    }

    async fn dispatch(
        &mut self,
        stage: Stage,
        executor: &dyn StageExecutor,
    ) -> Result<(), PipelineError> {
        self.begin(stage, executor.location());
        let start = Instant::now();

        let outcome = match self.invocation(stage) {
            Ok(invocation) => executor
                .execute(&invocation)
                .await
                .and_then(|record| ensure_output(stage, &invocation.output).map(|()| record)),
            Err(e) => Err(e),
        };

        self.finish(stage, outcome.map(|r| r.with_wall_time(start.elapsed())))
    }

    /// Builds the invocation for a remote-eligible stage. Its input must
    /// already exist locally.
    fn invocation(&self, stage: Stage) -> Result<StageInvocation, PipelineError> {
        let artifacts = stage.artifacts(self.plan.paths());
        let (Some(input), Some(output)) = (artifacts.input, artifacts.output) else {
            return Err(ConfigError::Invalid(format!("{stage} has no artifacts")).into());
        };
        if !input.exists() {
            return Err(PipelineError::MissingArtifact {
                stage: stage.to_string(),
                path: input.to_path_buf(),
            });
        }
        Ok(StageInvocation::new(stage, input, output))
    }

    fn begin(&mut self, stage: Stage, location: Location) {
        println!("\n{}", "=".repeat(60));
        println!("{} [{}]", stage.title(), location);
        println!("{}", "=".repeat(60));
        self.states.insert(stage, StageState::Running);
    }

    fn finish(
        &mut self,
        stage: Stage,
        outcome: Result<TimingRecord, PipelineError>,
    ) -> Result<(), PipelineError> {
        match outcome {
            Ok(record) => {
                info!(
                    stage = %stage,
                    location = %record.location,
                    compute = record.compute_time,
                    wall = record.wall_time,
                    "Stage complete"
                );
                self.states.insert(stage, StageState::Complete);
                self.report.push(record);
                self.flush_report();
                Ok(())
            }
            Err(e) => {
                error!(stage = %stage, phase = e.phase(), error = %e, "Stage failed");
                self.states.insert(stage, StageState::Failed);
                Err(e)
            }
        }
    }

    /// Mid-run snapshot of the report. Failures only warn; the final write
    /// in [`Orchestrator::run`] reports errors.
    fn flush_report(&self) {
        if let Err(e) = self.report.write_to(&self.plan.paths().timing_report) {
            warn!(error = %e, "Failed to flush timing report");
        }
    }

    fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("Timing summary ({})", self.run_id);
        println!("{}", "=".repeat(60));
        for line in self.report.summary_lines() {
            println!("  {line}");
        }
        println!(
            "Timing report saved to {}",
            self.plan.paths().timing_report.display()
        );
    }
}

fn ensure_output(stage: Stage, output: &Path) -> Result<(), PipelineError> {
    if output.exists() {
        Ok(())
    } else {
        Err(PipelineError::MissingArtifact {
            stage: stage.to_string(),
            path: output.to_path_buf(),
        })
    }
}
