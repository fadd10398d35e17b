//! Pipeline orchestration for the hybrid local/remote run.
//!
//! # Architecture
//!
//! The pipeline consists of a fixed sequence of six stages:
//!
//! - **Pre-stages**: `generate` and `check` always run locally
//! - **Eligible stages**: `filter`, `collect`, `patch` and `plot` run where the
//!   execution plan places them
//! - **Orchestrator**: dispatches each stage, owns the remote session and the
//!   timing report
//!
//! # Pipeline Flow
//!
//! 1. **Pre-stages**: generate and structure-check the input data locally
//! 2. **Session**: open one remote session if any stage is remote
//! 3. **Dispatch**: run each eligible stage locally or remotely, in order
//! 4. **Report**: flush per-stage timings after every stage, write on exit
//!
//! # Example
//!
//! ```rust,ignore
//! use hybrid_pipeline::pipeline::Orchestrator;
//! use hybrid_pipeline::plan::ExecutionPlan;
//!
//! let plan = ExecutionPlan::load(Path::new("hybrid_config.json"))?;
//! let mut orchestrator = Orchestrator::new(plan)?;
//! let summary = orchestrator.run().await?;
//!
//! for line in summary.report.summary_lines() {
//!     println!("{line}");
//! }
//! ```

pub mod orchestrator;
pub mod report;
pub mod stage;

pub use orchestrator::{Orchestrator, PipelineOutcome, RunSummary, StageState};
pub use report::{TimingRecord, TimingReport};
pub use stage::{Stage, StageArtifacts};
