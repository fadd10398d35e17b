//! Stage runners for both execution locations.
//!
//! # Architecture
//!
//! ```text
//! StageInvocation → StageExecutor ─┬─ LocalExecutor  → child process → timing file
//!                                  └─ RemoteExecutor → upload → remote command → download
//! ```
//!
//! Every stage process reports its own compute time through a small JSON
//! timing file (`--timing-output`). Both executors return a
//! [`TimingRecord`](crate::pipeline::TimingRecord) of the same shape.
//!
//! # Example
//!
//! ```ignore
//! use hybrid_pipeline::runner::{LocalExecutor, StageExecutor, StageInvocation};
//! use hybrid_pipeline::pipeline::Stage;
//!
//! let executor = LocalExecutor::new(plan.runtime());
//! let record = executor
//!     .execute(&StageInvocation::new(Stage::Filter, "data_check1.json", "data_check2.json"))
//!     .await?;
//! println!("filter took {:.2}s", record.compute_time);
//! ```

pub mod executor;
pub mod local;
pub mod remote;
pub mod timing_file;

pub use executor::{StageExecutor, StageInvocation};
pub use local::LocalExecutor;
pub use remote::RemoteExecutor;
pub use timing_file::{parse_timing, read_pre_timing, read_timing_file, StageTiming};
