//! hybrid-pipeline: runs a staged activation-patching pipeline with each
//! stage placed either on this machine or on a remote host over SSH.
//!
//! This library provides the execution plan, local and remote stage runners,
//! the remote session layer and the timing report.

pub mod cli;
pub mod error;
pub mod pipeline;
pub mod plan;
pub mod remote;
pub mod runner;

// Re-export commonly used error types
pub use error::{ConfigError, PipelineError, TransferDirection};
