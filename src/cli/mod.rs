//! Command-line interface for hybrid-pipeline.
//!
//! Provides the pipeline run, plan inspection and directory sync commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, SyncDirArgs};
