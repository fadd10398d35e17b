//! Execution plan: which stages run where, and with which settings.
//!
//! ```text
//! hybrid_config.json → HybridConfig → ExecutionPlan (validated, immutable)
//! ```

pub mod config;
pub mod execution;

pub use config::{
    expand_home, file_name, remote_join, Credentials, HybridConfig, PathTable, RuntimeSettings,
    SshSettings,
};
pub use execution::{ExecutionPlan, Location};
