//! CLI command definitions for hybrid-pipeline.
//!
//! Running without a subcommand executes the full pipeline described by the
//! configuration file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::{Orchestrator, Stage};
use crate::plan::{expand_home, ExecutionPlan, HybridConfig};
use crate::remote::{ArtifactStager, RemoteSession, SshConnector, TreeUpload};

/// Default configuration file.
const DEFAULT_CONFIG: &str = "hybrid_config.json";

/// Default local model cache uploaded by `sync-dir`.
const DEFAULT_SYNC_LOCAL: &str = "~/.cache/huggingface/hub";
const DEFAULT_SYNC_REMOTE: &str = "/root/.cache/huggingface/hub";

/// Hybrid local/remote pipeline runner.
#[derive(Parser)]
#[command(name = "hybrid-pipeline")]
#[command(about = "Run the activation-patching pipeline with stages split between local and remote hosts")]
#[command(version)]
#[command(
    long_about = "hybrid-pipeline runs six stages in order: generate, check, filter, collect, patch, plot.\n\nThe first two always run locally. Each of the remaining four runs locally or on a remote host over SSH, as set in the `execution` section of the configuration file.\n\nExample usage:\n  hybrid-pipeline --config hybrid_config.json\n  hybrid-pipeline plan"
)]
pub struct Cli {
    /// The subcommand to execute. Runs the pipeline when omitted.
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (JSON, or YAML with a .yaml/.yml extension).
    #[arg(short, long, default_value = DEFAULT_CONFIG, env = "HYBRID_CONFIG", global = true)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the full pipeline (the default).
    Run,

    /// Validate the configuration and print where each stage will run.
    Plan,

    /// Upload a local directory tree to the remote host.
    ///
    /// Used to seed the remote model cache before the first remote run.
    #[command(name = "sync-dir")]
    SyncDir(SyncDirArgs),
}

/// Arguments for `hybrid-pipeline sync-dir`.
#[derive(Parser, Debug)]
pub struct SyncDirArgs {
    /// Local directory to upload.
    #[arg(long, default_value = DEFAULT_SYNC_LOCAL)]
    pub local: PathBuf,

    /// Destination directory on the remote host.
    #[arg(long, default_value = DEFAULT_SYNC_REMOTE)]
    pub remote: String,

    /// Only upload top-level entries whose name contains this text.
    #[arg(short = 'm', long = "match")]
    pub match_filter: Option<String>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_pipeline_command(&cli.config).await,
        Commands::Plan => run_plan_command(&cli.config),
        Commands::SyncDir(args) => run_sync_dir_command(&cli.config, args).await,
    }
}

// ============================================================================
// Command Implementation
// ============================================================================

async fn run_pipeline_command(config: &Path) -> anyhow::Result<()> {
    let plan = ExecutionPlan::load(config)
        .with_context(|| format!("Failed to load configuration {}", config.display()))?;
    let mut orchestrator = Orchestrator::new(plan)?;

    match orchestrator.run().await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                duration_ms = summary.duration().num_milliseconds(),
                "Pipeline finished"
            );
            Ok(())
        }
        Err(e) => {
            print_failure(&e);
            Err(e.into())
        }
    }
}

fn run_plan_command(config: &Path) -> anyhow::Result<()> {
    let plan = ExecutionPlan::load(config)
        .with_context(|| format!("Failed to load configuration {}", config.display()))?;
    plan.validate()?;

    println!("{}", "=".repeat(60));
    println!("Execution plan ({})", config.display());
    println!("{}", "=".repeat(60));
    for stage in Stage::ALL {
        let artifacts = stage.artifacts(plan.paths());
        let show = |p: Option<&Path>| {
            p.map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        println!(
            "  {:<20} {:<7} {} -> {}",
            stage.report_name(),
            plan.location(stage).as_str(),
            show(artifacts.input),
            show(artifacts.output)
        );
    }
    match plan.ssh() {
        Some(ssh) if plan.requires_remote() => {
            println!("\nRemote host: {} (workdir {})", ssh.target(), plan.paths().remote_workdir);
        }
        _ => println!("\nAll stages run locally; no remote connection will be opened."),
    }
    println!("Timing report: {}", plan.paths().timing_report.display());
    Ok(())
}

async fn run_sync_dir_command(config: &Path, args: SyncDirArgs) -> anyhow::Result<()> {
    let config = HybridConfig::load(config)
        .with_context(|| format!("Failed to load configuration {}", config.display()))?
        .with_env_overrides();
    let ssh = config
        .ssh
        .ok_or_else(|| anyhow::anyhow!("sync-dir requires an ssh section in the configuration"))?;
    ssh.validate()?;

    let local = expand_home(&args.local);
    if !local.is_dir() {
        anyhow::bail!("Local directory does not exist: {}", local.display());
    }

    println!("Uploading {} -> {}:{}", local.display(), ssh.target(), args.remote);
    let session = RemoteSession::connect(&SshConnector, &ssh).await?;
    let result = ArtifactStager::new(&session)
        .upload_tree(&local, &args.remote, args.match_filter.as_deref())
        .await;
    session.close().await;

    let summary = result?;
    ensure_matched(&summary, args.match_filter.as_deref(), &local)?;
    println!(
        "Uploaded {} files ({:.1} MB) in {:.1}s, skipped {}",
        summary.files,
        summary.bytes as f64 / 1024.0 / 1024.0,
        summary.elapsed.as_secs_f64(),
        summary.skipped
    );
    Ok(())
}

/// A `--match` filter that selected nothing is an error.
fn ensure_matched(
    summary: &TreeUpload,
    filter: Option<&str>,
    local: &Path,
) -> anyhow::Result<()> {
    match filter {
        Some(filter) if summary.matched == 0 => {
            anyhow::bail!("No entries in {} match '{}'", local.display(), filter)
        }
        _ => Ok(()),
    }
}

fn print_failure(e: &PipelineError) {
    eprintln!("\n{}", "=".repeat(60));
    eprintln!("Pipeline aborted during {}", e.phase());
    eprintln!("{}", "=".repeat(60));
    eprintln!("{e}");
}
