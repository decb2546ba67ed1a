//! Expedition CLI entry point.
//!
//! Thin composition layer: parses arguments, initializes logging, and routes
//! to the orchestrator. Command implementations live in the library crate.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use expedition::clock::SystemClock;
use expedition::model::{ExecutionMode, ExplorationConfig, ExplorationStatus};
use expedition::orchestrator::ExplorationOrchestrator;
use expedition::subprocess::SubprocessManager;

#[derive(Parser)]
#[command(name = "expedition")]
#[command(about = "Explore a task across parallel or sequential containerized git worktrees", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Repository path to run in (defaults to current directory)
    #[arg(short = 'p', long, global = true)]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new exploration
    Run {
        /// Description of the task to explore
        task: String,

        /// Number of parallel/sequential branches to try
        #[arg(short = 'n', long, default_value = "2")]
        branches: u32,

        /// Execution mode
        #[arg(long, value_enum, default_value = "parallel")]
        mode: ModeArg,

        /// Keep worktrees and containers around after completion
        #[arg(long)]
        no_cleanup: bool,
    },

    /// Resume a pending or stopped exploration
    Resume { exploration_id: String },

    /// Stop a running exploration
    Stop { exploration_id: String },

    /// Show an exploration's current status
    Status { exploration_id: String },

    /// List explorations, optionally filtered by status and/or a task substring
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,

        #[arg(long)]
        task: Option<String>,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum ModeArg {
    Parallel,
    Sequential,
}

#[derive(Clone, clap::ValueEnum)]
enum StatusArg {
    Pending,
    Running,
    Stopped,
    Completed,
    Failed,
}

impl From<StatusArg> for ExplorationStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => ExplorationStatus::Pending,
            StatusArg::Running => ExplorationStatus::Running,
            StatusArg::Stopped => ExplorationStatus::Stopped,
            StatusArg::Completed => ExplorationStatus::Completed,
            StatusArg::Failed => ExplorationStatus::Failed,
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_default())
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let repo_path = cli.path.unwrap_or_else(|| PathBuf::from("."));
    let explorations_root = repo_path.join(".expeditions");
    let subprocess = SubprocessManager::production();
    let clock = Arc::new(SystemClock);

    let orchestrator =
        ExplorationOrchestrator::new(repo_path, explorations_root, subprocess, clock).await;

    let result = run_command(&orchestrator, cli.command).await;

    if let Err(err) = result {
        error!(%err, "command failed");
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn run_command(
    orchestrator: &ExplorationOrchestrator,
    command: Commands,
) -> expedition::Result<()> {
    match command {
        Commands::Run { task, branches, mode, no_cleanup } => {
            let config = ExplorationConfig {
                branches,
                mode: match mode {
                    ModeArg::Parallel => ExecutionMode::Parallel,
                    ModeArg::Sequential => ExecutionMode::Sequential,
                },
                no_cleanup,
                ..ExplorationConfig::default()
            };
            let exploration = orchestrator.run_exploration(task, config).await?;
            println!("{}", serde_json::to_string_pretty(&exploration)?);
        }
        Commands::Resume { exploration_id } => {
            let exploration = orchestrator.resume_exploration(&exploration_id).await?;
            println!("{}", serde_json::to_string_pretty(&exploration)?);
        }
        Commands::Stop { exploration_id } => {
            let exploration = orchestrator.stop_exploration(&exploration_id).await?;
            println!("{}", serde_json::to_string_pretty(&exploration)?);
        }
        Commands::Status { exploration_id } => {
            let exploration = orchestrator.get_exploration_status(&exploration_id).await?;
            println!("{}", serde_json::to_string_pretty(&exploration)?);
        }
        Commands::List { status, task } => {
            let summaries = orchestrator.list_explorations(status.map(Into::into), task).await?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
    }

    Ok(())
}
