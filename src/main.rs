use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "ispw-sync")]
#[command(version, about = "Synchronize Git pushes into ISPW through a durable retry queue")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Build workspace (defaults to $WORKSPACE, then the current directory)
    #[arg(long, global = true, env = "WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Config file. Defaults to <workspace>/.ispw-sync/ispw-sync.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record this build's push and synchronize the whole queue
    Run {
        /// Discard previously failed pushes before recording this one
        #[arg(long)]
        clear_failures: bool,
    },
    /// Inspect or reset the push queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum QueueCommands {
    /// List pending push events
    List,
    /// Remove every pending push event
    Clear,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration
    Validate,
    /// Create a default ispw-sync.toml
    Init,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let workspace = match cli.workspace.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run { clear_failures } => {
            cmd::cmd_run(&cli, workspace, *clear_failures).await?;
        }
        Commands::Queue { command } => cmd::cmd_queue(&cli, &workspace, command.clone())?,
        Commands::Config { command } => cmd::cmd_config(&cli, &workspace, command.clone())?,
    }

    Ok(())
}
