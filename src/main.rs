use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tasklane::config::TasklaneConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "tasklane")]
#[command(version, about = "Shared kanban boards with live ordering sync")]
pub struct Cli {
    /// Config file (defaults to ./tasklane.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS for local frontends)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database, optionally with a first board
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Create a board with the default columns
        #[arg(long)]
        board: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default tasklane.toml in the current directory
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let mut config = TasklaneConfig::load_or_default(cli.config.as_deref(), &cwd)?;
    config.from_process_env()?;

    let _log_guard = tasklane::logging::init_logging(&config.logging)?;

    match &cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => {
            cmd::cmd_serve(config, *port, host.clone(), db_path.clone(), *dev).await?;
        }
        Commands::Init { db_path, board } => {
            cmd::cmd_init(&config, db_path.clone(), board.as_deref())?;
        }
        Commands::Config { command } => cmd::cmd_config(&cwd, &config, command.clone())?,
    }

    Ok(())
}
