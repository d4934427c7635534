use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use opendev::config::LogFormat;

mod cmd;

#[derive(Parser)]
#[command(name = "opendev")]
#[command(version, about = "Plan / Act / Observe / Fix coding task orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log output format: pretty or json. Overrides opendev.toml.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the task submission API
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Dev mode: bind 0.0.0.0 and allow any CORS origin
        #[arg(long)]
        dev: bool,
    },
    /// Run one task in the foreground and print its final record as JSON
    Run {
        /// What the generated code should do
        #[arg(short, long)]
        description: String,

        #[arg(short, long, default_value = "python")]
        language: String,

        #[arg(short, long)]
        framework: Option<String>,
    },
    /// View configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Warning: failed to load .env: {}", e);
    }

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = cmd::load_config(&project_dir)?;

    let _log_guard = opendev::logging::init(
        cli.log_format.unwrap_or(config.logging.format),
        cli.verbose,
        config.logging.directory.as_deref(),
    )?;

    match &cli.command {
        Commands::Serve { port, host, dev } => {
            cmd::cmd_serve(config, *port, host.clone(), *dev).await?;
        }
        Commands::Run {
            description,
            language,
            framework,
        } => {
            cmd::cmd_run(config, description, language, framework.as_deref()).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, &config, command.clone())?,
    }

    Ok(())
}
