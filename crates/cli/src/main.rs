//! Paperflow CLI, the main entry point.
//!
//! Commands:
//! - `process` : run a text file through the paper pipeline
//! - `status`  : show limiter, retry and breaker configuration
//! - `config`  : validate, show or locate the configuration file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "paperflow",
    about = "Paperflow: multi-agent academic paper pipeline",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a paper (plain text file) through the pipeline
    Process {
        /// Path to the paper text
        file: PathBuf,

        /// Use local agents only, never call an AI provider
        #[arg(long)]
        offline: bool,

        /// Paper title (defaults to the file name)
        #[arg(long)]
        title: Option<String>,

        /// Summary style: brief, standard or detailed
        #[arg(long)]
        style: Option<String>,

        /// Also run related-paper discovery and web research
        #[arg(long)]
        research: bool,
    },

    /// Show resilience configuration and provider availability
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse and validate the configuration file
    Validate,
    /// Print the effective configuration (keys redacted)
    Show,
    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Process {
            file,
            offline,
            title,
            style,
            research,
        } => {
            commands::process::run(commands::process::ProcessArgs {
                file,
                offline,
                title,
                style,
                research,
            })
            .await?
        }
        Commands::Status => commands::status::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
