//! # devbridge CLI
//!
//! Command-line interface for the widget dev bridge.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "devbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "devbridge.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter devbridge.yml
    Init {
        /// Target directory (defaults to current directory)
        path: Option<PathBuf>,
    },

    /// Validate the configuration and show the selection a mount would restore
    Check {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Mount the bridge and read toolbar commands from stdin
    Run {
        /// Start as if the location named this widget
        #[arg(long)]
        widget: Option<String>,

        /// Override the delayed-load wait in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Do not load on mount
        #[arg(long)]
        no_auto_load: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout carries the event stream
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => commands::init_project(path.as_deref()),
        Commands::Check { json } => commands::check_config(&cli.config, json),
        Commands::Run {
            widget,
            delay_ms,
            no_auto_load,
        } => {
            let opts = commands::RunOptions {
                widget,
                delay_ms,
                no_auto_load,
            };
            commands::run_toolbar(&cli.config, opts).await
        }
    }
}
