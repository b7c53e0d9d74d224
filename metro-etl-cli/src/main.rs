//! metro-etl CLI: run the air-quality and churn pipelines end to end or one
//! stage at a time.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// metro-etl: air-quality and customer-churn ETL
#[derive(Parser, Debug)]
#[command(name = "metro-etl", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (data and `.metro-etl/config.toml` live here)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Record store backend override: sqlite, postgrest, memory
    #[arg(long)]
    store: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Air-quality pipeline
    Air {
        #[command(subcommand)]
        action: AirAction,
    },
    /// Customer-churn pipeline
    Churn {
        #[command(subcommand)]
        action: ChurnAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum AirAction {
    /// Fetch raw payloads for the configured cities
    Fetch {
        /// Only fetch these cities (repeatable)
        #[arg(short, long)]
        city: Vec<String>,
    },
    /// Flatten raw payloads into the staged CSV
    Transform,
    /// Load the staged CSV into the record store
    Load,
    /// Compute KPIs and write the processed tables
    Analyze,
    /// Compare the staged CSV with the stored rows
    Validate,
    /// Run every stage in order
    Run,
}

#[derive(clap::Subcommand, Debug)]
pub enum ChurnAction {
    /// Clean the raw churn CSV into the staged CSV
    Transform {
        /// Raw churn CSV (defaults to <data_dir>/raw/churn.csv)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Load the staged CSV into the record store
    Load,
    /// Compare the raw CSV with the stored rows
    Validate {
        /// Raw churn CSV that was transformed (defaults to <data_dir>/raw/churn.csv)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Run every stage in order
    Run {
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default `.metro-etl/config.toml` into the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "metro-etl", "metro-etl")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "metro-etl.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let options = commands::Options {
        workspace,
        store: cli.store,
    };
    commands::handle_command(cli.command, &options).await
}
