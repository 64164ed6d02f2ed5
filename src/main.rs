//! KOL Signal Tracker - scores wallet buy signals and tracks their outcomes
//!
//! Buy signals from the wallet-tracking channel are scored against the
//! configured golden wallet groups; later price updates decide whether each
//! signal succeeded.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use kol_signal_tracker::cli::commands;
use kol_signal_tracker::config::Config;

/// KOL Signal Tracker - wallet buy signal scoring and evaluation
#[derive(Parser)]
#[command(name = "signal-tracker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook receiver and read API
    Serve {
        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Process a single message (kol_track, phanes_nf, phanes_15m)
    Process {
        /// Signal type of the message
        kind: String,

        /// Read the message from a file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Import historical data from CSV exports
    Import {
        #[arg(long)]
        wallets: PathBuf,

        #[arg(long)]
        signals: PathBuf,

        #[arg(long)]
        links: PathBuf,
    },

    /// Show dashboard statistics
    Stats,

    /// Analyze wallet clusters
    Clusters {
        /// Number of wallets per cluster (2-5)
        #[arg(short, long, default_value_t = 2)]
        size: usize,
    },

    /// Delete all wallets and signals
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration (secrets masked)
    Config,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "kol_signal_tracker=info"
            .parse()
            .unwrap_or_else(|_| tracing::level_filters::LevelFilter::INFO.into()),
    );

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.json);

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    info!("Loaded configuration from {}", cli.config);

    // Execute command
    let result = match cli.command {
        Commands::Serve { bind } => commands::serve(&config, bind).await,
        Commands::Process { kind, file } => commands::process(&config, &kind, file).await,
        Commands::Import {
            wallets,
            signals,
            links,
        } => commands::import(&config, &wallets, &signals, &links).await,
        Commands::Stats => commands::stats(&config).await,
        Commands::Clusters { size } => commands::clusters(&config, size).await,
        Commands::Clear { force } => commands::clear(&config, force).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
