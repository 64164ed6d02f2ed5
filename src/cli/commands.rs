//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::analytics;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::import::DataImporter;
use crate::ledger::{Ledger, MemoryLedger, SignalLedger, WalletLedger};
use crate::notify::{LogNotifier, NotificationSink, TelegramNotifier};
use crate::server;

/// Whether a command will write to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    ReadOnly,
    Write,
}

/// Open the ledger named by the storage config and load its snapshot.
/// Writers claim the snapshot first so two processes never overwrite each other.
async fn open_ledger(config: &Config, access: Access) -> Result<Arc<MemoryLedger>> {
    let mut ledger = MemoryLedger::new(config.storage.snapshot_path.clone());
    if access == Access::Write {
        ledger = ledger
            .with_writer_lock()
            .context("Another process is writing to the ledger")?;
        if let Some(lock) = ledger.lock_path() {
            debug!("Holding ledger lock {}", lock.display());
        }
    }

    ledger
        .load()
        .await
        .context("Failed to load ledger snapshot")?;
    Ok(Arc::new(ledger))
}

fn notification_sink(config: &Config) -> Result<Arc<dyn NotificationSink>> {
    if config.telegram.enabled {
        let notifier = TelegramNotifier::new(&config.telegram)
            .context("Failed to initialize Telegram notifier")?;
        Ok(Arc::new(notifier))
    } else {
        info!("Telegram disabled, notifications will only be logged");
        Ok(Arc::new(LogNotifier))
    }
}

async fn build_dispatcher(config: &Config) -> Result<(Arc<Dispatcher>, Arc<MemoryLedger>)> {
    let ledger = open_ledger(config, Access::Write).await?;
    let sink = notification_sink(config)?;
    let dispatcher = Dispatcher::from_config(config, ledger.clone(), sink);
    Ok((Arc::new(dispatcher), ledger))
}

/// Run the webhook and read API server
pub async fn serve(config: &Config, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind_address.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", bind))?;

    let (dispatcher, ledger) = build_dispatcher(config).await?;
    info!(
        time_limit_minutes = config.evaluation.time_limit_minutes,
        telegram = config.telegram.enabled,
        "Starting signal tracker"
    );

    server::run_server(addr, dispatcher).await?;

    // Mutations are already persisted; this just flushes a final copy
    ledger.save().await.context("Failed to save ledger on shutdown")?;
    info!("Signal tracker stopped");
    Ok(())
}

/// Process one message read from a file or stdin and print the outcome
pub async fn process(config: &Config, kind: &str, file: Option<PathBuf>) -> Result<()> {
    let text = match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read message from stdin")?;
            buf
        }
    };

    let (dispatcher, _ledger) = build_dispatcher(config).await?;
    let outcome = dispatcher.process(kind, &text).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.is_error() {
        anyhow::bail!("Message was not processed");
    }
    Ok(())
}

/// Import historical wallets, signals and links from CSV exports
pub async fn import(config: &Config, wallets: &Path, signals: &Path, links: &Path) -> Result<()> {
    let ledger = open_ledger(config, Access::Write).await?;
    let importer = DataImporter::new(ledger);

    let counts = importer
        .import_csv_files(wallets, signals, links)
        .await
        .context("Import failed")?;

    println!("\n=== IMPORT COMPLETE ===\n");
    println!("Wallets imported: {}", counts.wallets);
    println!("Signals imported: {}", counts.signals);
    println!("Links imported:   {}", counts.links);
    if counts.skipped > 0 {
        warn!(skipped = counts.skipped, "Some rows were skipped");
        println!("Rows skipped:     {}", counts.skipped);
    }

    let status = importer.status().await?;
    println!(
        "\nLedger now holds {} wallets, {} signals, {} links",
        status.wallets_count, status.signals_count, status.links_count
    );
    Ok(())
}

/// Print dashboard totals, top wallets and recent signals
pub async fn stats(config: &Config) -> Result<()> {
    let ledger = open_ledger(config, Access::ReadOnly).await?;
    let signals = SignalLedger::list(ledger.as_ref()).await?;
    let wallets = WalletLedger::list(ledger.as_ref()).await?;
    let dashboard = analytics::dashboard_stats(&signals, &wallets);

    println!("\n=== SIGNAL TRACKER STATS ===\n");
    println!("Signals:    {}", dashboard.stats.total_signals);
    println!("Successful: {}", dashboard.stats.successful_signals);
    println!("Pending:    {}", dashboard.stats.pending_signals);
    println!("Wallets:    {}", dashboard.stats.total_wallets);
    println!("Success rate: {:.2}%", dashboard.stats.success_rate);

    println!("\n=== TOP WALLETS ===\n");
    if dashboard.top_wallets.is_empty() {
        println!("No wallets tracked yet.");
    } else {
        println!("{:<20} {:>8} {:>8} {:>8}", "WALLET", "CALLS", "WINS", "RATE");
        println!("{}", "-".repeat(48));
        for wallet in &dashboard.top_wallets {
            println!(
                "{:<20} {:>8} {:>8} {:>7.1}%",
                wallet.wallet_id.to_string(),
                wallet.total_calls,
                wallet.successful_calls,
                wallet.success_rate * 100.0
            );
        }
    }

    println!("\n=== RECENT SIGNALS ===\n");
    if dashboard.recent_signals.is_empty() {
        println!("No signals recorded yet.");
    }
    for signal in &dashboard.recent_signals {
        println!(
            "{}  {:<12} {:<10} {:<8} {:.2}x  ({})",
            signal.signal_time.format("%Y-%m-%d %H:%M"),
            signal.token_name,
            signal.decision.as_str(),
            signal.performance_status.as_str(),
            signal.profit_multiplier,
            signal.signal_id
        );
    }
    Ok(())
}

/// Print the best-performing wallet clusters of the given size
pub async fn clusters(config: &Config, size: usize) -> Result<()> {
    let ledger = open_ledger(config, Access::ReadOnly).await?;
    let signals = SignalLedger::list(ledger.as_ref()).await?;
    let analysis = analytics::analyze_clusters(&signals, size)?;

    println!("\n=== CLUSTERS OF {} ===\n", analysis.cluster_size);
    println!("Combinations analyzed:     {}", analysis.total_clusters_analyzed);
    println!("With enough occurrences:   {}", analysis.clusters_with_min_occurrences);
    println!("High performance:          {}", analysis.high_performance_clusters);

    if analysis.promising_clusters.is_empty() {
        println!("\nNo promising clusters found.");
        return Ok(());
    }

    println!();
    for cluster in &analysis.promising_clusters {
        println!(
            "{:<40} {:>3}/{:<3} {:>6.1}%",
            cluster.cluster_name,
            cluster.successful_calls,
            cluster.total_calls,
            cluster.success_rate * 100.0
        );
    }
    Ok(())
}

/// Delete every wallet and signal
pub async fn clear(config: &Config, force: bool) -> Result<()> {
    let ledger = open_ledger(config, Access::Write).await?;

    if !force {
        let confirmed = Confirm::new()
            .with_prompt("Delete ALL wallets and signals? This cannot be undone.")
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Clear cancelled by user");
            return Ok(());
        }
    }

    let (wallets, signals) = ledger.clear_all().await?;
    println!("Removed {} wallets and {} signals", wallets, signals);
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}
