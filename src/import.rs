//! Historical data import from CSV exports
//!
//! Three files are read in order: wallets, signals, then wallet-signal
//! links. All of them are parsed before anything is written, and the rows
//! land in the ledger as one batch. Rows whose id already exists are skipped,
//! so re-running an import is harmless. Imported signal ids get a
//! `historical_` prefix.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::extract::UNKNOWN_TOKEN;
use crate::ledger::{ImportBatch, Ledger, SignalLedger, WalletLedger};
use crate::types::{
    Decision, PerformanceStatus, Signal, WalletId, WalletSignalLink, WalletStats, WalletStatus,
};

pub const HISTORICAL_PREFIX: &str = "historical_";

/// Rows imported (or skipped) per file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub wallets: usize,
    pub signals: usize,
    pub links: usize,
    /// Existing, unparsable or orphaned rows
    pub skipped: usize,
}

/// Current ledger contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStatus {
    pub wallets_count: usize,
    pub signals_count: usize,
    pub links_count: usize,
}

#[derive(Debug, Deserialize)]
struct WalletRow {
    wallet_unique_id: Option<String>,
    wallet_type: Option<String>,
    wallet_number: Option<u32>,
    date_added: Option<String>,
    last_seen: Option<String>,
    total_calls: Option<u32>,
    successful_calls: Option<u32>,
}

impl WalletRow {
    fn wallet_id(&self) -> Option<WalletId> {
        if let Some(id) = self.wallet_unique_id.as_deref().and_then(|s| s.parse().ok()) {
            return Some(id);
        }
        let kind = self.wallet_type.as_deref()?.parse().ok()?;
        Some(WalletId::new(kind, self.wallet_number?))
    }
}

#[derive(Debug, Deserialize)]
struct SignalRow {
    signal_id: String,
    contract_address: String,
    signal_timestamp: Option<String>,
    token_name: Option<String>,
    initial_ath_usd: Option<f64>,
    final_ath_usd: Option<f64>,
    profit_multiplier: Option<f64>,
    performance_status: Option<String>,
    evaluation_complete: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinkRow {
    signal_id: String,
    wallet_unique_id: String,
    mc_at_buy: Option<f64>,
}

/// Parse an export timestamp; anything unreadable becomes `now`
fn parse_timestamp(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return now;
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return naive.and_utc();
        }
    }
    if let Some(naive) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return naive.and_utc();
    }
    debug!(raw, "Unparsable timestamp, using now");
    now
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes")
    )
}

fn reader(data: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(data)
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| Error::Import(format!("{}: {}", path.display(), e)))
}

/// Parse the wallet export. Rows without a usable id are counted as skipped.
fn parse_wallets(data: &[u8], now: DateTime<Utc>, skipped: &mut usize) -> Result<Vec<WalletStats>> {
    let mut wallets = Vec::new();
    for row in reader(data).deserialize::<WalletRow>() {
        let row = row?;
        let Some(wallet_id) = row.wallet_id() else {
            warn!(?row, "Skipping wallet row without a valid id");
            *skipped += 1;
            continue;
        };

        let mut stats = WalletStats {
            wallet_id,
            date_added: parse_timestamp(row.date_added.as_deref(), now),
            last_seen: parse_timestamp(row.last_seen.as_deref(), now),
            total_calls: row.total_calls.unwrap_or(0),
            successful_calls: row.successful_calls.unwrap_or(0),
            success_rate: 0.0,
            status: WalletStatus::Active,
        };
        stats.successful_calls = stats.successful_calls.min(stats.total_calls);
        wallets.push(stats);
    }
    Ok(wallets)
}

fn parse_signals(data: &[u8], now: DateTime<Utc>) -> Result<Vec<Signal>> {
    let mut signals = Vec::new();
    for row in reader(data).deserialize::<SignalRow>() {
        let row = row?;
        let performance_status = row
            .performance_status
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(PerformanceStatus::Pending);

        signals.push(Signal {
            signal_id: format!("{}{}", HISTORICAL_PREFIX, row.signal_id),
            contract_address: row.contract_address,
            signal_time: parse_timestamp(row.signal_timestamp.as_deref(), now),
            token_name: row
                .token_name
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNKNOWN_TOKEN.to_string()),
            wallets: Vec::new(),
            initial_ath_usd: row.initial_ath_usd.unwrap_or(0.0),
            final_ath_usd: row.final_ath_usd.unwrap_or(0.0),
            profit_multiplier: row.profit_multiplier.unwrap_or(0.0),
            performance_status,
            evaluation_complete: parse_flag(row.evaluation_complete.as_deref()),
            decision: Decision::Ignore,
            confidence_score: 0.0,
            decision_reasons: Vec::new(),
            version: 0,
        });
    }
    Ok(signals)
}

fn parse_links(data: &[u8], skipped: &mut usize) -> Result<Vec<WalletSignalLink>> {
    let mut links = Vec::new();
    for row in reader(data).deserialize::<LinkRow>() {
        let row = row?;
        let Ok(wallet_id) = row.wallet_unique_id.parse::<WalletId>() else {
            warn!(wallet = %row.wallet_unique_id, "Skipping link with invalid wallet id");
            *skipped += 1;
            continue;
        };

        let signal_id = format!("{}{}", HISTORICAL_PREFIX, row.signal_id);
        let mut link = WalletSignalLink::new(&signal_id, wallet_id, row.mc_at_buy.unwrap_or(0.0));
        link.link_id = format!("{}link_{}_{}", HISTORICAL_PREFIX, row.signal_id, link.wallet_id);
        links.push(link);
    }
    Ok(links)
}

/// Loads historical CSV exports into the ledger
pub struct DataImporter {
    ledger: Arc<dyn Ledger>,
}

impl DataImporter {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Import all three files in dependency order
    pub async fn import_csv_files(
        &self,
        wallets_file: &Path,
        signals_file: &Path,
        links_file: &Path,
    ) -> Result<ImportCounts> {
        // Fail before touching the ledger if any file is missing
        for path in [wallets_file, signals_file, links_file] {
            if !path.exists() {
                return Err(Error::Import(format!("file not found: {}", path.display())));
            }
        }

        self.import_data(
            &read_file(wallets_file).await?,
            &read_file(signals_file).await?,
            &read_file(links_file).await?,
        )
        .await
    }

    /// Parse all three exports, then apply them as one batch. A malformed
    /// row anywhere aborts the import before the ledger is touched.
    pub async fn import_data(&self, wallets: &[u8], signals: &[u8], links: &[u8]) -> Result<ImportCounts> {
        let now = Utc::now();
        let mut skipped = 0;
        let batch = ImportBatch {
            wallets: parse_wallets(wallets, now, &mut skipped)?,
            signals: parse_signals(signals, now)?,
            links: parse_links(links, &mut skipped)?,
        };
        debug!(
            wallets = batch.wallets.len(),
            signals = batch.signals.len(),
            links = batch.links.len(),
            "Parsed historical exports"
        );

        let applied = self.ledger.apply_import(batch).await?;
        let counts = ImportCounts {
            wallets: applied.wallets,
            signals: applied.signals,
            links: applied.links,
            skipped: skipped + applied.skipped,
        };

        info!(
            wallets = counts.wallets,
            signals = counts.signals,
            links = counts.links,
            skipped = counts.skipped,
            "Historical import finished"
        );
        Ok(counts)
    }

    pub async fn status(&self) -> Result<ImportStatus> {
        let signals = SignalLedger::list(self.ledger.as_ref()).await?;
        Ok(ImportStatus {
            wallets_count: WalletLedger::list(self.ledger.as_ref()).await?.len(),
            links_count: signals.iter().map(|s| s.wallets.len()).sum(),
            signals_count: signals.len(),
        })
    }

    /// Delete every signal (with its links) and every wallet
    pub async fn clear_all(&self) -> Result<ImportStatus> {
        let before = self.status().await?;
        self.ledger.clear_all().await?;
        info!(
            wallets = before.wallets_count,
            signals = before.signals_count,
            "Cleared all data"
        );
        Ok(before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use chrono::{Datelike, Timelike};
    use std::io::Write;
    use tempfile::TempDir;

    const WALLETS_CSV: &str = "\
wallet_unique_id,wallet_type,wallet_number,date_added,last_seen,total_calls,successful_calls,success_rate
KOL_1,KOL,1,2024-01-02 10:00:00,2024-03-01T08:30:00Z,10,7,0.7
New Wallet_56,New Wallet,56,not a date,,4,1,0.25
,KOL,9,,,2,0,0
garbage,,,,,1,0,0
";

    const SIGNALS_CSV: &str = "\
signal_id,contract_address,signal_timestamp,token_name,total_wallets_involved,initial_ath_usd,final_ath_usd,profit_multiplier,performance_status,evaluation_complete
1,CA1,2024-02-01 12:00:00,PEPE,2,1000,2500,2.5,SUCCESS,True
2,CA2,2024-02-02,,1,,,,,
";

    const LINKS_CSV: &str = "\
signal_id,wallet_unique_id,mc_at_buy
1,KOL_1,12000
1,New Wallet_56,15000
1,KOL_1,99999
3,KOL_1,1
2,bogus,1
";

    fn write(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    fn importer() -> (DataImporter, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::in_memory());
        (DataImporter::new(ledger.clone()), ledger)
    }

    #[tokio::test]
    async fn test_full_import() {
        let dir = TempDir::new().unwrap();
        let (importer, ledger) = importer();

        let counts = importer
            .import_csv_files(
                &write(&dir, "wallets.csv", WALLETS_CSV),
                &write(&dir, "signals.csv", SIGNALS_CSV),
                &write(&dir, "links.csv", LINKS_CSV),
            )
            .await
            .unwrap();

        assert_eq!(counts.wallets, 3);
        assert_eq!(counts.signals, 2);
        assert_eq!(counts.links, 2);
        // garbage wallet + duplicate link + orphan link + bogus wallet link
        assert_eq!(counts.skipped, 4);

        let kol1 = WalletLedger::get(ledger.as_ref(), &WalletId::kol(1)).await.unwrap().unwrap();
        assert_eq!(kol1.total_calls, 10);
        assert!((kol1.success_rate - 0.7).abs() < 1e-9);
        assert_eq!(kol1.date_added.year(), 2024);
        assert_eq!(kol1.last_seen.hour(), 8);

        // Built from type and number when the unique id column is empty
        assert!(WalletLedger::get(ledger.as_ref(), &WalletId::kol(9)).await.unwrap().is_some());

        let signal = SignalLedger::get(ledger.as_ref(), "historical_1").await.unwrap().unwrap();
        assert_eq!(signal.performance_status, PerformanceStatus::Success);
        assert!(signal.evaluation_complete);
        assert_eq!(signal.profit_multiplier, 2.5);
        assert_eq!(signal.wallets.len(), 2);
        assert_eq!(signal.wallets[0].link_id, "historical_link_1_KOL_1");
        assert_eq!(signal.wallets[0].mc_at_buy, 12_000.0);

        let second = SignalLedger::get(ledger.as_ref(), "historical_2").await.unwrap().unwrap();
        assert_eq!(second.token_name, UNKNOWN_TOKEN);
        assert_eq!(second.performance_status, PerformanceStatus::Pending);
        assert!(!second.evaluation_complete);

        let status = importer.status().await.unwrap();
        assert_eq!(
            status,
            ImportStatus {
                wallets_count: 3,
                signals_count: 2,
                links_count: 2
            }
        );
    }

    const NO_LINKS_CSV: &str = "signal_id,wallet_unique_id,mc_at_buy\n";

    async fn import_without_links(importer: &DataImporter) -> ImportCounts {
        importer
            .import_data(WALLETS_CSV.as_bytes(), SIGNALS_CSV.as_bytes(), NO_LINKS_CSV.as_bytes())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reimport_skips_existing() {
        let (importer, _ledger) = importer();
        let first = import_without_links(&importer).await;
        assert_eq!(first.wallets, 3);
        assert_eq!(first.signals, 2);

        let second = import_without_links(&importer).await;
        assert_eq!(second.wallets, 0);
        assert_eq!(second.signals, 0);
        assert_eq!(second.skipped, 6);
    }

    #[tokio::test]
    async fn test_missing_file_rejected_before_import() {
        let dir = TempDir::new().unwrap();
        let (importer, ledger) = importer();
        let wallets = write(&dir, "wallets.csv", WALLETS_CSV);

        let err = importer
            .import_csv_files(&wallets, &dir.path().join("nope.csv"), &wallets)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Import(_)));
        assert!(WalletLedger::list(ledger.as_ref()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_row_imports_nothing() {
        let (importer, ledger) = importer();
        let links = "signal_id,wallet_unique_id,mc_at_buy\n1,KOL_1,12000\n1,New Wallet_56,lots\n";

        let err = importer
            .import_data(WALLETS_CSV.as_bytes(), SIGNALS_CSV.as_bytes(), links.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Import(_)));

        let status = importer.status().await.unwrap();
        assert_eq!(status.wallets_count, 0);
        assert_eq!(status.signals_count, 0);
        assert!(SignalLedger::get(ledger.as_ref(), "historical_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (importer, ledger) = importer();
        import_without_links(&importer).await;

        let removed = importer.clear_all().await.unwrap();
        assert_eq!(removed.wallets_count, 3);
        assert_eq!(removed.signals_count, 2);
        assert!(SignalLedger::list(ledger.as_ref()).await.unwrap().is_empty());
        assert_eq!(importer.status().await.unwrap().wallets_count, 0);
    }

    #[test]
    fn test_parse_timestamp_fallbacks() {
        let now = Utc::now();
        assert_eq!(parse_timestamp(None, now), now);
        assert_eq!(parse_timestamp(Some("  "), now), now);
        assert_eq!(parse_timestamp(Some("yesterday"), now), now);
        let parsed = parse_timestamp(Some("2024-02-01 12:00:00.250"), now);
        assert_eq!(parsed.minute(), 0);
        assert_eq!(parsed.day(), 1);
        assert_eq!(parse_timestamp(Some("2024-02-02"), now).hour(), 0);
    }
}
