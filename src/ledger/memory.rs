//! In-process ledger with optional JSON snapshot persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ImportApplied, ImportBatch, Ledger, SignalLedger, WalletLedger};
use crate::error::{Error, Result};
use crate::types::{PerformanceStatus, Signal, WalletId, WalletStats};

#[derive(Debug, Default, Clone)]
struct LedgerState {
    wallets: HashMap<WalletId, WalletStats>,
    signals: HashMap<String, Signal>,
}

impl LedgerState {
    fn apply_wallet_delta(&mut self, id: &WalletId, calls: u32, successes: u32, now: DateTime<Utc>) -> WalletStats {
        let stats = self
            .wallets
            .entry(id.clone())
            .or_insert_with(|| WalletStats::new(id.clone(), now));
        stats.apply_delta(calls, successes, now);
        stats.clone()
    }

    /// Version and invariant checks for replacing a stored signal
    fn check_update(&self, signal: &Signal) -> Result<&Signal> {
        let current = self
            .signals
            .get(&signal.signal_id)
            .ok_or_else(|| Error::SignalNotFound(signal.signal_id.clone()))?;

        if current.version != signal.version {
            return Err(Error::PersistenceConflict {
                signal_id: signal.signal_id.clone(),
                expected: signal.version,
                found: current.version,
            });
        }
        if current.evaluation_complete && !signal.evaluation_complete {
            return Err(Error::Persistence(format!(
                "signal {} is already evaluated",
                signal.signal_id
            )));
        }
        if current.has_initial_price() && current.initial_ath_usd != signal.initial_ath_usd {
            return Err(Error::Persistence(format!(
                "initial ATH of signal {} is already set",
                signal.signal_id
            )));
        }
        Ok(current)
    }

    fn replace_signal(&mut self, signal: &Signal) -> Signal {
        let mut next = signal.clone();
        next.version = signal.version + 1;
        self.signals.insert(next.signal_id.clone(), next.clone());
        next
    }
}

/// On-disk layout of the snapshot file
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    wallets: Vec<WalletStats>,
    signals: Vec<Signal>,
}

/// Exclusive claim on a snapshot file, held as `<snapshot>.lock`.
///
/// A second process pointed at the same snapshot is refused instead of
/// silently overwriting the first one's writes. The file is removed on drop.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    pub fn acquire(snapshot: &Path) -> Result<Self> {
        let mut name = snapshot.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Persistence(format!("create {}: {}", parent.display(), e)))?;
        }

        match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "pid={} since={}", std::process::id(), Utc::now().to_rfc3339())
                    .map_err(|e| Error::Persistence(format!("write {}: {}", path.display(), e)))?;
                debug!("Acquired ledger lock {}", path.display());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                Err(Error::LedgerLocked {
                    path: path.display().to_string(),
                    holder: holder.trim().to_string(),
                })
            }
            Err(e) => Err(Error::Persistence(format!("lock {}: {}", path.display(), e))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove ledger lock {}: {}", self.path.display(), e);
        }
    }
}

/// Wallet and signal ledger backed by memory
pub struct MemoryLedger {
    state: Arc<RwLock<LedgerState>>,
    persistence_path: Option<PathBuf>,
    writer_lock: Option<WriterLock>,
}

impl MemoryLedger {
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
            persistence_path,
            writer_lock: None,
        }
    }

    /// Ledger without a snapshot file
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Claim the snapshot file for this process. No-op without a snapshot.
    pub fn with_writer_lock(mut self) -> Result<Self> {
        if let Some(path) = &self.persistence_path {
            self.writer_lock = Some(WriterLock::acquire(path)?);
        }
        Ok(self)
    }

    /// Lock file held by this ledger, if any
    pub fn lock_path(&self) -> Option<&Path> {
        self.writer_lock.as_ref().map(WriterLock::path)
    }

    /// Load the snapshot from disk if one exists
    pub async fn load(&self) -> Result<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        if !Path::new(path).exists() {
            return Ok(());
        }

        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Persistence(format!("read {}: {}", path.display(), e)))?;
        let snapshot: Snapshot = serde_json::from_str(&data)
            .map_err(|e| Error::Persistence(format!("parse {}: {}", path.display(), e)))?;

        let mut state = self.state.write().await;
        state.wallets = snapshot
            .wallets
            .into_iter()
            .map(|w| (w.wallet_id.clone(), w))
            .collect();
        state.signals = snapshot
            .signals
            .into_iter()
            .map(|s| (s.signal_id.clone(), s))
            .collect();

        info!(
            wallets = state.wallets.len(),
            signals = state.signals.len(),
            "Loaded ledger snapshot from {}",
            path.display()
        );
        Ok(())
    }

    /// Write the current state to the snapshot file
    pub async fn save(&self) -> Result<()> {
        // Write lock so two saves never interleave on the temp file
        let state = self.state.write().await;
        self.persist(&*state).await
    }

    async fn persist(&self, state: &LedgerState) -> Result<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };

        let mut snapshot = Snapshot {
            wallets: state.wallets.values().cloned().collect(),
            signals: state.signals.values().cloned().collect(),
        };
        snapshot.wallets.sort_by(|a, b| a.wallet_id.cmp(&b.wallet_id));
        snapshot.signals.sort_by(|a, b| a.signal_time.cmp(&b.signal_time));
        let data = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Persistence(format!("create {}: {}", parent.display(), e)))?;
        }

        // Write-then-rename keeps the previous snapshot intact on a crash
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Error::Persistence(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::Persistence(format!("rename to {}: {}", path.display(), e)))?;

        debug!("Saved ledger snapshot to {}", path.display());
        Ok(())
    }

    /// Run `change` under the write lock and persist once. If the change or
    /// the snapshot write fails, memory is restored to its prior state.
    async fn commit<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerState) -> Result<T>,
    {
        let mut state = self.state.write().await;
        let before = state.clone();

        let value = match change(&mut *state) {
            Ok(value) => value,
            Err(e) => {
                *state = before;
                return Err(e);
            }
        };
        if let Err(e) = self.persist(&*state).await {
            *state = before;
            return Err(e);
        }
        Ok(value)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl WalletLedger for MemoryLedger {
    async fn get(&self, id: &WalletId) -> Result<Option<WalletStats>> {
        Ok(self.state.read().await.wallets.get(id).cloned())
    }

    async fn upsert(&self, id: &WalletId, delta_calls: u32, delta_successes: u32) -> Result<WalletStats> {
        let now = Utc::now();
        let updated = self
            .commit(|state| Ok(state.apply_wallet_delta(id, delta_calls, delta_successes, now)))
            .await?;

        debug!(
            wallet = %id,
            total_calls = updated.total_calls,
            successful_calls = updated.successful_calls,
            "Wallet stats updated"
        );
        Ok(updated)
    }

    async fn list(&self) -> Result<Vec<WalletStats>> {
        Ok(self.state.read().await.wallets.values().cloned().collect())
    }
}

#[async_trait]
impl SignalLedger for MemoryLedger {
    async fn create(&self, mut signal: Signal) -> Result<Signal> {
        self.commit(|state| {
            if state.signals.contains_key(&signal.signal_id) {
                return Err(Error::SignalExists(signal.signal_id.clone()));
            }
            signal.version = 0;
            state.signals.insert(signal.signal_id.clone(), signal.clone());
            Ok(signal)
        })
        .await
    }

    async fn get(&self, signal_id: &str) -> Result<Option<Signal>> {
        Ok(self.state.read().await.signals.get(signal_id).cloned())
    }

    async fn find_by_contract_pending_evaluation(&self, contract_address: &str) -> Result<Option<Signal>> {
        let state = self.state.read().await;
        Ok(state
            .signals
            .values()
            .filter(|s| s.contract_address == contract_address && !s.evaluation_complete)
            .min_by(|a, b| {
                a.signal_time
                    .cmp(&b.signal_time)
                    .then_with(|| a.signal_id.cmp(&b.signal_id))
            })
            .cloned())
    }

    async fn update(&self, signal: &Signal) -> Result<Signal> {
        self.commit(|state| {
            state.check_update(signal)?;
            Ok(state.replace_signal(signal))
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Signal>> {
        Ok(self.state.read().await.signals.values().cloned().collect())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record_signal(&self, mut signal: Signal) -> Result<Signal> {
        self.commit(|state| {
            if state.signals.contains_key(&signal.signal_id) {
                return Err(Error::SignalExists(signal.signal_id.clone()));
            }
            for id in signal.wallet_ids().into_iter().unique() {
                state.apply_wallet_delta(&id, 1, 0, signal.signal_time);
            }
            signal.version = 0;
            state.signals.insert(signal.signal_id.clone(), signal.clone());
            Ok(signal)
        })
        .await
    }

    async fn commit_signal(&self, signal: &Signal) -> Result<(Signal, usize)> {
        let now = Utc::now();
        self.commit(|state| {
            let was_complete = state.check_update(signal)?.evaluation_complete;
            let stored = state.replace_signal(signal);

            let mut credited = 0;
            if !was_complete && stored.evaluation_complete && stored.performance_status == PerformanceStatus::Success {
                for id in stored.wallet_ids().into_iter().unique() {
                    state.apply_wallet_delta(&id, 0, 1, now);
                    credited += 1;
                }
            }
            Ok((stored, credited))
        })
        .await
    }

    async fn apply_import(&self, batch: ImportBatch) -> Result<ImportApplied> {
        self.commit(|state| {
            let mut applied = ImportApplied::default();

            for mut stats in batch.wallets {
                if state.wallets.contains_key(&stats.wallet_id) {
                    applied.skipped += 1;
                    continue;
                }
                stats.recompute_rate();
                state.wallets.insert(stats.wallet_id.clone(), stats);
                applied.wallets += 1;
            }

            for mut signal in batch.signals {
                if state.signals.contains_key(&signal.signal_id) {
                    applied.skipped += 1;
                    continue;
                }
                signal.version = 0;
                state.signals.insert(signal.signal_id.clone(), signal);
                applied.signals += 1;
            }

            for link in batch.links {
                let Some(signal) = state.signals.get_mut(&link.signal_id) else {
                    warn!(signal_id = %link.signal_id, "Skipping link to unknown signal");
                    applied.skipped += 1;
                    continue;
                };
                if signal.wallets.iter().any(|l| l.wallet_id == link.wallet_id) {
                    applied.skipped += 1;
                    continue;
                }
                signal.wallets.push(link);
                signal.version += 1;
                applied.links += 1;
            }

            Ok(applied)
        })
        .await
    }

    async fn clear_all(&self) -> Result<(usize, usize)> {
        let counts = self
            .commit(|state| {
                let counts = (state.wallets.len(), state.signals.len());
                state.wallets.clear();
                state.signals.clear();
                Ok(counts)
            })
            .await?;
        info!(wallets = counts.0, signals = counts.1, "Cleared ledger");
        Ok(counts)
    }
}
