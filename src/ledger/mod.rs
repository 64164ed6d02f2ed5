//! Wallet and signal persistence
//!
//! Reads go through the [`WalletLedger`] and [`SignalLedger`] traits. Every
//! write that touches both a signal and its wallets goes through [`Ledger`],
//! whose operations either land completely or leave the ledger untouched.
//! [`MemoryLedger`] implements all three over an in-process store with an
//! optional JSON snapshot on disk.

mod locks;
mod memory;

pub use locks::KeyedLocks;
pub use memory::{MemoryLedger, WriterLock};

use async_trait::async_trait;

use crate::error::Result;
use crate::scoring::PerformanceSnapshot;
use crate::types::{Signal, WalletId, WalletSignalLink, WalletStats};

/// Per-wallet call counts and success rates
#[async_trait]
pub trait WalletLedger: Send + Sync {
    async fn get(&self, id: &WalletId) -> Result<Option<WalletStats>>;

    /// Create the wallet if missing, then apply both deltas atomically.
    /// `last_seen` moves forward only when `delta_calls > 0`.
    async fn upsert(&self, id: &WalletId, delta_calls: u32, delta_successes: u32) -> Result<WalletStats>;

    async fn list(&self) -> Result<Vec<WalletStats>>;

    /// Point-in-time stats for the given wallets. Unknown wallets are absent.
    async fn snapshot(&self, ids: &[WalletId]) -> Result<PerformanceSnapshot> {
        let mut snapshot = PerformanceSnapshot::with_capacity(ids.len());
        for id in ids {
            if let Some(stats) = self.get(id).await? {
                snapshot.insert(id.clone(), stats);
            }
        }
        Ok(snapshot)
    }
}

/// Signal records with their wallet links and evaluation state
#[async_trait]
pub trait SignalLedger: Send + Sync {
    /// Store a new signal. Fails with `SignalExists` on a duplicate id.
    async fn create(&self, signal: Signal) -> Result<Signal>;

    async fn get(&self, signal_id: &str) -> Result<Option<Signal>>;

    /// Oldest signal for this contract whose evaluation is not complete
    async fn find_by_contract_pending_evaluation(&self, contract_address: &str) -> Result<Option<Signal>>;

    /// Version-checked write. The caller passes the signal as it read it
    /// (with that version); a concurrent writer in between yields
    /// `PersistenceConflict`. Returns the stored signal with its new version.
    async fn update(&self, signal: &Signal) -> Result<Signal>;

    async fn list(&self) -> Result<Vec<Signal>>;
}

/// Historical rows applied by [`Ledger::apply_import`]
#[derive(Debug, Clone, Default)]
pub struct ImportBatch {
    pub wallets: Vec<WalletStats>,
    pub signals: Vec<Signal>,
    /// Attached to the signal named by `link.signal_id`
    pub links: Vec<WalletSignalLink>,
}

/// What an import batch actually changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportApplied {
    pub wallets: usize,
    pub signals: usize,
    pub links: usize,
    /// Existing ids, duplicate links and links to unknown signals
    pub skipped: usize,
}

/// Units of work spanning signals and wallets
#[async_trait]
pub trait Ledger: WalletLedger + SignalLedger {
    /// Store a new signal and count one call for each distinct linked wallet
    async fn record_signal(&self, signal: Signal) -> Result<Signal>;

    /// Version-checked signal write. When it moves the signal into a
    /// complete SUCCESS, each distinct linked wallet gets one success in the
    /// same commit. Returns the stored signal and the number of wallets
    /// credited.
    async fn commit_signal(&self, signal: &Signal) -> Result<(Signal, usize)>;

    /// Insert absent wallets and signals, then attach links
    async fn apply_import(&self, batch: ImportBatch) -> Result<ImportApplied>;

    /// Remove every wallet and signal. Returns (wallets, signals) removed.
    async fn clear_all(&self) -> Result<(usize, usize)>;
}
