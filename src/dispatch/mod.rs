//! Inbound message routing
//!
//! A `kol_track` message becomes a new scored signal. Price-update messages
//! (`phanes_nf`, `phanes_15m`) are evaluated against the pending signal for
//! their contract under a per-contract lock. Notifications go out only after
//! the unit of work has committed and the lock is released.

mod dedup;

pub use dedup::IdempotencyCache;

use backoff::{future::retry, ExponentialBackoff};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::evaluation::{EvaluationOutcome, Evaluator};
use crate::extract::{extract_buy_signal, extract_price_update, PriceUpdateData};
use crate::ledger::{KeyedLocks, Ledger, SignalLedger, WalletLedger};
use crate::notify::{format_decision_message, format_performance_update, NotificationSink};
use crate::scoring::ScoringEngine;
use crate::types::{Decision, PerformanceStatus, Signal, WalletId, WalletSignalLink};

/// Channel origin of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// Wallet-tracking channel: buy signals
    KolTrack,
    /// Price-tracking channel (new pairs)
    PhanesNf,
    /// Price-tracking channel (15 minute updates)
    #[serde(rename = "phanes_15m")]
    Phanes15m,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::KolTrack => "kol_track",
            SignalType::PhanesNf => "phanes_nf",
            SignalType::Phanes15m => "phanes_15m",
        }
    }

    pub fn is_price_update(&self) -> bool {
        !matches!(self, SignalType::KolTrack)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "kol_track" => Ok(SignalType::KolTrack),
            "phanes_nf" => Ok(SignalType::PhanesNf),
            "phanes_15m" => Ok(SignalType::Phanes15m),
            other => Err(Error::UnknownSignalType(other.to_string())),
        }
    }
}

/// Webhook body as posted by the channel listener
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookPayload {
    pub signal_type: Option<String>,
    pub message_text: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Telegram ids arrive as numbers or strings
    #[serde(default)]
    pub channel_id: Option<serde_json::Value>,
    #[serde(default)]
    pub message_id: Option<serde_json::Value>,
}

impl WebhookPayload {
    /// Both required fields present and non-empty
    pub fn has_required_fields(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.signal_type) && present(&self.message_text)
    }

    /// `<channel_id>_<message_id>` when both ids are present
    pub fn idempotency_key(&self) -> Option<String> {
        fn render(v: &serde_json::Value) -> Option<String> {
            match v {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        }
        let channel = render(self.channel_id.as_ref()?)?;
        let message = render(self.message_id.as_ref()?)?;
        Some(format!("{}_{}", channel, message))
    }
}

/// Structured result of handling one message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    SignalCreated {
        signal_id: String,
        token_name: String,
        contract_address: String,
        wallets_count: usize,
        decision: Decision,
        confidence_score: f64,
        reasons: Vec<String>,
        recommendation_sent: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    InitialPriceRecorded {
        signal_id: String,
        initial_ath: f64,
    },
    AwaitingInitialPrice {
        signal_id: String,
    },
    Evaluated {
        signal_id: String,
        performance_status: PerformanceStatus,
        evaluation_complete: bool,
        initial_ath: f64,
        current_ath: f64,
        profit_multiplier: f64,
        wallets_credited: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        notification_sent: Option<bool>,
    },
    NoPendingSignal {
        contract_address: String,
    },
    Duplicate {
        key: String,
    },
    Error {
        error: String,
    },
}

impl DispatchOutcome {
    pub fn error(reason: impl Into<String>) -> Self {
        DispatchOutcome::Error { error: reason.into() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DispatchOutcome::Error { .. })
    }
}

/// Tunables taken from configuration
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub notify_performance_updates: bool,
    pub conflict_retry_initial: Duration,
    pub conflict_retry_budget: Duration,
    pub dedup_ttl: Duration,
    pub dedup_capacity: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            notify_performance_updates: false,
            conflict_retry_initial: Duration::from_millis(10),
            conflict_retry_budget: Duration::from_millis(2_000),
            dedup_ttl: Duration::from_secs(3_600),
            dedup_capacity: 10_000,
        }
    }
}

impl DispatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            notify_performance_updates: config.notifications.performance_updates,
            conflict_retry_initial: Duration::from_millis(config.concurrency.conflict_retry_initial_ms),
            conflict_retry_budget: Duration::from_millis(config.concurrency.conflict_retry_budget_ms),
            dedup_ttl: Duration::from_secs(config.dedup.ttl_secs),
            dedup_capacity: config.dedup.capacity,
        }
    }
}

/// Result of one committed price-update unit of work
struct PriceStep {
    outcome: DispatchOutcome,
    /// Terminal transition to announce after the lock is released
    terminal: Option<Signal>,
}

/// Routes messages and owns the per-contract unit of work
pub struct Dispatcher {
    ledger: Arc<dyn Ledger>,
    wallets: Arc<dyn WalletLedger>,
    signals: Arc<dyn SignalLedger>,
    sink: Arc<dyn NotificationSink>,
    scoring: ScoringEngine,
    evaluator: Evaluator,
    locks: KeyedLocks,
    dedup: IdempotencyCache,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new<L: Ledger + 'static>(
        ledger: Arc<L>,
        sink: Arc<dyn NotificationSink>,
        scoring: ScoringEngine,
        evaluator: Evaluator,
        options: DispatchOptions,
    ) -> Self {
        let dedup = IdempotencyCache::new(options.dedup_ttl, options.dedup_capacity);
        Self {
            wallets: ledger.clone(),
            signals: ledger.clone(),
            ledger,
            sink,
            scoring,
            evaluator,
            locks: KeyedLocks::new(),
            dedup,
            options,
        }
    }

    /// Build from loaded configuration
    pub fn from_config<L: Ledger + 'static>(
        config: &Config,
        ledger: Arc<L>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::new(
            ledger,
            sink,
            ScoringEngine::with_rules(config.scoring.clone()),
            Evaluator::with_minutes(config.evaluation.time_limit_minutes),
            DispatchOptions::from_config(config),
        )
    }

    pub fn wallets(&self) -> &Arc<dyn WalletLedger> {
        &self.wallets
    }

    pub fn signals(&self) -> &Arc<dyn SignalLedger> {
        &self.signals
    }

    /// Handle one webhook delivery
    pub async fn handle_webhook(&self, payload: &WebhookPayload) -> DispatchOutcome {
        let (Some(kind), Some(text)) = (payload.signal_type.as_deref(), payload.message_text.as_deref()) else {
            return DispatchOutcome::error("Missing required fields: signal_type, message_text");
        };

        let key = payload.idempotency_key();
        if let Some(key) = &key {
            if !self.dedup.check_and_insert(key) {
                debug!(key = %key, "Duplicate delivery suppressed");
                return DispatchOutcome::Duplicate { key: key.clone() };
            }
        }

        let outcome = self.process(kind, text).await;

        // Let the listener redeliver after a failure
        if outcome.is_error() {
            if let Some(key) = &key {
                self.dedup.forget(key);
            }
        }
        outcome
    }

    /// Route message text by its signal type name
    pub async fn process(&self, signal_type: &str, text: &str) -> DispatchOutcome {
        let kind = match signal_type.parse::<SignalType>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!("{}", e);
                return DispatchOutcome::error(e.to_string());
            }
        };

        let result = if kind.is_price_update() {
            self.process_price_update(text).await
        } else {
            self.process_buy_signal(text).await
        };

        result.unwrap_or_else(|e| {
            if e.is_persistence() {
                error!(signal_type = %kind, "Ledger failure while processing message: {}", e);
            } else {
                warn!(signal_type = %kind, "Message processing failed: {}", e);
            }
            DispatchOutcome::error(e.to_string())
        })
    }

    /// Extract, score and persist a new signal, then recommend it if actionable
    pub async fn process_buy_signal(&self, text: &str) -> Result<DispatchOutcome> {
        let Some(data) = extract_buy_signal(text) else {
            debug!("No contract address in buy signal message");
            return Ok(DispatchOutcome::error("Failed to extract buy signal data"));
        };

        // A wallet listed twice counts once; its first market cap wins
        let mut seen = HashSet::new();
        let entries: Vec<_> = data
            .wallets
            .into_iter()
            .filter(|w| seen.insert(w.wallet_id.clone()))
            .collect();
        let participants: Vec<WalletId> = entries.iter().map(|w| w.wallet_id.clone()).collect();

        let snapshot = self.wallets.snapshot(&participants).await?;
        let scoring = self.scoring.score(&participants, &snapshot);

        let now = Utc::now();
        let signal_id = new_signal_id(now);
        let signal = Signal {
            signal_id: signal_id.clone(),
            contract_address: data.contract_address.clone(),
            signal_time: now,
            token_name: data.token_name.clone(),
            wallets: entries
                .iter()
                .map(|w| WalletSignalLink::new(&signal_id, w.wallet_id.clone(), w.mc_at_buy))
                .collect(),
            initial_ath_usd: 0.0,
            final_ath_usd: 0.0,
            profit_multiplier: 0.0,
            performance_status: PerformanceStatus::Pending,
            evaluation_complete: false,
            decision: scoring.decision,
            confidence_score: scoring.score,
            decision_reasons: scoring.reasons.clone(),
            version: 0,
        };

        // Signal and per-wallet call counts land together or not at all
        self.ledger.record_signal(signal).await?;

        info!(
            signal_id = %signal_id,
            token = %data.token_name,
            contract = %data.contract_address,
            wallets = participants.len(),
            score = scoring.score,
            decision = %scoring.decision,
            "Buy signal recorded"
        );

        let message = format_decision_message(
            scoring.decision,
            &data.token_name,
            &data.contract_address,
            scoring.score,
            &scoring.reasons,
            now,
        );
        let recommendation_sent = match &message {
            Some(text) => self.sink.send(text).await,
            None => false,
        };

        Ok(DispatchOutcome::SignalCreated {
            signal_id,
            token_name: data.token_name,
            contract_address: data.contract_address,
            wallets_count: participants.len(),
            decision: scoring.decision,
            confidence_score: scoring.score,
            reasons: scoring.reasons,
            recommendation_sent,
            message,
        })
    }

    /// Evaluate the pending signal for the update's contract
    pub async fn process_price_update(&self, text: &str) -> Result<DispatchOutcome> {
        let Some(update) = extract_price_update(text) else {
            debug!("No contract address in price update message");
            return Ok(DispatchOutcome::error("Failed to extract price update data"));
        };

        let step = {
            let _guard = self.locks.lock(&update.contract_address).await;

            let backoff = ExponentialBackoff {
                initial_interval: self.options.conflict_retry_initial,
                max_interval: self.options.conflict_retry_initial * 8,
                max_elapsed_time: Some(self.options.conflict_retry_budget),
                ..Default::default()
            };

            let update = &update;
            retry(backoff, move || async move {
                match self.evaluate_once(update).await {
                    Ok(step) => Ok(step),
                    Err(e) if e.is_retryable() => {
                        warn!(contract = %update.contract_address, "Retrying after conflict: {}", e);
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            })
            .await?
        };
        self.locks.prune();

        let mut outcome = step.outcome;
        if let (Some(signal), true) = (step.terminal, self.options.notify_performance_updates) {
            let sent = match format_performance_update(
                &signal.signal_id,
                &signal.token_name,
                signal.performance_status,
                signal.profit_multiplier,
            ) {
                Some(text) => self.sink.send(&text).await,
                None => false,
            };
            if let DispatchOutcome::Evaluated { notification_sent, .. } = &mut outcome {
                *notification_sent = Some(sent);
            }
        }

        Ok(outcome)
    }

    /// One read-modify-write attempt. Caller holds the contract lock.
    async fn evaluate_once(&self, update: &PriceUpdateData) -> Result<PriceStep> {
        let Some(mut signal) = self
            .signals
            .find_by_contract_pending_evaluation(&update.contract_address)
            .await?
        else {
            debug!(contract = %update.contract_address, "No pending signal for price update");
            return Ok(PriceStep {
                outcome: DispatchOutcome::NoPendingSignal {
                    contract_address: update.contract_address.clone(),
                },
                terminal: None,
            });
        };

        // The terminal write and the success credit commit as one unit, so a
        // failed commit leaves the signal pending for the next delivery
        let evaluation = self.evaluator.apply(&mut signal, update.ath_usd, Utc::now());
        let (stored, wallets_credited) = if evaluation.modified_signal() {
            self.ledger.commit_signal(&signal).await?
        } else {
            (signal, 0)
        };

        let step = match evaluation {
            EvaluationOutcome::AlreadyComplete { .. } => PriceStep {
                outcome: DispatchOutcome::NoPendingSignal {
                    contract_address: update.contract_address.clone(),
                },
                terminal: None,
            },
            EvaluationOutcome::AwaitingInitialPrice => PriceStep {
                outcome: DispatchOutcome::AwaitingInitialPrice {
                    signal_id: stored.signal_id.clone(),
                },
                terminal: None,
            },
            EvaluationOutcome::InitialRecorded { initial_ath } => {
                info!(signal_id = %stored.signal_id, initial_ath, "Initial ATH recorded");
                PriceStep {
                    outcome: DispatchOutcome::InitialPriceRecorded {
                        signal_id: stored.signal_id.clone(),
                        initial_ath,
                    },
                    terminal: None,
                }
            }
            EvaluationOutcome::Evaluated {
                evaluation,
                initial_ath,
                current_ath,
                profit_multiplier,
            } => {
                if evaluation.complete {
                    info!(
                        signal_id = %stored.signal_id,
                        status = %evaluation.status,
                        multiplier = profit_multiplier,
                        wallets_credited,
                        "Signal evaluation complete"
                    );
                }

                PriceStep {
                    outcome: DispatchOutcome::Evaluated {
                        signal_id: stored.signal_id.clone(),
                        performance_status: evaluation.status,
                        evaluation_complete: evaluation.complete,
                        initial_ath,
                        current_ath,
                        profit_multiplier,
                        wallets_credited,
                        notification_sent: None,
                    },
                    terminal: evaluation.complete.then(|| stored.clone()),
                }
            }
        };
        Ok(step)
    }
}

/// `signal_<YYYYmmdd_HHMMSS>_<8 hex>`
fn new_signal_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("signal_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ImportApplied, ImportBatch, MemoryLedger};
    use crate::scoring::Ruleset;
    use crate::types::WalletStats;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    const CA: &str = "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr";

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, text: &str) -> bool {
            self.sent.lock().await.push(text.to_string());
            !self.fail
        }
    }

    fn dispatcher_with(
        ledger: Arc<MemoryLedger>,
        sink: Arc<RecordingSink>,
        evaluator: Evaluator,
        options: DispatchOptions,
    ) -> Dispatcher {
        Dispatcher::new(
            ledger,
            sink,
            ScoringEngine::with_rules(Ruleset::default()),
            evaluator,
            options,
        )
    }

    fn setup() -> (Dispatcher, Arc<MemoryLedger>, Arc<RecordingSink>) {
        let ledger = Arc::new(MemoryLedger::in_memory());
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(
            ledger.clone(),
            sink.clone(),
            Evaluator::default(),
            DispatchOptions::default(),
        );
        (dispatcher, ledger, sink)
    }

    /// Memory ledger whose signal commits report a concurrent writer
    /// while `conflicts` is non-zero
    #[derive(Default)]
    struct ContendedLedger {
        inner: MemoryLedger,
        conflicts: AtomicUsize,
        commits: AtomicUsize,
    }

    #[async_trait]
    impl WalletLedger for ContendedLedger {
        async fn get(&self, id: &WalletId) -> Result<Option<WalletStats>> {
            WalletLedger::get(&self.inner, id).await
        }

        async fn upsert(&self, id: &WalletId, delta_calls: u32, delta_successes: u32) -> Result<WalletStats> {
            self.inner.upsert(id, delta_calls, delta_successes).await
        }

        async fn list(&self) -> Result<Vec<WalletStats>> {
            WalletLedger::list(&self.inner).await
        }
    }

    #[async_trait]
    impl SignalLedger for ContendedLedger {
        async fn create(&self, signal: Signal) -> Result<Signal> {
            self.inner.create(signal).await
        }

        async fn get(&self, signal_id: &str) -> Result<Option<Signal>> {
            SignalLedger::get(&self.inner, signal_id).await
        }

        async fn find_by_contract_pending_evaluation(&self, contract_address: &str) -> Result<Option<Signal>> {
            self.inner.find_by_contract_pending_evaluation(contract_address).await
        }

        async fn update(&self, signal: &Signal) -> Result<Signal> {
            self.inner.update(signal).await
        }

        async fn list(&self) -> Result<Vec<Signal>> {
            SignalLedger::list(&self.inner).await
        }
    }

    #[async_trait]
    impl Ledger for ContendedLedger {
        async fn record_signal(&self, signal: Signal) -> Result<Signal> {
            self.inner.record_signal(signal).await
        }

        async fn commit_signal(&self, signal: &Signal) -> Result<(Signal, usize)> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::PersistenceConflict {
                    signal_id: signal.signal_id.clone(),
                    expected: signal.version,
                    found: signal.version + 1,
                });
            }
            self.inner.commit_signal(signal).await
        }

        async fn apply_import(&self, batch: ImportBatch) -> Result<ImportApplied> {
            self.inner.apply_import(batch).await
        }

        async fn clear_all(&self) -> Result<(usize, usize)> {
            self.inner.clear_all().await
        }
    }

    fn contended(options: DispatchOptions) -> (Dispatcher, Arc<ContendedLedger>) {
        let ledger = Arc::new(ContendedLedger::default());
        let dispatcher = Dispatcher::new(
            ledger.clone(),
            Arc::new(RecordingSink::default()),
            ScoringEngine::with_rules(Ruleset::default()),
            Evaluator::default(),
            options,
        );
        (dispatcher, ledger)
    }

    fn doge2_message() -> String {
        format!(
            "🔥 2 wallets bought DOGE2 avg MC $15K\n\
             1. KOL 15 bought 2.1 SOL | MC: $10K\n\
             2. KOL 22 bought 0.5 SOL | MC: $20K\n\
             solana `{}`",
            CA
        )
    }

    fn price_message(ath: &str) -> String {
        format!("🟢 DOGE2 [15K/3%]\n├ `{}`\n└ 💰 MC: $15.2K | ATH: ${}", CA, ath)
    }

    #[tokio::test]
    async fn test_doge2_end_to_end() {
        let (dispatcher, ledger, sink) = setup();

        let outcome = dispatcher.process("kol_track", &doge2_message()).await;
        let DispatchOutcome::SignalCreated {
            signal_id,
            token_name,
            wallets_count,
            decision,
            confidence_score,
            reasons,
            recommendation_sent,
            ..
        } = outcome
        else {
            panic!("unexpected outcome: {:?}", outcome);
        };

        assert_eq!(token_name, "DOGE2");
        assert_eq!(wallets_count, 2);
        // Golden pair +35, two wallets without history +2 each
        assert_eq!(confidence_score, 39.0);
        assert_eq!(decision, Decision::Buy);
        assert!(reasons.iter().any(|r| r.contains("Golden pair")));
        assert!(recommendation_sent);
        assert_eq!(sink.sent.lock().await.len(), 1);

        let signal = SignalLedger::get(ledger.as_ref(), &signal_id).await.unwrap().unwrap();
        assert_eq!(signal.wallets.len(), 2);
        assert_eq!(signal.wallets[0].mc_at_buy, 10_000.0);
        assert_eq!(signal.wallets[1].mc_at_buy, 20_000.0);
        assert_eq!(signal.wallets[0].link_id, format!("link_{}_KOL_15", signal_id));

        for id in [WalletId::kol(15), WalletId::kol(22)] {
            let stats = WalletLedger::get(ledger.as_ref(), &id).await.unwrap().unwrap();
            assert_eq!(stats.total_calls, 1);
            assert_eq!(stats.successful_calls, 0);
        }

        // First price update sets the reference, the second evaluates
        let outcome = dispatcher.process("phanes_nf", &price_message("15K")).await;
        assert!(matches!(outcome, DispatchOutcome::InitialPriceRecorded { initial_ath, .. } if initial_ath == 15_000.0));

        let outcome = dispatcher.process("phanes_15m", &price_message("45K")).await;
        match outcome {
            DispatchOutcome::Evaluated {
                performance_status,
                evaluation_complete,
                profit_multiplier,
                wallets_credited,
                ..
            } => {
                assert_eq!(performance_status, PerformanceStatus::Success);
                assert!(evaluation_complete);
                assert_eq!(profit_multiplier, 3.0);
                assert_eq!(wallets_credited, 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let stats = WalletLedger::get(ledger.as_ref(), &WalletId::kol(15)).await.unwrap().unwrap();
        assert_eq!(stats.successful_calls, 1);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_success_never_double_increments() {
        let (dispatcher, ledger, _sink) = setup();
        dispatcher.process("kol_track", &doge2_message()).await;
        dispatcher.process("phanes_nf", &price_message("10K")).await;
        dispatcher.process("phanes_nf", &price_message("20K")).await;

        // Further updates find no pending signal
        for ath in ["30K", "40K", "50K"] {
            let outcome = dispatcher.process("phanes_nf", &price_message(ath)).await;
            assert!(matches!(outcome, DispatchOutcome::NoPendingSignal { .. }));
        }

        let stats = WalletLedger::get(ledger.as_ref(), &WalletId::kol(22)).await.unwrap().unwrap();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.successful_calls, 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_credit_once() {
        let (dispatcher, ledger, _sink) = setup();
        let dispatcher = Arc::new(dispatcher);
        dispatcher.process("kol_track", &doge2_message()).await;
        dispatcher.process("phanes_nf", &price_message("10K")).await;

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher
                        .process("phanes_15m", &price_message(&format!("{}K", 20 + i)))
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert!(!handle.await.unwrap().is_error());
        }

        let stats = WalletLedger::get(ledger.as_ref(), &WalletId::kol(15)).await.unwrap().unwrap();
        assert_eq!(stats.successful_calls, 1);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_signal_pending_for_redelivery() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        let ledger = Arc::new(MemoryLedger::new(Some(data_dir.join("ledger.json"))));
        let dispatcher = dispatcher_with(
            ledger.clone(),
            Arc::new(RecordingSink::default()),
            Evaluator::default(),
            DispatchOptions::default(),
        );

        let DispatchOutcome::SignalCreated { signal_id, .. } =
            dispatcher.process("kol_track", &doge2_message()).await
        else {
            panic!("signal not created");
        };
        dispatcher.process("phanes_nf", &price_message("10K")).await;

        // Snapshot directory replaced by a plain file: every save fails
        std::fs::remove_dir_all(&data_dir).unwrap();
        std::fs::write(&data_dir, "blocked").unwrap();

        let outcome = dispatcher.process("phanes_nf", &price_message("20K")).await;
        assert!(outcome.is_error());

        let signal = SignalLedger::get(ledger.as_ref(), &signal_id).await.unwrap().unwrap();
        assert!(!signal.evaluation_complete);
        assert_eq!(signal.performance_status, PerformanceStatus::Pending);
        let stats = WalletLedger::get(ledger.as_ref(), &WalletId::kol(15)).await.unwrap().unwrap();
        assert_eq!(stats.successful_calls, 0);

        // Once the disk recovers the next update completes the signal
        std::fs::remove_file(&data_dir).unwrap();
        let outcome = dispatcher.process("phanes_nf", &price_message("30K")).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Evaluated { performance_status: PerformanceStatus::Success, wallets_credited: 2, .. }
        ));
        for id in [WalletId::kol(15), WalletId::kol(22)] {
            let stats = WalletLedger::get(ledger.as_ref(), &id).await.unwrap().unwrap();
            assert_eq!(stats.successful_calls, 1);
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let (dispatcher, ledger) = contended(DispatchOptions::default());
        dispatcher.process("kol_track", &doge2_message()).await;
        dispatcher.process("phanes_nf", &price_message("10K")).await;

        ledger.commits.store(0, Ordering::SeqCst);
        ledger.conflicts.store(1, Ordering::SeqCst);
        let outcome = dispatcher.process("phanes_nf", &price_message("20K")).await;

        assert!(matches!(
            outcome,
            DispatchOutcome::Evaluated { performance_status: PerformanceStatus::Success, wallets_credited: 2, .. }
        ));
        assert_eq!(ledger.commits.load(Ordering::SeqCst), 2);
        let stats = WalletLedger::get(ledger.as_ref(), &WalletId::kol(15)).await.unwrap().unwrap();
        assert_eq!(stats.successful_calls, 1);
    }

    #[tokio::test]
    async fn test_conflict_retry_budget_exhausted() {
        let options = DispatchOptions {
            conflict_retry_initial: Duration::from_millis(1),
            conflict_retry_budget: Duration::from_millis(20),
            ..Default::default()
        };
        let (dispatcher, ledger) = contended(options);
        dispatcher.process("kol_track", &doge2_message()).await;
        dispatcher.process("phanes_nf", &price_message("10K")).await;

        ledger.conflicts.store(usize::MAX, Ordering::SeqCst);
        let outcome = dispatcher.process("phanes_nf", &price_message("20K")).await;

        let DispatchOutcome::Error { error } = outcome else {
            panic!("expected error outcome, got {:?}", outcome);
        };
        assert!(error.contains("Concurrent update"));
        assert!(ledger.commits.load(Ordering::SeqCst) > 1);

        let pending = ledger.find_by_contract_pending_evaluation(CA).await.unwrap();
        assert!(pending.is_some());
        let stats = WalletLedger::get(ledger.as_ref(), &WalletId::kol(15)).await.unwrap().unwrap();
        assert_eq!(stats.successful_calls, 0);
    }

    #[tokio::test]
    async fn test_failure_leaves_wallets_untouched() {
        let ledger = Arc::new(MemoryLedger::in_memory());
        let sink = Arc::new(RecordingSink::default());
        let options = DispatchOptions {
            notify_performance_updates: true,
            ..Default::default()
        };
        // Zero-length window: any non-increase fails immediately
        let dispatcher = dispatcher_with(ledger.clone(), sink.clone(), Evaluator::with_minutes(0), options);

        dispatcher.process("kol_track", &doge2_message()).await;
        dispatcher.process("phanes_nf", &price_message("20K")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let outcome = dispatcher.process("phanes_nf", &price_message("18K")).await;

        match outcome {
            DispatchOutcome::Evaluated {
                performance_status,
                wallets_credited,
                notification_sent,
                ..
            } => {
                assert_eq!(performance_status, PerformanceStatus::Failure);
                assert_eq!(wallets_credited, 0);
                assert_eq!(notification_sent, Some(true));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let stats = WalletLedger::get(ledger.as_ref(), &WalletId::kol(15)).await.unwrap().unwrap();
        assert_eq!(stats.successful_calls, 0);
        // Recommendation plus failure notice
        assert_eq!(sink.sent.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_pending_update_only_moves_final_price() {
        let (dispatcher, ledger, _sink) = setup();
        let DispatchOutcome::SignalCreated { signal_id, .. } =
            dispatcher.process("kol_track", &doge2_message()).await
        else {
            panic!("signal not created");
        };
        dispatcher.process("phanes_nf", &price_message("20K")).await;
        let outcome = dispatcher.process("phanes_nf", &price_message("12K")).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Evaluated { performance_status: PerformanceStatus::Pending, evaluation_complete: false, .. }
        ));

        let signal = SignalLedger::get(ledger.as_ref(), &signal_id).await.unwrap().unwrap();
        assert_eq!(signal.initial_ath_usd, 20_000.0);
        assert_eq!(signal.final_ath_usd, 12_000.0);
        assert!(!signal.evaluation_complete);
    }

    #[tokio::test]
    async fn test_ignore_decision_not_sent() {
        let (dispatcher, _ledger, sink) = setup();
        let text = format!("1 wallets bought MEH avg\n1. KOL 99 bought | MC: $5K\n{}", CA);
        let outcome = dispatcher.process("kol_track", &text).await;
        match outcome {
            DispatchOutcome::SignalCreated {
                decision,
                recommendation_sent,
                message,
                ..
            } => {
                assert_eq!(decision, Decision::Ignore);
                assert!(!recommendation_sent);
                assert!(message.is_none());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(sink.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_not_fatal() {
        let ledger = Arc::new(MemoryLedger::in_memory());
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let dispatcher = dispatcher_with(ledger.clone(), sink, Evaluator::default(), DispatchOptions::default());

        let outcome = dispatcher.process("kol_track", &doge2_message()).await;
        assert!(matches!(outcome, DispatchOutcome::SignalCreated { recommendation_sent: false, .. }));
        assert_eq!(SignalLedger::list(ledger.as_ref()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_wallet_counted_once() {
        let (dispatcher, ledger, _sink) = setup();
        let text = format!(
            "2 wallets bought DUP avg\n1. KOL 7 | MC: $10K\n2. KOL 7 | MC: $30K\nsolana {}",
            CA
        );
        let outcome = dispatcher.process("kol_track", &text).await;
        assert!(matches!(outcome, DispatchOutcome::SignalCreated { wallets_count: 1, .. }));

        let stats = WalletLedger::get(ledger.as_ref(), &WalletId::kol(7)).await.unwrap().unwrap();
        assert_eq!(stats.total_calls, 1);
        let signal = &SignalLedger::list(ledger.as_ref()).await.unwrap()[0];
        assert_eq!(signal.wallets[0].mc_at_buy, 10_000.0);
    }

    #[tokio::test]
    async fn test_error_outcomes() {
        let (dispatcher, _ledger, _sink) = setup();

        let outcome = dispatcher.process("twitter", "anything").await;
        assert_eq!(outcome, DispatchOutcome::error("Unknown signal type: twitter"));

        assert!(dispatcher.process("kol_track", "no address here").await.is_error());
        assert!(dispatcher.process("phanes_nf", "└ ATH: $5K").await.is_error());

        let json = serde_json::to_value(dispatcher.process("kol_track", "").await).unwrap();
        assert_eq!(json["outcome"], "error");
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_webhook_redelivery_suppressed() {
        let (dispatcher, ledger, _sink) = setup();
        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "signal_type": "kol_track",
            "message_text": doge2_message(),
            "timestamp": "2024-05-01T12:00:00Z",
            "channel_id": -1001234,
            "message_id": 77
        }))
        .unwrap();

        assert_eq!(payload.idempotency_key().as_deref(), Some("-1001234_77"));
        assert!(matches!(
            dispatcher.handle_webhook(&payload).await,
            DispatchOutcome::SignalCreated { .. }
        ));
        assert_eq!(
            dispatcher.handle_webhook(&payload).await,
            DispatchOutcome::Duplicate {
                key: "-1001234_77".to_string()
            }
        );
        assert_eq!(SignalLedger::list(ledger.as_ref()).await.unwrap().len(), 1);
    }

    #[test]
    fn test_signal_type_parsing() {
        assert_eq!("kol_track".parse::<SignalType>().unwrap(), SignalType::KolTrack);
        assert!("phanes_15m".parse::<SignalType>().unwrap().is_price_update());
        assert!("PHANES_NF".parse::<SignalType>().is_err());
        assert_eq!(
            serde_json::to_string(&SignalType::Phanes15m).unwrap(),
            "\"phanes_15m\""
        );
    }

    #[test]
    fn test_signal_id_format() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:30:45Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = new_signal_id(now);
        assert!(id.starts_with("signal_20240501_123045_"));
        assert_eq!(id.len(), "signal_20240501_123045_".len() + 8);
    }
}
