//! Confidence scoring of buy signals
//!
//! The scoring engine takes the wallets participating in a new signal plus a
//! point-in-time snapshot of their historical performance and produces an
//! additive confidence score, a decision and the reasons behind it.
//!
//! Scoring never touches storage; the caller supplies the snapshot.

pub mod rules;

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::types::{Decision, WalletId, WalletStats};

pub use rules::{DecisionThresholds, PerformanceBands, Ruleset, ScoreWeights};

/// Historical performance known at scoring time, keyed by wallet
pub type PerformanceSnapshot = HashMap<WalletId, WalletStats>;

/// Final scoring result with decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringResult {
    pub score: f64,
    pub decision: Decision,
    /// Summary lines first, then rule reasons in encounter order
    pub reasons: Vec<String>,
    pub high_performers: usize,
    pub low_performers: usize,
}

/// How one wallet's history classified it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletClass {
    HighPerformer,
    LowPerformer,
    /// Known wallet in neither band
    Neutral,
    /// No history at scoring time
    Unknown,
}

/// The main scoring engine
pub struct ScoringEngine {
    rules: Ruleset,
}

impl ScoringEngine {
    /// Create with the default ruleset
    pub fn new() -> Self {
        Self::with_rules(Ruleset::default())
    }

    /// Create with a custom ruleset
    pub fn with_rules(rules: Ruleset) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &Ruleset {
        &self.rules
    }

    /// Classify a single wallet against the performance bands
    pub fn classify(&self, stats: Option<&WalletStats>) -> WalletClass {
        let bands = &self.rules.bands;
        match stats {
            None => WalletClass::Unknown,
            Some(s) if s.success_rate >= bands.high_performer_rate => WalletClass::HighPerformer,
            Some(s)
                if s.success_rate < bands.low_performer_rate
                    && s.total_calls > bands.low_performer_min_calls =>
            {
                WalletClass::LowPerformer
            }
            Some(_) => WalletClass::Neutral,
        }
    }

    /// Score the participating wallets of a signal
    pub fn score(&self, participants: &[WalletId], snapshot: &PerformanceSnapshot) -> ScoringResult {
        let weights = &self.rules.weights;
        let present: HashSet<&WalletId> = participants.iter().collect();

        let mut score = 0.0;
        let mut reasons = Vec::new();

        // Group rules: the trio supersedes every pair
        let trio = &self.rules.golden_trio;
        if !trio.is_empty() && trio.iter().all(|w| present.contains(w)) {
            score += weights.trio_bonus;
            reasons.push(format!("🏆 Golden trio present: {}", join_ids(trio, ", ")));
        } else {
            for pair in &self.rules.golden_pairs {
                if pair.iter().all(|w| present.contains(w)) {
                    score += weights.pair_bonus;
                    reasons.push(format!("💎 Golden pair present: {}", join_ids(pair, " & ")));
                }
            }
        }

        // Individual rules
        let mut high_performers = 0;
        let mut low_performers = 0;

        for wallet in participants {
            let stats = snapshot.get(wallet);
            match self.classify(stats) {
                WalletClass::HighPerformer => {
                    score += weights.high_performer_bonus;
                    high_performers += 1;
                    reasons.push(format!(
                        "✅ {}: high success rate ({:.1}%)",
                        wallet,
                        rate_pct(stats)
                    ));
                }
                WalletClass::LowPerformer => {
                    score += weights.low_performer_penalty;
                    low_performers += 1;
                    reasons.push(format!(
                        "❌ {}: poor performance ({:.1}%)",
                        wallet,
                        rate_pct(stats)
                    ));
                }
                WalletClass::Neutral => {
                    score += weights.participation_bonus;
                }
                WalletClass::Unknown => {
                    score += weights.participation_bonus;
                    reasons.push(format!("🆕 {}: new wallet", wallet));
                }
            }
        }

        let decision = self.rules.thresholds.decide(score);

        let mut summary = vec![
            format!("📊 Total score: {}", score),
            format!("📈 High performers: {}", high_performers),
        ];
        if low_performers > 0 {
            summary.push(format!("📉 Low performers: {}", low_performers));
        }
        summary.extend(reasons);

        ScoringResult {
            score,
            decision,
            reasons: summary,
            high_performers,
            low_performers,
        }
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn join_ids(ids: &[WalletId], sep: &str) -> String {
    ids.iter().map(|w| w.to_string()).collect::<Vec<_>>().join(sep)
}

fn rate_pct(stats: Option<&WalletStats>) -> f64 {
    stats.map(|s| s.success_rate * 100.0).unwrap_or(0.0)
}
