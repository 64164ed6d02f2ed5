//! Scoring ruleset: golden wallet groups, weights and decision thresholds
//!
//! The ruleset is plain configuration data so the scorer can be exercised
//! against arbitrary rule sets and re-tuned without a rebuild.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Decision, WalletId};

/// Complete set of scoring rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    /// Wallets whose joint participation earns the trio bonus.
    /// An empty trio disables the rule.
    #[serde(default = "default_golden_trio")]
    pub golden_trio: Vec<WalletId>,

    /// Wallet pairs that each earn the pair bonus when the trio is absent
    #[serde(default = "default_golden_pairs")]
    pub golden_pairs: Vec<Vec<WalletId>>,

    #[serde(default)]
    pub weights: ScoreWeights,

    #[serde(default)]
    pub bands: PerformanceBands,

    #[serde(default)]
    pub thresholds: DecisionThresholds,
}

/// Points awarded or deducted by each rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_trio_bonus")]
    pub trio_bonus: f64,
    #[serde(default = "default_pair_bonus")]
    pub pair_bonus: f64,
    #[serde(default = "default_high_performer_bonus")]
    pub high_performer_bonus: f64,
    /// Negative value
    #[serde(default = "default_low_performer_penalty")]
    pub low_performer_penalty: f64,
    /// Awarded to every wallet that is neither high nor low performer
    #[serde(default = "default_participation_bonus")]
    pub participation_bonus: f64,
}

/// Success-rate bands that classify individual wallets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBands {
    /// success_rate >= this is a high performer
    #[serde(default = "default_high_performer_rate")]
    pub high_performer_rate: f64,
    /// success_rate < this (with enough calls) is a low performer
    #[serde(default = "default_low_performer_rate")]
    pub low_performer_rate: f64,
    /// Low performer requires strictly more calls than this
    #[serde(default = "default_low_performer_min_calls")]
    pub low_performer_min_calls: u32,
}

/// Score thresholds for decisions
///
/// - StrongBuy: score >= 45
/// - Buy: score >= 20
/// - Ignore: below
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    #[serde(default = "default_strong_buy")]
    pub strong_buy: f64,
    #[serde(default = "default_buy")]
    pub buy: f64,
}

fn default_golden_trio() -> Vec<WalletId> {
    vec![WalletId::kol(1), WalletId::kol(15), WalletId::kol(22)]
}

fn default_golden_pairs() -> Vec<Vec<WalletId>> {
    vec![
        vec![WalletId::new_wallet(56), WalletId::new_wallet(82)],
        vec![WalletId::kol(15), WalletId::kol(22)],
    ]
}

fn default_trio_bonus() -> f64 { 50.0 }
fn default_pair_bonus() -> f64 { 35.0 }
fn default_high_performer_bonus() -> f64 { 10.0 }
fn default_low_performer_penalty() -> f64 { -15.0 }
fn default_participation_bonus() -> f64 { 2.0 }
fn default_high_performer_rate() -> f64 { 0.70 }
fn default_low_performer_rate() -> f64 { 0.15 }
fn default_low_performer_min_calls() -> u32 { 5 }
fn default_strong_buy() -> f64 { 45.0 }
fn default_buy() -> f64 { 20.0 }

impl Default for Ruleset {
    fn default() -> Self {
        Self {
            golden_trio: default_golden_trio(),
            golden_pairs: default_golden_pairs(),
            weights: ScoreWeights::default(),
            bands: PerformanceBands::default(),
            thresholds: DecisionThresholds::default(),
        }
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            trio_bonus: default_trio_bonus(),
            pair_bonus: default_pair_bonus(),
            high_performer_bonus: default_high_performer_bonus(),
            low_performer_penalty: default_low_performer_penalty(),
            participation_bonus: default_participation_bonus(),
        }
    }
}

impl Default for PerformanceBands {
    fn default() -> Self {
        Self {
            high_performer_rate: default_high_performer_rate(),
            low_performer_rate: default_low_performer_rate(),
            low_performer_min_calls: default_low_performer_min_calls(),
        }
    }
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            strong_buy: default_strong_buy(),
            buy: default_buy(),
        }
    }
}

impl DecisionThresholds {
    /// Map a final score to a decision
    pub fn decide(&self, score: f64) -> Decision {
        if score >= self.strong_buy {
            Decision::StrongBuy
        } else if score >= self.buy {
            Decision::Buy
        } else {
            Decision::Ignore
        }
    }
}

impl Ruleset {
    /// Reject rule sets that would score nonsensically
    pub fn validate(&self) -> Result<()> {
        for group in &self.golden_pairs {
            if group.len() < 2 {
                return Err(Error::Config(format!(
                    "golden pair needs at least 2 wallets, got {:?}",
                    group.iter().map(|w| w.to_string()).collect::<Vec<_>>()
                )));
            }
        }

        if self.thresholds.strong_buy < self.thresholds.buy {
            return Err(Error::Config(format!(
                "strong_buy threshold {} is below buy threshold {}",
                self.thresholds.strong_buy, self.thresholds.buy
            )));
        }

        let bands = &self.bands;
        if !(0.0..=1.0).contains(&bands.high_performer_rate)
            || !(0.0..=1.0).contains(&bands.low_performer_rate)
        {
            return Err(Error::Config(
                "performance band rates must be within 0.0..=1.0".to_string(),
            ));
        }
        if bands.low_performer_rate > bands.high_performer_rate {
            return Err(Error::Config(
                "low_performer_rate cannot exceed high_performer_rate".to_string(),
            ));
        }

        Ok(())
    }
}
