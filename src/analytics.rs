//! Historical pattern analysis over signals and wallets
//!
//! Everything here is a pure function over ledger listings, so the server and
//! the CLI share the same numbers.

use chrono::Timelike;
use itertools::Itertools;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::types::{PerformanceStatus, Signal, WalletId, WalletStats};

/// A cluster must appear in at least this many completed signals
pub const MIN_CLUSTER_OCCURRENCES: u32 = 3;
/// ...and succeed at least this often to be reported
pub const MIN_CLUSTER_SUCCESS_RATE: f64 = 0.6;
pub const MAX_PROMISING_CLUSTERS: usize = 10;
pub const CLUSTER_SIZES: std::ops::RangeInclusive<usize> = 2..=5;

const HIGH_PERFORMANCE_RATE: f64 = 0.7;
const LOW_PERFORMANCE_RATE: f64 = 0.15;
const CONSISTENT_RATE: f64 = 0.4;
const CONSISTENT_MIN_CALLS: u32 = 10;
const PROMISING_MAX_CALLS: u32 = 10;
const PROMISING_RATE: f64 = 0.5;
/// Wallets with fewer calls are not categorized or ranked
const MIN_CALLS_FOR_RANKING: u32 = 5;

const SUGGESTED_CLUSTER_RULES: usize = 5;
const MAX_CLUSTER_BONUS: u32 = 50;
const SUGGESTED_HIGH_PERFORMER_BONUS: i32 = 15;
const SUGGESTED_LOW_PERFORMER_PENALTY: i32 = -20;

fn rate(successes: u32, total: u32) -> f64 {
    if total > 0 {
        successes as f64 / total as f64
    } else {
        0.0
    }
}

/// Sort descending by (success rate, total calls)
fn by_performance(a: (f64, u32), b: (f64, u32)) -> std::cmp::Ordering {
    b.0.total_cmp(&a.0).then(b.1.cmp(&a.1))
}

/// Wallet group that repeatedly bought together
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStats {
    pub cluster: Vec<WalletId>,
    pub cluster_name: String,
    pub total_calls: u32,
    pub successful_calls: u32,
    pub success_rate: f64,
    pub signals: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterAnalysis {
    pub cluster_size: usize,
    pub total_clusters_analyzed: usize,
    pub clusters_with_min_occurrences: usize,
    pub high_performance_clusters: usize,
    /// Best clusters first, at most [`MAX_PROMISING_CLUSTERS`]
    pub promising_clusters: Vec<ClusterStats>,
}

/// Every size-`cluster_size` wallet combination across completed signals
pub fn analyze_clusters(signals: &[Signal], cluster_size: usize) -> Result<ClusterAnalysis> {
    if !CLUSTER_SIZES.contains(&cluster_size) {
        return Err(Error::InvalidClusterSize(cluster_size));
    }

    let mut clusters: HashMap<Vec<WalletId>, ClusterStats> = HashMap::new();
    for signal in signals.iter().filter(|s| s.evaluation_complete) {
        // Members are ordered by their id text, so KOL_15 sorts before KOL_2
        let wallets: Vec<WalletId> = signal
            .wallet_ids()
            .into_iter()
            .sorted_by_key(|w| w.to_string())
            .dedup()
            .collect();
        let succeeded = signal.performance_status == PerformanceStatus::Success;

        for combo in wallets.into_iter().combinations(cluster_size) {
            let entry = clusters.entry(combo.clone()).or_insert_with(|| ClusterStats {
                cluster_name: combo.iter().join(" & "),
                cluster: combo,
                total_calls: 0,
                successful_calls: 0,
                success_rate: 0.0,
                signals: Vec::new(),
            });
            entry.total_calls += 1;
            if succeeded {
                entry.successful_calls += 1;
            }
            entry.signals.push(signal.signal_id.clone());
        }
    }

    let total_clusters_analyzed = clusters.len();
    let frequent: Vec<ClusterStats> = clusters
        .into_values()
        .filter(|c| c.total_calls >= MIN_CLUSTER_OCCURRENCES)
        .map(|mut c| {
            c.success_rate = rate(c.successful_calls, c.total_calls);
            c
        })
        .collect();
    let clusters_with_min_occurrences = frequent.len();

    let mut promising: Vec<ClusterStats> = frequent
        .into_iter()
        .filter(|c| c.success_rate >= MIN_CLUSTER_SUCCESS_RATE)
        .collect();
    promising.sort_by(|a, b| {
        by_performance((a.success_rate, a.total_calls), (b.success_rate, b.total_calls))
            .then_with(|| a.cluster_name.cmp(&b.cluster_name))
    });
    let high_performance_clusters = promising.len();
    promising.truncate(MAX_PROMISING_CLUSTERS);

    Ok(ClusterAnalysis {
        cluster_size,
        total_clusters_analyzed,
        clusters_with_min_occurrences,
        high_performance_clusters,
        promising_clusters: promising,
    })
}

/// Individual wallets bucketed by track record
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceCategories {
    pub high_performers: Vec<WalletStats>,
    pub consistent_performers: Vec<WalletStats>,
    pub low_performers: Vec<WalletStats>,
    pub new_promising: Vec<WalletStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndividualPerformance {
    pub total_wallets_analyzed: usize,
    pub performance_categories: PerformanceCategories,
}

/// Categorize wallets with at least five calls. The first matching
/// category wins.
pub fn analyze_individual_performance(wallets: &[WalletStats]) -> IndividualPerformance {
    let mut categories = PerformanceCategories::default();
    let eligible: Vec<&WalletStats> = wallets
        .iter()
        .filter(|w| w.total_calls >= MIN_CALLS_FOR_RANKING)
        .collect();

    for wallet in &eligible {
        let bucket = if wallet.success_rate >= HIGH_PERFORMANCE_RATE {
            &mut categories.high_performers
        } else if wallet.success_rate >= CONSISTENT_RATE && wallet.total_calls >= CONSISTENT_MIN_CALLS {
            &mut categories.consistent_performers
        } else if wallet.success_rate <= LOW_PERFORMANCE_RATE && wallet.total_calls > MIN_CALLS_FOR_RANKING {
            &mut categories.low_performers
        } else if wallet.total_calls <= PROMISING_MAX_CALLS && wallet.success_rate >= PROMISING_RATE {
            &mut categories.new_promising
        } else {
            continue;
        };
        bucket.push((*wallet).clone());
    }

    for bucket in [
        &mut categories.high_performers,
        &mut categories.consistent_performers,
        &mut categories.low_performers,
        &mut categories.new_promising,
    ] {
        bucket.sort_by(|a, b| by_performance((a.success_rate, a.total_calls), (b.success_rate, b.total_calls)));
    }

    IndividualPerformance {
        total_wallets_analyzed: eligible.len(),
        performance_categories: categories,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeBucket {
    pub total: u32,
    pub successful: u32,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TimePatterns {
    /// Keyed by UTC hour 0..=23
    pub hourly_performance: BTreeMap<u32, TimeBucket>,
    /// Keyed by weekday name
    pub daily_performance: BTreeMap<String, TimeBucket>,
}

/// Success rates of completed signals by hour of day and weekday
pub fn analyze_time_patterns(signals: &[Signal]) -> TimePatterns {
    let mut patterns = TimePatterns::default();

    for signal in signals.iter().filter(|s| s.evaluation_complete) {
        let succeeded = signal.performance_status == PerformanceStatus::Success;
        let hour = patterns
            .hourly_performance
            .entry(signal.signal_time.hour())
            .or_default();
        hour.total += 1;
        hour.successful += succeeded as u32;

        let day = patterns
            .daily_performance
            .entry(signal.signal_time.format("%A").to_string())
            .or_default();
        day.total += 1;
        day.successful += succeeded as u32;
    }

    for bucket in patterns
        .hourly_performance
        .values_mut()
        .chain(patterns.daily_performance.values_mut())
    {
        bucket.success_rate = rate(bucket.successful, bucket.total);
    }
    patterns
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardTotals {
    pub total_signals: usize,
    pub successful_signals: usize,
    pub pending_signals: usize,
    pub total_wallets: usize,
    /// Percentage of all signals that succeeded
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub stats: DashboardTotals,
    pub top_wallets: Vec<WalletStats>,
    pub recent_signals: Vec<Signal>,
}

/// Totals, top 10 ranked wallets and the 5 newest signals
pub fn dashboard_stats(signals: &[Signal], wallets: &[WalletStats]) -> DashboardStats {
    let count = |status: PerformanceStatus| signals.iter().filter(|s| s.performance_status == status).count();
    let successful_signals = count(PerformanceStatus::Success);

    let top_wallets = wallets
        .iter()
        .filter(|w| w.total_calls >= MIN_CALLS_FOR_RANKING)
        .sorted_by(|a, b| b.success_rate.total_cmp(&a.success_rate))
        .take(10)
        .cloned()
        .collect();

    let recent_signals = signals
        .iter()
        .sorted_by(|a, b| b.signal_time.cmp(&a.signal_time))
        .take(5)
        .cloned()
        .collect();

    DashboardStats {
        stats: DashboardTotals {
            total_signals: signals.len(),
            successful_signals,
            pending_signals: count(PerformanceStatus::Pending),
            total_wallets: wallets.len(),
            success_rate: if signals.is_empty() {
                0.0
            } else {
                successful_signals as f64 / signals.len() as f64 * 100.0
            },
        },
        top_wallets,
        recent_signals,
    }
}

/// A rule the current history suggests adding to the ruleset
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum SuggestedRule {
    ClusterBonus {
        wallets: Vec<WalletId>,
        bonus_points: u32,
        confidence: f64,
        description: String,
    },
    HighPerformerBonus {
        wallet_id: WalletId,
        bonus_points: i32,
        confidence: f64,
        description: String,
    },
    LowPerformerPenalty {
        wallet_id: WalletId,
        penalty_points: i32,
        confidence: f64,
        description: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SuggestedRules {
    pub cluster_rules: Vec<SuggestedRule>,
    pub individual_rules: Vec<SuggestedRule>,
}

/// Derive bonus/penalty rules from pair clusters and wallet categories
pub fn suggest_rules(signals: &[Signal], wallets: &[WalletStats]) -> SuggestedRules {
    let mut rules = SuggestedRules::default();

    if let Ok(pairs) = analyze_clusters(signals, 2) {
        rules.cluster_rules = pairs
            .promising_clusters
            .into_iter()
            .take(SUGGESTED_CLUSTER_RULES)
            .map(|c| SuggestedRule::ClusterBonus {
                bonus_points: MAX_CLUSTER_BONUS.min((c.success_rate * 100.0) as u32),
                confidence: c.success_rate,
                description: format!(
                    "Bonus for cluster {} ({:.1}% success)",
                    c.cluster_name,
                    c.success_rate * 100.0
                ),
                wallets: c.cluster,
            })
            .collect();
    }

    let categories = analyze_individual_performance(wallets).performance_categories;
    rules.individual_rules.extend(categories.high_performers.into_iter().take(10).map(|w| {
        SuggestedRule::HighPerformerBonus {
            description: format!("Bonus for high performer {}", w.wallet_id),
            wallet_id: w.wallet_id,
            bonus_points: SUGGESTED_HIGH_PERFORMER_BONUS,
            confidence: w.success_rate,
        }
    }));
    rules.individual_rules.extend(categories.low_performers.into_iter().map(|w| {
        SuggestedRule::LowPerformerPenalty {
            description: format!("Penalty for low performer {}", w.wallet_id),
            wallet_id: w.wallet_id,
            penalty_points: SUGGESTED_LOW_PERFORMER_PENALTY,
            confidence: 1.0 - w.success_rate,
        }
    }));

    rules
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartnerStats {
    pub wallet_id: WalletId,
    pub collaborations: u32,
    pub successful_collaborations: u32,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletAnalysis {
    pub wallet_info: WalletStats,
    pub total_signals: usize,
    pub successful_signals: usize,
    pub failed_signals: usize,
    pub pending_signals: usize,
    /// Success rate over the wallet's 20 most recent signals
    pub recent_success_rate: f64,
    pub recent_signals: Vec<Signal>,
    /// Wallets that co-bought at least three times, best first
    pub top_partners: Vec<PartnerStats>,
}

/// Detailed history of one wallet, None when it is unknown
pub fn analyze_wallet(id: &WalletId, wallets: &[WalletStats], signals: &[Signal]) -> Option<WalletAnalysis> {
    let wallet_info = wallets.iter().find(|w| &w.wallet_id == id)?.clone();

    let history: Vec<&Signal> = signals
        .iter()
        .filter(|s| s.wallets.iter().any(|l| &l.wallet_id == id))
        .sorted_by_key(|s| s.signal_time)
        .collect();
    let with_status = |status: PerformanceStatus| history.iter().filter(|s| s.performance_status == status).count();

    let mut partners: HashMap<WalletId, (u32, u32)> = HashMap::new();
    for signal in &history {
        let succeeded = signal.performance_status == PerformanceStatus::Success;
        for partner in signal.wallet_ids().into_iter().unique().filter(|w| w != id) {
            let entry = partners.entry(partner).or_default();
            entry.0 += 1;
            entry.1 += succeeded as u32;
        }
    }
    let top_partners = partners
        .into_iter()
        .filter(|(_, (total, _))| *total >= MIN_CLUSTER_OCCURRENCES)
        .map(|(wallet_id, (total, ok))| PartnerStats {
            wallet_id,
            collaborations: total,
            successful_collaborations: ok,
            success_rate: rate(ok, total),
        })
        .sorted_by(|a, b| {
            by_performance((a.success_rate, a.collaborations), (b.success_rate, b.collaborations))
                .then_with(|| a.wallet_id.cmp(&b.wallet_id))
        })
        .take(10)
        .collect();

    let recent: Vec<&Signal> = history.iter().rev().take(20).copied().collect();
    let recent_success_rate = rate(
        recent
            .iter()
            .filter(|s| s.performance_status == PerformanceStatus::Success)
            .count() as u32,
        recent.len() as u32,
    );

    Some(WalletAnalysis {
        total_signals: history.len(),
        successful_signals: with_status(PerformanceStatus::Success),
        failed_signals: with_status(PerformanceStatus::Failure),
        pending_signals: with_status(PerformanceStatus::Pending),
        recent_success_rate,
        recent_signals: history.iter().rev().take(10).map(|s| (*s).clone()).collect(),
        top_partners,
        wallet_info,
    })
}

/// Participant of a signal with its current stats
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipatingWallet {
    #[serde(flatten)]
    pub stats: WalletStats,
    pub mc_at_buy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionAnalysis {
    pub high_performers: usize,
    pub low_performers: usize,
    pub average_success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub profit_multiplier: f64,
    pub initial_ath: f64,
    pub final_ath: f64,
    pub performance_status: PerformanceStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalAnalysis {
    pub signal_info: Signal,
    /// Known wallets only, best success rate first
    pub participating_wallets: Vec<ParticipatingWallet>,
    pub decision_analysis: DecisionAnalysis,
    pub performance_metrics: PerformanceMetrics,
}

/// Break one signal down by the track record of the wallets behind it
pub fn analyze_signal(signal: &Signal, wallets: &[WalletStats]) -> SignalAnalysis {
    let by_id: HashMap<&WalletId, &WalletStats> = wallets.iter().map(|w| (&w.wallet_id, w)).collect();

    let participating_wallets: Vec<ParticipatingWallet> = signal
        .wallets
        .iter()
        .unique_by(|l| l.wallet_id.clone())
        .filter_map(|link| {
            by_id.get(&link.wallet_id).map(|stats| ParticipatingWallet {
                stats: (*stats).clone(),
                mc_at_buy: link.mc_at_buy,
            })
        })
        .sorted_by(|a, b| b.stats.success_rate.total_cmp(&a.stats.success_rate))
        .collect();

    let decision_analysis = DecisionAnalysis {
        high_performers: participating_wallets
            .iter()
            .filter(|w| w.stats.success_rate >= HIGH_PERFORMANCE_RATE)
            .count(),
        low_performers: participating_wallets
            .iter()
            .filter(|w| w.stats.success_rate < LOW_PERFORMANCE_RATE && w.stats.total_calls > MIN_CALLS_FOR_RANKING)
            .count(),
        average_success_rate: if participating_wallets.is_empty() {
            0.0
        } else {
            participating_wallets.iter().map(|w| w.stats.success_rate).sum::<f64>()
                / participating_wallets.len() as f64
        },
    };

    SignalAnalysis {
        performance_metrics: PerformanceMetrics {
            profit_multiplier: signal.profit_multiplier,
            initial_ath: signal.initial_ath_usd,
            final_ath: signal.final_ath_usd,
            performance_status: signal.performance_status,
        },
        signal_info: signal.clone(),
        participating_wallets,
        decision_analysis,
    }
}

/// Every analysis at once
#[derive(Debug, Clone, Serialize)]
pub struct PatternInsights {
    pub cluster_analysis: ClusterAnalysis,
    pub trio_analysis: ClusterAnalysis,
    pub individual_performance: IndividualPerformance,
    pub time_patterns: TimePatterns,
    pub smart_rules: SuggestedRules,
}

pub fn pattern_insights(signals: &[Signal], wallets: &[WalletStats]) -> Result<PatternInsights> {
    Ok(PatternInsights {
        cluster_analysis: analyze_clusters(signals, 2)?,
        trio_analysis: analyze_clusters(signals, 3)?,
        individual_performance: analyze_individual_performance(wallets),
        time_patterns: analyze_time_patterns(signals),
        smart_rules: suggest_rules(signals, wallets),
    })
}
