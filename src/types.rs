//! Shared domain types: wallets, signals and their links

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Kind of tracked wallet as labelled by the tracking channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WalletKind {
    /// Known key opinion leader wallet
    #[serde(rename = "KOL")]
    Kol,
    /// Freshly observed wallet without a KOL label
    #[serde(rename = "New Wallet")]
    NewWallet,
}

impl WalletKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletKind::Kol => "KOL",
            WalletKind::NewWallet => "New Wallet",
        }
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.eq_ignore_ascii_case("kol") {
            Ok(WalletKind::Kol)
        } else if normalized.eq_ignore_ascii_case("new wallet") {
            Ok(WalletKind::NewWallet)
        } else {
            Err(Error::InvalidWalletId(format!("unknown wallet type '{}'", s)))
        }
    }
}

/// Unique wallet identifier, rendered as `<TYPE>_<N>` (e.g. `KOL_15`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletId {
    pub kind: WalletKind,
    pub number: u32,
}

impl WalletId {
    pub fn new(kind: WalletKind, number: u32) -> Self {
        Self { kind, number }
    }

    pub fn kol(number: u32) -> Self {
        Self::new(WalletKind::Kol, number)
    }

    pub fn new_wallet(number: u32) -> Self {
        Self::new(WalletKind::NewWallet, number)
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.number)
    }
}

impl FromStr for WalletId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, number) = s
            .trim()
            .rsplit_once('_')
            .ok_or_else(|| Error::InvalidWalletId(s.to_string()))?;
        let number = number
            .parse::<u32>()
            .map_err(|_| Error::InvalidWalletId(s.to_string()))?;
        Ok(Self::new(kind.parse()?, number))
    }
}

impl TryFrom<String> for WalletId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WalletId> for String {
    fn from(id: WalletId) -> Self {
        id.to_string()
    }
}

/// Lifecycle status of a wallet record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    #[default]
    Active,
    Inactive,
}

/// Historical performance record of one wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletStats {
    pub wallet_id: WalletId,
    pub date_added: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_calls: u32,
    pub successful_calls: u32,
    pub success_rate: f64,
    #[serde(default)]
    pub status: WalletStatus,
}

impl WalletStats {
    /// Fresh record for a wallet seen for the first time
    pub fn new(wallet_id: WalletId, now: DateTime<Utc>) -> Self {
        Self {
            wallet_id,
            date_added: now,
            last_seen: now,
            total_calls: 0,
            successful_calls: 0,
            success_rate: 0.0,
            status: WalletStatus::Active,
        }
    }

    /// Apply call/success deltas and recompute the success rate
    pub fn apply_delta(&mut self, delta_calls: u32, delta_successes: u32, now: DateTime<Utc>) {
        if delta_calls > 0 {
            self.total_calls = self.total_calls.saturating_add(delta_calls);
            self.last_seen = now;
        }
        self.successful_calls = self.successful_calls.saturating_add(delta_successes);
        self.recompute_rate();
    }

    /// successful / total, 0 when the wallet has no calls
    pub fn recompute_rate(&mut self) {
        self.success_rate = if self.total_calls > 0 {
            self.successful_calls as f64 / self.total_calls as f64
        } else {
            0.0
        };
    }
}

/// Outcome of a signal as judged by later price updates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceStatus {
    #[default]
    Pending,
    Success,
    Failure,
}

impl PerformanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceStatus::Pending => "PENDING",
            PerformanceStatus::Success => "SUCCESS",
            PerformanceStatus::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for PerformanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerformanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PerformanceStatus::Pending),
            "SUCCESS" => Ok(PerformanceStatus::Success),
            "FAILURE" => Ok(PerformanceStatus::Failure),
            other => Err(Error::Internal(format!("unknown performance status '{}'", other))),
        }
    }
}

/// Trading decision derived from the confidence score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    #[default]
    Ignore,
    Buy,
    StrongBuy,
}

impl Decision {
    /// BUY and STRONG_BUY are forwarded as recommendations
    pub fn is_actionable(&self) -> bool {
        matches!(self, Decision::Buy | Decision::StrongBuy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Ignore => "IGNORE",
            Decision::Buy => "BUY",
            Decision::StrongBuy => "STRONG_BUY",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join record between a signal and one participating wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSignalLink {
    pub link_id: String,
    pub signal_id: String,
    pub wallet_id: WalletId,
    /// Market cap at the moment this wallet bought in
    pub mc_at_buy: f64,
}

impl WalletSignalLink {
    pub fn new(signal_id: &str, wallet_id: WalletId, mc_at_buy: f64) -> Self {
        Self {
            link_id: format!("link_{}_{}", signal_id, wallet_id),
            signal_id: signal_id.to_string(),
            wallet_id,
            mc_at_buy,
        }
    }
}

/// A detected wallet-buy event awaiting (or past) evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub contract_address: String,
    pub signal_time: DateTime<Utc>,
    pub token_name: String,
    pub wallets: Vec<WalletSignalLink>,
    /// First non-zero ATH observed after creation; 0 until then
    pub initial_ath_usd: f64,
    /// Latest observed ATH
    pub final_ath_usd: f64,
    pub profit_multiplier: f64,
    pub performance_status: PerformanceStatus,
    pub evaluation_complete: bool,
    pub decision: Decision,
    pub confidence_score: f64,
    pub decision_reasons: Vec<String>,
    /// Bumped by the ledger on every successful update
    #[serde(default)]
    pub version: u64,
}

impl Signal {
    /// Wallet ids of all linked wallets, in link order
    pub fn wallet_ids(&self) -> Vec<WalletId> {
        self.wallets.iter().map(|l| l.wallet_id.clone()).collect()
    }

    pub fn has_initial_price(&self) -> bool {
        self.initial_ath_usd > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_id_roundtrip_display() {
        let id: WalletId = "KOL_15".parse().unwrap();
        assert_eq!(id, WalletId::kol(15));
        assert_eq!(id.to_string(), "KOL_15");

        let id: WalletId = "New Wallet_56".parse().unwrap();
        assert_eq!(id, WalletId::new_wallet(56));
        assert_eq!(id.to_string(), "New Wallet_56");
    }

    #[test]
    fn test_wallet_id_case_insensitive_kind() {
        let id: WalletId = "kol_7".parse().unwrap();
        assert_eq!(id.to_string(), "KOL_7");
        let id: WalletId = "new  wallet_3".parse().unwrap();
        assert_eq!(id, WalletId::new_wallet(3));
    }

    #[test]
    fn test_wallet_id_rejects_garbage() {
        assert!("KOL15".parse::<WalletId>().is_err());
        assert!("Whale_1".parse::<WalletId>().is_err());
        assert!("KOL_x".parse::<WalletId>().is_err());
    }

    #[test]
    fn test_wallet_id_serde_as_string() {
        let json = serde_json::to_string(&WalletId::kol(22)).unwrap();
        assert_eq!(json, "\"KOL_22\"");
        let back: WalletId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WalletId::kol(22));
    }

    #[test]
    fn test_success_rate_recomputed() {
        let now = Utc::now();
        let mut stats = WalletStats::new(WalletId::kol(1), now);
        assert_eq!(stats.success_rate, 0.0);

        stats.apply_delta(4, 0, now);
        stats.apply_delta(0, 1, now);
        assert_eq!(stats.total_calls, 4);
        assert_eq!(stats.successful_calls, 1);
        assert!((stats.success_rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decision_serde() {
        assert_eq!(serde_json::to_string(&Decision::StrongBuy).unwrap(), "\"STRONG_BUY\"");
        assert!(Decision::Buy.is_actionable());
        assert!(!Decision::Ignore.is_actionable());
        assert_eq!(
            "failure".parse::<PerformanceStatus>().unwrap(),
            PerformanceStatus::Failure
        );
    }
}
