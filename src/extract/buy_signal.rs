//! Buy-signal extraction from wallet tracking messages
//!
//! A tracking message names the token, lists every tracked wallet that bought
//! it together with the market cap at entry, and carries the contract address
//! next to a `solana` platform marker.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{amount::parse_amount, find_address, ADDRESS_CHARSET};
use crate::types::{WalletId, WalletKind};

/// Token name used when the message carries none
pub const UNKNOWN_TOKEN: &str = "N/A";

lazy_static::lazy_static! {
    static ref SOLANA_ADDRESS: Regex = Regex::new(&format!(
        r"(?i:solana)\s*`?({}{{32,44}})`?",
        ADDRESS_CHARSET
    ))
    .expect("Invalid solana address regex");

    static ref TOKEN_NAME: Regex =
        Regex::new(r"\d+ wallets bought (.*?) avg").expect("Invalid token name regex");

    static ref WALLET_LINE: Regex = Regex::new(
        r"(?i)(\d+)\.\s*(KOL|New Wallet)\s*(\d+).*?MC:\s*\$([\d.,KMB]+)"
    )
    .expect("Invalid wallet line regex");
}

/// One wallet listed in a buy signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub wallet_id: WalletId,
    /// Market cap when this wallet bought
    pub mc_at_buy: f64,
}

/// Structured content of a buy-signal message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuySignalData {
    pub contract_address: String,
    pub token_name: String,
    /// Wallets in the order they appear in the message
    pub wallets: Vec<WalletEntry>,
}

impl BuySignalData {
    pub fn total_wallets_involved(&self) -> usize {
        self.wallets.len()
    }

    pub fn wallet_ids(&self) -> Vec<WalletId> {
        self.wallets.iter().map(|w| w.wallet_id.clone()).collect()
    }
}

/// Extract a buy signal, or `None` when no contract address is present.
pub fn extract_buy_signal(text: &str) -> Option<BuySignalData> {
    let contract_address = find_address(&SOLANA_ADDRESS, text)?;

    let token_name = TOKEN_NAME
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| UNKNOWN_TOKEN.to_string());

    let wallets = WALLET_LINE
        .captures_iter(text)
        .filter_map(|caps| {
            let kind: WalletKind = caps[2].parse().ok()?;
            let number = match caps[3].parse::<u32>() {
                Ok(n) => n,
                Err(_) => {
                    debug!(raw = %&caps[3], "Skipping wallet entry with out-of-range id");
                    return None;
                }
            };
            Some(WalletEntry {
                wallet_id: WalletId::new(kind, number),
                mc_at_buy: parse_amount(&caps[4]),
            })
        })
        .collect();

    Some(BuySignalData {
        contract_address,
        token_name,
        wallets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CA: &str = "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr";
    const OTHER: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";

    fn kol_track_message() -> String {
        format!(
            "🔥 5 wallets bought DOGE2 avg MC $15K\n\
             1. KOL 15 bought 2.1 SOL | MC: $10K\n\
             2. KOL 22 bought 0.5 SOL | MC: $20K\n\
             3. New Wallet 56 bought 1 SOL | MC: $1,250\n\
             solana `{}`",
            CA
        )
    }

    #[test]
    fn test_extracts_all_fields() {
        let data = extract_buy_signal(&kol_track_message()).unwrap();
        assert_eq!(data.contract_address, CA);
        assert_eq!(data.token_name, "DOGE2");
        assert_eq!(data.total_wallets_involved(), 3);

        assert_eq!(data.wallets[0].wallet_id, WalletId::kol(15));
        assert_eq!(data.wallets[0].mc_at_buy, 10_000.0);
        assert_eq!(data.wallets[1].wallet_id, WalletId::kol(22));
        assert_eq!(data.wallets[1].mc_at_buy, 20_000.0);
        assert_eq!(data.wallets[2].wallet_id, WalletId::new_wallet(56));
        assert_eq!(data.wallets[2].mc_at_buy, 1_250.0);
    }

    #[test]
    fn test_single_line_message() {
        let text = format!(
            "5 wallets bought DOGE2 avg ... 1. KOL 15 ... MC: $10K 2. KOL 22 ... MC: $20K {}",
            CA
        );
        let data = extract_buy_signal(&text).unwrap();
        assert_eq!(data.token_name, "DOGE2");
        assert_eq!(data.wallet_ids(), vec![WalletId::kol(15), WalletId::kol(22)]);
        assert_eq!(data.wallets[0].mc_at_buy, 10_000.0);
        assert_eq!(data.wallets[1].mc_at_buy, 20_000.0);
    }

    #[test]
    fn test_prefers_address_after_platform_marker() {
        let text = format!("ref {}\nSolana: {}", OTHER, CA);
        // ':' breaks the marker match, so the bare fallback wins
        assert_eq!(extract_buy_signal(&text).unwrap().contract_address, OTHER);

        let text = format!("ref {}\nSOLANA `{}`", OTHER, CA);
        assert_eq!(extract_buy_signal(&text).unwrap().contract_address, CA);
    }

    #[test]
    fn test_missing_address_fails() {
        assert!(extract_buy_signal("3 wallets bought PEPE avg 1. KOL 1 MC: $5K").is_none());
        assert!(extract_buy_signal("").is_none());
    }

    #[test]
    fn test_defaults_when_fields_absent() {
        let data = extract_buy_signal(CA).unwrap();
        assert_eq!(data.token_name, UNKNOWN_TOKEN);
        assert!(data.wallets.is_empty());
    }

    #[test]
    fn test_wallet_type_case_insensitive() {
        let text = format!("1. kol 3 x MC: $2m\n2. new wallet 9 y mc: $1k\nsolana {}", CA);
        let data = extract_buy_signal(&text).unwrap();
        assert_eq!(data.wallets[0].wallet_id, WalletId::kol(3));
        assert_eq!(data.wallets[0].mc_at_buy, 2_000_000.0);
        assert_eq!(data.wallets[1].wallet_id, WalletId::new_wallet(9));
        assert_eq!(data.wallets[1].mc_at_buy, 1_000.0);
    }
}
