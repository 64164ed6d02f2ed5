//! Price-update extraction from token scanner messages
//!
//! Scanner messages draw a tree with `├`/`└` characters; the contract address
//! hangs off one of those branches and the all-time high is reported as
//! `ATH: $<amount>`.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{amount::parse_amount, find_address, ADDRESS_CHARSET};

lazy_static::lazy_static! {
    static ref TREE_ADDRESS: Regex = Regex::new(&format!(
        r"[├└]\s*`?({}{{32,44}})`?",
        ADDRESS_CHARSET
    ))
    .expect("Invalid tree address regex");

    static ref ATH: Regex =
        Regex::new(r"ATH:\s*\$([0-9,]+\.?\d*[KMB]?)").expect("Invalid ATH regex");
}

/// Structured content of a price-update message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdateData {
    pub contract_address: String,
    /// Reported all-time high, 0 when absent or unparsable
    pub ath_usd: f64,
}

/// Extract a price update, or `None` when no contract address is present.
pub fn extract_price_update(text: &str) -> Option<PriceUpdateData> {
    let contract_address = find_address(&TREE_ADDRESS, text)?;

    let ath_usd = ATH
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| parse_amount(m.as_str()))
        .unwrap_or(0.0);

    Some(PriceUpdateData {
        contract_address,
        ath_usd,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CA: &str = "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr";
    const OTHER: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";

    #[test]
    fn test_tree_marker_address_and_ath() {
        let text = format!(
            "🟢 DOGE2 [15K/3%] $DOGE2\n├ `{}`\n└ 💰 MC: $15.2K | ATH: $48.6K",
            CA
        );
        let data = extract_price_update(&text).unwrap();
        assert_eq!(data.contract_address, CA);
        assert_eq!(data.ath_usd, 48_600.0);
    }

    #[test]
    fn test_tree_marker_preferred_over_bare() {
        let text = format!("pair {}\n└ {}\nATH: $1,500", OTHER, CA);
        let data = extract_price_update(&text).unwrap();
        assert_eq!(data.contract_address, CA);
        assert_eq!(data.ath_usd, 1_500.0);
    }

    #[test]
    fn test_bare_fallback_and_missing_ath() {
        let data = extract_price_update(&format!("token {} pumped", CA)).unwrap();
        assert_eq!(data.contract_address, CA);
        assert_eq!(data.ath_usd, 0.0);
    }

    #[test]
    fn test_missing_address_fails() {
        assert!(extract_price_update("└ ATH: $2M").is_none());
    }
}
