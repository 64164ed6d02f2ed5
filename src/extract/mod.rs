//! Pattern-based extraction of structured data from channel messages
//!
//! Messages have no fixed schema, so every field is located with a regex and
//! missing or malformed fields degrade to defaults. Only a missing contract
//! address makes an extraction fail, and that is reported as `None`.
//!
//! All functions here are pure: no I/O, no shared state.

pub mod amount;
pub mod buy_signal;
pub mod price_update;

use regex::Regex;

pub use amount::parse_amount;
pub use buy_signal::{extract_buy_signal, BuySignalData, WalletEntry, UNKNOWN_TOKEN};
pub use price_update::{extract_price_update, PriceUpdateData};

/// Base58 alphabet without the easily confused `0`, `O`, `I` and `l`
pub const ADDRESS_CHARSET: &str = "[A-HJ-NP-Za-km-z1-9]";

lazy_static::lazy_static! {
    /// Bare contract address anywhere in the text
    pub(crate) static ref BARE_ADDRESS: Regex =
        Regex::new(&format!(r"({}{{32,44}})", ADDRESS_CHARSET)).expect("Invalid address regex");
}

/// Find an address after `marker`, falling back to the first bare address.
pub(crate) fn find_address(marker: &Regex, text: &str) -> Option<String> {
    marker
        .captures(text)
        .or_else(|| BARE_ADDRESS.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
