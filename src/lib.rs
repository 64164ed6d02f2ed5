//! KOL Signal Tracker Library
//!
//! Extracts wallet buy signals from channel messages, scores them against
//! golden wallet groups, evaluates their outcome from later price updates
//! and keeps per-wallet performance history.

pub mod analytics;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evaluation;
pub mod extract;
pub mod import;
pub mod ledger;
pub mod notify;
pub mod scoring;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{Error, Result};
