//! Outbound notifications
//!
//! Delivery is best-effort: sinks report success as a bool and never return
//! errors to the caller.

mod format;
mod telegram;

pub use format::{format_decision_message, format_performance_update};
pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use tracing::info;

/// Destination for Markdown notification text
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one message. Returns false on any failure or timeout.
    async fn send(&self, text: &str) -> bool;
}

/// Sink that only logs, used when Telegram is disabled
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, text: &str) -> bool {
        info!(chars = text.len(), "Notification (log only):\n{}", text);
        true
    }
}
