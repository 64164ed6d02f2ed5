use chrono::{DateTime, Utc};

use crate::types::{Decision, PerformanceStatus};

/// Backslash-escape the characters Telegram's Markdown treats as entity
/// markers, so wallet ids like `KOL_15` render literally
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Markdown recommendation for an actionable decision, None for IGNORE
pub fn format_decision_message(
    decision: Decision,
    token_name: &str,
    contract_address: &str,
    score: f64,
    reasons: &[String],
    at: DateTime<Utc>,
) -> Option<String> {
    let (emoji, label) = match decision {
        Decision::StrongBuy => ("🟢", "STRONG BUY"),
        Decision::Buy => ("🟡", "BUY"),
        Decision::Ignore => return None,
    };

    let reasons = reasons
        .iter()
        .map(|r| format!("• {}", escape_markdown(r)))
        .collect::<Vec<_>>()
        .join("\n");

    Some(format!(
        "{emoji} *{label}*\n\n\
         🪙 *Token:* {token}\n\
         📋 *Contract:* `{contract_address}`\n\
         📊 *Score:* {score}\n\n\
         *Reasons:*\n{reasons}\n\n\
         ⏰ *Time:* {time}",
        token = escape_markdown(token_name),
        time = at.format("%Y-%m-%d %H:%M:%S UTC"),
    ))
}

/// Markdown notice for a signal reaching a terminal state, None while pending
pub fn format_performance_update(
    signal_id: &str,
    token_name: &str,
    status: PerformanceStatus,
    profit_multiplier: f64,
) -> Option<String> {
    let (emoji, label, result) = match status {
        PerformanceStatus::Success => (
            "✅",
            "Signal succeeded",
            format!("📈 *Profit:* {:.2}x", profit_multiplier),
        ),
        PerformanceStatus::Failure => ("❌", "Signal failed", "📉 *Result:* no gain".to_string()),
        PerformanceStatus::Pending => return None,
    };

    Some(format!(
        "{emoji} *{label}*\n\n🪙 *Token:* {token}\n🆔 *Signal:* {signal}\n{result}",
        token = escape_markdown(token_name),
        signal = escape_markdown(signal_id),
    ))
}
