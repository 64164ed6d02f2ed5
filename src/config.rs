//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub use crate::scoring::Ruleset;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Golden wallet groups, weights and decision thresholds
    #[serde(default)]
    pub scoring: Ruleset,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

/// Webhook / API server
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Signal outcome evaluation
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    /// Minutes a signal has to exceed its initial ATH before it fails
    #[serde(default = "default_time_limit_minutes")]
    pub time_limit_minutes: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            time_limit_minutes: default_time_limit_minutes(),
        }
    }
}

/// Telegram Bot API delivery
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// When false, notifications are only logged
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    #[serde(default = "default_telegram_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            chat_id: None,
            api_base: default_telegram_api_base(),
            timeout_secs: default_telegram_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfig {
    /// Announce SUCCESS / FAILURE transitions
    #[serde(default)]
    pub performance_updates: bool,
}

/// Ledger persistence
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON snapshot file; None keeps everything in memory
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

/// Webhook redelivery suppression
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_dedup_capacity")]
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_dedup_ttl_secs(),
            capacity: default_dedup_capacity(),
        }
    }
}

/// Retry of conflicting signal updates
#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_conflict_retry_initial_ms")]
    pub conflict_retry_initial_ms: u64,
    /// Total time spent retrying before giving up
    #[serde(default = "default_conflict_retry_budget_ms")]
    pub conflict_retry_budget_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            conflict_retry_initial_ms: default_conflict_retry_initial_ms(),
            conflict_retry_budget_ms: default_conflict_retry_budget_ms(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:5000".to_string()
}

/// One year; longer evaluation windows are rejected
pub const MAX_TIME_LIMIT_MINUTES: u64 = 525_600;

fn default_time_limit_minutes() -> u64 {
    20
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_telegram_timeout_secs() -> u64 {
    10
}

fn default_snapshot_path() -> Option<PathBuf> {
    Some(PathBuf::from("data/ledger.json"))
}

fn default_dedup_ttl_secs() -> u64 {
    3600
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_conflict_retry_initial_ms() -> u64 {
    10
}

fn default_conflict_retry_budget_ms() -> u64 {
    2_000
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            .set_default("server.bind_address", default_bind_address())?
            .set_default("evaluation.time_limit_minutes", default_time_limit_minutes() as i64)?
            .set_default("telegram.timeout_secs", default_telegram_timeout_secs() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SIGNALS__)
            .add_source(
                config::Environment::with_prefix("SIGNALS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.scoring.validate().context("Invalid scoring rules")?;

        if self.evaluation.time_limit_minutes == 0 {
            anyhow::bail!("evaluation.time_limit_minutes must be positive");
        }
        if self.evaluation.time_limit_minutes > MAX_TIME_LIMIT_MINUTES {
            anyhow::bail!(
                "evaluation.time_limit_minutes must be at most {}",
                MAX_TIME_LIMIT_MINUTES
            );
        }

        if self.telegram.timeout_secs == 0 {
            anyhow::bail!("telegram.timeout_secs must be positive");
        }

        if self.telegram.enabled {
            let missing = |v: &Option<String>| v.as_deref().map_or(true, str::is_empty);
            if missing(&self.telegram.bot_token) || missing(&self.telegram.chat_id) {
                anyhow::bail!("telegram is enabled but bot_token or chat_id is not set");
            }
        }

        if self.dedup.capacity == 0 {
            anyhow::bail!("dedup.capacity must be positive");
        }

        self.server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("Invalid server.bind_address: {}", self.server.bind_address))?;

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let pairs = self
            .scoring
            .golden_pairs
            .iter()
            .map(|p| p.iter().map(|w| w.to_string()).collect::<Vec<_>>().join(" & "))
            .collect::<Vec<_>>();

        format!(
            r#"Configuration:
  Server:
    bind_address: {}
  Scoring:
    golden_trio: {:?}
    golden_pairs: {:?}
    thresholds: strong_buy >= {}, buy >= {}
  Evaluation:
    time_limit: {} min
  Telegram:
    enabled: {}
    api_base: {}
    bot_token: {}
    chat_id: {}
    timeout: {}s
  Notifications:
    performance_updates: {}
  Storage:
    snapshot: {}
  Dedup:
    ttl: {}s
    capacity: {}
"#,
            self.server.bind_address,
            self.scoring.golden_trio.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
            pairs,
            self.scoring.thresholds.strong_buy,
            self.scoring.thresholds.buy,
            self.evaluation.time_limit_minutes,
            self.telegram.enabled,
            mask_url(&self.telegram.api_base),
            mask_secret(self.telegram.bot_token.as_deref()),
            self.telegram.chat_id.as_deref().unwrap_or("(not set)"),
            self.telegram.timeout_secs,
            self.notifications.performance_updates,
            self.storage
                .snapshot_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(memory only)".to_string()),
            self.dedup.ttl_secs,
            self.dedup.capacity,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

fn mask_secret(secret: Option<&str>) -> &'static str {
    match secret {
        Some(s) if !s.is_empty() => "***",
        _ => "(not set)",
    }
}
