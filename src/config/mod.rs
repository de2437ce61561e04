//! Configuration management for PerpWatch
//!
//! Loads defaults, optional config files and environment variables via .env
//!
//! `PERPWATCH__SECTION__KEY` variables take precedence. The older flat names
//! (`SYMBOL`, `TIMEFRAMES`, `RSI_LOW`, ...) are still read as fallbacks.

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, Map};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

use crate::oracle::failover::FailoverSettings;
use crate::oracle::sources::TransportSettings;
use crate::signals::Thresholds;
use crate::types::{split_pair, SourceId, Timeframe};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub watch: WatchConfig,
    pub rsi: RsiConfig,
    pub sources: SourcesConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Base pair to watch (BASE/QUOTE)
    pub symbol: String,
    /// Timeframes evaluated every cycle
    pub timeframes: Vec<Timeframe>,
    /// Seconds between cycles
    pub poll_interval_secs: u64,
    /// Candles requested per fetch
    pub candle_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RsiConfig {
    pub period: usize,
    /// Downward-cross threshold
    pub low: f64,
    /// Upward-cross threshold
    pub high: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    /// Fixed try order
    pub priority: Vec<SourceId>,
    /// Bound on every exchange request in milliseconds
    pub request_timeout_ms: u64,
    /// Exclusion window after a transient failure
    pub cooldown_secs: u64,
    /// Space requests by per-exchange minimum intervals
    pub enable_rate_limit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub timeout_secs: u64,
}

impl TelegramConfig {
    /// Token and chat id, when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.bot_token.as_deref(), self.chat_id.as_deref()) {
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty() => {
                Some((token, chat))
            }
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SourcesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            request_timeout: self.request_timeout(),
            enable_rate_limit: self.enable_rate_limit,
        }
    }

    pub fn failover_settings(&self) -> FailoverSettings {
        FailoverSettings {
            request_timeout: self.request_timeout(),
            cooldown: self.cooldown(),
        }
    }
}

impl RsiConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            low: self.low,
            high: self.high,
        }
    }
}

fn with_defaults() -> Result<ConfigBuilder<DefaultState>> {
    let builder = Config::builder()
        // Watch defaults
        .set_default("watch.symbol", "BTC/USDT")?
        .set_default("watch.timeframes", vec!["5m", "15m", "1h"])?
        .set_default("watch.poll_interval_secs", 30)?
        .set_default("watch.candle_limit", 100)?
        // RSI defaults
        .set_default("rsi.period", 14)?
        .set_default("rsi.low", 30.0)?
        .set_default("rsi.high", 70.0)?
        // Source defaults
        .set_default(
            "sources.priority",
            SourceId::DEFAULT_PRIORITY
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>(),
        )?
        .set_default("sources.request_timeout_ms", 15_000)?
        .set_default("sources.cooldown_secs", 120)?
        .set_default("sources.enable_rate_limit", true)?
        // Telegram defaults
        .set_default("telegram.timeout_secs", 15)?;
    Ok(builder)
}

/// Flat variable names from earlier deployments and the keys they feed.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("SYMBOL", "watch.symbol"),
    ("TIMEFRAMES", "watch.timeframes"),
    ("CHECK_INTERVAL", "watch.poll_interval_secs"),
    ("RSI_LOW", "rsi.low"),
    ("RSI_HIGH", "rsi.high"),
    ("CCXT_TIMEOUT_MS", "sources.request_timeout_ms"),
    ("COOLDOWN_SECONDS", "sources.cooldown_secs"),
    ("ENABLE_RATE_LIMIT", "sources.enable_rate_limit"),
];

/// Environment source for `PERPWATCH__*` keys, read from `vars` when given.
fn env_overrides(vars: Option<Map<String, String>>) -> Environment {
    Environment::with_prefix("PERPWATCH")
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("watch.timeframes")
        .with_list_parse_key("sources.priority")
        .source(vars)
}

/// Translate legacy variables found by `lookup` into `PERPWATCH__*` form.
fn legacy_env_map(lookup: impl Fn(&str) -> Option<String>) -> Map<String, String> {
    let mut vars = Map::new();
    for &(name, key) in LEGACY_ENV {
        let Some(raw) = lookup(name) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let value = match name {
            "ENABLE_RATE_LIMIT" => (raw == "1").to_string(),
            "TIMEFRAMES" => raw
                .split(',')
                .map(str::trim)
                .filter(|tf| !tf.is_empty())
                .collect::<Vec<_>>()
                .join(","),
            _ => raw.to_string(),
        };
        info!(variable = %name, key = %key, "Legacy environment variable applied");
        let env_key = format!("PERPWATCH__{}", key.replace('.', "__").to_uppercase());
        vars.insert(env_key, value);
    }
    vars
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();
        let legacy = legacy_env_map(|name| std::env::var(name).ok());

        let config = with_defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Legacy flat names, then PERPWATCH__* on top
            .add_source(env_overrides(Some(legacy)))
            .add_source(env_overrides(None))
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.telegram.apply_env_fallbacks();
        Ok(app_config)
    }

    /// Built-in defaults only, no files or environment.
    pub fn defaults() -> Result<Self> {
        with_defaults()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Reject settings the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if split_pair(&self.watch.symbol).is_none() {
            bail!(
                "watch.symbol must be a BASE/QUOTE pair, got '{}'",
                self.watch.symbol
            );
        }
        if self.watch.timeframes.is_empty() {
            bail!("watch.timeframes must list at least one timeframe");
        }
        if self.watch.poll_interval_secs == 0 {
            bail!("watch.poll_interval_secs must be positive");
        }
        if self.sources.priority.is_empty() {
            bail!("sources.priority must list at least one source");
        }
        let mut seen = HashSet::new();
        for source in &self.sources.priority {
            if !seen.insert(*source) {
                bail!("sources.priority lists '{}' more than once", source);
            }
        }
        if self.rsi.period == 0 {
            bail!("rsi.period must be positive");
        }
        let required = self.rsi.period + 2;
        if self.watch.candle_limit < required {
            bail!(
                "watch.candle_limit ({}) must be at least rsi.period + 2 ({})",
                self.watch.candle_limit,
                required
            );
        }
        if self.rsi.low > self.rsi.high {
            tracing::warn!(
                low = self.rsi.low,
                high = self.rsi.high,
                "RSI low threshold is above high threshold"
            );
        }
        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        let timeframes: Vec<&str> = self.watch.timeframes.iter().map(|t| t.as_str()).collect();
        let priority: Vec<&str> = self.sources.priority.iter().map(|s| s.as_str()).collect();
        format!(
            "symbol={} timeframes={} every={}s rsi={}({:.1}/{:.1}) priority={} cooldown={}s telegram={}",
            self.watch.symbol,
            timeframes.join(","),
            self.watch.poll_interval_secs,
            self.rsi.period,
            self.rsi.low,
            self.rsi.high,
            priority.join(">"),
            self.sources.cooldown_secs,
            if self.telegram.credentials().is_some() {
                "on"
            } else {
                "off"
            }
        )
    }
}

impl TelegramConfig {
    fn apply_env_fallbacks(&mut self) {
        if self.bot_token.as_deref().map_or(true, str::is_empty) {
            self.bot_token = resolve_env(&["TELEGRAM_BOT_TOKEN", "BOT_TOKEN"]);
        }
        if self.chat_id.as_deref().map_or(true, str::is_empty) {
            self.chat_id = resolve_env(&["TELEGRAM_CHAT_ID", "CHAT_ID"]);
        }
    }
}

/// First non-empty value among `names`.
fn resolve_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig::defaults().unwrap()
    }

    fn from_vars(vars: &[(&str, &str)]) -> AppConfig {
        let vars: Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        with_defaults()
            .unwrap()
            .add_source(env_overrides(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    fn legacy(vars: &[(&str, &str)]) -> Map<String, String> {
        legacy_env_map(|name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        })
    }

    #[test]
    fn test_legacy_names_are_translated() {
        let vars = legacy(&[
            ("SYMBOL", "ETH/USDT"),
            ("TIMEFRAMES", " 1m, 4h ,"),
            ("RSI_LOW", "25"),
            ("RSI_HIGH", "75.5"),
            ("CHECK_INTERVAL", "60"),
            ("CCXT_TIMEOUT_MS", "8000"),
            ("ENABLE_RATE_LIMIT", "0"),
            ("COOLDOWN_SECONDS", "300"),
        ]);
        assert_eq!(vars.len(), 8);
        assert_eq!(vars["PERPWATCH__WATCH__TIMEFRAMES"], "1m,4h");
        assert_eq!(vars["PERPWATCH__SOURCES__ENABLE_RATE_LIMIT"], "false");

        let entries: Vec<(&str, &str)> =
            vars.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let cfg = from_vars(&entries);
        assert_eq!(cfg.watch.symbol, "ETH/USDT");
        assert_eq!(cfg.watch.timeframes, vec![Timeframe::Min1, Timeframe::Hour4]);
        assert_eq!(cfg.watch.poll_interval_secs, 60);
        assert_eq!(cfg.rsi.low, 25.0);
        assert_eq!(cfg.rsi.high, 75.5);
        assert_eq!(cfg.sources.request_timeout(), Duration::from_millis(8000));
        assert_eq!(cfg.sources.cooldown(), Duration::from_secs(300));
        assert!(!cfg.sources.enable_rate_limit);
    }

    #[test]
    fn test_legacy_rate_limit_flag_needs_one() {
        let vars = legacy(&[("ENABLE_RATE_LIMIT", "1")]);
        assert_eq!(vars["PERPWATCH__SOURCES__ENABLE_RATE_LIMIT"], "true");
        let vars = legacy(&[("ENABLE_RATE_LIMIT", "true")]);
        assert_eq!(vars["PERPWATCH__SOURCES__ENABLE_RATE_LIMIT"], "false");
    }

    #[test]
    fn test_legacy_blank_values_are_ignored() {
        let vars = legacy(&[("SYMBOL", "  "), ("RSI_LOW", "")]);
        assert!(vars.is_empty());
    }

    #[test]
    fn test_prefixed_variables_override_defaults() {
        let cfg = from_vars(&[
            ("PERPWATCH__WATCH__TIMEFRAMES", "15m,1h"),
            ("PERPWATCH__SOURCES__PRIORITY", "okx,bybit"),
            ("PERPWATCH__RSI__PERIOD", "21"),
        ]);
        assert_eq!(cfg.watch.timeframes, vec![Timeframe::Min15, Timeframe::Hour1]);
        assert_eq!(cfg.sources.priority, vec![SourceId::Okx, SourceId::Bybit]);
        assert_eq!(cfg.rsi.period, 21);
    }

    #[test]
    fn test_defaults() {
        let cfg = config();
        assert_eq!(cfg.watch.symbol, "BTC/USDT");
        assert_eq!(
            cfg.watch.timeframes,
            vec![Timeframe::Min5, Timeframe::Min15, Timeframe::Hour1]
        );
        assert_eq!(cfg.watch.candle_limit, 100);
        assert_eq!(cfg.rsi.period, 14);
        assert_eq!(cfg.sources.priority, SourceId::DEFAULT_PRIORITY.to_vec());
        assert_eq!(cfg.sources.cooldown(), Duration::from_secs(120));
        assert_eq!(cfg.sources.request_timeout(), Duration::from_millis(15_000));
        assert!(cfg.sources.enable_rate_limit);
        assert_eq!(cfg.telegram.timeout_secs, 15);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_symbol() {
        let mut cfg = config();
        cfg.watch.symbol = "BTCUSDT".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_timeframes() {
        let mut cfg = config();
        cfg.watch.timeframes.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_priority() {
        let mut cfg = config();
        cfg.sources.priority = vec![SourceId::Okx, SourceId::Bybit, SourceId::Okx];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("okx"));
    }

    #[test]
    fn test_rejects_short_candle_limit() {
        let mut cfg = config();
        cfg.watch.candle_limit = 15;
        assert!(cfg.validate().is_err());
        cfg.watch.candle_limit = 16;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_inverted_thresholds_are_allowed() {
        let mut cfg = config();
        cfg.rsi.low = 80.0;
        cfg.rsi.high = 20.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_credentials_need_both_parts() {
        let mut telegram = config().telegram;
        telegram.bot_token = Some("123:abc".into());
        telegram.chat_id = None;
        assert!(telegram.credentials().is_none());
        telegram.chat_id = Some("42".into());
        assert_eq!(telegram.credentials(), Some(("123:abc", "42")));
    }

    #[test]
    fn test_digest_hides_token() {
        let mut cfg = config();
        cfg.telegram.bot_token = Some("secret-token".into());
        cfg.telegram.chat_id = Some("42".into());
        let digest = cfg.digest();
        assert!(digest.contains("priority=bybit>kucoin>okx"));
        assert!(digest.contains("telegram=on"));
        assert!(!digest.contains("secret-token"));
    }
}
