//! Runtime settings: defaults, then an optional TOML file, then `LIQFEED__*`
//! environment variables. CLI overrides are applied by the binary afterwards.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use crate::dispatch::{DispatcherConfig, EvictionLog};
use crate::dispatch::dispatcher::DEFAULT_FALLBACK_RETRY_AFTER;
use crate::dispatch::sinks::x::XCredentials;
use crate::market_data::instruments::{BYBIT_REST_URL, OKX_REST_URL};
use crate::market_data::types::Exchange;

pub const ENV_PREFIX: &str = "LIQFEED";
pub const DEFAULT_CONFIG_FILE: &str = "liqfeed.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Events strictly below this USD notional never leave the adapter.
    pub min_notional_usd: f64,
    /// Capacity of the adapter -> router channel.
    pub event_buffer: usize,
    pub exchanges: Vec<Exchange>,
    pub bybit: BybitSettings,
    pub okx: OkxSettings,
    pub hyperliquid: HyperliquidSettings,
    pub telegram: TelegramSettings,
    pub x: XSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_notional_usd: 100.0,
            event_buffer: 1024,
            exchanges: vec![Exchange::Binance, Exchange::Bybit, Exchange::Okx, Exchange::GateIo],
            bybit: BybitSettings::default(),
            okx: OkxSettings::default(),
            hyperliquid: HyperliquidSettings::default(),
            telegram: TelegramSettings::default(),
            x: XSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BybitSettings {
    /// Empty means "every trading USDT linear contract", fetched at startup.
    pub symbols: Vec<String>,
    pub rest_url: String,
}

impl Default for BybitSettings {
    fn default() -> Self {
        Self { symbols: Vec::new(), rest_url: BYBIT_REST_URL.to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OkxSettings {
    pub rest_url: String,
    pub refresh_interval_secs: u64,
}

impl Default for OkxSettings {
    fn default() -> Self {
        Self { rest_url: OKX_REST_URL.to_string(), refresh_interval_secs: 1800 }
    }
}

impl OkxSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HyperliquidSettings {
    pub user: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub enabled: bool,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub dry_run: bool,
    pub min_interval_ms: u64,
    pub capacity: usize,
    /// Channel threshold; falls back to the global one.
    pub min_notional_usd: Option<f64>,
    pub eviction_log: EvictionLog,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            chat_id: None,
            dry_run: false,
            min_interval_ms: 1200,
            capacity: 500,
            min_notional_usd: None,
            eviction_log: EvictionLog::Silent,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XSettings {
    pub enabled: bool,
    /// OAuth 1.0a user-context keys; preferred when all four are set.
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub access_token: Option<String>,
    pub access_secret: Option<String>,
    /// OAuth 2.0 user access token, used when the OAuth 1.0a keys are absent.
    pub bearer_token: Option<String>,
    pub dry_run: bool,
    pub min_interval_ms: u64,
    pub capacity: usize,
    pub min_notional_usd: Option<f64>,
    pub eviction_log: EvictionLog,
}

impl Default for XSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            api_secret: None,
            access_token: None,
            access_secret: None,
            bearer_token: None,
            dry_run: false,
            min_interval_ms: 2000,
            capacity: 500,
            min_notional_usd: None,
            eviction_log: EvictionLog::Silent,
        }
    }
}

impl XSettings {
    pub fn credentials(&self) -> Option<XCredentials> {
        let value = |v: &Option<String>| v.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
        match (
            value(&self.api_key),
            value(&self.api_secret),
            value(&self.access_token),
            value(&self.access_secret),
        ) {
            (Some(api_key), Some(api_secret), Some(access_token), Some(access_secret)) => {
                Some(XCredentials::OAuth1 { api_key, api_secret, access_token, access_secret })
            }
            _ => value(&self.bearer_token).map(XCredentials::Bearer),
        }
    }
}

/// Per-channel view the router works from.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub name: &'static str,
    pub dry_run: bool,
    pub min_notional_usd: f64,
    pub dispatcher: DispatcherConfig,
}

fn channel(
    name: &'static str,
    dry_run: bool,
    min_notional_usd: f64,
    min_interval_ms: u64,
    capacity: usize,
    eviction_log: EvictionLog,
) -> ChannelSettings {
    ChannelSettings {
        name,
        dry_run,
        min_notional_usd,
        dispatcher: DispatcherConfig {
            capacity,
            min_interval: Duration::from_millis(min_interval_ms),
            fallback_retry_after: DEFAULT_FALLBACK_RETRY_AFTER,
            eviction_log,
        },
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl Settings {
    /// Loads `path` (if it exists) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let builder = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(Self::environment());
        Ok(builder.build()?.try_deserialize()?)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("exchanges")
            .with_list_parse_key("bybit.symbols")
    }

    pub fn enabled_exchanges(&self) -> Vec<Exchange> {
        let mut out: Vec<Exchange> = Vec::new();
        for ex in &self.exchanges {
            if !out.contains(ex) {
                out.push(*ex);
            }
        }
        out
    }

    /// Enabled outbound channels, in a stable order.
    pub fn channels(&self) -> Vec<ChannelSettings> {
        let mut out = Vec::new();
        if self.telegram.enabled {
            let t = &self.telegram;
            out.push(channel(
                "telegram",
                t.dry_run,
                t.min_notional_usd.unwrap_or(self.min_notional_usd),
                t.min_interval_ms,
                t.capacity,
                t.eviction_log,
            ));
        }
        if self.x.enabled {
            let x = &self.x;
            out.push(channel(
                "x",
                x.dry_run,
                x.min_notional_usd.unwrap_or(self.min_notional_usd),
                x.min_interval_ms,
                x.capacity,
                x.eviction_log,
            ));
        }
        out
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |msg: String| Err(SettingsError::Invalid(msg));

        if !(self.min_notional_usd.is_finite() && self.min_notional_usd > 0.0) {
            return invalid(format!("min_notional_usd must be > 0, got {}", self.min_notional_usd));
        }
        if self.event_buffer == 0 {
            return invalid("event_buffer must be > 0".into());
        }
        if self.enabled_exchanges().is_empty() {
            return invalid("no exchanges enabled".into());
        }
        if self.enabled_exchanges().contains(&Exchange::Hyperliquid) && !non_empty(&self.hyperliquid.user) {
            return invalid("hyperliquid requires hyperliquid.user".into());
        }
        if self.okx.refresh_interval_secs == 0 {
            return invalid("okx.refresh_interval_secs must be > 0".into());
        }

        for ch in self.channels() {
            if !(ch.min_notional_usd.is_finite() && ch.min_notional_usd > 0.0) {
                return invalid(format!("{}.min_notional_usd must be > 0", ch.name));
            }
            if ch.dispatcher.capacity == 0 {
                return invalid(format!("{}.capacity must be > 0", ch.name));
            }
        }
        if self.telegram.enabled
            && !self.telegram.dry_run
            && !(non_empty(&self.telegram.bot_token) && non_empty(&self.telegram.chat_id))
        {
            return invalid("telegram enabled without bot_token/chat_id".into());
        }
        if self.x.enabled && !self.x.dry_run && self.x.credentials().is_none() {
            return invalid("x enabled without api_key/api_secret/access_token/access_secret or bearer_token".into());
        }
        Ok(())
    }
}
