// Shared trait + messages for the per-venue liquidation adapters.
// An adapter only knows its venue's wire protocol; connection handling,
// keepalive and reconnects live in `market_data::connection`.

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::market_data::types::{Exchange, NormalizedEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// What an adapter hands to the supervisor.
#[derive(Debug, Clone)]
pub enum AdapterMessage {
    Log {
        exchange: Exchange,
        level: LogLevel,
        message: String,
    },
    Event {
        event: NormalizedEvent,
        rendered: String,
    },
}

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Reply the venue expects on the same connection.
    Pong(String),
    SubscriptionAck(String),
    SubscriptionError(String),
    /// Venue message worth logging that carries no event.
    Notice(String),
    /// Rows that normalized cleanly; `skipped` counts rows that did not.
    Liquidations {
        events: Vec<NormalizedEvent>,
        skipped: usize,
    },
    /// Heartbeat replies and channels we don't consume.
    Ignore,
}

impl Decoded {
    pub fn liquidations(events: Vec<NormalizedEvent>, skipped: usize) -> Self {
        Decoded::Liquidations { events, skipped }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected payload: {0}")]
    Unexpected(String),
}

#[async_trait::async_trait]
pub trait VenueAdapter: Send + Sync {
    fn exchange(&self) -> Exchange;

    fn ws_url(&self) -> &str;

    /// Text frames sent right after the socket opens.
    fn subscriptions(&self) -> Vec<String>;

    fn decode(&self, text: &str, now_ms: u64) -> Result<Decoded, DecodeError>;

    /// Application-level ping period, for venues that drop quiet clients.
    fn app_ping_interval(&self) -> Option<Duration> {
        None
    }

    fn app_ping(&self, _now_ms: u64) -> Option<String> {
        None
    }

    /// Called before every connect attempt.
    async fn prepare(&self) {}

    fn metadata_refresh_interval(&self) -> Option<Duration> {
        None
    }

    /// Detached metadata reload, run on its own task so the read loop never
    /// waits on REST.
    fn metadata_refresh(&self) -> Option<BoxFuture<'static, ()>> {
        None
    }
}

pub mod binance;
pub mod bybit;
pub mod gateio;
pub mod hyperliquid;
pub mod hyperliquid_types;
pub mod okx;
pub mod okx_types;
