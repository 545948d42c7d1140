//! Persistent WebSocket connection driving a [`VenueAdapter`].
//!
//! State machine: `Disconnected -> Connecting -> Connected -> Disconnected`,
//! with `Closing` on deliberate shutdown. Every failure (refused connect,
//! transport error, server close) schedules exactly one reconnect after
//! `min(30s, 1s * 2^attempt)`. Decode failures never end a session.

use std::fmt::Display;
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use crate::market_data::adapters::{AdapterMessage, Decoded, LogLevel, VenueAdapter};
use crate::market_data::format::liquidation_line;
use crate::market_data::normaliser::now_ms;
use crate::market_data::types::{Exchange, NormalizedEvent};

/// Transport-level ping period, independent of any venue ping/pong.
pub const TRANSPORT_KEEPALIVE: Duration = Duration::from_secs(60);
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("closed by server: {0}")]
    Closed(String),
}

/// Exponential reconnect delay. `next_delay` returns the delay for the current
/// attempt and then counts it.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    attempt: u32,
    base: Duration,
    max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { attempt: 0, base, max }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u64.checked_shl(self.attempt).unwrap_or(u64::MAX);
        let base_ms = self.base.as_millis() as u64;
        let ms = base_ms.saturating_mul(factor).min(self.max.as_millis() as u64);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(ms)
    }
}

enum SessionEnd {
    Shutdown,
    Failed(AdapterError),
}

pub struct AdapterRunner<A> {
    adapter: A,
    min_notional_usd: f64,
    tx: mpsc::Sender<AdapterMessage>,
    shutdown: watch::Receiver<bool>,
    state: ConnectionState,
    backoff: ReconnectBackoff,
    keepalive: Duration,
}

impl<A: VenueAdapter> AdapterRunner<A> {
    pub fn new(
        adapter: A,
        min_notional_usd: f64,
        tx: mpsc::Sender<AdapterMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            adapter,
            min_notional_usd,
            tx,
            shutdown,
            state: ConnectionState::Disconnected,
            backoff: ReconnectBackoff::default(),
            keepalive: TRANSPORT_KEEPALIVE,
        }
    }

    pub fn with_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(exchange = %self.adapter.exchange(), from = ?self.state, to = ?next, "connection state");
            self.state = next;
        }
    }

    /// Runs until the shutdown signal flips. Never returns on transport errors.
    pub async fn run(mut self) {
        let exchange = self.adapter.exchange();
        let mut shutdown = self.shutdown.clone();

        while !self.shutdown_requested() {
            self.transition(ConnectionState::Connecting);
            self.adapter.prepare().await;

            let connected = tokio::select! {
                res = connect_async(self.adapter.ws_url()) => res,
                _ = shutdown.changed() => break,
            };

            let end = match connected {
                Ok((ws, _response)) => {
                    self.transition(ConnectionState::Connected);
                    self.backoff.reset();
                    self.emit_log(LogLevel::Info, "connected".to_string());
                    self.session(ws).await
                }
                Err(e) => SessionEnd::Failed(AdapterError::Connect(e.to_string())),
            };

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Failed(err) => {
                    self.transition(ConnectionState::Disconnected);
                    let delay = self.backoff.next_delay();
                    metrics::counter!("liqfeed_reconnects_total", "exchange" => exchange.id()).increment(1);
                    self.emit_log(
                        LogLevel::Warn,
                        format!("{err}. Reconnecting in {}ms", delay.as_millis()),
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        self.transition(ConnectionState::Closing);
        self.transition(ConnectionState::Disconnected);
        info!(exchange = %exchange, "adapter stopped");
    }

    async fn session(&mut self, ws: WsStream) -> SessionEnd {
        let exchange = self.adapter.exchange();
        let (mut write, mut read) = ws.split();

        for frame in self.adapter.subscriptions() {
            debug!(exchange = %exchange, frame = %frame, "sending subscribe");
            if let Err(e) = write.send(Message::Text(frame)).await {
                return SessionEnd::Failed(AdapterError::Send(e.to_string()));
            }
        }

        // Timers are local to the session so they die with it.
        let mut keepalive = periodic(self.keepalive);
        let mut app_ping = self.adapter.app_ping_interval().map(periodic);
        let mut refresh = self.adapter.metadata_refresh_interval().map(periodic);
        let mut refreshing: Option<JoinHandle<()>> = None;
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = self.process_text(&text, now_ms()) {
                            send_side_channel(&mut write, exchange, Message::Text(reply), "pong").await;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if let Some(reply) = self.process_text(&text, now_ms()) {
                                send_side_channel(&mut write, exchange, Message::Text(reply), "pong").await;
                            }
                        }
                        Err(_) => debug!(exchange = %exchange, "ignoring non-utf8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("code={} reason=\"{}\"", f.code, f.reason))
                            .unwrap_or_else(|| "no close frame".to_string());
                        return SessionEnd::Failed(AdapterError::Closed(reason));
                    }
                    Some(Ok(other)) => trace!(exchange = %exchange, frame = ?other, "control frame"),
                    Some(Err(e)) => return SessionEnd::Failed(AdapterError::Receive(e.to_string())),
                    None => return SessionEnd::Failed(AdapterError::Closed("stream ended".to_string())),
                },
                _ = keepalive.tick() => {
                    send_side_channel(&mut write, exchange, Message::Ping(Vec::new()), "keepalive ping").await;
                }
                _ = tick(&mut app_ping) => {
                    if let Some(frame) = self.adapter.app_ping(now_ms()) {
                        send_side_channel(&mut write, exchange, Message::Text(frame), "app ping").await;
                    }
                }
                _ = tick(&mut refresh) => {
                    if refreshing.as_ref().is_some_and(|h| !h.is_finished()) {
                        debug!(exchange = %exchange, "metadata refresh still running, skipping tick");
                    } else {
                        refreshing = self.adapter.metadata_refresh().map(tokio::spawn);
                    }
                }
                _ = shutdown.changed() => {
                    self.transition(ConnectionState::Closing);
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    /// Decode one text frame and forward what it carries. Returns the reply
    /// to write back, if the venue expects one.
    pub fn process_text(&mut self, text: &str, now_ms: u64) -> Option<String> {
        let exchange = self.adapter.exchange();
        match self.adapter.decode(text, now_ms) {
            Ok(Decoded::Pong(reply)) => Some(reply),
            Ok(Decoded::SubscriptionAck(detail)) => {
                self.emit_log(LogLevel::Info, format!("subscribe ack: {detail}"));
                None
            }
            Ok(Decoded::SubscriptionError(detail)) => {
                self.emit_log(LogLevel::Error, format!("subscription failed: {detail}"));
                None
            }
            Ok(Decoded::Notice(detail)) => {
                self.emit_log(LogLevel::Info, detail);
                None
            }
            Ok(Decoded::Liquidations { events, skipped }) => {
                if skipped > 0 {
                    debug!(exchange = %exchange, skipped, "dropped rows without a valid notional");
                    metrics::counter!("liqfeed_events_dropped_total", "exchange" => exchange.id(), "reason" => "invalid")
                        .increment(skipped as u64);
                }
                for event in events {
                    self.forward(event);
                }
                None
            }
            Ok(Decoded::Ignore) => None,
            Err(e) => {
                let preview: String = text.chars().take(300).collect();
                warn!(exchange = %exchange, error = %e, raw = %preview, "skipping malformed message");
                None
            }
        }
    }

    fn forward(&self, event: NormalizedEvent) {
        let exchange = event.exchange();
        if event.notional_usd() < self.min_notional_usd {
            trace!(exchange = %exchange, notional = event.notional_usd(), "below threshold");
            metrics::counter!("liqfeed_events_dropped_total", "exchange" => exchange.id(), "reason" => "below_threshold")
                .increment(1);
            return;
        }

        let rendered = liquidation_line(&event);
        match self.tx.try_send(AdapterMessage::Event { event, rendered }) {
            Ok(()) => {
                metrics::counter!("liqfeed_events_total", "exchange" => exchange.id()).increment(1);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(exchange = %exchange, "event channel full, dropping event");
                metrics::counter!("liqfeed_events_dropped_total", "exchange" => exchange.id(), "reason" => "channel_full")
                    .increment(1);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(exchange = %exchange, "event channel closed");
            }
        }
    }

    fn emit_log(&self, level: LogLevel, message: String) {
        let exchange = self.adapter.exchange();
        if let Err(err) = self.tx.try_send(AdapterMessage::Log { exchange, level, message }) {
            // Nobody is routing our logs right now, so write them here.
            if let AdapterMessage::Log { message, .. } = err.into_inner() {
                match level {
                    LogLevel::Debug => debug!(exchange = %exchange, "{message}"),
                    LogLevel::Info => info!(exchange = %exchange, "{message}"),
                    LogLevel::Warn => warn!(exchange = %exchange, "{message}"),
                    LogLevel::Error => error!(exchange = %exchange, "{message}"),
                }
            }
        }
    }
}

fn periodic(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn send_side_channel<S>(write: &mut S, exchange: Exchange, msg: Message, what: &str)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    if let Err(e) = write.send(msg).await {
        warn!(exchange = %exchange, error = %e, "failed to send {what}");
    }
}
