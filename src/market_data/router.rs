// Router: owns the adapter tasks and the per-channel dispatchers.
// Adapters push AdapterMessages into one bounded channel; the router turns
// Log messages into tracing events and fans Event messages out to every
// channel whose threshold they clear.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ChannelSettings, Settings};
use crate::dispatch::sinks::{DryRunSink, OutboundSink, TelegramSink, XSink};
use crate::dispatch::Dispatcher;
use crate::market_data::adapters::binance::BinanceAdapter;
use crate::market_data::adapters::bybit::BybitAdapter;
use crate::market_data::adapters::gateio::GateIoAdapter;
use crate::market_data::adapters::hyperliquid::HyperliquidAdapter;
use crate::market_data::adapters::okx::OkxAdapter;
use crate::market_data::adapters::{AdapterMessage, LogLevel, VenueAdapter};
use crate::market_data::connection::AdapterRunner;
use crate::market_data::instruments::{fetch_bybit_symbols, InstrumentError, InstrumentSource, OkxInstrumentClient};
use crate::market_data::types::Exchange;

/// Pause before restarting an adapter task that exited or panicked.
pub const RESTART_DELAY: Duration = Duration::from_secs(2);
/// How long a stopping adapter gets to close its socket before it is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("instrument metadata: {0}")]
    Instruments(#[from] InstrumentError),
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
}

/// One outbound channel as seen by the router.
#[derive(Clone)]
pub struct Route {
    pub min_notional_usd: f64,
    pub dispatcher: Dispatcher,
}

/// Handles one adapter message; returns how many channels took the event.
pub fn route_message(routes: &[Route], message: AdapterMessage) -> usize {
    match message {
        AdapterMessage::Log { exchange, level, message } => {
            match level {
                LogLevel::Debug => debug!(exchange = %exchange, "{message}"),
                LogLevel::Info => info!(exchange = %exchange, "{message}"),
                LogLevel::Warn => warn!(exchange = %exchange, "{message}"),
                LogLevel::Error => error!(exchange = %exchange, "{message}"),
            }
            0
        }
        AdapterMessage::Event { event, rendered } => {
            info!(
                exchange = %event.exchange(),
                symbol = event.symbol(),
                side = %event.side(),
                notional = event.notional_usd(),
                "{rendered}"
            );
            let mut taken = 0;
            for route in routes.iter().filter(|r| event.notional_usd() >= r.min_notional_usd) {
                if route.dispatcher.enqueue(rendered.as_str(), event.notional_usd()).added {
                    taken += 1;
                }
            }
            taken
        }
    }
}

/// Builds the sink for an enabled channel; dry-run channels only log.
pub fn build_sink(settings: &Settings, channel: &ChannelSettings, http: &reqwest::Client) -> Result<Arc<dyn OutboundSink>, RouterError> {
    if channel.dry_run {
        return Ok(Arc::new(DryRunSink::new(channel.name)));
    }
    let missing = |what: &str| RouterError::Config(format!("{} requires {what}", channel.name));
    match channel.name {
        "telegram" => {
            let token = settings.telegram.bot_token.clone().ok_or_else(|| missing("bot_token"))?;
            let chat = settings.telegram.chat_id.clone().ok_or_else(|| missing("chat_id"))?;
            Ok(Arc::new(TelegramSink::new(http.clone(), token, chat)))
        }
        "x" => {
            let credentials = settings
                .x
                .credentials()
                .ok_or_else(|| missing("OAuth 1.0a keys or bearer_token"))?;
            Ok(Arc::new(XSink::new(http.clone(), credentials)))
        }
        other => Err(RouterError::Config(format!("unknown channel {other}"))),
    }
}

/// Everything an adapter task needs to build and run its adapter.
#[derive(Clone)]
struct AdapterContext {
    settings: Arc<Settings>,
    http: reqwest::Client,
    okx_instruments: Arc<dyn InstrumentSource>,
    tx: mpsc::Sender<AdapterMessage>,
    shutdown: watch::Receiver<bool>,
}

impl AdapterContext {
    fn runner<A: VenueAdapter>(&self, adapter: A) -> AdapterRunner<A> {
        AdapterRunner::new(adapter, self.settings.min_notional_usd, self.tx.clone(), self.shutdown.clone())
    }

    async fn run(self, exchange: Exchange) -> Result<(), RouterError> {
        match exchange {
            Exchange::Binance => self.runner(BinanceAdapter::new()).run().await,
            Exchange::Bybit => {
                let bybit = &self.settings.bybit;
                let symbols = if bybit.symbols.is_empty() {
                    fetch_bybit_symbols(&self.http, &bybit.rest_url, "USDT").await?
                } else {
                    bybit.symbols.clone()
                };
                info!(exchange = %exchange, symbols = symbols.len(), "bybit symbol set loaded");
                self.runner(BybitAdapter::new(symbols)).run().await
            }
            Exchange::Okx => {
                let adapter = OkxAdapter::new(self.okx_instruments.clone(), self.settings.okx.refresh_interval());
                self.runner(adapter).run().await
            }
            Exchange::GateIo => self.runner(GateIoAdapter::new()).run().await,
            Exchange::Hyperliquid => {
                let user = self
                    .settings
                    .hyperliquid
                    .user
                    .clone()
                    .ok_or_else(|| RouterError::Config("hyperliquid.user is not set".into()))?;
                self.runner(HyperliquidAdapter::new(&user)).run().await
            }
        }
        Ok(())
    }
}

/// Keeps one adapter task alive: any exit or panic before shutdown is
/// followed by a restart after [`RESTART_DELAY`].
pub async fn supervise<F, Fut>(exchange: Exchange, make: F, mut shutdown: watch::Receiver<bool>)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), RouterError>> + Send + 'static,
{
    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut handle: JoinHandle<Result<(), RouterError>> = tokio::spawn(make());
        let finished = tokio::select! {
            res = &mut handle => Some(res),
            _ = shutdown.changed() => None,
        };

        match finished {
            None => {
                if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                    warn!(exchange = %exchange, "adapter did not stop in time, aborting");
                    handle.abort();
                }
                break;
            }
            Some(Ok(Ok(()))) if *shutdown.borrow() => break,
            Some(Ok(Ok(()))) => warn!(exchange = %exchange, "adapter task exited"),
            Some(Ok(Err(e))) => warn!(exchange = %exchange, error = %e, "adapter task failed"),
            Some(Err(e)) if e.is_panic() => error!(exchange = %exchange, "adapter task panicked"),
            Some(Err(e)) => warn!(exchange = %exchange, error = %e, "adapter task cancelled"),
        }

        metrics::counter!("liqfeed_adapter_restarts_total", "exchange" => exchange.id()).increment(1);
        info!(exchange = %exchange, delay_ms = RESTART_DELAY.as_millis() as u64, "restarting adapter");
        tokio::select! {
            _ = tokio::time::sleep(RESTART_DELAY) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!(exchange = %exchange, "supervisor stopped");
}

/// Runs the feed until `shutdown` flips to true.
pub async fn run(settings: Settings, mut shutdown: watch::Receiver<bool>) -> Result<(), RouterError> {
    let settings = Arc::new(settings);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .gzip(true)
        .build()?;

    let mut routes = Vec::new();
    for channel in settings.channels() {
        let sink = build_sink(&settings, &channel, &http)?;
        info!(
            channel = channel.name,
            dry_run = channel.dry_run,
            min_notional = channel.min_notional_usd,
            capacity = channel.dispatcher.capacity,
            "dispatcher started"
        );
        routes.push(Route {
            min_notional_usd: channel.min_notional_usd,
            dispatcher: Dispatcher::spawn(sink, channel.dispatcher.clone()),
        });
    }
    if routes.is_empty() {
        warn!("no outbound channels enabled; liquidations are only logged");
    }

    let (tx, mut rx) = mpsc::channel(settings.event_buffer);
    let ctx = AdapterContext {
        okx_instruments: Arc::new(OkxInstrumentClient::new(http.clone(), settings.okx.rest_url.clone())),
        settings: settings.clone(),
        http,
        tx,
        shutdown: shutdown.clone(),
    };

    let supervisors: Vec<JoinHandle<()>> = settings
        .enabled_exchanges()
        .into_iter()
        .map(|exchange| {
            let ctx = ctx.clone();
            let stop = shutdown.clone();
            info!(exchange = %exchange, "starting adapter");
            tokio::spawn(supervise(exchange, move || ctx.clone().run(exchange), stop))
        })
        .collect();
    drop(ctx);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => {
                    route_message(&routes, msg);
                }
                None => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("shutting down");
    for sup in supervisors {
        if let Err(e) = sup.await {
            error!(error = %e, "supervisor ended abnormally");
        }
    }
    for route in &routes {
        route.dispatcher.shutdown().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dispatch::DispatcherConfig;
    use crate::market_data::types::{NormalizedEvent, Side};

    fn event(notional: f64) -> AdapterMessage {
        let event = NormalizedEvent::new(Exchange::Binance, "BTC", Side::Long, 100.0, notional / 100.0, notional, 1, 2)
            .unwrap();
        AdapterMessage::Event { event, rendered: format!("line {notional}") }
    }

    fn route(sink: Arc<DryRunSink>, min_notional_usd: f64) -> Route {
        Route {
            min_notional_usd,
            dispatcher: Dispatcher::spawn(
                sink,
                DispatcherConfig { min_interval: Duration::ZERO, ..Default::default() },
            ),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_fan_out_by_channel_threshold() {
        let tg = Arc::new(DryRunSink::new("telegram"));
        let x = Arc::new(DryRunSink::new("x"));
        let routes = vec![route(tg.clone(), 1_000.0), route(x.clone(), 100_000.0)];

        assert_eq!(route_message(&routes, event(5_000.0)), 1);
        assert_eq!(route_message(&routes, event(100_000.0)), 2);
        assert_eq!(route_message(&routes, event(999.0)), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(tg.sent(), vec!["line 100000".to_string(), "line 5000".to_string()]);
        assert_eq!(x.sent(), vec!["line 100000".to_string()]);

        for r in &routes {
            r.dispatcher.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_log_messages_are_not_enqueued() {
        let tg = Arc::new(DryRunSink::new("telegram"));
        let routes = vec![route(tg.clone(), 1.0)];
        let msg = AdapterMessage::Log {
            exchange: Exchange::Okx,
            level: LogLevel::Warn,
            message: "Reconnecting in 1000ms".into(),
        };
        assert_eq!(route_message(&routes, msg), 0);
        assert!(routes[0].dispatcher.is_empty());
        routes[0].dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_restarts_after_panic() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (stop_tx, stop_rx) = watch::channel(false);

        let counter = runs.clone();
        let sup = tokio::spawn(supervise(
            Exchange::Bybit,
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("adapter blew up");
                    }
                    std::future::pending::<Result<(), RouterError>>().await
                }
            },
            stop_rx,
        ));

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        stop_tx.send_replace(true);
        sup.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_restarts_after_error() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (stop_tx, stop_rx) = watch::channel(false);

        let counter = runs.clone();
        let sup = tokio::spawn(supervise(
            Exchange::Okx,
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(RouterError::Config("no symbols".into()))
                }
            },
            stop_rx,
        ));

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        stop_tx.send_replace(true);
        sup.await.unwrap();
    }

    #[test]
    fn test_build_sink_dry_run_and_missing_credentials() {
        let mut settings = Settings::default();
        settings.x.enabled = true;
        settings.x.dry_run = true;
        let http = reqwest::Client::new();
        let channels = settings.channels();
        let sink = build_sink(&settings, &channels[0], &http).unwrap();
        assert_eq!(sink.name(), "x");

        settings.x.dry_run = false;
        let channels = settings.channels();
        assert!(matches!(build_sink(&settings, &channels[0], &http), Err(RouterError::Config(_))));

        settings.x.api_key = Some("ck".into());
        settings.x.api_secret = Some("cs".into());
        settings.x.access_token = Some("at".into());
        settings.x.access_secret = Some("as".into());
        let sink = build_sink(&settings, &channels[0], &http).unwrap();
        assert_eq!(sink.name(), "x");
    }
}
