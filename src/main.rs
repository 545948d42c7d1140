use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use liqfeed_rs::config::Settings;
use liqfeed_rs::market_data::router;
use liqfeed_rs::market_data::types::Exchange;
use liqfeed_rs::telemetry;

#[derive(Debug, Parser)]
#[command(name = "liqfeed", version, about = "Streams large futures liquidations to Telegram and X")]
struct Cli {
    /// TOML settings file; missing is fine.
    #[arg(long, env = "LIQFEED_CONFIG", default_value = liqfeed_rs::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Global USD notional threshold.
    #[arg(long)]
    min_notional_usd: Option<f64>,

    /// Log posts instead of sending them.
    #[arg(long)]
    dry_run: bool,

    /// Exchanges to watch (repeatable); replaces the configured list.
    #[arg(long = "exchange", value_name = "EXCHANGE")]
    exchanges: Vec<Exchange>,

    /// Prometheus listener, used when built with `metrics-exporter`.
    #[arg(long, default_value = "0.0.0.0:9000")]
    metrics_addr: SocketAddr,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(min) = self.min_notional_usd {
            settings.min_notional_usd = min;
        }
        if self.dry_run {
            settings.telegram.dry_run = true;
            settings.x.dry_run = true;
        }
        if !self.exchanges.is_empty() {
            settings.exchanges = self.exchanges.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    telemetry::init_tracing(telemetry::DEFAULT_LOG_FILTER);
    telemetry::init_metrics(cli.metrics_addr).context("metrics exporter")?;

    let mut settings = Settings::load(Some(&cli.config)).context("loading settings")?;
    cli.apply(&mut settings);
    settings.validate()?;

    info!(
        min_notional = settings.min_notional_usd,
        exchanges = ?settings.enabled_exchanges(),
        channels = settings.channels().len(),
        "liqfeed starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            // Dropping the sender would read as a shutdown everywhere.
            std::future::pending::<()>().await;
        }
        info!("ctrl-c received");
        shutdown_tx.send_replace(true);
    });

    router::run(settings, shutdown_rx).await?;
    info!("bye");
    Ok(())
}
