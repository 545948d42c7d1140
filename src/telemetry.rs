use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "info,liqfeed_rs=debug";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("prometheus exporter: {0}")]
    Exporter(String),
}

pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(addr: std::net::SocketAddr) -> Result<(), TelemetryError> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    tracing::info!(%addr, "prometheus exporter listening on /metrics");
    metrics::gauge!("liqfeed_up").set(1.0);
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(_addr: std::net::SocketAddr) -> Result<(), TelemetryError> {
    Ok(())
}
