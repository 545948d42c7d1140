pub mod config;
pub mod dispatch;
pub mod market_data;
pub mod telemetry;
