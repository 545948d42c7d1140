// Source: https://api.hyperliquid.xyz/ws (Subscriptions -> userFills, userEvents)
use serde::Deserialize;

use crate::market_data::normaliser::{de_opt_ms, de_opt_num};

// Wrapper for every WebSocket push: {"channel": ..., "data": ...}
#[derive(Debug, Deserialize)]
pub struct WsMessage {
    pub channel: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsUserFills {
    #[serde(default)]
    pub is_snapshot: bool,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub fills: Vec<WsFill>,
}

#[derive(Debug, Deserialize)]
pub struct WsFill {
    pub coin: String,
    #[serde(default, deserialize_with = "de_opt_num")]
    pub px: Option<f64>, // price string, e.g. "1234.56"
    #[serde(default, deserialize_with = "de_opt_num")]
    pub sz: Option<f64>, // size string, e.g. "0.01"
    pub side: String, // "B" (bid/buy) or "A" (ask/sell)
    #[serde(default, deserialize_with = "de_opt_ms")]
    pub time: Option<u64>,
    #[serde(default)]
    pub liquidation: Option<FillLiquidation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillLiquidation {
    #[serde(default)]
    pub liquidated_user: Option<String>,
    #[serde(default, deserialize_with = "de_opt_num")]
    pub mark_px: Option<f64>,
    #[serde(default)]
    pub method: String, // "market" | "backstop"
}

// userEvents pushes arrive on channel "user"; only the liquidation variant matters here.
#[derive(Debug, Deserialize)]
pub struct WsUserEvent {
    #[serde(default)]
    pub liquidation: Option<WsLiquidation>,
}

#[derive(Debug, Deserialize)]
pub struct WsLiquidation {
    pub lid: u64,
    #[serde(default)]
    pub liquidator: String,
    #[serde(default)]
    pub liquidated_user: String,
    #[serde(default)]
    pub liquidated_ntl_pos: String,
    #[serde(default)]
    pub liquidated_account_value: String,
}
