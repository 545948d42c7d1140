// Source: wss://ws.okx.com:8443/ws/v5/public (channel liquidation-orders)
use serde::Deserialize;

use crate::market_data::normaliser::{de_opt_ms, de_opt_num};

// Every frame is one of: event reply, data push. Plain-text "pong" is handled before parsing.
#[derive(Debug, Deserialize)]
pub struct OkxMessage {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub arg: Option<OkxArg>,
    #[serde(default)]
    pub data: Option<Vec<OkxLiquidation>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxArg {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub inst_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxLiquidation {
    #[serde(default)]
    pub inst_id: String,
    #[serde(default)]
    pub inst_family: Option<String>,
    #[serde(default)]
    pub uly: Option<String>,
    #[serde(default)]
    pub details: Vec<OkxLiquidationDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxLiquidationDetail {
    #[serde(default)]
    pub side: String, // "sell" => long liquidated
    #[serde(default, deserialize_with = "de_opt_num")]
    pub bk_px: Option<f64>, // bankruptcy price
    #[serde(default, deserialize_with = "de_opt_num")]
    pub sz: Option<f64>, // contracts
    #[serde(default, deserialize_with = "de_opt_ms")]
    pub ts: Option<u64>,
}
