// Bybit v5 public linear: `allLiquidation.<SYMBOL>` topics.
// Bybit needs one topic per symbol; the symbol list comes from config or
// from the instruments-info REST endpoint (see `market_data::instruments`).

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::{DecodeError, Decoded, VenueAdapter};
use crate::market_data::normaliser::{de_opt_ms, de_opt_num, strip_quote};
use crate::market_data::types::{Exchange, NormalizedEvent, Side};

pub const BYBIT_WS_URL: &str = "wss://stream.bybit.com/v5/public/linear";
const TOPIC_PREFIX: &str = "allLiquidation.";
/// Bybit rejects subscribe requests carrying too many args.
const ARGS_PER_REQUEST: usize = 10;
const APP_PING_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct BybitMessage {
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    ret_msg: Option<String>,
    #[serde(default, rename = "retMsg")]
    ret_msg_camel: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default, deserialize_with = "de_opt_ms")]
    ts: Option<u64>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BybitLiquidation {
    #[serde(rename = "T", default, deserialize_with = "de_opt_ms")]
    time: Option<u64>,
    #[serde(rename = "s", default)]
    symbol: String,
    #[serde(rename = "S", default)]
    side: String,
    #[serde(rename = "v", default, deserialize_with = "de_opt_num")]
    size: Option<f64>,
    #[serde(rename = "p", default, deserialize_with = "de_opt_num")]
    price: Option<f64>,
}

pub struct BybitAdapter {
    ws_url: String,
    symbols: Vec<String>,
}

impl BybitAdapter {
    pub fn new(symbols: Vec<String>) -> Self {
        Self::with_url(BYBIT_WS_URL, symbols)
    }

    pub fn with_url(ws_url: impl Into<String>, symbols: Vec<String>) -> Self {
        let symbols: Vec<String> = symbols
            .into_iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            warn!("bybit: no symbols configured, allLiquidation needs per-symbol topics");
        }
        Self { ws_url: ws_url.into(), symbols }
    }

    fn normalize(row: &BybitLiquidation, msg_ts: Option<u64>, now_ms: u64) -> Option<NormalizedEvent> {
        let qty = row.size.unwrap_or(0.0);
        let price = row.price.unwrap_or(0.0);
        // "Buy" here is the position side: a long got liquidated.
        let side = if row.side.eq_ignore_ascii_case("Buy") { Side::Long } else { Side::Short };
        NormalizedEvent::new(
            Exchange::Bybit,
            strip_quote(&row.symbol, &["USDT", "USDC"]),
            side,
            price,
            qty,
            qty * price,
            row.time.or(msg_ts).unwrap_or(now_ms),
            now_ms,
        )
        .ok()
    }
}

#[async_trait::async_trait]
impl VenueAdapter for BybitAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn subscriptions(&self) -> Vec<String> {
        self.symbols
            .chunks(ARGS_PER_REQUEST)
            .map(|chunk| {
                let args: Vec<String> = chunk.iter().map(|s| format!("{TOPIC_PREFIX}{s}")).collect();
                json!({ "op": "subscribe", "args": args }).to_string()
            })
            .collect()
    }

    fn decode(&self, text: &str, now_ms: u64) -> Result<Decoded, DecodeError> {
        let msg: BybitMessage = serde_json::from_str(text)?;

        match msg.op.as_deref() {
            // Server-initiated ping: echo its timestamp back.
            Some("ping") if msg.success.is_none() => {
                let pong = match msg.ts {
                    Some(ts) => json!({ "op": "pong", "ts": ts }),
                    None => json!({ "op": "pong" }),
                };
                return Ok(Decoded::Pong(pong.to_string()));
            }
            // Reply to our own app ping.
            Some("ping") | Some("pong") => return Ok(Decoded::Ignore),
            _ => {}
        }

        if let Some(success) = msg.success {
            let detail = msg.ret_msg.or(msg.ret_msg_camel).unwrap_or_default();
            return Ok(if success {
                Decoded::SubscriptionAck(detail)
            } else {
                Decoded::SubscriptionError(text.to_string())
            });
        }

        let topic = msg.topic.unwrap_or_default();
        if !topic.starts_with(TOPIC_PREFIX) {
            return Ok(Decoded::Ignore);
        }

        let rows: Vec<BybitLiquidation> = match msg.data {
            Some(serde_json::Value::Array(items)) => items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<_, _>>()?,
            Some(item @ serde_json::Value::Object(_)) => vec![serde_json::from_value(item)?],
            _ => return Err(DecodeError::Unexpected(format!("{topic} without data rows"))),
        };

        let total = rows.len();
        let events: Vec<_> = rows
            .iter()
            .filter_map(|row| Self::normalize(row, msg.ts, now_ms))
            .collect();
        let skipped = total - events.len();
        Ok(Decoded::liquidations(events, skipped))
    }

    fn app_ping_interval(&self) -> Option<Duration> {
        Some(APP_PING_INTERVAL)
    }

    fn app_ping(&self, _now_ms: u64) -> Option<String> {
        Some(json!({ "op": "ping" }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> BybitAdapter {
        BybitAdapter::new(vec!["btcusdt".into(), " ETHUSDT ".into(), "".into()])
    }

    #[test]
    fn test_subscriptions_are_chunked() {
        let symbols: Vec<String> = (0..23).map(|i| format!("S{i}USDT")).collect();
        let subs = BybitAdapter::new(symbols).subscriptions();
        assert_eq!(subs.len(), 3);
        let first: serde_json::Value = serde_json::from_str(&subs[0]).unwrap();
        assert_eq!(first["op"], "subscribe");
        assert_eq!(first["args"].as_array().unwrap().len(), 10);
        assert_eq!(first["args"][0], "allLiquidation.S0USDT");

        assert_eq!(
            adapter().subscriptions(),
            vec![r#"{"args":["allLiquidation.BTCUSDT","allLiquidation.ETHUSDT"],"op":"subscribe"}"#.to_string()]
        );
    }

    #[test]
    fn test_liquidation_rows() {
        let msg = r#"{"topic":"allLiquidation.BTCUSDT","type":"snapshot","ts":1739502303204,"data":[{"T":1739502302929,"s":"BTCUSDT","S":"Sell","v":"0.5","p":"96000"},{"T":1739502302930,"s":"BTCUSDT","S":"Buy","v":"0","p":"96000"}]}"#;
        match adapter().decode(msg, 1_739_502_400_000).unwrap() {
            Decoded::Liquidations { events, skipped } => {
                assert_eq!(skipped, 1);
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].side(), Side::Short);
                assert_eq!(events[0].symbol(), "BTC");
                assert_eq!(events[0].notional_usd(), 48000.0);
                assert_eq!(events[0].timestamp_ms(), 1_739_502_302_929);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_buy_means_long_closed() {
        let msg = r#"{"topic":"allLiquidation.ETHUSDT","ts":1,"data":[{"T":1,"s":"ETHUSDT","S":"Buy","v":"2","p":"3000"}]}"#;
        match adapter().decode(msg, 10).unwrap() {
            Decoded::Liquidations { events, .. } => assert_eq!(events[0].side(), Side::Long),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ping_and_acks() {
        let a = adapter();
        assert_eq!(
            a.decode(r#"{"op":"ping","ts":123}"#, 0).unwrap(),
            Decoded::Pong(r#"{"op":"pong","ts":123}"#.to_string())
        );
        assert_eq!(a.decode(r#"{"op":"ping"}"#, 0).unwrap(), Decoded::Pong(r#"{"op":"pong"}"#.to_string()));
        assert_eq!(
            a.decode(r#"{"success":true,"ret_msg":"pong","conn_id":"x","op":"ping"}"#, 0).unwrap(),
            Decoded::Ignore
        );
        assert_eq!(
            a.decode(r#"{"success":true,"ret_msg":"","conn_id":"x","op":"subscribe"}"#, 0).unwrap(),
            Decoded::SubscriptionAck(String::new())
        );
        assert!(matches!(
            a.decode(r#"{"success":false,"ret_msg":"error:handler not found","op":"subscribe"}"#, 0).unwrap(),
            Decoded::SubscriptionError(_)
        ));
    }

    #[test]
    fn test_other_topics_and_bad_rows() {
        let a = adapter();
        assert_eq!(a.decode(r#"{"topic":"tickers.BTCUSDT","data":{}}"#, 0).unwrap(), Decoded::Ignore);
        assert!(a.decode(r#"{"topic":"allLiquidation.BTCUSDT"}"#, 0).is_err());
        assert!(a.decode("[", 0).is_err());
    }
}
