// Gate.io USDT-settled futures: futures.public_liquidates for every contract.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{DecodeError, Decoded, VenueAdapter};
use crate::market_data::normaliser::{de_opt_ms, de_opt_num, strip_quote};
use crate::market_data::types::{Exchange, NormalizedEvent, Side};

pub const GATEIO_WS_URL: &str = "wss://fx-ws.gateio.ws/v4/ws/usdt";
const CHANNEL: &str = "futures.public_liquidates";
const APP_PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct GateMessage {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    event: String,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GateLiquidation {
    #[serde(default)]
    contract: String,
    #[serde(default, deserialize_with = "de_opt_num")]
    price: Option<f64>,
    // Signed: negative means a long was closed.
    #[serde(default, deserialize_with = "de_opt_num")]
    size: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_ms")]
    time_ms: Option<u64>,
}

pub struct GateIoAdapter {
    ws_url: String,
}

impl Default for GateIoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl GateIoAdapter {
    pub fn new() -> Self {
        Self { ws_url: GATEIO_WS_URL.to_string() }
    }

    pub fn with_url(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }

    fn normalize(row: &GateLiquidation, now_ms: u64) -> Option<NormalizedEvent> {
        let size = row.size.unwrap_or(0.0);
        let price = row.price.unwrap_or(0.0);
        let qty = size.abs();
        let notional = if row.contract.to_ascii_uppercase().ends_with("_USDT") {
            qty * price
        } else {
            qty
        };
        NormalizedEvent::new(
            Exchange::GateIo,
            strip_quote(&row.contract, &["_USDT", "_USD"]),
            Side::from_order_side(size < 0.0),
            price,
            qty,
            notional,
            row.time_ms.unwrap_or(now_ms),
            now_ms,
        )
        .ok()
    }
}

fn unix_secs(now_ms: u64) -> u64 {
    now_ms / 1000
}

#[async_trait::async_trait]
impl VenueAdapter for GateIoAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::GateIo
    }

    fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn subscriptions(&self) -> Vec<String> {
        let now = crate::market_data::normaliser::now_ms();
        vec![json!({
            "time": unix_secs(now),
            "channel": CHANNEL,
            "event": "subscribe",
            "payload": ["!all"],
        })
        .to_string()]
    }

    fn decode(&self, text: &str, now_ms: u64) -> Result<Decoded, DecodeError> {
        let msg: GateMessage = serde_json::from_str(text)?;

        if msg.channel == "futures.pong" {
            return Ok(Decoded::Ignore);
        }
        if let Some(err) = msg.error.as_ref().filter(|e| !e.is_null()) {
            return Ok(Decoded::SubscriptionError(err.to_string()));
        }
        match msg.event.as_str() {
            "subscribe" => return Ok(Decoded::SubscriptionAck(msg.channel)),
            "error" => return Ok(Decoded::SubscriptionError(text.to_string())),
            "update" if msg.channel == CHANNEL => {}
            _ => return Ok(Decoded::Ignore),
        }

        let rows: Vec<GateLiquidation> = match msg.result {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<_, _>>()?,
            Some(item @ Value::Object(_)) => vec![serde_json::from_value(item)?],
            _ => Vec::new(),
        };

        let total = rows.len();
        let events: Vec<_> = rows.iter().filter_map(|r| Self::normalize(r, now_ms)).collect();
        let skipped = total - events.len();
        Ok(Decoded::liquidations(events, skipped))
    }

    fn app_ping_interval(&self) -> Option<Duration> {
        Some(APP_PING_INTERVAL)
    }

    fn app_ping(&self, now_ms: u64) -> Option<String> {
        Some(json!({ "time": unix_secs(now_ms), "channel": "futures.ping" }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_rows() {
        let msg = r#"{"channel":"futures.public_liquidates","event":"update","time":1541505434,"time_ms":1541505434123,
            "result":[{"price":"215.1","size":-124,"time_ms":1541486601123,"contract":"BTC_USDT"},
                      {"price":215.1,"size":3,"time_ms":1541486601124,"contract":"ETH_USDT"},
                      {"price":"0","size":3,"contract":"XRP_USDT"}]}"#;
        match GateIoAdapter::new().decode(msg, 1_600_000_000_000).unwrap() {
            Decoded::Liquidations { events, skipped } => {
                assert_eq!(skipped, 1);
                assert_eq!(events[0].side(), Side::Long);
                assert_eq!(events[0].symbol(), "BTC");
                assert_eq!(events[0].quantity(), 124.0);
                assert_eq!(events[0].notional_usd(), 124.0 * 215.1);
                assert_eq!(events[1].side(), Side::Short);
                assert_eq!(events[1].symbol(), "ETH");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_single_object_result_and_usd_contract() {
        let msg = r#"{"channel":"futures.public_liquidates","event":"update","result":{"price":"50000","size":-20,"contract":"BTC_USD"}}"#;
        match GateIoAdapter::new().decode(msg, 5).unwrap() {
            Decoded::Liquidations { events, .. } => {
                assert_eq!(events[0].notional_usd(), 20.0);
                assert_eq!(events[0].timestamp_ms(), 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_control_messages() {
        let a = GateIoAdapter::new();
        assert_eq!(
            a.decode(r#"{"time":1,"channel":"futures.public_liquidates","event":"subscribe","error":null,"result":{"status":"success"}}"#, 0)
                .unwrap(),
            Decoded::SubscriptionAck(CHANNEL.to_string())
        );
        assert!(matches!(
            a.decode(r#"{"channel":"futures.public_liquidates","event":"subscribe","error":{"code":2,"message":"unknown contract"}}"#, 0)
                .unwrap(),
            Decoded::SubscriptionError(_)
        ));
        assert_eq!(a.decode(r#"{"time":1,"channel":"futures.pong","event":"","result":null}"#, 0).unwrap(), Decoded::Ignore);
        assert_eq!(a.app_ping(1_700_000_000_999), Some(r#"{"channel":"futures.ping","time":1700000000}"#.to_string()));
    }

    #[test]
    fn test_subscription_payload() {
        let subs = GateIoAdapter::new().subscriptions();
        let v: serde_json::Value = serde_json::from_str(&subs[0]).unwrap();
        assert_eq!(v["channel"], CHANNEL);
        assert_eq!(v["payload"][0], "!all");
        assert_eq!(v["event"], "subscribe");
    }
}
