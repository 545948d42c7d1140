// Binance USD-M futures: all-market force order stream.
// The stream is selected by URL, so there is nothing to subscribe to.

use serde::Deserialize;

use super::{DecodeError, Decoded, VenueAdapter};
use crate::market_data::normaliser::{de_opt_ms, de_opt_num, strip_quote};
use crate::market_data::types::{Exchange, NormalizedEvent, Side};

pub const BINANCE_WS_URL: &str = "wss://fstream.binance.com/ws/!forceOrder@arr";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BinanceMessage {
    Events(Vec<ForceOrderEvent>),
    Event(ForceOrderEvent),
    Reply {
        #[allow(dead_code)]
        id: serde_json::Value,
        result: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct ForceOrderEvent {
    #[serde(rename = "E", default, deserialize_with = "de_opt_ms")]
    event_time: Option<u64>,
    #[serde(rename = "o")]
    order: ForceOrder,
}

#[derive(Debug, Deserialize)]
struct ForceOrder {
    #[serde(rename = "s", default)]
    symbol: String,
    #[serde(rename = "S", default)]
    side: String,
    #[serde(rename = "q", default, deserialize_with = "de_opt_num")]
    orig_qty: Option<f64>,
    #[serde(rename = "p", default, deserialize_with = "de_opt_num")]
    price: Option<f64>,
    #[serde(rename = "ap", default, deserialize_with = "de_opt_num")]
    avg_price: Option<f64>,
    #[serde(rename = "l", default, deserialize_with = "de_opt_num")]
    last_filled_qty: Option<f64>,
    #[serde(rename = "z", default, deserialize_with = "de_opt_num")]
    filled_qty: Option<f64>,
    #[serde(rename = "T", default, deserialize_with = "de_opt_ms")]
    trade_time: Option<u64>,
}

pub struct BinanceAdapter {
    ws_url: String,
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceAdapter {
    pub fn new() -> Self {
        Self { ws_url: BINANCE_WS_URL.to_string() }
    }

    pub fn with_url(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }

    fn normalize(&self, event: &ForceOrderEvent, now_ms: u64) -> Option<NormalizedEvent> {
        let o = &event.order;
        // Filled quantity first, then original, then last fill.
        let qty = o.filled_qty.or(o.orig_qty).or(o.last_filled_qty).unwrap_or(0.0);
        let price = o.avg_price.filter(|p| *p > 0.0).or(o.price).unwrap_or(0.0);
        let side = Side::from_order_side(o.side.eq_ignore_ascii_case("SELL"));
        let ts = o.trade_time.or(event.event_time).unwrap_or(now_ms);

        NormalizedEvent::new(
            Exchange::Binance,
            strip_quote(&o.symbol, &["USDT", "USDC"]),
            side,
            price,
            qty,
            qty * price,
            ts,
            now_ms,
        )
        .ok()
    }
}

#[async_trait::async_trait]
impl VenueAdapter for BinanceAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    fn decode(&self, text: &str, now_ms: u64) -> Result<Decoded, DecodeError> {
        let events = match serde_json::from_str::<BinanceMessage>(text)? {
            BinanceMessage::Reply { result, .. } => {
                return Ok(Decoded::SubscriptionAck(result.to_string()));
            }
            BinanceMessage::Event(event) => vec![event],
            BinanceMessage::Events(events) => events,
        };

        let total = events.len();
        let normalized: Vec<_> = events.iter().filter_map(|e| self.normalize(e, now_ms)).collect();
        let skipped = total - normalized.len();
        Ok(Decoded::liquidations(normalized, skipped))
    }
}
