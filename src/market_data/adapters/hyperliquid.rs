// Hyperliquid adapter: liquidation fills for one user address.
// Hyperliquid has no public all-market liquidation feed, so this watches
// `userFills` (fills carrying a `liquidation` block) and logs `userEvents`
// liquidations for the configured account.

use std::time::Duration;

use serde_json::json;

use super::hyperliquid_types::{WsFill, WsMessage, WsUserEvent, WsUserFills};
use super::{DecodeError, Decoded, VenueAdapter};
use crate::market_data::types::{Exchange, NormalizedEvent, Side};

pub const HYPERLIQUID_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
const APP_PING_INTERVAL: Duration = Duration::from_secs(20);

pub struct HyperliquidAdapter {
    pub user: String,   // 0x... address whose fills we watch
    pub ws_url: String, // "wss://api.hyperliquid.xyz/ws"
    /// Replayed history arrives flagged `isSnapshot`; skip it so reconnects don't re-post.
    pub skip_snapshots: bool,
}

impl HyperliquidAdapter {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            ws_url: HYPERLIQUID_WS_URL.into(),
            skip_snapshots: true,
        }
    }

    pub fn with_url(mut self, ws_url: &str) -> Self {
        self.ws_url = ws_url.to_string();
        self
    }

    fn normalize_fill(fill: &WsFill, now_ms: u64) -> Option<NormalizedEvent> {
        // Only fills that are part of a liquidation count.
        fill.liquidation.as_ref()?;
        let px = fill.px.unwrap_or(0.0);
        let sz = fill.sz.unwrap_or(0.0).abs();
        // "A" is the ask side: a sell that closed a long.
        let side = Side::from_order_side(fill.side.eq_ignore_ascii_case("A"));
        NormalizedEvent::new(
            Exchange::Hyperliquid,
            fill.coin.as_str(),
            side,
            px,
            sz,
            px * sz,
            fill.time.unwrap_or(now_ms),
            now_ms,
        )
        .ok()
    }

    fn user_fills(&self, data: serde_json::Value, now_ms: u64) -> Result<Decoded, DecodeError> {
        let fills: WsUserFills = serde_json::from_value(data)?;
        if fills.is_snapshot && self.skip_snapshots {
            return Ok(Decoded::Ignore);
        }

        let liquidation_fills: Vec<&WsFill> = fills.fills.iter().filter(|f| f.liquidation.is_some()).collect();
        let events: Vec<_> = liquidation_fills
            .iter()
            .filter_map(|f| Self::normalize_fill(f, now_ms))
            .collect();
        let skipped = liquidation_fills.len() - events.len();
        Ok(Decoded::liquidations(events, skipped))
    }

    fn user_event(&self, data: serde_json::Value) -> Result<Decoded, DecodeError> {
        let event: WsUserEvent = serde_json::from_value(data)?;
        Ok(match event.liquidation {
            Some(liq) => Decoded::Notice(format!(
                "liquidation lid={} liquidated_user={} ntl_pos={} account_value={} liquidator={}",
                liq.lid, liq.liquidated_user, liq.liquidated_ntl_pos, liq.liquidated_account_value, liq.liquidator
            )),
            None => Decoded::Ignore,
        })
    }
}

#[async_trait::async_trait]
impl VenueAdapter for HyperliquidAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Hyperliquid
    }

    fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn subscriptions(&self) -> Vec<String> {
        vec![
            json!({
                "method": "subscribe",
                "subscription": { "type": "userFills", "user": self.user, "aggregateByTime": false }
            })
            .to_string(),
            json!({
                "method": "subscribe",
                "subscription": { "type": "userEvents", "user": self.user }
            })
            .to_string(),
        ]
    }

    fn decode(&self, text: &str, now_ms: u64) -> Result<Decoded, DecodeError> {
        let msg: WsMessage = serde_json::from_str(text)?;
        match msg.channel.as_str() {
            "subscriptionResponse" => Ok(Decoded::SubscriptionAck(msg.data["subscription"]["type"]
                .as_str()
                .unwrap_or_default()
                .to_string())),
            "error" => Ok(Decoded::SubscriptionError(msg.data.to_string())),
            "userFills" => self.user_fills(msg.data, now_ms),
            "user" | "userEvents" => self.user_event(msg.data),
            _ => Ok(Decoded::Ignore),
        }
    }

    fn app_ping_interval(&self) -> Option<Duration> {
        Some(APP_PING_INTERVAL)
    }

    fn app_ping(&self, _now_ms: u64) -> Option<String> {
        Some(json!({ "method": "ping" }).to_string())
    }
}
