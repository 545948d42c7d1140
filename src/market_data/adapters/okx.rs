// OKX public liquidation-orders channel for SWAP and FUTURES.
// Sizes are in contracts; USD notional goes through the instrument table.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::error;

use super::okx_types::{OkxLiquidation, OkxMessage};
use super::{DecodeError, Decoded, VenueAdapter};
use crate::market_data::instruments::{InstrumentSource, InstrumentTable};
use crate::market_data::types::{Exchange, NormalizedEvent, Side};

pub const OKX_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(30 * 60);
const CHANNEL: &str = "liquidation-orders";
// OKX drops connections that stay silent for 30s.
const APP_PING_INTERVAL: Duration = Duration::from_secs(25);

pub struct OkxAdapter {
    ws_url: String,
    instruments: InstrumentTable,
    source: Arc<dyn InstrumentSource>,
    refresh_every: Duration,
}

impl OkxAdapter {
    pub fn new(source: Arc<dyn InstrumentSource>, refresh_every: Duration) -> Self {
        Self::with_url(OKX_WS_URL, source, refresh_every)
    }

    pub fn with_url(ws_url: impl Into<String>, source: Arc<dyn InstrumentSource>, refresh_every: Duration) -> Self {
        Self {
            ws_url: ws_url.into(),
            instruments: InstrumentTable::new(),
            source,
            refresh_every,
        }
    }

    pub fn instruments(&self) -> &InstrumentTable {
        &self.instruments
    }

    async fn reload(&self) {
        reload_into(&self.instruments, self.source.as_ref()).await;
    }

    fn normalize_row(&self, row: &OkxLiquidation, now_ms: u64, out: &mut Vec<NormalizedEvent>) -> usize {
        let family = row
            .inst_family
            .as_deref()
            .filter(|f| !f.is_empty())
            .or(row.uly.as_deref().filter(|u| !u.is_empty()))
            .unwrap_or(&row.inst_id);
        let symbol = family.split('-').next().unwrap_or_default().to_ascii_uppercase();
        let meta = self.instruments.get(&row.inst_id);

        let mut skipped = 0;
        for d in &row.details {
            let price = d.bk_px.unwrap_or(0.0);
            let contracts = d.sz.unwrap_or(0.0);
            let notional = meta.as_ref().map(|m| m.notional_usd(contracts, price)).unwrap_or(0.0);
            let side = Side::from_order_side(d.side.eq_ignore_ascii_case("sell"));

            match NormalizedEvent::new(
                Exchange::Okx,
                symbol.clone(),
                side,
                price,
                contracts.abs(),
                notional,
                d.ts.unwrap_or(now_ms),
                now_ms,
            ) {
                Ok(event) => out.push(event),
                Err(_) => skipped += 1,
            }
        }
        skipped
    }
}

#[async_trait::async_trait]
impl VenueAdapter for OkxAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Okx
    }

    fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn subscriptions(&self) -> Vec<String> {
        [("liqSwap", "SWAP"), ("liqFutures", "FUTURES")]
            .iter()
            .map(|(id, inst_type)| {
                json!({
                    "id": id,
                    "op": "subscribe",
                    "args": [{ "channel": CHANNEL, "instType": inst_type }],
                })
                .to_string()
            })
            .collect()
    }

    fn decode(&self, text: &str, now_ms: u64) -> Result<Decoded, DecodeError> {
        if text.trim() == "pong" {
            return Ok(Decoded::Ignore);
        }
        let msg: OkxMessage = serde_json::from_str(text)?;

        match msg.event.as_deref() {
            Some("subscribe") => {
                let detail = msg
                    .arg
                    .map(|a| format!("{} {}", a.channel, a.inst_type))
                    .unwrap_or_default();
                return Ok(Decoded::SubscriptionAck(detail));
            }
            Some("error") => {
                return Ok(Decoded::SubscriptionError(format!(
                    "code={} msg={}",
                    msg.code.unwrap_or_default(),
                    msg.msg.unwrap_or_default()
                )));
            }
            Some(_) => return Ok(Decoded::Ignore),
            None => {}
        }

        let Some(rows) = msg.data else {
            return Ok(Decoded::Ignore);
        };
        if msg.arg.as_ref().is_some_and(|a| a.channel != CHANNEL) {
            return Ok(Decoded::Ignore);
        }

        let mut events = Vec::new();
        let mut skipped = 0;
        for row in &rows {
            skipped += self.normalize_row(row, now_ms, &mut events);
        }
        Ok(Decoded::liquidations(events, skipped))
    }

    fn app_ping_interval(&self) -> Option<Duration> {
        Some(APP_PING_INTERVAL)
    }

    fn app_ping(&self, _now_ms: u64) -> Option<String> {
        Some("ping".to_string())
    }

    async fn prepare(&self) {
        let stale = self.instruments.age().map_or(true, |age| age >= self.refresh_every);
        if stale || self.instruments.is_empty() {
            self.reload().await;
        }
    }

    fn metadata_refresh_interval(&self) -> Option<Duration> {
        Some(self.refresh_every)
    }

    fn metadata_refresh(&self) -> Option<BoxFuture<'static, ()>> {
        let table = self.instruments.clone();
        let source = self.source.clone();
        Some(Box::pin(async move { reload_into(&table, source.as_ref()).await }))
    }
}

async fn reload_into(table: &InstrumentTable, source: &dyn InstrumentSource) {
    if let Err(e) = table.refresh_from(source).await {
        error!(exchange = "okx", error = %e, "instrument load failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::instruments::{InstrumentError, InstrumentMeta};

    struct StaticInstruments(Vec<InstrumentMeta>);

    #[async_trait::async_trait]
    impl InstrumentSource for StaticInstruments {
        async fn fetch(&self) -> Result<Vec<InstrumentMeta>, InstrumentError> {
            Ok(self.0.clone())
        }
    }

    async fn adapter() -> OkxAdapter {
        let source = StaticInstruments(vec![
            InstrumentMeta { inst_id: "BTC-USDT-SWAP".into(), ct_val: 0.01, ct_val_ccy: "BTC".into() },
            InstrumentMeta { inst_id: "BTC-USD-SWAP".into(), ct_val: 100.0, ct_val_ccy: "USD".into() },
        ]);
        let adapter = OkxAdapter::new(Arc::new(source), DEFAULT_REFRESH);
        adapter.prepare().await;
        adapter
    }

    #[tokio::test]
    async fn test_prepare_loads_instruments() {
        let adapter = adapter().await;
        assert_eq!(adapter.instruments().len(), 2);
    }

    #[tokio::test]
    async fn test_linear_and_inverse_rows() {
        let adapter = adapter().await;
        let msg = r#"{"arg":{"channel":"liquidation-orders","instType":"SWAP"},"data":[
            {"instId":"BTC-USDT-SWAP","instFamily":"BTC-USDT","instType":"SWAP","uly":"BTC-USDT",
             "details":[{"bkLoss":"0","bkPx":"60000","ccy":"","posSide":"long","side":"sell","sz":"50","ts":"1723892524781"}]},
            {"instId":"BTC-USD-SWAP","instFamily":"BTC-USD","details":[{"bkPx":"60000","side":"buy","sz":"7","ts":"1723892524782"}]},
            {"instId":"DOGE-USDT-SWAP","instFamily":"DOGE-USDT","details":[{"bkPx":"0.1","side":"buy","sz":"7","ts":"1"}]}
        ]}"#;
        match adapter.decode(msg, 1_800_000_000_000).unwrap() {
            Decoded::Liquidations { events, skipped } => {
                assert_eq!(skipped, 1, "unknown instrument is dropped");
                assert_eq!(events.len(), 2);
                assert_eq!(events[0].symbol(), "BTC");
                assert_eq!(events[0].side(), Side::Long);
                assert_eq!(events[0].notional_usd(), 30_000.0);
                assert_eq!(events[0].quantity(), 50.0);
                assert_eq!(events[0].timestamp_ms(), 1_723_892_524_781);
                assert_eq!(events[1].side(), Side::Short);
                assert_eq!(events[1].notional_usd(), 700.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_events_and_pong() {
        let adapter = adapter().await;
        assert_eq!(adapter.decode("pong", 0).unwrap(), Decoded::Ignore);
        assert_eq!(
            adapter
                .decode(r#"{"event":"subscribe","arg":{"channel":"liquidation-orders","instType":"SWAP"},"connId":"a"}"#, 0)
                .unwrap(),
            Decoded::SubscriptionAck("liquidation-orders SWAP".into())
        );
        assert_eq!(
            adapter.decode(r#"{"event":"error","code":"60012","msg":"Invalid request"}"#, 0).unwrap(),
            Decoded::SubscriptionError("code=60012 msg=Invalid request".into())
        );
        assert!(adapter.decode("{", 0).is_err());
    }

    #[tokio::test]
    async fn test_detached_refresh_updates_shared_table() {
        let source = StaticInstruments(vec![InstrumentMeta {
            inst_id: "ETH-USDT-SWAP".into(),
            ct_val: 0.1,
            ct_val_ccy: "ETH".into(),
        }]);
        let adapter = OkxAdapter::new(Arc::new(source), DEFAULT_REFRESH);
        assert!(adapter.instruments().is_empty());

        let refresh = adapter.metadata_refresh().unwrap();
        tokio::spawn(refresh).await.unwrap();
        assert_eq!(adapter.instruments().len(), 1);
        assert!(adapter.instruments().get("ETH-USDT-SWAP").is_some());
    }

    #[test]
    fn test_subscriptions() {
        let adapter = OkxAdapter::new(Arc::new(StaticInstruments(vec![])), DEFAULT_REFRESH);
        let subs = adapter.subscriptions();
        assert_eq!(subs.len(), 2);
        let v: serde_json::Value = serde_json::from_str(&subs[1]).unwrap();
        assert_eq!(v["args"][0]["instType"], "FUTURES");
        assert_eq!(v["args"][0]["channel"], "liquidation-orders");
    }
}
