//! REST lookups for instrument metadata.
//!
//! OKX reports liquidation sizes in contracts, so converting them to USD needs
//! each instrument's contract value. Bybit needs its symbol list up front to
//! build per-symbol topics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::market_data::normaliser::num;

pub const OKX_REST_URL: &str = "https://www.okx.com";
pub const BYBIT_REST_URL: &str = "https://api.bybit.com";

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{venue} returned code {code}: {msg}")]
    Api { venue: &'static str, code: String, msg: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentMeta {
    pub inst_id: String,
    pub ct_val: f64,
    pub ct_val_ccy: String,
}

impl InstrumentMeta {
    /// USD value of `contracts` contracts at `price`.
    /// Contracts denominated in a USD-pegged currency are already USD.
    pub fn notional_usd(&self, contracts: f64, price: f64) -> f64 {
        let base = contracts.abs() * self.ct_val;
        if is_usd_like(&self.ct_val_ccy) {
            base
        } else {
            base * price
        }
    }
}

fn is_usd_like(ccy: &str) -> bool {
    matches!(ccy.to_ascii_uppercase().as_str(), "USD" | "USDT" | "USDC")
}

#[async_trait::async_trait]
pub trait InstrumentSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<InstrumentMeta>, InstrumentError>;
}

/// `inst_id -> meta`, shared between an adapter's decode path and its refresh timer.
#[derive(Clone, Default)]
pub struct InstrumentTable {
    inner: Arc<RwLock<TableState>>,
}

#[derive(Default)]
struct TableState {
    by_id: HashMap<String, InstrumentMeta>,
    loaded_at: Option<Instant>,
}

impl InstrumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, inst_id: &str) -> Option<InstrumentMeta> {
        self.inner.read().by_id.get(inst_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn age(&self) -> Option<std::time::Duration> {
        self.inner.read().loaded_at.map(|t| t.elapsed())
    }

    pub fn replace(&self, items: Vec<InstrumentMeta>) {
        let by_id: HashMap<_, _> = items.into_iter().map(|m| (m.inst_id.clone(), m)).collect();
        let mut state = self.inner.write();
        state.by_id = by_id;
        state.loaded_at = Some(Instant::now());
    }

    /// Reload from `source`; on failure (or an empty answer) the old table stays.
    pub async fn refresh_from(&self, source: &dyn InstrumentSource) -> Result<usize, InstrumentError> {
        let items = source.fetch().await?;
        if items.is_empty() {
            warn!("instrument source returned nothing, keeping {} cached entries", self.len());
            return Ok(self.len());
        }
        self.replace(items);
        let len = self.len();
        info!(instruments = len, "instrument map loaded");
        Ok(len)
    }
}

#[derive(Debug, Deserialize)]
struct OkxResponse<T> {
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxInstrument {
    inst_id: String,
    #[serde(default)]
    ct_val: String,
    #[serde(default)]
    ct_val_ccy: String,
}

pub struct OkxInstrumentClient {
    client: reqwest::Client,
    base_url: String,
}

impl OkxInstrumentClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }

    async fn fetch_type(&self, inst_type: &str) -> Result<Vec<InstrumentMeta>, InstrumentError> {
        let url = format!("{}/api/v5/public/instruments", self.base_url.trim_end_matches('/'));
        let resp: OkxResponse<OkxInstrument> = self
            .client
            .get(&url)
            .query(&[("instType", inst_type)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !resp.code.is_empty() && resp.code != "0" {
            return Err(InstrumentError::Api { venue: "okx", code: resp.code, msg: resp.msg });
        }

        Ok(resp
            .data
            .into_iter()
            .map(|it| InstrumentMeta {
                inst_id: it.inst_id,
                ct_val: num(&it.ct_val),
                ct_val_ccy: it.ct_val_ccy,
            })
            .filter(|m| m.ct_val > 0.0)
            .collect())
    }
}

#[async_trait::async_trait]
impl InstrumentSource for OkxInstrumentClient {
    /// SWAP and FUTURES are fetched independently; one failing still yields the other.
    async fn fetch(&self) -> Result<Vec<InstrumentMeta>, InstrumentError> {
        let (swap, futures) = tokio::join!(self.fetch_type("SWAP"), self.fetch_type("FUTURES"));
        match (swap, futures) {
            (Err(e), Err(_)) => Err(e),
            (swap, futures) => {
                let mut out = Vec::new();
                for (kind, res) in [("SWAP", swap), ("FUTURES", futures)] {
                    match res {
                        Ok(items) => out.extend(items),
                        Err(e) => warn!(inst_type = kind, error = %e, "okx instrument fetch failed"),
                    }
                }
                Ok(out)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitResponse {
    #[serde(default)]
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<BybitInstrumentPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitInstrumentPage {
    #[serde(default)]
    list: Vec<BybitInstrument>,
    #[serde(default)]
    next_page_cursor: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitInstrument {
    symbol: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    quote_coin: String,
}

/// All trading linear symbols quoted in `quote`, deduplicated and sorted.
pub async fn fetch_bybit_symbols(
    client: &reqwest::Client,
    base_url: &str,
    quote: &str,
) -> Result<Vec<String>, InstrumentError> {
    let url = format!("{}/v5/market/instruments-info", base_url.trim_end_matches('/'));
    let mut symbols = Vec::new();
    let mut cursor = String::new();

    loop {
        let mut query = vec![("category", "linear"), ("limit", "1000")];
        if !cursor.is_empty() {
            query.push(("cursor", cursor.as_str()));
        }
        let resp: BybitResponse = client
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if resp.ret_code != 0 {
            return Err(InstrumentError::Api {
                venue: "bybit",
                code: resp.ret_code.to_string(),
                msg: resp.ret_msg,
            });
        }
        let Some(page) = resp.result else { break };
        symbols.extend(select_bybit_symbols(&page.list, quote));
        debug!(page = page.list.len(), total = symbols.len(), "bybit instruments page");

        if page.next_page_cursor.is_empty() {
            break;
        }
        cursor = page.next_page_cursor;
    }

    symbols.sort();
    symbols.dedup();
    Ok(symbols)
}

fn select_bybit_symbols(list: &[BybitInstrument], quote: &str) -> Vec<String> {
    list.iter()
        .filter(|it| it.status == "Trading" && it.quote_coin.eq_ignore_ascii_case(quote))
        .map(|it| it.symbol.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn meta(id: &str, ct_val: f64, ccy: &str) -> InstrumentMeta {
        InstrumentMeta { inst_id: id.into(), ct_val, ct_val_ccy: ccy.into() }
    }

    #[test]
    fn test_contract_value_notional() {
        // Linear swap: 0.01 BTC per contract.
        assert_eq!(meta("BTC-USDT-SWAP", 0.01, "BTC").notional_usd(50.0, 60_000.0), 30_000.0);
        // Inverse swap: 100 USD per contract.
        assert_eq!(meta("BTC-USD-SWAP", 100.0, "USD").notional_usd(7.0, 60_000.0), 700.0);
        assert_eq!(meta("X-USDT-SWAP", 10.0, "usdt").notional_usd(-3.0, 1.0), 30.0);
    }

    struct FixedSource {
        calls: AtomicUsize,
        items: Vec<InstrumentMeta>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl InstrumentSource for FixedSource {
        async fn fetch(&self) -> Result<Vec<InstrumentMeta>, InstrumentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(InstrumentError::Api { venue: "okx", code: "50011".into(), msg: "rate limited".into() })
            } else {
                Ok(self.items.clone())
            }
        }
    }

    #[tokio::test]
    async fn test_table_keeps_previous_entries_on_failure() {
        let table = InstrumentTable::new();
        assert!(table.is_empty());
        assert!(table.age().is_none());

        let ok = FixedSource { calls: AtomicUsize::new(0), items: vec![meta("BTC-USDT-SWAP", 0.01, "BTC")], fail: false };
        assert_eq!(table.refresh_from(&ok).await.unwrap(), 1);
        assert!(table.age().is_some());

        let failing = FixedSource { calls: AtomicUsize::new(0), items: vec![], fail: true };
        assert!(table.refresh_from(&failing).await.is_err());
        assert_eq!(table.get("BTC-USDT-SWAP"), Some(meta("BTC-USDT-SWAP", 0.01, "BTC")));

        let empty = FixedSource { calls: AtomicUsize::new(0), items: vec![], fail: false };
        assert_eq!(table.refresh_from(&empty).await.unwrap(), 1);
        assert_eq!(empty.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bybit_symbol_selection() {
        let page: BybitInstrumentPage = serde_json::from_str(
            r#"{"list":[
                {"symbol":"BTCUSDT","status":"Trading","quoteCoin":"USDT"},
                {"symbol":"BTCPERP","status":"Trading","quoteCoin":"USDC"},
                {"symbol":"OLDUSDT","status":"Closed","quoteCoin":"USDT"}
            ],"nextPageCursor":""}"#,
        )
        .unwrap();
        assert_eq!(select_bybit_symbols(&page.list, "USDT"), vec!["BTCUSDT".to_string()]);
    }

    #[test]
    fn test_okx_instrument_parsing() {
        let resp: OkxResponse<OkxInstrument> = serde_json::from_str(
            r#"{"code":"0","msg":"","data":[{"instId":"BTC-USDT-SWAP","ctVal":"0.01","ctValCcy":"BTC","instFamily":"BTC-USDT"}]}"#,
        )
        .unwrap();
        assert_eq!(resp.data[0].inst_id, "BTC-USDT-SWAP");
        assert_eq!(num(&resp.data[0].ct_val), 0.01);
    }
}
