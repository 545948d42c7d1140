use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Venues we hold a liquidation stream for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Bybit,
    Okx,
    #[serde(alias = "gate", alias = "gate.io")]
    GateIo,
    Hyperliquid,
}

impl Exchange {
    pub const ALL: [Exchange; 5] = [
        Exchange::Binance,
        Exchange::Bybit,
        Exchange::Okx,
        Exchange::GateIo,
        Exchange::Hyperliquid,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Exchange::Binance => "binance",
            Exchange::Bybit => "bybit",
            Exchange::Okx => "okx",
            Exchange::GateIo => "gateio",
            Exchange::Hyperliquid => "hyperliquid",
        }
    }

    /// Tag printed in the rendered notification line.
    pub fn tag(&self) -> &'static str {
        match self {
            Exchange::Binance => "Binance",
            Exchange::Bybit => "Bybit",
            Exchange::Okx => "OKX",
            Exchange::GateIo => "GATE",
            Exchange::Hyperliquid => "Hyperliquid",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown exchange: {0}")]
pub struct UnknownExchange(pub String);

impl FromStr for Exchange {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Exchange::Binance),
            "bybit" => Ok(Exchange::Bybit),
            "okx" => Ok(Exchange::Okx),
            "gate" | "gateio" | "gate.io" => Ok(Exchange::GateIo),
            "hyperliquid" | "hl" => Ok(Exchange::Hyperliquid),
            other => Err(UnknownExchange(other.to_string())),
        }
    }
}

/// Direction of the position that got force-closed.
/// A sell-side liquidation closes a long, a buy-side one closes a short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Map the side of the liquidation *order* onto the closed position.
    pub fn from_order_side(is_sell: bool) -> Self {
        if is_sell {
            Side::Long
        } else {
            Side::Short
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("Long"),
            Side::Short => f.write_str("Short"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("{field} must be finite and positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("empty symbol")]
    EmptySymbol,
}

/// Canonical liquidation event every adapter produces.
/// Fields are private so an instance can only exist with valid numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    exchange: Exchange,
    symbol: String,
    side: Side,
    price: f64,
    quantity: f64,
    notional_usd: f64,
    timestamp_ms: u64,
}

fn positive(field: &'static str, value: f64) -> Result<f64, NormalizeError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(NormalizeError::NotPositive { field, value })
    }
}

impl NormalizedEvent {
    #[allow(clippy::too_many_arguments)]
    /// `timestamp_ms` is clamped to `now_ms`; a missing exchange time should be passed as `now_ms`.
    pub fn new(
        exchange: Exchange,
        symbol: impl Into<String>,
        side: Side,
        price: f64,
        quantity: f64,
        notional_usd: f64,
        timestamp_ms: u64,
        now_ms: u64,
    ) -> Result<Self, NormalizeError> {
        let symbol = symbol.into();
        if symbol.is_empty() {
            return Err(NormalizeError::EmptySymbol);
        }
        Ok(Self {
            exchange,
            symbol,
            side,
            price: positive("price", price)?,
            quantity: positive("quantity", quantity)?,
            notional_usd: positive("notional_usd", notional_usd)?,
            timestamp_ms: timestamp_ms.min(now_ms),
        })
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn notional_usd(&self) -> f64 {
        self.notional_usd
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive_fields() {
        let err = NormalizedEvent::new(Exchange::Bybit, "BTC", Side::Long, 0.0, 1.0, 1.0, 1, 1);
        assert_eq!(err, Err(NormalizeError::NotPositive { field: "price", value: 0.0 }));

        let err = NormalizedEvent::new(Exchange::Bybit, "BTC", Side::Long, 1.0, 1.0, f64::NAN, 1, 1);
        assert!(matches!(err, Err(NormalizeError::NotPositive { field: "notional_usd", .. })));

        let err = NormalizedEvent::new(Exchange::Bybit, "", Side::Long, 1.0, 1.0, 1.0, 1, 1);
        assert_eq!(err, Err(NormalizeError::EmptySymbol));
    }

    #[test]
    fn test_timestamp_capped_at_now() {
        let ev = NormalizedEvent::new(Exchange::Okx, "ETH", Side::Short, 2.0, 3.0, 6.0, 5_000, 4_000)
            .unwrap();
        assert_eq!(ev.timestamp_ms(), 4_000);
    }

    #[test]
    fn test_exchange_from_str() {
        assert_eq!("Gate".parse::<Exchange>(), Ok(Exchange::GateIo));
        assert_eq!("OKX".parse::<Exchange>(), Ok(Exchange::Okx));
        assert!("kraken".parse::<Exchange>().is_err());
    }

    #[test]
    fn test_side_from_order_side() {
        assert_eq!(Side::from_order_side(true), Side::Long);
        assert_eq!(Side::from_order_side(false), Side::Short);
    }
}
