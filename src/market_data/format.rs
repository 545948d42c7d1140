// Rendering of the single-line liquidation notification.

use crate::market_data::types::{Exchange, NormalizedEvent, Side};

/// Decimal places used when abbreviating a notional in each magnitude band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotionalPrecision {
    pub billions: usize,
    pub millions: usize,
    pub thousands: usize,
    pub units: usize,
}

impl NotionalPrecision {
    pub const fn for_exchange(exchange: Exchange) -> Self {
        match exchange {
            Exchange::Binance | Exchange::Bybit => Self { billions: 1, millions: 1, thousands: 0, units: 0 },
            Exchange::Okx | Exchange::GateIo => Self { billions: 1, millions: 1, thousands: 0, units: 2 },
            Exchange::Hyperliquid => Self { billions: 2, millions: 2, thousands: 1, units: 2 },
        }
    }
}

/// 1_234_567.0 -> "1.2M" (precision depends on the band).
pub fn fmt_notional(value: f64, precision: NotionalPrecision) -> String {
    let v = if value.is_finite() { value } else { 0.0 };
    if v >= 1e9 {
        format!("{:.*}B", precision.billions, v / 1e9)
    } else if v >= 1e6 {
        format!("{:.*}M", precision.millions, v / 1e6)
    } else if v >= 1e3 {
        format!("{:.*}K", precision.thousands, v / 1e3)
    } else {
        format!("{:.*}", precision.units, v)
    }
}

pub fn direction_marker(side: Side) -> &'static str {
    match side {
        Side::Long => "🔴",
        Side::Short => "🟢",
    }
}

/// `<marker> <tag> #<symbol> Liquidated <side>: $<notional> at $<price>`
pub fn liquidation_line(event: &NormalizedEvent) -> String {
    let exchange = event.exchange();
    format!(
        "{} {} #{} Liquidated {}: ${} at ${:.2}",
        direction_marker(event.side()),
        exchange.tag(),
        event.symbol().trim_start_matches('#'),
        event.side(),
        fmt_notional(event.notional_usd(), NotionalPrecision::for_exchange(exchange)),
        event.price(),
    )
}
