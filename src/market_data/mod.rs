// Market data module entrypoint
pub mod adapters;     // venue-specific liquidation decoders
pub mod connection;   // websocket lifecycle, keepalive, reconnect backoff
pub mod format;       // notification line rendering
pub mod instruments;  // REST metadata: OKX contract values, Bybit symbols
pub mod normaliser;   // lenient numeric parsing + symbol cleanup
pub mod router;       // supervises adapters, fans events out to dispatchers
pub mod types;        // Exchange, Side, NormalizedEvent
