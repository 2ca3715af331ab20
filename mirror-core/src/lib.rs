//! BitMEX Realtime Mirror Library
//!
//! Keeps an in-memory copy of the exchange's realtime tables, kept current by
//! one WebSocket read loop and queried concurrently through snapshot accessors.
//! Also carries the REST bar fetch and the ESCGO decision logic used by the
//! trader binary.

pub mod exchanges;
pub mod market_data;
pub mod strategy;

// Re-export main types for easy access
pub use exchanges::{
    BinSize, BitmexRestClient, BitmexWebSocket, CandleSource, ConnectionStatus, Credentials, ExchangeError,
    ExchangeResult, ExecutionEvent, RestConfig, Row, Side, Symbol, Ticker, WebSocketConfig,
};
pub use market_data::{DataStore, ReadinessGate, Snapshot};
pub use strategy::{decide, escgo, Decision, PositionToggle};
