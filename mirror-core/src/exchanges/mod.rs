//! Exchange connectivity modules

pub mod errors;
pub mod messages;
pub mod rest;
pub mod signing;
pub mod types;
pub mod websocket;

pub use errors::{ErrorKind, ExchangeError, ExchangeResult};
pub use messages::{Command, InboundMessage, StatusNotice, SubscriptionAck, TableAction, TableMessage, WelcomeInfo};
pub use rest::{BinSize, BitmexRestClient, CandleSource, RestConfig};
pub use signing::{build_auth_headers, generate_expires, sign, Credentials};
pub use types::{tick_precision, to_nearest, Bar, ExecutionEvent, FieldValue, Instrument, Row, Side, Symbol, Ticker};
pub use websocket::{
    realtime_url, subscription_topics, BitmexWebSocket, ConnectionStatus, WebSocketConfig, MAINNET_ENDPOINT,
    TESTNET_ENDPOINT,
};
