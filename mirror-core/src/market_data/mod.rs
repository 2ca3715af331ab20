//! Realtime table mirror: store, apply engine, snapshots and readiness

pub mod table_store;
pub mod handler;
pub mod snapshot;
pub mod readiness;

pub use table_store::{DataStore, Table, TableStore, MAX_TABLE_LEN};
pub use handler::{HandlerStats, HandlerStatsSnapshot, MessageHandler};
pub use snapshot::Snapshot;
pub use readiness::{ReadinessGate, ACCOUNT_TABLES, MARKET_TABLES};

/// Table names used by the realtime feed
pub mod tables {
    pub const INSTRUMENT: &str = "instrument";
    pub const TRADE: &str = "trade";
    pub const QUOTE: &str = "quote";
    pub const ORDER: &str = "order";
    pub const EXECUTION: &str = "execution";
    pub const ORDER_BOOK_10: &str = "orderBook10";
    pub const ORDER_BOOK_L2: &str = "orderBookL2";
    pub const MARGIN: &str = "margin";
    pub const POSITION: &str = "position";

    /// Tables exempt from the insert trim: open orders and the full book
    pub const UNTRIMMED: [&str; 2] = [ORDER, ORDER_BOOK_L2];

    pub fn is_untrimmed(table: &str) -> bool {
        UNTRIMMED.contains(&table)
    }
}
