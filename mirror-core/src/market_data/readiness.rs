//! Readiness gate: waits for the initial table images

use std::sync::Arc;
use std::time::Duration;

use super::table_store::DataStore;
use super::tables;

/// Tables that must hold an image before market data is usable
pub const MARKET_TABLES: [&str; 3] = [tables::INSTRUMENT, tables::TRADE, tables::QUOTE];

/// Tables that must hold an image before account data is usable
pub const ACCOUNT_TABLES: [&str; 4] = [
    tables::MARGIN,
    tables::POSITION,
    tables::ORDER,
    tables::ORDER_BOOK_10,
];

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Observes the store; never times out on its own
#[derive(Clone, Debug)]
pub struct ReadinessGate {
    store: Arc<DataStore>,
    poll_interval: Duration,
}

impl ReadinessGate {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn market_data_ready(&self) -> bool {
        self.all_ready(&MARKET_TABLES)
    }

    pub fn account_data_ready(&self) -> bool {
        self.all_ready(&ACCOUNT_TABLES)
    }

    pub async fn wait_for_market_data(&self) {
        self.wait_for(&MARKET_TABLES).await
    }

    pub async fn wait_for_account_data(&self) {
        self.wait_for(&ACCOUNT_TABLES).await
    }

    async fn wait_for(&self, names: &[&str]) {
        while !self.all_ready(names) {
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn all_ready(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.store.has_image(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::TableMessage;
    use crate::market_data::TableStore;
    use tokio::time::timeout;

    fn partial(table: &str) -> TableMessage {
        TableMessage {
            table: table.to_string(),
            action: "partial".to_string(),
            data: Vec::new(),
            keys: Some(Vec::new()),
        }
    }

    fn insert(table: &str) -> TableMessage {
        TableMessage {
            table: table.to_string(),
            action: "insert".to_string(),
            data: Vec::new(),
            keys: None,
        }
    }

    fn setup() -> (TableStore, ReadinessGate) {
        let store = Arc::new(DataStore::new());
        let gate = ReadinessGate::new(store.clone()).with_poll_interval(Duration::from_millis(5));
        (TableStore::new(store), gate)
    }

    #[tokio::test]
    async fn test_market_data_waits_for_all_partials() {
        let (engine, gate) = setup();
        engine.apply(partial("instrument")).unwrap();
        engine.apply(partial("trade")).unwrap();
        // An insert alone does not count as an image
        engine.apply(insert("quote")).unwrap();

        assert!(!gate.market_data_ready());
        assert!(timeout(Duration::from_millis(50), gate.wait_for_market_data()).await.is_err());

        engine.apply(partial("quote")).unwrap();
        assert!(timeout(Duration::from_millis(50), gate.wait_for_market_data()).await.is_ok());
    }

    #[tokio::test]
    async fn test_account_data_released_by_concurrent_writer() {
        let (engine, gate) = setup();
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait_for_account_data().await }
        });

        for table in ["margin", "position", "order"] {
            engine.apply(partial(table)).unwrap();
            tokio::time::sleep(Duration::from_millis(15)).await;
            assert!(!waiter.is_finished());
        }

        engine.apply(partial("orderBook10")).unwrap();
        timeout(Duration::from_millis(200), waiter).await.unwrap().unwrap();
        assert!(gate.account_data_ready());
        assert!(!gate.market_data_ready());
    }
}
