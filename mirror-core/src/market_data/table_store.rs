//! Table store and the partial/insert/update/delete apply engine
//!
//! The store maps table name to a lock-guarded `Table`. Exactly one task (the
//! socket read loop) writes through `TableStore::apply`; snapshot readers take
//! the per-table read lock and clone what they need.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::snapshot::Snapshot;
use super::tables;
use crate::exchanges::{
    ExchangeError, ExchangeResult, ExecutionEvent, Row, Side, Symbol, TableAction, TableMessage,
};

/// Default row cap for trimmed tables
pub const MAX_TABLE_LEN: usize = 200;

/// Rows of one table plus the key fields that identify them
#[derive(Debug, Clone, Default)]
pub struct Table {
    keys: Option<Vec<String>>,
    rows: Vec<Row>,
    has_image: bool,
}

impl Table {
    /// Key fields, once a partial has announced them
    pub fn keys(&self) -> Option<&[String]> {
        self.keys.as_deref()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether a full image (partial) has been received
    pub fn has_image(&self) -> bool {
        self.has_image
    }

    /// Index of the row whose key fields equal those of `probe`. Nothing
    /// matches before a partial has announced the keys.
    fn find(&self, probe: &Row) -> ExchangeResult<Option<usize>> {
        let Some(keys) = self.keys.as_deref() else {
            return Ok(None);
        };
        check_keys(keys, std::slice::from_ref(probe))?;

        for (index, row) in self.rows.iter().enumerate() {
            if row.matches_keys(keys, probe)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Append `row`, dropping an existing row with the same key tuple first.
    /// Tables without key fields are append-only.
    fn push_unique(&mut self, row: Row) -> ExchangeResult<()> {
        let keyed = self.keys.as_ref().map_or(false, |keys| !keys.is_empty());
        if keyed {
            if let Some(index) = self.find(&row)? {
                self.rows.remove(index);
            }
        }
        self.rows.push(row);
        Ok(())
    }

    /// Keep only the newest `keep` rows, preserving their order
    fn retain_newest(&mut self, keep: usize) -> usize {
        let excess = self.rows.len().saturating_sub(keep);
        self.rows.drain(..excess);
        excess
    }
}

/// Every row must carry every key field
fn check_keys(keys: &[String], rows: &[Row]) -> ExchangeResult<()> {
    for row in rows {
        if let Some(missing) = keys.iter().find(|key| !row.contains(key)) {
            return Err(ExchangeError::Malformed(format!(
                "row is missing key field '{}'",
                missing
            )));
        }
    }
    Ok(())
}

/// Mapping from table name to table
#[derive(Debug, Default)]
pub struct DataStore {
    tables: DashMap<String, Arc<RwLock<Table>>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every table; used at the start of each connection
    pub fn clear(&self) {
        self.tables.clear();
    }

    pub fn table(&self, name: &str) -> Option<Arc<RwLock<Table>>> {
        self.tables.get(name).map(|entry| entry.value().clone())
    }

    fn table_or_create(&self, name: &str) -> Arc<RwLock<Table>> {
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Table::default())))
            .value()
            .clone()
    }

    /// Whether the table has been referenced by any message
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Whether the table has received its full image
    pub fn has_image(&self, name: &str) -> bool {
        self.table(name).map_or(false, |table| table.read().has_image())
    }

    /// Copy of the table's rows; empty when the table is unknown
    pub fn rows(&self, name: &str) -> Vec<Row> {
        self.table(name)
            .map(|table| table.read().rows().to_vec())
            .unwrap_or_default()
    }

    pub fn first_row(&self, name: &str) -> Option<Row> {
        self.table(name).and_then(|table| table.read().rows().first().cloned())
    }

    /// First row satisfying `predicate`, cloned out under the read lock
    pub fn find_row(&self, name: &str, predicate: impl Fn(&Row) -> bool) -> Option<Row> {
        let table = self.table(name)?;
        let guard = table.read();
        guard.rows().iter().find(|row| predicate(row)).cloned()
    }

    pub fn len(&self, name: &str) -> usize {
        self.table(name).map_or(0, |table| table.read().len())
    }

    pub fn keys(&self, name: &str) -> Option<Vec<String>> {
        self.table(name).and_then(|table| table.read().keys().map(<[String]>::to_vec))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Applies table messages to a `DataStore`
pub struct TableStore {
    store: Arc<DataStore>,
    snapshot: Snapshot,
    max_table_len: usize,
    executions: Option<mpsc::UnboundedSender<ExecutionEvent>>,
}

impl TableStore {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self {
            snapshot: Snapshot::new(store.clone()),
            store,
            max_table_len: MAX_TABLE_LEN,
            executions: None,
        }
    }

    pub fn with_max_table_len(mut self, max_table_len: usize) -> Self {
        self.max_table_len = max_table_len;
        self
    }

    /// Deliver observed executions on `sender`
    pub fn with_executions(mut self, sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        self.executions = Some(sender);
        self
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    /// Apply one table message
    pub fn apply(&self, message: TableMessage) -> ExchangeResult<()> {
        let TableMessage { table: name, action, data, keys } = message;
        let table = self.store.table_or_create(&name);
        let action: TableAction = action.parse()?;

        match action {
            TableAction::Partial => {
                debug!("{}: partial", name);
                let keys = keys.unwrap_or_default();
                check_keys(&keys, &data)?;
                let mut table = table.write();
                table.keys = Some(keys);
                table.has_image = true;
                for row in data {
                    table.push_unique(row)?;
                }
            }
            TableAction::Insert => {
                debug!("{}: inserting {} rows", name, data.len());
                let mut table = table.write();
                if let Some(keys) = table.keys() {
                    check_keys(keys, &data)?;
                }
                for row in data {
                    table.push_unique(row)?;
                }
                if !tables::is_untrimmed(&name) && table.len() > self.max_table_len {
                    let dropped = table.retain_newest(self.max_table_len / 2);
                    debug!("{}: trimmed {} oldest rows", name, dropped);
                }
            }
            TableAction::Update => {
                debug!("{}: updating {} rows", name, data.len());
                self.apply_update(&name, &table, data)?;
            }
            TableAction::Delete => {
                debug!("{}: deleting {} rows", name, data.len());
                let mut table = table.write();
                if let Some(keys) = table.keys() {
                    check_keys(keys, &data)?;
                }
                for probe in data {
                    match table.find(&probe)? {
                        Some(index) => {
                            table.rows.remove(index);
                        }
                        None => return Err(ExchangeError::DeleteMiss { table: name }),
                    }
                }
            }
        }

        Ok(())
    }

    fn apply_update(&self, name: &str, table: &RwLock<Table>, data: Vec<Row>) -> ExchangeResult<()> {
        let is_order_table = name == tables::ORDER;
        let mut table = table.write();
        if let Some(keys) = table.keys() {
            check_keys(keys, &data)?;
        }

        for update in data {
            // Updates may race ahead of the partial; nothing to do then
            let Some(index) = table.find(&update)? else {
                continue;
            };

            if is_order_table {
                if let Some(event) = self.observe_execution(&table.rows[index], &update) {
                    self.emit(event);
                }
            }

            let row = &mut table.rows[index];
            row.merge(update);

            if is_order_table && row.get_f64("leavesQty").map_or(false, |leaves| leaves <= 0.0) {
                table.rows.remove(index);
            }
        }

        Ok(())
    }

    /// Fill implied by an order update, computed against the pre-merge row
    fn observe_execution(&self, order: &Row, update: &Row) -> Option<ExecutionEvent> {
        let canceled = update.get_str("ordStatus") == Some("Canceled");
        let new_cum_qty = update.get_f64("cumQty")?;
        if canceled {
            return None;
        }

        let filled = new_cum_qty - order.get_f64("cumQty").unwrap_or(0.0);
        if filled <= 0.0 {
            return None;
        }

        let side = match order.get_str("side").map(str::parse::<Side>) {
            Some(Ok(side)) => side,
            _ => {
                warn!("Execution of {} contracts on an order without a side", filled);
                return None;
            }
        };
        let symbol = Symbol::new(order.get_str("symbol").unwrap_or_default());
        let price = order
            .get_f64("price")
            .or_else(|| update.get_f64("avgPx"))
            .unwrap_or_default();

        let (price, tick_log) = match self.snapshot.instrument(&symbol) {
            Ok(instrument) => (instrument.to_nearest(price), Some(instrument.tick_log)),
            Err(e) => {
                warn!("Execution on {} without instrument data: {}", symbol, e);
                (price, None)
            }
        };

        Some(ExecutionEvent { side, quantity: filled, symbol, price, tick_log })
    }

    fn emit(&self, event: ExecutionEvent) {
        info!("Execution: {}", event);
        if let Some(sender) = &self.executions {
            // The caller may not be listening
            let _ = sender.send(event);
        }
    }
}
