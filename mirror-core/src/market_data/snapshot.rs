//! Read-only views over the mirrored tables

use std::sync::Arc;

use super::table_store::DataStore;
use super::tables;
use crate::exchanges::{ExchangeError, ExchangeResult, Instrument, Row, Symbol, Ticker};

/// Cheap, cloneable handle for querying the mirror. Never mutates the store.
#[derive(Clone, Debug)]
pub struct Snapshot {
    store: Arc<DataStore>,
}

impl Snapshot {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }

    /// Instrument row for `symbol`, with its tick precision
    pub fn instrument(&self, symbol: &Symbol) -> ExchangeResult<Instrument> {
        let row = self
            .store
            .find_row(tables::INSTRUMENT, |row| row.get_str("symbol") == Some(symbol.as_str()))
            .ok_or_else(|| ExchangeError::NotFound {
                what: format!("instrument or index with symbol {}", symbol),
            })?;
        Instrument::from_row(row)
    }

    /// Last/buy/sell/mid rounded to the instrument's tick size
    pub fn ticker(&self, symbol: &Symbol) -> ExchangeResult<Ticker> {
        let instrument = self.instrument(symbol)?;

        let ticker = if instrument.symbol.is_index() {
            let mark = instrument.mark_price().unwrap_or_default();
            Ticker { last: mark, buy: mark, sell: mark, mid: mark }
        } else {
            let last = instrument.last_price();
            // A zero quote means no quote
            let buy = instrument.bid_price().filter(|p| *p != 0.0).or(last).unwrap_or_default();
            let sell = instrument.ask_price().filter(|p| *p != 0.0).or(last).unwrap_or_default();
            Ticker {
                last: last.unwrap_or_default(),
                buy,
                sell,
                mid: (buy + sell) / 2.0,
            }
        };

        Ok(Ticker {
            last: instrument.to_nearest(ticker.last),
            buy: instrument.to_nearest(ticker.buy),
            sell: instrument.to_nearest(ticker.sell),
            mid: instrument.to_nearest(ticker.mid),
        })
    }

    /// First margin row
    pub fn margin(&self) -> ExchangeResult<Row> {
        self.first(tables::MARGIN)
    }

    /// First row of the 10-level book
    pub fn order_book(&self) -> ExchangeResult<Row> {
        self.first(tables::ORDER_BOOK_10)
    }

    /// Orders placed under `client_id_prefix` that still have quantity working
    pub fn open_orders(&self, client_id_prefix: &str) -> Vec<Row> {
        self.store
            .rows(tables::ORDER)
            .into_iter()
            .filter(|order| {
                order.get_str("clOrdID").unwrap_or_default().starts_with(client_id_prefix)
                    && order.get_f64("leavesQty").map_or(false, |leaves| leaves > 0.0)
            })
            .collect()
    }

    /// Position row for `symbol`, or a zeroed stub when none exists yet
    pub fn position(&self, symbol: &Symbol) -> Row {
        self.store
            .find_row(tables::POSITION, |row| row.get_str("symbol") == Some(symbol.as_str()))
            .unwrap_or_else(|| {
                Row::new()
                    .with("avgCostPrice", 0.0)
                    .with("avgEntryPrice", 0.0)
                    .with("currentQty", 0.0)
                    .with("symbol", symbol.as_str())
            })
    }

    /// Current trade table, already capped by the insert trim
    pub fn recent_trades(&self) -> Vec<Row> {
        self.store.rows(tables::TRADE)
    }

    fn first(&self, table: &str) -> ExchangeResult<Row> {
        self.store.first_row(table).ok_or_else(|| ExchangeError::NotFound {
            what: format!("{} row", table),
        })
    }
}
