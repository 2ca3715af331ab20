//! Exchange data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::errors::{ExchangeError, ExchangeResult};

/// Trading symbol
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn validate(&self) -> bool {
        let body = self.0.strip_prefix('.').unwrap_or(&self.0);
        !body.is_empty() && body.chars().all(|c| c.is_alphanumeric() || c == '_')
    }

    /// Index symbols carry a leading `.` and have no order book of their own
    pub fn is_index(&self) -> bool {
        self.0.starts_with('.')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn multiplier(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl FromStr for Side {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Buy" => Ok(Side::Buy),
            "Sell" => Ok(Side::Sell),
            other => Err(ExchangeError::Malformed(format!("unknown side: {}", other))),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// One field of a table row.
///
/// The server only sends the fields that changed, so rows are open-ended maps of
/// these values rather than fixed records. Strings always decode as `Text`,
/// including timestamps; `as_timestamp` parses them on demand so text keys
/// that happen to look like dates still compare as strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<FieldValue>),
    Object(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// RFC 3339 text as a UTC timestamp
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        let text = self.as_str()?;
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|timestamp| timestamp.with_timezone(&Utc))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A table row: field name to value
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, FieldValue>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    /// Numeric field; `None` when absent, null or non-numeric
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_f64)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(field.into(), value.into());
    }

    /// Builder form of `insert`
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Field-wise overwrite; fields absent from `update` are kept
    pub fn merge(&mut self, update: Row) {
        self.0.extend(update.0);
    }

    /// True when every key field of `self` equals the same field in `probe`.
    ///
    /// An empty key list matches any row. A key field missing from `probe`
    /// means the probe cannot identify a row at all, which is a malformed message.
    pub fn matches_keys(&self, keys: &[String], probe: &Row) -> ExchangeResult<bool> {
        for key in keys {
            let wanted = probe.get(key).ok_or_else(|| {
                ExchangeError::Malformed(format!("row is missing key field '{}'", key))
            })?;
            if self.get(key) != Some(wanted) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }
}

/// Instrument row with its derived tick precision
#[derive(Clone, Debug)]
pub struct Instrument {
    pub symbol: Symbol,
    pub tick_size: f64,
    /// Decimal digits needed to print a multiple of `tick_size`
    pub tick_log: usize,
    pub row: Row,
}

impl Instrument {
    pub fn from_row(row: Row) -> ExchangeResult<Self> {
        let symbol = row
            .get_str("symbol")
            .map(Symbol::new)
            .ok_or_else(|| ExchangeError::Malformed("instrument row has no symbol".to_string()))?;
        let tick_size = row
            .get_f64("tickSize")
            .filter(|t| *t > 0.0)
            .ok_or_else(|| {
                ExchangeError::Malformed(format!("instrument {} has no usable tickSize", symbol))
            })?;

        Ok(Self {
            symbol,
            tick_size,
            tick_log: tick_precision(tick_size),
            row,
        })
    }

    pub fn mark_price(&self) -> Option<f64> {
        self.row.get_f64("markPrice")
    }

    pub fn last_price(&self) -> Option<f64> {
        self.row.get_f64("lastPrice")
    }

    pub fn bid_price(&self) -> Option<f64> {
        self.row.get_f64("bidPrice")
    }

    pub fn ask_price(&self) -> Option<f64> {
        self.row.get_f64("askPrice")
    }

    /// Round to the nearest multiple of the tick size
    pub fn to_nearest(&self, value: f64) -> f64 {
        to_nearest(value, self.tick_size, self.tick_log)
    }
}

/// Number of decimal digits in the shortest representation of `tick_size`
pub fn tick_precision(tick_size: f64) -> usize {
    let repr = tick_size.to_string();
    match repr.split_once('.') {
        Some((_, fraction)) => fraction.len(),
        None => 0,
    }
}

/// Round `value` to a multiple of `tick_size`, ties to even, printed at `tick_log` digits
pub fn to_nearest(value: f64, tick_size: f64, tick_log: usize) -> f64 {
    let ticks = (value / tick_size).round_ties_even();
    let scale = 10f64.powi(tick_log as i32);
    (ticks * tick_size * scale).round() / scale
}

/// Best prices derived from the instrument row
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Ticker {
    pub last: f64,
    pub buy: f64,
    pub sell: f64,
    pub mid: f64,
}

/// Fill observed on an order update
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionEvent {
    pub side: Side,
    pub quantity: f64,
    pub symbol: Symbol,
    pub price: f64,
    /// Tick precision of the instrument, when it was known
    pub tick_log: Option<usize>,
}

impl fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tick_log {
            Some(digits) => write!(
                f,
                "{} {} Contracts of {} at {:.*}",
                self.side, self.quantity, self.symbol, digits, self.price
            ),
            None => write!(
                f,
                "{} {} Contracts of {} at {}",
                self.side, self.quantity, self.symbol, self.price
            ),
        }
    }
}

/// One OHLCV bucket from the REST history endpoint
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
}

impl Bar {
    /// Midpoint of the bar's range; empty buckets fall back to the close
    pub fn hl2(&self) -> Option<f64> {
        match (self.high, self.low) {
            (Some(high), Some(low)) => Some((high + low) / 2.0),
            _ => self.close,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_symbol_index_detection() {
        assert!(Symbol::new(".BXBT").is_index());
        assert!(!Symbol::new("XBTUSD").is_index());
        assert!(Symbol::new(".BXBT").validate());
        assert!(!Symbol::new(".").validate());
    }

    #[test]
    fn test_field_value_decoding() {
        let row: Row = serde_json::from_str(
            r#"{"orderID":"A","leavesQty":10,"timestamp":"2024-03-01T12:00:00.000Z","workingIndicator":true,"text":null}"#,
        )
        .unwrap();

        assert_eq!(row.get_str("orderID"), Some("A"));
        assert_eq!(row.get_f64("leavesQty"), Some(10.0));
        assert_eq!(row.get_str("timestamp"), Some("2024-03-01T12:00:00.000Z"));
        assert_eq!(
            row.get("timestamp").and_then(FieldValue::as_timestamp),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(row.get("orderID").and_then(FieldValue::as_timestamp), None);
        assert_eq!(row.get("workingIndicator"), Some(&FieldValue::Bool(true)));
        assert!(row.get("text").unwrap().is_null());
    }

    #[test]
    fn test_date_shaped_text_stays_text() {
        let row: Row = serde_json::from_str(r#"{"clOrdID":"2024-03-01T12:00:00Z"}"#).unwrap();
        assert_eq!(row.get_str("clOrdID"), Some("2024-03-01T12:00:00Z"));
        assert!(row.get("clOrdID").unwrap().as_timestamp().is_some());
    }

    #[test]
    fn test_order_book_levels_decode_as_lists() {
        let row: Row = serde_json::from_str(r#"{"symbol":"XBTUSD","bids":[[100.5,20],[100.0,5]]}"#).unwrap();
        match row.get("bids") {
            Some(FieldValue::List(levels)) => assert_eq!(levels.len(), 2),
            other => panic!("unexpected bids value: {:?}", other),
        }
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut row = Row::new().with("orderID", "A").with("leavesQty", 10.0).with("side", "Buy");
        row.merge(Row::new().with("leavesQty", 4.0).with("cumQty", 6.0));

        assert_eq!(row.get_f64("leavesQty"), Some(4.0));
        assert_eq!(row.get_f64("cumQty"), Some(6.0));
        assert_eq!(row.get_str("side"), Some("Buy"));
    }

    #[test]
    fn test_key_matching() {
        let keys = vec!["symbol".to_string(), "id".to_string()];
        let row = Row::new().with("symbol", "XBTUSD").with("id", 7.0).with("size", 1.0);

        let same = Row::new().with("symbol", "XBTUSD").with("id", 7.0);
        let other = Row::new().with("symbol", "XBTUSD").with("id", 8.0);
        let partial = Row::new().with("symbol", "XBTUSD");

        assert!(row.matches_keys(&keys, &same).unwrap());
        assert!(!row.matches_keys(&keys, &other).unwrap());
        assert!(row.matches_keys(&keys, &partial).is_err());
        assert!(row.matches_keys(&[], &other).unwrap());
    }

    #[test]
    fn test_tick_precision() {
        assert_eq!(tick_precision(0.5), 1);
        assert_eq!(tick_precision(0.01), 2);
        assert_eq!(tick_precision(1.0), 0);
        assert_eq!(tick_precision(0.00000001), 8);
    }

    #[test]
    fn test_to_nearest() {
        assert_eq!(to_nearest(100.3, 0.5, 1), 100.5);
        assert_eq!(to_nearest(100.8, 0.5, 1), 101.0);
        assert_eq!(to_nearest(100.55, 0.5, 1), 100.5);
        // ties go to the even tick count
        assert_eq!(to_nearest(100.25, 0.5, 1), 100.0);
        assert_eq!(to_nearest(0.123456, 0.01, 2), 0.12);
    }

    #[test]
    fn test_execution_event_display() {
        let event = ExecutionEvent {
            side: Side::Buy,
            quantity: 10.0,
            symbol: Symbol::new("XBTUSD"),
            price: 100.0,
            tick_log: Some(1),
        };
        assert_eq!(event.to_string(), "Buy 10 Contracts of XBTUSD at 100.0");
    }
}
