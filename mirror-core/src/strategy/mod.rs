//! Indicator and decision logic driven by the bar history

pub mod indicator;
pub mod signal;

pub use indicator::{escgo, escgo_from_bars, Escgo, DEFAULT_PERIOD};
pub use signal::{decide, Decision, PositionToggle, BUY_THRESHOLD, SELL_THRESHOLD};
