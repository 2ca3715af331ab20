//! Threshold decisions and position toggling

use std::fmt;

pub const BUY_THRESHOLD: f64 = 0.8;
pub const SELL_THRESHOLD: f64 = -0.8;

/// Trading decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Buy => write!(f, "BUY"),
            Decision::Sell => write!(f, "SELL"),
            Decision::Hold => write!(f, "HOLD"),
        }
    }
}

/// Raw decision for an oscillator value
pub fn decide(value: f64) -> Decision {
    if value > BUY_THRESHOLD {
        Decision::Buy
    } else if value < SELL_THRESHOLD {
        Decision::Sell
    } else {
        Decision::Hold
    }
}

/// Alternates between expecting a buy and expecting a sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionToggle {
    #[default]
    ExpectBuy,
    ExpectSell,
}

impl PositionToggle {
    /// Act on `decision` if it is the one expected, flipping the expectation
    pub fn resolve(&mut self, decision: Decision) -> Decision {
        match (*self, decision) {
            (PositionToggle::ExpectBuy, Decision::Buy) => {
                *self = PositionToggle::ExpectSell;
                Decision::Buy
            }
            (PositionToggle::ExpectSell, Decision::Sell) => {
                *self = PositionToggle::ExpectBuy;
                Decision::Sell
            }
            _ => Decision::Hold,
        }
    }
}
