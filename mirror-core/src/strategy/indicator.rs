//! Ehlers Stochastic Center of Gravity oscillator

use crate::exchanges::Bar;

pub const DEFAULT_PERIOD: usize = 8;

/// Oscillator series, one value per input bar
#[derive(Debug, Clone, PartialEq)]
pub struct Escgo {
    /// Oscillator in [-1, 1]
    pub value: Vec<f64>,
    /// Previous value, damped
    pub trigger: Vec<f64>,
}

impl Escgo {
    pub fn last(&self) -> Option<f64> {
        self.value.last().copied()
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// ESCGO over the bar midpoints `(high + low) / 2`
pub fn escgo(highs: &[f64], lows: &[f64], period: usize) -> Escgo {
    let hl2: Vec<f64> = highs.iter().zip(lows).map(|(h, l)| (h + l) / 2.0).collect();
    escgo_hl2(&hl2, period)
}

/// ESCGO over bar history. Bars with no price at all are skipped.
pub fn escgo_from_bars(bars: &[Bar], period: usize) -> Escgo {
    let hl2: Vec<f64> = bars.iter().filter_map(Bar::hl2).collect();
    escgo_hl2(&hl2, period)
}

fn escgo_hl2(hl2: &[f64], period: usize) -> Escgo {
    let n = hl2.len();
    let mut value = vec![0.0; n];
    let mut trigger = vec![0.0; n];

    if period == 0 || n < period {
        return Escgo { value, trigger };
    }

    let mut cg = vec![0.0; n];
    for i in period - 1..n {
        let (mut numerator, mut denominator) = (0.0, 0.0);
        for j in 0..period {
            numerator += (j + 1) as f64 * hl2[i - j];
            denominator += hl2[i - j];
        }
        cg[i] = if denominator != 0.0 {
            -numerator / denominator + (period + 1) as f64 / 2.0
        } else {
            0.0
        };
    }

    let mut v1 = vec![0.0; n];
    for i in period - 1..n {
        let window = &cg[i + 1 - period..=i];
        let min = window.iter().copied().fold(f64::INFINITY, f64::min);
        let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        v1[i] = if max != min { (cg[i] - min) / (max - min) } else { 0.0 };

        let lag = |k: usize| if i >= k { v1[i - k] } else { 0.0 };
        let v2 = (4.0 * v1[i] + 3.0 * lag(1) + 2.0 * lag(2) + lag(3)) / 10.0;
        value[i] = 2.0 * (v2 - 0.5);

        let previous = if i >= 1 { value[i - 1] } else { 0.0 };
        trigger[i] = 0.96 * (previous + 0.02);
    }

    Escgo { value, trigger }
}
