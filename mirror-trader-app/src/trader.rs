//! Polling decision loop over the realtime mirror and REST bar history

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use mirror_core::exchanges::{BinSize, CandleSource, ExecutionEvent, Symbol, Ticker};
use mirror_core::market_data::Snapshot;
use mirror_core::strategy::{decide, escgo_from_bars, Decision, PositionToggle, DEFAULT_PERIOD};
use mirror_core::BitmexWebSocket;

/// Decision loop settings
#[derive(Debug, Clone)]
pub struct TraderConfig {
    pub symbol: Symbol,
    /// Only orders whose clOrdID starts with this count as ours
    pub order_prefix: String,
    pub poll_interval: Duration,
    pub bin_size: BinSize,
    pub history_len: u32,
    pub period: usize,
}

impl TraderConfig {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            order_prefix: "mirror-".to_string(),
            poll_interval: Duration::from_secs(10),
            bin_size: BinSize::OneMinute,
            history_len: 100,
            period: DEFAULT_PERIOD,
        }
    }
}

/// Outcome of one evaluated minute
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub decision: Decision,
    pub oscillator: f64,
    pub ticker: Ticker,
    pub position: f64,
    pub open_orders: usize,
    pub fills: usize,
}

pub struct Trader<S> {
    source: S,
    config: TraderConfig,
    toggle: PositionToggle,
    last_minute: Option<i64>,
    executions: Option<mpsc::UnboundedReceiver<ExecutionEvent>>,
}

impl<S: CandleSource> Trader<S> {
    pub fn new(source: S, config: TraderConfig) -> Self {
        Self {
            source,
            config,
            toggle: PositionToggle::default(),
            last_minute: None,
            executions: None,
        }
    }

    /// Drain fills from the mirror's execution channel on every evaluation
    pub fn with_executions(mut self, executions: mpsc::UnboundedReceiver<ExecutionEvent>) -> Self {
        self.executions = Some(executions);
        self
    }

    /// Evaluate once per wall-clock minute; `None` when this minute was already handled
    pub async fn tick(&mut self, now: DateTime<Utc>, snapshot: &Snapshot) -> Result<Option<Report>> {
        let minute = now.timestamp().div_euclid(60);
        if self.last_minute == Some(minute) {
            return Ok(None);
        }

        let span = self.config.bin_size.duration() * self.config.history_len as i32;
        let bars = self
            .source
            .bucketed_trades(&self.config.symbol, self.config.bin_size, self.config.history_len, now - span)
            .await
            .context("failed to fetch bar history")?;

        let oscillator = escgo_from_bars(&bars, self.config.period).last().unwrap_or_default();

        let ticker = snapshot.ticker(&self.config.symbol)?;
        let position = snapshot
            .position(&self.config.symbol)
            .get_f64("currentQty")
            .unwrap_or_default();
        let open_orders = snapshot.open_orders(&self.config.order_prefix).len();
        let fills = self.drain_fills();

        // Only a fully evaluated minute may flip the expectation
        let decision = self.toggle.resolve(decide(oscillator));

        self.last_minute = Some(minute);

        Ok(Some(Report {
            decision,
            oscillator,
            ticker,
            position,
            open_orders,
            fills,
        }))
    }

    /// Run until the mirror disconnects. Any failed evaluation closes the mirror.
    pub async fn run(&mut self, ws: &BitmexWebSocket) -> Result<()> {
        while ws.is_connected() {
            match self.tick(Utc::now(), &ws.snapshot()).await {
                Ok(Some(report)) => {
                    info!(
                        "{} | escgo {:.3} | last {} bid {} ask {} | position {} | open orders {} | fills {}",
                        report.decision,
                        report.oscillator,
                        report.ticker.last,
                        report.ticker.buy,
                        report.ticker.sell,
                        report.position,
                        report.open_orders,
                        report.fills
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Decision loop failed: {:#}", e);
                    ws.close();
                    return Err(e);
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        if let Some(e) = ws.last_error() {
            error!("Mirror disconnected: {}", e);
        }
        Ok(())
    }

    fn drain_fills(&mut self) -> usize {
        let Some(executions) = self.executions.as_mut() else {
            return 0;
        };
        let mut fills = 0;
        while executions.try_recv().is_ok() {
            fills += 1;
        }
        fills
    }
}
