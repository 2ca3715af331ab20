//! BitMEX Mirror Trader
//!
//! Mirrors the realtime tables for one symbol and, once a minute, runs the
//! ESCGO oscillator over recent one-minute bars to decide BUY / SELL / HOLD.
//! Decisions are logged only; no orders are placed.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mirror_core::exchanges::{
    BitmexRestClient, BitmexWebSocket, Credentials, RestConfig, Symbol, WebSocketConfig, MAINNET_ENDPOINT,
    TESTNET_ENDPOINT,
};

mod trader;

use trader::{Trader, TraderConfig};

#[derive(Parser, Debug)]
#[command(name = "mirror-trader")]
#[command(about = "BitMEX realtime mirror with an ESCGO decision loop")]
struct Args {
    /// Instrument to mirror and trade
    #[arg(long, short = 's', default_value = "XBTUSD")]
    symbol: String,

    /// Use testnet instead of the live exchange
    #[arg(long)]
    test: bool,

    #[arg(long, env = "BITMEX_API_KEY")]
    api_key: Option<String>,

    #[arg(long, env = "BITMEX_API_SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    /// Skip the account tables even when credentials are present
    #[arg(long)]
    no_auth: bool,

    /// clOrdID prefix identifying this bot's orders
    #[arg(long, default_value = "mirror-")]
    order_prefix: String,

    /// Seconds between decision loop polls
    #[arg(long, default_value = "10")]
    poll_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("🚀 Starting BitMEX mirror trader for {}", args.symbol);

    let credentials = match (args.api_key, args.api_secret) {
        (Some(key), Some(secret)) => Some(Credentials::new(key, secret)),
        _ => None,
    };
    if credentials.is_none() && !args.no_auth {
        warn!("No API credentials found, mirroring market data only");
    }
    let authenticate = credentials.is_some() && !args.no_auth;

    let (endpoint, rest_config) = if args.test {
        (TESTNET_ENDPOINT, RestConfig::testnet())
    } else {
        (MAINNET_ENDPOINT, RestConfig::default())
    };

    let symbol = Symbol::new(args.symbol);
    let ws = BitmexWebSocket::new(WebSocketConfig::default(), credentials.clone());
    let executions = ws.executions();

    ws.connect(endpoint, &symbol, authenticate).await?;
    info!("✅ Mirror ready on {}", endpoint);

    let rest = BitmexRestClient::new(rest_config, credentials)?;
    let mut config = TraderConfig::new(symbol);
    config.order_prefix = args.order_prefix;
    config.poll_interval = Duration::from_secs(args.poll_secs);

    let mut trader = Trader::new(rest, config);
    if let Some(executions) = executions {
        trader = trader.with_executions(executions);
    }

    info!("📊 Decision loop running. Press Ctrl+C to stop.");
    tokio::select! {
        result = trader.run(&ws) => {
            result?;
            info!("📉 Mirror disconnected, stopping");
        }
        _ = signal::ctrl_c() => {
            info!("🛑 Shutdown signal received...");
        }
    }

    ws.close();
    info!("✅ Mirror trader shutdown complete");

    Ok(())
}
