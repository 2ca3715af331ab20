//! REST client for historical bars

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

use super::errors::{ExchangeError, ExchangeResult};
use super::signing::{signed_headers, Credentials};
use super::types::{Bar, Symbol};
use super::websocket::{MAINNET_ENDPOINT, TESTNET_ENDPOINT};

/// REST configuration
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Lifetime of request signatures
    pub auth_expiry: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: MAINNET_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(10),
            auth_expiry: Duration::from_secs(300),
        }
    }
}

impl RestConfig {
    pub fn testnet() -> Self {
        Self {
            base_url: TESTNET_ENDPOINT.to_string(),
            ..Default::default()
        }
    }
}

/// Bucket width accepted by the bucketed trade endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinSize {
    OneMinute,
    FiveMinutes,
    OneHour,
    OneDay,
}

impl BinSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinSize::OneMinute => "1m",
            BinSize::FiveMinutes => "5m",
            BinSize::OneHour => "1h",
            BinSize::OneDay => "1d",
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        match self {
            BinSize::OneMinute => chrono::Duration::minutes(1),
            BinSize::FiveMinutes => chrono::Duration::minutes(5),
            BinSize::OneHour => chrono::Duration::hours(1),
            BinSize::OneDay => chrono::Duration::days(1),
        }
    }
}

impl fmt::Display for BinSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of OHLCV history
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Up to `count` buckets of `bin_size` starting at `start_time`, oldest first
    async fn bucketed_trades(
        &self,
        symbol: &Symbol,
        bin_size: BinSize,
        count: u32,
        start_time: DateTime<Utc>,
    ) -> ExchangeResult<Vec<Bar>>;
}

/// BitMEX REST client
#[derive(Debug, Clone)]
pub struct BitmexRestClient {
    config: RestConfig,
    credentials: Option<Credentials>,
    client: Client,
}

impl BitmexRestClient {
    pub fn new(config: RestConfig, credentials: Option<Credentials>) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ExchangeError::Http {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            config,
            credentials,
            client,
        })
    }

    /// Full URL of a bucketed trade request
    pub fn bucketed_trades_url(
        &self,
        symbol: &Symbol,
        bin_size: BinSize,
        count: u32,
        start_time: DateTime<Utc>,
    ) -> ExchangeResult<Url> {
        let mut url = self.endpoint("trade/bucketed")?;
        url.query_pairs_mut()
            .append_pair("binSize", bin_size.as_str())
            .append_pair("symbol", symbol.as_str())
            .append_pair("count", &count.to_string())
            .append_pair("startTime", &start_time.to_rfc3339_opts(SecondsFormat::Millis, true));
        Ok(url)
    }

    fn endpoint(&self, resource: &str) -> ExchangeResult<Url> {
        let base = self.config.base_url.trim_end_matches('/');
        Ok(Url::parse(&format!("{}/{}", base, resource))?)
    }

    /// Signed when credentials are configured, anonymous otherwise
    async fn get<T: DeserializeOwned>(&self, url: Url) -> ExchangeResult<T> {
        debug!("GET {}", url);
        let mut request = self.client.get(url.clone());

        if let Some(credentials) = &self.credentials {
            let path = match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            };
            for (name, value) in signed_headers(credentials, "GET", &path, "", self.config.auth_expiry)? {
                request = request.header(name, value);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                error!("Failed to parse response: {} - Body: {}", e, body);
                ExchangeError::Malformed(e.to_string())
            })
        } else {
            Err(ExchangeError::Http {
                message: format!("{} {}", status, body),
            })
        }
    }
}

#[async_trait]
impl CandleSource for BitmexRestClient {
    async fn bucketed_trades(
        &self,
        symbol: &Symbol,
        bin_size: BinSize,
        count: u32,
        start_time: DateTime<Utc>,
    ) -> ExchangeResult<Vec<Bar>> {
        let url = self.bucketed_trades_url(symbol, bin_size, count, start_time)?;
        self.get(url).await
    }
}
