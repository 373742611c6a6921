//! HTTP collaborators: a kline/depth market feed and a scoring service.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::types::{FeatureVector, MarketBar, ModelScore, Timeframe};
use serde::Deserialize;
use serde_json::Value;
use signal_engine::InferenceClient;
use tracing::{debug, warn};

use crate::pipeline::MarketFeed;

const MAX_RETRIES: u32 = 3;
const DEPTH_LEVELS: usize = 10;

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .context("failed to build HTTP client")
}

/// GET with retry and exponential backoff on 429 and 5xx.
async fn get_with_retry(client: &reqwest::Client, url: &str) -> anyhow::Result<reqwest::Response> {
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) if response.status().as_u16() == 429 || response.status().is_server_error() => {
                let status = response.status();
                warn!(attempt = attempt + 1, status = %status, url = url, "Retryable feed error, backing off");
                last_error = Some(anyhow!("{} returned {}", url, status));
            }
            Ok(response) => bail!("{} returned {}", url, response.status()),
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, url = url, "Feed request failed, backing off");
                last_error = Some(e.into());
            }
        }
        tokio::time::sleep(Duration::from_millis(250 * 2u64.pow(attempt))).await;
    }

    Err(last_error.unwrap_or_else(|| anyhow!("{} failed", url)))
}

/// Market feed over a Binance-compatible REST API (`/api/v3/klines`, `/api/v3/depth`).
pub struct HttpMarketFeed {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMarketFeed {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.binance.com";

    pub fn new(base_url: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: base_url
                .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: http_client(Duration::from_secs(10))?,
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(std::env::var("MARKET_FEED_URL").ok())
    }
}

#[async_trait]
impl MarketFeed for HttpMarketFeed {
    async fn recent_bars(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> anyhow::Result<Vec<MarketBar>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            timeframe.as_str(),
            limit
        );
        let rows: Vec<Vec<Value>> = get_with_retry(&self.client, &url).await?.json().await?;
        let bars = parse_klines(symbol, timeframe, &rows)?;
        debug!(symbol = %symbol, bars = bars.len(), "Fetched klines");
        Ok(bars)
    }

    async fn book_depth(&self, symbol: &str) -> anyhow::Result<Option<(f64, f64)>> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.base_url, symbol, DEPTH_LEVELS
        );
        let book: DepthResponse = get_with_retry(&self.client, &url).await?.json().await?;
        Ok(Some((sum_sizes(&book.bids)?, sum_sizes(&book.asks)?)))
    }
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

fn sum_sizes(levels: &[(String, String)]) -> anyhow::Result<f64> {
    levels.iter().try_fold(0.0, |acc, (_, size)| -> anyhow::Result<f64> {
        let size: f64 = size.parse().with_context(|| format!("bad depth size {:?}", size))?;
        Ok(acc + size)
    })
}

fn number(row: &[Value], index: usize) -> anyhow::Result<f64> {
    match row.get(index) {
        Some(Value::String(s)) => s.parse().with_context(|| format!("bad kline field {}: {:?}", index, s)),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| anyhow!("bad kline field {}", index)),
        other => bail!("missing kline field {}: {:?}", index, other),
    }
}

/// Parse `[open_time_ms, open, high, low, close, volume, ...]` rows.
pub fn parse_klines(symbol: &str, timeframe: Timeframe, rows: &[Vec<Value>]) -> anyhow::Result<Vec<MarketBar>> {
    rows.iter()
        .map(|row| {
            let open_ms = row
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| anyhow!("kline without open time"))?;
            let timestamp = DateTime::<Utc>::from_timestamp_millis(open_ms)
                .ok_or_else(|| anyhow!("kline open time {} out of range", open_ms))?;
            Ok(MarketBar {
                symbol: symbol.to_string(),
                timeframe,
                open: number(row, 1)?,
                high: number(row, 2)?,
                low: number(row, 3)?,
                close: number(row, 4)?,
                volume: number(row, 5)?,
                timestamp,
            })
        })
        .collect()
}

/// Scoring collaborator reached over HTTP: POSTs the feature vector and
/// expects `{"probability": f64, "expected_r": f64}`.
pub struct HttpInferenceClient {
    url: String,
    client: reqwest::Client,
}

impl HttpInferenceClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            url: url.into(),
            client: http_client(timeout)?,
        })
    }

    /// `None` when `INFERENCE_URL` is unset.
    pub fn from_env(timeout: Duration) -> anyhow::Result<Option<Self>> {
        match std::env::var("INFERENCE_URL") {
            Ok(url) if !url.is_empty() => Ok(Some(Self::new(url, timeout)?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn score(&self, features: &FeatureVector) -> anyhow::Result<ModelScore> {
        let response = self
            .client
            .post(&self.url)
            .json(features)
            .send()
            .await
            .context("inference request failed")?;
        if !response.status().is_success() {
            bail!("inference service returned {}", response.status());
        }
        Ok(response.json().await?)
    }
}
