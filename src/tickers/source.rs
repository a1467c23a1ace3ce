//! Upstream market-data client (Binance-compatible 24h ticker endpoint).

use std::time::Duration;

use axum::async_trait;

use crate::tickers::repo_types::MarketTicker;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("JSON parse error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Full live snapshot, one entry per symbol, in a single call.
    async fn fetch_snapshot(&self) -> Result<Vec<MarketTicker>, SourceError>;
}

#[derive(Clone)]
pub struct BinanceSource {
    http: reqwest::Client,
    url: String,
}

impl BinanceSource {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, url: url.into() })
    }
}

#[async_trait]
impl MarketDataSource for BinanceSource {
    async fn fetch_snapshot(&self) -> Result<Vec<MarketTicker>, SourceError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}
