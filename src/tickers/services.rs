use std::sync::Arc;

use serde::Serialize;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::{debug, error, info, warn};

use crate::{
    error::AppError,
    tickers::{
        dto::{ChartPoint, Paged, TickerStatus},
        repo::TickerRepository,
        repo_types::Ticker,
        source::{MarketDataSource, SourceError},
    },
};

/// Percent change beyond which a coin counts as trending.
const TREND_THRESHOLD: f64 = 0.2;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Uptrend,
    Downtrend,
    Flat,
}

impl Trend {
    pub fn classify(change_percent: f64) -> Self {
        if change_percent > TREND_THRESHOLD {
            Trend::Uptrend
        } else if change_percent < -TREND_THRESHOLD {
            Trend::Downtrend
        } else {
            Trend::Flat
        }
    }
}

/// Stored percentages are raw upstream strings; anything unparsable is 0.0.
pub fn parse_change_percent(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("market data fetch failed: {0}")]
    Upstream(#[from] SourceError),
    #[error("storing snapshot failed: {0}")]
    Store(anyhow::Error),
}

pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Ingestion job plus the read side over persisted snapshots.
#[derive(Clone)]
pub struct TickerService {
    repo: Arc<dyn TickerRepository>,
    source: Arc<dyn MarketDataSource>,
    page_size: i64,
}

impl TickerService {
    pub fn new(repo: Arc<dyn TickerRepository>, source: Arc<dyn MarketDataSource>, page_size: u32) -> Self {
        Self {
            repo,
            source,
            page_size: i64::from(page_size.max(1)),
        }
    }

    /// One fetch, then insert-if-absent per symbol for `date`. Returns the
    /// number of new rows. Nothing is written when the fetch fails.
    pub async fn ingest_once(&self, date: Date) -> Result<u64, IngestError> {
        let snapshot = self.source.fetch_snapshot().await.map_err(|e| {
            warn!(error = %e, %date, "ticker fetch failed");
            IngestError::Upstream(e)
        })?;

        let fetched = snapshot.len();
        let mut rows: Vec<_> = snapshot.into_iter().filter(|t| !t.symbol.is_empty()).collect();
        // Concurrent writers must lock (symbol, date) keys in the same order.
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let inserted = self
            .repo
            .insert_if_absent(date, &rows)
            .await
            .map_err(IngestError::Store)?;

        info!(%date, fetched, inserted, "{inserted} tickers saved for {date}");
        Ok(inserted)
    }

    /// Runs [`Self::ingest_once`] only when nothing is stored for `date` yet.
    /// `Ok(None)` means data was already there.
    pub async fn ensure_ingested(&self, date: Date) -> Result<Option<u64>, IngestError> {
        let existing = self
            .repo
            .count_for_date(date, None)
            .await
            .map_err(IngestError::Store)?;
        if existing > 0 {
            debug!(%date, existing, "snapshot already present");
            return Ok(None);
        }
        self.ingest_once(date).await.map(Some)
    }

    /// Read-through: an empty day is ingested inline before answering. An
    /// ingestion failure is logged and the (possibly empty) day is served.
    pub async fn todays_tickers(
        &self,
        today: Date,
        symbol: Option<&str>,
        page: i64,
    ) -> Result<Paged<Ticker>, AppError> {
        if page < 1 {
            return Err(AppError::Validation("Invalid page.".into()));
        }

        if let Err(e) = self.ensure_ingested(today).await {
            error!(error = %e, %today, "read-through ingestion failed");
        }

        let symbol = symbol.map(str::trim).filter(|s| !s.is_empty());
        let count = self.repo.count_for_date(today, symbol).await?;
        let last_page = ((count + self.page_size - 1) / self.page_size).max(1);
        if page > last_page {
            return Err(AppError::NotFound("Invalid page.".into()));
        }

        let results = self
            .repo
            .list_for_date(today, symbol, self.page_size, (page - 1) * self.page_size)
            .await?;

        Ok(Paged {
            count,
            next: (page < last_page).then_some(page + 1),
            previous: (page > 1).then_some(page - 1),
            results,
        })
    }

    pub async fn status(&self, today: Date, symbol: &str) -> Result<TickerStatus, AppError> {
        let symbol = require_symbol(symbol)?;
        let ticker = self
            .repo
            .find(&symbol, today)
            .await?
            .ok_or_else(|| AppError::NotFound("Data not found for symbol today.".into()))?;

        let trend = Trend::classify(parse_change_percent(&ticker.price_change_percent));
        Ok(TickerStatus {
            symbol: ticker.symbol,
            last_price: ticker.last_price,
            price_change_percent: ticker.price_change_percent,
            trend,
        })
    }

    pub async fn history(&self, symbol: &str) -> Result<Vec<ChartPoint>, AppError> {
        let symbol = require_symbol(symbol)?;
        let rows = self.repo.history(&symbol).await?;
        if rows.is_empty() {
            return Err(AppError::NotFound("No data found for this symbol.".into()));
        }
        Ok(rows
            .into_iter()
            .map(|t| ChartPoint {
                date: t.fetched_at.to_string(),
                last_price: t.last_price,
                price_change_percent: t.price_change_percent,
            })
            .collect())
    }
}

fn require_symbol(symbol: &str) -> Result<String, AppError> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(AppError::BadRequest("Missing symbol param".into()));
    }
    Ok(symbol.to_uppercase())
}

/// Time left until the next `hour:00` UTC strictly after `now`.
pub fn duration_until_next_run(now: OffsetDateTime, hour: u8) -> std::time::Duration {
    let at = Time::from_hms(hour, 0, 0).unwrap_or(Time::MIDNIGHT);
    let mut next = PrimitiveDateTime::new(now.date(), at).assume_utc();
    if next <= now {
        next += time::Duration::days(1);
    }
    std::time::Duration::from_secs((next - now).whole_seconds().max(0) as u64)
}

/// Background job: catch up once at startup, then ingest every day at
/// `hour` UTC. Failures are logged and the loop keeps going.
pub async fn run_daily_ingestion(service: TickerService, hour: u8) {
    match service.ensure_ingested(today_utc()).await {
        Ok(Some(n)) => info!(inserted = n, "startup ingestion complete"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "startup ingestion failed"),
    }

    loop {
        let wait = duration_until_next_run(OffsetDateTime::now_utc(), hour);
        info!(secs = wait.as_secs(), hour, "next ticker ingestion scheduled");
        tokio::time::sleep(wait).await;

        if let Err(e) = service.ingest_once(today_utc()).await {
            error!(error = %e, "scheduled ticker ingestion failed");
        }
    }
}
