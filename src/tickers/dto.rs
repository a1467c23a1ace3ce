use serde::{Deserialize, Serialize};

use crate::tickers::services::Trend;

#[derive(Debug, Deserialize)]
pub struct TodayParams {
    pub symbol: Option<String>,
    pub page: Option<String>,
}

impl TodayParams {
    /// Missing means the first page; anything non-numeric is rejected.
    pub fn page_number(&self) -> Option<i64> {
        match self.page.as_deref().map(str::trim) {
            None | Some("") => Some(1),
            Some(raw) => raw.parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SymbolParams {
    pub symbol: Option<String>,
}

/// One page of results; `next` / `previous` are page numbers.
#[derive(Debug, Serialize)]
pub struct Paged<T> {
    pub count: i64,
    pub next: Option<i64>,
    pub previous: Option<i64>,
    pub results: Vec<T>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TickerStatus {
    pub symbol: String,
    pub last_price: String,
    pub price_change_percent: String,
    pub trend: Trend,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ChartPoint {
    pub date: String,
    pub last_price: String,
    pub price_change_percent: String,
}
