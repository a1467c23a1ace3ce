use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use time::Date;

use crate::tickers::repo_types::{MarketTicker, Ticker};

const TICKER_COLUMNS: &str = "id, symbol, price_change, price_change_percent, weighted_avg_price, \
     prev_close_price, last_price, last_qty, bid_price, bid_qty, ask_price, ask_qty, open_price, \
     high_price, low_price, volume, quote_volume, open_time, close_time, first_id, last_id, count, \
     fetched_at";

#[async_trait]
pub trait TickerRepository: Send + Sync {
    /// Inserts every entry whose (symbol, date) is not stored yet and returns
    /// how many rows were written. Existing rows are never overwritten.
    async fn insert_if_absent(&self, date: Date, rows: &[MarketTicker]) -> anyhow::Result<u64>;
    async fn count_for_date(&self, date: Date, symbol: Option<&str>) -> anyhow::Result<i64>;
    /// Ordered by symbol.
    async fn list_for_date(
        &self,
        date: Date,
        symbol: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Ticker>>;
    async fn find(&self, symbol: &str, date: Date) -> anyhow::Result<Option<Ticker>>;
    /// All rows for `symbol`, oldest first.
    async fn history(&self, symbol: &str) -> anyhow::Result<Vec<Ticker>>;
}

#[derive(Clone)]
pub struct PgTickerRepository {
    db: PgPool,
}

impl PgTickerRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TickerRepository for PgTickerRepository {
    async fn insert_if_absent(&self, date: Date, rows: &[MarketTicker]) -> anyhow::Result<u64> {
        // Row locks are taken in symbol order whatever order the caller used.
        let mut ordered: Vec<&MarketTicker> = rows.iter().collect();
        ordered.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut tx = self.db.begin().await.context("begin tx")?;
        let mut inserted = 0;
        for t in ordered {
            let res = sqlx::query(
                r#"
                INSERT INTO tickers (
                    symbol, price_change, price_change_percent, weighted_avg_price,
                    prev_close_price, last_price, last_qty, bid_price, bid_qty, ask_price,
                    ask_qty, open_price, high_price, low_price, volume, quote_volume,
                    open_time, close_time, first_id, last_id, count, fetched_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                        $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
                ON CONFLICT (symbol, fetched_at) DO NOTHING
                "#,
            )
            .bind(&t.symbol)
            .bind(&t.price_change)
            .bind(&t.price_change_percent)
            .bind(&t.weighted_avg_price)
            .bind(&t.prev_close_price)
            .bind(&t.last_price)
            .bind(&t.last_qty)
            .bind(&t.bid_price)
            .bind(&t.bid_qty)
            .bind(&t.ask_price)
            .bind(&t.ask_qty)
            .bind(&t.open_price)
            .bind(&t.high_price)
            .bind(&t.low_price)
            .bind(&t.volume)
            .bind(&t.quote_volume)
            .bind(t.open_time)
            .bind(t.close_time)
            .bind(t.first_id)
            .bind(t.last_id)
            .bind(t.count)
            .bind(date)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert ticker {}", t.symbol))?;
            inserted += res.rows_affected();
        }
        tx.commit().await.context("commit tx")?;
        Ok(inserted)
    }

    async fn count_for_date(&self, date: Date, symbol: Option<&str>) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM tickers
            WHERE fetched_at = $1 AND ($2::text IS NULL OR symbol = $2)
            "#,
        )
        .bind(date)
        .bind(symbol)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn list_for_date(
        &self,
        date: Date,
        symbol: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Ticker>> {
        let rows = sqlx::query_as::<_, Ticker>(&format!(
            r#"
            SELECT {TICKER_COLUMNS}
            FROM tickers
            WHERE fetched_at = $1 AND ($2::text IS NULL OR symbol = $2)
            ORDER BY symbol ASC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(date)
        .bind(symbol)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn find(&self, symbol: &str, date: Date) -> anyhow::Result<Option<Ticker>> {
        let row = sqlx::query_as::<_, Ticker>(&format!(
            "SELECT {TICKER_COLUMNS} FROM tickers WHERE symbol = $1 AND fetched_at = $2"
        ))
        .bind(symbol)
        .bind(date)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn history(&self, symbol: &str) -> anyhow::Result<Vec<Ticker>> {
        let rows = sqlx::query_as::<_, Ticker>(&format!(
            "SELECT {TICKER_COLUMNS} FROM tickers WHERE symbol = $1 ORDER BY fetched_at ASC"
        ))
        .bind(symbol)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{market_ticker, test_pool};
    use rand::seq::SliceRandom;
    use time::macros::date;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn concurrent_snapshots_store_each_symbol_once() {
        let repo = PgTickerRepository::new(test_pool().await);
        let day = date!(2031 - 03 - 07);
        let run = uuid::Uuid::new_v4().simple().to_string();
        let symbols: Vec<String> = (0..40).map(|i| format!("T{i:02}{}", &run[..8])).collect();

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let repo = repo.clone();
            let mut rows: Vec<_> = symbols.iter().map(|s| market_ticker(s, "1.0", "0.5")).collect();
            rows.shuffle(&mut rand::thread_rng());
            tasks.push(tokio::spawn(async move { repo.insert_if_absent(day, &rows).await }));
        }

        let mut written = 0;
        for task in tasks {
            written += task.await.unwrap().expect("no deadlock or conflict error");
        }
        assert_eq!(written, symbols.len() as u64);

        for symbol in &symbols {
            assert_eq!(repo.count_for_date(day, Some(symbol)).await.unwrap(), 1);
        }
    }

    #[tokio::test]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn existing_rows_are_not_overwritten() {
        let repo = PgTickerRepository::new(test_pool().await);
        let day = date!(2031 - 03 - 08);
        let symbol = format!("KEEP{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

        assert_eq!(repo.insert_if_absent(day, &[market_ticker(&symbol, "1.0", "0")]).await.unwrap(), 1);
        assert_eq!(repo.insert_if_absent(day, &[market_ticker(&symbol, "9.0", "0")]).await.unwrap(), 0);
        assert_eq!(repo.find(&symbol, day).await.unwrap().unwrap().last_price, "1.0");
    }
}
