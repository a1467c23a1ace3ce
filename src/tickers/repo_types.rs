use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::Date;

/// One entry of the upstream 24h ticker snapshot. Decimal values arrive as
/// strings and are stored verbatim.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketTicker {
    pub symbol: String,
    pub price_change: String,
    pub price_change_percent: String,
    pub weighted_avg_price: String,
    pub prev_close_price: String,
    pub last_price: String,
    pub last_qty: String,
    pub bid_price: String,
    pub bid_qty: String,
    pub ask_price: String,
    pub ask_qty: String,
    pub open_price: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    pub quote_volume: String,
    pub open_time: i64,
    pub close_time: i64,
    pub first_id: i64,
    pub last_id: i64,
    pub count: i64,
}

/// Persisted snapshot row, unique on (symbol, fetched_at).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Ticker {
    #[serde(skip_serializing)]
    pub id: i64,
    pub symbol: String,
    pub price_change: String,
    pub price_change_percent: String,
    pub weighted_avg_price: String,
    pub prev_close_price: String,
    pub last_price: String,
    pub last_qty: String,
    pub bid_price: String,
    pub bid_qty: String,
    pub ask_price: String,
    pub ask_qty: String,
    pub open_price: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    pub quote_volume: String,
    pub open_time: i64,
    pub close_time: i64,
    pub first_id: i64,
    pub last_id: i64,
    pub count: i64,
    #[serde(serialize_with = "serialize_date")]
    pub fetched_at: Date,
}

fn serialize_date<S: serde::Serializer>(date: &Date, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(date)
}

impl Ticker {
    /// Builds the row that would be stored for `t` on `date`.
    pub fn from_market(id: i64, t: &MarketTicker, date: Date) -> Self {
        Self {
            id,
            symbol: t.symbol.clone(),
            price_change: t.price_change.clone(),
            price_change_percent: t.price_change_percent.clone(),
            weighted_avg_price: t.weighted_avg_price.clone(),
            prev_close_price: t.prev_close_price.clone(),
            last_price: t.last_price.clone(),
            last_qty: t.last_qty.clone(),
            bid_price: t.bid_price.clone(),
            bid_qty: t.bid_qty.clone(),
            ask_price: t.ask_price.clone(),
            ask_qty: t.ask_qty.clone(),
            open_price: t.open_price.clone(),
            high_price: t.high_price.clone(),
            low_price: t.low_price.clone(),
            volume: t.volume.clone(),
            quote_volume: t.quote_volume.clone(),
            open_time: t.open_time,
            close_time: t.close_time,
            first_id: t.first_id,
            last_id: t.last_id,
            count: t.count,
            fetched_at: date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn parses_upstream_payload() {
        let raw = r#"[{
            "symbol": "BTCUSDT", "priceChange": "-94.99", "priceChangePercent": "-0.095",
            "weightedAvgPrice": "100000.1", "prevClosePrice": "100094.99", "lastPrice": "100000.00",
            "lastQty": "0.001", "bidPrice": "99999.99", "bidQty": "1.2", "askPrice": "100000.00",
            "askQty": "0.4", "openPrice": "100094.99", "highPrice": "101000", "lowPrice": "99000",
            "volume": "12345.6", "quoteVolume": "1234567890.1", "openTime": 1735603200000,
            "closeTime": 1735689599999, "firstId": 28385, "lastId": 28460, "count": 76
        }, {"symbol": "ETHBTC", "firstId": -1}]"#;

        let parsed: Vec<MarketTicker> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].symbol, "BTCUSDT");
        assert_eq!(parsed[0].price_change_percent, "-0.095");
        assert_eq!(parsed[0].close_time, 1735689599999);
        assert_eq!(parsed[0].count, 76);
        assert_eq!(parsed[1].first_id, -1);
        assert_eq!(parsed[1].last_price, "");
    }

    #[test]
    fn row_serializes_date_as_iso() {
        let t = MarketTicker {
            symbol: "ETHBTC".into(),
            ..Default::default()
        };
        let row = Ticker::from_market(1, &t, date!(2025 - 01 - 03));
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["fetched_at"], "2025-01-03");
        assert!(json.get("id").is_none());
    }
}
