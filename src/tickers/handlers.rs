use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::extractors::AuthUser,
    error::{AppError, Result},
    state::AppState,
    tickers::{
        dto::{ChartPoint, Paged, SymbolParams, TickerStatus, TodayParams},
        repo_types::Ticker,
        services::today_utc,
    },
};

pub fn ticker_routes() -> Router<AppState> {
    Router::new()
        .route("/tickers/today", get(todays_tickers))
        .route("/tickers/status", get(ticker_status))
        .route("/tickers/chart-data", get(chart_data))
}

#[instrument(skip(state))]
pub async fn todays_tickers(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<TodayParams>,
) -> Result<Json<Paged<Ticker>>> {
    let page = params
        .page_number()
        .ok_or_else(|| AppError::BadRequest("Invalid page.".into()))?;
    let page = state
        .tickers
        .todays_tickers(today_utc(), params.symbol.as_deref(), page)
        .await?;
    Ok(Json(page))
}

#[instrument(skip(state))]
pub async fn ticker_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<SymbolParams>,
) -> Result<Json<TickerStatus>> {
    let status = state
        .tickers
        .status(today_utc(), params.symbol.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(status))
}

#[instrument(skip(state))]
pub async fn chart_data(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<SymbolParams>,
) -> Result<Json<Vec<ChartPoint>>> {
    let series = state
        .tickers
        .history(params.symbol.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(series))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::{
        app::build_app,
        state::AppState,
        testing::{body_json, market_ticker},
    };

    fn authed(uri: &str, state: &AppState) -> Request<Body> {
        let pair = state.tokens.issue_pair(Uuid::new_v4()).unwrap();
        Request::get(uri)
            .header("Authorization", format!("Bearer {}", pair.access))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn tickers_require_a_token() {
        let (state, _) = AppState::fake_parts();
        let app = build_app(state);
        for uri in ["/api/tickers/today", "/api/tickers/status?symbol=BTCUSDT", "/api/tickers/chart-data?symbol=BTCUSDT"] {
            let res = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn today_reads_through_on_first_request() {
        let (state, fakes) = AppState::fake_parts();
        fakes.market.set_snapshot(vec![
            market_ticker("BTCUSDT", "100000.00", "0.5"),
            market_ticker("ETHBTC", "0.031", "-0.3"),
        ]);
        let app = build_app(state.clone());

        let res = app.oneshot(authed("/api/tickers/today", &state)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["results"][0]["symbol"], "BTCUSDT");
        assert_eq!(body["results"][0]["last_price"], "100000.00");
        assert!(body["results"][0].get("id").is_none());
        assert_eq!(fakes.market.calls(), 1);
    }

    #[tokio::test]
    async fn today_rejects_bad_pages() {
        let (state, fakes) = AppState::fake_parts();
        fakes.market.set_snapshot(vec![market_ticker("BTCUSDT", "1", "0")]);
        let app = build_app(state.clone());

        let res = app.clone().oneshot(authed("/api/tickers/today?page=abc", &state)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app.oneshot(authed("/api/tickers/today?page=9", &state)).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(res).await["details"], "Invalid page.");
    }

    #[tokio::test]
    async fn status_and_chart_data() {
        let (state, fakes) = AppState::fake_parts();
        fakes.market.set_snapshot(vec![market_ticker("BTCUSDT", "100000.00", "0.5")]);
        state.tickers.ingest_once(crate::tickers::services::today_utc()).await.unwrap();
        let app = build_app(state.clone());

        let res = app.clone().oneshot(authed("/api/tickers/status?symbol=btcusdt", &state)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["symbol"], "BTCUSDT");
        assert_eq!(body["trend"], "uptrend");

        let res = app.clone().oneshot(authed("/api/tickers/status", &state)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["details"], "Missing symbol param");

        let res = app.clone().oneshot(authed("/api/tickers/chart-data?symbol=BTCUSDT", &state)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["last_price"], "100000.00");

        let res = app.oneshot(authed("/api/tickers/chart-data?symbol=NOPE", &state)).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(res).await["details"], "No data found for this symbol.");
    }
}
