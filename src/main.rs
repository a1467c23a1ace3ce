mod app;
mod auth;
mod config;
mod db;
mod error;
mod state;
mod storage;
mod tickers;
mod weather;

#[cfg(test)]
mod testing;

use crate::{config::AppConfig, state::AppState, tickers::services::run_daily_ingestion};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tickerhub=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let db = db::connect(&config.database_url).await?;

    if let Err(e) = db::migrate(&db).await {
        tracing::warn!(error = %e, "migration failed; continuing");
    }

    let (host, port) = (config.host.clone(), config.port);
    let ingest_hour = config.tickers.ingest_hour_utc;
    let app_state = AppState::init(config, db).await?;

    tokio::spawn(run_daily_ingestion(app_state.tickers.clone(), ingest_hour));

    let app = app::build_app(app_state);
    app::serve(app, &host, port).await
}
