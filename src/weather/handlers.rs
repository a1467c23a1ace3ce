use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::extractors::AuthUser,
    error::Result,
    state::AppState,
    weather::dto::{WeatherList, WeatherReading},
};

pub fn weather_routes() -> Router<AppState> {
    Router::new()
        .route("/weather", get(all_stations))
        .route("/weather/:station_id", get(one_station))
}

#[instrument(skip(state))]
pub async fn all_stations(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<WeatherList>> {
    Ok(Json(state.weather.all_readings().await?))
}

#[instrument(skip(state))]
pub async fn one_station(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(station_id): Path<String>,
) -> Result<Json<WeatherReading>> {
    Ok(Json(state.weather.reading_for(&station_id).await?))
}
