use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::async_trait;
use tracing::{debug, warn};

use crate::{
    error::AppError,
    weather::dto::{AirTemperatureFeed, Station, WeatherList, WeatherReading},
};

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<AirTemperatureFeed>;
}

#[derive(Clone)]
pub struct DataGovWeatherSource {
    http: reqwest::Client,
    url: String,
}

impl DataGovWeatherSource {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, url: url.into() })
    }
}

#[async_trait]
impl WeatherSource for DataGovWeatherSource {
    async fn fetch(&self) -> anyhow::Result<AirTemperatureFeed> {
        let feed = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(feed)
    }
}

/// Live proxy over the station feed; nothing is cached or stored.
#[derive(Clone)]
pub struct WeatherService {
    source: Arc<dyn WeatherSource>,
}

impl WeatherService {
    pub fn new(source: Arc<dyn WeatherSource>) -> Self {
        Self { source }
    }

    async fn feed(&self) -> Result<AirTemperatureFeed, AppError> {
        self.source.fetch().await.map_err(|e| {
            warn!(error = %e, "weather fetch failed");
            AppError::ServiceUnavailable
        })
    }

    /// Every station in the metadata, joined with the first item's readings.
    pub async fn all_readings(&self) -> Result<WeatherList, AppError> {
        let feed = self.feed().await?;
        let readings = latest_readings(&feed);
        let weather_data = feed
            .metadata
            .stations
            .iter()
            .map(|s| to_reading(s, readings.get(s.id.as_str()).copied().flatten()))
            .collect::<Vec<_>>();
        debug!(stations = weather_data.len(), "weather readings assembled");
        Ok(WeatherList { weather_data })
    }

    pub async fn reading_for(&self, station_id: &str) -> Result<WeatherReading, AppError> {
        let feed = self.feed().await?;
        let station = feed
            .metadata
            .stations
            .iter()
            .find(|s| s.id == station_id)
            .ok_or_else(|| AppError::NotFound("Station not found".into()))?;
        let temperature = latest_readings(&feed).get(station_id).copied().flatten();
        Ok(to_reading(station, temperature))
    }
}

fn latest_readings(feed: &AirTemperatureFeed) -> HashMap<&str, Option<f64>> {
    feed.items
        .first()
        .map(|item| {
            item.readings
                .iter()
                .map(|r| (r.station_id.as_str(), r.value))
                .collect()
        })
        .unwrap_or_default()
}

fn to_reading(station: &Station, temperature: Option<f64>) -> WeatherReading {
    WeatherReading {
        station_id: station.id.clone(),
        station_name: station.name.clone(),
        latitude: station.location.and_then(|l| l.latitude),
        longitude: station.location.and_then(|l| l.longitude),
        temperature,
    }
}
