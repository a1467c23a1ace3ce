use serde::{Deserialize, Serialize};

/// Upstream air-temperature payload; only the fields we read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AirTemperatureFeed {
    pub metadata: FeedMetadata,
    #[serde(default)]
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedMetadata {
    #[serde(default)]
    pub stations: Vec<Station>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Station {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<StationLocation>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StationLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedItem {
    #[serde(default)]
    pub readings: Vec<FeedReading>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedReading {
    pub station_id: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeatherReading {
    pub station_id: String,
    pub station_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct WeatherList {
    pub weather_data: Vec<WeatherReading>,
}
