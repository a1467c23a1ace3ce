use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    auth::{
        jwt::{JwtKeys, PgRevokedTokenStore, TokenService},
        oauth::{GoogleIdentityProvider, IdentityProvider, OAuthStateStore, PgOAuthStateStore},
        repo::PgUserRepository,
        services::IdentityService,
    },
    config::AppConfig,
    storage::{S3Storage, StorageClient},
    tickers::{repo::PgTickerRepository, services::TickerService, source::BinanceSource},
    weather::services::{DataGovWeatherSource, WeatherService},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tokens: TokenService,
    pub identity: IdentityService,
    pub oauth_provider: Arc<dyn IdentityProvider>,
    pub oauth_states: Arc<dyn OAuthStateStore>,
    pub tickers: TickerService,
    pub weather: WeatherService,
}

impl AppState {
    pub async fn init(config: AppConfig, db: PgPool) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        // Real S3/MinIO
        let storage = Arc::new(S3Storage::from_config(&config.storage).await) as Arc<dyn StorageClient>;

        let tokens = TokenService::new(
            JwtKeys::from_config(&config.jwt),
            Arc::new(PgRevokedTokenStore::new(db.clone())),
        );
        let identity = IdentityService::new(Arc::new(PgUserRepository::new(db.clone())), storage);
        let oauth_provider = Arc::new(GoogleIdentityProvider::new(&config.oauth)?);
        let oauth_states = Arc::new(PgOAuthStateStore::new(db.clone()));
        let tickers = TickerService::new(
            Arc::new(PgTickerRepository::new(db)),
            Arc::new(BinanceSource::new(&config.tickers.source_url)?),
            config.tickers.page_size,
        );
        let weather = WeatherService::new(Arc::new(DataGovWeatherSource::new(&config.weather_url)?));

        Ok(Self {
            config,
            tokens,
            identity,
            oauth_provider,
            oauth_states,
            tickers,
            weather,
        })
    }

    /// State wired to in-memory fakes, plus handles to those fakes.
    #[cfg(test)]
    pub fn fake_parts() -> (Self, crate::testing::Fakes) {
        let config = Arc::new(AppConfig::test_default());
        let fakes = crate::testing::Fakes::default();

        let state = Self {
            tokens: TokenService::new(JwtKeys::from_config(&config.jwt), fakes.revoked.clone()),
            identity: IdentityService::new(fakes.users.clone(), fakes.storage.clone()),
            oauth_provider: fakes.provider.clone(),
            oauth_states: fakes.oauth_states.clone(),
            tickers: TickerService::new(
                fakes.tickers.clone(),
                fakes.market.clone(),
                config.tickers.page_size,
            ),
            weather: WeatherService::new(fakes.weather.clone()),
            config,
        };
        (state, fakes)
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_parts().0
    }
}
