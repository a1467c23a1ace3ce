//! In-memory stand-ins for the stores and upstream clients, used by unit and
//! router tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use axum::{async_trait, response::Response};
use bytes::Bytes;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::RevokedTokenStore,
        oauth::{IdentityProvider, OAuthStateStore, ProviderError, ProviderProfile},
        repo::{RepoError, UserRepository},
        repo_types::{NewUser, User},
    },
    storage::StorageClient,
    tickers::{
        repo::TickerRepository,
        repo_types::{MarketTicker, Ticker},
        source::{MarketDataSource, SourceError},
    },
    weather::{
        dto::{AirTemperatureFeed, FeedItem, FeedMetadata, FeedReading, Station, StationLocation},
        services::WeatherSource,
    },
};

pub async fn body_json(res: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Pool on `DATABASE_URL` with migrations applied, for `#[ignore]`d
/// database tests (`cargo test -- --ignored`).
pub async fn test_pool() -> sqlx::PgPool {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
    let pool = crate::db::connect(&url).await.expect("connect to test database");
    crate::db::migrate(&pool).await.expect("migrate test database");
    pool
}

pub fn market_ticker(symbol: &str, last_price: &str, change_percent: &str) -> MarketTicker {
    MarketTicker {
        symbol: symbol.into(),
        last_price: last_price.into(),
        price_change_percent: change_percent.into(),
        ..Default::default()
    }
}

/// Two stations, only S50 has a reading.
pub fn sample_weather_feed() -> AirTemperatureFeed {
    AirTemperatureFeed {
        metadata: FeedMetadata {
            stations: vec![
                Station {
                    id: "S50".into(),
                    name: Some("Clementi Road".into()),
                    location: Some(StationLocation {
                        latitude: Some(1.3337),
                        longitude: Some(103.7768),
                    }),
                },
                Station {
                    id: "S117".into(),
                    name: Some("Banyan Road".into()),
                    location: Some(StationLocation {
                        latitude: Some(1.256),
                        longitude: Some(103.679),
                    }),
                },
            ],
        },
        items: vec![FeedItem {
            readings: vec![FeedReading {
                station_id: "S50".into(),
                value: Some(29.4),
            }],
        }],
    }
}

/// Handles to every fake behind [`crate::state::AppState::fake_parts`].
#[derive(Clone, Default)]
pub struct Fakes {
    pub users: Arc<MemoryUsers>,
    pub revoked: Arc<MemoryRevokedTokens>,
    pub storage: Arc<FakeStorage>,
    pub provider: Arc<FakeIdentityProvider>,
    pub oauth_states: Arc<MemoryOAuthStates>,
    pub tickers: Arc<MemoryTickers>,
    pub market: Arc<FakeMarket>,
    pub weather: Arc<FakeWeather>,
}

// --- users ---

#[derive(Default)]
pub struct MemoryUsers {
    users: Mutex<HashMap<Uuid, User>>,
    forced_slug_collisions: AtomicUsize,
}

impl MemoryUsers {
    /// The next `n` slug checks report a collision.
    pub fn force_slug_collisions(&self, n: usize) {
        self.forced_slug_collisions.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    fn update<F: FnOnce(&mut User)>(&self, id: Uuid, f: F) -> anyhow::Result<User> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("user {id} not found"))?;
        f(user);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }
}

#[async_trait]
impl UserRepository for MemoryUsers {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn slug_exists(&self, slug: &str) -> anyhow::Result<bool> {
        let forced = self
            .forced_slug_collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Ok(true);
        }
        Ok(self.users.lock().unwrap().values().any(|u| u.slug == slug))
    }

    async fn insert(&self, new: NewUser) -> Result<User, RepoError> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.email == new.email) {
            return Err(RepoError::DuplicateEmail);
        }
        if users.values().any(|u| u.slug == new.slug) {
            return Err(RepoError::DuplicateSlug);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            slug: new.slug,
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            image: None,
            login_method: new.login_method,
            last_verified_identity: new.last_verified_identity,
            is_admin: false,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        self.update(id, |u| u.password_hash = password_hash.to_string())?;
        Ok(())
    }

    async fn update_image(&self, id: Uuid, image: &str) -> anyhow::Result<User> {
        self.update(id, |u| u.image = Some(image.to_string()))
    }

    async fn touch_verified_identity(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<User> {
        self.update(id, |u| u.last_verified_identity = Some(at))
    }
}

// --- revoked tokens ---

#[derive(Default)]
pub struct MemoryRevokedTokens {
    jtis: Mutex<HashSet<Uuid>>,
}

#[async_trait]
impl RevokedTokenStore for MemoryRevokedTokens {
    async fn is_revoked(&self, jti: Uuid) -> anyhow::Result<bool> {
        Ok(self.jtis.lock().unwrap().contains(&jti))
    }

    async fn revoke(&self, jti: Uuid, _user_id: Uuid, _expires_at: OffsetDateTime) -> anyhow::Result<bool> {
        Ok(self.jtis.lock().unwrap().insert(jti))
    }
}

#[derive(Default)]
pub struct MemoryOAuthStates {
    nonces: Mutex<HashSet<String>>,
}

#[async_trait]
impl OAuthStateStore for MemoryOAuthStates {
    async fn consume(&self, nonce: &str, _expires_at: OffsetDateTime) -> anyhow::Result<bool> {
        Ok(self.nonces.lock().unwrap().insert(nonce.to_string()))
    }
}

// --- blob storage ---

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Bytes>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeStorage {
    pub fn objects(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn presign_get(&self, key: &str, _seconds: u64) -> anyhow::Result<String> {
        Ok(format!("https://fake.local/{key}"))
    }
}

// --- identity provider ---

/// Answers with the configured profile; `None` simulates an outage.
#[derive(Default)]
pub struct FakeIdentityProvider {
    profile: Mutex<Option<ProviderProfile>>,
    calls: AtomicUsize,
}

impl FakeIdentityProvider {
    pub fn set_profile(&self, profile: Option<ProviderProfile>) {
        *self.profile.lock().unwrap() = profile;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn user_info(&self, _access_token: &str) -> Result<ProviderProfile, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.profile
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProviderError::Unavailable("connection refused".into()))
    }
}

// --- tickers ---

/// Keyed like the real table's unique constraint.
#[derive(Default)]
pub struct MemoryTickers {
    rows: Mutex<BTreeMap<(Date, String), Ticker>>,
    next_id: AtomicUsize,
    last_batch: Mutex<Vec<String>>,
}

impl MemoryTickers {
    /// Symbols of the most recent `insert_if_absent` call, in the order given.
    pub fn last_batch(&self) -> Vec<String> {
        self.last_batch.lock().unwrap().clone()
    }

    fn matching(&self, date: Date, symbol: Option<&str>) -> Vec<Ticker> {
        self.rows
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.fetched_at == date && symbol.map_or(true, |s| t.symbol == s))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TickerRepository for MemoryTickers {
    async fn insert_if_absent(&self, date: Date, rows: &[MarketTicker]) -> anyhow::Result<u64> {
        *self.last_batch.lock().unwrap() = rows.iter().map(|t| t.symbol.clone()).collect();
        let mut stored = self.rows.lock().unwrap();
        let mut inserted = 0;
        for t in rows {
            let key = (date, t.symbol.clone());
            if stored.contains_key(&key) {
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            stored.insert(key, Ticker::from_market(id, t, date));
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn count_for_date(&self, date: Date, symbol: Option<&str>) -> anyhow::Result<i64> {
        Ok(self.matching(date, symbol).len() as i64)
    }

    async fn list_for_date(
        &self,
        date: Date,
        symbol: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Ticker>> {
        // BTreeMap order within one date is by symbol.
        Ok(self
            .matching(date, symbol)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn find(&self, symbol: &str, date: Date) -> anyhow::Result<Option<Ticker>> {
        Ok(self.rows.lock().unwrap().get(&(date, symbol.to_string())).cloned())
    }

    async fn history(&self, symbol: &str) -> anyhow::Result<Vec<Ticker>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.symbol == symbol)
            .cloned()
            .collect())
    }
}

pub struct FakeMarket {
    snapshot: Mutex<Vec<MarketTicker>>,
    failure: Mutex<Option<SourceError>>,
    calls: AtomicUsize,
}

impl Default for FakeMarket {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FakeMarket {
    pub fn new(snapshot: Vec<MarketTicker>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_snapshot(&self, snapshot: Vec<MarketTicker>) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn fail_with(&self, err: SourceError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for FakeMarket {
    async fn fetch_snapshot(&self) -> Result<Vec<MarketTicker>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

// --- weather ---

/// Serves the configured feed; `None` simulates an outage.
pub struct FakeWeather {
    feed: Mutex<Option<AirTemperatureFeed>>,
}

impl Default for FakeWeather {
    fn default() -> Self {
        Self::new(Some(sample_weather_feed()))
    }
}

impl FakeWeather {
    pub fn new(feed: Option<AirTemperatureFeed>) -> Self {
        Self { feed: Mutex::new(feed) }
    }

    pub fn set_feed(&self, feed: Option<AirTemperatureFeed>) {
        *self.feed.lock().unwrap() = feed;
    }
}

#[async_trait]
impl WeatherSource for FakeWeather {
    async fn fetch(&self) -> anyhow::Result<AirTemperatureFeed> {
        self.feed
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("weather upstream unreachable"))
    }
}
