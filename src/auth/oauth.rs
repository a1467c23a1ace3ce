//! Federated (Google OAuth) login helpers: the signed anti-forgery `state`
//! value and the provider user-info client.

use std::time::Duration;

use axum::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::config::OAuthConfig;

type HmacSha256 = Hmac<Sha256>;

/// How long a `state` value handed out by the login step stays acceptable.
pub const STATE_MAX_AGE_SECS: i64 = 10 * 60;

/// Builds `nonce|issued_at` signed with HMAC-SHA256, base64url encoded.
pub fn issue_state(secret: &[u8], now: OffsetDateTime) -> anyhow::Result<String> {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);
    let payload = format!("{}|{:x}", hex::encode(nonce), now.unix_timestamp());

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("HMAC init failed: {e}"))?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(URL_SAFE_NO_PAD.encode(format!("{payload}|{signature}")))
}

/// Nonce and issue time carried by a `state` whose signature checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedState {
    pub nonce: String,
    pub issued_at: OffsetDateTime,
}

impl VerifiedState {
    /// Past this instant the state is refused and its nonce can be forgotten.
    pub fn expires_at(&self) -> OffsetDateTime {
        self.issued_at + time::Duration::seconds(STATE_MAX_AGE_SECS)
    }
}

/// Checks that `state` was issued by us with `secret` and is not older than
/// [`STATE_MAX_AGE_SECS`]. Single use is enforced by [`OAuthStateStore`].
pub fn verify_state(state: &str, secret: &[u8], now: OffsetDateTime) -> Option<VerifiedState> {
    let decoded = URL_SAFE_NO_PAD
        .decode(state)
        .ok()
        .and_then(|b| String::from_utf8(b).ok())?;

    // "nonce_hex|issued_at_hex|signature_hex"
    let parts: Vec<&str> = decoded.splitn(3, '|').collect();
    let [nonce, issued_hex, signature_hex] = parts.as_slice() else {
        return None;
    };

    let signature = hex::decode(signature_hex).ok()?;
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(format!("{nonce}|{issued_hex}").as_bytes());
    if mac.verify_slice(&signature).is_err() {
        tracing::warn!("OAuth state signature mismatch");
        return None;
    }

    let issued_at = i64::from_str_radix(issued_hex, 16).ok()?;
    let age = now.unix_timestamp() - issued_at;
    if !(0..=STATE_MAX_AGE_SECS).contains(&age) {
        return None;
    }
    Some(VerifiedState {
        nonce: nonce.to_string(),
        issued_at: OffsetDateTime::from_unix_timestamp(issued_at).ok()?,
    })
}

/// Constant-time equality for the state echoed by the provider and the one
/// kept in the browser cookie.
pub fn states_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Remembers consumed state nonces so a callback URL works once.
#[async_trait]
pub trait OAuthStateStore: Send + Sync {
    /// Returns false if the nonce was already consumed.
    async fn consume(&self, nonce: &str, expires_at: OffsetDateTime) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct PgOAuthStateStore {
    db: PgPool,
}

impl PgOAuthStateStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OAuthStateStore for PgOAuthStateStore {
    async fn consume(&self, nonce: &str, expires_at: OffsetDateTime) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO oauth_state_nonces (nonce, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (nonce) DO NOTHING
            "#,
        )
        .bind(nonce)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }
}

/// Provider authorize URL the client is sent to in the first login step.
pub fn authorization_url(cfg: &OAuthConfig, state: &str) -> String {
    format!(
        "{}?redirect_uri={}&scope={}&state={}&client_id={}&response_type=code",
        cfg.auth_url,
        urlencoding::encode(&cfg.redirect_uri),
        urlencoding::encode("openid email profile"),
        urlencoding::encode(state),
        urlencoding::encode(&cfg.client_id),
    )
}

/// Subset of the provider's user-info document we rely on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderProfile {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network failure talking to the provider.
    #[error("identity provider unreachable: {0}")]
    Unavailable(String),
    /// Provider answered, but not with a usable profile (bad token etc).
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn user_info(&self, access_token: &str) -> Result<ProviderProfile, ProviderError>;
}

#[derive(Clone)]
pub struct GoogleIdentityProvider {
    http: reqwest::Client,
    userinfo_url: String,
}

impl GoogleIdentityProvider {
    pub fn new(cfg: &OAuthConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            userinfo_url: cfg.userinfo_url.clone(),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    async fn user_info(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Rejected(format!("HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Rejected(format!("JSON parse error: {e}")))
    }
}
