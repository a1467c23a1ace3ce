use std::{sync::Arc, time::Duration};

use axum::{async_trait, extract::FromRef};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use sqlx::PgPool;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::claims::{Claims, TokenKind},
    config::JwtConfig,
    state::AppState,
};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Bad signature, expired, wrong issuer/audience, wrong kind or revoked.
    #[error("Token is invalid or expired")]
    Invalid,
    #[error("Token is malformed")]
    Malformed,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Access + refresh pair handed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Deny list of revoked refresh tokens, keyed by `jti`.
#[async_trait]
pub trait RevokedTokenStore: Send + Sync {
    async fn is_revoked(&self, jti: Uuid) -> anyhow::Result<bool>;
    /// Returns false if the token was already on the list.
    async fn revoke(&self, jti: Uuid, user_id: Uuid, expires_at: OffsetDateTime) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct PgRevokedTokenStore {
    db: PgPool,
}

impl PgRevokedTokenStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RevokedTokenStore for PgRevokedTokenStore {
    async fn is_revoked(&self, jti: Uuid) -> anyhow::Result<bool> {
        let revoked: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE jti = $1)")
                .bind(jti)
                .fetch_one(&self.db)
                .await?;
        Ok(revoked)
    }

    async fn revoke(&self, jti: Uuid, user_id: Uuid, expires_at: OffsetDateTime) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO revoked_tokens (jti, user_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(jti)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
            refresh_ttl: Duration::from_secs((cfg.refresh_ttl_minutes.max(0) as u64) * 60),
        }
    }

    fn sign_at(&self, user_id: Uuid, kind: TokenKind, now: OffsetDateTime) -> anyhow::Result<String> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_at(user_id, TokenKind::Access, OffsetDateTime::now_utc())
    }

    pub fn sign_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_at(user_id, TokenKind::Refresh, OffsetDateTime::now_utc())
    }

    /// Signature, expiry, issuer and audience checks. Kind is not checked.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => TokenError::Malformed,
                _ => TokenError::Invalid,
            }
        })?;
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }
}

/// Issues, verifies and revokes session credentials.
#[derive(Clone)]
pub struct TokenService {
    keys: JwtKeys,
    revoked: Arc<dyn RevokedTokenStore>,
}

impl FromRef<AppState> for TokenService {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl TokenService {
    pub fn new(keys: JwtKeys, revoked: Arc<dyn RevokedTokenStore>) -> Self {
        Self { keys, revoked }
    }

    pub fn issue_pair(&self, user_id: Uuid) -> anyhow::Result<TokenPair> {
        Ok(TokenPair {
            access: self.keys.sign_access(user_id)?,
            refresh: self.keys.sign_refresh(user_id)?,
        })
    }

    /// Stateless check; access tokens are never looked up in the deny list.
    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.keys.decode(token)?;
        if claims.kind != TokenKind::Access {
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }

    pub async fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.keys.decode(token)?;
        if claims.kind != TokenKind::Refresh {
            return Err(TokenError::Invalid);
        }
        if self.revoked.is_revoked(claims.jti).await? {
            debug!(jti = %claims.jti, "refresh token is revoked");
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }

    pub async fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        match expected {
            TokenKind::Access => self.verify_access(token),
            TokenKind::Refresh => self.verify_refresh(token).await,
        }
    }

    /// Puts `owner`'s refresh token on the deny list. Access tokens of the
    /// same pair stay valid until they expire on their own.
    pub async fn revoke(&self, refresh_token: &str, owner: Uuid) -> Result<(), TokenError> {
        let claims = self.verify_refresh(refresh_token).await?;
        if claims.sub != owner {
            warn!(%owner, "refresh token belongs to another user");
            return Err(TokenError::Invalid);
        }
        let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp as i64)
            .map_err(|e| TokenError::Backend(e.into()))?;
        if !self.revoked.revoke(claims.jti, claims.sub, expires_at).await? {
            return Err(TokenError::Invalid);
        }
        info!(user_id = %claims.sub, jti = %claims.jti, "refresh token revoked");
        Ok(())
    }

    /// New access token from a live refresh token. The refresh token is not rotated.
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, TokenError> {
        let claims = self.verify_refresh(refresh_token).await?;
        Ok(self.keys.sign_access(claims.sub)?)
    }
}
