use axum::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

const USER_COLUMNS: &str = "id, slug, email, name, password_hash, image, login_method, \
     last_verified_identity, is_admin, created_at, updated_at";

/// Names Postgres gives the column-level UNIQUE constraints on `users`.
const SLUG_CONSTRAINT: &str = "users_slug_key";
const EMAIL_CONSTRAINT: &str = "users_email_key";

/// Failure modes of a user insert the caller can act on.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("duplicate slug")]
    DuplicateSlug,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence of user identities. The store's unique constraints on `email`
/// and `slug` are the authoritative guard; callers only pre-check.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn slug_exists(&self, slug: &str) -> anyhow::Result<bool>;
    async fn insert(&self, user: NewUser) -> Result<User, RepoError>;
    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
    async fn update_image(&self, id: Uuid, image: &str) -> anyhow::Result<User>;
    async fn touch_verified_identity(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<User>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn slug_exists(&self, slug: &str) -> anyhow::Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.db)
            .await?;
        Ok(exists)
    }

    async fn insert(&self, user: NewUser) -> Result<User, RepoError> {
        let res = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, slug, email, name, password_hash, login_method, last_verified_identity)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.slug)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.login_method.as_str())
        .bind(user.last_verified_identity)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(u) => Ok(u),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                match db.constraint() {
                    Some(SLUG_CONSTRAINT) => Err(RepoError::DuplicateSlug),
                    Some(EMAIL_CONSTRAINT) => Err(RepoError::DuplicateEmail),
                    other => Err(RepoError::Other(anyhow::anyhow!(
                        "unexpected unique violation on {other:?}"
                    ))),
                }
            }
            Err(e) => Err(RepoError::Other(anyhow::Error::new(e).context("insert user"))),
        }
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn update_image(&self, id: Uuid, image: &str) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET image = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(image)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn touch_verified_identity(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET last_verified_identity = $2, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(at)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }
}
