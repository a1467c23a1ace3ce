use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// How the account was created / last authenticated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoginMethod {
    Local,
    Federated,
}

impl LoginMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            LoginMethod::Local => "local",
            LoginMethod::Federated => "federated",
        }
    }
}

impl TryFrom<String> for LoginMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "local" => Ok(LoginMethod::Local),
            "federated" => Ok(LoginMethod::Federated),
            other => Err(format!("unknown login method {other:?}")),
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub slug: String,                 // public handle, A-Z0-9, immutable
    pub email: String,                // normalized (trimmed, lowercased)
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, not exposed in JSON
    pub image: Option<String>,        // storage key of the profile picture
    #[sqlx(try_from = "String")]
    pub login_method: LoginMethod,
    pub last_verified_identity: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub is_admin: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Everything needed to insert a user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub slug: String,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub login_method: LoginMethod,
    pub last_verified_identity: Option<OffsetDateTime>,
}
