use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        password::{
            hash_password, unusable_password_hash, validate_password_policy, verify_dummy,
            verify_password,
        },
        repo::{RepoError, UserRepository},
        repo_types::{LoginMethod, NewUser, User},
    },
    error::AppError,
    storage::StorageClient,
};

pub const SLUG_LEN: usize = 8;
pub const SLUG_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_SLUG_ATTEMPTS: usize = 16;
const IMAGE_URL_TTL_SECS: u64 = 30 * 60;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn generate_slug() -> String {
    let mut rng = rand::thread_rng();
    (0..SLUG_LEN)
        .map(|_| SLUG_ALPHABET[rng.gen_range(0..SLUG_ALPHABET.len())] as char)
        .collect()
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

/// Identity store: user creation, credential checks and profile mutations.
#[derive(Clone)]
pub struct IdentityService {
    users: Arc<dyn UserRepository>,
    storage: Arc<dyn StorageClient>,
}

impl IdentityService {
    pub fn new(users: Arc<dyn UserRepository>, storage: Arc<dyn StorageClient>) -> Self {
        Self { users, storage }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.find_by_id(id).await?)
    }

    /// Local registration. The password is hashed before it reaches the store.
    pub async fn create_user(&self, email: &str, name: &str, raw_password: &str) -> Result<User, AppError> {
        let email = normalize_email(email);
        let name = name.trim();
        if email.is_empty() {
            return Err(AppError::Validation("Users must have an email address".into()));
        }
        if !is_valid_email(&email) {
            return Err(AppError::Validation("Enter a valid email address.".into()));
        }
        if name.is_empty() {
            return Err(AppError::Validation("Name is required.".into()));
        }
        validate_password_policy(raw_password, &email, name)
            .map_err(|problems| AppError::Validation(problems.join(" ")))?;

        if self.users.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(duplicate_email());
        }

        let password_hash = hash_password(raw_password)?;
        let user = self
            .insert_with_unique_slug(&email, name, password_hash, LoginMethod::Local, None)
            .await
            .map_err(|e| match e {
                RepoError::DuplicateEmail => duplicate_email(),
                other => AppError::Internal(other.into()),
            })?;

        info!(user_id = %user.id, slug = %user.slug, "user created");
        Ok(user)
    }

    /// Lookup-or-create keyed by email. Every call refreshes
    /// `last_verified_identity`.
    pub async fn create_or_get_federated_user(&self, email: &str, name: &str) -> Result<(User, bool), AppError> {
        let email = normalize_email(email);
        let now = OffsetDateTime::now_utc();

        if let Some(existing) = self.users.find_by_email(&email).await? {
            let user = self.users.touch_verified_identity(existing.id, now).await?;
            debug!(user_id = %user.id, "federated identity re-verified");
            return Ok((user, false));
        }

        let password_hash = unusable_password_hash()?;
        match self
            .insert_with_unique_slug(&email, name.trim(), password_hash, LoginMethod::Federated, Some(now))
            .await
        {
            Ok(user) => {
                info!(user_id = %user.id, "federated user created");
                Ok((user, true))
            }
            // Lost a race with a concurrent first login for the same email.
            Err(RepoError::DuplicateEmail) => {
                let existing = self
                    .users
                    .find_by_email(&email)
                    .await?
                    .context("user vanished after duplicate email")?;
                let user = self.users.touch_verified_identity(existing.id, now).await?;
                Ok((user, false))
            }
            Err(e) => Err(AppError::Internal(e.into())),
        }
    }

    /// `None` for an unknown email and for a wrong password alike.
    pub async fn verify_credential(&self, email: &str, raw_password: &str) -> Result<Option<User>, AppError> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            verify_dummy(raw_password);
            debug!("login for unknown email");
            return Ok(None);
        };
        if verify_password(raw_password, &user.password_hash)? {
            Ok(Some(user))
        } else {
            debug!(user_id = %user.id, "login with wrong password");
            Ok(None)
        }
    }

    pub async fn change_password(&self, user: &User, new_raw_password: &str) -> Result<(), AppError> {
        if verify_password(new_raw_password, &user.password_hash)? {
            return Err(AppError::Validation(
                "New password cannot be the same as the old password.".into(),
            ));
        }
        validate_password_policy(new_raw_password, &user.email, &user.name)
            .map_err(|problems| AppError::Validation(problems.join(" ")))?;

        let hash = hash_password(new_raw_password)?;
        self.users.update_password_hash(user.id, &hash).await?;
        info!(user_id = %user.id, "password changed");
        Ok(())
    }

    /// Uploads the new picture and swaps the `image` reference. The previous
    /// object is deleted best-effort.
    pub async fn update_profile_image(&self, user: &User, body: Bytes, content_type: &str) -> Result<User, AppError> {
        if body.is_empty() {
            return Err(AppError::Validation("The submitted file is empty.".into()));
        }
        let ext = ext_from_mime(content_type).ok_or_else(|| {
            AppError::Validation(
                "Upload a valid image. The file you uploaded was either not an image or a corrupted image."
                    .into(),
            )
        })?;

        let key = format!("profile_pics/{}/{}.{}", user.id, Uuid::new_v4(), ext);
        self.storage
            .put_object(&key, body, content_type)
            .await
            .with_context(|| format!("put_object {key}"))?;

        let updated = self.users.update_image(user.id, &key).await?;

        if let Some(old) = user.image.as_deref().filter(|old| *old != key) {
            if let Err(e) = self.storage.delete_object(old).await {
                warn!(error = %e, key = %old, "failed to delete previous profile picture");
            }
        }

        info!(user_id = %user.id, key = %key, "profile picture updated");
        Ok(updated)
    }

    pub async fn image_url(&self, user: &User) -> Result<Option<String>, AppError> {
        match user.image.as_deref() {
            Some(key) => Ok(Some(self.storage.presign_get(key, IMAGE_URL_TTL_SECS).await?)),
            None => Ok(None),
        }
    }

    async fn insert_with_unique_slug(
        &self,
        email: &str,
        name: &str,
        password_hash: String,
        login_method: LoginMethod,
        last_verified_identity: Option<OffsetDateTime>,
    ) -> Result<User, RepoError> {
        for attempt in 1..=MAX_SLUG_ATTEMPTS {
            let slug = generate_slug();
            if self.users.slug_exists(&slug).await? {
                debug!(attempt, "slug collision on pre-check");
                continue;
            }
            let new_user = NewUser {
                slug,
                email: email.to_string(),
                name: name.to_string(),
                password_hash: password_hash.clone(),
                login_method,
                last_verified_identity,
            };
            match self.users.insert(new_user).await {
                Err(RepoError::DuplicateSlug) => {
                    debug!(attempt, "slug collision on insert");
                    continue;
                }
                other => return other,
            }
        }
        Err(RepoError::Other(anyhow::anyhow!(
            "could not allocate a unique slug after {MAX_SLUG_ATTEMPTS} attempts"
        )))
    }
}

fn duplicate_email() -> AppError {
    AppError::Validation("user with this email already exists.".into())
}
