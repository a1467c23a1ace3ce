use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use tracing::error;

const MIN_PASSWORD_LEN: usize = 8;

const COMMON_PASSWORDS: &[&str] = &[
    "password", "password1", "12345678", "123456789", "1234567890", "qwerty123",
    "qwertyuiop", "iloveyou", "letmein1", "welcome1", "admin123", "abc12345",
    "football", "baseball", "sunshine", "princess", "passw0rd", "11111111",
];

lazy_static! {
    /// Verified against when the email is unknown so that both login failure
    /// paths pay the same argon2 cost.
    static ref DUMMY_HASH: String =
        hash_password("dummy-password-for-timing").unwrap_or_default();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Burn one verification against a fixed hash; the result is discarded.
pub fn verify_dummy(plain: &str) {
    let _ = verify_password(plain, &DUMMY_HASH);
}

/// Hash of a random secret nobody knows. Federated accounts get one so the
/// column is never empty but local login can't succeed.
pub fn unusable_password_hash() -> anyhow::Result<String> {
    let secret: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect();
    hash_password(&secret)
}

/// Password strength policy. Returns every violated rule.
pub fn validate_password_policy(plain: &str, email: &str, name: &str) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();
    let lowered = plain.to_lowercase();

    if plain.chars().count() < MIN_PASSWORD_LEN {
        problems.push(format!(
            "This password is too short. It must contain at least {MIN_PASSWORD_LEN} characters."
        ));
    }
    if !plain.is_empty() && plain.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_string());
    }
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        problems.push("This password is too common.".to_string());
    }

    let local_part = email.split('@').next().unwrap_or_default().to_lowercase();
    let name = name.trim().to_lowercase();
    let similar = [local_part.as_str(), name.as_str()]
        .iter()
        .filter(|attr| attr.len() >= 3)
        .any(|attr| lowered.contains(*attr) || attr.contains(lowered.as_str()));
    if similar {
        problems.push("The password is too similar to your personal information.".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}
