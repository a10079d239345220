use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

pub const MIN_PASSWORD_LEN: usize = 8;

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

/// Argon2 is CPU bound; keep it off the async workers.
pub async fn hash_password_blocking(plain: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&plain)).await?
}

pub async fn verify_password_blocking(plain: String, hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash)).await?
}

/// Returns the first rule the password breaks, if any.
pub fn check_strength(plain: &str) -> Result<(), &'static str> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err("Password must be at least 8 characters long");
    }
    let upper = plain.chars().any(|c| c.is_ascii_uppercase());
    let lower = plain.chars().any(|c| c.is_ascii_lowercase());
    let digit = plain.chars().any(|c| c.is_ascii_digit());
    let special = plain.chars().any(|c| !c.is_ascii_alphanumeric());
    if !(upper && lower && digit && special) {
        return Err("Password must contain at least one uppercase letter, one lowercase letter, one number, and one special character");
    }
    Ok(())
}
