//! Opaque token issuer for verification links, reset links and the account cookie.
//!
//! Raw tokens are handed to the user exactly once; the store only ever sees
//! the SHA-256 digest, so a leaked row cannot be replayed as a credential.

use anyhow::Context;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

/// Encoded length of a raw token (32 bytes, base64url without padding).
pub const TOKEN_LEN: usize = 43;

/// A freshly minted token together with the digest that gets persisted.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw: String,
    pub digest: String,
}

pub fn issue() -> anyhow::Result<IssuedToken> {
    let raw = generate_token()?;
    let digest = digest(&raw);
    Ok(IssuedToken { raw, digest })
}

pub fn generate_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Digest stored in place of the raw token.
pub fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    Base64UrlUnpadded::encode_string(&hasher.finalize())
}

/// Cheap shape check so garbage never reaches the store or a page template.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Compare two digests without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// True when `raw` hashes to `stored_digest`.
pub fn matches(raw: &str, stored_digest: &str) -> bool {
    constant_time_eq(digest(raw).as_bytes(), stored_digest.as_bytes())
}
