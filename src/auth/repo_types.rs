use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the credential store.
///
/// Every token column holds a SHA-256 digest; raw tokens only ever live in
/// mailed links and the account cookie.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string
    pub email_verified: bool,
    #[serde(skip_serializing)]
    pub email_verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub account_token: String,
    #[serde(skip_serializing)]
    pub reset_password_token: Option<String>,
    pub reset_password_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl User {
    /// A reset window is open when a token digest is present and its expiry
    /// lies strictly in the future.
    pub fn reset_window_open(&self, now: OffsetDateTime) -> bool {
        self.reset_password_token.is_some()
            && self.reset_password_expires.is_some_and(|exp| exp > now)
    }

    pub fn clear_reset(&mut self) {
        self.reset_password_token = None;
        self.reset_password_expires = None;
    }
}
