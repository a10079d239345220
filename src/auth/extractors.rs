use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{
        header::{InvalidHeaderValue, COOKIE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
};

use crate::{
    auth::{errors::AuthError, repo_types::User},
    state::AppState,
};

pub const ACCOUNT_COOKIE: &str = "accountToken";
pub const ACCOUNT_COOKIE_MAX_AGE: i64 = 60 * 60 * 24;

/// Build the account cookie carrying the raw token.
pub fn account_cookie(token: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{ACCOUNT_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ACCOUNT_COOKIE_MAX_AGE}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn clear_account_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static("accountToken=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Secure")
    } else {
        HeaderValue::from_static("accountToken=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}

pub fn read_account_cookie(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next().unwrap_or_default().trim();
            let val = parts.next().unwrap_or_default().trim();
            if key == ACCOUNT_COOKIE && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

/// Who is behind the account cookie, if anyone.
pub enum Session {
    /// No cookie at all.
    Anonymous,
    /// A cookie that no longer maps to a user.
    Stale,
    Active(User),
}

#[async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = read_account_cookie(&parts.headers) else {
            return Ok(Session::Anonymous);
        };
        match state.auth.authenticate(&token).await? {
            Some(user) => Ok(Session::Active(user)),
            None => Ok(Session::Stale),
        }
    }
}
