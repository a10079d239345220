use axum::{
    extract::{Path, State},
    http::{
        header::{HOST, SET_COOKIE},
        HeaderMap, StatusCode,
    },
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{
            ForgotPasswordRequest, LoginRequest, MessageResponse, ResetPasswordRequest,
            SignupRequest,
        },
        errors::{AuthError, AuthResult},
        extractors::{account_cookie, clear_account_cookie, Session},
    },
    config::AppConfig,
    pages,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/verify-email/:token", get(verify_email))
        .route("/login", get(login_page).post(login))
        .route("/logout", post(logout))
        .route("/forgot-password", post(forgot_password))
        .route(
            "/reset-password/:token",
            get(reset_password_page).post(reset_password),
        )
}

pub fn page_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(|| async { Redirect::to("/login") }))
        .route("/dashboard", get(dashboard))
}

/// Base for mailed links: the configured public URL, else the request's Host.
fn base_url(config: &AppConfig, headers: &HeaderMap) -> String {
    if let Some(url) = &config.public_base_url {
        return url.clone();
    }
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

fn with_account_cookie(
    state: &AppState,
    token: &str,
    message: &str,
) -> AuthResult<Response> {
    let cookie = account_cookie(token, state.config.cookie_secure)
        .map_err(|e| AuthError::Internal(e.into()))?;
    Ok(([(SET_COOKIE, cookie)], Json(MessageResponse::new(message))).into_response())
}

#[instrument(skip(state, headers, payload))]
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SignupRequest>,
) -> AuthResult<Response> {
    let base = base_url(&state.config, &headers);
    let outcome = state
        .auth
        .signup(&payload.username, &payload.email, &payload.password, &base)
        .await?;
    let cookie = account_cookie(&outcome.signed.account_token, state.config.cookie_secure)
        .map_err(|e| AuthError::Internal(e.into()))?;
    // The record exists either way, so a failed mail still answers with the cookie.
    let body = match outcome.mail {
        Ok(()) => Json(MessageResponse::new(
            "Signup successful! Please check your email for verification.",
        ))
        .into_response(),
        Err(e) => e.into_response(),
    };
    Ok(([(SET_COOKIE, cookie)], body).into_response())
}

#[instrument(skip(state, token))]
pub async fn verify_email(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    match state.auth.verify_email(&token).await {
        Ok(_) => Redirect::to("/dashboard").into_response(),
        Err(e) => e.into_text_response(),
    }
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AuthResult<Response> {
    let signed = state.auth.login(&payload.username, &payload.password).await?;
    with_account_cookie(&state, &signed.account_token, "Logged in successfully!")
}

#[instrument(skip(state, session))]
pub async fn login_page(State(state): State<AppState>, session: Session) -> Response {
    match session {
        Session::Active(user) if user.email_verified => Redirect::to("/dashboard").into_response(),
        Session::Stale => (
            [(SET_COOKIE, clear_account_cookie(state.config.cookie_secure))],
            Html(pages::login()),
        )
            .into_response(),
        _ => Html(pages::login()).into_response(),
    }
}

#[instrument(skip(state))]
pub async fn logout(State(state): State<AppState>) -> Response {
    (
        [(SET_COOKIE, clear_account_cookie(state.config.cookie_secure))],
        Json(MessageResponse::new("Logged out")),
    )
        .into_response()
}

#[instrument(skip(state, session))]
pub async fn dashboard(State(state): State<AppState>, session: Session) -> Response {
    match session {
        Session::Anonymous => Redirect::to("/login").into_response(),
        Session::Stale => (
            [(SET_COOKIE, clear_account_cookie(state.config.cookie_secure))],
            Redirect::to("/login"),
        )
            .into_response(),
        Session::Active(user) if !user.email_verified => Redirect::to("/login").into_response(),
        Session::Active(user) => {
            info!(user_id = %user.id, "dashboard");
            Html(pages::dashboard(&user.username)).into_response()
        }
    }
}

#[instrument(skip(state, headers, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    let base = base_url(&state.config, &headers);
    state.auth.forgot_password(&payload.email, &base).await?;
    Ok(Json(MessageResponse::new(
        "Password reset email sent successfully",
    )))
}

#[instrument(skip(state, token))]
pub async fn reset_password_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    match state.auth.check_reset_token(&token).await {
        Ok(_) => Html(pages::reset_password(&token)).into_response(),
        Err(e) => e.into_text_response(),
    }
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AuthResult<(StatusCode, Json<MessageResponse>)> {
    state
        .auth
        .reset_password(&token, &payload.new_password)
        .await?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new(
            "Password has been reset, redirecting to login page....",
        )),
    ))
}
