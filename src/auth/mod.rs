use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod errors;
pub(crate) mod extractors;
pub mod handlers;
pub mod memory;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod tokens;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::page_routes())
}
