use crate::state::AppState;
use axum::Router;

pub mod claims;
mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod policy;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use dto::PublicUser;

/// Routes reachable without a token.
pub fn public_router() -> Router<AppState> {
    handlers::auth_routes()
}

/// Routes that require [`extractors::authenticate`] in front of them.
pub fn protected_router() -> Router<AppState> {
    handlers::me_routes()
}
