mod dto;
pub mod handlers;
pub mod repo;

pub use dto::Pagination;

use crate::state::AppState;
use axum::Router;

pub fn public_router() -> Router<AppState> {
    handlers::read_routes()
}

pub fn protected_router() -> Router<AppState> {
    handlers::write_routes()
}
