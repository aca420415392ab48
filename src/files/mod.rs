mod dto;
pub mod handlers;
pub mod repo;
pub mod services;
pub mod storage;

use crate::state::AppState;
use axum::Router;

/// All file routes need a token.
pub fn protected_router(max_upload_bytes: usize) -> Router<AppState> {
    handlers::routes(max_upload_bytes)
}
