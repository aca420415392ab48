pub mod handlers;

use crate::state::AppState;
use axum::Router;

/// Admin routes; each handler additionally requires an admin token.
pub fn protected_router() -> Router<AppState> {
    handlers::routes()
}
