//! Fixed set of administrative operations. There is deliberately no generic
//! query or command endpoint.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, put},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    audit::{
        self,
        repo::{AuditEvent, AuditKind},
    },
    auth::{extractors::AdminUser, repo_types::Role, PublicUser},
    comments::Pagination,
    error::{ApiError, AppPath, AppQuery},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id", delete(delete_user))
        .route("/admin/users/:id/promote", put(promote_user))
        .route("/admin/stats", get(stats))
        .route("/admin/audit", get(list_audit).delete(clear_audit))
}

#[derive(Debug, Serialize)]
pub struct Stats {
    pub users: i64,
    pub admins: i64,
    pub comments: i64,
    pub files: i64,
    pub total_file_bytes: i64,
}

#[derive(Debug, Serialize)]
pub struct Cleared {
    pub cleared: u64,
}

#[instrument(skip(state, admin))]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    AppQuery(p): AppQuery<Pagination>,
) -> Result<Json<Vec<PublicUser>>, ApiError> {
    let (limit, offset) = p.clamped();
    let users = state.users.list(limit, offset).await?;
    info!(admin_id = %admin.sub, count = users.len(), "users listed");
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

/// Removes the account and invalidates every token it still holds.
#[instrument(skip(state, admin))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    if id == admin.sub {
        return Err(ApiError::validation("id", "admins cannot delete their own account"));
    }
    if !state.users.delete(id).await? {
        return Err(ApiError::NotFound);
    }
    state.tokens.revoke_user(id);

    warn!(admin_id = %admin.sub, user_id = %id, "user deleted by admin");
    let subject = id.to_string();
    audit::record(&state, AuditKind::UserDeleted, Some(admin.sub), Some(&subject)).await;
    Ok(StatusCode::NO_CONTENT)
}

/// The promoted user's new role takes effect from their next login.
#[instrument(skip(state, admin))]
pub async fn promote_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state
        .users
        .set_role(id, Role::Admin)
        .await?
        .ok_or(ApiError::NotFound)?;

    warn!(admin_id = %admin.sub, user_id = %id, "user promoted to admin");
    let subject = id.to_string();
    audit::record(&state, AuditKind::UserPromoted, Some(admin.sub), Some(&subject)).await;
    Ok(Json(user.into()))
}

#[instrument(skip(state, _admin))]
pub async fn stats(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<Stats>, ApiError> {
    let roles = state.users.count_by_role().await?;
    let comments = state.comments.count().await?;
    let files = state.files.totals(None).await?;
    Ok(Json(Stats {
        users: roles.users,
        admins: roles.admins,
        comments,
        files: files.files,
        total_file_bytes: files.bytes,
    }))
}

#[instrument(skip(state, _admin))]
pub async fn list_audit(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    AppQuery(p): AppQuery<Pagination>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    let (limit, offset) = p.clamped();
    Ok(Json(state.audit.list(limit, offset).await?))
}

/// Empties the trail. The clear itself is the first entry of the new one.
#[instrument(skip(state, admin))]
pub async fn clear_audit(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<Json<Cleared>, ApiError> {
    let cleared = state.audit.clear().await?;
    warn!(admin_id = %admin.sub, cleared, "audit trail cleared");
    audit::record(&state, AuditKind::AuditCleared, Some(admin.sub), None).await;
    Ok(Json(Cleared { cleared }))
}
