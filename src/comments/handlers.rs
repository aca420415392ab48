use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    CommentItem, CreateCommentRequest, CreatedCommentResponse, Pagination, MAX_COMMENT_CHARS,
};
use crate::{
    audit::{self, repo::AuditKind},
    auth::{extractors::AuthUser, policy::ensure_owner_or_admin},
    error::{ApiError, AppJson, AppPath, AppQuery},
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new().route("/comments", get(list_comments))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/comments", post(create_comment))
        .route("/comments/:id", delete(delete_comment))
}

#[instrument(skip(state))]
pub async fn list_comments(
    State(state): State<AppState>,
    AppQuery(p): AppQuery<Pagination>,
) -> Result<Json<Vec<CommentItem>>, ApiError> {
    let (limit, offset) = p.clamped();
    let items = state
        .comments
        .list(limit, offset)
        .await?
        .into_iter()
        .map(CommentItem::from)
        .collect();
    Ok(Json(items))
}

/// The author is always the token subject; the body carries content only.
#[instrument(skip(state, claims, body))]
pub async fn create_comment(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    AppJson(body): AppJson<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CreatedCommentResponse>), ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError::validation("content", "must not be empty"));
    }
    if body.content.chars().count() > MAX_COMMENT_CHARS {
        return Err(ApiError::validation(
            "content",
            format!("must be at most {} characters", MAX_COMMENT_CHARS),
        ));
    }

    let comment = state
        .comments
        .create(claims.sub, &body.content)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    info!(comment_id = %comment.id, user_id = %claims.sub, "comment created");
    Ok((
        StatusCode::CREATED,
        Json(CreatedCommentResponse {
            id: comment.id,
            created_at: comment.created_at,
        }),
    ))
}

#[instrument(skip(state, claims))]
pub async fn delete_comment(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    let comment = state.comments.find(id).await?.ok_or(ApiError::NotFound)?;
    if let Err(denied) = ensure_owner_or_admin(&claims, comment.author_id) {
        let subject = format!("comment:{}", id);
        audit::record(&state, AuditKind::AccessDenied, Some(claims.sub), Some(&subject)).await;
        return Err(denied);
    }

    if !state
        .comments
        .delete_authorized(id, claims.sub, claims.is_admin())
        .await?
    {
        // Deleted concurrently between the lookup and the delete.
        warn!(comment_id = %id, "comment vanished before delete");
        return Err(ApiError::NotFound);
    }

    info!(comment_id = %id, user_id = %claims.sub, "comment deleted");
    Ok(StatusCode::NO_CONTENT)
}
