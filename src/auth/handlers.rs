use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    audit::{self, repo::AuditKind},
    auth::{
        dto::{AuthResponse, DashboardResponse, LoginRequest, PublicUser, RegisterRequest},
        extractors::AuthUser,
        repo_types::{NewUser, ProfilePatch, Role, User},
        services::{
            normalize_profile, validate_display_name, validate_password, validate_username,
            verify_credentials,
        },
    },
    error::{ApiError, AppJson},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/login", post(login))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/logout", post(logout))
        .route("/me", get(get_me).delete(delete_me))
        .route("/me/profile", put(update_profile))
        .route("/dashboard", get(dashboard))
}

fn auth_response(state: &AppState, user: User) -> Result<AuthResponse, ApiError> {
    let issued = state.tokens.issue(user.id, user.role)?;
    Ok(AuthResponse {
        token: issued.token,
        token_type: "Bearer",
        expires_at: issued.expires_at,
        user: user.into(),
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    validate_username(&payload.username)?;
    validate_password(&payload.password)?;
    let display_name = payload
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    if let Some(name) = display_name {
        validate_display_name(name)?;
    }

    let hash = state.hasher.hash(payload.password.clone()).await?;
    let user = state
        .users
        .create(NewUser {
            username: &payload.username,
            password_hash: &hash,
            role: Role::User,
            display_name,
        })
        .await?
        .ok_or_else(|| {
            warn!(username = %payload.username, "username already registered");
            ApiError::Conflict("username unavailable")
        })?;

    info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(auth_response(&state, user)?)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = match verify_credentials(
        state.users.as_ref(),
        &state.hasher,
        &payload.username,
        &payload.password,
    )
    .await
    {
        Ok(user) => user,
        Err(e) => {
            warn!("login rejected");
            audit::record(&state, AuditKind::LoginFailed, None, Some(&payload.username)).await;
            return Err(e.into());
        }
    };

    state.users.record_login(user.id).await?;
    let user = state.users.find_by_id(user.id).await?.unwrap_or(user);

    info!(user_id = %user.id, "user logged in");
    Ok(Json(auth_response(&state, user)?))
}

#[instrument(skip(state, claims))]
pub async fn logout(State(state): State<AppState>, AuthUser(claims): AuthUser) -> StatusCode {
    state.tokens.revoke(&claims);
    info!(user_id = %claims.sub, "token revoked");
    StatusCode::NO_CONTENT
}

#[instrument(skip(state, claims))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    Ok(Json(user.into()))
}

/// Only profile fields are read from the body; anything else (role, id) is ignored.
#[instrument(skip(state, claims, patch))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    AppJson(patch): AppJson<ProfilePatch>,
) -> Result<Json<PublicUser>, ApiError> {
    let patch = normalize_profile(patch)?;
    let user = state
        .users
        .update_profile(claims.sub, &patch)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    info!(user_id = %user.id, "profile updated");
    Ok(Json(user.into()))
}

#[instrument(skip(state, claims))]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<StatusCode, ApiError> {
    if claims.is_admin() {
        return Err(ApiError::validation(
            "id",
            "admin accounts cannot delete themselves",
        ));
    }
    if !state.users.delete(claims.sub).await? {
        return Err(ApiError::Unauthenticated);
    }
    state.tokens.revoke(&claims);
    state.tokens.revoke_user(claims.sub);
    info!(user_id = %claims.sub, "account deleted");
    audit::record(&state, AuditKind::AccountDeleted, Some(claims.sub), None).await;
    Ok(StatusCode::NO_CONTENT)
}

/// The caller's own activity summary. No server or configuration details.
#[instrument(skip(state, claims))]
pub async fn dashboard(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<DashboardResponse>, ApiError> {
    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    let comment_count = state.comments.count_by_author(claims.sub).await?;
    let files = state.files.totals(Some(claims.sub)).await?;
    Ok(Json(DashboardResponse {
        user: user.into(),
        comment_count,
        file_count: files.files,
        total_file_bytes: files.bytes,
    }))
}
