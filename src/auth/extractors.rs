use axum::{
    async_trait,
    extract::{FromRequestParts, OriginalUri, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::{claims::Claims, jwt::TokenService, repo_types::Role};
use crate::{
    audit::{self, repo::AuditKind},
    error::ApiError,
    state::AppState,
};

/// Authentication gate for protected routes.
///
/// The token is read from `Authorization: Bearer` only. Every failure maps to
/// the same `ApiError::Unauthenticated`; the reason stays in the server log.
pub async fn authenticate(
    State(tokens): State<TokenService>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = bearer_token(req.headers()) else {
        warn!(path = %req.uri().path(), "missing or non-bearer authorization");
        return Err(ApiError::Unauthenticated);
    };

    let claims = tokens.verify(token).map_err(|e| {
        warn!(reason = %e, path = %req.uri().path(), "token rejected");
        ApiError::Unauthenticated
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Verified claims attached by [`authenticate`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(AuthUser)
            .ok_or(ApiError::Unauthenticated)
    }
}

/// Verified claims of an account that is an admin both in the token and in
/// the store. A demoted or deleted admin loses access before the token expires.
#[derive(Debug, Clone)]
pub struct AdminUser(pub Claims);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(claims) = AuthUser::from_request_parts(parts, state).await?;
        let Some(user) = state.users.find_by_id(claims.sub).await? else {
            warn!(user_id = %claims.sub, "token subject no longer exists");
            return Err(ApiError::Unauthenticated);
        };

        let denied = match super::policy::ensure_admin(&claims) {
            Err(e) => Some(e),
            Ok(()) if user.role != Role::Admin => {
                warn!(user_id = %claims.sub, stored_role = ?user.role, "admin claim outlived stored role");
                Some(ApiError::Forbidden)
            }
            Ok(()) => None,
        };
        if let Some(e) = denied {
            let path = parts
                .extensions
                .get::<OriginalUri>()
                .map_or_else(|| parts.uri.path().to_owned(), |u| u.path().to_owned());
            audit::record(state, AuditKind::AccessDenied, Some(claims.sub), Some(&path)).await;
            return Err(e);
        }
        Ok(AdminUser(claims))
    }
}
