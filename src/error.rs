use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request,
    },
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

/// Error surfaced to HTTP clients. Anything that is not a client mistake
/// collapses into `Internal`, which only ever serializes an opaque reference.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("forbidden")]
    Forbidden,

    #[error("validation failed on {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(&'static str),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation { field, message } => json!({
                "error": "validation failed",
                "field": field,
                "message": message,
            }),
            Self::Internal(e) => {
                let reference = Uuid::new_v4();
                error!(%reference, error = ?e, "internal error");
                json!({ "error": "internal error", "reference": reference })
            }
            other => json!({ "error": other.to_string() }),
        };

        let mut res = (status, Json(body)).into_response();
        if matches!(self, Self::Unauthenticated) {
            res.headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        res
    }
}

/// `Json` extractor whose rejection is an `ApiError`, so serde's messages
/// never reach the client.
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                debug!(error = %rejection, "json body rejected");
                Err(ApiError::validation("body", "malformed or incomplete JSON body"))
            }
        }
    }
}

/// `Path` extractor with the same rejection contract as [`AppJson`].
pub struct AppPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for AppPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => {
                debug!(error = %rejection, "path rejected");
                Err(ApiError::validation("path", "invalid path parameter"))
            }
        }
    }
}

/// `Query` extractor with the same rejection contract as [`AppJson`].
pub struct AppQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => {
                debug!(error = %rejection, "query rejected");
                Err(ApiError::validation("query", "invalid query parameters"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn internal_error_hides_detail_behind_reference() {
        let err = ApiError::Internal(anyhow::anyhow!("connection refused: db.internal:5432"));
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(res).await;
        assert_eq!(body["error"], "internal error");
        assert!(body["reference"].as_str().is_some());
        assert!(!body.to_string().contains("db.internal"));
    }

    #[tokio::test]
    async fn unauthenticated_carries_bearer_challenge() {
        let res = ApiError::Unauthenticated.into_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.headers()[header::WWW_AUTHENTICATE], "Bearer");
        assert_eq!(body_json(res).await["error"], "authentication required");
    }

    #[tokio::test]
    async fn validation_reports_field() {
        let res = ApiError::validation("content", "must not be empty").into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = body_json(res).await;
        assert_eq!(body["field"], "content");
        assert_eq!(body["message"], "must not be empty");
    }

    #[tokio::test]
    async fn bad_path_and_query_become_json_validation_errors() {
        use axum::{body::Body, routing::get, Router};
        use tower::ServiceExt;

        #[derive(serde::Deserialize)]
        struct Page {
            #[allow(dead_code)]
            limit: i64,
        }

        let app = Router::new()
            .route("/items/:id", get(|AppPath(_id): AppPath<Uuid>| async { "ok" }))
            .route("/items", get(|AppQuery(_p): AppQuery<Page>| async { "ok" }));

        for (uri, field) in [("/items/not-a-uuid", "path"), ("/items?limit=abc", "query")] {
            let req = axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap();
            let res = app.clone().oneshot(req).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");
            let body = body_json(res).await;
            assert_eq!(body["field"], field);
            assert!(!body.to_string().contains("UUID parsing"));
            assert!(!body.to_string().contains("invalid digit"));
        }
    }
}
