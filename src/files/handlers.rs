use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::{
    dto::FileResponse,
    repo::FileRecord,
    services::{store_batch, store_upload, UploadItem},
    storage::{resolve_in_root, PathError},
};
use crate::{
    audit::{self, repo::AuditKind},
    auth::{claims::Claims, extractors::AuthUser, policy::can_access},
    comments::Pagination,
    error::{ApiError, AppPath, AppQuery},
    state::AppState,
};

/// Multipart framing allowance on top of the file size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub const MAX_BATCH_FILES: usize = 10;

pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    let batch_limit = max_upload_bytes * MAX_BATCH_FILES + MULTIPART_OVERHEAD;
    Router::new()
        .route("/files", post(upload_file).get(list_files))
        .route(
            "/files/batch",
            post(upload_batch).layer(DefaultBodyLimit::max(batch_limit)),
        )
        .route("/files/:name", get(download_file).delete(delete_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD))
}

impl From<PathError> for ApiError {
    fn from(e: PathError) -> Self {
        match e {
            PathError::Traversal => ApiError::validation("name", "invalid file name"),
            PathError::InvalidName => ApiError::NotFound,
        }
    }
}

/// Loads the record for `name` if the caller may see it. Records owned by
/// someone else are reported as missing.
async fn authorized_record(
    state: &AppState,
    claims: &Claims,
    name: &str,
) -> Result<FileRecord, ApiError> {
    if let Err(e) = resolve_in_root(&state.config.uploads.root, name) {
        warn!(user_id = %claims.sub, reason = %e, "file name rejected");
        return Err(e.into());
    }

    let record = state
        .files
        .find_by_stored_name(name)
        .await?
        .ok_or(ApiError::NotFound)?;
    if !can_access(claims, record.owner_id) {
        warn!(user_id = %claims.sub, file_id = %record.id, "file access denied");
        let subject = format!("file:{}", record.id);
        audit::record(state, AuditKind::AccessDenied, Some(claims.sub), Some(&subject)).await;
        return Err(ApiError::NotFound);
    }
    Ok(record)
}

/// POST /files (multipart, single field `file`)
#[instrument(skip(state, claims, mp))]
pub async fn upload_file(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<FileResponse>), ApiError> {
    let mut items = collect_uploads(&claims, mp, "file", 1).await?;
    let item = items
        .pop()
        .ok_or_else(|| ApiError::validation("file", "is required"))?;
    let record = store_upload(&state, claims.sub, item).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// POST /files/batch (multipart, repeated field `files`). Either every file
/// is stored or none is.
#[instrument(skip(state, claims, mp))]
pub async fn upload_batch(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<Vec<FileResponse>>), ApiError> {
    let items = collect_uploads(&claims, mp, "files", MAX_BATCH_FILES).await?;
    if items.is_empty() {
        return Err(ApiError::validation("files", "is required"));
    }
    let records = store_batch(&state, claims.sub, items).await?;
    Ok((
        StatusCode::CREATED,
        Json(records.into_iter().map(FileResponse::from).collect()),
    ))
}

/// Reads up to `max` parts named `field_name`. Any other part rejects the request.
async fn collect_uploads(
    claims: &Claims,
    mp: Result<Multipart, MultipartRejection>,
    field_name: &'static str,
    max: usize,
) -> Result<Vec<UploadItem>, ApiError> {
    let mut mp = mp.map_err(|_| ApiError::validation("body", "expected multipart/form-data"))?;

    let mut items = Vec::new();
    loop {
        let field = match mp.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e)),
        };

        if field.name() != Some(field_name) {
            warn!(user_id = %claims.sub, field = ?field.name(), "unexpected upload field");
            return Err(ApiError::validation(
                "body",
                format!("only `{}` fields are accepted", field_name),
            ));
        }
        if items.len() == max {
            return Err(ApiError::validation(
                field_name,
                format!("at most {} file(s) per request", max),
            ));
        }

        let original_name = field.file_name().map(str::to_string);
        let body = field.bytes().await.map_err(multipart_error)?;
        items.push(UploadItem {
            body,
            original_name,
        });
    }
    Ok(items)
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::validation("body", "malformed multipart body")
    }
}

/// GET /files: the caller's own files, or every file for admins.
#[instrument(skip(state, claims))]
pub async fn list_files(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    AppQuery(p): AppQuery<Pagination>,
) -> Result<Json<Vec<FileResponse>>, ApiError> {
    let (limit, offset) = p.clamped();
    let rows = if claims.is_admin() {
        state.files.list_all(limit, offset).await?
    } else {
        state.files.list_by_owner(claims.sub, limit, offset).await?
    };
    Ok(Json(rows.into_iter().map(FileResponse::from).collect()))
}

#[instrument(skip(state, claims))]
pub async fn download_file(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    AppPath(name): AppPath<String>,
) -> Result<Response, ApiError> {
    let record = authorized_record(&state, &claims, &name).await?;
    let body = state
        .storage
        .get_object(&record.stored_name)
        .await?
        .ok_or_else(|| {
            warn!(file_id = %record.id, "file record without stored bytes");
            ApiError::NotFound
        })?;

    let content_type = HeaderValue::from_str(&record.content_type)
        .map_err(|e| anyhow::anyhow!("stored content type: {}", e))?;
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        record.stored_name
    ))
    .map_err(|e| anyhow::anyhow!("content disposition: {}", e))?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (
                header::CONTENT_SECURITY_POLICY,
                HeaderValue::from_static("default-src 'none'; sandbox"),
            ),
        ],
        body,
    )
        .into_response())
}

#[instrument(skip(state, claims))]
pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    AppPath(name): AppPath<String>,
) -> Result<StatusCode, ApiError> {
    let record = authorized_record(&state, &claims, &name).await?;
    // Bytes go first: a failure here leaves the record intact and retryable.
    state.storage.delete_object(&record.stored_name).await?;
    if !state.files.delete(record.id).await? {
        return Err(ApiError::NotFound);
    }
    info!(file_id = %record.id, user_id = %claims.sub, "file deleted");
    Ok(StatusCode::NO_CONTENT)
}
