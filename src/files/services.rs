use bytes::Bytes;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::repo::FileRecord;
use crate::{error::ApiError, state::AppState};

const MAX_ORIGINAL_NAME_CHARS: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("file is empty")]
    Empty,
    #[error("file exceeds {0} bytes")]
    TooLarge(usize),
    #[error("file type not allowed")]
    DisallowedType,
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::TooLarge(_) => ApiError::PayloadTooLarge,
            other => ApiError::validation("file", other.to_string()),
        }
    }
}

pub struct UploadItem {
    pub body: Bytes,
    pub original_name: Option<String>,
}

/// Derives the content type from the bytes themselves. The type declared by
/// the client is never consulted.
pub fn sniff_content_type(data: &[u8]) -> Option<&'static str> {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    if data.starts_with(PNG) {
        return Some("image/png");
    }
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if data.starts_with(b"%PDF-") {
        return Some("application/pdf");
    }
    if is_plain_text(data) {
        return Some("text/plain");
    }
    None
}

fn is_plain_text(data: &[u8]) -> bool {
    match std::str::from_utf8(data) {
        Ok(s) => !s
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t')),
        Err(_) => false,
    }
}

pub(crate) fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "application/pdf" => Some("pdf"),
        "text/plain" => Some("txt"),
        _ => None,
    }
}

/// Reduces a client-supplied file name to a display-only basename.
pub fn sanitize_original_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_ORIGINAL_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn check_upload(data: &[u8], max_bytes: usize) -> Result<&'static str, UploadError> {
    if data.is_empty() {
        return Err(UploadError::Empty);
    }
    if data.len() > max_bytes {
        return Err(UploadError::TooLarge(max_bytes));
    }
    sniff_content_type(data).ok_or(UploadError::DisallowedType)
}

/// Validates, stores bytes under a fresh server-generated name, then records
/// the metadata. A failed insert removes the stored bytes again.
pub async fn store_upload(
    st: &AppState,
    owner_id: Uuid,
    item: UploadItem,
) -> Result<FileRecord, ApiError> {
    let content_type = check_upload(&item.body, st.config.uploads.max_bytes)?;
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    let id = Uuid::new_v4();
    let stored_name = format!("{}.{}", id, ext);
    let original_name = sanitize_original_name(item.original_name.as_deref().unwrap_or(""));
    let size_bytes = item.body.len() as i64;

    st.storage.put_object(&stored_name, item.body).await?;

    let record = FileRecord {
        id,
        stored_name: stored_name.clone(),
        original_name,
        content_type: content_type.to_string(),
        size_bytes,
        owner_id: Some(owner_id),
        created_at: time::OffsetDateTime::now_utc(),
    };
    let record = match st.files.insert(&record).await {
        Ok(r) => r,
        Err(e) => {
            if let Err(cleanup) = st.storage.delete_object(&stored_name).await {
                error!(error = %cleanup, %stored_name, "orphaned upload after failed insert");
            }
            return Err(e.into());
        }
    };

    info!(file_id = %record.id, user_id = %owner_id, content_type, size_bytes, "file stored");
    Ok(record)
}

/// Stores every item or none. All items are checked before any byte is
/// written; a storage or insert failure midway removes what was already kept.
pub async fn store_batch(
    st: &AppState,
    owner_id: Uuid,
    items: Vec<UploadItem>,
) -> Result<Vec<FileRecord>, ApiError> {
    for item in &items {
        check_upload(&item.body, st.config.uploads.max_bytes)?;
    }

    let mut stored: Vec<FileRecord> = Vec::with_capacity(items.len());
    for item in items {
        match store_upload(st, owner_id, item).await {
            Ok(record) => stored.push(record),
            Err(e) => {
                warn!(user_id = %owner_id, kept = stored.len(), "batch upload failed, rolling back");
                for record in &stored {
                    discard(st, record).await;
                }
                return Err(e);
            }
        }
    }
    Ok(stored)
}

async fn discard(st: &AppState, record: &FileRecord) {
    if let Err(e) = st.files.delete(record.id).await {
        error!(error = %e, file_id = %record.id, "rollback left a file record behind");
    }
    if let Err(e) = st.storage.delete_object(&record.stored_name).await {
        error!(error = %e, stored_name = %record.stored_name, "rollback left stored bytes behind");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_allowed_types_from_magic_bytes() {
        assert_eq!(sniff_content_type(b"\x89PNG\r\n\x1a\n...."), Some("image/png"));
        assert_eq!(sniff_content_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_content_type(b"GIF89a...."), Some("image/gif"));
        assert_eq!(sniff_content_type(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_content_type(b"%PDF-1.7\n"), Some("application/pdf"));
        assert_eq!(sniff_content_type(b"hello\nworld\t!"), Some("text/plain"));
    }

    #[test]
    fn rejects_executables_and_binary_blobs() {
        assert_eq!(sniff_content_type(b"\x7fELF\x02\x01\x01"), None);
        assert_eq!(sniff_content_type(b"MZ\x90\x00"), None);
        assert_eq!(sniff_content_type(&[0, 159, 146, 150]), None);
    }

    #[test]
    fn script_text_is_only_ever_text_plain() {
        // Served back as text/plain attachment, never as HTML or JS.
        assert_eq!(
            sniff_content_type(b"<script>alert(1)</script>"),
            Some("text/plain")
        );
    }

    #[test]
    fn ext_from_mime_covers_allowlist() {
        for ct in ["image/png", "image/jpeg", "image/gif", "image/webp", "application/pdf", "text/plain"] {
            assert!(ext_from_mime(ct).is_some(), "{ct}");
        }
        assert_eq!(ext_from_mime("application/x-sh"), None);
    }

    #[test]
    fn original_name_is_reduced_to_basename() {
        assert_eq!(sanitize_original_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_original_name("C:\\Users\\me\\cv.pdf"), "cv.pdf");
        assert_eq!(sanitize_original_name("a\u{0}b\nc.txt"), "abc.txt");
        assert_eq!(sanitize_original_name(".."), "upload");
        assert_eq!(sanitize_original_name(""), "upload");
        assert_eq!(sanitize_original_name(&"x".repeat(400)).chars().count(), 255);
    }

    #[test]
    fn check_upload_limits() {
        assert_eq!(check_upload(b"", 10), Err(UploadError::Empty));
        assert_eq!(check_upload(b"0123456789abc", 10), Err(UploadError::TooLarge(10)));
        assert_eq!(check_upload(b"\x7fELF", 10), Err(UploadError::DisallowedType));
        assert_eq!(check_upload(b"plain", 10), Ok("text/plain"));
    }

    fn item(body: &'static [u8]) -> UploadItem {
        UploadItem {
            body: Bytes::from_static(body),
            original_name: Some("a.txt".into()),
        }
    }

    #[tokio::test]
    async fn batch_with_one_bad_item_stores_nothing() {
        let st = AppState::fake();
        let owner = Uuid::new_v4();
        let err = store_batch(&st, owner, vec![item(b"fine"), item(b"\x7fELF")])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation { field: "file", .. }));
        assert_eq!(st.files.totals(Some(owner)).await.unwrap().files, 0);
    }

    #[tokio::test]
    async fn batch_failing_midway_rolls_back_earlier_items() {
        use crate::files::storage::StorageClient;
        use async_trait::async_trait;
        use std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        };

        // Accepts the first write, refuses the rest.
        struct SecondWriteFails {
            inner: crate::testing::FakeStorage,
            writes: AtomicUsize,
        }

        #[async_trait]
        impl StorageClient for SecondWriteFails {
            async fn put_object(&self, key: &str, body: Bytes) -> anyhow::Result<()> {
                anyhow::ensure!(self.writes.fetch_add(1, Ordering::SeqCst) == 0, "disk full");
                self.inner.put_object(key, body).await
            }
            async fn get_object(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
                self.inner.get_object(key).await
            }
            async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
                self.inner.delete_object(key).await
            }
        }

        let inner = crate::testing::FakeStorage::default();
        let mut st = AppState::fake();
        st.storage = Arc::new(SecondWriteFails {
            inner: inner.clone(),
            writes: AtomicUsize::new(0),
        });
        let owner = Uuid::new_v4();

        let err = store_batch(&st, owner, vec![item(b"one"), item(b"two")])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(st.files.totals(Some(owner)).await.unwrap().files, 0);
        assert_eq!(inner.object_count(), 0);
    }
}
