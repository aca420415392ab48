use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::FileRecord;

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub stored_name: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub owner_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<FileRecord> for FileResponse {
    fn from(r: FileRecord) -> Self {
        Self {
            id: r.id,
            stored_name: r.stored_name,
            original_name: r.original_name,
            content_type: r.content_type,
            size_bytes: r.size_bytes,
            owner_id: r.owner_id,
            created_at: r.created_at,
        }
    }
}
