use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::CommentView;

pub const MAX_COMMENT_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedCommentResponse {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Comment as returned to clients. `content` is untrusted text and is
/// returned exactly as stored; rendering must encode it.
#[derive(Debug, Serialize)]
pub struct CommentItem {
    pub id: Uuid,
    pub author_id: Option<Uuid>,
    pub author_username: Option<String>,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<CommentView> for CommentItem {
    fn from(c: CommentView) -> Self {
        Self {
            id: c.id,
            author_id: c.author_id,
            author_username: c.author_username,
            content: c.content,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}
fn default_limit() -> i64 { 20 }

impl Pagination {
    pub fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, 100), self.offset.max(0))
    }
}
