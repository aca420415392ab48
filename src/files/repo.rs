use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

const FILE_COLUMNS: &str =
    "id, stored_name, original_name, content_type, size_bytes, owner_id, created_at";

/// Metadata for one uploaded file. The bytes live at `<upload root>/<stored_name>`.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FileRecord {
    pub id: Uuid,
    pub stored_name: String,   // server-generated `<uuid>.<ext>`
    pub original_name: String, // display only
    pub content_type: String,  // sniffed server-side
    pub size_bytes: i64,
    pub owner_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FileTotals {
    pub files: i64,
    pub bytes: i64,
}

#[async_trait]
pub trait FileRepo: Send + Sync {
    async fn insert(&self, rec: &FileRecord) -> anyhow::Result<FileRecord>;
    async fn find_by_stored_name(&self, stored_name: &str) -> anyhow::Result<Option<FileRecord>>;
    async fn list_by_owner(&self, owner_id: Uuid, limit: i64, offset: i64) -> anyhow::Result<Vec<FileRecord>>;
    async fn list_all(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<FileRecord>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
    async fn totals(&self, owner_id: Option<Uuid>) -> anyhow::Result<FileTotals>;
}

#[derive(Clone)]
pub struct PgFileRepo {
    db: PgPool,
}

impl PgFileRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FileRepo for PgFileRepo {
    async fn insert(&self, rec: &FileRecord) -> anyhow::Result<FileRecord> {
        let row = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            INSERT INTO files (id, stored_name, original_name, content_type, size_bytes, owner_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(rec.id)
        .bind(&rec.stored_name)
        .bind(&rec.original_name)
        .bind(&rec.content_type)
        .bind(rec.size_bytes)
        .bind(rec.owner_id)
        .fetch_one(&self.db)
        .await
        .context("insert file record")?;
        Ok(row)
    }

    async fn find_by_stored_name(&self, stored_name: &str) -> anyhow::Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE stored_name = $1"
        ))
        .bind(stored_name)
        .fetch_optional(&self.db)
        .await
        .context("find file record")?;
        Ok(row)
    }

    async fn list_by_owner(&self, owner_id: Uuid, limit: i64, offset: i64) -> anyhow::Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            SELECT {FILE_COLUMNS}
            FROM files
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list files by owner")?;
        Ok(rows)
    }

    async fn list_all(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            SELECT {FILE_COLUMNS}
            FROM files
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list files")?;
        Ok(rows)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete file record")?;
        Ok(res.rows_affected() == 1)
    }

    async fn totals(&self, owner_id: Option<Uuid>) -> anyhow::Result<FileTotals> {
        let (files, bytes): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(size_bytes), 0)::BIGINT
            FROM files
            WHERE $1::uuid IS NULL OR owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.db)
        .await
        .context("file totals")?;
        Ok(FileTotals { files, bytes })
    }
}
