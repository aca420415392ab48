use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub author_id: Option<Uuid>, // NULL once the author account is deleted
    pub content: String,
    pub created_at: OffsetDateTime,
}

/// Comment joined with its author's username for listings.
#[derive(Debug, Clone, FromRow)]
pub struct CommentView {
    pub id: Uuid,
    pub author_id: Option<Uuid>,
    pub author_username: Option<String>,
    pub content: String,
    pub created_at: OffsetDateTime,
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<CommentView>>;
    /// Returns `None` if the author no longer exists.
    async fn create(&self, author_id: Uuid, content: &str) -> anyhow::Result<Option<Comment>>;
    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Comment>>;
    /// Deletes only if `actor_id` is the author or `is_admin` holds; the
    /// permission is re-checked inside the statement itself.
    async fn delete_authorized(&self, id: Uuid, actor_id: Uuid, is_admin: bool) -> anyhow::Result<bool>;
    async fn count(&self) -> anyhow::Result<i64>;
    async fn count_by_author(&self, author_id: Uuid) -> anyhow::Result<i64>;
}

#[derive(Clone)]
pub struct PgCommentRepo {
    db: PgPool,
}

impl PgCommentRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CommentRepo for PgCommentRepo {
    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<CommentView>> {
        let rows = sqlx::query_as::<_, CommentView>(
            r#"
            SELECT c.id, c.author_id, u.username AS author_username, c.content, c.created_at
            FROM comments c
            LEFT JOIN users u ON u.id = c.author_id
            ORDER BY c.created_at DESC, c.id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list comments")?;
        Ok(rows)
    }

    async fn create(&self, author_id: Uuid, content: &str) -> anyhow::Result<Option<Comment>> {
        let row = sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO comments (id, author_id, content)
            SELECT $1, u.id, $3 FROM users u WHERE u.id = $2
            RETURNING id, author_id, content, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(author_id)
        .bind(content)
        .fetch_optional(&self.db)
        .await
        .context("insert comment")?;
        Ok(row)
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Comment>> {
        let row = sqlx::query_as::<_, Comment>(
            "SELECT id, author_id, content, created_at FROM comments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find comment")?;
        Ok(row)
    }

    async fn delete_authorized(&self, id: Uuid, actor_id: Uuid, is_admin: bool) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "DELETE FROM comments WHERE id = $1 AND ($3 OR author_id = $2)",
        )
        .bind(id)
        .bind(actor_id)
        .bind(is_admin)
        .execute(&self.db)
        .await
        .context("delete comment")?;
        Ok(res.rows_affected() == 1)
    }

    async fn count(&self) -> anyhow::Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM comments")
            .fetch_one(&self.db)
            .await
            .context("count comments")?;
        Ok(n)
    }

    async fn count_by_author(&self, author_id: Uuid) -> anyhow::Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM comments WHERE author_id = $1")
            .bind(author_id)
            .fetch_one(&self.db)
            .await
            .context("count comments by author")?;
        Ok(n)
    }
}
