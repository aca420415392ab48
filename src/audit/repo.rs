use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Security-relevant event kinds. There is no free-form message column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "audit_kind", rename_all = "snake_case")]
pub enum AuditKind {
    LoginFailed,
    AccessDenied,
    AccountDeleted,
    UserDeleted,
    UserPromoted,
    AuditCleared,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: AuditKind,
    pub actor_id: Option<Uuid>, // None for anonymous requests
    pub subject: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, actor_id: Option<Uuid>, subject: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            actor_id,
            subject,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[async_trait]
pub trait AuditRepo: Send + Sync {
    async fn insert(&self, event: &AuditEvent) -> anyhow::Result<()>;
    /// Newest first.
    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<AuditEvent>>;
    async fn clear(&self) -> anyhow::Result<u64>;
}

#[derive(Clone)]
pub struct PgAuditRepo {
    db: PgPool,
}

impl PgAuditRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditRepo for PgAuditRepo {
    async fn insert(&self, event: &AuditEvent) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (id, kind, actor_id, subject, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.id)
        .bind(event.kind)
        .bind(event.actor_id)
        .bind(event.subject.as_deref())
        .bind(event.created_at)
        .execute(&self.db)
        .await
        .context("insert audit event")?;
        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEvent>(
            r#"
            SELECT id, kind, actor_id, subject, created_at
            FROM audit_events
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list audit events")?;
        Ok(rows)
    }

    async fn clear(&self) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM audit_events")
            .execute(&self.db)
            .await
            .context("clear audit events")?;
        Ok(res.rows_affected())
    }
}
