use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

pub use crate::auth::repo_types::{NewUser, ProfilePatch, Role, RoleCounts, User};

const USER_COLUMNS: &str = "id, username, password_hash, role, display_name, email, bio, website, created_at, last_login_at";

/// Persistence contract for accounts. Every write is a single statement.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    /// Returns `None` when the username is already taken.
    async fn create(&self, new: NewUser<'_>) -> anyhow::Result<Option<User>>;
    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> anyhow::Result<Option<User>>;
    async fn record_login(&self, id: Uuid) -> anyhow::Result<()>;
    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<User>>;
    async fn count_by_role(&self) -> anyhow::Result<RoleCounts>;
}

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .context("find user by username")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, new: NewUser<'_>) -> anyhow::Result<Option<User>> {
        let res = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, username, password_hash, role, display_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.username)
        .bind(new.password_hash)
        .bind(new.role)
        .bind(new.display_name)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(user) => Ok(Some(user)),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context("insert user")),
        }
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET
                display_name = CASE WHEN $2::text IS NULL THEN display_name ELSE NULLIF($2, '') END,
                email        = CASE WHEN $3::text IS NULL THEN email        ELSE NULLIF($3, '') END,
                bio          = CASE WHEN $4::text IS NULL THEN bio          ELSE NULLIF($4, '') END,
                website      = CASE WHEN $5::text IS NULL THEN website      ELSE NULLIF($5, '') END
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.display_name.as_deref())
        .bind(patch.email.as_deref())
        .bind(patch.bio.as_deref())
        .bind(patch.website.as_deref())
        .fetch_optional(&self.db)
        .await
        .context("update profile")?;
        Ok(user)
    }

    async fn record_login(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET last_login_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("record login")?;
        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await
            .context("update password hash")?;
        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role)
        .fetch_optional(&self.db)
        .await
        .context("set role")?;
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        // comments.author_id and files.owner_id are ON DELETE SET NULL
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(res.rows_affected() == 1)
    }

    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            ORDER BY created_at ASC, id ASC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        Ok(rows)
    }

    async fn count_by_role(&self) -> anyhow::Result<RoleCounts> {
        let (users, admins): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE role = 'admin')
            FROM users
            "#,
        )
        .fetch_one(&self.db)
        .await
        .context("count users")?;
        Ok(RoleCounts { users, admins })
    }
}
