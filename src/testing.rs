//! In-memory repositories and storage for tests. They share one set of tables
//! so that deleting a user detaches its comments and files the way the
//! database foreign keys do.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    audit::repo::{AuditEvent, AuditRepo},
    auth::{
        password::Hasher,
        repo::{NewUser, ProfilePatch, Role, RoleCounts, User, UserRepo},
    },
    comments::repo::{Comment, CommentRepo, CommentView},
    files::{
        repo::{FileRecord, FileRepo, FileTotals},
        storage::StorageClient,
    },
    state::AppState,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    comments: Vec<Comment>,
    files: Vec<FileRecord>,
    audit: Vec<AuditEvent>,
}

type Shared = Arc<Mutex<Tables>>;

#[derive(Clone, Default)]
pub struct MemoryDb(Shared);

impl MemoryDb {
    pub fn users(&self) -> MemoryUsers {
        MemoryUsers(self.0.clone())
    }
    pub fn comments(&self) -> MemoryComments {
        MemoryComments(self.0.clone())
    }
    pub fn files(&self) -> MemoryFiles {
        MemoryFiles(self.0.clone())
    }
    pub fn audit(&self) -> MemoryAudit {
        MemoryAudit(self.0.clone())
    }
}

fn page<T: Clone>(rows: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    rows.skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[derive(Clone, Default)]
pub struct MemoryUsers(Shared);

impl MemoryUsers {
    pub async fn insert_with_password(
        &self,
        hasher: &Hasher,
        username: &str,
        password: &str,
        role: Role,
    ) -> User {
        let hash = hasher.hash(password.to_string()).await.unwrap();
        self.create(NewUser {
            username,
            password_hash: &hash,
            role,
            display_name: None,
        })
        .await
        .unwrap()
        .expect("username already taken in test fixture")
    }
}

fn apply(field: &mut Option<String>, patch: &Option<String>) {
    match patch.as_deref() {
        None => {}
        Some("") => *field = None,
        Some(v) => *field = Some(v.to_string()),
    }
}

#[async_trait]
impl UserRepo for MemoryUsers {
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let t = self.0.lock().unwrap();
        Ok(t.users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let t = self.0.lock().unwrap();
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn create(&self, new: NewUser<'_>) -> anyhow::Result<Option<User>> {
        let mut t = self.0.lock().unwrap();
        if t.users.iter().any(|u| u.username == new.username) {
            return Ok(None);
        }
        let user = User {
            id: Uuid::new_v4(),
            username: new.username.to_string(),
            password_hash: new.password_hash.to_string(),
            role: new.role,
            display_name: new.display_name.map(str::to_string),
            email: None,
            bio: None,
            website: None,
            created_at: OffsetDateTime::now_utc(),
            last_login_at: None,
        };
        t.users.push(user.clone());
        Ok(Some(user))
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> anyhow::Result<Option<User>> {
        let mut t = self.0.lock().unwrap();
        let Some(user) = t.users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        apply(&mut user.display_name, &patch.display_name);
        apply(&mut user.email, &patch.email);
        apply(&mut user.bio, &patch.bio);
        apply(&mut user.website, &patch.website);
        Ok(Some(user.clone()))
    }

    async fn record_login(&self, id: Uuid) -> anyhow::Result<()> {
        let mut t = self.0.lock().unwrap();
        if let Some(user) = t.users.iter_mut().find(|u| u.id == id) {
            user.last_login_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        let mut t = self.0.lock().unwrap();
        if let Some(user) = t.users.iter_mut().find(|u| u.id == id) {
            user.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>> {
        let mut t = self.0.lock().unwrap();
        Ok(t.users.iter_mut().find(|u| u.id == id).map(|u| {
            u.role = role;
            u.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut t = self.0.lock().unwrap();
        let before = t.users.len();
        t.users.retain(|u| u.id != id);
        if t.users.len() == before {
            return Ok(false);
        }
        for c in t.comments.iter_mut().filter(|c| c.author_id == Some(id)) {
            c.author_id = None;
        }
        for f in t.files.iter_mut().filter(|f| f.owner_id == Some(id)) {
            f.owner_id = None;
        }
        Ok(true)
    }

    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<User>> {
        let t = self.0.lock().unwrap();
        Ok(page(t.users.iter().cloned(), limit, offset))
    }

    async fn count_by_role(&self) -> anyhow::Result<RoleCounts> {
        let t = self.0.lock().unwrap();
        Ok(RoleCounts {
            users: t.users.len() as i64,
            admins: t.users.iter().filter(|u| u.role.is_admin()).count() as i64,
        })
    }
}

#[derive(Clone, Default)]
pub struct MemoryComments(Shared);

#[async_trait]
impl CommentRepo for MemoryComments {
    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<CommentView>> {
        let t = self.0.lock().unwrap();
        let views = t.comments.iter().rev().map(|c| CommentView {
            id: c.id,
            author_id: c.author_id,
            author_username: c
                .author_id
                .and_then(|a| t.users.iter().find(|u| u.id == a))
                .map(|u| u.username.clone()),
            content: c.content.clone(),
            created_at: c.created_at,
        });
        Ok(page(views, limit, offset))
    }

    async fn create(&self, author_id: Uuid, content: &str) -> anyhow::Result<Option<Comment>> {
        let mut t = self.0.lock().unwrap();
        if !t.users.iter().any(|u| u.id == author_id) {
            return Ok(None);
        }
        let comment = Comment {
            id: Uuid::new_v4(),
            author_id: Some(author_id),
            content: content.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        t.comments.push(comment.clone());
        Ok(Some(comment))
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Comment>> {
        let t = self.0.lock().unwrap();
        Ok(t.comments.iter().find(|c| c.id == id).cloned())
    }

    async fn delete_authorized(&self, id: Uuid, actor_id: Uuid, is_admin: bool) -> anyhow::Result<bool> {
        let mut t = self.0.lock().unwrap();
        let before = t.comments.len();
        t.comments
            .retain(|c| !(c.id == id && (is_admin || c.author_id == Some(actor_id))));
        Ok(t.comments.len() != before)
    }

    async fn count(&self) -> anyhow::Result<i64> {
        Ok(self.0.lock().unwrap().comments.len() as i64)
    }

    async fn count_by_author(&self, author_id: Uuid) -> anyhow::Result<i64> {
        let t = self.0.lock().unwrap();
        Ok(t.comments
            .iter()
            .filter(|c| c.author_id == Some(author_id))
            .count() as i64)
    }
}

#[derive(Clone, Default)]
pub struct MemoryFiles(Shared);

#[async_trait]
impl FileRepo for MemoryFiles {
    async fn insert(&self, rec: &FileRecord) -> anyhow::Result<FileRecord> {
        let mut t = self.0.lock().unwrap();
        anyhow::ensure!(
            !t.files.iter().any(|f| f.stored_name == rec.stored_name),
            "duplicate stored_name"
        );
        t.files.push(rec.clone());
        Ok(rec.clone())
    }

    async fn find_by_stored_name(&self, stored_name: &str) -> anyhow::Result<Option<FileRecord>> {
        let t = self.0.lock().unwrap();
        Ok(t.files.iter().find(|f| f.stored_name == stored_name).cloned())
    }

    async fn list_by_owner(&self, owner_id: Uuid, limit: i64, offset: i64) -> anyhow::Result<Vec<FileRecord>> {
        let t = self.0.lock().unwrap();
        let rows = t
            .files
            .iter()
            .rev()
            .filter(|f| f.owner_id == Some(owner_id))
            .cloned();
        Ok(page(rows, limit, offset))
    }

    async fn list_all(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<FileRecord>> {
        let t = self.0.lock().unwrap();
        Ok(page(t.files.iter().rev().cloned(), limit, offset))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut t = self.0.lock().unwrap();
        let before = t.files.len();
        t.files.retain(|f| f.id != id);
        Ok(t.files.len() != before)
    }

    async fn totals(&self, owner_id: Option<Uuid>) -> anyhow::Result<FileTotals> {
        let t = self.0.lock().unwrap();
        let mut totals = FileTotals::default();
        for f in t
            .files
            .iter()
            .filter(|f| owner_id.is_none() || f.owner_id == owner_id)
        {
            totals.files += 1;
            totals.bytes += f.size_bytes;
        }
        Ok(totals)
    }
}

#[derive(Clone, Default)]
pub struct MemoryAudit(Shared);

#[async_trait]
impl AuditRepo for MemoryAudit {
    async fn insert(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self.0.lock().unwrap().audit.push(event.clone());
        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<AuditEvent>> {
        let t = self.0.lock().unwrap();
        Ok(page(t.audit.iter().rev().cloned(), limit, offset))
    }

    async fn clear(&self) -> anyhow::Result<u64> {
        let mut t = self.0.lock().unwrap();
        let n = t.audit.len() as u64;
        t.audit.clear();
        Ok(n)
    }
}

/// Object store kept in a map. Like the real one it never overwrites.
#[derive(Clone, Default)]
pub struct FakeStorage(Arc<Mutex<HashMap<String, Bytes>>>);

impl FakeStorage {
    pub fn object_count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn put_object(&self, key: &str, body: Bytes) -> anyhow::Result<()> {
        let mut objects = self.0.lock().unwrap();
        anyhow::ensure!(!objects.contains_key(key), "object {} exists", key);
        objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        Ok(self.0.lock().unwrap().get(key).cloned())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.0.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Password used by [`user_with_token`].
pub const TEST_PASSWORD: &str = "test-password-123";

/// Creates a user in the fake state and returns it with an `Authorization` value.
pub async fn user_with_token(state: &AppState, username: &str, role: Role) -> (User, String) {
    let hash = state.hasher.hash(TEST_PASSWORD.to_string()).await.unwrap();
    let user = state
        .users
        .create(NewUser {
            username,
            password_hash: &hash,
            role,
            display_name: None,
        })
        .await
        .unwrap()
        .unwrap();
    let issued = state.tokens.issue(user.id, user.role).unwrap();
    (user, format!("Bearer {}", issued.token))
}
