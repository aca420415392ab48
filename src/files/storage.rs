use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};

lazy_static! {
    /// Shape of every server-generated stored name: `<uuid>.<ext>`.
    static ref STORED_NAME_RE: Regex =
        Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\.[a-z0-9]{1,8}$")
            .unwrap();
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path traversal attempt")]
    Traversal,
    #[error("not a stored file name")]
    InvalidName,
}

/// Resolves `name` to a direct child of `root`, or rejects it.
///
/// Nothing is clamped or rewritten; any name that is not exactly a stored
/// name is an error. No filesystem access happens here.
pub fn resolve_in_root(root: &Path, name: &str) -> Result<PathBuf, PathError> {
    if name.is_empty()
        || name.contains(['/', '\\', '\0'])
        || name.split(['/', '\\']).any(|seg| seg == "..")
        || name.starts_with('.')
    {
        return Err(PathError::Traversal);
    }

    let candidate = Path::new(name);
    let mut components = candidate.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(PathError::Traversal),
    }

    if !STORED_NAME_RE.is_match(name) {
        return Err(PathError::InvalidName);
    }

    let resolved = root.join(candidate);
    if resolved.parent() != Some(root) {
        return Err(PathError::Traversal);
    }
    Ok(resolved)
}

/// Byte storage for uploads, addressed by stored name.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes) -> anyhow::Result<()>;
    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Bytes>>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
}

/// Flat directory of uploads under a single fixed root.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub async fn new(root: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(root)
            .await
            .with_context(|| format!("create upload root {}", root.display()))?;
        let root = fs::canonicalize(root)
            .await
            .with_context(|| format!("canonicalize upload root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        resolve_in_root(&self.root, key).map_err(|e| anyhow::anyhow!("storage key {:?}: {}", key, e))
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(&self, key: &str, body: Bytes) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .with_context(|| format!("create {}", key))?;
        file.write_all(&body).await.with_context(|| format!("write {}", key))?;
        file.sync_all().await.with_context(|| format!("sync {}", key))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context(format!("read {}", key))),
        }
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context(format!("delete {}", key))),
        }
    }
}
