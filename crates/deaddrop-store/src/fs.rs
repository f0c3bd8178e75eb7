//! Filesystem storage backend.
//!
//! Lays namespaces out as `<root>/<user>/<path>`, one JSON document per file.
//! A directory synced between peers (or mounted from a shared volume) is
//! enough to run the delivery layer without a cloud database.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info};

use deaddrop_shared::protocol::DirectoryIndex;

use crate::driver::{PathStyle, RemoteStorage};
use crate::error::{Result, StorageError};

/// Join a logical path onto `base`, refusing anything that would escape it.
fn ensure_within(base: &Path, logical: &str) -> Result<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(logical.trim_start_matches('/')).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::InvalidPath(logical.to_string()));
            }
        }
    }
    if !resolved.starts_with(base) {
        return Err(StorageError::InvalidPath(logical.to_string()));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    style: PathStyle,
}

impl FsStorage {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!(path = %root.display(), "Filesystem storage initialized");
        Ok(Self {
            root,
            style: PathStyle::Dotted,
        })
    }

    /// With [`PathStyle::DotFree`], dots in paths are stored as `_`.
    pub fn with_path_style(mut self, style: PathStyle) -> Self {
        self.style = style;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace(&self, user: &str) -> Result<PathBuf> {
        if user.is_empty() || user.contains('/') || user.contains('\\') || user == ".." {
            return Err(StorageError::InvalidPath(user.to_string()));
        }
        Ok(self.root.join(user))
    }

    fn resolve(&self, user: &str, path: &str) -> Result<PathBuf> {
        let namespace = self.namespace(user)?;
        match self.style {
            PathStyle::Dotted => ensure_within(&namespace, path),
            PathStyle::DotFree => ensure_within(&namespace, &path.replace('.', "_")),
        }
    }
}

#[async_trait]
impl RemoteStorage for FsStorage {
    fn path_style(&self) -> PathStyle {
        self.style
    }

    async fn write(&self, user: &str, path: &str, data: &Value) -> Result<()> {
        let target = self.resolve(user, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec(data)?;
        fs::write(&target, &bytes).await?;

        debug!(path = %target.display(), size = bytes.len(), "Wrote blob");
        Ok(())
    }

    async fn read(&self, user: &str, path: &str) -> Result<Option<Value>> {
        let target = self.resolve(user, path)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, user: &str, path: &str) -> Result<()> {
        let target = self.resolve(user, path)?;
        match fs::remove_file(&target).await {
            Ok(()) => {
                debug!(path = %target.display(), "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("{user}/{path}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_index(&self, user: &str, dir: &str) -> Result<Option<DirectoryIndex>> {
        let target = self.resolve(user, dir)?;
        let mut entries = match fs::read_dir(&target).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        Ok(Some(DirectoryIndex::from_names(names)))
    }
}
