//! In-process storage backend.
//!
//! Cloning a [`MemoryStorage`] shares the underlying map, so several simulated
//! peers can exchange artifacts through one instance.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use deaddrop_shared::protocol::DirectoryIndex;

use crate::driver::{PathStyle, RemoteStorage};
use crate::error::{Result, StorageError};

type BlobMap = BTreeMap<(String, String), Value>;

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<Mutex<BlobMap>>,
    style: PathStyle,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that rejects dots: every path has its dots rewritten to `_`.
    pub fn dot_free() -> Self {
        Self {
            blobs: Arc::default(),
            style: PathStyle::DotFree,
        }
    }

    /// Snapshot of the blob at `path`, bypassing the async API.
    pub fn get(&self, user: &str, path: &str) -> Option<Value> {
        let key = (user.to_string(), self.clean(path));
        self.lock().ok()?.get(&key).cloned()
    }

    /// Every stored path in `user`'s namespace, sorted.
    pub fn paths(&self, user: &str) -> Vec<String> {
        match self.lock() {
            Ok(blobs) => blobs
                .keys()
                .filter(|(owner, _)| owner == user)
                .map(|(_, path)| path.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clean(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        match self.style {
            PathStyle::Dotted => path.to_string(),
            PathStyle::DotFree => path.replace('.', "_"),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BlobMap>> {
        self.blobs
            .lock()
            .map_err(|e| StorageError::Backend(format!("Lock poisoned: {e}")))
    }
}

#[async_trait]
impl RemoteStorage for MemoryStorage {
    fn path_style(&self) -> PathStyle {
        self.style
    }

    async fn write(&self, user: &str, path: &str, data: &Value) -> Result<()> {
        let path = self.clean(path);
        debug!(user = %user, path = %path, "Writing blob");
        self.lock()?.insert((user.to_string(), path), data.clone());
        Ok(())
    }

    async fn read(&self, user: &str, path: &str) -> Result<Option<Value>> {
        let key = (user.to_string(), self.clean(path));
        Ok(self.lock()?.get(&key).cloned())
    }

    async fn delete(&self, user: &str, path: &str) -> Result<()> {
        let path = self.clean(path);
        match self.lock()?.remove(&(user.to_string(), path.clone())) {
            Some(_) => {
                debug!(user = %user, path = %path, "Deleted blob");
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("{user}/{path}"))),
        }
    }

    async fn list_index(&self, user: &str, dir: &str) -> Result<Option<DirectoryIndex>> {
        let prefix = format!("{}/", self.clean(dir));
        let blobs = self.lock()?;
        let names: Vec<String> = blobs
            .keys()
            .filter(|(owner, _)| owner == user)
            .filter_map(|(_, path)| path.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect();

        if names.is_empty() {
            Ok(None)
        } else {
            Ok(Some(DirectoryIndex::from_names(names)))
        }
    }
}
