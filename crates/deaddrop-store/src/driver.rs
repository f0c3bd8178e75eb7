//! The remote storage driver seam.
//!
//! Every user owns a namespace. A user writes into their own namespace under
//! paths addressed to a counterparty (`<contactId>/...`), and reads what
//! counterparties left for them from the counterparties' namespaces.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::debug;

use deaddrop_shared::constants::{EXT_SEP, EXT_SEP_DOT_FREE};
use deaddrop_shared::protocol::DirectoryIndex;

use crate::error::{Result, StorageError};

/// How a backend treats dots in keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathStyle {
    /// Paths are stored verbatim.
    #[default]
    Dotted,
    /// The backend rejects literal dots, so extensions use `_`.
    DotFree,
}

impl PathStyle {
    pub fn ext_separator(self) -> char {
        match self {
            PathStyle::Dotted => EXT_SEP,
            PathStyle::DotFree => EXT_SEP_DOT_FREE,
        }
    }
}

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    fn path_style(&self) -> PathStyle;

    /// Write `data` at `path` inside `user`'s namespace.
    async fn write(&self, user: &str, path: &str, data: &Value) -> Result<()>;

    /// Read `path` from `user`'s namespace. `Ok(None)` when nothing is there.
    async fn read(&self, user: &str, path: &str) -> Result<Option<Value>>;

    async fn delete(&self, user: &str, path: &str) -> Result<()>;

    /// Directory index of `dir` inside `user`'s namespace.
    async fn list_index(&self, user: &str, dir: &str) -> Result<Option<DirectoryIndex>>;

    /// Delete several files of one directory. Missing files are ignored; the
    /// first other failure is returned once every delete has settled.
    async fn delete_many(&self, user: &str, dir: &str, names: &[String]) -> Result<()> {
        let deletes = names.iter().map(|name| async move {
            let path = format!("{dir}/{name}");
            match self.delete(user, &path).await {
                Err(e) if e.is_not_found() => {
                    debug!(path = %path, "Delete skipped, file already gone");
                    Ok(())
                }
                other => other,
            }
        });

        join_all(deletes)
            .await
            .into_iter()
            .find(|result| result.is_err())
            .unwrap_or(Ok(()))
    }

    /// Delete every file listed in the index of `dir`.
    async fn delete_dir(&self, user: &str, dir: &str) -> Result<()> {
        let names: Vec<String> = match self.list_index(user, dir).await {
            Ok(Some(index)) => index.active_names().map(str::to_string).collect(),
            Ok(None) | Err(StorageError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        self.delete_many(user, dir, &names).await
    }
}
