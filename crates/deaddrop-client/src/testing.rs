//! Test doubles shared by the service tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use deaddrop_shared::identity::Keypair;
use deaddrop_shared::protocol::DirectoryIndex;
use deaddrop_shared::types::Contact;
use deaddrop_store::{MemoryStorage, PathStyle, RemoteStorage, Result, StorageError};

use crate::lock;

/// A contact together with the secret half of its key.
pub struct Peer {
    pub contact: Contact,
    pub keypair: Keypair,
}

pub fn peer(id: &str) -> Peer {
    let keypair = Keypair::generate();
    Peer {
        contact: Contact::new(id, keypair.public_key_hex()),
        keypair,
    }
}

#[derive(Default)]
struct Faults {
    read_paths: HashSet<String>,
    read_users: HashSet<String>,
    broken_indexes: HashSet<String>,
    missing_indexes: HashSet<String>,
    failing_write_prefixes: HashSet<String>,
    rejected_write_prefixes: HashSet<String>,
}

/// [`MemoryStorage`] with injectable failures.
#[derive(Clone, Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    faults: Arc<Mutex<Faults>>,
    failing_writes: Arc<AtomicUsize>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every read of `path`, in any namespace.
    pub fn fail_reads_of(&self, path: &str) {
        lock(&self.faults).read_paths.insert(path.to_string());
    }

    /// Fail every read from `user`'s namespace.
    pub fn fail_reads_from(&self, user: &str) {
        lock(&self.faults).read_users.insert(user.to_string());
    }

    /// Index lookups in `user`'s namespace fail with a backend error.
    pub fn fail_index_of(&self, user: &str) {
        lock(&self.faults).broken_indexes.insert(user.to_string());
    }

    /// Index lookups in `user`'s namespace report `NotFound`.
    pub fn index_not_found_for(&self, user: &str) {
        lock(&self.faults).missing_indexes.insert(user.to_string());
    }

    /// Fail every write whose path starts with `prefix`.
    pub fn fail_writes_under(&self, prefix: &str) {
        lock(&self.faults).failing_write_prefixes.insert(prefix.to_string());
    }

    /// Reject writes under `prefix` as invalid paths.
    pub fn reject_paths_under(&self, prefix: &str) {
        lock(&self.faults).rejected_write_prefixes.insert(prefix.to_string());
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn paths(&self, user: &str) -> Vec<String> {
        self.inner.paths(user)
    }

    pub fn heal(&self) {
        *lock(&self.faults) = Faults::default();
        self.failing_writes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStorage for FlakyStorage {
    fn path_style(&self) -> PathStyle {
        self.inner.path_style()
    }

    async fn write(&self, user: &str, path: &str, data: &Value) -> Result<()> {
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let (prefix_failing, rejected) = {
            let faults = lock(&self.faults);
            (
                faults.failing_write_prefixes.iter().any(|p| path.starts_with(p.as_str())),
                faults.rejected_write_prefixes.iter().any(|p| path.starts_with(p.as_str())),
            )
        };
        if rejected {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        if failing || prefix_failing {
            return Err(StorageError::Backend(format!("write refused: {user}/{path}")));
        }
        self.inner.write(user, path, data).await
    }

    async fn read(&self, user: &str, path: &str) -> Result<Option<Value>> {
        let refused = {
            let faults = lock(&self.faults);
            faults.read_users.contains(user) || faults.read_paths.contains(path)
        };
        if refused {
            return Err(StorageError::Backend(format!("read refused: {user}/{path}")));
        }
        self.inner.read(user, path).await
    }

    async fn delete(&self, user: &str, path: &str) -> Result<()> {
        self.inner.delete(user, path).await
    }

    async fn list_index(&self, user: &str, dir: &str) -> Result<Option<DirectoryIndex>> {
        let (broken, missing) = {
            let faults = lock(&self.faults);
            (
                faults.broken_indexes.contains(user),
                faults.missing_indexes.contains(user),
            )
        };
        if broken {
            return Err(StorageError::Backend(format!("index unavailable: {user}/{dir}")));
        }
        if missing {
            return Err(StorageError::NotFound(format!("{user}/{dir}")));
        }
        self.inner.list_index(user, dir).await
    }
}
