//! Presence heartbeats.
//!
//! The beat loop leaves a timestamped [`Presence`] for every contact at
//! `<contactId>/hb.sesj` in the local namespace. The monitor loop reads
//! `<localUserId>/hb.sesj` from each contact's namespace and republishes the
//! whole presence table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use deaddrop_shared::constants::HEARTBEAT_FILE_NAME;
use deaddrop_shared::crypto::CryptoCodec;
use deaddrop_shared::identity::Keypair;
use deaddrop_shared::protocol::Presence;
use deaddrop_shared::types::Contact;
use deaddrop_store::{RemoteStorage, StorageError};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{Notifier, PresenceUpdated, EVENT_PRESENCE_UPDATED};
use crate::lock;
use crate::scheduler::TaskSlot;

/// `<ownerId>/hb.sesj`
pub fn heartbeat_path(owner_id: &str) -> String {
    format!("{owner_id}/{HEARTBEAT_FILE_NAME}")
}

#[derive(Clone)]
pub struct HeartbeatService {
    inner: Arc<Inner>,
}

struct Inner {
    user_id: String,
    keypair: Keypair,
    storage: Arc<dyn RemoteStorage>,
    codec: Arc<dyn CryptoCodec>,
    config: ClientConfig,

    contact_keys: Mutex<HashMap<String, String>>,
    heartbeats: Mutex<HashMap<String, Option<Presence>>>,
    first_beat: AtomicBool,

    beat_loop: TaskSlot,
    monitor_loop: TaskSlot,

    presence_events: Notifier<PresenceUpdated>,
}

impl HeartbeatService {
    pub fn new(
        user_id: impl Into<String>,
        keypair: Keypair,
        storage: Arc<dyn RemoteStorage>,
        codec: Arc<dyn CryptoCodec>,
        contacts: &[Contact],
        config: ClientConfig,
    ) -> Result<Self> {
        let user_id = user_id.into();
        if user_id.is_empty() {
            return Err(ClientError::Construction("local user id is empty".to_string()));
        }

        let capacity = config.notify_capacity;
        let service = Self {
            inner: Arc::new(Inner {
                user_id,
                keypair,
                storage,
                codec,
                config,
                contact_keys: Mutex::new(HashMap::new()),
                heartbeats: Mutex::new(HashMap::new()),
                first_beat: AtomicBool::new(true),
                beat_loop: TaskSlot::new(),
                monitor_loop: TaskSlot::new(),
                presence_events: Notifier::new(EVENT_PRESENCE_UPDATED, capacity),
            }),
        };

        for contact in contacts {
            match contact.usable_key() {
                Some(key) => service.add_contact(&contact.id, key),
                None => debug!(contact = %contact.id, "Skipping contact without key"),
            }
        }

        Ok(service)
    }

    pub fn add_contact(&self, contact_id: &str, public_key: &str) {
        if contact_id.is_empty() || public_key.is_empty() {
            return;
        }
        lock(&self.inner.contact_keys).insert(contact_id.to_string(), public_key.to_string());
        lock(&self.inner.heartbeats).insert(contact_id.to_string(), None);
    }

    pub fn remove_contact(&self, contact_id: &str) {
        lock(&self.inner.contact_keys).remove(contact_id);
        lock(&self.inner.heartbeats).remove(contact_id);
    }

    /// Stop tracking `contact_id` and delete the heartbeat we left for it.
    pub fn delete_contact(&self, contact_id: &str) -> JoinHandle<()> {
        self.remove_contact(contact_id);

        let inner = self.inner.clone();
        let path = heartbeat_path(contact_id);
        tokio::spawn(async move {
            match inner.storage.delete(&inner.user_id, &path).await {
                Ok(()) => debug!(path = %path, "Deleted heartbeat"),
                Err(StorageError::NotFound(_)) => debug!(path = %path, "No heartbeat to delete"),
                Err(e) => warn!(path = %path, error = %e, "Failed to delete heartbeat"),
            }
        })
    }

    pub fn contact_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.contact_keys).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn heartbeat(&self, contact_id: &str) -> Option<Presence> {
        lock(&self.inner.heartbeats).get(contact_id).cloned().flatten()
    }

    pub fn heartbeats(&self) -> HashMap<String, Option<Presence>> {
        lock(&self.inner.heartbeats).clone()
    }

    /// Leave a fresh heartbeat for every contact. Returns the number of successful writes.
    pub async fn beat_once(&self) -> usize {
        let presence = Presence::now(self.inner.user_id.clone());
        let payload = match presence.to_value() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Cannot encode heartbeat");
                return 0;
            }
        };

        let targets: Vec<(String, String)> = lock(&self.inner.contact_keys)
            .iter()
            .map(|(id, key)| (id.clone(), key.clone()))
            .collect();

        let writes = targets
            .iter()
            .map(|(contact_id, key)| self.beat_to(contact_id, key, &payload));
        let written = join_all(writes).await.into_iter().filter(|ok| *ok).count();

        debug!(written, contacts = targets.len(), "Heartbeat published");
        written
    }

    async fn beat_to(&self, contact_id: &str, public_key: &str, payload: &Value) -> bool {
        let data = if self.inner.config.encryption {
            match self.inner.codec.encrypt(public_key, payload) {
                Ok(sealed) => sealed,
                Err(e) => {
                    warn!(contact = %contact_id, error = %e, "Cannot seal heartbeat");
                    return false;
                }
            }
        } else {
            payload.clone()
        };

        let path = heartbeat_path(contact_id);
        match self.inner.storage.write(&self.inner.user_id, &path, &data).await {
            Ok(()) => true,
            Err(e) => {
                warn!(contact = %contact_id, error = %e, "Failed to write heartbeat");
                false
            }
        }
    }

    /// Read the heartbeat each contact left for us and publish the table.
    /// Returns how many heartbeats were read.
    pub async fn monitor_once(&self) -> usize {
        let contacts: Vec<String> = lock(&self.inner.contact_keys).keys().cloned().collect();
        let path = heartbeat_path(&self.inner.user_id);

        let reads = contacts.iter().map(|contact_id| self.read_from(contact_id, &path));
        let seen: Vec<Presence> = join_all(reads).await.into_iter().flatten().collect();
        let count = seen.len();

        let table = {
            let mut heartbeats = lock(&self.inner.heartbeats);
            for presence in seen {
                heartbeats.insert(presence.user_id.clone(), Some(presence));
            }
            heartbeats.clone()
        };

        debug!(read = count, contacts = contacts.len(), "Heartbeats checked");
        self.inner.presence_events.publish(PresenceUpdated(table));
        count
    }

    async fn read_from(&self, contact_id: &str, path: &str) -> Option<Presence> {
        let value = match self.inner.storage.read(contact_id, path).await {
            Ok(Some(value)) => value,
            Ok(None) | Err(StorageError::NotFound(_)) => {
                debug!(contact = %contact_id, "No heartbeat yet");
                return None;
            }
            Err(e) => {
                warn!(contact = %contact_id, error = %e, "Failed to read heartbeat");
                return None;
            }
        };

        if is_blank(&value) {
            return None;
        }

        match self.open(value) {
            Ok(presence) => Some(presence),
            Err(e) => {
                warn!(contact = %contact_id, error = %e, "Discarding unreadable heartbeat");
                None
            }
        }
    }

    fn open(&self, value: Value) -> Result<Presence> {
        let value = if self.inner.config.encryption && self.inner.codec.is_encrypted(&value) {
            self.inner.codec.decrypt(&self.inner.keypair, &value)?
        } else {
            value
        };
        Ok(Presence::from_value(value)?)
    }

    /// Start the beat loop. Its first completed cycle also starts the monitor loop.
    pub async fn start_beat(&self) -> bool {
        let service = self.clone();
        self.inner
            .beat_loop
            .start("heartbeat-beat", self.inner.config.beat_interval, move || {
                let service = service.clone();
                async move {
                    service.beat_once().await;
                    if service.inner.first_beat.swap(false, Ordering::SeqCst) {
                        info!("First heartbeat published, starting monitor");
                        service.start_monitor().await;
                    }
                }
            })
            .await
    }

    pub fn stop_beat(&self) {
        self.inner.beat_loop.stop();
    }

    pub async fn start_monitor(&self) -> bool {
        let service = self.clone();
        self.inner
            .monitor_loop
            .start("heartbeat-monitor", self.inner.config.monitor_interval, move || {
                let service = service.clone();
                async move {
                    service.monitor_once().await;
                }
            })
            .await
    }

    pub fn stop_monitor(&self) {
        self.inner.monitor_loop.stop();
    }

    pub fn is_beating(&self) -> bool {
        self.inner.beat_loop.is_running()
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitor_loop.is_running()
    }

    /// Stop both loops and wait for their last cycles.
    pub async fn shutdown(&self) {
        self.inner.beat_loop.stop_and_join().await;
        self.inner.monitor_loop.stop_and_join().await;
    }

    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceUpdated> {
        self.inner.presence_events.subscribe()
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{peer, FlakyStorage, Peer};
    use deaddrop_shared::crypto::SealedBoxCodec;
    use deaddrop_store::MemoryStorage;
    use std::time::Duration;

    fn service(
        storage: Arc<dyn RemoteStorage>,
        me: &Peer,
        contacts: &[Contact],
        encryption: bool,
    ) -> HeartbeatService {
        let config = ClientConfig {
            encryption,
            ..ClientConfig::default()
        };
        HeartbeatService::new(
            me.contact.id.clone(),
            me.keypair.clone(),
            storage,
            Arc::new(SealedBoxCodec),
            contacts,
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_roster_skips_contacts_without_key() {
        let me = peer("me");
        let contacts = [
            peer("A").contact,
            Contact::without_key("B"),
            Contact::new("C", ""),
        ];
        let service = service(Arc::new(MemoryStorage::new()), &me, &contacts, true);

        assert_eq!(service.contact_ids(), vec!["A".to_string()]);
        assert_eq!(service.heartbeats().len(), 1);
        assert!(service.heartbeat("A").is_none());
    }

    #[test]
    fn test_add_and_remove_contact() {
        let me = peer("me");
        let service = service(Arc::new(MemoryStorage::new()), &me, &[], true);

        service.add_contact("", "abcd");
        service.add_contact("A", "");
        assert!(service.contact_ids().is_empty());

        service.add_contact("A", "abcd");
        assert_eq!(service.heartbeats().get("A"), Some(&None));

        service.remove_contact("A");
        assert!(service.contact_ids().is_empty());
        assert!(service.heartbeats().is_empty());
    }

    #[tokio::test]
    async fn test_beat_writes_sealed_presence() {
        let storage = MemoryStorage::new();
        let me = peer("me");
        let a = peer("A");
        let service = service(Arc::new(storage.clone()), &me, &[a.contact.clone()], true);

        assert_eq!(service.beat_once().await, 1);

        let stored = storage.get("me", "A/hb.sesj").unwrap();
        assert!(SealedBoxCodec.is_encrypted(&stored));
        let opened = SealedBoxCodec.decrypt(&a.keypair, &stored).unwrap();
        assert_eq!(Presence::from_value(opened).unwrap().user_id, "me");
    }

    #[tokio::test]
    async fn test_beat_in_plaintext_when_encryption_off() {
        let storage = MemoryStorage::new();
        let me = peer("me");
        let service = service(Arc::new(storage.clone()), &me, &[peer("A").contact], false);

        service.beat_once().await;
        let stored = storage.get("me", "A/hb.sesj").unwrap();
        assert_eq!(stored["userId"], "me");
    }

    #[tokio::test]
    async fn test_monitor_reads_heartbeats_left_for_us() {
        let storage = MemoryStorage::new();
        let me = peer("me");
        let a = peer("A");

        let mine = service(Arc::new(storage.clone()), &me, &[a.contact.clone()], true);
        let theirs = service(Arc::new(storage.clone()), &a, &[me.contact.clone()], true);

        let mut rx = mine.subscribe_presence();
        assert_eq!(mine.monitor_once().await, 0);
        let PresenceUpdated(table) = rx.recv().await.unwrap();
        assert_eq!(table.get("A"), Some(&None));

        theirs.beat_once().await;
        assert_eq!(mine.monitor_once().await, 1);
        let PresenceUpdated(table) = rx.recv().await.unwrap();
        assert_eq!(table["A"].as_ref().map(|p| p.user_id.as_str()), Some("A"));
        assert!(mine.heartbeat("A").is_some());
    }

    #[tokio::test]
    async fn test_monitor_partial_failure_single_notification() {
        let storage = FlakyStorage::new();
        let me = peer("me");
        let a = peer("A");
        let b = peer("B");
        let c = peer("C");
        let roster = [a.contact.clone(), b.contact.clone(), c.contact.clone()];
        let mine = service(Arc::new(storage.clone()), &me, &roster, true);

        for p in [&a, &b, &c] {
            service(Arc::new(storage.clone()), p, &[me.contact.clone()], true)
                .beat_once()
                .await;
        }
        storage.fail_reads_from("B");

        let mut rx = mine.subscribe_presence();
        assert_eq!(mine.monitor_once().await, 2);

        let PresenceUpdated(table) = rx.recv().await.unwrap();
        assert!(table["A"].is_some());
        assert!(table["B"].is_none());
        assert!(table["C"].is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_monitor_skips_empty_artifacts() {
        let storage = MemoryStorage::new();
        let me = peer("me");
        let mine = service(Arc::new(storage.clone()), &me, &[peer("A").contact], true);

        storage
            .write("A", "me/hb.sesj", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(mine.monitor_once().await, 0);
        assert!(mine.heartbeat("A").is_none());
    }

    #[tokio::test]
    async fn test_delete_contact_removes_artifact() {
        let storage = MemoryStorage::new();
        let me = peer("me");
        let a = peer("A");
        let service = service(Arc::new(storage.clone()), &me, &[a.contact.clone()], true);

        service.beat_once().await;
        assert!(storage.get("me", "A/hb.sesj").is_some());

        service.delete_contact("A").await.unwrap();
        assert!(storage.get("me", "A/hb.sesj").is_none());
        assert!(service.contact_ids().is_empty());
    }

    #[tokio::test]
    async fn test_dot_free_backend() {
        let storage = MemoryStorage::dot_free();
        let me = peer("me");
        let a = peer("A");
        let mine = service(Arc::new(storage.clone()), &me, &[a.contact.clone()], false);
        let theirs = service(Arc::new(storage.clone()), &a, &[me.contact.clone()], false);

        mine.beat_once().await;
        assert_eq!(storage.paths("me"), vec!["A/hb_sesj".to_string()]);

        theirs.beat_once().await;
        assert_eq!(mine.monitor_once().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_beat_starts_monitor() {
        let storage = MemoryStorage::new();
        let me = peer("me");
        let service = service(Arc::new(storage.clone()), &me, &[peer("A").contact], true);
        let mut rx = service.subscribe_presence();

        assert!(!service.is_monitoring());
        assert!(service.start_beat().await);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(service.is_monitoring());
        assert!(rx.recv().await.is_ok());

        // Later beats do not start a second monitor
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(service.is_monitoring());

        service.shutdown().await;
        assert!(!service.is_beating());
        assert!(!service.is_monitoring());
    }
}
