//! Offline store-and-forward messaging.
//!
//! Outgoing messages are queued by [`OfflineMessagingService::send_message`]
//! and written by the send loop into the local user's namespace at
//! `<contactId>/conversations/offline/<id>.cm`, sealed to the contact's key.
//! The receive loop reads the mirror-image path from each contact's namespace
//! (`<localUserId>/conversations/offline`), fetches files not seen before and
//! feeds them to the [`OfflineMessageStore`].

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use deaddrop_shared::constants::{OFFLINE_DIR, OFFLINE_MSG_EXT};
use deaddrop_shared::crypto::CryptoCodec;
use deaddrop_shared::identity::Keypair;
use deaddrop_shared::protocol::{DeliveryState, MessageRecord};
use deaddrop_shared::types::{Contact, MessageId};
use deaddrop_store::{OfflineMessageStore, PathStyle, RemoteStorage, StorageError};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{
    NewMessages, Notifier, OfflineSent, EVENT_NEW_MESSAGES, EVENT_OFFLINE_SENT,
};
use crate::lock;
use crate::scheduler::TaskSlot;

/// A message waiting for the send loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteQueueEntry {
    pub path: String,
    pub message: MessageRecord,
    pub public_key: String,
}

/// `<contactId>/conversations/offline`
pub fn offline_dir(contact_id: &str) -> String {
    format!("{contact_id}/{OFFLINE_DIR}")
}

/// `<id><sep>cm`, with the separator the backend tolerates.
pub fn offline_file_name(message_id: MessageId, style: PathStyle) -> String {
    format!("{message_id}{}{OFFLINE_MSG_EXT}", style.ext_separator())
}

/// Recover the message id from an offline file name. `None` if the stem is not numeric.
pub fn message_id_from_file_name(file_name: &str, style: PathStyle) -> Option<MessageId> {
    let stem = file_name
        .rsplit_once(style.ext_separator())
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    stem.parse().ok()
}

#[derive(Clone)]
pub struct OfflineMessagingService {
    inner: Arc<Inner>,
}

struct Inner {
    user_id: String,
    keypair: Keypair,
    storage: Arc<dyn RemoteStorage>,
    codec: Arc<dyn CryptoCodec>,
    config: ClientConfig,

    queue: Mutex<VecDeque<WriteQueueEntry>>,
    /// Raised by callers that want the send loop to idle.
    send_suspended: AtomicBool,

    received: Mutex<OfflineMessageStore>,
    contacts: Mutex<Vec<Contact>>,

    send_loop: TaskSlot,
    recv_loop: TaskSlot,

    sent_events: Notifier<OfflineSent>,
    new_message_events: Notifier<NewMessages>,
}

impl OfflineMessagingService {
    pub fn new(
        user_id: impl Into<String>,
        keypair: Keypair,
        storage: Arc<dyn RemoteStorage>,
        codec: Arc<dyn CryptoCodec>,
        contacts: Vec<Contact>,
        config: ClientConfig,
    ) -> Result<Self> {
        let user_id = user_id.into();
        if user_id.is_empty() {
            return Err(ClientError::Construction("local user id is empty".to_string()));
        }

        let capacity = config.notify_capacity;
        Ok(Self {
            inner: Arc::new(Inner {
                user_id,
                keypair,
                storage,
                codec,
                config,
                queue: Mutex::new(VecDeque::new()),
                send_suspended: AtomicBool::new(false),
                received: Mutex::new(OfflineMessageStore::new()),
                contacts: Mutex::new(contacts),
                send_loop: TaskSlot::new(),
                recv_loop: TaskSlot::new(),
                sent_events: Notifier::new(EVENT_OFFLINE_SENT, capacity),
                new_message_events: Notifier::new(EVENT_NEW_MESSAGES, capacity),
            }),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    // -----------------------------------------------------------------------
    // Roster
    // -----------------------------------------------------------------------

    /// Replace the roster and forget messages from contacts no longer on it.
    pub fn set_contacts(&self, contacts: Vec<Contact>) {
        let keep: HashSet<String> = contacts.iter().map(|c| c.id.clone()).collect();
        *lock(&self.inner.contacts) = contacts;
        lock(&self.inner.received).prune_except(&keep);
        debug!(contacts = keep.len(), "Offline messaging roster updated");
    }

    pub fn contacts(&self) -> Vec<Contact> {
        lock(&self.inner.contacts).clone()
    }

    // -----------------------------------------------------------------------
    // Outgoing
    // -----------------------------------------------------------------------

    /// Queue `message` for `contact`. No I/O happens here.
    pub fn send_message(&self, contact: &Contact, message: MessageRecord) -> Result<()> {
        let public_key = contact
            .usable_key()
            .ok_or_else(|| ClientError::MissingKey(contact.id.clone()))?
            .to_string();

        let style = self.inner.storage.path_style();
        let path = format!(
            "{}/{}",
            offline_dir(&contact.id),
            offline_file_name(message.id, style)
        );

        debug!(to = %contact.id, path = %path, "Queued offline message");
        lock(&self.inner.queue).push_back(WriteQueueEntry {
            path,
            message,
            public_key,
        });
        Ok(())
    }

    /// Drop every queued message addressed to `contact`, then delete the
    /// contact's offline directory from storage in the background.
    ///
    /// The strip runs under the queue lock, so a drain never sees a
    /// half-stripped queue. A message for `contact` that an in-flight drain
    /// already dequeued may still be written or requeued.
    pub fn remove_messages(&self, contact: &Contact) -> JoinHandle<()> {
        let removed = {
            let mut queue = lock(&self.inner.queue);
            let before = queue.len();
            queue.retain(|entry| entry.message.to != contact.id);
            before - queue.len()
        };

        info!(contact = %contact.id, removed, "Removed queued offline messages");

        let inner = self.inner.clone();
        let dir = offline_dir(&contact.id);
        tokio::spawn(async move {
            if let Err(e) = inner.storage.delete_dir(&inner.user_id, &dir).await {
                warn!(dir = %dir, error = %e, "Failed to delete offline directory");
            }
        })
    }

    /// Delete specific delivered messages for `contact` from storage.
    pub async fn delete_messages_from_storage(
        &self,
        contact: &Contact,
        message_ids: &[MessageId],
    ) -> Result<()> {
        let style = self.inner.storage.path_style();
        let names: Vec<String> = message_ids
            .iter()
            .map(|id| offline_file_name(*id, style))
            .collect();

        self.inner
            .storage
            .delete_many(&self.inner.user_id, &offline_dir(&contact.id), &names)
            .await?;

        debug!(contact = %contact.id, count = names.len(), "Deleted offline messages");
        Ok(())
    }

    /// Pause or resume the send loop without stopping it.
    pub fn set_send_suspended(&self, suspended: bool) {
        self.inner.send_suspended.store(suspended, Ordering::SeqCst);
    }

    pub fn is_send_suspended(&self) -> bool {
        self.inner.send_suspended.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Snapshot of the write queue, oldest first.
    pub fn queued(&self) -> Vec<WriteQueueEntry> {
        lock(&self.inner.queue).iter().cloned().collect()
    }

    /// One send cycle: write queued messages oldest first, one at a time.
    ///
    /// After a failed write, that contact's remaining entries are held back
    /// for the rest of the cycle while other contacts keep draining. Held
    /// entries return to the head of the queue in their original order.
    /// Entries whose path the backend rejects outright are dropped.
    /// Returns how many messages were written.
    pub async fn drain_once(&self) -> usize {
        let mut sent = Vec::new();
        let mut held = Vec::new();
        let mut blocked: HashSet<String> = HashSet::new();

        while !self.is_send_suspended() {
            let Some(mut entry) = lock(&self.inner.queue).pop_front() else {
                break;
            };

            if blocked.contains(&entry.message.to) {
                held.push(entry);
                continue;
            }

            let previous_state = entry.message.delivery_state;
            entry.message.delivery_state = DeliveryState::SentOffline;

            let sealed = match self.seal(&entry) {
                Ok(sealed) => sealed,
                Err(e) => {
                    error!(
                        to = %entry.message.to,
                        id = %entry.message.id,
                        error = %e,
                        "Cannot seal offline message, dropping it"
                    );
                    continue;
                }
            };

            debug!(to = %entry.message.to, path = %entry.path, "Sending message offline");
            match self
                .inner
                .storage
                .write(&self.inner.user_id, &entry.path, &sealed)
                .await
            {
                Ok(()) => sent.push(entry.message),
                Err(StorageError::InvalidPath(path)) => {
                    error!(
                        to = %entry.message.to,
                        id = %entry.message.id,
                        path = %path,
                        "Storage rejected offline message path, dropping it"
                    );
                }
                Err(e) => {
                    warn!(
                        to = %entry.message.to,
                        path = %entry.path,
                        error = %e,
                        "Offline write failed, holding contact until next cycle"
                    );
                    entry.message.delivery_state = previous_state;
                    blocked.insert(entry.message.to.clone());
                    held.push(entry);
                }
            }
        }

        if !held.is_empty() {
            let mut queue = lock(&self.inner.queue);
            for entry in held.into_iter().rev() {
                queue.push_front(entry);
            }
        }

        let count = sent.len();
        if count > 0 {
            info!(count, "Sent offline messages");
            self.inner.sent_events.publish(OfflineSent { messages: sent });
        }
        count
    }

    fn seal(&self, entry: &WriteQueueEntry) -> Result<Value> {
        let value = entry.message.to_value()?;
        Ok(self.inner.codec.encrypt(&entry.public_key, &value)?)
    }

    // -----------------------------------------------------------------------
    // Incoming
    // -----------------------------------------------------------------------

    /// One receive cycle over every contact on the roster.
    ///
    /// Contacts are polled concurrently; a failing contact or file only costs
    /// its own messages. Returns how many new messages were stored.
    pub async fn poll_once(&self) -> usize {
        let contacts = self.contacts();
        let inbox = offline_dir(&self.inner.user_id);
        let style = self.inner.storage.path_style();

        let per_contact = contacts
            .iter()
            .map(|contact| self.fetch_unseen(&contact.id, &inbox, style));
        let fetched: Vec<Value> = join_all(per_contact).await.into_iter().flatten().collect();

        let opened: Vec<MessageRecord> = fetched
            .into_iter()
            .filter_map(|value| match self.open(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable offline message");
                    None
                }
            })
            .collect();

        let (count, all) = {
            let mut received = lock(&self.inner.received);
            let count = opened
                .into_iter()
                .filter(|record| received.add(record.clone()))
                .count();
            let all = if count > 0 { received.list_all() } else { Vec::new() };
            (count, all)
        };

        if count > 0 {
            info!(count, total = all.len(), "Received offline messages");
            self.inner.new_message_events.publish(NewMessages(all));
        }
        count
    }

    /// Fetch the files `contact_id` left for us that we have not stored yet.
    async fn fetch_unseen(&self, contact_id: &str, inbox: &str, style: PathStyle) -> Vec<Value> {
        let storage = &self.inner.storage;

        let index = match storage.list_index(contact_id, inbox).await {
            Ok(Some(index)) => index,
            Ok(None) | Err(StorageError::NotFound(_)) => {
                debug!(contact = %contact_id, "No offline index yet");
                return Vec::new();
            }
            Err(e) => {
                warn!(contact = %contact_id, error = %e, "Failed to read offline index");
                return Vec::new();
            }
        };

        let unseen: Vec<String> = {
            let received = lock(&self.inner.received);
            index
                .active_names()
                .filter(|name| match message_id_from_file_name(name, style) {
                    Some(id) => !received.has(contact_id, id),
                    None => {
                        debug!(contact = %contact_id, file = %name, "Skipping non-message file");
                        false
                    }
                })
                .map(|name| format!("{inbox}/{name}"))
                .collect()
        };

        let reads = unseen.into_iter().map(|path| async move {
            let result = storage.read(contact_id, &path).await;
            (path, result)
        });

        join_all(reads)
            .await
            .into_iter()
            .filter_map(|(path, result)| match result {
                Ok(Some(value)) => Some(value),
                Ok(None) => {
                    debug!(contact = %contact_id, path = %path, "Indexed file vanished");
                    None
                }
                Err(e) => {
                    warn!(contact = %contact_id, path = %path, error = %e, "Failed to read offline message");
                    None
                }
            })
            .collect()
    }

    fn open(&self, value: Value) -> Result<MessageRecord> {
        let value = if self.inner.codec.is_encrypted(&value) {
            self.inner.codec.decrypt(&self.inner.keypair, &value)?
        } else {
            value
        };
        Ok(MessageRecord::from_value(value)?)
    }

    /// Every received message, ascending by id.
    pub fn messages(&self) -> Vec<MessageRecord> {
        lock(&self.inner.received).list_all()
    }

    pub fn messages_from(&self, contact_id: &str) -> Vec<MessageRecord> {
        lock(&self.inner.received).list_for_contact(contact_id)
    }

    pub fn has_message(&self, contact_id: &str, message_id: MessageId) -> bool {
        lock(&self.inner.received).has(contact_id, message_id)
    }

    /// Forget a received message, e.g. once it has been moved to the conversation.
    pub fn forget_message(&self, contact_id: &str, message_id: MessageId) {
        lock(&self.inner.received).remove(contact_id, message_id);
    }

    // -----------------------------------------------------------------------
    // Loops and notifications
    // -----------------------------------------------------------------------

    pub async fn start_send(&self) -> bool {
        let service = self.clone();
        self.inner
            .send_loop
            .start("offline-send", self.inner.config.send_interval, move || {
                let service = service.clone();
                async move {
                    service.drain_once().await;
                }
            })
            .await
    }

    pub fn stop_send(&self) {
        self.inner.send_loop.stop();
    }

    pub async fn start_receive(&self) -> bool {
        let service = self.clone();
        self.inner
            .recv_loop
            .start("offline-receive", self.inner.config.recv_interval, move || {
                let service = service.clone();
                async move {
                    service.poll_once().await;
                }
            })
            .await
    }

    pub fn stop_receive(&self) {
        self.inner.recv_loop.stop();
    }

    pub fn is_sending(&self) -> bool {
        self.inner.send_loop.is_running()
    }

    pub fn is_receiving(&self) -> bool {
        self.inner.recv_loop.is_running()
    }

    /// Stop both loops and wait for their last cycles.
    pub async fn shutdown(&self) {
        self.inner.send_loop.stop_and_join().await;
        self.inner.recv_loop.stop_and_join().await;
    }

    pub fn subscribe_sent(&self) -> broadcast::Receiver<OfflineSent> {
        self.inner.sent_events.subscribe()
    }

    pub fn subscribe_new_messages(&self) -> broadcast::Receiver<NewMessages> {
        self.inner.new_message_events.subscribe()
    }
}
