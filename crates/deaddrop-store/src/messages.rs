//! Received offline messages, deduplicated by sender and message id.
//!
//! Not synchronized: the owning service serializes access.

use std::collections::{HashMap, HashSet};

use deaddrop_shared::protocol::MessageRecord;
use deaddrop_shared::types::MessageId;

#[derive(Debug, Clone, Default)]
pub struct OfflineMessageStore {
    messages: HashMap<String, HashMap<MessageId, MessageRecord>>,
}

impl OfflineMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` unless `(record.from, record.id)` is already stored.
    /// Returns `false` for a duplicate.
    pub fn add(&mut self, record: MessageRecord) -> bool {
        let bucket = self.messages.entry(record.from.clone()).or_default();
        if bucket.contains_key(&record.id) {
            return false;
        }
        bucket.insert(record.id, record);
        true
    }

    pub fn remove(&mut self, contact_id: &str, message_id: MessageId) {
        if let Some(bucket) = self.messages.get_mut(contact_id) {
            bucket.remove(&message_id);
            if bucket.is_empty() {
                self.messages.remove(contact_id);
            }
        }
    }

    pub fn has(&self, contact_id: &str, message_id: MessageId) -> bool {
        self.messages
            .get(contact_id)
            .is_some_and(|bucket| bucket.contains_key(&message_id))
    }

    /// Messages from one contact, ascending by id.
    pub fn list_for_contact(&self, contact_id: &str) -> Vec<MessageRecord> {
        let mut list: Vec<MessageRecord> = self
            .messages
            .get(contact_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default();
        list.sort_by_key(|m| m.id);
        list
    }

    /// Messages from every contact, ascending by id (not grouped by contact).
    pub fn list_all(&self) -> Vec<MessageRecord> {
        let mut list: Vec<MessageRecord> = self
            .messages
            .values()
            .flat_map(|bucket| bucket.values().cloned())
            .collect();
        list.sort_by_key(|m| m.id);
        list
    }

    /// Drop every contact bucket whose id is not in `keep`.
    pub fn prune_except(&mut self, keep: &HashSet<String>) {
        self.messages.retain(|contact_id, _| keep.contains(contact_id));
    }

    pub fn contact_ids(&self) -> Vec<String> {
        self.messages.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: u64, from: &str) -> MessageRecord {
        MessageRecord::new(id, from, "me", format!("message {id}"))
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut store = OfflineMessageStore::new();
        let first = msg(1, "alice");

        assert!(store.add(first.clone()));
        let before = store.list_all();

        let mut again = first.clone();
        again.payload = "changed".to_string();
        assert!(!store.add(again));
        assert_eq!(store.list_all(), before);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_same_id_different_sender_both_kept() {
        let mut store = OfflineMessageStore::new();
        assert!(store.add(msg(1, "alice")));
        assert!(store.add(msg(1, "bob")));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_list_all_sorted_numerically_across_senders() {
        let mut store = OfflineMessageStore::new();
        store.add(msg(10, "alice"));
        store.add(msg(9, "bob"));
        store.add(msg(100, "bob"));
        store.add(msg(2, "alice"));

        let ids: Vec<u64> = store.list_all().iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![2, 9, 10, 100]);
    }

    #[test]
    fn test_list_for_contact() {
        let mut store = OfflineMessageStore::new();
        store.add(msg(3, "alice"));
        store.add(msg(1, "alice"));
        store.add(msg(2, "bob"));

        let ids: Vec<u64> = store.list_for_contact("alice").iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(store.list_for_contact("nobody").is_empty());
    }

    #[test]
    fn test_remove_and_has() {
        let mut store = OfflineMessageStore::new();
        store.add(msg(1, "alice"));
        assert!(store.has("alice", MessageId(1)));

        store.remove("alice", MessageId(1));
        assert!(!store.has("alice", MessageId(1)));
        assert!(store.contact_ids().is_empty());

        // Removing something absent is a no-op
        store.remove("alice", MessageId(1));
        store.remove("nobody", MessageId(7));
    }

    #[test]
    fn test_prune_except() {
        let mut store = OfflineMessageStore::new();
        store.add(msg(1, "A"));
        store.add(msg(2, "B"));
        store.add(msg(3, "B"));
        store.add(msg(4, "C"));

        let keep: HashSet<String> = ["A", "C"].iter().map(|s| s.to_string()).collect();
        store.prune_except(&keep);

        assert!(store.list_for_contact("B").is_empty());
        assert_eq!(store.list_for_contact("A").len(), 1);
        assert_eq!(store.list_for_contact("C").len(), 1);
        assert_eq!(store.len(), 2);
    }
}
