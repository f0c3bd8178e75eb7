use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::MessageId;

/// Delivery progress of a chat message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    #[default]
    Created,
    /// Handed to remote storage for the recipient to pick up
    SentOffline,
    /// Delivered over a live peer connection
    SentRealtime,
    Received,
    Read,
}

/// A chat message as written into a recipient's dead-drop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub from: String,
    pub to: String,
    pub payload: String,
    /// Creation time, when the sender recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_state: DeliveryState,
}

impl MessageRecord {
    pub fn new(
        id: impl Into<MessageId>,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            payload: payload.into(),
            time: Some(Utc::now()),
            delivery_state: DeliveryState::Created,
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// Presence artifact a user leaves in each contact's namespace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Presence {
    pub fn now(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// Directory listing kept by a storage backend.
///
/// A missing `active` map means "no candidates", same as a missing index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DirectoryIndex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<BTreeMap<String, Value>>,
}

impl DirectoryIndex {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let active = names
            .into_iter()
            .map(|name| (name.into(), Value::Bool(true)))
            .collect();
        Self {
            active: Some(active),
        }
    }

    /// Names in the active set, in lexical order.
    pub fn active_names(&self) -> impl Iterator<Item = &str> {
        self.active
            .iter()
            .flat_map(|active| active.keys().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_record_wire_shape() {
        let mut msg = MessageRecord::new(5, "alice", "bob", "hi");
        msg.delivery_state = DeliveryState::SentOffline;

        let value = msg.to_value().unwrap();
        assert_eq!(value["id"], 5);
        assert_eq!(value["deliveryState"], "SENT_OFFLINE");

        let restored = MessageRecord::from_value(value).unwrap();
        assert_eq!(restored, msg);
    }

    #[test]
    fn test_message_record_without_time() {
        let value = serde_json::json!({
            "id": 4,
            "from": "alice",
            "to": "me",
            "payload": "hi",
            "deliveryState": "SENT_OFFLINE"
        });
        let msg = MessageRecord::from_value(value).unwrap();
        assert_eq!(msg.id, MessageId(4));
        assert!(msg.time.is_none());
        assert!(msg.to_value().unwrap().get("time").is_none());
    }

    #[test]
    fn test_presence_timestamp_is_millis() {
        let presence = Presence::now("alice");
        let value = presence.to_value().unwrap();
        assert_eq!(value["userId"], "alice");
        assert_eq!(
            value["timestamp"].as_i64(),
            Some(presence.timestamp.timestamp_millis())
        );
    }

    #[test]
    fn test_index_without_active_has_no_names() {
        let index: DirectoryIndex = serde_json::from_str("{}").unwrap();
        assert_eq!(index.active_names().count(), 0);

        let index = DirectoryIndex::from_names(["2.cm", "1.cm"]);
        let names: Vec<&str> = index.active_names().collect();
        assert_eq!(names, vec!["1.cm", "2.cm"]);
    }
}
