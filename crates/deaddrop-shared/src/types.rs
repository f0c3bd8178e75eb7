use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DeaddropError;

// Message ids compare numerically, even when a peer sends them as strings.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = DeaddropError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| DeaddropError::InvalidMessageId(s.to_string()))
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// A roster entry as seen by the delivery layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    /// Hex-encoded X25519 public key.
    #[serde(default)]
    pub public_key: Option<String>,
}

impl Contact {
    pub fn new(id: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_key: Some(public_key.into()),
        }
    }

    pub fn without_key(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_key: None,
        }
    }

    /// The public key, treating an empty string the same as no key.
    pub fn usable_key(&self) -> Option<&str> {
        self.public_key.as_deref().filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_accepts_string_and_number() {
        let a: MessageId = serde_json::from_str("\"42\"").unwrap();
        let b: MessageId = serde_json::from_str("42").unwrap();
        assert_eq!(a, b);
        assert!(serde_json::from_str::<MessageId>("\"abc\"").is_err());
    }

    #[test]
    fn test_message_id_numeric_order() {
        let nine: MessageId = "9".parse().unwrap();
        let ten: MessageId = "10".parse().unwrap();
        assert!(nine < ten);
    }

    #[test]
    fn test_empty_key_is_unusable() {
        assert_eq!(Contact::new("alice", "").usable_key(), None);
        assert_eq!(Contact::without_key("bob").usable_key(), None);
        assert_eq!(Contact::new("carol", "ab").usable_key(), Some("ab"));
    }
}
