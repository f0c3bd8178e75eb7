use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::trace;

use deaddrop_shared::protocol::{MessageRecord, Presence};

pub const EVENT_OFFLINE_SENT: &str = "offline-messages-sent";
pub const EVENT_NEW_MESSAGES: &str = "new-messages";
pub const EVENT_PRESENCE_UPDATED: &str = "presence-updated";

/// Queued messages were written to storage during one send cycle.
/// Carries the messages with their updated delivery state.
#[derive(Debug, Clone)]
pub struct OfflineSent {
    pub messages: Vec<MessageRecord>,
}

/// A receive cycle stored at least one new message.
/// Carries every stored message in ascending id order, not only the new ones.
#[derive(Debug, Clone)]
pub struct NewMessages(pub Vec<MessageRecord>);

/// The presence table after a monitor cycle.
#[derive(Debug, Clone)]
pub struct PresenceUpdated(pub HashMap<String, Option<Presence>>);

/// Fire-and-forget broadcast of one event kind.
#[derive(Debug, Clone)]
pub struct Notifier<T: Clone> {
    name: &'static str,
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Notifier<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { name, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Returns how many subscribers the event reached.
    pub fn publish(&self, event: T) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!(event = self.name, "No subscribers");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let notifier: Notifier<u32> = Notifier::new("test", 4);
        assert_eq!(notifier.publish(1), 0);

        let mut rx = notifier.subscribe();
        assert_eq!(notifier.publish(2), 1);
        assert_eq!(rx.recv().await.unwrap(), 2);
    }
}
