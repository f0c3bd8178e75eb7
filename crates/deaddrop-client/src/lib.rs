//! # deaddrop-client
//!
//! Store-and-forward delivery for peers that have no live connection.
//!
//! Two services run on top of a [`deaddrop_store::RemoteStorage`] driver:
//! - [`OfflineMessagingService`] queues outgoing chat messages, drains them
//!   into recipients' dead-drops and polls contacts' dead-drops for new ones.
//! - [`HeartbeatService`] republishes the local user's presence to every
//!   contact and reads back the presence contacts left for us.
//!
//! Each service drives its loops with a [`scheduler::PeriodicTask`] and
//! reports through typed broadcast channels (see [`events`]).

pub mod config;
pub mod events;
pub mod heartbeat;
pub mod offline;
pub mod scheduler;

mod error;
#[cfg(test)]
mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::{NewMessages, OfflineSent, PresenceUpdated};
pub use heartbeat::HeartbeatService;
pub use offline::{OfflineMessagingService, WriteQueueEntry};

// State guarded here is never left half-updated, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
