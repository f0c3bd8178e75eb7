//! # deaddrop-store
//!
//! Storage for the dead-drop delivery layer.
//!
//! Remote namespaces are reached through the [`RemoteStorage`] driver trait;
//! [`MemoryStorage`] and [`FsStorage`] implement it. Received offline messages
//! are kept in the in-memory [`OfflineMessageStore`], which deduplicates by
//! sender and message id.

pub mod driver;
pub mod fs;
pub mod memory;
pub mod messages;

mod error;

pub use driver::{PathStyle, RemoteStorage};
pub use error::{Result, StorageError};
pub use fs::FsStorage;
pub use memory::MemoryStorage;
pub use messages::OfflineMessageStore;
