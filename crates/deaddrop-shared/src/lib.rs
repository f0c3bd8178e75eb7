//! # deaddrop-shared
//!
//! Types shared by every crate of the dead-drop delivery layer: the wire
//! payloads written into remote namespaces, the sealed-envelope codec used to
//! encrypt them, and the local X25519 key pair.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use crypto::{CryptoCodec, SealedBoxCodec};
pub use error::{CryptoError, DeaddropError, IdentityError};
pub use identity::Keypair;
pub use protocol::{DeliveryState, DirectoryIndex, MessageRecord, Presence};
pub use types::{Contact, MessageId};
