use thiserror::Error;

use deaddrop_shared::error::{CryptoError, IdentityError};
use deaddrop_store::StorageError;

/// Errors surfaced by the delivery services.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The contact has no usable public key, so nothing can be sealed for it.
    #[error("No public key available for contact {0}")]
    MissingKey(String),

    /// A service was set up without something it needs.
    #[error("Construction error: {0}")]
    Construction(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
