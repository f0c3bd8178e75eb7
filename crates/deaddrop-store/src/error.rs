use thiserror::Error;

/// Errors produced by storage drivers.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The artifact (file or index) does not exist yet. Benign.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A path tried to escape its namespace.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Generic I/O error from the backend.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StorageError>;
