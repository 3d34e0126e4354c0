use thiserror::Error;

use taskwire_core::ports::{DirectoryError, MappingStoreError};

pub mod directory;
pub mod mapping;
pub mod memory;

pub use directory::JsonFileUserDirectory;
pub use mapping::SqlMappingStore;
pub use memory::{InMemoryMappingStore, InMemoryUserDirectory};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for MappingStoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Decode(message) => Self::Encode(message),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<RepositoryError> for DirectoryError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Decode(message) => Self::Malformed(message),
            other => Self::Unavailable(other.to_string()),
        }
    }
}
