use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persistence write failed after {attempts} attempts: {reason}")]
    PersistenceWrite { attempts: u32, reason: String },
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(format!("sled: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
