use crate::errors::SynclineError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error writing '{name}': {source}")]
    IoError {
        name: String,
        source: std::io::Error,
    },

    #[error("Failed to serialize value for '{name}': {message}")]
    SerializationError { name: String, message: String },
}

impl SynclineError for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            StorageError::IoError { .. } => "STORAGE_IO_ERROR",
            StorageError::SerializationError { .. } => "STORAGE_SERIALIZATION_ERROR",
        }
    }
}
