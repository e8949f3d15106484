use std::io;

use crate::manifest::MetastoreError;

#[derive(Debug, thiserror::Error)]
/// An error that can occur while operating on a column store.
pub enum StoreError {
    #[error("IO Error: {0}")]
    /// An IO error that occurred while attempting to complete
    /// the operation.
    IoError(#[from] io::Error),
    #[error("Metastore Error: {0}")]
    /// An error that occurred when attempting to access the metastore.
    MetastoreError(MetastoreError),
    #[error("Store not found: {0:?}")]
    /// No store exists at the target path.
    StoreNotFound(String),
    #[error("Store already exists: {0:?}")]
    /// A store already exists at the target path.
    StoreAlreadyExists(String),
    #[error("Storage corrupted: {0}")]
    /// A manifest entry or segment file failed an integrity check.
    ///
    /// This is always fatal, the store never skips or truncates data
    /// to work around it.
    Corrupted(String),
    #[error("Schema mismatch: {0}")]
    /// The appended columns do not match the established store schema.
    SchemaMismatch(String),
    #[error("Column not found: {0:?}")]
    ColumnNotFound(String),
    #[error("Encode Error: {0}")]
    /// A column buffer could not be serialized.
    Encode(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Returns true if the error indicates on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corrupted(_))
    }
}

impl From<MetastoreError> for StoreError {
    fn from(value: MetastoreError) -> Self {
        match value {
            MetastoreError::Corrupted(msg) => StoreError::Corrupted(msg),
            other => StoreError::MetastoreError(other),
        }
    }
}
