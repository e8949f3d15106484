use strata_store::StoreError;
use strata_types::{DataType, Value};

use crate::BoxError;

#[derive(Debug, thiserror::Error)]
/// An error that can occur while ingesting rows.
///
/// A failed batch is never partially appended, batches appended before the
/// failure remain in the store.
pub enum IngestError {
    #[error("Schema mismatch: {0}")]
    /// The batch columns or types differ from the store schema.
    SchemaMismatch(String),
    #[error("value {value} in column {column:?} at row {row} cannot be stored as {expected}")]
    /// A source value could not be coerced to its column type.
    TypeCoercion {
        column: String,
        /// The row offset within the failed batch.
        row: usize,
        value: Value,
        expected: DataType,
    },
    #[error(transparent)]
    /// The row source failed, the error is passed through unchanged.
    Source(BoxError),
    #[error("Store Error: {0}")]
    Store(StoreError),
    #[error("Ingestion cancelled")]
    Cancelled,
    #[error("Unknown row source: {0:?}")]
    UnknownSource(String),
    #[error("Row source already registered: {0:?}")]
    DuplicateSource(String),
    #[error("Invalid ingest options: {0}")]
    InvalidOptions(String),
}

impl From<StoreError> for IngestError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::SchemaMismatch(msg) => IngestError::SchemaMismatch(msg),
            StoreError::Cancelled => IngestError::Cancelled,
            other => IngestError::Store(other),
        }
    }
}
