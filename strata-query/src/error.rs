use strata_store::StoreError;
use strata_types::{DataType, SchemaError};

#[derive(Debug, thiserror::Error)]
/// An error that can occur while building or executing a query.
///
/// Build errors are returned before any data is read, execution errors
/// discard any partially computed result.
pub enum QueryError {
    #[error("Column not found: {0:?}")]
    ColumnNotFound(String),
    #[error("Type mismatch: {0}")]
    /// An operand or literal is not compatible with its column type.
    TypeMismatch(String),
    #[error("Join keys have incompatible types: {left} and {right}")]
    JoinKeyType { left: DataType, right: DataType },
    #[error("Duplicate column: {0:?}")]
    DuplicateColumn(String),
    #[error("Materializing {required} rows exceeds the limit of {limit} rows")]
    /// An operator needs more rows in memory than the configured bound.
    MemoryLimitExceeded { limit: usize, required: usize },
    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
    #[error("Cursor is not positioned on a row")]
    NoCurrentRow,
    #[error("Store Error: {0}")]
    Store(#[from] StoreError),
    #[error("Query cancelled")]
    Cancelled,
}

impl From<SchemaError> for QueryError {
    fn from(value: SchemaError) -> Self {
        match value {
            SchemaError::ColumnNotFound(name) => QueryError::ColumnNotFound(name),
            SchemaError::DuplicateColumn(name) => QueryError::DuplicateColumn(name),
        }
    }
}
