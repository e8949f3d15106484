use async_trait::async_trait;
use strata_types::{Field, Schema, SchemaError, Value};

/// An opaque error produced by a row source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Default, PartialEq)]
/// A row-major batch of values described by named, typed columns.
pub struct RowBatch {
    pub columns: Vec<Field>,
    /// Rows of values, each row holding one value per column.
    pub rows: Vec<Vec<Value>>,
}

impl RowBatch {
    pub fn new(columns: Vec<Field>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The schema described by the batch columns.
    pub fn schema(&self) -> Result<Schema, SchemaError> {
        Schema::new(self.columns.clone())
    }
}

#[async_trait]
/// A source of rows.
///
/// Each call returns up to `max_rows` rows. `None`, an empty batch or a
/// batch with fewer than `max_rows` rows signals that the source is
/// exhausted. Errors are returned to the caller untouched.
pub trait RowSource: Send {
    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, BoxError>;
}

#[derive(Debug)]
/// A row source serving rows held in memory.
pub struct MemoryRowSource {
    columns: Vec<Field>,
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl MemoryRowSource {
    pub fn new(columns: Vec<Field>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
        }
    }

    /// The number of rows not yet served.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, BoxError> {
        let rows: Vec<Vec<Value>> = self.rows.by_ref().take(max_rows).collect();
        Ok(Some(RowBatch::new(self.columns.clone(), rows)))
    }
}

#[cfg(test)]
mod tests {
    use strata_types::DataType;

    use super::*;

    #[tokio::test]
    async fn test_memory_source_serves_batches() {
        let columns = vec![Field::new("n", DataType::Int64)];
        let rows = (0..5).map(|i| vec![Value::Int64(i)]).collect();
        let mut source = MemoryRowSource::new(columns, rows);

        let batch = source.next_batch(2).await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(source.remaining(), 3);

        source.next_batch(2).await.unwrap();
        let last = source.next_batch(2).await.unwrap().unwrap();
        assert_eq!(last.rows, vec![vec![Value::Int64(4)]]);

        let empty = source.next_batch(2).await.unwrap().unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_batch_schema_rejects_duplicates() {
        let batch = RowBatch::new(
            vec![Field::new("a", DataType::Int64), Field::new("a", DataType::Bool)],
            Vec::new(),
        );
        assert!(batch.schema().is_err());
    }
}
