use std::sync::Arc;
use std::time::{Duration, Instant};

use roaring::RoaringBitmap;
use strata_types::{ColumnData, Schema};

use crate::StoreError;

#[derive(Debug)]
/// A batch of appended rows held in memory until it is flushed.
pub(crate) struct BufferedBatch {
    pub first_row_id: u64,
    /// Columns in store schema order.
    pub columns: Vec<ColumnData>,
    pub rows: usize,
}

impl BufferedBatch {
    pub(crate) fn estimated_bytes(&self) -> usize {
        self.columns.iter().map(ColumnData::estimated_bytes).sum()
    }
}

#[derive(Debug, Default)]
/// Rows appended to the store but not yet written to a segment.
///
/// Buffered row ids are always contiguous, deletes are tracked as offsets
/// from the first buffered row.
pub(crate) struct WriteBuffer {
    batches: Vec<Arc<BufferedBatch>>,
    rows: usize,
    bytes: usize,
    deleted: RoaringBitmap,
    oldest: Option<Instant>,
}

impl WriteBuffer {
    pub(crate) fn push(&mut self, batch: BufferedBatch) {
        debug_assert!(self
            .next_row_id()
            .map_or(true, |next| next == batch.first_row_id));

        self.rows += batch.rows;
        self.bytes += batch.estimated_bytes();
        self.oldest.get_or_insert_with(Instant::now);
        self.batches.push(Arc::new(batch));
    }

    /// Removes the most recently pushed batch.
    pub(crate) fn pop(&mut self) -> Option<Arc<BufferedBatch>> {
        let batch = self.batches.pop()?;
        self.rows -= batch.rows;
        self.bytes -= batch.estimated_bytes();
        self.deleted
            .remove_range(self.rows as u32..(self.rows + batch.rows) as u32);
        if self.batches.is_empty() {
            self.oldest = None;
        }
        Some(batch)
    }

    #[inline]
    pub(crate) fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Buffered rows which have not been deleted.
    pub(crate) fn live_rows(&self) -> usize {
        self.rows - self.deleted.len() as usize
    }

    /// The time since the oldest buffered batch was appended.
    pub(crate) fn age(&self) -> Option<Duration> {
        self.oldest.map(|t| t.elapsed())
    }

    pub(crate) fn first_row_id(&self) -> Option<u64> {
        self.batches.first().map(|b| b.first_row_id)
    }

    fn next_row_id(&self) -> Option<u64> {
        self.first_row_id().map(|first| first + self.rows as u64)
    }

    /// Marks a buffered row as deleted.
    ///
    /// Returns false if the row id is not buffered or is already deleted.
    pub(crate) fn delete(&mut self, row_id: u64) -> bool {
        let (Some(first), Some(next)) = (self.first_row_id(), self.next_row_id()) else {
            return false;
        };

        if !(first..next).contains(&row_id) {
            return false;
        }

        self.deleted.insert((row_id - first) as u32)
    }

    /// Returns every buffered row as row ids and store ordered columns,
    /// together with the offsets of the deleted rows.
    ///
    /// Deleted rows are kept so they reach a segment alongside their
    /// tombstones, they are only dropped by compaction.
    pub(crate) fn flush_columns(
        &self,
        schema: &Schema,
    ) -> Result<(Vec<u64>, Vec<ColumnData>, RoaringBitmap), StoreError> {
        let all: Vec<usize> = (0..schema.len()).collect();
        let Some((row_ids, columns)) = self.view().materialize(schema, &all)? else {
            return Ok((Vec::new(), Vec::new(), RoaringBitmap::new()));
        };

        let columns = columns.into_iter().map(Arc::unwrap_or_clone).collect();
        Ok((Arc::unwrap_or_clone(row_ids), columns, self.deleted.clone()))
    }

    /// Clears the buffer after its rows were flushed.
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    /// A cheap, immutable view of the buffer for readers.
    pub(crate) fn view(&self) -> BufferView {
        BufferView {
            first_row_id: self.first_row_id().unwrap_or_default(),
            rows: self.rows,
            batches: Arc::from(self.batches.as_slice()),
            deleted: Arc::new(self.deleted.clone()),
        }
    }
}

#[derive(Debug, Clone)]
/// A point in time view of the buffered rows.
pub(crate) struct BufferView {
    first_row_id: u64,
    rows: usize,
    batches: Arc<[Arc<BufferedBatch>]>,
    deleted: Arc<RoaringBitmap>,
}

impl Default for BufferView {
    fn default() -> Self {
        Self {
            first_row_id: 0,
            rows: 0,
            batches: Arc::from(Vec::new()),
            deleted: Arc::new(RoaringBitmap::new()),
        }
    }
}

impl BufferView {
    #[inline]
    pub(crate) fn rows(&self) -> usize {
        self.rows
    }

    pub(crate) fn live_rows(&self) -> usize {
        self.rows - self.deleted.len() as usize
    }

    pub(crate) fn deleted(&self) -> Option<Arc<RoaringBitmap>> {
        if self.deleted.is_empty() {
            None
        } else {
            Some(self.deleted.clone())
        }
    }

    /// Concatenates the buffered batches for the given column indices.
    pub(crate) fn materialize(
        &self,
        schema: &Schema,
        columns: &[usize],
    ) -> Result<Option<(Arc<Vec<u64>>, Vec<Arc<ColumnData>>)>, StoreError> {
        if self.rows == 0 {
            return Ok(None);
        }

        let row_ids: Vec<u64> =
            (self.first_row_id..self.first_row_id + self.rows as u64).collect();

        let mut output = Vec::with_capacity(columns.len());
        for &idx in columns {
            let field = schema.fields().get(idx).ok_or_else(|| {
                StoreError::ColumnNotFound(format!("column #{idx} of the write buffer"))
            })?;

            let mut column = ColumnData::with_capacity(field.data_type, self.rows);
            for batch in self.batches.iter() {
                column
                    .extend_from(&batch.columns[idx])
                    .map_err(|e| StoreError::SchemaMismatch(e.to_string()))?;
            }
            output.push(Arc::new(column));
        }

        Ok(Some((Arc::new(row_ids), output)))
    }
}

#[cfg(test)]
mod tests {
    use strata_types::{DataType, Field};

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![Field::new("v", DataType::Int64)]).unwrap()
    }

    fn batch(first_row_id: u64, values: &[i64]) -> BufferedBatch {
        BufferedBatch {
            first_row_id,
            columns: vec![ColumnData::Int64(values.iter().copied().map(Some).collect())],
            rows: values.len(),
        }
    }

    #[test]
    fn test_buffer_materializes_in_order() {
        let mut buffer = WriteBuffer::default();
        buffer.push(batch(5, &[1, 2]));
        buffer.push(batch(7, &[3]));
        assert_eq!(buffer.rows(), 3);
        assert!(buffer.age().is_some());

        let (row_ids, columns) = buffer.view().materialize(&schema(), &[0]).unwrap().unwrap();
        assert_eq!(row_ids.as_slice(), &[5, 6, 7]);
        assert_eq!(*columns[0], ColumnData::Int64(vec![Some(1), Some(2), Some(3)]));
    }

    #[test]
    fn test_buffer_deletes_are_kept_for_flush() {
        let mut buffer = WriteBuffer::default();
        buffer.push(batch(0, &[10, 11, 12]));
        assert!(buffer.delete(1));
        assert!(!buffer.delete(1), "Row is already deleted");
        assert!(!buffer.delete(99), "Row is not buffered");
        assert_eq!(buffer.live_rows(), 2);

        let (row_ids, columns, deleted) = buffer.flush_columns(&schema()).unwrap();
        assert_eq!(row_ids, vec![0, 1, 2]);
        assert_eq!(columns[0], ColumnData::Int64(vec![Some(10), Some(11), Some(12)]));
        assert_eq!(deleted.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_pop_rolls_back_last_batch() {
        let mut buffer = WriteBuffer::default();
        buffer.push(batch(0, &[1]));
        buffer.push(batch(1, &[2, 3]));
        buffer.delete(2);

        let popped = buffer.pop().unwrap();
        assert_eq!(popped.first_row_id, 1);
        assert_eq!(buffer.rows(), 1);
        assert_eq!(buffer.live_rows(), 1);

        buffer.pop();
        assert!(buffer.is_empty());
        assert!(buffer.age().is_none());
    }
}
