use std::sync::Arc;

use roaring::RoaringBitmap;
use strata_types::{ColumnData, Schema};

use crate::buffer::BufferView;
use crate::manifest::Manifest;
use crate::segment::{SegmentDescriptor, SegmentFile, SegmentReader};
use crate::StoreError;

#[derive(Debug, Clone, Default)]
/// The manifest and buffer state visible to new readers.
///
/// Both halves are swapped together so a reader never observes rows
/// twice or not at all while a flush moves them into a segment.
pub(crate) struct Published {
    pub manifest: Arc<Manifest>,
    pub buffer: BufferView,
}

#[derive(Debug, Clone)]
/// A run of rows read from a segment or from the write buffer.
pub struct ScanChunk {
    /// Row ids in ascending order.
    pub row_ids: Arc<Vec<u64>>,
    /// The requested columns, in request order.
    pub columns: Vec<Arc<ColumnData>>,
    /// Offsets within the chunk of rows which are deleted.
    pub deleted: Option<Arc<RoaringBitmap>>,
}

impl ScanChunk {
    #[inline]
    pub fn len(&self) -> usize {
        self.row_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    #[inline]
    pub fn is_deleted(&self, offset: usize) -> bool {
        self.deleted
            .as_ref()
            .is_some_and(|d| d.contains(offset as u32))
    }

    /// The number of rows in the chunk which are not deleted.
    pub fn live_rows(&self) -> usize {
        let deleted = self.deleted.as_ref().map(|d| d.len()).unwrap_or(0);
        self.len() - deleted as usize
    }
}

/// A consistent, point in time view of a store.
///
/// The snapshot keeps every segment it references alive, compaction may
/// retire segments concurrently but their files are only removed once
/// the last snapshot using them is dropped.
pub struct StoreSnapshot {
    manifest: Arc<Manifest>,
    buffer: BufferView,
    _pins: Vec<Arc<SegmentFile>>,
    reader: Arc<SegmentReader>,
}

impl std::fmt::Debug for StoreSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSnapshot")
            .field("version", &self.manifest.version())
            .field("segments", &self.manifest.segments().len())
            .field("buffered_rows", &self.buffer.rows())
            .finish()
    }
}

impl StoreSnapshot {
    pub(crate) fn new(
        published: Published,
        pins: Vec<Arc<SegmentFile>>,
        reader: Arc<SegmentReader>,
    ) -> Self {
        Self {
            manifest: published.manifest,
            buffer: published.buffer,
            _pins: pins,
            reader,
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.manifest.version()
    }

    #[inline]
    /// The store schema, `None` if nothing was ever appended.
    pub fn schema(&self) -> Option<&Schema> {
        self.manifest.schema()
    }

    #[inline]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    #[inline]
    /// The segments of the snapshot in row id order.
    pub fn segments(&self) -> &[SegmentDescriptor] {
        self.manifest.segments()
    }

    /// The number of rows visible in the snapshot.
    pub fn row_count(&self) -> u64 {
        self.manifest.stored_rows() - self.manifest.deleted_rows()
            + self.buffer.live_rows() as u64
    }

    /// The number of rows held in the write buffer.
    pub fn buffered_rows(&self) -> usize {
        self.buffer.rows()
    }

    /// Reads the given columns of the segment at `idx`.
    pub async fn read_segment(
        &self,
        idx: usize,
        columns: &[&str],
    ) -> Result<ScanChunk, StoreError> {
        let descriptor = self.manifest.segments().get(idx).ok_or_else(|| {
            StoreError::Corrupted(format!("snapshot has no segment #{idx}"))
        })?;

        let indices = columns
            .iter()
            .map(|name| {
                descriptor
                    .column_index(name)
                    .ok_or_else(|| StoreError::ColumnNotFound(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let decoded = self.reader.read(descriptor, &indices).await?;

        Ok(ScanChunk {
            row_ids: decoded.row_ids,
            columns: decoded.columns,
            deleted: self.manifest.tombstones(descriptor.id).cloned(),
        })
    }

    /// Reads the given columns of the buffered rows.
    ///
    /// Returns `None` if the buffer is empty.
    pub fn buffer_chunk(&self, columns: &[&str]) -> Result<Option<ScanChunk>, StoreError> {
        let Some(schema) = self.manifest.schema() else {
            return Ok(None);
        };

        let indices = columns
            .iter()
            .map(|name| {
                schema
                    .index_of(name)
                    .ok_or_else(|| StoreError::ColumnNotFound(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let Some((row_ids, columns)) = self.buffer.materialize(schema, &indices)? else {
            return Ok(None);
        };

        Ok(Some(ScanChunk {
            row_ids,
            columns,
            deleted: self.buffer.deleted(),
        }))
    }
}
