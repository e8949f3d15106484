use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use moka::policy::EvictionPolicy;
use serde::de::DeserializeOwned;
use strata_types::ColumnData;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, instrument, trace};

use super::format::{DirectoryEntry, SegmentHeader, HEADER_LEN};
use super::{get_segment_file_path, BlockMeta, Codec, SegmentDescriptor};
use crate::manifest::SegmentId;
use crate::StoreError;

const ROW_IDS_BLOCK: usize = 0;

#[derive(Clone)]
enum CachedBlock {
    RowIds(Arc<Vec<u64>>),
    Column(Arc<ColumnData>),
}

/// The decoded row ids and requested columns of a segment.
#[derive(Debug)]
pub(crate) struct DecodedSegment {
    pub row_ids: Arc<Vec<u64>>,
    pub columns: Vec<Arc<ColumnData>>,
}

/// Reads and decodes segment blocks.
///
/// Decoded blocks are kept in an LFU cache keyed by segment and block,
/// segments are immutable so cached blocks never go stale.
pub(crate) struct SegmentReader {
    base_path: PathBuf,
    cache: moka::sync::Cache<(SegmentId, usize), CachedBlock, ahash::RandomState>,
}

impl SegmentReader {
    pub(crate) fn new(base_path: PathBuf, max_cached_blocks: u64) -> Self {
        let cache = moka::sync::CacheBuilder::new(max_cached_blocks)
            .eviction_policy(EvictionPolicy::tiny_lfu())
            .build_with_hasher(ahash::RandomState::new());

        Self { base_path, cache }
    }

    #[instrument(skip(self, descriptor), fields(segment_id = %descriptor.id))]
    /// Reads the row ids along with the columns at the given indices.
    pub(crate) async fn read(
        &self,
        descriptor: &SegmentDescriptor,
        columns: &[usize],
    ) -> Result<DecodedSegment, StoreError> {
        let mut file = None;

        let row_ids = match self.cache.get(&(descriptor.id, ROW_IDS_BLOCK)) {
            Some(CachedBlock::RowIds(row_ids)) => row_ids,
            _ => {
                let row_ids = Arc::new(
                    self.load_row_ids(&mut file, descriptor, descriptor.row_ids)
                        .await?,
                );
                self.cache.insert(
                    (descriptor.id, ROW_IDS_BLOCK),
                    CachedBlock::RowIds(row_ids.clone()),
                );
                row_ids
            },
        };

        let mut decoded = Vec::with_capacity(columns.len());
        for &idx in columns {
            let key = (descriptor.id, idx + 1);
            if let Some(CachedBlock::Column(column)) = self.cache.get(&key) {
                decoded.push(column);
                continue;
            }

            trace!(column = idx, "Column block not cached");
            let column = Arc::new(self.load_column(&mut file, descriptor, idx).await?);
            self.cache.insert(key, CachedBlock::Column(column.clone()));
            decoded.push(column);
        }

        Ok(DecodedSegment {
            row_ids,
            columns: decoded,
        })
    }

    /// Removes any cached blocks of the segment.
    pub(crate) fn evict(&self, descriptor: &SegmentDescriptor) {
        for idx in 0..=descriptor.columns.len() {
            self.cache.invalidate(&(descriptor.id, idx));
        }
    }

    #[instrument(skip(self, descriptor), fields(segment_id = %descriptor.id))]
    /// Checks the segment file matches its manifest entry.
    ///
    /// The file length, header and directory are always checked, with `deep`
    /// set every block is also read, checksummed and decoded.
    pub(crate) async fn verify(
        &self,
        descriptor: &SegmentDescriptor,
        deep: bool,
    ) -> Result<(), StoreError> {
        let path = get_segment_file_path(&self.base_path, descriptor.id);
        let mut file = open_segment(&path, descriptor.id).await?;

        let file_len = file.metadata().await?.len();
        if file_len != descriptor.file_len {
            return Err(StoreError::Corrupted(format!(
                "segment {} is {file_len} bytes, expected {}",
                descriptor.id, descriptor.file_len
            )));
        }

        let mut prefix = [0; HEADER_LEN];
        read_exact_or_corrupt(&mut file, &mut prefix, descriptor.id).await?;
        let (info, dir_len) = SegmentHeader::decode_prefix(&prefix)?;
        if (HEADER_LEN + dir_len) as u64 > file_len {
            return Err(StoreError::Corrupted(format!(
                "segment {} directory exceeds the file length",
                descriptor.id
            )));
        }

        let mut directory = vec![0; dir_len];
        read_exact_or_corrupt(&mut file, &mut directory, descriptor.id).await?;
        let header = SegmentHeader::decode_directory(info, &directory)?;

        let mut expected = Vec::with_capacity(descriptor.columns.len() + 1);
        expected.push(DirectoryEntry::row_ids(descriptor.row_ids));
        expected.extend(descriptor.columns.iter().map(DirectoryEntry::column));

        if header.codec != descriptor.codec
            || header.row_count != descriptor.row_count
            || header.entries != expected
        {
            return Err(StoreError::Corrupted(format!(
                "segment {} header does not match its manifest entry",
                descriptor.id
            )));
        }

        if !deep {
            return Ok(());
        }

        let mut file = Some(file);
        let row_ids = self
            .load_row_ids(&mut file, descriptor, descriptor.row_ids)
            .await?;
        if row_ids.windows(2).any(|w| w[0] >= w[1])
            || row_ids.first().copied() != Some(descriptor.row_range.start)
            || row_ids.last().map(|id| id + 1) != Some(descriptor.row_range.end)
        {
            return Err(StoreError::Corrupted(format!(
                "segment {} row ids do not match its row range",
                descriptor.id
            )));
        }

        for idx in 0..descriptor.columns.len() {
            self.load_column(&mut file, descriptor, idx).await?;
        }

        debug!("Segment verified");
        Ok(())
    }

    async fn load_row_ids(
        &self,
        file: &mut Option<File>,
        descriptor: &SegmentDescriptor,
        block: BlockMeta,
    ) -> Result<Vec<u64>, StoreError> {
        let bytes = self.read_block(file, descriptor, block).await?;
        let row_ids: Vec<u64> = decode_block(descriptor, &bytes, block)?;

        if row_ids.len() as u64 != descriptor.row_count {
            return Err(StoreError::Corrupted(format!(
                "segment {} holds {} row ids, expected {}",
                descriptor.id,
                row_ids.len(),
                descriptor.row_count
            )));
        }

        Ok(row_ids)
    }

    async fn load_column(
        &self,
        file: &mut Option<File>,
        descriptor: &SegmentDescriptor,
        idx: usize,
    ) -> Result<ColumnData, StoreError> {
        let meta = descriptor.columns.get(idx).ok_or_else(|| {
            StoreError::ColumnNotFound(format!("column #{idx} of segment {}", descriptor.id))
        })?;

        let bytes = self.read_block(file, descriptor, meta.block).await?;
        let column: ColumnData = decode_block(descriptor, &bytes, meta.block)?;

        if column.data_type() != meta.data_type {
            return Err(StoreError::Corrupted(format!(
                "segment {} column {:?} holds {} values, expected {}",
                descriptor.id,
                meta.name,
                column.data_type(),
                meta.data_type
            )));
        }

        if column.len() as u64 != descriptor.row_count {
            return Err(StoreError::Corrupted(format!(
                "segment {} column {:?} holds {} values, expected {} rows",
                descriptor.id,
                meta.name,
                column.len(),
                descriptor.row_count
            )));
        }

        Ok(column)
    }

    async fn read_block(
        &self,
        file: &mut Option<File>,
        descriptor: &SegmentDescriptor,
        block: BlockMeta,
    ) -> Result<Vec<u8>, StoreError> {
        if block.offset.saturating_add(block.length) > descriptor.file_len {
            return Err(StoreError::Corrupted(format!(
                "segment {} block at {} exceeds the file length",
                descriptor.id, block.offset
            )));
        }

        let mut handle = match file.take() {
            Some(handle) => handle,
            None => {
                let path = get_segment_file_path(&self.base_path, descriptor.id);
                open_segment(&path, descriptor.id).await?
            },
        };

        let mut buffer = vec![0; block.length as usize];
        let result = async {
            handle.seek(SeekFrom::Start(block.offset)).await?;
            read_exact_or_corrupt(&mut handle, &mut buffer, descriptor.id).await
        }
        .await;
        *file = Some(handle);
        result?;

        Ok(buffer)
    }
}

async fn open_segment(path: &std::path::Path, id: SegmentId) -> Result<File, StoreError> {
    match File::open(path).await {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::Corrupted(format!(
            "segment file {id} is missing"
        ))),
        Err(e) => Err(e.into()),
    }
}

async fn read_exact_or_corrupt(
    file: &mut File,
    buffer: &mut [u8],
    id: SegmentId,
) -> Result<(), StoreError> {
    match file.read_exact(buffer).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(StoreError::Corrupted(
            format!("segment file {id} is truncated"),
        )),
        Err(e) => Err(e.into()),
    }
}

fn decode_block<T: DeserializeOwned>(
    descriptor: &SegmentDescriptor,
    bytes: &[u8],
    block: BlockMeta,
) -> Result<T, StoreError> {
    if crc32fast::hash(bytes) != block.checksum {
        return Err(StoreError::Corrupted(format!(
            "segment {} block at {} failed its checksum",
            descriptor.id, block.offset
        )));
    }

    let corrupted = |e: &dyn std::fmt::Display| {
        StoreError::Corrupted(format!(
            "segment {} block at {} cannot be decoded: {e}",
            descriptor.id, block.offset
        ))
    };

    match descriptor.codec {
        Codec::None => rmp_serde::from_slice(bytes).map_err(|e| corrupted(&e)),
        Codec::Zstd => {
            let raw = zstd::decode_all(bytes).map_err(|e| corrupted(&e))?;
            rmp_serde::from_slice(&raw).map_err(|e| corrupted(&e))
        },
    }
}
