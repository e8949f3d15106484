//! Immutable, compressed segment files.
//!
//! A segment holds a contiguous run of rows, stored column by column. Every
//! block in the file carries a CRC32 which is checked on every read, a
//! mismatch is always reported as corruption.

mod format;
mod reader;
mod writer;

use std::fmt::{Debug, Formatter};
use std::io::ErrorKind;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use strata_types::{ColumnStats, DataType};
use tracing::{debug, warn};

pub(crate) use self::reader::SegmentReader;
pub(crate) use self::writer::{encode_segment, write_segment_file};
use crate::manifest::SegmentId;

pub(crate) static SEGMENT_EXT: &str = "seg";
pub(crate) static TEMP_EXT: &str = "tmp";

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
/// The compression applied to every block of a segment.
pub enum Codec {
    None = 0,
    Zstd = 1,
}

impl Codec {
    pub(crate) fn from_compression_level(level: i32) -> Self {
        if level == 0 {
            Codec::None
        } else {
            Codec::Zstd
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Codec::None),
            1 => Some(Codec::Zstd),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
/// The location of an encoded block within a segment file.
pub struct BlockMeta {
    pub offset: u64,
    pub length: u64,
    /// CRC32 of the encoded bytes.
    pub checksum: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The location and statistics of one column within a segment.
pub struct ColumnChunkMeta {
    pub name: String,
    pub data_type: DataType,
    pub block: BlockMeta,
    pub stats: ColumnStats,
}

#[derive(Clone, PartialEq)]
/// The manifest entry describing a single segment file.
pub struct SegmentDescriptor {
    pub id: SegmentId,
    /// The range spanning the smallest and largest row id in the segment.
    ///
    /// Compacted segments can contain gaps, so the range length may be
    /// larger than `row_count`.
    pub row_range: Range<u64>,
    pub row_count: u64,
    pub file_len: u64,
    pub codec: Codec,
    pub row_ids: BlockMeta,
    pub columns: Vec<ColumnChunkMeta>,
}

impl Debug for SegmentDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentDescriptor")
            .field("id", &self.id)
            .field("row_range", &self.row_range)
            .field("row_count", &self.row_count)
            .field("file_len", &self.file_len)
            .finish_non_exhaustive()
    }
}

impl SegmentDescriptor {
    /// Returns the chunk metadata for the given column.
    pub fn column(&self, name: &str) -> Option<&ColumnChunkMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub(crate) fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    #[inline]
    /// Returns true if the row id lies within the segment row range.
    pub fn may_contain(&self, row_id: u64) -> bool {
        self.row_range.contains(&row_id)
    }

    pub(crate) fn layout(&self) -> SegmentLayout {
        SegmentLayout {
            row_ids: self.row_ids,
            columns: self.columns.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
/// The block directory of a segment as persisted in the manifest.
pub(crate) struct SegmentLayout {
    pub row_ids: BlockMeta,
    pub columns: Vec<ColumnChunkMeta>,
}

pub(crate) fn get_segment_file_path(base_path: &Path, id: SegmentId) -> PathBuf {
    base_path.join(format!("{id}.{SEGMENT_EXT}"))
}

pub(crate) fn get_temp_file_path(base_path: &Path, id: SegmentId) -> PathBuf {
    base_path.join(format!("{id}.{SEGMENT_EXT}.{TEMP_EXT}"))
}

/// A live segment file on disk.
///
/// Snapshots hold an [std::sync::Arc] of the file while they read from it.
/// Once a segment is retired by compaction, the file is removed when the
/// last holder drops it.
pub(crate) struct SegmentFile {
    id: SegmentId,
    path: PathBuf,
    retired: AtomicBool,
}

impl Debug for SegmentFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("id", &self.id)
            .field("retired", &self.retired.load(Ordering::Relaxed))
            .finish()
    }
}

impl SegmentFile {
    pub(crate) fn new(base_path: &Path, id: SegmentId) -> Self {
        Self {
            id,
            path: get_segment_file_path(base_path, id),
            retired: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> SegmentId {
        self.id
    }

    /// Marks the file for removal once it is no longer referenced.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

impl Drop for SegmentFile {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::Acquire) {
            return;
        }

        debug!(segment_id = %self.id, "Removing retired segment file");
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(error = ?e, segment_id = %self.id, "Failed to remove retired segment file");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A descriptor with no backing file, for manifest bookkeeping tests.
    pub(crate) fn descriptor(row_range: Range<u64>) -> SegmentDescriptor {
        let row_count = row_range.end - row_range.start;
        SegmentDescriptor {
            id: SegmentId::new(),
            row_range,
            row_count,
            file_len: 0,
            codec: Codec::Zstd,
            row_ids: BlockMeta {
                offset: 0,
                length: 0,
                checksum: 0,
            },
            columns: vec![ColumnChunkMeta {
                name: "a".to_string(),
                data_type: DataType::Int64,
                block: BlockMeta {
                    offset: 0,
                    length: 0,
                    checksum: 0,
                },
                stats: ColumnStats::default(),
            }],
        }
    }

    #[test]
    fn test_retired_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let id = SegmentId::new();
        let path = get_segment_file_path(dir.path(), id);
        std::fs::write(&path, b"data").unwrap();

        let file = SegmentFile::new(dir.path(), id);
        drop(file);
        assert!(path.exists(), "Live files must be kept");

        let file = SegmentFile::new(dir.path(), id);
        file.retire();
        drop(file);
        assert!(!path.exists(), "Retired files are removed on drop");
    }

    #[test]
    fn test_codec_tags() {
        assert_eq!(Codec::from_u8(Codec::Zstd.as_u8()), Some(Codec::Zstd));
        assert_eq!(Codec::from_u8(9), None);
        assert_eq!(Codec::from_compression_level(0), Codec::None);
    }
}
