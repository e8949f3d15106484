//! Segment based columnar storage.
//!
//! A [ColumnStore] accepts column-major batches, buffers them in memory and
//! flushes them into immutable, compressed segment files. An SQLite backed
//! manifest records which segments are visible, the store schema and the
//! tombstones of deleted rows.

mod buffer;
mod config;
mod error;
mod manifest;
mod segment;
mod snapshot;
mod store;

pub use self::config::{FlushMode, MaybeUnset, StoreConfig};
pub use self::error::StoreError;
pub use self::manifest::{Manifest, MetastoreError, SegmentId};
pub use self::segment::{BlockMeta, Codec, ColumnChunkMeta, SegmentDescriptor};
pub use self::snapshot::{ScanChunk, StoreSnapshot};
pub use self::store::{
    CloseMode,
    ColumnStore,
    CompactionReport,
    StoreCreateOptions,
    StoreStats,
    VerifyReport,
};
