//! The manifest tracks the schema, the set of visible segments and the
//! tombstones of a store.
//!
//! Durably it lives in an SQLite database, every change is applied as a
//! single transaction which bumps the manifest version. In memory the
//! current version is held as an immutable [Manifest] value which readers
//! share, a new value replaces it after every successful commit.

mod db;

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use roaring::RoaringBitmap;
use strata_types::Schema;

pub(crate) use self::db::Metastore;
use crate::segment::SegmentDescriptor;

#[derive(Debug, thiserror::Error)]
/// An error that can occur when the metastore attempts
/// to track a change in the store.
pub enum MetastoreError {
    #[error("metastore corrupted: {0}")]
    /// A metastore row could not be decoded.
    ///
    /// This should never occur unless manual tampering of the metastore
    /// was performed.
    Corrupted(String),
    #[error("manifest version conflict, expected {expected} found {found}")]
    /// The manifest was changed by another writer.
    VersionConflict { expected: u64, found: u64 },
    #[error("invalid config value for {key:?}: {error}")]
    InvalidConfig { key: String, error: String },
    #[error("SQLx Error: {0}")]
    SQLxError(#[from] sqlx::Error),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
/// The unique ID of a segment, also used as its file name.
pub struct SegmentId(pub(crate) ulid::Ulid);

impl SegmentId {
    #[allow(clippy::new_without_default)]
    /// Creates a new [SegmentId] with a unique ID.
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Display for SegmentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <ulid::Ulid as Display>::fmt(&self.0, f)
    }
}

impl FromStr for SegmentId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Default)]
/// An immutable version of the store manifest.
pub struct Manifest {
    pub(crate) version: u64,
    pub(crate) schema: Option<Schema>,
    pub(crate) next_row_id: u64,
    /// Segments ordered by their row id range.
    pub(crate) segments: Vec<SegmentDescriptor>,
    pub(crate) tombstones: ahash::HashMap<SegmentId, Arc<RoaringBitmap>>,
}

impl Manifest {
    #[inline]
    /// The version of the manifest, incremented on every commit.
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    /// The schema of the store, `None` until the first batch is ingested.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    #[inline]
    /// The row id the next appended row will receive.
    pub fn next_row_id(&self) -> u64 {
        self.next_row_id
    }

    #[inline]
    pub fn segments(&self) -> &[SegmentDescriptor] {
        &self.segments
    }

    /// Returns the tombstones of the given segment, if any rows are deleted.
    pub fn tombstones(&self, segment: SegmentId) -> Option<&Arc<RoaringBitmap>> {
        self.tombstones.get(&segment)
    }

    /// The number of rows physically stored in segments.
    pub fn stored_rows(&self) -> u64 {
        self.segments.iter().map(|s| s.row_count).sum()
    }

    /// The number of stored rows marked as deleted.
    pub fn deleted_rows(&self) -> u64 {
        self.tombstones.values().map(|t| t.len()).sum()
    }

    /// Produces the manifest which results from applying `commit`.
    pub(crate) fn apply(&self, commit: &ManifestCommit, version: u64) -> Manifest {
        let mut segments: Vec<SegmentDescriptor> = self
            .segments
            .iter()
            .filter(|s| !commit.removed.contains(&s.id))
            .cloned()
            .collect();
        segments.extend(commit.added.iter().cloned());
        segments.sort_by_key(|s| s.row_range.start);

        let mut tombstones = self.tombstones.clone();
        for id in commit.removed.iter() {
            tombstones.remove(id);
        }
        for (id, bitmap) in commit.tombstones.iter() {
            tombstones.insert(*id, bitmap.clone());
        }

        Manifest {
            version,
            schema: commit.schema.clone().or_else(|| self.schema.clone()),
            next_row_id: commit.next_row_id.max(self.next_row_id),
            segments,
            tombstones,
        }
    }
}

#[derive(Debug, Clone)]
/// A set of changes applied to the manifest as one atomic unit.
pub(crate) struct ManifestCommit {
    /// The version the change was prepared against.
    pub base_version: u64,
    pub schema: Option<Schema>,
    pub next_row_id: u64,
    pub added: Vec<SegmentDescriptor>,
    pub removed: Vec<SegmentId>,
    /// Replacement tombstone bitmaps, keyed by segment.
    pub tombstones: Vec<(SegmentId, Arc<RoaringBitmap>)>,
}

impl ManifestCommit {
    pub(crate) fn new(base: &Manifest) -> Self {
        Self {
            base_version: base.version,
            schema: None,
            next_row_id: base.next_row_id,
            added: Vec::new(),
            removed: Vec::new(),
            tombstones: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use strata_types::{DataType, Field};

    use super::*;
    use crate::segment::tests::descriptor;

    #[test]
    fn test_segment_id_round_trips_display() {
        let id = SegmentId::new();
        let parsed: SegmentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_apply_keeps_segments_ordered() {
        let base = Manifest::default();

        let mut commit = ManifestCommit::new(&base);
        commit.schema = Some(Schema::new(vec![Field::new("a", DataType::Int64)]).unwrap());
        commit.added = vec![descriptor(10..20), descriptor(0..10)];
        commit.next_row_id = 20;
        let manifest = base.apply(&commit, 1);

        assert_eq!(manifest.version(), 1);
        assert_eq!(manifest.next_row_id(), 20);
        assert!(manifest.schema().is_some());
        assert_eq!(manifest.segments()[0].row_range, 0..10);
        assert_eq!(manifest.segments()[1].row_range, 10..20);
        assert_eq!(manifest.stored_rows(), 20);
    }

    #[test]
    fn test_apply_removes_segments_and_tombstones() {
        let first = descriptor(0..10);
        let second = descriptor(10..20);

        let mut commit = ManifestCommit::new(&Manifest::default());
        commit.added = vec![first.clone(), second.clone()];
        let mut deleted = RoaringBitmap::new();
        deleted.insert(3);
        commit.tombstones = vec![(first.id, Arc::new(deleted))];
        let manifest = Manifest::default().apply(&commit, 1);
        assert_eq!(manifest.deleted_rows(), 1);

        let mut commit = ManifestCommit::new(&manifest);
        commit.removed = vec![first.id];
        let manifest = manifest.apply(&commit, 2);

        assert_eq!(manifest.segments().len(), 1);
        assert_eq!(manifest.segments()[0].id, second.id);
        assert_eq!(manifest.deleted_rows(), 0);
    }
}
