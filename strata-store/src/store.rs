use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bon::Builder;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use serde::Serialize;
use strata_common::CancellationToken;
use strata_types::{ColumnData, Schema};
use tracing::{debug, info, instrument, trace, warn};

use crate::buffer::{BufferedBatch, WriteBuffer};
use crate::manifest::{Manifest, ManifestCommit, Metastore, SegmentId};
use crate::segment::{
    encode_segment,
    get_segment_file_path,
    write_segment_file,
    SegmentDescriptor,
    SegmentFile,
    SegmentReader,
    SEGMENT_EXT,
    TEMP_EXT,
};
use crate::snapshot::{Published, StoreSnapshot};
use crate::{FlushMode, MaybeUnset, StoreConfig, StoreError};

static SEGMENTS_PATH: &str = "segments";
static METASTORE_FILE: &str = "manifest.sqlite";

#[derive(Debug, Builder)]
/// Options that can be configured when creating a store.
pub struct StoreCreateOptions {
    #[builder(into)]
    /// The name of the store.
    name: String,
    #[builder(into)]
    /// The base path for the store on disk.
    path: PathBuf,
    #[builder(default)]
    /// The initial store config.
    config: StoreConfig,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
/// What happens to buffered rows when a store is closed.
pub enum CloseMode {
    /// Buffered rows are flushed into a segment.
    Flush,
    /// Buffered rows are dropped.
    Discard,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize)]
/// Row and storage statistics of a store.
///
/// `active_rows + deleted_rows == total_rows` always holds, buffered rows
/// are included in the row counts.
pub struct StoreStats {
    pub total_rows: u64,
    pub active_rows: u64,
    pub deleted_rows: u64,
    /// The number of segment files referenced by the manifest.
    pub storage_files: u64,
    /// The combined size of all referenced segment files.
    pub estimated_size_bytes: u64,
    pub buffered_rows: u64,
    pub manifest_version: u64,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize)]
pub struct CompactionReport {
    pub segments_removed: usize,
    pub segments_written: usize,
    /// Deleted rows physically removed.
    pub rows_dropped: u64,
    /// Live rows moved into new segments.
    pub rows_rewritten: u64,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize)]
pub struct VerifyReport {
    pub segments_checked: usize,
    pub rows_checked: u64,
    pub bytes_checked: u64,
}

struct WriterState {
    buffer: WriteBuffer,
    next_row_id: u64,
}

/// A columnar store of rows.
///
/// A store owns an SQLite manifest and a directory of immutable segment
/// files. Rows are appended in column-major batches and receive a
/// monotonically increasing row id, they are buffered in memory and
/// flushed into segments according to the configured [FlushMode].
///
/// Only one writer operates on a store at a time, the handle serializes
/// appends, flushes, deletes and compactions behind an internal lock.
/// Readers take a [StoreSnapshot] which is never affected by later writes.
///
/// ### File System Structure
///
/// ```text
/// base_path/
/// ├── manifest.sqlite
/// └── segments/
///     └── 01JCXNCND5Q2ANW5JD8F08DN3V.seg
///     └── 01JCXNCND4PG1S3317HA4JC2B6.seg
/// ```
///
/// #### `manifest.sqlite`
///
/// The schema, config, tombstones and the set of visible segments. A segment
/// file is only visible once the manifest transaction referencing it has
/// committed.
///
/// #### `segments/`
///
/// Segment files. Files which are not referenced by the manifest, e.g. left
/// over from a crash mid flush, are removed when the store is opened.
pub struct ColumnStore {
    name: String,
    config: StoreConfig,
    paths: StorePaths,
    metastore: Metastore,
    reader: Arc<SegmentReader>,
    /// Every segment file referenced by the current manifest.
    arena: RwLock<ahash::HashMap<SegmentId, Arc<SegmentFile>>>,
    published: RwLock<Published>,
    writer: tokio::sync::Mutex<WriterState>,
}

impl std::fmt::Debug for ColumnStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnStore")
            .field("name", &self.name)
            .field("path", &self.paths.base_path)
            .finish()
    }
}

impl ColumnStore {
    #[instrument(skip(options), fields(name = %options.name))]
    /// Creates a new, empty store.
    ///
    /// If a store already exists at the target path a
    /// [StoreError::StoreAlreadyExists] is returned.
    pub async fn create(options: StoreCreateOptions) -> Result<Self, StoreError> {
        let paths = StorePaths::from_base(options.path);

        if paths.metastore_exists()? {
            return Err(StoreError::StoreAlreadyExists(options.name));
        }

        paths.ensure_base_path_exists()?;
        paths.ensure_segments_path_exists()?;

        let metastore = Metastore::connect(&paths.metastore_sqlite_path()).await?;

        let mut config = options.config;
        config.name = MaybeUnset::Some(options.name);
        config.store_in_metastore(&metastore).await?;

        info!("Created store");
        Self::open_inner(config, paths, metastore).await
    }

    #[instrument]
    /// Opens an existing store.
    ///
    /// Every segment registered in the manifest is checked against its file,
    /// any mismatch fails with [StoreError::Corrupted].
    ///
    /// If no store exists at the path a [StoreError::StoreNotFound] is returned.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let paths = StorePaths::from_base(path.to_path_buf());

        if !paths.metastore_exists()? {
            return Err(StoreError::StoreNotFound(paths.guess_store_name()));
        }

        let metastore = Metastore::connect(&paths.metastore_sqlite_path()).await?;

        let mut config = StoreConfig::default();
        config.load_from_metastore(&metastore).await?;

        Self::open_inner(config, paths, metastore).await
    }

    async fn open_inner(
        config: StoreConfig,
        paths: StorePaths,
        metastore: Metastore,
    ) -> Result<Self, StoreError> {
        let name = config
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| paths.guess_store_name());

        let manifest = match metastore.load_manifest().await {
            Ok(manifest) => manifest,
            Err(e) => {
                metastore.close().await;
                return Err(e.into());
            },
        };

        let reader = Arc::new(SegmentReader::new(
            paths.segments_path.clone(),
            config.max_cached_columns(),
        ));

        if let Err(e) = check_manifest(&manifest, &reader).await {
            metastore.close().await;
            return Err(e);
        }

        paths.remove_orphaned_files(&manifest)?;

        let arena = manifest
            .segments()
            .iter()
            .map(|s| (s.id, Arc::new(SegmentFile::new(&paths.segments_path, s.id))))
            .collect();

        info!(
            name = %name,
            version = manifest.version(),
            segments = manifest.segments().len(),
            "Opened store"
        );

        let writer = WriterState {
            buffer: WriteBuffer::default(),
            next_row_id: manifest.next_row_id(),
        };

        let published = Published {
            manifest: Arc::new(manifest),
            buffer: Default::default(),
        };

        Ok(Self {
            name,
            config,
            paths,
            metastore,
            reader,
            arena: RwLock::new(arena),
            published: RwLock::new(published),
            writer: tokio::sync::Mutex::new(writer),
        })
    }

    /// Returns the name of the store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a reference to the config the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the path the store is mounted to.
    pub fn path(&self) -> &Path {
        self.paths.base_path.as_path()
    }

    /// The store schema, `None` until the first batch is appended.
    pub fn schema(&self) -> Option<Schema> {
        self.published.read().manifest.schema().cloned()
    }

    /// The current manifest version.
    pub fn version(&self) -> u64 {
        self.published.read().manifest.version()
    }

    /// Captures a consistent view of the store for reading.
    pub fn snapshot(&self) -> StoreSnapshot {
        // The arena lock is held while the published state is read so every
        // segment of the captured manifest is still registered.
        let arena = self.arena.read();
        let published = self.published.read().clone();

        let pins = published
            .manifest
            .segments()
            .iter()
            .filter_map(|s| arena.get(&s.id).cloned())
            .collect();

        StoreSnapshot::new(published, pins, self.reader.clone())
    }

    #[instrument(skip(self, schema, columns), fields(store = %self.name))]
    /// Appends a column-major batch to the store returning the row ids
    /// assigned to its rows.
    ///
    /// The first batch establishes the store schema, later batches must have
    /// the same column names and types, in any order. Appended rows are
    /// visible to snapshots taken after the call returns, whether they are
    /// durable depends on the [FlushMode].
    ///
    /// If the call fails the batch is not part of the store.
    pub async fn append_batch(
        &self,
        schema: &Schema,
        columns: Vec<ColumnData>,
    ) -> Result<Range<u64>, StoreError> {
        let rows = validate_batch(schema, &columns)?;

        let mut state = self.writer.lock().await;

        let manifest = self.current_manifest();
        let columns = match manifest.schema() {
            Some(existing) => reorder_to_schema(existing, schema, columns)?,
            None => {
                info!(schema = %schema, "Establishing store schema");
                let mut commit = ManifestCommit::new(&manifest);
                commit.schema = Some(schema.clone());
                self.commit(&manifest, commit, &state.buffer).await?;
                columns
            },
        };

        let first_row_id = state.next_row_id;
        let row_ids = first_row_id..first_row_id + rows as u64;
        if rows == 0 {
            return Ok(row_ids);
        }

        state.buffer.push(BufferedBatch {
            first_row_id,
            columns,
            rows,
        });
        state.next_row_id = row_ids.end;
        trace!(rows = rows, buffered = state.buffer.rows(), "Buffered batch");

        if self.should_flush(&state.buffer) {
            if let Err(e) = self.flush_locked(&mut state).await {
                warn!(error = ?e, "Flush failed, rolling back appended batch");
                state.buffer.pop();
                state.next_row_id = first_row_id;
                self.publish_buffer(&state.buffer);
                return Err(e);
            }
        } else {
            self.publish_buffer(&state.buffer);
        }

        Ok(row_ids)
    }

    fn should_flush(&self, buffer: &WriteBuffer) -> bool {
        match self.config.flush_mode() {
            FlushMode::Durable => true,
            FlushMode::HighThroughput => {
                buffer.rows() >= self.config.max_buffer_rows()
                    || buffer.bytes() >= self.config.max_buffer_bytes()
                    || buffer
                        .age()
                        .is_some_and(|age| age >= self.config.max_buffer_age())
            },
        }
    }

    #[instrument(skip(self), fields(store = %self.name))]
    /// Writes all buffered rows into new segments.
    ///
    /// Segment files are durably written before the manifest references
    /// them, the buffer is only cleared once the manifest commit succeeds.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.writer.lock().await;
        self.flush_locked(&mut state).await
    }

    async fn flush_locked(&self, state: &mut WriterState) -> Result<(), StoreError> {
        if state.buffer.is_empty() {
            return Ok(());
        }

        let manifest = self.current_manifest();
        let schema = manifest.schema().cloned().ok_or_else(|| {
            StoreError::SchemaMismatch("buffered rows without a store schema".into())
        })?;

        let (row_ids, columns, deleted) = state.buffer.flush_columns(&schema)?;
        let mut written = Vec::new();
        if let Err(e) = self
            .write_segments(&schema, &row_ids, &columns, &mut written)
            .await
        {
            self.remove_segment_files(&written).await;
            return Err(e);
        }

        let mut commit = ManifestCommit::new(&manifest);
        commit.next_row_id = state.next_row_id;
        commit.tombstones = split_tombstones(&deleted, &written);
        commit.added = written;

        if let Err(e) = self.commit(&manifest, commit.clone(), &WriteBuffer::default()).await {
            self.remove_segment_files(&commit.added).await;
            return Err(e);
        }

        debug!(
            rows = row_ids.len(),
            deleted = deleted.len(),
            segments = commit.added.len(),
            "Flushed write buffer"
        );
        state.buffer.clear();

        Ok(())
    }

    /// Encodes and writes the rows as segments of at most `max_segment_rows`.
    async fn write_segments(
        &self,
        schema: &Schema,
        row_ids: &[u64],
        columns: &[ColumnData],
        written: &mut Vec<SegmentDescriptor>,
    ) -> Result<(), StoreError> {
        let max_rows = self.config.max_segment_rows();
        let level = self.config.compression_level();

        let mut start = 0;
        while start < row_ids.len() {
            let end = (start + max_rows).min(row_ids.len());
            let chunk: Vec<ColumnData> = columns.iter().map(|c| c.slice(start..end)).collect();

            let encoded = encode_segment(&row_ids[start..end], schema.fields(), &chunk, level)?;
            write_segment_file(&self.paths.segments_path, encoded.descriptor.id, &encoded.bytes)
                .await?;
            trace!(segment_id = %encoded.descriptor.id, rows = end - start, "Wrote segment");

            written.push(encoded.descriptor);
            start = end;
        }

        Ok(())
    }

    #[instrument(skip(self, row_ids), fields(store = %self.name, requested = row_ids.len()))]
    /// Marks the given rows as deleted, returning the number of rows newly
    /// deleted.
    ///
    /// Unknown or already deleted row ids are ignored. Stored bytes are only
    /// reclaimed by [ColumnStore::compact].
    pub async fn delete(&self, row_ids: &[u64]) -> Result<u64, StoreError> {
        let mut state = self.writer.lock().await;
        let manifest = self.current_manifest();
        let segments = manifest.segments();

        let mut deleted = 0;
        let mut buffer_changed = false;
        let mut per_segment: std::collections::BTreeMap<usize, Vec<u64>> = Default::default();
        for &row_id in row_ids {
            if state.buffer.delete(row_id) {
                deleted += 1;
                buffer_changed = true;
                continue;
            }

            let idx = segments.partition_point(|s| s.row_range.end <= row_id);
            if segments.get(idx).is_some_and(|s| s.may_contain(row_id)) {
                per_segment.entry(idx).or_default().push(row_id);
            }
        }

        let mut tombstones = Vec::new();
        for (idx, ids) in per_segment {
            let descriptor = &segments[idx];
            let decoded = self.reader.read(descriptor, &[]).await?;

            let mut bitmap = manifest
                .tombstones(descriptor.id)
                .map(|t| RoaringBitmap::clone(t))
                .unwrap_or_default();
            let before = bitmap.len();
            for row_id in ids {
                if let Ok(offset) = decoded.row_ids.binary_search(&row_id) {
                    bitmap.insert(offset as u32);
                }
            }

            if bitmap.len() > before {
                deleted += bitmap.len() - before;
                tombstones.push((descriptor.id, Arc::new(bitmap)));
            }
        }

        if !tombstones.is_empty() {
            let mut commit = ManifestCommit::new(&manifest);
            commit.tombstones = tombstones;
            self.commit(&manifest, commit, &state.buffer).await?;
        } else if buffer_changed {
            self.publish_buffer(&state.buffer);
        }

        debug!(deleted = deleted, "Deleted rows");
        Ok(deleted)
    }

    /// Rewrites segments to drop deleted rows and merge small segments.
    pub async fn compact(&self) -> Result<CompactionReport, StoreError> {
        self.compact_with(&CancellationToken::new()).await
    }

    #[instrument(skip(self, cancel), fields(store = %self.name))]
    /// Rewrites segments to drop deleted rows and merge small segments,
    /// checking for cancellation between segments.
    ///
    /// Old segments are only retired once the new manifest is committed,
    /// snapshots taken beforehand keep reading the old files. A cancelled
    /// compaction leaves the store unchanged.
    pub async fn compact_with(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CompactionReport, StoreError> {
        let mut state = self.writer.lock().await;
        self.flush_locked(&mut state).await?;

        let manifest = self.current_manifest();
        let Some(schema) = manifest.schema().cloned() else {
            return Ok(CompactionReport::default());
        };

        let runs = plan_compaction(&manifest, self.config.max_segment_rows());
        if runs.is_empty() {
            debug!("Nothing to compact");
            return Ok(CompactionReport::default());
        }

        let mut written = Vec::new();
        let mut report = CompactionReport::default();
        let result = self
            .rewrite_runs(&manifest, &schema, &runs, cancel, &mut written, &mut report)
            .await;
        if let Err(e) = result {
            self.remove_segment_files(&written).await;
            return Err(e);
        }

        let mut commit = ManifestCommit::new(&manifest);
        commit.removed = runs.iter().flatten().map(|&idx| manifest.segments()[idx].id).collect();
        commit.added = written;

        if let Err(e) = self.commit(&manifest, commit.clone(), &state.buffer).await {
            self.remove_segment_files(&commit.added).await;
            return Err(e);
        }

        report.segments_removed = commit.removed.len();
        report.segments_written = commit.added.len();
        info!(
            removed = report.segments_removed,
            written = report.segments_written,
            rows_dropped = report.rows_dropped,
            "Compaction complete"
        );

        Ok(report)
    }

    async fn rewrite_runs(
        &self,
        manifest: &Manifest,
        schema: &Schema,
        runs: &[Vec<usize>],
        cancel: &CancellationToken,
        written: &mut Vec<SegmentDescriptor>,
        report: &mut CompactionReport,
    ) -> Result<(), StoreError> {
        let all_columns: Vec<usize> = (0..schema.len()).collect();

        for run in runs {
            let mut row_ids = Vec::new();
            let mut columns: Vec<ColumnData> = schema
                .fields()
                .iter()
                .map(|f| ColumnData::with_capacity(f.data_type, 0))
                .collect();

            for &idx in run {
                if cancel.is_cancelled() {
                    info!("Compaction cancelled");
                    return Err(StoreError::Cancelled);
                }

                let descriptor = &manifest.segments()[idx];
                let decoded = self.reader.read(descriptor, &all_columns).await?;

                let keep: Vec<usize> = match manifest.tombstones(descriptor.id) {
                    None => (0..decoded.row_ids.len()).collect(),
                    Some(deleted) => (0..decoded.row_ids.len())
                        .filter(|offset| !deleted.contains(*offset as u32))
                        .collect(),
                };

                report.rows_dropped += (decoded.row_ids.len() - keep.len()) as u64;
                report.rows_rewritten += keep.len() as u64;

                row_ids.extend(keep.iter().map(|&i| decoded.row_ids[i]));
                for (column, source) in columns.iter_mut().zip(decoded.columns.iter()) {
                    column
                        .extend_from(&source.take(&keep))
                        .map_err(|e| StoreError::Corrupted(e.to_string()))?;
                }
            }

            self.write_segments(schema, &row_ids, &columns, written).await?;
        }

        Ok(())
    }

    /// Returns the row and storage statistics of the store.
    pub fn stats(&self) -> StoreStats {
        let published = self.published.read().clone();
        let manifest = &published.manifest;
        let buffer = &published.buffer;

        let buffered_deleted = (buffer.rows() - buffer.live_rows()) as u64;
        let total_rows = manifest.stored_rows() + buffer.rows() as u64;
        let deleted_rows = manifest.deleted_rows() + buffered_deleted;

        StoreStats {
            total_rows,
            active_rows: total_rows - deleted_rows,
            deleted_rows,
            storage_files: manifest.segments().len() as u64,
            estimated_size_bytes: manifest.segments().iter().map(|s| s.file_len).sum(),
            buffered_rows: buffer.rows() as u64,
            manifest_version: manifest.version(),
        }
    }

    #[instrument(skip(self), fields(store = %self.name))]
    /// Reads and checks every block of every segment.
    pub async fn verify(&self) -> Result<VerifyReport, StoreError> {
        let snapshot = self.snapshot();
        let manifest = snapshot.manifest();

        let mut report = VerifyReport::default();
        for descriptor in manifest.segments() {
            self.reader.verify(descriptor, true).await?;
            check_tombstones(manifest, descriptor)?;

            report.segments_checked += 1;
            report.rows_checked += descriptor.row_count;
            report.bytes_checked += descriptor.file_len;
        }

        info!(
            segments = report.segments_checked,
            rows = report.rows_checked,
            "Store verified"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(store = %self.name))]
    /// Persists config changes, they are applied the next time the store
    /// is opened.
    pub async fn update_config(&self, config: StoreConfig) -> Result<(), StoreError> {
        config.store_in_metastore(&self.metastore).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(store = %self.name))]
    /// Closes the store, flushing or discarding buffered rows.
    ///
    /// The manifest connections are released even if the flush fails.
    pub async fn close(self, mode: CloseMode) -> Result<(), StoreError> {
        let result = {
            let mut state = self.writer.lock().await;
            let result = match mode {
                CloseMode::Flush => self.flush_locked(&mut state).await,
                CloseMode::Discard => Ok(()),
            };

            if !state.buffer.is_empty() {
                warn!(rows = state.buffer.rows(), "Discarding buffered rows");
                state.buffer.clear();
            }

            result
        };

        self.metastore.close().await;
        info!("Closed store");
        result
    }

    fn current_manifest(&self) -> Arc<Manifest> {
        self.published.read().manifest.clone()
    }

    fn publish_buffer(&self, buffer: &WriteBuffer) {
        self.published.write().buffer = buffer.view();
    }

    /// Commits the change and publishes the resulting manifest alongside
    /// the given buffer state.
    async fn commit(
        &self,
        base: &Manifest,
        commit: ManifestCommit,
        buffer: &WriteBuffer,
    ) -> Result<(), StoreError> {
        let version = self.metastore.commit(&commit).await?;
        let manifest = Arc::new(base.apply(&commit, version));

        {
            let mut arena = self.arena.write();
            for descriptor in commit.added.iter() {
                let file = SegmentFile::new(&self.paths.segments_path, descriptor.id);
                arena.insert(descriptor.id, Arc::new(file));
            }
        }

        *self.published.write() = Published {
            manifest,
            buffer: buffer.view(),
        };

        if commit.removed.is_empty() {
            return Ok(());
        }

        let mut arena = self.arena.write();
        for id in commit.removed.iter() {
            if let Some(file) = arena.remove(id) {
                debug!(segment_id = %file.id(), "Retiring segment");
                file.retire();
            }
            if let Some(descriptor) = base.segments().iter().find(|s| s.id == *id) {
                self.reader.evict(descriptor);
            }
        }

        Ok(())
    }

    async fn remove_segment_files(&self, descriptors: &[SegmentDescriptor]) {
        for descriptor in descriptors {
            let path = get_segment_file_path(&self.paths.segments_path, descriptor.id);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(error = ?e, segment_id = %descriptor.id, "Failed to remove unused segment file");
            }
        }
    }
}

impl Drop for ColumnStore {
    fn drop(&mut self) {
        let state = self.writer.get_mut();
        if !state.buffer.is_empty() {
            warn!(
                store = %self.name,
                rows = state.buffer.rows(),
                "Store dropped without being closed, buffered rows are discarded"
            );
        }
    }
}

/// Checks the batch is internally consistent, returning its row count.
fn validate_batch(schema: &Schema, columns: &[ColumnData]) -> Result<usize, StoreError> {
    if schema.len() != columns.len() {
        return Err(StoreError::SchemaMismatch(format!(
            "schema has {} columns but {} were provided",
            schema.len(),
            columns.len()
        )));
    }

    for (field, column) in schema.fields().iter().zip(columns) {
        if field.data_type != column.data_type() {
            return Err(StoreError::SchemaMismatch(format!(
                "column {:?} is declared as {} but holds {} values",
                field.name,
                field.data_type,
                column.data_type()
            )));
        }
    }

    let rows = columns.first().map(ColumnData::len).unwrap_or(0);
    if columns.iter().any(|c| c.len() != rows) {
        return Err(StoreError::SchemaMismatch(
            "columns of a batch must have the same length".into(),
        ));
    }

    Ok(rows)
}

/// Reorders the batch columns into the store schema order.
fn reorder_to_schema(
    store: &Schema,
    batch: &Schema,
    columns: Vec<ColumnData>,
) -> Result<Vec<ColumnData>, StoreError> {
    if !store.same_columns(batch) {
        return Err(StoreError::SchemaMismatch(format!(
            "batch columns ({batch}) do not match the store schema ({store})"
        )));
    }

    let mut slots: Vec<Option<ColumnData>> = columns.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(slots.len());
    for field in store.fields() {
        let idx = batch
            .index_of(&field.name)
            .ok_or_else(|| StoreError::ColumnNotFound(field.name.clone()))?;
        let found = batch.fields()[idx].data_type;
        if found != field.data_type {
            return Err(StoreError::SchemaMismatch(format!(
                "column {:?} is {} in the store but {found} in the batch",
                field.name, field.data_type
            )));
        }
        let column = slots[idx]
            .take()
            .ok_or_else(|| StoreError::SchemaMismatch(format!("duplicate column {:?}", field.name)))?;
        ordered.push(column);
    }

    Ok(ordered)
}

/// Maps buffer offsets of deleted rows onto the segments the buffer was
/// written into, in order.
fn split_tombstones(
    deleted: &RoaringBitmap,
    segments: &[SegmentDescriptor],
) -> Vec<(SegmentId, Arc<RoaringBitmap>)> {
    let mut tombstones = Vec::new();
    let mut start = 0u32;
    for descriptor in segments {
        let end = start + descriptor.row_count as u32;
        let bitmap: RoaringBitmap = deleted
            .iter()
            .skip_while(|&offset| offset < start)
            .take_while(|&offset| offset < end)
            .map(|offset| offset - start)
            .collect();
        if !bitmap.is_empty() {
            tombstones.push((descriptor.id, Arc::new(bitmap)));
        }
        start = end;
    }
    tombstones
}

/// Groups adjacent segments worth rewriting.
///
/// Segments with tombstones or less than half of `max_segment_rows` rows are
/// candidates, a run of candidates is rewritten if it drops deleted rows or
/// merges at least two segments.
fn plan_compaction(manifest: &Manifest, max_segment_rows: usize) -> Vec<Vec<usize>> {
    let small = (max_segment_rows / 2).max(1) as u64;

    let mut runs = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    for (idx, segment) in manifest.segments().iter().enumerate() {
        let has_tombstones = manifest.tombstones(segment.id).is_some();
        if has_tombstones || segment.row_count < small {
            current.push(idx);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    runs.retain(|run| {
        run.len() >= 2
            || run
                .iter()
                .any(|&idx| manifest.tombstones(manifest.segments()[idx].id).is_some())
    });
    runs
}

/// Checks the manifest is consistent with itself and with the segment files.
async fn check_manifest(manifest: &Manifest, reader: &SegmentReader) -> Result<(), StoreError> {
    let segments = manifest.segments();

    for pair in segments.windows(2) {
        if pair[0].row_range.end > pair[1].row_range.start {
            return Err(StoreError::Corrupted(format!(
                "segments {} and {} have overlapping row ranges",
                pair[0].id, pair[1].id
            )));
        }
    }

    if let Some(last) = segments.last() {
        if last.row_range.end > manifest.next_row_id() {
            return Err(StoreError::Corrupted(format!(
                "segment {} holds row ids beyond the manifest row id counter",
                last.id
            )));
        }
    }

    if !segments.is_empty() && manifest.schema().is_none() {
        return Err(StoreError::Corrupted("segments exist without a schema".into()));
    }

    for descriptor in segments {
        if let Some(schema) = manifest.schema() {
            let matches = descriptor.columns.len() == schema.len()
                && descriptor
                    .columns
                    .iter()
                    .zip(schema.fields())
                    .all(|(c, f)| c.name == f.name && c.data_type == f.data_type);
            if !matches {
                return Err(StoreError::Corrupted(format!(
                    "segment {} columns do not match the store schema",
                    descriptor.id
                )));
            }
        }

        check_tombstones(manifest, descriptor)?;
        reader.verify(descriptor, false).await?;
    }

    Ok(())
}

fn check_tombstones(manifest: &Manifest, descriptor: &SegmentDescriptor) -> Result<(), StoreError> {
    let Some(tombstones) = manifest.tombstones(descriptor.id) else {
        return Ok(());
    };

    if tombstones.max().is_some_and(|max| max as u64 >= descriptor.row_count) {
        return Err(StoreError::Corrupted(format!(
            "segment {} tombstones reference rows beyond the segment",
            descriptor.id
        )));
    }

    Ok(())
}

struct StorePaths {
    metastore_path: PathBuf,
    segments_path: PathBuf,
    base_path: PathBuf,
}

impl StorePaths {
    fn from_base(base_path: PathBuf) -> Self {
        Self {
            metastore_path: base_path.join(METASTORE_FILE),
            segments_path: base_path.join(SEGMENTS_PATH),
            base_path,
        }
    }

    fn metastore_exists(&self) -> io::Result<bool> {
        self.metastore_path.try_exists()
    }

    fn metastore_sqlite_path(&self) -> String {
        format!("sqlite:{}", self.metastore_path.display())
    }

    fn guess_store_name(&self) -> String {
        if let Some(dir) = self.base_path.file_name() {
            dir.to_string_lossy().to_string()
        } else {
            self.base_path.display().to_string()
        }
    }

    fn ensure_base_path_exists(&self) -> io::Result<()> {
        if self.base_path.try_exists()? {
            return Ok(());
        }

        info!(path = %self.base_path.display(), "Create store path");
        std::fs::create_dir_all(self.base_path.as_path())
    }

    fn ensure_segments_path_exists(&self) -> io::Result<()> {
        if self.segments_path.try_exists()? {
            return Ok(());
        }

        info!(path = %self.segments_path.display(), "Create segments path");
        std::fs::create_dir(self.segments_path.as_path())
    }

    /// Removes segment and temporary files the manifest does not reference.
    fn remove_orphaned_files(&self, manifest: &Manifest) -> io::Result<()> {
        if !self.segments_path.try_exists()? {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("segments directory {} is missing", self.segments_path.display()),
            ));
        }

        for entry in std::fs::read_dir(&self.segments_path)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let orphaned = if file_name.ends_with(&format!(".{SEGMENT_EXT}.{TEMP_EXT}")) {
                true
            } else if let Some(stem) = file_name.strip_suffix(&format!(".{SEGMENT_EXT}")) {
                match stem.parse::<SegmentId>() {
                    Ok(id) => !manifest.segments().iter().any(|s| s.id == id),
                    Err(_) => false,
                }
            } else {
                false
            };

            if orphaned {
                info!(path = %path.display(), "Removing orphaned segment file");
                std::fs::remove_file(&path)?;
            }
        }

        Ok(())
    }
}
