use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use roaring::RoaringBitmap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::FromRow;
use strata_types::Schema;
use tracing::{debug, warn};

use super::{Manifest, ManifestCommit, MetastoreError, SegmentId};
use crate::segment::{Codec, SegmentDescriptor, SegmentLayout};

const POOL_SIZE: u32 = if cfg!(test) { 1 } else { 4 };

#[derive(Clone)]
/// The SQLite database backing the manifest of a store.
pub(crate) struct Metastore {
    pool: sqlx::SqlitePool,
}

impl std::fmt::Debug for Metastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Metastore")
    }
}

impl Metastore {
    /// Attempts to connect to the SQLite database at the given path.
    pub(crate) async fn connect(path: &str) -> Result<Self, MetastoreError> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(10))
            .acquire_slow_threshold(Duration::from_secs(1))
            .max_connections(POOL_SIZE)
            .connect_with(options)
            .await?;

        let slf = Self { pool };

        slf.setup_tables().await?;

        Ok(slf)
    }

    /// Closes all connections of the pool.
    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }

    async fn setup_tables(&self) -> Result<(), MetastoreError> {
        let query = r#"
        CREATE TABLE IF NOT EXISTS strata__config (
            key TEXT NOT NULL PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS strata__state (
            id INTEGER NOT NULL PRIMARY KEY CHECK (id = 0),
            version BIGINT NOT NULL,
            next_row_id BIGINT NOT NULL,
            schema_json TEXT
        );

        INSERT OR IGNORE INTO strata__state (id, version, next_row_id, schema_json)
        VALUES (0, 0, 0, NULL);

        CREATE TABLE IF NOT EXISTS strata__segments (
            segment_id TEXT NOT NULL PRIMARY KEY,
            row_start BIGINT NOT NULL,
            row_end BIGINT NOT NULL,
            row_count BIGINT NOT NULL,
            file_len BIGINT NOT NULL,
            codec INTEGER NOT NULL,
            layout_json TEXT NOT NULL,
            created_at BIGINT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS segment_order ON strata__segments (row_start);

        CREATE TABLE IF NOT EXISTS strata__tombstones (
            segment_id TEXT NOT NULL PRIMARY KEY,
            bitmap BLOB NOT NULL
        );
        "#;

        sqlx::query(query).execute(&self.pool).await?;

        Ok(())
    }

    /// Returns the stored config value for the given key.
    pub(crate) async fn get_config_value<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, MetastoreError> {
        let query = r#"
            SELECT value FROM strata__config WHERE key = ?;
        "#;

        let raw: Option<String> = sqlx::query_scalar(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(raw) = raw else { return Ok(None) };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| MetastoreError::InvalidConfig {
                key: key.to_string(),
                error: e.to_string(),
            })
    }

    /// Sets the config value for the given key.
    pub(crate) async fn set_config_value<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), MetastoreError> {
        let raw =
            serde_json::to_string(value).map_err(|e| MetastoreError::InvalidConfig {
                key: key.to_string(),
                error: e.to_string(),
            })?;

        let query = r#"
            INSERT INTO strata__config (key, value) VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value;
        "#;

        sqlx::query(query)
            .bind(key)
            .bind(raw)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Removes the config value for the given key.
    pub(crate) async fn del_config_value(&self, key: &str) -> Result<(), MetastoreError> {
        let query = r#"
            DELETE FROM strata__config WHERE key = ?;
        "#;

        sqlx::query(query).bind(key).execute(&self.pool).await?;

        Ok(())
    }

    /// Loads the current manifest version.
    ///
    /// Any row which cannot be decoded is reported as corruption, rows are
    /// never skipped.
    pub(crate) async fn load_manifest(&self) -> Result<Manifest, MetastoreError> {
        let state: StateRow = sqlx::query_as(
            r#"
            SELECT version, next_row_id, schema_json FROM strata__state WHERE id = 0;
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let schema = match state.schema_json.as_deref() {
            None => None,
            Some(raw) => Some(serde_json::from_str::<Schema>(raw).map_err(|e| {
                MetastoreError::Corrupted(format!("invalid stored schema: {e}"))
            })?),
        };

        let rows: Vec<SegmentRow> = sqlx::query_as(
            r#"
            SELECT
                segment_id,
                row_start,
                row_end,
                row_count,
                file_len,
                codec,
                layout_json
            FROM strata__segments
            ORDER BY row_start;
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let segments = rows
            .into_iter()
            .map(SegmentRow::into_descriptor)
            .collect::<Result<Vec<_>, _>>()?;

        let tombstone_rows: Vec<(String, Vec<u8>)> = sqlx::query_as(
            r#"
            SELECT segment_id, bitmap FROM strata__tombstones;
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tombstones = ahash::HashMap::default();
        for (raw_id, blob) in tombstone_rows {
            let id = parse_segment_id(&raw_id)?;
            if !segments.iter().any(|s| s.id == id) {
                return Err(MetastoreError::Corrupted(format!(
                    "tombstones reference unknown segment {id}"
                )));
            }

            let bitmap = RoaringBitmap::deserialize_from(blob.as_slice()).map_err(|e| {
                MetastoreError::Corrupted(format!("invalid tombstones for segment {id}: {e}"))
            })?;
            tombstones.insert(id, Arc::new(bitmap));
        }

        Ok(Manifest {
            version: state.version as u64,
            schema,
            next_row_id: state.next_row_id as u64,
            segments,
            tombstones,
        })
    }

    /// Applies the commit in a single transaction and returns the new
    /// manifest version.
    ///
    /// Fails with [MetastoreError::VersionConflict] if the manifest was
    /// changed since the commit was prepared.
    pub(crate) async fn commit(&self, commit: &ManifestCommit) -> Result<u64, MetastoreError> {
        let schema_json = commit
            .schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| MetastoreError::Corrupted(format!("unable to encode schema: {e}")))?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE strata__state
            SET
                version = version + 1,
                next_row_id = MAX(next_row_id, ?),
                schema_json = COALESCE(?, schema_json)
            WHERE id = 0 AND version = ?;
            "#,
        )
        .bind(commit.next_row_id as i64)
        .bind(schema_json)
        .bind(commit.base_version as i64)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            let found: i64 = sqlx::query_scalar("SELECT version FROM strata__state WHERE id = 0;")
                .fetch_one(&mut *tx)
                .await?;
            return Err(MetastoreError::VersionConflict {
                expected: commit.base_version,
                found: found as u64,
            });
        }

        for id in commit.removed.iter() {
            let id = id.to_string();
            sqlx::query("DELETE FROM strata__segments WHERE segment_id = ?;")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM strata__tombstones WHERE segment_id = ?;")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        for segment in commit.added.iter() {
            let layout = serde_json::to_string(&segment.layout()).map_err(|e| {
                MetastoreError::Corrupted(format!("unable to encode segment layout: {e}"))
            })?;

            sqlx::query(
                r#"
                INSERT INTO strata__segments (
                    segment_id,
                    row_start,
                    row_end,
                    row_count,
                    file_len,
                    codec,
                    layout_json,
                    created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?);
                "#,
            )
            .bind(segment.id.to_string())
            .bind(segment.row_range.start as i64)
            .bind(segment.row_range.end as i64)
            .bind(segment.row_count as i64)
            .bind(segment.file_len as i64)
            .bind(segment.codec.as_u8() as i64)
            .bind(layout)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for (id, bitmap) in commit.tombstones.iter() {
            let mut blob = Vec::with_capacity(bitmap.serialized_size());
            bitmap
                .serialize_into(&mut blob)
                .map_err(|e| MetastoreError::Corrupted(format!("unable to encode tombstones: {e}")))?;

            sqlx::query(
                r#"
                INSERT INTO strata__tombstones (segment_id, bitmap) VALUES (?, ?)
                ON CONFLICT (segment_id) DO UPDATE SET bitmap = excluded.bitmap;
                "#,
            )
            .bind(id.to_string())
            .bind(blob)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let version = commit.base_version + 1;
        debug!(
            version = version,
            added = commit.added.len(),
            removed = commit.removed.len(),
            tombstones = commit.tombstones.len(),
            "Manifest committed"
        );

        Ok(version)
    }
}

#[derive(Debug, FromRow)]
struct StateRow {
    version: i64,
    next_row_id: i64,
    schema_json: Option<String>,
}

#[derive(Debug, FromRow)]
struct SegmentRow {
    segment_id: String,
    row_start: i64,
    row_end: i64,
    row_count: i64,
    file_len: i64,
    codec: i64,
    layout_json: String,
}

impl SegmentRow {
    fn into_descriptor(self) -> Result<SegmentDescriptor, MetastoreError> {
        let id = parse_segment_id(&self.segment_id)?;

        let codec = u8::try_from(self.codec)
            .ok()
            .and_then(Codec::from_u8)
            .ok_or_else(|| {
                MetastoreError::Corrupted(format!(
                    "segment {id} uses unknown codec {}",
                    self.codec
                ))
            })?;

        let layout: SegmentLayout = serde_json::from_str(&self.layout_json).map_err(|e| {
            warn!(error = ?e, segment_id = %id, "Metastore row contains corrupted segment layout, has the store been edited?");
            MetastoreError::Corrupted(format!("invalid layout for segment {id}: {e}"))
        })?;

        if self.row_start < 0 || self.row_end < self.row_start || self.row_count < 0 {
            return Err(MetastoreError::Corrupted(format!(
                "segment {id} has an invalid row range"
            )));
        }

        Ok(SegmentDescriptor {
            id,
            row_range: self.row_start as u64..self.row_end as u64,
            row_count: self.row_count as u64,
            file_len: self.file_len as u64,
            codec,
            row_ids: layout.row_ids,
            columns: layout.columns,
        })
    }
}

fn parse_segment_id(raw: &str) -> Result<SegmentId, MetastoreError> {
    SegmentId::from_str(raw).map_err(|e| {
        warn!(error = ?e, segment_id = ?raw, "Metastore row contains corrupted segment_id, has the store been edited?");
        MetastoreError::Corrupted(format!("invalid segment id {raw:?}"))
    })
}
