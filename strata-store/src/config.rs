use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::manifest::{Metastore, MetastoreError};

pub(crate) const DEFAULT_MAX_BUFFER_ROWS: usize = 64 << 10;
pub(crate) const DEFAULT_MAX_BUFFER_BYTES: usize = 64 << 20;
pub(crate) const DEFAULT_MAX_BUFFER_AGE_SECS: u64 = 30;
pub(crate) const DEFAULT_MAX_SEGMENT_ROWS: usize = 64 << 10;
pub(crate) const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
pub(crate) const DEFAULT_MAX_CACHED_COLUMNS: u64 = 1024;

macro_rules! set_config {
    ($slf:ident, $metastore:expr, $key:ident) => {{
        match &$slf.$key {
            MaybeUnset::Unset => Ok(()),
            MaybeUnset::None => {
                info!(key = stringify!($key), "Removing config value");
                $metastore.del_config_value(stringify!($key)).await
            },
            MaybeUnset::Some(v) => {
                info!(key = stringify!($key), value = ?v, "Setting config value");
                $metastore.set_config_value(stringify!($key), v).await
            },
        }
    }};
}

macro_rules! get_config {
    ($slf:ident, $metastore:expr, $key:ident) => {{
        $slf.$key = $metastore
            .get_config_value(stringify!($key))
            .await?
            .map(MaybeUnset::Some)
            .unwrap_or(MaybeUnset::Unset)
    }};
}

macro_rules! getters_with_default {
    ($key:ident, ty = $t:ty, default = $default:expr) => {
        pub fn $key(&self) -> $t {
            match self.$key {
                MaybeUnset::Unset => $default,
                MaybeUnset::None => $default,
                MaybeUnset::Some(v) => v,
            }
        }
    };
}

#[derive(Debug, Default, Clone)]
#[cfg_attr(test, derive(Eq, PartialEq))]
/// Represents a config option which can be:
///
/// - `None` To remove the current set value.
/// - `Unset` To leave the value as it is currently set.
/// - `Some(T)` To update the value with a new value.
pub enum MaybeUnset<T> {
    #[default]
    Unset,
    None,
    Some(T),
}

impl<T> From<T> for MaybeUnset<T> {
    fn from(value: T) -> Self {
        Self::Some(value)
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Controls when buffered rows are written out as a new segment.
pub enum FlushMode {
    #[default]
    /// Every appended batch is flushed before the append returns.
    ///
    /// Nothing acknowledged is lost on a crash, at the cost of many
    /// small segments.
    Durable,
    /// Batches are buffered until an explicit flush or until one of the
    /// buffer thresholds is reached.
    ///
    /// Fewer, larger segments at the cost of a larger window of rows
    /// lost on a crash.
    HighThroughput,
}

#[derive(Debug, Default, Clone, Builder)]
#[cfg_attr(test, derive(Eq, PartialEq))]
/// Configuration options of a store.
///
/// The config is persisted in the manifest, values which are never set
/// fall back to their defaults.
pub struct StoreConfig {
    #[builder(into, default, setters(vis = "pub(crate)"))]
    /// The name of the store.
    pub(crate) name: MaybeUnset<String>,
    #[builder(default, into)]
    /// When buffered rows are flushed into segments.
    pub flush_mode: MaybeUnset<FlushMode>,
    #[builder(default, into)]
    /// The number of buffered rows which triggers a flush in
    /// [FlushMode::HighThroughput].
    pub max_buffer_rows: MaybeUnset<usize>,
    #[builder(default, into)]
    /// The estimated buffer size in bytes which triggers a flush in
    /// [FlushMode::HighThroughput].
    pub max_buffer_bytes: MaybeUnset<usize>,
    #[builder(default, into)]
    /// The age in seconds of the oldest buffered batch which triggers a
    /// flush on the next append in [FlushMode::HighThroughput].
    pub max_buffer_age_secs: MaybeUnset<u64>,
    #[builder(default, into)]
    /// The maximum number of rows written into a single segment.
    ///
    /// Larger flushes are split, compaction merges smaller segments up
    /// to this size.
    pub max_segment_rows: MaybeUnset<usize>,
    #[builder(default, into)]
    /// The zstd compression level of segment blocks, `0` disables
    /// compression entirely.
    pub compression_level: MaybeUnset<i32>,
    #[builder(default, into)]
    /// The maximum number of decoded column blocks kept in memory.
    pub max_cached_columns: MaybeUnset<u64>,
}

impl StoreConfig {
    pub(crate) async fn store_in_metastore(
        &self,
        metastore: &Metastore,
    ) -> Result<(), MetastoreError> {
        info!("Persisting store config changes");

        set_config!(self, metastore, name)?;
        set_config!(self, metastore, flush_mode)?;
        set_config!(self, metastore, max_buffer_rows)?;
        set_config!(self, metastore, max_buffer_bytes)?;
        set_config!(self, metastore, max_buffer_age_secs)?;
        set_config!(self, metastore, max_segment_rows)?;
        set_config!(self, metastore, compression_level)?;
        set_config!(self, metastore, max_cached_columns)?;

        Ok(())
    }

    pub(crate) async fn load_from_metastore(
        &mut self,
        metastore: &Metastore,
    ) -> Result<(), MetastoreError> {
        info!("Loading store config");

        get_config!(self, metastore, name);
        get_config!(self, metastore, flush_mode);
        get_config!(self, metastore, max_buffer_rows);
        get_config!(self, metastore, max_buffer_bytes);
        get_config!(self, metastore, max_buffer_age_secs);
        get_config!(self, metastore, max_segment_rows);
        get_config!(self, metastore, compression_level);
        get_config!(self, metastore, max_cached_columns);

        Ok(())
    }

    pub(crate) fn name(&self) -> Option<&str> {
        match &self.name {
            MaybeUnset::Some(name) => Some(name.as_str()),
            _ => None,
        }
    }

    getters_with_default!(flush_mode, ty = FlushMode, default = FlushMode::Durable);
    getters_with_default!(max_buffer_rows, ty = usize, default = DEFAULT_MAX_BUFFER_ROWS);
    getters_with_default!(max_buffer_bytes, ty = usize, default = DEFAULT_MAX_BUFFER_BYTES);
    getters_with_default!(
        max_buffer_age_secs,
        ty = u64,
        default = DEFAULT_MAX_BUFFER_AGE_SECS
    );
    getters_with_default!(
        compression_level,
        ty = i32,
        default = DEFAULT_COMPRESSION_LEVEL
    );
    getters_with_default!(
        max_cached_columns,
        ty = u64,
        default = DEFAULT_MAX_CACHED_COLUMNS
    );

    /// The maximum rows per segment, clamped so segment row offsets
    /// always fit the tombstone bitmaps.
    pub fn max_segment_rows(&self) -> usize {
        let rows = match self.max_segment_rows {
            MaybeUnset::Some(v) => v,
            _ => DEFAULT_MAX_SEGMENT_ROWS,
        };
        rows.clamp(1, u32::MAX as usize)
    }

    pub(crate) fn max_buffer_age(&self) -> Duration {
        Duration::from_secs(self.max_buffer_age_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_config_metastore_interactions_set_all() {
        let metastore = Metastore::connect(":memory:").await.unwrap();

        let cfg = StoreConfig::builder()
            .name("demo".to_string())
            .flush_mode(FlushMode::HighThroughput)
            .max_buffer_rows(100)
            .max_buffer_bytes(4096)
            .max_buffer_age_secs(5)
            .max_segment_rows(50)
            .compression_level(0)
            .max_cached_columns(10)
            .build();
        cfg.store_in_metastore(&metastore).await.unwrap();

        let mut loaded = StoreConfig::default();
        loaded.load_from_metastore(&metastore).await.unwrap();
        assert_eq!(cfg, loaded, "Configs should match");
    }

    #[tokio::test]
    async fn test_store_config_metastore_interactions_update() {
        let metastore = Metastore::connect(":memory:").await.unwrap();

        let cfg = StoreConfig::builder()
            .name("demo".to_string())
            .max_segment_rows(100)
            .build();
        cfg.store_in_metastore(&metastore).await.unwrap();

        let cfg = StoreConfig::builder().max_segment_rows(20).build();
        cfg.store_in_metastore(&metastore).await.unwrap();

        let mut loaded = StoreConfig::default();
        loaded.load_from_metastore(&metastore).await.unwrap();
        assert_eq!(loaded.max_segment_rows, MaybeUnset::Some(20));
        assert_eq!(loaded.name(), Some("demo"));
    }

    #[tokio::test]
    async fn test_store_config_metastore_interactions_unset() {
        let metastore = Metastore::connect(":memory:").await.unwrap();

        let cfg = StoreConfig::builder()
            .name("demo".to_string())
            .flush_mode(FlushMode::HighThroughput)
            .build();
        cfg.store_in_metastore(&metastore).await.unwrap();

        let cfg = StoreConfig::builder()
            .flush_mode(MaybeUnset::None)
            .build();
        cfg.store_in_metastore(&metastore).await.unwrap();

        let mut loaded = StoreConfig::default();
        loaded.load_from_metastore(&metastore).await.unwrap();
        assert_eq!(loaded.flush_mode, MaybeUnset::Unset);
        assert_eq!(loaded.flush_mode(), FlushMode::Durable);
    }

    #[test]
    fn test_defaults_and_clamping() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.flush_mode(), FlushMode::Durable);
        assert_eq!(cfg.max_segment_rows(), DEFAULT_MAX_SEGMENT_ROWS);

        let cfg = StoreConfig::builder().max_segment_rows(0).build();
        assert_eq!(cfg.max_segment_rows(), 1);
    }
}
