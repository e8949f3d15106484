//! Batch ingestion of rows into a [strata_store::ColumnStore].
//!
//! A [RowSource] yields row-major batches, the [BatchIngestor] coerces them
//! into column-major buffers and appends them to the store one batch at a
//! time.

mod error;
mod ingestor;
mod registry;
mod source;

pub use self::error::IngestError;
pub use self::ingestor::{BatchIngestor, IngestOptions, IngestReport};
pub use self::registry::{RowSourceFactory, SourceParams, SourceRegistry};
pub use self::source::{BoxError, MemoryRowSource, RowBatch, RowSource};
