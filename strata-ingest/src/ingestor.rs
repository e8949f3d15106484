use bon::Builder;
use strata_common::observer::observe;
use strata_common::{CancellationToken, SharedObserver};
use strata_store::ColumnStore;
use strata_types::{ColumnData, ColumnError, Schema};
use tracing::{debug, info, instrument};

use crate::{IngestError, RowBatch, RowSource};

const DEFAULT_BATCH_SIZE: usize = 8192;

#[derive(Debug, Clone, Builder)]
/// Options controlling a single ingestion run.
pub struct IngestOptions {
    #[builder(default = DEFAULT_BATCH_SIZE)]
    /// The maximum number of rows pulled from the source at once.
    ///
    /// Only affects throughput and memory use, never the ingested rows.
    batch_size: usize,
    #[builder(default)]
    /// Checked before every batch is pulled.
    cancel: CancellationToken,
    /// Notified of any failure before it is returned.
    observer: Option<SharedObserver>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct IngestReport {
    /// The number of non-empty batches appended.
    pub batches: u64,
    pub rows: u64,
}

#[derive(Debug, Default)]
/// Moves rows from a [RowSource] into a [ColumnStore].
///
/// At most one batch is held in memory at a time, the batch is converted
/// to column-major buffers and appended before the next one is pulled.
pub struct BatchIngestor {
    options: IngestOptions,
}

impl BatchIngestor {
    pub fn new(options: IngestOptions) -> Self {
        Self { options }
    }

    #[instrument(skip_all, fields(store = %store.name(), batch_size = self.options.batch_size))]
    /// Pulls batches from the source until it is exhausted, appending each
    /// to the store.
    ///
    /// The first batch establishes the store schema if it has none, even
    /// when it carries no rows. A
    /// failing batch stops ingestion, batches appended before it are kept.
    pub async fn ingest(
        &self,
        source: &mut dyn RowSource,
        store: &ColumnStore,
    ) -> Result<IngestReport, IngestError> {
        let result = self.ingest_inner(source, store).await;
        observe(self.options.observer.as_ref(), "ingest", result)
    }

    async fn ingest_inner(
        &self,
        source: &mut dyn RowSource,
        store: &ColumnStore,
    ) -> Result<IngestReport, IngestError> {
        let batch_size = self.options.batch_size;
        if batch_size == 0 {
            return Err(IngestError::InvalidOptions(
                "batch size must be greater than zero".into(),
            ));
        }

        let mut report = IngestReport::default();
        loop {
            if self.options.cancel.is_cancelled() {
                info!(rows = report.rows, "Ingestion cancelled");
                return Err(IngestError::Cancelled);
            }

            let Some(batch) = source
                .next_batch(batch_size)
                .await
                .map_err(IngestError::Source)?
            else {
                break;
            };

            if batch.is_empty() {
                // An empty first batch still declares the columns.
                if store.schema().is_none() && !batch.columns.is_empty() {
                    let (schema, columns) = to_columns(batch, None)?;
                    store.append_batch(&schema, columns).await?;
                }
                break;
            }

            let exhausted = batch.len() < batch_size;
            let rows = batch.len();

            let (schema, columns) = to_columns(batch, store.schema().as_ref())?;
            let row_ids = store.append_batch(&schema, columns).await?;

            report.batches += 1;
            report.rows += rows as u64;
            debug!(rows = rows, row_ids = ?row_ids, "Appended batch");

            if exhausted {
                break;
            }
        }

        info!(batches = report.batches, rows = report.rows, "Ingestion complete");
        Ok(report)
    }
}

/// Converts a row-major batch into column-major buffers.
///
/// Values are coerced to the declared column types, which must match the
/// store schema when one is established.
fn to_columns(
    batch: RowBatch,
    store_schema: Option<&Schema>,
) -> Result<(Schema, Vec<ColumnData>), IngestError> {
    let schema = batch
        .schema()
        .map_err(|e| IngestError::SchemaMismatch(e.to_string()))?;

    if let Some(store_schema) = store_schema {
        check_schema(store_schema, &schema)?;
    }

    let mut columns: Vec<ColumnData> = schema
        .fields()
        .iter()
        .map(|f| ColumnData::with_capacity(f.data_type, batch.len()))
        .collect();

    for (row, values) in batch.rows.into_iter().enumerate() {
        if values.len() != columns.len() {
            return Err(IngestError::SchemaMismatch(format!(
                "row {row} has {} values but the batch has {} columns",
                values.len(),
                columns.len()
            )));
        }

        for ((column, value), field) in columns.iter_mut().zip(values.iter()).zip(schema.fields()) {
            column.push(value).map_err(|e| match e {
                ColumnError::Coercion { value, expected } => IngestError::TypeCoercion {
                    column: field.name.clone(),
                    row,
                    value,
                    expected,
                },
                other => IngestError::SchemaMismatch(other.to_string()),
            })?;
        }
    }

    Ok((schema, columns))
}

fn check_schema(store: &Schema, batch: &Schema) -> Result<(), IngestError> {
    if !store.same_columns(batch) {
        return Err(IngestError::SchemaMismatch(format!(
            "batch columns ({batch}) do not match the store schema ({store})"
        )));
    }

    for field in batch.fields() {
        let expected = store.field(&field.name).map(|f| f.data_type);
        if expected != Some(field.data_type) {
            return Err(IngestError::SchemaMismatch(format!(
                "column {:?} is declared as {} but the store holds {}",
                field.name,
                field.data_type,
                expected.map(|t| t.to_string()).unwrap_or_default(),
            )));
        }
    }

    Ok(())
}
