#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_ingest::{BatchIngestor, IngestOptions, IngestReport, MemoryRowSource};
use strata_store::{ColumnStore, FlushMode, StoreConfig, StoreCreateOptions};
use strata_types::{DataType, Field, Value};

pub const CATEGORIES: [&str; 5] = ["Books", "Garden", "Music", "Sports", "Toys"];

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("strata_store=debug,strata_query=debug,strata_ingest=debug")
        .with_test_writer()
        .try_init();
}

pub fn sales_fields() -> Vec<Field> {
    vec![
        Field::new("Id", DataType::Int64),
        Field::new("Category", DataType::String),
        Field::new("Amount", DataType::Double),
    ]
}

/// Rows with an `Amount` uniformly drawn from `[10, 1010)` and a `Category`
/// drawn from five fixed values.
pub fn sales_rows(count: usize, seed: u64) -> Vec<Vec<Value>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|id| {
            vec![
                Value::Int64(id as i64),
                Value::from(CATEGORIES[rng.gen_range(0..CATEGORIES.len())]),
                Value::Double(rng.gen_range(10.0..1010.0)),
            ]
        })
        .collect()
}

pub fn amount(row: &[Value]) -> f64 {
    match row[2] {
        Value::Double(v) => v,
        ref other => panic!("unexpected amount {other:?}"),
    }
}

/// Buffers up to `max_buffer_rows` rows between flushes.
pub fn buffered_config(max_buffer_rows: usize) -> StoreConfig {
    StoreConfig::builder()
        .flush_mode(FlushMode::HighThroughput)
        .max_buffer_rows(max_buffer_rows)
        .build()
}

pub async fn create_store(dir: &Path, config: StoreConfig) -> Arc<ColumnStore> {
    let options = StoreCreateOptions::builder()
        .name("sales")
        .path(dir.join("sales"))
        .config(config)
        .build();
    Arc::new(ColumnStore::create(options).await.expect("Create store"))
}

pub async fn ingest(store: &ColumnStore, rows: Vec<Vec<Value>>, batch_size: usize) -> IngestReport {
    let ingestor = BatchIngestor::new(IngestOptions::builder().batch_size(batch_size).build());
    let mut source = MemoryRowSource::new(sales_fields(), rows);
    ingestor
        .ingest(&mut source, store)
        .await
        .expect("Ingest rows")
}
