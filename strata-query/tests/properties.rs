mod common;

use std::sync::Arc;

use rstest::rstest;
use strata_query::{
    delete_where,
    Aggregation,
    ExecutionOptions,
    Expr,
    FilterOp,
    JoinMode,
    Query,
    QueryError,
    SortDirection,
    Table,
};
use strata_store::{CloseMode, ColumnStore, StoreStats};
use strata_types::{DataType, Field, Value};

use crate::common::{amount, buffered_config, create_store, ingest, init_logging, sales_rows};

fn ids(table: &Table) -> Vec<i64> {
    let column = table.column("Id").unwrap();
    (0..table.num_rows())
        .map(|row| match column.get(row) {
            Value::Int64(id) => id,
            other => panic!("unexpected id {other:?}"),
        })
        .collect()
}

fn assert_conserved(stats: StoreStats) {
    assert_eq!(
        stats.active_rows + stats.deleted_rows,
        stats.total_rows,
        "Row counts must add up: {stats:?}"
    );
}

async fn fixed_queries(store: &Arc<ColumnStore>) -> Vec<Table> {
    let filtered = Query::from_store(store.clone())
        .filter("Amount", 300.0, FilterOp::GreaterOrEqual)
        .unwrap()
        .sort(SortDirection::Ascending, &["Amount"])
        .unwrap()
        .select(&["Id", "Amount"])
        .unwrap();
    let grouped = Query::from_store(store.clone())
        .group_by_aggregate("Category", "Amount", Aggregation::Avg, "AvgAmount")
        .unwrap();
    let counted = Query::from_store(store.clone())
        .group_by_aggregate("Category", "Id", Aggregation::Count, "Rows")
        .unwrap();

    let mut results = Vec::new();
    for query in [filtered, grouped, counted] {
        results.push(query.execute().await.unwrap());
    }
    results
}

#[rstest]
#[case(1, 64)]
#[case(7, 500)]
#[tokio::test]
async fn test_batch_size_does_not_change_results(#[case] small: usize, #[case] large: usize) {
    let rows = sales_rows(2_000, 3);

    let mut outcomes = Vec::new();
    for batch_size in [small, large] {
        let dir = tempfile::tempdir().unwrap();
        let store = create_store(dir.path(), buffered_config(256)).await;
        ingest(&store, rows.clone(), batch_size).await;

        let results = fixed_queries(&store).await;
        outcomes.push((store.stats().total_rows, store.schema(), results));
    }

    let (rows_a, schema_a, results_a) = &outcomes[0];
    let (rows_b, schema_b, results_b) = &outcomes[1];
    assert_eq!(rows_a, rows_b);
    assert_eq!(schema_a, schema_b);
    assert_eq!(results_a, results_b);
}

#[tokio::test]
async fn test_row_conservation_through_mutations() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = create_store(dir.path(), buffered_config(300)).await;
    ingest(&store, sales_rows(1_000, 5), 100).await;
    assert!(store.stats().buffered_rows > 0, "Some rows should still be buffered");
    assert_conserved(store.stats());

    let expensive = delete_where(&store, "Amount", 900.0, FilterOp::GreaterThan)
        .await
        .unwrap();
    assert!(expensive > 0);
    let stats = store.stats();
    assert_conserved(stats);
    assert_eq!(stats.deleted_rows, expensive);

    let books = delete_where(&store, "Category", "Books", FilterOp::Equals)
        .await
        .unwrap();
    assert_conserved(store.stats());

    let again = delete_where(&store, "Category", "Books", FilterOp::Equals)
        .await
        .unwrap();
    assert_eq!(again, 0, "Deleted rows are no longer matched");

    store.compact().await.unwrap();
    let stats = store.stats();
    assert_conserved(stats);
    assert_eq!(stats.deleted_rows, 0);
    assert_eq!(stats.total_rows, 1_000 - expensive - books);

    let visible = Query::from_store(store.clone()).execute().await.unwrap();
    assert_eq!(visible.num_rows() as u64, stats.active_rows);
}

#[rstest]
#[case(FilterOp::GreaterThan)]
#[case(FilterOp::GreaterOrEqual)]
#[case(FilterOp::LessThan)]
#[case(FilterOp::LessOrEqual)]
#[case(FilterOp::Equals)]
#[case(FilterOp::NotEquals)]
#[tokio::test]
async fn test_filter_is_sound_and_complete(#[case] op: FilterOp) {
    let dir = tempfile::tempdir().unwrap();
    let store = create_store(dir.path(), buffered_config(400)).await;
    let rows = sales_rows(1_500, 9);
    ingest(&store, rows.clone(), 128).await;
    delete_where(&store, "Id", 100, FilterOp::LessThan)
        .await
        .unwrap();

    // Pick an amount which is actually present so equality matches.
    let literal = amount(&rows[700]);
    let holds = |value: f64| match op {
        FilterOp::GreaterThan => value > literal,
        FilterOp::GreaterOrEqual => value >= literal,
        FilterOp::LessThan => value < literal,
        FilterOp::LessOrEqual => value <= literal,
        FilterOp::Equals => value == literal,
        FilterOp::NotEquals => value != literal,
        _ => unreachable!(),
    };

    let expected: Vec<i64> = rows
        .iter()
        .enumerate()
        .filter(|(id, row)| *id >= 100 && holds(amount(row)))
        .map(|(id, _)| id as i64)
        .collect();

    let result = Query::from_store(store.clone())
        .filter("Amount", literal, op)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(ids(&result), expected, "{op:?} {literal}");
}

fn row_counts(stats: StoreStats) -> (u64, u64, u64) {
    (stats.total_rows, stats.active_rows, stats.deleted_rows)
}

#[rstest]
#[case::no_deletes(false)]
#[case::buffered_deletes(true)]
#[tokio::test]
async fn test_flush_and_reopen_round_trip(#[case] delete_buffered: bool) {
    let dir = tempfile::tempdir().unwrap();
    let store = create_store(dir.path(), buffered_config(10_000)).await;
    ingest(&store, sales_rows(3_000, 21), 500).await;
    assert_eq!(store.stats().buffered_rows, 3_000);

    if delete_buffered {
        let deleted = delete_where(&store, "Amount", 800.0, FilterOp::GreaterThan)
            .await
            .unwrap();
        assert!(deleted > 0);
        assert_eq!(store.stats().deleted_rows, deleted);
    }

    let before = fixed_queries(&store).await;
    let schema = store.schema();
    let counts = row_counts(store.stats());
    assert_conserved(store.stats());

    store.flush().await.unwrap();
    assert_eq!(store.stats().buffered_rows, 0);
    assert_eq!(row_counts(store.stats()), counts);
    assert_eq!(fixed_queries(&store).await, before);

    let store = Arc::into_inner(store).expect("No other store handles");
    store.close(CloseMode::Flush).await.unwrap();

    let store = Arc::new(ColumnStore::open(&dir.path().join("sales")).await.unwrap());
    assert_eq!(row_counts(store.stats()), counts);
    assert_eq!(store.stats().total_rows, 3_000);
    assert_eq!(store.schema(), schema);
    assert_eq!(fixed_queries(&store).await, before);
}

fn bonus_table(categories: &[&str]) -> Arc<Table> {
    let rows: Vec<Vec<Value>> = categories
        .iter()
        .enumerate()
        .map(|(i, c)| vec![Value::from(*c), Value::Int64(i as i64)])
        .collect();
    let table = Table::from_rows(
        vec![
            Field::new("Category", DataType::String),
            Field::new("Bonus", DataType::Int64),
        ],
        &rows,
    )
    .unwrap();
    Arc::new(table)
}

#[tokio::test]
async fn test_left_join_row_counts() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_store(dir.path(), Default::default()).await;
    let rows = sales_rows(500, 13);
    ingest(&store, rows.clone(), 100).await;
    let count = |category: &str| rows.iter().filter(|r| r[1].as_str() == Some(category)).count();

    let unique = Query::from_store(store.clone())
        .merge(
            Query::from_table(bonus_table(&["Books", "Music", "Toys"])),
            "Category",
            "Category",
            JoinMode::Left,
        )
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(unique.num_rows(), rows.len(), "At most one match per left row");
    assert_eq!(
        unique.schema().names().collect::<Vec<_>>(),
        vec!["Id", "Category", "Amount", "Category_right", "Bonus"]
    );

    let bonus = unique.column("Bonus").unwrap();
    let category = unique.column("Category").unwrap();
    for row in 0..unique.num_rows() {
        if category.get(row) == Value::from("Garden") {
            assert_eq!(bonus.get(row), Value::Null, "Unmatched rows get the missing value");
        }
    }
    assert_eq!(ids(&unique), (0..500).collect::<Vec<_>>(), "Left rows keep their order");

    let duplicated = Query::from_table(bonus_table(&["Books", "Music", "Books"]));
    let left = Query::from_store(store.clone())
        .merge(duplicated.clone(), "Category", "Category", JoinMode::Left)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(left.num_rows(), rows.len() + count("Books"));

    let inner = Query::from_store(store.clone())
        .merge(duplicated, "Category", "Category", JoinMode::Inner)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(inner.num_rows(), 2 * count("Books") + count("Music"));
}

#[tokio::test]
async fn test_parallelism_does_not_change_results() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_store(dir.path(), Default::default()).await;
    ingest(&store, sales_rows(3_000, 17), 100).await;
    assert_eq!(store.stats().storage_files, 30);

    let query = Query::from_store(store.clone())
        .filter("Amount", 200.0, FilterOp::GreaterThan)
        .unwrap()
        .compute("Doubled", Expr::col("Amount") * Expr::lit(2))
        .unwrap()
        .select(&["Id", "Doubled"])
        .unwrap();

    let serial = query
        .execute_with(ExecutionOptions::builder().parallelism(1).build())
        .await
        .unwrap();
    let parallel = query
        .execute_with(ExecutionOptions::builder().parallelism(16).build())
        .await
        .unwrap();
    assert_eq!(serial, parallel);
    assert!(ids(&serial).windows(2).all(|w| w[0] < w[1]), "Segment order is kept");
}

#[rstest]
#[case(25)]
#[case(0)]
#[case(10_000)]
#[tokio::test]
async fn test_limits_match_full_result(#[case] n: usize) {
    let dir = tempfile::tempdir().unwrap();
    let store = create_store(dir.path(), buffered_config(250)).await;
    ingest(&store, sales_rows(1_100, 23), 100).await;
    assert!(store.stats().buffered_rows > 0);

    let base = Query::from_store(store.clone())
        .filter("Amount", 400.0, FilterOp::LessThan)
        .unwrap();
    let full = ids(&base.execute().await.unwrap());

    let head = ids(&base.clone().head(n).execute().await.unwrap());
    assert_eq!(head, full[..n.min(full.len())]);

    let tail = ids(&base.clone().tail(n).execute().await.unwrap());
    assert_eq!(tail, full[full.len() - n.min(full.len())..]);

    let projected_tail = base.select(&["Id"]).unwrap().tail(n);
    assert_eq!(ids(&projected_tail.execute().await.unwrap()), tail);
}

#[tokio::test]
async fn test_concurrent_readers_see_whole_batches() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_store(dir.path(), Default::default()).await;

    let writer = async {
        ingest(&store, sales_rows(2_000, 29), 100).await;
    };
    let reader = async {
        let mut seen = Vec::new();
        for _ in 0..20 {
            let table = Query::from_store(store.clone()).execute().await.unwrap();
            seen.push(table.num_rows());
            tokio::task::yield_now().await;
        }
        seen
    };

    let ((), seen) = tokio::join!(writer, reader);
    for rows in seen {
        assert_eq!(rows % 100, 0, "Readers never observe a partial batch, saw {rows}");
    }
}

fn constant_key(store: &Arc<ColumnStore>) -> Query {
    Query::from_store(store.clone())
        .compute("K", Expr::lit(0))
        .unwrap()
        .select(&["K"])
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_self_join_reads_one_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_store(dir.path(), buffered_config(4)).await;
    ingest(&store, sales_rows(20, 41), 20).await;

    let writer = tokio::spawn({
        let store = store.clone();
        async move {
            ingest(&store, sales_rows(300, 43), 1).await;
            store.flush().await.unwrap();
        }
    });

    // Every left row matches every right row, so the output has `l * r`
    // rows and is a perfect square only if both sides saw the same rows.
    let mut executions = 0;
    while !writer.is_finished() && executions < 200 {
        let joined = constant_key(&store)
            .merge(constant_key(&store), "K", "K", JoinMode::Inner)
            .unwrap()
            .execute()
            .await
            .unwrap();

        let rows = joined.num_rows();
        let side = (rows as f64).sqrt().round() as usize;
        assert_eq!(side * side, rows, "Both join sides must read the same snapshot");
        assert!(side >= 20);
        executions += 1;
    }

    writer.await.unwrap();
    assert_eq!(store.stats().total_rows, 320);
}

#[tokio::test]
async fn test_execution_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_store(dir.path(), Default::default()).await;
    ingest(&store, sales_rows(1_000, 31), 250).await;

    let query = Query::from_store(store.clone())
        .sort(SortDirection::Ascending, &["Amount"])
        .unwrap();

    let options = ExecutionOptions::builder().max_materialized_rows(100).build();
    let err = query.execute_with(options).await.unwrap_err();
    assert!(matches!(err, QueryError::MemoryLimitExceeded { limit: 100, .. }), "{err}");

    let options = ExecutionOptions::default();
    options.cancel.cancel();
    let err = query.execute_with(options).await.unwrap_err();
    assert!(matches!(err, QueryError::Cancelled), "{err}");

    let query = Query::from_store(store.clone()).filter("Missing", 1, FilterOp::Equals);
    assert!(matches!(query, Err(QueryError::ColumnNotFound(_))));
}

#[tokio::test]
async fn test_explain_store_plan() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_store(dir.path(), Default::default()).await;
    ingest(&store, sales_rows(10, 1), 10).await;

    let plan = Query::from_store(store.clone())
        .filter("Category", "To", FilterOp::StartsWith)
        .unwrap()
        .tail(2)
        .explain();
    assert_eq!(plan, "Limit: tail 2\n  Filter: Category starts with \"To\"\n    Scan: store \"sales\"\n");
}
