//! Interprets a [Plan] against stores and in-memory tables.
//!
//! Each operator materializes its output as a [Frame]. Scans read a
//! snapshot of the store taken when the scan starts, so concurrent flushes
//! and compactions never change the rows a running query observes.

pub(crate) mod aggregate;
pub(crate) mod filter;
pub(crate) mod frame;
pub(crate) mod join;
mod key;
pub(crate) mod scan;
mod sort;

use bon::Builder;
use futures_util::future::{try_join, BoxFuture};
use futures_util::FutureExt;
use strata_common::observer::observe;
use strata_common::{CancellationToken, SharedObserver};
use strata_store::ColumnStore;
use tracing::{debug, instrument};

use self::frame::Frame;
use self::scan::{Snapshots, StoreScan};
use crate::{Plan, Predicate, QueryError, Source, Table};

const DEFAULT_PARALLELISM: usize = 4;
const DEFAULT_MAX_MATERIALIZED_ROWS: usize = 50_000_000;
const NO_COLUMNS: &[String] = &[];

#[derive(Debug, Clone, Builder)]
/// Options controlling how a plan is executed.
pub struct ExecutionOptions {
    #[builder(default = DEFAULT_PARALLELISM)]
    /// The number of segments read concurrently.
    ///
    /// Results are identical for any degree of parallelism.
    pub parallelism: usize,
    #[builder(default = DEFAULT_MAX_MATERIALIZED_ROWS)]
    /// The maximum number of rows a single operator may hold in memory.
    ///
    /// Scans, sorts, tails and join build sides exceeding it fail with
    /// [QueryError::MemoryLimitExceeded].
    pub max_materialized_rows: usize,
    #[builder(default)]
    /// Checked before every segment is read.
    pub cancel: CancellationToken,
    /// Notified of any failure before it is returned.
    pub observer: Option<SharedObserver>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

pub(crate) fn ensure_materializable(rows: usize, limit: usize) -> Result<(), QueryError> {
    if rows > limit {
        return Err(QueryError::MemoryLimitExceeded {
            limit,
            required: rows,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct QueryExecutor {
    options: ExecutionOptions,
}

impl QueryExecutor {
    pub fn new(options: ExecutionOptions) -> Self {
        Self { options }
    }

    #[inline]
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    #[instrument(skip_all)]
    /// Executes the plan, returning the fully materialized result.
    ///
    /// Every store the plan reads is snapshotted once before any operator
    /// runs, the whole execution observes those manifest versions. Any
    /// failure discards the partial result.
    pub async fn execute(&self, plan: &Plan) -> Result<Table, QueryError> {
        let snapshots = Snapshots::capture(plan);
        let result = self.run(plan, &snapshots).await.map(Frame::into_table);
        if let Ok(table) = &result {
            debug!(rows = table.num_rows(), "Query executed");
        }
        observe(self.options.observer.as_ref(), "execute", result)
    }

    /// Returns the row ids of the rows matching every predicate.
    pub(crate) async fn matching_row_ids(
        &self,
        store: &ColumnStore,
        predicates: &[Predicate],
    ) -> Result<Vec<u64>, QueryError> {
        let snapshot = store.snapshot();
        let scan = StoreScan {
            store,
            snapshot: &snapshot,
            predicates: predicates.iter().collect(),
            columns: Some(NO_COLUMNS),
            limit: None,
        };
        let result = scan::scan_store(scan, &self.options)
            .await
            .map(|frame| frame.row_ids.unwrap_or_default());
        observe(self.options.observer.as_ref(), "scan", result)
    }

    fn run<'a>(
        &'a self,
        plan: &'a Plan,
        snapshots: &'a Snapshots<'a>,
    ) -> BoxFuture<'a, Result<Frame, QueryError>> {
        async move {
            if self.options.cancel.is_cancelled() {
                return Err(QueryError::Cancelled);
            }

            if let Some(scan) = StoreScan::match_plan(plan, snapshots) {
                return scan::scan_store(scan?, &self.options).await;
            }

            let max_rows = self.options.max_materialized_rows;
            match plan {
                Plan::Scan(Source::Store(store)) => {
                    let scan = StoreScan::full(store, snapshots.get(store)?);
                    scan::scan_store(scan, &self.options).await
                },
                Plan::Scan(Source::Table(table)) => Ok(Frame::from_table(table)),
                Plan::Project { input, columns } => {
                    self.run(input, snapshots).await?.project(columns)
                },
                Plan::Filter { input, predicate } => {
                    self.run(input, snapshots).await?.filter(predicate)
                },
                Plan::Sort {
                    input,
                    direction,
                    columns,
                } => {
                    let frame = self.run(input, snapshots).await?;
                    sort::sort_frame(frame, *direction, columns, max_rows)
                },
                Plan::Compute { input, name, expr } => {
                    self.run(input, snapshots).await?.compute(name, expr)
                },
                Plan::Aggregate {
                    input,
                    key,
                    value,
                    aggregation,
                    output,
                } => {
                    let frame = self.run(input, snapshots).await?;
                    aggregate::aggregate(frame, key, value, *aggregation, output)
                },
                Plan::Join {
                    left,
                    right,
                    left_key,
                    right_key,
                    mode,
                } => {
                    let (left, right) =
                        try_join(self.run(left, snapshots), self.run(right, snapshots)).await?;
                    join::hash_join(left, right, left_key, right_key, *mode, max_rows)
                },
                Plan::Limit { input, limit } => {
                    let frame = self.run(input, snapshots).await?;
                    ensure_materializable(frame.num_rows, max_rows)?;
                    Ok(frame.limit(*limit))
                },
            }
        }
        .boxed()
    }
}
