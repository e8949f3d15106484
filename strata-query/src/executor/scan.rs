use std::pin::pin;

use futures_util::{stream, StreamExt};
use strata_store::{ColumnStore, ScanChunk, StoreSnapshot};
use strata_types::Schema;
use tracing::{debug, instrument, trace};

use crate::executor::filter::{may_match, selected_offsets, CompiledPredicate};
use crate::executor::frame::Frame;
use crate::executor::{ensure_materializable, ExecutionOptions};
use crate::{Limit, Plan, Predicate, QueryError, Source};

/// The snapshots a single execution reads, one per distinct store.
///
/// Every scan of a store within the execution reads the same snapshot, so
/// both sides of a self join observe the same manifest version.
pub(crate) struct Snapshots<'a> {
    taken: Vec<(&'a ColumnStore, StoreSnapshot)>,
}

impl<'a> Snapshots<'a> {
    pub(crate) fn capture(plan: &'a Plan) -> Self {
        let taken = plan
            .stores()
            .into_iter()
            .map(|store| (store, store.snapshot()))
            .collect();
        Self { taken }
    }

    pub(crate) fn get(&self, store: &ColumnStore) -> Result<&StoreSnapshot, QueryError> {
        self.taken
            .iter()
            .find(|(s, _)| std::ptr::eq(*s, store))
            .map(|(_, snapshot)| snapshot)
            .ok_or_else(|| {
                QueryError::InvalidPlan(format!("no snapshot of store {:?}", store.name()))
            })
    }
}

/// A store scan with the filters, projection and limit directly above it
/// folded in.
pub(crate) struct StoreScan<'a> {
    pub store: &'a ColumnStore,
    pub snapshot: &'a StoreSnapshot,
    pub predicates: Vec<&'a Predicate>,
    /// The output columns, every store column if `None`.
    pub columns: Option<&'a [String]>,
    pub limit: Option<Limit>,
}

impl<'a> StoreScan<'a> {
    pub(crate) fn full(store: &'a ColumnStore, snapshot: &'a StoreSnapshot) -> Self {
        Self {
            store,
            snapshot,
            predicates: Vec::new(),
            columns: None,
            limit: None,
        }
    }

    /// Matches `[Limit|Project]* -> Filter* -> Scan(Store)`.
    pub(crate) fn match_plan(
        plan: &'a Plan,
        snapshots: &'a Snapshots<'_>,
    ) -> Option<Result<Self, QueryError>> {
        let mut limit = None;
        let mut columns = None;
        let mut node = plan;

        // A limit and a projection commute, either may be on top.
        loop {
            match node {
                Plan::Limit { input, limit: l } if limit.is_none() => {
                    limit = Some(*l);
                    node = input;
                },
                Plan::Project { input, columns: c } if columns.is_none() => {
                    columns = Some(c.as_slice());
                    node = input;
                },
                _ => break,
            }
        }

        let mut predicates = Vec::new();
        while let Plan::Filter { input, predicate } = node {
            predicates.push(predicate);
            node = input;
        }

        let Plan::Scan(Source::Store(store)) = node else {
            return None;
        };
        let scan = snapshots.get(store).map(|snapshot| Self {
            store,
            snapshot,
            predicates,
            columns,
            limit,
        });
        Some(scan)
    }
}

#[instrument(skip_all, fields(store = %scan.store.name()))]
/// Reads the rows of the scan's store snapshot matching every predicate.
///
/// Segments whose statistics rule out a match are skipped. The remaining
/// segments are read concurrently and combined in segment order, followed
/// by the rows still held in the write buffer. A tail limit walks the
/// segments from the end and a head limit stops reading once enough rows
/// were found.
pub(crate) async fn scan_store(
    scan: StoreScan<'_>,
    options: &ExecutionOptions,
) -> Result<Frame, QueryError> {
    let snapshot = scan.snapshot;
    let schema = snapshot.schema().cloned().unwrap_or_default();

    let output: Vec<String> = match scan.columns {
        Some(columns) => columns.to_vec(),
        None => schema.names().map(str::to_string).collect(),
    };
    let output_schema = schema.project(&output)?;

    let mut read: Vec<&str> = output.iter().map(String::as_str).collect();
    let mut compiled = Vec::with_capacity(scan.predicates.len());
    for predicate in scan.predicates.iter().copied() {
        let field = schema.require(&predicate.column)?;
        let position = match read.iter().position(|c| *c == predicate.column) {
            Some(position) => position,
            None => {
                read.push(predicate.column.as_str());
                read.len() - 1
            },
        };
        compiled.push((position, CompiledPredicate::compile(predicate, field.data_type)?));
    }

    let segments = snapshot.segments();
    let mut order: Vec<usize> = (0..segments.len())
        .filter(|&idx| {
            scan.predicates.iter().all(|predicate| {
                segments[idx]
                    .column(&predicate.column)
                    .map_or(true, |chunk| may_match(&chunk.stats, predicate))
            })
        })
        .collect();

    let reverse = matches!(scan.limit, Some(Limit::Tail(_)));
    if reverse {
        order.reverse();
    }
    let wanted = scan.limit.map(Limit::count);
    let is_done = |rows: usize| wanted.is_some_and(|n| rows >= n);

    debug!(
        segments = segments.len(),
        pruned = segments.len() - order.len(),
        buffered = snapshot.buffered_rows(),
        version = snapshot.version(),
        "Scanning store",
    );

    let mut parts = Vec::new();
    let mut rows = 0;

    if reverse && !is_done(rows) {
        if let Some(chunk) = snapshot.buffer_chunk(&read)? {
            let part = select_chunk(&chunk, &compiled, &output_schema);
            rows += part.num_rows;
            ensure_materializable(rows, options.max_materialized_rows)?;
            parts.push(part);
        }
    }

    if !is_done(rows) {
        let cancel = &options.cancel;
        let read = &read;
        let compiled = &compiled;
        let output_schema = &output_schema;

        let mut reads = pin!(stream::iter(order)
            .map(|idx| async move {
                if cancel.is_cancelled() {
                    return Err(QueryError::Cancelled);
                }
                let chunk = snapshot.read_segment(idx, read).await?;
                trace!(segment = idx, rows = chunk.len(), "Read segment");
                Ok(select_chunk(&chunk, compiled, output_schema))
            })
            .buffered(options.parallelism.max(1)));

        while let Some(part) = reads.next().await {
            let part = part?;
            rows += part.num_rows;
            ensure_materializable(rows, options.max_materialized_rows)?;
            parts.push(part);
            if is_done(rows) {
                break;
            }
        }
    }

    if !reverse && !is_done(rows) {
        if let Some(chunk) = snapshot.buffer_chunk(&read)? {
            let part = select_chunk(&chunk, &compiled, &output_schema);
            rows += part.num_rows;
            ensure_materializable(rows, options.max_materialized_rows)?;
            parts.push(part);
        }
    }

    if reverse {
        parts.reverse();
    }

    let frame = Frame::concat(output_schema, parts)?;
    Ok(match scan.limit {
        Some(limit) => frame.limit(limit),
        None => frame,
    })
}

/// Applies the tombstones and predicates of a chunk, keeping the selected
/// rows of the output columns.
///
/// Output columns are the first `schema.len()` columns of the chunk.
fn select_chunk(
    chunk: &ScanChunk,
    predicates: &[(usize, CompiledPredicate)],
    schema: &Schema,
) -> Frame {
    let mut selection = vec![true; chunk.len()];
    if let Some(deleted) = &chunk.deleted {
        for offset in deleted.iter() {
            if let Some(selected) = selection.get_mut(offset as usize) {
                *selected = false;
            }
        }
    }
    for (position, predicate) in predicates {
        predicate.refine(&chunk.columns[*position], &mut selection);
    }

    let offsets = selected_offsets(&selection);
    let all = offsets.len() == chunk.len();
    let columns = chunk.columns[..schema.len()]
        .iter()
        .map(|c| if all { c.as_ref().clone() } else { c.take(&offsets) })
        .collect();
    let row_ids = if all {
        chunk.row_ids.as_ref().clone()
    } else {
        offsets.iter().map(|&i| chunk.row_ids[i]).collect()
    };

    Frame {
        schema: schema.clone(),
        columns,
        num_rows: offsets.len(),
        row_ids: Some(row_ids),
    }
}
