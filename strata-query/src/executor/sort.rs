use std::cmp::Ordering;

use strata_types::ColumnData;
use tracing::debug;

use crate::executor::frame::Frame;
use crate::executor::ensure_materializable;
use crate::{QueryError, SortDirection};

/// Sorts the frame by the given columns.
///
/// The whole input is held in memory. Rows with equal keys keep their row
/// id order, or their input order when the rows have no row ids. Nulls
/// sort before any value in ascending order.
pub(crate) fn sort_frame(
    frame: Frame,
    direction: SortDirection,
    columns: &[String],
    max_rows: usize,
) -> Result<Frame, QueryError> {
    ensure_materializable(frame.num_rows, max_rows)?;

    let keys = columns
        .iter()
        .map(|name| frame.column(name))
        .collect::<Result<Vec<_>, _>>()?;

    let mut indices: Vec<usize> = (0..frame.num_rows).collect();
    indices.sort_by(|&a, &b| {
        let ordering = keys
            .iter()
            .map(|column| compare_cells(column, a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal);

        let ordering = match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };

        ordering.then_with(|| match &frame.row_ids {
            Some(ids) => ids[a].cmp(&ids[b]),
            None => Ordering::Equal,
        })
    });

    debug!(rows = frame.num_rows, keys = columns.len(), "Sorted frame");
    Ok(frame.take(&indices))
}

fn compare_cells(column: &ColumnData, a: usize, b: usize) -> Ordering {
    match column {
        ColumnData::Int64(values) | ColumnData::DateTime(values) => values[a].cmp(&values[b]),
        ColumnData::Double(values) => match (values[a], values[b]) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (x, y) => x.is_some().cmp(&y.is_some()),
        },
        ColumnData::Bool(values) => values[a].cmp(&values[b]),
        ColumnData::String(values) => values[a].cmp(&values[b]),
    }
}

#[cfg(test)]
mod tests {
    use strata_types::{DataType, Field, Value};

    use super::*;
    use crate::Table;

    fn frame() -> Frame {
        let table = Table::from_rows(
            vec![
                Field::new("group", DataType::String),
                Field::new("score", DataType::Double),
            ],
            &[
                vec![Value::from("b"), Value::Double(1.0)],
                vec![Value::from("a"), Value::Double(3.0)],
                vec![Value::from("b"), Value::Null],
                vec![Value::from("a"), Value::Double(3.0)],
                vec![Value::Null, Value::Double(2.0)],
            ],
        )
        .unwrap();
        let mut frame = Frame::from_table(&table);
        frame.row_ids = Some(vec![0, 1, 2, 3, 4]);
        frame
    }

    #[test]
    fn test_sort_is_stable_by_row_id() {
        let sorted =
            sort_frame(frame(), SortDirection::Ascending, &["group".to_string()], 100).unwrap();
        assert_eq!(sorted.row_ids, Some(vec![4, 1, 3, 0, 2]));

        let sorted =
            sort_frame(frame(), SortDirection::Descending, &["score".to_string()], 100).unwrap();
        assert_eq!(sorted.row_ids, Some(vec![1, 3, 4, 0, 2]));
    }

    #[test]
    fn test_sort_multiple_keys() {
        let sorted = sort_frame(
            frame(),
            SortDirection::Ascending,
            &["group".to_string(), "score".to_string()],
            100,
        )
        .unwrap();
        assert_eq!(sorted.row_ids, Some(vec![4, 1, 3, 2, 0]));
    }

    #[test]
    fn test_sort_respects_memory_bound() {
        let err = sort_frame(frame(), SortDirection::Ascending, &["group".to_string()], 3)
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::MemoryLimitExceeded {
                limit: 3,
                required: 5
            }
        ));
    }
}
