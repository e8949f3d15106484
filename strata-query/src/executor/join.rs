use strata_types::{Field, Schema};
use tracing::debug;

use crate::executor::ensure_materializable;
use crate::executor::frame::Frame;
use crate::executor::key::KeyValue;
use crate::{JoinMode, QueryError};

static RIGHT_SUFFIX: &str = "_right";

/// The schema of a join result.
///
/// Left columns come first, right columns whose names collide with a left
/// column are renamed with a `_right` suffix.
pub(crate) fn join_schema(left: &Schema, right: &Schema) -> Result<Schema, QueryError> {
    let mut fields = left.fields().to_vec();
    for field in right.fields() {
        let name = if left.index_of(&field.name).is_some() {
            format!("{}{RIGHT_SUFFIX}", field.name)
        } else {
            field.name.clone()
        };
        fields.push(Field::new(name, field.data_type));
    }
    Ok(Schema::new(fields)?)
}

/// Checks the key columns exist and can be compared, returning whether
/// keys must be widened to doubles.
pub(crate) fn check_keys(
    left: &Schema,
    right: &Schema,
    left_key: &str,
    right_key: &str,
) -> Result<bool, QueryError> {
    let left_type = left.require(left_key)?.data_type;
    let right_type = right.require(right_key)?.data_type;
    if !left_type.is_comparable_with(right_type) {
        return Err(QueryError::JoinKeyType {
            left: left_type,
            right: right_type,
        });
    }
    Ok(left_type != right_type)
}

/// Joins two frames on key equality.
///
/// The smaller input is loaded into a hash table and the other input is
/// streamed against it, output rows follow the order of the streamed
/// input with every match of a row emitted in build order. When the left
/// input is the build side, unmatched left rows of a left join are
/// appended after the matches, in left order.
pub(crate) fn hash_join(
    left: Frame,
    right: Frame,
    left_key: &str,
    right_key: &str,
    mode: JoinMode,
    max_rows: usize,
) -> Result<Frame, QueryError> {
    let schema = join_schema(&left.schema, &right.schema)?;
    let widen = check_keys(&left.schema, &right.schema, left_key, right_key)?;
    let left_keys = left.column(left_key)?;
    let right_keys = right.column(right_key)?;

    let build_left = left.num_rows < right.num_rows;
    let (build_keys, build_rows) = if build_left {
        (left_keys, left.num_rows)
    } else {
        (right_keys, right.num_rows)
    };
    ensure_materializable(build_rows, max_rows)?;

    let mut table: ahash::HashMap<KeyValue<'_>, Vec<usize>> = ahash::HashMap::default();
    for row in 0..build_rows {
        let key = KeyValue::read(build_keys, row, widen);
        if key.is_joinable() {
            table.entry(key).or_default().push(row);
        }
    }

    let mut left_rows: Vec<Option<usize>> = Vec::new();
    let mut right_rows: Vec<Option<usize>> = Vec::new();

    if build_left {
        let mut matched = vec![false; left.num_rows];
        for row in 0..right.num_rows {
            let key = KeyValue::read(right_keys, row, widen);
            let Some(matches) = table.get(&key) else {
                continue;
            };
            for &left_row in matches {
                matched[left_row] = true;
                left_rows.push(Some(left_row));
                right_rows.push(Some(row));
            }
            ensure_materializable(left_rows.len(), max_rows)?;
        }

        if mode == JoinMode::Left {
            for (row, _) in matched.iter().enumerate().filter(|(_, m)| !**m) {
                left_rows.push(Some(row));
                right_rows.push(None);
            }
        }
    } else {
        for row in 0..left.num_rows {
            let key = KeyValue::read(left_keys, row, widen);
            match table.get(&key) {
                Some(matches) => {
                    for &right_row in matches {
                        left_rows.push(Some(row));
                        right_rows.push(Some(right_row));
                    }
                },
                None if mode == JoinMode::Left => {
                    left_rows.push(Some(row));
                    right_rows.push(None);
                },
                None => {},
            }
            ensure_materializable(left_rows.len(), max_rows)?;
        }
    }

    let mut columns: Vec<_> = left
        .columns
        .iter()
        .map(|c| c.take_optional(&left_rows))
        .collect();
    columns.extend(right.columns.iter().map(|c| c.take_optional(&right_rows)));

    debug!(
        left_rows = left.num_rows,
        right_rows = right.num_rows,
        build_side = if build_left { "left" } else { "right" },
        output_rows = left_rows.len(),
        "Joined frames",
    );

    Ok(Frame {
        schema,
        columns,
        num_rows: left_rows.len(),
        row_ids: None,
    })
}
