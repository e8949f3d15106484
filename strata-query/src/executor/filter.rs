//! Vectorized predicate evaluation and segment pruning.

use std::cmp::Ordering;

use strata_types::{compare_int_float, ColumnData, ColumnStats, DataType, Value};

use crate::{FilterOp, Predicate, QueryError};

/// The number of rows evaluated per selection window.
pub(crate) const WINDOW: usize = 1024;

/// Checks that a predicate can be applied to a column of `data_type`.
pub(crate) fn check_predicate(
    predicate: &Predicate,
    data_type: DataType,
) -> Result<(), QueryError> {
    let Some(literal_type) = predicate.value.data_type() else {
        return Err(QueryError::TypeMismatch(format!(
            "cannot filter {:?} against a null literal",
            predicate.column
        )));
    };

    let valid = if predicate.op.is_string_op() {
        data_type == DataType::String && literal_type == DataType::String
    } else {
        data_type.is_comparable_with(literal_type)
    };

    if valid {
        Ok(())
    } else {
        Err(QueryError::TypeMismatch(format!(
            "{predicate} compares a {data_type} column with a {literal_type} value"
        )))
    }
}

#[derive(Debug, Clone)]
enum Kernel {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Micros(i64),
    StartsWith(String),
    Contains(String),
}

#[derive(Debug, Clone)]
/// A predicate specialised for the type of the column it reads.
pub(crate) struct CompiledPredicate {
    op: FilterOp,
    kernel: Kernel,
}

impl CompiledPredicate {
    pub(crate) fn compile(
        predicate: &Predicate,
        data_type: DataType,
    ) -> Result<Self, QueryError> {
        check_predicate(predicate, data_type)?;

        let kernel = match (predicate.op, &predicate.value) {
            (FilterOp::StartsWith, Value::String(s)) => Kernel::StartsWith(s.clone()),
            (FilterOp::Contains, Value::String(s)) => Kernel::Contains(s.clone()),
            (_, Value::Int64(v)) => Kernel::Int(*v),
            (_, Value::Double(v)) => Kernel::Float(*v),
            (_, Value::Bool(v)) => Kernel::Bool(*v),
            (_, Value::String(v)) => Kernel::Str(v.clone()),
            (_, Value::DateTime(v)) => Kernel::Micros(v.timestamp_micros()),
            (_, Value::Null) => {
                return Err(QueryError::TypeMismatch("null filter literal".to_string()))
            },
        };

        Ok(Self {
            op: predicate.op,
            kernel,
        })
    }

    /// Clears the selection of every row of `column` failing the predicate.
    pub(crate) fn refine(&self, column: &ColumnData, selection: &mut [bool]) {
        let op = self.op;
        let test = move |ordering: Option<Ordering>| ordering.is_some_and(|o| op.matches_ordering(o));

        match (&self.kernel, column) {
            (Kernel::Int(v), ColumnData::Int64(values)) => {
                refine_window(values, selection, |x| test(Some(x.cmp(v))))
            },
            (Kernel::Int(v), ColumnData::Double(values)) => refine_window(values, selection, |x| {
                test(compare_int_float(*v, *x).map(Ordering::reverse))
            }),
            (Kernel::Float(v), ColumnData::Int64(values)) => {
                refine_window(values, selection, |x| test(compare_int_float(*x, *v)))
            },
            (Kernel::Float(v), ColumnData::Double(values)) => {
                refine_window(values, selection, |x| test(x.partial_cmp(v)))
            },
            (Kernel::Bool(v), ColumnData::Bool(values)) => {
                refine_window(values, selection, |x| test(Some(x.cmp(v))))
            },
            (Kernel::Str(v), ColumnData::String(values)) => {
                refine_window(values, selection, |x| test(Some(x.as_str().cmp(v.as_str()))))
            },
            (Kernel::Micros(v), ColumnData::DateTime(values)) => {
                refine_window(values, selection, |x| test(Some(x.cmp(v))))
            },
            (Kernel::StartsWith(prefix), ColumnData::String(values)) => {
                refine_window(values, selection, |x| x.starts_with(prefix.as_str()))
            },
            (Kernel::Contains(needle), ColumnData::String(values)) => {
                refine_window(values, selection, |x| x.contains(needle.as_str()))
            },
            _ => selection.fill(false),
        }
    }
}

fn refine_window<T>(values: &[Option<T>], selection: &mut [bool], test: impl Fn(&T) -> bool) {
    for (values, selection) in values.chunks(WINDOW).zip(selection.chunks_mut(WINDOW)) {
        for (value, selected) in values.iter().zip(selection.iter_mut()) {
            *selected = *selected && value.as_ref().is_some_and(&test);
        }
    }
}

/// Returns the offsets of the selected rows.
pub(crate) fn selected_offsets(selection: &[bool]) -> Vec<usize> {
    selection
        .iter()
        .enumerate()
        .filter_map(|(idx, selected)| selected.then_some(idx))
        .collect()
}

/// Returns false only if no value within the statistics bounds can
/// satisfy the predicate.
pub(crate) fn may_match(stats: &ColumnStats, predicate: &Predicate) -> bool {
    let (Some(min), Some(max)) = (&stats.min, &stats.max) else {
        // Nulls never match.
        return false;
    };

    let literal = &predicate.value;
    let lower = min.compare(literal);
    let upper = max.compare(literal);

    match predicate.op {
        FilterOp::Equals => lower != Some(Ordering::Greater) && upper != Some(Ordering::Less),
        FilterOp::NotEquals => !(lower == Some(Ordering::Equal) && upper == Some(Ordering::Equal)),
        FilterOp::GreaterThan => !matches!(upper, Some(Ordering::Less | Ordering::Equal)),
        FilterOp::GreaterOrEqual => upper != Some(Ordering::Less),
        FilterOp::LessThan => !matches!(lower, Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::LessOrEqual => lower != Some(Ordering::Greater),
        FilterOp::StartsWith => match (min.as_str(), max.as_str(), literal.as_str()) {
            (Some(min), Some(max), Some(prefix)) => {
                max >= prefix && (min <= prefix || min.starts_with(prefix))
            },
            _ => true,
        },
        FilterOp::Contains => true,
    }
}
