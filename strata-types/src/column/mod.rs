//! Column-major value buffers.
//!
//! Every column stores `Option<T>` values where `None` is a null. `DateTime`
//! values are held as microseconds since the unix epoch (UTC).

mod stats;

use std::ops::Range;

use serde::{Deserialize, Serialize};

pub use self::stats::ColumnStats;
use crate::{datetime_from_micros, DataType, Value};

#[derive(Debug, thiserror::Error)]
/// An error produced when writing values into a [ColumnData] buffer.
pub enum ColumnError {
    #[error("value {value} cannot be stored as {expected}")]
    /// The value cannot be coerced into the column type.
    Coercion { value: Value, expected: DataType },
    #[error("cannot combine a {found} column with a {expected} column")]
    TypeMismatch { expected: DataType, found: DataType },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A typed buffer holding the values of a single column.
pub enum ColumnData {
    Int64(Vec<Option<i64>>),
    Double(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    String(Vec<Option<String>>),
    DateTime(Vec<Option<i64>>),
}

macro_rules! map_column {
    ($slf:expr, $values:ident => $body:expr) => {{
        match $slf {
            ColumnData::Int64($values) => ColumnData::Int64($body),
            ColumnData::Double($values) => ColumnData::Double($body),
            ColumnData::Bool($values) => ColumnData::Bool($body),
            ColumnData::String($values) => ColumnData::String($body),
            ColumnData::DateTime($values) => ColumnData::DateTime($body),
        }
    }};
}

macro_rules! with_column {
    ($slf:expr, $values:ident => $body:expr) => {{
        match $slf {
            ColumnData::Int64($values) => $body,
            ColumnData::Double($values) => $body,
            ColumnData::Bool($values) => $body,
            ColumnData::String($values) => $body,
            ColumnData::DateTime($values) => $body,
        }
    }};
}

impl ColumnData {
    /// Creates an empty column of the given type.
    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Int64 => ColumnData::Int64(Vec::with_capacity(capacity)),
            DataType::Double => ColumnData::Double(Vec::with_capacity(capacity)),
            DataType::Bool => ColumnData::Bool(Vec::with_capacity(capacity)),
            DataType::String => ColumnData::String(Vec::with_capacity(capacity)),
            DataType::DateTime => ColumnData::DateTime(Vec::with_capacity(capacity)),
        }
    }

    /// Creates a column of `len` nulls.
    pub fn nulls(data_type: DataType, len: usize) -> Self {
        match data_type {
            DataType::Int64 => ColumnData::Int64(vec![None; len]),
            DataType::Double => ColumnData::Double(vec![None; len]),
            DataType::Bool => ColumnData::Bool(vec![None; len]),
            DataType::String => ColumnData::String(vec![None; len]),
            DataType::DateTime => ColumnData::DateTime(vec![None; len]),
        }
    }

    /// Builds a column from values, coercing each value to the column type.
    pub fn from_values<'a>(
        data_type: DataType,
        values: impl IntoIterator<Item = &'a Value>,
    ) -> Result<Self, ColumnError> {
        let iter = values.into_iter();
        let mut column = Self::with_capacity(data_type, iter.size_hint().0);
        for value in iter {
            column.push(value)?;
        }
        Ok(column)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Int64(_) => DataType::Int64,
            ColumnData::Double(_) => DataType::Double,
            ColumnData::Bool(_) => DataType::Bool,
            ColumnData::String(_) => DataType::String,
            ColumnData::DateTime(_) => DataType::DateTime,
        }
    }

    pub fn len(&self) -> usize {
        with_column!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a value, coercing it into the column type.
    pub fn push(&mut self, value: &Value) -> Result<(), ColumnError> {
        let data_type = self.data_type();
        let coerced = value.coerce_to(data_type).ok_or_else(|| ColumnError::Coercion {
            value: value.clone(),
            expected: data_type,
        })?;

        match (self, coerced) {
            (ColumnData::Int64(values), Value::Int64(v)) => values.push(Some(v)),
            (ColumnData::Double(values), Value::Double(v)) => values.push(Some(v)),
            (ColumnData::Bool(values), Value::Bool(v)) => values.push(Some(v)),
            (ColumnData::String(values), Value::String(v)) => values.push(Some(v)),
            (ColumnData::DateTime(values), Value::DateTime(v)) => {
                values.push(Some(v.timestamp_micros()))
            },
            (column, _) => column.push_null(),
        }

        Ok(())
    }

    pub fn push_null(&mut self) {
        with_column!(self, values => values.push(None))
    }

    /// Returns the value at the given row offset.
    ///
    /// Panics if `idx` is out of bounds.
    pub fn get(&self, idx: usize) -> Value {
        match self {
            ColumnData::Int64(values) => values[idx].into(),
            ColumnData::Double(values) => values[idx].into(),
            ColumnData::Bool(values) => values[idx].into(),
            ColumnData::String(values) => values[idx].clone().into(),
            ColumnData::DateTime(values) => {
                values[idx].and_then(datetime_from_micros).into()
            },
        }
    }

    /// Returns true if the value at the given offset is null.
    pub fn is_null(&self, idx: usize) -> bool {
        with_column!(self, values => values[idx].is_none())
    }

    /// Gathers the values at the given offsets into a new column.
    pub fn take(&self, indices: &[usize]) -> ColumnData {
        map_column!(self, values => indices.iter().map(|&i| values[i].clone()).collect())
    }

    /// Gathers values at the given offsets, producing a null for `None`.
    pub fn take_optional(&self, indices: &[Option<usize>]) -> ColumnData {
        map_column!(self, values => indices
            .iter()
            .map(|i| i.and_then(|i| values[i].clone()))
            .collect())
    }

    pub fn slice(&self, range: Range<usize>) -> ColumnData {
        map_column!(self, values => values[range.clone()].to_vec())
    }

    /// Appends all values of another column of the same type.
    pub fn extend_from(&mut self, other: &ColumnData) -> Result<(), ColumnError> {
        match (self, other) {
            (ColumnData::Int64(a), ColumnData::Int64(b)) => a.extend_from_slice(b),
            (ColumnData::Double(a), ColumnData::Double(b)) => a.extend_from_slice(b),
            (ColumnData::Bool(a), ColumnData::Bool(b)) => a.extend_from_slice(b),
            (ColumnData::String(a), ColumnData::String(b)) => a.extend_from_slice(b),
            (ColumnData::DateTime(a), ColumnData::DateTime(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(ColumnError::TypeMismatch {
                    expected: a.data_type(),
                    found: b.data_type(),
                })
            },
        }
        Ok(())
    }

    /// A rough estimate of the in-memory size of the column in bytes.
    pub fn estimated_bytes(&self) -> usize {
        match self {
            ColumnData::Int64(values) => values.len() * 16,
            ColumnData::Double(values) => values.len() * 16,
            ColumnData::Bool(values) => values.len() * 2,
            ColumnData::String(values) => values
                .iter()
                .map(|v| 24 + v.as_ref().map(String::len).unwrap_or(0))
                .sum(),
            ColumnData::DateTime(values) => values.len() * 16,
        }
    }

    /// Computes the min/max statistics of the column.
    pub fn stats(&self) -> ColumnStats {
        ColumnStats::compute(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_coerces_values() {
        let mut column = ColumnData::with_capacity(DataType::Double, 3);
        column.push(&Value::Int64(3)).unwrap();
        column.push(&Value::Null).unwrap();
        column.push(&Value::from("1.5")).unwrap();

        assert_eq!(column, ColumnData::Double(vec![Some(3.0), None, Some(1.5)]));
    }

    #[test]
    fn test_push_rejects_bad_values() {
        let mut column = ColumnData::with_capacity(DataType::Int64, 1);
        let err = column.push(&Value::from("nope")).unwrap_err();
        assert!(matches!(err, ColumnError::Coercion { expected: DataType::Int64, .. }));
        assert!(column.is_empty(), "Failed push should not append");
    }

    #[test]
    fn test_datetime_round_trips_through_micros() {
        let ts = chrono::DateTime::from_timestamp(1_700_000_000, 123_000).unwrap();
        let mut column = ColumnData::with_capacity(DataType::DateTime, 1);
        column.push(&Value::DateTime(ts)).unwrap();
        assert_eq!(column.get(0), Value::DateTime(ts));
    }

    #[test]
    fn test_take_and_take_optional() {
        let column = ColumnData::String(vec![
            Some("a".to_string()),
            Some("b".to_string()),
            None,
        ]);

        let taken = column.take(&[2, 0, 0]);
        assert_eq!(
            taken,
            ColumnData::String(vec![None, Some("a".to_string()), Some("a".to_string())])
        );

        let taken = column.take_optional(&[Some(1), None]);
        assert_eq!(taken, ColumnData::String(vec![Some("b".to_string()), None]));
    }

    #[test]
    fn test_extend_type_mismatch() {
        let mut a = ColumnData::Int64(vec![Some(1)]);
        let b = ColumnData::Bool(vec![Some(true)]);
        assert!(a.extend_from(&b).is_err());

        let c = ColumnData::Int64(vec![None, Some(2)]);
        a.extend_from(&c).unwrap();
        assert_eq!(a.len(), 3);
    }
}
