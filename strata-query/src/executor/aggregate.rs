use std::collections::hash_map::Entry;

use strata_types::{ColumnData, DataType, Field, Schema, Value};
use tracing::debug;

use crate::executor::frame::Frame;
use crate::executor::key::KeyValue;
use crate::{Aggregation, QueryError};

/// The type produced by applying `aggregation` to a column of `value_type`.
pub(crate) fn output_type(
    aggregation: Aggregation,
    value_type: DataType,
) -> Result<DataType, QueryError> {
    match aggregation {
        Aggregation::Count => Ok(DataType::Int64),
        Aggregation::Min | Aggregation::Max => Ok(value_type),
        Aggregation::Sum if value_type.is_numeric() => Ok(value_type),
        Aggregation::Avg if value_type.is_numeric() => Ok(DataType::Double),
        _ => Err(QueryError::TypeMismatch(format!(
            "{aggregation} cannot be applied to a {value_type} column"
        ))),
    }
}

/// The schema of an aggregation result: the key column followed by the
/// aggregated output column.
pub(crate) fn output_schema(
    input: &Schema,
    key: &str,
    value: &str,
    aggregation: Aggregation,
    output: &str,
) -> Result<Schema, QueryError> {
    let key_field = input.require(key)?.clone();
    let value_type = input.require(value)?.data_type;
    let output_type = output_type(aggregation, value_type)?;
    Ok(Schema::new(vec![key_field, Field::new(output, output_type)])?)
}

#[derive(Debug)]
enum Accumulator {
    SumInt(Option<i64>),
    SumFloat(Option<f64>),
    Count(i64),
    Avg { sum: f64, count: u64 },
    Min(Value),
    Max(Value),
}

impl Accumulator {
    fn new(aggregation: Aggregation, value_type: DataType) -> Self {
        match aggregation {
            Aggregation::Sum if value_type == DataType::Int64 => Accumulator::SumInt(None),
            Aggregation::Sum => Accumulator::SumFloat(None),
            Aggregation::Count => Accumulator::Count(0),
            Aggregation::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            Aggregation::Min => Accumulator::Min(Value::Null),
            Aggregation::Max => Accumulator::Max(Value::Null),
        }
    }

    fn update(&mut self, column: &ColumnData, row: usize) -> Result<(), QueryError> {
        if column.is_null(row) {
            return Ok(());
        }

        match self {
            Accumulator::SumInt(sum) => {
                if let ColumnData::Int64(values) = column {
                    let value = values[row].unwrap_or_default();
                    let total = sum.unwrap_or_default().checked_add(value).ok_or_else(|| {
                        QueryError::ArithmeticOverflow("integer sum exceeds Int64".to_string())
                    })?;
                    *sum = Some(total);
                }
            },
            Accumulator::SumFloat(sum) => {
                if let Some(value) = column.get(row).as_f64() {
                    *sum = Some(sum.unwrap_or_default() + value);
                }
            },
            Accumulator::Count(count) => *count += 1,
            Accumulator::Avg { sum, count } => {
                if let Some(value) = column.get(row).as_f64() {
                    *sum += value;
                    *count += 1;
                }
            },
            Accumulator::Min(current) => {
                let value = column.get(row);
                if is_nan(&value) {
                    return Ok(());
                }
                if current.is_null() || value.total_cmp(current).is_lt() {
                    *current = value;
                }
            },
            Accumulator::Max(current) => {
                let value = column.get(row);
                if is_nan(&value) {
                    return Ok(());
                }
                if current.is_null() || value.total_cmp(current).is_gt() {
                    *current = value;
                }
            },
        }

        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::SumInt(sum) => sum.into(),
            Accumulator::SumFloat(sum) => sum.into(),
            Accumulator::Count(count) => Value::Int64(count),
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { sum, count } => Value::Double(sum / count as f64),
            Accumulator::Min(value) | Accumulator::Max(value) => value,
        }
    }
}

/// `NaN` never becomes a minimum or maximum, matching the column statistics.
fn is_nan(value: &Value) -> bool {
    matches!(value, Value::Double(v) if v.is_nan())
}

/// Groups the frame by `key` in a single pass.
///
/// Groups are emitted in the order their key is first seen. Rows with a
/// null key form a single group, null values are skipped by every
/// aggregation.
pub(crate) fn aggregate(
    frame: Frame,
    key: &str,
    value: &str,
    aggregation: Aggregation,
    output: &str,
) -> Result<Frame, QueryError> {
    let schema = output_schema(&frame.schema, key, value, aggregation, output)?;
    let key_column = frame.column(key)?;
    let value_column = frame.column(value)?;

    let mut groups: ahash::HashMap<KeyValue<'_>, usize> = ahash::HashMap::default();
    let mut first_rows = Vec::new();
    let mut accumulators = Vec::new();

    for row in 0..frame.num_rows {
        let group = match groups.entry(KeyValue::read(key_column, row, false)) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                first_rows.push(row);
                accumulators.push(Accumulator::new(aggregation, value_column.data_type()));
                *entry.insert(accumulators.len() - 1)
            },
        };
        accumulators[group].update(value_column, row)?;
    }

    let output_type = schema.fields()[1].data_type;
    let mut results = ColumnData::with_capacity(output_type, accumulators.len());
    for accumulator in accumulators {
        results
            .push(&accumulator.finish())
            .map_err(|e| QueryError::TypeMismatch(e.to_string()))?;
    }

    debug!(rows = frame.num_rows, groups = first_rows.len(), "Aggregated frame");
    Ok(Frame {
        schema,
        columns: vec![key_column.take(&first_rows), results],
        num_rows: first_rows.len(),
        row_ids: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Table;

    fn frame() -> Frame {
        let table = Table::from_rows(
            vec![
                Field::new("category", DataType::String),
                Field::new("amount", DataType::Int64),
            ],
            &[
                vec![Value::from("tools"), Value::Int64(5)],
                vec![Value::from("books"), Value::Int64(2)],
                vec![Value::from("tools"), Value::Null],
                vec![Value::Null, Value::Int64(9)],
                vec![Value::from("books"), Value::Int64(4)],
                vec![Value::from("toys"), Value::Null],
            ],
        )
        .unwrap();
        Frame::from_table(&table)
    }

    fn run(aggregation: Aggregation) -> Vec<Vec<Value>> {
        aggregate(frame(), "category", "amount", aggregation, "out")
            .unwrap()
            .into_table()
            .rows()
            .collect()
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let rows = run(Aggregation::Sum);
        assert_eq!(
            rows,
            vec![
                vec![Value::from("tools"), Value::Int64(5)],
                vec![Value::from("books"), Value::Int64(6)],
                vec![Value::Null, Value::Int64(9)],
                vec![Value::from("toys"), Value::Null],
            ]
        );
    }

    #[rstest::rstest]
    #[case(Aggregation::Count, vec![Value::Int64(1), Value::Int64(2), Value::Int64(1), Value::Int64(0)])]
    #[case(Aggregation::Avg, vec![Value::Double(5.0), Value::Double(3.0), Value::Double(9.0), Value::Null])]
    #[case(Aggregation::Min, vec![Value::Int64(5), Value::Int64(2), Value::Int64(9), Value::Null])]
    #[case(Aggregation::Max, vec![Value::Int64(5), Value::Int64(4), Value::Int64(9), Value::Null])]
    fn test_aggregations(#[case] aggregation: Aggregation, #[case] expected: Vec<Value>) {
        let outputs: Vec<Value> = run(aggregation).into_iter().map(|row| row[1].clone()).collect();
        assert_eq!(outputs, expected, "{aggregation}");
    }

    #[rstest::rstest]
    #[case(Aggregation::Min, vec![Value::Double(-1.0), Value::Null])]
    #[case(Aggregation::Max, vec![Value::Double(3.0), Value::Null])]
    fn test_min_max_skip_nan(#[case] aggregation: Aggregation, #[case] expected: Vec<Value>) {
        let table = Table::from_rows(
            vec![Field::new("k", DataType::String), Field::new("v", DataType::Double)],
            &[
                vec![Value::from("a"), Value::Double(f64::NAN)],
                vec![Value::from("a"), Value::Double(3.0)],
                vec![Value::from("b"), Value::Double(f64::NAN)],
                vec![Value::from("a"), Value::Double(-1.0)],
            ],
        )
        .unwrap();
        let outputs: Vec<Value> = aggregate(Frame::from_table(&table), "k", "v", aggregation, "m")
            .unwrap()
            .into_table()
            .rows()
            .map(|row| row[1].clone())
            .collect();
        assert_eq!(outputs, expected, "{aggregation}");
    }

    #[test]
    fn test_integer_sum_overflow() {
        let table = Table::from_rows(
            vec![Field::new("k", DataType::Bool), Field::new("v", DataType::Int64)],
            &[
                vec![Value::Bool(true), Value::Int64(i64::MAX)],
                vec![Value::Bool(true), Value::Int64(1)],
            ],
        )
        .unwrap();
        let err = aggregate(Frame::from_table(&table), "k", "v", Aggregation::Sum, "s")
            .unwrap_err();
        assert!(matches!(err, QueryError::ArithmeticOverflow(_)));
    }

    #[rstest::rstest]
    #[case(Aggregation::Sum, DataType::String, None)]
    #[case(Aggregation::Avg, DataType::Bool, None)]
    #[case(Aggregation::Sum, DataType::Double, Some(DataType::Double))]
    #[case(Aggregation::Count, DataType::String, Some(DataType::Int64))]
    #[case(Aggregation::Max, DataType::DateTime, Some(DataType::DateTime))]
    fn test_output_types(
        #[case] aggregation: Aggregation,
        #[case] input: DataType,
        #[case] expected: Option<DataType>,
    ) {
        assert_eq!(output_type(aggregation, input).ok(), expected);
    }
}
