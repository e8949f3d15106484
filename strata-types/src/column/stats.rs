use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::ColumnData;
use crate::{datetime_from_micros, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Min/max statistics of a column chunk.
///
/// `min` and `max` are `None` when the chunk holds no non-null values.
/// `NaN` is never recorded as a bound.
pub struct ColumnStats {
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub null_count: u64,
}

impl ColumnStats {
    pub(crate) fn compute(column: &ColumnData) -> Self {
        match column {
            ColumnData::Int64(values) => bounds(values, |v| Value::Int64(*v), Ord::cmp),
            ColumnData::Double(values) => {
                let mut stats = ColumnStats::default();
                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                let mut seen = false;
                for value in values {
                    match value {
                        None => stats.null_count += 1,
                        Some(v) if v.is_nan() => {},
                        Some(v) => {
                            seen = true;
                            min = min.min(*v);
                            max = max.max(*v);
                        },
                    }
                }
                if seen {
                    stats.min = Some(Value::Double(min));
                    stats.max = Some(Value::Double(max));
                }
                stats
            },
            ColumnData::Bool(values) => bounds(values, |v| Value::Bool(*v), Ord::cmp),
            ColumnData::String(values) => {
                bounds(values, |v| Value::String(v.clone()), Ord::cmp)
            },
            ColumnData::DateTime(values) => bounds(
                values,
                |v| datetime_from_micros(*v).map(Value::DateTime).unwrap_or(Value::Null),
                Ord::cmp,
            ),
        }
    }

    /// Returns true if the chunk has no non-null values.
    pub fn all_null(&self) -> bool {
        self.min.is_none() || self.max.is_none()
    }

    /// Merges another set of statistics into this one.
    pub fn merge(&mut self, other: &ColumnStats) {
        self.null_count += other.null_count;
        self.min = pick(self.min.take(), other.min.clone(), Ordering::Less);
        self.max = pick(self.max.take(), other.max.clone(), Ordering::Greater);
    }
}

fn pick(a: Option<Value>, b: Option<Value>, keep: Ordering) -> Option<Value> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if b.compare(&a) == Some(keep) {
                Some(b)
            } else {
                Some(a)
            }
        },
        (a, b) => a.or(b),
    }
}

fn bounds<T>(
    values: &[Option<T>],
    to_value: impl Fn(&T) -> Value,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> ColumnStats {
    let mut null_count = 0;
    let mut min: Option<&T> = None;
    let mut max: Option<&T> = None;

    for value in values {
        let Some(v) = value else {
            null_count += 1;
            continue;
        };

        if min.map_or(true, |m| cmp(v, m) == Ordering::Less) {
            min = Some(v);
        }
        if max.map_or(true, |m| cmp(v, m) == Ordering::Greater) {
            max = Some(v);
        }
    }

    ColumnStats {
        min: min.map(&to_value),
        max: max.map(&to_value),
        null_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_stats() {
        let stats = ColumnData::Int64(vec![Some(5), None, Some(-2), Some(9)]).stats();
        assert_eq!(stats.min, Some(Value::Int64(-2)));
        assert_eq!(stats.max, Some(Value::Int64(9)));
        assert_eq!(stats.null_count, 1);
    }

    #[test]
    fn test_double_stats_skip_nan() {
        let stats =
            ColumnData::Double(vec![Some(f64::NAN), Some(1.5), Some(-0.5)]).stats();
        assert_eq!(stats.min, Some(Value::Double(-0.5)));
        assert_eq!(stats.max, Some(Value::Double(1.5)));
    }

    #[test]
    fn test_all_null_column() {
        let stats = ColumnData::String(vec![None, None]).stats();
        assert!(stats.all_null());
        assert_eq!(stats.null_count, 2);
    }

    #[test]
    fn test_merge_stats() {
        let mut a = ColumnData::Int64(vec![Some(3), Some(4)]).stats();
        let b = ColumnData::Int64(vec![Some(1), None]).stats();
        a.merge(&b);
        assert_eq!(a.min, Some(Value::Int64(1)));
        assert_eq!(a.max, Some(Value::Int64(4)));
        assert_eq!(a.null_count, 1);
    }

    #[test]
    fn test_stats_serialize_to_json() {
        let stats = ColumnData::String(vec![Some("b".into()), Some("a".into())]).stats();
        let json = serde_json::to_string(&stats).unwrap();
        let loaded: ColumnStats = serde_json::from_str(&json).unwrap();
        assert_eq!(stats, loaded);
    }
}
