use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DataType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A single dynamically typed value.
///
/// `Null` doubles as the explicit "missing" marker produced by left joins,
/// it is never confused with the zero value of a type.
pub enum Value {
    Null,
    Int64(i64),
    Double(f64),
    Bool(bool),
    String(String),
    DateTime(DateTime<Utc>),
}

impl Value {
    /// Returns the type of the value, `None` for `Null`.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Int64(_) => Some(DataType::Int64),
            Value::Double(_) => Some(DataType::Double),
            Value::Bool(_) => Some(DataType::Bool),
            Value::String(_) => Some(DataType::String),
            Value::DateTime(_) => Some(DataType::DateTime),
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the value as a float if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Attempts to convert the value into the target type.
    ///
    /// Returns `None` when the value cannot be represented in the target
    /// type without loss, e.g. `"abc"` as `Int64` or `1.5` as `Int64`.
    /// `Null` coerces to every type.
    pub fn coerce_to(&self, target: DataType) -> Option<Value> {
        if self.data_type() == Some(target) {
            return Some(self.clone());
        }

        let coerced = match (self, target) {
            (Value::Null, _) => Value::Null,
            (Value::Double(v), DataType::Int64) => {
                if !v.is_finite() || v.fract() != 0.0 {
                    return None;
                }
                if *v < i64::MIN as f64 || *v >= i64::MAX as f64 {
                    return None;
                }
                Value::Int64(*v as i64)
            },
            (Value::Bool(v), DataType::Int64) => Value::Int64(*v as i64),
            (Value::String(v), DataType::Int64) => Value::Int64(v.trim().parse().ok()?),
            (Value::Int64(v), DataType::Double) => Value::Double(*v as f64),
            (Value::String(v), DataType::Double) => Value::Double(v.trim().parse().ok()?),
            (Value::Int64(0), DataType::Bool) => Value::Bool(false),
            (Value::Int64(1), DataType::Bool) => Value::Bool(true),
            (Value::String(v), DataType::Bool) => Value::Bool(parse_bool(v)?),
            (Value::Int64(v), DataType::String) => Value::String(v.to_string()),
            (Value::Double(v), DataType::String) => Value::String(v.to_string()),
            (Value::Bool(v), DataType::String) => Value::String(v.to_string()),
            (Value::DateTime(v), DataType::String) => Value::String(v.to_rfc3339()),
            (Value::String(v), DataType::DateTime) => Value::DateTime(parse_datetime(v)?),
            (Value::Int64(secs), DataType::DateTime) => {
                Value::DateTime(DateTime::from_timestamp(*secs, 0)?)
            },
            _ => return None,
        };

        Some(coerced)
    }

    /// Compares two values of comparable types.
    ///
    /// Returns `None` if either side is `Null`, the types cannot be compared
    /// or a float comparison involves `NaN`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Double(b)) => compare_int_float(*a, *b),
            (Value::Double(a), Value::Int64(b)) => compare_int_float(*b, *a).map(Ordering::reverse),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// A total order used for sorting.
    ///
    /// `Null` sorts before every other value and `NaN` after every other
    /// float. Values of unrelated types are ordered by their type tag.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Int64(a), Value::Double(b)) => {
                compare_int_float(*a, *b).unwrap_or(Ordering::Less)
            },
            (Value::Double(a), Value::Int64(b)) => {
                compare_int_float(*b, *a).map_or(Ordering::Greater, Ordering::reverse)
            },
            (a, b) => a.compare(b).unwrap_or_else(|| {
                let left = a.data_type().map(DataType::as_u8);
                let right = b.data_type().map(DataType::as_u8);
                left.cmp(&right)
            }),
        }
    }
}

/// Compares an integer with a float without rounding the integer.
///
/// Returns `None` if `b` is `NaN`.
pub fn compare_int_float(a: i64, b: f64) -> Option<Ordering> {
    // 2^63, exactly representable.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    if b.is_nan() {
        return None;
    }
    if b >= LIMIT {
        return Some(Ordering::Less);
    }
    if b < -LIMIT {
        return Some(Ordering::Greater);
    }

    // Within range the integral part converts exactly.
    let whole = b.trunc();
    match a.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0f64.partial_cmp(&(b - whole)),
        ordering => Some(ordering),
    }
}

/// Converts microseconds since the unix epoch into a UTC timestamp.
pub fn datetime_from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int64(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case(Value::Int64(4), DataType::Double, Some(Value::Double(4.0)))]
    #[case(Value::Double(4.0), DataType::Int64, Some(Value::Int64(4)))]
    #[case(Value::Double(4.5), DataType::Int64, None)]
    #[case(Value::Double(f64::NAN), DataType::Int64, None)]
    #[case(Value::from(" 12 "), DataType::Int64, Some(Value::Int64(12)))]
    #[case(Value::from("abc"), DataType::Int64, None)]
    #[case(Value::from("2.5"), DataType::Double, Some(Value::Double(2.5)))]
    #[case(Value::from("TRUE"), DataType::Bool, Some(Value::Bool(true)))]
    #[case(Value::Int64(1), DataType::Bool, Some(Value::Bool(true)))]
    #[case(Value::Int64(2), DataType::Bool, None)]
    #[case(Value::Int64(7), DataType::String, Some(Value::from("7")))]
    #[case(Value::Bool(true), DataType::DateTime, None)]
    #[case(Value::Null, DataType::Bool, Some(Value::Null))]
    fn test_coerce(
        #[case] value: Value,
        #[case] target: DataType,
        #[case] expected: Option<Value>,
    ) {
        assert_eq!(value.coerce_to(target), expected);
    }

    #[test]
    fn test_coerce_datetime_strings() {
        let expected = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let rfc = Value::from("2023-11-14T22:13:20Z");
        assert_eq!(rfc.coerce_to(DataType::DateTime), Some(Value::DateTime(expected)));

        let plain = Value::from("2023-11-14 22:13:20");
        assert_eq!(plain.coerce_to(DataType::DateTime), Some(Value::DateTime(expected)));

        let garbage = Value::from("yesterday");
        assert_eq!(garbage.coerce_to(DataType::DateTime), None);
    }

    #[test]
    fn test_compare_mixed_numerics() {
        assert_eq!(
            Value::Int64(3).compare(&Value::Double(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Double(3.0).compare(&Value::Int64(3)), Some(Ordering::Equal));
        assert_eq!(Value::Int64(3).compare(&Value::from("3")), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[rstest::rstest]
    #[case(9_007_199_254_740_993, 9_007_199_254_740_992.0, Some(Ordering::Greater))]
    #[case(9_007_199_254_740_992, 9_007_199_254_740_992.0, Some(Ordering::Equal))]
    #[case(i64::MAX, 9_223_372_036_854_775_808.0, Some(Ordering::Less))]
    #[case(i64::MIN, -9_223_372_036_854_775_808.0, Some(Ordering::Equal))]
    #[case(i64::MIN, f64::NEG_INFINITY, Some(Ordering::Greater))]
    #[case(2, 2.5, Some(Ordering::Less))]
    #[case(-2, -2.5, Some(Ordering::Greater))]
    #[case(-3, -2.5, Some(Ordering::Less))]
    #[case(0, -0.0, Some(Ordering::Equal))]
    #[case(1, f64::NAN, None)]
    fn test_compare_int_float_is_exact(
        #[case] a: i64,
        #[case] b: f64,
        #[case] expected: Option<Ordering>,
    ) {
        assert_eq!(compare_int_float(a, b), expected);
        assert_eq!(Value::Int64(a).compare(&Value::Double(b)), expected);
        assert_eq!(
            Value::Double(b).compare(&Value::Int64(a)),
            expected.map(Ordering::reverse)
        );
    }

    #[test]
    fn test_total_cmp_nulls_first() {
        let mut values = vec![
            Value::Double(2.0),
            Value::Null,
            Value::Double(f64::NAN),
            Value::Int64(1),
        ];
        values.sort_by(|a, b| a.total_cmp(b));

        assert!(values[0].is_null());
        assert_eq!(values[1], Value::Int64(1));
        assert_eq!(values[2], Value::Double(2.0));
        assert!(matches!(values[3], Value::Double(v) if v.is_nan()));
    }
}
