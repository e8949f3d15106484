use strata_types::ColumnData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// A hashable view of a single cell, used by grouping and joins.
pub(crate) enum KeyValue<'a> {
    Null,
    Int(i64),
    /// The bits of a normalised `f64`.
    Float(u64),
    Bool(bool),
    Str(&'a str),
}

impl<'a> KeyValue<'a> {
    /// Reads the key at `row`.
    ///
    /// With `mixed_numeric` integral doubles are keyed as integers so they
    /// hash equal to the integer of the same value.
    pub(crate) fn read(column: &'a ColumnData, row: usize, mixed_numeric: bool) -> Self {
        match column {
            ColumnData::Int64(values) => values[row].map(KeyValue::Int).unwrap_or(KeyValue::Null),
            ColumnData::Double(values) => match values[row] {
                Some(v) if mixed_numeric => integral(v)
                    .map(KeyValue::Int)
                    .unwrap_or(KeyValue::Float(float_bits(v))),
                Some(v) => KeyValue::Float(float_bits(v)),
                None => KeyValue::Null,
            },
            ColumnData::Bool(values) => values[row].map(KeyValue::Bool).unwrap_or(KeyValue::Null),
            ColumnData::String(values) => values[row]
                .as_deref()
                .map(KeyValue::Str)
                .unwrap_or(KeyValue::Null),
            ColumnData::DateTime(values) => values[row].map(KeyValue::Int).unwrap_or(KeyValue::Null),
        }
    }

    /// Returns false for keys which never compare equal to anything.
    pub(crate) fn is_joinable(&self) -> bool {
        match self {
            KeyValue::Null => false,
            KeyValue::Float(bits) => !f64::from_bits(*bits).is_nan(),
            _ => true,
        }
    }
}

/// Returns `v` as an integer if it holds one exactly.
fn integral(v: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (v.fract() == 0.0 && (-LIMIT..LIMIT).contains(&v)).then_some(v as i64)
}

/// `-0.0` and `0.0` share a key, as do all NaNs.
fn float_bits(v: f64) -> u64 {
    if v == 0.0 {
        0.0f64.to_bits()
    } else if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}
