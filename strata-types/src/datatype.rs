use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
/// The logical type of a column.
///
/// The discriminant is the tag written into segment file directories,
/// so existing values must never be renumbered.
pub enum DataType {
    Int64 = 1,
    Double = 2,
    Bool = 3,
    String = 4,
    DateTime = 5,
}

impl DataType {
    #[inline]
    /// Returns the on-disk tag of the type.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Resolves a type from its on-disk tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Int64),
            2 => Some(Self::Double),
            3 => Some(Self::Bool),
            4 => Some(Self::String),
            5 => Some(Self::DateTime),
            _ => None,
        }
    }

    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Double)
    }

    /// Returns if values of the two types can be ordered against each other.
    ///
    /// Identical types are always comparable, `Int64` and `Double` are
    /// compared numerically.
    pub fn is_comparable_with(self, other: DataType) -> bool {
        self == other || (self.is_numeric() && other.is_numeric())
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Int64 => "Int64",
            Self::Double => "Double",
            Self::Bool => "Bool",
            Self::String => "String",
            Self::DateTime => "DateTime",
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case(DataType::Int64)]
    #[case(DataType::Double)]
    #[case(DataType::Bool)]
    #[case(DataType::String)]
    #[case(DataType::DateTime)]
    fn test_tag_resolves_back_to_type(#[case] dt: DataType) {
        assert_eq!(DataType::from_u8(dt.as_u8()), Some(dt));
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(DataType::from_u8(0), None);
        assert_eq!(DataType::from_u8(42), None);
    }

    #[rstest::rstest]
    #[case(DataType::Int64, DataType::Double, true)]
    #[case(DataType::Double, DataType::Int64, true)]
    #[case(DataType::String, DataType::String, true)]
    #[case(DataType::String, DataType::Int64, false)]
    #[case(DataType::Bool, DataType::Int64, false)]
    #[case(DataType::DateTime, DataType::String, false)]
    fn test_comparable_types(
        #[case] left: DataType,
        #[case] right: DataType,
        #[case] expected: bool,
    ) {
        assert_eq!(left.is_comparable_with(right), expected);
    }
}
