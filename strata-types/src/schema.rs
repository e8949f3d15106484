use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::DataType;

#[derive(Debug, thiserror::Error)]
/// An error produced while building or projecting a [Schema].
pub enum SchemaError {
    #[error("duplicate column name: {0:?}")]
    DuplicateColumn(String),
    #[error("column not found: {0:?}")]
    ColumnNotFound(String),
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
/// A named, typed column definition.
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
/// An ordered set of uniquely named fields.
///
/// A schema is immutable, operations like [Schema::project] return a new
/// schema rather than changing the existing one.
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Creates a new schema, rejecting duplicate column names.
    pub fn new(fields: Vec<Field>) -> Result<Self, SchemaError> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::DuplicateColumn(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the position of the column with the given name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the field with the given name or a [SchemaError::ColumnNotFound].
    pub fn require(&self, name: &str) -> Result<&Field, SchemaError> {
        self.field(name)
            .ok_or_else(|| SchemaError::ColumnNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Produces a new schema containing only the named columns, in the
    /// order they are given.
    pub fn project<S: AsRef<str>>(&self, names: &[S]) -> Result<Schema, SchemaError> {
        let fields = names
            .iter()
            .map(|name| self.require(name.as_ref()).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Schema::new(fields)
    }

    /// Produces a new schema with the field added.
    ///
    /// A field with the same name replaces the existing field in place.
    pub fn with_field(&self, field: Field) -> Schema {
        let mut fields = self.fields.clone();
        match self.index_of(&field.name) {
            Some(idx) => fields[idx] = field,
            None => fields.push(field),
        }
        Schema { fields }
    }

    /// Returns true if both schemas contain the same set of column names
    /// with identical types, regardless of order.
    pub fn same_columns(&self, other: &Schema) -> bool {
        self.len() == other.len()
            && self
                .fields
                .iter()
                .all(|f| other.field(&f.name).map(|o| o.data_type) == Some(f.data_type))
    }
}

impl Display for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", field.name, field.data_type)?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("name", DataType::String),
            Field::new("amount", DataType::Double),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("id", DataType::String),
        ])
        .expect_err("Duplicate names should be rejected");
        assert!(matches!(err, SchemaError::DuplicateColumn(name) if name == "id"));
    }

    #[test]
    fn test_project_reorders() {
        let projected = sample().project(&["amount", "id"]).unwrap();
        let names: Vec<_> = projected.names().collect();
        assert_eq!(names, ["amount", "id"]);
    }

    #[test]
    fn test_project_unknown_column() {
        let err = sample().project(&["missing"]).unwrap_err();
        assert!(matches!(err, SchemaError::ColumnNotFound(name) if name == "missing"));
    }

    #[test]
    fn test_with_field_replaces_in_place() {
        let schema = sample().with_field(Field::new("name", DataType::Int64));
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.index_of("name"), Some(1));
        assert_eq!(schema.fields()[1].data_type, DataType::Int64);

        let schema = schema.with_field(Field::new("extra", DataType::Bool));
        assert_eq!(schema.index_of("extra"), Some(3));
    }

    #[test]
    fn test_same_columns_ignores_order() {
        let reordered = Schema::new(vec![
            Field::new("amount", DataType::Double),
            Field::new("id", DataType::Int64),
            Field::new("name", DataType::String),
        ])
        .unwrap();
        assert!(sample().same_columns(&reordered));

        let retyped = sample().with_field(Field::new("amount", DataType::Int64));
        assert!(!sample().same_columns(&retyped));
    }
}
