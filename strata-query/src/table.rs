use strata_types::{ColumnData, Field, Schema, Value};

use crate::QueryError;

#[derive(Debug, Clone, PartialEq)]
/// A fully materialized, in-memory result set.
///
/// Tables are produced by executing a query and can be used as the source
/// of further queries.
pub struct Table {
    schema: Schema,
    columns: Vec<ColumnData>,
    num_rows: usize,
}

impl Table {
    /// Creates a table from column-major data.
    ///
    /// Every column must match its field type and all columns must have
    /// the same length.
    pub fn new(schema: Schema, columns: Vec<ColumnData>) -> Result<Self, QueryError> {
        if schema.len() != columns.len() {
            return Err(QueryError::TypeMismatch(format!(
                "schema has {} columns but {} were given",
                schema.len(),
                columns.len(),
            )));
        }

        let num_rows = columns.first().map(ColumnData::len).unwrap_or(0);
        for (field, column) in schema.fields().iter().zip(&columns) {
            if column.data_type() != field.data_type {
                return Err(QueryError::TypeMismatch(format!(
                    "column {:?} is declared as {} but holds {} values",
                    field.name,
                    field.data_type,
                    column.data_type(),
                )));
            }
            if column.len() != num_rows {
                return Err(QueryError::TypeMismatch(format!(
                    "column {:?} has {} rows, expected {num_rows}",
                    field.name,
                    column.len(),
                )));
            }
        }

        Ok(Self {
            schema,
            columns,
            num_rows,
        })
    }

    /// Creates a table from rows of values, coercing each value to its
    /// column type.
    pub fn from_rows(fields: Vec<Field>, rows: &[Vec<Value>]) -> Result<Self, QueryError> {
        let schema = Schema::new(fields)?;
        let mut columns: Vec<ColumnData> = schema
            .fields()
            .iter()
            .map(|f| ColumnData::with_capacity(f.data_type, rows.len()))
            .collect();

        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(QueryError::TypeMismatch(format!(
                    "row {row_idx} has {} values, expected {}",
                    row.len(),
                    columns.len(),
                )));
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column
                    .push(value)
                    .map_err(|e| QueryError::TypeMismatch(format!("row {row_idx}: {e}")))?;
            }
        }

        Ok(Self {
            schema,
            columns,
            num_rows: rows.len(),
        })
    }

    pub(crate) fn from_parts(schema: Schema, columns: Vec<ColumnData>, num_rows: usize) -> Self {
        debug_assert!(columns.iter().all(|c| c.len() == num_rows));
        Self {
            schema,
            columns,
            num_rows,
        }
    }

    #[inline]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    #[inline]
    pub fn columns(&self) -> &[ColumnData] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Result<&ColumnData, QueryError> {
        self.schema
            .index_of(name)
            .map(|idx| &self.columns[idx])
            .ok_or_else(|| QueryError::ColumnNotFound(name.to_string()))
    }

    /// Returns the values of the row at `idx` in schema order.
    pub fn row(&self, idx: usize) -> Option<Vec<Value>> {
        if idx >= self.num_rows {
            return None;
        }
        Some(self.columns.iter().map(|c| c.get(idx)).collect())
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.num_rows).map(|idx| self.columns.iter().map(|c| c.get(idx)).collect())
    }

    /// Consumes the table into a forward-only cursor over the given columns.
    pub fn into_cursor<S: AsRef<str>>(self, columns: &[S]) -> Result<RowCursor, QueryError> {
        let schema = self.schema.project(columns)?;
        let mut slots: Vec<Option<ColumnData>> = self.columns.into_iter().map(Some).collect();
        let columns = columns
            .iter()
            .map(|name| {
                let idx = self.schema.index_of(name.as_ref()).unwrap_or_default();
                slots[idx].take().ok_or_else(|| {
                    QueryError::DuplicateColumn(name.as_ref().to_string())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RowCursor {
            schema,
            columns,
            num_rows: self.num_rows,
            position: None,
        })
    }

    pub(crate) fn into_parts(self) -> (Schema, Vec<ColumnData>, usize) {
        (self.schema, self.columns, self.num_rows)
    }
}

#[derive(Debug)]
/// A forward-only, single pass view over a query result.
///
/// A cursor cannot be rewound, iterating the rows again requires executing
/// the query again.
pub struct RowCursor {
    schema: Schema,
    columns: Vec<ColumnData>,
    num_rows: usize,
    /// `None` before the first call to [RowCursor::move_next].
    position: Option<usize>,
}

impl RowCursor {
    /// The columns visible through the cursor.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Advances to the next row, returning false once the rows are exhausted.
    pub fn move_next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| (p + 1).min(self.num_rows));
        self.position = Some(next);
        next < self.num_rows
    }

    /// Returns the value of `name` in the current row.
    pub fn get_value(&self, name: &str) -> Result<Value, QueryError> {
        let idx = self
            .schema
            .index_of(name)
            .ok_or_else(|| QueryError::ColumnNotFound(name.to_string()))?;
        let row = self.current()?;
        Ok(self.columns[idx].get(row))
    }

    fn current(&self) -> Result<usize, QueryError> {
        self.position
            .filter(|&p| p < self.num_rows)
            .ok_or(QueryError::NoCurrentRow)
    }
}

impl Iterator for RowCursor {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.move_next() {
            return None;
        }
        let row = self.current().ok()?;
        Some(self.columns.iter().map(|c| c.get(row)).collect())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let consumed = self.position.map_or(0, |p| p + 1).min(self.num_rows);
        let remaining = self.num_rows - consumed;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use strata_types::DataType;

    use super::*;

    fn sample() -> Table {
        Table::from_rows(
            vec![
                Field::new("id", DataType::Int64),
                Field::new("name", DataType::String),
            ],
            &[
                vec![Value::Int64(1), Value::from("a")],
                vec![Value::Int64(2), Value::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_table_validates_columns() {
        let schema = Schema::new(vec![Field::new("id", DataType::Int64)]).unwrap();
        let err = Table::new(schema.clone(), vec![ColumnData::Bool(vec![Some(true)])]);
        assert!(matches!(err, Err(QueryError::TypeMismatch(_))));

        let table = Table::new(schema, vec![ColumnData::Int64(vec![Some(1), None])]).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.row(1), Some(vec![Value::Null]));
        assert_eq!(table.row(2), None);
    }

    #[test]
    fn test_cursor_walks_rows_once() {
        let mut cursor = sample().into_cursor(&["name", "id"]).unwrap();
        assert!(matches!(cursor.get_value("id"), Err(QueryError::NoCurrentRow)));

        assert!(cursor.move_next());
        assert_eq!(cursor.get_value("id").unwrap(), Value::Int64(1));
        assert_eq!(cursor.get_value("name").unwrap(), Value::from("a"));

        assert!(cursor.move_next());
        assert_eq!(cursor.get_value("name").unwrap(), Value::Null);

        assert!(!cursor.move_next());
        assert!(!cursor.move_next(), "An exhausted cursor stays exhausted");
        assert!(matches!(cursor.get_value("id"), Err(QueryError::NoCurrentRow)));
    }

    #[test]
    fn test_cursor_rejects_unprojected_columns() {
        let mut cursor = sample().into_cursor(&["id"]).unwrap();
        assert!(cursor.move_next());
        let err = cursor.get_value("name").unwrap_err();
        assert!(matches!(err, QueryError::ColumnNotFound(name) if name == "name"));

        let err = sample().into_cursor(&["nope"]).unwrap_err();
        assert!(matches!(err, QueryError::ColumnNotFound(_)));
    }

    #[test]
    fn test_cursor_iterator() {
        let cursor = sample().into_cursor(&["id"]).unwrap();
        assert_eq!(cursor.size_hint(), (2, Some(2)));
        let rows: Vec<_> = cursor.collect();
        assert_eq!(rows, vec![vec![Value::Int64(1)], vec![Value::Int64(2)]]);
    }
}
