use strata_types::{ColumnData, Field, Schema};

use crate::executor::filter::{selected_offsets, CompiledPredicate};
use crate::expr::Expr;
use crate::{Limit, Predicate, QueryError, Table};

#[derive(Debug, Clone)]
/// The intermediate result flowing between operators.
pub(crate) struct Frame {
    pub schema: Schema,
    pub columns: Vec<ColumnData>,
    pub num_rows: usize,
    /// The store row id of every row.
    ///
    /// Only present while each row still corresponds to a single stored
    /// row, aggregation and joins drop it.
    pub row_ids: Option<Vec<u64>>,
}

impl Frame {
    pub(crate) fn empty(schema: Schema) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| ColumnData::with_capacity(f.data_type, 0))
            .collect();
        Self {
            schema,
            columns,
            num_rows: 0,
            row_ids: None,
        }
    }

    pub(crate) fn from_table(table: &Table) -> Self {
        Self {
            schema: table.schema().clone(),
            columns: table.columns().to_vec(),
            num_rows: table.num_rows(),
            row_ids: None,
        }
    }

    pub(crate) fn into_table(self) -> Table {
        Table::from_parts(self.schema, self.columns, self.num_rows)
    }

    pub(crate) fn column(&self, name: &str) -> Result<&ColumnData, QueryError> {
        self.schema
            .index_of(name)
            .map(|idx| &self.columns[idx])
            .ok_or_else(|| QueryError::ColumnNotFound(name.to_string()))
    }

    /// Gathers the rows at `indices`, in the given order.
    pub(crate) fn take(&self, indices: &[usize]) -> Frame {
        Frame {
            schema: self.schema.clone(),
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            num_rows: indices.len(),
            row_ids: self
                .row_ids
                .as_ref()
                .map(|ids| indices.iter().map(|&i| ids[i]).collect()),
        }
    }

    pub(crate) fn project(mut self, names: &[String]) -> Result<Frame, QueryError> {
        let schema = self.schema.project(names)?;
        let columns = names
            .iter()
            .map(|name| self.column(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        self.schema = schema;
        self.columns = columns;
        Ok(self)
    }

    pub(crate) fn filter(self, predicate: &Predicate) -> Result<Frame, QueryError> {
        let column = self.column(&predicate.column)?;
        let compiled = CompiledPredicate::compile(predicate, column.data_type())?;

        let mut selection = vec![true; self.num_rows];
        compiled.refine(column, &mut selection);
        let offsets = selected_offsets(&selection);
        if offsets.len() == self.num_rows {
            return Ok(self);
        }
        Ok(self.take(&offsets))
    }

    /// Appends a column computed from `expr`, replacing any column of the
    /// same name in place.
    pub(crate) fn compute(self, name: &str, expr: &Expr) -> Result<Frame, QueryError> {
        let data_type = expr.data_type(&self.schema)?;
        let bound = expr.bind(&self.schema)?;

        let mut column = ColumnData::with_capacity(data_type, self.num_rows);
        for row in 0..self.num_rows {
            let value = bound.evaluate(&self.columns, row)?;
            column
                .push(&value)
                .map_err(|e| QueryError::TypeMismatch(e.to_string()))?;
        }

        let mut frame = self;
        match frame.schema.index_of(name) {
            Some(idx) => frame.columns[idx] = column,
            None => frame.columns.push(column),
        }
        frame.schema = frame.schema.with_field(Field::new(name, data_type));
        Ok(frame)
    }

    pub(crate) fn limit(self, limit: Limit) -> Frame {
        let n = limit.count().min(self.num_rows);
        let range = match limit {
            Limit::Head(_) => 0..n,
            Limit::Tail(_) => self.num_rows - n..self.num_rows,
        };
        if range.len() == self.num_rows {
            return self;
        }

        Frame {
            columns: self.columns.iter().map(|c| c.slice(range.clone())).collect(),
            row_ids: self.row_ids.as_ref().map(|ids| ids[range.clone()].to_vec()),
            num_rows: range.len(),
            schema: self.schema,
        }
    }

    /// Concatenates frames sharing a schema, in order.
    pub(crate) fn concat(schema: Schema, parts: Vec<Frame>) -> Result<Frame, QueryError> {
        let mut frame = Frame::empty(schema);
        let mut row_ids = Vec::new();
        let mut has_row_ids = true;

        for part in parts {
            for (target, column) in frame.columns.iter_mut().zip(&part.columns) {
                target
                    .extend_from(column)
                    .map_err(|e| QueryError::TypeMismatch(e.to_string()))?;
            }
            match part.row_ids {
                Some(ids) => row_ids.extend(ids),
                None => has_row_ids = false,
            }
            frame.num_rows += part.num_rows;
        }

        frame.row_ids = has_row_ids.then_some(row_ids);
        Ok(frame)
    }
}
