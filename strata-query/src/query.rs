use std::sync::Arc;

use strata_store::ColumnStore;
use strata_types::{Field, Schema, Value};
use tracing::{info, instrument};

use crate::executor::aggregate::output_schema;
use crate::executor::filter::check_predicate;
use crate::executor::join::{check_keys, join_schema};
use crate::{
    Aggregation,
    ExecutionOptions,
    Expr,
    FilterOp,
    JoinMode,
    Limit,
    Plan,
    Predicate,
    QueryError,
    QueryExecutor,
    RowCursor,
    SortDirection,
    Source,
    Table,
};

#[derive(Debug, Clone)]
/// A deferred chain of relational operators.
///
/// Every operator validates column names and types against the schema the
/// chain produces so far and records a plan node. No data is read until
/// [Query::execute] or [Query::row_cursor] is called.
///
/// ```ignore
/// let totals = Query::from_store(store)
///     .filter("amount", 500.0, FilterOp::GreaterThan)?
///     .group_by_aggregate("category", "amount", Aggregation::Sum, "total")?
///     .execute()
///     .await?;
/// ```
pub struct Query {
    plan: Plan,
    schema: Schema,
}

impl Query {
    /// Starts a query reading every row of the store.
    ///
    /// The schema is taken from the store as it is now, a store which has
    /// not received any rows yet has no columns.
    pub fn from_store(store: Arc<ColumnStore>) -> Self {
        let schema = store.schema().unwrap_or_default();
        Self {
            plan: Plan::Scan(Source::Store(store)),
            schema,
        }
    }

    pub fn from_table(table: Arc<Table>) -> Self {
        let schema = table.schema().clone();
        Self {
            plan: Plan::Scan(Source::Table(table)),
            schema,
        }
    }

    #[inline]
    /// The schema of the rows the query produces.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Renders the recorded plan as text.
    pub fn explain(&self) -> String {
        self.plan.explain()
    }

    /// Keeps only the given columns, in the given order.
    pub fn select<S: AsRef<str>>(self, columns: &[S]) -> Result<Self, QueryError> {
        if columns.is_empty() {
            return Err(QueryError::InvalidPlan(
                "select requires at least one column".to_string(),
            ));
        }
        let schema = self.schema.project(columns)?;
        let columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        Ok(Self {
            plan: Plan::Project {
                input: Box::new(self.plan),
                columns,
            },
            schema,
        })
    }

    /// Keeps the rows where `column <op> value` holds.
    ///
    /// Rows with a null in `column` never match.
    pub fn filter(
        self,
        column: &str,
        value: impl Into<Value>,
        op: FilterOp,
    ) -> Result<Self, QueryError> {
        let predicate = Predicate {
            column: column.to_string(),
            op,
            value: value.into(),
        };
        let data_type = self.schema.require(column)?.data_type;
        check_predicate(&predicate, data_type)?;

        Ok(Self {
            plan: Plan::Filter {
                input: Box::new(self.plan),
                predicate,
            },
            schema: self.schema,
        })
    }

    /// Orders the rows by the given columns, ties keep their row id order.
    pub fn sort<S: AsRef<str>>(
        self,
        direction: SortDirection,
        columns: &[S],
    ) -> Result<Self, QueryError> {
        if columns.is_empty() {
            return Err(QueryError::InvalidPlan(
                "sort requires at least one column".to_string(),
            ));
        }
        for column in columns {
            self.schema.require(column.as_ref())?;
        }

        Ok(Self {
            plan: Plan::Sort {
                input: Box::new(self.plan),
                direction,
                columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            },
            schema: self.schema,
        })
    }

    /// Adds a column computed from `expr`.
    ///
    /// A column with the same name is replaced in place.
    pub fn compute(self, name: impl Into<String>, expr: Expr) -> Result<Self, QueryError> {
        let name = name.into();
        let data_type = expr.data_type(&self.schema)?;
        let schema = self.schema.with_field(Field::new(name.clone(), data_type));

        Ok(Self {
            plan: Plan::Compute {
                input: Box::new(self.plan),
                name,
                expr,
            },
            schema,
        })
    }

    /// Produces one row per distinct `key` holding `aggregation` applied to
    /// the `value` column of the rows sharing the key.
    ///
    /// Groups are emitted in the order their key is first seen.
    pub fn group_by_aggregate(
        self,
        key: &str,
        value: &str,
        aggregation: Aggregation,
        output: &str,
    ) -> Result<Self, QueryError> {
        let schema = output_schema(&self.schema, key, value, aggregation, output)?;
        Ok(Self {
            plan: Plan::Aggregate {
                input: Box::new(self.plan),
                key: key.to_string(),
                value: value.to_string(),
                aggregation,
                output: output.to_string(),
            },
            schema,
        })
    }

    /// Joins the rows of `other` where `left_key` equals `right_key`.
    ///
    /// Right columns whose name is already used on the left are suffixed
    /// with `_right`.
    pub fn merge(
        self,
        other: Query,
        left_key: &str,
        right_key: &str,
        mode: JoinMode,
    ) -> Result<Self, QueryError> {
        check_keys(&self.schema, &other.schema, left_key, right_key)?;
        let schema = join_schema(&self.schema, &other.schema)?;

        Ok(Self {
            plan: Plan::Join {
                left: Box::new(self.plan),
                right: Box::new(other.plan),
                left_key: left_key.to_string(),
                right_key: right_key.to_string(),
                mode,
            },
            schema,
        })
    }

    /// Keeps the first `n` rows.
    pub fn head(self, n: usize) -> Self {
        self.limit(Limit::Head(n))
    }

    /// Keeps the last `n` rows.
    pub fn tail(self, n: usize) -> Self {
        self.limit(Limit::Tail(n))
    }

    fn limit(self, limit: Limit) -> Self {
        Self {
            plan: Plan::Limit {
                input: Box::new(self.plan),
                limit,
            },
            schema: self.schema,
        }
    }

    /// Executes the query with the default options.
    pub async fn execute(&self) -> Result<Table, QueryError> {
        self.execute_with(ExecutionOptions::default()).await
    }

    pub async fn execute_with(&self, options: ExecutionOptions) -> Result<Table, QueryError> {
        QueryExecutor::new(options).execute(&self.plan).await
    }

    /// Executes the query and returns a forward-only cursor over the given
    /// columns.
    ///
    /// Unknown columns are rejected before the query runs.
    pub async fn row_cursor<S: AsRef<str>>(&self, columns: &[S]) -> Result<RowCursor, QueryError> {
        self.schema.project(columns)?;
        self.execute().await?.into_cursor(columns)
    }
}

#[instrument(skip(store, value), fields(store = %store.name()))]
/// Marks every row of the store where `column <op> value` holds as deleted.
///
/// Returns the number of rows newly deleted.
pub async fn delete_where(
    store: &ColumnStore,
    column: &str,
    value: impl Into<Value>,
    op: FilterOp,
) -> Result<u64, QueryError> {
    let schema = store.schema().unwrap_or_default();
    let predicate = Predicate {
        column: column.to_string(),
        op,
        value: value.into(),
    };
    check_predicate(&predicate, schema.require(column)?.data_type)?;

    let executor = QueryExecutor::default();
    let row_ids = executor.matching_row_ids(store, &[predicate]).await?;
    let deleted = store.delete(&row_ids).await?;

    info!(matched = row_ids.len(), deleted = deleted, "Deleted matching rows");
    Ok(deleted)
}
