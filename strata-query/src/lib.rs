//! Deferred relational queries over column stores.
//!
//! A [Query] records operators into an inspectable [Plan] without reading
//! any data. Executing the query interprets the plan with the
//! [QueryExecutor], which prunes segments using their column statistics,
//! evaluates filters a window of rows at a time and reads independent
//! segments concurrently while keeping results in segment order.

mod error;
mod executor;
mod expr;
mod plan;
mod query;
mod table;

pub use self::error::QueryError;
pub use self::executor::{ExecutionOptions, QueryExecutor};
pub use self::expr::{BinaryOp, Expr};
pub use self::plan::{
    Aggregation,
    FilterOp,
    JoinMode,
    Limit,
    Plan,
    Predicate,
    SortDirection,
    Source,
};
pub use self::query::{delete_where, Query};
pub use self::table::{RowCursor, Table};
