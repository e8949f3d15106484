//! Core data model shared by the store, the ingestor and the query engine.

mod column;
mod datatype;
mod schema;
mod value;

pub use self::column::{ColumnData, ColumnError, ColumnStats};
pub use self::datatype::DataType;
pub use self::schema::{Field, Schema, SchemaError};
pub use self::value::{compare_int_float, datetime_from_micros, Value};
