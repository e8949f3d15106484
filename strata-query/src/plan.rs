//! The operator tree recorded by a [crate::Query].
//!
//! A plan is plain data. Building one never touches a store, the executor
//! interprets the tree when a terminal call asks for results.

use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter, Write};
use std::sync::Arc;

use strata_store::ColumnStore;
use strata_types::Value;

use crate::{Expr, Table};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
/// A comparison applied by a filter predicate.
pub enum FilterOp {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    /// String prefix match.
    StartsWith,
    /// String substring match.
    Contains,
}

impl FilterOp {
    #[inline]
    /// Returns true if the ordering of `value` relative to the literal
    /// satisfies a comparison operator.
    ///
    /// String operators never match an ordering.
    pub fn matches_ordering(self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Equals => ordering == Ordering::Equal,
            FilterOp::NotEquals => ordering != Ordering::Equal,
            FilterOp::GreaterThan => ordering == Ordering::Greater,
            FilterOp::LessThan => ordering == Ordering::Less,
            FilterOp::GreaterOrEqual => ordering != Ordering::Less,
            FilterOp::LessOrEqual => ordering != Ordering::Greater,
            FilterOp::StartsWith | FilterOp::Contains => false,
        }
    }

    #[inline]
    pub fn is_string_op(self) -> bool {
        matches!(self, FilterOp::StartsWith | FilterOp::Contains)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            FilterOp::Equals => "=",
            FilterOp::NotEquals => "!=",
            FilterOp::GreaterThan => ">",
            FilterOp::LessThan => "<",
            FilterOp::GreaterOrEqual => ">=",
            FilterOp::LessOrEqual => "<=",
            FilterOp::StartsWith => "starts with",
            FilterOp::Contains => "contains",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// `column <op> value`.
pub struct Predicate {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Predicate {
    /// Evaluates the predicate against a single value.
    ///
    /// Nulls never match.
    pub fn matches(&self, value: &Value) -> bool {
        match self.op {
            FilterOp::StartsWith => match (value.as_str(), self.value.as_str()) {
                (Some(v), Some(prefix)) => v.starts_with(prefix),
                _ => false,
            },
            FilterOp::Contains => match (value.as_str(), self.value.as_str()) {
                (Some(v), Some(needle)) => v.contains(needle),
                _ => false,
            },
            op => value
                .compare(&self.value)
                .is_some_and(|ordering| op.matches_ordering(ordering)),
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.column, self.op.symbol(), self.value)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Aggregation {
    Sum,
    /// The number of non-null values.
    Count,
    Avg,
    Min,
    Max,
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Aggregation::Sum => "sum",
            Aggregation::Count => "count",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JoinMode {
    Inner,
    /// Keeps unmatched left rows, their right columns are null.
    Left,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Limit {
    Head(usize),
    Tail(usize),
}

impl Limit {
    #[inline]
    pub fn count(self) -> usize {
        match self {
            Limit::Head(n) | Limit::Tail(n) => n,
        }
    }
}

#[derive(Clone)]
/// Where a plan reads its rows from.
pub enum Source {
    Store(Arc<ColumnStore>),
    Table(Arc<Table>),
}

impl Debug for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Store(store) => f.debug_tuple("Store").field(&store.name()).finish(),
            Source::Table(table) => f.debug_tuple("Table").field(&table.num_rows()).finish(),
        }
    }
}

#[derive(Debug, Clone)]
/// A node of the operator tree.
pub enum Plan {
    Scan(Source),
    Project {
        input: Box<Plan>,
        columns: Vec<String>,
    },
    Filter {
        input: Box<Plan>,
        predicate: Predicate,
    },
    Sort {
        input: Box<Plan>,
        direction: SortDirection,
        columns: Vec<String>,
    },
    Compute {
        input: Box<Plan>,
        name: String,
        expr: Expr,
    },
    Aggregate {
        input: Box<Plan>,
        key: String,
        value: String,
        aggregation: Aggregation,
        output: String,
    },
    Join {
        left: Box<Plan>,
        right: Box<Plan>,
        left_key: String,
        right_key: String,
        mode: JoinMode,
    },
    Limit {
        input: Box<Plan>,
        limit: Limit,
    },
}

impl Plan {
    /// Returns every distinct store the plan reads from, in the order they
    /// first appear.
    pub(crate) fn stores(&self) -> Vec<&ColumnStore> {
        let mut stores: Vec<&ColumnStore> = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match node {
                Plan::Scan(Source::Store(store)) => {
                    if !stores.iter().any(|s| std::ptr::eq(*s, store.as_ref())) {
                        stores.push(store);
                    }
                },
                Plan::Scan(Source::Table(_)) => {},
                Plan::Join { left, right, .. } => {
                    pending.push(right);
                    pending.push(left);
                },
                Plan::Project { input, .. }
                | Plan::Filter { input, .. }
                | Plan::Sort { input, .. }
                | Plan::Compute { input, .. }
                | Plan::Aggregate { input, .. }
                | Plan::Limit { input, .. } => pending.push(input),
            }
        }
        stores
    }

    /// Renders the plan as an indented tree, the root first.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        // Writing into a string cannot fail.
        let _ = self.write_tree(&mut out, 0);
        out
    }

    fn write_tree(&self, out: &mut String, depth: usize) -> std::fmt::Result {
        for _ in 0..depth {
            out.push_str("  ");
        }

        match self {
            Plan::Scan(Source::Store(store)) => writeln!(out, "Scan: store {:?}", store.name()),
            Plan::Scan(Source::Table(table)) => {
                writeln!(out, "Scan: table ({} rows)", table.num_rows())
            },
            Plan::Project { input, columns } => {
                writeln!(out, "Project: {}", columns.join(", "))?;
                input.write_tree(out, depth + 1)
            },
            Plan::Filter { input, predicate } => {
                writeln!(out, "Filter: {predicate}")?;
                input.write_tree(out, depth + 1)
            },
            Plan::Sort {
                input,
                direction,
                columns,
            } => {
                writeln!(out, "Sort: {direction:?} by {}", columns.join(", "))?;
                input.write_tree(out, depth + 1)
            },
            Plan::Compute { input, name, expr } => {
                writeln!(out, "Compute: {name} = {expr}")?;
                input.write_tree(out, depth + 1)
            },
            Plan::Aggregate {
                input,
                key,
                value,
                aggregation,
                output,
            } => {
                writeln!(out, "Aggregate: {output} = {aggregation}({value}) by {key}")?;
                input.write_tree(out, depth + 1)
            },
            Plan::Join {
                left,
                right,
                left_key,
                right_key,
                mode,
            } => {
                writeln!(out, "Join: {mode:?} on {left_key} = {right_key}")?;
                left.write_tree(out, depth + 1)?;
                right.write_tree(out, depth + 1)
            },
            Plan::Limit { input, limit } => {
                match limit {
                    Limit::Head(n) => writeln!(out, "Limit: head {n}")?,
                    Limit::Tail(n) => writeln!(out, "Limit: tail {n}")?,
                }
                input.write_tree(out, depth + 1)
            },
        }
    }
}

impl Display for Plan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.explain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case(FilterOp::Equals, Value::Int64(5), true)]
    #[case(FilterOp::NotEquals, Value::Int64(5), false)]
    #[case(FilterOp::GreaterThan, Value::Double(4.5), true)]
    #[case(FilterOp::LessThan, Value::Int64(5), false)]
    #[case(FilterOp::GreaterOrEqual, Value::Int64(5), true)]
    #[case(FilterOp::LessOrEqual, Value::Double(4.99), false)]
    fn test_comparison_predicates(
        #[case] op: FilterOp,
        #[case] literal: Value,
        #[case] expected: bool,
    ) {
        let predicate = Predicate {
            column: "n".to_string(),
            op,
            value: literal,
        };
        assert_eq!(predicate.matches(&Value::Int64(5)), expected, "{predicate}");
    }

    #[test]
    fn test_nulls_never_match() {
        for op in [FilterOp::Equals, FilterOp::NotEquals, FilterOp::StartsWith] {
            let predicate = Predicate {
                column: "s".to_string(),
                op,
                value: Value::from("a"),
            };
            assert!(!predicate.matches(&Value::Null), "{predicate}");
        }
    }

    #[test]
    fn test_string_predicates() {
        let starts = Predicate {
            column: "s".to_string(),
            op: FilterOp::StartsWith,
            value: Value::from("ab"),
        };
        assert!(starts.matches(&Value::from("abc")));
        assert!(!starts.matches(&Value::from("cab")));

        let contains = Predicate {
            op: FilterOp::Contains,
            ..starts
        };
        assert!(contains.matches(&Value::from("cab")));
        assert!(!contains.matches(&Value::from("ba")));
    }
}
