use std::fmt::{Display, Formatter};
use std::ops::{Add, Div, Mul, Not, Sub};

use strata_types::{ColumnData, DataType, Schema, Value};

use crate::QueryError;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    /// Always produces a `Double`.
    Divide,
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    And,
    Or,
    /// String concatenation, non string operands are rendered as text.
    Concat,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Equals => "=",
            BinaryOp::NotEquals => "!=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::LessThan => "<",
            BinaryOp::GreaterOrEqual => ">=",
            BinaryOp::LessOrEqual => "<=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Concat => "||",
        }
    }

    fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide
        )
    }

    fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equals
                | BinaryOp::NotEquals
                | BinaryOp::GreaterThan
                | BinaryOp::LessThan
                | BinaryOp::GreaterOrEqual
                | BinaryOp::LessOrEqual
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A scalar expression evaluated once per row by `compute`.
///
/// Any null operand makes the result null.
pub enum Expr {
    Column(String),
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn binary(self, op: BinaryOp, other: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn equals(self, other: Expr) -> Self {
        self.binary(BinaryOp::Equals, other)
    }

    pub fn not_equals(self, other: Expr) -> Self {
        self.binary(BinaryOp::NotEquals, other)
    }

    pub fn gt(self, other: Expr) -> Self {
        self.binary(BinaryOp::GreaterThan, other)
    }

    pub fn lt(self, other: Expr) -> Self {
        self.binary(BinaryOp::LessThan, other)
    }

    pub fn gt_eq(self, other: Expr) -> Self {
        self.binary(BinaryOp::GreaterOrEqual, other)
    }

    pub fn lt_eq(self, other: Expr) -> Self {
        self.binary(BinaryOp::LessOrEqual, other)
    }

    pub fn and(self, other: Expr) -> Self {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    pub fn concat(self, other: Expr) -> Self {
        self.binary(BinaryOp::Concat, other)
    }

    /// Resolves the type the expression produces against `schema`.
    ///
    /// Unknown columns and operand type errors are reported here, before
    /// the plan runs.
    pub fn data_type(&self, schema: &Schema) -> Result<DataType, QueryError> {
        match self {
            Expr::Column(name) => Ok(schema.require(name)?.data_type),
            Expr::Literal(value) => value.data_type().ok_or_else(|| {
                QueryError::TypeMismatch("a null literal has no type".to_string())
            }),
            Expr::Not(inner) => match inner.data_type(schema)? {
                DataType::Bool => Ok(DataType::Bool),
                other => Err(QueryError::TypeMismatch(format!(
                    "`not` expects Bool, got {other}"
                ))),
            },
            Expr::Binary { op, left, right } => {
                let lhs = left.data_type(schema)?;
                let rhs = right.data_type(schema)?;
                binary_type(*op, lhs, rhs)
            },
        }
    }

    /// Resolves column references to positions within `schema`.
    pub(crate) fn bind(&self, schema: &Schema) -> Result<BoundExpr, QueryError> {
        let bound = match self {
            Expr::Column(name) => {
                let idx = schema
                    .index_of(name)
                    .ok_or_else(|| QueryError::ColumnNotFound(name.clone()))?;
                BoundExpr::Column(idx)
            },
            Expr::Literal(value) => BoundExpr::Literal(value.clone()),
            Expr::Not(inner) => BoundExpr::Not(Box::new(inner.bind(schema)?)),
            Expr::Binary { op, left, right } => BoundExpr::Binary {
                op: *op,
                left: Box::new(left.bind(schema)?),
                right: Box::new(right.bind(schema)?),
            },
        };
        Ok(bound)
    }
}

fn binary_type(op: BinaryOp, lhs: DataType, rhs: DataType) -> Result<DataType, QueryError> {
    let mismatch = || {
        QueryError::TypeMismatch(format!(
            "operator `{}` cannot be applied to {lhs} and {rhs}",
            op.symbol()
        ))
    };

    if op.is_arithmetic() {
        if !lhs.is_numeric() || !rhs.is_numeric() {
            return Err(mismatch());
        }
        let both_ints = lhs == DataType::Int64 && rhs == DataType::Int64;
        return if both_ints && op != BinaryOp::Divide {
            Ok(DataType::Int64)
        } else {
            Ok(DataType::Double)
        };
    }

    if op.is_comparison() {
        return if lhs.is_comparable_with(rhs) {
            Ok(DataType::Bool)
        } else {
            Err(mismatch())
        };
    }

    match op {
        BinaryOp::And | BinaryOp::Or if lhs == DataType::Bool && rhs == DataType::Bool => {
            Ok(DataType::Bool)
        },
        BinaryOp::Concat => Ok(DataType::String),
        _ => Err(mismatch()),
    }
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Add, rhs)
    }
}

impl Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Subtract, rhs)
    }
}

impl Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Multiply, rhs)
    }
}

impl Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Divide, rhs)
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Column(name) => f.write_str(name),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            },
            Expr::Not(inner) => write!(f, "not {inner}"),
        }
    }
}

#[derive(Debug, Clone)]
/// An expression with its columns resolved to positions.
pub(crate) enum BoundExpr {
    Column(usize),
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    Not(Box<BoundExpr>),
}

impl BoundExpr {
    pub(crate) fn evaluate(
        &self,
        columns: &[ColumnData],
        row: usize,
    ) -> Result<Value, QueryError> {
        match self {
            BoundExpr::Column(idx) => Ok(columns[*idx].get(row)),
            BoundExpr::Literal(value) => Ok(value.clone()),
            BoundExpr::Not(inner) => match inner.evaluate(columns, row)? {
                Value::Bool(v) => Ok(Value::Bool(!v)),
                _ => Ok(Value::Null),
            },
            BoundExpr::Binary { op, left, right } => {
                let lhs = left.evaluate(columns, row)?;
                let rhs = right.evaluate(columns, row)?;
                if lhs.is_null() || rhs.is_null() {
                    return Ok(Value::Null);
                }
                apply_binary(*op, lhs, rhs)
            },
        }
    }
}

fn apply_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, QueryError> {
    if op.is_comparison() {
        let Some(ordering) = lhs.compare(&rhs) else {
            return Ok(Value::Null);
        };
        let matched = match op {
            BinaryOp::Equals => ordering.is_eq(),
            BinaryOp::NotEquals => ordering.is_ne(),
            BinaryOp::GreaterThan => ordering.is_gt(),
            BinaryOp::LessThan => ordering.is_lt(),
            BinaryOp::GreaterOrEqual => ordering.is_ge(),
            _ => ordering.is_le(),
        };
        return Ok(Value::Bool(matched));
    }

    let value = match (op, &lhs, &rhs) {
        (BinaryOp::And, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a && *b),
        (BinaryOp::Or, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a || *b),
        (BinaryOp::Concat, _, _) => {
            let mut text = as_text(&lhs);
            text.push_str(&as_text(&rhs));
            Value::String(text)
        },
        (BinaryOp::Divide, _, _) => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => Value::Double(a / b),
            _ => Value::Null,
        },
        (_, Value::Int64(a), Value::Int64(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Subtract => a.checked_sub(*b),
                _ => a.checked_mul(*b),
            };
            let result = result.ok_or_else(|| {
                QueryError::ArithmeticOverflow(format!("{a} {} {b}", op.symbol()))
            })?;
            Value::Int64(result)
        },
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => Value::Double(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                _ => a * b,
            }),
            _ => Value::Null,
        },
    };

    Ok(value)
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use strata_types::Field;

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("qty", DataType::Int64),
            Field::new("price", DataType::Double),
            Field::new("name", DataType::String),
            Field::new("active", DataType::Bool),
        ])
        .unwrap()
    }

    #[rstest::rstest]
    #[case(Expr::col("qty") + Expr::lit(1), DataType::Int64)]
    #[case(Expr::col("qty") * Expr::col("price"), DataType::Double)]
    #[case(Expr::col("qty") / Expr::lit(2), DataType::Double)]
    #[case(Expr::col("price").gt(Expr::lit(3)), DataType::Bool)]
    #[case(!Expr::col("active").and(Expr::col("qty").lt(Expr::lit(4))), DataType::Bool)]
    #[case(Expr::col("name").concat(Expr::col("qty")), DataType::String)]
    fn test_expression_types(#[case] expr: Expr, #[case] expected: DataType) {
        assert_eq!(expr.data_type(&schema()).unwrap(), expected, "{expr}");
    }

    #[rstest::rstest]
    #[case(Expr::col("missing") + Expr::lit(1))]
    #[case(Expr::col("name") + Expr::lit(1))]
    #[case(Expr::col("name").gt(Expr::lit(1)))]
    #[case(!Expr::col("qty"))]
    #[case(Expr::col("qty").and(Expr::col("active")))]
    #[case(Expr::Literal(Value::Null))]
    fn test_expression_type_errors(#[case] expr: Expr) {
        assert!(expr.data_type(&schema()).is_err(), "{expr} should not type check");
    }

    fn row() -> Vec<ColumnData> {
        vec![
            ColumnData::Int64(vec![Some(3), None]),
            ColumnData::Double(vec![Some(2.5), Some(1.0)]),
            ColumnData::String(vec![Some("bolt".to_string()), None]),
            ColumnData::Bool(vec![Some(true), Some(false)]),
        ]
    }

    #[test]
    fn test_evaluate() {
        let columns = row();
        let schema = schema();

        let expr = (Expr::col("qty") * Expr::col("price")).bind(&schema).unwrap();
        assert_eq!(expr.evaluate(&columns, 0).unwrap(), Value::Double(7.5));
        assert_eq!(expr.evaluate(&columns, 1).unwrap(), Value::Null);

        let expr = Expr::col("name")
            .concat(Expr::lit("-"))
            .concat(Expr::col("qty"))
            .bind(&schema)
            .unwrap();
        assert_eq!(expr.evaluate(&columns, 0).unwrap(), Value::from("bolt-3"));

        let expr = (!Expr::col("active")).bind(&schema).unwrap();
        assert_eq!(expr.evaluate(&columns, 1).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let columns = vec![ColumnData::Int64(vec![Some(i64::MAX)])];
        let schema = Schema::new(vec![Field::new("n", DataType::Int64)]).unwrap();
        let expr = (Expr::col("n") + Expr::lit(1)).bind(&schema).unwrap();
        let err = expr.evaluate(&columns, 0).unwrap_err();
        assert!(matches!(err, QueryError::ArithmeticOverflow(_)), "{err}");
    }
}
