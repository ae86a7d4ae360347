//! Abstract syntax tree for conditions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A parsed condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expression {
    /// A constant, as in the mandatory conditions `true` and `false`.
    Literal { value: bool },
    Comparison(Comparison),
    And {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Or {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not { inner: Box<Expression> },
}

/// `attribute <op> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub attribute: String,
    pub operator: ComparisonOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Like,
    In,
}

impl ComparisonOp {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "!=",
            ComparisonOp::LessThan => "<",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::LessThanOrEqual => "<=",
            ComparisonOp::GreaterThanOrEqual => ">=",
            ComparisonOp::Like => "LIKE",
            ComparisonOp::In => "IN",
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl Expression {
    #[must_use]
    pub fn literal(value: bool) -> Self {
        Expression::Literal { value }
    }

    /// Builds a comparison node.
    pub fn comparison(attribute: impl Into<String>, operator: ComparisonOp, value: Value) -> Self {
        Expression::Comparison(Comparison {
            attribute: attribute.into(),
            operator,
            value,
        })
    }

    /// Shorthand for `attribute = value`.
    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::comparison(attribute, ComparisonOp::Equal, value.into())
    }

    #[must_use]
    pub fn and(self, other: Expression) -> Self {
        Expression::And {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    #[must_use]
    pub fn or(self, other: Expression) -> Self {
        Expression::Or {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Expression::Not {
            inner: Box::new(self),
        }
    }

    /// Folds a list of conditions with AND; an empty list yields `true`.
    pub fn all(conditions: impl IntoIterator<Item = Expression>) -> Self {
        conditions
            .into_iter()
            .reduce(Expression::and)
            .unwrap_or(Expression::literal(true))
    }

    /// Attribute names referenced anywhere in the tree, sorted.
    #[must_use]
    pub fn referenced_attributes(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        self.collect_attributes(&mut out);
        out.into_iter().collect()
    }

    fn collect_attributes(&self, out: &mut BTreeSet<String>) {
        match self {
            Expression::Literal { .. } => {}
            Expression::Comparison(c) => {
                out.insert(c.attribute.clone());
            }
            Expression::And { left, right } | Expression::Or { left, right } => {
                left.collect_attributes(out);
                right.collect_attributes(out);
            }
            Expression::Not { inner } => inner.collect_attributes(out),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal { value } => write!(f, "{value}"),
            Expression::Comparison(c) => match (&c.operator, &c.value) {
                (ComparisonOp::Equal, Value::Null) => write!(f, "{} IS NULL", c.attribute),
                (ComparisonOp::NotEqual, Value::Null) => write!(f, "{} IS NOT NULL", c.attribute),
                (op, value) => write!(f, "{} {op} {value}", c.attribute),
            },
            Expression::And { left, right } => write!(f, "({left} AND {right})"),
            Expression::Or { left, right } => write!(f, "({left} OR {right})"),
            Expression::Not { inner } => write!(f, "NOT {inner}"),
        }
    }
}
