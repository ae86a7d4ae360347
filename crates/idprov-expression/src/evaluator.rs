//! Evaluates conditions against multi-valued attribute bags.
//!
//! A missing attribute behaves like an empty value list: it is `NULL`, and
//! every other comparison on it is false. On multi-valued attributes a
//! comparison holds when any one value satisfies it.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::ast::{Comparison, ComparisonOp, Expression, Value};
use crate::ExpressionError;

/// Attribute values a condition is evaluated against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalContext {
    attributes: BTreeMap<String, Vec<String>>,
}

impl EvalContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single value to an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Adds all values to an attribute.
    #[must_use]
    pub fn with_values<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert_values(name, values);
        self
    }

    pub fn insert_values<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .entry(name.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    /// Values of an attribute; empty when absent.
    #[must_use]
    pub fn values(&self, name: &str) -> &[String] {
        self.attributes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl<K, V> FromIterator<(K, V)> for EvalContext
where
    K: Into<String>,
    V: IntoIterator<Item = String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut ctx = Self::new();
        for (name, values) in iter {
            ctx.insert_values(name, values);
        }
        ctx
    }
}

pub struct Evaluator;

impl Evaluator {
    pub fn evaluate(expr: &Expression, ctx: &EvalContext) -> Result<bool, ExpressionError> {
        match expr {
            Expression::Literal { value } => Ok(*value),
            Expression::Comparison(c) => Self::eval_comparison(c, ctx),
            Expression::And { left, right } => {
                Ok(Self::evaluate(left, ctx)? && Self::evaluate(right, ctx)?)
            }
            Expression::Or { left, right } => {
                Ok(Self::evaluate(left, ctx)? || Self::evaluate(right, ctx)?)
            }
            Expression::Not { inner } => Ok(!Self::evaluate(inner, ctx)?),
        }
    }

    fn eval_comparison(c: &Comparison, ctx: &EvalContext) -> Result<bool, ExpressionError> {
        let values = ctx.values(&c.attribute);

        match (&c.operator, &c.value) {
            (ComparisonOp::Equal, Value::Null) => return Ok(values.is_empty()),
            (ComparisonOp::NotEqual, Value::Null) => return Ok(!values.is_empty()),
            (op, Value::Null) => return Err(mismatch(&c.attribute, "= or != for NULL", op.as_str())),
            (ComparisonOp::Like, Value::String(pattern)) => {
                let regex = like_regex(pattern)?;
                return Ok(values.iter().any(|v| regex.is_match(v)));
            }
            (ComparisonOp::Like, other) => {
                return Err(mismatch(&c.attribute, "string pattern", other.type_name()))
            }
            (ComparisonOp::In, Value::List(items)) => {
                let mut matched = false;
                for item in items {
                    for v in values {
                        if compare(&c.attribute, v, item)? == Some(Ordering::Equal) {
                            matched = true;
                        }
                    }
                }
                return Ok(matched);
            }
            (ComparisonOp::In, other) => {
                return Err(mismatch(&c.attribute, "list", other.type_name()))
            }
            (_, Value::List(_)) => {
                return Err(mismatch(&c.attribute, "single value", "list"))
            }
            (op, Value::Boolean(_))
                if !matches!(op, ComparisonOp::Equal | ComparisonOp::NotEqual) =>
            {
                return Err(mismatch(&c.attribute, "= or != for boolean", op.as_str()))
            }
            _ => {}
        }

        for v in values {
            let Some(ordering) = compare(&c.attribute, v, &c.value)? else {
                continue;
            };
            let holds = match c.operator {
                ComparisonOp::Equal => ordering == Ordering::Equal,
                ComparisonOp::NotEqual => ordering != Ordering::Equal,
                ComparisonOp::LessThan => ordering == Ordering::Less,
                ComparisonOp::GreaterThan => ordering == Ordering::Greater,
                ComparisonOp::LessThanOrEqual => ordering != Ordering::Greater,
                ComparisonOp::GreaterThanOrEqual => ordering != Ordering::Less,
                ComparisonOp::Like | ComparisonOp::In => false,
            };
            if holds {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Orders an attribute value against a literal, coercing the value to the
/// literal's type. `None` means the value cannot be read as that type.
fn compare(attribute: &str, value: &str, literal: &Value) -> Result<Option<Ordering>, ExpressionError> {
    Ok(match literal {
        Value::String(s) => Some(value.cmp(s.as_str())),
        Value::Integer(i) => match value.trim().parse::<i64>() {
            Ok(v) => Some(v.cmp(i)),
            // Integer literals still compare against decimal values.
            Err(_) => value
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|v| v.partial_cmp(&(*i as f64))),
        },
        Value::Float(x) => value.trim().parse::<f64>().ok().and_then(|v| v.partial_cmp(x)),
        Value::Boolean(b) => value.trim().to_ascii_lowercase().parse::<bool>().ok().map(|v| v.cmp(b)),
        Value::Null | Value::List(_) => {
            return Err(mismatch(attribute, "scalar literal", literal.type_name()))
        }
    })
}

/// Translates a SQL LIKE pattern: `%` is any run, `_` any one char, `\`
/// escapes the next char.
fn like_regex(pattern: &str) -> Result<Regex, ExpressionError> {
    let mut regex = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    regex.push_str(&regex::escape(&next.to_string()));
                }
            }
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(|_| ExpressionError::InvalidPattern(pattern.to_string()))
}

fn mismatch(attribute: &str, expected: &str, actual: &str) -> ExpressionError {
    ExpressionError::TypeMismatch {
        attribute: attribute.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}
