//! Condition language
//!
//! A small SQL-like boolean language used for mandatory conditions on
//! schemas and mapping items, dynamic membership conditions and correlation
//! rules.
//!
//! ```text
//! true
//! ctype = 'child' AND loginDate IS NOT NULL
//! $resources IN ('resource-ldap', 'resource-db') OR NOT username LIKE 'adm%'
//! ```
//!
//! # Example
//!
//! ```
//! use idprov_expression::{eval_expression, EvalContext};
//!
//! let ctx = EvalContext::new()
//!     .with_attribute("ctype", "child")
//!     .with_values("$groups", ["root", "otherchild"]);
//!
//! assert!(eval_expression("ctype = 'child' AND $groups = 'root'", &ctx).unwrap());
//! assert!(!eval_expression("surname IS NOT NULL", &ctx).unwrap());
//! ```

pub mod ast;
pub mod evaluator;
pub mod lexer;
pub mod parser;

use thiserror::Error;

pub use ast::{Comparison, ComparisonOp, Expression, Value};
pub use evaluator::{EvalContext, Evaluator};
pub use parser::Parser;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("{message} at position {position}")]
    Parse { message: String, position: usize },

    #[error("type mismatch for '{attribute}': expected {expected}, got {actual}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        actual: String,
    },

    #[error("invalid LIKE pattern: {0}")]
    InvalidPattern(String),
}

impl ExpressionError {
    pub fn parse(message: impl Into<String>, position: usize) -> Self {
        ExpressionError::Parse {
            message: message.into(),
            position,
        }
    }

    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            ExpressionError::Parse { .. } => "EXPRESSION_PARSE",
            ExpressionError::TypeMismatch { .. } => "EXPRESSION_TYPE_MISMATCH",
            ExpressionError::InvalidPattern(_) => "EXPRESSION_INVALID_PATTERN",
        }
    }
}

pub fn parse_expression(input: &str) -> Result<Expression, ExpressionError> {
    Parser::parse(input)
}

/// Checks syntax and returns the attributes the condition reads.
pub fn validate_expression(input: &str) -> Result<Vec<String>, ExpressionError> {
    Ok(Parser::parse(input)?.referenced_attributes())
}

pub fn eval_expression(input: &str, ctx: &EvalContext) -> Result<bool, ExpressionError> {
    Evaluator::evaluate(&Parser::parse(input)?, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_lists_attributes() {
        let attrs = validate_expression("ctype = 'child' AND (age > 3 OR ctype IS NULL)").unwrap();
        assert_eq!(attrs, vec!["age", "ctype"]);
    }

    #[test]
    fn test_parse_error_code() {
        let err = parse_expression("ctype = ").unwrap_err();
        assert_eq!(err.error_code(), "EXPRESSION_PARSE");
    }

    #[test]
    fn test_round_trip_through_display() {
        let expr = parse_expression("NOT (a = 'x' OR b IS NULL) AND c IN (1, 2)").unwrap();
        let reparsed = parse_expression(&expr.to_string()).unwrap();
        assert_eq!(expr, reparsed);
    }

    #[test]
    fn test_expression_serializes_tagged() {
        let json = serde_json::to_value(Expression::literal(true)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "literal", "value": true}));
    }
}
