//! Recursive descent parser.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or         := and ( OR and )*
//! and        := not ( AND not )*
//! not        := NOT not | primary
//! primary    := '(' or ')' | TRUE | FALSE | comparison
//! comparison := ident IS [NOT] NULL
//!             | ident [NOT] LIKE value
//!             | ident [NOT] IN '(' value ( ',' value )* ')'
//!             | ident op value
//! ```

use crate::ast::{ComparisonOp, Expression, Value};
use crate::lexer::{Lexer, Spanned, Token};
use crate::ExpressionError;

pub struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
}

impl Parser {
    /// Parses a condition string.
    pub fn parse(input: &str) -> Result<Expression, ExpressionError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Parser {
            tokens,
            position: 0,
        };
        let expr = parser.parse_or()?;

        if !parser.is_at_end() {
            return Err(parser.error(format!(
                "unexpected {} after expression",
                parser.current()
            )));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.match_token(&Token::Or) {
            left = left.or(self.parse_and()?);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_not()?;
        while self.match_token(&Token::And) {
            left = left.and(self.parse_not()?);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression, ExpressionError> {
        if self.match_token(&Token::Not) {
            return Ok(self.parse_not()?.negate());
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, ExpressionError> {
        if self.match_token(&Token::LeftParen) {
            let expr = self.parse_or()?;
            self.expect(&Token::RightParen)?;
            return Ok(expr);
        }
        if self.match_token(&Token::True) {
            return Ok(Expression::literal(true));
        }
        if self.match_token(&Token::False) {
            return Ok(Expression::literal(false));
        }

        let attribute = match self.advance() {
            Token::Identifier(name) => name,
            other => return Err(self.error_before(format!("expected attribute name, found {other}"))),
        };
        self.parse_comparison(attribute)
    }

    fn parse_comparison(&mut self, attribute: String) -> Result<Expression, ExpressionError> {
        if self.match_token(&Token::Is) {
            let negated = self.match_token(&Token::Not);
            self.expect(&Token::Null)?;
            let op = if negated {
                ComparisonOp::NotEqual
            } else {
                ComparisonOp::Equal
            };
            return Ok(Expression::comparison(attribute, op, Value::Null));
        }

        let negated = self.match_token(&Token::Not);
        let expr = match self.advance() {
            Token::Like => {
                let pattern = self.parse_value()?;
                Expression::comparison(attribute, ComparisonOp::Like, pattern)
            }
            Token::In => {
                let list = self.parse_list()?;
                Expression::comparison(attribute, ComparisonOp::In, list)
            }
            other if negated => {
                return Err(self.error_before(format!("expected LIKE or IN after NOT, found {other}")))
            }
            Token::Equal => Expression::comparison(attribute, ComparisonOp::Equal, self.parse_value()?),
            Token::NotEqual => {
                Expression::comparison(attribute, ComparisonOp::NotEqual, self.parse_value()?)
            }
            Token::LessThan => {
                Expression::comparison(attribute, ComparisonOp::LessThan, self.parse_value()?)
            }
            Token::GreaterThan => {
                Expression::comparison(attribute, ComparisonOp::GreaterThan, self.parse_value()?)
            }
            Token::LessThanOrEqual => Expression::comparison(
                attribute,
                ComparisonOp::LessThanOrEqual,
                self.parse_value()?,
            ),
            Token::GreaterThanOrEqual => Expression::comparison(
                attribute,
                ComparisonOp::GreaterThanOrEqual,
                self.parse_value()?,
            ),
            other => {
                return Err(self.error_before(format!("expected comparison operator, found {other}")))
            }
        };

        Ok(if negated { expr.negate() } else { expr })
    }

    fn parse_value(&mut self) -> Result<Value, ExpressionError> {
        match self.advance() {
            Token::StringLiteral(s) => Ok(Value::String(s)),
            Token::IntegerLiteral(i) => Ok(Value::Integer(i)),
            Token::FloatLiteral(x) => Ok(Value::Float(x)),
            Token::True => Ok(Value::Boolean(true)),
            Token::False => Ok(Value::Boolean(false)),
            Token::Null => Ok(Value::Null),
            // Bare words on the right side are plain strings: `status = active`.
            Token::Identifier(s) => Ok(Value::String(s)),
            other => Err(self.error_before(format!("expected value, found {other}"))),
        }
    }

    fn parse_list(&mut self) -> Result<Value, ExpressionError> {
        self.expect(&Token::LeftParen)?;
        let mut items = Vec::new();
        if !self.check(&Token::RightParen) {
            loop {
                items.push(self.parse_value()?);
                if !self.match_token(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RightParen)?;
        Ok(Value::List(items))
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        if self.match_token(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {expected}, found {}", self.current())))
        }
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.current()) == std::mem::discriminant(token)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if !self.is_at_end() {
            self.position += 1;
        }
        token
    }

    fn current(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map_or(&Token::Eof, |(token, _)| token)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current(), Token::Eof)
    }

    fn offset_of(&self, index: usize) -> usize {
        self.tokens.get(index).map_or(0, |(_, offset)| *offset)
    }

    fn error(&self, message: String) -> ExpressionError {
        ExpressionError::parse(message, self.offset_of(self.position))
    }

    /// Error located at the token just consumed.
    fn error_before(&self, message: String) -> ExpressionError {
        ExpressionError::parse(message, self.offset_of(self.position.saturating_sub(1)))
    }
}
