//! Tokenizer for conditions.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Attribute name. May start with `$` for computed attributes such as
    /// `$resources` and may contain `.`, `:` and `-` after the first char.
    Identifier(String),
    StringLiteral(String),
    IntegerLiteral(i64),
    FloatLiteral(f64),

    And,
    Or,
    Not,
    Like,
    In,
    Is,
    True,
    False,
    Null,

    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,

    LeftParen,
    RightParen,
    Comma,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "identifier '{s}'"),
            Token::StringLiteral(s) => write!(f, "string '{s}'"),
            Token::IntegerLiteral(i) => write!(f, "integer {i}"),
            Token::FloatLiteral(x) => write!(f, "float {x}"),
            Token::And => f.write_str("AND"),
            Token::Or => f.write_str("OR"),
            Token::Not => f.write_str("NOT"),
            Token::Like => f.write_str("LIKE"),
            Token::In => f.write_str("IN"),
            Token::Is => f.write_str("IS"),
            Token::True => f.write_str("TRUE"),
            Token::False => f.write_str("FALSE"),
            Token::Null => f.write_str("NULL"),
            Token::Equal => f.write_str("'='"),
            Token::NotEqual => f.write_str("'!='"),
            Token::LessThan => f.write_str("'<'"),
            Token::GreaterThan => f.write_str("'>'"),
            Token::LessThanOrEqual => f.write_str("'<='"),
            Token::GreaterThanOrEqual => f.write_str("'>='"),
            Token::LeftParen => f.write_str("'('"),
            Token::RightParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

/// A token with the byte offset it starts at.
pub type Spanned = (Token, usize);

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    /// Tokenizes the whole input; the last token is always [`Token::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<Spanned>, ExpressionError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.0 == Token::Eof;
            tokens.push(spanned);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Spanned, ExpressionError> {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let Some((start, c)) = self.chars.next() else {
            return Ok((Token::Eof, self.input.len()));
        };

        let token = match c {
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            ',' => Token::Comma,
            '=' => {
                // Accept both `=` and `==`.
                self.chars.next_if(|(_, c)| *c == '=');
                Token::Equal
            }
            '!' => {
                if self.chars.next_if(|(_, c)| *c == '=').is_none() {
                    return Err(ExpressionError::parse("expected '=' after '!'", start));
                }
                Token::NotEqual
            }
            '<' => {
                if self.chars.next_if(|(_, c)| *c == '=').is_some() {
                    Token::LessThanOrEqual
                } else if self.chars.next_if(|(_, c)| *c == '>').is_some() {
                    Token::NotEqual
                } else {
                    Token::LessThan
                }
            }
            '>' => {
                if self.chars.next_if(|(_, c)| *c == '=').is_some() {
                    Token::GreaterThanOrEqual
                } else {
                    Token::GreaterThan
                }
            }
            '\'' | '"' => self.read_string(c, start)?,
            c if c.is_ascii_digit() || c == '-' => self.read_number(start)?,
            c if c.is_alphabetic() || c == '_' || c == '$' => self.read_word(start),
            other => {
                return Err(ExpressionError::parse(
                    format!("unexpected character '{other}'"),
                    start,
                ))
            }
        };

        Ok((token, start))
    }

    /// Reads a quoted literal; a doubled quote stands for one quote char.
    fn read_string(&mut self, quote: char, start: usize) -> Result<Token, ExpressionError> {
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => {
                    if self.chars.next_if(|(_, c)| *c == quote).is_some() {
                        value.push(quote);
                    } else {
                        return Ok(Token::StringLiteral(value));
                    }
                }
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, escaped)) => value.push(escaped),
                    None => break,
                },
                Some((_, c)) => value.push(c),
                None => break,
            }
        }
        Err(ExpressionError::parse("unterminated string literal", start))
    }

    fn read_number(&mut self, start: usize) -> Result<Token, ExpressionError> {
        let mut end = start + 1;
        let mut is_float = false;
        while let Some((i, c)) = self
            .chars
            .next_if(|(_, c)| c.is_ascii_digit() || (*c == '.' && !is_float))
        {
            if c == '.' {
                is_float = true;
            }
            end = i + c.len_utf8();
        }

        let text = &self.input[start..end];
        let invalid = || ExpressionError::parse(format!("invalid number '{text}'"), start);
        if is_float {
            text.parse::<f64>().map(Token::FloatLiteral).map_err(|_| invalid())
        } else {
            text.parse::<i64>().map(Token::IntegerLiteral).map_err(|_| invalid())
        }
    }

    fn read_word(&mut self, start: usize) -> Token {
        let mut end = start + 1;
        while let Some((i, c)) = self
            .chars
            .next_if(|(_, c)| c.is_alphanumeric() || matches!(*c, '_' | '.' | ':' | '-'))
        {
            end = i + c.len_utf8();
        }

        let word = &self.input[start..end];
        match word.to_ascii_uppercase().as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "LIKE" => Token::Like,
            "IN" => Token::In,
            "IS" => Token::Is,
            "TRUE" => Token::True,
            "FALSE" => Token::False,
            "NULL" => Token::Null,
            _ => Token::Identifier(word.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_comparison_tokens() {
        assert_eq!(
            tokens("ctype == 'child' and loginDate is not null"),
            vec![
                Token::Identifier("ctype".into()),
                Token::Equal,
                Token::StringLiteral("child".into()),
                Token::And,
                Token::Identifier("loginDate".into()),
                Token::Is,
                Token::Not,
                Token::Null,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_identifier_charset() {
        assert_eq!(
            tokens("$resources der:full-name"),
            vec![
                Token::Identifier("$resources".into()),
                Token::Identifier("der:full-name".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("-5 3.25 <> <="),
            vec![
                Token::IntegerLiteral(-5),
                Token::FloatLiteral(3.25),
                Token::NotEqual,
                Token::LessThanOrEqual,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_doubled_quote_escape() {
        assert_eq!(
            tokens("'O''Hara'"),
            vec![Token::StringLiteral("O'Hara".into()), Token::Eof]
        );
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        let err = Lexer::new("a = 'oops").tokenize().unwrap_err();
        assert!(matches!(err, ExpressionError::Parse { position: 4, .. }));
    }

    #[test]
    fn test_lone_bang_rejected() {
        assert!(Lexer::new("a ! b").tokenize().is_err());
    }
}
