//! Recursive-descent parser from tokens to a boolean expression tree.
//!
//! Grammar (implicit `AND` between adjacent terms):
//!
//! ```text
//! query    := or EOF
//! or       := and (OR and)*
//! and      := unary (AND? unary)*
//! unary    := (NOT | -) unary | '(' or ')' | term
//! term     := FIELD ':' cond
//! cond     := '(' vor ')' | CMP value | range | value
//! vor      := vand (OR vand)*
//! vand     := vunary (AND? vunary)*
//! vunary   := (NOT | -) vunary | cond
//! range    := ('[' | '{') bound TO bound (']' | '}')
//! ```

use crate::errors::{VaultError, VaultResult};
use crate::query::guards::MAX_QUERY_DEPTH;
use crate::query::tokenizer::{CmpOp, Token, Word};

/// Right-hand side of a term.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Quoted phrase or unquoted word without wildcards.
    Exact(String),
    /// Unquoted word with wildcards; `like` is the SQL pattern.
    Pattern { text: String, like: String },
}

impl Value {
    /// The lone `*`, matching any present value.
    pub fn is_any(&self) -> bool {
        matches!(self, Value::Pattern { text, .. } if text == "*")
    }
}

/// One end of a range; `value` is `None` for an open (`*`) bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bound {
    pub value: Option<String>,
    pub inclusive: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    Match(Value),
    Compare(CmpOp, String),
    Range { low: Bound, high: Bound },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Term { field: String, cond: Condition },
}

/// Parse a token stream into an [`Expr`].
pub fn parse(tokens: &[Token]) -> VaultResult<Expr> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or(None)?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(unexpected(token)),
    }
}

fn unexpected(token: &Token) -> VaultError {
    VaultError::QuerySyntax(format!("Unexpected '{token}'"))
}

fn end_of_input() -> VaultError {
    VaultError::QuerySyntax("Unexpected end of query".into())
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> VaultResult<&'a Token> {
        let token = self.tokens.get(self.pos).ok_or_else(end_of_input)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: &Token) -> VaultResult<()> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(unexpected(token))
        }
    }

    fn enter(&mut self) -> VaultResult<()> {
        self.depth += 1;
        if self.depth > MAX_QUERY_DEPTH {
            return Err(VaultError::QuerySyntax("Query is nested too deeply".into()));
        }
        Ok(())
    }

    /// `field` is set while parsing inside a `field:( ... )` group.
    fn parse_or(&mut self, field: Option<&str>) -> VaultResult<Expr> {
        let mut items = vec![self.parse_and(field)?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            items.push(self.parse_and(field)?);
        }
        Ok(flatten(items, Expr::Or))
    }

    fn parse_and(&mut self, field: Option<&str>) -> VaultResult<Expr> {
        let mut items = vec![self.parse_unary(field)?];
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.pos += 1;
                    items.push(self.parse_unary(field)?);
                }
                Some(Token::Or) | Some(Token::RParen) | None => break,
                Some(_) => items.push(self.parse_unary(field)?),
            }
        }
        Ok(flatten(items, Expr::And))
    }

    fn parse_unary(&mut self, field: Option<&str>) -> VaultResult<Expr> {
        match self.peek() {
            Some(Token::Not) | Some(Token::Minus) => {
                self.pos += 1;
                self.enter()?;
                let inner = self.parse_unary(field)?;
                self.depth -= 1;
                Ok(Expr::Not(Box::new(inner)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                self.enter()?;
                let inner = self.parse_or(field)?;
                self.expect(&Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            _ => match field {
                Some(field) => self.parse_condition(field),
                None => self.parse_term(),
            },
        }
    }

    fn parse_term(&mut self) -> VaultResult<Expr> {
        let field = match self.next()? {
            Token::Word(Word { text, like: None }) => text.as_str(),
            Token::Word(word) => {
                return Err(VaultError::QuerySemantics(format!(
                    "Field names cannot contain wildcards: '{}'",
                    word.text
                )))
            }
            token => return Err(unexpected(token)),
        };
        match self.peek() {
            Some(Token::Colon) => self.pos += 1,
            _ => {
                return Err(VaultError::QuerySemantics(format!(
                    "Term '{field}' must be qualified with a field name"
                )))
            }
        }
        self.parse_condition(field)
    }

    fn parse_condition(&mut self, field: &str) -> VaultResult<Expr> {
        let cond = match self.next()? {
            Token::LParen => {
                self.enter()?;
                let inner = self.parse_or(Some(field))?;
                self.expect(&Token::RParen)?;
                self.depth -= 1;
                return Ok(inner);
            }
            Token::Cmp(op) => Condition::Compare(*op, self.parse_scalar()?),
            Token::LBracket => self.parse_range(true)?,
            Token::LBrace => self.parse_range(false)?,
            Token::Word(Word { text, like: None }) => Condition::Match(Value::Exact(text.clone())),
            Token::Word(Word {
                text,
                like: Some(like),
            }) => Condition::Match(Value::Pattern {
                text: text.clone(),
                like: like.clone(),
            }),
            Token::Phrase(text) => Condition::Match(Value::Exact(text.clone())),
            token => return Err(unexpected(token)),
        };
        Ok(Expr::Term {
            field: field.to_string(),
            cond,
        })
    }

    fn parse_scalar(&mut self) -> VaultResult<String> {
        match self.next()? {
            Token::Word(Word { text, like: None }) | Token::Phrase(text) => Ok(text.clone()),
            Token::Word(word) => Err(VaultError::QuerySemantics(format!(
                "Wildcards are not allowed in comparisons: '{}'",
                word.text
            ))),
            token => Err(unexpected(token)),
        }
    }

    fn parse_bound(&mut self, inclusive: bool) -> VaultResult<Bound> {
        let value = match self.next()? {
            Token::Word(word) if word.is_star() => None,
            Token::Word(Word { text, like: None }) | Token::Phrase(text) => Some(text.clone()),
            Token::Word(word) => {
                return Err(VaultError::QuerySemantics(format!(
                    "Wildcards are not allowed in ranges: '{}'",
                    word.text
                )))
            }
            token => return Err(unexpected(token)),
        };
        Ok(Bound { value, inclusive })
    }

    fn parse_range(&mut self, low_inclusive: bool) -> VaultResult<Condition> {
        let low = self.parse_bound(low_inclusive)?;
        self.expect(&Token::To)?;
        let mut high = self.parse_bound(false)?;
        high.inclusive = match self.next()? {
            Token::RBracket => true,
            Token::RBrace => false,
            token => return Err(unexpected(token)),
        };
        Ok(Condition::Range { low, high })
    }
}

fn flatten(mut items: Vec<Expr>, join: fn(Vec<Expr>) -> Expr) -> Expr {
    if items.len() == 1 {
        items.remove(0)
    } else {
        join(items)
    }
}
