//! Lexer for the object query language.
//!
//! The language is a Lucene-style mini-language:
//! - `field:value`, `field:"quoted phrase"`
//! - wildcards `*` and `?` inside unquoted values
//! - comparisons `field:>v`, `>=`, `<`, `<=`
//! - ranges `field:[a TO b]`, `field:{a TO b}` and mixed bounds
//! - `AND`, `OR`, `NOT`, prefix `-`, parentheses
//! - `\` escapes the next character

use std::fmt;

use crate::errors::{VaultError, VaultResult};

/// Comparison operator in `field:>value` terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        }
    }
}

/// An unquoted word.
///
/// `text` is the unescaped literal. `like` is set when the word carries an
/// unescaped wildcard and holds the equivalent SQL `LIKE` pattern, escaped
/// with `\`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    pub like: Option<String>,
}

impl Word {
    /// The lone `*` word, used as an open range bound or "any value".
    pub fn is_star(&self) -> bool {
        self.like.is_some() && self.text == "*"
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    LParen,
    RParen,
    /// `[` inclusive lower bound
    LBracket,
    /// `]` inclusive upper bound
    RBracket,
    /// `{` exclusive lower bound
    LBrace,
    /// `}` exclusive upper bound
    RBrace,
    Colon,
    And,
    Or,
    Not,
    To,
    /// Prefix negation: `-term`
    Minus,
    Cmp(CmpOp),
    Word(Word),
    Phrase(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Colon => write!(f, ":"),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::Not => write!(f, "NOT"),
            Token::To => write!(f, "TO"),
            Token::Minus => write!(f, "-"),
            Token::Cmp(op) => write!(f, "{}", op.as_sql()),
            Token::Word(w) => write!(f, "{}", w.text),
            Token::Phrase(p) => write!(f, "\"{p}\""),
        }
    }
}

fn is_delimiter(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '(' | ')' | '[' | ']' | '{' | '}' | ':' | '"' | '<' | '>')
}

/// Characters with a meaning inside SQL `LIKE` patterns.
fn push_like_literal(pattern: &mut String, ch: char) {
    if matches!(ch, '%' | '_' | '\\') {
        pattern.push('\\');
    }
    pattern.push(ch);
}

/// Split `input` into tokens.
pub fn tokenize(input: &str) -> VaultResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < len {
        let ch = chars[i];

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        let single = match ch {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            ':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(token);
            i += 1;
            continue;
        }

        if ch == '>' || ch == '<' {
            let inclusive = i + 1 < len && chars[i + 1] == '=';
            let op = match (ch, inclusive) {
                ('>', false) => CmpOp::Gt,
                ('>', true) => CmpOp::Ge,
                ('<', false) => CmpOp::Lt,
                _ => CmpOp::Le,
            };
            tokens.push(Token::Cmp(op));
            i += if inclusive { 2 } else { 1 };
            continue;
        }

        if ch == '"' {
            let mut phrase = String::new();
            i += 1;
            let mut closed = false;
            while i < len {
                match chars[i] {
                    '\\' if i + 1 < len => {
                        phrase.push(chars[i + 1]);
                        i += 2;
                    }
                    '"' => {
                        closed = true;
                        i += 1;
                        break;
                    }
                    other => {
                        phrase.push(other);
                        i += 1;
                    }
                }
            }
            if !closed {
                return Err(VaultError::QuerySyntax("Unterminated quoted phrase".into()));
            }
            tokens.push(Token::Phrase(phrase));
            continue;
        }

        // `-` right before a term negates it, unless it starts a value.
        if ch == '-'
            && i + 1 < len
            && !chars[i + 1].is_whitespace()
            && !matches!(tokens.last(), Some(Token::Colon) | Some(Token::Cmp(_)))
        {
            tokens.push(Token::Minus);
            i += 1;
            continue;
        }

        let mut text = String::new();
        let mut pattern = String::new();
        let mut wildcard = false;
        let mut escaped_any = false;
        while i < len && !is_delimiter(chars[i]) {
            match chars[i] {
                '\\' => {
                    if i + 1 >= len {
                        return Err(VaultError::QuerySyntax(
                            "Dangling escape at end of query".into(),
                        ));
                    }
                    let literal = chars[i + 1];
                    text.push(literal);
                    push_like_literal(&mut pattern, literal);
                    escaped_any = true;
                    i += 2;
                }
                '*' => {
                    text.push('*');
                    pattern.push('%');
                    wildcard = true;
                    i += 1;
                }
                '?' => {
                    text.push('?');
                    pattern.push('_');
                    wildcard = true;
                    i += 1;
                }
                other => {
                    text.push(other);
                    push_like_literal(&mut pattern, other);
                    i += 1;
                }
            }
        }
        if text.is_empty() {
            return Err(VaultError::QuerySyntax(format!(
                "Unexpected character '{ch}'"
            )));
        }

        let keyword = if escaped_any || wildcard {
            None
        } else {
            match text.as_str() {
                "AND" | "&&" => Some(Token::And),
                "OR" | "||" => Some(Token::Or),
                "NOT" => Some(Token::Not),
                "TO" => Some(Token::To),
                _ => None,
            }
        };
        tokens.push(keyword.unwrap_or_else(|| {
            Token::Word(Word {
                text,
                like: wildcard.then_some(pattern),
            })
        }));
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str) -> Token {
        Token::Word(Word {
            text: text.into(),
            like: None,
        })
    }

    #[test]
    fn field_terms_and_operators() {
        let tokens = tokenize("file_name:a.exe AND NOT family:agent").unwrap();
        assert_eq!(
            tokens,
            vec![
                word("file_name"),
                Token::Colon,
                word("a.exe"),
                Token::And,
                Token::Not,
                word("family"),
                Token::Colon,
                word("agent"),
            ]
        );
    }

    #[test]
    fn comparisons_and_ranges() {
        let tokens = tokenize("file_size:>=10 upload_time:[2024-01-01 TO *}").unwrap();
        assert_eq!(tokens[2], Token::Cmp(CmpOp::Ge));
        assert_eq!(tokens[3], word("10"));
        assert_eq!(tokens[6], Token::LBracket);
        assert_eq!(tokens[7], word("2024-01-01"));
        assert_eq!(tokens[8], Token::To);
        assert!(matches!(&tokens[9], Token::Word(w) if w.is_star()));
        assert_eq!(tokens[10], Token::RBrace);
    }

    #[test]
    fn wildcards_become_like_patterns() {
        let tokens = tokenize("file_name:mal_wa?e*").unwrap();
        let Token::Word(w) = &tokens[2] else {
            panic!("expected word");
        };
        assert_eq!(w.text, "mal_wa?e*");
        assert_eq!(w.like.as_deref(), Some("mal\\_wa_e%"));
    }

    #[test]
    fn escapes_keep_characters_literal() {
        let tokens = tokenize(r"file_name:a\*b\:c").unwrap();
        assert_eq!(tokens[2], word("a*b:c"));
        assert_eq!(tokenize(r"x:\AND").unwrap()[2], word("AND"));
    }

    #[test]
    fn phrases_keep_whitespace() {
        let tokens = tokenize(r#"blob_name:"two words \"quoted\"""#).unwrap();
        assert_eq!(tokens[2], Token::Phrase("two words \"quoted\"".into()));
        assert!(tokenize("blob_name:\"open").is_err());
    }

    #[test]
    fn minus_negates_terms_but_not_values() {
        let tokens = tokenize("-type:file upload_time:2024-01-01").unwrap();
        assert_eq!(tokens[0], Token::Minus);
        assert_eq!(tokens[6], word("2024-01-01"));
        let tokens = tokenize("x:-5").unwrap();
        assert_eq!(tokens[2], word("-5"));
    }
}
