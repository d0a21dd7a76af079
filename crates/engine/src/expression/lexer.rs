//! Tokenizer for conditional expressions.

use serde_json::{Number, Value};

use crate::error::{EngineError, EngineResult};

/// Token kinds of the expression language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Variable reference, possibly dotted (`usuario.nombre`).
    Ident(String),
    Number(Value),
    Str(String),
    True,
    False,
    Null,
    EqEq,
    NotEq,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Not,
    Minus,
    LParen,
    RParen,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "identifier '{}'", name),
            TokenKind::Number(n) => write!(f, "number {}", n),
            TokenKind::Str(s) => write!(f, "string '{}'", s),
            TokenKind::True => write!(f, "'true'"),
            TokenKind::False => write!(f, "'false'"),
            TokenKind::Null => write!(f, "'null'"),
            TokenKind::EqEq => write!(f, "'=='"),
            TokenKind::NotEq => write!(f, "'!='"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Ge => write!(f, "'>='"),
            TokenKind::Le => write!(f, "'<='"),
            TokenKind::And => write!(f, "'&&'"),
            TokenKind::Or => write!(f, "'||'"),
            TokenKind::Not => write!(f, "'!'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::Eof => write!(f, "end of expression"),
        }
    }
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Split `source` into tokens, terminated by `Eof`.
pub fn tokenize(source: &str) -> EngineResult<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let kind = match c {
            b'(' => {
                pos += 1;
                TokenKind::LParen
            }
            b')' => {
                pos += 1;
                TokenKind::RParen
            }
            b'-' => {
                pos += 1;
                TokenKind::Minus
            }
            b'=' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    TokenKind::EqEq
                } else {
                    return Err(EngineError::parse(start, "unexpected '=', did you mean '=='?"));
                }
            }
            b'!' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    TokenKind::NotEq
                } else {
                    pos += 1;
                    TokenKind::Not
                }
            }
            b'>' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    TokenKind::Ge
                } else {
                    pos += 1;
                    TokenKind::Gt
                }
            }
            b'<' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    TokenKind::Le
                } else {
                    pos += 1;
                    TokenKind::Lt
                }
            }
            b'&' => {
                if bytes.get(pos + 1) == Some(&b'&') {
                    pos += 2;
                    TokenKind::And
                } else {
                    return Err(EngineError::parse(start, "unexpected '&', did you mean '&&'?"));
                }
            }
            b'|' => {
                if bytes.get(pos + 1) == Some(&b'|') {
                    pos += 2;
                    TokenKind::Or
                } else {
                    return Err(EngineError::parse(start, "unexpected '|', did you mean '||'?"));
                }
            }
            b'\'' | b'"' => {
                let (text, next) = read_string(source, pos)?;
                pos = next;
                TokenKind::Str(text)
            }
            b'0'..=b'9' => {
                let (number, next) = read_number(source, pos)?;
                pos = next;
                TokenKind::Number(number)
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let (word, next) = read_identifier(source, pos);
                pos = next;
                keyword_or_ident(word)
            }
            _ => {
                let ch = source[start..].chars().next().unwrap_or('?');
                return Err(EngineError::parse(
                    start,
                    format!("unexpected character '{}'", ch),
                ));
            }
        };

        tokens.push(Token { kind, offset: start });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}

fn keyword_or_ident(word: &str) -> TokenKind {
    match word.to_ascii_lowercase().as_str() {
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        _ => TokenKind::Ident(word.to_string()),
    }
}

/// Read `ident(.segment)*` where segments are identifiers or array indexes.
fn read_identifier(source: &str, start: usize) -> (&str, usize) {
    let bytes = source.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut pos = start;

    while pos < bytes.len() && is_word(bytes[pos]) {
        pos += 1;
    }
    while pos + 1 < bytes.len() && bytes[pos] == b'.' && is_word(bytes[pos + 1]) {
        pos += 1;
        while pos < bytes.len() && is_word(bytes[pos]) {
            pos += 1;
        }
    }

    (&source[start..pos], pos)
}

fn read_number(source: &str, start: usize) -> EngineResult<(Value, usize)> {
    let bytes = source.as_bytes();
    let mut pos = start;
    let mut is_float = false;

    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos + 1 < bytes.len() && bytes[pos] == b'.' && bytes[pos + 1].is_ascii_digit() {
        is_float = true;
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < bytes.len() && (bytes[pos].is_ascii_alphabetic() || bytes[pos] == b'_') {
        return Err(EngineError::parse(start, "malformed number literal"));
    }

    let text = &source[start..pos];
    let value = if is_float {
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    } else {
        text.parse::<i64>().ok().map(|n| Value::Number(n.into()))
    };

    value
        .map(|v| (v, pos))
        .ok_or_else(|| EngineError::parse(start, format!("invalid number '{}'", text)))
}

fn read_string(source: &str, start: usize) -> EngineResult<(String, usize)> {
    let mut chars = source[start..].char_indices();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => return Err(EngineError::parse(start, "unterminated string")),
    };

    let mut out = String::new();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            c if c == quote => return Ok((out, start + idx + c.len_utf8())),
            c => out.push(c),
        }
    }

    Err(EngineError::parse(start, "unterminated string"))
}
