//! Tokenizer for the expression language

use crate::error::{PlayerError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    /// Quoted string (escapes resolved)
    Str(String),
    /// Identifier or keyword (`true`, `null`, function names)
    Ident(String),
    /// Contents of `{{ ... }}`, trimmed
    ModelRef(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Question,
    Colon,
    Semicolon,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Assign,
    Eof,
}

/// Token with its character offset
#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn lex(src: &str) -> Result<Vec<Spanned>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0usize;

    let err = |pos: usize, reason: &str| PlayerError::ExpressionParse {
        expression: src.to_string(),
        position: pos,
        reason: reason.to_string(),
    };

    while pos < chars.len() {
        let c = chars[pos];
        let start = pos;

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        // Model reference, braces may nest
        if c == '{' && chars.get(pos + 1) == Some(&'{') {
            pos += 2;
            let mut depth = 1;
            let mut inner = String::new();
            loop {
                match (chars.get(pos), chars.get(pos + 1)) {
                    (Some('{'), Some('{')) => {
                        depth += 1;
                        inner.push_str("{{");
                        pos += 2;
                    }
                    (Some('}'), Some('}')) => {
                        depth -= 1;
                        pos += 2;
                        if depth == 0 {
                            break;
                        }
                        inner.push_str("}}");
                    }
                    (Some(ch), _) => {
                        inner.push(*ch);
                        pos += 1;
                    }
                    (None, _) => return Err(err(start, "unterminated '{{'")),
                }
            }
            tokens.push(Spanned {
                token: Token::ModelRef(inner.trim().to_string()),
                pos: start,
            });
            continue;
        }

        if c == '\'' || c == '"' {
            pos += 1;
            let mut value = String::new();
            loop {
                match chars.get(pos) {
                    Some(ch) if *ch == c => {
                        pos += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = match chars.get(pos + 1) {
                            Some('n') => '\n',
                            Some('t') => '\t',
                            Some('r') => '\r',
                            Some(other) => *other,
                            None => return Err(err(pos, "dangling escape")),
                        };
                        value.push(escaped);
                        pos += 2;
                    }
                    Some(ch) => {
                        value.push(*ch);
                        pos += 1;
                    }
                    None => return Err(err(start, "unterminated string")),
                }
            }
            tokens.push(Spanned {
                token: Token::Str(value),
                pos: start,
            });
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(pos + 1).is_some_and(char::is_ascii_digit)) {
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            let text: String = chars[start..pos].iter().collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| err(start, "invalid number"))?;
            tokens.push(Spanned {
                token: Token::Number(number),
                pos: start,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            while pos < chars.len()
                && (chars[pos].is_alphanumeric() || chars[pos] == '_' || chars[pos] == '$')
            {
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Ident(chars[start..pos].iter().collect()),
                pos: start,
            });
            continue;
        }

        let next = chars.get(pos + 1).copied();
        let next2 = chars.get(pos + 2).copied();
        let (token, width) = match (c, next, next2) {
            ('=', Some('='), Some('=')) => (Token::StrictEq, 3),
            ('!', Some('='), Some('=')) => (Token::StrictNe, 3),
            ('=', Some('='), _) => (Token::Eq, 2),
            ('!', Some('='), _) => (Token::Ne, 2),
            ('<', Some('='), _) => (Token::Le, 2),
            ('>', Some('='), _) => (Token::Ge, 2),
            ('&', Some('&'), _) => (Token::And, 2),
            ('|', Some('|'), _) => (Token::Or, 2),
            ('=', _, _) => (Token::Assign, 1),
            ('!', _, _) => (Token::Not, 1),
            ('<', _, _) => (Token::Lt, 1),
            ('>', _, _) => (Token::Gt, 1),
            ('+', _, _) => (Token::Plus, 1),
            ('-', _, _) => (Token::Minus, 1),
            ('*', _, _) => (Token::Star, 1),
            ('/', _, _) => (Token::Slash, 1),
            ('%', _, _) => (Token::Percent, 1),
            ('(', _, _) => (Token::LParen, 1),
            (')', _, _) => (Token::RParen, 1),
            ('[', _, _) => (Token::LBracket, 1),
            (']', _, _) => (Token::RBracket, 1),
            (',', _, _) => (Token::Comma, 1),
            ('?', _, _) => (Token::Question, 1),
            (':', _, _) => (Token::Colon, 1),
            (';', _, _) => (Token::Semicolon, 1),
            _ => return Err(err(start, &format!("unexpected character '{c}'"))),
        };
        tokens.push(Spanned { token, pos: start });
        pos += width;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        pos: chars.len(),
    });
    Ok(tokens)
}
