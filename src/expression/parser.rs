//! Recursive-descent parser for expressions
//!
//! Precedence, lowest first:
//! `;` < `=` < `?:` < `||` < `&&` < equality < relational < `+ -` < `* / %` < unary

use serde_json::Value;

use crate::error::{PlayerError, Result};
use crate::util::value::number_value;

use super::lexer::{lex, Spanned, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `{{path}}` (path kept raw; it may contain nested refs)
    ModelRef(String),
    Array(Vec<Expr>),
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        target: String,
        value: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// `a; b; c` evaluates each, yields the last
    Sequence(Vec<Expr>),
}

pub fn parse(src: &str) -> Result<Expr> {
    let tokens = lex(src)?;
    let mut parser = Parser {
        src,
        tokens: &tokens,
        pos: 0,
    };
    let expr = parser.parse_sequence()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.err(format!("unexpected {other:?}"))),
    }
}

struct Parser<'a> {
    src: &'a str,
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.err(format!("expected {token:?}, got {:?}", self.peek())))
        }
    }

    fn err(&self, reason: impl Into<String>) -> PlayerError {
        PlayerError::ExpressionParse {
            expression: self.src.to_string(),
            position: self.cur().pos,
            reason: reason.into(),
        }
    }

    fn parse_sequence(&mut self) -> Result<Expr> {
        let mut items = vec![self.parse_assignment()?];
        while self.eat(&Token::Semicolon) {
            if self.peek() == &Token::Eof {
                break;
            }
            items.push(self.parse_assignment()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Sequence(items)
        })
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let left = self.parse_conditional()?;
        if self.peek() != &Token::Assign {
            return Ok(left);
        }
        let Expr::ModelRef(target) = left else {
            return Err(self.err("only {{bindings}} can be assigned"));
        };
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            target,
            value: Box::new(value),
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect(Token::Colon)?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::And) {
            let right = self.parse_equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn binary_loop(
        &mut self,
        next: fn(&mut Self) -> Result<Expr>,
        op_for: fn(&Token) -> Option<BinaryOp>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        while let Some(op) = op_for(self.peek()) {
            self.advance();
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        self.binary_loop(Self::parse_relational, |t| match t {
            Token::Eq => Some(BinaryOp::Eq),
            Token::Ne => Some(BinaryOp::Ne),
            Token::StrictEq => Some(BinaryOp::StrictEq),
            Token::StrictNe => Some(BinaryOp::StrictNe),
            _ => None,
        })
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        self.binary_loop(Self::parse_additive, |t| match t {
            Token::Lt => Some(BinaryOp::Lt),
            Token::Le => Some(BinaryOp::Le),
            Token::Gt => Some(BinaryOp::Gt),
            Token::Ge => Some(BinaryOp::Ge),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.binary_loop(Self::parse_multiplicative, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        self.binary_loop(Self::parse_unary, |t| match t {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            Token::Percent => Some(BinaryOp::Rem),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Token::Not => UnaryOp::Not,
            Token::Minus => UnaryOp::Negate,
            Token::Plus => UnaryOp::Plus,
            _ => return self.parse_primary(),
        };
        self.advance();
        let arg = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            arg: Box::new(arg),
        })
    }

    fn parse_list(&mut self, close: Token) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_assignment()?);
            if self.eat(&close) {
                return Ok(items);
            }
            self.expect(Token::Comma)?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(number_value(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::ModelRef(path) => Ok(Expr::ModelRef(path)),
            Token::LParen => {
                let inner = self.parse_sequence()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::Array(self.parse_list(Token::RBracket)?)),
            Token::Ident(word) => {
                let keyword = match word.as_str() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    "null" | "undefined" => Some(Value::Null),
                    _ => None,
                };
                if let Some(value) = keyword {
                    return Ok(Expr::Literal(value));
                }
                if self.eat(&Token::LParen) {
                    let args = self.parse_list(Token::RParen)?;
                    return Ok(Expr::Call { name: word, args });
                }
                Err(self.err(format!("unknown identifier '{word}'")))
            }
            other => Err(self.err(format!("unexpected {other:?}"))),
        }
    }
}
