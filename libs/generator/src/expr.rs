//! Sandboxed arithmetic expressions over payload fields.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/' | '%') unary)*
//! unary := ('+' | '-') unary | power
//! power := atom ('^' unary)?
//! atom  := number | field | '(' expr ')'
//! ```
//!
//! Anything outside this grammar (function calls, strings, comparison
//! operators, ...) is rejected by [`Expr::parse`].

use serde_json::{Map, Value};

use crate::error::ExpressionError;

/// Deepest nesting of parentheses, signs and exponents accepted.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Field(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            len: source.len(),
            depth: 0,
        };
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some((offset, tok)) => Err(syntax(*offset, format!("unexpected {}", tok.describe()))),
        }
    }

    /// Field names referenced by the expression, in first-use order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Field(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Neg(inner) => inner.collect_fields(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_fields(out);
                rhs.collect_fields(out);
            }
        }
    }

    /// Evaluate against the fields of an (in-progress) payload.
    pub fn evaluate(&self, fields: &Map<String, Value>) -> Result<f64, ExpressionError> {
        let value = self.eval(fields)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExpressionError::NonFinite)
        }
    }

    fn eval(&self, fields: &Map<String, Value>) -> Result<f64, ExpressionError> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Field(name) => match fields.get(name) {
                None => Err(ExpressionError::UndefinedField(name.clone())),
                Some(v) => v.as_f64().ok_or_else(|| ExpressionError::NonNumeric(name.clone())),
            },
            Expr::Neg(inner) => Ok(-inner.eval(fields)?),
            Expr::Binary { op, lhs, rhs } => {
                let a = lhs.eval(fields)?;
                let b = rhs.eval(fields)?;
                match op {
                    BinaryOp::Add => Ok(a + b),
                    BinaryOp::Sub => Ok(a - b),
                    BinaryOp::Mul => Ok(a * b),
                    BinaryOp::Div if b == 0.0 => Err(ExpressionError::DivisionByZero),
                    BinaryOp::Div => Ok(a / b),
                    BinaryOp::Rem if b == 0.0 => Err(ExpressionError::DivisionByZero),
                    BinaryOp::Rem => Ok(a % b),
                    BinaryOp::Pow => Ok(a.powf(b)),
                }
            }
        }
    }
}

fn syntax(offset: usize, detail: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        offset,
        detail: detail.into(),
    }
}

// ── Lexer ──

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Ident(s) => format!("identifier '{s}'"),
            Token::Op(c) => format!("operator '{c}'"),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'+' | b'-' | b'*' | b'/' | b'%' | b'^' => {
                tokens.push((i, Token::Op(c as char)));
                i += 1;
            }
            b'(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            b')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            b'0'..=b'9' | b'.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        while j < bytes.len() && bytes[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text = &source[start..i];
                let n: f64 = text
                    .parse()
                    .map_err(|_| syntax(start, format!("bad number '{text}'")))?;
                tokens.push((start, Token::Number(n)));
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(source[start..i].to_string())));
            }
            _ => {
                let ch = source[i..].chars().next().unwrap_or('?');
                return Err(syntax(i, format!("unexpected character '{ch}'")));
            }
        }
    }

    Ok(tokens)
}

// ── Parser ──

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    len: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<char> {
        match self.peek() {
            Some((_, Token::Op(c))) => Some(*c),
            _ => None,
        }
    }

    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.term()?;
        while let Some(c @ ('+' | '-')) = self.peek_op() {
            self.pos += 1;
            let rhs = self.term()?;
            let op = if c == '+' { BinaryOp::Add } else { BinaryOp::Sub };
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        while let Some(c @ ('*' | '/' | '%')) = self.peek_op() {
            self.pos += 1;
            let rhs = self.unary()?;
            let op = match c {
                '*' => BinaryOp::Mul,
                '/' => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.depth == MAX_DEPTH {
            let offset = self.peek().map_or(self.len, |(o, _)| *o);
            return Err(syntax(offset, format!("nesting deeper than {MAX_DEPTH}")));
        }
        self.depth += 1;
        let expr = self.unary_inner();
        self.depth -= 1;
        expr
    }

    fn unary_inner(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek_op() {
            Some('-') => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some('+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.atom()?;
        if self.peek_op() == Some('^') {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ExpressionError> {
        let Some((offset, tok)) = self.tokens.get(self.pos).cloned() else {
            return Err(syntax(self.len, "unexpected end of expression"));
        };
        self.pos += 1;
        match tok {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Ident(name) => {
                if let Some((_, Token::LParen)) = self.peek() {
                    return Err(syntax(offset, format!("function calls are not allowed ('{name}')")));
                }
                Ok(Expr::Field(name))
            }
            Token::LParen => {
                let inner = self.expr()?;
                match self.peek() {
                    Some((_, Token::RParen)) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    Some((o, t)) => Err(syntax(*o, format!("expected ')', found {}", t.describe()))),
                    None => Err(syntax(self.len, "missing ')'")),
                }
            }
            other => Err(syntax(offset, format!("unexpected {}", other.describe()))),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
