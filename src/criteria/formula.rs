//! Sandboxed arithmetic expressions over named telemetry points.
//!
//! Supports numbers, point names, `+ - * / ^` (`**` is accepted for `^`),
//! unary minus, parentheses, one optional comparison (`< <= > >= == !=`,
//! yielding `1.0` or `0.0`), and the functions `abs`, `sqrt`, `exp`,
//! `ln`/`log`, `min`, `max`. Nothing else is evaluated.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::EvalError;

use super::PointValues;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinOp {
    fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Abs,
    Sqrt,
    Exp,
    Ln,
    Min,
    Max,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "abs" => Some(Func::Abs),
            "sqrt" => Some(Func::Sqrt),
            "exp" => Some(Func::Exp),
            "ln" | "log" => Some(Func::Ln),
            "min" => Some(Func::Min),
            "max" => Some(Func::Max),
            _ => None,
        }
    }

    fn accepts(self, argc: usize) -> bool {
        match self {
            Func::Min | Func::Max => argc >= 1,
            _ => argc == 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(BinOp),
    LParen,
    RParen,
    Comma,
}

fn parse_error(position: usize, message: impl Into<String>) -> EvalError {
    EvalError::Parse {
        position,
        message: message.into(),
    }
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, EvalError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let offset_at = |i: usize| chars.get(i).map_or(src.len(), |(p, _)| *p);
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
                let mut j = i + 1;
                if j < chars.len() && matches!(chars[j].1, '+' | '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].1.is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].1.is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text = &src[pos..offset_at(i)];
            let value = text
                .parse::<f64>()
                .map_err(|_| parse_error(pos, format!("invalid number \"{text}\"")))?;
            tokens.push((pos, Token::Num(value)));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            tokens.push((pos, Token::Ident(src[pos..offset_at(i)].to_string())));
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::Op(BinOp::Pow), 2),
            ('<', Some('=')) => (Token::Op(BinOp::Le), 2),
            ('>', Some('=')) => (Token::Op(BinOp::Ge), 2),
            ('=', Some('=')) => (Token::Op(BinOp::Eq), 2),
            ('!', Some('=')) => (Token::Op(BinOp::Ne), 2),
            ('+', _) => (Token::Op(BinOp::Add), 1),
            ('-', _) => (Token::Op(BinOp::Sub), 1),
            ('*', _) => (Token::Op(BinOp::Mul), 1),
            ('/', _) => (Token::Op(BinOp::Div), 1),
            ('^', _) => (Token::Op(BinOp::Pow), 1),
            ('<', _) => (Token::Op(BinOp::Lt), 1),
            ('>', _) => (Token::Op(BinOp::Gt), 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            _ => return Err(parse_error(pos, format!("unexpected character '{c}'"))),
        };
        tokens.push((pos, token));
        i += width;
    }

    Ok(tokens)
}

/// Maximum nesting of unary operators, parentheses, and calls.
const MAX_DEPTH: usize = 64;

/// Recursive-descent parser, lowest precedence first:
/// comparison > additive > term > unary > power > primary.
struct Parser<'a> {
    tokens: &'a [(usize, Token)],
    pos: usize,
    end: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(p, _)| *p)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn comparison(&mut self) -> Result<Expr, EvalError> {
        let lhs = self.additive()?;
        if let Some(Token::Op(op)) = self.peek() {
            if op.is_comparison() {
                self.pos += 1;
                let rhs = self.additive()?;
                return Ok(Expr::Binary(*op, Box::new(lhs), Box::new(rhs)));
            }
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ (BinOp::Add | BinOp::Sub))) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ (BinOp::Mul | BinOp::Div))) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        // every nesting path re-enters here
        if self.depth >= MAX_DEPTH {
            return Err(parse_error(self.offset(), "expression nested too deeply"));
        }
        self.depth += 1;
        let expr = self.unary_inner();
        self.depth -= 1;
        expr
    }

    fn unary_inner(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some(Token::Op(BinOp::Sub)) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op(BinOp::Add)) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, EvalError> {
        let base = self.primary()?;
        if let Some(Token::Op(BinOp::Pow)) = self.peek() {
            self.pos += 1;
            // right-associative: 2^3^2 == 2^(3^2)
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Num(v)) => Ok(Expr::Num(*v)),
            Some(Token::Ident(name)) => {
                if !matches!(self.peek(), Some(Token::LParen)) {
                    return Ok(Expr::Var(name.clone()));
                }
                let func = Func::from_name(name)
                    .ok_or_else(|| parse_error(offset, format!("unknown function \"{name}\"")))?;
                self.pos += 1;
                let mut args = Vec::new();
                if !matches!(self.peek(), Some(Token::RParen)) {
                    loop {
                        args.push(self.comparison()?);
                        match self.next() {
                            Some(Token::Comma) => continue,
                            Some(Token::RParen) => break,
                            _ => return Err(parse_error(self.offset(), "expected ',' or ')'")),
                        }
                    }
                } else {
                    self.pos += 1;
                }
                if !func.accepts(args.len()) {
                    return Err(parse_error(
                        offset,
                        format!("wrong number of arguments to \"{name}\""),
                    ));
                }
                Ok(Expr::Call(func, args))
            }
            Some(Token::LParen) => {
                let inner = self.comparison()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(parse_error(self.offset(), "expected ')'")),
                }
            }
            Some(_) => Err(parse_error(offset, "unexpected token")),
            None => Err(parse_error(offset, "unexpected end of expression")),
        }
    }
}

fn collect_variables(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Num(_) => {}
        Expr::Var(name) => {
            out.insert(name.clone());
        }
        Expr::Neg(inner) => collect_variables(inner, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_variables(lhs, out);
            collect_variables(rhs, out);
        }
        Expr::Call(_, args) => args.iter().for_each(|a| collect_variables(a, out)),
    }
}

/// A parsed arithmetic expression over named points.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use load_curtail::criteria::formula::Formula;
///
/// let f = Formula::parse("abs(ZoneTemp - SetPoint) * 2").unwrap();
/// assert_eq!(f.variables(), ["SetPoint", "ZoneTemp"]);
///
/// let points = HashMap::from([
///     ("ZoneTemp".to_string(), 74.0),
///     ("SetPoint".to_string(), 72.0),
/// ]);
/// assert_eq!(f.eval(&points).unwrap(), 4.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
    variables: Vec<String>,
}

impl Formula {
    /// Parses `source` into an evaluable expression.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Parse`] with the byte offset of the first
    /// offending token.
    pub fn parse(source: &str) -> Result<Self, EvalError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            end: source.len(),
            depth: 0,
        };
        let expr = parser.comparison()?;
        if parser.pos < tokens.len() {
            return Err(parse_error(parser.offset(), "unexpected trailing input"));
        }

        let mut names = BTreeSet::new();
        collect_variables(&expr, &mut names);
        Ok(Self {
            source: source.to_string(),
            expr,
            variables: names.into_iter().collect(),
        })
    }

    /// Original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct point names referenced by the expression, sorted.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Evaluates the expression with point values substituted by name.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::UnknownVariable`] when a referenced point is
    /// absent from `values`, and [`EvalError::FormulaDivisionByZero`] on a
    /// zero divisor.
    pub fn eval(&self, values: &PointValues) -> Result<f64, EvalError> {
        self.eval_expr(&self.expr, values)
    }

    fn eval_expr(&self, expr: &Expr, values: &PointValues) -> Result<f64, EvalError> {
        match expr {
            Expr::Num(v) => Ok(*v),
            Expr::Var(name) => values
                .get(name)
                .copied()
                .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
            Expr::Neg(inner) => Ok(-self.eval_expr(inner, values)?),
            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval_expr(lhs, values)?;
                let b = self.eval_expr(rhs, values)?;
                let flag = |cond: bool| if cond { 1.0 } else { 0.0 };
                Ok(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => {
                        if b == 0.0 {
                            return Err(EvalError::FormulaDivisionByZero(self.source.clone()));
                        }
                        a / b
                    }
                    BinOp::Pow => a.powf(b),
                    BinOp::Lt => flag(a < b),
                    BinOp::Le => flag(a <= b),
                    BinOp::Gt => flag(a > b),
                    BinOp::Ge => flag(a >= b),
                    BinOp::Eq => flag(a == b),
                    BinOp::Ne => flag(a != b),
                })
            }
            Expr::Call(func, args) => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval_expr(arg, values)?);
                }
                let first = evaluated[0];
                Ok(match func {
                    Func::Abs => first.abs(),
                    Func::Sqrt => first.sqrt(),
                    Func::Exp => first.exp(),
                    Func::Ln => first.ln(),
                    Func::Min => evaluated.iter().copied().fold(f64::INFINITY, f64::min),
                    Func::Max => evaluated.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                })
            }
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
