//! Arithmetic expressions, as found in address operands and constant folding.
//!
//! Expressions are parsed once into an [`Expr`] tree and evaluated on every access, so register
//! references always see the current register values.

use std::fmt;
use std::str::FromStr;

use crate::symbol::Register;

#[derive(Clone, PartialEq, Debug)]
pub enum Expr {
    Num(f64),
    Reg(Register),
    /// Identifier that is not a register. Only an error once evaluated.
    Symbol(String),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl BinOp {
    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinOp::Add => lhs + rhs,
            BinOp::Sub => lhs - rhs,
            BinOp::Mul => lhs * rhs,
            BinOp::Div => lhs / rhs,
            BinOp::Rem => lhs % rhs,
            BinOp::Pow => lhs.powf(rhs),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Pow => "**",
        }
    }
}

impl Expr {
    /// Parse a complete expression. Trailing input is an error.
    pub fn parse(text: &str) -> Result<Expr, String> {
        let toks = lex(text)?;
        let mut parser = Parser { toks, pos: 0 };
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(format!("unexpected `{tok}` in expression `{}`", text.trim())),
        }
    }

    /// Evaluate with the given register values.
    ///
    /// Fails with the name of the first non-register identifier encountered.
    pub fn eval<F>(&self, reg: &F) -> Result<f64, &str>
    where
        F: Fn(Register) -> f64,
    {
        Ok(match self {
            Expr::Num(val) => *val,
            Expr::Reg(r) => reg(*r),
            Expr::Symbol(name) => return Err(name.as_str()),
            Expr::Neg(inner) => -inner.eval(reg)?,
            Expr::Bin(op, lhs, rhs) => op.apply(lhs.eval(reg)?, rhs.eval(reg)?),
        })
    }

    /// Whether the expression references no identifiers at all.
    pub fn is_const(&self) -> bool {
        match self {
            Expr::Num(_) => true,
            Expr::Reg(_) | Expr::Symbol(_) => false,
            Expr::Neg(inner) => inner.is_const(),
            Expr::Bin(_, lhs, rhs) => lhs.is_const() && rhs.is_const(),
        }
    }
}

impl FromStr for Expr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expr::parse(s)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(val) => write!(f, "{val}"),
            Expr::Reg(reg) => write!(f, "{reg}"),
            Expr::Symbol(name) => f.write_str(name),
            Expr::Neg(inner) => write!(f, "-{inner}"),
            Expr::Bin(op, lhs, rhs) => write!(f, "({lhs}{}{rhs})", op.as_str()),
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
enum Tok {
    Num(f64),
    Ident(String),
    Op(BinOp),
    Open,
    Close,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Num(val) => write!(f, "{val}"),
            Tok::Ident(name) => f.write_str(name),
            Tok::Op(op) => f.write_str(op.as_str()),
            Tok::Open => f.write_str("("),
            Tok::Close => f.write_str(")"),
        }
    }
}

fn lex(text: &str) -> Result<Vec<Tok>, String> {
    let mut toks = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        let tok = match c {
            c if c.is_whitespace() => continue,
            '0'..='9' | '.' => {
                let mut end = start + 1;
                while let Some(&(i, c)) = chars.peek() {
                    if !(c.is_ascii_digit() || c == '.') {
                        break;
                    }
                    end = i + 1;
                    chars.next();
                }
                let raw = &text[start..end];
                let val = raw
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number `{raw}`"))?;
                Tok::Num(val)
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut end = start + 1;
                while let Some(&(i, c)) = chars.peek() {
                    if !(c.is_ascii_alphanumeric() || c == '_') {
                        break;
                    }
                    end = i + 1;
                    chars.next();
                }
                Tok::Ident(text[start..end].to_string())
            }
            '+' => Tok::Op(BinOp::Add),
            '-' => Tok::Op(BinOp::Sub),
            '/' => Tok::Op(BinOp::Div),
            '%' => Tok::Op(BinOp::Rem),
            '*' => {
                if chars.peek().is_some_and(|&(_, c)| c == '*') {
                    chars.next();
                    Tok::Op(BinOp::Pow)
                } else {
                    Tok::Op(BinOp::Mul)
                }
            }
            '(' => Tok::Open,
            ')' => Tok::Close,
            other => return Err(format!("unexpected character `{other}` in expression")),
        };
        toks.push(tok);
    }
    Ok(toks)
}

/// Recursive descent over the usual precedence levels.
struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn eat_op(&mut self, ops: &[BinOp]) -> Option<BinOp> {
        match self.peek() {
            Some(Tok::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.term()?;
        while let Some(op) = self.eat_op(&[BinOp::Add, BinOp::Sub]) {
            let rhs = self.term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.eat_op(&[BinOp::Mul, BinOp::Div, BinOp::Rem]) {
            let rhs = self.unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat_op(&[BinOp::Sub]).is_some() {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat_op(&[BinOp::Add]).is_some() {
            return self.unary();
        }
        self.power()
    }

    // Right associative: 2 ** 3 ** 2 == 2 ** 9
    fn power(&mut self) -> Result<Expr, String> {
        let base = self.atom()?;
        if self.eat_op(&[BinOp::Pow]).is_some() {
            let exp = self.unary()?;
            return Ok(Expr::Bin(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, String> {
        let tok = self
            .toks
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;
        match tok {
            Tok::Num(val) => Ok(Expr::Num(val)),
            Tok::Ident(name) => Ok(match name.parse::<Register>() {
                Ok(reg) => Expr::Reg(reg),
                Err(()) => Expr::Symbol(name),
            }),
            Tok::Open => {
                let inner = self.expr()?;
                match self.peek() {
                    Some(Tok::Close) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err("unclosed parenthesis in expression".to_string()),
                }
            }
            other => Err(format!("unexpected `{other}` in expression")),
        }
    }
}
