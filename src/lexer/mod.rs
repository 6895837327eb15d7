use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{self, CompileError};
use crate::expr::Expr;
use crate::lexer::cursor::Cursor;

pub mod cursor;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Whitespace,
    LineBreak,
    /// `[expr]`
    Address,
    Number,
    Comma,
    /// `name:`
    JumpLabel,
    Ident,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Whitespace => "whitespace",
            TokenKind::LineBreak => "line break",
            TokenKind::Address => "address",
            TokenKind::Number => "number",
            TokenKind::Comma => "comma",
            TokenKind::JumpLabel => "jump label",
            TokenKind::Ident => "identifier",
        };
        f.write_str(name)
    }
}

/// Payload of a token. Numbers are normalized while lexing.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    None,
    Number(f64),
    Address(Expr),
    /// Identifier or jump label name, as written.
    Name(String),
}

#[derive(Clone, PartialEq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub value: Value,
    /// 1-based line in the source
    pub line: usize,
    /// Raw matched text, with address brackets and label colons stripped
    pub text: String,
}

impl Token {
    pub fn name(&self) -> Option<&str> {
        match &self.value {
            Value::Name(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::LineBreak => write!(f, "\"\\n\" ({})", self.kind),
            TokenKind::Address => write!(f, "\"[{}]\" ({})", self.text, self.kind),
            _ => write!(f, "\"{}\" ({})", self.text, self.kind),
        }
    }
}

lazy_static! {
    /// Tried in order, first match wins.
    static ref PATTERNS: [(TokenKind, Regex); 7] = [
        (TokenKind::Whitespace, Regex::new(r"^[^\S\n]+").unwrap()),
        (TokenKind::LineBreak, Regex::new(r"^\n").unwrap()),
        (TokenKind::Address, Regex::new(r"^\[[^\[\]\n]*\]").unwrap()),
        (TokenKind::Number, Regex::new(r"^(?:-[^\S\n]*)?\d+(?:\.\d+)?").unwrap()),
        (TokenKind::Comma, Regex::new(r"^,").unwrap()),
        (TokenKind::JumpLabel, Regex::new(r"^[_A-Za-z][_A-Za-z\d]*:").unwrap()),
        (TokenKind::Ident, Regex::new(r"^[_A-Za-z][_A-Za-z\d]*").unwrap()),
    ];
}

/// Split preprocessed source into tokens. Whitespace is dropped.
pub fn tokenize(input: &str) -> Result<Vec<Token>, CompileError> {
    let mut cur = Cursor::new(input);
    let mut toks = Vec::new();
    while !cur.is_eof() {
        if let Some(tok) = cur.advance_token()? {
            toks.push(tok);
        }
    }
    Ok(toks)
}

impl Cursor<'_> {
    /// Match the next token. `None` for whitespace.
    pub fn advance_token(&mut self) -> Result<Option<Token>, CompileError> {
        let rest = self.at_curr_pt();
        let line = self.line();
        let Some((kind, matched)) = PATTERNS
            .iter()
            .find_map(|(kind, re)| re.find(rest).map(|m| (*kind, m.as_str())))
        else {
            return Err(error::lex_unknown(line, self.rest_of_line()));
        };
        self.advance(matched.len());

        let (value, text) = match kind {
            TokenKind::Whitespace => return Ok(None),
            TokenKind::LineBreak | TokenKind::Comma => (Value::None, matched.to_string()),
            TokenKind::Address => {
                let inner = matched[1..matched.len() - 1].trim();
                let expr = Expr::parse(inner)
                    .map_err(|reason| error::lex_bad_address(line, inner, &reason))?;
                (Value::Address(expr), inner.to_string())
            }
            TokenKind::Number => {
                let digits = matched.replace(char::is_whitespace, "");
                let val = digits
                    .parse::<f64>()
                    .map_err(|_| error::lex_unknown(line, matched))?;
                (Value::Number(val), digits)
            }
            TokenKind::JumpLabel => {
                let name = &matched[..matched.len() - 1];
                (Value::Name(name.to_string()), name.to_string())
            }
            TokenKind::Ident => (Value::Name(matched.to_string()), matched.to_string()),
        };
        Ok(Some(Token {
            kind,
            value,
            line,
            text,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Register;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().iter().map(|tok| tok.kind).collect()
    }

    #[test]
    fn instruction_line() {
        use TokenKind::*;
        assert_eq!(
            kinds("MOV areg, [sreg + 1]\n"),
            vec![Ident, Ident, Comma, Address, LineBreak]
        );
        assert_eq!(kinds("loop:\nJMP loop\n"), vec![JumpLabel, LineBreak, Ident, Ident, LineBreak]);
    }

    #[test]
    fn numbers_are_normalized() {
        let toks = tokenize("PUSH - 12.5\n").unwrap();
        assert_eq!(toks[1].value, Value::Number(-12.5));
        let toks = tokenize("MOV areg, [42]\n").unwrap();
        assert_eq!(toks[3].value, Value::Address(Expr::Num(42.0)));
    }

    #[test]
    fn address_keeps_registers() {
        let toks = tokenize("[sreg-1]").unwrap();
        match &toks[0].value {
            Value::Address(expr) => {
                assert!(!expr.is_const());
                assert_eq!(expr.eval(&|r| if r == Register::S { 10.0 } else { 0.0 }), Ok(9.0));
            }
            other => panic!("expected address, found {other:?}"),
        }
    }

    #[test]
    fn lines_are_tracked() {
        let toks = tokenize("\n\nEXIT\n").unwrap();
        assert_eq!(toks[2].line, 3);
        assert_eq!(toks[2].name(), Some("EXIT"));
    }

    #[test]
    fn unknown_token() {
        let err = tokenize("MOV areg, 1\nMOV areg, #3\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("#3"));
    }

    #[test]
    fn malformed_address() {
        let err = tokenize("MOV areg, [sreg +]\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(tokenize("MOV areg, [sreg\n").is_err());
    }
}
