//! Text-to-text rewriting that runs before lexing.
//!
//! Removes comments, turns strings into character code lists, resolves `$`, constant labels and
//! constant arithmetic, and expands the `RESC`/`DEFC` pseudo-instructions. Line structure is
//! preserved so diagnostics keep pointing at the right source line.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::error::{self, CompileError};
use crate::expr::Expr;
use crate::runtime::Memory;
use crate::symbol::{new_map, normalize, FxMap, Register};

lazy_static! {
    static ref COMMENT: Regex = Regex::new(r";[^\n]*").unwrap();
    static ref STRING: Regex = Regex::new(r#""[^"\n]+"|'[^'\n]+'"#).unwrap();
    static ref RESC: Regex = Regex::new(r"(?i)\bRESC[^\S\n]+(\d+(?:\.\d+)?)").unwrap();
    static ref DEFC: Regex = Regex::new(
        r"(?i)\bDEFC[^\S\n]+(-?\d+(?:\.\d+)?(?:[^\S\n]*,[^\S\n]*-?\d+(?:\.\d+)?)*)"
    )
    .unwrap();
    static ref NUMBER: Regex = Regex::new(r"-?\d+(?:\.\d+)?").unwrap();
    static ref RESC_WORD: Regex = Regex::new(r"(?i)\bRESC\b").unwrap();
    static ref DEFC_WORD: Regex = Regex::new(r"(?i)\bDEFC\b").unwrap();
    static ref PSEUDO_LINE: Regex = Regex::new(r"(?i)^(?:RESC|DEFC)\b").unwrap();
    static ref DECLARATION: Regex =
        Regex::new(r"^([_A-Za-z][_A-Za-z\d]*):[^\S\n]*(-?\d+(?:\.\d+)?)[^\S\n]*$").unwrap();
}

/// Source ready for the lexer, plus memory contents defined with `DEFC`.
#[derive(Debug)]
pub struct Preprocessed {
    pub text: String,
    pub entry_memory: Memory,
}

/// Preprocess with the default set of register names reserved.
pub fn preprocess(src: &str) -> Result<Preprocessed, CompileError> {
    Preprocessor::new(&Register::NAMES).run(src)
}

pub struct Preprocessor<'r> {
    /// Names that constant labels may not take
    reserved: &'r [&'r str],
    /// Next free memory address
    alloc: i64,
    /// Uppercased constant name -> replacement text
    constants: FxMap<String, String>,
    entry_memory: Memory,
}

impl<'r> Preprocessor<'r> {
    pub fn new(reserved: &'r [&'r str]) -> Self {
        Preprocessor {
            reserved,
            alloc: 0,
            constants: new_map(),
            entry_memory: Memory::new(),
        }
    }

    pub fn run(mut self, src: &str) -> Result<Preprocessed, CompileError> {
        let src = src.replace("\r\n", "\n");
        let src = COMMENT.replace_all(&src, "");
        let src = STRING.replace_all(&src, |caps: &Captures| {
            let quoted = &caps[0];
            quoted[1..quoted.len() - 1]
                .encode_utf16()
                .map(|unit| unit.to_string())
                .collect::<Vec<_>>()
                .join(",")
        });

        let mut lines = Vec::new();
        for (i, line) in src.split('\n').enumerate() {
            lines.push(self.process_line(i + 1, line.trim())?);
        }

        let mut text = lines.join("\n");
        text.push('\n');
        Ok(Preprocessed {
            text,
            entry_memory: self.entry_memory,
        })
    }

    fn process_line(&mut self, line: usize, text: &str) -> Result<String, CompileError> {
        if text.is_empty() {
            return Ok(String::new());
        }
        let text = self.replace_dollar(text);
        let text = self.substitute(&text);
        let text = fold(line, &text)?;

        // Bare pseudo-ops only allocate
        let is_pseudo_line = PSEUDO_LINE.is_match(&text);
        let text = self.reserve(line, &text)?;
        let text = self.define(line, &text)?;
        if is_pseudo_line {
            return Ok(String::new());
        }
        self.declare(line, &text)
    }

    /// `$` is only recognized between operators, whitespace or line boundaries.
    fn replace_dollar(&self, text: &str) -> String {
        let is_delim = |c: Option<char>| c.map_or(true, |c| is_operator(c) || c.is_whitespace());
        let mut out = String::with_capacity(text.len());
        for (i, c) in text.char_indices() {
            if c == '$'
                && is_delim(text[..i].chars().next_back())
                && is_delim(text[i + 1..].chars().next())
            {
                out.push_str(&self.alloc.to_string());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Replace known constants, except in front of a `:`.
    fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for lx in scan(text) {
            let word = &text[lx.start..lx.end];
            if lx.piece == Piece::Ident && !text[lx.end..].contains(':') {
                if let Some(val) = self.constants.get(&normalize(word)) {
                    out.push_str(val);
                    continue;
                }
            }
            out.push_str(word);
        }
        out
    }

    /// `RESC n`
    fn reserve(&mut self, line: usize, text: &str) -> Result<String, CompileError> {
        let alloc = &mut self.alloc;
        let mut overflow = false;
        let out = RESC.replace_all(text, |caps: &Captures| {
            let start = *alloc;
            let size = caps[1].parse::<f64>().map_or(0, |n| n.trunc() as i64);
            match alloc.checked_add(size) {
                Some(next) => *alloc = next,
                None => overflow = true,
            }
            start.to_string()
        });
        if overflow {
            return Err(error::preproc_alloc_overflow(line, "RESC"));
        }
        if RESC_WORD.is_match(&out) {
            return Err(error::preproc_bad_pseudo(line, "RESC"));
        }
        Ok(out.into_owned())
    }

    /// `DEFC v1, v2, ...`
    fn define(&mut self, line: usize, text: &str) -> Result<String, CompileError> {
        let alloc = &mut self.alloc;
        let memory = &mut self.entry_memory;
        let mut overflow = false;
        let out = DEFC.replace_all(text, |caps: &Captures| {
            let start = *alloc;
            for val in NUMBER.find_iter(&caps[1]) {
                let Some(next) = alloc.checked_add(1) else {
                    overflow = true;
                    break;
                };
                memory.insert(*alloc, val.as_str().parse().unwrap_or(0.0));
                *alloc = next;
            }
            start.to_string()
        });
        if overflow {
            return Err(error::preproc_alloc_overflow(line, "DEFC"));
        }
        if DEFC_WORD.is_match(&out) {
            return Err(error::preproc_bad_pseudo(line, "DEFC"));
        }
        Ok(out.into_owned())
    }

    /// `name: literal` registers a constant and erases the line.
    fn declare(&mut self, line: usize, text: &str) -> Result<String, CompileError> {
        let Some(caps) = DECLARATION.captures(text) else {
            return Ok(text.to_string());
        };
        let name = &caps[1];
        if name.starts_with('_') {
            return Err(error::preproc_underscore_label(line, name));
        }
        if self.reserved.iter().any(|r| r.eq_ignore_ascii_case(name)) {
            return Err(error::preproc_register_label(line, name));
        }
        let key = normalize(name);
        if self.constants.contains_key(&key) {
            return Err(error::preproc_duplicate_label(line, name));
        }
        self.constants.insert(key, caps[2].to_string());
        Ok(String::new())
    }
}

fn is_operator(c: char) -> bool {
    matches!(c, '+' | '-' | '*' | '/' | '%')
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Piece {
    Num,
    Ident,
    Op,
    Paren,
    Space,
    Other,
}

/// Lexeme of a single preprocessed line, by byte range.
#[derive(Clone, Copy, Debug)]
struct Lexeme {
    piece: Piece,
    start: usize,
    end: usize,
}

/// Cut a line into lexemes that cover it completely.
fn scan(text: &str) -> Vec<Lexeme> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        let take_while = |mut j: usize, f: fn(u8) -> bool| {
            while j < bytes.len() && f(bytes[j]) {
                j += 1;
            }
            j
        };
        let piece = match bytes[i] {
            b'0'..=b'9' => {
                i = take_while(i, |b| b.is_ascii_digit());
                if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
                    i = take_while(i + 1, |b| b.is_ascii_digit());
                }
                Piece::Num
            }
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => {
                i = take_while(i, |b| b.is_ascii_alphanumeric() || b == b'_');
                Piece::Ident
            }
            b'+' | b'-' | b'*' | b'/' | b'%' => {
                // `**` and friends count as one operator
                i += if bytes.get(i + 1) == Some(&b'*') { 2 } else { 1 };
                Piece::Op
            }
            b'(' | b')' => {
                i += 1;
                Piece::Paren
            }
            b' ' | b'\t' => {
                i = take_while(i, |b| b == b' ' || b == b'\t');
                Piece::Space
            }
            _ => {
                // Keep multi-byte characters whole
                i += text[i..].chars().next().map_or(1, char::len_utf8);
                Piece::Other
            }
        };
        out.push(Lexeme {
            piece,
            start,
            end: i,
        });
    }
    out
}

fn skip(lxs: &[Lexeme], mut i: usize, piece: Piece) -> usize {
    while lxs.get(i).is_some_and(|lx| lx.piece == piece) {
        i += 1;
    }
    i
}

/// Operand of an arithmetic run: parens, an optionally negated number or an identifier, parens.
/// Returns the lexeme after the operand and whether it was an identifier.
fn operand(text: &str, lxs: &[Lexeme], i: usize) -> Option<(usize, bool)> {
    let mut j = i;
    if lxs.get(j)?.piece == Piece::Paren {
        j = skip(lxs, skip(lxs, j, Piece::Paren), Piece::Space);
    }
    let lx = lxs.get(j)?;
    let is_ident = match lx.piece {
        Piece::Ident => true,
        Piece::Num => false,
        Piece::Op if &text[lx.start..lx.end] == "-" => {
            let k = skip(lxs, j + 1, Piece::Space);
            if lxs.get(k)?.piece != Piece::Num {
                return None;
            }
            j = k;
            false
        }
        _ => return None,
    };
    j += 1;
    let k = skip(lxs, j, Piece::Space);
    if lxs.get(k).is_some_and(|lx| lx.piece == Piece::Paren) {
        j = skip(lxs, k, Piece::Paren);
    }
    Some((j, is_ident))
}

/// Longest `operand (op operand)+` run starting at `i`.
fn arith_run(text: &str, lxs: &[Lexeme], i: usize) -> Option<(usize, bool)> {
    let (mut end, mut has_ident) = operand(text, lxs, i)?;
    let mut ops = 0;
    loop {
        let k = skip(lxs, end, Piece::Space);
        if !lxs.get(k).is_some_and(|lx| lx.piece == Piece::Op) {
            break;
        }
        let Some((next, is_ident)) = operand(text, lxs, skip(lxs, k + 1, Piece::Space)) else {
            break;
        };
        end = next;
        has_ident |= is_ident;
        ops += 1;
    }
    (ops > 0).then_some((end, has_ident))
}

/// Replace constant arithmetic with its value. Runs mentioning identifiers are kept for run
/// time evaluation.
fn fold(line: usize, text: &str) -> Result<String, CompileError> {
    let lxs = scan(text);
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < lxs.len() {
        // The leading word is a mnemonic, never an operand
        let run = if i == 0 && lxs[0].piece == Piece::Ident {
            None
        } else {
            arith_run(text, &lxs, i)
        };
        match run {
            Some((end, has_ident)) => {
                let run = &text[lxs[i].start..lxs[end - 1].end];
                if has_ident {
                    out.push_str(run);
                } else {
                    out.push_str(&eval_const(line, run)?);
                }
                i = end;
            }
            None => {
                out.push_str(&text[lxs[i].start..lxs[i].end]);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn eval_const(line: usize, run: &str) -> Result<String, CompileError> {
    let expr = Expr::parse(run).map_err(|reason| error::preproc_bad_arith(line, run, &reason))?;
    let val = expr
        .eval(&|_| 0.0)
        .map_err(|name| error::preproc_bad_arith(line, run, &format!("unknown `{name}`")))?;
    if !val.is_finite() {
        return Err(error::preproc_bad_arith(
            line,
            run,
            "result is not a finite number",
        ));
    }
    Ok(val.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(src: &str) -> String {
        preprocess(src).unwrap().text
    }

    #[test]
    fn comments_and_blank_lines_keep_line_count() {
        let out = text("; header\n\n  MOV areg, 1 ; set\r\nEXIT");
        assert_eq!(out, "\n\nMOV areg, 1\nEXIT\n");
    }

    #[test]
    fn strings_become_char_codes() {
        assert_eq!(text("PUSH \"Hi\""), "PUSH 72,105\n");
        assert_eq!(text("PUSH 'a'"), "PUSH 97\n");
    }

    #[test]
    fn constants_are_substituted() {
        let out = text("size: 4\nMOV areg, SIZE\nMOV breg, [size + sreg]");
        assert_eq!(out, "\nMOV areg, 4\nMOV breg, [4 + sreg]\n");
    }

    #[test]
    fn constants_can_use_earlier_constants() {
        let out = text("a: 1\nb: a\nMOV areg, b");
        assert_eq!(out, "\n\nMOV areg, 1\n");
    }

    #[test]
    fn arithmetic_is_folded() {
        assert_eq!(text("MOV areg, 2 + 3 * 4"), "MOV areg, 14\n");
        assert_eq!(text("MOV areg, (2 + 3) * 4"), "MOV areg, 20\n");
        assert_eq!(text("MOV areg, 7 / 2"), "MOV areg, 3.5\n");
        assert_eq!(text("MOV areg, -2 * 3"), "MOV areg, -6\n");
        assert_eq!(text("MOV [2 * 8], 1"), "MOV [16], 1\n");
    }

    #[test]
    fn mnemonic_does_not_join_arithmetic() {
        assert_eq!(text("PUSH -1 + 2"), "PUSH 1\n");
        assert_eq!(text("PUSH - 3 * 2"), "PUSH -6\n");
    }

    #[test]
    fn arithmetic_with_registers_is_kept() {
        assert_eq!(text("MOV areg, [sreg * 2 + 1]"), "MOV areg, [sreg * 2 + 1]\n");
        assert_eq!(text("MOV areg, [sreg-1]"), "MOV areg, [sreg-1]\n");
    }

    #[test]
    fn malformed_arithmetic() {
        let err = preprocess("EXIT\nMOV areg, (2 + 3").unwrap_err();
        assert_eq!(err.line, 2);
        let err = preprocess("MOV areg, 1 / 0").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn reserve_chunks() {
        let out = preprocess("buf: RESC 4\nnext: RESC 2\nMOV areg, next").unwrap();
        assert_eq!(out.text, "\n\nMOV areg, 4\n");
        assert!(out.entry_memory.is_empty());
    }

    #[test]
    fn define_chunks() {
        let out = preprocess("RESC 2\ndata: DEFC 1, 2, 3\nMOV areg, data\nMOV breg, $").unwrap();
        assert_eq!(out.text, "\n\nMOV areg, 2\nMOV breg, 5\n");
        let cells: Vec<_> = out.entry_memory.into_iter().collect();
        assert_eq!(cells, vec![(2, 1.0), (3, 2.0), (4, 3.0)]);
    }

    #[test]
    fn dollar_on_a_define_line_is_its_start_address() {
        let out = preprocess("RESC 3\narr: DEFC 7, $\nMOV areg, arr").unwrap();
        assert_eq!(out.text, "\n\nMOV areg, 3\n");
        let cells: Vec<_> = out.entry_memory.into_iter().collect();
        assert_eq!(cells, vec![(3, 7.0), (4, 3.0)]);
    }

    #[test]
    fn define_inside_an_operand() {
        let out = preprocess("MOV areg, DEFC 1,2,3\nMOV breg, $ - 3").unwrap();
        assert_eq!(out.text, "MOV areg, 0\nMOV breg, 0\n");
    }

    #[test]
    fn strings_can_be_defined() {
        let out = preprocess("msg: DEFC \"ok\"\nlen: $ - msg\nMOV breg, len").unwrap();
        assert_eq!(out.text, "\n\nMOV breg, 2\n");
        assert_eq!(out.entry_memory.get(&0), Some(&111.0));
        assert_eq!(out.entry_memory.get(&1), Some(&107.0));
    }

    #[test]
    fn dollar_needs_delimiters() {
        assert_eq!(text("MOV areg, [$]"), "MOV areg, [$]\n");
        assert_eq!(text("MOV areg, $+1"), "MOV areg, 1\n");
    }

    #[test]
    fn bad_labels() {
        let err = preprocess("\n_x: 1").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("underscore"));
        let err = preprocess("AREG: 1").unwrap_err();
        assert!(err.message.contains("register"));
        let err = preprocess("x: 1\nX: 2").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn reserved_names_are_passed_in() {
        assert!(Preprocessor::new(&["foo"]).run("foo: 1").is_err());
        assert!(Preprocessor::new(&[]).run("areg: 1").is_ok());
    }

    #[test]
    fn allocation_overflow_is_an_error() {
        let err = preprocess("RESC 1\nRESC 9999999999999999999\n").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Syntax);
        assert_eq!(err.line, 2);

        let err = preprocess("RESC 9223372036854775807\nDEFC 1, 2\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("DEFC"));
    }

    #[test]
    fn non_ascii_strings_are_utf16_units() {
        let out = preprocess("DEFC \"é😀\"").unwrap();
        let cells: Vec<_> = out.entry_memory.into_iter().collect();
        assert_eq!(cells, vec![(0, 233.0), (1, 55357.0), (2, 56832.0)]);
    }

    #[test]
    fn malformed_pseudo_ops() {
        assert!(preprocess("buf: RESC x").is_err());
        assert!(preprocess("buf: DEFC").is_err());
    }

    #[test]
    fn jump_labels_are_untouched() {
        assert_eq!(text("loop:\nJMP loop"), "loop:\nJMP loop\n");
    }
}
