use std::error::Error;
use std::fmt;

use miette::{Diagnostic, LabeledSpan, Severity, SourceCode};

use crate::lexer::{Token, TokenKind};
use crate::runtime::Snapshot;
use crate::span::Span;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// Malformed source text. Compile time only.
    Syntax,
    /// Undefined label, builtin, register or identifier.
    Reference,
    /// Instruction pointer or address outside of the valid range. Run time only.
    Range,
    /// Step budget given to the machine ran out. Run time only.
    StepLimit,
}

impl ErrorKind {
    fn code(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "lila::syntax",
            ErrorKind::Reference => "lila::reference",
            ErrorKind::Range => "lila::range",
            ErrorKind::StepLimit => "lila::step_limit",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "invalid syntax",
            ErrorKind::Reference => "invalid reference",
            ErrorKind::Range => "out of range",
            ErrorKind::StepLimit => "step limit reached",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Range => "RangeError",
            ErrorKind::StepLimit => "StepLimitError",
        };
        f.write_str(name)
    }
}

/// Failure while preprocessing, lexing or parsing. No program is produced.
#[derive(Clone, PartialEq, Debug)]
pub struct CompileError {
    pub kind: ErrorKind,
    /// 1-based source line.
    pub line: usize,
    pub message: String,
    help: Option<String>,
    src: Option<String>,
}

impl CompileError {
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        CompileError {
            kind: ErrorKind::Syntax,
            line,
            message: message.into(),
            help: None,
            src: None,
        }
    }

    pub fn reference(line: usize, message: impl Into<String>) -> Self {
        CompileError {
            kind: ErrorKind::Reference,
            ..CompileError::syntax(line, message)
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Attach the original source so the diagnostic can point at the line.
    pub fn with_source(mut self, src: &str) -> Self {
        self.src = Some(src.to_string());
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on line {}: {}", self.kind, self.line, self.message)
    }
}

impl Error for CompileError {}

impl Diagnostic for CompileError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind.code()))
    }

    fn severity(&self) -> Option<Severity> {
        Some(Severity::Error)
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.help
            .as_ref()
            .map(|help| Box::new(help) as Box<dyn fmt::Display + 'a>)
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.src.as_ref().map(|src| src as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let src = self.src.as_ref()?;
        let span = Span::of_line(src, self.line);
        Some(Box::new(std::iter::once(LabeledSpan::at(
            span,
            self.kind.label(),
        ))))
    }
}

// Lexer errors

pub fn lex_unknown(line: usize, fragment: &str) -> CompileError {
    CompileError::syntax(line, format!("Unknown token ({fragment})."))
        .with_help("check for stray characters or unbalanced brackets")
}

pub fn lex_bad_address(line: usize, text: &str, reason: &str) -> CompileError {
    CompileError::syntax(line, format!("Malformed address [{text}]: {reason}."))
        .with_help("addresses hold an arithmetic expression like [sreg + 1]")
}

// Preprocessor errors

pub fn preproc_bad_arith(line: usize, expr: &str, reason: &str) -> CompileError {
    CompileError::syntax(
        line,
        format!("Malformed arithmetic expression ({expr}): {reason}."),
    )
}

pub fn preproc_underscore_label(line: usize, name: &str) -> CompileError {
    CompileError::syntax(
        line,
        format!("The macro label \"{name}\" may not start with an underscore."),
    )
    .with_help("identifiers starting with underscores are reserved for builtin routines")
}

pub fn preproc_register_label(line: usize, name: &str) -> CompileError {
    CompileError::syntax(
        line,
        format!("The macro label \"{name}\" is in conflict with the identifier of a register."),
    )
}

pub fn preproc_duplicate_label(line: usize, name: &str) -> CompileError {
    CompileError::syntax(line, format!("The label \"{name}\" is already defined."))
        .with_help("labels may only be defined once per program")
}

pub fn preproc_bad_pseudo(line: usize, op: &str) -> CompileError {
    let help = match op {
        "RESC" => "RESC expects a single non-negative literal, like `RESC 16`",
        _ => "DEFC expects a comma separated list of literals, like `DEFC 1, 2, 3`",
    };
    CompileError::syntax(line, format!("Malformed pseudo-instruction {op}.")).with_help(help)
}

pub fn preproc_alloc_overflow(line: usize, op: &str) -> CompileError {
    CompileError::syntax(line, format!("{op} reserves memory past the addressable range."))
        .with_help("reserved cells are numbered from 0 and must stay below 2^63")
}

// Parser errors

pub fn parse_unexpected(found: &Token, expected: &[TokenKind]) -> CompileError {
    let expected = expected
        .iter()
        .map(|kind| match kind {
            TokenKind::LineBreak => "end of instruction".to_string(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" or ");
    CompileError::syntax(
        found.line,
        format!("Got unexpected token {found}. Expected {expected}."),
    )
    .with_help("check the operands allowed for this instruction")
}

pub fn parse_eof(line: usize) -> CompileError {
    CompileError::syntax(line, "Unexpected end of input.")
        .with_help("you may be missing operands in your last statement")
}

pub fn parse_unknown_instr(found: &Token, known: &[&str]) -> CompileError {
    CompileError::syntax(
        found.line,
        format!("Unknown instruction {found}. Expected one of {}.", known.join(", ")),
    )
}

pub fn parse_unknown_builtin(found: &Token) -> CompileError {
    CompileError::reference(
        found.line,
        format!("Attempted call to undefined integrated function {found}."),
    )
    .with_help("available builtins are _PRINT and _READ")
}

pub fn parse_duplicate_label(found: &Token) -> CompileError {
    CompileError::syntax(found.line, format!("Duplicate jump label {found}."))
        .with_help("jump labels are only allowed once per program")
}

/// Failure while executing a program.
///
/// Carries the machine state at the moment of the fault, for diagnostics.
#[derive(Clone, PartialEq, Debug)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    /// 1-based source line of the faulting instruction.
    pub line: usize,
    pub message: String,
    pub state: Box<Snapshot>,
    src: Option<String>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, line: usize, message: String, state: Snapshot) -> Self {
        RuntimeError {
            kind,
            line,
            message,
            state: Box::new(state),
            src: None,
        }
    }

    pub fn with_source(mut self, src: &str) -> Self {
        self.src = Some(src.to_string());
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on line {}: {}", self.kind, self.line, self.message)
    }
}

impl Error for RuntimeError {}

impl Diagnostic for RuntimeError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind.code()))
    }

    fn severity(&self) -> Option<Severity> {
        Some(Severity::Error)
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let help = match self.kind {
            ErrorKind::Range => "jump targets must be instruction indices within the program",
            ErrorKind::Reference => "check that the label, register or identifier exists",
            ErrorKind::StepLimit => "the program may be stuck in an infinite loop",
            ErrorKind::Syntax => return None,
        };
        Some(Box::new(help))
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.src.as_ref().map(|src| src as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let src = self.src.as_ref()?;
        let span = Span::of_line(src, self.line);
        Some(Box::new(std::iter::once(LabeledSpan::at(
            span,
            self.kind.label(),
        ))))
    }
}
