// Compiling
mod preprocessor;
pub use preprocessor::{preprocess, Preprocessed, Preprocessor};
mod lexer;
pub use lexer::{tokenize, Token, TokenKind, Value};
mod expr;
pub use expr::{BinOp, Expr};
mod parser;
pub use parser::AsmParser;
mod air;
pub use air::{BinaryOp, Instruction, Operand, Program, Target, UnaryOp};

// Running
mod runtime;
pub use runtime::{
    BufferConsole, Console, Flags, Machine, Memory, Registers, Snapshot, StdConsole,
};
pub mod output;

mod symbol;
pub use symbol::{Builtin, Cond, Register};

mod error;
pub use error::{CompileError, ErrorKind, RuntimeError};
mod span;

pub mod env;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;

/// Turn source text into an executable [`Program`].
pub fn compile(src: &str) -> Result<Program, CompileError> {
    let compiled = preprocess(src)
        .and_then(|pre| {
            let toks = tokenize(&pre.text)?;
            AsmParser::new(toks, pre.entry_memory).parse()
        })
        .map_err(|err| err.with_source(src))?;
    Ok(compiled.with_source(src))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_point_at_source() {
        let src = "MOV areg, 1\n\nJMP\n";
        let err = compile(src).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.line, 3);
        assert!(err.to_string().starts_with("SyntaxError on line 3"));
    }

    #[test]
    fn program_from_str() {
        let prog: Program = "; comment\nnum: 4\nMOV areg, num * 2\n".parse().unwrap();
        assert_eq!(prog.len(), 1);
        assert_eq!(prog.line_of(0), 3);
        assert_eq!(
            prog.get(0),
            Some(&Instruction::Move {
                dest: Operand::Register(Register::A),
                src: Operand::Number(8.0),
            })
        );
        assert_eq!(prog.source(), "; comment\nnum: 4\nMOV areg, num * 2\n");
    }

    #[test]
    fn listing() {
        let prog = compile("loop:\nINC areg\nJMP loop\nCALL _PRINT\n").unwrap();
        let listing = prog.to_string();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(&lines[..2], ["LOOP:", "_START:"]);
        assert!(lines[2].ends_with("INC areg"));
        assert!(lines[3].ends_with("JMP loop"));
        assert!(lines[4].ends_with("CALL _PRINT"));
    }

    #[test]
    fn listing_keeps_trailing_labels() {
        let prog = compile("JMP done\nMOV areg, 1\ndone:\n").unwrap();
        let listing = prog.to_string();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "_START:");
        assert!(lines[1].ends_with("JMP done"));
        assert_eq!(lines[3], "DONE:");
    }
}
