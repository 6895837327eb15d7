use std::iter::Peekable;
use std::vec::IntoIter;

use crate::air::{BinaryOp, Instruction, Operand, Program, Target, UnaryOp};
use crate::error::{self, CompileError};
use crate::lexer::{Token, TokenKind, Value};
use crate::runtime::Memory;
use crate::symbol::{new_map, normalize, Builtin, Cond, FxMap, Register, ENTRY_LABEL};

use TokenKind::{Address, Comma, Ident, JumpLabel, LineBreak, Number};

/// Operands that can be written to.
const DEST: &[TokenKind] = &[Ident, Address];
/// Operands that can be read from.
const VALUE: &[TokenKind] = &[Ident, Address, Number];
const TARGET: &[TokenKind] = &[Ident, Number, Address];

/// Every accepted mnemonic, aliases included.
const MNEMONICS: &[&str] = &[
    "MOV", "MOVE", "LEA", "INC", "INCREMENT", "DEC", "DECREMENT", "ADD", "SUB", "SUBTRACT", "MUL",
    "MULTIPLY", "DIV", "DIVIDE", "AND", "OR", "XOR", "NOT", "NEG", "NEGATE", "SAL", "SHL", "SAR",
    "SHR", "XCHG", "EXCHANGE", "CMP", "COMPARE", "TEST", "PUSH", "PSH", "POP", "CALL", "RET",
    "RETURN", "EXIT", "JMP", "JUMP", "JE", "JZ", "JNE", "JNZ", "JS", "JL", "JNGE", "JNS", "JGE",
    "JNL", "JG", "JNLE", "JLE", "JNG", "JI", "JNI", "JF", "JNF",
];

/// Transforms a token stream into a [`Program`]
pub struct AsmParser {
    toks: Peekable<IntoIter<Token>>,
    code: Vec<Instruction>,
    /// Source line of each emitted instruction
    lines: Vec<usize>,
    jumps: FxMap<String, usize>,
    entry_memory: Memory,
    /// Line of the last consumed token, for end of input errors
    line: usize,
}

impl AsmParser {
    pub fn new(toks: Vec<Token>, entry_memory: Memory) -> Self {
        AsmParser {
            toks: toks.into_iter().peekable(),
            code: Vec::new(),
            lines: Vec::new(),
            jumps: new_map(),
            entry_memory,
            line: 1,
        }
    }

    /// Emit one instruction per source instruction and collect jump labels.
    pub fn parse(mut self) -> Result<Program, CompileError> {
        while let Some(tok) = self.toks.next() {
            self.line = tok.line;
            match tok.kind {
                LineBreak => continue,
                JumpLabel => {
                    self.expect(&[LineBreak])?;
                    let name = normalize(tok.name().unwrap_or_default());
                    if self.jumps.contains_key(&name) {
                        return Err(error::parse_duplicate_label(&tok));
                    }
                    self.jumps.insert(name, self.code.len());
                }
                Ident => {
                    let instr = self.parse_instr(&tok)?;
                    self.expect(&[LineBreak])?;
                    self.code.push(instr);
                    self.lines.push(tok.line);
                }
                _ => return Err(error::parse_unexpected(&tok, &[Ident, JumpLabel])),
            }
        }

        let entry = *self.jumps.entry(ENTRY_LABEL.to_string()).or_insert(0);
        Ok(Program::new(
            self.code,
            self.lines,
            self.jumps,
            entry,
            self.entry_memory,
        ))
    }

    /// Operands of the instruction named by `mnemonic`, up to the line break.
    fn parse_instr(&mut self, mnemonic: &Token) -> Result<Instruction, CompileError> {
        let name = normalize(mnemonic.name().unwrap_or_default());
        let instr = match name.as_str() {
            "MOV" | "MOVE" => {
                let (dest, src) = self.operand_pair(DEST, VALUE)?;
                Instruction::Move { dest, src }
            }
            "LEA" => {
                let dest = self.operand(DEST)?;
                self.expect(&[Comma])?;
                let src = match self.expect(&[Address])?.value {
                    Value::Address(expr) => expr,
                    _ => unreachable!("address tokens carry an expression"),
                };
                Instruction::LoadEAddr { dest, src }
            }
            "INC" | "INCREMENT" => self.unary(UnaryOp::Inc)?,
            "DEC" | "DECREMENT" => self.unary(UnaryOp::Dec)?,
            "NOT" => self.unary(UnaryOp::Not)?,
            "NEG" | "NEGATE" => self.unary(UnaryOp::Neg)?,
            "ADD" => self.binary(BinaryOp::Add)?,
            "SUB" | "SUBTRACT" => self.binary(BinaryOp::Sub)?,
            "MUL" | "MULTIPLY" => self.binary(BinaryOp::Mul)?,
            "DIV" | "DIVIDE" => self.binary(BinaryOp::Div)?,
            "AND" => self.binary(BinaryOp::And)?,
            "OR" => self.binary(BinaryOp::Or)?,
            "XOR" => self.binary(BinaryOp::Xor)?,
            "SAL" | "SHL" => self.binary(BinaryOp::Shl)?,
            "SAR" => self.binary(BinaryOp::Sar)?,
            "SHR" => self.binary(BinaryOp::Shr)?,
            "XCHG" | "EXCHANGE" => {
                let (lhs, rhs) = self.operand_pair(DEST, DEST)?;
                Instruction::Exchange { lhs, rhs }
            }
            "CMP" | "COMPARE" => {
                let (lhs, rhs) = self.operand_pair(VALUE, VALUE)?;
                Instruction::Compare { lhs, rhs }
            }
            "TEST" => {
                let (lhs, rhs) = self.operand_pair(VALUE, VALUE)?;
                Instruction::Test { lhs, rhs }
            }
            "PUSH" | "PSH" => Instruction::Push {
                src: self.operand(VALUE)?,
            },
            "POP" => Instruction::Pop {
                dest: self.operand(DEST)?,
            },
            "CALL" => self.call()?,
            "RET" | "RETURN" => Instruction::Return,
            "EXIT" => Instruction::Exit,
            other => match jump_cond(other) {
                Some(cond) => Instruction::Jump {
                    cond,
                    target: self.target()?,
                },
                None => return Err(error::parse_unknown_instr(mnemonic, MNEMONICS)),
            },
        };
        Ok(instr)
    }

    fn unary(&mut self, op: UnaryOp) -> Result<Instruction, CompileError> {
        Ok(Instruction::Unary {
            op,
            dest: self.operand(DEST)?,
        })
    }

    fn binary(&mut self, op: BinaryOp) -> Result<Instruction, CompileError> {
        let (dest, src) = self.operand_pair(DEST, VALUE)?;
        Ok(Instruction::Binary { op, dest, src })
    }

    /// `CALL _BUILTIN` is resolved here, anything else at run time.
    fn call(&mut self) -> Result<Instruction, CompileError> {
        let tok = self.expect(TARGET)?;
        match tok.name() {
            Some(name) if name.starts_with('_') => match name.parse::<Builtin>() {
                Ok(builtin) => Ok(Instruction::CallBuiltin { builtin }),
                Err(()) => Err(error::parse_unknown_builtin(&tok)),
            },
            _ => Ok(Instruction::Call {
                target: into_target(tok),
            }),
        }
    }

    fn target(&mut self) -> Result<Target, CompileError> {
        Ok(into_target(self.expect(TARGET)?))
    }

    fn operand_pair(
        &mut self,
        first: &[TokenKind],
        second: &[TokenKind],
    ) -> Result<(Operand, Operand), CompileError> {
        let lhs = self.operand(first)?;
        self.expect(&[Comma])?;
        let rhs = self.operand(second)?;
        Ok((lhs, rhs))
    }

    fn operand(&mut self, allowed: &[TokenKind]) -> Result<Operand, CompileError> {
        Ok(into_operand(self.expect(allowed)?))
    }

    /// Consume the next token if it is one of `expected`.
    fn expect(&mut self, expected: &[TokenKind]) -> Result<Token, CompileError> {
        match self.toks.next() {
            Some(tok) if expected.contains(&tok.kind) => {
                self.line = tok.line;
                Ok(tok)
            }
            Some(unexpected) => Err(error::parse_unexpected(&unexpected, expected)),
            None => Err(error::parse_eof(self.line)),
        }
    }
}

fn into_operand(tok: Token) -> Operand {
    match tok.value {
        Value::Address(expr) => Operand::Address(expr),
        Value::Number(val) => Operand::Number(val),
        Value::Name(name) => match name.parse::<Register>() {
            Ok(reg) => Operand::Register(reg),
            Err(()) => Operand::Symbol(name),
        },
        Value::None => unreachable!("operand tokens carry a value"),
    }
}

/// Identifiers always name jump labels.
fn into_target(tok: Token) -> Target {
    match tok.value {
        Value::Name(name) => Target::Label(name),
        _ => Target::Index(into_operand(tok)),
    }
}

fn jump_cond(mnemonic: &str) -> Option<Cond> {
    let cond = match mnemonic {
        "JMP" | "JUMP" => Cond::Always,
        "JE" | "JZ" => Cond::Zero,
        "JNE" | "JNZ" => Cond::NotZero,
        "JS" | "JL" | "JNGE" => Cond::Sign,
        "JNS" | "JGE" | "JNL" => Cond::NotSign,
        "JG" | "JNLE" => Cond::Greater,
        "JLE" | "JNG" => Cond::LessEqual,
        "JI" => Cond::Integral,
        "JNI" => Cond::NotIntegral,
        "JF" => Cond::Finite,
        "JNF" => Cond::NotFinite,
        _ => return None,
    };
    Some(cond)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::expr::Expr;
    use crate::lexer::tokenize;

    fn parse(src: &str) -> Result<Program, CompileError> {
        AsmParser::new(tokenize(src)?, Memory::new()).parse()
    }

    #[test]
    fn aliases_share_codegen() {
        let short = parse("MOV areg, 5\nSUB areg, 1\nPSH areg\n").unwrap();
        let long = parse("move AREG, 5\nsubtract areg, 1\npush Areg\n").unwrap();
        assert_eq!(short.get(0), long.get(0));
        assert_eq!(short.get(1), long.get(1));
        assert_eq!(short.get(2), long.get(2));
        assert_eq!(
            short.get(0),
            Some(&Instruction::Move {
                dest: Operand::Register(Register::A),
                src: Operand::Number(5.0),
            })
        );
    }

    #[test]
    fn operand_kinds() {
        let prog = parse("ADD [sreg + 1], foo\n").unwrap();
        match prog.get(0) {
            Some(Instruction::Binary { op, dest, src }) => {
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(dest, Operand::Address(_)));
                assert_eq!(*src, Operand::Symbol("foo".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn jump_labels_and_lines() {
        let prog = parse("\nstart:\nMOV areg, 1\n\nloop:\nINC areg\nJMP LOOP\n").unwrap();
        assert_eq!(prog.len(), 3);
        assert_eq!(prog.jump_target("start"), Some(0));
        assert_eq!(prog.jump_target("Loop"), Some(1));
        assert_eq!(prog.line_of(0), 3);
        assert_eq!(prog.line_of(1), 6);
        assert_eq!(prog.line_of(2), 7);
        assert_eq!(
            prog.get(2),
            Some(&Instruction::Jump {
                cond: Cond::Always,
                target: Target::Label("LOOP".to_string()),
            })
        );
    }

    #[test]
    fn entry_defaults_to_zero() {
        let prog = parse("EXIT\n").unwrap();
        assert_eq!(prog.entry(), 0);
        assert_eq!(prog.jump_target("_START"), Some(0));

        let prog = parse("MOV areg, 1\n_start:\nEXIT\n").unwrap();
        assert_eq!(prog.entry(), 1);
    }

    #[test]
    fn label_at_end_points_past_code() {
        let prog = parse("JMP done\ndone:\n").unwrap();
        assert_eq!(prog.jump_target("DONE"), Some(1));
    }

    #[test]
    fn duplicate_jump_label() {
        let err = parse("a:\nEXIT\nA:\nEXIT\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.line, 3);
    }

    #[test]
    fn label_must_end_line() {
        let err = parse("a: EXIT\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains("end of instruction"));
    }

    #[test]
    fn conditional_jumps() {
        for (src, cond) in [
            ("JZ 0\n", Cond::Zero),
            ("JNGE 0\n", Cond::Sign),
            ("JNL 0\n", Cond::NotSign),
            ("JNLE 0\n", Cond::Greater),
            ("JNG 0\n", Cond::LessEqual),
            ("JNF 0\n", Cond::NotFinite),
        ] {
            match parse(src).unwrap().get(0) {
                Some(Instruction::Jump { cond: found, .. }) => assert_eq!(*found, cond),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn builtins_resolve_at_compile_time() {
        let prog = parse("CALL _print\nCALL _READ\nCALL sub\n").unwrap();
        assert_eq!(
            prog.get(0),
            Some(&Instruction::CallBuiltin {
                builtin: Builtin::Print
            })
        );
        assert_eq!(
            prog.get(1),
            Some(&Instruction::CallBuiltin {
                builtin: Builtin::Read
            })
        );
        assert_eq!(
            prog.get(2),
            Some(&Instruction::Call {
                target: Target::Label("sub".to_string())
            })
        );

        let err = parse("\nCALL _WRITE\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Reference);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn lea_needs_address() {
        let prog = parse("LEA areg, [sreg - 2]\n").unwrap();
        assert_eq!(
            prog.get(0),
            Some(&Instruction::LoadEAddr {
                dest: Operand::Register(Register::A),
                src: Expr::parse("sreg - 2").unwrap(),
            })
        );
        assert!(parse("LEA areg, breg\n").is_err());
    }

    #[test]
    fn operand_legality() {
        assert!(parse("MOV 1, areg\n").is_err());
        assert!(parse("XCHG areg, 1\n").is_err());
        assert!(parse("CMP 1, 2\n").is_ok());
        assert!(parse("POP 3\n").is_err());
        assert!(parse("PUSH 3\n").is_ok());
        assert!(parse("RET areg\n").is_err());
        assert!(parse("MOV areg 1\n").is_err());
    }

    #[test]
    fn unknown_instruction() {
        let err = parse("EXIT\nFROB areg\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.line, 2);
        assert!(err.message.contains("FROB"));
    }

    #[test]
    fn unexpected_token_names_kind() {
        let err = parse("MOV areg, ,\n").unwrap_err();
        assert!(err.message.contains("comma"));
        assert!(err.message.contains("identifier or address or number"));
    }

    #[test]
    fn missing_operand_at_end() {
        let err = parse("\nMOV areg,").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("end of input"));
    }
}
