use std::fmt;
use std::str::FromStr;

use crate::error::{CompileError, RuntimeError};
use crate::expr::Expr;
use crate::runtime::{Machine, Memory, Snapshot};
use crate::symbol::{normalize, Builtin, Cond, FxMap, Register};

/// Compiled program: instructions plus everything needed to run them.
///
/// Immutable once built; may be executed any number of times.
#[derive(Clone, Debug)]
pub struct Program {
    code: Vec<Instruction>,
    /// Source line of each instruction
    lines: Vec<usize>,
    /// Uppercased jump label -> instruction index
    jumps: FxMap<String, usize>,
    /// Index to start execution at
    entry: usize,
    /// Memory contents at the start of every run
    entry_memory: Memory,
    src: String,
}

impl Program {
    pub(crate) fn new(
        code: Vec<Instruction>,
        lines: Vec<usize>,
        jumps: FxMap<String, usize>,
        entry: usize,
        entry_memory: Memory,
    ) -> Self {
        debug_assert_eq!(code.len(), lines.len());
        Program {
            code,
            lines,
            jumps,
            entry,
            entry_memory,
            src: String::new(),
        }
    }

    pub(crate) fn with_source(mut self, src: &str) -> Self {
        self.src = src.to_string();
        self
    }

    pub fn get(&self, idx: usize) -> Option<&Instruction> {
        self.code.get(idx)
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Source line of the instruction at `idx`. Past the end, the last line.
    pub fn line_of(&self, idx: usize) -> usize {
        self.lines
            .get(idx)
            .or(self.lines.last())
            .copied()
            .unwrap_or(1)
    }

    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn entry_memory(&self) -> &Memory {
        &self.entry_memory
    }

    /// Instruction index of a jump label, ignoring case.
    pub fn jump_target(&self, label: &str) -> Option<usize> {
        self.jumps.get(&normalize(label)).copied()
    }

    pub fn source(&self) -> &str {
        &self.src
    }

    /// Run once against the terminal.
    pub fn exec(&self) -> Result<Snapshot, RuntimeError> {
        Machine::new(self).exec()
    }
}

impl FromStr for Program {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::compile(s)
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.code.iter()
    }
}

/// Listing with jump labels, instruction indices and source lines.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, instr) in self.code.iter().enumerate() {
            self.write_labels(f, idx)?;
            writeln!(f, "{idx:>5} {:>5}    {instr}", self.lines[idx])?;
        }
        // Labels after the last instruction point at the halting index
        self.write_labels(f, self.code.len())
    }
}

impl Program {
    fn write_labels(&self, f: &mut fmt::Formatter<'_>, idx: usize) -> fmt::Result {
        for (label, _) in self.jumps.iter().filter(|(_, &target)| target == idx) {
            writeln!(f, "{label}:")?;
        }
        Ok(())
    }
}

/// Operand reference. Addresses are re-evaluated on every access.
#[derive(Clone, PartialEq, Debug)]
pub enum Operand {
    Address(Expr),
    Number(f64),
    Register(Register),
    /// Identifier that names no register. Fails when accessed.
    Symbol(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Address(expr) => write!(f, "[{expr}]"),
            Operand::Number(val) => write!(f, "{val}"),
            Operand::Register(reg) => write!(f, "{reg}"),
            Operand::Symbol(name) => f.write_str(name),
        }
    }
}

/// Destination of a jump or call.
#[derive(Clone, PartialEq, Debug)]
pub enum Target {
    /// Jump label, resolved when executed. Holds the name as written.
    Label(String),
    /// Number or address holding an instruction index.
    Index(Operand),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Label(name) => f.write_str(name),
            Target::Index(operand) => write!(f, "{operand}"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Inc,
    Dec,
    Not,
    Neg,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    /// Shift left (`SAL`/`SHL`)
    Shl,
    /// Arithmetic shift right
    Sar,
    /// Logical shift right
    Shr,
}

/// Single compiled instruction.
#[derive(Clone, PartialEq, Debug)]
pub enum Instruction {
    /// `dest := src`
    Move { dest: Operand, src: Operand },
    /// `dest := address of src`
    LoadEAddr { dest: Operand, src: Expr },
    Unary { op: UnaryOp, dest: Operand },
    Binary { op: BinaryOp, dest: Operand, src: Operand },
    Exchange { lhs: Operand, rhs: Operand },
    /// Set flags from `lhs - rhs`
    Compare { lhs: Operand, rhs: Operand },
    /// Set flags from `lhs & rhs`
    Test { lhs: Operand, rhs: Operand },
    Push { src: Operand },
    Pop { dest: Operand },
    Call { target: Target },
    CallBuiltin { builtin: Builtin },
    Return,
    Jump { cond: Cond, target: Target },
    Exit,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Move { dest, src } => write!(f, "MOV {dest}, {src}"),
            Instruction::LoadEAddr { dest, src } => write!(f, "LEA {dest}, [{src}]"),
            Instruction::Unary { op, dest } => {
                let name = match op {
                    UnaryOp::Inc => "INC",
                    UnaryOp::Dec => "DEC",
                    UnaryOp::Not => "NOT",
                    UnaryOp::Neg => "NEG",
                };
                write!(f, "{name} {dest}")
            }
            Instruction::Binary { op, dest, src } => {
                let name = match op {
                    BinaryOp::Add => "ADD",
                    BinaryOp::Sub => "SUB",
                    BinaryOp::Mul => "MUL",
                    BinaryOp::Div => "DIV",
                    BinaryOp::And => "AND",
                    BinaryOp::Or => "OR",
                    BinaryOp::Xor => "XOR",
                    BinaryOp::Shl => "SHL",
                    BinaryOp::Sar => "SAR",
                    BinaryOp::Shr => "SHR",
                };
                write!(f, "{name} {dest}, {src}")
            }
            Instruction::Exchange { lhs, rhs } => write!(f, "XCHG {lhs}, {rhs}"),
            Instruction::Compare { lhs, rhs } => write!(f, "CMP {lhs}, {rhs}"),
            Instruction::Test { lhs, rhs } => write!(f, "TEST {lhs}, {rhs}"),
            Instruction::Push { src } => write!(f, "PUSH {src}"),
            Instruction::Pop { dest } => write!(f, "POP {dest}"),
            Instruction::Call { target } => write!(f, "CALL {target}"),
            Instruction::CallBuiltin { builtin } => write!(f, "CALL {}", builtin.name()),
            Instruction::Return => f.write_str("RET"),
            Instruction::Jump { cond, target } => write!(f, "{} {target}", cond.mnemonic()),
            Instruction::Exit => f.write_str("EXIT"),
        }
    }
}
