use std::collections::{BTreeMap, VecDeque};
use std::io::{stdin, stdout, BufRead, IsTerminal, Write};
use std::ops::{Index, IndexMut};

use console::Term;

use crate::air::{BinaryOp, Instruction, Operand, Program, Target, UnaryOp};
use crate::error::{ErrorKind, RuntimeError};
use crate::expr::Expr;
use crate::output;
use crate::symbol::{Builtin, Cond, Register};

/// Sparse memory. Absent addresses read as 0, negative addresses hold the stack.
pub type Memory = BTreeMap<i64, f64>;

/// Values of the six registers, indexed by [`Register`].
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Registers([f64; 6]);

impl Registers {
    pub fn iter(&self) -> impl Iterator<Item = (Register, f64)> + '_ {
        Register::ALL.iter().map(|&reg| (reg, self[reg]))
    }
}

impl Index<Register> for Registers {
    type Output = f64;

    fn index(&self, reg: Register) -> &f64 {
        &self.0[reg.index()]
    }
}

impl IndexMut<Register> for Registers {
    fn index_mut(&mut self, reg: Register) -> &mut f64 {
        &mut self.0[reg.index()]
    }
}

/// Condition flags, set by arithmetic, bitwise and comparison instructions.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Flags {
    /// zf
    pub zero: bool,
    /// sf
    pub sign: bool,
    /// if, result has no fractional part
    pub integer: bool,
    /// ff, result is neither infinite nor NaN
    pub finite: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            zero: true,
            sign: false,
            integer: true,
            finite: true,
        }
    }
}

impl Flags {
    pub fn of(val: f64) -> Self {
        Flags {
            zero: val == 0.0,
            sign: val < 0.0,
            integer: val.is_finite() && val.fract() == 0.0,
            finite: val.is_finite(),
        }
    }

    pub fn holds(&self, cond: Cond) -> bool {
        match cond {
            Cond::Always => true,
            Cond::Zero => self.zero,
            Cond::NotZero => !self.zero,
            Cond::Sign => self.sign,
            Cond::NotSign => !self.sign,
            Cond::Greater => !self.sign && !self.zero,
            Cond::LessEqual => self.sign || self.zero,
            Cond::Integral => self.integer,
            Cond::NotIntegral => !self.integer,
            Cond::Finite => self.finite,
            Cond::NotFinite => !self.finite,
        }
    }
}

/// Machine state after a run, or at the point of a fault.
#[derive(Clone, PartialEq, Debug)]
pub struct Snapshot {
    pub registers: Registers,
    pub flags: Flags,
    pub memory: Memory,
}

/// Host side of the `_PRINT` and `_READ` builtins.
pub trait Console {
    fn print(&mut self, text: &str);
    /// Show `prompt` and return one line of input, without the line break.
    fn read(&mut self, prompt: &str) -> String;
}

/// Terminal console. Input comes from the terminal if attached, stdin otherwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn print(&mut self, text: &str) {
        print!("{text}");
        let _ = stdout().flush();
    }

    fn read(&mut self, prompt: &str) -> String {
        self.print(prompt);
        // Failed reads count as empty input
        if stdin().is_terminal() {
            Term::stdout().read_line().unwrap_or_default()
        } else {
            let mut buf = String::new();
            let _ = stdin().lock().read_line(&mut buf);
            buf.trim_end_matches(['\n', '\r']).to_string()
        }
    }
}

/// In-memory console for tests and embedding.
#[derive(Clone, Debug, Default)]
pub struct BufferConsole {
    input: VecDeque<String>,
    output: String,
    prompts: Vec<String>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines handed out to `_READ` in order. Once exhausted, reads are empty.
    pub fn with_input<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BufferConsole {
            input: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl Console for BufferConsole {
    fn print(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn read(&mut self, prompt: &str) -> String {
        self.prompts.push(prompt.to_string());
        self.input.pop_front().unwrap_or_default()
    }
}

/// Reason an instruction could not complete.
struct Fault {
    kind: ErrorKind,
    message: String,
}

impl Fault {
    fn reference(message: String) -> Self {
        Fault {
            kind: ErrorKind::Reference,
            message,
        }
    }

    fn range(message: String) -> Self {
        Fault {
            kind: ErrorKind::Range,
            message,
        }
    }
}

/// Executes a [`Program`]. Every run starts from a fresh state.
pub struct Machine<'a, C: Console = StdConsole> {
    program: &'a Program,
    console: C,
    registers: Registers,
    flags: Flags,
    memory: Memory,
    /// Index of the next instruction
    pc: usize,
    /// Index of the instruction being executed
    prev: usize,
    trace: bool,
}

impl<'a> Machine<'a, StdConsole> {
    pub fn new(program: &'a Program) -> Self {
        Self::with_console(program, StdConsole)
    }
}

impl<'a, C: Console> Machine<'a, C> {
    pub fn with_console(program: &'a Program, console: C) -> Self {
        Machine {
            program,
            console,
            registers: Registers::default(),
            flags: Flags::default(),
            memory: program.entry_memory().clone(),
            pc: program.entry(),
            prev: program.entry(),
            trace: false,
        }
    }

    /// Print each executed instruction to stderr.
    pub fn set_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn into_console(self) -> C {
        self.console
    }

    /// Run until the instruction pointer passes the end of the program.
    pub fn exec(&mut self) -> Result<Snapshot, RuntimeError> {
        self.run(None)
    }

    /// Like [`Machine::exec`], but give up after `max_steps` instructions.
    pub fn exec_with_limit(&mut self, max_steps: u64) -> Result<Snapshot, RuntimeError> {
        self.run(Some(max_steps))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            registers: self.registers,
            flags: self.flags,
            memory: self.memory.clone(),
        }
    }

    fn reset(&mut self) {
        self.registers = Registers::default();
        self.flags = Flags::default();
        self.memory = self.program.entry_memory().clone();
        self.pc = self.program.entry();
        self.prev = self.pc;
    }

    fn run(&mut self, limit: Option<u64>) -> Result<Snapshot, RuntimeError> {
        self.reset();
        let program = self.program;
        let mut steps = 0;
        while let Some(instr) = program.get(self.pc) {
            self.prev = self.pc;
            if let Some(max) = limit.filter(|&max| steps >= max) {
                return Err(self.fault(Fault {
                    kind: ErrorKind::StepLimit,
                    message: format!("Execution stopped after {max} steps."),
                }));
            }
            steps += 1;
            self.pc += 1;
            if self.trace {
                eprintln!(
                    "{}",
                    output::trace_line(program.line_of(self.prev), self.prev, instr)
                );
            }
            if let Err(fault) = self.step(instr) {
                return Err(self.fault(fault));
            }
        }
        Ok(self.snapshot())
    }

    fn fault(&self, fault: Fault) -> RuntimeError {
        RuntimeError::new(
            fault.kind,
            self.program.line_of(self.prev),
            fault.message,
            self.snapshot(),
        )
        .with_source(self.program.source())
    }

    fn step(&mut self, instr: &Instruction) -> Result<(), Fault> {
        match instr {
            Instruction::Move { dest, src } => {
                let val = self.retrieve(src)?;
                self.move_to(dest, val)?;
            }
            Instruction::LoadEAddr { dest, src } => {
                let val = self.eval(src)?.trunc();
                self.move_to(dest, val)?;
            }
            Instruction::Unary { op, dest } => {
                let val = self.retrieve(dest)?;
                let res = match op {
                    UnaryOp::Inc => val + 1.0,
                    UnaryOp::Dec => val - 1.0,
                    UnaryOp::Not => !to_i32(val) as f64,
                    UnaryOp::Neg => val * -1.0,
                };
                self.adjust_flags(res);
                self.move_to(dest, res)?;
            }
            Instruction::Binary { op, dest, src } => {
                let lhs = self.retrieve(dest)?;
                let rhs = self.retrieve(src)?;
                let res = binary(*op, lhs, rhs);
                self.adjust_flags(res);
                self.move_to(dest, res)?;
            }
            Instruction::Exchange { lhs, rhs } => {
                let temp = self.retrieve(lhs)?;
                let val = self.retrieve(rhs)?;
                self.move_to(lhs, val)?;
                self.move_to(rhs, temp)?;
            }
            Instruction::Compare { lhs, rhs } => {
                let res = self.retrieve(lhs)? - self.retrieve(rhs)?;
                self.adjust_flags(res);
            }
            Instruction::Test { lhs, rhs } => {
                let res = binary(BinaryOp::And, self.retrieve(lhs)?, self.retrieve(rhs)?);
                self.adjust_flags(res);
            }
            Instruction::Push { src } => {
                let val = self.retrieve(src)?;
                self.push(val)?;
            }
            Instruction::Pop { dest } => {
                let val = self.pop()?;
                self.move_to(dest, val)?;
            }
            Instruction::Call { target } => {
                // Target is checked before anything is pushed
                let dest = self.resolve(target)?;
                self.push((self.prev + 1) as f64)?;
                self.pc = dest;
            }
            Instruction::CallBuiltin { builtin } => self.call_builtin(*builtin)?,
            Instruction::Return => {
                let addr = self.pop()?;
                self.pc = self.check_target(addr)?;
            }
            Instruction::Jump { cond, target } => {
                let taken = self.flags.holds(*cond);
                // Labels are checked even when the jump is not taken
                if taken || matches!(target, Target::Label(_)) {
                    let dest = self.resolve(target)?;
                    if taken {
                        self.pc = dest;
                    }
                }
            }
            Instruction::Exit => self.pc = self.program.len(),
        }
        Ok(())
    }

    fn adjust_flags(&mut self, val: f64) {
        self.flags = Flags::of(val);
    }

    fn retrieve(&self, src: &Operand) -> Result<f64, Fault> {
        match src {
            Operand::Address(expr) => {
                let addr = self.address_of(expr)?;
                Ok(self.load(addr))
            }
            Operand::Number(val) => Ok(*val),
            Operand::Register(reg) => Ok(self.registers[*reg]),
            Operand::Symbol(name) => Err(Fault::reference(format!(
                "Invalid retrieval source ({name})."
            ))),
        }
    }

    fn move_to(&mut self, dest: &Operand, val: f64) -> Result<(), Fault> {
        match dest {
            Operand::Address(expr) => {
                let addr = self.address_of(expr)?;
                self.memory.insert(addr, val);
                Ok(())
            }
            Operand::Register(reg) => {
                self.registers[*reg] = val;
                Ok(())
            }
            Operand::Number(_) | Operand::Symbol(_) => Err(Fault::reference(format!(
                "Invalid write destination ({dest})."
            ))),
        }
    }

    fn load(&self, addr: i64) -> f64 {
        self.memory.get(&addr).copied().unwrap_or(0.0)
    }

    fn eval(&self, expr: &Expr) -> Result<f64, Fault> {
        expr.eval(&|reg| self.registers[reg]).map_err(|name| {
            Fault::reference(format!(
                "Arithmetic expression ({expr}) contains illegal identifier ({name})."
            ))
        })
    }

    fn address_of(&self, expr: &Expr) -> Result<i64, Fault> {
        to_address(self.eval(expr)?)
    }

    fn push(&mut self, val: f64) -> Result<(), Fault> {
        self.registers[Register::S] -= 1.0;
        let addr = to_address(self.registers[Register::S])?;
        self.memory.insert(addr, val);
        Ok(())
    }

    fn pop(&mut self) -> Result<f64, Fault> {
        let addr = to_address(self.registers[Register::S])?;
        self.registers[Register::S] += 1.0;
        Ok(self.load(addr))
    }

    /// Instruction index of a jump or call target.
    fn resolve(&self, target: &Target) -> Result<usize, Fault> {
        match target {
            Target::Label(name) => self.program.jump_target(name).ok_or_else(|| {
                Fault::reference(format!(
                    "Attempted jump to undefined or invalid label \"{name}\"."
                ))
            }),
            Target::Index(operand) => {
                let val = self.retrieve(operand)?;
                self.check_target(val)
            }
        }
    }

    /// Indices up to and including the program length are valid; the latter halts.
    fn check_target(&self, val: f64) -> Result<usize, Fault> {
        let len = self.program.len();
        if val.is_finite() && val.fract() == 0.0 && val >= 0.0 && val <= len as f64 {
            Ok(val as usize)
        } else {
            Err(Fault::range(format!(
                "Jumped out-of-bounds to {val}, outside of the code space 0..={len}."
            )))
        }
    }

    fn call_builtin(&mut self, builtin: Builtin) -> Result<(), Fault> {
        match builtin {
            Builtin::Print => {
                let text =
                    self.read_string(self.registers[Register::A], self.registers[Register::B])?;
                self.console.print(&text);
            }
            Builtin::Read => {
                let prompt =
                    self.read_string(self.registers[Register::C], self.registers[Register::D])?;
                let input = self.console.read(&prompt);
                let codes: Vec<u16> = input.encode_utf16().collect();

                let ptr = self.registers[Register::A];
                let len = self.registers[Register::B];
                if !len.is_finite() {
                    return Err(Fault::range(format!("Input buffer length {len} is not finite.")));
                }
                let mut i = 0;
                while (i as f64) < len {
                    let addr = to_address(ptr + i as f64)?;
                    let code = codes.get(i).copied().map_or(0.0, f64::from);
                    self.memory.insert(addr, code);
                    i += 1;
                }
            }
        }
        Ok(())
    }

    /// String of at most `len` characters at `ptr`, ending early at a 0 cell.
    fn read_string(&self, ptr: f64, len: f64) -> Result<String, Fault> {
        let mut codes = Vec::new();
        let mut i = 0.0;
        while i < len {
            let code = self.load(to_address(ptr + i)?);
            if code == 0.0 || code.is_nan() {
                break;
            }
            codes.push(to_u32(code) as u16);
            i += 1.0;
        }
        Ok(String::from_utf16_lossy(&codes))
    }
}

fn binary(op: BinaryOp, lhs: f64, rhs: f64) -> f64 {
    let shift = to_u32(rhs) & 31;
    match op {
        BinaryOp::Add => lhs + rhs,
        BinaryOp::Sub => lhs - rhs,
        BinaryOp::Mul => lhs * rhs,
        BinaryOp::Div => lhs / rhs,
        BinaryOp::And => (to_i32(lhs) & to_i32(rhs)) as f64,
        BinaryOp::Or => (to_i32(lhs) | to_i32(rhs)) as f64,
        BinaryOp::Xor => (to_i32(lhs) ^ to_i32(rhs)) as f64,
        BinaryOp::Shl => to_i32(lhs).wrapping_shl(shift) as f64,
        BinaryOp::Sar => (to_i32(lhs) >> shift) as f64,
        BinaryOp::Shr => (to_u32(lhs) >> shift) as f64,
    }
}

/// Wrap to 32 bits. NaN and infinities become 0.
fn to_u32(val: f64) -> u32 {
    if !val.is_finite() {
        return 0;
    }
    val.trunc().rem_euclid(4_294_967_296.0) as u32
}

fn to_i32(val: f64) -> i32 {
    to_u32(val) as i32
}

fn to_address(val: f64) -> Result<i64, Fault> {
    if val.is_finite() {
        Ok(val.trunc() as i64)
    } else {
        Err(Fault::range(format!("Memory address {val} is not finite.")))
    }
}
