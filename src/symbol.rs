use std::fmt;
use std::str::FromStr;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

/// Insertion-ordered map used for every symbol table.
pub type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

pub fn new_map<K, V>() -> FxMap<K, V> {
    IndexMap::with_hasher(FxBuildHasher::default())
}

/// Represents the CPU registers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Register {
    /// Accumulator
    A = 0,
    /// Base
    B,
    /// Counter
    C,
    /// Data
    D,
    /// Stack pointer, grows downwards from 0.
    S,
    /// Stack frame pointer
    F,
}

impl Register {
    pub const ALL: [Register; 6] = [
        Register::A,
        Register::B,
        Register::C,
        Register::D,
        Register::S,
        Register::F,
    ];

    /// Lowercase names, in register order.
    pub const NAMES: [&'static str; 6] = ["areg", "breg", "creg", "dreg", "sreg", "freg"];

    pub fn name(self) -> &'static str {
        Self::NAMES[self as usize]
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(s))
            .map(|i| Self::ALL[i])
            .ok_or(())
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flag predicate that gates a conditional jump.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cond {
    /// Unconditional
    Always,
    /// zf
    Zero,
    /// !zf
    NotZero,
    /// sf
    Sign,
    /// !sf
    NotSign,
    /// !sf && !zf
    Greater,
    /// sf || zf
    LessEqual,
    /// if
    Integral,
    /// !if
    NotIntegral,
    /// ff
    Finite,
    /// !ff
    NotFinite,
}

impl Cond {
    /// Canonical mnemonic, used when listing a program.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Cond::Always => "JMP",
            Cond::Zero => "JE",
            Cond::NotZero => "JNE",
            Cond::Sign => "JL",
            Cond::NotSign => "JGE",
            Cond::Greater => "JG",
            Cond::LessEqual => "JLE",
            Cond::Integral => "JI",
            Cond::NotIntegral => "JNI",
            Cond::Finite => "JF",
            Cond::NotFinite => "JNF",
        }
    }
}

/// Host routines reachable with `CALL _NAME`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Builtin {
    /// Print string at `[areg]` of at most `breg` characters.
    Print,
    /// Read a line into `[areg]` of length `breg`, prompting with `[creg]` of length `dreg`.
    Read,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "_PRINT",
            Builtin::Read => "_READ",
        }
    }
}

impl FromStr for Builtin {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "_PRINT" => Ok(Builtin::Print),
            "_READ" => Ok(Builtin::Read),
            _ => Err(()),
        }
    }
}

/// Label names are case-insensitive and stored uppercased.
pub fn normalize(name: &str) -> String {
    name.to_ascii_uppercase()
}

/// Label that marks the entry point of a program.
pub const ENTRY_LABEL: &str = "_START";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names_are_case_insensitive() {
        assert_eq!("areg".parse(), Ok(Register::A));
        assert_eq!("SREG".parse(), Ok(Register::S));
        assert_eq!("FrEg".parse(), Ok(Register::F));
        assert!("greg".parse::<Register>().is_err());
    }

    #[test]
    fn builtin_lookup() {
        assert_eq!("_print".parse(), Ok(Builtin::Print));
        assert_eq!("_READ".parse(), Ok(Builtin::Read));
        assert!("_WRITE".parse::<Builtin>().is_err());
    }
}
