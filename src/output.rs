use std::cell::RefCell;
use std::fmt::Write;

use colored::Colorize;

use crate::air::Instruction;
use crate::runtime::Snapshot;

/// Width of the value column in the state table
const VALUE_WIDTH: usize = 22;

pub struct Output;

impl Output {
    thread_local! {
        static IS_MINIMAL: RefCell<bool> = const { RefCell::new(false) };
    }

    pub fn set_minimal(new_value: bool) -> bool {
        Self::IS_MINIMAL.with(|value| value.replace(new_value))
    }

    pub fn is_minimal() -> bool {
        Self::IS_MINIMAL.with(|value| *value.borrow())
    }
}

/// Numbers as the language displays them.
pub fn number(val: f64) -> String {
    if val == f64::INFINITY {
        "Infinity".to_string()
    } else if val == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        val.to_string()
    }
}

pub fn print_snapshot(snap: &Snapshot) {
    print!("{}", render_snapshot(snap));
}

/// Registers, flags and every memory cell that holds a value.
pub fn render_snapshot(snap: &Snapshot) -> String {
    let flags = [
        ("zf", snap.flags.zero),
        ("sf", snap.flags.sign),
        ("if", snap.flags.integer),
        ("ff", snap.flags.finite),
    ];
    let mut out = String::new();

    if Output::is_minimal() {
        for (reg, val) in snap.registers.iter() {
            let _ = writeln!(out, "{reg} {}", number(val));
        }
        for (name, set) in flags {
            let _ = writeln!(out, "{name} {}", set as u8);
        }
        for (addr, val) in &snap.memory {
            let _ = writeln!(out, "[{addr}] {}", number(*val));
        }
        return out;
    }

    let rule = "─".repeat(VALUE_WIDTH + 10);
    let _ = writeln!(out, "{}", format!("┌{rule}┐").dimmed());
    for (reg, val) in snap.registers.iter() {
        let _ = writeln!(
            out,
            "{} {:<8}{:>width$} {}",
            "│".dimmed(),
            reg.name().bold(),
            number(val),
            "│".dimmed(),
            width = VALUE_WIDTH
        );
    }
    let _ = writeln!(out, "{}", format!("├{rule}┤").dimmed());
    let flag_cells = flags
        .iter()
        .map(|(name, set)| match set {
            true => format!("{} {}", name.bold(), "●".green()),
            false => format!("{} {}", name.bold(), "○".dimmed()),
        })
        .collect::<Vec<_>>()
        .join("    ");
    // Each flag cell is 4 columns wide, separated by 4 spaces
    let pad = (VALUE_WIDTH + 8).saturating_sub(4 * 4 + 3 * 4);
    let _ = writeln!(
        out,
        "{} {flag_cells}{} {}",
        "│".dimmed(),
        " ".repeat(pad),
        "│".dimmed()
    );
    if !snap.memory.is_empty() {
        let _ = writeln!(out, "{}", format!("├{rule}┤").dimmed());
        for (addr, val) in &snap.memory {
            let _ = writeln!(
                out,
                "{} {:<8}{:>width$} {}",
                "│".dimmed(),
                format!("[{addr}]").italic(),
                number(*val),
                "│".dimmed(),
                width = VALUE_WIDTH
            );
        }
    }
    let _ = writeln!(out, "{}", format!("└{rule}┘").dimmed());
    out
}

/// One line of the instruction trace.
pub fn trace_line(line: usize, idx: usize, instr: &Instruction) -> String {
    let text = format!("{:>12} {line:>5} {idx:>5}    {instr}", "Trace");
    if Output::is_minimal() {
        text
    } else {
        text.dimmed().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Flags, Memory, Registers};
    use crate::symbol::Register;

    #[test]
    fn numbers() {
        assert_eq!(number(5.0), "5");
        assert_eq!(number(-0.25), "-0.25");
        assert_eq!(number(f64::NAN), "NaN");
        assert_eq!(number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn minimal_snapshot() {
        let was = Output::set_minimal(true);
        let mut registers = Registers::default();
        registers[Register::A] = 7.0;
        registers[Register::S] = -1.0;
        let snap = Snapshot {
            registers,
            flags: Flags::of(-1.0),
            memory: Memory::from([(-1, 7.0)]),
        };
        let text = render_snapshot(&snap);
        Output::set_minimal(was);

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "areg 7");
        assert_eq!(lines[4], "sreg -1");
        assert_eq!(&lines[6..10], ["zf 0", "sf 1", "if 1", "ff 1"]);
        assert_eq!(lines[10], "[-1] 7");
        assert_eq!(lines.len(), 11);
    }
}
