use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hotwatch::notify::Event;
use hotwatch::{
    blocking::{Flow, Hotwatch},
    EventKind,
};
use miette::{bail, IntoDiagnostic, Result};

use lila::output::{self, Output};
use lila::{Machine, Program};

/// Lila is an interpreter for the LILA low-level instruction language.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.lila` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a `.lila` file and print the final machine state
    Run {
        /// `.lila` file to run
        name: PathBuf,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
        /// Stop with an error after this many executed instructions [env: LILA_MAX_STEPS]
        #[arg(long, value_name = "N")]
        max_steps: Option<u64>,
    },
    /// Check a `.lila` file without running it
    Check {
        /// File to check
        name: PathBuf,
        /// Print the compiled instructions
        #[arg(short, long)]
        listing: bool,
    },
    /// Place a watch on a `.lila` file to receive constant compiler updates
    Watch {
        /// `.lila` file to watch
        name: PathBuf,
    },
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    lila::env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(lila::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    if let Some(command) = args.command {
        match command {
            Command::Run {
                name,
                minimal,
                max_steps,
            } => run(&name, minimal, max_steps),
            Command::Check { name, listing } => {
                file_message(Green, "Checking", &name);
                let program = compile_file(&name)?;
                if listing {
                    print!("{program}");
                }
                message(Green, "Success", "no errors found!");
                Ok(())
            }
            Command::Watch { name } => {
                if !name.exists() {
                    bail!("File does not exist. Exiting...")
                }
                // Vim breaks if watching a single file
                let folder_path = match name.parent() {
                    Some(pth) if pth.is_dir() => pth.to_path_buf(),
                    _ => Path::new(".").to_path_buf(),
                };

                // Clear screen and move cursor to top left
                print!("\x1B[2J\x1B[2;1H");
                file_message(Green, "Watching", &name);
                message(Cyan, "Help", "press CTRL+C to exit");

                let mut watcher = Hotwatch::new_with_custom_delay(Duration::from_millis(500))
                    .into_diagnostic()?;

                watcher
                    .watch(folder_path, move |event: Event| match event.kind {
                        // Watch remove for vim changes
                        EventKind::Modify(_) | EventKind::Remove(_) => {
                            print!("\x1B[2J\x1B[2;1H");
                            file_message(Green, "Watching", &name);
                            message(Green, "Re-checking", "file change detected");
                            message(Cyan, "Help", "press CTRL+C to exit");

                            // Makes reruns more obvious
                            sleep(Duration::from_millis(50));

                            match compile_file(&name) {
                                Ok(_) => message(Green, "Success", "no errors found!"),
                                Err(e) => println!("\n{:?}", e),
                            }
                            Flow::Continue
                        }
                        _ => Flow::Continue,
                    })
                    .into_diagnostic()?;
                watcher.run();
                Ok(())
            }
        }
    } else if let Some(path) = args.path {
        run(&path, false, None)
    } else {
        println!("\n~ lila v{VERSION} ~");
        println!("{}", "Low-Level Instruction Language".truecolor(200, 162, 200).bold());
        println!("{SHORT_INFO}");
        std::process::exit(0);
    }
}

enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, right.as_str());
}

fn message<S>(color: MsgColor, left: S, right: S)
where
    S: Colorize + std::fmt::Display,
{
    if Output::is_minimal() {
        return;
    }
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn run(name: &Path, minimal: bool, max_steps: Option<u64>) -> Result<()> {
    Output::set_minimal(minimal);
    if minimal {
        colored::control::set_override(false);
    }

    file_message(MsgColor::Green, "Compiling", name);
    let program = compile_file(name)?;

    message(
        MsgColor::Green,
        "Running",
        format!("{} instructions", program.len()).as_str(),
    );
    let mut machine = Machine::new(&program);
    machine.set_trace(lila::env::is_trace_enabled());
    let result = match max_steps.or(lila::env::max_steps()) {
        Some(max) => machine.exec_with_limit(max),
        None => machine.exec(),
    };

    match result {
        Ok(snapshot) => {
            message(MsgColor::Cyan, "Halted", "");
            output::print_snapshot(&snapshot);
            file_message(MsgColor::Green, "Finished", name);
            Ok(())
        }
        Err(err) => {
            message(
                MsgColor::Red,
                "Faulted",
                format!("on line {}", err.line).as_str(),
            );
            output::print_snapshot(&err.state);
            Err(err.into())
        }
    }
}

/// Read and compile a source file, attaching the source to any diagnostic.
fn compile_file(name: &Path) -> Result<Program> {
    let src = fs::read_to_string(name).into_diagnostic()?;
    Ok(lila::compile(&src)?)
}

const SHORT_INFO: &str = r"
Welcome to lila, an interpreter for the LILA assembly-like language.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
