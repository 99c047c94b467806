//! Process entry point: argument parsing, file/REPL drivers, and the
//! typed-error-to-exit-code mapping from the external interfaces.

mod chunk;
mod compiler;
#[cfg(any(feature = "debug-bytecode", feature = "debug-execution"))]
mod debug;
mod lexer;
mod reporter;
mod table;
mod token;
mod value;
mod vm;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use reporter::StderrReporter;
use vm::{InterpretError, Vm};

/// A single-pass bytecode compiler and stack-based VM for a small,
/// dynamically typed scripting language in the Lox family.
#[derive(Parser, Debug)]
#[command(name = "loxvm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile and run a Lox-family script", long_about = None)]
struct Cli {
    /// Script to run. Omit to start an interactive REPL.
    path: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // clap already formatted a usage/help/version message; route
            // genuine usage errors through the same exit-code contract
            // the rest of the CLI uses, but let --help/--version exit 0.
            let _ = err.print();
            use clap::error::ErrorKind;
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    ExitCode::from(exitcode::OK as u8)
                }
                _ => ExitCode::from(exitcode::USAGE as u8),
            };
        }
    };

    let code = match cli.path {
        Some(path) => run_file(&path),
        None => run_repl(),
    };
    ExitCode::from(code as u8)
}

fn run_file(path: &Path) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {err}", path.display());
            return exitcode::IOERR;
        }
    };

    let mut vm = Vm::new();
    let mut reporter = StderrReporter;
    match vm.interpret(&source, &mut reporter) {
        Ok(()) => exitcode::OK,
        Err(InterpretError::Compile(_)) => exitcode::DATAERR,
        Err(InterpretError::Runtime(_)) => exitcode::SOFTWARE,
    }
}

fn run_repl() -> i32 {
    let mut editor = rustyline::Editor::<()>::new();
    let mut vm = Vm::new();
    let mut reporter = StderrReporter;

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                editor.add_history_entry(&line);
                log::debug!("repl line: {} bytes", line.len());
                // A REPL is long-lived; one bad line shouldn't end the
                // session, so errors are reported and swallowed here.
                let _ = vm.interpret(&line, &mut reporter);
            }
            Err(rustyline::error::ReadlineError::Eof)
            | Err(rustyline::error::ReadlineError::Interrupted) => break,
            Err(err) => {
                eprintln!("Readline error: {err}");
                break;
            }
        }
    }

    exitcode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_accepts_a_single_positional_path() {
        let cli = Cli::parse_from(["loxvm", "script.lox"]);
        assert_eq!(cli.path, Some(PathBuf::from("script.lox")));
    }

    #[test]
    fn cli_accepts_no_arguments_for_the_repl() {
        let cli = Cli::parse_from(["loxvm"]);
        assert_eq!(cli.path, None);
    }

    #[test]
    fn cli_rejects_more_than_one_positional_argument() {
        let result = Cli::try_parse_from(["loxvm", "a.lox", "b.lox"]);
        assert!(result.is_err());
    }

    #[test]
    fn reading_a_missing_file_is_an_io_error() {
        let code = run_file(Path::new("/nonexistent/path/does-not-exist.lox"));
        assert_eq!(code, exitcode::IOERR);
    }

    #[test]
    fn running_a_valid_script_succeeds() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("loxvm-test-{}.lox", std::process::id()));
        std::fs::write(&path, "print 1 + 1;").expect("write temp script");
        let code = run_file(&path);
        let _ = std::fs::remove_file(&path);
        assert_eq!(code, exitcode::OK);
    }

    #[test]
    fn a_runtime_error_script_exits_with_software_code() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("loxvm-test-rt-{}.lox", std::process::id()));
        std::fs::write(&path, "print a;").expect("write temp script");
        let code = run_file(&path);
        let _ = std::fs::remove_file(&path);
        assert_eq!(code, exitcode::SOFTWARE);
    }

    #[test]
    fn a_compile_error_script_exits_with_dataerr_code() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("loxvm-test-ce-{}.lox", std::process::id()));
        std::fs::write(&path, "(a) = 1;").expect("write temp script");
        let code = run_file(&path);
        let _ = std::fs::remove_file(&path);
        assert_eq!(code, exitcode::DATAERR);
    }
}
