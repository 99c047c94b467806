//! Diagnostic sink for compile- and runtime-time errors. Kept behind a
//! trait so tests can capture diagnostics instead of going to stderr.

use crate::token::{Token, TokenType};

pub trait Reporter {
    fn report_compile_error(&mut self, token: &Token, message: &str);
    fn report_runtime_error(&mut self, message: &str, line: u32);
}

/// The reporter used by the CLI: writes exactly the stderr contract from
/// the external-interfaces section, nothing more.
pub struct StderrReporter;

impl Reporter for StderrReporter {
    fn report_compile_error(&mut self, token: &Token, message: &str) {
        eprint!("[line {}] Error", token.line);
        match token.kind {
            TokenType::Eof => eprint!(" at end"),
            TokenType::Error => {}
            _ => eprint!(" at '{}'", token.lexeme),
        }
        eprintln!(": {message}");
    }

    fn report_runtime_error(&mut self, message: &str, line: u32) {
        eprintln!("{message}");
        eprintln!("[line {line}] in script");
    }
}

#[cfg(test)]
pub struct CollectingReporter {
    pub compile_errors: Vec<String>,
    pub runtime_errors: Vec<(String, u32)>,
}

#[cfg(test)]
impl CollectingReporter {
    pub fn new() -> Self {
        CollectingReporter {
            compile_errors: Vec::new(),
            runtime_errors: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Reporter for CollectingReporter {
    fn report_compile_error(&mut self, token: &Token, message: &str) {
        let formatted = match token.kind {
            TokenType::Eof => format!("[line {}] Error at end: {message}", token.line),
            TokenType::Error => format!("[line {}] Error: {message}", token.line),
            _ => format!(
                "[line {}] Error at '{}': {message}",
                token.line, token.lexeme
            ),
        };
        self.compile_errors.push(formatted);
    }

    fn report_runtime_error(&mut self, message: &str, line: u32) {
        self.runtime_errors.push((message.to_string(), line));
    }
}
