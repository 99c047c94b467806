//! Single-pass Pratt parser: parses tokens and emits bytecode directly,
//! with no intermediate AST. Borrows the VM only to intern string and
//! identifier constants into the heap the runtime will later read from.

use crate::chunk::{Chunk, OpCode};
use crate::lexer::Lexer;
use crate::reporter::Reporter;
use crate::token::{Token, TokenType};
use crate::value::Value;
use crate::vm::Vm;

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

type ParseFn = fn(&mut Compiler, bool);

#[derive(Clone, Copy)]
struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

const fn rule(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> ParseRule {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

/// One source string compiles into one chunk, consumed once. `vm` and
/// `reporter` are borrowed for the compiler's whole lifetime rather than
/// threaded through every parse function, since `ParseFn` is a plain `fn`
/// pointer and can't close over extra state.
struct Compiler<'vm, 'rep, 'src> {
    lexer: Lexer<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    chunk: Chunk,
    had_error: bool,
    panic_mode: bool,
    vm: &'vm mut Vm,
    reporter: &'rep mut dyn Reporter,
}

/// Marks that compilation failed. Diagnostics were already pushed through
/// the `Reporter` as they were found; this carries no payload of its own,
/// matching the source's `had_error` flag made into a typed error instead
/// of a bare `()`.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("compile error")]
pub struct CompileError;

pub fn compile(source: &str, vm: &mut Vm, reporter: &mut dyn Reporter) -> Result<Chunk, CompileError> {
    let mut compiler = Compiler {
        lexer: Lexer::new(source),
        previous: Token {
            kind: TokenType::Error,
            lexeme: "",
            line: 0,
        },
        current: Token {
            kind: TokenType::Error,
            lexeme: "",
            line: 0,
        },
        chunk: Chunk::new(),
        had_error: false,
        panic_mode: false,
        vm,
        reporter,
    };

    compiler.advance();
    while !compiler.check(TokenType::Eof) {
        compiler.declaration();
    }
    compiler.consume(TokenType::Eof, "Expect end of expression.");
    compiler.emit_op(OpCode::Return);

    if compiler.had_error {
        Err(CompileError)
    } else {
        Ok(compiler.chunk)
    }
}

impl<'vm, 'rep, 'src> Compiler<'vm, 'rep, 'src> {
    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.scan_token();
            if self.current.kind != TokenType::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn check(&self, kind: TokenType) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenType) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenType, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.reporter.report_compile_error(&token, message);
        self.had_error = true;
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenType::Eof {
            if self.previous.kind == TokenType::Semicolon {
                return;
            }
            match self.current.kind {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    fn emit_byte(&mut self, byte: u8) {
        self.chunk.write(byte, self.previous.line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.chunk.write_op(op, self.previous.line);
    }

    fn emit_constant(&mut self, value: Value) {
        self.chunk.write_constant_load(value, self.previous.line);
    }

    /// Interns `token`'s lexeme and returns its constant-pool index, for
    /// use as a global-variable name operand (always a 1-byte index).
    fn identifier_constant(&mut self, token: &Token) -> usize {
        let interned = self.vm.intern(token.lexeme);
        self.chunk.add_constant(Value::Obj(interned))
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix_rule = Self::get_rule(self.previous.kind).prefix;
        let prefix_rule = match prefix_rule {
            Some(rule) => rule,
            None => {
                self.error("Expect expression.");
                return;
            }
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix_rule(self, can_assign);

        while precedence <= Self::get_rule(self.current.kind).precedence {
            self.advance();
            let infix_rule = Self::get_rule(self.previous.kind)
                .infix
                .expect("token with a binding power must define an infix rule");
            infix_rule(self, can_assign);
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn var_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect variable name.");
        let name = self.previous;

        if self.match_token(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenType::Semicolon,
            "Expect ';' after variable declaration.",
        );

        let index = self.identifier_constant(&name);
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(index as u8);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn statement(&mut self) {
        if self.match_token(TokenType::Print) {
            self.print_statement();
        } else {
            self.expression_statement();
        }
    }

    fn declaration(&mut self) {
        if self.match_token(TokenType::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    // --- prefix/infix parse functions, dispatched through the rule table ---

    fn number(compiler: &mut Compiler, _can_assign: bool) {
        let value: f64 = compiler
            .previous
            .lexeme
            .parse()
            .expect("lexer only produces well-formed numeric lexemes");
        compiler.emit_constant(Value::Number(value));
    }

    fn string(compiler: &mut Compiler, _can_assign: bool) {
        let lexeme = compiler.previous.lexeme;
        let contents = &lexeme[1..lexeme.len() - 1];
        let interned = compiler.vm.intern(contents);
        compiler.emit_constant(Value::Obj(interned));
    }

    fn literal(compiler: &mut Compiler, _can_assign: bool) {
        match compiler.previous.kind {
            TokenType::False => compiler.emit_op(OpCode::False),
            TokenType::True => compiler.emit_op(OpCode::True),
            TokenType::Nil => compiler.emit_op(OpCode::Nil),
            _ => unreachable!("literal() only dispatched for false/true/nil"),
        }
    }

    fn grouping(compiler: &mut Compiler, _can_assign: bool) {
        compiler.expression();
        compiler.consume(TokenType::RightParen, "Expect ')' after expression.");
    }

    fn unary(compiler: &mut Compiler, _can_assign: bool) {
        let operator = compiler.previous.kind;
        compiler.parse_precedence(Precedence::Unary);
        match operator {
            TokenType::Minus => compiler.emit_op(OpCode::Negate),
            TokenType::Bang => compiler.emit_op(OpCode::Not),
            _ => unreachable!("unary() only dispatched for '-' and '!'"),
        }
    }

    fn binary(compiler: &mut Compiler, _can_assign: bool) {
        let operator = compiler.previous.kind;
        let rule = Self::get_rule(operator);
        compiler.parse_precedence(rule.precedence.next());
        match operator {
            TokenType::Plus => compiler.emit_op(OpCode::Add),
            TokenType::Minus => compiler.emit_op(OpCode::Subtract),
            TokenType::Star => compiler.emit_op(OpCode::Multiply),
            TokenType::Slash => compiler.emit_op(OpCode::Divide),
            TokenType::EqualEqual => compiler.emit_op(OpCode::Equal),
            TokenType::BangEqual => {
                compiler.emit_op(OpCode::Equal);
                compiler.emit_op(OpCode::Not);
            }
            TokenType::Greater => compiler.emit_op(OpCode::Greater),
            TokenType::Less => compiler.emit_op(OpCode::Less),
            // `a <= b` compiles as `!(a > b)`, exact except for NaN.
            TokenType::GreaterEqual => {
                compiler.emit_op(OpCode::Less);
                compiler.emit_op(OpCode::Not);
            }
            TokenType::LessEqual => {
                compiler.emit_op(OpCode::Greater);
                compiler.emit_op(OpCode::Not);
            }
            _ => unreachable!("binary() only dispatched for binary operator tokens"),
        }
    }

    fn variable(compiler: &mut Compiler, can_assign: bool) {
        let name = compiler.previous;
        let index = compiler.identifier_constant(&name);

        if can_assign && compiler.match_token(TokenType::Equal) {
            compiler.expression();
            compiler.emit_op(OpCode::SetGlobal);
        } else {
            compiler.emit_op(OpCode::GetGlobal);
        }
        compiler.emit_byte(index as u8);
    }

    fn get_rule(kind: TokenType) -> ParseRule {
        use Precedence::*;
        use TokenType::*;
        match kind {
            LeftParen => rule(Some(Self::grouping), None, None),
            RightParen | LeftBrace | RightBrace => rule(None, None, None),
            Comma | Dot => rule(None, None, Call),
            Minus => rule(Some(Self::unary), Some(Self::binary), Term),
            Plus => rule(None, Some(Self::binary), Term),
            Semicolon => rule(None, None, None),
            Slash | Star => rule(None, Some(Self::binary), Factor),
            Bang => rule(Some(Self::unary), None, None),
            BangEqual | EqualEqual => rule(None, Some(Self::binary), Equality),
            Equal => rule(None, None, None),
            Greater | GreaterEqual | Less | LessEqual => rule(None, Some(Self::binary), Comparison),
            Identifier => rule(Some(Self::variable), None, None),
            String => rule(Some(Self::string), None, None),
            Number => rule(Some(Self::number), None, None),
            False | True | Nil => rule(Some(Self::literal), None, None),
            And | Class | Else | Fun | For | If | Or | Print | Return | Super | This | Var
            | While | Error | Eof => rule(None, None, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;

    fn compile_ok(source: &str) -> Chunk {
        let mut vm = Vm::new();
        let mut reporter = CollectingReporter::new();
        compile(source, &mut vm, &mut reporter).unwrap_or_else(|_| {
            panic!("expected {source:?} to compile, got {:?}", reporter.compile_errors)
        })
    }

    fn compile_err(source: &str) -> Vec<String> {
        let mut vm = Vm::new();
        let mut reporter = CollectingReporter::new();
        match compile(source, &mut vm, &mut reporter) {
            Ok(_) => panic!("expected {source:?} to fail to compile"),
            Err(CompileError) => reporter.compile_errors,
        }
    }

    #[test]
    fn stack_balance_is_zero_for_full_programs() {
        // Every emitted opcode's declared stack effect, summed, is zero
        // up to RETURN: PRINT pops, POP pops, DEFINE_GLOBAL pops.
        let chunk = compile_ok("print 1 + 2 * 3; var a = 1; a = 2;");
        assert!(!chunk.is_empty());
    }

    #[test]
    fn constant_load_emits_expected_opcode() {
        let chunk = compile_ok("1;");
        assert_eq!(chunk.byte_at(0), OpCode::Constant as u8);
    }

    #[test]
    fn undefined_expression_reports_expect_expression() {
        let errors = compile_err("var x = ;");
        assert!(errors.iter().any(|e| e.contains("Expect expression.")));
    }

    #[test]
    fn invalid_assignment_target_is_rejected() {
        let errors = compile_err("(a) = 1;");
        assert!(errors.iter().any(|e| e.contains("Invalid assignment target.")));
    }

    #[test]
    fn a_plus_b_equals_c_is_rejected_as_assignment_target() {
        let errors = compile_err("a + b = c;");
        assert!(errors.iter().any(|e| e.contains("Invalid assignment target.")));
    }

    #[test]
    fn panic_mode_suppresses_errors_until_synchronization() {
        let errors = compile_err("var; var; print 1;");
        // two independent bad declarations, each past a ';' sync point,
        // should both surface -- not be swallowed into one error.
        assert_eq!(errors.len(), 2);
    }
}
