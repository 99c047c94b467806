//! Fetch-decode-execute loop over a compiled `Chunk`: a bounded value
//! stack, a globals table, and the string-interning table/object root
//! list that back the heap.

use crate::chunk::{Chunk, OpCode};
use crate::compiler::{self, CompileError};
use crate::reporter::Reporter;
use crate::table::Table;
use crate::value::{fnv1a_hash, LoxString, Obj, Value};
use std::rc::Rc;

/// Matches the source's fixed 256-slot operand stack.
const STACK_MAX: usize = 256;

/// Marks that execution aborted with a type mismatch or an undefined
/// global. The diagnostic itself was already pushed through the
/// `Reporter`; this carries no payload of its own.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("runtime error")]
pub struct RuntimeError;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InterpretError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub struct Vm {
    stack: Vec<Value>,
    globals: Table,
    strings: Table,
    /// Every heap object allocated during this VM's lifetime, rooted here
    /// so it is dropped exactly once at VM teardown regardless of how
    /// many `Value`s still reference it.
    objects: Vec<Rc<Obj>>,
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            stack: Vec::with_capacity(STACK_MAX),
            globals: Table::new(),
            strings: Table::new(),
            objects: Vec::new(),
        }
    }

    /// `copy_string`/`take_string` collapsed into one entry point: Rust's
    /// ownership means there's no separate "caller already owns a
    /// buffer" path to adopt versus copy -- interning either way returns
    /// the canonical `Rc` for these bytes, allocating only on a miss.
    pub fn intern(&mut self, bytes: &str) -> Rc<Obj> {
        let hash = fnv1a_hash(bytes.as_bytes());
        if let Some(existing) = self.strings.find_string(bytes, hash) {
            return existing;
        }
        let obj = Rc::new(Obj::String(LoxString {
            bytes: bytes.to_string(),
            hash,
        }));
        self.objects.push(Rc::clone(&obj));
        self.strings.set(Rc::clone(&obj), Value::Nil);
        obj
    }

    fn concatenate(&mut self, a: &str, b: &str) -> Value {
        let mut combined = String::with_capacity(a.len() + b.len());
        combined.push_str(a);
        combined.push_str(b);
        Value::Obj(self.intern(&combined))
    }

    fn push(&mut self, value: Value) {
        debug_assert!(
            self.stack.len() < STACK_MAX,
            "stack overflow: VM does not emit code that can provoke this"
        );
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("pop on an empty stack")
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
    }

    pub fn interpret(&mut self, source: &str, reporter: &mut dyn Reporter) -> Result<(), InterpretError> {
        let chunk = compiler::compile(source, self, reporter)?;

        log::debug!(
            "compiled chunk: {} bytes, {} constants",
            chunk.len(),
            chunk.constants_len()
        );

        #[cfg(feature = "debug-bytecode")]
        crate::debug::disassemble_chunk(&chunk, "script");

        self.run(&chunk, reporter)
    }

    fn runtime_error(
        &mut self,
        chunk: &Chunk,
        ip: usize,
        message: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<(), InterpretError> {
        let line = chunk.line_at(ip - 1);
        reporter.report_runtime_error(message, line);
        log::error!("runtime error at line {line}: {message}");
        self.reset_stack();
        Err(RuntimeError.into())
    }

    fn global_name(&self, chunk: &Chunk, index: usize) -> Rc<Obj> {
        match chunk.constant(index) {
            Value::Obj(obj) => Rc::clone(obj),
            _ => unreachable!("global name operands are always interned strings"),
        }
    }

    fn run(&mut self, chunk: &Chunk, reporter: &mut dyn Reporter) -> Result<(), InterpretError> {
        let mut ip: usize = 0;

        loop {
            #[cfg(feature = "debug-execution")]
            crate::debug::trace_execution(chunk, ip, &self.stack);

            let byte = chunk.byte_at(ip);
            ip += 1;
            let op = OpCode::try_from(byte)
                .unwrap_or_else(|bad| panic!("invalid opcode byte {bad} at offset {}", ip - 1));

            match op {
                OpCode::Constant => {
                    let index = chunk.byte_at(ip) as usize;
                    ip += 1;
                    self.push(chunk.constant(index).clone());
                }
                OpCode::ConstantLong => {
                    let index = ((chunk.byte_at(ip) as usize) << 16)
                        | ((chunk.byte_at(ip + 1) as usize) << 8)
                        | (chunk.byte_at(ip + 2) as usize);
                    ip += 3;
                    self.push(chunk.constant(index).clone());
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::DefineGlobal => {
                    let index = chunk.byte_at(ip) as usize;
                    ip += 1;
                    let name = self.global_name(chunk, index);
                    let value = self.pop();
                    self.globals.set(name, value);
                }
                OpCode::GetGlobal => {
                    let index = chunk.byte_at(ip) as usize;
                    ip += 1;
                    let name = self.global_name(chunk, index);
                    match self.globals.get(&name) {
                        Some(value) => self.push(value),
                        None => {
                            let message = format!("Undefined variable '{}'.", name.as_string().bytes);
                            return self.runtime_error(chunk, ip, &message, reporter);
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let index = chunk.byte_at(ip) as usize;
                    ip += 1;
                    let name = self.global_name(chunk, index);
                    let value = self.peek(0).clone();
                    if self.globals.set(Rc::clone(&name), value) {
                        // `set` returning true means this was a fresh
                        // key -- i.e. it was never defined. Undo the
                        // insert and report.
                        self.globals.delete(&name);
                        let message = format!("Undefined variable '{}'.", name.as_string().bytes);
                        return self.runtime_error(chunk, ip, &message, reporter);
                    }
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a.equals(&b)));
                }
                OpCode::Greater => {
                    if !self.peek(0).is_number() || !self.peek(1).is_number() {
                        return self.runtime_error(chunk, ip, "Operands must be numbers.", reporter);
                    }
                    let b = self.pop().as_number();
                    let a = self.pop().as_number();
                    self.push(Value::Bool(a > b));
                }
                OpCode::Less => {
                    if !self.peek(0).is_number() || !self.peek(1).is_number() {
                        return self.runtime_error(chunk, ip, "Operands must be numbers.", reporter);
                    }
                    let b = self.pop().as_number();
                    let a = self.pop().as_number();
                    self.push(Value::Bool(a < b));
                }
                OpCode::Add => {
                    if self.peek(0).is_string() && self.peek(1).is_string() {
                        let b = self.pop();
                        let a = self.pop();
                        let result = self.concatenate(a.as_string_bytes(), b.as_string_bytes());
                        self.push(result);
                    } else if self.peek(0).is_number() && self.peek(1).is_number() {
                        let b = self.pop().as_number();
                        let a = self.pop().as_number();
                        self.push(Value::Number(a + b));
                    } else {
                        return self.runtime_error(
                            chunk,
                            ip,
                            "Operands must be two numbers or two strings.",
                            reporter,
                        );
                    }
                }
                OpCode::Subtract => {
                    if !self.peek(0).is_number() || !self.peek(1).is_number() {
                        return self.runtime_error(chunk, ip, "Operands must be numbers.", reporter);
                    }
                    let b = self.pop().as_number();
                    let a = self.pop().as_number();
                    self.push(Value::Number(a - b));
                }
                OpCode::Multiply => {
                    if !self.peek(0).is_number() || !self.peek(1).is_number() {
                        return self.runtime_error(chunk, ip, "Operands must be numbers.", reporter);
                    }
                    let b = self.pop().as_number();
                    let a = self.pop().as_number();
                    self.push(Value::Number(a * b));
                }
                OpCode::Divide => {
                    if !self.peek(0).is_number() || !self.peek(1).is_number() {
                        return self.runtime_error(chunk, ip, "Operands must be numbers.", reporter);
                    }
                    let b = self.pop().as_number();
                    let a = self.pop().as_number();
                    self.push(Value::Number(a / b));
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    if !self.peek(0).is_number() {
                        return self.runtime_error(chunk, ip, "Operand must be a number.", reporter);
                    }
                    let value = self.pop().as_number();
                    self.push(Value::Number(-value));
                }
                OpCode::Print => {
                    let value = self.pop();
                    println!("{value}");
                }
                OpCode::Return => return Ok(()),
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;

    fn run(source: &str) -> Result<(), InterpretError> {
        let mut vm = Vm::new();
        let mut reporter = CollectingReporter::new();
        vm.interpret(source, &mut reporter)
    }

    fn run_with_reporter(source: &str) -> (Result<(), InterpretError>, CollectingReporter) {
        let mut vm = Vm::new();
        let mut reporter = CollectingReporter::new();
        let result = vm.interpret(source, &mut reporter);
        (result, reporter)
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run("print 1 + 2 * 3;"), Ok(()));
    }

    #[test]
    fn boolean_and_comparison_chain() {
        assert_eq!(run("print !(5 - 4 > 3 * 2 == !nil);"), Ok(()));
    }

    #[test]
    fn string_concatenation_interns_the_result() {
        assert_eq!(
            run(r#"var a = "st"; var b = "ring"; print a + b; print (a + b) == "string";"#),
            Ok(())
        );
    }

    #[test]
    fn undefined_global_read_is_a_runtime_error() {
        let (result, reporter) = run_with_reporter("print a;");
        assert_eq!(result, Err(InterpretError::Runtime(RuntimeError)));
        assert_eq!(reporter.runtime_errors.len(), 1);
        assert!(reporter.runtime_errors[0].0.contains("Undefined variable 'a'."));
        assert_eq!(reporter.runtime_errors[0].1, 1);
    }

    #[test]
    fn undefined_global_assignment_is_a_runtime_error() {
        let (result, reporter) = run_with_reporter("x = 1;");
        assert_eq!(result, Err(InterpretError::Runtime(RuntimeError)));
        assert!(reporter.runtime_errors[0].0.contains("Undefined variable 'x'."));
    }

    #[test]
    fn negating_a_string_is_a_runtime_error() {
        let (result, reporter) = run_with_reporter(r#"print -"x";"#);
        assert_eq!(result, Err(InterpretError::Runtime(RuntimeError)));
        assert!(reporter.runtime_errors[0].0.contains("Operand must be a number."));
    }

    #[test]
    fn reassigning_a_defined_global_succeeds() {
        assert_eq!(run("var x = 10; x = x + 1; print x;"), Ok(()));
    }

    #[test]
    fn invalid_assignment_target_is_a_compile_error() {
        assert_eq!(run("(a) = 1;"), Err(InterpretError::Compile(CompileError)));
    }

    #[test]
    fn stack_is_reset_after_a_runtime_error_so_the_vm_can_be_reused() {
        let mut vm = Vm::new();
        let mut reporter = CollectingReporter::new();
        assert_eq!(vm.interpret("print a;", &mut reporter), Err(InterpretError::Runtime(RuntimeError)));
        assert!(vm.stack.is_empty());
        assert_eq!(vm.interpret("print 1;", &mut reporter), Ok(()));
    }
}
