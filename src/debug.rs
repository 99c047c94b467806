//! Human-readable rendering of a `Chunk`'s bytecode. A debugging observer
//! only: compiled in behind `debug-bytecode` (a one-shot dump before
//! `run()` starts) and `debug-execution` (per-instruction tracing inside
//! the fetch loop). Neither feature changes VM behavior.

use crate::chunk::{Chunk, OpCode};
use crate::value::Value;

#[cfg(feature = "debug-bytecode")]
pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {name} ==");
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

/// Renders one instruction at `offset` and returns the offset of the next
/// one. Shared by the static dump and the live execution trace.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{offset:04} ");
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.line_at(offset));
    }

    let byte = chunk.byte_at(offset);
    match OpCode::try_from(byte) {
        Ok(OpCode::Constant) => constant_instruction("CONSTANT", chunk, offset),
        Ok(OpCode::ConstantLong) => constant_long_instruction("CONSTANT_LONG", chunk, offset),
        Ok(OpCode::Nil) => simple_instruction("NIL", offset),
        Ok(OpCode::True) => simple_instruction("TRUE", offset),
        Ok(OpCode::False) => simple_instruction("FALSE", offset),
        Ok(OpCode::Pop) => simple_instruction("POP", offset),
        Ok(OpCode::DefineGlobal) => constant_instruction("DEFINE_GLOBAL", chunk, offset),
        Ok(OpCode::GetGlobal) => constant_instruction("GET_GLOBAL", chunk, offset),
        Ok(OpCode::SetGlobal) => constant_instruction("SET_GLOBAL", chunk, offset),
        Ok(OpCode::Equal) => simple_instruction("EQUAL", offset),
        Ok(OpCode::Greater) => simple_instruction("GREATER", offset),
        Ok(OpCode::Less) => simple_instruction("LESS", offset),
        Ok(OpCode::Add) => simple_instruction("ADD", offset),
        Ok(OpCode::Subtract) => simple_instruction("SUBTRACT", offset),
        Ok(OpCode::Multiply) => simple_instruction("MULTIPLY", offset),
        Ok(OpCode::Divide) => simple_instruction("DIVIDE", offset),
        Ok(OpCode::Not) => simple_instruction("NOT", offset),
        Ok(OpCode::Negate) => simple_instruction("NEGATE", offset),
        Ok(OpCode::Print) => simple_instruction("PRINT", offset),
        Ok(OpCode::Return) => simple_instruction("RETURN", offset),
        Err(bad) => {
            println!("Unknown opcode {bad}");
            offset + 1
        }
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{name}");
    offset + 1
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.byte_at(offset + 1) as usize;
    print_constant_line(name, chunk.constant(index), index);
    offset + 2
}

fn constant_long_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let index = ((chunk.byte_at(offset + 1) as usize) << 16)
        | ((chunk.byte_at(offset + 2) as usize) << 8)
        | (chunk.byte_at(offset + 3) as usize);
    print_constant_line(name, chunk.constant(index), index);
    offset + 4
}

fn print_constant_line(name: &str, value: &Value, index: usize) {
    println!("{name:<16} {index:>4} '{value}'");
}

/// Per-instruction trace used by the `debug-execution` feature: the
/// current stack contents followed by the instruction about to run.
#[cfg(feature = "debug-execution")]
pub fn trace_execution(chunk: &Chunk, ip: usize, stack: &[Value]) {
    print!("          ");
    for value in stack {
        print!("[ {value} ]");
    }
    println!();
    disassemble_instruction(chunk, ip);
}

#[cfg(all(test, feature = "debug-bytecode"))]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn disassembles_a_constant_and_return() {
        let mut chunk = Chunk::new();
        chunk.write_constant_load(Value::Number(1.0), 1);
        chunk.write_op(OpCode::Return, 1);
        // Smoke test: must not panic while walking the whole chunk.
        disassemble_chunk(&chunk, "test");
    }
}
