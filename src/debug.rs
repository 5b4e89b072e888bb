//! Bytecode disassembler. Compiled in regardless of feature flags; only the
//! call sites in `compiler`/`vm` are feature-gated behind `debug-bytecode`
//! and `debug-execution`.

use super::chunk::{Chunk, OpCode};
use std::convert::TryFrom;

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {name} ==");

    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset);
    }

    println!("========");
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{offset:04} ");

    let line = chunk.line_for_offset(offset);
    if offset > 0 && line == chunk.line_for_offset(offset - 1) {
        print!("   | ");
    } else {
        print!("{line:4} ");
    }

    let instruction = chunk.byte_at(offset);
    match OpCode::try_from(instruction) {
        Ok(OpCode::Return) => simple_instruction("return", offset),
        Ok(OpCode::Constant) => constant_instruction("constant", chunk, offset),
        Ok(OpCode::ConstantLong) => long_constant_instruction("long constant", chunk, offset),
        Ok(OpCode::Nil) => simple_instruction("nil", offset),
        Ok(OpCode::True) => simple_instruction("true", offset),
        Ok(OpCode::False) => simple_instruction("false", offset),
        Ok(OpCode::Pop) => simple_instruction("pop", offset),
        Ok(OpCode::GetLocal) => byte_instruction("get local", chunk, offset),
        Ok(OpCode::SetLocal) => byte_instruction("set local", chunk, offset),
        Ok(OpCode::GetGlobal) => constant_instruction("get global", chunk, offset),
        Ok(OpCode::DefineGlobal) => constant_instruction("define global", chunk, offset),
        Ok(OpCode::SetGlobal) => constant_instruction("set global", chunk, offset),
        Ok(OpCode::Equal) => simple_instruction("eq", offset),
        Ok(OpCode::Greater) => simple_instruction("gt", offset),
        Ok(OpCode::Less) => simple_instruction("lt", offset),
        Ok(OpCode::Add) => simple_instruction("add", offset),
        Ok(OpCode::Subtract) => simple_instruction("subtract", offset),
        Ok(OpCode::Multiply) => simple_instruction("multiply", offset),
        Ok(OpCode::Divide) => simple_instruction("divide", offset),
        Ok(OpCode::Modulo) => simple_instruction("modulo", offset),
        Ok(OpCode::ShiftLeft) => simple_instruction("shift left", offset),
        Ok(OpCode::ShiftRight) => simple_instruction("shift right", offset),
        Ok(OpCode::BitOr) => simple_instruction("bit or", offset),
        Ok(OpCode::BitXor) => simple_instruction("bit xor", offset),
        Ok(OpCode::BitAnd) => simple_instruction("bit and", offset),
        Ok(OpCode::Not) => simple_instruction("not", offset),
        Ok(OpCode::Negate) => simple_instruction("negate", offset),
        Ok(OpCode::BitNot) => simple_instruction("bit not", offset),
        Ok(OpCode::Print) => simple_instruction("print", offset),
        Ok(OpCode::Jump) => jump_instruction("jump", 1, chunk, offset),
        Ok(OpCode::JumpIfFalse) => jump_instruction("jump if false", 1, chunk, offset),
        Ok(OpCode::Loop) => jump_instruction("loop", -1, chunk, offset),
        Err(()) => {
            println!("Unknown opcode {instruction}");
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
    println!("{name:<16} {index:4} '{:?}'", chunk.constant(index));
    offset + 2
}

fn long_constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.byte_at(offset + 1) as usize
        | (chunk.byte_at(offset + 2) as usize) << 8
        | (chunk.byte_at(offset + 3) as usize) << 16;
    println!("{name:<16} {index:4} '{:?}'", chunk.constant(index));
    offset + 4
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.byte_at(offset + 1);
    println!("{name:<16} {slot:4}");
    offset + 2
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize) -> usize {
    let jump = ((chunk.byte_at(offset + 1) as u16) << 8) | chunk.byte_at(offset + 2) as u16;
    let target = offset as i64 + 3 + sign as i64 * jump as i64;
    println!("{name:<16} {offset:4} -> {target}");
    offset + 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn simple_instructions_advance_by_one_byte() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Return, 1);
        assert_eq!(disassemble_instruction(&chunk, 0), 1);
        assert_eq!(disassemble_instruction(&chunk, 1), 2);
    }

    #[test]
    fn constant_instructions_advance_by_two_bytes() {
        let mut chunk = Chunk::new();
        chunk.write_constant(Value::Number(1.0), 1);
        assert_eq!(disassemble_instruction(&chunk, 0), 2);
    }

    #[test]
    fn jump_instructions_advance_by_three_bytes() {
        let mut chunk = Chunk::new();
        let site = chunk.write_jump(OpCode::Jump, 1);
        chunk.patch_jump(site).unwrap();
        assert_eq!(disassemble_instruction(&chunk, 0), 3);
    }
}
