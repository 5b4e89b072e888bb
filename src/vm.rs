use super::chunk::{Chunk, OpCode};
use super::compiler::Compiler;
use super::diagnostics::Diagnostics;
use super::object::{ObjString, StringInterner};
use super::table::Table;
use super::value::Value;
use std::convert::TryFrom;
use std::io::Write;
use std::rc::Rc;

/// Matches the locals budget a function body is compiled against.
const STACK_MAX: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

pub struct Vm {
    chunk: Chunk,
    ip: usize,
    stack: Vec<Value>,
    globals: Table,
    strings: StringInterner,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            chunk: Chunk::new(),
            ip: 0,
            stack: Vec::new(),
            globals: Table::new(),
            strings: StringInterner::new(),
        }
    }

    pub fn interpret(
        &mut self,
        source: &str,
        diagnostics: &mut dyn Diagnostics,
        out: &mut dyn Write,
    ) -> InterpretResult {
        let chunk = match Compiler::compile(source, &mut self.strings, diagnostics) {
            Ok(chunk) => chunk,
            Err(()) => return InterpretResult::CompileError,
        };

        self.chunk = chunk;
        self.ip = 0;
        self.stack.clear();

        self.run(diagnostics, out)
    }

    /// Number of distinct strings currently interned. Exposed crate-wide
    /// for tests asserting on interning behavior end-to-end.
    pub(crate) fn interned_string_count(&self) -> usize {
        self.strings.len()
    }

    fn push(&mut self, value: Value) -> Result<(), ()> {
        if self.stack.len() >= STACK_MAX {
            return Err(());
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack
            .pop()
            .expect("compiler never emits an instruction that underflows the stack")
    }

    fn peek(&self, distance: usize) -> &Value {
        let index = self.stack.len() - 1 - distance;
        &self.stack[index]
    }

    fn read_byte(&mut self) -> u8 {
        let byte = self.chunk.byte_at(self.ip);
        self.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        ((hi as u16) << 8) | lo as u16
    }

    fn read_u24(&mut self) -> usize {
        let b0 = self.read_byte() as usize;
        let b1 = self.read_byte() as usize;
        let b2 = self.read_byte() as usize;
        b0 | (b1 << 8) | (b2 << 16)
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.chunk.constant(index).clone()
    }

    fn read_constant_long(&mut self) -> Value {
        let index = self.read_u24();
        self.chunk.constant(index).clone()
    }

    /// Interns `bytes`, matching the compiler's own interning so runtime
    /// concatenation shares identity with any equal constant already in the
    /// table.
    fn intern(&mut self, bytes: Vec<u8>) -> Rc<ObjString> {
        self.strings.intern(bytes)
    }

    /// Reads a constant operand known to be an identifier name string.
    fn read_constant_name(&mut self) -> Rc<ObjString> {
        self.read_constant()
            .as_string()
            .cloned()
            .expect("identifier constants are always strings")
    }

    fn runtime_error(
        &mut self,
        instruction_offset: usize,
        diagnostics: &mut dyn Diagnostics,
        message: &str,
    ) -> InterpretResult {
        let line = self.chunk.line_for_offset(instruction_offset);
        diagnostics.error(line, message);
        self.stack.clear();
        InterpretResult::RuntimeError
    }

    fn run(&mut self, diagnostics: &mut dyn Diagnostics, out: &mut dyn Write) -> InterpretResult {
        loop {
            #[cfg(feature = "debug-execution")]
            {
                print!("          ");
                for slot in &self.stack {
                    print!("[ {:?} ]", slot);
                }
                println!();
                crate::debug::disassemble_instruction(&self.chunk, self.ip);
            }

            let instruction_offset = self.ip;
            let byte = self.read_byte();
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(()) => {
                    return self.runtime_error(instruction_offset, diagnostics, "Unknown opcode.")
                }
            };

            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    if self.push(value).is_err() {
                        return self.runtime_error(instruction_offset, diagnostics, "Stack overflow.");
                    }
                }
                OpCode::ConstantLong => {
                    let value = self.read_constant_long();
                    if self.push(value).is_err() {
                        return self.runtime_error(instruction_offset, diagnostics, "Stack overflow.");
                    }
                }
                OpCode::Nil => {
                    if self.push(Value::Nil).is_err() {
                        return self.runtime_error(instruction_offset, diagnostics, "Stack overflow.");
                    }
                }
                OpCode::True => {
                    if self.push(Value::Bool(true)).is_err() {
                        return self.runtime_error(instruction_offset, diagnostics, "Stack overflow.");
                    }
                }
                OpCode::False => {
                    if self.push(Value::Bool(false)).is_err() {
                        return self.runtime_error(instruction_offset, diagnostics, "Stack overflow.");
                    }
                }
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let value = self.stack[slot].clone();
                    if self.push(value).is_err() {
                        return self.runtime_error(instruction_offset, diagnostics, "Stack overflow.");
                    }
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    self.stack[slot] = self.peek(0).clone();
                }
                OpCode::GetGlobal => {
                    let name = self.read_constant_name();
                    match self.globals.get(&name) {
                        Some(value) => {
                            if self.push(value).is_err() {
                                return self.runtime_error(
                                    instruction_offset,
                                    diagnostics,
                                    "Stack overflow.",
                                );
                            }
                        }
                        None => {
                            let message = format!("Undefined variable '{}'.", name.as_str());
                            return self.runtime_error(instruction_offset, diagnostics, &message);
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_constant_name();
                    let value = self.pop();
                    self.globals.set(name, value);
                }
                OpCode::SetGlobal => {
                    let name = self.read_constant_name();
                    if !self.globals.contains(&name) {
                        let message = format!("Undefined variable '{}'.", name.as_str());
                        return self.runtime_error(instruction_offset, diagnostics, &message);
                    }
                    self.globals.set(name, self.peek(0).clone());
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    if self.push(Value::Bool(a == b)).is_err() {
                        return self.runtime_error(instruction_offset, diagnostics, "Stack overflow.");
                    }
                }
                OpCode::Greater => {
                    if let Err(result) = self.numeric_compare(instruction_offset, diagnostics, |a, b| a > b) {
                        return result;
                    }
                }
                OpCode::Less => {
                    if let Err(result) = self.numeric_compare(instruction_offset, diagnostics, |a, b| a < b) {
                        return result;
                    }
                }
                OpCode::Add => {
                    if let Err(result) = self.add(instruction_offset, diagnostics) {
                        return result;
                    }
                }
                OpCode::Subtract => {
                    if let Err(result) =
                        self.numeric_binary(instruction_offset, diagnostics, |a, b| a - b)
                    {
                        return result;
                    }
                }
                OpCode::Multiply => {
                    if let Err(result) =
                        self.numeric_binary(instruction_offset, diagnostics, |a, b| a * b)
                    {
                        return result;
                    }
                }
                OpCode::Divide => {
                    if let Err(result) =
                        self.numeric_binary(instruction_offset, diagnostics, |a, b| a / b)
                    {
                        return result;
                    }
                }
                OpCode::Modulo => {
                    if let Err(result) =
                        self.integer_binary(instruction_offset, diagnostics, |a, b| a.wrapping_rem(b))
                    {
                        return result;
                    }
                }
                OpCode::ShiftLeft => {
                    if let Err(result) = self.integer_binary(instruction_offset, diagnostics, |a, b| {
                        a.wrapping_shl(b as u32)
                    }) {
                        return result;
                    }
                }
                OpCode::ShiftRight => {
                    if let Err(result) = self.integer_binary(instruction_offset, diagnostics, |a, b| {
                        a.wrapping_shr(b as u32)
                    }) {
                        return result;
                    }
                }
                OpCode::BitOr => {
                    if let Err(result) =
                        self.integer_binary(instruction_offset, diagnostics, |a, b| a | b)
                    {
                        return result;
                    }
                }
                OpCode::BitXor => {
                    if let Err(result) =
                        self.integer_binary(instruction_offset, diagnostics, |a, b| a ^ b)
                    {
                        return result;
                    }
                }
                OpCode::BitAnd => {
                    if let Err(result) =
                        self.integer_binary(instruction_offset, diagnostics, |a, b| a & b)
                    {
                        return result;
                    }
                }
                OpCode::Not => {
                    let value = self.pop();
                    if self.push(Value::Bool(value.is_falsy())).is_err() {
                        return self.runtime_error(instruction_offset, diagnostics, "Stack overflow.");
                    }
                }
                OpCode::Negate => match self.peek(0) {
                    Value::Number(n) => {
                        let n = -n;
                        self.pop();
                        if self.push(Value::Number(n)).is_err() {
                            return self.runtime_error(instruction_offset, diagnostics, "Stack overflow.");
                        }
                    }
                    _ => {
                        return self.runtime_error(
                            instruction_offset,
                            diagnostics,
                            "Operand must be a number.",
                        )
                    }
                },
                OpCode::BitNot => match self.peek(0) {
                    Value::Number(n) => {
                        let result = !(*n as i64) as f64;
                        self.pop();
                        if self.push(Value::Number(result)).is_err() {
                            return self.runtime_error(instruction_offset, diagnostics, "Stack overflow.");
                        }
                    }
                    _ => {
                        return self.runtime_error(
                            instruction_offset,
                            diagnostics,
                            "Operand must be a number.",
                        )
                    }
                },
                OpCode::Print => {
                    let value = self.pop();
                    let _ = writeln!(out, "{value}");
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if self.peek(0).is_falsy() {
                        self.ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.ip -= offset as usize;
                }
                OpCode::Return => {
                    return InterpretResult::Ok;
                }
            }
        }
    }

    fn numeric_binary(
        &mut self,
        instruction_offset: usize,
        diagnostics: &mut dyn Diagnostics,
        op: impl Fn(f64, f64) -> f64,
    ) -> Result<(), InterpretResult> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                let result = op(*a, *b);
                self.pop();
                self.pop();
                self.push(Value::Number(result)).map_err(|_| {
                    self.runtime_error(instruction_offset, diagnostics, "Stack overflow.")
                })
            }
            _ => Err(self.runtime_error(
                instruction_offset,
                diagnostics,
                "Operands must be numbers.",
            )),
        }
    }

    fn numeric_compare(
        &mut self,
        instruction_offset: usize,
        diagnostics: &mut dyn Diagnostics,
        op: impl Fn(f64, f64) -> bool,
    ) -> Result<(), InterpretResult> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                let result = op(*a, *b);
                self.pop();
                self.pop();
                self.push(Value::Bool(result)).map_err(|_| {
                    self.runtime_error(instruction_offset, diagnostics, "Stack overflow.")
                })
            }
            _ => Err(self.runtime_error(
                instruction_offset,
                diagnostics,
                "Operands must be numbers.",
            )),
        }
    }

    /// Casts both operands to a signed integer, applies `op`, re-casts to a
    /// number — the shared shape of `%`, `<<`, `>>`, `|`, `^`, `&`.
    fn integer_binary(
        &mut self,
        instruction_offset: usize,
        diagnostics: &mut dyn Diagnostics,
        op: impl Fn(i64, i64) -> i64,
    ) -> Result<(), InterpretResult> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                let result = op(*a as i64, *b as i64) as f64;
                self.pop();
                self.pop();
                self.push(Value::Number(result)).map_err(|_| {
                    self.runtime_error(instruction_offset, diagnostics, "Stack overflow.")
                })
            }
            _ => Err(self.runtime_error(
                instruction_offset,
                diagnostics,
                "Operands must be numbers.",
            )),
        }
    }

    fn add(
        &mut self,
        instruction_offset: usize,
        diagnostics: &mut dyn Diagnostics,
    ) -> Result<(), InterpretResult> {
        let concat_bytes: Option<Vec<u8>> = match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                let result = a + b;
                self.pop();
                self.pop();
                return self.push(Value::Number(result)).map_err(|_| {
                    self.runtime_error(instruction_offset, diagnostics, "Stack overflow.")
                });
            }
            (Value::Object(a), Value::Object(b)) => {
                let mut bytes = a.bytes.clone();
                bytes.extend_from_slice(&b.bytes);
                Some(bytes)
            }
            (Value::Object(a), Value::Char(b)) => {
                let mut bytes = a.bytes.clone();
                bytes.push(*b);
                Some(bytes)
            }
            (Value::Char(a), Value::Object(b)) => {
                let mut bytes = vec![*a];
                bytes.extend_from_slice(&b.bytes);
                Some(bytes)
            }
            (Value::Char(a), Value::Char(b)) => Some(vec![*a, *b]),
            _ => None,
        };

        match concat_bytes {
            Some(bytes) => {
                let string = self.intern(bytes);
                self.pop();
                self.pop();
                self.push(Value::Object(string)).map_err(|_| {
                    self.runtime_error(instruction_offset, diagnostics, "Stack overflow.")
                })
            }
            None => Err(self.runtime_error(
                instruction_offset,
                diagnostics,
                "Operands must be two numbers or two strings.",
            )),
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
    use crate::diagnostics::RecordingDiagnostics;

    fn run(source: &str) -> (InterpretResult, String, Vec<(usize, String)>) {
        let mut vm = Vm::new();
        let mut diagnostics = RecordingDiagnostics::new();
        let mut out = Vec::new();
        let result = vm.interpret(source, &mut diagnostics, &mut out);
        (result, String::from_utf8(out).unwrap(), diagnostics.messages)
    }

    #[test]
    fn arithmetic_precedence() {
        let (result, stdout, _) = run("print 1 + 2 * 3;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "7\n");
    }

    #[test]
    fn string_concatenation() {
        let (result, stdout, _) = run(r#"var a = "hi"; var b = " there"; print a + b;"#);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "hi there\n");
    }

    #[test]
    fn while_loop() {
        let (result, stdout, _) = run("var i = 0; while (i < 3) { print i; i = i + 1; }");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "0\n1\n2\n");
    }

    #[test]
    fn for_loop() {
        let (result, stdout, _) = run("for (var i = 0; i < 3; i = i + 1) print i;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "0\n1\n2\n");
    }

    #[test]
    fn adding_a_number_to_a_string_is_a_runtime_error() {
        let (result, _, errors) = run(r#"print 1 + "x";"#);
        assert_eq!(result, InterpretResult::RuntimeError);
        assert!(errors[0].1.contains("numbers or two strings"));
    }

    #[test]
    fn reading_an_undefined_global_is_a_runtime_error() {
        let (result, _, errors) = run("print x;");
        assert_eq!(result, InterpretResult::RuntimeError);
        assert_eq!(errors[0].1, "Undefined variable 'x'.");
    }

    #[test]
    fn nested_scopes_shadow_and_restore() {
        let (result, stdout, _) = run("{ var a = 1; { var a = 2; print a; } print a; }");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "2\n1\n");
    }

    #[test]
    fn bitwise_operators_use_the_conventional_mapping() {
        let (result, stdout, _) = run("print (1 << 3) | 1;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "9\n");
    }

    #[test]
    fn assigning_an_undefined_global_is_a_runtime_error() {
        let (result, _, errors) = run("x = 1;");
        assert_eq!(result, InterpretResult::RuntimeError);
        assert_eq!(errors[0].1, "Undefined variable 'x'.");
    }

    #[test]
    fn redefining_a_global_overwrites_it() {
        let (result, stdout, _) = run("var a = 1; var a = 2; print a;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "2\n");
    }

    #[test]
    fn char_and_string_concatenation_promotes_the_char() {
        let (result, stdout, _) = run(r#"print "x" + 'y';"#);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "xy\n");
    }

    #[test]
    fn push_past_stack_max_is_rejected() {
        let mut vm = Vm::new();
        for _ in 0..STACK_MAX {
            vm.push(Value::Nil).unwrap();
        }
        assert!(vm.push(Value::Nil).is_err());
    }
}
