mod chunk;
mod compiler;
mod debug;
mod diagnostics;
mod object;
mod scanner;
mod table;
mod token;
mod value;
mod vm;

use diagnostics::CliDiagnostics;
use rustyline::error::ReadlineError;
use rustyline::Editor;
use std::{env, fs, io, process};
use vm::{InterpretResult, Vm};

fn main() {
    let mut args = env::args().skip(1);
    let first = args.next();

    if args.next().is_some() {
        eprintln!("Usage: loxvm [path]");
        process::exit(exitcode::USAGE);
    }

    match first {
        None => run_repl(),
        Some(path) => run_file(&path),
    }
}

fn run_repl() {
    let mut vm = Vm::new();
    let mut diagnostics = CliDiagnostics;
    let mut rl = Editor::<()>::new();

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str());
                let mut stdout = io::stdout();
                vm.interpret(&line, &mut diagnostics, &mut stdout);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(_) => break,
        }
    }
}

fn run_file(path: &str) {
    let source = fs::read_to_string(path).unwrap_or_else(|err| {
        eprintln!("Error reading '{path}': {err}");
        process::exit(exitcode::IOERR);
    });

    let mut vm = Vm::new();
    let mut diagnostics = CliDiagnostics;
    let mut stdout = io::stdout();

    match vm.interpret(&source, &mut diagnostics, &mut stdout) {
        InterpretResult::Ok => {}
        InterpretResult::CompileError => process::exit(exitcode::DATAERR),
        InterpretResult::RuntimeError => process::exit(exitcode::SOFTWARE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnostics::RecordingDiagnostics;

    fn run(source: &str) -> (InterpretResult, String) {
        let mut vm = Vm::new();
        let mut diagnostics = RecordingDiagnostics::new();
        let mut out = Vec::new();
        let result = vm.interpret(source, &mut diagnostics, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn scenario_1_arithmetic_precedence() {
        let (result, stdout) = run("print 1 + 2 * 3;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "7\n");
    }

    #[test]
    fn scenario_2_string_concatenation() {
        let (result, stdout) = run(r#"var a = "hi"; var b = " there"; print a + b;"#);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "hi there\n");
    }

    #[test]
    fn concatenating_the_same_bytes_twice_reuses_one_interned_string() {
        let mut vm = Vm::new();
        let mut diagnostics = RecordingDiagnostics::new();
        let mut out = Vec::new();
        vm.interpret(
            r#"{ var a = "hi" + "!"; var b = "hi" + "!"; }"#,
            &mut diagnostics,
            &mut out,
        );
        // "hi", "!", and "hi!" each interned once, regardless of how many
        // times the same bytes are produced or referenced.
        assert_eq!(vm.interned_string_count(), 3);
    }

    #[test]
    fn scenario_3_while_loop() {
        let (result, stdout) = run("var i = 0; while (i < 3) { print i; i = i + 1; }");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "0\n1\n2\n");
    }

    #[test]
    fn scenario_4_for_loop() {
        let (result, stdout) = run("for (var i = 0; i < 3; i = i + 1) print i;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "0\n1\n2\n");
    }

    #[test]
    fn scenario_5_adding_number_and_string_is_a_runtime_error() {
        let (result, _) = run(r#"print 1 + "x";"#);
        assert_eq!(result, InterpretResult::RuntimeError);
    }

    #[test]
    fn scenario_6_reading_undeclared_global_is_a_runtime_error() {
        let (result, _) = run("print x;");
        assert_eq!(result, InterpretResult::RuntimeError);
    }

    #[test]
    fn scenario_7_nested_block_scopes() {
        let (result, stdout) = run("{ var a = 1; { var a = 2; print a; } print a; }");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "2\n1\n");
    }

    #[test]
    fn scenario_8_bitwise_shift_and_or() {
        let (result, stdout) = run("print (1 << 3) | 1;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "9\n");
    }

    #[test]
    fn a_compile_error_prevents_any_execution() {
        let (result, stdout) = run("print ;");
        assert_eq!(result, InterpretResult::CompileError);
        assert_eq!(stdout, "");
    }

    #[test]
    fn the_vm_can_run_a_second_program_after_a_runtime_error() {
        let mut vm = Vm::new();
        let mut diagnostics = RecordingDiagnostics::new();
        let mut out = Vec::new();
        vm.interpret("print x;", &mut diagnostics, &mut out);
        let result = vm.interpret("print 1 + 1;", &mut diagnostics, &mut out);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(String::from_utf8(out).unwrap(), "2\n");
    }
}
