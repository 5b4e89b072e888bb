use super::chunk::{Chunk, OpCode};
use super::diagnostics::Diagnostics;
use super::object::{ObjString, StringInterner};
use super::scanner::Scanner;
use super::token::{Token, TokenKind};
use super::value::Value;
use std::rc::Rc;

/// Matches the VM's fixed 256-value stack: a function body can bind at most
/// that many locals before compilation fails.
const MAX_LOCALS: usize = 256;

#[derive(Clone, Copy, PartialEq, PartialOrd, Eq, Debug)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
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

struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

fn rule_for(kind: TokenKind) -> ParseRule {
    use Precedence::*;
    use TokenKind::*;

    let (prefix, infix, precedence): (Option<ParseFn>, Option<ParseFn>, Precedence) = match kind {
        LeftParen => (Some(Compiler::grouping), None, None),
        Minus => (Some(Compiler::unary), Some(Compiler::binary), Term),
        Plus => (None, Some(Compiler::binary), Term),
        Slash => (None, Some(Compiler::binary), Factor),
        Star => (None, Some(Compiler::binary), Factor),
        Percent => (None, Some(Compiler::binary), Factor),
        Bang => (Some(Compiler::unary), None, None),
        BangEqual => (None, Some(Compiler::binary), Equality),
        EqualEqual => (None, Some(Compiler::binary), Equality),
        Greater => (None, Some(Compiler::binary), Comparison),
        GreaterEqual => (None, Some(Compiler::binary), Comparison),
        Less => (None, Some(Compiler::binary), Comparison),
        LessEqual => (None, Some(Compiler::binary), Comparison),
        Caret => (None, Some(Compiler::binary), Factor),
        Tilde => (Some(Compiler::unary), None, None),
        Pipe => (None, Some(Compiler::binary), Factor),
        Amp => (None, Some(Compiler::binary), Factor),
        ShiftLeft => (None, Some(Compiler::binary), Factor),
        ShiftRight => (None, Some(Compiler::binary), Factor),
        Identifier => (Some(Compiler::variable), None, None),
        String => (Some(Compiler::string), None, None),
        Number => (Some(Compiler::number), None, None),
        Char => (Some(Compiler::char_literal), None, None),
        And => (None, Some(Compiler::and_), Precedence::And),
        False => (Some(Compiler::literal), None, None),
        Nil => (Some(Compiler::literal), None, None),
        Or => (None, Some(Compiler::or_), Precedence::Or),
        True => (Some(Compiler::literal), None, None),
        _ => (None, None, None),
    };

    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

struct Local<'a> {
    name: &'a str,
    depth: Option<usize>,
}

/// Bundles parser state, the scope/locals tracker, and the chunk being
/// emitted into into a single struct threaded by `&mut self`, rather than
/// the process-wide current-chunk pointer this is built from.
pub struct Compiler<'src, 'd> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    errored: bool,
    panic_mode: bool,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    scope_depth: usize,
    strings: &'d mut StringInterner,
    diagnostics: &'d mut dyn Diagnostics,
}

impl<'src, 'd> Compiler<'src, 'd> {
    pub fn compile(
        source: &'src str,
        strings: &'d mut StringInterner,
        diagnostics: &'d mut dyn Diagnostics,
    ) -> Result<Chunk, ()> {
        let mut scanner = Scanner::new(source);
        let first = scanner.scan_token();

        let mut compiler = Compiler {
            scanner,
            current: first,
            previous: Token::new(TokenKind::Eof, "", 0),
            errored: false,
            panic_mode: false,
            chunk: Chunk::new(),
            locals: Vec::new(),
            scope_depth: 0,
            strings,
            diagnostics,
        };

        compiler.skip_leading_errors();

        while !compiler.match_token(TokenKind::Eof) {
            compiler.declaration();
        }

        compiler.emit_op(OpCode::Return);

        if compiler.errored {
            Err(())
        } else {
            #[cfg(feature = "debug-bytecode")]
            crate::debug::disassemble_chunk(&compiler.chunk, "code");

            Ok(compiler.chunk)
        }
    }

    // ---- token stream plumbing -----------------------------------------

    fn skip_leading_errors(&mut self) {
        while self.current.kind == TokenKind::Error {
            self.error_at_current_token();
            self.current = self.scanner.scan_token();
        }
    }

    fn advance(&mut self) {
        self.previous = self.current;

        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current_token();
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    // ---- error reporting -------------------------------------------------

    fn error_at_current_token(&mut self) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.errored = true;
        self.diagnostics
            .error(self.current.line, self.current.lexeme);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current.line, message);
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous.line, message);
    }

    fn error_at(&mut self, line: usize, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.errored = true;
        self.diagnostics.error(line, message);
    }

    // ---- emission helpers -------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk.write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.previous.line;
        self.chunk.write_op(op, line);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        let line = self.previous.line;
        self.chunk.write_jump(op, line)
    }

    fn patch_jump(&mut self, site: usize) {
        if let Err(message) = self.chunk.patch_jump(site) {
            self.error(message);
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.previous.line;
        if let Err(message) = self.chunk.write_loop(loop_start, line) {
            self.error(message);
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let line = self.previous.line;
        self.chunk.write_constant(value, line);
    }

    /// Interns `bytes`, consulting (and updating) the shared string
    /// interner so that two equal-content constants across the whole
    /// compile share one `Rc<ObjString>`.
    fn intern(&mut self, bytes: Vec<u8>) -> Rc<ObjString> {
        self.strings.intern(bytes)
    }

    fn identifier_constant(&mut self, name: &str) -> usize {
        let string = self.intern(name.as_bytes().to_vec());
        self.chunk.add_constant(Value::Object(string))
    }

    // ---- expressions -------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, min_prec: Precedence) {
        self.advance();
        let prefix = rule_for(self.previous.kind).prefix;
        let prefix = match prefix {
            Some(f) => f,
            None => {
                self.error("Expect expression.");
                return;
            }
        };

        let can_assign = min_prec <= Precedence::Assignment;
        prefix(self, can_assign);

        while min_prec <= rule_for(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule_for(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
            self.expression();
        }
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn char_literal(&mut self, _can_assign: bool) {
        let bytes = self.previous.lexeme.as_bytes();
        let byte = bytes[bytes.len() - 2];
        self.emit_constant(Value::Char(byte));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let bytes = lexeme[1..lexeme.len() - 1].as_bytes().to_vec();
        let string = self.intern(bytes);
        self.emit_constant(Value::Object(string));
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let op = self.previous.kind;
        self.parse_precedence(Precedence::Unary);

        match op {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Tilde => self.emit_op(OpCode::BitNot),
            _ => {}
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let op = self.previous.kind;
        let rule = rule_for(op);
        self.parse_precedence(rule.precedence.next());

        match op {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulo),
            TokenKind::Caret => self.emit_op(OpCode::BitXor),
            TokenKind::Pipe => self.emit_op(OpCode::BitOr),
            TokenKind::Amp => self.emit_op(OpCode::BitAnd),
            TokenKind::ShiftLeft => self.emit_op(OpCode::ShiftLeft),
            TokenKind::ShiftRight => self.emit_op(OpCode::ShiftRight),
            _ => {}
        }
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => {}
        }
    }

    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);

        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(can_assign);
    }

    fn named_variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        let local_slot = self.resolve_local(name);

        let (get_op, set_op, arg) = match local_slot {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot as u8),
            None => {
                let index = self.identifier_constant(name);
                (OpCode::GetGlobal, OpCode::SetGlobal, index as u8)
            }
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(set_op);
            self.emit_byte(arg);
        } else {
            self.emit_op(get_op);
            self.emit_byte(arg);
        }
    }

    fn resolve_local(&mut self, name: &str) -> Option<usize> {
        for (index, local) in self.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth.is_none() {
                    self.error("Cannot read local variable in its own initializer.");
                }
                return Some(index);
            }
        }
        None
    }

    // ---- statements -------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }

            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }

            self.advance();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }

        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global);
    }

    fn parse_variable(&mut self, message: &str) -> usize {
        self.consume(TokenKind::Identifier, message);

        self.declare_variable();
        if self.scope_depth > 0 {
            return 0;
        }

        self.identifier_constant(self.previous.lexeme)
    }

    fn declare_variable(&mut self) {
        if self.scope_depth == 0 {
            return;
        }

        let name = self.previous.lexeme;

        for local in self.locals.iter().rev() {
            if let Some(depth) = local.depth {
                if depth < self.scope_depth {
                    break;
                }
            }
            if local.name == name {
                self.error("Variable with this name already declared in this scope.");
            }
        }

        self.add_local(name);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.locals.len() == MAX_LOCALS {
            self.error("Too many local variables in block.");
            return;
        }
        self.locals.push(Local { name, depth: None });
    }

    fn mark_initialized(&mut self) {
        if self.scope_depth == 0 {
            return;
        }
        let depth = self.scope_depth;
        if let Some(local) = self.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: usize) {
        if self.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(global as u8);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.emit_op(OpCode::Pop);
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope_depth -= 1;

        while let Some(local) = self.locals.last() {
            if local.depth.map_or(false, |d| d > self.scope_depth) {
                self.emit_op(OpCode::Pop);
                self.locals.pop();
            } else {
                break;
            }
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);

        self.emit_op(OpCode::Pop);
        self.statement();

        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk.len();

        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);

            let increment_start = self.chunk.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RecordingDiagnostics;

    fn compile(source: &str) -> Result<Chunk, Vec<(usize, String)>> {
        let mut strings = StringInterner::new();
        let mut diagnostics = RecordingDiagnostics::new();
        match Compiler::compile(source, &mut strings, &mut diagnostics) {
            Ok(chunk) => Ok(chunk),
            Err(()) => Err(diagnostics.messages),
        }
    }

    #[test]
    fn compiles_a_print_statement() {
        let chunk = compile("print 1 + 2;").unwrap();
        assert!(chunk.len() > 0);
    }

    #[test]
    fn reports_expect_expression_on_garbage_input() {
        let errors = compile("print ;").unwrap_err();
        assert_eq!(errors[0].1, "Expect expression.");
    }

    #[test]
    fn rejects_duplicate_locals_in_the_same_scope() {
        let errors = compile("{ var a = 1; var a = 2; }").unwrap_err();
        assert!(errors
            .iter()
            .any(|(_, msg)| msg.contains("already declared")));
    }

    #[test]
    fn rejects_more_than_256_locals() {
        let mut source = String::from("{ ");
        for i in 0..300 {
            source.push_str(&format!("var v{i} = {i};\n"));
        }
        source.push('}');
        let errors = compile(&source).unwrap_err();
        assert!(errors
            .iter()
            .any(|(_, msg)| msg.contains("Too many local variables")));
    }

    #[test]
    fn rejects_invalid_assignment_targets() {
        let errors = compile("1 + 2 = 3;").unwrap_err();
        assert!(errors
            .iter()
            .any(|(_, msg)| msg == "Invalid assignment target."));
    }
}
