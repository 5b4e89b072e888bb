use super::token::{Token, TokenKind};

/// Pulls one token at a time out of a source string. Borrows `source` for its
/// whole lifetime; every `Token` it yields borrows the same string.
pub struct Scanner<'a> {
    source: &'a str,
    bytes: &'a [u8],
    start: usize,
    current: usize,
    line: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    pub fn scan_token(&mut self) -> Token<'a> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();

        if c.is_ascii_digit() {
            return self.number();
        }
        if is_ident_start(c) {
            return self.identifier();
        }

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b';' => self.make_token(TokenKind::Semicolon),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b'-' => self.make_token(TokenKind::Minus),
            b'+' => self.make_token(TokenKind::Plus),
            b'/' => self.make_token(TokenKind::Slash),
            b'*' => self.make_token(TokenKind::Star),
            b'%' => self.make_token(TokenKind::Percent),
            b'^' => self.make_token(TokenKind::Caret),
            b'~' => self.make_token(TokenKind::Tilde),
            b'|' => self.make_token(TokenKind::Pipe),
            b'&' => self.make_token(TokenKind::Amp),
            b'!' => {
                let kind = if self.match_byte(b'=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.match_byte(b'=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.match_byte(b'=') {
                    TokenKind::LessEqual
                } else if self.match_byte(b'<') {
                    TokenKind::ShiftLeft
                } else {
                    TokenKind::Less
                };
                self.make_token(kind)
            }
            b'>' => {
                let kind = if self.match_byte(b'=') {
                    TokenKind::GreaterEqual
                } else if self.match_byte(b'>') {
                    TokenKind::ShiftRight
                } else {
                    TokenKind::Greater
                };
                self.make_token(kind)
            }
            b'"' => self.string(),
            b'\'' => self.char_literal(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn advance(&mut self) -> u8 {
        let b = self.bytes[self.current];
        self.current += 1;
        b
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.bytes[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.bytes[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.bytes.len() {
            0
        } else {
            self.bytes[self.current + 1]
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.advance();
                }
                b'\n' => {
                    self.line += 1;
                    self.advance();
                }
                b'/' => {
                    if self.peek_next() == b'/' {
                        while self.peek() != b'\n' && !self.is_at_end() {
                            self.advance();
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn string(&mut self) -> Token<'a> {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            let c = self.advance();
            if c == b'\\' {
                if self.is_at_end() {
                    return self.error_token("Unterminated string.");
                }
                self.advance();
            }
        }

        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }

        self.advance();
        self.make_token(TokenKind::String)
    }

    /// `'c'` — a single quote, exactly one byte, a closing single quote.
    fn char_literal(&mut self) -> Token<'a> {
        if self.is_at_end() {
            return self.error_token("Unterminated character literal.");
        }
        self.advance();
        if self.peek() != b'\'' {
            return self.error_token("Character literal must contain exactly one byte.");
        }
        self.advance();
        self.make_token(TokenKind::Char)
    }

    fn number(&mut self) -> Token<'a> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        self.make_token(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token<'a> {
        while is_ident_start(self.peek()) || self.peek().is_ascii_digit() {
            self.advance();
        }

        self.make_token(self.identifier_kind())
    }

    fn lexeme(&self) -> &'a str {
        &self.source[self.start..self.current]
    }

    fn identifier_kind(&self) -> TokenKind {
        let text = self.lexeme();
        match text {
            "and" => TokenKind::And,
            "class" => TokenKind::Class,
            "else" => TokenKind::Else,
            "false" => TokenKind::False,
            "for" => TokenKind::For,
            "fun" => TokenKind::Fun,
            "if" => TokenKind::If,
            "nil" => TokenKind::Nil,
            "or" => TokenKind::Or,
            "print" => TokenKind::Print,
            "return" => TokenKind::Return,
            "super" => TokenKind::Super,
            "this" => TokenKind::This,
            "true" => TokenKind::True,
            "var" => TokenKind::Var,
            "while" => TokenKind::While,
            _ => TokenKind::Identifier,
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token<'a> {
        Token::new(kind, self.lexeme(), self.line)
    }

    fn error_token(&self, message: &'static str) -> Token<'a> {
        Token::error(message, self.line)
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut out = Vec::new();
        loop {
            let tok = scanner.scan_token();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn scans_shift_operators_without_the_upstream_ambiguity() {
        assert_eq!(
            kinds("1 << 2 >> 3"),
            vec![
                TokenKind::Number,
                TokenKind::ShiftLeft,
                TokenKind::Number,
                TokenKind::ShiftRight,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_comparison_operators_distinctly_from_shifts() {
        assert_eq!(
            kinds("a < b > c"),
            vec![
                TokenKind::Identifier,
                TokenKind::Less,
                TokenKind::Identifier,
                TokenKind::Greater,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_keywords_and_identifiers() {
        assert_eq!(
            kinds("var x = nil"),
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::Nil,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn dollar_sign_is_a_valid_identifier_character() {
        let mut scanner = Scanner::new("$foo bar$baz $");
        assert_eq!(scanner.scan_token().lexeme, "$foo");
        assert_eq!(scanner.scan_token().lexeme, "bar$baz");
        assert_eq!(scanner.scan_token().lexeme, "$");
    }

    #[test]
    fn scans_char_literal() {
        assert_eq!(kinds("'a'"), vec![TokenKind::Char, TokenKind::Eof]);
    }

    #[test]
    fn rejects_multi_byte_char_literal() {
        let mut scanner = Scanner::new("'ab'");
        let tok = scanner.scan_token();
        assert_eq!(tok.kind, TokenKind::Error);
    }

    #[test]
    fn tracks_line_numbers_across_newlines_in_strings() {
        let mut scanner = Scanner::new("\"a\nb\"\n1");
        let str_tok = scanner.scan_token();
        assert_eq!(str_tok.kind, TokenKind::String);
        let num_tok = scanner.scan_token();
        assert_eq!(num_tok.line, 3);
    }

    #[test]
    fn reports_unterminated_string() {
        let mut scanner = Scanner::new("\"abc");
        let tok = scanner.scan_token();
        assert_eq!(tok.kind, TokenKind::Error);
        assert_eq!(tok.lexeme, "Unterminated string.");
    }
}
