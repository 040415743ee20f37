//! The scanner. Source text in, token stream out.
//!
//! Linefeeds are tokens of their own because statements are line-sensitive.
//! Operators are lexed greedily from the operator character class, except
//! for the reserved lexemes `.`, `=`, `:` and `::`.

pub mod token;

use self::token::{is_op_char, keyword, op_info, Token, TokenKind};
use crate::error::SyntaxError;

pub struct Scanner<'a> {
    file: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Scanner<'a> {
    pub fn new(file: &'a str, source: &str) -> Self {
        Self { file, chars: source.chars().collect(), pos: 0, line: 1, col: 1 }
    }

    fn at_end(&self) -> bool { self.pos >= self.chars.len() }
    fn current(&self) -> char { self.chars[self.pos] }
    fn peek(&self) -> Option<char> { self.chars.get(self.pos + 1).copied() }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        ch
    }

    fn make(&self, kind: TokenKind, line: u32, col: u32) -> Token {
        Token { kind, line, col }
    }

    fn err(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.file, self.line, self.col, message)
    }

    /// Tokenize the whole source. The stream always ends with `Eof`; runs of
    /// blank lines collapse to a single linefeed token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut out: Vec<Token> = Vec::new();
        while !self.at_end() {
            let (line, col) = (self.line, self.col);
            let c = self.current();
            match c {
                ' ' | '\t' | '\r' => { self.advance(); }
                '\n' => {
                    self.advance();
                    if !matches!(out.last().map(|t| &t.kind), Some(TokenKind::Linefeed) | None) {
                        out.push(self.make(TokenKind::Linefeed, line, col));
                    }
                }
                '/' if self.peek() == Some('/') => {
                    while !self.at_end() && self.current() != '\n' { self.advance(); }
                }
                '/' if self.peek() == Some('*') => self.skip_block_comment()?,
                '(' => { self.advance(); out.push(self.make(TokenKind::LParen, line, col)); }
                ')' => { self.advance(); out.push(self.make(TokenKind::RParen, line, col)); }
                '[' => { self.advance(); out.push(self.make(TokenKind::LBracket, line, col)); }
                ']' => { self.advance(); out.push(self.make(TokenKind::RBracket, line, col)); }
                '{' => { self.advance(); out.push(self.make(TokenKind::LBrace, line, col)); }
                '}' => { self.advance(); out.push(self.make(TokenKind::RBrace, line, col)); }
                ',' => { self.advance(); out.push(self.make(TokenKind::Comma, line, col)); }
                ';' => { self.advance(); out.push(self.make(TokenKind::Semicolon, line, col)); }
                '"' => out.push(self.read_string()?),
                c if c.is_ascii_digit() => out.push(self.read_number()?),
                c if c.is_alphabetic() || c == '_' => out.push(self.read_ident()),
                c if is_op_char(c) => out.push(self.read_operator()),
                other => return Err(self.err(format!("unexpected character '{}'", other))),
            }
        }
        out.push(self.make(TokenKind::Eof, self.line, self.col));
        Ok(out)
    }

    fn skip_block_comment(&mut self) -> Result<(), SyntaxError> {
        self.advance();
        self.advance();
        let mut depth = 1u32;
        while depth > 0 {
            if self.at_end() {
                return Err(self.err("unterminated block comment"));
            }
            if self.current() == '/' && self.peek() == Some('*') {
                self.advance();
                self.advance();
                depth += 1;
            } else if self.current() == '*' && self.peek() == Some('/') {
                self.advance();
                self.advance();
                depth -= 1;
            } else {
                self.advance();
            }
        }
        Ok(())
    }

    fn read_string(&mut self) -> Result<Token, SyntaxError> {
        let (line, col) = (self.line, self.col);
        self.advance();
        let mut s = String::new();
        loop {
            if self.at_end() || self.current() == '\n' {
                return Err(self.err("unterminated string"));
            }
            match self.current() {
                '"' => { self.advance(); break; }
                '\\' => {
                    self.advance();
                    if self.at_end() {
                        return Err(self.err("unterminated string"));
                    }
                    match self.advance() {
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        '\\' => s.push('\\'),
                        '"' => s.push('"'),
                        other => return Err(self.err(format!("unknown escape '\\{}'", other))),
                    }
                }
                _ => s.push(self.advance()),
            }
        }
        Ok(self.make(TokenKind::Str(s), line, col))
    }

    fn read_number(&mut self) -> Result<Token, SyntaxError> {
        let (line, col) = (self.line, self.col);
        let mut num = String::new();
        while !self.at_end() && self.current().is_ascii_digit() {
            num.push(self.advance());
        }
        if !self.at_end() && self.current() == '.' {
            if let Some(next) = self.peek() {
                if next.is_ascii_digit() {
                    num.push(self.advance());
                    while !self.at_end() && self.current().is_ascii_digit() {
                        num.push(self.advance());
                    }
                }
            }
        }
        let value: f64 = num
            .parse()
            .map_err(|_| self.err(format!("invalid number literal '{}'", num)))?;
        Ok(self.make(TokenKind::Number(value), line, col))
    }

    fn read_ident(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        let mut name = String::new();
        while !self.at_end() && (self.current().is_alphanumeric() || self.current() == '_') {
            name.push(self.advance());
        }
        let kind = keyword(&name).unwrap_or(TokenKind::Ident(name));
        self.make(kind, line, col)
    }

    fn read_operator(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        let mut lexeme = String::new();
        while !self.at_end() && is_op_char(self.current()) {
            // An operator never swallows a comment opener.
            if self.current() == '/' && matches!(self.peek(), Some('/') | Some('*')) {
                break;
            }
            lexeme.push(self.advance());
        }
        // Reserved punctuation never forms a user operator.
        let kind = match lexeme.as_str() {
            "." => TokenKind::Dot,
            "=" => TokenKind::Assign,
            ":" => TokenKind::Colon,
            "::" => TokenKind::ColonColon,
            _ => TokenKind::Op(op_info(&lexeme)),
        };
        self.make(kind, line, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Scanner::new("test.em", src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn reserved_lexemes_do_not_merge_into_operators() {
        let ks = kinds("a.b");
        assert!(matches!(ks[1], TokenKind::Dot));
        let ks = kinds("a = b");
        assert!(matches!(ks[1], TokenKind::Assign));
        let ks = kinds("a :: b");
        assert!(matches!(ks[1], TokenKind::ColonColon));
    }

    #[test]
    fn operator_precedence_comes_from_lexeme() {
        let ks = kinds("a ^^ b -> c += d");
        let prec = |k: &TokenKind| match k {
            TokenKind::Op(i) => (i.prec, i.left_assoc),
            other => panic!("not an operator: {:?}", other),
        };
        assert_eq!(prec(&ks[1]), (10, false));
        assert_eq!(prec(&ks[3]), (0, true));
        assert_eq!(prec(&ks[5]), (1, true));
    }

    #[test]
    fn nested_block_comments() {
        let ks = kinds("1 /* a /* b */ c */ 2");
        assert!(matches!(ks[0], TokenKind::Number(_)));
        assert!(matches!(ks[1], TokenKind::Number(_)));
        assert!(matches!(ks[2], TokenKind::Eof));
    }

    #[test]
    fn blank_lines_collapse() {
        let ks = kinds("1\n\n\n2");
        assert_eq!(ks.len(), 4); // number, linefeed, number, eof
    }
}
