//! Lexer
//!
//! Tokenizes Duso source text. Kept intentionally compact: the evaluator's
//! contract with the frontend is "well-formed AST with positions", and the
//! lexer/parser pair exists here only so the crate is runnable end to end.

mod token;

pub use token::{Token, TokenKind};

use crate::ast::Position;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("parse error at {pos}: {message}")]
pub struct LexError {
    pub message: String,
    pub pos: Position,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    offset: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src: src.as_bytes(), offset: 0, line: 1, column: 1 }
    }

    pub fn tokenize(src: &'a str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(src);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn pos(&self) -> Position {
        Position { line: self.line, column: self.column, offset: self.offset }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.offset).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.src.get(self.offset + n).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.offset += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.advance();
                }
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia();
        let start = self.pos();
        let Some(c) = self.peek() else {
            return Ok(Token { kind: TokenKind::Eof, pos: start });
        };

        if c.is_ascii_digit() {
            return self.lex_number(start);
        }
        if c == b'"' || c == b'\'' {
            return self.lex_string(start, c);
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            return self.lex_identifier(start);
        }

        self.advance();
        let kind = match c {
            b'+' if self.peek() == Some(b'+') => {
                self.advance();
                TokenKind::PlusPlus
            }
            b'+' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::PlusEq
            }
            b'+' => TokenKind::Plus,
            b'-' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::MinusEq
            }
            b'-' if self.peek() == Some(b'>') => {
                self.advance();
                TokenKind::Arrow
            }
            b'-' => TokenKind::Minus,
            b'*' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::StarEq
            }
            b'*' => TokenKind::Star,
            b'/' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::SlashEq
            }
            b'/' => TokenKind::Slash,
            b'%' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::PercentEq
            }
            b'%' => TokenKind::Percent,
            b'^' => TokenKind::Caret,
            b'=' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::EqEq
            }
            b'=' => TokenKind::Eq,
            b'!' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::NotEq
            }
            b'!' => TokenKind::Bang,
            b'<' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::LtEq
            }
            b'<' => TokenKind::Lt,
            b'>' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::GtEq
            }
            b'>' => TokenKind::Gt,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            b':' => TokenKind::Colon,
            b';' => TokenKind::Semicolon,
            b'.' => TokenKind::Dot,
            b'?' => TokenKind::Question,
            other => {
                return Err(LexError {
                    message: format!("unexpected character '{}'", other as char),
                    pos: start,
                });
            }
        };
        Ok(Token { kind, pos: start })
    }

    fn lex_number(&mut self, start: Position) -> Result<Token, LexError> {
        let begin = self.offset;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let save = self.offset;
            self.advance();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.advance();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.offset = save;
            }
        }
        let text = std::str::from_utf8(&self.src[begin..self.offset]).unwrap();
        let value: f64 = text.parse().map_err(|_| LexError {
            message: format!("invalid number literal '{}'", text),
            pos: start,
        })?;
        Ok(Token { kind: TokenKind::Number(value), pos: start })
    }

    fn lex_string(&mut self, start: Position, quote: u8) -> Result<Token, LexError> {
        self.advance(); // opening quote
        let mut out = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(LexError { message: "unterminated string literal".into(), pos: start });
                }
                Some(c) if c == quote => break,
                Some(b'\\') => {
                    let esc = self.advance().ok_or_else(|| LexError {
                        message: "unterminated escape sequence".into(),
                        pos: start,
                    })?;
                    out.push(match esc {
                        b'n' => '\n',
                        b't' => '\t',
                        b'r' => '\r',
                        b'0' => '\0',
                        b'\\' => '\\',
                        b'"' => '"',
                        b'\'' => '\'',
                        other => other as char,
                    });
                }
                Some(c) => out.push(c as char),
            }
        }
        Ok(Token { kind: TokenKind::Str(out), pos: start })
    }

    fn lex_identifier(&mut self, start: Position) -> Result<Token, LexError> {
        let begin = self.offset;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[begin..self.offset]).unwrap();
        let kind = match text {
            "nil" => TokenKind::Nil,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "var" => TokenKind::Var,
            "if" => TokenKind::If,
            "elseif" => TokenKind::ElseIf,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "do" => TokenKind::Do,
            "end" => TokenKind::End,
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "fn" => TokenKind::Fn,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Bang,
            _ => TokenKind::Identifier(text.to_string()),
        };
        Ok(Token { kind, pos: start })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_numbers_and_operators() {
        let k = kinds("1 + 2.5 * 3");
        assert_eq!(
            k,
            vec![
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.5),
                TokenKind::Star,
                TokenKind::Number(3.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_string_with_escapes() {
        let k = kinds(r#" "a\nb" "#);
        assert_eq!(k, vec![TokenKind::Str("a\nb".to_string()), TokenKind::Eof]);
    }

    #[test]
    fn lexes_keywords_vs_identifiers() {
        let k = kinds("var x = nil");
        assert_eq!(
            k,
            vec![
                TokenKind::Var,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Eq,
                TokenKind::Nil,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments() {
        let k = kinds("1 # comment\n2 // another\n3");
        assert_eq!(
            k,
            vec![
                TokenKind::Number(1.0),
                TokenKind::Number(2.0),
                TokenKind::Number(3.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn reports_position_on_error() {
        let err = Lexer::tokenize("1 + @").unwrap_err();
        assert_eq!(err.pos.column, 5);
    }
}
