// Hand-rolled lexer (§4.6 "Lex"). Explicit index-into-`Vec<char>` cursor,
// no lazy token stream (§9 "replace lazy token streams with explicit
// cursors").

use crate::error::{CompilationError, CompilationErrorKind, SourceLoc};
use crate::organism::{DR_BASE, FPR_BASE, LR_BASE, PR_BASE};

use super::token::{Token, TokenKind};

pub struct Lexer<'a> {
    file: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(file: &'a str, source: &str) -> Lexer<'a> {
        Lexer { file, chars: source.chars().collect(), pos: 0, line: 1, column: 1 }
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc { file: self.file.to_string(), line: self.line, column: self.column }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn err(&self, msg: impl Into<String>) -> CompilationError {
        CompilationError::new(CompilationErrorKind::Lex(msg.into()), self.loc())
    }

    pub fn lex(mut self) -> Result<Vec<Token>, CompilationError> {
        let mut out = Vec::new();
        while let Some(c) = self.peek() {
            let loc = self.loc();
            match c {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '\n' => {
                    self.advance();
                    out.push(Token { kind: TokenKind::Newline, loc });
                }
                '|' => {
                    self.advance();
                    out.push(Token { kind: TokenKind::Pipe, loc });
                }
                ':' => {
                    self.advance();
                    out.push(Token { kind: TokenKind::Colon, loc });
                }
                '[' => {
                    self.advance();
                    out.push(Token { kind: TokenKind::LBracket, loc });
                }
                ']' => {
                    self.advance();
                    out.push(Token { kind: TokenKind::RBracket, loc });
                }
                '"' => out.push(self.lex_string(loc)?),
                '.' => out.push(self.lex_directive(loc)?),
                '%' => out.push(self.lex_register(loc)?),
                c if c == '-' && self.peek_at(1).map(|n| n.is_ascii_digit()).unwrap_or(false) => {
                    out.push(self.lex_number(loc)?)
                }
                c if c.is_ascii_digit() => out.push(self.lex_number(loc)?),
                c if is_ident_start(c) => out.push(self.lex_ident(loc)),
                other => return Err(self.err(format!("unexpected character '{}'", other))),
            }
        }
        out.push(Token { kind: TokenKind::Eof, loc: self.loc() });
        Ok(out)
    }

    fn lex_string(&mut self, loc: SourceLoc) -> Result<Token, CompilationError> {
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c) => s.push(c),
                    None => return Err(self.err("unterminated string")),
                },
                Some(c) => s.push(c),
                None => return Err(self.err("unterminated string")),
            }
        }
        Ok(Token { kind: TokenKind::Str(s), loc })
    }

    fn lex_directive(&mut self, loc: SourceLoc) -> Result<Token, CompilationError> {
        self.advance(); // '.'
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(self.err("empty directive name"));
        }
        Ok(Token { kind: TokenKind::Directive(name.to_ascii_uppercase()), loc })
    }

    fn lex_register(&mut self, loc: SourceLoc) -> Result<Token, CompilationError> {
        self.advance(); // '%'
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() {
                name.push(c.to_ascii_uppercase());
                self.advance();
            } else {
                break;
            }
        }
        let (prefix, base) = if let Some(rest) = name.strip_prefix("FPR") {
            (rest, FPR_BASE)
        } else if let Some(rest) = name.strip_prefix("DR") {
            (rest, DR_BASE)
        } else if let Some(rest) = name.strip_prefix("PR") {
            (rest, PR_BASE)
        } else if let Some(rest) = name.strip_prefix("LR") {
            (rest, LR_BASE)
        } else {
            return Err(self.err(format!("unknown register family in '%{}'", name)));
        };
        let index: usize = prefix
            .parse()
            .map_err(|_| self.err(format!("bad register index in '%{}'", name)))?;
        Ok(Token { kind: TokenKind::Register(base + index), loc })
    }

    fn lex_number(&mut self, loc: SourceLoc) -> Result<Token, CompilationError> {
        let mut text = String::new();
        if self.peek() == Some('-') {
            text.push('-');
            self.advance();
        }
        let radix = if self.peek() == Some('0') {
            match self.peek_at(1) {
                Some('x') | Some('X') => {
                    self.advance();
                    self.advance();
                    Some(16)
                }
                Some('b') | Some('B') => {
                    self.advance();
                    self.advance();
                    Some(2)
                }
                Some('o') | Some('O') => {
                    self.advance();
                    self.advance();
                    Some(8)
                }
                _ => None,
            }
        } else {
            None
        };
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                if c != '_' {
                    digits.push(c);
                }
                self.advance();
            } else {
                break;
            }
        }
        let value = i64::from_str_radix(&digits, radix.unwrap_or(10))
            .map_err(|_| self.err(format!("malformed number '{}{}'", text, digits)))?;
        let value = if text.starts_with('-') { -value } else { value };
        Ok(Token { kind: TokenKind::Number(value), loc })
    }

    fn lex_ident(&mut self, loc: SourceLoc) -> Token {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                s.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token { kind: TokenKind::Ident(s), loc }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}
