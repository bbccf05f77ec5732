// Recursive-descent parser (§4.6 "Parse"). Hand-rolled; there is no
// generated grammar in this codebase (§9 "no suspension needed").

use std::rc::Rc;

use crate::error::{CompilationError, CompilationErrorKind, SourceLoc};

use super::ast::{CallArgKind, Expr, Item, ParamDecl, Program, Stmt};
use super::token::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Parser {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn loc(&self) -> SourceLoc {
        self.tokens[self.pos.min(self.tokens.len() - 1)].loc.clone()
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), TokenKind::Newline) {
            self.advance();
        }
    }

    fn err(&self, msg: impl Into<String>) -> CompilationError {
        CompilationError::new(CompilationErrorKind::Parse(msg.into()), self.loc())
    }

    pub fn parse_program(mut self) -> Result<Program, CompilationError> {
        let mut stmts = Vec::new();
        self.skip_newlines();
        while !self.at_eof() {
            stmts.push(self.parse_stmt()?);
            self.skip_newlines();
        }
        Ok(Program { stmts })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CompilationError> {
        let loc = self.loc();
        match self.peek().clone() {
            TokenKind::Directive(name) => self.parse_directive(name, loc),
            TokenKind::Ident(name) => {
                // `label:` vs an instruction mnemonic - disambiguate by
                // peeking one token ahead.
                if matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Colon)) {
                    self.advance(); // ident
                    self.advance(); // colon
                    Ok(Stmt { item: Item::Label(name), loc })
                } else {
                    self.advance();
                    let operands = self.parse_operands()?;
                    Ok(Stmt { item: Item::Instruction { mnemonic: name.to_ascii_uppercase(), operands }, loc })
                }
            }
            other => Err(self.err(format!("unexpected token {:?}", other))),
        }
    }

    fn parse_directive(&mut self, name: String, loc: SourceLoc) -> Result<Stmt, CompilationError> {
        self.advance();
        match name.as_str() {
            "PROC" => {
                let proc_name = self.expect_ident()?;
                let mut exported = false;
                let mut params = Vec::new();
                loop {
                    match self.peek().clone() {
                        TokenKind::Ident(n) if n.eq_ignore_ascii_case("EXPORT") => {
                            self.advance();
                            exported = true;
                        }
                        TokenKind::Ident(n) if n.eq_ignore_ascii_case("REF") => {
                            self.advance();
                            while let TokenKind::Ident(p) = self.peek().clone() {
                                self.advance();
                                params.push(ParamDecl::Ref(p));
                            }
                        }
                        TokenKind::Ident(n) if n.eq_ignore_ascii_case("VAL") => {
                            self.advance();
                            while let TokenKind::Ident(p) = self.peek().clone() {
                                self.advance();
                                params.push(ParamDecl::Val(p));
                            }
                        }
                        _ => break,
                    }
                }
                Ok(Stmt { item: Item::ProcStart { name: proc_name, exported, params }, loc })
            }
            "ENDP" => Ok(Stmt { item: Item::ProcEnd, loc }),
            "SCOPE" => Ok(Stmt { item: Item::ScopeStart, loc }),
            "ENDS" => Ok(Stmt { item: Item::ScopeEnd, loc }),
            "MACRO" | "ENDM" => Err(self.err(format!(
                ".{} should have been consumed by the preprocessor",
                name
            ))),
            _ => {
                let args = self.parse_operands()?;
                Ok(Stmt { item: Item::Directive { name, args }, loc })
            }
        }
    }

    fn expect_ident(&mut self) -> Result<String, CompilationError> {
        match self.peek().clone() {
            TokenKind::Ident(n) => {
                self.advance();
                Ok(n)
            }
            other => Err(self.err(format!("expected identifier, found {:?}", other))),
        }
    }

    fn parse_operands(&mut self) -> Result<Vec<Rc<Expr>>, CompilationError> {
        let mut out = Vec::new();
        loop {
            match self.peek().clone() {
                TokenKind::Newline | TokenKind::Eof => break,
                TokenKind::LBracket => self.parse_bracket_group(&mut out)?,
                _ => out.push(Rc::new(self.parse_expr()?)),
            }
        }
        Ok(out)
    }

    /// `[REF a b]` or `[VAL e1 e2]` - the explicit CALL argument syntax
    /// (§4.6). Each inner expression is flattened into the operand list
    /// individually, tagged with the group's kind.
    fn parse_bracket_group(&mut self, out: &mut Vec<Rc<Expr>>) -> Result<(), CompilationError> {
        self.advance(); // '['
        let kind = match self.peek().clone() {
            TokenKind::Ident(n) if n.eq_ignore_ascii_case("REF") => {
                self.advance();
                CallArgKind::Ref
            }
            TokenKind::Ident(n) if n.eq_ignore_ascii_case("VAL") => {
                self.advance();
                CallArgKind::Val
            }
            other => return Err(self.err(format!("expected REF or VAL, found {:?}", other))),
        };
        loop {
            match self.peek().clone() {
                TokenKind::RBracket => {
                    self.advance();
                    break;
                }
                TokenKind::Newline | TokenKind::Eof => {
                    return Err(self.err("unterminated '[' group"))
                }
                _ => {
                    let inner = self.parse_expr()?;
                    out.push(Rc::new(Expr::Binding(kind, Box::new(inner))));
                }
            }
        }
        Ok(())
    }

    /// A vector is written `n1|n2|...`; folds into `Expr::Vector` when a
    /// `Pipe` follows the first number, otherwise yields a bare number.
    fn parse_expr(&mut self) -> Result<Expr, CompilationError> {
        match self.peek().clone() {
            TokenKind::Number(n0) => {
                self.advance();
                if matches!(self.peek(), TokenKind::Pipe) {
                    let mut components = vec![n0];
                    while matches!(self.peek(), TokenKind::Pipe) {
                        self.advance();
                        components.push(self.expect_number()?);
                    }
                    Ok(Expr::Vector(components))
                } else {
                    Ok(Expr::Number(n0))
                }
            }
            TokenKind::Register(r) => {
                self.advance();
                Ok(Expr::Register(r))
            }
            TokenKind::Ident(name) => {
                self.advance();
                if matches!(self.peek(), TokenKind::Colon) {
                    self.advance();
                    let value = self.expect_number()?;
                    Ok(Expr::TypedLiteral(name, value))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(self.err(format!("unexpected operand token {:?}", other))),
        }
    }

    fn expect_number(&mut self) -> Result<i64, CompilationError> {
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(n)
            }
            other => Err(self.err(format!("expected number, found {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::Lexer;

    fn parse(src: &str) -> Program {
        let toks = Lexer::new("t.asm", src).lex().unwrap();
        Parser::new(toks).parse_program().unwrap()
    }

    #[test]
    fn parses_label_and_instruction() {
        let p = parse("LOOP:\nADDR %DR0 %DR1\n");
        assert_eq!(p.stmts.len(), 2);
        assert_eq!(p.stmts[0].item, Item::Label("LOOP".into()));
        match &p.stmts[1].item {
            Item::Instruction { mnemonic, operands } => {
                assert_eq!(mnemonic, "ADDR");
                assert_eq!(operands.len(), 2);
            }
            other => panic!("expected instruction, got {:?}", other),
        }
    }

    #[test]
    fn parses_typed_literal() {
        let p = parse("SETI %DR0 DATA:7\n");
        match &p.stmts[0].item {
            Item::Instruction { operands, .. } => {
                assert_eq!(*operands[1], Expr::TypedLiteral("DATA".into(), 7));
            }
            other => panic!("expected instruction, got {:?}", other),
        }
    }

    #[test]
    fn parses_explicit_ref_val_call_brackets() {
        let p = parse("CALL P [REF %DR0] [VAL DATA:7]\n");
        match &p.stmts[0].item {
            Item::Instruction { mnemonic, operands } => {
                assert_eq!(mnemonic, "CALL");
                assert_eq!(operands.len(), 3);
                assert_eq!(*operands[1], Expr::Binding(CallArgKind::Ref, Box::new(Expr::Register(0))));
                assert_eq!(
                    *operands[2],
                    Expr::Binding(CallArgKind::Val, Box::new(Expr::TypedLiteral("DATA".into(), 7)))
                );
            }
            other => panic!("expected instruction, got {:?}", other),
        }
    }

    #[test]
    fn parses_directive_with_args() {
        let p = parse(".ORG 1\n");
        match &p.stmts[0].item {
            Item::Directive { name, args } => {
                assert_eq!(name, "ORG");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected directive, got {:?}", other),
        }
    }
}
