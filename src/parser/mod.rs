//! Recursive-descent statement parser with a Pratt expression core.
//!
//! Statements are line-sensitive: a linefeed, a `;` or a closing brace
//! terminates a statement. Expressions extend while the next token's infix
//! precedence beats the caller's minimum; `(`, `[` and `.` sit on the infix
//! ladder as the tightest left-extensions of a value.

pub mod ast;

use std::rc::Rc;

use crate::error::SyntaxError;
use crate::lexer::token::{Token, TokenKind};
use crate::lexer::Scanner;

use self::ast::{
    FieldGroup, GenericParamDecl, IfBranch, IterDecl, Node, NodeKind, ObjectDecl, Param, Pos,
    ProcDecl,
};

/// Scan and parse a whole source file into a `Script` root node.
pub fn parse(file: &str, source: &str) -> Result<Node, SyntaxError> {
    let toks = Scanner::new(file, source).tokenize()?;
    Parser::new(file, toks).parse_script()
}

pub struct Parser {
    file: Rc<str>,
    toks: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(file: &str, toks: Vec<Token>) -> Self {
        Self { file: Rc::from(file), toks, pos: 0 }
    }

    fn current(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn advance(&mut self) {
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
    }

    fn here(&self) -> Pos {
        let t = self.current();
        Pos::new(&self.file, t.line, t.col)
    }

    fn node(&self, kind: NodeKind, pos: Pos) -> Node {
        Node::new(kind, pos)
    }

    fn err(&self, message: impl Into<String>) -> SyntaxError {
        let t = self.current();
        SyntaxError::new(&self.file, t.line, t.col, message)
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), SyntaxError> {
        if self.kind() == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected {}, found {}", what, describe(self.kind()))))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, SyntaxError> {
        match self.kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.err(format!("expected {}, found {}", what, describe(&other)))),
        }
    }

    fn at_op(&self, lexeme: &str) -> bool {
        matches!(self.kind(), TokenKind::Op(info) if info.lexeme == lexeme)
    }

    fn skip_separators(&mut self) {
        while matches!(self.kind(), TokenKind::Linefeed | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn skip_linefeeds(&mut self) {
        while matches!(self.kind(), TokenKind::Linefeed) {
            self.advance();
        }
    }

    // --- Statements ------------------------------------------------------

    pub fn parse_script(&mut self) -> Result<Node, SyntaxError> {
        let pos = self.here();
        let mut stmts = Vec::new();
        self.skip_separators();
        while !matches!(self.kind(), TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
            self.end_of_stmt()?;
        }
        Ok(self.node(NodeKind::Script(stmts), pos))
    }

    /// A statement not explicitly terminated and not followed by `}` is a
    /// syntax error.
    fn end_of_stmt(&mut self) -> Result<(), SyntaxError> {
        match self.kind() {
            TokenKind::Linefeed | TokenKind::Semicolon => {
                self.skip_separators();
                Ok(())
            }
            TokenKind::RBrace | TokenKind::Eof => Ok(()),
            other => Err(self.err(format!("expected end of statement, found {}", describe(other)))),
        }
    }

    fn parse_stmt(&mut self) -> Result<Node, SyntaxError> {
        match self.kind() {
            TokenKind::LBrace => self.parse_block(),
            TokenKind::Var => self.parse_var_decl(false),
            TokenKind::Let => self.parse_var_decl(true),
            TokenKind::Proc => self.parse_proc_decl(),
            TokenKind::Iterator => self.parse_iter_decl(),
            TokenKind::Object => self.parse_object_decl(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Break => {
                let pos = self.here();
                self.advance();
                Ok(self.node(NodeKind::Break, pos))
            }
            TokenKind::Continue => {
                let pos = self.here();
                self.advance();
                Ok(self.node(NodeKind::Continue, pos))
            }
            TokenKind::Return => self.parse_return(),
            TokenKind::Yield => {
                let pos = self.here();
                self.advance();
                let value = self.parse_expr(0)?;
                Ok(self.node(NodeKind::Yield(Box::new(value)), pos))
            }
            _ => self.parse_expr(0),
        }
    }

    fn parse_block(&mut self) -> Result<Node, SyntaxError> {
        let pos = self.here();
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        self.skip_separators();
        while !matches!(self.kind(), TokenKind::RBrace | TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
            self.end_of_stmt()?;
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(self.node(NodeKind::Block(stmts), pos))
    }

    fn parse_var_decl(&mut self, is_let: bool) -> Result<Node, SyntaxError> {
        let pos = self.here();
        self.advance();
        let mut names = vec![self.expect_ident("a variable name")?];
        while matches!(self.kind(), TokenKind::Comma) {
            self.advance();
            names.push(self.expect_ident("a variable name")?);
        }
        let ty = if matches!(self.kind(), TokenKind::Colon) {
            self.advance();
            Some(Box::new(self.parse_type()?))
        } else {
            None
        };
        let value = if matches!(self.kind(), TokenKind::Assign) {
            self.advance();
            Some(Box::new(self.parse_expr(0)?))
        } else {
            None
        };
        Ok(self.node(NodeKind::VarDecl { is_let, names, ty, value }, pos))
    }

    fn parse_generics(&mut self) -> Result<Vec<GenericParamDecl>, SyntaxError> {
        let mut generics = Vec::new();
        if !matches!(self.kind(), TokenKind::LBracket) {
            return Ok(generics);
        }
        self.advance();
        loop {
            let name = self.expect_ident("a generic parameter name")?;
            let constraint = if matches!(self.kind(), TokenKind::Colon) {
                self.advance();
                Some(self.parse_type()?)
            } else {
                None
            };
            generics.push(GenericParamDecl { name, constraint });
            if matches!(self.kind(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(generics)
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, SyntaxError> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        self.skip_linefeeds();
        if !matches!(self.kind(), TokenKind::RParen) {
            loop {
                self.skip_linefeeds();
                let name = self.expect_ident("a parameter name")?;
                self.expect(&TokenKind::Colon, "':'")?;
                let ty = self.parse_type()?;
                params.push(Param { name, ty });
                self.skip_linefeeds();
                if matches!(self.kind(), TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.skip_linefeeds();
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(params)
    }

    fn parse_ret_ty(&mut self) -> Result<Option<Node>, SyntaxError> {
        if self.at_op("->") {
            self.advance();
            Ok(Some(self.parse_type()?))
        } else {
            Ok(None)
        }
    }

    fn parse_proc_decl(&mut self) -> Result<Node, SyntaxError> {
        let pos = self.here();
        self.advance();
        let name = self.parse_routine_name()?;
        let generics = self.parse_generics()?;
        let params = self.parse_params()?;
        let ret = self.parse_ret_ty()?;
        let body = self.parse_block()?;
        let decl = ProcDecl { name, generics, params, ret, body };
        Ok(self.node(NodeKind::ProcDecl(Box::new(decl)), pos))
    }

    /// Procs may be named by an identifier or an operator lexeme, which is
    /// how user operators get their overloads.
    fn parse_routine_name(&mut self) -> Result<String, SyntaxError> {
        match self.kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::Op(info) => {
                self.advance();
                Ok(info.lexeme)
            }
            other => Err(self.err(format!("expected a proc name, found {}", describe(&other)))),
        }
    }

    fn parse_iter_decl(&mut self) -> Result<Node, SyntaxError> {
        let pos = self.here();
        self.advance();
        let name = self.expect_ident("an iterator name")?;
        let generics = self.parse_generics()?;
        let params = self.parse_params()?;
        let yield_ty = self.parse_ret_ty()?;
        let body = self.parse_block()?;
        let decl = IterDecl { name, generics, params, yield_ty, body };
        Ok(self.node(NodeKind::IterDecl(Box::new(decl)), pos))
    }

    fn parse_object_decl(&mut self) -> Result<Node, SyntaxError> {
        let pos = self.here();
        self.advance();
        let name = self.expect_ident("an object name")?;
        let generics = self.parse_generics()?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        self.skip_separators();
        let mut fields = Vec::new();
        while !matches!(self.kind(), TokenKind::RBrace | TokenKind::Eof) {
            let mut names = vec![self.expect_ident("a field name")?];
            while matches!(self.kind(), TokenKind::Comma) {
                self.advance();
                names.push(self.expect_ident("a field name")?);
            }
            self.expect(&TokenKind::Colon, "':'")?;
            let ty = self.parse_type()?;
            fields.push(FieldGroup { names, ty });
            match self.kind() {
                TokenKind::Linefeed | TokenKind::Semicolon => self.skip_separators(),
                TokenKind::RBrace => break,
                other => {
                    return Err(self
                        .err(format!("expected end of field group, found {}", describe(other))))
                }
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        let decl = ObjectDecl { name, generics, fields };
        Ok(self.node(NodeKind::ObjectDecl(Box::new(decl)), pos))
    }

    fn parse_while(&mut self) -> Result<Node, SyntaxError> {
        let pos = self.here();
        self.advance();
        let cond = self.parse_expr(0)?;
        let body = self.parse_block()?;
        Ok(self.node(NodeKind::While { cond: Box::new(cond), body: Box::new(body) }, pos))
    }

    fn parse_for(&mut self) -> Result<Node, SyntaxError> {
        let pos = self.here();
        self.advance();
        let var = self.expect_ident("a loop variable")?;
        self.expect(&TokenKind::In, "'in'")?;
        let call = self.parse_expr(0)?;
        let body = self.parse_block()?;
        Ok(self.node(
            NodeKind::For { var, call: Box::new(call), body: Box::new(body) },
            pos,
        ))
    }

    fn parse_return(&mut self) -> Result<Node, SyntaxError> {
        let pos = self.here();
        self.advance();
        let value = match self.kind() {
            TokenKind::Linefeed | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof => None,
            _ => Some(Box::new(self.parse_expr(0)?)),
        };
        Ok(self.node(NodeKind::Return(value), pos))
    }

    // --- Types -----------------------------------------------------------

    /// A type is an expression parsed at minimum precedence 9, or an
    /// anonymous `proc` head.
    fn parse_type(&mut self) -> Result<Node, SyntaxError> {
        if matches!(self.kind(), TokenKind::Proc) {
            let pos = self.here();
            self.advance();
            self.expect(&TokenKind::LParen, "'('")?;
            let mut params = Vec::new();
            if !matches!(self.kind(), TokenKind::RParen) {
                loop {
                    params.push(self.parse_expr(9)?);
                    if matches!(self.kind(), TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "')'")?;
            let ret = if self.at_op("->") {
                self.advance();
                Some(Box::new(self.parse_type()?))
            } else {
                None
            };
            return Ok(self.node(NodeKind::ProcTy { params, ret }, pos));
        }
        self.parse_expr(9)
    }

    // --- Expressions ------------------------------------------------------

    /// Pratt loop: read a prefix expression, then extend while the next
    /// token binds tighter than the caller's minimum.
    fn parse_expr(&mut self, min_prec: i32) -> Result<Node, SyntaxError> {
        let mut left = self.parse_prefix()?;
        loop {
            let prec = self.kind().infix_prec();
            if prec <= min_prec {
                break;
            }
            left = self.parse_infix(left, prec)?;
        }
        Ok(left)
    }

    fn parse_infix(&mut self, left: Node, prec: i32) -> Result<Node, SyntaxError> {
        let pos = self.here();
        match self.kind().clone() {
            TokenKind::LParen => {
                self.advance();
                let args = self.parse_arg_list(&TokenKind::RParen, "')'")?;
                Ok(self.node(NodeKind::Call { callee: Box::new(left), args }, pos))
            }
            TokenKind::LBracket => {
                self.advance();
                let args = self.parse_arg_list(&TokenKind::RBracket, "']'")?;
                Ok(self.node(NodeKind::Index { callee: Box::new(left), args }, pos))
            }
            TokenKind::Dot => {
                self.advance();
                let name = self.expect_ident("a field name")?;
                Ok(self.node(NodeKind::Dot { lhs: Box::new(left), name }, pos))
            }
            TokenKind::Colon => {
                self.advance();
                let rhs = self.parse_expr(prec)?;
                Ok(self.node(
                    NodeKind::Colon { lhs: Box::new(left), rhs: Box::new(rhs) },
                    pos,
                ))
            }
            TokenKind::Assign => {
                self.advance();
                let rhs = self.parse_expr(prec)?;
                Ok(self.node(
                    NodeKind::Infix { op: "=".to_string(), lhs: Box::new(left), rhs: Box::new(rhs) },
                    pos,
                ))
            }
            TokenKind::In => {
                self.advance();
                let rhs = self.parse_expr(prec)?;
                Ok(self.node(
                    NodeKind::Infix { op: "in".to_string(), lhs: Box::new(left), rhs: Box::new(rhs) },
                    pos,
                ))
            }
            TokenKind::Op(info) => {
                self.advance();
                let sub_min = if info.left_assoc { info.prec } else { info.prec - 1 };
                let rhs = self.parse_expr(sub_min)?;
                Ok(self.node(
                    NodeKind::Infix { op: info.lexeme, lhs: Box::new(left), rhs: Box::new(rhs) },
                    pos,
                ))
            }
            other => Err(self.err(format!("unexpected {} in expression", describe(&other)))),
        }
    }

    fn parse_arg_list(
        &mut self,
        close: &TokenKind,
        close_name: &str,
    ) -> Result<Vec<Node>, SyntaxError> {
        let mut args = Vec::new();
        self.skip_linefeeds();
        if self.kind() != close {
            loop {
                self.skip_linefeeds();
                args.push(self.parse_expr(0)?);
                self.skip_linefeeds();
                if matches!(self.kind(), TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.skip_linefeeds();
        self.expect(close, close_name)?;
        Ok(args)
    }

    fn parse_prefix(&mut self) -> Result<Node, SyntaxError> {
        let pos = self.here();
        match self.kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(self.node(NodeKind::Number(n), pos))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(self.node(NodeKind::Str(s), pos))
            }
            TokenKind::True => {
                self.advance();
                Ok(self.node(NodeKind::True, pos))
            }
            TokenKind::False => {
                self.advance();
                Ok(self.node(NodeKind::False, pos))
            }
            TokenKind::Null => {
                self.advance();
                Ok(self.node(NodeKind::Null, pos))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(self.node(NodeKind::Ident(name), pos))
            }
            TokenKind::Op(info) => {
                self.advance();
                let operand = self.parse_expr(10)?;
                Ok(self.node(
                    NodeKind::Prefix { op: info.lexeme, operand: Box::new(operand) },
                    pos,
                ))
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_linefeeds();
                let inner = self.parse_expr(0)?;
                self.skip_linefeeds();
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::If => self.parse_if(),
            TokenKind::Proc => self.parse_type(),
            other => Err(self.err(format!("unexpected {}", describe(&other)))),
        }
    }

    fn parse_if(&mut self) -> Result<Node, SyntaxError> {
        let pos = self.here();
        self.expect(&TokenKind::If, "'if'")?;
        let mut branches = Vec::new();
        let cond = self.parse_expr(0)?;
        let body = self.parse_block()?;
        branches.push(IfBranch { cond, body });
        let mut else_body = None;
        loop {
            match self.kind() {
                TokenKind::Elif => {
                    self.advance();
                    let cond = self.parse_expr(0)?;
                    let body = self.parse_block()?;
                    branches.push(IfBranch { cond, body });
                }
                TokenKind::Else => {
                    self.advance();
                    else_body = Some(Box::new(self.parse_block()?));
                    break;
                }
                _ => break,
            }
        }
        Ok(self.node(NodeKind::If { branches, else_body }, pos))
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Linefeed => "end of line".to_string(),
        TokenKind::Eof => "end of file".to_string(),
        TokenKind::Ident(name) => format!("'{}'", name),
        TokenKind::Number(n) => format!("'{}'", n),
        TokenKind::Str(_) => "a string literal".to_string(),
        TokenKind::Op(info) => format!("'{}'", info.lexeme),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::LBracket => "'['".to_string(),
        TokenKind::RBracket => "']'".to_string(),
        TokenKind::LBrace => "'{'".to_string(),
        TokenKind::RBrace => "'}'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Semicolon => "';'".to_string(),
        TokenKind::Dot => "'.'".to_string(),
        TokenKind::Assign => "'='".to_string(),
        TokenKind::Colon => "':'".to_string(),
        TokenKind::ColonColon => "'::'".to_string(),
        other => format!("'{:?}'", other).to_lowercase(),
    }
}
