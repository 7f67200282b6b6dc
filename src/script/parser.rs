//! Recursive-descent parser producing the statement tree the interpreter walks.

use super::lexer::{Lexer, TemplatePart, Token, TokenKind};
use super::{DeclKind, ScriptError};

const MAX_DEPTH: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Decl { kind: DeclKind, decls: Vec<Declarator> },
    Expr(Expr),
    If { test: Expr, then: Box<Stmt>, otherwise: Option<Box<Stmt>> },
    While { test: Expr, body: Box<Stmt> },
    For { init: Option<Box<Stmt>>, test: Option<Expr>, update: Option<Expr>, body: Box<Stmt> },
    Block(Vec<Stmt>),
    Break(Pos),
    Continue(Pos),
    Throw(Expr, Pos),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add, Sub, Mul, Div, Rem, Pow,
    Eq, NotEq, StrictEq, StrictNotEq,
    Lt, LtEq, Gt, GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSeg {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Template(Vec<TemplateSeg>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Ident(String, Pos),
    Member { object: Box<Expr>, property: String, pos: Pos },
    Index { object: Box<Expr>, index: Box<Expr>, pos: Pos },
    Call { callee: Box<Expr>, args: Vec<Expr>, pos: Pos },
    Unary { op: UnaryOp, operand: Box<Expr>, pos: Pos },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr>, pos: Pos },
    Logical { op: LogicOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Conditional { test: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    /// `op` is `None` for plain `=`.
    Assign { op: Option<BinOp>, target: Box<Expr>, value: Box<Expr>, pos: Pos },
    Update { increment: bool, prefix: bool, target: Box<Expr>, pos: Pos },
}

pub fn parse_program(src: &str) -> Result<Vec<Stmt>, ScriptError> {
    let tokens = Lexer::new(src).lex()?;
    Parser::new(tokens).parse_program()
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, depth: 0 }
    }

    pub fn parse_program(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut out = Vec::new();
        while !self.at_eof() {
            out.push(self.parse_statement()?);
        }
        Ok(out)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.enter()?;
        let stmt = self.parse_statement_inner();
        self.depth -= 1;
        stmt
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, ScriptError> {
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::Keyword(kw @ ("let" | "const" | "var")) => {
                let kind = match *kw {
                    "let" => DeclKind::Let,
                    "const" => DeclKind::Const,
                    _ => DeclKind::Var,
                };
                self.advance();
                let stmt = self.parse_declarators(kind)?;
                self.eat_semicolon();
                Ok(stmt)
            }
            TokenKind::Keyword("if") => {
                self.advance();
                self.consume_punct("(")?;
                let test = self.parse_expression()?;
                self.consume_punct(")")?;
                let then = Box::new(self.parse_statement()?);
                let otherwise = if self.peek_keyword("else") {
                    self.advance();
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Stmt::If { test, then, otherwise })
            }
            TokenKind::Keyword("while") => {
                self.advance();
                self.consume_punct("(")?;
                let test = self.parse_expression()?;
                self.consume_punct(")")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::While { test, body })
            }
            TokenKind::Keyword("for") => self.parse_for(),
            TokenKind::Keyword("break") => {
                self.advance();
                self.eat_semicolon();
                Ok(Stmt::Break(Pos { line: tok.line, col: tok.col }))
            }
            TokenKind::Keyword("continue") => {
                self.advance();
                self.eat_semicolon();
                Ok(Stmt::Continue(Pos { line: tok.line, col: tok.col }))
            }
            TokenKind::Keyword("throw") => {
                self.advance();
                let value = self.parse_expression()?;
                self.eat_semicolon();
                Ok(Stmt::Throw(value, Pos { line: tok.line, col: tok.col }))
            }
            TokenKind::Keyword(kw @ ("function" | "return" | "class")) => Err(ScriptError::syntax(
                format!("'{kw}' is not available in this realm yet"),
                tok.line,
                tok.col,
            )),
            TokenKind::Punct("{") => {
                self.advance();
                let mut body = Vec::new();
                while !self.peek_punct("}") {
                    if self.at_eof() {
                        return Err(self.unexpected());
                    }
                    body.push(self.parse_statement()?);
                }
                self.advance();
                Ok(Stmt::Block(body))
            }
            TokenKind::Punct(";") => {
                self.advance();
                Ok(Stmt::Empty)
            }
            _ => {
                let expr = self.parse_expression()?;
                self.eat_semicolon();
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_declarators(&mut self, kind: DeclKind) -> Result<Stmt, ScriptError> {
        let mut decls = Vec::new();
        loop {
            let tok = self.peek().clone();
            let name = self.expect_identifier()?;
            let init = if self.peek_punct("=") {
                self.advance();
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(ScriptError::syntax("Missing initializer in const declaration", tok.line, tok.col));
            }
            decls.push(Declarator { name, init, pos: Pos { line: tok.line, col: tok.col } });
            if self.peek_punct(",") {
                self.advance();
            } else {
                break;
            }
        }
        Ok(Stmt::Decl { kind, decls })
    }

    fn parse_for(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        self.consume_punct("(")?;
        let init = if self.peek_punct(";") {
            None
        } else if let TokenKind::Keyword(kw @ ("let" | "const" | "var")) = self.peek().kind {
            let kind = match kw {
                "let" => DeclKind::Let,
                "const" => DeclKind::Const,
                _ => DeclKind::Var,
            };
            self.advance();
            Some(Box::new(self.parse_declarators(kind)?))
        } else {
            Some(Box::new(Stmt::Expr(self.parse_expression()?)))
        };
        self.consume_punct(";")?;
        let test = if self.peek_punct(";") { None } else { Some(self.parse_expression()?) };
        self.consume_punct(";")?;
        let update = if self.peek_punct(")") { None } else { Some(self.parse_expression()?) };
        self.consume_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For { init, test, update, body })
    }

    pub fn parse_expression(&mut self) -> Result<Expr, ScriptError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let out = self.parse_assignment_inner();
        self.depth -= 1;
        out
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, ScriptError> {
        let lhs = self.parse_conditional()?;
        let tok = self.peek().clone();
        let op = match tok.kind {
            TokenKind::Punct("=") => None,
            TokenKind::Punct("+=") => Some(BinOp::Add),
            TokenKind::Punct("-=") => Some(BinOp::Sub),
            TokenKind::Punct("*=") => Some(BinOp::Mul),
            TokenKind::Punct("/=") => Some(BinOp::Div),
            TokenKind::Punct("%=") => Some(BinOp::Rem),
            _ => return Ok(lhs),
        };
        if !is_assignable(&lhs) {
            return Err(ScriptError::syntax("Invalid left-hand side in assignment", tok.line, tok.col));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign { op, target: Box::new(lhs), value: Box::new(value), pos: Pos { line: tok.line, col: tok.col } })
    }

    fn parse_conditional(&mut self) -> Result<Expr, ScriptError> {
        let test = self.parse_or()?;
        if !self.peek_punct("?") {
            return Ok(test);
        }
        self.advance();
        let then = self.parse_assignment()?;
        self.consume_punct(":")?;
        let otherwise = self.parse_assignment()?;
        Ok(Expr::Conditional { test: Box::new(test), then: Box::new(then), otherwise: Box::new(otherwise) })
    }

    fn parse_or(&mut self) -> Result<Expr, ScriptError> {
        self.chained(Self::parse_or_chain)
    }

    fn parse_or_chain(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_and()?;
        while self.peek_punct("||") {
            self.enter()?;
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Logical { op: LogicOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ScriptError> {
        self.chained(Self::parse_and_chain)
    }

    fn parse_and_chain(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_equality()?;
        while self.peek_punct("&&") {
            self.enter()?;
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Logical { op: LogicOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(Self::parse_relational, &[
            ("===", BinOp::StrictEq),
            ("!==", BinOp::StrictNotEq),
            ("==", BinOp::Eq),
            ("!=", BinOp::NotEq),
        ])
    }

    fn parse_relational(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(Self::parse_additive, &[
            ("<=", BinOp::LtEq),
            (">=", BinOp::GtEq),
            ("<", BinOp::Lt),
            (">", BinOp::Gt),
        ])
    }

    fn parse_additive(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(Self::parse_term, &[("+", BinOp::Add), ("-", BinOp::Sub)])
    }

    fn parse_term(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(Self::parse_exponent, &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)])
    }

    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
        ops: &[(&str, BinOp)],
    ) -> Result<Expr, ScriptError> {
        self.chained(|p| p.parse_binary_chain(next, ops))
    }

    fn parse_binary_chain(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
        ops: &[(&str, BinOp)],
    ) -> Result<Expr, ScriptError> {
        let mut lhs = next(self)?;
        loop {
            let tok = self.peek().clone();
            let found = match &tok.kind {
                TokenKind::Punct(p) => ops.iter().find(|(s, _)| s == p).map(|(_, op)| *op),
                _ => None,
            };
            let Some(op) = found else { break };
            self.enter()?;
            self.advance();
            let rhs = next(self)?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), pos: Pos { line: tok.line, col: tok.col } };
        }
        Ok(lhs)
    }

    fn parse_exponent(&mut self) -> Result<Expr, ScriptError> {
        self.chained(Self::parse_exponent_chain)
    }

    fn parse_exponent_chain(&mut self) -> Result<Expr, ScriptError> {
        let base = self.parse_unary()?;
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Punct("**") {
            return Ok(base);
        }
        self.enter()?;
        self.advance();
        let exp = self.parse_exponent()?;
        Ok(Expr::Binary { op: BinOp::Pow, lhs: Box::new(base), rhs: Box::new(exp), pos: Pos { line: tok.line, col: tok.col } })
    }

    fn parse_unary(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let out = self.parse_unary_inner();
        self.depth -= 1;
        out
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, ScriptError> {
        let tok = self.peek().clone();
        let pos = Pos { line: tok.line, col: tok.col };
        let op = match tok.kind {
            TokenKind::Punct("!") => UnaryOp::Not,
            TokenKind::Punct("-") => UnaryOp::Neg,
            TokenKind::Punct("+") => UnaryOp::Plus,
            TokenKind::Keyword("typeof") => UnaryOp::TypeOf,
            TokenKind::Punct(p @ ("++" | "--")) => {
                self.advance();
                let target = self.parse_unary()?;
                if !is_assignable(&target) {
                    return Err(ScriptError::syntax("Invalid left-hand side expression in prefix operation", tok.line, tok.col));
                }
                return Ok(Expr::Update { increment: p == "++", prefix: true, target: Box::new(target), pos });
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::Unary { op, operand: Box::new(operand), pos })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ScriptError> {
        let expr = self.parse_call_member()?;
        let tok = self.peek().clone();
        if let TokenKind::Punct(p @ ("++" | "--")) = tok.kind {
            if !is_assignable(&expr) {
                return Err(ScriptError::syntax("Invalid left-hand side expression in postfix operation", tok.line, tok.col));
            }
            self.advance();
            return Ok(Expr::Update {
                increment: p == "++",
                prefix: false,
                target: Box::new(expr),
                pos: Pos { line: tok.line, col: tok.col },
            });
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> Result<Expr, ScriptError> {
        self.chained(Self::parse_call_member_chain)
    }

    fn parse_call_member_chain(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.parse_primary()?;
        loop {
            let tok = self.peek().clone();
            let pos = Pos { line: tok.line, col: tok.col };
            if matches!(tok.kind, TokenKind::Punct("." | "[" | "(")) {
                self.enter()?;
            }
            match tok.kind {
                TokenKind::Punct(".") => {
                    self.advance();
                    let property = self.expect_property_name()?;
                    expr = Expr::Member { object: Box::new(expr), property, pos };
                }
                TokenKind::Punct("[") => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.consume_punct("]")?;
                    expr = Expr::Index { object: Box::new(expr), index: Box::new(index), pos };
                }
                TokenKind::Punct("(") => {
                    self.advance();
                    let args = self.parse_list(")")?;
                    expr = Expr::Call { callee: Box::new(expr), args, pos };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ScriptError> {
        let tok = self.peek().clone();
        let pos = Pos { line: tok.line, col: tok.col };
        let expr = match tok.kind {
            TokenKind::Number(n) => Expr::Number(n),
            TokenKind::Str(s) => Expr::Str(s),
            TokenKind::Template(parts) => {
                self.advance();
                return self.build_template(parts);
            }
            TokenKind::Keyword("true") => Expr::Bool(true),
            TokenKind::Keyword("false") => Expr::Bool(false),
            TokenKind::Keyword("null") => Expr::Null,
            TokenKind::Keyword("undefined") => Expr::Undefined,
            TokenKind::Identifier(name) => Expr::Ident(name, pos),
            TokenKind::Punct("(") => {
                self.advance();
                let inner = self.parse_expression()?;
                self.consume_punct(")")?;
                return Ok(inner);
            }
            TokenKind::Punct("[") => {
                self.advance();
                return Ok(Expr::Array(self.parse_list("]")?));
            }
            TokenKind::Punct("{") => {
                self.advance();
                return self.parse_object();
            }
            TokenKind::Keyword("new") => {
                // Only built-in constructors exist, and they behave the same with or without `new`.
                self.advance();
                return match self.parse_call_member()? {
                    call @ Expr::Call { .. } => Ok(call),
                    callee => Ok(Expr::Call { callee: Box::new(callee), args: Vec::new(), pos }),
                };
            }
            TokenKind::Keyword(kw @ ("function" | "class")) => {
                return Err(ScriptError::syntax(format!("'{kw}' is not available in this realm yet"), tok.line, tok.col));
            }
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(expr)
    }

    fn build_template(&mut self, parts: Vec<TemplatePart>) -> Result<Expr, ScriptError> {
        let mut segs = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                TemplatePart::Text(t) => segs.push(TemplateSeg::Text(t)),
                TemplatePart::Expr { src, line, col } => {
                    let tokens = Lexer::at(&src, line, col).lex()?;
                    let mut sub = Parser { tokens, pos: 0, depth: self.depth };
                    let expr = sub.parse_expression()?;
                    if !sub.at_eof() {
                        return Err(sub.unexpected());
                    }
                    segs.push(TemplateSeg::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(segs))
    }

    fn parse_object(&mut self) -> Result<Expr, ScriptError> {
        let mut props = Vec::new();
        while !self.peek_punct("}") {
            let tok = self.peek().clone();
            let key = match tok.kind {
                TokenKind::Identifier(s) | TokenKind::Str(s) => s,
                TokenKind::Keyword(k) => k.to_string(),
                TokenKind::Number(n) => super::value::number_to_string(n),
                _ => return Err(self.unexpected()),
            };
            self.advance();
            let value = if self.peek_punct(":") {
                self.advance();
                self.parse_assignment()?
            } else {
                // Shorthand `{ name }`.
                Expr::Ident(key.clone(), Pos { line: tok.line, col: tok.col })
            };
            props.push((key, value));
            if self.peek_punct(",") {
                self.advance();
            } else {
                break;
            }
        }
        self.consume_punct("}")?;
        Ok(Expr::Object(props))
    }

    fn parse_list(&mut self, close: &str) -> Result<Vec<Expr>, ScriptError> {
        let mut items = Vec::new();
        while !self.peek_punct(close) {
            items.push(self.parse_assignment()?);
            if self.peek_punct(",") {
                self.advance();
            } else {
                break;
            }
        }
        self.consume_punct(close)?;
        Ok(items)
    }

    /// Run a production that folds operators into a left-deep tree. Every
    /// fold counts as one level of nesting until the production returns.
    fn chained<T>(&mut self, production: impl FnOnce(&mut Self) -> Result<T, ScriptError>) -> Result<T, ScriptError> {
        let depth = self.depth;
        let out = production(self);
        self.depth = depth;
        out
    }

    fn enter(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            let tok = self.peek();
            return Err(ScriptError::syntax("Code is nested too deeply", tok.line, tok.col));
        }
        Ok(())
    }

    fn expect_identifier(&mut self) -> Result<String, ScriptError> {
        match self.peek().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn expect_property_name(&mut self) -> Result<String, ScriptError> {
        match self.peek().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::Keyword(kw) => {
                self.advance();
                Ok(kw.to_string())
            }
            _ => Err(self.unexpected()),
        }
    }

    fn consume_punct(&mut self, p: &str) -> Result<(), ScriptError> {
        if self.peek_punct(p) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn eat_semicolon(&mut self) {
        if self.peek_punct(";") {
            self.advance();
        }
    }

    fn unexpected(&self) -> ScriptError {
        let tok = self.peek();
        let message = match &tok.kind {
            TokenKind::Eof => "Unexpected end of input".to_string(),
            TokenKind::Identifier(s) => format!("Unexpected identifier '{s}'"),
            TokenKind::Keyword(s) => format!("Unexpected token '{s}'"),
            TokenKind::Punct(s) => format!("Unexpected token '{s}'"),
            TokenKind::Number(_) => "Unexpected number".to_string(),
            TokenKind::Str(_) | TokenKind::Template(_) => "Unexpected string".to_string(),
        };
        ScriptError::syntax(message, tok.line, tok.col)
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_punct(&self, p: &str) -> bool {
        matches!(self.peek().kind, TokenKind::Punct(q) if q == p)
    }

    fn peek_keyword(&self, k: &str) -> bool {
        matches!(self.peek().kind, TokenKind::Keyword(q) if q == k)
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(expr, Expr::Ident(..) | Expr::Member { .. } | Expr::Index { .. })
}
