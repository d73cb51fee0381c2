//! Parser for the in-process script language

use crate::lexer::{syntax_error, Token, TokenKind};
use crate::value::Value;
use scriptbind_core::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaParam {
    pub name: String,
    pub ty: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Vec<LambdaParam>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Member(Box<Expr>, String),
    Lambda(Arc<Lambda>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Decl {
        name: String,
        mutable: bool,
        annotations: Vec<String>,
        ty: Option<String>,
        value: Expr,
        offset: usize,
    },
    Assign {
        name: String,
        value: Expr,
        offset: usize,
    },
    Expr(Expr),
}

pub fn parse(source: &str, tokens: Vec<Token>) -> Result<Vec<Stmt>> {
    Parser {
        source,
        tokens,
        pos: 0,
    }
    .program()
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn nth_kind(&self, n: usize) -> &TokenKind {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    fn error(&self, message: String) -> scriptbind_core::ScriptbindError {
        let token = self.peek();
        let found = match &token.kind {
            TokenKind::Eof => "end of input".to_string(),
            other => format!("{:?}", other),
        };
        syntax_error(self.source, token.offset, format!("{}, found {}", message, found))
    }

    /// An operator on a new line starts a new statement
    fn continues(&self) -> bool {
        !self.peek().newline_before
    }

    fn program(mut self) -> Result<Vec<Stmt>> {
        self.skip_contract_header();
        let mut statements = Vec::new();
        loop {
            while self.eat(&TokenKind::Semicolon) {}
            if self.check(&TokenKind::Eof) {
                break;
            }
            statements.push(self.statement()?);
            if !self.check(&TokenKind::Eof)
                && !self.check(&TokenKind::Semicolon)
                && !self.peek().newline_before
            {
                return Err(self.error("expected end of statement".to_string()));
            }
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Stmt> {
        let mut annotations = Vec::new();
        while let TokenKind::Annotation(name) = self.peek_kind().clone() {
            annotations.push(name);
            self.pos += 1;
        }

        let offset = self.peek().offset;
        let mutable = match self.peek_kind() {
            TokenKind::Val => false,
            TokenKind::Var => true,
            _ if !annotations.is_empty() => {
                return Err(self.error("expected declaration after annotation".to_string()))
            }
            TokenKind::Ident(name) if *self.nth_kind(1) == TokenKind::Assign => {
                let name = name.clone();
                self.pos += 2;
                let value = self.expression()?;
                return Ok(Stmt::Assign {
                    name,
                    value,
                    offset,
                });
            }
            _ => return Ok(Stmt::Expr(self.expression()?)),
        };
        self.pos += 1;

        let name = self.ident("a name")?;
        let ty = if self.eat(&TokenKind::Colon) {
            Some(self.type_name()?)
        } else {
            None
        };
        self.expect(&TokenKind::Assign, "`=`")?;
        let value = self.expression()?;

        Ok(Stmt::Decl {
            name,
            mutable,
            annotations,
            ty,
            value,
            offset,
        })
    }

    /// Parse a type and render it as text
    fn type_name(&mut self) -> Result<String> {
        let mut text = if self.eat(&TokenKind::LParen) {
            let mut members = Vec::new();
            if !self.check(&TokenKind::RParen) {
                loop {
                    members.push(self.type_name()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "`)`")?;

            if self.eat(&TokenKind::Arrow) {
                let ret = self.type_name()?;
                return Ok(format!("({}) -> {}", members.join(", "), ret));
            }
            if members.len() != 1 {
                return Err(self.error("expected `->` after parameter types".to_string()));
            }
            format!("({})", members.remove(0))
        } else {
            let mut name = self.ident("a type")?;
            while self.check(&TokenKind::Dot) {
                self.pos += 1;
                name.push('.');
                name.push_str(&self.ident("a type")?);
            }
            if self.eat(&TokenKind::Lt) {
                let mut args = Vec::new();
                loop {
                    args.push(self.type_name()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::Gt, "`>`")?;
                name = format!("{}<{}>", name, args.join(", "));
            }
            name
        };

        if self.eat(&TokenKind::Question) {
            text.push('?');
        }
        Ok(text)
    }

    fn expression(&mut self) -> Result<Expr> {
        self.or()
    }

    fn or(&mut self) -> Result<Expr> {
        let mut lhs = self.and()?;
        while self.eat(&TokenKind::OrOr) {
            let rhs = self.and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    /// Skip a leading `(A, B) -> R` line declaring the script's contract
    fn skip_contract_header(&mut self) {
        if !self.check(&TokenKind::LParen) {
            return;
        }
        let start = self.pos;
        let is_function_type =
            matches!(self.type_name(), Ok(ty) if ty.starts_with('(') && ty.contains("->"));
        let is_header = is_function_type
            && (self.check(&TokenKind::Eof)
                || self.check(&TokenKind::Semicolon)
                || self.peek().newline_before);
        if !is_header {
            self.pos = start;
        }
    }

    fn and(&mut self) -> Result<Expr> {
        let mut lhs = self.equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let rhs = self.equality()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn binary_level(
        &mut self,
        ops: &[(TokenKind, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut lhs = next(self)?;
        loop {
            if !self.continues() {
                break;
            }
            let Some(op) = ops
                .iter()
                .find(|(kind, _)| self.check(kind))
                .map(|(_, op)| *op)
            else {
                break;
            };
            self.pos += 1;
            let rhs = next(self)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary_level(
            &[(TokenKind::EqEq, BinaryOp::Eq), (TokenKind::NotEq, BinaryOp::Ne)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::LtEq, BinaryOp::Le),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::GtEq, BinaryOp::Ge),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr> {
        self.binary_level(
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.pos += 1;
        Ok(Expr::Unary(op, Box::new(self.unary()?)))
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.check(&TokenKind::LParen) && self.continues() {
                self.pos += 1;
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "`)`")?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat(&TokenKind::Dot) {
                let name = self.ident("a member name")?;
                expr = Expr::Member(Box::new(expr), name);
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let expr = match self.peek_kind().clone() {
            TokenKind::Int(i) => Expr::Literal(Value::Int(i)),
            TokenKind::Float(f) => Expr::Literal(Value::Float(f)),
            TokenKind::Str(s) => Expr::Literal(Value::String(s)),
            TokenKind::True => Expr::Literal(Value::Bool(true)),
            TokenKind::False => Expr::Literal(Value::Bool(false)),
            TokenKind::Null => Expr::Literal(Value::Null),
            TokenKind::Ident(name) => Expr::Ident(name),
            TokenKind::LParen => {
                self.pos += 1;
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                return Ok(inner);
            }
            TokenKind::LBrace => {
                self.pos += 1;
                return self.lambda();
            }
            _ => return Err(self.error("expected an expression".to_string())),
        };
        self.pos += 1;
        Ok(expr)
    }

    /// Lambda body after `{`; parameters are optional
    fn lambda(&mut self) -> Result<Expr> {
        let start = self.pos;
        let params = match self.lambda_params() {
            Ok(params) => params,
            Err(_) => {
                self.pos = start;
                Vec::new()
            }
        };

        let body = self.expression()?;
        self.expect(&TokenKind::RBrace, "`}`")?;
        Ok(Expr::Lambda(Arc::new(Lambda { params, body })))
    }

    fn lambda_params(&mut self) -> Result<Vec<LambdaParam>> {
        let mut params = Vec::new();
        loop {
            let name = self.ident("a parameter")?;
            let ty = if self.eat(&TokenKind::Colon) {
                Some(self.type_name()?)
            } else {
                None
            };
            params.push(LambdaParam { name, ty });
            if self.eat(&TokenKind::Arrow) {
                return Ok(params);
            }
            self.expect(&TokenKind::Comma, "`,` or `->`")?;
        }
    }
}
