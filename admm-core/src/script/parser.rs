//! Recursive-descent parser.

use std::collections::HashSet;

use super::ast::{BinaryOp, Block, Expr, ExprKind, Function, Param, Program, Stmt, UnaryOp};
use super::lexer::{Token, TokenKind};
use super::{ErrorCode, ScriptError, ScriptResult, Span};

/// Maximum expression/block nesting accepted from untrusted source.
pub const MAX_NESTING: usize = 64;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| &t.kind) != Some(&TokenKind::Eof) {
            let span = tokens.last().map_or(Span::new(1, 1), |t| t.span);
            tokens.push(Token { kind: TokenKind::Eof, span });
        }
        Self { tokens, pos: 0, depth: 0 }
    }

    pub fn parse_program(mut self) -> ScriptResult<Program> {
        let mut functions: Vec<Function> = Vec::new();
        while !self.at(&TokenKind::Eof) {
            let function = self.parse_function()?;
            if functions.iter().any(|f| f.name == function.name) {
                return Err(ScriptError::new(
                    ErrorCode::DuplicateFunction,
                    format!("function `{}` is defined more than once", function.name),
                    Some(function.span),
                ));
            }
            functions.push(function);
        }
        Ok(Program { functions })
    }

    fn peek(&self) -> &Token {
        // the stream always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ScriptError {
        let tok = self.peek();
        let code = if tok.kind == TokenKind::Eof {
            ErrorCode::UnexpectedEnd
        } else {
            ErrorCode::UnexpectedToken
        };
        ScriptError::new(
            code,
            format!("expected {expected}, found {}", tok.kind.describe()),
            Some(tok.span),
        )
    }

    fn expect(&mut self, kind: TokenKind) -> ScriptResult<Span> {
        if self.at(&kind) {
            Ok(self.advance().span)
        } else {
            Err(self.unexpected(&kind.describe()))
        }
    }

    fn expect_ident(&mut self) -> ScriptResult<(String, Span)> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn enter(&mut self) -> ScriptResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ScriptError::new(
                ErrorCode::NestingTooDeep,
                format!("nesting deeper than {MAX_NESTING} levels"),
                Some(self.peek().span),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Every operator appended to a left-associative chain deepens the
    /// tree by one level, so it counts against the nesting limit.
    fn link(&mut self, links: &mut usize) -> ScriptResult<()> {
        self.enter()?;
        *links += 1;
        Ok(())
    }

    fn unlink(&mut self, links: usize) {
        self.depth -= links;
    }

    fn parse_function(&mut self) -> ScriptResult<Function> {
        let span = self.expect(TokenKind::Fn)?;
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;

        let mut params = Vec::new();
        let mut seen = HashSet::new();
        while !self.at(&TokenKind::RParen) {
            let param = self.parse_param()?;
            if !seen.insert(param.name.clone()) {
                return Err(ScriptError::new(
                    ErrorCode::DuplicateParameter,
                    format!("duplicate parameter `{}` in `{name}`", param.name),
                    Some(param.span),
                ));
            }
            params.push(param);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        let body = self.parse_block()?;
        Ok(Function { name, params, body, span })
    }

    fn parse_param(&mut self) -> ScriptResult<Param> {
        let (name, span) = self.expect_ident()?;
        let default = if self.eat(&TokenKind::Assign) {
            let negative = self.eat(&TokenKind::Minus);
            match self.peek().kind {
                TokenKind::Number(n) => {
                    self.advance();
                    Some(if negative { -n } else { n })
                }
                _ => return Err(self.unexpected("numeric default value")),
            }
        } else {
            None
        };
        Ok(Param { name, default, span })
    }

    fn parse_block(&mut self) -> ScriptResult<Block> {
        self.enter()?;
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.leave();
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> ScriptResult<Stmt> {
        let span = self.peek().span;
        match self.peek().kind.clone() {
            TokenKind::Let => {
                self.advance();
                let (name, _) = self.expect_ident()?;
                self.expect(TokenKind::Assign)?;
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Let { name, value, span })
            }
            TokenKind::Ident(name) if self.tokens.get(self.pos + 1).map(|t| &t.kind) == Some(&TokenKind::Assign) => {
                self.advance();
                self.advance();
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Assign { name, value, span })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::Return => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Return { value, span })
            }
            TokenKind::Raise => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Raise { value, span })
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_if(&mut self) -> ScriptResult<Stmt> {
        self.expect(TokenKind::If)?;
        let mut branches = vec![(self.parse_expr()?, self.parse_block()?)];
        let mut otherwise = None;

        while self.eat(&TokenKind::Else) {
            if self.eat(&TokenKind::If) {
                let cond = self.parse_expr()?;
                let block = self.parse_block()?;
                branches.push((cond, block));
            } else {
                otherwise = Some(self.parse_block()?);
                break;
            }
        }

        Ok(Stmt::If { branches, otherwise })
    }

    fn parse_expr(&mut self) -> ScriptResult<Expr> {
        self.enter()?;
        let expr = self.parse_or();
        self.leave();
        expr
    }

    fn parse_or(&mut self) -> ScriptResult<Expr> {
        let mut lhs = self.parse_and()?;
        let mut links = 0;
        while self.at(&TokenKind::OrOr) {
            self.link(&mut links)?;
            let span = self.advance().span;
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs, span);
        }
        self.unlink(links);
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ScriptResult<Expr> {
        let mut lhs = self.parse_cmp()?;
        let mut links = 0;
        while self.at(&TokenKind::AndAnd) {
            self.link(&mut links)?;
            let span = self.advance().span;
            let rhs = self.parse_cmp()?;
            lhs = binary(BinaryOp::And, lhs, rhs, span);
        }
        self.unlink(links);
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> ScriptResult<Expr> {
        let lhs = self.parse_sum()?;
        let op = match self.peek().kind {
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::Ne => BinaryOp::Ne,
            _ => return Ok(lhs),
        };
        let span = self.advance().span;
        let rhs = self.parse_sum()?;
        Ok(binary(op, lhs, rhs, span))
    }

    fn parse_sum(&mut self) -> ScriptResult<Expr> {
        let mut lhs = self.parse_term()?;
        let mut links = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.link(&mut links)?;
            let span = self.advance().span;
            let rhs = self.parse_term()?;
            lhs = binary(op, lhs, rhs, span);
        }
        self.unlink(links);
        Ok(lhs)
    }

    fn parse_term(&mut self) -> ScriptResult<Expr> {
        let mut lhs = self.parse_unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.link(&mut links)?;
            let span = self.advance().span;
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs, span);
        }
        self.unlink(links);
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ScriptResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_power(),
        };
        let span = self.advance().span;
        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand?),
            },
            span,
        })
    }

    /// `^` binds tighter than unary minus on its left and is
    /// right-associative: `-2 ^ 2 == -4`, `2 ^ 3 ^ 2 == 512`.
    fn parse_power(&mut self) -> ScriptResult<Expr> {
        let base = self.parse_atom()?;
        if self.at(&TokenKind::Caret) {
            let span = self.advance().span;
            self.enter()?;
            let exponent = self.parse_unary();
            self.leave();
            return Ok(binary(BinaryOp::Pow, base, exponent?, span));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> ScriptResult<Expr> {
        let tok = self.peek().clone();
        let span = tok.span;
        let kind = match tok.kind {
            TokenKind::Number(n) => {
                self.advance();
                ExprKind::Number(n)
            }
            TokenKind::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.eat(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    while !self.at(&TokenKind::RParen) {
                        args.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    ExprKind::Call { name, args }
                } else {
                    ExprKind::Var(name)
                }
            }
            TokenKind::LParen => {
                self.advance();
                let first = self.parse_expr()?;
                if !self.eat(&TokenKind::Comma) {
                    self.expect(TokenKind::RParen)?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while !self.at(&TokenKind::RParen) {
                    items.push(self.parse_expr()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
                if items.len() < 2 {
                    return Err(ScriptError::new(
                        ErrorCode::UnexpectedToken,
                        "a tuple needs at least two elements",
                        Some(span),
                    ));
                }
                ExprKind::Tuple(items)
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr { kind, span })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, span: Span) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    }
}
