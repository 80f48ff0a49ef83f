use super::{ParseError, Parser};
use crate::ast::{Arg, BinaryOp, Expr, ExprKind, LogicalOp, Position, UnaryOp};
use crate::lexer::TokenKind;

impl Parser {
    pub(super) fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_or()?;
        if self.matches(&TokenKind::Question) {
            let pos = cond.pos;
            let then_branch = self.parse_expr()?;
            self.expect(&TokenKind::Colon)?;
            let else_branch = self.parse_expr()?;
            return Ok(Expr::new(
                ExprKind::Ternary {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                },
                pos,
            ));
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.matches(&TokenKind::Or) {
            let pos = left.pos;
            let right = self.parse_and()?;
            left = Expr::new(
                ExprKind::Logical { op: LogicalOp::Or, left: Box::new(left), right: Box::new(right) },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.matches(&TokenKind::And) {
            let pos = left.pos;
            let right = self.parse_equality()?;
            left = Expr::new(
                ExprKind::Logical { op: LogicalOp::And, left: Box::new(left), right: Box::new(right) },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                _ => break,
            };
            let pos = left.pos;
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, pos);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::Ge,
                _ => break,
            };
            let pos = left.pos;
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, pos);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let pos = left.pos;
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, pos);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let pos = left.pos;
            self.advance();
            let right = self.parse_power()?;
            left = Expr::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, pos);
        }
        Ok(left)
    }

    /// `^` is right-associative.
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_unary()?;
        if self.matches(&TokenKind::Caret) {
            let pos = base.pos;
            let exponent = self.parse_power()?;
            return Ok(Expr::new(
                ExprKind::Binary { op: BinaryOp::Pow, left: Box::new(base), right: Box::new(exponent) },
                pos,
            ));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos();
        if self.matches(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Neg, operand: Box::new(operand) }, pos));
        }
        if self.matches(&TokenKind::Bang) {
            let operand = self.parse_unary()?;
            return Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Not, operand: Box::new(operand) }, pos));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches(&TokenKind::LParen) {
                let pos = expr.pos;
                let args = self.parse_args()?;
                expr = Expr::new(ExprKind::Call { callee: Box::new(expr), args }, pos);
            } else if self.matches(&TokenKind::LBracket) {
                let pos = expr.pos;
                let index = self.parse_expr()?;
                self.expect(&TokenKind::RBracket)?;
                expr = Expr::new(ExprKind::Index { target: Box::new(expr), index: Box::new(index) }, pos);
            } else if self.matches(&TokenKind::Dot) {
                let pos = expr.pos;
                let name = self.expect_identifier()?;
                expr = Expr::new(ExprKind::Member { target: Box::new(expr), name }, pos);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Arg>, ParseError> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let arg = self.parse_arg()?;
                args.push(arg);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_arg(&mut self) -> Result<Arg, ParseError> {
        if let TokenKind::Identifier(name) = self.peek_kind().clone() {
            if self.tokens.get(self.pos + 1).map(|t| &t.kind) == Some(&TokenKind::Colon) {
                self.advance();
                self.advance();
                let value = self.parse_expr()?;
                return Ok(Arg { name: Some(name), value });
            }
        }
        Ok(Arg { name: None, value: self.parse_expr()? })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos();
        match self.peek_kind().clone() {
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::new(ExprKind::Nil, pos))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(true), pos))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(false), pos))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::Number(n), pos))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(s), pos))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Identifier(name), pos))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => self.parse_array_lit(pos),
            TokenKind::LBrace => self.parse_object_lit(pos),
            TokenKind::Fn => self.parse_lambda(pos),
            TokenKind::Function => self.parse_anonymous_function(pos),
            other => Err(ParseError::Syntax {
                message: format!("unexpected token {:?}", other),
                pos,
            }),
        }
    }

    fn parse_array_lit(&mut self, pos: Position) -> Result<Expr, ParseError> {
        self.expect(&TokenKind::LBracket)?;
        let mut items = Vec::new();
        if !self.check(&TokenKind::RBracket) {
            loop {
                items.push(self.parse_expr()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBracket)?;
        Ok(Expr::new(ExprKind::ArrayLit(items), pos))
    }

    fn parse_object_lit(&mut self, pos: Position) -> Result<Expr, ParseError> {
        self.expect(&TokenKind::LBrace)?;
        let mut entries = Vec::new();
        if !self.check(&TokenKind::RBrace) {
            loop {
                let key = match self.peek_kind().clone() {
                    TokenKind::Str(s) => {
                        self.advance();
                        s
                    }
                    TokenKind::Identifier(s) => {
                        self.advance();
                        s
                    }
                    other => {
                        return Err(ParseError::Syntax {
                            message: format!("expected object key, found {:?}", other),
                            pos: self.pos(),
                        })
                    }
                };
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_expr()?;
                entries.push((key, value));
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Expr::new(ExprKind::ObjectLit(entries), pos))
    }

    /// `fn(params) -> expr` single-expression lambda sugar.
    fn parse_lambda(&mut self, pos: Position) -> Result<Expr, ParseError> {
        self.expect(&TokenKind::Fn)?;
        let params = self.parse_params()?;
        self.expect(&TokenKind::Arrow)?;
        let body_expr = self.parse_expr()?;
        let body_pos = body_expr.pos;
        let body = vec![crate::ast::Stmt::new(crate::ast::StmtKind::Return(Some(body_expr)), body_pos)];
        Ok(Expr::new(ExprKind::FunctionLit { params, body }, pos))
    }

    /// `function(params) <block> end` anonymous function expression.
    fn parse_anonymous_function(&mut self, pos: Position) -> Result<Expr, ParseError> {
        self.expect(&TokenKind::Function)?;
        let params = self.parse_params()?;
        let body = self.parse_block(&[TokenKind::End])?;
        self.expect(&TokenKind::End)?;
        Ok(Expr::new(ExprKind::FunctionLit { params, body }, pos))
    }
}
