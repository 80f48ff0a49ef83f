use super::{ParseError, Parser};
use crate::ast::{AssignOp, Block, Stmt, StmtKind};
use crate::lexer::TokenKind;

impl Parser {
    pub(super) fn parse_block(&mut self, terminators: &[TokenKind]) -> Result<Block, ParseError> {
        let mut statements = Vec::new();
        while !terminators.iter().any(|t| self.check(t)) {
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        self.matches(&TokenKind::Semicolon);
        let kind = match self.peek_kind().clone() {
            TokenKind::Var => {
                self.advance();
                let name = self.expect_identifier()?;
                let value = if self.matches(&TokenKind::Eq) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                StmtKind::VarDecl { name, value }
            }
            TokenKind::If => self.parse_if()?,
            TokenKind::While => {
                self.advance();
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::Do)?;
                let body = self.parse_block(&[TokenKind::End])?;
                self.expect(&TokenKind::End)?;
                StmtKind::While { cond, body }
            }
            TokenKind::For => self.parse_for()?,
            TokenKind::Function => {
                self.advance();
                let name = self.expect_identifier()?;
                let params = self.parse_params()?;
                let body = self.parse_block(&[TokenKind::End])?;
                self.expect(&TokenKind::End)?;
                StmtKind::FunctionDef { name, params, body }
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.at_statement_boundary() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                StmtKind::Return(value)
            }
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Try => {
                self.advance();
                let try_block = self.parse_block(&[TokenKind::Catch])?;
                self.expect(&TokenKind::Catch)?;
                let catch_var = self.expect_identifier()?;
                let catch_block = self.parse_block(&[TokenKind::End])?;
                self.expect(&TokenKind::End)?;
                StmtKind::TryCatch { try_block, catch_var, catch_block }
            }
            TokenKind::Do => {
                self.advance();
                let body = self.parse_block(&[TokenKind::End])?;
                self.expect(&TokenKind::End)?;
                StmtKind::Block(body)
            }
            _ => self.parse_expr_or_assign_statement()?,
        };
        self.matches(&TokenKind::Semicolon);
        Ok(Stmt::new(kind, pos))
    }

    fn at_statement_boundary(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Semicolon
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::ElseIf
                | TokenKind::Catch
                | TokenKind::Eof
        )
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(&TokenKind::If)?;
        let mut branches = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Do)?;
        let body = self.parse_block(&[TokenKind::ElseIf, TokenKind::Else, TokenKind::End])?;
        branches.push((cond, body));
        loop {
            if self.matches(&TokenKind::ElseIf) {
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::Do)?;
                let body = self.parse_block(&[TokenKind::ElseIf, TokenKind::Else, TokenKind::End])?;
                branches.push((cond, body));
            } else {
                break;
            }
        }
        let else_branch = if self.matches(&TokenKind::Else) {
            Some(self.parse_block(&[TokenKind::End])?)
        } else {
            None
        };
        self.expect(&TokenKind::End)?;
        Ok(StmtKind::If { branches, else_branch })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(&TokenKind::For)?;
        let var = self.expect_identifier()?;
        if self.matches(&TokenKind::Eq) {
            let start = self.parse_expr()?;
            self.expect(&TokenKind::Comma)?;
            let end = self.parse_expr()?;
            let step = if self.matches(&TokenKind::Comma) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(&TokenKind::Do)?;
            let body = self.parse_block(&[TokenKind::End])?;
            self.expect(&TokenKind::End)?;
            Ok(StmtKind::ForRange { var, start, end, step, body })
        } else {
            self.expect(&TokenKind::In)?;
            let iterable = self.parse_expr()?;
            self.expect(&TokenKind::Do)?;
            let body = self.parse_block(&[TokenKind::End])?;
            self.expect(&TokenKind::End)?;
            Ok(StmtKind::ForIn { var, iterable, body })
        }
    }

    fn parse_expr_or_assign_statement(&mut self) -> Result<StmtKind, ParseError> {
        let expr = self.parse_expr()?;
        let op = match self.peek_kind() {
            TokenKind::Eq => Some(AssignOp::Assign),
            TokenKind::PlusEq => Some(AssignOp::AddAssign),
            TokenKind::MinusEq => Some(AssignOp::SubAssign),
            TokenKind::StarEq => Some(AssignOp::MulAssign),
            TokenKind::SlashEq => Some(AssignOp::DivAssign),
            TokenKind::PercentEq => Some(AssignOp::ModAssign),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let value = self.parse_expr()?;
            return Ok(StmtKind::Assign { target: Box::new(expr), op, value });
        }
        if self.matches(&TokenKind::PlusPlus) {
            return Ok(StmtKind::PostIncrement { target: Box::new(expr) });
        }
        Ok(StmtKind::Expr(expr))
    }
}
