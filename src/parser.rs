use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::lexeme::Lexeme;
use crate::span::{Span, Spanned};
use crate::symbol::SymbolTable;

/// Binding power of prefix `-` and `not`: tighter than every binary tier.
const UNARY_BP: u8 = 11;

pub struct Parser {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned<Lexeme>>) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn parse_program(mut self) -> Result<Program, Vec<Diagnostic>> {
        let program = self.program();
        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics);
        }
        Ok(program)
    }

    fn program(&mut self) -> Program {
        self.expect(&Lexeme::Program);
        let name = self.expect_ident();
        self.expect(&Lexeme::Semicolon);

        let decls = self.var_decls();

        let mut functions = Vec::new();
        while self.at(&Lexeme::Function) {
            functions.push(self.function());
        }

        let body = self.compound();
        self.expect(&Lexeme::Dot);

        Program {
            name,
            decls,
            functions,
            body,
            symbol_table: SymbolTable::default(),
        }
    }

    fn var_decls(&mut self) -> Vec<VarDecl> {
        let mut decls = Vec::new();
        while self.at(&Lexeme::Var) {
            decls.push(self.var_decl());
        }
        decls
    }

    fn var_decl(&mut self) -> VarDecl {
        self.expect(&Lexeme::Var);
        let mut names = vec![self.expect_ident()];
        while self.eat(&Lexeme::Comma) {
            names.push(self.expect_ident());
        }
        self.expect(&Lexeme::Colon);
        let ty = self.parse_type();
        let init = if self.eat(&Lexeme::Assign) {
            Some(self.parse_literal())
        } else {
            None
        };
        self.expect(&Lexeme::Semicolon);
        VarDecl { names, ty, init }
    }

    fn parse_type(&mut self) -> Spanned<Ty> {
        let span = self.current_span();
        if self.eat(&Lexeme::IntegerTy) {
            Spanned::new(Ty::Integer, span)
        } else if self.eat(&Lexeme::BooleanTy) {
            Spanned::new(Ty::Boolean, span)
        } else {
            self.error_at_current("expected type ('integer' or 'boolean')");
            self.advance();
            Spanned::new(Ty::Integer, span)
        }
    }

    fn parse_literal(&mut self) -> Spanned<Literal> {
        let start = self.current_span();
        if self.eat(&Lexeme::Minus) {
            let n = self.expect_integer();
            let span = start.merge(self.prev_span());
            Spanned::new(Literal::Integer(-n), span)
        } else if self.eat(&Lexeme::True) {
            Spanned::new(Literal::Bool(true), start)
        } else if self.eat(&Lexeme::False) {
            Spanned::new(Literal::Bool(false), start)
        } else {
            let n = self.expect_integer();
            Spanned::new(Literal::Integer(n), start)
        }
    }

    fn function(&mut self) -> FnDef {
        self.expect(&Lexeme::Function);
        let name = self.expect_ident();
        self.expect(&Lexeme::LParen);
        let params = if self.at(&Lexeme::RParen) {
            Vec::new()
        } else {
            self.param_groups()
        };
        self.expect(&Lexeme::RParen);
        let return_ty = if self.eat(&Lexeme::Colon) {
            Some(self.parse_type())
        } else {
            None
        };
        self.expect(&Lexeme::Semicolon);
        let body = self.compound();
        self.eat(&Lexeme::Semicolon); // optional separator after `end`
        FnDef {
            name,
            params,
            return_ty,
            body,
            symbol_table: SymbolTable::default(),
        }
    }

    fn param_groups(&mut self) -> Vec<ParamGroup> {
        let mut groups = vec![self.param_group()];
        while self.eat(&Lexeme::Semicolon) {
            groups.push(self.param_group());
        }
        groups
    }

    fn param_group(&mut self) -> ParamGroup {
        let mut names = vec![self.expect_ident()];
        while self.eat(&Lexeme::Comma) {
            names.push(self.expect_ident());
        }
        self.expect(&Lexeme::Colon);
        let ty = self.parse_type();
        ParamGroup { names, ty }
    }

    fn compound(&mut self) -> Compound {
        self.expect(&Lexeme::Begin);
        let decls = self.var_decls();
        let mut stmts = Vec::new();
        while !self.at(&Lexeme::End) && !self.at(&Lexeme::Eof) {
            let start = self.current_span();
            if let Some(stmt) = self.statement() {
                let span = start.merge(self.prev_span());
                stmts.push(Spanned::new(stmt, span));
            }
        }
        self.expect(&Lexeme::End);
        Compound {
            decls,
            stmts,
            symbol_table: SymbolTable::default(),
        }
    }

    fn statement(&mut self) -> Option<Stmt> {
        if self.at(&Lexeme::Begin) {
            return Some(Stmt::Compound(self.compound()));
        }
        if self.eat(&Lexeme::Print) {
            let expr = self.expr();
            self.expect(&Lexeme::Semicolon);
            return Some(Stmt::Print(expr));
        }
        if self.eat(&Lexeme::Read) {
            let name = self.expect_ident();
            self.expect(&Lexeme::Semicolon);
            return Some(Stmt::Read(VarRef { name }));
        }
        if self.eat(&Lexeme::Return) {
            let expr = self.expr();
            self.expect(&Lexeme::Semicolon);
            return Some(Stmt::Return(expr));
        }
        if self.eat(&Lexeme::If) {
            let cond = self.expr();
            self.expect(&Lexeme::Then);
            let then_body = self.compound();
            let else_body = if self.eat(&Lexeme::Else) {
                Some(self.compound())
            } else {
                None
            };
            return Some(Stmt::If {
                cond,
                then_body,
                else_body,
            });
        }
        if self.eat(&Lexeme::While) {
            let cond = self.expr();
            self.expect(&Lexeme::Do);
            let body = self.compound();
            return Some(Stmt::While { cond, body });
        }
        if self.eat(&Lexeme::For) {
            let var = self.expect_ident();
            self.expect(&Lexeme::Assign);
            let from = self.expr();
            self.expect(&Lexeme::To);
            let to = self.expr();
            self.expect(&Lexeme::Do);
            let body = self.compound();
            return Some(Stmt::For(For {
                var,
                from,
                to,
                body,
                symbol_table: SymbolTable::default(),
            }));
        }
        if let Some(name) = self.try_ident() {
            if self.eat(&Lexeme::LParen) {
                let args = self.call_args();
                self.expect(&Lexeme::RParen);
                self.expect(&Lexeme::Semicolon);
                return Some(Stmt::Call(CallExpr { name, args }));
            }
            self.expect(&Lexeme::Assign);
            let value = self.expr();
            self.expect(&Lexeme::Semicolon);
            return Some(Stmt::Assign {
                target: VarRef { name },
                value,
            });
        }

        self.error_at_current("expected statement");
        self.advance(); // skip to recover
        None
    }

    fn call_args(&mut self) -> Vec<Spanned<Expr>> {
        let mut args = Vec::new();
        while !self.at(&Lexeme::RParen) && !self.at(&Lexeme::Eof) {
            args.push(self.expr());
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        args
    }

    fn expr(&mut self) -> Spanned<Expr> {
        self.expr_bp(0)
    }

    fn expr_bp(&mut self, min_bp: u8) -> Spanned<Expr> {
        let mut lhs = self.prefix_expr();
        loop {
            let op = match self.peek_binop() {
                Some(op) => op,
                None => break,
            };
            let (l_bp, r_bp) = op_binding_power(op);
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.expr_bp(r_bp);
            let span = lhs.span.merge(rhs.span);
            lhs = Spanned::new(
                Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        lhs
    }

    fn peek_binop(&self) -> Option<BinOp> {
        Some(match self.peek() {
            Lexeme::Or => BinOp::Or,
            Lexeme::And => BinOp::And,
            Lexeme::Eq => BinOp::Eq,
            Lexeme::Ne => BinOp::Ne,
            Lexeme::Lt => BinOp::Lt,
            Lexeme::Le => BinOp::Le,
            Lexeme::Gt => BinOp::Gt,
            Lexeme::Ge => BinOp::Ge,
            Lexeme::Plus => BinOp::Add,
            Lexeme::Minus => BinOp::Sub,
            Lexeme::Star => BinOp::Mul,
            Lexeme::Slash => BinOp::Div,
            Lexeme::Mod => BinOp::Mod,
            _ => return None,
        })
    }

    fn prefix_expr(&mut self) -> Spanned<Expr> {
        let start = self.current_span();

        if self.eat(&Lexeme::Minus) {
            let operand = self.expr_bp(UNARY_BP);
            let span = start.merge(operand.span);
            return Spanned::new(
                Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                span,
            );
        }
        if self.eat(&Lexeme::Not) {
            let operand = self.expr_bp(UNARY_BP);
            let span = start.merge(operand.span);
            return Spanned::new(
                Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            );
        }
        if self.eat(&Lexeme::True) {
            return Spanned::new(Expr::Literal(Literal::Bool(true)), start);
        }
        if self.eat(&Lexeme::False) {
            return Spanned::new(Expr::Literal(Literal::Bool(false)), start);
        }
        if let Lexeme::Integer(n) = *self.peek() {
            self.advance();
            return Spanned::new(Expr::Literal(Literal::Integer(n)), start);
        }
        if self.eat(&Lexeme::LParen) {
            let inner = self.expr();
            self.expect(&Lexeme::RParen);
            return inner;
        }
        if let Some(name) = self.try_ident() {
            if self.eat(&Lexeme::LParen) {
                let args = self.call_args();
                self.expect(&Lexeme::RParen);
                let span = start.merge(self.prev_span());
                return Spanned::new(Expr::Call(CallExpr { name, args }), span);
            }
            let span = name.span;
            return Spanned::new(Expr::Var(VarRef { name }), span);
        }

        self.error_at_current("expected expression");
        self.advance();
        Spanned::new(Expr::Literal(Literal::Integer(0)), start)
    }

    // --- Utility methods ---

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            self.current_span()
        }
    }

    fn advance(&mut self) -> &Spanned<Lexeme> {
        let tok = &self.tokens[self.pos];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, token: &Lexeme) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn eat(&mut self, token: &Lexeme) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Lexeme) -> Span {
        if self.at(token) {
            let span = self.current_span();
            self.advance();
            span
        } else {
            self.error_at_current(&format!("expected {}", token.description()));
            self.current_span()
        }
    }

    fn expect_ident(&mut self) -> Spanned<String> {
        if let Lexeme::Ident(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Spanned::new(name, span)
        } else {
            self.error_at_current("expected identifier");
            Spanned::new("_error_".to_string(), self.current_span())
        }
    }

    fn try_ident(&mut self) -> Option<Spanned<String>> {
        if let Lexeme::Ident(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Some(Spanned::new(name, span))
        } else {
            None
        }
    }

    fn expect_integer(&mut self) -> i32 {
        if let Lexeme::Integer(n) = self.peek() {
            let n = *n;
            self.advance();
            n
        } else {
            self.error_at_current("expected integer literal");
            0
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        self.diagnostics
            .push(Diagnostic::error(msg.to_string(), self.current_span()));
    }
}

/// Returns (left binding power, right binding power) for a binary operator.
/// Higher binding power = higher precedence; all tiers are left-associative.
fn op_binding_power(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::Or => (1, 2),
        BinOp::And => (3, 4),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => (5, 6),
        BinOp::Add | BinOp::Sub => (7, 8),
        BinOp::Mul | BinOp::Div | BinOp::Mod => (9, 10),
    }
}
