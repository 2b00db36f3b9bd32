use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};
use crate::symbol::{SymbolEntry, SymbolId, SymbolKind, SymbolManager, SymbolTable};

/// Calls pass arguments in `a0..a7` and `s8..s11`; nothing is spilled to the
/// caller's stack, so arity is capped at the register count.
pub const MAX_PARAMS: usize = 12;

/// Scope construction and name checking.
///
/// Builds one symbol table per scope-bearing node (program, function,
/// compound statement, for loop) and stores it on the node, assigning each
/// entry a process-unique id and its scope level (0 = global). Reports the
/// name, kind, and arity errors the emitter's contract depends on; operand
/// type checking is not performed.
pub struct Analyzer {
    bindings: SymbolManager,
    scopes: Vec<SymbolTable>,
    diagnostics: Vec<Diagnostic>,
    next_id: u32,
    level: u32,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            bindings: SymbolManager::new(),
            scopes: Vec::new(),
            diagnostics: Vec::new(),
            next_id: 0,
            level: 0,
        }
    }

    /// Analyze the whole program, filling in its symbol tables. Returns all
    /// collected diagnostics; the program is well-formed for code generation
    /// iff none of them is an error.
    pub fn analyze(mut self, program: &mut Program) -> Vec<Diagnostic> {
        self.open_scope();

        for decl in &program.decls {
            self.declare_var_decl(decl);
        }
        for func in &program.functions {
            self.declare_function(func);
        }

        for func in &mut program.functions {
            self.check_function(func);
        }

        self.check_compound(&mut program.body);
        program.symbol_table = self.close_scope();

        self.diagnostics
    }

    fn check_function(&mut self, func: &mut FnDef) {
        self.level = 1;
        self.open_scope();
        for group in &func.params {
            for name in &group.names {
                self.declare(name, SymbolKind::Parameter, group.ty.node);
            }
        }
        self.check_compound(&mut func.body);
        func.symbol_table = self.close_scope();
        self.level = 0;
    }

    fn check_compound(&mut self, compound: &mut Compound) {
        self.level += 1;
        self.open_scope();
        for decl in &compound.decls {
            self.declare_var_decl(decl);
        }
        for stmt in &mut compound.stmts {
            self.check_stmt(&mut stmt.node);
        }
        compound.symbol_table = self.close_scope();
        self.level -= 1;
    }

    fn check_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Compound(compound) => self.check_compound(compound),
            Stmt::Assign { target, value } => {
                self.check_store_target(target, "assign to");
                self.check_expr(value);
            }
            Stmt::Print(expr) => self.check_expr(expr),
            Stmt::Read(target) => self.check_store_target(target, "read into"),
            Stmt::Call(call) => self.check_call(call, false),
            Stmt::Return(expr) => self.check_expr(expr),
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                self.check_expr(cond);
                self.check_compound(then_body);
                if let Some(els) = else_body {
                    self.check_compound(els);
                }
            }
            Stmt::While { cond, body } => {
                self.check_expr(cond);
                self.check_compound(body);
            }
            Stmt::For(f) => {
                self.level += 1;
                self.open_scope();
                self.declare(&f.var, SymbolKind::LoopVar, Ty::Integer);
                self.check_expr(&mut f.from);
                self.check_expr(&mut f.to);
                self.check_compound(&mut f.body);
                f.symbol_table = self.close_scope();
                self.level -= 1;
            }
        }
    }

    fn check_expr(&mut self, expr: &mut Spanned<Expr>) {
        match &mut expr.node {
            Expr::Literal(_) => {}
            Expr::Var(var) => match self.bindings.lookup(&var.name.node) {
                None => self.undeclared(&var.name),
                Some(entry) => {
                    if matches!(entry.kind, SymbolKind::Function { .. }) {
                        self.error(
                            format!("function '{}' used as a variable", var.name.node),
                            var.name.span,
                        );
                    }
                }
            },
            Expr::Binary { lhs, rhs, .. } => {
                self.check_expr(lhs);
                self.check_expr(rhs);
            }
            Expr::Unary { operand, .. } => self.check_expr(operand),
            Expr::Call(call) => self.check_call(call, true),
        }
    }

    fn check_call(&mut self, call: &mut CallExpr, expr_context: bool) {
        let info = match self.bindings.lookup(&call.name.node) {
            None => {
                self.error(
                    format!("call to undeclared function '{}'", call.name.node),
                    call.name.span,
                );
                None
            }
            Some(entry) => match entry.kind {
                SymbolKind::Function { arity, has_return } => Some((arity, has_return)),
                _ => {
                    self.error(
                        format!("'{}' is not a function", call.name.node),
                        call.name.span,
                    );
                    None
                }
            },
        };

        if let Some((arity, has_return)) = info {
            if call.args.len() != arity {
                self.diagnostics.push(
                    Diagnostic::error(
                        format!(
                            "function '{}' expects {} argument{}, found {}",
                            call.name.node,
                            arity,
                            if arity == 1 { "" } else { "s" },
                            call.args.len()
                        ),
                        call.name.span,
                    ),
                );
            }
            if expr_context && !has_return {
                self.diagnostics.push(
                    Diagnostic::error(
                        format!("procedure '{}' does not return a value", call.name.node),
                        call.name.span,
                    )
                    .with_help("only functions with a return type can appear in expressions"),
                );
            }
        }

        for arg in &mut call.args {
            self.check_expr(arg);
        }
    }

    fn check_store_target(&mut self, target: &VarRef, action: &str) {
        match self.bindings.lookup(&target.name.node) {
            None => self.undeclared(&target.name),
            Some(entry) => {
                let what = match entry.kind {
                    SymbolKind::Variable | SymbolKind::Parameter => return,
                    SymbolKind::Constant => "constant",
                    SymbolKind::LoopVar => "loop variable",
                    SymbolKind::Function { .. } => "function",
                };
                self.error(
                    format!("cannot {} {} '{}'", action, what, target.name.node),
                    target.name.span,
                );
            }
        }
    }

    // --- Declarations ---

    fn declare_var_decl(&mut self, decl: &VarDecl) {
        if let Some(init) = &decl.init {
            let matches_ty = match init.node {
                Literal::Integer(_) => decl.ty.node == Ty::Integer,
                Literal::Bool(_) => decl.ty.node == Ty::Boolean,
            };
            if !matches_ty {
                self.error(
                    format!("initializer does not match type '{}'", decl.ty.node.as_str()),
                    init.span,
                );
            }
        }
        let kind = if decl.init.is_some() {
            SymbolKind::Constant
        } else {
            SymbolKind::Variable
        };
        for name in &decl.names {
            self.declare(name, kind.clone(), decl.ty.node);
        }
    }

    fn declare_function(&mut self, func: &FnDef) {
        if func.name.node == "main" {
            self.error(
                "function name 'main' is reserved for the program body",
                func.name.span,
            );
        }
        let arity = func.arity();
        if arity > MAX_PARAMS {
            self.diagnostics.push(
                Diagnostic::error(
                    format!(
                        "function '{}' has {} parameters; at most {} are supported",
                        func.name.node, arity, MAX_PARAMS
                    ),
                    func.name.span,
                )
                .with_help("parameters are passed in registers a0-a7 and s8-s11"),
            );
        }
        let ty = func.return_ty.as_ref().map(|t| t.node).unwrap_or(Ty::Integer);
        self.declare(
            &func.name,
            SymbolKind::Function {
                arity,
                has_return: func.return_ty.is_some(),
            },
            ty,
        );
    }

    fn declare(&mut self, name: &Spanned<String>, kind: SymbolKind, ty: Ty) {
        let scope = self
            .scopes
            .last_mut()
            .expect("a scope is open during analysis");
        if scope.find(&name.node).is_some() {
            self.diagnostics.push(Diagnostic::error(
                format!("duplicate declaration of '{}'", name.node),
                name.span,
            ));
            return;
        }
        if self.bindings.lookup(&name.node).is_some() {
            self.diagnostics.push(Diagnostic::warning(
                format!("declaration of '{}' shadows an earlier declaration", name.node),
                name.span,
            ));
        }
        let entry = SymbolEntry {
            id: SymbolId(self.next_id),
            name: name.node.clone(),
            kind,
            level: self.level,
            ty,
        };
        self.next_id += 1;
        self.bindings.bind(entry.clone());
        self.scopes
            .last_mut()
            .expect("a scope is open during analysis")
            .push(entry);
    }

    // --- Scope helpers ---

    fn open_scope(&mut self) {
        self.scopes.push(SymbolTable::default());
    }

    fn close_scope(&mut self) -> SymbolTable {
        let table = self.scopes.pop().expect("a scope is open during analysis");
        self.bindings.remove(&table);
        table
    }

    fn undeclared(&mut self, name: &Spanned<String>) {
        self.error(
            format!("use of undeclared name '{}'", name.node),
            name.span,
        );
    }

    fn error(&mut self, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::error(message, span));
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}
