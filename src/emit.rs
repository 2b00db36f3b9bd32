use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};

use crate::ast::*;
use crate::span::Spanned;
use crate::symbol::{SymbolEntry, SymbolId, SymbolManager};

#[cfg(test)]
mod tests;

/// Fixed per-function frame. `ra` and `s0` live in the top two words; locals
/// grow downward from `s0` starting at -12.
const FRAME_SIZE: i32 = 128;
const RA_SLOT: i32 = FRAME_SIZE - 4;
const FP_SLOT: i32 = FRAME_SIZE - 8;

/// Line-oriented assembly writer. Instructions are indented two spaces;
/// directives and labels sit at column 0.
pub struct AsmWriter<W: Write> {
    inner: W,
}

impl<W: Write> AsmWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn inst(&mut self, args: fmt::Arguments<'_>) -> io::Result<()> {
        self.inner.write_all(b"  ")?;
        self.inner.write_fmt(args)?;
        self.inner.write_all(b"\n")
    }

    pub fn directive(&mut self, args: fmt::Arguments<'_>) -> io::Result<()> {
        self.inner.write_fmt(args)?;
        self.inner.write_all(b"\n")
    }

    pub fn label(&mut self, name: &str) -> io::Result<()> {
        writeln!(self.inner, "{}:", name)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Whether a variable reference evaluates to its stored value or its address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RefMode {
    Rvalue,
    Lvalue,
}

/// Tree-walking RV32IM emitter.
///
/// Expressions evaluate on the machine stack: every expression visit pushes
/// exactly one 4-byte word, and every statement visit leaves `sp` where it
/// found it. Scope-bearing nodes are bracketed by the symbol manager's
/// reconstruct/remove pair so lookups resolve to the innermost binding.
pub struct Emitter<W: Write> {
    out: AsmWriter<W>,
    symbols: SymbolManager,
    source_name: String,
    /// Next free offset from `s0`; -8 on function entry, stepped by -4 per slot.
    fp_offset: i32,
    local_offsets: HashMap<SymbolId, i32>,
    global_decl: bool,
    param_count: usize,
    param_reg_idx: usize,
    /// Monotonic across the whole translation unit; never reset.
    label_counter: u32,
    ref_mode: RefMode,
}

/// Emit `program` as a complete assembly file into `writer`.
pub fn generate<W: Write>(program: &Program, source_name: &str, writer: W) -> io::Result<()> {
    Emitter::new(writer, source_name).emit_program(program)
}

impl<W: Write> Emitter<W> {
    pub fn new(writer: W, source_name: &str) -> Self {
        Self {
            out: AsmWriter::new(writer),
            symbols: SymbolManager::new(),
            source_name: source_name.to_string(),
            fp_offset: 0,
            local_offsets: HashMap::new(),
            global_decl: true,
            param_count: 0,
            param_reg_idx: 0,
            label_counter: 1,
            ref_mode: RefMode::Rvalue,
        }
    }

    pub fn emit_program(&mut self, program: &Program) -> io::Result<()> {
        self.out
            .directive(format_args!(".file \"{}\"", self.source_name))?;
        self.out.directive(format_args!(".option nopic"))?;

        self.symbols.reconstruct(&program.symbol_table);

        for decl in &program.decls {
            self.emit_var_decl(decl)?;
        }
        for func in &program.functions {
            self.emit_function(func)?;
        }

        // The program body becomes the implicit `main`.
        self.enter_frame();
        self.emit_text_header("main")?;
        self.emit_prologue()?;
        self.emit_compound(&program.body)?;
        self.emit_epilogue("main")?;

        self.symbols.remove(&program.symbol_table);
        self.out.flush()
    }

    fn emit_function(&mut self, func: &FnDef) -> io::Result<()> {
        self.symbols.reconstruct(&func.symbol_table);

        self.enter_frame();
        self.emit_text_header(&func.name.node)?;
        self.emit_prologue()?;
        self.home_params(func)?;
        self.emit_compound(&func.body)?;
        self.emit_epilogue(&func.name.node)?;

        self.symbols.remove(&func.symbol_table);
        Ok(())
    }

    /// Spill each incoming argument register into its stack slot, in
    /// declaration order. Parameter i arrives in `a{i}` for i < 8 and
    /// `s{i}` for i in 8..12.
    fn home_params(&mut self, func: &FnDef) -> io::Result<()> {
        self.param_count = func.arity();
        self.param_reg_idx = 0;
        for group in &func.params {
            for name in &group.names {
                let offset = self.alloc_slot(&name.node);
                self.out.inst(format_args!(
                    "sw {}, {}(s0)",
                    arg_reg(self.param_reg_idx),
                    offset
                ))?;
                self.param_reg_idx += 1;
                if self.param_reg_idx == self.param_count {
                    self.param_count = 0;
                    self.param_reg_idx = 0;
                }
            }
        }
        Ok(())
    }

    fn emit_compound(&mut self, compound: &Compound) -> io::Result<()> {
        self.symbols.reconstruct(&compound.symbol_table);
        for decl in &compound.decls {
            self.emit_var_decl(decl)?;
        }
        for stmt in &compound.stmts {
            self.emit_stmt(&stmt.node)?;
        }
        self.symbols.remove(&compound.symbol_table);
        Ok(())
    }

    fn emit_var_decl(&mut self, decl: &VarDecl) -> io::Result<()> {
        for name in &decl.names {
            if self.global_decl {
                match &decl.init {
                    Some(init) => {
                        self.out.directive(format_args!(".section .rodata"))?;
                        self.out.directive(format_args!(".align 2"))?;
                        self.out.directive(format_args!(".globl {}", name.node))?;
                        self.out
                            .directive(format_args!(".type {}, @object", name.node))?;
                        self.out.label(&name.node)?;
                        self.out
                            .directive(format_args!(".word {}", literal_text(&init.node)))?;
                    }
                    None => {
                        self.out
                            .directive(format_args!(".comm {}, 4, 4", name.node))?;
                    }
                }
            } else {
                let offset = self.alloc_slot(&name.node);
                if let Some(init) = &decl.init {
                    self.out
                        .inst(format_args!("li t0, {}", literal_text(&init.node)))?;
                    self.out.inst(format_args!("sw t0, {}(s0)", offset))?;
                }
            }
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> io::Result<()> {
        match stmt {
            Stmt::Compound(compound) => self.emit_compound(compound),
            Stmt::Assign { target, value } => {
                self.ref_mode = RefMode::Lvalue;
                self.emit_var_ref(target)?;
                self.emit_expr(&value.node)?;
                self.pop("t0")?; // value
                self.pop("t1")?; // address
                self.out.inst(format_args!("sw t0, 0(t1)"))
            }
            Stmt::Print(expr) => {
                self.emit_expr(&expr.node)?;
                self.pop("a0")?;
                self.out.inst(format_args!("jal ra, printInt"))
            }
            Stmt::Read(target) => {
                self.ref_mode = RefMode::Lvalue;
                self.emit_var_ref(target)?;
                self.out.inst(format_args!("jal ra, readInt"))?;
                self.pop("t0")?;
                self.out.inst(format_args!("sw a0, 0(t0)"))
            }
            Stmt::Call(call) => {
                self.emit_call(call)?;
                // Discard the pushed return word so the statement is balanced.
                self.out.inst(format_args!("addi sp, sp, 4"))
            }
            Stmt::Return(expr) => {
                self.emit_expr(&expr.node)?;
                self.pop("t0")?;
                self.out.inst(format_args!("mv a0, t0"))
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => self.emit_if(cond, then_body, else_body.as_ref()),
            Stmt::While { cond, body } => self.emit_while(cond, body),
            Stmt::For(f) => self.emit_for(f),
        }
    }

    fn emit_if(
        &mut self,
        cond: &Spanned<Expr>,
        then_body: &Compound,
        else_body: Option<&Compound>,
    ) -> io::Result<()> {
        self.emit_expr(&cond.node)?;
        self.pop("t0")?;
        let l_false = self.next_label();
        self.out
            .inst(format_args!("beq t0, zero, L{}", l_false))?;
        self.emit_compound(then_body)?;
        match else_body {
            Some(els) => {
                let l_end = self.next_label();
                self.out.inst(format_args!("j L{}", l_end))?;
                self.out.label(&format!("L{}", l_false))?;
                self.emit_compound(els)?;
                self.out.label(&format!("L{}", l_end))
            }
            None => self.out.label(&format!("L{}", l_false)),
        }
    }

    fn emit_while(&mut self, cond: &Spanned<Expr>, body: &Compound) -> io::Result<()> {
        let l_head = self.next_label();
        self.out.label(&format!("L{}", l_head))?;
        self.emit_expr(&cond.node)?;
        self.pop("t0")?;
        let l_exit = self.next_label();
        self.out.inst(format_args!("beq t0, zero, L{}", l_exit))?;
        self.emit_compound(body)?;
        self.out.inst(format_args!("j L{}", l_head))?;
        self.out.label(&format!("L{}", l_exit))
    }

    fn emit_for(&mut self, f: &For) -> io::Result<()> {
        self.symbols.reconstruct(&f.symbol_table);
        let offset = self.alloc_slot(&f.var.node);

        // Loop variable initializer, as an assignment through the stack.
        self.out.inst(format_args!("addi t0, s0, {}", offset))?;
        self.push("t0")?;
        self.emit_expr(&f.from.node)?;
        self.pop("t0")?;
        self.pop("t1")?;
        self.out.inst(format_args!("sw t0, 0(t1)"))?;

        let l_head = self.next_label();
        self.out.label(&format!("L{}", l_head))?;

        // Exit when loop_var >= bound (half-open range).
        self.out.inst(format_args!("lw t0, {}(s0)", offset))?;
        self.push("t0")?;
        self.emit_expr(&f.to.node)?;
        self.pop("t0")?; // bound
        self.pop("t1")?; // loop variable
        let l_exit = self.next_label();
        self.out.inst(format_args!("bge t1, t0, L{}", l_exit))?;

        self.emit_compound(&f.body)?;

        // loop_var := loop_var + 1, on the same stack machine.
        self.out.inst(format_args!("addi t0, s0, {}", offset))?;
        self.push("t0")?;
        self.out.inst(format_args!("lw t0, {}(s0)", offset))?;
        self.push("t0")?;
        self.out.inst(format_args!("li t0, 1"))?;
        self.push("t0")?;
        self.pop("t0")?;
        self.pop("t1")?;
        self.out.inst(format_args!("add t0, t1, t0"))?;
        self.push("t0")?;
        self.pop("t0")?;
        self.pop("t1")?;
        self.out.inst(format_args!("sw t0, 0(t1)"))?;

        self.out.inst(format_args!("j L{}", l_head))?;
        self.out.label(&format!("L{}", l_exit))?;

        self.symbols.remove(&f.symbol_table);
        Ok(())
    }

    fn emit_expr(&mut self, expr: &Expr) -> io::Result<()> {
        match expr {
            Expr::Literal(lit) => {
                self.out
                    .inst(format_args!("li t0, {}", literal_text(lit)))?;
                self.push("t0")
            }
            Expr::Var(var) => self.emit_var_ref(var),
            Expr::Binary { op, lhs, rhs } => {
                self.emit_expr(&lhs.node)?;
                self.emit_expr(&rhs.node)?;
                self.pop("t0")?; // rhs
                self.pop("t1")?; // lhs
                self.emit_binary_op(*op)?;
                self.push("t0")
            }
            Expr::Unary { op, operand } => {
                self.emit_expr(&operand.node)?;
                self.pop("t0")?;
                match op {
                    UnaryOp::Neg => self.out.inst(format_args!("sub t0, zero, t0"))?,
                    UnaryOp::Not => self.out.inst(format_args!("xori t0, t0, 1"))?,
                }
                self.push("t0")
            }
            Expr::Call(call) => self.emit_call(call),
        }
    }

    fn emit_binary_op(&mut self, op: BinOp) -> io::Result<()> {
        match op {
            BinOp::Mul => self.out.inst(format_args!("mul t0, t1, t0")),
            BinOp::Div => self.out.inst(format_args!("div t0, t1, t0")),
            BinOp::Mod => self.out.inst(format_args!("rem t0, t1, t0")),
            BinOp::Add => self.out.inst(format_args!("add t0, t1, t0")),
            BinOp::Sub => self.out.inst(format_args!("sub t0, t1, t0")),
            BinOp::Lt => self.out.inst(format_args!("slt t0, t1, t0")),
            BinOp::Le => {
                self.out.inst(format_args!("slt t0, t0, t1"))?;
                self.out.inst(format_args!("xori t0, t0, 1"))
            }
            BinOp::Gt => self.out.inst(format_args!("slt t0, t0, t1")),
            BinOp::Ge => {
                self.out.inst(format_args!("slt t0, t1, t0"))?;
                self.out.inst(format_args!("xori t0, t0, 1"))
            }
            BinOp::Eq => {
                self.out.inst(format_args!("slt t2, t1, t0"))?;
                self.out.inst(format_args!("slt t3, t0, t1"))?;
                self.out.inst(format_args!("or t0, t2, t3"))?;
                self.out.inst(format_args!("xori t0, t0, 1"))
            }
            BinOp::Ne => {
                self.out.inst(format_args!("slt t2, t1, t0"))?;
                self.out.inst(format_args!("slt t3, t0, t1"))?;
                self.out.inst(format_args!("or t0, t2, t3"))
            }
            BinOp::And => self.out.inst(format_args!("and t0, t1, t0")),
            BinOp::Or => self.out.inst(format_args!("or t0, t1, t0")),
        }
    }

    /// Evaluate arguments left to right, pop them into registers in reverse
    /// index order, call, and push `a0`.
    fn emit_call(&mut self, call: &CallExpr) -> io::Result<()> {
        for arg in &call.args {
            self.emit_expr(&arg.node)?;
        }
        for idx in (0..call.args.len()).rev() {
            self.pop(&arg_reg(idx))?;
        }
        self.out
            .inst(format_args!("jal ra, {}", call.name.node))?;
        self.out.inst(format_args!("mv t0, a0"))?;
        self.push("t0")
    }

    fn emit_var_ref(&mut self, var: &VarRef) -> io::Result<()> {
        let entry = self
            .symbols
            .lookup(&var.name.node)
            .unwrap_or_else(|| panic!("codegen: unresolved name '{}'", var.name.node))
            .clone();

        match self.ref_mode {
            RefMode::Lvalue => {
                if entry.level == 0 {
                    self.out.inst(format_args!("la t0, {}", entry.name))?;
                } else {
                    let offset = self.slot_of(&entry);
                    self.out.inst(format_args!("addi t0, s0, {}", offset))?;
                }
            }
            RefMode::Rvalue => {
                if entry.level == 0 {
                    self.out.inst(format_args!("la t0, {}", entry.name))?;
                    self.out.inst(format_args!("lw t0, 0(t0)"))?;
                } else {
                    let offset = self.slot_of(&entry);
                    self.out.inst(format_args!("lw t0, {}(s0)", offset))?;
                }
            }
        }
        self.push("t0")?;

        self.ref_mode = RefMode::Rvalue;
        Ok(())
    }

    // --- Frame and section helpers ---

    fn enter_frame(&mut self) {
        self.fp_offset = -8;
        self.global_decl = false;
        self.local_offsets.clear();
    }

    fn alloc_slot(&mut self, name: &str) -> i32 {
        let entry = self
            .symbols
            .lookup(name)
            .unwrap_or_else(|| panic!("codegen: unresolved declaration '{}'", name))
            .clone();
        self.fp_offset -= 4;
        debug_assert!(
            self.fp_offset >= -(FRAME_SIZE - 8),
            "frame overflow: '{}' would land at {}(s0)",
            name,
            self.fp_offset
        );
        self.local_offsets.insert(entry.id, self.fp_offset);
        self.fp_offset
    }

    fn slot_of(&self, entry: &SymbolEntry) -> i32 {
        *self
            .local_offsets
            .get(&entry.id)
            .unwrap_or_else(|| panic!("codegen: no stack slot for '{}'", entry.name))
    }

    fn next_label(&mut self) -> u32 {
        let label = self.label_counter;
        self.label_counter += 1;
        label
    }

    fn emit_text_header(&mut self, name: &str) -> io::Result<()> {
        self.out.directive(format_args!(".section .text"))?;
        self.out.directive(format_args!(".align 2"))?;
        self.out.directive(format_args!(".globl {}", name))?;
        self.out.directive(format_args!(".type {}, @function", name))?;
        self.out.label(name)
    }

    fn emit_prologue(&mut self) -> io::Result<()> {
        self.out
            .inst(format_args!("addi sp, sp, -{}", FRAME_SIZE))?;
        self.out.inst(format_args!("sw ra, {}(sp)", RA_SLOT))?;
        self.out.inst(format_args!("sw s0, {}(sp)", FP_SLOT))?;
        self.out
            .inst(format_args!("addi s0, sp, {}", FRAME_SIZE))
    }

    fn emit_epilogue(&mut self, name: &str) -> io::Result<()> {
        self.out.inst(format_args!("lw ra, {}(sp)", RA_SLOT))?;
        self.out.inst(format_args!("lw s0, {}(sp)", FP_SLOT))?;
        self.out
            .inst(format_args!("addi sp, sp, {}", FRAME_SIZE))?;
        self.out.inst(format_args!("jr ra"))?;
        self.out.directive(format_args!(".size {}, .-{}", name, name))
    }

    fn push(&mut self, reg: &str) -> io::Result<()> {
        self.out.inst(format_args!("addi sp, sp, -4"))?;
        self.out.inst(format_args!("sw {}, 0(sp)", reg))
    }

    fn pop(&mut self, reg: &str) -> io::Result<()> {
        self.out.inst(format_args!("lw {}, 0(sp)", reg))?;
        self.out.inst(format_args!("addi sp, sp, 4"))
    }
}

/// Register carrying argument (or parameter) `idx`: `a0..a7`, then `s8..s11`.
fn arg_reg(idx: usize) -> String {
    debug_assert!(idx < 12, "argument index {} has no register", idx);
    if idx < 8 {
        format!("a{}", idx)
    } else {
        format!("s{}", idx)
    }
}

/// Textual operand form of a literal; booleans are one-word 1/0.
fn literal_text(lit: &Literal) -> String {
    match lit {
        Literal::Integer(n) => n.to_string(),
        Literal::Bool(true) => "1".to_string(),
        Literal::Bool(false) => "0".to_string(),
    }
}
