use std::collections::HashMap;

use crate::ast::Ty;

/// Process-unique identity of a declared symbol. Stack offsets in the
/// emitter are keyed by this, so shadowed bindings never collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Constant,
    Parameter,
    LoopVar,
    Function { arity: usize, has_return: bool },
}

/// One declared name. `level` 0 means the program (global) scope.
#[derive(Clone, Debug)]
pub struct SymbolEntry {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub level: u32,
    pub ty: Ty,
}

/// The symbols declared by one scope, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
}

impl SymbolTable {
    pub fn push(&mut self, entry: SymbolEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    pub fn find(&self, name: &str) -> Option<&SymbolEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Scope-sensitive name→entry map. Installing a scope's table pushes its
/// bindings over any outer ones; removing it pops them again, so lookups
/// between the two always resolve to the innermost binding.
#[derive(Debug, Default)]
pub struct SymbolManager {
    bindings: HashMap<String, Vec<SymbolEntry>>,
}

impl SymbolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, entry: SymbolEntry) {
        self.bindings.entry(entry.name.clone()).or_default().push(entry);
    }

    pub fn unbind(&mut self, name: &str) {
        if let Some(stack) = self.bindings.get_mut(name) {
            stack.pop();
            if stack.is_empty() {
                self.bindings.remove(name);
            }
        }
    }

    /// Install a scope's bindings for the duration of a visit.
    pub fn reconstruct(&mut self, table: &SymbolTable) {
        for entry in table.entries() {
            self.bind(entry.clone());
        }
    }

    /// Remove a scope's bindings; the map afterwards equals the map before
    /// the matching `reconstruct`.
    pub fn remove(&mut self, table: &SymbolTable) {
        for entry in table.entries() {
            self.unbind(&entry.name);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&SymbolEntry> {
        self.bindings.get(name).and_then(|stack| stack.last())
    }
}
