//! Lexical scope tracking for drop insertion.
//!
//! [`ScopeTracker`] is a stack of scopes, each a list of [`ScopeEntry`] in
//! declaration order. It decides *what* must be dropped on each exit path;
//! the emitter decides *how* to spell the drop.
//!
//! # Exit paths
//!
//! - Falling off the end of a scope: [`ScopeTracker::leave_scope`] pops it and
//!   returns its live droppable entries, newest first.
//! - `return`, `break`, `continue`, a successful match arm jumping to the
//!   match end: [`ScopeTracker::cleanup_from`] returns the live droppable
//!   entries of every scope from the innermost down to a given index, without
//!   popping anything, because code after the jump is still emitted inside
//!   those scopes.
//!
//! A consumed entry (ownership moved out) is never returned again, on any
//! path emitted after the move.

use koral_ir::{Name, Type};

/// What a scope entry tracks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Binding {
    /// A source-level binding: `let`, parameter, or pattern binding.
    Named(Name),
    /// A compiler temporary that owns a value.
    Temp(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeEntry {
    pub binding: Binding,
    /// C lvalue holding the value.
    pub place: String,
    /// Type of the value at `place`.
    pub ty: Type,
    pub needs_drop: bool,
    pub consumed: bool,
}

impl ScopeEntry {
    fn is_live(&self) -> bool {
        self.needs_drop && !self.consumed
    }
}

/// Stack of lexical scopes.
#[derive(Debug, Default)]
pub struct ScopeTracker {
    scopes: Vec<Vec<ScopeEntry>>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a scope and return its index.
    pub fn enter_scope(&mut self) -> usize {
        self.scopes.push(Vec::new());
        self.scopes.len() - 1
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Add an entry to the innermost scope.
    ///
    /// Registering with no scope open opens one: the function root scope is
    /// always present while emitting, so this only matters to callers that
    /// build a tracker by hand.
    pub fn register(&mut self, binding: Binding, place: String, ty: Type, needs_drop: bool) {
        if self.scopes.is_empty() {
            self.scopes.push(Vec::new());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(ScopeEntry {
                binding,
                place,
                ty,
                needs_drop,
                consumed: false,
            });
        }
    }

    /// Mark the newest entry for `binding` as consumed. Idempotent.
    /// Returns false if the binding is not tracked.
    pub fn consume(&mut self, binding: Binding) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(entry) = scope.iter_mut().rev().find(|e| e.binding == binding) {
                entry.consumed = true;
                return true;
            }
        }
        false
    }

    /// True if `binding` was declared in the innermost scope.
    pub fn in_innermost(&self, binding: Binding) -> bool {
        self.scopes
            .last()
            .is_some_and(|scope| scope.iter().any(|e| e.binding == binding))
    }

    /// Newest entry for `binding`.
    pub fn lookup(&self, binding: Binding) -> Option<&ScopeEntry> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.iter().rev().find(|e| e.binding == binding))
    }

    /// Pop the innermost scope; return what must be dropped, newest first.
    pub fn leave_scope(&mut self) -> Vec<ScopeEntry> {
        let Some(scope) = self.scopes.pop() else {
            return Vec::new();
        };
        scope.into_iter().rev().filter(ScopeEntry::is_live).collect()
    }

    /// Entries to drop when jumping out of every scope from the innermost
    /// down to and including `index`. `except` is being moved out by the
    /// jump itself and is skipped.
    pub fn cleanup_from(&self, index: usize, except: Option<Binding>) -> Vec<ScopeEntry> {
        self.scopes
            .iter()
            .skip(index)
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .filter(|e| e.is_live() && Some(e.binding) != except)
            .cloned()
            .collect()
    }
}
