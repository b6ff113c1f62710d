//! Escape analysis: stack or heap placement for referenced values.
//!
//! For every `ref` expression the emitter must decide whether the referenced
//! value can stay in its stack slot (the reference is `{ &slot, NULL }`) or
//! must live in a reference-counted heap cell. This module answers that
//! question for every local binding of every callable.
//!
//! # Algorithm
//!
//! 1. Build the direct-call graph ([`call_graph`]).
//! 2. Decompose it into strongly connected components with Tarjan's
//!    algorithm; components come out callees-first.
//! 3. Analyze each component. Members read the summaries of callees outside
//!    the component, which are already final. Summaries of peers inside the
//!    component start out missing, and a missing summary propagates nothing.
//!    The component is then re-walked until no member's summary changes, so
//!    the final result does not depend on the order members were visited.
//!
//! Per callable, [`walk`] tracks which bindings each value may refer to and
//! marks a binding as escaping when such a reference is returned, stored in a
//! field, captured, passed to an escaping parameter, written through a
//! pointer, or carried out of the scope that declared the binding.
//!
//! # Soundness
//!
//! Anything the walk cannot see through (indirect calls, dynamic trait
//! calls, callees without a body) counts as escaping. Uncertainty only ever
//! moves values to the heap; the analysis never fails.

mod call_graph;
mod walk;

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use koral_ir::{Name, Program, StringLookup};

use call_graph::CallGraph;
pub(crate) use walk::place_root;

/// Whether a parameter can outlive the call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EscapeState {
    NoEscape,
    Escapes,
}

/// Why a local must be heap-allocated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EscapeReason {
    /// A reference to it is returned from the enclosing callable.
    Returned,
    /// A reference to it is stored into an aggregate field.
    StoredToField,
    /// A closure captures it.
    CapturedByClosure,
    /// A reference to it is passed where the callee lets it escape.
    PassedToEscapingParam,
    /// A reference to it is written through a pointer or reference.
    StoredThroughPointer,
    /// A reference to it leaves the lexical scope that declared it.
    OutlivesScope,
}

impl EscapeReason {
    /// Phrase used in the escape report.
    pub fn describe(self) -> &'static str {
        match self {
            EscapeReason::Returned => "escapes to return value",
            EscapeReason::StoredToField => "escapes to struct field",
            EscapeReason::CapturedByClosure => "is captured by a closure",
            EscapeReason::PassedToEscapingParam => "escapes to function parameter",
            EscapeReason::StoredThroughPointer => "escapes through a pointer write",
            EscapeReason::OutlivesScope => "outlives its declaring scope",
        }
    }
}

/// Per-parameter escape states of one callable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EscapeSummary {
    pub params: Vec<EscapeState>,
}

impl EscapeSummary {
    /// Every parameter escapes: used for callees without a visible body.
    pub fn all_escaping(arity: usize) -> Self {
        EscapeSummary {
            params: vec![EscapeState::Escapes; arity],
        }
    }

    pub fn param_escapes(&self, index: usize) -> bool {
        self.params.get(index) == Some(&EscapeState::Escapes)
    }
}

/// Escaping locals of one callable. Locals not listed are stack-safe.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalEscapes {
    reasons: FxHashMap<Name, EscapeReason>,
    /// Escaping locals in the order the walk first marked them.
    order: Vec<Name>,
}

impl LocalEscapes {
    pub fn reason(&self, local: Name) -> Option<EscapeReason> {
        self.reasons.get(&local).copied()
    }

    pub fn escapes(&self, local: Name) -> bool {
        self.reasons.contains_key(&local)
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    /// Escaping locals with their reasons, in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (Name, EscapeReason)> + '_ {
        self.order
            .iter()
            .filter_map(|name| self.reasons.get(name).map(|reason| (*name, *reason)))
    }
}

/// One line of the escape report: a local that had to move to the heap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscapeDiagnostic {
    pub function: String,
    pub variable: String,
    pub reason: EscapeReason,
}

impl fmt::Display for EscapeDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[escape-analysis] Variable '{}' {} in function '{}'",
            self.variable,
            self.reason.describe(),
            self.function
        )
    }
}

/// Whole-program analysis output.
#[derive(Clone, Debug, Default)]
pub struct EscapeResults {
    summaries: FxHashMap<Name, EscapeSummary>,
    locals: FxHashMap<Name, LocalEscapes>,
}

impl EscapeResults {
    pub fn summary(&self, callable: Name) -> Option<&EscapeSummary> {
        self.summaries.get(&callable)
    }

    /// Escaping locals of a callable or global initializer.
    pub fn locals(&self, owner: Name) -> Option<&LocalEscapes> {
        self.locals.get(&owner)
    }

    /// True if `local` in `owner` may live in its stack slot.
    pub fn is_stack_safe(&self, owner: Name, local: Name) -> bool {
        self.locals.get(&owner).map_or(true, |l| !l.escapes(local))
    }

    /// Every escaping local with resolved names. Callables come in program
    /// order, then global initializers.
    pub fn report(&self, program: &Program, names: &dyn StringLookup) -> Vec<EscapeDiagnostic> {
        let owners = program
            .callables()
            .map(|f| f.name)
            .chain(program.globals.iter().map(|g| g.name));
        let mut out = Vec::new();
        for owner in owners {
            let Some(locals) = self.locals.get(&owner) else {
                continue;
            };
            for (local, reason) in locals.iter() {
                out.push(EscapeDiagnostic {
                    function: names.lookup(owner).to_owned(),
                    variable: names.lookup(local).to_owned(),
                    reason,
                });
            }
        }
        out
    }
}

/// Analyze every callable and global initializer of `program`.
pub fn analyze_program(program: &Program) -> EscapeResults {
    let index = program.callable_index();
    let graph = CallGraph::build(program);
    let mut results = EscapeResults::default();

    for scc in graph.sccs() {
        let peers: FxHashSet<Name> = scc.iter().copied().collect();
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let mut stable = true;
            for &name in &scc {
                let Some(decl) = index.get(&name) else {
                    continue;
                };
                let (summary, locals) = match &decl.body {
                    Some(body) => {
                        let ctx = walk::Context {
                            summaries: &results.summaries,
                            peers: &peers,
                        };
                        walk::analyze_body(&ctx, &decl.params, &decl.ret, body)
                    }
                    None => (
                        EscapeSummary::all_escaping(decl.params.len()),
                        LocalEscapes::default(),
                    ),
                };
                if results.summaries.get(&name) != Some(&summary) {
                    stable = false;
                }
                results.summaries.insert(name, summary);
                results.locals.insert(name, locals);
            }
            if stable {
                break;
            }
        }
        tracing::debug!(members = scc.len(), rounds, "escape summaries settled for component");
    }

    let no_peers = FxHashSet::default();
    for global in &program.globals {
        let ctx = walk::Context {
            summaries: &results.summaries,
            peers: &no_peers,
        };
        let (_, locals) = walk::analyze_body(&ctx, &[], &global.ty, &global.init);
        results.locals.insert(global.name, locals);
    }

    results
}

#[cfg(test)]
mod tests;
