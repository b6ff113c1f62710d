//! Whole-program call graph and its strongly connected components.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use koral_ir::{Expr, ExprKind, Name, Program};

use crate::stack::ensure_sufficient_stack;

/// Direct-call edges between callables, indexed by declaration order.
pub(crate) struct CallGraph {
    nodes: Vec<Name>,
    edges: Vec<SmallVec<[usize; 4]>>,
}

impl CallGraph {
    pub(crate) fn build(program: &Program) -> Self {
        let nodes: Vec<Name> = program.callables().map(|f| f.name).collect();
        let index: FxHashMap<Name, usize> =
            nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let edges = program
            .callables()
            .map(|decl| {
                let mut out = SmallVec::new();
                if let Some(body) = &decl.body {
                    collect_callees(body, &index, &mut out);
                }
                out
            })
            .collect();
        CallGraph { nodes, edges }
    }

    /// Strongly connected components, callees before callers.
    ///
    /// Members of one component are listed in declaration order.
    pub(crate) fn sccs(&self) -> Vec<Vec<Name>> {
        let mut state = TarjanState {
            next_index: 0,
            index: vec![None; self.nodes.len()],
            lowlink: vec![0; self.nodes.len()],
            on_stack: vec![false; self.nodes.len()],
            stack: Vec::new(),
            sccs: Vec::new(),
        };
        for v in 0..self.nodes.len() {
            if state.index[v].is_none() {
                self.strongconnect(v, &mut state);
            }
        }
        state
            .sccs
            .into_iter()
            .map(|mut scc| {
                scc.sort_unstable();
                scc.into_iter().map(|i| self.nodes[i]).collect()
            })
            .collect()
    }

    fn strongconnect(&self, v: usize, state: &mut TarjanState) {
        ensure_sufficient_stack(|| {
            state.index[v] = Some(state.next_index);
            state.lowlink[v] = state.next_index;
            state.next_index += 1;
            state.stack.push(v);
            state.on_stack[v] = true;

            for &w in &self.edges[v] {
                match state.index[w] {
                    None => {
                        self.strongconnect(w, state);
                        state.lowlink[v] = state.lowlink[v].min(state.lowlink[w]);
                    }
                    Some(w_index) if state.on_stack[w] => {
                        state.lowlink[v] = state.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
            }

            if Some(state.lowlink[v]) == state.index[v] {
                let mut scc = Vec::new();
                while let Some(w) = state.stack.pop() {
                    state.on_stack[w] = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                state.sccs.push(scc);
            }
        });
    }
}

struct TarjanState {
    next_index: usize,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    sccs: Vec<Vec<usize>>,
}

fn collect_callees(expr: &Expr, index: &FxHashMap<Name, usize>, out: &mut SmallVec<[usize; 4]>) {
    ensure_sufficient_stack(|| {
        if let ExprKind::Call { callee, .. } = &expr.kind {
            if let Some(&i) = index.get(callee) {
                if !out.contains(&i) {
                    out.push(i);
                }
            }
        }
        expr.for_each_child(&mut |child| collect_callees(child, index, out));
    });
}
