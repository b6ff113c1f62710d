//! Per-callable reference-flow walk.
//!
//! The walk is flow-insensitive: every binding has an origin set (the
//! bindings whose storage a reference held in it may point into), sets only
//! grow, and the body is re-walked until neither the origin sets nor the
//! escape marks change.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use koral_ir::{Expr, ExprKind, Intrinsic, Name, Param, Pattern, Stmt, Type};

use super::{EscapeReason, EscapeState, EscapeSummary, LocalEscapes};
use crate::stack::ensure_sufficient_stack;

/// Storage a reference may point into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum Origin {
    Local(Name),
    Param(usize),
}

type Origins = SmallVec<[Origin; 4]>;

pub(super) struct Context<'a> {
    pub(super) summaries: &'a FxHashMap<Name, EscapeSummary>,
    pub(super) peers: &'a FxHashSet<Name>,
}

/// Analyze one body. Returns the parameter summary and the escaping locals.
pub(super) fn analyze_body(
    ctx: &Context<'_>,
    params: &[Param],
    ret: &Type,
    body: &Expr,
) -> (EscapeSummary, LocalEscapes) {
    let mut walker = Walker {
        ctx,
        aliases: FxHashMap::default(),
        param_names: params.iter().map(|p| p.name).collect(),
        declared_at: FxHashMap::default(),
        escaping: FxHashMap::default(),
        escape_order: Vec::new(),
        params: vec![EscapeState::NoEscape; params.len()],
        returns_reference: vec![ret.is_reference_like()],
        depth: 0,
        changed: false,
    };
    for (i, p) in params.iter().enumerate() {
        walker.declared_at.insert(p.name, 0);
        walker.aliases.insert(p.name, smallvec::smallvec![Origin::Param(i)]);
    }

    loop {
        walker.changed = false;
        walker.depth = 0;
        let result = walker.walk(body);
        walker.escape(&result, EscapeReason::Returned);
        if !walker.changed {
            break;
        }
    }

    (
        EscapeSummary {
            params: walker.params,
        },
        LocalEscapes {
            reasons: walker.escaping,
            order: walker.escape_order,
        },
    )
}

struct Walker<'a, 'c> {
    ctx: &'a Context<'c>,
    aliases: FxHashMap<Name, Origins>,
    param_names: FxHashSet<Name>,
    declared_at: FxHashMap<Name, u32>,
    escaping: FxHashMap<Name, EscapeReason>,
    escape_order: Vec<Name>,
    params: Vec<EscapeState>,
    /// One entry per function or closure body being walked.
    returns_reference: Vec<bool>,
    depth: u32,
    changed: bool,
}

impl Walker<'_, '_> {
    fn escape(&mut self, origins: &[Origin], reason: EscapeReason) {
        for origin in origins {
            match *origin {
                Origin::Local(name) => {
                    if !self.escaping.contains_key(&name) {
                        tracing::trace!(local = name.raw(), ?reason, "local escapes");
                        self.escaping.insert(name, reason);
                        self.escape_order.push(name);
                        self.changed = true;
                    }
                }
                Origin::Param(i) => {
                    if let Some(state) = self.params.get_mut(i) {
                        if *state == EscapeState::NoEscape {
                            *state = EscapeState::Escapes;
                            self.changed = true;
                        }
                    }
                }
            }
        }
    }

    fn add_aliases(&mut self, name: Name, origins: &[Origin]) {
        let set = self.aliases.entry(name).or_default();
        for origin in origins {
            if !set.contains(origin) {
                set.push(*origin);
                self.changed = true;
            }
        }
    }

    fn declare(&mut self, name: Name) {
        self.declared_at.insert(name, self.depth);
    }

    fn binding_origins(&self, name: Name) -> Origins {
        self.aliases.get(&name).cloned().unwrap_or_default()
    }

    /// Escape every origin declared at or below `scope_depth`: its reference
    /// is leaving the scope that declared it.
    fn escape_scoped(&mut self, origins: &[Origin], scope_depth: u32, ty: &Type) {
        let leaving: Origins = origins
            .iter()
            .filter(|o| match o {
                Origin::Local(n) => self.declared_at.get(n).is_some_and(|d| *d >= scope_depth),
                Origin::Param(_) => false,
            })
            .copied()
            .collect();
        if leaving.is_empty() {
            return;
        }
        let returns_reference = self.returns_reference.last().copied().unwrap_or(false);
        let reason = if ty.is_reference_like() && returns_reference {
            EscapeReason::Returned
        } else {
            EscapeReason::OutlivesScope
        };
        self.escape(&leaving, reason);
    }

    /// Walk `expr` and return the origins its value may point into.
    /// Scalar values carry no reference.
    fn walk(&mut self, expr: &Expr) -> Origins {
        let origins = ensure_sufficient_stack(|| self.walk_inner(expr));
        if matches!(expr.ty, Type::Scalar(_)) {
            Origins::new()
        } else {
            origins
        }
    }

    fn walk_all(&mut self, exprs: &[Expr]) -> Vec<Origins> {
        exprs.iter().map(|e| self.walk(e)).collect()
    }

    fn walk_inner(&mut self, expr: &Expr) -> Origins {
        match &expr.kind {
            ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Bool(_)
            | ExprKind::Str(_)
            | ExprKind::FunctionRef(_)
            | ExprKind::Global(_)
            | ExprKind::Break
            | ExprKind::Continue => Origins::new(),

            ExprKind::Var(name) => self.binding_origins(*name),

            ExprKind::Field { base, .. } | ExprKind::Deref(base) => self.walk(base),

            ExprKind::ToTraitObject { value, .. } => self.walk(value),

            ExprKind::Ref(inner) => {
                let mut origins = self.walk(inner);
                if let Some(root) = place_root(inner) {
                    if !self.param_names.contains(&root) {
                        push_unique(&mut origins, Origin::Local(root));
                    }
                }
                origins
            }

            ExprKind::Unary { operand, .. } => {
                self.walk(operand);
                Origins::new()
            }
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
                self.walk(lhs);
                self.walk(rhs);
                Origins::new()
            }

            ExprKind::Call { callee, args } => {
                let arg_origins = self.walk_all(args);
                for (i, origins) in arg_origins.iter().enumerate() {
                    if self.param_escapes(*callee, i) {
                        self.escape(origins, EscapeReason::PassedToEscapingParam);
                    }
                }
                result_of_call(&expr.ty, arg_origins)
            }

            ExprKind::CallIndirect { callee, args } => {
                let mut all = vec![self.walk(callee)];
                all.extend(self.walk_all(args));
                for origins in &all {
                    self.escape(origins, EscapeReason::PassedToEscapingParam);
                }
                result_of_call(&expr.ty, all)
            }

            ExprKind::TraitCall { receiver, args, .. } => {
                let mut all = vec![self.walk(receiver)];
                all.extend(self.walk_all(args));
                for origins in &all {
                    self.escape(origins, EscapeReason::PassedToEscapingParam);
                }
                result_of_call(&expr.ty, all)
            }

            ExprKind::StructLit { fields, .. } => {
                let mut out = Origins::new();
                for (_, value) in fields {
                    let origins = self.walk(value);
                    self.escape(&origins, EscapeReason::StoredToField);
                    extend_unique(&mut out, &origins);
                }
                out
            }
            ExprKind::UnionLit { args, .. } => {
                let mut out = Origins::new();
                for value in args {
                    let origins = self.walk(value);
                    self.escape(&origins, EscapeReason::StoredToField);
                    extend_unique(&mut out, &origins);
                }
                out
            }

            ExprKind::Closure {
                params,
                ret,
                captures,
                body,
            } => {
                for capture in captures {
                    let mut origins = self.binding_origins(capture.name);
                    if !self.param_names.contains(&capture.name) {
                        push_unique(&mut origins, Origin::Local(capture.name));
                    }
                    self.escape(&origins, EscapeReason::CapturedByClosure);
                }
                self.returns_reference.push(ret.is_reference_like());
                self.depth += 1;
                for p in params {
                    self.declare(p.name);
                }
                let result = self.walk(body);
                self.escape(&result, EscapeReason::Returned);
                self.depth -= 1;
                self.returns_reference.pop();
                Origins::new()
            }

            ExprKind::Block { stmts, tail } => {
                self.depth += 1;
                let scope_depth = self.depth;
                for stmt in stmts {
                    self.walk_stmt(stmt);
                }
                let result = match tail {
                    Some(tail) => {
                        let origins = self.walk(tail);
                        self.escape_scoped(&origins, scope_depth, &expr.ty);
                        origins
                    }
                    None => Origins::new(),
                };
                self.depth -= 1;
                result
            }

            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.walk(cond);
                let mut out = self.walk(then_branch);
                if let Some(e) = else_branch {
                    let origins = self.walk(e);
                    extend_unique(&mut out, &origins);
                }
                out
            }

            ExprKind::Match { subject, arms } => {
                let subject_origins = self.walk(subject);
                let mut out = Origins::new();
                for arm in arms {
                    self.depth += 1;
                    let scope_depth = self.depth;
                    self.bind_pattern(&arm.pattern, &subject_origins);
                    if let Some(guard) = &arm.guard {
                        self.walk(guard);
                    }
                    let origins = self.walk(&arm.body);
                    self.escape_scoped(&origins, scope_depth, &expr.ty);
                    extend_unique(&mut out, &origins);
                    self.depth -= 1;
                }
                out
            }

            ExprKind::While { cond, body } => {
                self.walk(cond);
                self.walk(body);
                Origins::new()
            }

            ExprKind::Return(value) => {
                if let Some(value) = value {
                    let origins = self.walk(value);
                    self.escape(&origins, EscapeReason::Returned);
                }
                Origins::new()
            }

            ExprKind::Intrinsic { op, args } => {
                let origins = self.walk_all(args);
                match op {
                    Intrinsic::Write => {
                        if let Some(value) = origins.get(1) {
                            self.escape(value, EscapeReason::StoredThroughPointer);
                        }
                        Origins::new()
                    }
                    Intrinsic::Read | Intrinsic::Offset => {
                        origins.into_iter().next().unwrap_or_default()
                    }
                    Intrinsic::Alloc { .. } | Intrinsic::Free => Origins::new(),
                }
            }
        }
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, value, .. } => {
                let origins = self.walk(value);
                self.declare(*name);
                self.add_aliases(*name, &origins);
            }
            Stmt::Assign { target, value } => {
                let origins = self.walk(value);
                self.walk(target);
                match assign_target(target) {
                    AssignTarget::Binding(root) => {
                        if let Some(&target_depth) = self.declared_at.get(&root) {
                            let outer: Origins = origins
                                .iter()
                                .filter(|o| match o {
                                    Origin::Local(n) => {
                                        self.declared_at.get(n).is_some_and(|d| *d > target_depth)
                                    }
                                    Origin::Param(_) => false,
                                })
                                .copied()
                                .collect();
                            self.escape(&outer, EscapeReason::OutlivesScope);
                        }
                        self.add_aliases(root, &origins);
                    }
                    AssignTarget::Field(root) => {
                        self.escape(&origins, EscapeReason::StoredToField);
                        self.add_aliases(root, &origins);
                    }
                    AssignTarget::Indirect => {
                        self.escape(&origins, EscapeReason::StoredThroughPointer);
                    }
                }
            }
            Stmt::Expr(e) => {
                self.walk(e);
            }
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, origins: &[Origin]) {
        match pattern {
            Pattern::Binding { name, .. } => {
                self.declare(*name);
                self.add_aliases(*name, origins);
            }
            Pattern::Case { fields, .. } => {
                for p in fields {
                    self.bind_pattern(p, origins);
                }
            }
            Pattern::Struct { fields } => {
                for (_, p) in fields {
                    self.bind_pattern(p, origins);
                }
            }
            Pattern::Wildcard | Pattern::Int(_) | Pattern::Bool(_) | Pattern::Str(_) => {}
        }
    }

    fn param_escapes(&self, callee: Name, index: usize) -> bool {
        if let Some(summary) = self.ctx.summaries.get(&callee) {
            return summary.param_escapes(index);
        }
        if self.ctx.peers.contains(&callee) {
            // Peer not analyzed yet in this round: no propagation.
            return false;
        }
        // Unknown callee, or a body we cannot see: assume the worst.
        true
    }
}

enum AssignTarget {
    /// `x = ...`
    Binding(Name),
    /// `x.f.g = ...`
    Field(Name),
    /// Through a deref or pointer.
    Indirect,
}

fn assign_target(target: &Expr) -> AssignTarget {
    match &target.kind {
        ExprKind::Var(name) => AssignTarget::Binding(*name),
        ExprKind::Field { base, .. } => match assign_target(base) {
            AssignTarget::Binding(root) | AssignTarget::Field(root) => AssignTarget::Field(root),
            AssignTarget::Indirect => AssignTarget::Indirect,
        },
        _ => AssignTarget::Indirect,
    }
}

/// The binding whose own storage `expr` names, looking through field access.
pub(crate) fn place_root(expr: &Expr) -> Option<Name> {
    match &expr.kind {
        ExprKind::Var(name) => Some(*name),
        ExprKind::Field { base, .. } => place_root(base),
        _ => None,
    }
}

fn result_of_call(ret: &Type, args: Vec<Origins>) -> Origins {
    let mut out = Origins::new();
    if matches!(ret, Type::Scalar(_)) {
        return out;
    }
    for origins in &args {
        extend_unique(&mut out, origins);
    }
    out
}

fn push_unique(set: &mut Origins, origin: Origin) {
    if !set.contains(&origin) {
        set.push(origin);
    }
}

fn extend_unique(set: &mut Origins, origins: &[Origin]) {
    for o in origins {
        push_unique(set, *o);
    }
}
