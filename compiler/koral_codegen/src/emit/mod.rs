//! C emission for function bodies.
//!
//! [`Emitter`] walks the typed tree of one callable at a time and writes C
//! statements into a [`CodeBuffer`]. Every sub-expression lowers to a
//! [`Value`]; ownership of that value is the caller's business:
//!
//! - [`Value::Owned`]: a fresh value nobody else holds. If its type needs a
//!   drop it is always a named temporary, so it can be registered with the
//!   [`ScopeTracker`] or moved.
//! - [`Value::Place`]: an existing lvalue. Consumers that keep the value copy
//!   it ([`Emitter::into_owned`]); readers use it in place.
//! - [`Value::Void`]: unit-typed or diverging.
//!
//! # Scopes
//!
//! Every tracker scope corresponds to one C block, so every temporary a
//! scope owns is declared where its drop is emitted. Exits that jump out of
//! scopes (`return`, `break`, `continue`, a matching arm) emit the drops
//! from [`ScopeTracker::cleanup_from`] before the jump.
//!
//! # Layout
//!
//! - `expr`: literals, places, operators, calls, aggregates
//! - `control`: blocks, `if`, `while`, exits
//! - `pattern`: `match`
//! - `reference`: `ref`, `deref`, let-bindings that need heap cells

mod control;
mod expr;
mod pattern;
mod reference;

use std::fmt::Write as _;

use rustc_hash::{FxHashMap, FxHashSet};

use koral_ir::{
    CaptureMode, Expr, ExprKind, FunctionDecl, GlobalDecl, Name, Param, Program, Stmt,
    StringInterner, Type,
};

use crate::aggregate;
use crate::context::CodeBuffer;
use crate::error::{CodegenResult, InternalError, ResultExt};
use crate::escape::EscapeResults;
use crate::layout::TypeLayout;
use crate::names::{c_ident, symbol_fragment};
use crate::options::CodegenOptions;
use crate::runtime;
use crate::scope::{Binding, ScopeEntry, ScopeTracker};
use crate::stack::ensure_sufficient_stack;
use crate::vtable::VtableRegistry;

/// Result of lowering one expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Value {
    Void,
    Owned(String),
    Place(String),
}

/// How a binding's storage is reached from the current function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Access {
    /// A stack slot of the current function.
    Local(String),
    /// A parameter of the current function.
    Param(String),
    /// A heap cell (`struct Ref`) owned by the current function.
    Boxed(String),
    /// A by-value capture, read from the closure environment.
    EnvValue(String),
    /// A by-reference capture: a `struct Ref` in the closure environment.
    EnvRef(String),
    /// Unit-typed binding; holds nothing.
    Unit,
}

pub(crate) struct LoopContext {
    pub(crate) start: String,
    pub(crate) end: String,
    /// Tracker index of the loop body scope.
    pub(crate) scope_index: usize,
}

/// Per-function emission state.
pub(crate) struct Frame {
    /// Callable or global whose escape results apply.
    pub(crate) owner: Name,
    /// Symbol fragment used to name lifted closures.
    pub(crate) symbol: String,
    pub(crate) scopes: ScopeTracker,
    pub(crate) loops: Vec<LoopContext>,
    pub(crate) bindings: FxHashMap<Name, (Access, Type)>,
    /// Bindings that are assigned somewhere; never moved out of.
    pub(crate) assigned: FxHashSet<Name>,
    /// C identifiers already declared in this function.
    pub(crate) used_idents: FxHashSet<String>,
    pub(crate) ret: Type,
}

impl Frame {
    pub(crate) fn new(owner: Name, symbol: String, ret: Type) -> Self {
        Frame {
            owner,
            symbol,
            scopes: ScopeTracker::new(),
            loops: Vec::new(),
            bindings: FxHashMap::default(),
            assigned: FxHashSet::default(),
            used_idents: FxHashSet::default(),
            ret,
        }
    }
}

/// Emits a whole program.
pub(crate) struct Emitter<'p> {
    pub(crate) layout: TypeLayout<'p>,
    pub(crate) program: &'p Program,
    pub(crate) names: &'p StringInterner,
    pub(crate) escape: &'p EscapeResults,
    pub(crate) options: &'p CodegenOptions,
    pub(crate) callables: FxHashMap<Name, &'p FunctionDecl>,
    pub(crate) globals: FxHashMap<Name, &'p GlobalDecl>,
    pub(crate) buf: CodeBuffer,
    /// Closure environment structs, drop routines and prototypes.
    pub(crate) closure_decls: CodeBuffer,
    /// Lifted closure definitions.
    pub(crate) lifted: Vec<String>,
    pub(crate) vtables: VtableRegistry,
    pub(crate) frame: Frame,
    pub(crate) temps: u32,
    pub(crate) labels: u32,
    /// Program-wide closure counter; lifted names stay unique.
    pub(crate) closures: u32,
}

impl<'p> Emitter<'p> {
    pub(crate) fn new(
        program: &'p Program,
        names: &'p StringInterner,
        escape: &'p EscapeResults,
        options: &'p CodegenOptions,
    ) -> Self {
        Emitter {
            layout: TypeLayout::new(program, names),
            program,
            names,
            escape,
            options,
            callables: program.callable_index(),
            globals: program.globals.iter().map(|g| (g.name, g)).collect(),
            buf: CodeBuffer::new(options.indent_width),
            closure_decls: CodeBuffer::new(options.indent_width),
            lifted: Vec::new(),
            vtables: VtableRegistry::new(options.indent_width),
            frame: Frame::new(Name::EMPTY, String::new(), Type::VOID),
            temps: 0,
            labels: 0,
            closures: 0,
        }
    }

    // ── Naming ──────────────────────────────────────────────

    pub(crate) fn lookup(&self, name: Name) -> &'p str {
        self.names.lookup(name)
    }

    /// C symbol of a function, global or equality routine.
    pub(crate) fn symbol(&self, name: Name) -> String {
        c_ident(self.lookup(name))
    }

    pub(crate) fn temp(&mut self) -> String {
        let n = self.temps;
        self.temps += 1;
        format!("__t{n}")
    }

    /// A fresh label number; callers add their own suffixes.
    pub(crate) fn label_id(&mut self) -> u32 {
        let n = self.labels;
        self.labels += 1;
        n
    }

    /// A C identifier for a local that is unique within the function.
    pub(crate) fn local_ident(&mut self, name: Name) -> String {
        let base = c_ident(self.lookup(name));
        let mut ident = base.clone();
        let mut n = 1;
        while !self.frame.used_idents.insert(ident.clone()) {
            ident = format!("{base}_{n}");
            n += 1;
        }
        ident
    }

    // ── Values ──────────────────────────────────────────────

    /// Lower an expression, attaching a context frame on failure.
    pub(crate) fn emit_expr(&mut self, expr: &Expr) -> CodegenResult<Value> {
        ensure_sufficient_stack(|| self.emit_expr_inner(expr))
            .context(|| format!("lowering {}", expr.kind_label()))
    }

    fn emit_expr_inner(&mut self, expr: &Expr) -> CodegenResult<Value> {
        match &expr.kind {
            ExprKind::Int(v) => Ok(Value::Owned(self.int_literal(*v, &expr.ty)?)),
            ExprKind::Float(v) => Ok(Value::Owned(float_literal(*v, &expr.ty))),
            ExprKind::Bool(b) => Ok(Value::Owned(b.to_string())),
            ExprKind::Str(text) => self.emit_string_literal(text, &expr.ty),
            ExprKind::Var(name) => self.emit_var(*name, expr),
            ExprKind::FunctionRef(name) => self.emit_function_ref(*name, &expr.ty),
            ExprKind::Global(name) => self.emit_global(*name),
            ExprKind::Field { base, field } => self.emit_field(base, *field),
            ExprKind::Deref(inner) => self.emit_deref(inner),
            ExprKind::Ref(inner) => self.emit_ref(inner),
            ExprKind::Unary { op, operand } => self.emit_unary(*op, operand, &expr.ty),
            ExprKind::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs, &expr.ty),
            ExprKind::Logical { op, lhs, rhs } => self.emit_logical(*op, lhs, rhs),
            ExprKind::Call { callee, args } => self.emit_call(*callee, args, &expr.ty),
            ExprKind::CallIndirect { callee, args } => {
                self.emit_call_indirect(callee, args, &expr.ty)
            }
            ExprKind::TraitCall {
                receiver,
                trait_name,
                trait_args,
                method,
                args,
            } => self.emit_trait_call(receiver, *trait_name, trait_args, *method, args, &expr.ty),
            ExprKind::ToTraitObject {
                value,
                trait_name,
                trait_args,
            } => self.emit_to_trait_object(value, *trait_name, trait_args),
            ExprKind::StructLit { name, fields } => self.emit_struct_lit(*name, fields),
            ExprKind::UnionLit { name, case, args } => self.emit_union_lit(*name, *case, args),
            ExprKind::Closure {
                params,
                ret,
                captures,
                body,
            } => self.emit_closure(params, ret, captures, body, &expr.ty),
            ExprKind::Block { stmts, tail } => self.emit_block(stmts, tail.as_deref(), &expr.ty),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.emit_if(cond, then_branch, else_branch.as_deref(), &expr.ty),
            ExprKind::Match { subject, arms } => self.emit_match(subject, arms, &expr.ty),
            ExprKind::While { cond, body } => self.emit_while(cond, body),
            ExprKind::Break => self.emit_break(),
            ExprKind::Continue => self.emit_continue(),
            ExprKind::Return(value) => self.emit_return(value.as_deref()),
            ExprKind::Intrinsic { op, args } => self.emit_intrinsic(op, args, &expr.ty),
        }
    }

    /// Take ownership of a value of type `ty`, copying it if it is a place.
    ///
    /// A diverged value yields an uninitialized temporary; the code that
    /// would read it is unreachable.
    pub(crate) fn into_owned(&mut self, value: Value, ty: &Type) -> CodegenResult<String> {
        match value {
            Value::Owned(v) => Ok(v),
            Value::Place(p) => {
                if !self.layout.needs_copy(ty)? {
                    return Ok(p);
                }
                let repr = self.layout.representation_of(ty)?;
                let t = self.temp();
                let copy = self.layout.copy_expr(&p, ty)?;
                self.buf.line(&format!("{repr} {t} = {copy};"));
                if let Some(retain) = self.layout.retain_stmt(&t, ty)? {
                    self.buf.line(&retain);
                }
                Ok(t)
            }
            Value::Void => {
                let repr = self.layout.representation_of(ty)?;
                let t = self.temp();
                self.buf.line(&format!("{repr} {t};"));
                Ok(t)
            }
        }
    }

    /// Like [`Self::into_owned`], but always a named temporary, so the value
    /// no longer depends on any place a later statement may change.
    pub(crate) fn into_temp(&mut self, value: Value, ty: &Type) -> CodegenResult<String> {
        let owned = self.into_owned(value, ty)?;
        if is_temp(&owned) {
            return Ok(owned);
        }
        let repr = self.layout.representation_of(ty)?;
        let t = self.temp();
        self.buf.line(&format!("{repr} {t} = {owned};"));
        Ok(t)
    }

    /// Read access to a value. An owned droppable value is parked in the
    /// innermost scope so it is dropped when the scope ends.
    pub(crate) fn place_of(&mut self, value: Value, ty: &Type) -> CodegenResult<String> {
        match value {
            Value::Place(p) => Ok(p),
            Value::Owned(v) => {
                if self.layout.needs_drop(ty)? {
                    self.hold(&v, ty)?;
                }
                Ok(v)
            }
            Value::Void => self.into_owned(Value::Void, ty),
        }
    }

    /// Register an owned droppable temporary with the innermost scope.
    pub(crate) fn hold(&mut self, temp: &str, ty: &Type) -> CodegenResult<Binding> {
        let binding = Binding::Temp(self.temps);
        self.temps += 1;
        let needs_drop = self.layout.needs_drop(ty)?;
        self.frame
            .scopes
            .register(binding, temp.to_owned(), ty.clone(), needs_drop);
        Ok(binding)
    }

    /// Drop a value nobody is going to use.
    pub(crate) fn discard(&mut self, value: Value, ty: &Type) -> CodegenResult<()> {
        match value {
            Value::Owned(v) => {
                if ty.is_unit_like() {
                    return Ok(());
                }
                match self.layout.drop_stmt(&v, ty)? {
                    Some(drop) => self.buf.line(&drop),
                    // Evaluate for side effects; trivial values need no drop.
                    None if !is_identifier(&v) => self.buf.line(&format!("(void)({v});")),
                    None => {}
                }
                Ok(())
            }
            Value::Place(_) | Value::Void => Ok(()),
        }
    }

    /// Lower operands left to right, taking ownership of each.
    ///
    /// Each droppable operand is held by the innermost scope until every
    /// operand is evaluated, so an exit in a later operand drops it. The
    /// holds are released before returning: ownership passes to whatever
    /// consumes the operands.
    pub(crate) fn emit_owned_operands(&mut self, exprs: &[&Expr]) -> CodegenResult<Vec<String>> {
        let mut out = Vec::with_capacity(exprs.len());
        let mut held = Vec::new();
        for (i, expr) in exprs.iter().enumerate() {
            let value = self.emit_expr(expr)?;
            if expr.ty.is_unit_like() {
                self.discard(value, &expr.ty)?;
                out.push(String::new());
                continue;
            }
            let later_effects = exprs[i + 1..].iter().any(|e| !is_simple(e));
            let owned = if later_effects {
                self.into_temp(value, &expr.ty)?
            } else {
                self.into_owned(value, &expr.ty)?
            };
            if later_effects && self.layout.needs_drop(&expr.ty)? {
                held.push(self.hold(&owned, &expr.ty)?);
            }
            out.push(owned);
        }
        for binding in held {
            self.frame.scopes.consume(binding);
        }
        Ok(out)
    }

    /// Lower operands left to right for reading. Places read before a later
    /// operand with side effects are snapshotted first.
    pub(crate) fn emit_read_operands(&mut self, exprs: &[&Expr]) -> CodegenResult<Vec<String>> {
        let mut out = Vec::with_capacity(exprs.len());
        for (i, expr) in exprs.iter().enumerate() {
            let value = self.emit_expr(expr)?;
            let later_effects = exprs[i + 1..].iter().any(|e| !is_simple(e));
            let read = match value {
                Value::Place(p) if later_effects && !self.layout.needs_copy(&expr.ty)? => {
                    self.into_temp(Value::Place(p), &expr.ty)?
                }
                Value::Owned(v) if later_effects && !self.layout.needs_drop(&expr.ty)? => {
                    self.into_temp(Value::Owned(v), &expr.ty)?
                }
                other => self.place_of(other, &expr.ty)?,
            };
            out.push(read);
        }
        Ok(out)
    }

    // ── Drops ───────────────────────────────────────────────

    /// Emit drops for scope entries, in the order given.
    pub(crate) fn emit_drops(&mut self, entries: Vec<ScopeEntry>) -> CodegenResult<()> {
        for entry in entries {
            if let Some(drop) = self.layout.drop_stmt(&entry.place, &entry.ty)? {
                self.buf.line(&drop);
            }
        }
        Ok(())
    }

    pub(crate) fn leave_scope(&mut self) -> CodegenResult<()> {
        let entries = self.frame.scopes.leave_scope();
        self.emit_drops(entries)
    }

    /// Pop a scope whose end is unreachable.
    pub(crate) fn leave_scope_unreachable(&mut self) {
        self.frame.scopes.leave_scope();
    }

    pub(crate) fn cleanup_to(&mut self, index: usize, except: Option<Binding>) -> CodegenResult<()> {
        let entries = self.frame.scopes.cleanup_from(index, except);
        self.emit_drops(entries)
    }

    // ── Bindings ────────────────────────────────────────────

    pub(crate) fn binding(&self, name: Name) -> CodegenResult<&(Access, Type)> {
        self.frame
            .bindings
            .get(&name)
            .ok_or_else(|| InternalError::UnknownBinding(self.lookup(name).to_owned()).into())
    }

    /// Bind an owned value to `name`: a stack slot, or a heap cell if a
    /// reference to the binding escapes.
    pub(crate) fn bind_value(&mut self, name: Name, ty: &Type, init: &str) -> CodegenResult<()> {
        if self.escape.is_stack_safe(self.frame.owner, name) {
            self.declare_local(name, ty, init)
        } else {
            tracing::trace!(local = self.lookup(name), "heap cell for escaping local");
            self.declare_boxed(name, ty, init)
        }
    }

    /// Bind a stack local and register it with the innermost scope.
    fn declare_local(&mut self, name: Name, ty: &Type, init: &str) -> CodegenResult<()> {
        let repr = self.layout.representation_of(ty)?;
        let ident = self.local_ident(name);
        self.buf.line(&format!("{repr} {ident} = {init};"));
        let needs_drop = self.layout.needs_drop(ty)?;
        self.frame
            .scopes
            .register(Binding::Named(name), ident.clone(), ty.clone(), needs_drop);
        self.frame
            .bindings
            .insert(name, (Access::Local(ident), ty.clone()));
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> CodegenResult<()> {
        match stmt {
            Stmt::Let { name, ty, value } => self
                .emit_let(*name, ty, value)
                .context(|| format!("binding `{}`", self.lookup(*name))),
            Stmt::Assign { target, value } => self.emit_assign(target, value),
            Stmt::Expr(expr) => {
                let value = self.emit_expr(expr)?;
                self.discard(value, &expr.ty)
            }
        }
    }

    fn emit_let(&mut self, name: Name, ty: &Type, value: &Expr) -> CodegenResult<()> {
        let v = self.emit_expr(value)?;
        if ty.is_unit_like() {
            self.discard(v, ty)?;
            self.frame.bindings.insert(name, (Access::Unit, ty.clone()));
            return Ok(());
        }
        let owned = self.into_owned(v, ty)?;
        self.bind_value(name, ty, &owned)
    }

    fn emit_assign(&mut self, target: &Expr, value: &Expr) -> CodegenResult<()> {
        let v = self.emit_expr(value).context(|| "lowering assigned value".to_owned())?;
        if target.ty.is_unit_like() {
            return self.discard(v, &value.ty);
        }
        let owned = self.into_temp(v, &value.ty)?;
        let place = self.emit_place(target)?;
        if let Some(drop) = self.layout.drop_stmt(&place, &target.ty)? {
            self.buf.line(&drop);
        }
        self.buf.line(&format!("{place} = {owned};"));
        Ok(())
    }

    /// Lower an assignment target to an lvalue.
    fn emit_place(&mut self, target: &Expr) -> CodegenResult<String> {
        match &target.kind {
            ExprKind::Var(_)
            | ExprKind::Field { .. }
            | ExprKind::Deref(_)
            | ExprKind::Global(_)
            | ExprKind::Intrinsic {
                op: koral_ir::Intrinsic::Read,
                ..
            } => match self.emit_expr(target)? {
                Value::Place(p) => Ok(p),
                Value::Owned(_) | Value::Void => {
                    Err(InternalError::NotAPlace(target.kind_label()).into())
                }
            },
            _ => Err(InternalError::NotAPlace(target.kind_label()).into()),
        }
    }

    // ── Functions ───────────────────────────────────────────

    /// `R name(P a, ...)`, without a trailing `;` or `{`.
    pub(crate) fn signature(&self, symbol: &str, params: &[Param], ret: &Type) -> CodegenResult<String> {
        let mut parts = Vec::with_capacity(params.len());
        for p in params.iter().filter(|p| !p.ty.is_unit_like()) {
            parts.push(format!(
                "{} {}",
                self.layout.representation_of(&p.ty)?,
                c_ident(self.lookup(p.name))
            ));
        }
        if parts.is_empty() {
            parts.push("void".to_owned());
        }
        Ok(format!(
            "{} {symbol}({})",
            self.layout.representation_of(ret)?,
            parts.join(", ")
        ))
    }

    /// Bind parameters in the root scope. The callee owns its arguments.
    ///
    /// Parameters captured by reference anywhere in the body are moved into
    /// heap cells up front so closures can share them.
    pub(crate) fn bind_params(&mut self, params: &[Param], body: &Expr) -> CodegenResult<()> {
        let shared = captured_by_reference(body);
        for p in params {
            if p.ty.is_unit_like() {
                self.frame.bindings.insert(p.name, (Access::Unit, p.ty.clone()));
                continue;
            }
            let ident = c_ident(self.lookup(p.name));
            self.frame.used_idents.insert(ident.clone());
            if shared.contains(&p.name) {
                self.declare_boxed(p.name, &p.ty, &ident)?;
                continue;
            }
            let needs_drop = self.layout.needs_drop(&p.ty)?;
            self.frame
                .scopes
                .register(Binding::Named(p.name), ident.clone(), p.ty.clone(), needs_drop);
            self.frame
                .bindings
                .insert(p.name, (Access::Param(ident), p.ty.clone()));
        }
        Ok(())
    }

    /// Lower a body whose value is returned, into the current buffer.
    ///
    /// The caller has opened the root scope; this closes it.
    pub(crate) fn emit_returning_body(&mut self, body: &Expr, ret: &Type) -> CodegenResult<()> {
        let value = self.emit_inline(body)?;
        if ret.is_unit_like() {
            self.discard(value, &body.ty)?;
            return self.leave_scope();
        }
        if value == Value::Void {
            // Every path already returned.
            self.leave_scope_unreachable();
            return Ok(());
        }
        let result = self.into_temp(value, ret)?;
        self.leave_scope()?;
        self.buf.line(&format!("return {result};"));
        Ok(())
    }

    fn emit_function(&mut self, decl: &'p FunctionDecl) -> CodegenResult<()> {
        let Some(body) = &decl.body else {
            return Ok(());
        };
        let symbol = self.symbol(decl.name);
        let _span = tracing::debug_span!("function", name = %symbol).entered();

        let signature = self.signature(&symbol, &decl.params, &decl.ret)?;
        self.frame = Frame::new(decl.name, symbol_fragment(&symbol), decl.ret.clone());
        self.frame.assigned = assigned_bindings(body);
        self.temps = 0;
        self.labels = 0;

        self.buf.line(&format!("{signature} {{"));
        self.buf.indent();
        self.frame.scopes.enter_scope();
        self.bind_params(&decl.params, body)?;
        self.emit_returning_body(body, &decl.ret)?;
        debug_assert_eq!(self.frame.scopes.depth(), 0, "unbalanced scopes");
        self.buf.dedent();
        self.buf.line("}");
        self.buf.blank();
        tracing::debug!("emitted");
        Ok(())
    }

    fn emit_global_init(&mut self, global: &'p GlobalDecl) -> CodegenResult<String> {
        let frag = symbol_fragment(self.lookup(global.name));
        let init = format!("__koral_init_{frag}");
        let ret_repr = self.layout.representation_of(&global.ty)?;
        self.frame = Frame::new(global.name, format!("init_{frag}"), global.ty.clone());
        self.frame.assigned = assigned_bindings(&global.init);
        self.temps = 0;
        self.labels = 0;

        self.buf.line(&format!("static {ret_repr} {init}(void) {{"));
        self.buf.indent();
        self.frame.scopes.enter_scope();
        self.emit_returning_body(&global.init, &global.ty)?;
        self.buf.dedent();
        self.buf.line("}");
        self.buf.blank();
        Ok(init)
    }

    // ── Program ─────────────────────────────────────────────

    /// Emit the whole translation unit.
    pub(crate) fn emit_program(mut self) -> CodegenResult<String> {
        let aggregates = self.layout.definition_order()?;

        let program = self.program;

        // Bodies first: they discover closures and vtables.
        for decl in program.callables() {
            self.emit_function(decl)
                .context(|| format!("emitting function `{}`", self.lookup(decl.name)))?;
        }
        let function_defs = self.buf.take();

        let mut inits = Vec::with_capacity(program.globals.len());
        for global in &program.globals {
            let init = self
                .emit_global_init(global)
                .context(|| format!("initializing global `{}`", self.lookup(global.name)))?;
            inits.push((global, init));
        }
        let init_defs = self.buf.take();

        for request in &program.vtable_requests {
            self.vtables
                .instance(&self.layout, request)
                .context(|| "resolving requested vtable".to_owned())?;
        }
        let vtable_parts = self.vtables.render();

        let mut out = String::with_capacity(function_defs.len() * 2);
        if self.options.emit_prelude {
            out.push_str(&runtime::prelude(self.options.checked_arithmetic));
            out.push('\n');
        }
        let parts = aggregate::render(&self.layout, &aggregates, self.options.indent_width)?;
        out.push_str(&parts.declarations);
        out.push_str(&vtable_parts.types);

        for decl in program.callables() {
            let symbol = self.symbol(decl.name);
            let _ = writeln!(out, "{};", self.signature(&symbol, &decl.params, &decl.ret)?);
        }
        out.push('\n');
        if !self.closure_decls.is_empty() {
            out.push_str(&self.closure_decls.take());
        }

        for global in &program.globals {
            if !global.ty.is_unit_like() {
                let repr = self.layout.representation_of(&global.ty)?;
                let _ = writeln!(out, "{repr} {};", self.symbol(global.name));
            }
        }
        if !program.globals.is_empty() {
            out.push('\n');
        }

        out.push_str(&vtable_parts.instances);
        out.push_str(&parts.definitions);
        out.push_str(&function_defs);
        for lifted in &self.lifted {
            out.push_str(lifted);
        }
        out.push_str(&init_defs);
        self.emit_entry_points(&mut out, &inits)?;
        Ok(out)
    }

    /// `__koral_init_globals` and the C `main` wrapper.
    fn emit_entry_points(&self, out: &mut String, inits: &[(&GlobalDecl, String)]) -> CodegenResult<()> {
        let main = self
            .program
            .functions
            .iter()
            .find(|f| self.lookup(f.name) == "main");
        if inits.is_empty() && main.is_none() {
            return Ok(());
        }

        let mut buf = CodeBuffer::new(self.options.indent_width);
        buf.line("void __koral_init_globals(void) {");
        buf.indent();
        for (global, init) in inits {
            if global.ty.is_unit_like() {
                buf.line(&format!("{init}();"));
            } else {
                buf.line(&format!("{} = {init}();", self.symbol(global.name)));
            }
        }
        buf.dedent();
        buf.line("}");

        if let Some(main) = main {
            let symbol = self.symbol(main.name);
            let user_params = main.params.iter().filter(|p| !p.ty.is_unit_like()).count();
            if user_params > 0 {
                return Err(InternalError::Malformed {
                    what: "entry point",
                    detail: "`main` takes parameters".to_owned(),
                }
                .into());
            }
            buf.blank();
            buf.line("int main(void) {");
            buf.indent();
            buf.line("__koral_init_globals();");
            match &main.ret {
                Type::Scalar(kind) if kind.is_integer() => {
                    buf.line(&format!("return (int){symbol}();"));
                }
                ret if ret.is_unit_like() => {
                    buf.line(&format!("{symbol}();"));
                    buf.line("return 0;");
                }
                ret => {
                    let repr = self.layout.representation_of(ret)?;
                    buf.line(&format!("{repr} result = {symbol}();"));
                    if let Some(drop) = self.layout.drop_stmt("result", ret)? {
                        buf.line(&drop);
                    }
                    buf.line("return 0;");
                }
            }
            buf.dedent();
            buf.line("}");
        }
        out.push_str(&buf.take());
        Ok(())
    }
}

/// True if lowering `expr` emits no statements and has no side effects.
pub(crate) fn is_simple(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Var(_) => true,
        ExprKind::Global(_) => true,
        ExprKind::Field { base, .. } => is_simple(base),
        ExprKind::Deref(inner) => is_simple(inner),
        ExprKind::Unary { operand, .. } => is_simple(operand),
        ExprKind::Binary { lhs, rhs, .. } => is_simple(lhs) && is_simple(rhs),
        _ => false,
    }
}

fn is_temp(s: &str) -> bool {
    s.strip_prefix("__t")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn float_literal(value: f64, ty: &Type) -> String {
    let single = matches!(ty, Type::Scalar(koral_ir::ScalarKind::Float32));
    if !value.is_finite() {
        let text = if value.is_nan() {
            "(0.0 / 0.0)"
        } else if value > 0.0 {
            "(1.0 / 0.0)"
        } else {
            "(-1.0 / 0.0)"
        };
        return if single {
            format!("((float){text})")
        } else {
            text.to_owned()
        };
    }
    let text = format!("{value:?}");
    if single {
        format!("{text}f")
    } else {
        text
    }
}

/// Every binding that is the root of some assignment target.
pub(crate) fn assigned_bindings(body: &Expr) -> FxHashSet<Name> {
    fn visit(expr: &Expr, out: &mut FxHashSet<Name>) {
        ensure_sufficient_stack(|| {
            if let ExprKind::Block { stmts, .. } = &expr.kind {
                for stmt in stmts {
                    if let Stmt::Assign { target, .. } = stmt {
                        if let Some(root) = crate::escape::place_root(target) {
                            out.insert(root);
                        }
                    }
                }
            }
            expr.for_each_child(&mut |child| visit(child, out));
        });
    }
    let mut out = FxHashSet::default();
    visit(body, &mut out);
    out
}

/// Every binding some closure inside `body` captures by reference.
pub(crate) fn captured_by_reference(body: &Expr) -> FxHashSet<Name> {
    fn visit(expr: &Expr, out: &mut FxHashSet<Name>) {
        ensure_sufficient_stack(|| {
            if let ExprKind::Closure { captures, .. } = &expr.kind {
                out.extend(
                    captures
                        .iter()
                        .filter(|c| c.mode == CaptureMode::ByReference)
                        .map(|c| c.name),
                );
            }
            expr.for_each_child(&mut |child| visit(child, out));
        });
    }
    let mut out = FxHashSet::default();
    visit(body, &mut out);
    out
}
