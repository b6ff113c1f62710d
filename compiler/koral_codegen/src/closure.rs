//! Closure lifting.
//!
//! Every closure literal becomes a lifted top-level C function. A closure
//! that captures nothing is a bare function pointer with a `NULL`
//! environment. Otherwise the captures are stored in a heap environment:
//!
//! ```text
//! struct __koral_closure_f_0_env { T x; struct Ref y; };
//! static void __koral_closure_f_0_env_drop(void* raw);
//! static R __koral_closure_f_0(void* __env_raw, P a);
//! ```
//!
//! The environment lives in a reference-counted cell whose destructor is
//! the `_env_drop` routine, so dropping the last copy of the closure drops
//! every capture. By-value captures hold their own copy; by-reference
//! captures share the captured binding's cell and keep it alive. A by-value
//! capture that a nested closure captures by reference is copied into a
//! fresh cell each time the lifted function runs.

use std::mem;

use koral_ir::{Capture, CaptureMode, Expr, Param, Type};

use crate::context::CodeBuffer;
use crate::emit::{assigned_bindings, captured_by_reference, Access, Emitter, Frame, Value};
use crate::error::{CodegenResult, InternalError, ResultExt};
use crate::layout::{CLOSURE_TYPE, REF_TYPE};
use crate::names::c_ident;

/// Saved emission state of the enclosing function.
struct Suspended {
    frame: Frame,
    buf: CodeBuffer,
    temps: u32,
    labels: u32,
}

impl Emitter<'_> {
    pub(crate) fn emit_closure(
        &mut self,
        params: &[Param],
        ret: &Type,
        captures: &[Capture],
        body: &Expr,
        ty: &Type,
    ) -> CodegenResult<Value> {
        if !matches!(ty, Type::Function { .. }) {
            return Err(self.malformed("closure", ty));
        }
        let id = self.closures;
        self.closures += 1;
        let symbol = format!("__koral_closure_{}_{id}", self.frame.symbol);
        let _span = tracing::debug_span!("closure", name = %symbol).entered();

        let all_captures = captures;
        let captures: Vec<&Capture> = captures.iter().filter(|c| !c.ty.is_unit_like()).collect();
        let env = if captures.is_empty() {
            None
        } else {
            Some(format!("{symbol}_env"))
        };

        let prototype = self.lifted_signature(&symbol, env.is_some(), params, ret)?;
        self.closure_decls.line(&format!("{prototype};"));
        if let Some(env) = &env {
            self.declare_env(env, &captures)?;
        }

        self.lift_body(&symbol, &prototype, env.as_deref(), all_captures, params, ret, body)
            .context(|| format!("lifting closure `{symbol}`"))?;

        let t = self.temp();
        let Some(env) = env else {
            self.buf.line(&format!(
                "{CLOSURE_TYPE} {t} = {{ .fn = (void*){symbol}, .env = NULL }};"
            ));
            return Ok(Value::Owned(t));
        };

        let cell = self.temp();
        let fields = self.temp();
        self.buf.line(&format!(
            "{REF_TYPE} {cell} = __koral_new_ref(sizeof(struct {env}), {env}_drop);"
        ));
        self.buf
            .line(&format!("struct {env}* {fields} = (struct {env}*){cell}.ptr;"));
        for capture in &captures {
            self.fill_capture(&fields, capture)?;
        }
        self.buf.line(&format!(
            "{CLOSURE_TYPE} {t} = {{ .fn = (void*){symbol}, .env = {cell}.control }};"
        ));
        Ok(Value::Owned(t))
    }

    fn lifted_signature(&self, symbol: &str, with_env: bool, params: &[Param], ret: &Type) -> CodegenResult<String> {
        if !with_env {
            return Ok(format!("static {}", self.signature(symbol, params, ret)?));
        }
        let mut parts = vec!["void* __env_raw".to_owned()];
        for p in params.iter().filter(|p| !p.ty.is_unit_like()) {
            parts.push(format!(
                "{} {}",
                self.layout.representation_of(&p.ty)?,
                c_ident(self.lookup(p.name))
            ));
        }
        Ok(format!(
            "static {} {symbol}({})",
            self.layout.representation_of(ret)?,
            parts.join(", ")
        ))
    }

    /// The environment struct and its destructor.
    fn declare_env(&mut self, env: &str, captures: &[&Capture]) -> CodegenResult<()> {
        let mut decl = CodeBuffer::new(self.buf.width());
        decl.line(&format!("struct {env} {{"));
        decl.indent();
        let mut drops = Vec::with_capacity(captures.len());
        for capture in captures {
            let field = c_ident(self.lookup(capture.name));
            let place = format!("self->{field}");
            match capture.mode {
                CaptureMode::ByValue => {
                    let repr = self.layout.representation_of(&capture.ty)?;
                    decl.line(&format!("{repr} {field};"));
                    if let Some(drop) = self.layout.drop_stmt(&place, &capture.ty)? {
                        drops.push(drop);
                    }
                }
                CaptureMode::ByReference => {
                    decl.line(&format!("{REF_TYPE} {field};"));
                    drops.push(format!("__koral_release({place}.control);"));
                }
            }
        }
        decl.dedent();
        decl.line("};");
        decl.line(&format!("static void {env}_drop(void* raw);"));
        decl.blank();
        self.closure_decls.append(&decl.take());

        let mut def = CodeBuffer::new(self.buf.width());
        def.line(&format!("static void {env}_drop(void* raw) {{"));
        def.indent();
        def.line(&format!("struct {env}* self = (struct {env}*)raw;"));
        if drops.is_empty() {
            def.line("(void)self;");
        }
        def.lines(&drops);
        def.dedent();
        def.line("}");
        def.blank();
        self.lifted.push(def.take());
        Ok(())
    }

    /// Store one capture into a freshly allocated environment.
    fn fill_capture(&mut self, fields: &str, capture: &Capture) -> CodegenResult<()> {
        let (access, ty) = self.binding(capture.name)?.clone();
        let slot = format!("{fields}->{}", c_ident(self.lookup(capture.name)));
        match capture.mode {
            CaptureMode::ByValue => {
                let place = match access {
                    Access::Local(ident) | Access::Param(ident) | Access::EnvValue(ident) => ident,
                    Access::Boxed(cell) | Access::EnvRef(cell) => self.cell_place(&cell, &ty)?,
                    Access::Unit => return Ok(()),
                };
                let copy = self.layout.copy_expr(&place, &ty)?;
                self.buf.line(&format!("{slot} = {copy};"));
                if let Some(retain) = self.layout.retain_stmt(&slot, &ty)? {
                    self.buf.line(&retain);
                }
            }
            CaptureMode::ByReference => match access {
                Access::Boxed(cell) | Access::EnvRef(cell) => {
                    self.buf.line(&format!("{slot} = {cell};"));
                    self.buf.line(&format!("__koral_retain({slot}.control);"));
                }
                Access::Unit => {}
                Access::Local(_) | Access::Param(_) | Access::EnvValue(_) => {
                    return Err(
                        InternalError::NoSharedStorage(self.lookup(capture.name).to_owned()).into(),
                    );
                }
            },
        }
        Ok(())
    }

    /// Emit the lifted function in a fresh frame and buffer.
    #[expect(
        clippy::too_many_arguments,
        reason = "symbol, prototype and environment are computed by the caller"
    )]
    fn lift_body(
        &mut self,
        symbol: &str,
        prototype: &str,
        env: Option<&str>,
        captures: &[Capture],
        params: &[Param],
        ret: &Type,
        body: &Expr,
    ) -> CodegenResult<()> {
        let mut frame = Frame::new(self.frame.owner, self.frame.symbol.clone(), ret.clone());
        frame.assigned = assigned_bindings(body);
        let suspended = self.suspend(frame);

        let result = self.lift_body_inner(prototype, env, captures, params, ret, body);

        let lifted = self.resume(suspended);
        result?;
        self.lifted.push(lifted);
        tracing::trace!(closure = symbol, "lifted");
        Ok(())
    }

    fn lift_body_inner(
        &mut self,
        prototype: &str,
        env: Option<&str>,
        captures: &[Capture],
        params: &[Param],
        ret: &Type,
        body: &Expr,
    ) -> CodegenResult<()> {
        self.buf.line(&format!("{prototype} {{"));
        self.buf.indent();
        self.frame.scopes.enter_scope();
        if let Some(env) = env {
            self.frame.used_idents.insert("__env".to_owned());
            self.buf
                .line(&format!("struct {env}* __env = (struct {env}*)__env_raw;"));
        }
        let shared = captured_by_reference(body);
        for capture in captures {
            let field = format!("__env->{}", c_ident(self.lookup(capture.name)));
            let access = match capture.mode {
                _ if capture.ty.is_unit_like() => Access::Unit,
                // A nested closure shares this copy: give it a cell of its own.
                CaptureMode::ByValue if shared.contains(&capture.name) => {
                    let copy = self.into_owned(Value::Place(field), &capture.ty)?;
                    self.declare_boxed(capture.name, &capture.ty, &copy)?;
                    continue;
                }
                CaptureMode::ByValue => Access::EnvValue(field),
                CaptureMode::ByReference => Access::EnvRef(field),
            };
            self.frame
                .bindings
                .insert(capture.name, (access, capture.ty.clone()));
        }
        self.bind_params(params, body)?;
        self.emit_returning_body(body, ret)?;
        self.buf.dedent();
        self.buf.line("}");
        self.buf.blank();
        Ok(())
    }

    fn suspend(&mut self, frame: Frame) -> Suspended {
        let width = self.buf.width();
        Suspended {
            frame: mem::replace(&mut self.frame, frame),
            buf: mem::replace(&mut self.buf, CodeBuffer::new(width)),
            temps: mem::take(&mut self.temps),
            labels: mem::take(&mut self.labels),
        }
    }

    /// Restore the enclosing function; returns the lifted function's text.
    fn resume(&mut self, suspended: Suspended) -> String {
        self.frame = suspended.frame;
        self.temps = suspended.temps;
        self.labels = suspended.labels;
        mem::replace(&mut self.buf, suspended.buf).take()
    }
}
