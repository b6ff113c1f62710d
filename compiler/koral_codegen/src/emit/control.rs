//! Blocks, conditionals, loops and early exits.

use koral_ir::{Expr, ExprKind, LogicalOp, Stmt, Type};

use super::{is_simple, Access, Emitter, LoopContext, Value};
use crate::error::{CodegenResult, InternalError};
use crate::scope::Binding;

impl Emitter<'_> {
    /// Lower `expr` into the current scope. Blocks contribute their
    /// statements directly instead of opening a nested C block.
    pub(crate) fn emit_inline(&mut self, expr: &Expr) -> CodegenResult<Value> {
        match &expr.kind {
            ExprKind::Block { stmts, tail } => self.emit_block_body(stmts, tail.as_deref()),
            _ => self.emit_expr(expr),
        }
    }

    fn emit_block_body(&mut self, stmts: &[Stmt], tail: Option<&Expr>) -> CodegenResult<Value> {
        for stmt in stmts {
            self.emit_stmt(stmt)?;
        }
        let Some(tail) = tail else {
            return Ok(Value::Void);
        };
        // The block's own binding as its value: the scope is about to end,
        // so move instead of copy-then-drop.
        if let ExprKind::Var(name) = &tail.kind {
            if let Some((Access::Local(ident) | Access::Param(ident), _)) =
                self.frame.bindings.get(name)
            {
                if self.can_move(*name) {
                    let ident = ident.clone();
                    self.frame.scopes.consume(Binding::Named(*name));
                    return Ok(Value::Owned(ident));
                }
            }
        }
        self.emit_expr(tail)
    }

    /// Declare the result temporary of a value-producing construct.
    fn result_slot(&mut self, ty: &Type) -> CodegenResult<Option<String>> {
        if ty.is_unit_like() {
            return Ok(None);
        }
        let repr = self.layout.representation_of(ty)?;
        let t = self.temp();
        self.buf.line(&format!("{repr} {t};"));
        Ok(Some(t))
    }

    /// Move a branch's value into the result slot, or drop it.
    pub(crate) fn store_result(
        &mut self,
        value: Value,
        result: Option<&str>,
        result_ty: &Type,
        value_ty: &Type,
    ) -> CodegenResult<()> {
        match result {
            Some(slot) => {
                if value != Value::Void {
                    let owned = self.into_owned(value, result_ty)?;
                    self.buf.line(&format!("{slot} = {owned};"));
                }
                Ok(())
            }
            None => self.discard(value, value_ty),
        }
    }

    fn slot_value(result: Option<String>) -> Value {
        result.map_or(Value::Void, Value::Owned)
    }

    pub(super) fn emit_block(&mut self, stmts: &[Stmt], tail: Option<&Expr>, ty: &Type) -> CodegenResult<Value> {
        let result = self.result_slot(ty)?;
        self.buf.line("{");
        self.buf.indent();
        self.frame.scopes.enter_scope();
        let value = self.emit_block_body(stmts, tail)?;
        let value_ty = tail.map_or(Type::VOID, |t| t.ty.clone());
        self.store_result(value, result.as_deref(), ty, &value_ty)?;
        self.leave_scope()?;
        self.buf.dedent();
        self.buf.line("}");
        Ok(Self::slot_value(result))
    }

    /// One arm of a conditional in its own scope.
    fn emit_branch(&mut self, expr: &Expr, result: Option<&str>, ty: &Type) -> CodegenResult<()> {
        self.buf.indent();
        self.frame.scopes.enter_scope();
        let value = self.emit_inline(expr)?;
        self.store_result(value, result, ty, &expr.ty)?;
        self.leave_scope()?;
        self.buf.dedent();
        Ok(())
    }

    pub(super) fn emit_if(
        &mut self,
        cond: &Expr,
        then_branch: &Expr,
        else_branch: Option<&Expr>,
        ty: &Type,
    ) -> CodegenResult<Value> {
        let c = self.emit_expr(cond)?;
        let c = self.place_of(c, &cond.ty)?;
        let result = match else_branch {
            Some(_) => self.result_slot(ty)?,
            None => None,
        };
        self.buf.line(&format!("if ({c}) {{"));
        self.emit_branch(then_branch, result.as_deref(), ty)?;
        if let Some(else_branch) = else_branch {
            self.buf.line("} else {");
            self.emit_branch(else_branch, result.as_deref(), ty)?;
        }
        self.buf.line("}");
        Ok(Self::slot_value(result))
    }

    pub(super) fn emit_logical(&mut self, op: LogicalOp, lhs: &Expr, rhs: &Expr) -> CodegenResult<Value> {
        let a = self.emit_expr(lhs)?;
        let a = self.place_of(a, &lhs.ty)?;
        let symbol = match op {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
        };
        if is_simple(rhs) {
            let b = self.emit_expr(rhs)?;
            let b = self.place_of(b, &rhs.ty)?;
            return Ok(Value::Owned(format!("({a} {symbol} {b})")));
        }

        let t = self.temp();
        self.buf.line(&format!("bool {t} = {a};"));
        match op {
            LogicalOp::And => self.buf.line(&format!("if ({t}) {{")),
            LogicalOp::Or => self.buf.line(&format!("if (!{t}) {{")),
        }
        self.emit_branch(rhs, Some(&t), &Type::BOOL)?;
        self.buf.line("}");
        Ok(Value::Owned(t))
    }

    /// ```text
    /// __lN_start:;
    /// {
    ///     <cond>
    ///     if (!c) { <drops>; goto __lN_end; }
    ///     <body>
    ///     <drops>
    /// }
    /// goto __lN_start;
    /// __lN_end:;
    /// ```
    pub(super) fn emit_while(&mut self, cond: &Expr, body: &Expr) -> CodegenResult<Value> {
        let id = self.label_id();
        let start = format!("__l{id}_start");
        let end = format!("__l{id}_end");

        self.buf.label(&start);
        self.buf.line("{");
        self.buf.indent();
        let scope_index = self.frame.scopes.enter_scope();

        let c = self.emit_expr(cond)?;
        let c = self.place_of(c, &cond.ty)?;
        self.buf.line(&format!("if (!{c}) {{"));
        self.buf.indent();
        self.cleanup_to(scope_index, None)?;
        self.buf.line(&format!("goto {end};"));
        self.buf.dedent();
        self.buf.line("}");

        self.frame.loops.push(LoopContext {
            start: start.clone(),
            end: end.clone(),
            scope_index,
        });
        let value = self.emit_inline(body);
        self.frame.loops.pop();
        self.discard(value?, &body.ty)?;

        self.leave_scope()?;
        self.buf.dedent();
        self.buf.line("}");
        self.buf.line(&format!("goto {start};"));
        self.buf.label(&end);
        Ok(Value::Void)
    }

    pub(super) fn emit_break(&mut self) -> CodegenResult<Value> {
        let Some(lp) = self.frame.loops.last() else {
            return Err(InternalError::OutsideLoop("break").into());
        };
        let (index, target) = (lp.scope_index, lp.end.clone());
        self.cleanup_to(index, None)?;
        self.buf.line(&format!("goto {target};"));
        Ok(Value::Void)
    }

    pub(super) fn emit_continue(&mut self) -> CodegenResult<Value> {
        let Some(lp) = self.frame.loops.last() else {
            return Err(InternalError::OutsideLoop("continue").into());
        };
        let (index, target) = (lp.scope_index, lp.start.clone());
        self.cleanup_to(index, None)?;
        self.buf.line(&format!("goto {target};"));
        Ok(Value::Void)
    }

    pub(super) fn emit_return(&mut self, value: Option<&Expr>) -> CodegenResult<Value> {
        let ret = self.frame.ret.clone();
        let Some(value) = value else {
            self.cleanup_to(0, None)?;
            self.buf.line("return;");
            return Ok(Value::Void);
        };
        let v = self.emit_expr(value)?;
        if ret.is_unit_like() {
            self.discard(v, &value.ty)?;
            self.cleanup_to(0, None)?;
            self.buf.line("return;");
            return Ok(Value::Void);
        }
        if v == Value::Void {
            return Ok(Value::Void);
        }
        let result = self.into_temp(v, &ret)?;
        self.cleanup_to(0, None)?;
        self.buf.line(&format!("return {result};"));
        Ok(Value::Void)
    }
}
