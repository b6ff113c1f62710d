//! Literals, variables, operators, calls and aggregate literals.

use koral_ir::{BinaryOp, Expr, Intrinsic, Name, ScalarKind, Type, UnaryOp};

use super::{is_simple, Access, Emitter, Value};
use crate::error::{CodegenResult, InternalError};
use crate::layout::{checked_suffix, CLOSURE_TYPE};
use crate::names::{c_ident, c_string_literal};
use crate::scope::Binding;

impl Emitter<'_> {
    // ── Literals ────────────────────────────────────────────

    pub(super) fn int_literal(&self, value: i64, ty: &Type) -> CodegenResult<String> {
        let Type::Scalar(kind) = ty else {
            return Err(self.malformed("integer literal", ty));
        };
        let text = if value == i64::MIN {
            "INT64_MIN".to_owned()
        } else {
            value.to_string()
        };
        Ok(match kind {
            ScalarKind::Int => text,
            kind if kind.is_integer() || matches!(kind, ScalarKind::Float32 | ScalarKind::Float64) => {
                format!("(({}){text})", self.layout.representation_of(ty)?)
            }
            _ => return Err(self.malformed("integer literal", ty)),
        })
    }

    /// Materialize a text constant through the string language item.
    pub(crate) fn string_value(&mut self, text: &str, ty: &Type) -> CodegenResult<String> {
        let ctor = self
            .program
            .lang
            .string_from_literal
            .ok_or(InternalError::MissingLangItem("string_from_literal"))?;
        let repr = self.layout.representation_of(ty)?;
        let t = self.temp();
        self.buf.line(&format!(
            "{repr} {t} = {}((const uint8_t*){}, {});",
            self.symbol(ctor),
            c_string_literal(text),
            text.len()
        ));
        Ok(t)
    }

    pub(super) fn emit_string_literal(&mut self, text: &str, ty: &Type) -> CodegenResult<Value> {
        Ok(Value::Owned(self.string_value(text, ty)?))
    }

    // ── Names ───────────────────────────────────────────────

    /// True if reading `name` may move its value out instead of copying.
    ///
    /// Only live bindings of the innermost scope that are never assigned
    /// qualify; anything else could be read again on another path.
    pub(super) fn can_move(&self, name: Name) -> bool {
        let binding = Binding::Named(name);
        !self.frame.assigned.contains(&name)
            && self.frame.scopes.in_innermost(binding)
            && self
                .frame
                .scopes
                .lookup(binding)
                .is_some_and(|e| e.needs_drop && !e.consumed)
    }

    pub(super) fn emit_var(&mut self, name: Name, expr: &Expr) -> CodegenResult<Value> {
        let (access, ty) = self.binding(name)?.clone();
        match access {
            Access::Unit => Ok(Value::Void),
            Access::Local(ident) | Access::Param(ident) => {
                if !expr.is_place() && self.can_move(name) {
                    self.frame.scopes.consume(Binding::Named(name));
                    return Ok(Value::Owned(ident));
                }
                Ok(Value::Place(ident))
            }
            Access::EnvValue(field) => Ok(Value::Place(field)),
            Access::Boxed(cell) | Access::EnvRef(cell) => {
                Ok(Value::Place(self.cell_place(&cell, &ty)?))
            }
        }
    }

    /// The value stored in a heap cell.
    pub(crate) fn cell_place(&self, cell: &str, ty: &Type) -> CodegenResult<String> {
        Ok(format!("(*({}*){cell}.ptr)", self.layout.representation_of(ty)?))
    }

    pub(super) fn emit_function_ref(&mut self, name: Name, ty: &Type) -> CodegenResult<Value> {
        if !self.callables.contains_key(&name) {
            return Err(InternalError::UnknownFunction(self.lookup(name).to_owned()).into());
        }
        if !matches!(ty, Type::Function { .. }) {
            return Err(self.malformed("function reference", ty));
        }
        let t = self.temp();
        self.buf.line(&format!(
            "{CLOSURE_TYPE} {t} = {{ .fn = (void*){}, .env = NULL }};",
            self.symbol(name)
        ));
        Ok(Value::Owned(t))
    }

    pub(super) fn emit_global(&mut self, name: Name) -> CodegenResult<Value> {
        let global = self
            .globals
            .get(&name)
            .ok_or_else(|| InternalError::UnknownBinding(self.lookup(name).to_owned()))?;
        if global.ty.is_unit_like() {
            return Ok(Value::Void);
        }
        Ok(Value::Place(self.symbol(name)))
    }

    pub(super) fn emit_field(&mut self, base: &Expr, field: Name) -> CodegenResult<Value> {
        let value = self.emit_expr(base)?;
        let Type::Struct(name) = &base.ty else {
            return Err(self.malformed("field access", &base.ty));
        };
        let decl = self.layout.struct_decl(*name)?;
        let Some(f) = decl.fields.iter().find(|f| f.name == field) else {
            return Err(InternalError::UnknownField {
                ty: self.layout.display(&base.ty),
                field: self.lookup(field).to_owned(),
            }
            .into());
        };
        if f.ty.is_unit_like() {
            self.discard(value, &base.ty)?;
            return Ok(Value::Void);
        }
        let place = self.place_of(value, &base.ty)?;
        Ok(Value::Place(format!("{place}.{}", c_ident(self.lookup(field)))))
    }

    // ── Operators ───────────────────────────────────────────

    pub(super) fn emit_unary(&mut self, op: UnaryOp, operand: &Expr, ty: &Type) -> CodegenResult<Value> {
        let value = self.emit_expr(operand)?;
        let x = self.place_of(value, &operand.ty)?;
        let text = match (op, ty) {
            (UnaryOp::Neg, Type::Scalar(kind)) if self.options.checked_arithmetic => {
                match checked_suffix(*kind) {
                    Some(suffix) => format!("__koral_checked_sub_{suffix}(0, {x})"),
                    None => format!("(-{x})"),
                }
            }
            (UnaryOp::Neg, _) => format!("(-{x})"),
            (UnaryOp::Not, _) => format!("(!{x})"),
            (UnaryOp::BitNot, _) => format!("(~{x})"),
        };
        Ok(Value::Owned(text))
    }

    pub(super) fn emit_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        ty: &Type,
    ) -> CodegenResult<Value> {
        if !matches!(lhs.ty, Type::Scalar(_) | Type::Pointer(_)) {
            return Err(self.malformed("binary operand", &lhs.ty));
        }
        let operands = self.emit_read_operands(&[lhs, rhs])?;
        let [a, b] = operands.as_slice() else {
            return Err(self.malformed("binary operation", ty));
        };
        // C's `%` is integer-only.
        let fmod = match (&lhs.ty, op) {
            (Type::Scalar(ScalarKind::Float32), BinaryOp::Rem) => Some("fmodf"),
            (Type::Scalar(ScalarKind::Float64), BinaryOp::Rem) => Some("fmod"),
            _ => None,
        };
        if let Some(fmod) = fmod {
            return Ok(Value::Owned(format!("{fmod}({a}, {b})")));
        }
        let checked = match (&lhs.ty, op) {
            (
                Type::Scalar(kind),
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem,
            ) if self.options.checked_arithmetic => checked_suffix(*kind),
            _ => None,
        };
        let text = match checked {
            Some(suffix) => {
                let name = match op {
                    BinaryOp::Add => "add",
                    BinaryOp::Sub => "sub",
                    BinaryOp::Mul => "mul",
                    BinaryOp::Div => "div",
                    _ => "rem",
                };
                format!("__koral_checked_{name}_{suffix}({a}, {b})")
            }
            None => format!("({a} {} {b})", op.symbol()),
        };
        Ok(Value::Owned(text))
    }

    // ── Calls ───────────────────────────────────────────────

    /// Finish a call expression: store a result, or run it as a statement.
    pub(crate) fn finish_call(&mut self, call: &str, ty: &Type) -> CodegenResult<Value> {
        if ty.is_unit_like() {
            self.buf.line(&format!("{call};"));
            return Ok(Value::Void);
        }
        let repr = self.layout.representation_of(ty)?;
        let t = self.temp();
        self.buf.line(&format!("{repr} {t} = {call};"));
        Ok(Value::Owned(t))
    }

    /// Lower arguments and keep the ones that are passed in C.
    pub(crate) fn emit_args(&mut self, args: &[Expr]) -> CodegenResult<Vec<String>> {
        let refs: Vec<&Expr> = args.iter().collect();
        let values = self.emit_owned_operands(&refs)?;
        Ok(args
            .iter()
            .zip(values)
            .filter(|(a, _)| !a.ty.is_unit_like())
            .map(|(_, v)| v)
            .collect())
    }

    pub(super) fn emit_call(&mut self, callee: Name, args: &[Expr], ty: &Type) -> CodegenResult<Value> {
        let decl = self
            .callables
            .get(&callee)
            .copied()
            .ok_or_else(|| InternalError::UnknownFunction(self.lookup(callee).to_owned()))?;
        if decl.params.len() != args.len() {
            return Err(InternalError::Malformed {
                what: "call",
                detail: format!(
                    "`{}` takes {} arguments, got {}",
                    self.lookup(callee),
                    decl.params.len(),
                    args.len()
                ),
            }
            .into());
        }
        let args = self.emit_args(args)?;
        let call = format!("{}({})", self.symbol(callee), args.join(", "));
        self.finish_call(&call, ty)
    }

    pub(super) fn emit_call_indirect(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        ty: &Type,
    ) -> CodegenResult<Value> {
        let Type::Function { params, ret } = &callee.ty else {
            return Err(InternalError::NotCallable(self.layout.display(&callee.ty)).into());
        };
        let value = self.emit_expr(callee)?;
        let closure = match value {
            Value::Place(p) if args.iter().any(|a| !is_simple(a)) => {
                let t = self.into_owned(Value::Place(p), &callee.ty)?;
                self.hold(&t, &callee.ty)?;
                t
            }
            other => self.place_of(other, &callee.ty)?,
        };
        let args = self.emit_args(args)?;

        let c_params: Vec<Type> = params.iter().filter(|p| !p.is_unit_like()).cloned().collect();
        let plain = self.layout.fn_pointer_type(&c_params, ret, false)?;
        let with_env = self.layout.fn_pointer_type(&c_params, ret, true)?;
        let mut env_args = vec![format!("((struct __koral_Control*){closure}.env)->ptr")];
        env_args.extend(args.iter().cloned());
        let direct = format!("(({plain}){closure}.fn)({})", args.join(", "));
        let through_env = format!("(({with_env}){closure}.fn)({})", env_args.join(", "));

        if ty.is_unit_like() {
            self.buf.line(&format!("if ({closure}.env == NULL) {{"));
            self.buf.indent();
            self.buf.line(&format!("{direct};"));
            self.buf.dedent();
            self.buf.line("} else {");
            self.buf.indent();
            self.buf.line(&format!("{through_env};"));
            self.buf.dedent();
            self.buf.line("}");
            return Ok(Value::Void);
        }
        let repr = self.layout.representation_of(ty)?;
        let t = self.temp();
        self.buf.line(&format!("{repr} {t};"));
        self.buf.line(&format!("if ({closure}.env == NULL) {{"));
        self.buf.indent();
        self.buf.line(&format!("{t} = {direct};"));
        self.buf.dedent();
        self.buf.line("} else {");
        self.buf.indent();
        self.buf.line(&format!("{t} = {through_env};"));
        self.buf.dedent();
        self.buf.line("}");
        Ok(Value::Owned(t))
    }

    // ── Aggregates ──────────────────────────────────────────

    pub(super) fn emit_struct_lit(&mut self, name: Name, fields: &[(Name, Expr)]) -> CodegenResult<Value> {
        let decl = self.layout.struct_decl(name)?;
        let ty = Type::Struct(name);
        for (field, _) in fields {
            if !decl.fields.iter().any(|f| f.name == *field) {
                return Err(InternalError::UnknownField {
                    ty: self.layout.display(&ty),
                    field: self.lookup(*field).to_owned(),
                }
                .into());
            }
        }
        if let Some(missing) = decl
            .fields
            .iter()
            .find(|f| !fields.iter().any(|(n, _)| *n == f.name))
        {
            return Err(InternalError::Malformed {
                what: "struct literal",
                detail: format!(
                    "field `{}` of `{}` is not initialized",
                    self.lookup(missing.name),
                    self.layout.display(&ty)
                ),
            }
            .into());
        }

        let exprs: Vec<&Expr> = fields.iter().map(|(_, e)| e).collect();
        let values = self.emit_owned_operands(&exprs)?;
        let inits: Vec<String> = fields
            .iter()
            .zip(values)
            .filter(|((_, e), _)| !e.ty.is_unit_like())
            .map(|((f, _), v)| format!(".{} = {v}", c_ident(self.lookup(*f))))
            .collect();
        let repr = self.layout.representation_of(&ty)?;
        let t = self.temp();
        if inits.is_empty() {
            self.buf.line(&format!("{repr} {t} = {{0}};"));
        } else {
            self.buf.line(&format!("{repr} {t} = {{ {} }};", inits.join(", ")));
        }
        Ok(Value::Owned(t))
    }

    pub(super) fn emit_union_lit(&mut self, name: Name, case: Name, args: &[Expr]) -> CodegenResult<Value> {
        let decl = self.layout.union_decl(name)?;
        let ty = Type::Union(name);
        let (tag, case_decl) = decl.case(case).ok_or_else(|| InternalError::UnknownCase {
            ty: self.layout.display(&ty),
            case: self.lookup(case).to_owned(),
        })?;
        if case_decl.fields.len() != args.len() {
            return Err(InternalError::Malformed {
                what: "union literal",
                detail: format!(
                    "case `{}` has {} fields, got {}",
                    self.lookup(case),
                    case_decl.fields.len(),
                    args.len()
                ),
            }
            .into());
        }

        let exprs: Vec<&Expr> = args.iter().collect();
        let values = self.emit_owned_operands(&exprs)?;
        let repr = self.layout.representation_of(&ty)?;
        let t = self.temp();
        self.buf.line(&format!("{repr} {t};"));
        self.buf.line(&format!("{t}.tag = {tag};"));
        let case_ident = c_ident(self.lookup(case));
        for (field, value) in case_decl.fields.iter().zip(values) {
            if field.ty.is_unit_like() {
                continue;
            }
            self.buf.line(&format!(
                "{t}.data.{case_ident}.{} = {value};",
                c_ident(self.lookup(field.name))
            ));
        }
        Ok(Value::Owned(t))
    }

    // ── Intrinsics ──────────────────────────────────────────

    pub(super) fn emit_intrinsic(&mut self, op: &Intrinsic, args: &[Expr], ty: &Type) -> CodegenResult<Value> {
        let arity = match op {
            Intrinsic::Alloc { .. } | Intrinsic::Free | Intrinsic::Read => 1,
            Intrinsic::Write | Intrinsic::Offset => 2,
        };
        if args.len() != arity {
            return Err(InternalError::Malformed {
                what: "intrinsic",
                detail: format!("expected {arity} arguments, got {}", args.len()),
            }
            .into());
        }
        let refs: Vec<&Expr> = args.iter().collect();
        match op {
            Intrinsic::Alloc { elem } => {
                let operands = self.emit_read_operands(&refs)?;
                let (repr, size) = if elem.is_unit_like() {
                    ("void*".to_owned(), "1".to_owned())
                } else {
                    let r = self.layout.representation_of(elem)?;
                    (format!("{r}*"), format!("sizeof({r})"))
                };
                let t = self.temp();
                self.buf.line(&format!(
                    "{repr} {t} = ({repr})malloc({size} * (size_t)({}));",
                    operands[0]
                ));
                self.buf.line(&format!(
                    "if ({t} == NULL) {{ __koral_panic(\"out of memory\"); }}"
                ));
                Ok(Value::Owned(t))
            }
            Intrinsic::Free => {
                let operands = self.emit_read_operands(&refs)?;
                self.buf.line(&format!("free({});", operands[0]));
                Ok(Value::Void)
            }
            Intrinsic::Read => {
                let operands = self.emit_read_operands(&refs)?;
                if ty.is_unit_like() {
                    return Ok(Value::Void);
                }
                Ok(Value::Place(format!("(*{})", operands[0])))
            }
            Intrinsic::Write => {
                let pointer = self.emit_expr(&args[0])?;
                let pointer = if is_simple(&args[1]) {
                    self.place_of(pointer, &args[0].ty)?
                } else {
                    self.into_temp(pointer, &args[0].ty)?
                };
                let value = self.emit_expr(&args[1])?;
                if args[1].ty.is_unit_like() {
                    self.discard(value, &args[1].ty)?;
                    return Ok(Value::Void);
                }
                let value = self.into_owned(value, &args[1].ty)?;
                self.buf.line(&format!("(*{pointer}) = {value};"));
                Ok(Value::Void)
            }
            Intrinsic::Offset => {
                let operands = self.emit_read_operands(&refs)?;
                Ok(Value::Owned(format!("({} + {})", operands[0], operands[1])))
            }
        }
    }

    pub(crate) fn malformed(&self, what: &'static str, ty: &Type) -> crate::error::CodegenError {
        InternalError::Malformed {
            what,
            detail: format!("unexpected type `{}`", self.layout.display(ty)),
        }
        .into()
    }
}
