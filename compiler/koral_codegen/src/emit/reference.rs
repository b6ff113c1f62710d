//! Shared references: `ref`, `deref`, and heap cells for escaping bindings.
//!
//! A reference is a `struct Ref { ptr, control }`. Three shapes exist:
//!
//! - stack: `{ &slot, NULL }` for a binding escape analysis proved local
//! - shared: `{ &place, cell.control }` plus a retain, for anything living
//!   inside an existing heap cell
//! - fresh: a new cell initialized with a copy of the value, for everything
//!   else (rvalues, parameters, by-value captures)

use koral_ir::{Expr, ExprKind, Name, Type};

use super::{Access, Emitter, Value};
use crate::error::{CodegenResult, InternalError};
use crate::layout::REF_TYPE;
use crate::names::c_ident;
use crate::scope::Binding;

/// Where a referenced value lives.
struct Storage {
    place: String,
    /// Control block expression, `NULL` for stack and static storage.
    control: String,
}

impl Emitter<'_> {
    /// Bind `name` to a fresh heap cell holding `init`.
    pub(crate) fn declare_boxed(&mut self, name: Name, ty: &Type, init: &str) -> CodegenResult<()> {
        let cell = self.local_ident(name);
        let repr = self.layout.representation_of(ty)?;
        let dtor = self.layout.dtor_expr(ty)?;
        self.buf.line(&format!(
            "{REF_TYPE} {cell} = __koral_new_ref(sizeof({repr}), {dtor});"
        ));
        self.buf.line(&format!("*({repr}*){cell}.ptr = {init};"));
        self.frame.scopes.register(
            Binding::Named(name),
            cell.clone(),
            Type::reference(ty.clone()),
            true,
        );
        self.frame
            .bindings
            .insert(name, (Access::Boxed(cell), ty.clone()));
        Ok(())
    }

    pub(super) fn emit_ref(&mut self, inner: &Expr) -> CodegenResult<Value> {
        // `ref *r` is `r` itself.
        if let ExprKind::Deref(target) = &inner.kind {
            if matches!(target.ty, Type::Reference(_)) {
                let value = self.emit_expr(target)?;
                return Ok(Value::Owned(self.into_temp(value, &target.ty)?));
            }
        }

        let t = self.temp();
        if inner.ty.is_unit_like() {
            let value = self.emit_expr(inner)?;
            self.discard(value, &inner.ty)?;
            self.buf
                .line(&format!("{REF_TYPE} {t} = {{ .ptr = NULL, .control = NULL }};"));
            return Ok(Value::Owned(t));
        }

        if let Some(storage) = self.storage_of(inner)? {
            self.buf.line(&format!(
                "{REF_TYPE} {t} = {{ .ptr = &{}, .control = {} }};",
                storage.place, storage.control
            ));
            if storage.control != "NULL" {
                self.buf.line(&format!("__koral_retain({t}.control);"));
            }
            return Ok(Value::Owned(t));
        }

        let value = self.emit_expr(inner)?;
        let owned = self.into_owned(value, &inner.ty)?;
        let repr = self.layout.representation_of(&inner.ty)?;
        let dtor = self.layout.dtor_expr(&inner.ty)?;
        self.buf.line(&format!(
            "{REF_TYPE} {t} = __koral_new_ref(sizeof({repr}), {dtor});"
        ));
        self.buf.line(&format!("*({repr}*){t}.ptr = {owned};"));
        Ok(Value::Owned(t))
    }

    /// Existing storage a reference to `expr` can point into, if any.
    fn storage_of(&mut self, expr: &Expr) -> CodegenResult<Option<Storage>> {
        match &expr.kind {
            ExprKind::Var(name) => {
                let (access, ty) = self.binding(*name)?.clone();
                Ok(match access {
                    Access::Local(ident) => Some(Storage {
                        place: ident,
                        control: "NULL".to_owned(),
                    }),
                    Access::Boxed(cell) | Access::EnvRef(cell) => Some(Storage {
                        place: self.cell_place(&cell, &ty)?,
                        control: format!("{cell}.control"),
                    }),
                    Access::Param(_) | Access::EnvValue(_) | Access::Unit => None,
                })
            }
            ExprKind::Field { base, field } => {
                let Some(storage) = self.storage_of(base)? else {
                    return Ok(None);
                };
                let Type::Struct(name) = &base.ty else {
                    return Err(self.malformed("field access", &base.ty));
                };
                if !self.layout.struct_decl(*name)?.fields.iter().any(|f| f.name == *field) {
                    return Err(InternalError::UnknownField {
                        ty: self.layout.display(&base.ty),
                        field: self.lookup(*field).to_owned(),
                    }
                    .into());
                }
                Ok(Some(Storage {
                    place: format!("{}.{}", storage.place, c_ident(self.lookup(*field))),
                    control: storage.control,
                }))
            }
            ExprKind::Deref(target) => {
                let value = self.emit_expr(target)?;
                let handle = self.place_of(value, &target.ty)?;
                match &target.ty {
                    Type::Reference(inner) => Ok(Some(Storage {
                        place: self.cell_place(&handle, inner)?,
                        control: format!("{handle}.control"),
                    })),
                    Type::Pointer(_) => Ok(Some(Storage {
                        place: format!("(*{handle})"),
                        control: "NULL".to_owned(),
                    })),
                    other => Err(self.malformed("deref", other)),
                }
            }
            ExprKind::Global(name) => {
                if !self.globals.contains_key(name) {
                    return Err(InternalError::UnknownBinding(self.lookup(*name).to_owned()).into());
                }
                Ok(Some(Storage {
                    place: self.symbol(*name),
                    control: "NULL".to_owned(),
                }))
            }
            _ => Ok(None),
        }
    }

    pub(super) fn emit_deref(&mut self, inner: &Expr) -> CodegenResult<Value> {
        let value = self.emit_expr(inner)?;
        let pointee = match &inner.ty {
            Type::Reference(t) | Type::Pointer(t) => (**t).clone(),
            other => return Err(self.malformed("deref", other)),
        };
        if pointee.is_unit_like() {
            self.discard(value, &inner.ty)?;
            return Ok(Value::Void);
        }
        let handle = self.place_of(value, &inner.ty)?;
        match &inner.ty {
            Type::Reference(_) => Ok(Value::Place(self.cell_place(&handle, &pointee)?)),
            _ => Ok(Value::Place(format!("(*{handle})"))),
        }
    }
}
