//! Type layout: C representations and copy/drop classification.
//!
//! Every semantic type falls into one of three value classes:
//!
//! - **Trivial** (scalars, raw pointers): bitwise copy, nothing to drop.
//! - **Aggregate** (structs, unions): generated `__koral_<T>_copy` and
//!   `__koral_<T>_drop` routines, always emitted even when every field is
//!   trivial so the calling convention never depends on field contents.
//! - **Handle** (shared references, trait objects, closures): copy is a
//!   bitwise copy plus a retain of the control block; drop is a release.
//!
//! # Design
//!
//! Classification is total over concrete types. The two generic variants of
//! [`Type`] are contract violations and produce
//! [`InternalError::UnresolvedGeneric`] / [`InternalError::UnresolvedInstance`];
//! nothing is defaulted.

use rustc_hash::FxHashSet;

use koral_ir::{Name, Program, ScalarKind, StringInterner, StructDecl, Type, UnionDecl};

use crate::error::{CodegenResult, InternalError};
use crate::names::{c_ident, symbol_fragment};

/// C type of the generic shared-reference handle.
pub const REF_TYPE: &str = "struct Ref";
/// C type of a trait-object handle.
pub const TRAIT_REF_TYPE: &str = "struct __koral_TraitRef";
/// C type of a closure value.
pub const CLOSURE_TYPE: &str = "struct __koral_Closure";

/// Which reference-counted handle a value is.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandleKind {
    Ref,
    TraitRef,
    Closure,
}

impl HandleKind {
    /// Field holding the control block pointer.
    pub fn control_field(self) -> &'static str {
        match self {
            HandleKind::Ref | HandleKind::TraitRef => "control",
            HandleKind::Closure => "env",
        }
    }

    /// Runtime routine dropping a heap cell holding one of these handles.
    pub fn cell_drop_fn(self) -> &'static str {
        match self {
            HandleKind::Ref => "__koral_Ref_drop",
            HandleKind::TraitRef => "__koral_TraitRef_drop",
            HandleKind::Closure => "__koral_Closure_drop",
        }
    }
}

/// Copy/drop class of a type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueClass {
    Trivial,
    Aggregate,
    Handle(HandleKind),
}

/// A struct or union declaration, in definition order.
#[derive(Copy, Clone, Debug)]
pub enum Aggregate<'p> {
    Struct(&'p StructDecl),
    Union(&'p UnionDecl),
}

impl Aggregate<'_> {
    pub fn name(&self) -> Name {
        match self {
            Aggregate::Struct(s) => s.name,
            Aggregate::Union(u) => u.name,
        }
    }
}

/// Resolves semantic types against the program's declarations.
pub struct TypeLayout<'p> {
    program: &'p Program,
    names: &'p StringInterner,
}

impl<'p> TypeLayout<'p> {
    pub fn new(program: &'p Program, names: &'p StringInterner) -> Self {
        TypeLayout { program, names }
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn names(&self) -> &'p StringInterner {
        self.names
    }

    /// Human-readable type, for error messages.
    pub fn display(&self, ty: &Type) -> String {
        ty.display(self.names).to_string()
    }

    pub fn struct_decl(&self, name: Name) -> CodegenResult<&'p StructDecl> {
        self.program
            .find_struct(name)
            .ok_or_else(|| InternalError::UnknownType(self.names.lookup(name).to_owned()).into())
    }

    pub fn union_decl(&self, name: Name) -> CodegenResult<&'p UnionDecl> {
        self.program
            .find_union(name)
            .ok_or_else(|| InternalError::UnknownType(self.names.lookup(name).to_owned()).into())
    }

    /// Reject a type that still mentions a type parameter anywhere inside it.
    fn reject_generic(&self, ty: &Type) -> CodegenResult<()> {
        match ty {
            Type::GenericParam(_) => {
                Err(InternalError::UnresolvedGeneric(self.display(ty)).into())
            }
            Type::GenericInstance { .. } => {
                Err(InternalError::UnresolvedInstance(self.display(ty)).into())
            }
            Type::Reference(inner) | Type::Pointer(inner) => self.reject_generic(inner),
            Type::Function { params, ret } => {
                for p in params {
                    self.reject_generic(p)?;
                }
                self.reject_generic(ret)
            }
            Type::TraitObject { args, .. } => {
                args.iter().try_for_each(|a| self.reject_generic(a))
            }
            Type::Scalar(_) | Type::Struct(_) | Type::Union(_) => Ok(()),
        }
    }

    /// Classify a type for copy/drop purposes.
    pub fn classify(&self, ty: &Type) -> CodegenResult<ValueClass> {
        self.reject_generic(ty)?;
        Ok(match ty {
            Type::Scalar(_) | Type::Pointer(_) => ValueClass::Trivial,
            Type::Struct(name) => {
                self.struct_decl(*name)?;
                ValueClass::Aggregate
            }
            Type::Union(name) => {
                self.union_decl(*name)?;
                ValueClass::Aggregate
            }
            Type::Reference(_) => ValueClass::Handle(HandleKind::Ref),
            Type::TraitObject { .. } => ValueClass::Handle(HandleKind::TraitRef),
            Type::Function { .. } => ValueClass::Handle(HandleKind::Closure),
            Type::GenericParam(_) | Type::GenericInstance { .. } => ValueClass::Trivial,
        })
    }

    /// True if duplicating a value requires generated code.
    pub fn needs_copy(&self, ty: &Type) -> CodegenResult<bool> {
        Ok(self.classify(ty)? != ValueClass::Trivial)
    }

    /// True if a value must be dropped when its owner goes away.
    pub fn needs_drop(&self, ty: &Type) -> CodegenResult<bool> {
        Ok(self.classify(ty)? != ValueClass::Trivial)
    }

    /// The C type used to hold a value of `ty`.
    pub fn representation_of(&self, ty: &Type) -> CodegenResult<String> {
        self.reject_generic(ty)?;
        Ok(match ty {
            Type::Scalar(kind) => scalar_repr(*kind).to_owned(),
            Type::Struct(name) => {
                self.struct_decl(*name)?;
                format!("struct {}", c_ident(self.names.lookup(*name)))
            }
            Type::Union(name) => {
                self.union_decl(*name)?;
                format!("struct {}", c_ident(self.names.lookup(*name)))
            }
            Type::Reference(_) => REF_TYPE.to_owned(),
            Type::TraitObject { .. } => TRAIT_REF_TYPE.to_owned(),
            Type::Function { .. } => CLOSURE_TYPE.to_owned(),
            Type::Pointer(inner) => {
                if inner.is_unit_like() {
                    "void*".to_owned()
                } else {
                    format!("{}*", self.representation_of(inner)?)
                }
            }
            Type::GenericParam(_) | Type::GenericInstance { .. } => String::new(),
        })
    }

    /// Identifier fragment naming `ty` inside generated symbols.
    pub fn c_name(&self, ty: &Type) -> CodegenResult<String> {
        self.reject_generic(ty)?;
        Ok(match ty {
            Type::Scalar(kind) => kind.name().to_owned(),
            Type::Struct(name) | Type::Union(name) => symbol_fragment(self.names.lookup(*name)),
            Type::Reference(inner) => format!("Ref_{}", self.c_name(inner)?),
            Type::Pointer(inner) => format!("Ptr_{}", self.c_name(inner)?),
            Type::Function { params, ret } => {
                let mut out = String::from("Fn");
                for p in params {
                    out.push('_');
                    out.push_str(&self.c_name(p)?);
                }
                out.push_str("_to_");
                out.push_str(&self.c_name(ret)?);
                out
            }
            Type::TraitObject { trait_name, args } => {
                let mut out = format!("Dyn_{}", symbol_fragment(self.names.lookup(*trait_name)));
                for a in args {
                    out.push('_');
                    out.push_str(&self.c_name(a)?);
                }
                out
            }
            Type::GenericParam(_) | Type::GenericInstance { .. } => String::new(),
        })
    }

    /// `__koral_<T>_copy` for an aggregate.
    pub fn copy_fn(&self, name: Name) -> String {
        format!("__koral_{}_copy", symbol_fragment(self.names.lookup(name)))
    }

    /// `__koral_<T>_drop` for an aggregate.
    pub fn drop_fn(&self, name: Name) -> String {
        format!("__koral_{}_drop", symbol_fragment(self.names.lookup(name)))
    }

    /// Expression duplicating the value stored at `place`.
    ///
    /// Handles are copied bitwise; pair with [`Self::retain_stmt`] on the
    /// destination.
    pub fn copy_expr(&self, place: &str, ty: &Type) -> CodegenResult<String> {
        Ok(match (self.classify(ty)?, ty) {
            (ValueClass::Aggregate, Type::Struct(name) | Type::Union(name)) => {
                format!("{}(&{place})", self.copy_fn(*name))
            }
            _ => place.to_owned(),
        })
    }

    /// Statement taking a new count on a handle stored at `place`, if any.
    pub fn retain_stmt(&self, place: &str, ty: &Type) -> CodegenResult<Option<String>> {
        Ok(match self.classify(ty)? {
            ValueClass::Handle(kind) => {
                Some(format!("__koral_retain({place}.{});", kind.control_field()))
            }
            ValueClass::Trivial | ValueClass::Aggregate => None,
        })
    }

    /// Statement dropping the value stored at `place`, if it needs one.
    pub fn drop_stmt(&self, place: &str, ty: &Type) -> CodegenResult<Option<String>> {
        Ok(match (self.classify(ty)?, ty) {
            (ValueClass::Aggregate, Type::Struct(name) | Type::Union(name)) => {
                Some(format!("{}(&{place});", self.drop_fn(*name)))
            }
            (ValueClass::Handle(kind), _) => {
                Some(format!("__koral_release({place}.{});", kind.control_field()))
            }
            _ => None,
        })
    }

    /// Destructor stored in the control block of a heap cell holding `ty`.
    pub fn dtor_expr(&self, ty: &Type) -> CodegenResult<String> {
        Ok(match (self.classify(ty)?, ty) {
            (ValueClass::Aggregate, Type::Struct(name) | Type::Union(name)) => self.drop_fn(*name),
            (ValueClass::Handle(kind), _) => kind.cell_drop_fn().to_owned(),
            _ => "NULL".to_owned(),
        })
    }

    /// C function pointer type for calling a closure.
    pub fn fn_pointer_type(&self, params: &[Type], ret: &Type, with_env: bool) -> CodegenResult<String> {
        let mut parts = Vec::with_capacity(params.len() + 1);
        if with_env {
            parts.push("void*".to_owned());
        }
        for p in params {
            parts.push(self.representation_of(p)?);
        }
        if parts.is_empty() {
            parts.push("void".to_owned());
        }
        Ok(format!("{} (*)({})", self.representation_of(ret)?, parts.join(", ")))
    }

    /// All structs and unions, ordered so every by-value field type is
    /// defined before the aggregate containing it. Ties keep declaration order.
    pub fn definition_order(&self) -> CodegenResult<Vec<Aggregate<'p>>> {
        let mut order = Vec::with_capacity(self.program.structs.len() + self.program.unions.len());
        let mut done = FxHashSet::default();
        let mut in_progress = FxHashSet::default();
        let roots = self
            .program
            .structs
            .iter()
            .map(Aggregate::Struct)
            .chain(self.program.unions.iter().map(Aggregate::Union));
        for agg in roots {
            self.visit_aggregate(agg, &mut done, &mut in_progress, &mut order)?;
        }
        Ok(order)
    }

    fn visit_aggregate(
        &self,
        agg: Aggregate<'p>,
        done: &mut FxHashSet<Name>,
        in_progress: &mut FxHashSet<Name>,
        order: &mut Vec<Aggregate<'p>>,
    ) -> CodegenResult<()> {
        let name = agg.name();
        if done.contains(&name) {
            return Ok(());
        }
        if !in_progress.insert(name) {
            return Err(InternalError::Malformed {
                what: "type",
                detail: format!(
                    "`{}` contains itself by value",
                    self.names.lookup(name)
                ),
            }
            .into());
        }
        let field_types: Vec<&Type> = match agg {
            Aggregate::Struct(s) => s.fields.iter().map(|f| &f.ty).collect(),
            Aggregate::Union(u) => u
                .cases
                .iter()
                .flat_map(|c| c.fields.iter().map(|f| &f.ty))
                .collect(),
        };
        for ty in field_types {
            self.reject_generic(ty)?;
            let dep = match ty {
                Type::Struct(n) => Aggregate::Struct(self.struct_decl(*n)?),
                Type::Union(n) => Aggregate::Union(self.union_decl(*n)?),
                _ => continue,
            };
            self.visit_aggregate(dep, done, in_progress, order)?;
        }
        in_progress.remove(&name);
        done.insert(name);
        order.push(agg);
        Ok(())
    }
}

fn scalar_repr(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Void | ScalarKind::Never => "void",
        ScalarKind::Bool => "bool",
        ScalarKind::Int => "intptr_t",
        ScalarKind::Int8 => "int8_t",
        ScalarKind::Int16 => "int16_t",
        ScalarKind::Int32 => "int32_t",
        ScalarKind::Int64 => "int64_t",
        ScalarKind::UInt => "uintptr_t",
        ScalarKind::UInt8 => "uint8_t",
        ScalarKind::UInt16 => "uint16_t",
        ScalarKind::UInt32 => "uint32_t",
        ScalarKind::UInt64 => "uint64_t",
        ScalarKind::Float32 => "float",
        ScalarKind::Float64 => "double",
    }
}

/// Suffix of the checked-arithmetic helpers for an integer kind.
pub(crate) fn checked_suffix(kind: ScalarKind) -> Option<&'static str> {
    Some(match kind {
        ScalarKind::Int => "isize",
        ScalarKind::Int8 => "i8",
        ScalarKind::Int16 => "i16",
        ScalarKind::Int32 => "i32",
        ScalarKind::Int64 => "i64",
        ScalarKind::UInt => "usize",
        ScalarKind::UInt8 => "u8",
        ScalarKind::UInt16 => "u16",
        ScalarKind::UInt32 => "u32",
        ScalarKind::UInt64 => "u64",
        _ => return None,
    })
}

#[cfg(test)]
mod tests;
