//! Semantic types.
//!
//! The backend only ever sees concrete types: monomorphization has already
//! run. [`Type::GenericParam`] and [`Type::GenericInstance`] exist so that a
//! contract violation from an upstream pass can be represented and reported
//! instead of silently defaulted.

use std::fmt;

use crate::{Name, StringLookup};

/// Scalar (trivially copyable) value kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Void,
    Never,
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl ScalarKind {
    /// Integer kinds get checked arithmetic.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarKind::Int
                | ScalarKind::Int8
                | ScalarKind::Int16
                | ScalarKind::Int32
                | ScalarKind::Int64
                | ScalarKind::UInt
                | ScalarKind::UInt8
                | ScalarKind::UInt16
                | ScalarKind::UInt32
                | ScalarKind::UInt64
        )
    }

    /// Source-level spelling, used in symbol names and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Void => "Void",
            ScalarKind::Never => "Never",
            ScalarKind::Bool => "Bool",
            ScalarKind::Int => "Int",
            ScalarKind::Int8 => "Int8",
            ScalarKind::Int16 => "Int16",
            ScalarKind::Int32 => "Int32",
            ScalarKind::Int64 => "Int64",
            ScalarKind::UInt => "UInt",
            ScalarKind::UInt8 => "UInt8",
            ScalarKind::UInt16 => "UInt16",
            ScalarKind::UInt32 => "UInt32",
            ScalarKind::UInt64 => "UInt64",
            ScalarKind::Float32 => "Float32",
            ScalarKind::Float64 => "Float64",
        }
    }
}

/// A fully resolved semantic type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Scalar(ScalarKind),
    /// Aggregate passed by value; fields come from the program's struct table.
    Struct(Name),
    /// Tagged union passed by value.
    Union(Name),
    /// Closure value: a function pointer plus an optional environment.
    Function { params: Vec<Type>, ret: Box<Type> },
    /// Shared reference backed by a reference-counted control block.
    Reference(Box<Type>),
    /// Raw pointer; never reference counted.
    Pointer(Box<Type>),
    /// Reference to a value of some concrete type through a trait's vtable.
    TraitObject { trait_name: Name, args: Vec<Type> },
    /// Unsubstituted type parameter. Never valid at emission time.
    GenericParam(Name),
    /// Aggregate that still carries type arguments. Never valid at emission time.
    GenericInstance { template: Name, args: Vec<Type> },
}

impl Type {
    pub const VOID: Type = Type::Scalar(ScalarKind::Void);
    pub const NEVER: Type = Type::Scalar(ScalarKind::Never);
    pub const BOOL: Type = Type::Scalar(ScalarKind::Bool);
    pub const INT: Type = Type::Scalar(ScalarKind::Int);

    /// Shorthand for `Reference(Box::new(inner))`.
    pub fn reference(inner: Type) -> Type {
        Type::Reference(Box::new(inner))
    }

    /// Shorthand for `Pointer(Box::new(inner))`.
    pub fn pointer(inner: Type) -> Type {
        Type::Pointer(Box::new(inner))
    }

    /// Shorthand for a closure type.
    pub fn function(params: Vec<Type>, ret: Type) -> Type {
        Type::Function {
            params,
            ret: Box::new(ret),
        }
    }

    /// True for `Void` and `Never`: expressions of these types produce no value.
    pub fn is_unit_like(&self) -> bool {
        matches!(
            self,
            Type::Scalar(ScalarKind::Void) | Type::Scalar(ScalarKind::Never)
        )
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::Never))
    }

    /// True if a value of this type can carry a reference to something else.
    ///
    /// Escape analysis only tracks flow through these.
    pub fn is_reference_like(&self) -> bool {
        matches!(
            self,
            Type::Reference(_) | Type::Pointer(_) | Type::TraitObject { .. } | Type::Function { .. }
        )
    }

    /// Substitute type parameters by name.
    #[must_use]
    pub fn substitute(&self, params: &[Name], args: &[Type]) -> Type {
        match self {
            Type::GenericParam(name) => params
                .iter()
                .position(|p| p == name)
                .and_then(|i| args.get(i).cloned())
                .unwrap_or_else(|| self.clone()),
            Type::Scalar(_) | Type::Struct(_) | Type::Union(_) => self.clone(),
            Type::Function { params: ps, ret } => Type::Function {
                params: ps.iter().map(|p| p.substitute(params, args)).collect(),
                ret: Box::new(ret.substitute(params, args)),
            },
            Type::Reference(inner) => Type::reference(inner.substitute(params, args)),
            Type::Pointer(inner) => Type::pointer(inner.substitute(params, args)),
            Type::TraitObject {
                trait_name,
                args: targs,
            } => Type::TraitObject {
                trait_name: *trait_name,
                args: targs.iter().map(|a| a.substitute(params, args)).collect(),
            },
            Type::GenericInstance {
                template,
                args: targs,
            } => Type::GenericInstance {
                template: *template,
                args: targs.iter().map(|a| a.substitute(params, args)).collect(),
            },
        }
    }

    /// Render the type with resolved names.
    pub fn display<'a>(&'a self, names: &'a dyn StringLookup) -> TypeDisplay<'a> {
        TypeDisplay { ty: self, names }
    }
}

/// Display adapter returned by [`Type::display`].
pub struct TypeDisplay<'a> {
    ty: &'a Type,
    names: &'a dyn StringLookup,
}

impl TypeDisplay<'_> {
    fn list(&self, f: &mut fmt::Formatter<'_>, tys: &[Type]) -> fmt::Result {
        for (i, ty) in tys.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", ty.display(self.names))?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Type::Scalar(kind) => f.write_str(kind.name()),
            Type::Struct(name) | Type::Union(name) | Type::GenericParam(name) => {
                f.write_str(self.names.lookup(*name))
            }
            Type::Function { params, ret } => {
                f.write_str("(")?;
                self.list(f, params)?;
                write!(f, ") -> {}", ret.display(self.names))
            }
            Type::Reference(inner) => write!(f, "{} ref", inner.display(self.names)),
            Type::Pointer(inner) => write!(f, "Pointer[{}]", inner.display(self.names)),
            Type::TraitObject { trait_name, args } | Type::GenericInstance {
                template: trait_name,
                args,
            } => {
                f.write_str(self.names.lookup(*trait_name))?;
                if !args.is_empty() {
                    f.write_str("[")?;
                    self.list(f, args)?;
                    f.write_str("]")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests;
