//! Koral typed IR.
//!
//! The fully type-checked, monomorphized program the backend consumes:
//!
//! - [`Name`] and [`StringInterner`] for symbols
//! - [`Type`], the closed set of semantic types
//! - [`Expr`] / [`Stmt`], the typed tree with value categories
//! - [`Program`], the declarations plus vtable requests
//!
//! Nothing here performs analysis; the crate is the contract between the
//! front end and `koral_codegen`.

mod decl;
mod expr;
mod name;
mod ty;

pub use decl::{
    Field, FunctionDecl, GivenDecl, GivenMethod, GlobalDecl, LangItems, Program, Receiver,
    StructDecl, TraitBound, TraitDecl, TraitMethod, UnionCase, UnionDecl, VtableRequest,
};
pub use expr::{
    BinaryOp, Capture, CaptureMode, Expr, ExprKind, Intrinsic, LogicalOp, MatchArm, Param,
    Pattern, Stmt, UnaryOp, ValueCategory,
};
pub use name::{Name, StringInterner, StringLookup};
pub use ty::{ScalarKind, Type, TypeDisplay};
