//! Shared test utilities: IR factory functions and an emission shortcut.
//!
//! Only compiled in test builds.

use koral_ir::{
    BinaryOp, Capture, CaptureMode, Expr, ExprKind, Field, FunctionDecl, Intrinsic, MatchArm,
    Name, Param, Pattern, Program, Stmt, StringInterner, StructDecl, Type,
};

use crate::{generate_with_options, CodegenError, CodegenOptions};

pub(crate) fn int(value: i64) -> Expr {
    Expr::owned(ExprKind::Int(value), Type::INT)
}

pub(crate) fn boolean(value: bool) -> Expr {
    Expr::owned(ExprKind::Bool(value), Type::BOOL)
}

pub(crate) fn var(name: Name, ty: Type) -> Expr {
    Expr::place(ExprKind::Var(name), ty)
}

/// A variable read that ends the binding's life (moved).
pub(crate) fn moved(name: Name, ty: Type) -> Expr {
    Expr::owned(ExprKind::Var(name), ty)
}

pub(crate) fn reference(inner: Expr) -> Expr {
    let ty = Type::reference(inner.ty.clone());
    Expr::owned(ExprKind::Ref(Box::new(inner)), ty)
}

pub(crate) fn deref(inner: Expr) -> Expr {
    let ty = match &inner.ty {
        Type::Reference(t) | Type::Pointer(t) => (**t).clone(),
        other => other.clone(),
    };
    Expr::place(ExprKind::Deref(Box::new(inner)), ty)
}

pub(crate) fn field(base: Expr, field: Name, ty: Type) -> Expr {
    Expr::place(
        ExprKind::Field {
            base: Box::new(base),
            field,
        },
        ty,
    )
}

pub(crate) fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let ty = match op {
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => Type::BOOL,
        _ => lhs.ty.clone(),
    };
    Expr::owned(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ty,
    )
}

pub(crate) fn call(callee: Name, args: Vec<Expr>, ret: Type) -> Expr {
    Expr::owned(ExprKind::Call { callee, args }, ret)
}

pub(crate) fn call_indirect(callee: Expr, args: Vec<Expr>) -> Expr {
    let ret = match &callee.ty {
        Type::Function { ret, .. } => (**ret).clone(),
        _ => Type::VOID,
    };
    Expr::owned(
        ExprKind::CallIndirect {
            callee: Box::new(callee),
            args,
        },
        ret,
    )
}

pub(crate) fn struct_lit(name: Name, fields: Vec<(Name, Expr)>) -> Expr {
    Expr::owned(ExprKind::StructLit { name, fields }, Type::Struct(name))
}

pub(crate) fn closure(params: Vec<Param>, ret: Type, captures: Vec<Capture>, body: Expr) -> Expr {
    let ty = Type::function(params.iter().map(|p| p.ty.clone()).collect(), ret.clone());
    Expr::owned(
        ExprKind::Closure {
            params,
            ret,
            captures,
            body: Box::new(body),
        },
        ty,
    )
}

pub(crate) fn capture(name: Name, ty: Type, mode: CaptureMode) -> Capture {
    Capture { name, ty, mode }
}

pub(crate) fn block(stmts: Vec<Stmt>, tail: Option<Expr>) -> Expr {
    let ty = tail.as_ref().map_or(Type::VOID, |t| t.ty.clone());
    Expr::owned(
        ExprKind::Block {
            stmts,
            tail: tail.map(Box::new),
        },
        ty,
    )
}

pub(crate) fn if_else(cond: Expr, then_branch: Expr, else_branch: Option<Expr>) -> Expr {
    let ty = if else_branch.is_some() {
        then_branch.ty.clone()
    } else {
        Type::VOID
    };
    Expr::owned(
        ExprKind::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
        },
        ty,
    )
}

pub(crate) fn while_loop(cond: Expr, body: Expr) -> Expr {
    Expr::owned(
        ExprKind::While {
            cond: Box::new(cond),
            body: Box::new(body),
        },
        Type::VOID,
    )
}

pub(crate) fn brk() -> Expr {
    Expr::owned(ExprKind::Break, Type::NEVER)
}

pub(crate) fn cont() -> Expr {
    Expr::owned(ExprKind::Continue, Type::NEVER)
}

pub(crate) fn ret(value: Option<Expr>) -> Expr {
    Expr::owned(ExprKind::Return(value.map(Box::new)), Type::NEVER)
}

pub(crate) fn match_expr(subject: Expr, arms: Vec<MatchArm>, ty: Type) -> Expr {
    Expr::owned(
        ExprKind::Match {
            subject: Box::new(subject),
            arms,
        },
        ty,
    )
}

pub(crate) fn arm(pattern: Pattern, guard: Option<Expr>, body: Expr) -> MatchArm {
    MatchArm {
        pattern,
        guard,
        body,
    }
}

pub(crate) fn intrinsic(op: Intrinsic, args: Vec<Expr>, ty: Type) -> Expr {
    Expr::owned(ExprKind::Intrinsic { op, args }, ty)
}

pub(crate) fn let_(name: Name, value: Expr) -> Stmt {
    Stmt::Let {
        name,
        ty: value.ty.clone(),
        value,
    }
}

pub(crate) fn assign(target: Expr, value: Expr) -> Stmt {
    Stmt::Assign { target, value }
}

pub(crate) fn param(name: Name, ty: Type) -> Param {
    Param { name, ty }
}

pub(crate) fn func(name: Name, params: Vec<Param>, ret: Type, body: Expr) -> FunctionDecl {
    FunctionDecl {
        name,
        params,
        ret,
        body: Some(body),
    }
}

pub(crate) fn extern_func(name: Name, params: Vec<Param>, ret: Type) -> FunctionDecl {
    FunctionDecl {
        name,
        params,
        ret,
        body: None,
    }
}

pub(crate) fn struct_decl(name: Name, fields: Vec<(Name, Type)>) -> StructDecl {
    StructDecl {
        name,
        fields: fields
            .into_iter()
            .map(|(name, ty)| Field { name, ty })
            .collect(),
        equality: None,
    }
}

/// Emit without the prelude, so assertions only see program code.
pub(crate) fn emit(program: &Program, names: &StringInterner) -> Result<String, CodegenError> {
    generate_with_options(program, names, &CodegenOptions::default().emit_prelude(false))
        .map(|out| out.code)
}

/// Emit and fail the test on error.
pub(crate) fn emit_ok(program: &Program, names: &StringInterner) -> String {
    match emit(program, names) {
        Ok(code) => code,
        Err(e) => panic!("generation failed: {e}"),
    }
}

/// Text between `start` and the next line equal to `}` (a top-level
/// function body), for assertions scoped to one function.
pub(crate) fn function_text<'a>(code: &'a str, start: &str) -> &'a str {
    let Some(begin) = code.find(start) else {
        panic!("`{start}` not found in:\n{code}");
    };
    let rest = &code[begin..];
    let end = rest.find("\n}\n").map_or(rest.len(), |i| i + 3);
    &rest[..end]
}
