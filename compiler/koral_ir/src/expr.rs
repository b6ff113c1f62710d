//! Typed expression and statement tree.
//!
//! Every node carries its [`Type`] and its [`ValueCategory`]. The category is
//! decided upstream and is the only fact the emitter uses to choose between
//! copying and moving a value.

use crate::{Name, Type};

/// Whether an expression's value may be moved out of.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueCategory {
    /// A fresh value nobody else owns; safe to move.
    Owned,
    /// A named place (binding, field, deref); duplicating it requires a copy.
    Place,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub category: ValueCategory,
}

impl Expr {
    /// An owning temporary.
    pub fn owned(kind: ExprKind, ty: Type) -> Self {
        Expr {
            kind,
            ty,
            category: ValueCategory::Owned,
        }
    }

    /// A named place.
    pub fn place(kind: ExprKind, ty: Type) -> Self {
        Expr {
            kind,
            ty,
            category: ValueCategory::Place,
        }
    }

    pub fn is_place(&self) -> bool {
        self.category == ValueCategory::Place
    }

    /// Short label for context trails and logs.
    pub fn kind_label(&self) -> &'static str {
        self.kind.label()
    }

    /// Call `f` on every direct sub-expression, in evaluation order.
    /// Statements inside blocks are flattened; closure bodies are included.
    pub fn for_each_child<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        match &self.kind {
            ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Bool(_)
            | ExprKind::Str(_)
            | ExprKind::Var(_)
            | ExprKind::FunctionRef(_)
            | ExprKind::Global(_)
            | ExprKind::Break
            | ExprKind::Continue => {}
            ExprKind::Field { base: e, .. }
            | ExprKind::Deref(e)
            | ExprKind::Ref(e)
            | ExprKind::Unary { operand: e, .. }
            | ExprKind::ToTraitObject { value: e, .. } => f(e),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            ExprKind::Call { args, .. }
            | ExprKind::UnionLit { args, .. }
            | ExprKind::Intrinsic { args, .. } => args.iter().for_each(|a| f(a)),
            ExprKind::CallIndirect { callee, args } => {
                f(callee);
                args.iter().for_each(|a| f(a));
            }
            ExprKind::TraitCall { receiver, args, .. } => {
                f(receiver);
                args.iter().for_each(|a| f(a));
            }
            ExprKind::StructLit { fields, .. } => fields.iter().for_each(|(_, e)| f(e)),
            ExprKind::Closure { body, .. } => f(body),
            ExprKind::Block { stmts, tail } => {
                for stmt in stmts {
                    match stmt {
                        Stmt::Let { value, .. } | Stmt::Expr(value) => f(value),
                        Stmt::Assign { target, value } => {
                            f(value);
                            f(target);
                        }
                    }
                }
                if let Some(tail) = tail {
                    f(tail);
                }
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                f(cond);
                f(then_branch);
                if let Some(e) = else_branch {
                    f(e);
                }
            }
            ExprKind::Match { subject, arms } => {
                f(subject);
                for arm in arms {
                    if let Some(guard) = &arm.guard {
                        f(guard);
                    }
                    f(&arm.body);
                }
            }
            ExprKind::While { cond, body } => {
                f(cond);
                f(body);
            }
            ExprKind::Return(value) => {
                if let Some(e) = value {
                    f(e);
                }
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    /// C operator spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

/// Compiler intrinsics on raw pointers.
#[derive(Clone, Debug, PartialEq)]
pub enum Intrinsic {
    /// `alloc(count)`: uninitialized storage for `count` elements.
    Alloc { elem: Type },
    /// `free(ptr)`.
    Free,
    /// `read(ptr)`: the pointee as a place.
    Read,
    /// `write(ptr, value)`: moves `value` into the pointee without dropping
    /// whatever was there.
    Write,
    /// `offset(ptr, n)`.
    Offset,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// The environment holds its own deep copy.
    ByValue,
    /// The environment shares the binding's storage and retains it.
    ByReference,
}

/// A binding captured by a closure literal.
#[derive(Clone, Debug, PartialEq)]
pub struct Capture {
    pub name: Name,
    /// Type of the binding as seen by the enclosing scope.
    pub ty: Type,
    pub mode: CaptureMode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: Name,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Wildcard,
    Binding { name: Name, ty: Type },
    Int(i64),
    Bool(bool),
    /// Aggregate text constant; compared with the subject type's equality routine.
    Str(String),
    /// Union case with one sub-pattern per field.
    Case { case: Name, fields: Vec<Pattern> },
    /// Struct destructuring with one sub-pattern per named field.
    Struct { fields: Vec<(Name, Pattern)> },
}

impl Pattern {
    /// True if the pattern introduces no tests below its top level.
    pub fn is_flat(&self) -> bool {
        match self {
            Pattern::Case { fields, .. } => fields
                .iter()
                .all(|p| matches!(p, Pattern::Wildcard | Pattern::Binding { .. })),
            Pattern::Struct { fields } => fields
                .iter()
                .all(|(_, p)| matches!(p, Pattern::Wildcard | Pattern::Binding { .. })),
            Pattern::Wildcard
            | Pattern::Binding { .. }
            | Pattern::Int(_)
            | Pattern::Bool(_)
            | Pattern::Str(_) => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Let {
        name: Name,
        ty: Type,
        value: Expr,
    },
    /// Store into a place. The previous value is dropped.
    Assign {
        target: Expr,
        value: Expr,
    },
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Text literal materialized through the string language item.
    Str(String),
    /// Local binding, parameter or captured binding.
    Var(Name),
    /// A global function used as a value.
    FunctionRef(Name),
    /// A global variable.
    Global(Name),
    Field {
        base: Box<Expr>,
        field: Name,
    },
    /// Read through a shared reference or raw pointer.
    Deref(Box<Expr>),
    /// Take a shared reference to a value.
    Ref(Box<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Direct call to a global function or given method.
    Call {
        callee: Name,
        args: Vec<Expr>,
    },
    /// Call through a closure value.
    CallIndirect {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Dynamic call through a trait object's vtable.
    TraitCall {
        receiver: Box<Expr>,
        trait_name: Name,
        trait_args: Vec<Type>,
        method: Name,
        args: Vec<Expr>,
    },
    /// Convert a shared reference to a concrete value into a trait object.
    ToTraitObject {
        value: Box<Expr>,
        trait_name: Name,
        trait_args: Vec<Type>,
    },
    StructLit {
        name: Name,
        fields: Vec<(Name, Expr)>,
    },
    UnionLit {
        name: Name,
        case: Name,
        args: Vec<Expr>,
    },
    Closure {
        params: Vec<Param>,
        ret: Type,
        captures: Vec<Capture>,
        body: Box<Expr>,
    },
    Block {
        stmts: Vec<Stmt>,
        tail: Option<Box<Expr>>,
    },
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    Match {
        subject: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    While {
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    Break,
    Continue,
    Return(Option<Box<Expr>>),
    Intrinsic {
        op: Intrinsic,
        args: Vec<Expr>,
    },
}

impl ExprKind {
    pub fn label(&self) -> &'static str {
        match self {
            ExprKind::Int(_) => "integer literal",
            ExprKind::Float(_) => "float literal",
            ExprKind::Bool(_) => "bool literal",
            ExprKind::Str(_) => "string literal",
            ExprKind::Var(_) => "variable",
            ExprKind::FunctionRef(_) => "function reference",
            ExprKind::Global(_) => "global",
            ExprKind::Field { .. } => "field access",
            ExprKind::Deref(_) => "deref",
            ExprKind::Ref(_) => "ref",
            ExprKind::Unary { .. } => "unary operation",
            ExprKind::Binary { .. } => "binary operation",
            ExprKind::Logical { .. } => "logical operation",
            ExprKind::Call { .. } => "call",
            ExprKind::CallIndirect { .. } => "closure call",
            ExprKind::TraitCall { .. } => "trait method call",
            ExprKind::ToTraitObject { .. } => "trait object conversion",
            ExprKind::StructLit { .. } => "struct literal",
            ExprKind::UnionLit { .. } => "union literal",
            ExprKind::Closure { .. } => "closure",
            ExprKind::Block { .. } => "block",
            ExprKind::If { .. } => "if",
            ExprKind::Match { .. } => "match",
            ExprKind::While { .. } => "while",
            ExprKind::Break => "break",
            ExprKind::Continue => "continue",
            ExprKind::Return(_) => "return",
            ExprKind::Intrinsic { .. } => "intrinsic",
        }
    }
}
