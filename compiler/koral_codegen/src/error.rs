//! Fatal internal-consistency errors.
//!
//! The backend trusts its input. When the input breaks the front end's
//! contract (an unresolved generic, a trait method nobody implements) there
//! is nothing sensible to emit, so generation stops with a [`CodegenError`].
//! As the error propagates outward each enclosing construct pushes a frame
//! onto its context trail, producing a path like
//! `while lowering call` / `while emitting function main`.
//!
//! Escape analysis never produces errors: uncertainty degrades to heap
//! allocation.

use std::fmt::Write as _;

/// The violated invariant.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InternalError {
    #[error("unresolved generic parameter `{0}` reached code generation")]
    UnresolvedGeneric(String),
    #[error("parameterized type `{0}` reached code generation")]
    UnresolvedInstance(String),
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unknown trait `{0}`")]
    UnknownTrait(String),
    #[error("unknown binding `{0}`")]
    UnknownBinding(String),
    #[error("no field `{field}` on `{ty}`")]
    UnknownField { ty: String, field: String },
    #[error("no case `{case}` in union `{ty}`")]
    UnknownCase { ty: String, case: String },
    #[error("no implementation of `{trait_name}.{method}` for `{ty}`")]
    UnresolvedTraitMethod {
        trait_name: String,
        method: String,
        ty: String,
    },
    #[error("call through a value of non-closure type `{0}`")]
    NotCallable(String),
    #[error("`{0}` outside of a loop")]
    OutsideLoop(&'static str),
    #[error("missing language item `{0}`")]
    MissingLangItem(&'static str),
    #[error("type `{0}` has no equality routine for constant patterns")]
    MissingEquality(String),
    #[error("binding `{0}` is captured by reference but has no shared storage")]
    NoSharedStorage(String),
    #[error("{0} is not an assignable place")]
    NotAPlace(&'static str),
    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },
}

/// An [`InternalError`] plus the trail of constructs being lowered when it
/// was raised, innermost first.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("internal compiler error: {kind}{}", render_trail(.trail))]
pub struct CodegenError {
    kind: InternalError,
    trail: Vec<String>,
}

fn render_trail(trail: &[String]) -> String {
    let mut out = String::new();
    for frame in trail {
        let _ = write!(out, "\n  while {frame}");
    }
    out
}

impl CodegenError {
    pub fn new(kind: InternalError) -> Self {
        CodegenError {
            kind,
            trail: Vec::new(),
        }
    }

    pub fn kind(&self) -> &InternalError {
        &self.kind
    }

    /// Context frames, innermost first.
    pub fn trail(&self) -> &[String] {
        &self.trail
    }

    #[must_use]
    pub fn within(mut self, frame: String) -> Self {
        self.trail.push(frame);
        self
    }
}

impl From<InternalError> for CodegenError {
    fn from(kind: InternalError) -> Self {
        CodegenError::new(kind)
    }
}

pub type CodegenResult<T> = Result<T, CodegenError>;

/// Attach a context frame to an error as it propagates.
pub(crate) trait ResultExt<T> {
    fn context(self, frame: impl FnOnce() -> String) -> CodegenResult<T>;
}

impl<T> ResultExt<T> for CodegenResult<T> {
    #[inline]
    fn context(self, frame: impl FnOnce() -> String) -> CodegenResult<T> {
        self.map_err(|e| e.within(frame()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn trail_renders_innermost_first() {
        let err: CodegenResult<()> = Err(InternalError::OutsideLoop("break").into());
        let err = err
            .context(|| "lowering break".to_owned())
            .context(|| "emitting function `main`".to_owned())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "internal compiler error: `break` outside of a loop\n  while lowering break\n  while emitting function `main`"
        );
        assert_eq!(err.kind(), &InternalError::OutsideLoop("break"));
        assert_eq!(err.trail().len(), 2);
    }
}
