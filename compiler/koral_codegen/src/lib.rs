//! C backend for Koral.
//!
//! Lowers a type-checked, monomorphized [`Program`] to a single C translation
//! unit whose memory is managed by reference counting.
//!
//! # Architecture
//!
//! ```text
//! Program
//!    ↓
//! analyze_program      (escape analysis: stack or heap per binding)
//!    ↓
//! Emitter              (functions, closures, vtables, globals)
//!    ↓                  uses TypeLayout, ScopeTracker
//! C source
//! ```
//!
//! # Runtime contract
//!
//! - `struct Ref { void* ptr; void* control; }`: shared reference;
//!   `control` is `NULL` for stack storage.
//! - `__koral_retain(control)` / `__koral_release(control)`, both no-ops on
//!   `NULL`.
//! - `__koral_<T>_copy(const T*)` and `__koral_<T>_drop(void*)` for every
//!   struct and union.
//! - One `static const` vtable per `(type, trait, arguments)`.
//!
//! Generation either succeeds or fails with a [`CodegenError`]; there is no
//! partial output.

mod aggregate;
mod closure;
mod context;
mod emit;
mod error;
mod escape;
mod layout;
mod names;
mod options;
mod runtime;
mod scope;
mod stack;
mod vtable;

#[cfg(test)]
mod test_helpers;

use std::sync::Once;

use koral_ir::{Program, StringInterner};

pub use error::{CodegenError, CodegenResult, InternalError};
pub use escape::{
    analyze_program, EscapeDiagnostic, EscapeReason, EscapeResults, EscapeState, EscapeSummary,
    LocalEscapes,
};
pub use layout::{
    Aggregate, HandleKind, TypeLayout, ValueClass, CLOSURE_TYPE, REF_TYPE, TRAIT_REF_TYPE,
};
pub use options::CodegenOptions;

/// Result of a successful generation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodegenOutput {
    /// The C translation unit.
    pub code: String,
    /// `[escape-analysis] ...` lines, one per heap-allocated local. Empty
    /// unless [`CodegenOptions::escape_report`] is set.
    pub escape_report: Vec<String>,
}

/// Generate C for `program` with default options.
pub fn generate(program: &Program, names: &StringInterner) -> CodegenResult<String> {
    generate_with_options(program, names, &CodegenOptions::default()).map(|out| out.code)
}

/// Generate C for `program`.
pub fn generate_with_options(
    program: &Program,
    names: &StringInterner,
    options: &CodegenOptions,
) -> CodegenResult<CodegenOutput> {
    let _span = tracing::info_span!("codegen").entered();
    let escape = analyze_program(program);
    tracing::debug!(
        functions = program.functions.len(),
        globals = program.globals.len(),
        "escape analysis done"
    );
    let escape_report = if options.escape_report {
        escape
            .report(program, names)
            .iter()
            .map(ToString::to_string)
            .collect()
    } else {
        Vec::new()
    };
    let code = emit::Emitter::new(program, names, &escape, options).emit_program()?;
    tracing::debug!(bytes = code.len(), heap_locals = escape_report.len(), "generated C");
    Ok(CodegenOutput {
        code,
        escape_report,
    })
}

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` subscriber for the backend's spans and events.
///
/// Does nothing unless `KORAL_LOG` (falling back to `RUST_LOG`) is set, and
/// only the first call has any effect. The filter uses `EnvFilter` syntax,
/// e.g. `KORAL_LOG=koral_codegen::escape=trace`. Events go to stderr so they
/// never mix with C written to stdout.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let directives = std::env::var("KORAL_LOG").or_else(|_| std::env::var("RUST_LOG"));
        if let Ok(directives) = directives {
            let _ = tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .without_time(),
                )
                .with(EnvFilter::new(directives))
                .try_init();
        }
    });
}
