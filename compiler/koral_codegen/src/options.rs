//! Generation options.

/// Knobs for [`generate_with_options`](crate::generate_with_options).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Route integer `+ - * / %` through the overflow-checking runtime helpers.
    pub checked_arithmetic: bool,
    /// Emit the runtime prelude (handle types, retain/release) at the top of
    /// the translation unit.
    pub emit_prelude: bool,
    /// Spaces per indentation level.
    pub indent_width: usize,
    /// Collect one line per heap-allocated local into
    /// [`CodegenOutput::escape_report`](crate::CodegenOutput::escape_report).
    pub escape_report: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            checked_arithmetic: true,
            emit_prelude: true,
            indent_width: 4,
            escape_report: false,
        }
    }
}

impl CodegenOptions {
    #[must_use]
    pub fn checked_arithmetic(mut self, on: bool) -> Self {
        self.checked_arithmetic = on;
        self
    }

    #[must_use]
    pub fn emit_prelude(mut self, on: bool) -> Self {
        self.emit_prelude = on;
        self
    }

    #[must_use]
    pub fn indent_width(mut self, width: usize) -> Self {
        self.indent_width = width;
        self
    }

    #[must_use]
    pub fn escape_report(mut self, on: bool) -> Self {
        self.escape_report = on;
        self
    }
}
