//! Indented output buffer.

/// A growable C source buffer with indentation tracking.
#[derive(Debug)]
pub(crate) struct CodeBuffer {
    output: String,
    indent: usize,
    width: usize,
}

impl CodeBuffer {
    pub(crate) fn new(width: usize) -> Self {
        CodeBuffer {
            output: String::with_capacity(1024),
            indent: 0,
            width,
        }
    }

    pub(crate) fn indent(&mut self) {
        self.indent += 1;
    }

    pub(crate) fn dedent(&mut self) {
        debug_assert!(self.indent > 0, "dedent called with zero indent");
        self.indent = self.indent.saturating_sub(1);
    }

    /// Write one line at the current indentation.
    pub(crate) fn line(&mut self, s: &str) {
        for _ in 0..self.indent * self.width {
            self.output.push(' ');
        }
        self.output.push_str(s);
        self.output.push('\n');
    }

    /// Write several lines at the current indentation.
    pub(crate) fn lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for l in lines {
            self.line(l.as_ref());
        }
    }

    /// Write a label flush with the enclosing block.
    pub(crate) fn label(&mut self, label: &str) {
        self.dedent();
        self.line(&format!("{label}:;"));
        self.indent();
    }

    pub(crate) fn blank(&mut self) {
        self.output.push('\n');
    }

    /// Append pre-rendered text verbatim.
    pub(crate) fn append(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    pub(crate) fn take(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn width(&self) -> usize {
        self.width
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn indentation_and_labels() {
        let mut buf = CodeBuffer::new(4);
        buf.line("void f(void) {");
        buf.indent();
        buf.line("int x = 1;");
        buf.label("_l0_end");
        buf.dedent();
        buf.line("}");
        assert_eq!(buf.take(), "void f(void) {\n    int x = 1;\n_l0_end:;\n}\n");
        assert!(buf.is_empty());
    }
}
