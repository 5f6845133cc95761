//! Emission buffer
//!
//! Two append-only buckets: the instruction stream of the functions being
//! emitted, and module-level globals (string constants, vtable instances,
//! thread and closure wrappers). A single routing flag redirects the
//! default write path into the globals bucket while a helper function body
//! is being emitted; the flag is only ever toggled through
//! [`crate::CodeGenerator::with_global_emission`], which restores the
//! previous value on every exit path.

/// Separator written between the two buckets in the final module text.
const BUCKET_SEPARATOR: &str = "\n; ---- module globals ----\n";

#[derive(Debug, Default)]
pub(crate) struct EmitBuffer {
    body: String,
    globals: String,
    global_mode: bool,
}

impl EmitBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append one line to the active bucket.
    pub(crate) fn line(&mut self, text: impl AsRef<str>) {
        let bucket = if self.global_mode {
            &mut self.globals
        } else {
            &mut self.body
        };
        bucket.push_str(text.as_ref());
        bucket.push('\n');
    }

    /// Append an instruction line, indented, to the active bucket.
    pub(crate) fn inst(&mut self, text: impl AsRef<str>) {
        let bucket = if self.global_mode {
            &mut self.globals
        } else {
            &mut self.body
        };
        bucket.push_str("  ");
        bucket.push_str(text.as_ref());
        bucket.push('\n');
    }

    /// Open a basic block in the active bucket.
    pub(crate) fn label(&mut self, name: &str) {
        let bucket = if self.global_mode {
            &mut self.globals
        } else {
            &mut self.body
        };
        bucket.push_str(name);
        bucket.push_str(":\n");
    }

    /// Append one line to the globals bucket regardless of the flag.
    pub(crate) fn global_line(&mut self, text: impl AsRef<str>) {
        self.globals.push_str(text.as_ref());
        self.globals.push('\n');
    }

    pub(crate) fn set_global_mode(&mut self, on: bool) -> bool {
        std::mem::replace(&mut self.global_mode, on)
    }

    /// Concatenate header, body bucket, separator, globals bucket.
    pub(crate) fn finish(self, header: &str) -> String {
        let mut out = String::with_capacity(header.len() + self.body.len() + self.globals.len() + 64);
        out.push_str(header);
        out.push_str(&self.body);
        out.push_str(BUCKET_SEPARATOR);
        out.push_str(&self.globals);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_writes_go_to_body() {
        let mut buf = EmitBuffer::new();
        buf.line("define void @f() {");
        buf.inst("ret void");
        buf.line("}");
        let out = buf.finish("");
        assert_eq!(
            out,
            format!("define void @f() {{\n  ret void\n}}\n{}", BUCKET_SEPARATOR)
        );
    }

    #[test]
    fn flag_reroutes_into_globals() {
        let mut buf = EmitBuffer::new();
        buf.line("caller line");
        let prev = buf.set_global_mode(true);
        assert!(!prev);
        buf.line("wrapper line");
        buf.set_global_mode(prev);
        buf.line("caller continues");
        let out = buf.finish("");
        let sep = out.find(BUCKET_SEPARATOR).unwrap();
        assert!(out[..sep].contains("caller line"));
        assert!(out[..sep].contains("caller continues"));
        assert!(out[sep..].contains("wrapper line"));
    }

    #[test]
    fn global_line_ignores_flag() {
        let mut buf = EmitBuffer::new();
        buf.global_line("@.str.0 = private constant [1 x i8] zeroinitializer");
        let out = buf.finish("");
        let sep = out.find(BUCKET_SEPARATOR).unwrap();
        assert!(out[sep..].contains("@.str.0"));
    }

    #[test]
    fn buckets_preserve_write_order() {
        let mut buf = EmitBuffer::new();
        for i in 0..4 {
            buf.line(format!("b{}", i));
            buf.global_line(format!("g{}", i));
        }
        let out = buf.finish("");
        let body_pos: Vec<_> = (0..4).map(|i| out.find(&format!("b{}", i)).unwrap()).collect();
        let glob_pos: Vec<_> = (0..4).map(|i| out.find(&format!("g{}", i)).unwrap()).collect();
        assert!(body_pos.windows(2).all(|w| w[0] < w[1]));
        assert!(glob_pos.windows(2).all(|w| w[0] < w[1]));
    }
}
