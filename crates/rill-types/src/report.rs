//! Diagnostic model and terminal error reporting
//!
//! Provides user-facing error messages with source context, line numbers,
//! and visual indicators pointing at the error location. Diagnostics are
//! accumulated by each phase and formatted here; printing is the driver's
//! job.

use colored::Colorize;

use rill_ast::Span;

/// Compiler phase that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    TypeCheck,
    CodeGen,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::TypeCheck => "typecheck",
            Phase::CodeGen => "codegen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Stable diagnostic codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    CodeGenTypeMappingError,
    CodeGenUndefinedVariable,
    CodeGenFieldNotFound,
    CodeGenUndefinedVariant,
    CodeGenUnsupportedExpr,
    CodeGenUnsupportedStmt,
    CodeGenUnsupportedPattern,
    CodeGenInvalidLiteral,
    CodeGenInvalidIndex,
    CodeGenInvalidOperation,
    CodeGenControlFlowError,
    CodeGenFormatError,
}

impl DiagnosticCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticCode::CodeGenTypeMappingError => "CodeGenTypeMappingError",
            DiagnosticCode::CodeGenUndefinedVariable => "CodeGenUndefinedVariable",
            DiagnosticCode::CodeGenFieldNotFound => "CodeGenFieldNotFound",
            DiagnosticCode::CodeGenUndefinedVariant => "CodeGenUndefinedVariant",
            DiagnosticCode::CodeGenUnsupportedExpr => "CodeGenUnsupportedExpr",
            DiagnosticCode::CodeGenUnsupportedStmt => "CodeGenUnsupportedStmt",
            DiagnosticCode::CodeGenUnsupportedPattern => "CodeGenUnsupportedPattern",
            DiagnosticCode::CodeGenInvalidLiteral => "CodeGenInvalidLiteral",
            DiagnosticCode::CodeGenInvalidIndex => "CodeGenInvalidIndex",
            DiagnosticCode::CodeGenInvalidOperation => "CodeGenInvalidOperation",
            DiagnosticCode::CodeGenControlFlowError => "CodeGenControlFlowError",
            DiagnosticCode::CodeGenFormatError => "CodeGenFormatError",
        }
    }
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub phase: Phase,
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    pub suggestion: Option<String>,
    pub span: Span,
    /// Secondary spans with their own captions.
    pub labels: Vec<(Span, String)>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            phase: Phase::CodeGen,
            severity: Severity::Error,
            code,
            message: message.into(),
            suggestion: None,
            span,
            labels: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_label(mut self, span: Span, caption: impl Into<String>) -> Self {
        self.labels.push((span, caption.into()));
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

struct SourceContext {
    line: usize,
    column: usize,
    line_text: String,
    span_length: usize,
}

/// Formats diagnostics against source text.
pub struct ErrorReporter<'a> {
    source: &'a str,
    filename: Option<&'a str>,
}

impl<'a> ErrorReporter<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: &'a str) -> Self {
        self.filename = Some(filename);
        self
    }

    /// Render one diagnostic with source context.
    pub fn format(&self, diag: &Diagnostic) -> String {
        let mut output = String::new();

        let header = match diag.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
        };
        output.push_str(&format!(
            "{}{}{}{} {}\n",
            header,
            "[".bold(),
            diag.code.as_str().yellow().bold(),
            "]".bold(),
            diag.message.bold()
        ));

        if let Some(context) = self.source_context(diag.span) {
            let location = if let Some(filename) = self.filename {
                format!("{}:{}:{}", filename, context.line, context.column)
            } else {
                format!("line {}:{}", context.line, context.column)
            };
            output.push_str(&format!("  {} {}\n", "-->".cyan().bold(), location));
            output.push_str(&format!("   {}\n", "|".cyan().bold()));
            output.push_str(&format!(
                " {} {} {}\n",
                format!("{:>3}", context.line).cyan().bold(),
                "|".cyan().bold(),
                context.line_text
            ));
            output.push_str(&format!(
                "   {} {}{}\n",
                "|".cyan().bold(),
                " ".repeat(context.column.saturating_sub(1)),
                "^".repeat(context.span_length.max(1)).red().bold(),
            ));
        }

        for (span, caption) in &diag.labels {
            if let Some(context) = self.source_context(*span) {
                output.push_str(&format!(
                    " {} {} {}\n",
                    format!("{:>3}", context.line).cyan().bold(),
                    "|".cyan().bold(),
                    context.line_text
                ));
                output.push_str(&format!(
                    "   {} {}{} {}\n",
                    "|".cyan().bold(),
                    " ".repeat(context.column.saturating_sub(1)),
                    "-".repeat(context.span_length.max(1)).cyan().bold(),
                    caption.cyan()
                ));
            }
        }

        if let Some(suggestion) = &diag.suggestion {
            output.push_str(&format!(
                "   {} {}: {}\n",
                "=".cyan().bold(),
                "help".bold(),
                suggestion
            ));
        }
        for note in &diag.notes {
            output.push_str(&format!(
                "   {} {}: {}\n",
                "=".cyan().bold(),
                "note".bold(),
                note
            ));
        }

        output
    }

    fn source_context(&self, span: Span) -> Option<SourceContext> {
        if self.source.is_empty() || span.start >= self.source.len() {
            return None;
        }

        let mut line = 1;
        let mut line_start = 0;
        for (i, c) in self.source.char_indices() {
            if i >= span.start {
                break;
            }
            if c == '\n' {
                line += 1;
                line_start = i + 1;
            }
        }

        let line_end = self.source[line_start..]
            .find('\n')
            .map(|i| line_start + i)
            .unwrap_or(self.source.len());
        let line_text = self.source[line_start..line_end].to_string();
        let column = span.start - line_start + 1;
        let span_length = span.end.saturating_sub(span.start).min(line_end - span.start);

        Some(SourceContext {
            line,
            column,
            line_text,
            span_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(s: &str) -> String {
        // Strip ANSI escapes so assertions hold with and without a tty.
        let mut out = String::new();
        let mut in_escape = false;
        for c in s.chars() {
            match c {
                '\x1b' => in_escape = true,
                'm' if in_escape => in_escape = false,
                _ if !in_escape => out.push(c),
                _ => {}
            }
        }
        out
    }

    #[test]
    fn formats_code_and_message() {
        let source = "let x = missing;\n";
        let diag = Diagnostic::error(
            DiagnosticCode::CodeGenUndefinedVariable,
            "undefined variable `missing`",
            Span::new(8, 15),
        );
        let text = plain(&ErrorReporter::new(source).format(&diag));
        assert!(text.contains("error[CodeGenUndefinedVariable]"));
        assert!(text.contains("undefined variable `missing`"));
        assert!(text.contains("let x = missing;"));
        assert!(text.contains("^^^^^^^"));
    }

    #[test]
    fn includes_filename_and_location() {
        let source = "a\nbb\nccc\n";
        let diag = Diagnostic::error(
            DiagnosticCode::CodeGenInvalidOperation,
            "bad",
            Span::new(5, 8),
        );
        let text = plain(
            &ErrorReporter::new(source)
                .with_filename("main.rl")
                .format(&diag),
        );
        assert!(text.contains("main.rl:3:1"), "got: {}", text);
    }

    #[test]
    fn renders_suggestion_and_notes() {
        let diag = Diagnostic::error(
            DiagnosticCode::CodeGenFieldNotFound,
            "no field `lenn`",
            Span::new(0, 4),
        )
        .with_suggestion("did you mean `len`?")
        .with_note("struct `Buf` has 2 fields");
        let text = plain(&ErrorReporter::new("lenn").format(&diag));
        assert!(text.contains("help: did you mean `len`?"));
        assert!(text.contains("note: struct `Buf` has 2 fields"));
    }

    #[test]
    fn out_of_range_span_omits_context() {
        let diag = Diagnostic::error(
            DiagnosticCode::CodeGenInvalidIndex,
            "oops",
            Span::new(100, 104),
        );
        let text = plain(&ErrorReporter::new("short").format(&diag));
        assert!(text.contains("oops"));
        assert!(!text.contains("-->"));
    }
}
