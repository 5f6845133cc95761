//! Codegen errors, recovery, and suggestion utilities
//!
//! Lowering helpers return `Result<_, CodegenError>`; the statement
//! lowerer and the declaration pipeline are the recovery boundaries that
//! convert errors into accumulated diagnostics and keep emitting.

use rill_ast::Span;
use rill_types::{Diagnostic, DiagnosticCode};
use thiserror::Error;

pub(crate) type CodegenResult<T> = Result<T, CodegenError>;

/// Error raised while lowering one construct.
#[derive(Debug, Clone, Error)]
pub enum CodegenError {
    #[error("cannot map type to IR: {message}")]
    TypeMapping { message: String, span: Span },

    #[error("undefined variable `{name}`")]
    UndefinedVar {
        name: String,
        suggestion: Option<String>,
        span: Span,
    },

    #[error("no field `{field}` on `{on}`")]
    FieldNotFound {
        field: String,
        on: String,
        suggestion: Option<String>,
        span: Span,
    },

    #[error("no variant `{variant}` on enum `{enum_name}`")]
    UndefinedVariant {
        enum_name: String,
        variant: String,
        span: Span,
    },

    #[error("unsupported expression: {message}")]
    UnsupportedExpr { message: String, span: Span },

    #[error("unsupported statement: {message}")]
    UnsupportedStmt { message: String, span: Span },

    #[error("unsupported pattern: {message}")]
    UnsupportedPattern { message: String, span: Span },

    #[error("invalid literal: {message}")]
    InvalidLiteral { message: String, span: Span },

    #[error("invalid index: {message}")]
    InvalidIndex { message: String, span: Span },

    #[error("invalid operation: {message}")]
    InvalidOperation { message: String, span: Span },

    #[error("{message}")]
    ControlFlow { message: String, span: Span },

    #[error("format error: {message}")]
    Format { message: String, span: Span },
}

impl CodegenError {
    pub fn code(&self) -> DiagnosticCode {
        match self {
            CodegenError::TypeMapping { .. } => DiagnosticCode::CodeGenTypeMappingError,
            CodegenError::UndefinedVar { .. } => DiagnosticCode::CodeGenUndefinedVariable,
            CodegenError::FieldNotFound { .. } => DiagnosticCode::CodeGenFieldNotFound,
            CodegenError::UndefinedVariant { .. } => DiagnosticCode::CodeGenUndefinedVariant,
            CodegenError::UnsupportedExpr { .. } => DiagnosticCode::CodeGenUnsupportedExpr,
            CodegenError::UnsupportedStmt { .. } => DiagnosticCode::CodeGenUnsupportedStmt,
            CodegenError::UnsupportedPattern { .. } => DiagnosticCode::CodeGenUnsupportedPattern,
            CodegenError::InvalidLiteral { .. } => DiagnosticCode::CodeGenInvalidLiteral,
            CodegenError::InvalidIndex { .. } => DiagnosticCode::CodeGenInvalidIndex,
            CodegenError::InvalidOperation { .. } => DiagnosticCode::CodeGenInvalidOperation,
            CodegenError::ControlFlow { .. } => DiagnosticCode::CodeGenControlFlowError,
            CodegenError::Format { .. } => DiagnosticCode::CodeGenFormatError,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            CodegenError::TypeMapping { span, .. }
            | CodegenError::UndefinedVar { span, .. }
            | CodegenError::FieldNotFound { span, .. }
            | CodegenError::UndefinedVariant { span, .. }
            | CodegenError::UnsupportedExpr { span, .. }
            | CodegenError::UnsupportedStmt { span, .. }
            | CodegenError::UnsupportedPattern { span, .. }
            | CodegenError::InvalidLiteral { span, .. }
            | CodegenError::InvalidIndex { span, .. }
            | CodegenError::InvalidOperation { span, .. }
            | CodegenError::ControlFlow { span, .. }
            | CodegenError::Format { span, .. } => *span,
        }
    }

    /// True for errors that abort the current function's lowering
    /// (return/parameter type mapping failures).
    pub fn is_function_fatal(&self) -> bool {
        matches!(self, CodegenError::TypeMapping { .. })
    }

    pub fn into_diagnostic(self) -> Diagnostic {
        let code = self.code();
        let span = self.span();
        let message = self.to_string();
        let suggestion = match self {
            CodegenError::UndefinedVar { suggestion, .. }
            | CodegenError::FieldNotFound { suggestion, .. } => suggestion,
            _ => None,
        };
        let mut diag = Diagnostic::error(code, message, span);
        if let Some(s) = suggestion {
            diag = diag.with_suggestion(s);
        }
        diag
    }
}

// Suggestion utilities
// ============================================================================

/// Levenshtein edit distance between two strings.
pub(crate) fn edit_distance(a: &str, b: &str) -> usize {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 {
        return len_b;
    }
    if len_b == 0 {
        return len_a;
    }

    let mut matrix = vec![vec![0usize; len_b + 1]; len_a + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, cell) in matrix[0].iter_mut().enumerate() {
        *cell = j;
    }

    for (i, ca) in a.chars().enumerate() {
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            matrix[i + 1][j + 1] = (matrix[i][j + 1] + 1)
                .min(matrix[i + 1][j] + 1)
                .min(matrix[i][j] + cost);
        }
    }

    matrix[len_a][len_b]
}

/// Candidates within an edit-distance cap scaled by the name's length.
/// A case-insensitive exact match ranks first.
pub(crate) fn suggest_similar(
    name: &str,
    candidates: &[&str],
    max_suggestions: usize,
) -> Vec<String> {
    let max_distance = if name.len() <= 3 {
        1
    } else if name.len() <= 7 {
        2
    } else {
        3
    };

    let mut suggestions: Vec<(String, usize)> = candidates
        .iter()
        .map(|&candidate| {
            if candidate.eq_ignore_ascii_case(name) {
                (candidate.to_string(), 0)
            } else {
                (candidate.to_string(), edit_distance(name, candidate))
            }
        })
        .filter(|(_, distance)| *distance <= max_distance)
        .collect();

    suggestions.sort_by(|a, b| match a.1.cmp(&b.1) {
        std::cmp::Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });

    suggestions
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name)
        .collect()
}

/// Render a "did you mean" suggestion line.
pub(crate) fn format_did_you_mean(suggestions: &[String]) -> Option<String> {
    match suggestions.len() {
        0 => None,
        1 => Some(format!("did you mean `{}`?", suggestions[0])),
        2 => Some(format!(
            "did you mean `{}` or `{}`?",
            suggestions[0], suggestions[1]
        )),
        _ => Some(format!(
            "did you mean `{}`, `{}`, or `{}`?",
            suggestions[0], suggestions[1], suggestions[2]
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("abc", "abc"), 0);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("couner", "counter"), 1);
    }

    #[test]
    fn suggests_close_matches_only() {
        let candidates = ["counter", "count", "mounted", "zebra"];
        let got = suggest_similar("couner", &candidates, 3);
        assert!(got.contains(&"counter".to_string()));
        assert!(!got.contains(&"zebra".to_string()));
    }

    #[test]
    fn short_names_get_tight_cap() {
        // distance cap is 1 for names up to 3 chars
        let got = suggest_similar("ab", &["xy"], 3);
        assert!(got.is_empty());
    }

    #[test]
    fn case_difference_ranks_first() {
        let got = suggest_similar("value", &["valuer", "Value"], 3);
        assert_eq!(got[0], "Value");
    }

    #[test]
    fn did_you_mean_formats() {
        assert_eq!(format_did_you_mean(&[]), None);
        assert_eq!(
            format_did_you_mean(&["x".to_string()]).unwrap(),
            "did you mean `x`?"
        );
        assert_eq!(
            format_did_you_mean(&["x".to_string(), "y".to_string()]).unwrap(),
            "did you mean `x` or `y`?"
        );
    }

    #[test]
    fn only_type_mapping_is_function_fatal() {
        let fatal = CodegenError::TypeMapping {
            message: "projected type".to_string(),
            span: Span::default(),
        };
        let recoverable = CodegenError::UndefinedVar {
            name: "x".to_string(),
            suggestion: None,
            span: Span::default(),
        };
        assert!(fatal.is_function_fatal());
        assert!(!recoverable.is_function_fatal());
    }
}
