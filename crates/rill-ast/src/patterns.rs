//! Match patterns

use crate::infrastructure::Spanned;

/// Patterns appearing in match arms.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `_` — always matches, binds nothing
    Wildcard,
    /// Bare identifier — always matches, binds the subject
    Binding(String),
    /// Literal pattern
    Literal(PatternLit),
    /// `Point { x: p, y: _ }`
    Struct {
        name: Spanned<String>,
        fields: Vec<(Spanned<String>, Spanned<Pattern>)>,
    },
    /// `Option::Some(v)`
    Variant {
        enum_name: Spanned<String>,
        variant: Spanned<String>,
        bindings: Vec<Spanned<Pattern>>,
    },
    /// `(a, b, _)`
    Tuple(Vec<Spanned<Pattern>>),
}

/// Literals allowed in pattern position.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternLit {
    Int(i64),
    Bool(bool),
    Str(String),
    Nil,
}
