//! Statement AST nodes: Stmt, SpawnKind, SelectCase

use crate::ast_types::TypeAnn;
use crate::expressions::{Expr, IfClause};
use crate::infrastructure::Spanned;

/// Statements
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `let name: ty = value`
    Let {
        name: Spanned<String>,
        ty: Option<Spanned<TypeAnn>>,
        value: Spanned<Expr>,
    },
    /// Expression in statement position
    Expr(Spanned<Expr>),
    /// `return expr`
    Return(Option<Spanned<Expr>>),
    /// Statement form of `if` — no value required from the branches
    If {
        clauses: Vec<IfClause>,
        else_block: Option<Vec<Spanned<Stmt>>>,
    },
    /// `while cond { body }`
    While {
        cond: Spanned<Expr>,
        body: Vec<Spanned<Stmt>>,
    },
    /// `for var in iterable { body }`
    For {
        var: Spanned<String>,
        iterable: Spanned<Expr>,
        body: Vec<Spanned<Stmt>>,
    },
    /// `break` — targets the innermost loop
    Break,
    /// `continue` — targets the innermost loop
    Continue,
    /// `spawn ...` — detached thread
    Spawn(SpawnKind),
    /// `select { cases }` — channel polling loop
    Select { cases: Vec<SelectCase> },
}

/// The three surface forms of `spawn`.
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnKind {
    /// `spawn f(args)`
    Call(Spanned<Expr>),
    /// `spawn { body }`
    Block(Vec<Spanned<Stmt>>),
    /// `spawn fn(params) { body }(args)`
    FnLit {
        func: Spanned<Expr>,
        args: Vec<Spanned<Expr>>,
    },
}

/// One case of a `select` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectCase {
    pub op: SelectOp,
    pub body: Vec<Spanned<Stmt>>,
}

/// The channel operation a select case waits on.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectOp {
    /// `ch <- value`
    Send {
        channel: Spanned<Expr>,
        value: Spanned<Expr>,
    },
    /// `let binding = <-ch` (binding optional)
    Recv {
        channel: Spanned<Expr>,
        binding: Option<Spanned<String>>,
    },
}
