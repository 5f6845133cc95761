//! Rill Abstract Syntax Tree
//!
//! Node definitions shared by the type checker and the code generator.
//! Every node is wrapped in [`Spanned`], which carries a byte span and the
//! [`NodeId`] the type checker keys its type table on.

mod ast_types;
mod expressions;
mod infrastructure;
mod items;
mod operators;
mod patterns;
mod statements;

pub use ast_types::TypeAnn;
pub use expressions::{Expr, IfClause, MatchArm};
pub use infrastructure::{IdGen, NodeId, Span, Spanned};
pub use items::{
    ConstDecl, EnumDecl, FieldDecl, Function, ImplBlock, Item, MethodSig, Module, Param,
    StructDecl, TraitDecl, VariantDecl,
};
pub use operators::{BinOp, UnaryOp};
pub use patterns::{Pattern, PatternLit};
pub use statements::{SelectCase, SelectOp, SpawnKind, Stmt};
