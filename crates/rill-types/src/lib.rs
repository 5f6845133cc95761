//! Rill resolved-type model
//!
//! The output side of the type checker: resolved types, the node-id-keyed
//! type table the code generator consumes, the pure name mangler, and the
//! diagnostic model shared by all compiler phases.

mod mangle;
mod report;
mod types;

pub use mangle::{
    mangle_method, mangle_name, mangle_qualified, mangle_type, sanitize,
};
pub use report::{Diagnostic, DiagnosticCode, ErrorReporter, Phase, Severity};
pub use types::{
    substitute_type, EnumType, FunctionType, Primitive, ResolvedType, StructType, TraitMethodSig,
    TraitType, TypeTable,
};
