//! Top-level items: module, functions, structs, enums, traits, impls, consts

use crate::ast_types::TypeAnn;
use crate::expressions::Expr;
use crate::infrastructure::Spanned;
use crate::statements::Stmt;

/// A translation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub items: Vec<Spanned<Item>>,
}

/// Top-level declarations
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Function(Function),
    Struct(StructDecl),
    Enum(EnumDecl),
    Trait(TraitDecl),
    Impl(ImplBlock),
    Const(ConstDecl),
}

/// A function declaration.
///
/// Methods are ordinary functions whose first parameter is named `self`;
/// the type checker fills in its annotation from the enclosing impl block.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: Spanned<String>,
    pub type_params: Vec<Spanned<String>>,
    pub params: Vec<Param>,
    pub ret: Option<Spanned<TypeAnn>>,
    pub body: Vec<Spanned<Stmt>>,
}

/// A function or method parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Spanned<String>,
    pub ty: Spanned<TypeAnn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: Spanned<String>,
    pub type_params: Vec<Spanned<String>>,
    pub fields: Vec<FieldDecl>,
    /// Public structs are the only declarations imported across modules.
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: Spanned<String>,
    pub ty: Spanned<TypeAnn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: Spanned<String>,
    pub type_params: Vec<Spanned<String>>,
    pub variants: Vec<VariantDecl>,
}

/// One enum variant; `payload` is empty for unit variants.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantDecl {
    pub name: Spanned<String>,
    pub payload: Vec<Spanned<TypeAnn>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitDecl {
    pub name: Spanned<String>,
    pub methods: Vec<MethodSig>,
}

/// A trait method signature (`self` receiver is implicit).
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSig {
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub ret: Option<Spanned<TypeAnn>>,
}

/// `impl Target { ... }` or `impl Trait for Target { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct ImplBlock {
    pub trait_name: Option<Spanned<String>>,
    pub target: Spanned<TypeAnn>,
    pub methods: Vec<Function>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstDecl {
    pub name: Spanned<String>,
    pub ty: Option<Spanned<TypeAnn>>,
    pub value: Spanned<Expr>,
}
