//! Shared harness for codegen integration tests
//!
//! There is no parser in this repository; tests build typed ASTs by hand.
//! `Ctx` owns the node-id source and the type table so a test can register
//! a node's resolved type as it constructs it.

#![allow(dead_code)]

use rill_ast::{
    Expr, Function, IdGen, Item, Module, Param, Span, Spanned, Stmt, TypeAnn,
};
use rill_codegen::CodeGenerator;
use rill_types::{Diagnostic, Primitive, ResolvedType, TypeTable};

pub struct Ctx {
    pub ids: IdGen,
    pub table: TypeTable,
}

impl Ctx {
    pub fn new() -> Self {
        Self {
            ids: IdGen::new(),
            table: TypeTable::new(),
        }
    }

    /// A node with a recorded resolved type.
    pub fn typed(&mut self, expr: Expr, ty: ResolvedType) -> Spanned<Expr> {
        let node = Spanned::new(expr, Span::default(), self.ids.next());
        self.table.insert(node.id, ty);
        node
    }

    /// A node the lowerer never asks the table about (literals, targets).
    pub fn untyped(&mut self, expr: Expr) -> Spanned<Expr> {
        Spanned::new(expr, Span::default(), self.ids.next())
    }

    pub fn stmt(&mut self, stmt: Stmt) -> Spanned<Stmt> {
        Spanned::new(stmt, Span::default(), self.ids.next())
    }

    pub fn item(&mut self, item: Item) -> Spanned<Item> {
        Spanned::new(item, Span::default(), self.ids.next())
    }

    pub fn name(&mut self, name: &str) -> Spanned<String> {
        Spanned::new(name.to_string(), Span::default(), self.ids.next())
    }

    pub fn ann(&mut self, ann: TypeAnn) -> Spanned<TypeAnn> {
        Spanned::new(ann, Span::default(), self.ids.next())
    }

    pub fn named_ann(&mut self, name: &str) -> Spanned<TypeAnn> {
        self.ann(TypeAnn::Named {
            name: name.to_string(),
            args: vec![],
        })
    }

    pub fn param(&mut self, name: &str, ann: TypeAnn) -> Param {
        Param {
            name: self.name(name),
            ty: self.ann(ann),
        }
    }

    /// `fn main() { body }`
    pub fn main_fn(&mut self, body: Vec<Spanned<Stmt>>) -> Spanned<Item> {
        let name = self.name("main");
        self.item(Item::Function(Function {
            name,
            type_params: vec![],
            params: vec![],
            ret: None,
            body,
        }))
    }
}

pub fn module(items: Vec<Spanned<Item>>) -> Module {
    Module {
        name: "test".to_string(),
        items,
    }
}

pub fn generate(ctx: &Ctx, module: &Module) -> (String, Vec<Diagnostic>) {
    let mut gen = CodeGenerator::new("test", &ctx.table);
    let ir = gen.generate_module(module, &[]);
    let diags = gen.take_diagnostics();
    (ir, diags)
}

// Shorthand resolved types.

pub fn int() -> ResolvedType {
    ResolvedType::Primitive(Primitive::Int)
}

pub fn boolean() -> ResolvedType {
    ResolvedType::Primitive(Primitive::Bool)
}

pub fn string() -> ResolvedType {
    ResolvedType::Primitive(Primitive::Str)
}

pub fn float() -> ResolvedType {
    ResolvedType::Primitive(Primitive::Float)
}

pub fn vec_of(elem: ResolvedType) -> ResolvedType {
    ResolvedType::GenericInstance {
        base: Box::new(ResolvedType::Named {
            name: "Vec".to_string(),
            referent: None,
        }),
        args: vec![elem],
    }
}
