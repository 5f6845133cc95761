//! Error paths: diagnostics accumulate, lowering keeps going
//!
//! Covers undefined variables with spell-check suggestions, control-flow
//! misuse, bad fields, unsupported iterables, and the
//! multiple-diagnostics-per-run policy.

mod common;

use common::*;
use rill_ast::{BinOp, Expr, FieldDecl, Item, Stmt, StructDecl};
use rill_types::{DiagnosticCode, ResolvedType, StructType};

#[test]
fn undefined_variable_gets_a_suggestion() {
    let mut ctx = Ctx::new();

    // let counter = 10; counter misspelled as couner
    let ten = ctx.typed(Expr::Int(10), int());
    let counter = ctx.name("counter");
    let let_stmt = ctx.stmt(Stmt::Let {
        name: counter,
        ty: None,
        value: ten,
    });
    let typo = ctx.typed(Expr::Ident("couner".to_string()), int());
    let typo_stmt = ctx.stmt(Stmt::Expr(typo));

    let main = ctx.main_fn(vec![let_stmt, typo_stmt]);
    let (_, diags) = generate(&ctx, &module(vec![main]));

    assert_eq!(diags.len(), 1, "{:?}", diags);
    assert_eq!(diags[0].code, DiagnosticCode::CodeGenUndefinedVariable);
    assert!(diags[0].message.contains("couner"));
    let suggestion = diags[0].suggestion.as_deref().unwrap_or("");
    assert!(suggestion.contains("counter"), "got: {:?}", diags[0]);
}

#[test]
fn break_outside_loop_is_a_control_flow_error() {
    let mut ctx = Ctx::new();
    let break_stmt = ctx.stmt(Stmt::Break);
    let main = ctx.main_fn(vec![break_stmt]);
    let (ir, diags) = generate(&ctx, &module(vec![main]));

    assert_eq!(diags.len(), 1, "{:?}", diags);
    assert_eq!(diags[0].code, DiagnosticCode::CodeGenControlFlowError);
    assert!(diags[0].message.contains("break"));
    // The function still closes properly.
    assert!(ir.contains("define i32 @main()"));
    assert!(ir.contains("ret i32 0"));
}

#[test]
fn continue_outside_loop_is_a_control_flow_error() {
    let mut ctx = Ctx::new();
    let continue_stmt = ctx.stmt(Stmt::Continue);
    let main = ctx.main_fn(vec![continue_stmt]);
    let (_, diags) = generate(&ctx, &module(vec![main]));

    assert_eq!(diags.len(), 1, "{:?}", diags);
    assert_eq!(diags[0].code, DiagnosticCode::CodeGenControlFlowError);
}

#[test]
fn unknown_field_suggests_the_real_one() {
    let mut ctx = Ctx::new();

    // struct Point { x: int, y: int }
    let x_field = ctx.name("x");
    let x_ann = ctx.named_ann("int");
    let y_field = ctx.name("y");
    let y_ann = ctx.named_ann("int");
    let point_name = ctx.name("Point");
    let struct_item = ctx.item(Item::Struct(StructDecl {
        name: point_name,
        type_params: vec![],
        fields: vec![
            FieldDecl {
                name: x_field,
                ty: x_ann,
            },
            FieldDecl {
                name: y_field,
                ty: y_ann,
            },
        ],
        is_public: false,
    }));

    let point_ty = ResolvedType::Struct(StructType {
        name: "Point".to_string(),
        fields: vec![("x".to_string(), int()), ("y".to_string(), int())],
        type_params: vec![],
    });

    // let p = Point { x: 1, y: 2 }; p.z
    let one = ctx.untyped(Expr::Int(1));
    let two = ctx.untyped(Expr::Int(2));
    let lit_x = ctx.name("x");
    let lit_y = ctx.name("y");
    let lit_name = ctx.name("Point");
    let lit = ctx.typed(
        Expr::StructLit {
            name: lit_name,
            fields: vec![(lit_x, one), (lit_y, two)],
        },
        point_ty.clone(),
    );
    let p_name = ctx.name("p");
    let let_stmt = ctx.stmt(Stmt::Let {
        name: p_name,
        ty: None,
        value: lit,
    });

    let p_ref = ctx.typed(Expr::Ident("p".to_string()), point_ty);
    let z = ctx.name("z");
    let access = ctx.typed(
        Expr::Field {
            object: Box::new(p_ref),
            field: z,
        },
        int(),
    );
    let access_stmt = ctx.stmt(Stmt::Expr(access));

    let main = ctx.main_fn(vec![let_stmt, access_stmt]);
    let (_, diags) = generate(&ctx, &module(vec![struct_item, main]));

    assert_eq!(diags.len(), 1, "{:?}", diags);
    assert_eq!(diags[0].code, DiagnosticCode::CodeGenFieldNotFound);
    assert!(diags[0].message.contains("z"));
}

#[test]
fn for_over_non_iterable_reports_unsupported() {
    let mut ctx = Ctx::new();

    let n = ctx.typed(Expr::Int(3), int());
    let n_name = ctx.name("n");
    let let_stmt = ctx.stmt(Stmt::Let {
        name: n_name,
        ty: None,
        value: n,
    });
    let iterable = ctx.typed(Expr::Ident("n".to_string()), int());
    let i_name = ctx.name("i");
    let for_stmt = ctx.stmt(Stmt::For {
        var: i_name,
        iterable,
        body: vec![],
    });

    let main = ctx.main_fn(vec![let_stmt, for_stmt]);
    let (_, diags) = generate(&ctx, &module(vec![main]));

    assert_eq!(diags.len(), 1, "{:?}", diags);
    assert_eq!(diags[0].code, DiagnosticCode::CodeGenUnsupportedStmt);
}

#[test]
fn one_run_surfaces_multiple_diagnostics() {
    let mut ctx = Ctx::new();

    // Three independent errors in one function.
    let bad1 = ctx.typed(Expr::Ident("missing1".to_string()), int());
    let s1 = ctx.stmt(Stmt::Expr(bad1));
    let s2 = ctx.stmt(Stmt::Break);
    let bad2 = ctx.typed(Expr::Ident("missing2".to_string()), int());
    let s3 = ctx.stmt(Stmt::Expr(bad2));

    let main = ctx.main_fn(vec![s1, s2, s3]);
    let (_, diags) = generate(&ctx, &module(vec![main]));

    assert_eq!(diags.len(), 3, "{:?}", diags);
    assert_eq!(diags[0].code, DiagnosticCode::CodeGenUndefinedVariable);
    assert_eq!(diags[1].code, DiagnosticCode::CodeGenControlFlowError);
    assert_eq!(diags[2].code, DiagnosticCode::CodeGenUndefinedVariable);
}

#[test]
fn division_by_literal_zero_defers_to_runtime() {
    let mut ctx = Ctx::new();

    // let x = 1 / 0 — the folder refuses, sdiv is emitted.
    let one = ctx.typed(Expr::Int(1), int());
    let zero = ctx.typed(Expr::Int(0), int());
    let div = ctx.typed(
        Expr::Infix {
            op: BinOp::Div,
            left: Box::new(one),
            right: Box::new(zero),
        },
        int(),
    );
    let x = ctx.name("x");
    let let_stmt = ctx.stmt(Stmt::Let {
        name: x,
        ty: None,
        value: div,
    });
    let main = ctx.main_fn(vec![let_stmt]);
    let (ir, diags) = generate(&ctx, &module(vec![main]));

    assert!(diags.is_empty(), "{:?}", diags);
    assert!(ir.contains("sdiv i64 1, 0"), "{}", ir);
}
