//! End-to-end lowering scenarios
//!
//! Each test builds a small typed AST and asserts on the shape of the
//! emitted IR: enum payload extraction, constant folding, string
//! concatenation, iteration over a Vec, trait dispatch, and spawn with a
//! captured variable.

mod common;

use common::*;
use rill_ast::{
    EnumDecl, Expr, FieldDecl, Function, ImplBlock, Item, MatchArm, MethodSig, Pattern,
    Spanned, SpawnKind, Stmt, StructDecl, TraitDecl, TypeAnn, VariantDecl,
};
use rill_types::{EnumType, ResolvedType, StructType, TraitMethodSig, TraitType};

fn option_enum_ty() -> ResolvedType {
    ResolvedType::Enum(EnumType {
        name: "Option".to_string(),
        variants: vec![
            ("Some".to_string(), vec![int()]),
            ("None".to_string(), vec![]),
        ],
        type_params: vec![],
    })
}

#[test]
fn option_some_extraction() {
    let mut ctx = Ctx::new();

    let some_name = ctx.name("Some");
    let none_name = ctx.name("None");
    let int_ann = ctx.named_ann("int");
    let enum_name = ctx.name("Option");
    let enum_item = ctx.item(Item::Enum(EnumDecl {
        name: enum_name,
        type_params: vec![],
        variants: vec![
            VariantDecl {
                name: some_name,
                payload: vec![int_ann],
            },
            VariantDecl {
                name: none_name,
                payload: vec![],
            },
        ],
    }));

    // match Option::Some(42) { Option::Some(v) => v, Option::None => 0 }
    let qualifier = ctx.name("Option");
    let member = ctx.name("Some");
    let callee = ctx.untyped(Expr::Path { qualifier, member });
    let forty_two = ctx.untyped(Expr::Int(42));
    let subject = ctx.typed(
        Expr::Call {
            callee: Box::new(callee),
            args: vec![forty_two],
        },
        option_enum_ty(),
    );

    let v_pat_enum = ctx.name("Option");
    let v_pat_var = ctx.name("Some");
    let v_binding = Spanned::synth(Pattern::Binding("v".to_string()));
    let some_pattern = Spanned::synth(Pattern::Variant {
        enum_name: v_pat_enum,
        variant: v_pat_var,
        bindings: vec![v_binding],
    });
    let some_body = ctx.typed(Expr::Ident("v".to_string()), int());

    let n_pat_enum = ctx.name("Option");
    let n_pat_var = ctx.name("None");
    let none_pattern = Spanned::synth(Pattern::Variant {
        enum_name: n_pat_enum,
        variant: n_pat_var,
        bindings: vec![],
    });
    let none_body = ctx.typed(Expr::Int(0), int());

    let match_expr = ctx.typed(
        Expr::Match {
            subject: Box::new(subject),
            arms: vec![
                MatchArm {
                    pattern: some_pattern,
                    body: some_body,
                },
                MatchArm {
                    pattern: none_pattern,
                    body: none_body,
                },
            ],
        },
        int(),
    );
    let y = ctx.name("y");
    let let_stmt = ctx.stmt(Stmt::Let {
        name: y,
        ty: None,
        value: match_expr,
    });

    let main = ctx.main_fn(vec![let_stmt]);
    let (ir, diags) = generate(&ctx, &module(vec![enum_item, main]));

    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    assert!(ir.contains("%enum.Option = type { i64, i8* }"), "{}", ir);
    assert!(
        ir.contains("getelementptr inbounds %enum.Option"),
        "{}",
        ir
    );
    // Some is variant 0.
    assert!(ir.contains("icmp eq i64"), "{}", ir);
    assert!(ir.contains(", 0"), "{}", ir);
    // Payload comes back through a bitcast of the i8* cell.
    assert!(ir.contains("bitcast i8*"), "{}", ir);
    assert!(ir.contains("store i64 42"), "{}", ir);
}

#[test]
fn arithmetic_folds_to_a_single_store() {
    let mut ctx = Ctx::new();

    // let x = 2 + 3 * 4
    let three = ctx.untyped(Expr::Int(3));
    let four = ctx.untyped(Expr::Int(4));
    let mul = ctx.typed(
        Expr::Infix {
            op: rill_ast::BinOp::Mul,
            left: Box::new(three),
            right: Box::new(four),
        },
        int(),
    );
    let two = ctx.untyped(Expr::Int(2));
    let sum = ctx.typed(
        Expr::Infix {
            op: rill_ast::BinOp::Add,
            left: Box::new(two),
            right: Box::new(mul),
        },
        int(),
    );
    let x = ctx.name("x");
    let let_stmt = ctx.stmt(Stmt::Let {
        name: x,
        ty: None,
        value: sum,
    });
    let main = ctx.main_fn(vec![let_stmt]);
    let (ir, diags) = generate(&ctx, &module(vec![main]));

    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    assert!(ir.contains("store i64 14, i64* %x"), "{}", ir);
    assert!(!ir.contains("= add"), "folded add leaked: {}", ir);
    assert!(!ir.contains("= mul"), "folded mul leaked: {}", ir);
}

#[test]
fn string_concat_feeds_println() {
    let mut ctx = Ctx::new();

    // let name = "world"; println("Hello, " + name)
    let world = ctx.typed(Expr::Str("world".to_string()), string());
    let name = ctx.name("name");
    let let_stmt = ctx.stmt(Stmt::Let {
        name,
        ty: None,
        value: world,
    });

    let hello = ctx.typed(Expr::Str("Hello, ".to_string()), string());
    let name_ref = ctx.typed(Expr::Ident("name".to_string()), string());
    let concat = ctx.typed(
        Expr::Infix {
            op: rill_ast::BinOp::Add,
            left: Box::new(hello),
            right: Box::new(name_ref),
        },
        string(),
    );
    let println_callee = ctx.untyped(Expr::Ident("println".to_string()));
    let call = ctx.untyped(Expr::Call {
        callee: Box::new(println_callee),
        args: vec![concat],
    });
    let call_stmt = ctx.stmt(Stmt::Expr(call));

    let main = ctx.main_fn(vec![let_stmt, call_stmt]);
    let (ir, diags) = generate(&ctx, &module(vec![main]));

    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    assert!(
        ir.contains("call %String* @runtime_string_concat(%String*"),
        "{}",
        ir
    );
    assert!(
        ir.contains("call void @runtime_println_string(%String*"),
        "{}",
        ir
    );
}

#[test]
fn for_over_vec_uses_slice_runtime() {
    let mut ctx = Ctx::new();

    // let vec: Vec[int] = Vec::new(); for i in vec { println(i) }
    let int_arg = ctx.named_ann("int");
    let vec_ann = ctx.ann(TypeAnn::Named {
        name: "Vec".to_string(),
        args: vec![int_arg],
    });
    let qualifier = ctx.name("Vec");
    let member = ctx.name("new");
    let callee = ctx.untyped(Expr::Path { qualifier, member });
    let new_call = ctx.typed(
        Expr::Call {
            callee: Box::new(callee),
            args: vec![],
        },
        vec_of(int()),
    );
    let vec_name = ctx.name("vec");
    let let_stmt = ctx.stmt(Stmt::Let {
        name: vec_name,
        ty: Some(vec_ann),
        value: new_call,
    });

    let iterable = ctx.typed(Expr::Ident("vec".to_string()), vec_of(int()));
    let i_ref = ctx.typed(Expr::Ident("i".to_string()), int());
    let println_callee = ctx.untyped(Expr::Ident("println".to_string()));
    let println_call = ctx.untyped(Expr::Call {
        callee: Box::new(println_callee),
        args: vec![i_ref],
    });
    let body_stmt = ctx.stmt(Stmt::Expr(println_call));
    let i_name = ctx.name("i");
    let for_stmt = ctx.stmt(Stmt::For {
        var: i_name,
        iterable,
        body: vec![body_stmt],
    });

    let main = ctx.main_fn(vec![let_stmt, for_stmt]);
    let (ir, diags) = generate(&ctx, &module(vec![main]));

    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    assert!(ir.contains("%struct.Vec_int = type { %Slice* }"), "{}", ir);
    assert!(
        ir.contains("getelementptr inbounds %struct.Vec_int, %struct.Vec_int*"),
        "{}",
        ir
    );
    assert!(ir.contains("call i64 @runtime_slice_len(%Slice*"), "{}", ir);
    assert!(ir.contains("call i8* @runtime_slice_get(%Slice*"), "{}", ir);
    assert!(ir.contains("call void @runtime_println_i64(i64"), "{}", ir);
}

#[test]
fn trait_dispatch_through_vtable() {
    let mut ctx = Ctx::new();

    let display_trait = TraitType {
        name: "Display".to_string(),
        methods: vec![TraitMethodSig {
            name: "display".to_string(),
            params: vec![],
            ret: Some(string()),
        }],
    };

    // trait Display { fn display(&self) -> string }
    let self_ann = {
        let inner = ctx.named_ann("MyInt");
        ctx.ann(TypeAnn::Ref {
            inner: Box::new(inner),
            mutable: false,
        })
    };
    let method_name = ctx.name("display");
    let ret_ann = ctx.named_ann("string");
    let self_param = rill_ast::Param {
        name: ctx.name("self"),
        ty: self_ann,
    };
    let trait_name = ctx.name("Display");
    let trait_item = ctx.item(Item::Trait(TraitDecl {
        name: trait_name,
        methods: vec![MethodSig {
            name: method_name,
            params: vec![self_param],
            ret: Some(ret_ann),
        }],
    }));

    // struct MyInt { value: int }
    let field_name = ctx.name("value");
    let field_ann = ctx.named_ann("int");
    let struct_name = ctx.name("MyInt");
    let struct_item = ctx.item(Item::Struct(StructDecl {
        name: struct_name,
        type_params: vec![],
        fields: vec![FieldDecl {
            name: field_name,
            ty: field_ann,
        }],
        is_public: false,
    }));

    // impl Display for MyInt { fn display(self) -> string { return "x" } }
    let impl_self_ann = {
        let inner = ctx.named_ann("MyInt");
        ctx.ann(TypeAnn::Ref {
            inner: Box::new(inner),
            mutable: false,
        })
    };
    let impl_self = rill_ast::Param {
        name: ctx.name("self"),
        ty: impl_self_ann,
    };
    let lit = ctx.typed(Expr::Str("x".to_string()), string());
    let ret_stmt = ctx.stmt(Stmt::Return(Some(lit)));
    let impl_method_name = ctx.name("display");
    let impl_ret_ann = ctx.named_ann("string");
    let impl_target = ctx.named_ann("MyInt");
    let impl_trait_name = ctx.name("Display");
    let impl_item = ctx.item(Item::Impl(ImplBlock {
        trait_name: Some(impl_trait_name),
        target: impl_target,
        methods: vec![Function {
            name: impl_method_name,
            type_params: vec![],
            params: vec![impl_self],
            ret: Some(impl_ret_ann),
            body: vec![ret_stmt],
        }],
    }));

    // let d: Display = MyInt { value: 1 }; d.display()
    let my_int_ty = ResolvedType::Struct(StructType {
        name: "MyInt".to_string(),
        fields: vec![("value".to_string(), int())],
        type_params: vec![],
    });
    let one = ctx.untyped(Expr::Int(1));
    let lit_field_name = ctx.name("value");
    let lit_name = ctx.name("MyInt");
    let struct_lit = ctx.typed(
        Expr::StructLit {
            name: lit_name,
            fields: vec![(lit_field_name, one)],
        },
        my_int_ty,
    );
    let display_ann = ctx.named_ann("Display");
    let d_name = ctx.name("d");
    let let_stmt = ctx.stmt(Stmt::Let {
        name: d_name,
        ty: Some(display_ann),
        value: struct_lit,
    });

    let d_ref = ctx.typed(
        Expr::Ident("d".to_string()),
        ResolvedType::Existential {
            bounds: vec![display_trait],
        },
    );
    let method = ctx.name("display");
    let call_target = ctx.untyped(Expr::Field {
        object: Box::new(d_ref),
        field: method,
    });
    let call = ctx.typed(
        Expr::Call {
            callee: Box::new(call_target),
            args: vec![],
        },
        string(),
    );
    let call_stmt = ctx.stmt(Stmt::Expr(call));

    let main = ctx.main_fn(vec![let_stmt, call_stmt]);
    let (ir, diags) = generate(
        &ctx,
        &module(vec![trait_item, struct_item, impl_item, main]),
    );

    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    assert!(
        ir.contains("%vtable.Display = type { i8* }"),
        "one slot for one method: {}",
        ir
    );
    assert!(
        ir.contains("%Existential.Display = type { i8*, %vtable.Display* }"),
        "{}",
        ir
    );
    assert!(
        ir.contains("@vtable.Display.for.MyInt = global %vtable.Display"),
        "{}",
        ir
    );
    assert!(ir.contains("@MyInt_display"), "{}", ir);
    // The dynamic call loads the slot and casts to the full signature.
    assert!(
        ir.contains("getelementptr inbounds %vtable.Display, %vtable.Display*"),
        "{}",
        ir
    );
    assert!(ir.contains("to %String* (i8*)*"), "{}", ir);
}

#[test]
fn spawn_with_capture_packs_and_detaches() {
    let mut ctx = Ctx::new();

    // let n = 10; spawn { println(n) }
    let ten = ctx.typed(Expr::Int(10), int());
    let n_name = ctx.name("n");
    let let_stmt = ctx.stmt(Stmt::Let {
        name: n_name,
        ty: None,
        value: ten,
    });

    let n_ref = ctx.typed(Expr::Ident("n".to_string()), int());
    let println_callee = ctx.untyped(Expr::Ident("println".to_string()));
    let call = ctx.untyped(Expr::Call {
        callee: Box::new(println_callee),
        args: vec![n_ref],
    });
    let body_stmt = ctx.stmt(Stmt::Expr(call));
    let spawn_stmt = ctx.stmt(Stmt::Spawn(SpawnKind::Block(vec![body_stmt])));

    let main = ctx.main_fn(vec![let_stmt, spawn_stmt]);
    let (ir, diags) = generate(&ctx, &module(vec![main]));

    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);

    // Wrapper lives in the globals bucket, after the separator.
    let sep = ir.find("; ---- module globals ----").unwrap();
    let globals = &ir[sep..];
    assert!(
        globals.contains("define i8* @spawn_wrapper_block_"),
        "{}",
        ir
    );
    assert!(globals.contains("call void @runtime_println_i64(i64"), "{}", ir);

    // Caller packs one i64 and launches a detached thread.
    let body = &ir[..sep];
    assert!(body.contains("call i8* @runtime_alloc(i64 8)"), "{}", ir);
    assert!(body.contains("call i32 @pthread_create(i64*"), "{}", ir);
    assert!(body.contains("call i32 @pthread_detach(i64"), "{}", ir);
}
