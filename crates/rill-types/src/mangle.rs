//! Name mangling for IR symbols
//!
//! Pure functions from resolved types to symbol fragments. The rules must
//! be stable across runs and injective over distinct concrete
//! instantiations; the code generator leans on both properties when it
//! deduplicates monomorphized functions and vtable globals.

use crate::types::ResolvedType;

/// Make an identifier safe for LLVM symbol position.
///
/// Letters, digits, `_` and `.` survive; every other code point becomes
/// `_`. A leading digit is prefixed with `_`; the empty string becomes `_`.
pub fn sanitize(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(name.len() + 1);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            if i == 0 && c.is_ascii_digit() {
                out.push('_');
            }
            out.push(c);
        } else {
            out.push('_');
        }
    }
    out
}

/// Mangle a single type for use inside a symbol name.
pub fn mangle_type(ty: &ResolvedType) -> String {
    match ty {
        ResolvedType::Primitive(p) => p.name().to_string(),
        ResolvedType::Struct(s) => sanitize(&s.name),
        ResolvedType::Enum(e) => sanitize(&e.name),
        ResolvedType::Array { elem, len } => format!("Array_{}_{}", mangle_type(elem), len),
        ResolvedType::Slice(elem) => format!("Slice_{}", mangle_type(elem)),
        ResolvedType::Map { key, value } => {
            format!("Map_{}_{}", mangle_type(key), mangle_type(value))
        }
        ResolvedType::Channel(elem) => format!("Chan_{}", mangle_type(elem)),
        ResolvedType::Function(ft) => {
            let mut parts = vec![format!("Fn{}", ft.params.len())];
            parts.extend(ft.params.iter().map(mangle_type));
            if let Some(ret) = &ft.ret {
                parts.push(mangle_type(ret));
            }
            parts.join("_")
        }
        ResolvedType::Pointer(inner) => format!("Ptr_{}", mangle_type(inner)),
        ResolvedType::Reference { inner, .. } => format!("Ref_{}", mangle_type(inner)),
        ResolvedType::Optional(inner) => format!("Opt_{}", mangle_type(inner)),
        ResolvedType::Tuple(elems) => {
            let mut parts = vec![format!("Tuple{}", elems.len())];
            parts.extend(elems.iter().map(mangle_type));
            parts.join("_")
        }
        ResolvedType::Named { name, referent } => match referent {
            Some(inner) => mangle_type(inner),
            None => sanitize(name),
        },
        ResolvedType::GenericInstance { base, args } => {
            let mut parts = vec![mangle_type(base)];
            parts.extend(args.iter().map(mangle_type));
            parts.join("_")
        }
        ResolvedType::TypeParam(name) => sanitize(name),
        ResolvedType::Trait(t) => sanitize(&t.name),
        ResolvedType::Existential { bounds } => {
            let mut parts = vec!["Dyn".to_string()];
            parts.extend(bounds.iter().map(|b| sanitize(&b.name)));
            parts.join("_")
        }
        ResolvedType::Projected { base, assoc } => {
            format!("{}_{}", mangle_type(base), sanitize(assoc))
        }
    }
}

/// Mangle a function name with its concrete type arguments.
pub fn mangle_name(base: &str, type_args: &[ResolvedType]) -> String {
    if type_args.is_empty() {
        sanitize(base)
    } else {
        let mut parts = vec![sanitize(base)];
        parts.extend(type_args.iter().map(mangle_type));
        parts.join("_")
    }
}

/// Mangle a method symbol: `<receiver>_<method>`.
///
/// References and pointers on the receiver are stripped first, so
/// `&MyInt` and `MyInt` name the same function.
pub fn mangle_method(receiver: &ResolvedType, method: &str) -> String {
    format!("{}_{}", mangle_type(receiver.strip_refs()), sanitize(method))
}

/// Mangle a module-qualified function: `<module>_<function>`.
pub fn mangle_qualified(module: &str, function: &str) -> String {
    format!("{}_{}", sanitize(module), sanitize(function))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Primitive, StructType};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn named(name: &str) -> ResolvedType {
        ResolvedType::Named {
            name: name.to_string(),
            referent: None,
        }
    }

    #[test]
    fn sanitize_replaces_foreign_chars() {
        assert_eq!(sanitize("foo<bar>"), "foo_bar_");
        assert_eq!(sanitize("a::b"), "a__b");
        assert_eq!(sanitize("x.y_z9"), "x.y_z9");
    }

    #[test]
    fn sanitize_guards_leading_digit_and_empty() {
        assert_eq!(sanitize("9lives"), "_9lives");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn generic_instance_mangles_recursively() {
        let vec_of_pairs = ResolvedType::GenericInstance {
            base: Box::new(named("Vec")),
            args: vec![ResolvedType::GenericInstance {
                base: Box::new(named("Pair")),
                args: vec![
                    ResolvedType::Primitive(Primitive::Int),
                    ResolvedType::Primitive(Primitive::Str),
                ],
            }],
        };
        assert_eq!(mangle_type(&vec_of_pairs), "Vec_Pair_int_string");
    }

    #[test]
    fn method_receiver_strips_indirection() {
        let recv = ResolvedType::Reference {
            inner: Box::new(ResolvedType::Struct(StructType {
                name: "MyInt".to_string(),
                fields: vec![],
                type_params: vec![],
            })),
            mutable: false,
        };
        assert_eq!(mangle_method(&recv, "display"), "MyInt_display");
    }

    #[test]
    fn collection_prefixes() {
        let int = ResolvedType::Primitive(Primitive::Int);
        assert_eq!(
            mangle_type(&ResolvedType::Slice(Box::new(int.clone()))),
            "Slice_int"
        );
        assert_eq!(
            mangle_type(&ResolvedType::Map {
                key: Box::new(ResolvedType::Primitive(Primitive::Str)),
                value: Box::new(int.clone()),
            }),
            "Map_string_int"
        );
        assert_eq!(
            mangle_type(&ResolvedType::Optional(Box::new(int.clone()))),
            "Opt_int"
        );
        assert_eq!(
            mangle_type(&ResolvedType::Array {
                elem: Box::new(int),
                len: 4
            }),
            "Array_int_4"
        );
    }

    #[test]
    fn signedness_stays_distinct() {
        let a = mangle_name("id", &[ResolvedType::Primitive(Primitive::Int)]);
        let b = mangle_name("id", &[ResolvedType::Primitive(Primitive::U64)]);
        assert_ne!(a, b);
    }

    // Type arguments as they occur in real instantiations: primitives and
    // one collection level over primitives. On this domain the joined
    // mangling is prefix-decodable, hence injective.
    fn arb_type_arg() -> impl Strategy<Value = ResolvedType> {
        let prim = prop_oneof![
            Just(ResolvedType::Primitive(Primitive::Int)),
            Just(ResolvedType::Primitive(Primitive::Bool)),
            Just(ResolvedType::Primitive(Primitive::Str)),
            Just(ResolvedType::Primitive(Primitive::Float)),
            Just(ResolvedType::Primitive(Primitive::U32)),
        ];
        prop_oneof![
            prim.clone(),
            prim.clone().prop_map(|t| ResolvedType::Slice(Box::new(t))),
            prim.clone()
                .prop_map(|t| ResolvedType::Optional(Box::new(t))),
            (prim.clone(), prim).prop_map(|(k, v)| ResolvedType::Map {
                key: Box::new(k),
                value: Box::new(v),
            }),
        ]
    }

    proptest! {
        #[test]
        fn mangled_symbols_are_sanitized(
            name in "[A-Za-z<>:#@ ]{0,12}",
            args in proptest::collection::vec(arb_type_arg(), 0..4),
        ) {
            let sym = mangle_name(&name, &args);
            prop_assert!(!sym.is_empty());
            prop_assert!(sym
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.'));
        }

        #[test]
        fn distinct_instantiations_do_not_collide(
            base in "[a-z][a-z0-9]{0,5}",
            a in proptest::collection::vec(arb_type_arg(), 0..4),
            b in proptest::collection::vec(arb_type_arg(), 0..4),
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(mangle_name(&base, &a), mangle_name(&base, &b));
        }
    }
}
