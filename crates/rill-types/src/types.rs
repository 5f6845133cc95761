//! Resolved types and the type table
//!
//! `ResolvedType` is the closed sum the type checker produces and the code
//! generator matches on exhaustively. The table maps AST node ids to their
//! resolved types; nodes synthesized during lowering carry no entry.

use std::collections::HashMap;
use std::fmt;

use rill_ast::{NodeId, Spanned};

/// Primitive type kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Void,
    Bool,
    I8,
    I16,
    I32,
    /// `int` in source; 64-bit signed
    Int,
    I128,
    U8,
    U16,
    U32,
    U64,
    U128,
    Usize,
    /// 64-bit IEEE float
    Float,
    Str,
    Nil,
}

impl Primitive {
    /// Source-level name, used in mangling and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Void => "void",
            Primitive::Bool => "bool",
            Primitive::I8 => "i8",
            Primitive::I16 => "i16",
            Primitive::I32 => "i32",
            Primitive::Int => "int",
            Primitive::I128 => "i128",
            Primitive::U8 => "u8",
            Primitive::U16 => "u16",
            Primitive::U32 => "u32",
            Primitive::U64 => "u64",
            Primitive::U128 => "u128",
            Primitive::Usize => "usize",
            Primitive::Float => "float",
            Primitive::Str => "string",
            Primitive::Nil => "nil",
        }
    }

    /// Parse a primitive-name string. `i64` is accepted as an alias of `int`.
    pub fn from_name(name: &str) -> Option<Primitive> {
        Some(match name {
            "void" => Primitive::Void,
            "bool" => Primitive::Bool,
            "i8" => Primitive::I8,
            "i16" => Primitive::I16,
            "i32" => Primitive::I32,
            "int" | "i64" => Primitive::Int,
            "i128" => Primitive::I128,
            "u8" => Primitive::U8,
            "u16" => Primitive::U16,
            "u32" => Primitive::U32,
            "u64" => Primitive::U64,
            "u128" => Primitive::U128,
            "usize" => Primitive::Usize,
            "float" | "f64" => Primitive::Float,
            "string" => Primitive::Str,
            "nil" => Primitive::Nil,
            _ => return None,
        })
    }

    /// True for all integer kinds (signedness included).
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Primitive::I8
                | Primitive::I16
                | Primitive::I32
                | Primitive::Int
                | Primitive::I128
                | Primitive::U8
                | Primitive::U16
                | Primitive::U32
                | Primitive::U64
                | Primitive::U128
                | Primitive::Usize
        )
    }
}

/// A struct shape: ordered fields plus declared type parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<(String, ResolvedType)>,
    pub type_params: Vec<String>,
}

/// An enum shape: ordered variants, each with an ordered payload list.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<(String, Vec<ResolvedType>)>,
    pub type_params: Vec<String>,
}

/// A trait shape: method signatures in declaration order.
///
/// Declaration order is load-bearing — it fixes vtable slot indices.
#[derive(Debug, Clone, PartialEq)]
pub struct TraitType {
    pub name: String,
    pub methods: Vec<TraitMethodSig>,
}

impl TraitType {
    /// Vtable slot index of a method, if the trait declares it.
    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }
}

/// A trait method signature. The `self` receiver is implicit and not part
/// of `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct TraitMethodSig {
    pub name: String,
    pub params: Vec<ResolvedType>,
    pub ret: Option<ResolvedType>,
}

/// A function type.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub receiver: Option<Box<ResolvedType>>,
    pub params: Vec<ResolvedType>,
    pub ret: Option<Box<ResolvedType>>,
    pub type_params: Vec<String>,
}

/// A fully resolved type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedType {
    Primitive(Primitive),
    Struct(StructType),
    Enum(EnumType),
    /// Fixed-length array: `[T; N]`
    Array { elem: Box<ResolvedType>, len: u64 },
    /// Growable slice (backs `Vec`)
    Slice(Box<ResolvedType>),
    Map {
        key: Box<ResolvedType>,
        value: Box<ResolvedType>,
    },
    Channel(Box<ResolvedType>),
    Function(FunctionType),
    Pointer(Box<ResolvedType>),
    Reference {
        inner: Box<ResolvedType>,
        mutable: bool,
    },
    Optional(Box<ResolvedType>),
    Tuple(Vec<ResolvedType>),
    /// By-name reference; the referent may still be unresolved for
    /// forward or cyclic struct references
    Named {
        name: String,
        referent: Option<Box<ResolvedType>>,
    },
    /// A generic struct/enum applied to concrete arguments
    GenericInstance {
        base: Box<ResolvedType>,
        args: Vec<ResolvedType>,
    },
    /// Unbound type parameter of the enclosing declaration
    TypeParam(String),
    Trait(TraitType),
    /// `dyn Trait` — one or more trait bounds
    Existential { bounds: Vec<TraitType> },
    /// `Base::Assoc` — must be resolved away before lowering
    Projected {
        base: Box<ResolvedType>,
        assoc: String,
    },
}

impl ResolvedType {
    /// Peel references and pointers down to the pointee.
    pub fn strip_refs(&self) -> &ResolvedType {
        match self {
            ResolvedType::Reference { inner, .. } | ResolvedType::Pointer(inner) => {
                inner.strip_refs()
            }
            other => other,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ResolvedType::Primitive(Primitive::Float))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ResolvedType::Primitive(p) if p.is_integer())
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ResolvedType::Primitive(Primitive::Str))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, ResolvedType::Primitive(Primitive::Void))
    }
}

impl fmt::Display for ResolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedType::Primitive(p) => f.write_str(p.name()),
            ResolvedType::Struct(s) => f.write_str(&s.name),
            ResolvedType::Enum(e) => f.write_str(&e.name),
            ResolvedType::Array { elem, len } => write!(f, "[{}; {}]", elem, len),
            ResolvedType::Slice(elem) => write!(f, "Vec[{}]", elem),
            ResolvedType::Map { key, value } => write!(f, "HashMap[{}, {}]", key, value),
            ResolvedType::Channel(elem) => write!(f, "Channel[{}]", elem),
            ResolvedType::Function(ft) => {
                write!(f, "fn(")?;
                for (i, p) in ft.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ")")?;
                if let Some(ret) = &ft.ret {
                    write!(f, " -> {}", ret)?;
                }
                Ok(())
            }
            ResolvedType::Pointer(inner) => write!(f, "*{}", inner),
            ResolvedType::Reference { inner, mutable } => {
                write!(f, "&{}{}", if *mutable { "mut " } else { "" }, inner)
            }
            ResolvedType::Optional(inner) => write!(f, "?{}", inner),
            ResolvedType::Tuple(elems) => {
                write!(f, "(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
            ResolvedType::Named { name, .. } => f.write_str(name),
            ResolvedType::GenericInstance { base, args } => {
                write!(f, "{}[", base)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, "]")
            }
            ResolvedType::TypeParam(name) => f.write_str(name),
            ResolvedType::Trait(t) => f.write_str(&t.name),
            ResolvedType::Existential { bounds } => {
                write!(f, "dyn ")?;
                for (i, b) in bounds.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    f.write_str(&b.name)?;
                }
                Ok(())
            }
            ResolvedType::Projected { base, assoc } => write!(f, "{}::{}", base, assoc),
        }
    }
}

/// Replace type parameters by the bindings in `subst`, recursively.
pub fn substitute_type(
    ty: &ResolvedType,
    subst: &HashMap<String, ResolvedType>,
) -> ResolvedType {
    match ty {
        ResolvedType::TypeParam(name) => subst
            .get(name)
            .cloned()
            .unwrap_or_else(|| ty.clone()),
        ResolvedType::Array { elem, len } => ResolvedType::Array {
            elem: Box::new(substitute_type(elem, subst)),
            len: *len,
        },
        ResolvedType::Slice(elem) => ResolvedType::Slice(Box::new(substitute_type(elem, subst))),
        ResolvedType::Map { key, value } => ResolvedType::Map {
            key: Box::new(substitute_type(key, subst)),
            value: Box::new(substitute_type(value, subst)),
        },
        ResolvedType::Channel(elem) => {
            ResolvedType::Channel(Box::new(substitute_type(elem, subst)))
        }
        ResolvedType::Pointer(inner) => {
            ResolvedType::Pointer(Box::new(substitute_type(inner, subst)))
        }
        ResolvedType::Reference { inner, mutable } => ResolvedType::Reference {
            inner: Box::new(substitute_type(inner, subst)),
            mutable: *mutable,
        },
        ResolvedType::Optional(inner) => {
            ResolvedType::Optional(Box::new(substitute_type(inner, subst)))
        }
        ResolvedType::Tuple(elems) => {
            ResolvedType::Tuple(elems.iter().map(|e| substitute_type(e, subst)).collect())
        }
        ResolvedType::GenericInstance { base, args } => ResolvedType::GenericInstance {
            base: Box::new(substitute_type(base, subst)),
            args: args.iter().map(|a| substitute_type(a, subst)).collect(),
        },
        ResolvedType::Function(ft) => ResolvedType::Function(FunctionType {
            receiver: ft
                .receiver
                .as_ref()
                .map(|r| Box::new(substitute_type(r, subst))),
            params: ft.params.iter().map(|p| substitute_type(p, subst)).collect(),
            ret: ft.ret.as_ref().map(|r| Box::new(substitute_type(r, subst))),
            type_params: ft.type_params.clone(),
        }),
        // Struct/enum shapes carry their fields already substituted by the
        // checker; everything else has nothing to substitute into.
        other => other.clone(),
    }
}

/// The type table: node identity to resolved type.
#[derive(Debug, Default)]
pub struct TypeTable {
    entries: HashMap<NodeId, ResolvedType>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: NodeId, ty: ResolvedType) {
        self.entries.insert(id, ty);
    }

    pub fn get(&self, id: NodeId) -> Option<&ResolvedType> {
        self.entries.get(&id)
    }

    /// Type of a spanned node, if recorded.
    pub fn of<T>(&self, node: &Spanned<T>) -> Option<&ResolvedType> {
        self.entries.get(&node.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn primitive_names_round_trip() {
        for p in [
            Primitive::Void,
            Primitive::Bool,
            Primitive::I8,
            Primitive::Int,
            Primitive::U128,
            Primitive::Usize,
            Primitive::Float,
            Primitive::Str,
            Primitive::Nil,
        ] {
            assert_eq!(Primitive::from_name(p.name()), Some(p));
        }
    }

    #[test]
    fn i64_aliases_int() {
        assert_eq!(Primitive::from_name("i64"), Some(Primitive::Int));
    }

    #[test]
    fn strip_refs_peels_nested_indirection() {
        let ty = ResolvedType::Reference {
            inner: Box::new(ResolvedType::Pointer(Box::new(ResolvedType::Primitive(
                Primitive::Int,
            )))),
            mutable: false,
        };
        assert_eq!(ty.strip_refs(), &ResolvedType::Primitive(Primitive::Int));
    }

    #[test]
    fn substitute_replaces_bound_params() {
        let mut subst = HashMap::new();
        subst.insert("T".to_string(), ResolvedType::Primitive(Primitive::Int));
        let ty = ResolvedType::Slice(Box::new(ResolvedType::TypeParam("T".to_string())));
        assert_eq!(
            substitute_type(&ty, &subst),
            ResolvedType::Slice(Box::new(ResolvedType::Primitive(Primitive::Int)))
        );
    }

    #[test]
    fn substitute_leaves_unbound_params() {
        let subst = HashMap::new();
        let ty = ResolvedType::TypeParam("U".to_string());
        assert_eq!(substitute_type(&ty, &subst), ty);
    }
}
