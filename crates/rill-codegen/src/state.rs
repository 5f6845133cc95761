//! Internal state structures for code generation
//!
//! Mutable generator state grouped by purpose: type registries, the
//! current-function context, the string constant pool, and the vtable
//! registry.

use std::collections::{HashMap, HashSet};

use rill_types::{ResolvedType, TraitMethodSig};

/// Registered function signature, keyed by surface name.
#[derive(Debug, Clone)]
pub(crate) struct FunctionInfo {
    /// IR symbol name (mangled)
    pub symbol: String,
    pub params: Vec<(String, ResolvedType)>,
    pub ret: Option<ResolvedType>,
    pub type_params: Vec<String>,
}

/// Registered struct shape. Field index is the position in `fields`.
#[derive(Debug, Clone)]
pub(crate) struct StructInfo {
    /// Mangled name as it appears in `%struct.<name>`
    pub name: String,
    pub fields: Vec<(String, ResolvedType)>,
}

impl StructInfo {
    pub(crate) fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == field)
    }
}

/// Registered enum shape. Variant tag is the position in `variants`.
#[derive(Debug, Clone)]
pub(crate) struct EnumInfo {
    pub name: String,
    pub variants: Vec<(String, Vec<ResolvedType>)>,
    pub type_params: Vec<String>,
}

impl EnumInfo {
    pub(crate) fn variant_index(&self, variant: &str) -> Option<usize> {
        self.variants.iter().position(|(n, _)| n == variant)
    }
}

/// Registered module-level constant.
#[derive(Debug, Clone)]
pub(crate) struct ConstInfo {
    pub symbol: String,
    pub ty: ResolvedType,
}

/// Type definitions registry — functions, structs, enums, constants.
///
/// The first registration of a struct name wins; later duplicates are
/// ignored.
#[derive(Debug, Default)]
pub(crate) struct TypeRegistry {
    pub functions: HashMap<String, FunctionInfo>,
    pub structs: HashMap<String, StructInfo>,
    pub enums: HashMap<String, EnumInfo>,
    pub constants: HashMap<String, ConstInfo>,
    /// Generic struct/enum templates by base name, for instance expansion
    pub struct_templates: HashMap<String, StructInfo>,
    pub enum_templates: HashMap<String, EnumInfo>,
    /// Template type parameter lists by base name
    pub struct_template_params: HashMap<String, Vec<String>>,
}

impl TypeRegistry {
    /// Register a struct shape unless the name is already taken.
    pub(crate) fn add_struct(&mut self, info: StructInfo) {
        self.structs.entry(info.name.clone()).or_insert(info);
    }

    pub(crate) fn add_enum(&mut self, info: EnumInfo) {
        self.enums.entry(info.name.clone()).or_insert(info);
    }
}

/// A local variable: its resolved type and the register holding the
/// address of its stack slot.
#[derive(Debug, Clone)]
pub(crate) struct LocalVar {
    pub ty: ResolvedType,
    pub addr: String,
}

/// A function parameter: incoming SSA value, no stack slot.
#[derive(Debug, Clone)]
pub(crate) struct ParamInfo {
    pub name: String,
    pub ty: ResolvedType,
    pub register: String,
}

/// Break/continue targets of one loop.
#[derive(Debug, Clone)]
pub(crate) struct LoopLabels {
    pub break_label: String,
    pub continue_label: String,
}

/// Current function compilation context — locals, params, loop stack.
#[derive(Debug, Default)]
pub(crate) struct FunctionContext {
    pub current_function: Option<String>,
    pub current_return_type: Option<ResolvedType>,
    pub params: Vec<ParamInfo>,
    /// Type parameters of the enclosing function (erased to `i8*`)
    pub type_params: HashSet<String>,
    pub locals: HashMap<String, LocalVar>,
    pub loop_stack: Vec<LoopLabels>,
    /// Local slot names already handed out, for shadowing
    pub used_slot_names: HashSet<String>,
}

impl FunctionContext {
    pub(crate) fn param(&self, name: &str) -> Option<&ParamInfo> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// String constant pool — dedupes by content, names by module prefix.
#[derive(Debug, Default)]
pub(crate) struct StringPool {
    /// content -> emitted global name; doubles as the dedup set
    interned: HashMap<String, String>,
    counter: usize,
    prefix: String,
}

impl StringPool {
    pub(crate) fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            ..Self::default()
        }
    }

    /// Existing global for this content, if any.
    pub(crate) fn lookup(&self, content: &str) -> Option<&String> {
        self.interned.get(content)
    }

    /// Claim a fresh global name for new content.
    pub(crate) fn claim(&mut self, content: &str) -> String {
        let name = if self.prefix.is_empty() {
            format!(".str.{}", self.counter)
        } else {
            format!(".str.{}.{}", self.prefix, self.counter)
        };
        self.counter += 1;
        self.interned.insert(content.to_string(), name.clone());
        name
    }
}

/// Per-trait vtable bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct TraitVtable {
    /// `%vtable.<T>` and `%Existential.<T>` emitted?
    pub types_emitted: bool,
    /// Method signatures in declaration order (fixes slot indices)
    pub methods: Vec<TraitMethodSig>,
    /// impl-type mangled name -> vtable global name
    pub impls: HashMap<String, String>,
}

/// Vtable registry — trait name to vtable state.
#[derive(Debug, Default)]
pub(crate) struct VtableRegistry {
    pub traits: HashMap<String, TraitVtable>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_types::Primitive;

    #[test]
    fn first_struct_registration_wins() {
        let mut reg = TypeRegistry::default();
        reg.add_struct(StructInfo {
            name: "P".to_string(),
            fields: vec![("x".to_string(), ResolvedType::Primitive(Primitive::Int))],
        });
        reg.add_struct(StructInfo {
            name: "P".to_string(),
            fields: vec![],
        });
        assert_eq!(reg.structs["P"].fields.len(), 1);
    }

    #[test]
    fn string_pool_dedupes_content() {
        let mut pool = StringPool::with_prefix("m");
        let a = pool.claim("hello");
        assert_eq!(pool.lookup("hello"), Some(&a));
        assert_eq!(a, ".str.m.0");
        let b = pool.claim("world");
        assert_ne!(a, b);
    }

    #[test]
    fn field_and_variant_indices_are_positional() {
        let s = StructInfo {
            name: "S".to_string(),
            fields: vec![
                ("a".to_string(), ResolvedType::Primitive(Primitive::Int)),
                ("b".to_string(), ResolvedType::Primitive(Primitive::Bool)),
            ],
        };
        assert_eq!(s.field_index("b"), Some(1));
        assert_eq!(s.field_index("c"), None);

        let e = EnumInfo {
            name: "E".to_string(),
            variants: vec![
                ("None".to_string(), vec![]),
                ("Some".to_string(), vec![ResolvedType::Primitive(Primitive::Int)]),
            ],
            type_params: vec![],
        };
        assert_eq!(e.variant_index("Some"), Some(1));
    }
}
