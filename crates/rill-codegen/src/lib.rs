//! Rill LLVM IR code generator
//!
//! Consumes a type-checked AST plus the type table and emits a textual
//! LLVM IR module for the fixed x86_64 target, linked against the Rill
//! C-ABI runtime. Lowering is single-threaded and synchronous; most
//! errors are recovered with a placeholder value and accumulated as
//! diagnostics so one run surfaces as many problems as possible.

mod builtins;
mod concurrency;
mod control_flow;
mod diagnostics;
mod emit;
mod expr;
mod expr_call;
mod fold;
mod function_gen;
mod lambda_closure;
mod state;
mod stmt;
mod types;
mod vtable;

pub use diagnostics::CodegenError;

use std::collections::{HashMap, HashSet};

use rill_ast::{
    EnumDecl, Function, ImplBlock, Item, Module, Span, Spanned, StructDecl, TraitDecl, TypeAnn,
};
use rill_types::{
    mangle_method, sanitize, Diagnostic, FunctionType, Primitive, ResolvedType, TraitMethodSig,
    TraitType, TypeTable,
};

use diagnostics::CodegenResult;
use emit::EmitBuffer;
use state::{
    ConstInfo, EnumInfo, FunctionContext, FunctionInfo, StructInfo, StringPool, TraitVtable,
    TypeRegistry, VtableRegistry,
};

const TARGET_DATALAYOUT: &str =
    "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-f80:128-n8:16:32:64-S128";
const TARGET_TRIPLE: &str = "x86_64-unknown-linux-gnu";

/// LLVM IR code generator for one translation unit.
pub struct CodeGenerator<'a> {
    module_name: String,
    table: &'a TypeTable,
    pub(crate) out: EmitBuffer,
    pub(crate) types: TypeRegistry,
    pub(crate) fn_ctx: FunctionContext,
    pub(crate) strings: StringPool,
    pub(crate) vtables: VtableRegistry,
    diagnostics: Vec<Diagnostic>,
    reg_counter: usize,
    label_counter: usize,
    pub(crate) wrapper_counter: usize,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(module_name: &str, table: &'a TypeTable) -> Self {
        let mut gen = Self {
            module_name: module_name.to_string(),
            table,
            out: EmitBuffer::new(),
            types: TypeRegistry::default(),
            fn_ctx: FunctionContext::default(),
            strings: StringPool::with_prefix(&sanitize(module_name)),
            vtables: VtableRegistry::default(),
            diagnostics: Vec::new(),
            reg_counter: 0,
            label_counter: 0,
            wrapper_counter: 0,
        };
        gen.register_collection_templates();
        gen
    }

    /// Diagnostics accumulated so far, in emission order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    // Emission plumbing
    // ========================================================================

    pub(crate) fn next_reg(&mut self) -> String {
        let reg = format!("%reg{}", self.reg_counter);
        self.reg_counter += 1;
        reg
    }

    pub(crate) fn next_label(&mut self, prefix: &str) -> String {
        debug_assert!(
            !prefix.is_empty()
                && prefix
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_'),
            "invalid label prefix: '{}'",
            prefix
        );
        let label = format!("{}{}", prefix, self.label_counter);
        self.label_counter += 1;
        label
    }

    /// A stack-slot register name for a local, `%x` for the first binding
    /// of `x` and `%x.N` for shadowing rebinds.
    pub(crate) fn fresh_local_name(&mut self, name: &str) -> String {
        let base = sanitize(name);
        let mut candidate = base.clone();
        let mut n = 0;
        while !self.fn_ctx.used_slot_names.insert(candidate.clone()) {
            n += 1;
            candidate = format!("{}.{}", base, n);
        }
        candidate
    }

    /// Run `f` with writes routed into the globals bucket, restoring the
    /// previous routing on every exit path.
    pub(crate) fn with_global_emission<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> CodegenResult<T>,
    ) -> CodegenResult<T> {
        let prev = self.out.set_global_mode(true);
        let result = f(self);
        self.out.set_global_mode(prev);
        result
    }

    /// Convert an error into an accumulated diagnostic.
    pub(crate) fn report(&mut self, err: CodegenError) {
        self.diagnostics.push(err.into_diagnostic());
    }

    // Type table access
    // ========================================================================

    /// Resolved type of an expression node; missing entries are a
    /// type-mapping error (the lowerer introduced no synthesized node
    /// here).
    pub(crate) fn expr_type<T>(&self, node: &Spanned<T>) -> CodegenResult<ResolvedType> {
        self.table
            .of(node)
            .cloned()
            .ok_or_else(|| CodegenError::TypeMapping {
                message: "expression has no entry in the type table".to_string(),
                span: node.span,
            })
    }

    /// Resolved type of a node if the table has one.
    pub(crate) fn expr_type_opt<T>(&self, node: &Spanned<T>) -> Option<ResolvedType> {
        self.table.of(node).cloned()
    }

    // String constants
    // ========================================================================

    /// Intern a string literal, emitting its global on first sight.
    /// Returns `(global_name, byte_len_with_nul)`.
    pub(crate) fn intern_string(&mut self, content: &str) -> (String, usize) {
        let len = content.len() + 1;
        if let Some(name) = self.strings.lookup(content) {
            return (name.clone(), len);
        }
        let name = self.strings.claim(content);
        let escaped = escape_string_bytes(content);
        self.out.global_line(format!(
            "@{} = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
            name, len, escaped
        ));
        (name, len)
    }

    /// Constant GEP expression addressing the first byte of an interned
    /// string.
    pub(crate) fn string_const_ptr(&mut self, content: &str) -> String {
        let (name, len) = self.intern_string(content);
        format!(
            "getelementptr ([{} x i8], [{} x i8]* @{}, i64 0, i64 0)",
            len, len, name
        )
    }

    // Casting
    // ========================================================================

    /// Bridge a value between two IR types with the
    /// bitcast/ptrtoint/inttoptr/sext/trunc chain. Used wherever erased
    /// `i8*` values meet concrete types.
    pub(crate) fn cast_value(&mut self, val: &str, from: &str, to: &str) -> String {
        if from == to || to == "void" || from == "void" {
            return val.to_string();
        }
        let from_ptr = from.ends_with('*');
        let to_ptr = to.ends_with('*');
        match (from_ptr, to_ptr) {
            (true, true) => {
                let reg = self.next_reg();
                self.out
                    .inst(format!("{} = bitcast {} {} to {}", reg, from, val, to));
                reg
            }
            (true, false) => {
                if to == "double" {
                    let as_int = self.next_reg();
                    self.out
                        .inst(format!("{} = ptrtoint {} {} to i64", as_int, from, val));
                    let reg = self.next_reg();
                    self.out
                        .inst(format!("{} = bitcast i64 {} to double", reg, as_int));
                    reg
                } else {
                    let reg = self.next_reg();
                    self.out
                        .inst(format!("{} = ptrtoint {} {} to {}", reg, from, val, to));
                    reg
                }
            }
            (false, true) => {
                if from == "i1" {
                    let wide = self.next_reg();
                    self.out
                        .inst(format!("{} = zext i1 {} to i64", wide, val));
                    let reg = self.next_reg();
                    self.out
                        .inst(format!("{} = inttoptr i64 {} to {}", reg, wide, to));
                    reg
                } else if from == "double" {
                    let as_int = self.next_reg();
                    self.out
                        .inst(format!("{} = bitcast double {} to i64", as_int, val));
                    let reg = self.next_reg();
                    self.out
                        .inst(format!("{} = inttoptr i64 {} to {}", reg, as_int, to));
                    reg
                } else {
                    let reg = self.next_reg();
                    self.out
                        .inst(format!("{} = inttoptr {} {} to {}", reg, from, val, to));
                    reg
                }
            }
            (false, false) => {
                let (fb, tb) = (ll_int_bits(from), ll_int_bits(to));
                match (fb, tb) {
                    (Some(f), Some(t)) if f < t => {
                        let op = if from == "i1" { "zext" } else { "sext" };
                        let reg = self.next_reg();
                        self.out
                            .inst(format!("{} = {} {} {} to {}", reg, op, from, val, to));
                        reg
                    }
                    (Some(f), Some(t)) if f > t => {
                        let reg = self.next_reg();
                        self.out
                            .inst(format!("{} = trunc {} {} to {}", reg, from, val, to));
                        reg
                    }
                    (Some(_), None) if to == "double" => {
                        let reg = self.next_reg();
                        self.out
                            .inst(format!("{} = sitofp {} {} to double", reg, from, val));
                        reg
                    }
                    (None, Some(_)) if from == "double" => {
                        let reg = self.next_reg();
                        self.out
                            .inst(format!("{} = fptosi double {} to {}", reg, val, to));
                        reg
                    }
                    _ => val.to_string(),
                }
            }
        }
    }

    /// Narrow an arbitrary scalar to `i1` for a branch condition.
    pub(crate) fn cond_to_i1(&mut self, val: &str, ll: &str) -> String {
        if ll == "i1" {
            return val.to_string();
        }
        let reg = self.next_reg();
        if ll.ends_with('*') {
            self.out
                .inst(format!("{} = icmp ne {} {}, null", reg, ll, val));
        } else if ll == "double" {
            self.out.inst(format!(
                "{} = fcmp one double {}, {}",
                reg,
                val,
                types::format_llvm_float(0.0)
            ));
        } else {
            self.out
                .inst(format!("{} = icmp ne {} {}, 0", reg, ll, val));
        }
        reg
    }

    // Annotation resolution
    // ========================================================================

    /// Resolve a surface annotation against the registries. `extra_params`
    /// holds type-parameter names of the declaration being processed, on
    /// top of the current function's.
    pub(crate) fn resolve_type_ann(
        &self,
        ann: &Spanned<TypeAnn>,
        extra_params: &HashSet<String>,
    ) -> CodegenResult<ResolvedType> {
        match &ann.node {
            TypeAnn::Named { name, args } => {
                if extra_params.contains(name) || self.fn_ctx.type_params.contains(name) {
                    return Ok(ResolvedType::TypeParam(name.clone()));
                }
                if args.is_empty() {
                    if let Some(p) = Primitive::from_name(name) {
                        return Ok(ResolvedType::Primitive(p));
                    }
                    if let Some(vt) = self.vtables.traits.get(&sanitize(name)) {
                        return Ok(ResolvedType::Existential {
                            bounds: vec![TraitType {
                                name: name.clone(),
                                methods: vt.methods.clone(),
                            }],
                        });
                    }
                    return Ok(ResolvedType::Named {
                        name: name.clone(),
                        referent: None,
                    });
                }
                let resolved_args = args
                    .iter()
                    .map(|a| self.resolve_type_ann(a, extra_params))
                    .collect::<CodegenResult<Vec<_>>>()?;
                if name == "Channel" && resolved_args.len() == 1 {
                    return Ok(ResolvedType::Channel(Box::new(
                        resolved_args.into_iter().next().unwrap(),
                    )));
                }
                Ok(ResolvedType::GenericInstance {
                    base: Box::new(ResolvedType::Named {
                        name: name.clone(),
                        referent: None,
                    }),
                    args: resolved_args,
                })
            }
            TypeAnn::Ref { inner, mutable } => Ok(ResolvedType::Reference {
                inner: Box::new(self.resolve_type_ann(inner, extra_params)?),
                mutable: *mutable,
            }),
            TypeAnn::Pointer(inner) => Ok(ResolvedType::Pointer(Box::new(
                self.resolve_type_ann(inner, extra_params)?,
            ))),
            TypeAnn::Optional(inner) => Ok(ResolvedType::Optional(Box::new(
                self.resolve_type_ann(inner, extra_params)?,
            ))),
            TypeAnn::Array { elem, len } => Ok(ResolvedType::Array {
                elem: Box::new(self.resolve_type_ann(elem, extra_params)?),
                len: *len,
            }),
            TypeAnn::Tuple(elems) => Ok(ResolvedType::Tuple(
                elems
                    .iter()
                    .map(|e| self.resolve_type_ann(e, extra_params))
                    .collect::<CodegenResult<Vec<_>>>()?,
            )),
            TypeAnn::Fn { params, ret } => Ok(ResolvedType::Function(FunctionType {
                receiver: None,
                params: params
                    .iter()
                    .map(|p| self.resolve_type_ann(p, extra_params))
                    .collect::<CodegenResult<Vec<_>>>()?,
                ret: ret
                    .as_ref()
                    .map(|r| self.resolve_type_ann(r, extra_params))
                    .transpose()?
                    .map(Box::new),
                type_params: vec![],
            })),
            TypeAnn::Unit => Ok(ResolvedType::Primitive(Primitive::Void)),
        }
    }

    // Declaration pipeline
    // ========================================================================

    /// Lower one translation unit to module text.
    ///
    /// Emission order: header, runtime externs, opaque runtime types, GC
    /// constructor, struct types, enum types, trait vtable types, function
    /// bodies, then everything collected in the globals bucket. Errors are
    /// accumulated in [`Self::diagnostics`]; emission continues past all
    /// but per-function signature failures.
    pub fn generate_module(&mut self, module: &Module, imports: &[Module]) -> String {
        // Registration pass: imported public structs first, then this
        // unit's declarations. First definition of a struct wins.
        let mut struct_order: Vec<String> = Vec::new();
        let mut enum_order: Vec<String> = Vec::new();
        let mut trait_order: Vec<String> = Vec::new();

        for import in imports {
            for item in &import.items {
                if let Item::Struct(decl) = &item.node {
                    if decl.is_public {
                        self.register_struct(decl, &mut struct_order);
                    }
                }
            }
        }
        for item in &module.items {
            match &item.node {
                Item::Struct(decl) => self.register_struct(decl, &mut struct_order),
                Item::Enum(decl) => self.register_enum(decl, &mut enum_order),
                Item::Trait(decl) => self.register_trait(decl, &mut trait_order),
                Item::Function(f) => self.register_function(f),
                Item::Impl(block) => self.register_impl(block),
                Item::Const(decl) => self.register_const(decl),
            }
        }

        // Section 2: runtime externs.
        for decl in builtins::RUNTIME_EXTERNS {
            self.out.line(*decl);
        }
        self.out.line("");

        // Section 3: opaque runtime types and the closure record.
        for ty in builtins::RUNTIME_TYPES {
            self.out.line(*ty);
        }
        self.out.line("");

        // Section 4: GC bootstrap constructor.
        self.out.line("define internal void @rill.gc_init() {");
        self.out.label("entry");
        self.out.inst("call void @runtime_gc_init()");
        self.out.inst("ret void");
        self.out.line("}");
        self.out.line(
            "@llvm.global_ctors = appending global [1 x { i32, void ()*, i8* }] \
             [{ i32, void ()*, i8* } { i32 65535, void ()* @rill.gc_init, i8* null }]",
        );
        self.out.line("");

        // Sections 5-6: struct and enum types.
        for name in &struct_order {
            let info = self.types.structs[name].clone();
            match self.render_struct_type(&info) {
                Ok(line) => self.out.line(line),
                Err(err) => self.report(err),
            }
        }
        for name in &enum_order {
            self.out.line(format!("%enum.{} = type {{ i64, i8* }}", name));
        }
        if !struct_order.is_empty() || !enum_order.is_empty() {
            self.out.line("");
        }

        // Section 7: trait vtable types.
        for name in &trait_order {
            self.emit_trait_types(name);
        }
        if !trait_order.is_empty() {
            self.out.line("");
        }

        // Section 8: function bodies, impl blocks, constants.
        for item in &module.items {
            match &item.node {
                Item::Function(f) => {
                    if let Err(err) = self.generate_function(f, None) {
                        self.report(err);
                    }
                    self.out.line("");
                }
                Item::Impl(block) => self.generate_impl(block, item.span),
                Item::Const(decl) => self.generate_const(decl),
                Item::Struct(_) | Item::Enum(_) | Item::Trait(_) => {}
            }
        }

        let header = format!(
            "; ModuleID = '{}'\nsource_filename = \"{}.rl\"\ntarget datalayout = \"{}\"\ntarget triple = \"{}\"\n\n",
            self.module_name, self.module_name, TARGET_DATALAYOUT, TARGET_TRIPLE
        );
        std::mem::take(&mut self.out).finish(&header)
    }

    fn render_struct_type(&mut self, info: &StructInfo) -> CodegenResult<String> {
        if info.fields.is_empty() {
            return Ok(format!("%struct.{} = type {{ i8 }}", info.name));
        }
        let lls = info
            .fields
            .iter()
            .map(|(_, ty)| self.type_to_llvm(ty, Span::default()))
            .collect::<CodegenResult<Vec<_>>>()?;
        Ok(format!(
            "%struct.{} = type {{ {} }}",
            info.name,
            lls.join(", ")
        ))
    }

    // Registration
    // ========================================================================

    fn register_collection_templates(&mut self) {
        // The Vec and HashMap surface types are thin wrapper structs over
        // the runtime handles; instances are expanded on demand.
        self.types.struct_templates.insert(
            "Vec".to_string(),
            StructInfo {
                name: "Vec".to_string(),
                fields: vec![(
                    "data".to_string(),
                    ResolvedType::Slice(Box::new(ResolvedType::TypeParam("T".to_string()))),
                )],
            },
        );
        self.types
            .struct_template_params
            .insert("Vec".to_string(), vec!["T".to_string()]);
        self.types.struct_templates.insert(
            "HashMap".to_string(),
            StructInfo {
                name: "HashMap".to_string(),
                fields: vec![(
                    "data".to_string(),
                    ResolvedType::Map {
                        key: Box::new(ResolvedType::TypeParam("K".to_string())),
                        value: Box::new(ResolvedType::TypeParam("V".to_string())),
                    },
                )],
            },
        );
        self.types
            .struct_template_params
            .insert("HashMap".to_string(), vec!["K".to_string(), "V".to_string()]);
    }

    fn register_struct(&mut self, decl: &StructDecl, order: &mut Vec<String>) {
        let params: HashSet<String> =
            decl.type_params.iter().map(|p| p.node.clone()).collect();
        let fields: Vec<(String, ResolvedType)> = decl
            .fields
            .iter()
            .filter_map(|f| match self.resolve_type_ann(&f.ty, &params) {
                Ok(ty) => Some((f.name.node.clone(), ty)),
                Err(err) => {
                    self.diagnostics.push(err.into_diagnostic());
                    None
                }
            })
            .collect();

        let name = sanitize(&decl.name.node);
        if decl.type_params.is_empty() {
            if !self.types.structs.contains_key(&name) {
                order.push(name.clone());
            }
            self.types.add_struct(StructInfo { name, fields });
        } else {
            self.types
                .struct_templates
                .entry(decl.name.node.clone())
                .or_insert(StructInfo { name, fields });
            self.types
                .struct_template_params
                .entry(decl.name.node.clone())
                .or_insert_with(|| decl.type_params.iter().map(|p| p.node.clone()).collect());
        }
    }

    fn register_enum(&mut self, decl: &EnumDecl, order: &mut Vec<String>) {
        let params: HashSet<String> =
            decl.type_params.iter().map(|p| p.node.clone()).collect();
        let variants: Vec<(String, Vec<ResolvedType>)> = decl
            .variants
            .iter()
            .map(|v| {
                let payload = v
                    .payload
                    .iter()
                    .filter_map(|t| match self.resolve_type_ann(t, &params) {
                        Ok(ty) => Some(ty),
                        Err(err) => {
                            self.diagnostics.push(err.into_diagnostic());
                            None
                        }
                    })
                    .collect();
                (v.name.node.clone(), payload)
            })
            .collect();

        let name = sanitize(&decl.name.node);
        let info = EnumInfo {
            name: name.clone(),
            variants,
            type_params: decl.type_params.iter().map(|p| p.node.clone()).collect(),
        };
        if decl.type_params.is_empty() {
            if !self.types.enums.contains_key(&name) {
                order.push(name.clone());
            }
            self.types.add_enum(info);
        } else {
            self.types
                .enum_templates
                .entry(decl.name.node.clone())
                .or_insert(info);
        }
    }

    fn register_trait(&mut self, decl: &TraitDecl, order: &mut Vec<String>) {
        let name = sanitize(&decl.name.node);
        let methods: Vec<TraitMethodSig> = decl
            .methods
            .iter()
            .map(|m| {
                let params = m
                    .params
                    .iter()
                    .filter(|p| p.name.node != "self")
                    .filter_map(|p| match self.resolve_type_ann(&p.ty, &HashSet::new()) {
                        Ok(ty) => Some(ty),
                        Err(err) => {
                            self.diagnostics.push(err.into_diagnostic());
                            None
                        }
                    })
                    .collect();
                let ret = m.ret.as_ref().and_then(|r| {
                    match self.resolve_type_ann(r, &HashSet::new()) {
                        Ok(ty) => Some(ty),
                        Err(err) => {
                            self.diagnostics.push(err.into_diagnostic());
                            None
                        }
                    }
                });
                TraitMethodSig {
                    name: m.name.node.clone(),
                    params,
                    ret,
                }
            })
            .collect();

        if !self.vtables.traits.contains_key(&name) {
            order.push(name.clone());
        }
        self.vtables.traits.entry(name).or_insert(TraitVtable {
            types_emitted: false,
            methods,
            impls: HashMap::new(),
        });
    }

    fn register_function(&mut self, f: &Function) {
        let type_params: Vec<String> = f.type_params.iter().map(|p| p.node.clone()).collect();
        let param_set: HashSet<String> = type_params.iter().cloned().collect();
        let params: Vec<(String, ResolvedType)> = f
            .params
            .iter()
            .filter_map(|p| match self.resolve_type_ann(&p.ty, &param_set) {
                Ok(ty) => Some((p.name.node.clone(), ty)),
                Err(err) => {
                    self.diagnostics.push(err.into_diagnostic());
                    None
                }
            })
            .collect();
        let ret = f.ret.as_ref().and_then(|r| {
            match self.resolve_type_ann(r, &param_set) {
                Ok(ty) => Some(ty),
                Err(err) => {
                    self.diagnostics.push(err.into_diagnostic());
                    None
                }
            }
        });
        self.types.functions.insert(
            f.name.node.clone(),
            FunctionInfo {
                symbol: sanitize(&f.name.node),
                params,
                ret,
                type_params,
            },
        );
    }

    fn register_impl(&mut self, block: &ImplBlock) {
        let Ok(target_ty) = self.resolve_type_ann(&block.target, &HashSet::new()) else {
            return;
        };
        let target_name = rill_types::mangle_type(&target_ty);
        for method in &block.methods {
            let symbol = mangle_method(&target_ty, &method.name.node);
            let param_set: HashSet<String> =
                method.type_params.iter().map(|p| p.node.clone()).collect();
            let params: Vec<(String, ResolvedType)> = method
                .params
                .iter()
                .filter_map(|p| match self.resolve_type_ann(&p.ty, &param_set) {
                    Ok(ty) => Some((p.name.node.clone(), ty)),
                    Err(err) => {
                        self.diagnostics.push(err.into_diagnostic());
                        None
                    }
                })
                .collect();
            let ret = method.ret.as_ref().and_then(|r| {
                match self.resolve_type_ann(r, &param_set) {
                    Ok(ty) => Some(ty),
                    Err(err) => {
                        self.diagnostics.push(err.into_diagnostic());
                        None
                    }
                }
            });
            let info = FunctionInfo {
                symbol: symbol.clone(),
                params,
                ret,
                type_params: method.type_params.iter().map(|p| p.node.clone()).collect(),
            };
            // Reachable both as `Type::method` and by mangled symbol.
            self.types
                .functions
                .insert(format!("{}::{}", target_name, method.name.node), info.clone());
            self.types.functions.insert(symbol, info);
        }
    }

    fn register_const(&mut self, decl: &rill_ast::ConstDecl) {
        let ty = decl
            .ty
            .as_ref()
            .and_then(|t| self.resolve_type_ann(t, &HashSet::new()).ok())
            .or_else(|| self.expr_type_opt(&decl.value))
            .unwrap_or(ResolvedType::Primitive(Primitive::Int));
        self.types.constants.insert(
            decl.name.node.clone(),
            ConstInfo {
                symbol: sanitize(&decl.name.node),
                ty,
            },
        );
    }

    fn generate_const(&mut self, decl: &rill_ast::ConstDecl) {
        let Some(info) = self.types.constants.get(&decl.name.node).cloned() else {
            return;
        };
        let ll = match self.type_to_llvm(&info.ty, decl.name.span) {
            Ok(ll) => ll,
            Err(err) => {
                self.report(err);
                return;
            }
        };
        let init = match fold::fold_expr(&decl.value.node) {
            Some(folded) => folded.render(),
            None => {
                self.report(CodegenError::InvalidLiteral {
                    message: format!(
                        "constant `{}` must have a literal initializer",
                        decl.name.node
                    ),
                    span: decl.value.span,
                });
                types::zero_value(&ll)
            }
        };
        self.out
            .line(format!("@{} = global {} {}", info.symbol, ll, init));
        self.out.line("");
    }
}

/// Bit width of an IR integer type string.
pub(crate) fn ll_int_bits(ll: &str) -> Option<u32> {
    match ll {
        "i1" => Some(1),
        "i8" => Some(8),
        "i16" => Some(16),
        "i32" => Some(32),
        "i64" => Some(64),
        "i128" => Some(128),
        _ => None,
    }
}

/// Escape string content for a `c"..."` constant.
fn escape_string_bytes(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for byte in content.bytes() {
        match byte {
            b'"' | b'\\' => out.push_str(&format!("\\{:02X}", byte)),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn escaping_handles_quotes_and_newlines() {
        assert_eq!(escape_string_bytes("a\"b"), "a\\22b");
        assert_eq!(escape_string_bytes("a\nb"), "a\\0Ab");
        assert_eq!(escape_string_bytes("a\\b"), "a\\5Cb");
        assert_eq!(escape_string_bytes("plain"), "plain");
    }

    #[test]
    fn ll_int_bits_table() {
        assert_eq!(ll_int_bits("i1"), Some(1));
        assert_eq!(ll_int_bits("i64"), Some(64));
        assert_eq!(ll_int_bits("double"), None);
        assert_eq!(ll_int_bits("%String*"), None);
    }
}
