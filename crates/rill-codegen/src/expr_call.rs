//! Call lowering
//!
//! The callee shape selects the protocol: indirect closure calls,
//! builtins, direct calls to mangled symbols, static and module paths,
//! runtime-collection redirects, and dynamic trait dispatch.

use rill_ast::{Expr, Span, Spanned};
use rill_types::{mangle_method, mangle_name, mangle_qualified, sanitize, ResolvedType};

use crate::builtins;
use crate::diagnostics::{format_did_you_mean, suggest_similar, CodegenError, CodegenResult};
use crate::state::FunctionInfo;
use crate::types::zero_value;
use crate::CodeGenerator;

impl CodeGenerator<'_> {
    pub(crate) fn generate_call(
        &mut self,
        node: &Spanned<Expr>,
        callee: &Spanned<Expr>,
        args: &[Spanned<Expr>],
    ) -> CodegenResult<String> {
        match &callee.node {
            Expr::Ident(name) => {
                if let Some(local) = self.fn_ctx.locals.get(name).cloned() {
                    if let ResolvedType::Function(ft) = local.ty.strip_refs() {
                        let ft = ft.clone();
                        let handle = self.generate_expr(callee)?;
                        return self.generate_closure_call(&handle, &ft, args, node);
                    }
                }
                if let Some(param) = self.fn_ctx.param(name).cloned() {
                    if let ResolvedType::Function(ft) = param.ty.strip_refs() {
                        let ft = ft.clone();
                        return self.generate_closure_call(&param.register, &ft, args, node);
                    }
                }
                if builtins::is_builtin_name(name) {
                    return self.generate_builtin_call(name, node, args, callee.span);
                }
                if let Some(info) = self.types.functions.get(name).cloned() {
                    let symbol = info.symbol.clone();
                    return self.direct_call(&symbol, Some(&info), args, node);
                }

                let mut candidates: Vec<&str> =
                    self.types.functions.keys().map(|s| s.as_str()).collect();
                candidates.extend(builtins::BUILTIN_NAMES);
                let suggestions = suggest_similar(name, &candidates, 3);
                Err(CodegenError::UndefinedVar {
                    name: name.clone(),
                    suggestion: format_did_you_mean(&suggestions),
                    span: callee.span,
                })
            }

            Expr::Path { qualifier, member } => {
                self.generate_path_call(node, qualifier, member, args)
            }

            Expr::TypeApply { base, type_args } => {
                let Expr::Ident(name) = &base.node else {
                    return Err(CodegenError::UnsupportedExpr {
                        message: "type application requires a function name".to_string(),
                        span: base.span,
                    });
                };
                let resolved_args = type_args
                    .iter()
                    .map(|t| self.resolve_type_ann(t, &Default::default()))
                    .collect::<CodegenResult<Vec<_>>>()?;
                let symbol = mangle_name(name, &resolved_args);
                let info = self.types.functions.get(name).cloned();
                self.direct_call(&symbol, info.as_ref(), args, node)
            }

            Expr::Field { object, field } => {
                self.generate_method_call(node, object, field, args)
            }

            _ => {
                // Anything else must evaluate to a closure.
                let callee_ty = self.expr_type(callee)?;
                if let ResolvedType::Function(ft) = callee_ty.strip_refs() {
                    let ft = ft.clone();
                    let handle = self.generate_expr(callee)?;
                    self.generate_closure_call(&handle, &ft, args, node)
                } else {
                    Err(CodegenError::UnsupportedExpr {
                        message: format!("cannot call a value of type `{}`", callee_ty),
                        span: callee.span,
                    })
                }
            }
        }
    }

    // Direct calls
    // ========================================================================

    /// Direct call to a known symbol. When the registered signature is
    /// available, arguments are packed/cast to the declared parameter
    /// types; an erased (`i8*`) return is cast back to the type the call
    /// site expects.
    pub(crate) fn direct_call(
        &mut self,
        symbol: &str,
        info: Option<&FunctionInfo>,
        args: &[Spanned<Expr>],
        node: &Spanned<Expr>,
    ) -> CodegenResult<String> {
        let mut lowered: Vec<(String, String)> = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let mut val = self.generate_expr(arg)?;
            let arg_ty = self.expr_type_opt(arg);
            let arg_ll = match &arg_ty {
                Some(ty) => self.type_to_llvm(ty, arg.span)?,
                None => "i8*".to_string(),
            };
            let param_ty = info.and_then(|i2| i2.params.get(i)).map(|(_, t)| t.clone());
            let ll = match param_ty {
                Some(pty) => {
                    val = self.coerce_to_existential(val, &pty, arg)?;
                    let pll = self.type_to_llvm(&pty, arg.span)?;
                    val = self.cast_value(&val, &arg_ll, &pll);
                    pll
                }
                None => arg_ll,
            };
            lowered.push((ll, val));
        }

        // Return type: the declared one; for unregistered callees, the
        // runtime symbol table, then the call site's table entry.
        let declared_ret = info.and_then(|i2| i2.ret.clone());
        let mut from_runtime_table = false;
        let ret_ll = match &declared_ret {
            Some(ty) => self.type_to_llvm(ty, node.span)?,
            None if info.is_none() => {
                if let Some(ll) = builtins::runtime_return_type(symbol) {
                    from_runtime_table = true;
                    ll.to_string()
                } else {
                    match self.expr_type_opt(node) {
                        Some(ty) => self.type_to_llvm(&ty, node.span)?,
                        None => "void".to_string(),
                    }
                }
            }
            None => "void".to_string(),
        };

        let arg_list = lowered
            .iter()
            .map(|(ll, v)| format!("{} {}", ll, v))
            .collect::<Vec<_>>()
            .join(", ");

        if ret_ll == "void" {
            self.out
                .inst(format!("call void @{}({})", symbol, arg_list));
            return Ok(String::new());
        }
        let reg = self.next_reg();
        self.out.inst(format!(
            "{} = call {} @{}({})",
            reg, ret_ll, symbol, arg_list
        ));

        // An erased or runtime-inferred return meets a concrete
        // expectation at the call site.
        if from_runtime_table || matches!(declared_ret, Some(ResolvedType::TypeParam(_))) {
            if let Some(expected) = self.expr_type_opt(node) {
                let expected_ll = self.type_to_llvm(&expected, node.span)?;
                return Ok(self.cast_value(&reg, &ret_ll, &expected_ll));
            }
        }
        Ok(reg)
    }

    // Path calls: enum constructors, collection constructors, static
    // methods, module functions
    // ========================================================================

    fn generate_path_call(
        &mut self,
        node: &Spanned<Expr>,
        qualifier: &Spanned<String>,
        member: &Spanned<String>,
        args: &[Spanned<Expr>],
    ) -> CodegenResult<String> {
        // Collection constructors.
        if member.node == "new"
            && matches!(qualifier.node.as_str(), "Vec" | "HashMap" | "Channel")
        {
            return self.generate_collection_new(node, &qualifier.node, args);
        }

        // Enum variant constructor with payload.
        if let Ok((enum_name, info)) = self.enum_target(node, qualifier) {
            if let Some(tag) = info.variant_index(&member.node) {
                let payload_tys = info.variants[tag].1.clone();
                if payload_tys.len() != args.len() {
                    return Err(CodegenError::InvalidLiteral {
                        message: format!(
                            "variant `{}::{}` expects {} payload values, got {}",
                            enum_name,
                            member.node,
                            payload_tys.len(),
                            args.len()
                        ),
                        span: node.span,
                    });
                }
                let mut payload_vals = Vec::with_capacity(args.len());
                for arg in args {
                    payload_vals.push(self.generate_expr(arg)?);
                }
                return self.construct_enum(
                    &enum_name,
                    tag,
                    &payload_vals,
                    &payload_tys,
                    node.span,
                );
            }
        }

        // Static method on a type with an impl block.
        let static_key = format!("{}::{}", sanitize(&qualifier.node), member.node);
        if let Some(info) = self.types.functions.get(&static_key).cloned() {
            let symbol = info.symbol.clone();
            return self.direct_call(&symbol, Some(&info), args, node);
        }

        // Module-qualified function.
        let symbol = mangle_qualified(&qualifier.node, &member.node);
        self.direct_call(&symbol, None, args, node)
    }

    fn generate_collection_new(
        &mut self,
        node: &Spanned<Expr>,
        which: &str,
        args: &[Spanned<Expr>],
    ) -> CodegenResult<String> {
        let node_ty = self.expr_type(node)?;
        match which {
            "Vec" => {
                let (wrapper, _) = self.ensure_instance(&node_ty, node.span)?;
                let elem_ty = match &node_ty {
                    ResolvedType::GenericInstance { args, .. } if args.len() == 1 => {
                        args[0].clone()
                    }
                    _ => {
                        return Err(CodegenError::TypeMapping {
                            message: format!("`Vec::new` must produce a Vec, got `{}`", node_ty),
                            span: node.span,
                        })
                    }
                };
                let elem_size = self.type_size(&elem_ty);
                let slice = self.next_reg();
                self.out.inst(format!(
                    "{} = call %Slice* @runtime_slice_new(i64 {}, i64 0, i64 0)",
                    slice, elem_size
                ));
                self.wrap_runtime_handle(&wrapper, "%Slice*", &slice)
            }
            "HashMap" => {
                let (wrapper, _) = self.ensure_instance(&node_ty, node.span)?;
                let value_ty = match &node_ty {
                    ResolvedType::GenericInstance { args, .. } if args.len() == 2 => {
                        args[1].clone()
                    }
                    _ => {
                        return Err(CodegenError::TypeMapping {
                            message: format!(
                                "`HashMap::new` must produce a HashMap, got `{}`",
                                node_ty
                            ),
                            span: node.span,
                        })
                    }
                };
                let elem_size = self.type_size(&value_ty);
                let map = self.next_reg();
                self.out.inst(format!(
                    "{} = call %HashMap* @runtime_hashmap_new(i64 {}, i64 16)",
                    map, elem_size
                ));
                self.wrap_runtime_handle(&wrapper, "%HashMap*", &map)
            }
            "Channel" => {
                let elem_ty = match node_ty.strip_refs() {
                    ResolvedType::Channel(elem) => elem.as_ref().clone(),
                    other => {
                        return Err(CodegenError::TypeMapping {
                            message: format!(
                                "`Channel::new` must produce a Channel, got `{}`",
                                other
                            ),
                            span: node.span,
                        })
                    }
                };
                let elem_size = self.type_size(&elem_ty);
                let capacity = match args.first() {
                    Some(arg) => self.generate_expr(arg)?,
                    None => "0".to_string(),
                };
                let reg = self.next_reg();
                self.out.inst(format!(
                    "{} = call %Channel* @runtime_channel_new(i64 {}, i64 {})",
                    reg, elem_size, capacity
                ));
                Ok(reg)
            }
            _ => unreachable!(),
        }
    }

    // Builtins
    // ========================================================================

    fn generate_builtin_call(
        &mut self,
        name: &str,
        node: &Spanned<Expr>,
        args: &[Spanned<Expr>],
        span: Span,
    ) -> CodegenResult<String> {
        match name {
            "println" => self.generate_println(args, span),
            "format" => self.generate_format(args, span),
            "len" => self.generate_len(node, args, span),
            "append" => {
                if args.len() != 2 {
                    return Err(CodegenError::InvalidOperation {
                        message: "`append` takes a Vec and one value".to_string(),
                        span,
                    });
                }
                let vec_val = self.generate_expr(&args[0])?;
                let vec_ty = self.expr_type(&args[0])?;
                let (slice, elem_ty) = self.slice_handle_of(&vec_val, &vec_ty, span)?;
                let val = self.generate_expr(&args[1])?;
                self.slice_push(&slice, &elem_ty, &val, span)?;
                Ok(String::new())
            }
            _ => unreachable!("not a builtin: {}", name),
        }
    }

    fn generate_println(
        &mut self,
        args: &[Spanned<Expr>],
        span: Span,
    ) -> CodegenResult<String> {
        if args.is_empty() {
            let ptr = self.string_const_ptr("");
            let s = self.next_reg();
            self.out.inst(format!(
                "{} = call %String* @runtime_string_new(i8* {}, i64 0)",
                s, ptr
            ));
            self.out
                .inst(format!("call void @runtime_println_string(%String* {})", s));
            return Ok(String::new());
        }
        if args.len() > 1 {
            return Err(CodegenError::InvalidOperation {
                message: "`println` takes one argument; use `format` to combine values"
                    .to_string(),
                span,
            });
        }

        let arg = &args[0];
        let val = self.generate_expr(arg)?;
        let ty = self.expr_type(arg)?;
        let mut ll = self.type_to_llvm(&ty, arg.span)?;
        let mut val = val;
        if ll == "i16" {
            val = self.cast_value(&val, "i16", "i64");
            ll = "i64".to_string();
        }
        match builtins::println_symbol(&ll) {
            Some(symbol) => {
                self.out
                    .inst(format!("call void @{}({} {})", symbol, ll, val));
                Ok(String::new())
            }
            None => Err(CodegenError::InvalidOperation {
                message: format!("`println` does not support values of type `{}`", ty),
                span: arg.span,
            }),
        }
    }

    fn generate_format(
        &mut self,
        args: &[Spanned<Expr>],
        span: Span,
    ) -> CodegenResult<String> {
        let Some((fmt, rest)) = args.split_first() else {
            return Err(CodegenError::Format {
                message: "`format` requires a format string".to_string(),
                span,
            });
        };
        if rest.len() > 4 {
            return Err(CodegenError::Format {
                message: "`format` supports at most 4 arguments".to_string(),
                span,
            });
        }
        let fmt_ty = self.expr_type(fmt)?;
        if !fmt_ty.is_string() {
            return Err(CodegenError::Format {
                message: format!("format string must be a string, got `{}`", fmt_ty),
                span: fmt.span,
            });
        }
        let fmt_val = self.generate_expr(fmt)?;

        let mut converted: Vec<String> = Vec::with_capacity(4);
        for arg in rest {
            let mut val = self.generate_expr(arg)?;
            let ty = self.expr_type(arg)?;
            let mut ll = self.type_to_llvm(&ty, arg.span)?;
            // Narrow integers ride the i64 conversion.
            if matches!(ll.as_str(), "i8" | "i16" | "i32") {
                val = self.cast_value(&val, &ll, "i64");
                ll = "i64".to_string();
            }
            if ll == "%String*" {
                converted.push(val);
                continue;
            }
            match builtins::string_from_symbol(&ll) {
                Some(symbol) => {
                    let reg = self.next_reg();
                    self.out.inst(format!(
                        "{} = call %String* @{}({} {})",
                        reg, symbol, ll, val
                    ));
                    converted.push(reg);
                }
                None => {
                    return Err(CodegenError::Format {
                        message: format!("`format` does not support values of type `{}`", ty),
                        span: arg.span,
                    })
                }
            }
        }
        while converted.len() < 4 {
            converted.push("null".to_string());
        }

        let reg = self.next_reg();
        self.out.inst(format!(
            "{} = call %String* @runtime_string_format(%String* {}, %String* {}, %String* {}, %String* {}, %String* {})",
            reg, fmt_val, converted[0], converted[1], converted[2], converted[3]
        ));
        Ok(reg)
    }

    fn generate_len(
        &mut self,
        _node: &Spanned<Expr>,
        args: &[Spanned<Expr>],
        span: Span,
    ) -> CodegenResult<String> {
        let [arg] = args else {
            return Err(CodegenError::InvalidOperation {
                message: "`len` takes exactly one argument".to_string(),
                span,
            });
        };
        let val = self.generate_expr(arg)?;
        let ty = self.expr_type(arg)?;

        // HashMap-like receivers report their own length.
        if let Some(map) = self.hashmap_handle_of(&val, &ty, span)? {
            let reg = self.next_reg();
            self.out.inst(format!(
                "{} = call i64 @runtime_hashmap_len(%HashMap* {})",
                reg, map
            ));
            return Ok(reg);
        }

        let (slice, _) = self.slice_handle_of(&val, &ty, span)?;
        let reg = self.next_reg();
        self.out.inst(format!(
            "{} = call i64 @runtime_slice_len(%Slice* {})",
            reg, slice
        ));
        Ok(reg)
    }

    // Method calls
    // ========================================================================

    fn generate_method_call(
        &mut self,
        node: &Spanned<Expr>,
        object: &Spanned<Expr>,
        method: &Spanned<String>,
        args: &[Spanned<Expr>],
    ) -> CodegenResult<String> {
        let recv_ty = self.expr_type(object)?;
        let stripped = recv_ty.strip_refs().clone();

        // Dynamic dispatch on trait existentials.
        match &stripped {
            ResolvedType::Existential { bounds } => {
                let bound = bounds.first().cloned().ok_or_else(|| {
                    CodegenError::TypeMapping {
                        message: "existential with no trait bound".to_string(),
                        span: object.span,
                    }
                })?;
                let obj = self.generate_expr(object)?;
                return self.generate_dyn_call(&obj, &bound, method, args, node);
            }
            ResolvedType::Trait(t) => {
                let t = t.clone();
                let obj = self.generate_expr(object)?;
                return self.generate_dyn_call(&obj, &t, method, args, node);
            }
            _ => {}
        }

        // Runtime collection redirects.
        if let Some(result) = self.try_collection_method(node, object, &stripped, method, args)? {
            return Ok(result);
        }

        // Ordinary method: receiver becomes the first argument of the
        // mangled member function.
        let symbol = mangle_method(&recv_ty, &method.node);
        let info = self.types.functions.get(&symbol).cloned();
        let recv_val = self.generate_expr(object)?;
        let recv_ll = self.type_to_llvm(&recv_ty, object.span)?;

        let mut lowered = vec![(recv_ll, recv_val)];
        for (i, arg) in args.iter().enumerate() {
            let mut val = self.generate_expr(arg)?;
            let arg_ty = self.expr_type_opt(arg);
            let arg_ll = match &arg_ty {
                Some(ty) => self.type_to_llvm(ty, arg.span)?,
                None => "i8*".to_string(),
            };
            // Parameter 0 of the registered info is the receiver.
            let param_ty = info
                .as_ref()
                .and_then(|i2| i2.params.get(i + 1))
                .map(|(_, t)| t.clone());
            let ll = match param_ty {
                Some(pty) => {
                    val = self.coerce_to_existential(val, &pty, arg)?;
                    let pll = self.type_to_llvm(&pty, arg.span)?;
                    val = self.cast_value(&val, &arg_ll, &pll);
                    pll
                }
                None => arg_ll,
            };
            lowered.push((ll, val));
        }

        let ret_ll = match info.as_ref().and_then(|i2| i2.ret.clone()) {
            Some(ty) => self.type_to_llvm(&ty, node.span)?,
            None => match self.expr_type_opt(node) {
                Some(ty) if info.is_none() => self.type_to_llvm(&ty, node.span)?,
                _ => "void".to_string(),
            },
        };

        let arg_list = lowered
            .iter()
            .map(|(ll, v)| format!("{} {}", ll, v))
            .collect::<Vec<_>>()
            .join(", ");
        if ret_ll == "void" {
            self.out
                .inst(format!("call void @{}({})", symbol, arg_list));
            Ok(String::new())
        } else {
            let reg = self.next_reg();
            self.out.inst(format!(
                "{} = call {} @{}({})",
                reg, ret_ll, symbol, arg_list
            ));
            Ok(reg)
        }
    }

    /// `%HashMap*` handle behind a receiver, if it is map-like.
    fn hashmap_handle_of(
        &mut self,
        value: &str,
        ty: &ResolvedType,
        span: Span,
    ) -> CodegenResult<Option<String>> {
        match ty.strip_refs() {
            ResolvedType::Map { .. } => Ok(Some(value.to_string())),
            inst @ ResolvedType::GenericInstance { base, args } => {
                let base_name = match base.as_ref() {
                    ResolvedType::Named { name, .. } => name.clone(),
                    ResolvedType::Struct(s) => s.name.clone(),
                    _ => String::new(),
                };
                if base_name != "HashMap" || args.len() != 2 {
                    return Ok(None);
                }
                let (name, _) = self.ensure_instance(inst, span)?;
                let field_ptr = self.next_reg();
                self.out.inst(format!(
                    "{} = getelementptr inbounds %struct.{}, %struct.{}* {}, i32 0, i32 0",
                    field_ptr, name, name, value
                ));
                let map = self.next_reg();
                self.out.inst(format!(
                    "{} = load %HashMap*, %HashMap** {}",
                    map, field_ptr
                ));
                Ok(Some(map))
            }
            _ => Ok(None),
        }
    }

    /// Store a value into a fresh heap cell and return it as `i8*`.
    fn boxed_arg(&mut self, val: &str, ty: &ResolvedType, span: Span) -> CodegenResult<String> {
        let ll = self.type_to_llvm(ty, span)?;
        let size = self.type_size(ty).max(8);
        let slot = self.next_reg();
        self.out
            .inst(format!("{} = call i8* @runtime_alloc(i64 {})", slot, size));
        let typed = self.next_reg();
        self.out
            .inst(format!("{} = bitcast i8* {} to {}*", typed, slot, ll));
        self.out
            .inst(format!("store {} {}, {}* {}", ll, val, ll, typed));
        Ok(slot)
    }

    pub(crate) fn slice_push(
        &mut self,
        slice: &str,
        elem_ty: &ResolvedType,
        val: &str,
        span: Span,
    ) -> CodegenResult<()> {
        let slot = self.boxed_arg(val, elem_ty, span)?;
        self.out.inst(format!(
            "call void @runtime_slice_push(%Slice* {}, i8* {})",
            slice, slot
        ));
        Ok(())
    }

    /// Convert a runtime `i8` truth value to `i1`.
    fn i8_to_bool(&mut self, val: &str) -> String {
        let reg = self.next_reg();
        self.out.inst(format!("{} = icmp ne i8 {}, 0", reg, val));
        reg
    }

    /// Vec / HashMap / Channel instance methods, redirected to the
    /// runtime. Returns `Ok(None)` when the receiver is not a collection;
    /// the receiver expression is lowered at most once.
    fn try_collection_method(
        &mut self,
        node: &Spanned<Expr>,
        object: &Spanned<Expr>,
        stripped: &ResolvedType,
        method: &Spanned<String>,
        args: &[Spanned<Expr>],
    ) -> CodegenResult<Option<String>> {
        let span = method.span;

        // The receiver's type decides the redirect before anything is
        // emitted.
        enum Collection {
            Slice,
            Hash(ResolvedType, ResolvedType),
            Chan(ResolvedType),
        }
        let collection = match stripped {
            ResolvedType::Channel(elem) => Some(Collection::Chan(elem.as_ref().clone())),
            ResolvedType::Slice(_) => Some(Collection::Slice),
            ResolvedType::Map { key, value } => Some(Collection::Hash(
                key.as_ref().clone(),
                value.as_ref().clone(),
            )),
            ResolvedType::GenericInstance { base, args: targs } => {
                let base_name = match base.as_ref() {
                    ResolvedType::Named { name, .. } => name.as_str(),
                    ResolvedType::Struct(s) => s.name.as_str(),
                    _ => "",
                };
                match (base_name, targs.len()) {
                    ("Vec", 1) => Some(Collection::Slice),
                    ("HashMap", 2) => {
                        Some(Collection::Hash(targs[0].clone(), targs[1].clone()))
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        match collection {
            Some(Collection::Chan(elem_ty)) => {
                if builtins::channel_method_symbol(&method.node).is_none() {
                    return Err(CodegenError::UnsupportedExpr {
                        message: format!("no method `{}` on channels", method.node),
                        span,
                    });
                }
                self.check_arity(&method.node, channel_method_arity(&method.node), args, span)?;
                let ch = self.generate_expr(object)?;
                self.channel_method(&ch, &elem_ty, &method.node, args, span)
                    .map(Some)
            }
            Some(Collection::Slice) if builtins::slice_method_symbol(&method.node).is_some() => {
                self.check_arity(&method.node, slice_method_arity(&method.node), args, span)?;
                let obj = self.generate_expr(object)?;
                let (slice, elem_ty) = self.slice_handle_of(&obj, stripped, span)?;
                self.slice_method(node, &slice, &elem_ty, &method.node, args, span)
                    .map(Some)
            }
            Some(Collection::Hash(key_ty, value_ty))
                if builtins::hashmap_method_symbol(&method.node).is_some() =>
            {
                self.check_arity(&method.node, hashmap_method_arity(&method.node), args, span)?;
                let obj = self.generate_expr(object)?;
                let map = self.hashmap_handle_of(&obj, stripped, span)?.ok_or_else(|| {
                    CodegenError::TypeMapping {
                        message: format!("`{}` has no hashmap backing", stripped),
                        span,
                    }
                })?;
                self.hashmap_method(&map, &key_ty, &value_ty, &method.node, args, span)
                    .map(Some)
            }
            _ => Ok(None),
        }
    }

    fn check_arity(
        &self,
        method: &str,
        expected: usize,
        args: &[Spanned<Expr>],
        span: Span,
    ) -> CodegenResult<()> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(CodegenError::InvalidOperation {
                message: format!(
                    "`{}` takes {} argument{}, got {}",
                    method,
                    expected,
                    if expected == 1 { "" } else { "s" },
                    args.len()
                ),
                span,
            })
        }
    }

    fn slice_method(
        &mut self,
        node: &Spanned<Expr>,
        slice: &str,
        elem_ty: &ResolvedType,
        method: &str,
        args: &[Spanned<Expr>],
        span: Span,
    ) -> CodegenResult<String> {
        let elem_ll = self.type_to_llvm(elem_ty, span)?;
        match method {
            "push" => {
                let val = self.generate_expr(&args[0])?;
                self.slice_push(slice, elem_ty, &val, span)?;
                Ok(String::new())
            }
            "get" | "pop" | "remove" => {
                let raw = self.next_reg();
                match method {
                    "get" => {
                        let idx = self.generate_expr(&args[0])?;
                        self.out.inst(format!(
                            "{} = call i8* @runtime_slice_get(%Slice* {}, i64 {})",
                            raw, slice, idx
                        ));
                    }
                    "pop" => self.out.inst(format!(
                        "{} = call i8* @runtime_slice_pop(%Slice* {})",
                        raw, slice
                    )),
                    _ => {
                        let idx = self.generate_expr(&args[0])?;
                        self.out.inst(format!(
                            "{} = call i8* @runtime_slice_remove(%Slice* {}, i64 {})",
                            raw, slice, idx
                        ));
                    }
                }
                let typed = self.next_reg();
                self.out
                    .inst(format!("{} = bitcast i8* {} to {}*", typed, raw, elem_ll));
                let reg = self.next_reg();
                self.out.inst(format!(
                    "{} = load {}, {}* {}",
                    reg, elem_ll, elem_ll, typed
                ));
                Ok(reg)
            }
            "set" | "insert" => {
                let idx = self.generate_expr(&args[0])?;
                let val = self.generate_expr(&args[1])?;
                let slot = self.boxed_arg(&val, elem_ty, span)?;
                let symbol = if method == "set" {
                    "runtime_slice_set"
                } else {
                    "runtime_slice_insert"
                };
                self.out.inst(format!(
                    "call void @{}(%Slice* {}, i64 {}, i8* {})",
                    symbol, slice, idx, slot
                ));
                Ok(String::new())
            }
            "len" | "cap" => {
                let symbol = if method == "len" {
                    "runtime_slice_len"
                } else {
                    "runtime_slice_cap"
                };
                let reg = self.next_reg();
                self.out.inst(format!(
                    "{} = call i64 @{}(%Slice* {})",
                    reg, symbol, slice
                ));
                Ok(reg)
            }
            "is_empty" => {
                let raw = self.next_reg();
                self.out.inst(format!(
                    "{} = call i8 @runtime_slice_is_empty(%Slice* {})",
                    raw, slice
                ));
                Ok(self.i8_to_bool(&raw))
            }
            "reserve" => {
                let n = self.generate_expr(&args[0])?;
                self.out.inst(format!(
                    "call void @runtime_slice_reserve(%Slice* {}, i64 {})",
                    slice, n
                ));
                Ok(String::new())
            }
            "clear" => {
                self.out.inst(format!(
                    "call void @runtime_slice_clear(%Slice* {})",
                    slice
                ));
                Ok(String::new())
            }
            "copy" | "subslice" => {
                let raw = self.next_reg();
                if method == "copy" {
                    self.out.inst(format!(
                        "{} = call %Slice* @runtime_slice_copy(%Slice* {})",
                        raw, slice
                    ));
                } else {
                    let from = self.generate_expr(&args[0])?;
                    let to = self.generate_expr(&args[1])?;
                    self.out.inst(format!(
                        "{} = call %Slice* @runtime_slice_subslice(%Slice* {}, i64 {}, i64 {})",
                        raw, slice, from, to
                    ));
                }
                // The result is re-wrapped when the call site expects a Vec.
                match self.expr_type_opt(node) {
                    Some(ty @ ResolvedType::GenericInstance { .. }) => {
                        let (wrapper, _) = self.ensure_instance(&ty, span)?;
                        self.wrap_runtime_handle(&wrapper, "%Slice*", &raw)
                    }
                    _ => Ok(raw),
                }
            }
            _ => unreachable!("unmapped slice method: {}", method),
        }
    }

    fn hashmap_method(
        &mut self,
        map: &str,
        key_ty: &ResolvedType,
        value_ty: &ResolvedType,
        method: &str,
        args: &[Spanned<Expr>],
        span: Span,
    ) -> CodegenResult<String> {
        match method {
            "put" => {
                let key = self.generate_expr(&args[0])?;
                let val = self.generate_expr(&args[1])?;
                let key_slot = self.boxed_arg(&key, key_ty, span)?;
                let val_slot = self.boxed_arg(&val, value_ty, span)?;
                self.out.inst(format!(
                    "call void @runtime_hashmap_put(%HashMap* {}, i8* {}, i8* {})",
                    map, key_slot, val_slot
                ));
                Ok(String::new())
            }
            "get" => {
                let key = self.generate_expr(&args[0])?;
                let key_slot = self.boxed_arg(&key, key_ty, span)?;
                let raw = self.next_reg();
                self.out.inst(format!(
                    "{} = call i8* @runtime_hashmap_get(%HashMap* {}, i8* {})",
                    raw, map, key_slot
                ));
                let value_ll = self.type_to_llvm(value_ty, span)?;
                let typed = self.next_reg();
                self.out.inst(format!(
                    "{} = bitcast i8* {} to {}*",
                    typed, raw, value_ll
                ));
                let reg = self.next_reg();
                self.out.inst(format!(
                    "{} = load {}, {}* {}",
                    reg, value_ll, value_ll, typed
                ));
                Ok(reg)
            }
            "contains_key" => {
                let key = self.generate_expr(&args[0])?;
                let key_slot = self.boxed_arg(&key, key_ty, span)?;
                let raw = self.next_reg();
                self.out.inst(format!(
                    "{} = call i8 @runtime_hashmap_contains_key(%HashMap* {}, i8* {})",
                    raw, map, key_slot
                ));
                Ok(self.i8_to_bool(&raw))
            }
            "len" => {
                let reg = self.next_reg();
                self.out.inst(format!(
                    "{} = call i64 @runtime_hashmap_len(%HashMap* {})",
                    reg, map
                ));
                Ok(reg)
            }
            "is_empty" => {
                let raw = self.next_reg();
                self.out.inst(format!(
                    "{} = call i8 @runtime_hashmap_is_empty(%HashMap* {})",
                    raw, map
                ));
                Ok(self.i8_to_bool(&raw))
            }
            "free" => {
                self.out.inst(format!(
                    "call void @runtime_hashmap_free(%HashMap* {})",
                    map
                ));
                Ok(String::new())
            }
            _ => unreachable!("unmapped hashmap method: {}", method),
        }
    }

    fn channel_method(
        &mut self,
        ch: &str,
        elem_ty: &ResolvedType,
        method: &str,
        args: &[Spanned<Expr>],
        span: Span,
    ) -> CodegenResult<String> {
        let elem_ll = self.type_to_llvm(elem_ty, span)?;
        match method {
            "send" | "try_send" => {
                let val = self.generate_expr(&args[0])?;
                let slot = self.next_reg();
                self.out.inst(format!("{} = alloca {}", slot, elem_ll));
                self.out.inst(format!(
                    "store {} {}, {}* {}",
                    elem_ll, val, elem_ll, slot
                ));
                let raw = self.next_reg();
                self.out.inst(format!(
                    "{} = bitcast {}* {} to i8*",
                    raw, elem_ll, slot
                ));
                if method == "send" {
                    self.out.inst(format!(
                        "call void @runtime_channel_send(%Channel* {}, i8* {})",
                        ch, raw
                    ));
                    Ok(String::new())
                } else {
                    let ok = self.next_reg();
                    self.out.inst(format!(
                        "{} = call i8 @runtime_channel_try_send(%Channel* {}, i8* {})",
                        ok, ch, raw
                    ));
                    Ok(self.i8_to_bool(&ok))
                }
            }
            "recv" => {
                let raw = self.next_reg();
                self.out.inst(format!(
                    "{} = call i8* @runtime_channel_recv(%Channel* {})",
                    raw, ch
                ));
                let typed = self.next_reg();
                self.out.inst(format!(
                    "{} = bitcast i8* {} to {}*",
                    typed, raw, elem_ll
                ));
                let reg = self.next_reg();
                self.out.inst(format!(
                    "{} = load {}, {}* {}",
                    reg, elem_ll, elem_ll, typed
                ));
                Ok(reg)
            }
            "try_recv" => {
                let out_slot = self.next_reg();
                self.out.inst(format!("{} = alloca i8*", out_slot));
                let ok = self.next_reg();
                self.out.inst(format!(
                    "{} = call i8 @runtime_channel_try_recv(%Channel* {}, i8** {})",
                    ok, ch, out_slot
                ));
                let flag = self.i8_to_bool(&ok);

                // The result is a { flag, value } pair. The out-parameter
                // is only dereferenced on the success path; a miss leaves
                // a zeroed payload.
                let tuple_ll = format!("{{ i1, {} }}", elem_ll);
                let result_slot = self.next_reg();
                self.out
                    .inst(format!("{} = alloca {}", result_slot, tuple_ll));
                let flag_ptr = self.next_reg();
                self.out.inst(format!(
                    "{} = getelementptr inbounds {}, {}* {}, i32 0, i32 0",
                    flag_ptr, tuple_ll, tuple_ll, result_slot
                ));
                self.out
                    .inst(format!("store i1 {}, i1* {}", flag, flag_ptr));

                let hit_label = self.next_label("tryrecv.hit");
                let miss_label = self.next_label("tryrecv.miss");
                let end_label = self.next_label("tryrecv.end");
                self.out.inst(format!(
                    "br i1 {}, label %{}, label %{}",
                    flag, hit_label, miss_label
                ));

                self.out.label(&hit_label);
                let raw = self.next_reg();
                self.out
                    .inst(format!("{} = load i8*, i8** {}", raw, out_slot));
                let typed = self.next_reg();
                self.out.inst(format!(
                    "{} = bitcast i8* {} to {}*",
                    typed, raw, elem_ll
                ));
                let value = self.next_reg();
                self.out.inst(format!(
                    "{} = load {}, {}* {}",
                    value, elem_ll, elem_ll, typed
                ));
                let value_ptr = self.next_reg();
                self.out.inst(format!(
                    "{} = getelementptr inbounds {}, {}* {}, i32 0, i32 1",
                    value_ptr, tuple_ll, tuple_ll, result_slot
                ));
                self.out.inst(format!(
                    "store {} {}, {}* {}",
                    elem_ll, value, elem_ll, value_ptr
                ));
                self.out.inst(format!("br label %{}", end_label));

                self.out.label(&miss_label);
                let miss_ptr = self.next_reg();
                self.out.inst(format!(
                    "{} = getelementptr inbounds {}, {}* {}, i32 0, i32 1",
                    miss_ptr, tuple_ll, tuple_ll, result_slot
                ));
                self.out.inst(format!(
                    "store {} {}, {}* {}",
                    elem_ll,
                    zero_value(&elem_ll),
                    elem_ll,
                    miss_ptr
                ));
                self.out.inst(format!("br label %{}", end_label));

                self.out.label(&end_label);
                let reg = self.next_reg();
                self.out.inst(format!(
                    "{} = load {}, {}* {}",
                    reg, tuple_ll, tuple_ll, result_slot
                ));
                Ok(reg)
            }
            "close" => {
                self.out.inst(format!(
                    "call void @runtime_channel_close(%Channel* {})",
                    ch
                ));
                Ok(String::new())
            }
            "is_closed" => {
                let raw = self.next_reg();
                self.out.inst(format!(
                    "{} = call i8 @runtime_channel_is_closed(%Channel* {})",
                    raw, ch
                ));
                Ok(self.i8_to_bool(&raw))
            }
            _ => unreachable!("unmapped channel method: {}", method),
        }
    }
}

fn slice_method_arity(method: &str) -> usize {
    match method {
        "push" | "get" | "reserve" | "remove" => 1,
        "set" | "insert" | "subslice" => 2,
        _ => 0,
    }
}

fn hashmap_method_arity(method: &str) -> usize {
    match method {
        "put" => 2,
        "get" | "contains_key" => 1,
        _ => 0,
    }
}

fn channel_method_arity(method: &str) -> usize {
    match method {
        "send" | "try_send" => 1,
        _ => 0,
    }
}
