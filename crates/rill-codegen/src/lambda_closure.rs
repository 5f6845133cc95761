//! Closure compilation
//!
//! Closures lower uniformly to `%Closure*` — `{ fn: i8* (i8*)*, data:
//! i8* }` — so function values and closures share one indirect call
//! protocol. Captured variables are packed into a heap env addressed by
//! the `data` field; the target function is emitted into the globals
//! bucket and unpacks its captures at entry.

use std::collections::HashSet;

use rill_ast::{
    Expr, IfClause, MatchArm, Param, Pattern, SelectOp, Span, Spanned, SpawnKind, Stmt, TypeAnn,
};
use rill_types::{FunctionType, ResolvedType};

use crate::builtins::is_builtin_name;
use crate::diagnostics::CodegenResult;
use crate::state::{FunctionContext, FunctionInfo, LocalVar, ParamInfo};
use crate::types::align_to;
use crate::CodeGenerator;

/// Where a captured variable lives in the enclosing function.
#[derive(Debug, Clone)]
pub(crate) enum CaptureSource {
    /// Stack slot address (a local)
    Slot(String),
    /// Incoming SSA value (a parameter)
    Value(String),
}

#[derive(Debug, Clone)]
pub(crate) struct CaptureInfo {
    pub name: String,
    pub ty: ResolvedType,
    pub source: CaptureSource,
}

impl CodeGenerator<'_> {
    // Capture discovery
    // ========================================================================

    /// Free variables of a function-literal or spawn body: used in the
    /// body, not bound inside it, present in the enclosing scope, and not
    /// a builtin name.
    pub(crate) fn find_captures(
        &self,
        params: &[Param],
        body: &[Spanned<Stmt>],
    ) -> Vec<CaptureInfo> {
        let mut bound: HashSet<String> =
            params.iter().map(|p| p.name.node.clone()).collect();
        let mut free: Vec<String> = Vec::new();
        for stmt in body {
            self.free_vars_in_stmt(&stmt.node, &mut bound, &mut free);
        }

        let mut seen = HashSet::new();
        free.retain(|name| seen.insert(name.clone()));

        free.into_iter()
            .filter_map(|name| {
                if let Some(local) = self.fn_ctx.locals.get(&name) {
                    Some(CaptureInfo {
                        name,
                        ty: local.ty.clone(),
                        source: CaptureSource::Slot(local.addr.clone()),
                    })
                } else {
                    self.fn_ctx.param(&name).map(|param| CaptureInfo {
                        name,
                        ty: param.ty.clone(),
                        source: CaptureSource::Value(param.register.clone()),
                    })
                }
            })
            .collect()
    }

    fn free_vars_in_stmt(
        &self,
        stmt: &Stmt,
        bound: &mut HashSet<String>,
        free: &mut Vec<String>,
    ) {
        match stmt {
            Stmt::Let { name, value, .. } => {
                self.free_vars_in_expr(&value.node, bound, free);
                bound.insert(name.node.clone());
            }
            Stmt::Expr(e) => self.free_vars_in_expr(&e.node, bound, free),
            Stmt::Return(Some(e)) => self.free_vars_in_expr(&e.node, bound, free),
            Stmt::Return(None) | Stmt::Break | Stmt::Continue => {}
            Stmt::If {
                clauses,
                else_block,
            } => {
                for clause in clauses {
                    self.free_vars_in_expr(&clause.cond.node, bound, free);
                    self.free_vars_in_block(&clause.body, bound, free);
                }
                if let Some(stmts) = else_block {
                    self.free_vars_in_block(stmts, bound, free);
                }
            }
            Stmt::While { cond, body } => {
                self.free_vars_in_expr(&cond.node, bound, free);
                self.free_vars_in_block(body, bound, free);
            }
            Stmt::For {
                var,
                iterable,
                body,
            } => {
                self.free_vars_in_expr(&iterable.node, bound, free);
                let added = bound.insert(var.node.clone());
                self.free_vars_in_block(body, bound, free);
                if added {
                    bound.remove(&var.node);
                }
            }
            Stmt::Spawn(kind) => match kind {
                SpawnKind::Call(call) => self.free_vars_in_expr(&call.node, bound, free),
                SpawnKind::Block(stmts) => self.free_vars_in_block(stmts, bound, free),
                SpawnKind::FnLit { func, args } => {
                    self.free_vars_in_expr(&func.node, bound, free);
                    for arg in args {
                        self.free_vars_in_expr(&arg.node, bound, free);
                    }
                }
            },
            Stmt::Select { cases } => {
                for case in cases {
                    let mut case_bound = Vec::new();
                    match &case.op {
                        SelectOp::Send { channel, value } => {
                            self.free_vars_in_expr(&channel.node, bound, free);
                            self.free_vars_in_expr(&value.node, bound, free);
                        }
                        SelectOp::Recv { channel, binding } => {
                            self.free_vars_in_expr(&channel.node, bound, free);
                            if let Some(name) = binding {
                                if bound.insert(name.node.clone()) {
                                    case_bound.push(name.node.clone());
                                }
                            }
                        }
                    }
                    self.free_vars_in_block(&case.body, bound, free);
                    for name in case_bound {
                        bound.remove(&name);
                    }
                }
            }
        }
    }

    /// Walk a nested block, restoring the bound set afterwards so sibling
    /// scopes do not see its bindings.
    fn free_vars_in_block(
        &self,
        stmts: &[Spanned<Stmt>],
        bound: &mut HashSet<String>,
        free: &mut Vec<String>,
    ) {
        let snapshot: HashSet<String> = bound.clone();
        for stmt in stmts {
            self.free_vars_in_stmt(&stmt.node, bound, free);
        }
        *bound = snapshot;
    }

    fn free_vars_in_expr(
        &self,
        expr: &Expr,
        bound: &mut HashSet<String>,
        free: &mut Vec<String>,
    ) {
        match expr {
            Expr::Ident(name) => {
                let in_scope = self.fn_ctx.locals.contains_key(name)
                    || self.fn_ctx.param(name).is_some();
                if !bound.contains(name) && !is_builtin_name(name) && in_scope {
                    free.push(name.clone());
                }
            }
            Expr::Prefix { expr, .. } | Expr::Recv { channel: expr } => {
                self.free_vars_in_expr(&expr.node, bound, free)
            }
            Expr::Infix { left, right, .. } => {
                self.free_vars_in_expr(&left.node, bound, free);
                self.free_vars_in_expr(&right.node, bound, free);
            }
            Expr::Call { callee, args } => {
                self.free_vars_in_expr(&callee.node, bound, free);
                for arg in args {
                    self.free_vars_in_expr(&arg.node, bound, free);
                }
            }
            Expr::TypeApply { base, .. } => self.free_vars_in_expr(&base.node, bound, free),
            Expr::Field { object, .. } => self.free_vars_in_expr(&object.node, bound, free),
            Expr::Index { base, index } => {
                self.free_vars_in_expr(&base.node, bound, free);
                self.free_vars_in_expr(&index.node, bound, free);
            }
            Expr::StructLit { fields, .. } => {
                for (_, value) in fields {
                    self.free_vars_in_expr(&value.node, bound, free);
                }
            }
            Expr::ArrayLit(elems) | Expr::TupleLit(elems) => {
                for e in elems {
                    self.free_vars_in_expr(&e.node, bound, free);
                }
            }
            Expr::FnLit { params, body, .. } => {
                // Nested closure: separate bound set seeded with its params.
                let mut inner = bound.clone();
                for p in params {
                    inner.insert(p.name.node.clone());
                }
                for stmt in body {
                    self.free_vars_in_stmt(&stmt.node, &mut inner, free);
                }
            }
            Expr::Block(stmts) => self.free_vars_in_block(stmts, bound, free),
            Expr::If {
                clauses,
                else_block,
            } => {
                for IfClause { cond, body } in clauses {
                    self.free_vars_in_expr(&cond.node, bound, free);
                    self.free_vars_in_block(body, bound, free);
                }
                if let Some(stmts) = else_block {
                    self.free_vars_in_block(stmts, bound, free);
                }
            }
            Expr::Match { subject, arms } => {
                self.free_vars_in_expr(&subject.node, bound, free);
                for MatchArm { pattern, body } in arms {
                    let snapshot = bound.clone();
                    bind_pattern_names(&pattern.node, bound);
                    self.free_vars_in_expr(&body.node, bound, free);
                    *bound = snapshot;
                }
            }
            Expr::Assign { target, value } | Expr::AssignOp { target, value, .. } => {
                self.free_vars_in_expr(&target.node, bound, free);
                self.free_vars_in_expr(&value.node, bound, free);
            }
            Expr::Send { channel, value } => {
                self.free_vars_in_expr(&channel.node, bound, free);
                self.free_vars_in_expr(&value.node, bound, free);
            }
            // Literals and paths reference no variables.
            Expr::Int(_)
            | Expr::Float(_)
            | Expr::Bool(_)
            | Expr::Str(_)
            | Expr::Nil
            | Expr::Path { .. } => {}
        }
    }

    // Env layout and packing
    // ========================================================================

    /// Byte offsets for a packed env/wrapper struct, aligning each slot to
    /// its type's natural alignment. Returns per-entry offsets and the
    /// total size (min 8).
    pub(crate) fn pack_layout(&self, types: &[ResolvedType]) -> (Vec<u64>, u64) {
        let mut offsets = Vec::with_capacity(types.len());
        let mut offset = 0u64;
        for ty in types {
            offset = align_to(offset, self.type_align(ty));
            offsets.push(offset);
            offset += self.type_size(ty);
        }
        (offsets, align_to(offset, 8).max(8))
    }

    /// Store a value at a byte offset inside a raw `i8*` env block.
    pub(crate) fn store_at_offset(
        &mut self,
        env: &str,
        offset: u64,
        ll: &str,
        val: &str,
    ) {
        let ptr = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr i8, i8* {}, i64 {}",
            ptr, env, offset
        ));
        let typed = self.next_reg();
        self.out
            .inst(format!("{} = bitcast i8* {} to {}*", typed, ptr, ll));
        self.out
            .inst(format!("store {} {}, {}* {}", ll, val, ll, typed));
    }

    /// Load a value from a byte offset inside a raw `i8*` env block.
    pub(crate) fn load_at_offset(&mut self, env: &str, offset: u64, ll: &str) -> String {
        let ptr = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr i8, i8* {}, i64 {}",
            ptr, env, offset
        ));
        let typed = self.next_reg();
        self.out
            .inst(format!("{} = bitcast i8* {} to {}*", typed, ptr, ll));
        let value = self.next_reg();
        self.out
            .inst(format!("{} = load {}, {}* {}", value, ll, ll, typed));
        value
    }

    // Closure construction
    // ========================================================================

    pub(crate) fn generate_closure(
        &mut self,
        node: &Spanned<Expr>,
        params: &[Param],
        ret: Option<&Spanned<TypeAnn>>,
        body: &[Spanned<Stmt>],
    ) -> CodegenResult<String> {
        let captures = self.find_captures(params, body);

        let mut param_tys: Vec<(String, ResolvedType)> = Vec::with_capacity(params.len());
        for p in params {
            let ty = self.resolve_type_ann(&p.ty, &Default::default())?;
            param_tys.push((p.name.node.clone(), ty));
        }
        let ret_ty = match ret {
            Some(ann) => Some(self.resolve_type_ann(ann, &Default::default())?),
            None => match self.expr_type_opt(node) {
                Some(ResolvedType::Function(ft)) => ft.ret.map(|b| *b),
                _ => None,
            },
        };

        // Pack the env before emitting the target function: captured
        // values are read from the enclosing frame.
        let env = if captures.is_empty() {
            "null".to_string()
        } else {
            let capture_tys: Vec<ResolvedType> =
                captures.iter().map(|c| c.ty.clone()).collect();
            let (offsets, total) = self.pack_layout(&capture_tys);
            let env = self.next_reg();
            self.out.inst(format!(
                "{} = call i8* @runtime_alloc(i64 {})",
                env, total
            ));
            for (capture, offset) in captures.iter().zip(offsets.iter()) {
                let ll = self.type_to_llvm(&capture.ty, node.span)?;
                let value = match &capture.source {
                    CaptureSource::Slot(addr) => {
                        let value = self.next_reg();
                        self.out.inst(format!(
                            "{} = load {}, {}* {}",
                            value, ll, ll, addr
                        ));
                        value
                    }
                    CaptureSource::Value(register) => register.clone(),
                };
                self.store_at_offset(&env, *offset, &ll, &value);
            }
            env
        };

        let fn_name = format!("closure_{}", self.wrapper_counter);
        self.wrapper_counter += 1;
        let fn_ty =
            self.emit_closure_target(&fn_name, &param_tys, ret_ty.as_ref(), &captures, body, node.span)?;

        self.closure_handle(&format!(
            "bitcast ({} @{} to i8* (i8*)*)",
            fn_ty, fn_name
        ), &env)
    }

    /// Emit the closure's target function into the globals bucket.
    /// Returns the function's native pointer type.
    fn emit_closure_target(
        &mut self,
        fn_name: &str,
        params: &[(String, ResolvedType)],
        ret_ty: Option<&ResolvedType>,
        captures: &[CaptureInfo],
        body: &[Spanned<Stmt>],
        span: Span,
    ) -> CodegenResult<String> {
        let mut param_lls = Vec::with_capacity(params.len() + 1);
        for (name, ty) in params {
            let ll = self.type_to_llvm(ty, span)?;
            param_lls.push(format!("{} %{}", ll, rill_types::sanitize(name)));
        }
        param_lls.push("i8* %env".to_string());
        let ret_ll = match ret_ty {
            Some(ty) => self.type_to_llvm(ty, span)?,
            None => "void".to_string(),
        };

        let saved_ctx = std::mem::replace(
            &mut self.fn_ctx,
            FunctionContext {
                current_function: Some(fn_name.to_string()),
                current_return_type: ret_ty.cloned(),
                params: params
                    .iter()
                    .map(|(name, ty)| ParamInfo {
                        name: name.clone(),
                        ty: ty.clone(),
                        register: format!("%{}", rill_types::sanitize(name)),
                    })
                    .collect(),
                ..FunctionContext::default()
            },
        );

        let result = self.with_global_emission(|gen| {
            gen.out.line(format!(
                "define {} @{}({}) {{",
                ret_ll,
                fn_name,
                param_lls.join(", ")
            ));
            gen.out.label("entry");

            // Unpack captures into fresh stack slots.
            let capture_tys: Vec<ResolvedType> =
                captures.iter().map(|c| c.ty.clone()).collect();
            let (offsets, _) = gen.pack_layout(&capture_tys);
            for (capture, offset) in captures.iter().zip(offsets.iter()) {
                let ll = gen.type_to_llvm(&capture.ty, span)?;
                let value = gen.load_at_offset("%env", *offset, &ll);
                let slot = gen.fresh_local_name(&capture.name);
                gen.out.inst(format!("%{} = alloca {}", slot, ll));
                gen.out
                    .inst(format!("store {} {}, {}* %{}", ll, value, ll, slot));
                gen.fn_ctx.locals.insert(
                    capture.name.clone(),
                    LocalVar {
                        ty: capture.ty.clone(),
                        addr: format!("%{}", slot),
                    },
                );
            }

            let (_, flow) = gen.generate_block(body);
            if !flow.is_terminated() {
                if ret_ll == "void" {
                    gen.out.inst("ret void");
                } else {
                    gen.out.inst(format!(
                        "ret {} {}",
                        ret_ll,
                        crate::types::zero_value(&ret_ll)
                    ));
                }
            }
            gen.out.line("}");
            Ok(())
        });
        self.fn_ctx = saved_ctx;
        result?;

        let bare_params: Vec<String> = params
            .iter()
            .map(|(_, ty)| self.type_to_llvm(ty, span))
            .collect::<CodegenResult<Vec<_>>>()?
            .into_iter()
            .chain(std::iter::once("i8*".to_string()))
            .collect();
        Ok(format!("{} ({})*", ret_ll, bare_params.join(", ")))
    }

    /// Allocate a `%Closure` handle: function pointer in field 0, env (or
    /// null) in field 1.
    fn closure_handle(&mut self, fn_ptr: &str, env: &str) -> CodegenResult<String> {
        let raw = self.next_reg();
        self.out
            .inst(format!("{} = call i8* @runtime_alloc(i64 16)", raw));
        let handle = self.next_reg();
        self.out
            .inst(format!("{} = bitcast i8* {} to %Closure*", handle, raw));
        let fn_field = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %Closure, %Closure* {}, i32 0, i32 0",
            fn_field, handle
        ));
        self.out.inst(format!(
            "store i8* (i8*)* {}, i8* (i8*)** {}",
            fn_ptr, fn_field
        ));
        let env_field = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %Closure, %Closure* {}, i32 0, i32 1",
            env_field, handle
        ));
        self.out
            .inst(format!("store i8* {}, i8** {}", env, env_field));
        Ok(handle)
    }

    /// A closure handle over a plain function: no env, function pointer
    /// cast to the uniform slot type.
    pub(crate) fn function_closure_handle(
        &mut self,
        info: &FunctionInfo,
        span: Span,
    ) -> CodegenResult<String> {
        let param_lls = info
            .params
            .iter()
            .map(|(_, ty)| self.type_to_llvm(ty, span))
            .collect::<CodegenResult<Vec<_>>>()?;
        let ret_ll = match &info.ret {
            Some(ty) => self.type_to_llvm(ty, span)?,
            None => "void".to_string(),
        };
        let fn_ty = format!("{} ({})*", ret_ll, param_lls.join(", "));
        let symbol = info.symbol.clone();
        self.closure_handle(
            &format!("bitcast ({} @{} to i8* (i8*)*)", fn_ty, symbol),
            "null",
        )
    }

    /// Indirect call through a `%Closure*`: load the function pointer and
    /// env, cast to the full target signature, call with the env appended.
    pub(crate) fn generate_closure_call(
        &mut self,
        handle: &str,
        ft: &FunctionType,
        args: &[Spanned<Expr>],
        node: &Spanned<Expr>,
    ) -> CodegenResult<String> {
        let fn_field = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %Closure, %Closure* {}, i32 0, i32 0",
            fn_field, handle
        ));
        let fn_raw = self.next_reg();
        self.out.inst(format!(
            "{} = load i8* (i8*)*, i8* (i8*)** {}",
            fn_raw, fn_field
        ));
        let env_field = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %Closure, %Closure* {}, i32 0, i32 1",
            env_field, handle
        ));
        let env = self.next_reg();
        self.out
            .inst(format!("{} = load i8*, i8** {}", env, env_field));

        let mut param_lls = Vec::with_capacity(ft.params.len() + 1);
        for p in &ft.params {
            param_lls.push(self.type_to_llvm(p, node.span)?);
        }
        param_lls.push("i8*".to_string());
        let ret_ll = match &ft.ret {
            Some(ty) => self.type_to_llvm(ty, node.span)?,
            None => "void".to_string(),
        };
        let full_ty = format!("{} ({})*", ret_ll, param_lls.join(", "));
        let fn_ptr = self.next_reg();
        self.out.inst(format!(
            "{} = bitcast i8* (i8*)* {} to {}",
            fn_ptr, fn_raw, full_ty
        ));

        let mut call_args = Vec::with_capacity(args.len() + 1);
        for (arg, pll) in args.iter().zip(param_lls.iter()) {
            let val = self.generate_expr(arg)?;
            let arg_ll = match self.expr_type_opt(arg) {
                Some(ty) => self.type_to_llvm(&ty, arg.span)?,
                None => pll.clone(),
            };
            let val = self.cast_value(&val, &arg_ll, pll);
            call_args.push(format!("{} {}", pll, val));
        }
        call_args.push(format!("i8* {}", env));

        if ret_ll == "void" {
            self.out
                .inst(format!("call void {}({})", fn_ptr, call_args.join(", ")));
            return Ok(String::new());
        }
        let reg = self.next_reg();
        self.out.inst(format!(
            "{} = call {} {}({})",
            reg, ret_ll, fn_ptr, call_args.join(", ")
        ));
        Ok(reg)
    }
}

/// Names a pattern binds, added to the bound set while walking an arm.
fn bind_pattern_names(pattern: &Pattern, bound: &mut HashSet<String>) {
    match pattern {
        Pattern::Binding(name) => {
            bound.insert(name.clone());
        }
        Pattern::Struct { fields, .. } => {
            for (_, sub) in fields {
                bind_pattern_names(&sub.node, bound);
            }
        }
        Pattern::Variant { bindings, .. } => {
            for sub in bindings {
                bind_pattern_names(&sub.node, bound);
            }
        }
        Pattern::Tuple(subs) => {
            for sub in subs {
                bind_pattern_names(&sub.node, bound);
            }
        }
        Pattern::Wildcard | Pattern::Literal(_) => {}
    }
}
