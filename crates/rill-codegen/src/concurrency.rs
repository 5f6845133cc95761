//! Spawn and select lowering
//!
//! `spawn` launches a detached kernel thread: a wrapper function receives
//! one `i8*` argument, unpacks the spawn's arguments and captured
//! variables from a heap struct, and runs the target. `select` compiles to
//! a polling loop over non-blocking channel operations with a 1 ms
//! back-off.

use rill_ast::{Expr, SelectCase, SelectOp, Span, Spanned, SpawnKind, Stmt};
use rill_types::{sanitize, Primitive, ResolvedType};

use crate::diagnostics::{CodegenError, CodegenResult};
use crate::lambda_closure::{CaptureInfo, CaptureSource};
use crate::state::{FunctionContext, LocalVar};
use crate::CodeGenerator;

/// Nanoseconds slept between polling rounds of a `select`.
const SELECT_BACKOFF_NS: u64 = 1_000_000;

impl CodeGenerator<'_> {
    pub(crate) fn generate_spawn(
        &mut self,
        kind: &SpawnKind,
        span: Span,
    ) -> CodegenResult<()> {
        match kind {
            SpawnKind::Call(call) => self.generate_spawn_call(call, span),
            SpawnKind::Block(body) => {
                let captures = self.find_captures(&[], body);
                self.generate_spawn_body("block", &[], &captures, body, span)
            }
            SpawnKind::FnLit { func, args } => {
                let Expr::FnLit { params, body, .. } = &func.node else {
                    return Err(CodegenError::UnsupportedStmt {
                        message: "spawn expects a call, a block, or a function literal"
                            .to_string(),
                        span: func.span,
                    });
                };
                if params.len() != args.len() {
                    return Err(CodegenError::UnsupportedStmt {
                        message: format!(
                            "spawned function takes {} arguments, got {}",
                            params.len(),
                            args.len()
                        ),
                        span,
                    });
                }
                let captures = self.find_captures(params, body);
                // Arguments are evaluated in the caller and packed ahead
                // of the captures; the wrapper rebinds them by name.
                let mut packed_args = Vec::with_capacity(args.len());
                for (param, arg) in params.iter().zip(args.iter()) {
                    let ty = self.resolve_type_ann(&param.ty, &Default::default())?;
                    let val = self.generate_expr(arg)?;
                    packed_args.push((param.name.node.clone(), ty, val));
                }
                self.generate_spawn_body("fn", &packed_args, &captures, body, span)
            }
        }
    }

    /// `spawn f(args)` — the wrapper unpacks the arguments and calls `f`.
    fn generate_spawn_call(
        &mut self,
        call: &Spanned<Expr>,
        span: Span,
    ) -> CodegenResult<()> {
        let Expr::Call { callee, args } = &call.node else {
            return Err(CodegenError::UnsupportedStmt {
                message: "spawn expects a call, a block, or a function literal".to_string(),
                span: call.span,
            });
        };
        let Expr::Ident(fn_name) = &callee.node else {
            return Err(CodegenError::UnsupportedStmt {
                message: "spawned calls must name a function".to_string(),
                span: callee.span,
            });
        };
        let info = self
            .types
            .functions
            .get(fn_name)
            .cloned()
            .ok_or_else(|| CodegenError::UndefinedVar {
                name: fn_name.clone(),
                suggestion: None,
                span: callee.span,
            })?;

        let wrapper = format!(
            "spawn_wrapper_{}_{}",
            sanitize(fn_name),
            self.wrapper_counter
        );
        self.wrapper_counter += 1;

        // Lower the arguments in the caller.
        let mut lowered: Vec<(ResolvedType, String)> = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let ty = match info.params.get(i) {
                Some((_, ty)) => ty.clone(),
                None => self.expr_type(arg)?,
            };
            let val = self.generate_expr(arg)?;
            lowered.push((ty, val));
        }

        let ret_ll = match &info.ret {
            Some(ty) => self.type_to_llvm(ty, span)?,
            None => "void".to_string(),
        };
        let symbol = info.symbol.clone();

        if lowered.is_empty() {
            // Simple path: nothing to pack.
            self.with_global_emission(|gen| {
                gen.out
                    .line(format!("define i8* @{}(i8* %arg) {{", wrapper));
                gen.out.label("entry");
                if ret_ll == "void" {
                    gen.out.inst(format!("call void @{}()", symbol));
                } else {
                    let r = gen.next_reg();
                    gen.out
                        .inst(format!("{} = call {} @{}()", r, ret_ll, symbol));
                }
                gen.out.inst("ret i8* null");
                gen.out.line("}");
                Ok(())
            })?;
            self.emit_thread_launch(&wrapper, "null");
            return Ok(());
        }

        // Packed path: arguments into a heap struct.
        let arg_tys: Vec<ResolvedType> = lowered.iter().map(|(ty, _)| ty.clone()).collect();
        let (offsets, total) = self.pack_layout(&arg_tys);
        let pack = self.next_reg();
        self.out.inst(format!(
            "{} = call i8* @runtime_alloc(i64 {})",
            pack, total
        ));
        for ((ty, val), offset) in lowered.iter().zip(offsets.iter()) {
            let ll = self.type_to_llvm(ty, span)?;
            self.store_at_offset(&pack, *offset, &ll, val);
        }

        let mut arg_lls = Vec::with_capacity(arg_tys.len());
        for ty in &arg_tys {
            arg_lls.push(self.type_to_llvm(ty, span)?);
        }
        self.with_global_emission(|gen| {
            gen.out
                .line(format!("define i8* @{}(i8* %arg) {{", wrapper));
            gen.out.label("entry");
            let mut call_args = Vec::with_capacity(arg_lls.len());
            for (ll, offset) in arg_lls.iter().zip(offsets.iter()) {
                let value = gen.load_at_offset("%arg", *offset, ll);
                call_args.push(format!("{} {}", ll, value));
            }
            if ret_ll == "void" {
                gen.out
                    .inst(format!("call void @{}({})", symbol, call_args.join(", ")));
            } else {
                let r = gen.next_reg();
                gen.out.inst(format!(
                    "{} = call {} @{}({})",
                    r,
                    ret_ll,
                    symbol,
                    call_args.join(", ")
                ));
            }
            gen.out.inst("ret i8* null");
            gen.out.line("}");
            Ok(())
        })?;
        self.emit_thread_launch(&wrapper, &pack);
        Ok(())
    }

    /// `spawn { body }` and `spawn fn(params){ body }(args)` — the wrapper
    /// rebinds packed arguments and captures as locals, then runs the
    /// body.
    fn generate_spawn_body(
        &mut self,
        base: &str,
        args: &[(String, ResolvedType, String)],
        captures: &[CaptureInfo],
        body: &[Spanned<Stmt>],
        span: Span,
    ) -> CodegenResult<()> {
        let wrapper = format!("spawn_wrapper_{}_{}", base, self.wrapper_counter);
        self.wrapper_counter += 1;

        let packed: Vec<(String, ResolvedType, Option<String>)> = args
            .iter()
            .map(|(name, ty, val)| (name.clone(), ty.clone(), Some(val.clone())))
            .chain(captures.iter().map(|c| (c.name.clone(), c.ty.clone(), None)))
            .collect();

        let arg_text = if packed.is_empty() {
            "null".to_string()
        } else {
            let tys: Vec<ResolvedType> = packed.iter().map(|(_, ty, _)| ty.clone()).collect();
            let (offsets, total) = self.pack_layout(&tys);
            let pack = self.next_reg();
            self.out.inst(format!(
                "{} = call i8* @runtime_alloc(i64 {})",
                pack, total
            ));
            for ((name, ty, val), offset) in packed.iter().zip(offsets.iter()) {
                let ll = self.type_to_llvm(ty, span)?;
                let value = match val {
                    Some(v) => v.clone(),
                    None => {
                        // Captured variable: read it from the enclosing
                        // frame.
                        let capture = captures
                            .iter()
                            .find(|c| &c.name == name)
                            .expect("capture vanished between discovery and packing");
                        match &capture.source {
                            CaptureSource::Slot(addr) => {
                                let value = self.next_reg();
                                self.out.inst(format!(
                                    "{} = load {}, {}* {}",
                                    value, ll, ll, addr
                                ));
                                value
                            }
                            CaptureSource::Value(register) => register.clone(),
                        }
                    }
                };
                self.store_at_offset(&pack, *offset, &ll, &value);
            }
            pack
        };

        let saved_ctx = std::mem::take(&mut self.fn_ctx);
        self.fn_ctx = FunctionContext {
            current_function: Some(wrapper.clone()),
            // A bare `return` inside the body must produce `ret i8* null`.
            current_return_type: Some(ResolvedType::Primitive(Primitive::Nil)),
            ..FunctionContext::default()
        };
        let result = self.with_global_emission(|gen| {
            gen.out
                .line(format!("define i8* @{}(i8* %arg) {{", wrapper));
            gen.out.label("entry");

            if !packed.is_empty() {
                let tys: Vec<ResolvedType> =
                    packed.iter().map(|(_, ty, _)| ty.clone()).collect();
                let (offsets, _) = gen.pack_layout(&tys);
                for ((name, ty, _), offset) in packed.iter().zip(offsets.iter()) {
                    let ll = gen.type_to_llvm(ty, span)?;
                    let value = gen.load_at_offset("%arg", *offset, &ll);
                    let slot = gen.fresh_local_name(name);
                    gen.out.inst(format!("%{} = alloca {}", slot, ll));
                    gen.out
                        .inst(format!("store {} {}, {}* %{}", ll, value, ll, slot));
                    gen.fn_ctx.locals.insert(
                        name.clone(),
                        LocalVar {
                            ty: ty.clone(),
                            addr: format!("%{}", slot),
                        },
                    );
                }
            }

            let (_, flow) = gen.generate_block(body);
            if !flow.is_terminated() {
                gen.out.inst("ret i8* null");
            }
            gen.out.line("}");
            Ok(())
        });
        self.fn_ctx = saved_ctx;
        result?;

        self.emit_thread_launch(&wrapper, &arg_text);
        Ok(())
    }

    fn emit_thread_launch(&mut self, wrapper: &str, arg: &str) {
        let tid_slot = self.next_reg();
        self.out.inst(format!("{} = alloca i64", tid_slot));
        let rc = self.next_reg();
        self.out.inst(format!(
            "{} = call i32 @pthread_create(i64* {}, i8* null, i8* (i8*)* @{}, i8* {})",
            rc, tid_slot, wrapper, arg
        ));
        let tid = self.next_reg();
        self.out
            .inst(format!("{} = load i64, i64* {}", tid, tid_slot));
        let rc2 = self.next_reg();
        self.out
            .inst(format!("{} = call i32 @pthread_detach(i64 {})", rc2, tid));
    }

    // Select
    // ========================================================================

    pub(crate) fn generate_select(
        &mut self,
        cases: &[SelectCase],
        span: Span,
    ) -> CodegenResult<()> {
        if cases.is_empty() {
            return Ok(());
        }

        // Hoist per-case slots out of the polling loop.
        let mut case_slots: Vec<(ResolvedType, String, String)> = Vec::with_capacity(cases.len());
        for case in cases {
            let channel = match &case.op {
                SelectOp::Send { channel, .. } | SelectOp::Recv { channel, .. } => channel,
            };
            let ch_ty = self.expr_type(channel)?;
            let elem_ty = match ch_ty.strip_refs() {
                ResolvedType::Channel(elem) => elem.as_ref().clone(),
                other => {
                    return Err(CodegenError::InvalidOperation {
                        message: format!("select case on non-channel `{}`", other),
                        span: channel.span,
                    })
                }
            };
            let elem_ll = self.type_to_llvm(&elem_ty, span)?;
            let slot = self.next_reg();
            match &case.op {
                SelectOp::Send { .. } => {
                    self.out.inst(format!("{} = alloca {}", slot, elem_ll));
                }
                SelectOp::Recv { .. } => {
                    self.out.inst(format!("{} = alloca i8*", slot));
                }
            }
            case_slots.push((elem_ty, elem_ll, slot));
        }

        let loop_label = self.next_label("select.loop");
        let retry_label = self.next_label("select.retry");
        let end_label = self.next_label("select.end");
        let case_labels: Vec<String> = cases
            .iter()
            .map(|_| self.next_label("select.case"))
            .collect();
        let success_labels: Vec<String> = cases
            .iter()
            .map(|_| self.next_label("select.success"))
            .collect();

        self.out.inst(format!("br label %{}", loop_label));
        self.out.label(&loop_label);
        self.out.inst(format!("br label %{}", case_labels[0]));

        for (i, case) in cases.iter().enumerate() {
            let next_label = case_labels
                .get(i + 1)
                .cloned()
                .unwrap_or_else(|| retry_label.clone());
            let (_, elem_ll, slot) = case_slots[i].clone();

            self.out.label(&case_labels[i]);
            let ok = match &case.op {
                SelectOp::Send { channel, value } => {
                    let ch = self.generate_expr(channel)?;
                    let val = self.generate_expr(value)?;
                    self.out.inst(format!(
                        "store {} {}, {}* {}",
                        elem_ll, val, elem_ll, slot
                    ));
                    let raw = self.next_reg();
                    self.out.inst(format!(
                        "{} = bitcast {}* {} to i8*",
                        raw, elem_ll, slot
                    ));
                    let ok = self.next_reg();
                    self.out.inst(format!(
                        "{} = call i8 @runtime_channel_try_send(%Channel* {}, i8* {})",
                        ok, ch, raw
                    ));
                    ok
                }
                SelectOp::Recv { channel, .. } => {
                    let ch = self.generate_expr(channel)?;
                    let ok = self.next_reg();
                    self.out.inst(format!(
                        "{} = call i8 @runtime_channel_try_recv(%Channel* {}, i8** {})",
                        ok, ch, slot
                    ));
                    ok
                }
            };
            let cond = self.next_reg();
            self.out
                .inst(format!("{} = icmp eq i8 {}, 1", cond, ok));
            self.out.inst(format!(
                "br i1 {}, label %{}, label %{}",
                cond, success_labels[i], next_label
            ));
        }

        self.out.label(&retry_label);
        self.out.inst(format!(
            "call void @runtime_nanosleep(i64 {})",
            SELECT_BACKOFF_NS
        ));
        self.out.inst(format!("br label %{}", loop_label));

        for (i, case) in cases.iter().enumerate() {
            self.out.label(&success_labels[i]);
            let (elem_ty, elem_ll, slot) = case_slots[i].clone();

            if let SelectOp::Recv {
                binding: Some(name),
                ..
            } = &case.op
            {
                let raw = self.next_reg();
                self.out
                    .inst(format!("{} = load i8*, i8** {}", raw, slot));
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
                let local = self.fresh_local_name(&name.node);
                self.out
                    .inst(format!("%{} = alloca {}", local, elem_ll));
                self.out.inst(format!(
                    "store {} {}, {}* %{}",
                    elem_ll, value, elem_ll, local
                ));
                self.fn_ctx.locals.insert(
                    name.node.clone(),
                    LocalVar {
                        ty: elem_ty,
                        addr: format!("%{}", local),
                    },
                );
            }

            let (_, flow) = self.generate_block(&case.body);
            if !flow.is_terminated() {
                self.out.inst(format!("br label %{}", end_label));
            }
        }

        self.out.label(&end_label);
        Ok(())
    }
}
