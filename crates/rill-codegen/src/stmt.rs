//! Statement lowering
//!
//! Statements are the recovery boundary: an error inside one statement is
//! reported and the lowerer moves on to the next, so a single run surfaces
//! as many diagnostics as possible.

use rill_ast::{Expr, IfClause, Span, Spanned, Stmt};
use rill_types::ResolvedType;

use crate::diagnostics::{CodegenError, CodegenResult};
use crate::state::{LocalVar, LoopLabels};
use crate::types::zero_value;
use crate::CodeGenerator;

/// Whether the current basic block still needs a terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Open,
    Terminated,
}

impl Flow {
    pub(crate) fn is_terminated(self) -> bool {
        matches!(self, Flow::Terminated)
    }
}

impl CodeGenerator<'_> {
    /// Lower a statement list. Returns the value register of the trailing
    /// expression statement (for block expressions) and the flow state.
    ///
    /// Statements after a terminator are dropped: the block already ended.
    pub(crate) fn generate_block(&mut self, stmts: &[Spanned<Stmt>]) -> (String, Flow) {
        let mut last_value = String::new();
        for stmt in stmts {
            match self.generate_stmt(stmt) {
                Ok((value, Flow::Terminated)) => return (value, Flow::Terminated),
                Ok((value, Flow::Open)) => last_value = value,
                Err(err) => {
                    self.report(err);
                    last_value = String::new();
                }
            }
        }
        (last_value, Flow::Open)
    }

    pub(crate) fn generate_stmt(
        &mut self,
        stmt: &Spanned<Stmt>,
    ) -> CodegenResult<(String, Flow)> {
        match &stmt.node {
            Stmt::Let { name, ty, value } => {
                self.generate_let(name, ty.as_ref(), value)?;
                Ok((String::new(), Flow::Open))
            }
            Stmt::Expr(expr) => {
                // A block statement carries its own flow state (it may end
                // in return/break/continue).
                if let Expr::Block(stmts) = &expr.node {
                    return Ok(self.generate_block(stmts));
                }
                let value = self.generate_expr(expr)?;
                Ok((value, Flow::Open))
            }
            Stmt::Return(value) => self.generate_return(value.as_ref(), stmt.span),
            Stmt::If {
                clauses,
                else_block,
            } => {
                let flow = self.generate_if_stmt(clauses, else_block.as_deref())?;
                Ok((String::new(), flow))
            }
            Stmt::While { cond, body } => {
                self.generate_while(cond, body)?;
                Ok((String::new(), Flow::Open))
            }
            Stmt::For {
                var,
                iterable,
                body,
            } => {
                self.generate_for(var, iterable, body)?;
                Ok((String::new(), Flow::Open))
            }
            Stmt::Break => {
                let labels = self.fn_ctx.loop_stack.last().cloned().ok_or_else(|| {
                    CodegenError::ControlFlow {
                        message: "`break` outside of a loop".to_string(),
                        span: stmt.span,
                    }
                })?;
                self.out.inst(format!("br label %{}", labels.break_label));
                Ok((String::new(), Flow::Terminated))
            }
            Stmt::Continue => {
                let labels = self.fn_ctx.loop_stack.last().cloned().ok_or_else(|| {
                    CodegenError::ControlFlow {
                        message: "`continue` outside of a loop".to_string(),
                        span: stmt.span,
                    }
                })?;
                self.out
                    .inst(format!("br label %{}", labels.continue_label));
                Ok((String::new(), Flow::Terminated))
            }
            Stmt::Spawn(kind) => {
                self.generate_spawn(kind, stmt.span)?;
                Ok((String::new(), Flow::Open))
            }
            Stmt::Select { cases } => {
                self.generate_select(cases, stmt.span)?;
                Ok((String::new(), Flow::Open))
            }
        }
    }

    fn generate_let(
        &mut self,
        name: &Spanned<String>,
        ann: Option<&Spanned<rill_ast::TypeAnn>>,
        value: &Spanned<Expr>,
    ) -> CodegenResult<()> {
        let declared_ty = match ann {
            Some(ann) => self.resolve_type_ann(ann, &Default::default())?,
            None => self.expr_type(value)?,
        };
        let ll = self.type_to_llvm(&declared_ty, name.span)?;
        if ll == "void" {
            return Err(CodegenError::InvalidOperation {
                message: format!("cannot bind `{}` to a void value", name.node),
                span: value.span,
            });
        }

        let mut val = match self.generate_expr(value) {
            Ok(v) => v,
            Err(err) => {
                self.report(err);
                zero_value(&ll)
            }
        };
        if val.is_empty() {
            self.report(CodegenError::InvalidOperation {
                message: format!("expression bound to `{}` produced no value", name.node),
                span: value.span,
            });
            val = zero_value(&ll);
        }

        // Pack into a fat pointer when the declared type is existential
        // and the initializer is a concrete value.
        val = self.coerce_to_existential(val, &declared_ty, value)?;

        let slot = self.fresh_local_name(&name.node);
        self.out.inst(format!("%{} = alloca {}", slot, ll));
        self.out
            .inst(format!("store {} {}, {}* %{}", ll, val, ll, slot));
        self.fn_ctx.locals.insert(
            name.node.clone(),
            LocalVar {
                ty: declared_ty,
                addr: format!("%{}", slot),
            },
        );
        Ok(())
    }

    /// If `target_ty` is existential and the value's own type is not,
    /// pack the value. Returns the (possibly repacked) register.
    pub(crate) fn coerce_to_existential(
        &mut self,
        val: String,
        target_ty: &ResolvedType,
        value_node: &Spanned<Expr>,
    ) -> CodegenResult<String> {
        let bounds = match target_ty {
            ResolvedType::Existential { bounds } => bounds.clone(),
            ResolvedType::Trait(t) => vec![t.clone()],
            _ => return Ok(val),
        };
        let value_ty = match self.expr_type_opt(value_node) {
            Some(ty) => ty,
            None => return Ok(val),
        };
        if matches!(
            value_ty,
            ResolvedType::Existential { .. } | ResolvedType::Trait(_)
        ) {
            return Ok(val);
        }
        let Some(bound) = bounds.first() else {
            return Ok(val);
        };
        self.pack_existential(&val, &value_ty, bound, value_node.span)
    }

    fn generate_return(
        &mut self,
        value: Option<&Spanned<Expr>>,
        span: Span,
    ) -> CodegenResult<(String, Flow)> {
        let is_main = self.fn_ctx.current_function.as_deref() == Some("main");
        match value {
            Some(expr) => {
                if is_main {
                    // The process entry point returns i32 regardless of the
                    // surface signature.
                    let val = self.generate_expr(expr)?;
                    let val_ll = match self.expr_type_opt(expr) {
                        Some(ty) => self.type_to_llvm(&ty, expr.span)?,
                        None => "i32".to_string(),
                    };
                    let val = self.cast_value(&val, &val_ll, "i32");
                    self.out.inst(format!("ret i32 {}", val));
                    return Ok((val, Flow::Terminated));
                }
                let ret_ty = self
                    .fn_ctx
                    .current_return_type
                    .clone()
                    .ok_or_else(|| CodegenError::InvalidOperation {
                        message: "return with a value in a void function".to_string(),
                        span,
                    })?;
                let ret_ll = self.type_to_llvm(&ret_ty, span)?;
                let val = self.generate_expr(expr)?;
                let val_ty = self.expr_type_opt(expr);
                let val_ll = match &val_ty {
                    Some(ty) => self.type_to_llvm(ty, expr.span)?,
                    None => ret_ll.clone(),
                };
                let val = self.cast_value(&val, &val_ll, &ret_ll);
                self.out.inst(format!("ret {} {}", ret_ll, val));
                Ok((val, Flow::Terminated))
            }
            None => {
                if is_main {
                    self.out.inst("ret i32 0");
                    return Ok((String::new(), Flow::Terminated));
                }
                // Bare return in a value-returning context (e.g. a thread
                // wrapper) still needs a typed terminator.
                match self.fn_ctx.current_return_type.clone() {
                    Some(ret_ty) => {
                        let ret_ll = self.type_to_llvm(&ret_ty, span)?;
                        if ret_ll == "void" {
                            self.out.inst("ret void");
                        } else {
                            self.out
                                .inst(format!("ret {} {}", ret_ll, zero_value(&ret_ll)));
                        }
                    }
                    None => self.out.inst("ret void"),
                }
                Ok((String::new(), Flow::Terminated))
            }
        }
    }

    fn generate_if_stmt(
        &mut self,
        clauses: &[IfClause],
        else_block: Option<&[Spanned<Stmt>]>,
    ) -> CodegenResult<Flow> {
        let end_label = self.next_label("if.end");
        let mut all_terminated = true;

        for (i, clause) in clauses.iter().enumerate() {
            let then_label = self.next_label("if.then");
            let has_more = i + 1 < clauses.len() || else_block.is_some();
            let else_label = if has_more {
                self.next_label("if.else")
            } else {
                end_label.clone()
            };

            let cond = match self.generate_expr(&clause.cond) {
                Ok(v) => v,
                Err(err) => {
                    self.report(err);
                    "0".to_string()
                }
            };
            let cond_ll = match self.expr_type_opt(&clause.cond) {
                Some(ty) => self.type_to_llvm(&ty, clause.cond.span)?,
                None => "i1".to_string(),
            };
            let cond = self.cond_to_i1(&cond, &cond_ll);
            self.out.inst(format!(
                "br i1 {}, label %{}, label %{}",
                cond, then_label, else_label
            ));

            self.out.label(&then_label);
            let (_, flow) = self.generate_block(&clause.body);
            if !flow.is_terminated() {
                self.out.inst(format!("br label %{}", end_label));
                all_terminated = false;
            }

            if has_more {
                self.out.label(&else_label);
            }
        }

        match else_block {
            Some(stmts) => {
                let (_, flow) = self.generate_block(stmts);
                if !flow.is_terminated() {
                    self.out.inst(format!("br label %{}", end_label));
                    all_terminated = false;
                }
            }
            None => all_terminated = false,
        }

        if all_terminated {
            // No branch to the end label was emitted anywhere.
            Ok(Flow::Terminated)
        } else {
            self.out.label(&end_label);
            Ok(Flow::Open)
        }
    }

    fn generate_while(
        &mut self,
        cond: &Spanned<Expr>,
        body: &[Spanned<Stmt>],
    ) -> CodegenResult<()> {
        let cond_label = self.next_label("while.cond");
        let body_label = self.next_label("while.body");
        let end_label = self.next_label("while.end");

        self.out.inst(format!("br label %{}", cond_label));
        self.out.label(&cond_label);
        let cond_val = match self.generate_expr(cond) {
            Ok(v) => v,
            Err(err) => {
                self.report(err);
                "0".to_string()
            }
        };
        let cond_ll = match self.expr_type_opt(cond) {
            Some(ty) => self.type_to_llvm(&ty, cond.span)?,
            None => "i1".to_string(),
        };
        let cond_val = self.cond_to_i1(&cond_val, &cond_ll);
        self.out.inst(format!(
            "br i1 {}, label %{}, label %{}",
            cond_val, body_label, end_label
        ));

        self.out.label(&body_label);
        self.fn_ctx.loop_stack.push(LoopLabels {
            break_label: end_label.clone(),
            continue_label: cond_label.clone(),
        });
        let (_, flow) = self.generate_block(body);
        self.fn_ctx.loop_stack.pop();
        if !flow.is_terminated() {
            self.out.inst(format!("br label %{}", cond_label));
        }

        self.out.label(&end_label);
        Ok(())
    }

    fn generate_for(
        &mut self,
        var: &Spanned<String>,
        iterable: &Spanned<Expr>,
        body: &[Spanned<Stmt>],
    ) -> CodegenResult<()> {
        let iter_val = self.generate_expr(iterable)?;
        let iter_ty = self.expr_type(iterable)?;
        let (slice, elem_ty) = self.slice_handle_of(&iter_val, &iter_ty, iterable.span)?;
        let elem_ll = self.type_to_llvm(&elem_ty, iterable.span)?;

        let len = self.next_reg();
        self.out.inst(format!(
            "{} = call i64 @runtime_slice_len(%Slice* {})",
            len, slice
        ));

        let idx_slot = self.next_reg();
        self.out.inst(format!("{} = alloca i64", idx_slot));
        self.out.inst(format!("store i64 0, i64* {}", idx_slot));

        let var_slot = self.fresh_local_name(&var.node);
        self.out.inst(format!("%{} = alloca {}", var_slot, elem_ll));
        self.fn_ctx.locals.insert(
            var.node.clone(),
            LocalVar {
                ty: elem_ty,
                addr: format!("%{}", var_slot),
            },
        );

        let cond_label = self.next_label("for.cond");
        let body_label = self.next_label("for.body");
        let incr_label = self.next_label("for.incr");
        let end_label = self.next_label("for.end");

        self.out.inst(format!("br label %{}", cond_label));
        self.out.label(&cond_label);
        let idx = self.next_reg();
        self.out
            .inst(format!("{} = load i64, i64* {}", idx, idx_slot));
        let in_bounds = self.next_reg();
        self.out
            .inst(format!("{} = icmp slt i64 {}, {}", in_bounds, idx, len));
        self.out.inst(format!(
            "br i1 {}, label %{}, label %{}",
            in_bounds, body_label, end_label
        ));

        self.out.label(&body_label);
        let raw = self.next_reg();
        self.out.inst(format!(
            "{} = call i8* @runtime_slice_get(%Slice* {}, i64 {})",
            raw, slice, idx
        ));
        let typed = self.next_reg();
        self.out.inst(format!(
            "{} = bitcast i8* {} to {}*",
            typed, raw, elem_ll
        ));
        let elem = self.next_reg();
        self.out.inst(format!(
            "{} = load {}, {}* {}",
            elem, elem_ll, elem_ll, typed
        ));
        self.out.inst(format!(
            "store {} {}, {}* %{}",
            elem_ll, elem, elem_ll, var_slot
        ));

        self.fn_ctx.loop_stack.push(LoopLabels {
            break_label: end_label.clone(),
            continue_label: incr_label.clone(),
        });
        let (_, flow) = self.generate_block(body);
        self.fn_ctx.loop_stack.pop();
        if !flow.is_terminated() {
            self.out.inst(format!("br label %{}", incr_label));
        }

        self.out.label(&incr_label);
        let idx2 = self.next_reg();
        self.out
            .inst(format!("{} = load i64, i64* {}", idx2, idx_slot));
        let next = self.next_reg();
        self.out.inst(format!("{} = add i64 {}, 1", next, idx2));
        self.out
            .inst(format!("store i64 {}, i64* {}", next, idx_slot));
        self.out.inst(format!("br label %{}", cond_label));

        self.out.label(&end_label);
        Ok(())
    }

    /// Reduce an iterable to its `%Slice*` handle and element type.
    /// Vec-like wrapper structs contribute their embedded `data` field.
    pub(crate) fn slice_handle_of(
        &mut self,
        value: &str,
        ty: &ResolvedType,
        span: Span,
    ) -> CodegenResult<(String, ResolvedType)> {
        match ty.strip_refs() {
            ResolvedType::Slice(elem) => Ok((value.to_string(), elem.as_ref().clone())),
            inst @ ResolvedType::GenericInstance { base, args } => {
                let base_name = match base.as_ref() {
                    ResolvedType::Named { name, .. } => name.clone(),
                    ResolvedType::Struct(s) => s.name.clone(),
                    _ => String::new(),
                };
                if base_name != "Vec" || args.len() != 1 {
                    return Err(CodegenError::UnsupportedStmt {
                        message: format!("`{}` has no slice backing", ty),
                        span,
                    });
                }
                let (name, _) = self.ensure_instance(inst, span)?;
                let field_ptr = self.next_reg();
                self.out.inst(format!(
                    "{} = getelementptr inbounds %struct.{}, %struct.{}* {}, i32 0, i32 0",
                    field_ptr, name, name, value
                ));
                let slice = self.next_reg();
                self.out.inst(format!(
                    "{} = load %Slice*, %Slice** {}",
                    slice, field_ptr
                ));
                Ok((slice, args[0].clone()))
            }
            other => Err(CodegenError::UnsupportedStmt {
                message: format!(
                    "`for` supports Vec and slice iterables, not `{}` (maps and ranges are not iterable)",
                    other
                ),
                span,
            }),
        }
    }
}
