//! Pattern-match compilation
//!
//! Every `match` lowers to a chain of check clusters and body blocks with
//! a shared end block. A check cluster tests its arm's pattern with
//! straight-line comparisons that branch to the next arm on mismatch, so
//! payload extraction only ever runs after the tag test has passed.

use rill_ast::{Expr, MatchArm, Pattern, PatternLit, Span, Spanned};
use rill_types::{sanitize, ResolvedType};

use crate::diagnostics::{CodegenError, CodegenResult};
use crate::state::{EnumInfo, LocalVar};
use crate::CodeGenerator;

impl CodeGenerator<'_> {
    pub(crate) fn generate_match(
        &mut self,
        node: &Spanned<Expr>,
        subject: &Spanned<Expr>,
        arms: &[MatchArm],
    ) -> CodegenResult<String> {
        let subject_val = self.generate_expr(subject)?;
        let subject_ty = self.expr_type(subject)?;

        let result_ty = self.expr_type_opt(node).filter(|t| !t.is_void());
        let result_ll = match &result_ty {
            Some(ty) => Some(self.type_to_llvm(ty, node.span)?),
            None => None,
        };
        let slot = match &result_ll {
            Some(ll) => {
                let slot = self.next_reg();
                self.out.inst(format!("{} = alloca {}", slot, ll));
                Some(slot)
            }
            None => None,
        };

        let end_label = self.next_label("match.end");
        let mut check_labels: Vec<String> = arms
            .iter()
            .map(|_| self.next_label("match.check"))
            .collect();
        // A miss on the last arm falls through to the end block.
        check_labels.push(end_label.clone());

        if let Some(first) = check_labels.first() {
            self.out.inst(format!("br label %{}", first));
        }

        for (i, arm) in arms.iter().enumerate() {
            let body_label = self.next_label("match.body");
            let fail_label = check_labels[i + 1].clone();

            self.out.label(&check_labels[i]);
            match self.emit_pattern_test(&subject_val, &subject_ty, &arm.pattern, &fail_label) {
                Ok(()) => {
                    self.out.inst(format!("br label %{}", body_label));
                }
                Err(err) => {
                    self.report(err);
                    self.out.inst(format!("br label %{}", fail_label));
                    // Keep the body block reachable for well-formed IR.
                    self.out.label(&body_label);
                    self.out.inst(format!("br label %{}", end_label));
                    continue;
                }
            }

            self.out.label(&body_label);
            if let Err(err) =
                self.bind_pattern(&subject_val, &subject_ty, &arm.pattern)
            {
                self.report(err);
            }
            // Block bodies can end in their own terminator (return,
            // break); those arms skip the store and the branch to end.
            let (value, flow) = match &arm.body.node {
                Expr::Block(stmts) => self.generate_block(stmts),
                _ => match self.generate_expr(&arm.body) {
                    Ok(v) => (v, crate::stmt::Flow::Open),
                    Err(err) => {
                        self.report(err);
                        (String::new(), crate::stmt::Flow::Open)
                    }
                },
            };
            if flow.is_terminated() {
                continue;
            }
            if let (Some(slot), Some(result_ll)) = (&slot, &result_ll) {
                // On an erased result every arm value is cast to i8*.
                let body_ll = match self.expr_type_opt(&arm.body) {
                    Some(ty) => self
                        .type_to_llvm(&ty, arm.body.span)
                        .unwrap_or_else(|_| result_ll.clone()),
                    None => result_ll.clone(),
                };
                let cast = if value.is_empty() {
                    value
                } else {
                    self.cast_value(&value, &body_ll, result_ll)
                };
                let slot = slot.clone();
                let result_ll = result_ll.clone();
                self.store_arm_value(&cast, &slot, &result_ll, arm.body.span);
            }
            self.out.inst(format!("br label %{}", end_label));
        }

        self.out.label(&end_label);
        match (slot, result_ll) {
            (Some(slot), Some(result_ll)) => {
                let reg = self.next_reg();
                self.out.inst(format!(
                    "{} = load {}, {}* {}",
                    reg, result_ll, result_ll, slot
                ));
                Ok(reg)
            }
            _ => Ok(String::new()),
        }
    }

    /// Emit straight-line tests for `pattern`; mismatches branch to
    /// `fail_label`, success falls through with the current block open.
    fn emit_pattern_test(
        &mut self,
        subject: &str,
        subject_ty: &ResolvedType,
        pattern: &Spanned<Pattern>,
        fail_label: &str,
    ) -> CodegenResult<()> {
        match &pattern.node {
            // Irrefutable: always fall through.
            Pattern::Wildcard | Pattern::Binding(_) => Ok(()),

            Pattern::Literal(lit) => {
                let cond = self.emit_literal_test(subject, subject_ty, lit, pattern.span)?;
                self.branch_on(&cond, fail_label);
                Ok(())
            }

            Pattern::Struct { name: _, fields } => {
                for (field_name, sub) in fields {
                    if matches!(sub.node, Pattern::Wildcard | Pattern::Binding(_)) {
                        continue;
                    }
                    let (struct_name, index, field_ty) =
                        self.resolve_field(subject_ty, &field_name.node, field_name.span)?;
                    let field_ll = self.type_to_llvm(&field_ty, field_name.span)?;
                    let ptr = self.next_reg();
                    self.out.inst(format!(
                        "{} = getelementptr inbounds %struct.{}, %struct.{}* {}, i32 0, i32 {}",
                        ptr, struct_name, struct_name, subject, index
                    ));
                    let value = self.next_reg();
                    self.out.inst(format!(
                        "{} = load {}, {}* {}",
                        value, field_ll, field_ll, ptr
                    ));
                    self.emit_pattern_test(&value, &field_ty, sub, fail_label)?;
                }
                Ok(())
            }

            Pattern::Variant {
                enum_name: _,
                variant,
                bindings,
            } => {
                let (enum_ir_name, info) = self.resolve_enum_of(subject_ty, pattern.span)?;
                let Some(tag) = info.variant_index(&variant.node) else {
                    return Err(CodegenError::UndefinedVariant {
                        enum_name: enum_ir_name,
                        variant: variant.node.clone(),
                        span: variant.span,
                    });
                };

                let tag_ptr = self.next_reg();
                self.out.inst(format!(
                    "{} = getelementptr inbounds %enum.{}, %enum.{}* {}, i32 0, i32 0",
                    tag_ptr, enum_ir_name, enum_ir_name, subject
                ));
                let tag_val = self.next_reg();
                self.out
                    .inst(format!("{} = load i64, i64* {}", tag_val, tag_ptr));
                let cond = self.next_reg();
                self.out.inst(format!(
                    "{} = icmp eq i64 {}, {}",
                    cond, tag_val, tag
                ));
                self.branch_on(&cond, fail_label);

                // Tag matched; refutable payload sub-patterns may now
                // extract safely.
                let payload_tys = info.variants[tag].1.clone();
                if bindings
                    .iter()
                    .any(|b| !matches!(b.node, Pattern::Wildcard | Pattern::Binding(_)))
                {
                    let values = self.extract_variant_payload(
                        subject,
                        &enum_ir_name,
                        &payload_tys,
                        pattern.span,
                    )?;
                    for (sub, (value, ty)) in bindings.iter().zip(values.iter()) {
                        self.emit_pattern_test(value, ty, sub, fail_label)?;
                    }
                }
                Ok(())
            }

            Pattern::Tuple(subs) => {
                let elem_tys = match subject_ty.strip_refs() {
                    ResolvedType::Tuple(tys) => tys.clone(),
                    other => {
                        return Err(CodegenError::UnsupportedPattern {
                            message: format!("tuple pattern against `{}`", other),
                            span: pattern.span,
                        })
                    }
                };
                let tuple_ll = self.type_to_llvm(subject_ty.strip_refs(), pattern.span)?;
                for (i, (sub, ty)) in subs.iter().zip(elem_tys.iter()).enumerate() {
                    if matches!(sub.node, Pattern::Wildcard | Pattern::Binding(_)) {
                        continue;
                    }
                    let value = self.next_reg();
                    self.out.inst(format!(
                        "{} = extractvalue {} {}, {}",
                        value, tuple_ll, subject, i
                    ));
                    self.emit_pattern_test(&value, ty, sub, fail_label)?;
                }
                Ok(())
            }
        }
    }

    fn emit_literal_test(
        &mut self,
        subject: &str,
        subject_ty: &ResolvedType,
        lit: &PatternLit,
        span: Span,
    ) -> CodegenResult<String> {
        match lit {
            PatternLit::Int(n) => {
                let ll = self.type_to_llvm(subject_ty, span)?;
                let cond = self.next_reg();
                self.out
                    .inst(format!("{} = icmp eq {} {}, {}", cond, ll, subject, n));
                Ok(cond)
            }
            PatternLit::Bool(b) => {
                let cond = self.next_reg();
                self.out.inst(format!(
                    "{} = icmp eq i1 {}, {}",
                    cond,
                    subject,
                    i32::from(*b)
                ));
                Ok(cond)
            }
            PatternLit::Nil => {
                let ll = self.type_to_llvm(subject_ty, span)?;
                let cond = self.next_reg();
                self.out.inst(format!(
                    "{} = icmp eq {} {}, null",
                    cond, ll, subject
                ));
                Ok(cond)
            }
            PatternLit::Str(s) => {
                let content = s.clone();
                let byte_len = content.len();
                let ptr = self.string_const_ptr(&content);
                let lit_str = self.next_reg();
                self.out.inst(format!(
                    "{} = call %String* @runtime_string_new(i8* {}, i64 {})",
                    lit_str, ptr, byte_len
                ));
                let raw = self.next_reg();
                self.out.inst(format!(
                    "{} = call i32 @runtime_string_equal(%String* {}, %String* {})",
                    raw, subject, lit_str
                ));
                let cond = self.next_reg();
                self.out
                    .inst(format!("{} = icmp eq i32 {}, 1", cond, raw));
                Ok(cond)
            }
        }
    }

    fn branch_on(&mut self, cond: &str, fail_label: &str) {
        let cont = self.next_label("match.cont");
        self.out.inst(format!(
            "br i1 {}, label %{}, label %{}",
            cond, cont, fail_label
        ));
        self.out.label(&cont);
    }

    /// Register the variables a matched pattern binds, re-extracting
    /// payloads in the body block.
    fn bind_pattern(
        &mut self,
        subject: &str,
        subject_ty: &ResolvedType,
        pattern: &Spanned<Pattern>,
    ) -> CodegenResult<()> {
        match &pattern.node {
            Pattern::Wildcard | Pattern::Literal(_) => Ok(()),

            Pattern::Binding(name) => {
                let ll = self.type_to_llvm(subject_ty, pattern.span)?;
                let slot = self.fresh_local_name(name);
                self.out.inst(format!("%{} = alloca {}", slot, ll));
                self.out.inst(format!(
                    "store {} {}, {}* %{}",
                    ll, subject, ll, slot
                ));
                self.fn_ctx.locals.insert(
                    name.clone(),
                    LocalVar {
                        ty: subject_ty.clone(),
                        addr: format!("%{}", slot),
                    },
                );
                Ok(())
            }

            Pattern::Struct { name: _, fields } => {
                for (field_name, sub) in fields {
                    if matches!(sub.node, Pattern::Wildcard | Pattern::Literal(_)) {
                        continue;
                    }
                    let (struct_name, index, field_ty) =
                        self.resolve_field(subject_ty, &field_name.node, field_name.span)?;
                    let field_ll = self.type_to_llvm(&field_ty, field_name.span)?;
                    let ptr = self.next_reg();
                    self.out.inst(format!(
                        "{} = getelementptr inbounds %struct.{}, %struct.{}* {}, i32 0, i32 {}",
                        ptr, struct_name, struct_name, subject, index
                    ));
                    let value = self.next_reg();
                    self.out.inst(format!(
                        "{} = load {}, {}* {}",
                        value, field_ll, field_ll, ptr
                    ));
                    self.bind_pattern(&value, &field_ty, sub)?;
                }
                Ok(())
            }

            Pattern::Variant {
                enum_name: _,
                variant,
                bindings,
            } => {
                if bindings.is_empty() {
                    return Ok(());
                }
                let (enum_ir_name, info) = self.resolve_enum_of(subject_ty, pattern.span)?;
                let Some(tag) = info.variant_index(&variant.node) else {
                    return Err(CodegenError::UndefinedVariant {
                        enum_name: enum_ir_name,
                        variant: variant.node.clone(),
                        span: variant.span,
                    });
                };
                let payload_tys = info.variants[tag].1.clone();
                let values = self.extract_variant_payload(
                    subject,
                    &enum_ir_name,
                    &payload_tys,
                    pattern.span,
                )?;
                for (sub, (value, ty)) in bindings.iter().zip(values.iter()) {
                    self.bind_pattern(value, ty, sub)?;
                }
                Ok(())
            }

            Pattern::Tuple(subs) => {
                let elem_tys = match subject_ty.strip_refs() {
                    ResolvedType::Tuple(tys) => tys.clone(),
                    other => {
                        return Err(CodegenError::UnsupportedPattern {
                            message: format!("tuple pattern against `{}`", other),
                            span: pattern.span,
                        })
                    }
                };
                let tuple_ll = self.type_to_llvm(subject_ty.strip_refs(), pattern.span)?;
                for (i, (sub, ty)) in subs.iter().zip(elem_tys.iter()).enumerate() {
                    if matches!(sub.node, Pattern::Wildcard | Pattern::Literal(_)) {
                        continue;
                    }
                    let value = self.next_reg();
                    self.out.inst(format!(
                        "{} = extractvalue {} {}, {}",
                        value, tuple_ll, subject, i
                    ));
                    self.bind_pattern(&value, ty, sub)?;
                }
                Ok(())
            }
        }
    }

    /// Load a variant's payload values: bitcast the `i8*` payload cell to
    /// the payload type (single) or an anonymous tuple (multiple) and load
    /// each element.
    fn extract_variant_payload(
        &mut self,
        subject: &str,
        enum_ir_name: &str,
        payload_tys: &[ResolvedType],
        span: Span,
    ) -> CodegenResult<Vec<(String, ResolvedType)>> {
        if payload_tys.is_empty() {
            return Ok(Vec::new());
        }
        let payload_ptr = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %enum.{}, %enum.{}* {}, i32 0, i32 1",
            payload_ptr, enum_ir_name, enum_ir_name, subject
        ));
        let raw = self.next_reg();
        self.out.inst(format!(
            "{} = load i8*, i8** {}",
            raw, payload_ptr
        ));

        if payload_tys.len() == 1 {
            let ty = payload_tys[0].clone();
            let ll = self.type_to_llvm(&ty, span)?;
            let typed = self.next_reg();
            self.out
                .inst(format!("{} = bitcast i8* {} to {}*", typed, raw, ll));
            let value = self.next_reg();
            self.out
                .inst(format!("{} = load {}, {}* {}", value, ll, ll, typed));
            return Ok(vec![(value, ty)]);
        }

        let lls = payload_tys
            .iter()
            .map(|t| self.type_to_llvm(t, span))
            .collect::<CodegenResult<Vec<_>>>()?;
        let tuple_ll = format!("{{ {} }}", lls.join(", "));
        let typed = self.next_reg();
        self.out.inst(format!(
            "{} = bitcast i8* {} to {}*",
            typed, raw, tuple_ll
        ));
        let mut values = Vec::with_capacity(payload_tys.len());
        for (i, (ty, ll)) in payload_tys.iter().zip(lls.iter()).enumerate() {
            let ptr = self.next_reg();
            self.out.inst(format!(
                "{} = getelementptr inbounds {}, {}* {}, i32 0, i32 {}",
                ptr, tuple_ll, tuple_ll, typed, i
            ));
            let value = self.next_reg();
            self.out
                .inst(format!("{} = load {}, {}* {}", value, ll, ll, ptr));
            values.push((value, ty.clone()));
        }
        Ok(values)
    }

    /// The enum registry entry behind a subject type.
    fn resolve_enum_of(
        &mut self,
        ty: &ResolvedType,
        span: Span,
    ) -> CodegenResult<(String, EnumInfo)> {
        let stripped = ty.strip_refs().clone();
        match &stripped {
            ResolvedType::Enum(e) => {
                self.type_to_llvm(&stripped, span)?;
                let name = sanitize(&e.name);
                let info = self.types.enums.get(&name).cloned().ok_or_else(|| {
                    CodegenError::TypeMapping {
                        message: format!("enum `{}` is not registered", e.name),
                        span,
                    }
                })?;
                Ok((name, info))
            }
            ResolvedType::GenericInstance { .. } => {
                let (name, is_enum) = self.ensure_instance(&stripped, span)?;
                if !is_enum {
                    return Err(CodegenError::UnsupportedPattern {
                        message: format!("variant pattern against struct `{}`", name),
                        span,
                    });
                }
                let info = self.types.enums[&name].clone();
                Ok((name, info))
            }
            ResolvedType::Named { name, .. } => {
                let sanitized = sanitize(name);
                let info = self.types.enums.get(&sanitized).cloned().ok_or_else(|| {
                    CodegenError::UnsupportedPattern {
                        message: format!("variant pattern against `{}`", name),
                        span,
                    }
                })?;
                Ok((sanitized, info))
            }
            other => Err(CodegenError::UnsupportedPattern {
                message: format!("variant pattern against `{}`", other),
                span,
            }),
        }
    }
}
