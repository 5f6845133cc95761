//! Expression lowering
//!
//! Every expression returns the register (or immediate) holding its value,
//! or the empty string for void. Constant folding runs before any
//! instruction is emitted for prefix and infix expressions.

use rill_ast::{BinOp, Expr, IfClause, Span, Spanned, Stmt, UnaryOp};
use rill_types::{sanitize, ResolvedType};

use crate::diagnostics::{format_did_you_mean, suggest_similar, CodegenError, CodegenResult};
use crate::fold::fold_expr;
use crate::ll_int_bits;
use crate::types::{format_llvm_float, zero_value};
use crate::CodeGenerator;

impl CodeGenerator<'_> {
    /// Lower one expression to its value register.
    ///
    /// Grows the stack ahead of deep recursion; generated expression trees
    /// (long `+` chains, deeply nested calls) routinely exceed the default
    /// stack in debug builds.
    pub(crate) fn generate_expr(&mut self, expr: &Spanned<Expr>) -> CodegenResult<String> {
        stacker::maybe_grow(64 * 1024, 1024 * 1024, || self.generate_expr_inner(expr))
    }

    fn generate_expr_inner(&mut self, expr: &Spanned<Expr>) -> CodegenResult<String> {
        match &expr.node {
            Expr::Int(n) => Ok(n.to_string()),
            Expr::Float(f) => Ok(format_llvm_float(*f)),
            Expr::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
            Expr::Nil => Ok("null".to_string()),
            Expr::Str(s) => {
                let content = s.clone();
                let byte_len = content.len();
                let ptr = self.string_const_ptr(&content);
                let reg = self.next_reg();
                self.out.inst(format!(
                    "{} = call %String* @runtime_string_new(i8* {}, i64 {})",
                    reg, ptr, byte_len
                ));
                Ok(reg)
            }
            Expr::Ident(name) => self.generate_ident(name, expr.span),
            Expr::Prefix { op, expr: inner } => {
                if let Some(folded) = fold_expr(&expr.node) {
                    return Ok(folded.render());
                }
                self.generate_prefix(*op, inner)
            }
            Expr::Infix { op, left, right } => {
                if let Some(folded) = fold_expr(&expr.node) {
                    return Ok(folded.render());
                }
                self.generate_infix(*op, left, right, expr.span)
            }
            Expr::Field { object, field } => self.generate_field_access(object, field),
            Expr::Index { base, index } => self.generate_index_value(base, index, expr.span),
            Expr::Path { qualifier, member } => {
                self.generate_path_value(expr, qualifier, member)
            }
            Expr::StructLit { name, fields } => self.generate_struct_lit(expr, name, fields),
            Expr::ArrayLit(elems) => self.generate_array_lit(expr, elems),
            Expr::TupleLit(elems) => self.generate_tuple_lit(expr, elems),
            Expr::FnLit { params, ret, body } => {
                self.generate_closure(expr, params, ret.as_ref(), body)
            }
            Expr::Block(stmts) => self.generate_block_expr(stmts),
            Expr::If {
                clauses,
                else_block,
            } => self.generate_if_expr(expr, clauses, else_block.as_deref()),
            Expr::Match { subject, arms } => self.generate_match(expr, subject, arms),
            Expr::Assign { target, value } => self.generate_assign(target, value),
            Expr::AssignOp { op, target, value } => {
                self.generate_assign_op(*op, target, value)
            }
            Expr::Send { channel, value } => self.generate_send(channel, value),
            Expr::Recv { channel } => self.generate_recv(expr, channel),
            Expr::Call { callee, args } => self.generate_call(expr, callee, args),
            Expr::TypeApply { .. } => Err(CodegenError::UnsupportedExpr {
                message: "type application is only valid in call position".to_string(),
                span: expr.span,
            }),
        }
    }

    /// IR type of an expression node, through the type table.
    pub(crate) fn expr_ll(&mut self, node: &Spanned<Expr>) -> CodegenResult<String> {
        let ty = self.expr_type(node)?;
        self.type_to_llvm(&ty, node.span)
    }

    // Identifiers
    // ========================================================================

    fn generate_ident(&mut self, name: &str, span: Span) -> CodegenResult<String> {
        if let Some(param) = self.fn_ctx.param(name) {
            return Ok(param.register.clone());
        }
        if let Some(local) = self.fn_ctx.locals.get(name).cloned() {
            let ll = self.type_to_llvm(&local.ty, span)?;
            let reg = self.next_reg();
            self.out
                .inst(format!("{} = load {}, {}* {}", reg, ll, ll, local.addr));
            return Ok(reg);
        }
        if let Some(info) = self.types.constants.get(name).cloned() {
            let ll = self.type_to_llvm(&info.ty, span)?;
            let reg = self.next_reg();
            self.out.inst(format!(
                "{} = load {}, {}* @{}",
                reg, ll, ll, info.symbol
            ));
            return Ok(reg);
        }
        if let Some(info) = self.types.functions.get(name).cloned() {
            // A bare function name becomes a closure handle with no env,
            // so function values and closures share one call protocol.
            return self.function_closure_handle(&info, span);
        }

        let mut candidates: Vec<&str> = Vec::new();
        for var_name in self.fn_ctx.locals.keys() {
            candidates.push(var_name.as_str());
        }
        for param in &self.fn_ctx.params {
            candidates.push(param.name.as_str());
        }
        for func_name in self.types.functions.keys() {
            candidates.push(func_name.as_str());
        }
        let suggestions = suggest_similar(name, &candidates, 3);
        Err(CodegenError::UndefinedVar {
            name: name.to_string(),
            suggestion: format_did_you_mean(&suggestions),
            span,
        })
    }

    // Prefix and infix
    // ========================================================================

    fn generate_prefix(&mut self, op: UnaryOp, inner: &Spanned<Expr>) -> CodegenResult<String> {
        let val = self.generate_expr(inner)?;
        let ty = self.expr_type(inner)?;
        let ll = self.type_to_llvm(&ty, inner.span)?;
        let reg = self.next_reg();
        match op {
            UnaryOp::Neg => {
                if ty.is_float() {
                    self.out.inst(format!("{} = fneg double {}", reg, val));
                } else {
                    self.out.inst(format!("{} = sub {} 0, {}", reg, ll, val));
                }
            }
            UnaryOp::Not => {
                self.out.inst(format!("{} = xor {} {}, 1", reg, ll, val));
            }
        }
        Ok(reg)
    }

    fn generate_infix(
        &mut self,
        op: BinOp,
        left: &Spanned<Expr>,
        right: &Spanned<Expr>,
        span: Span,
    ) -> CodegenResult<String> {
        let lty = self.expr_type(left)?;

        if lty.is_string() {
            return self.generate_string_binop(op, left, right, span);
        }

        if matches!(op, BinOp::And | BinOp::Or) {
            let lval = self.generate_expr(left)?;
            let rval = self.generate_expr(right)?;
            let mnemonic = if op == BinOp::And { "and" } else { "or" };
            let reg = self.next_reg();
            self.out
                .inst(format!("{} = {} i1 {}, {}", reg, mnemonic, lval, rval));
            return Ok(reg);
        }

        let rty = self.expr_type(right)?;
        let lval = self.generate_expr(left)?;
        let rval = self.generate_expr(right)?;
        self.emit_numeric_binop(op, &lval, &lty, &rval, &rty, span)
    }

    /// Arithmetic or comparison over two already-lowered operands.
    /// Computes the common type, widens both sides, and emits the
    /// integer, float, or pointer instruction.
    pub(crate) fn emit_numeric_binop(
        &mut self,
        op: BinOp,
        lval: &str,
        lty: &ResolvedType,
        rval: &str,
        rty: &ResolvedType,
        span: Span,
    ) -> CodegenResult<String> {
        let l_ll = self.type_to_llvm(lty, span)?;
        let r_ll = self.type_to_llvm(rty, span)?;

        // Common type: equal types collapse, integers widen to the wider
        // side, int and float promote to float, identical pointers stay.
        let common_ll = if l_ll == r_ll {
            l_ll.clone()
        } else if l_ll == "double" || r_ll == "double" {
            "double".to_string()
        } else {
            match (ll_int_bits(&l_ll), ll_int_bits(&r_ll)) {
                (Some(a), Some(b)) => {
                    if a >= b {
                        l_ll.clone()
                    } else {
                        r_ll.clone()
                    }
                }
                _ => {
                    return Err(CodegenError::InvalidOperation {
                        message: format!(
                            "no common type for operands `{}` and `{}`",
                            lty, rty
                        ),
                        span,
                    })
                }
            }
        };

        let is_float = common_ll == "double";
        let is_pointer = common_ll.ends_with('*');
        if is_pointer && !matches!(op, BinOp::Eq | BinOp::Neq) {
            return Err(CodegenError::InvalidOperation {
                message: format!("operator not defined on pointer type `{}`", lty),
                span,
            });
        }

        let lval = self.cast_value(lval, &l_ll, &common_ll);
        let rval = self.cast_value(rval, &r_ll, &common_ll);

        let reg = self.next_reg();
        if op.is_comparison() {
            let inst = if is_float { "fcmp" } else { "icmp" };
            let pred = cmp_predicate(op, is_float);
            self.out.inst(format!(
                "{} = {} {} {} {}, {}",
                reg, inst, pred, common_ll, lval, rval
            ));
        } else {
            let mnemonic = arith_mnemonic(op, is_float).ok_or_else(|| {
                CodegenError::InvalidOperation {
                    message: "logical operator applied to non-boolean operands".to_string(),
                    span,
                }
            })?;
            self.out.inst(format!(
                "{} = {} {} {}, {}",
                reg, mnemonic, common_ll, lval, rval
            ));
        }
        Ok(reg)
    }

    fn generate_string_binop(
        &mut self,
        op: BinOp,
        left: &Spanned<Expr>,
        right: &Spanned<Expr>,
        span: Span,
    ) -> CodegenResult<String> {
        let lval = self.generate_expr(left)?;
        let rval = self.generate_expr(right)?;
        match op {
            BinOp::Add => {
                let reg = self.next_reg();
                self.out.inst(format!(
                    "{} = call %String* @runtime_string_concat(%String* {}, %String* {})",
                    reg, lval, rval
                ));
                Ok(reg)
            }
            BinOp::Eq | BinOp::Neq => {
                let raw = self.next_reg();
                self.out.inst(format!(
                    "{} = call i32 @runtime_string_equal(%String* {}, %String* {})",
                    raw, lval, rval
                ));
                let reg = self.next_reg();
                let pred = if op == BinOp::Eq { "eq" } else { "ne" };
                self.out
                    .inst(format!("{} = icmp {} i32 {}, 1", reg, pred, raw));
                Ok(reg)
            }
            _ => Err(CodegenError::InvalidOperation {
                message: "operator not defined on strings".to_string(),
                span,
            }),
        }
    }

    // Field access
    // ========================================================================

    fn generate_field_access(
        &mut self,
        object: &Spanned<Expr>,
        field: &Spanned<String>,
    ) -> CodegenResult<String> {
        let obj_ty = self.expr_type(object)?;

        // Decimal field names address tuple elements on the value itself.
        if let ResolvedType::Tuple(elems) = obj_ty.strip_refs() {
            let elems = elems.clone();
            let index: usize =
                field
                    .node
                    .parse()
                    .map_err(|_| CodegenError::FieldNotFound {
                        field: field.node.clone(),
                        on: obj_ty.to_string(),
                        suggestion: None,
                        span: field.span,
                    })?;
            if index >= elems.len() {
                return Err(CodegenError::InvalidIndex {
                    message: format!(
                        "tuple index {} out of range for `{}`",
                        index, obj_ty
                    ),
                    span: field.span,
                });
            }
            let obj_val = self.generate_expr(object)?;
            let tuple_ll = self.type_to_llvm(obj_ty.strip_refs(), object.span)?;
            let reg = self.next_reg();
            self.out.inst(format!(
                "{} = extractvalue {} {}, {}",
                reg, tuple_ll, obj_val, index
            ));
            return Ok(reg);
        }

        let (ptr, field_ll, _) = self.generate_field_addr(object, field)?;
        let reg = self.next_reg();
        self.out.inst(format!(
            "{} = load {}, {}* {}",
            reg, field_ll, field_ll, ptr
        ));
        Ok(reg)
    }

    /// Address form of field access: the GEP without the trailing load.
    pub(crate) fn generate_field_addr(
        &mut self,
        object: &Spanned<Expr>,
        field: &Spanned<String>,
    ) -> CodegenResult<(String, String, ResolvedType)> {
        let obj_val = self.generate_expr(object)?;
        let obj_ty = self.expr_type(object)?;
        let (struct_name, index, field_ty) =
            self.resolve_field(&obj_ty, &field.node, field.span)?;
        let field_ll = self.type_to_llvm(&field_ty, field.span)?;
        let ptr = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %struct.{}, %struct.{}* {}, i32 0, i32 {}",
            ptr, struct_name, struct_name, obj_val, index
        ));
        Ok((ptr, field_ll, field_ty))
    }

    /// The single field-index resolution path: locate the struct behind
    /// references, names, and generic instances, then look the field up in
    /// the registry. Called exactly once per field access.
    pub(crate) fn resolve_field(
        &mut self,
        ty: &ResolvedType,
        field: &str,
        span: Span,
    ) -> CodegenResult<(String, usize, ResolvedType)> {
        let stripped = ty.strip_refs().clone();
        let struct_name = match &stripped {
            ResolvedType::Struct(s) => {
                // Force registration so the registry lookup below is total.
                self.type_to_llvm(&stripped, span)?;
                sanitize(&s.name)
            }
            ResolvedType::Named { name, referent } => match referent {
                Some(inner) => return self.resolve_field(inner, field, span),
                None => sanitize(name),
            },
            ResolvedType::GenericInstance { .. } => self.ensure_instance(&stripped, span)?.0,
            other => {
                return Err(CodegenError::FieldNotFound {
                    field: field.to_string(),
                    on: other.to_string(),
                    suggestion: None,
                    span,
                })
            }
        };

        let info = self.types.structs.get(&struct_name).ok_or_else(|| {
            CodegenError::FieldNotFound {
                field: field.to_string(),
                on: struct_name.clone(),
                suggestion: None,
                span,
            }
        })?;
        match info.field_index(field) {
            Some(index) => {
                let field_ty = info.fields[index].1.clone();
                Ok((struct_name, index, field_ty))
            }
            None => {
                let candidates: Vec<&str> =
                    info.fields.iter().map(|(n, _)| n.as_str()).collect();
                let suggestions = suggest_similar(field, &candidates, 3);
                Err(CodegenError::FieldNotFound {
                    field: field.to_string(),
                    on: struct_name.clone(),
                    suggestion: format_did_you_mean(&suggestions),
                    span,
                })
            }
        }
    }

    // Indexing
    // ========================================================================

    fn generate_index_value(
        &mut self,
        base: &Spanned<Expr>,
        index: &Spanned<Expr>,
        span: Span,
    ) -> CodegenResult<String> {
        let base_ty = self.expr_type(base)?;
        match base_ty.strip_refs().clone() {
            ResolvedType::Array { elem, len } => {
                let (ptr, elem_ll) = self.array_elem_addr(base, index, &elem, len, span)?;
                let reg = self.next_reg();
                self.out.inst(format!(
                    "{} = load {}, {}* {}",
                    reg, elem_ll, elem_ll, ptr
                ));
                Ok(reg)
            }
            ref sliceish @ (ResolvedType::Slice(_) | ResolvedType::GenericInstance { .. }) => {
                let base_val = self.generate_expr(base)?;
                let (slice, elem_ty) = self.slice_handle_of(&base_val, sliceish, span)?;
                let idx = self.generate_expr(index)?;
                let elem_ll = self.type_to_llvm(&elem_ty, span)?;
                let raw = self.next_reg();
                self.out.inst(format!(
                    "{} = call i8* @runtime_slice_get(%Slice* {}, i64 {})",
                    raw, slice, idx
                ));
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
            other => Err(CodegenError::InvalidIndex {
                message: format!("cannot index `{}`", other),
                span,
            }),
        }
    }

    fn array_elem_addr(
        &mut self,
        base: &Spanned<Expr>,
        index: &Spanned<Expr>,
        elem: &ResolvedType,
        len: u64,
        span: Span,
    ) -> CodegenResult<(String, String)> {
        let base_val = self.generate_expr(base)?;
        let idx = self.generate_expr(index)?;
        let elem_ll = self.type_to_llvm(elem, span)?;
        let ptr = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds [{} x {}], [{} x {}]* {}, i64 0, i64 {}",
            ptr, len, elem_ll, len, elem_ll, base_val, idx
        ));
        Ok((ptr, elem_ll))
    }

    // Construction
    // ========================================================================

    fn generate_struct_lit(
        &mut self,
        node: &Spanned<Expr>,
        name: &Spanned<String>,
        fields: &[(Spanned<String>, Spanned<Expr>)],
    ) -> CodegenResult<String> {
        let lit_ty = self
            .expr_type_opt(node)
            .unwrap_or(ResolvedType::Named {
                name: name.node.clone(),
                referent: None,
            });
        let struct_name = match &lit_ty {
            ResolvedType::GenericInstance { .. } => self.ensure_instance(&lit_ty, node.span)?.0,
            ResolvedType::Struct(s) => {
                self.type_to_llvm(&lit_ty, node.span)?;
                sanitize(&s.name)
            }
            _ => sanitize(&name.node),
        };
        let info = self
            .types
            .structs
            .get(&struct_name)
            .cloned()
            .ok_or_else(|| CodegenError::InvalidLiteral {
                message: format!("no struct named `{}` in scope", name.node),
                span: name.span,
            })?;

        let field_types: Vec<ResolvedType> =
            info.fields.iter().map(|(_, t)| t.clone()).collect();
        let size = self.struct_alloc_size(&field_types);
        let raw = self.next_reg();
        self.out.inst(format!(
            "{} = call i8* @runtime_alloc(i64 {})",
            raw, size
        ));
        let ptr = self.next_reg();
        self.out.inst(format!(
            "{} = bitcast i8* {} to %struct.{}*",
            ptr, raw, struct_name
        ));

        for (field_name, value) in fields {
            let Some(index) = info.field_index(&field_name.node) else {
                let candidates: Vec<&str> =
                    info.fields.iter().map(|(n, _)| n.as_str()).collect();
                let suggestions = suggest_similar(&field_name.node, &candidates, 3);
                self.report(CodegenError::FieldNotFound {
                    field: field_name.node.clone(),
                    on: struct_name.clone(),
                    suggestion: format_did_you_mean(&suggestions),
                    span: field_name.span,
                });
                continue;
            };
            let field_ty = info.fields[index].1.clone();
            let field_ll = self.type_to_llvm(&field_ty, field_name.span)?;
            let mut val = self.generate_expr(value)?;
            val = self.coerce_to_existential(val, &field_ty, value)?;
            let field_ptr = self.next_reg();
            self.out.inst(format!(
                "{} = getelementptr inbounds %struct.{}, %struct.{}* {}, i32 0, i32 {}",
                field_ptr, struct_name, struct_name, ptr, index
            ));
            self.out.inst(format!(
                "store {} {}, {}* {}",
                field_ll, val, field_ll, field_ptr
            ));
        }
        Ok(ptr)
    }

    fn generate_array_lit(
        &mut self,
        node: &Spanned<Expr>,
        elems: &[Spanned<Expr>],
    ) -> CodegenResult<String> {
        let Some(lit_ty) = self.expr_type_opt(node) else {
            return Err(CodegenError::InvalidLiteral {
                message: "array literal requires type context".to_string(),
                span: node.span,
            });
        };

        match lit_ty.clone() {
            ResolvedType::Array { elem, len } => {
                let elem_ll = self.type_to_llvm(&elem, node.span)?;
                let slot = self.next_reg();
                self.out
                    .inst(format!("{} = alloca [{} x {}]", slot, len, elem_ll));
                for (i, value) in elems.iter().enumerate() {
                    let val = self.generate_expr(value)?;
                    let ptr = self.next_reg();
                    self.out.inst(format!(
                        "{} = getelementptr inbounds [{} x {}], [{} x {}]* {}, i64 0, i64 {}",
                        ptr, len, elem_ll, len, elem_ll, slot, i
                    ));
                    self.out.inst(format!(
                        "store {} {}, {}* {}",
                        elem_ll, val, elem_ll, ptr
                    ));
                }
                Ok(slot)
            }
            ResolvedType::Slice(elem) => {
                self.generate_slice_lit(&elem, elems, node.span).map(|s| s.0)
            }
            inst @ ResolvedType::GenericInstance { .. } => {
                // Vec literal: build the slice, then wrap it.
                let (wrapper_name, _) = self.ensure_instance(&inst, node.span)?;
                let elem_ty = match &inst {
                    ResolvedType::GenericInstance { args, .. } if args.len() == 1 => {
                        args[0].clone()
                    }
                    _ => {
                        return Err(CodegenError::InvalidLiteral {
                            message: format!("`{}` is not a Vec type", inst),
                            span: node.span,
                        })
                    }
                };
                let (slice, _) = self.generate_slice_lit(&elem_ty, elems, node.span)?;
                self.wrap_runtime_handle(&wrapper_name, "%Slice*", &slice)
            }
            other => Err(CodegenError::InvalidLiteral {
                message: format!("array literal cannot have type `{}`", other),
                span: node.span,
            }),
        }
    }

    fn generate_slice_lit(
        &mut self,
        elem: &ResolvedType,
        elems: &[Spanned<Expr>],
        span: Span,
    ) -> CodegenResult<(String, ResolvedType)> {
        let elem_size = self.type_size(elem);
        let elem_ll = self.type_to_llvm(elem, span)?;
        let slice = self.next_reg();
        self.out.inst(format!(
            "{} = call %Slice* @runtime_slice_new(i64 {}, i64 0, i64 {})",
            slice,
            elem_size,
            elems.len()
        ));
        for value in elems {
            let val = self.generate_expr(value)?;
            let slot = self.next_reg();
            self.out.inst(format!(
                "{} = call i8* @runtime_alloc(i64 {})",
                slot,
                elem_size.max(8)
            ));
            let typed = self.next_reg();
            self.out
                .inst(format!("{} = bitcast i8* {} to {}*", typed, slot, elem_ll));
            self.out.inst(format!(
                "store {} {}, {}* {}",
                elem_ll, val, elem_ll, typed
            ));
            self.out.inst(format!(
                "call void @runtime_slice_push(%Slice* {}, i8* {})",
                slice, slot
            ));
        }
        Ok((slice, elem.clone()))
    }

    /// Allocate a collection wrapper struct and store the runtime handle
    /// into its `data` field.
    pub(crate) fn wrap_runtime_handle(
        &mut self,
        wrapper_name: &str,
        handle_ll: &str,
        handle: &str,
    ) -> CodegenResult<String> {
        let raw = self.next_reg();
        self.out
            .inst(format!("{} = call i8* @runtime_alloc(i64 8)", raw));
        let ptr = self.next_reg();
        self.out.inst(format!(
            "{} = bitcast i8* {} to %struct.{}*",
            ptr, raw, wrapper_name
        ));
        let field_ptr = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %struct.{}, %struct.{}* {}, i32 0, i32 0",
            field_ptr, wrapper_name, wrapper_name, ptr
        ));
        self.out.inst(format!(
            "store {} {}, {}* {}",
            handle_ll, handle, handle_ll, field_ptr
        ));
        Ok(ptr)
    }

    fn generate_tuple_lit(
        &mut self,
        node: &Spanned<Expr>,
        elems: &[Spanned<Expr>],
    ) -> CodegenResult<String> {
        let tuple_ty = self.expr_type(node)?;
        let tuple_ll = self.type_to_llvm(&tuple_ty, node.span)?;
        let elem_tys = match &tuple_ty {
            ResolvedType::Tuple(tys) => tys.clone(),
            other => {
                return Err(CodegenError::InvalidLiteral {
                    message: format!("tuple literal cannot have type `{}`", other),
                    span: node.span,
                })
            }
        };
        let mut current = "undef".to_string();
        for (i, (value, ty)) in elems.iter().zip(elem_tys.iter()).enumerate() {
            let val = self.generate_expr(value)?;
            let elem_ll = self.type_to_llvm(ty, value.span)?;
            let reg = self.next_reg();
            self.out.inst(format!(
                "{} = insertvalue {} {}, {} {}, {}",
                reg, tuple_ll, current, elem_ll, val, i
            ));
            current = reg;
        }
        Ok(current)
    }

    // Blocks and if expressions
    // ========================================================================

    fn generate_block_expr(&mut self, stmts: &[Spanned<Stmt>]) -> CodegenResult<String> {
        let (value, _) = self.generate_block(stmts);
        Ok(value)
    }

    fn generate_if_expr(
        &mut self,
        node: &Spanned<Expr>,
        clauses: &[IfClause],
        else_block: Option<&[Spanned<Stmt>]>,
    ) -> CodegenResult<String> {
        let result_ty = self.expr_type(node)?;
        if result_ty.is_void() {
            return Err(CodegenError::ControlFlow {
                message: "if expression must produce a value".to_string(),
                span: node.span,
            });
        }
        if else_block.is_none() {
            return Err(CodegenError::ControlFlow {
                message: "if expression requires an else block".to_string(),
                span: node.span,
            });
        }
        let result_ll = self.type_to_llvm(&result_ty, node.span)?;
        let slot = self.next_reg();
        self.out.inst(format!("{} = alloca {}", slot, result_ll));

        let end_label = self.next_label("ifexpr.end");
        for clause in clauses {
            let then_label = self.next_label("ifexpr.then");
            let else_label = self.next_label("ifexpr.else");

            let cond = self.generate_expr(&clause.cond)?;
            let cond_ll = self.expr_ll(&clause.cond)?;
            let cond = self.cond_to_i1(&cond, &cond_ll);
            self.out.inst(format!(
                "br i1 {}, label %{}, label %{}",
                cond, then_label, else_label
            ));

            self.out.label(&then_label);
            let (value, flow) = self.generate_block(&clause.body);
            if !flow.is_terminated() {
                self.store_arm_value(&value, &slot, &result_ll, node.span);
                self.out.inst(format!("br label %{}", end_label));
            }
            self.out.label(&else_label);
        }

        let (value, flow) = self.generate_block(else_block.unwrap_or(&[]));
        if !flow.is_terminated() {
            self.store_arm_value(&value, &slot, &result_ll, node.span);
            self.out.inst(format!("br label %{}", end_label));
        }

        self.out.label(&end_label);
        let reg = self.next_reg();
        self.out.inst(format!(
            "{} = load {}, {}* {}",
            reg, result_ll, result_ll, slot
        ));
        Ok(reg)
    }

    /// Store an arm's value to the result slot; an arm with no value is a
    /// diagnostic plus a zeroed placeholder.
    pub(crate) fn store_arm_value(
        &mut self,
        value: &str,
        slot: &str,
        result_ll: &str,
        span: Span,
    ) {
        let value = if value.is_empty() {
            self.report(CodegenError::ControlFlow {
                message: "branch of a value-producing expression has no value".to_string(),
                span,
            });
            zero_value(result_ll)
        } else {
            value.to_string()
        };
        self.out.inst(format!(
            "store {} {}, {}* {}",
            result_ll, value, result_ll, slot
        ));
    }

    // Assignment
    // ========================================================================

    fn generate_assign(
        &mut self,
        target: &Spanned<Expr>,
        value: &Spanned<Expr>,
    ) -> CodegenResult<String> {
        let val = self.generate_expr(value)?;
        if val.is_empty() {
            return Err(CodegenError::InvalidOperation {
                message: "cannot assign a void value".to_string(),
                span: value.span,
            });
        }
        let val = match self.expr_type_opt(target) {
            Some(target_ty) => self.coerce_to_existential(val, &target_ty, value)?,
            None => val,
        };
        self.store_to_target(target, &val)?;
        Ok(val)
    }

    fn generate_assign_op(
        &mut self,
        op: BinOp,
        target: &Spanned<Expr>,
        value: &Spanned<Expr>,
    ) -> CodegenResult<String> {
        let current = self.generate_expr(target)?;
        let target_ty = self.expr_type(target)?;
        let rty = self.expr_type(value)?;
        let rval = self.generate_expr(value)?;
        let result =
            self.emit_numeric_binop(op, &current, &target_ty, &rval, &rty, target.span)?;
        self.store_to_target(target, &result)?;
        Ok(result)
    }

    /// Store a value through the assignment target protocol.
    pub(crate) fn store_to_target(
        &mut self,
        target: &Spanned<Expr>,
        val: &str,
    ) -> CodegenResult<()> {
        match &target.node {
            Expr::Ident(name) => {
                if let Some(local) = self.fn_ctx.locals.get(name).cloned() {
                    let ll = self.type_to_llvm(&local.ty, target.span)?;
                    self.out
                        .inst(format!("store {} {}, {}* {}", ll, val, ll, local.addr));
                    Ok(())
                } else if self.fn_ctx.param(name).is_some() {
                    Err(CodegenError::InvalidOperation {
                        message: format!("cannot assign to parameter `{}`", name),
                        span: target.span,
                    })
                } else {
                    let candidates: Vec<&str> =
                        self.fn_ctx.locals.keys().map(|s| s.as_str()).collect();
                    let suggestions = suggest_similar(name, &candidates, 3);
                    Err(CodegenError::UndefinedVar {
                        name: name.clone(),
                        suggestion: format_did_you_mean(&suggestions),
                        span: target.span,
                    })
                }
            }
            Expr::Field { object, field } => {
                let (ptr, field_ll, _) = self.generate_field_addr(object, field)?;
                self.out.inst(format!(
                    "store {} {}, {}* {}",
                    field_ll, val, field_ll, ptr
                ));
                Ok(())
            }
            Expr::Index { base, index } => {
                let base_ty = self.expr_type(base)?;
                match base_ty.strip_refs().clone() {
                    ResolvedType::Array { elem, len } => {
                        let (ptr, elem_ll) =
                            self.array_elem_addr(base, index, &elem, len, target.span)?;
                        self.out.inst(format!(
                            "store {} {}, {}* {}",
                            elem_ll, val, elem_ll, ptr
                        ));
                        Ok(())
                    }
                    ref sliceish @ (ResolvedType::Slice(_)
                    | ResolvedType::GenericInstance { .. }) => {
                        let base_val = self.generate_expr(base)?;
                        let (slice, elem_ty) =
                            self.slice_handle_of(&base_val, sliceish, target.span)?;
                        let idx = self.generate_expr(index)?;
                        let elem_ll = self.type_to_llvm(&elem_ty, target.span)?;
                        let elem_size = self.type_size(&elem_ty);
                        let slot = self.next_reg();
                        self.out.inst(format!(
                            "{} = call i8* @runtime_alloc(i64 {})",
                            slot,
                            elem_size.max(8)
                        ));
                        let typed = self.next_reg();
                        self.out.inst(format!(
                            "{} = bitcast i8* {} to {}*",
                            typed, slot, elem_ll
                        ));
                        self.out.inst(format!(
                            "store {} {}, {}* {}",
                            elem_ll, val, elem_ll, typed
                        ));
                        self.out.inst(format!(
                            "call void @runtime_slice_set(%Slice* {}, i64 {}, i8* {})",
                            slice, idx, slot
                        ));
                        Ok(())
                    }
                    other => Err(CodegenError::InvalidIndex {
                        message: format!("cannot assign into `{}`", other),
                        span: target.span,
                    }),
                }
            }
            _ => Err(CodegenError::UnsupportedExpr {
                message: "invalid assignment target".to_string(),
                span: target.span,
            }),
        }
    }

    // Channel operators
    // ========================================================================

    fn generate_send(
        &mut self,
        channel: &Spanned<Expr>,
        value: &Spanned<Expr>,
    ) -> CodegenResult<String> {
        let ch = self.generate_expr(channel)?;
        let ch_ty = self.expr_type(channel)?;
        let elem_ty = match ch_ty.strip_refs() {
            ResolvedType::Channel(elem) => elem.as_ref().clone(),
            other => {
                return Err(CodegenError::InvalidOperation {
                    message: format!("cannot send on `{}`", other),
                    span: channel.span,
                })
            }
        };
        let val = self.generate_expr(value)?;
        let elem_ll = self.type_to_llvm(&elem_ty, value.span)?;
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
        self.out.inst(format!(
            "call void @runtime_channel_send(%Channel* {}, i8* {})",
            ch, raw
        ));
        Ok(String::new())
    }

    fn generate_recv(
        &mut self,
        node: &Spanned<Expr>,
        channel: &Spanned<Expr>,
    ) -> CodegenResult<String> {
        let ch = self.generate_expr(channel)?;
        let ch_ty = self.expr_type(channel)?;
        let elem_ty = match ch_ty.strip_refs() {
            ResolvedType::Channel(elem) => elem.as_ref().clone(),
            other => {
                return Err(CodegenError::InvalidOperation {
                    message: format!("cannot receive from `{}`", other),
                    span: channel.span,
                })
            }
        };
        let elem_ll = self.type_to_llvm(&elem_ty, node.span)?;
        let raw = self.next_reg();
        self.out.inst(format!(
            "{} = call i8* @runtime_channel_recv(%Channel* {})",
            raw, ch
        ));
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

    // Enum construction
    // ========================================================================

    /// `Type::Variant` in value position constructs a unit variant when
    /// the qualifier resolves to an enum.
    fn generate_path_value(
        &mut self,
        node: &Spanned<Expr>,
        qualifier: &Spanned<String>,
        member: &Spanned<String>,
    ) -> CodegenResult<String> {
        let (enum_name, info) = self.enum_target(node, qualifier)?;
        let Some(tag) = info.variant_index(&member.node) else {
            return Err(CodegenError::UndefinedVariant {
                enum_name,
                variant: member.node.clone(),
                span: member.span,
            });
        };
        if !info.variants[tag].1.is_empty() {
            return Err(CodegenError::InvalidLiteral {
                message: format!(
                    "variant `{}::{}` carries a payload and must be called",
                    enum_name, member.node
                ),
                span: member.span,
            });
        }
        self.construct_enum(&enum_name, tag, &[], &[], node.span)
    }

    /// Resolve the enum a `Qualifier::Member` construction targets, from
    /// the node's table type first and the registries second.
    pub(crate) fn enum_target(
        &mut self,
        node: &Spanned<Expr>,
        qualifier: &Spanned<String>,
    ) -> CodegenResult<(String, crate::state::EnumInfo)> {
        if let Some(ty) = self.expr_type_opt(node) {
            let stripped = ty.strip_refs().clone();
            match &stripped {
                ResolvedType::Enum(e) => {
                    self.type_to_llvm(&stripped, node.span)?;
                    let name = sanitize(&e.name);
                    if let Some(info) = self.types.enums.get(&name).cloned() {
                        return Ok((name, info));
                    }
                }
                ResolvedType::GenericInstance { .. } => {
                    if let Ok((name, true)) = self.ensure_instance(&stripped, node.span) {
                        let info = self.types.enums[&name].clone();
                        return Ok((name, info));
                    }
                }
                _ => {}
            }
        }
        let name = sanitize(&qualifier.node);
        self.types
            .enums
            .get(&name)
            .cloned()
            .map(|info| (name.clone(), info))
            .ok_or_else(|| CodegenError::UndefinedVariant {
                enum_name: qualifier.node.clone(),
                variant: String::new(),
                span: qualifier.span,
            })
    }

    /// Build an enum value: stack slot, tag store, payload store.
    ///
    /// `payload_vals` and `payload_tys` are the already-lowered payload
    /// values in variant order (empty for unit variants).
    pub(crate) fn construct_enum(
        &mut self,
        enum_name: &str,
        tag: usize,
        payload_vals: &[String],
        payload_tys: &[ResolvedType],
        span: Span,
    ) -> CodegenResult<String> {
        let slot = self.next_reg();
        self.out
            .inst(format!("{} = alloca %enum.{}", slot, enum_name));
        let tag_ptr = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %enum.{}, %enum.{}* {}, i32 0, i32 0",
            tag_ptr, enum_name, enum_name, slot
        ));
        self.out
            .inst(format!("store i64 {}, i64* {}", tag, tag_ptr));
        let payload_ptr = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %enum.{}, %enum.{}* {}, i32 0, i32 1",
            payload_ptr, enum_name, enum_name, slot
        ));

        match payload_vals.len() {
            0 => {
                self.out
                    .inst(format!("store i8* null, i8** {}", payload_ptr));
            }
            1 => {
                let ty = &payload_tys[0];
                let ll = self.type_to_llvm(ty, span)?;
                let size = self.type_size(ty).max(8);
                let heap = self.next_reg();
                self.out.inst(format!(
                    "{} = call i8* @runtime_alloc(i64 {})",
                    heap, size
                ));
                let typed = self.next_reg();
                self.out
                    .inst(format!("{} = bitcast i8* {} to {}*", typed, heap, ll));
                self.out.inst(format!(
                    "store {} {}, {}* {}",
                    ll, payload_vals[0], ll, typed
                ));
                self.out
                    .inst(format!("store i8* {}, i8** {}", heap, payload_ptr));
            }
            _ => {
                let lls = payload_tys
                    .iter()
                    .map(|t| self.type_to_llvm(t, span))
                    .collect::<CodegenResult<Vec<_>>>()?;
                let tuple_ll = format!("{{ {} }}", lls.join(", "));
                let tuple_slot = self.next_reg();
                self.out
                    .inst(format!("{} = alloca {}", tuple_slot, tuple_ll));
                for (i, (val, ll)) in payload_vals.iter().zip(lls.iter()).enumerate() {
                    let ptr = self.next_reg();
                    self.out.inst(format!(
                        "{} = getelementptr inbounds {}, {}* {}, i32 0, i32 {}",
                        ptr, tuple_ll, tuple_ll, tuple_slot, i
                    ));
                    self.out
                        .inst(format!("store {} {}, {}* {}", ll, val, ll, ptr));
                }
                let raw = self.next_reg();
                self.out.inst(format!(
                    "{} = bitcast {}* {} to i8*",
                    raw, tuple_ll, tuple_slot
                ));
                self.out
                    .inst(format!("store i8* {}, i8** {}", raw, payload_ptr));
            }
        }
        Ok(slot)
    }
}

fn arith_mnemonic(op: BinOp, is_float: bool) -> Option<&'static str> {
    Some(match op {
        BinOp::Add => {
            if is_float {
                "fadd"
            } else {
                "add"
            }
        }
        BinOp::Sub => {
            if is_float {
                "fsub"
            } else {
                "sub"
            }
        }
        BinOp::Mul => {
            if is_float {
                "fmul"
            } else {
                "mul"
            }
        }
        BinOp::Div => {
            if is_float {
                "fdiv"
            } else {
                "sdiv"
            }
        }
        BinOp::Rem => {
            if is_float {
                "frem"
            } else {
                "srem"
            }
        }
        _ => return None,
    })
}

fn cmp_predicate(op: BinOp, is_float: bool) -> &'static str {
    match op {
        BinOp::Eq => {
            if is_float {
                "oeq"
            } else {
                "eq"
            }
        }
        BinOp::Neq => {
            if is_float {
                "one"
            } else {
                "ne"
            }
        }
        BinOp::Lt => {
            if is_float {
                "olt"
            } else {
                "slt"
            }
        }
        BinOp::Lte => {
            if is_float {
                "ole"
            } else {
                "sle"
            }
        }
        BinOp::Gt => {
            if is_float {
                "ogt"
            } else {
                "sgt"
            }
        }
        BinOp::Gte => {
            if is_float {
                "oge"
            } else {
                "sge"
            }
        }
        _ => unreachable!("not a comparison operator"),
    }
}
