//! Vtable emission and dynamic dispatch
//!
//! Per trait: a `%vtable.<T>` record with one `i8*` slot per method in
//! declaration order, and the `%Existential.<T>` fat pointer `{ data,
//! vtable }`. Per trait impl: a vtable global whose entries are the
//! mangled member functions. Dynamic calls index the vtable and cast the
//! slot to the full method signature synthesized from the trait
//! declaration.

use rill_ast::{Expr, Span, Spanned};
use rill_types::{mangle_method, mangle_type, sanitize, ResolvedType, TraitType};

use crate::diagnostics::{CodegenError, CodegenResult};
use crate::state::TraitVtable;
use crate::CodeGenerator;

impl CodeGenerator<'_> {
    /// Register a trait seen through a type and emit its vtable and
    /// existential types if this is first sight. Lazy emissions land in
    /// the globals bucket; declared traits are pre-emitted by the
    /// pipeline.
    pub(crate) fn ensure_trait_emitted(&mut self, t: &TraitType) {
        let name = sanitize(&t.name);
        if !self.vtables.traits.contains_key(&name) {
            self.vtables.traits.insert(
                name.clone(),
                TraitVtable {
                    types_emitted: false,
                    methods: t.methods.clone(),
                    impls: Default::default(),
                },
            );
        }
        let emitted = self.vtables.traits[&name].types_emitted;
        if !emitted {
            let method_count = self.vtables.traits[&name].methods.len();
            for line in trait_type_lines(&name, method_count) {
                self.out.global_line(line);
            }
            self.vtables.traits.get_mut(&name).unwrap().types_emitted = true;
        }
    }

    /// Pipeline emission of a declared trait's types into the body
    /// bucket.
    pub(crate) fn emit_trait_types(&mut self, name: &str) {
        let Some(vt) = self.vtables.traits.get(name) else {
            return;
        };
        if vt.types_emitted {
            return;
        }
        let method_count = vt.methods.len();
        for line in trait_type_lines(name, method_count) {
            self.out.line(line);
        }
        self.vtables.traits.get_mut(name).unwrap().types_emitted = true;
    }

    /// Emit the vtable global for `impl <trait> for <target>`, after the
    /// impl's member functions have been emitted.
    pub(crate) fn emit_impl_vtable(
        &mut self,
        trait_name: &str,
        target_ty: &ResolvedType,
        span: Span,
    ) -> CodegenResult<()> {
        let trait_ir = sanitize(trait_name);
        let Some(vt) = self.vtables.traits.get(&trait_ir).cloned() else {
            return Err(CodegenError::TypeMapping {
                message: format!("impl of unknown trait `{}`", trait_name),
                span,
            });
        };
        if !vt.types_emitted {
            self.ensure_trait_emitted(&TraitType {
                name: trait_ir.clone(),
                methods: vt.methods.clone(),
            });
        }

        let impl_name = mangle_type(target_ty.strip_refs());
        let global = format!("vtable.{}.for.{}", trait_ir, impl_name);
        let recv_ll = self.type_to_llvm(target_ty, span)?;

        let mut entries = Vec::with_capacity(vt.methods.len());
        for sig in &vt.methods {
            let symbol = mangle_method(target_ty, &sig.name);
            if !self.types.functions.contains_key(&symbol) {
                // The type checker should have forbidden a missing method;
                // degrade to a null slot.
                self.report(CodegenError::InvalidOperation {
                    message: format!(
                        "no implementation of `{}::{}` for `{}`",
                        trait_name, sig.name, impl_name
                    ),
                    span,
                });
                entries.push("i8* null".to_string());
                continue;
            }
            let mut param_lls = vec![recv_ll.clone()];
            for p in &sig.params {
                param_lls.push(self.type_to_llvm(p, span)?);
            }
            let ret_ll = match &sig.ret {
                Some(ty) => self.type_to_llvm(ty, span)?,
                None => "void".to_string(),
            };
            let fn_ty = format!("{} ({})*", ret_ll, param_lls.join(", "));
            entries.push(format!(
                "i8* inttoptr (i64 ptrtoint ({} @{} to i64) to i8*)",
                fn_ty, symbol
            ));
        }

        self.out.global_line(format!(
            "@{} = global %vtable.{} {{ {} }}",
            global, trait_ir, entries.join(", ")
        ));
        self.vtables
            .traits
            .get_mut(&trait_ir)
            .unwrap()
            .impls
            .insert(impl_name, global);
        Ok(())
    }

    /// Pack a concrete value into an existential fat pointer for the
    /// given trait bound.
    pub(crate) fn pack_existential(
        &mut self,
        val: &str,
        val_ty: &ResolvedType,
        bound: &TraitType,
        span: Span,
    ) -> CodegenResult<String> {
        self.ensure_trait_emitted(bound);
        let trait_ir = sanitize(&bound.name);
        let impl_name = mangle_type(val_ty.strip_refs());
        let Some(global) = self
            .vtables
            .traits
            .get(&trait_ir)
            .and_then(|vt| vt.impls.get(&impl_name))
            .cloned()
        else {
            return Err(CodegenError::InvalidOperation {
                message: format!("`{}` does not implement `{}`", val_ty, bound.name),
                span,
            });
        };

        let raw = self.next_reg();
        self.out
            .inst(format!("{} = call i8* @runtime_alloc(i64 16)", raw));
        let fat = self.next_reg();
        self.out.inst(format!(
            "{} = bitcast i8* {} to %Existential.{}*",
            fat, raw, trait_ir
        ));

        let val_ll = self.type_to_llvm(val_ty, span)?;
        let data = self.cast_value(val, &val_ll, "i8*");
        let data_field = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %Existential.{}, %Existential.{}* {}, i32 0, i32 0",
            data_field, trait_ir, trait_ir, fat
        ));
        self.out
            .inst(format!("store i8* {}, i8** {}", data, data_field));

        let vt_field = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %Existential.{}, %Existential.{}* {}, i32 0, i32 1",
            vt_field, trait_ir, trait_ir, fat
        ));
        self.out.inst(format!(
            "store %vtable.{}* @{}, %vtable.{}** {}",
            trait_ir, global, trait_ir, vt_field
        ));
        Ok(fat)
    }

    /// Dynamic method call through an existential's vtable.
    pub(crate) fn generate_dyn_call(
        &mut self,
        obj: &str,
        bound: &TraitType,
        method: &Spanned<String>,
        args: &[Spanned<Expr>],
        node: &Spanned<Expr>,
    ) -> CodegenResult<String> {
        self.ensure_trait_emitted(bound);
        let trait_ir = sanitize(&bound.name);
        let Some(index) = bound.method_index(&method.node) else {
            return Err(CodegenError::FieldNotFound {
                field: method.node.clone(),
                on: bound.name.clone(),
                suggestion: None,
                span: method.span,
            });
        };
        let sig = bound.methods[index].clone();

        let data_field = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %Existential.{}, %Existential.{}* {}, i32 0, i32 0",
            data_field, trait_ir, trait_ir, obj
        ));
        let data = self.next_reg();
        self.out
            .inst(format!("{} = load i8*, i8** {}", data, data_field));

        let vt_field = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %Existential.{}, %Existential.{}* {}, i32 0, i32 1",
            vt_field, trait_ir, trait_ir, obj
        ));
        let vt = self.next_reg();
        self.out.inst(format!(
            "{} = load %vtable.{}*, %vtable.{}** {}",
            vt, trait_ir, trait_ir, vt_field
        ));

        let slot = self.next_reg();
        self.out.inst(format!(
            "{} = getelementptr inbounds %vtable.{}, %vtable.{}* {}, i32 0, i32 {}",
            slot, trait_ir, trait_ir, vt, index
        ));
        let fn_raw = self.next_reg();
        self.out
            .inst(format!("{} = load i8*, i8** {}", fn_raw, slot));

        // Synthesize the full method signature: self is i8*, then the
        // trait-declared parameter types.
        let mut param_lls = vec!["i8*".to_string()];
        for p in &sig.params {
            param_lls.push(self.type_to_llvm(p, method.span)?);
        }
        let ret_ll = match &sig.ret {
            Some(ty) => self.type_to_llvm(ty, method.span)?,
            None => "void".to_string(),
        };
        let fn_ty = format!("{} ({})*", ret_ll, param_lls.join(", "));
        let fn_ptr = self.next_reg();
        self.out.inst(format!(
            "{} = bitcast i8* {} to {}",
            fn_ptr, fn_raw, fn_ty
        ));

        let mut call_args = vec![format!("i8* {}", data)];
        for (arg, pll) in args.iter().zip(param_lls.iter().skip(1)) {
            let val = self.generate_expr(arg)?;
            let arg_ll = match self.expr_type_opt(arg) {
                Some(ty) => self.type_to_llvm(&ty, arg.span)?,
                None => pll.clone(),
            };
            let val = self.cast_value(&val, &arg_ll, pll);
            call_args.push(format!("{} {}", pll, val));
        }

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

        // The call site may expect a richer type than the trait signature
        // (erased returns).
        if let Some(expected) = self.expr_type_opt(node) {
            let expected_ll = self.type_to_llvm(&expected, node.span)?;
            return Ok(self.cast_value(&reg, &ret_ll, &expected_ll));
        }
        Ok(reg)
    }
}

fn trait_type_lines(name: &str, method_count: usize) -> Vec<String> {
    let slots = if method_count == 0 {
        "i8*".to_string()
    } else {
        vec!["i8*"; method_count].join(", ")
    };
    vec![
        format!("%vtable.{} = type {{ {} }}", name, slots),
        format!(
            "%Existential.{} = type {{ i8*, %vtable.{}* }}",
            name, name
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn trait_types_have_one_slot_per_method() {
        let lines = trait_type_lines("Display", 3);
        assert_eq!(lines[0], "%vtable.Display = type { i8*, i8*, i8* }");
        assert_eq!(
            lines[1],
            "%Existential.Display = type { i8*, %vtable.Display* }"
        );
    }

    #[test]
    fn empty_trait_still_gets_a_slot() {
        let lines = trait_type_lines("Marker", 0);
        assert_eq!(lines[0], "%vtable.Marker = type { i8* }");
    }
}
