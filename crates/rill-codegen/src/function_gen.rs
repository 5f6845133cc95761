//! Function and method emission
//!
//! Builds the `define` for each function, seeds the function context with
//! parameter records and type-parameter names, lowers the body, and closes
//! every fall-through path with a default terminator. Impl blocks emit
//! their member functions and then, for trait impls, the vtable global.

use std::collections::HashSet;

use rill_ast::{Function, ImplBlock, Span};
use rill_types::{mangle_method, sanitize, ResolvedType};

use crate::diagnostics::CodegenResult;
use crate::state::{FunctionContext, ParamInfo};
use crate::types::zero_value;
use crate::CodeGenerator;

impl CodeGenerator<'_> {
    /// Emit one function. `method_of` carries the receiver type when the
    /// function is a member of an impl block.
    ///
    /// Failure to map the return type or any parameter type aborts this
    /// function before anything is written; all other errors are recovered
    /// inside the body.
    pub(crate) fn generate_function(
        &mut self,
        f: &Function,
        method_of: Option<&ResolvedType>,
    ) -> CodegenResult<()> {
        let is_main = method_of.is_none() && f.name.node == "main";
        let symbol = match method_of {
            Some(target) => mangle_method(target, &f.name.node),
            None => sanitize(&f.name.node),
        };

        let type_params: HashSet<String> =
            f.type_params.iter().map(|p| p.node.clone()).collect();

        // Resolve the signature first: these failures abort the function.
        let mut params: Vec<(String, ResolvedType)> = Vec::with_capacity(f.params.len());
        for p in &f.params {
            let ty = self.resolve_type_ann(&p.ty, &type_params)?;
            params.push((p.name.node.clone(), ty));
        }
        let ret_ty = f
            .ret
            .as_ref()
            .map(|r| self.resolve_type_ann(r, &type_params))
            .transpose()?;

        // The signature must lower before the define line is written.
        let mut param_lls = Vec::with_capacity(params.len());
        for (name, ty) in &params {
            let ll = self.type_to_llvm(ty, f.name.span)?;
            param_lls.push(format!("{} %{}", ll, sanitize(name)));
        }
        let ret_ll = if is_main {
            "i32".to_string()
        } else {
            match &ret_ty {
                Some(ty) => self.type_to_llvm(ty, f.name.span)?,
                None => "void".to_string(),
            }
        };

        self.fn_ctx = FunctionContext {
            current_function: Some(f.name.node.clone()),
            current_return_type: ret_ty,
            params: params
                .iter()
                .map(|(name, ty)| ParamInfo {
                    name: name.clone(),
                    ty: ty.clone(),
                    register: format!("%{}", sanitize(name)),
                })
                .collect(),
            type_params,
            ..FunctionContext::default()
        };

        self.out.line(format!(
            "define {} @{}({}) {{",
            ret_ll,
            symbol,
            param_lls.join(", ")
        ));
        self.out.label("entry");

        let (_, flow) = self.generate_block(&f.body);
        if !flow.is_terminated() {
            self.emit_default_return(&ret_ll, is_main);
        }
        self.out.line("}");

        // The loop stack must drain with the function (break/continue
        // cannot leak across function boundaries).
        debug_assert!(self.fn_ctx.loop_stack.is_empty());
        Ok(())
    }

    fn emit_default_return(&mut self, ret_ll: &str, is_main: bool) {
        if is_main {
            self.out.inst("ret i32 0");
        } else if ret_ll == "void" {
            self.out.inst("ret void");
        } else {
            self.out
                .inst(format!("ret {} {}", ret_ll, zero_value(ret_ll)));
        }
    }

    /// Emit an impl block: member functions first, then (for a trait
    /// impl) the vtable global for this implementation.
    pub(crate) fn generate_impl(&mut self, block: &ImplBlock, span: Span) {
        let target_ty = match self.resolve_type_ann(&block.target, &HashSet::new()) {
            Ok(ty) => ty,
            Err(err) => {
                self.report(err);
                return;
            }
        };

        for method in &block.methods {
            if let Err(err) = self.generate_function(method, Some(&target_ty)) {
                self.report(err);
            }
            self.out.line("");
        }

        if let Some(trait_name) = &block.trait_name {
            if let Err(err) = self.emit_impl_vtable(&trait_name.node, &target_ty, span) {
                self.report(err);
            }
        }
    }
}
