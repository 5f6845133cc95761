//! Type lowering: resolved types to IR type strings
//!
//! Scalars map onto LLVM integer widths (signedness lives in the
//! operations, not the types), runtime collections and strings are opaque
//! struct pointers, structs and enums are always boxed, and surviving type
//! parameters erase to `i8*`.

use rill_ast::Span;

use rill_types::{
    mangle_type, sanitize, Primitive, ResolvedType, TraitType,
};

use crate::diagnostics::{CodegenError, CodegenResult};
use crate::state::{EnumInfo, StructInfo};
use crate::CodeGenerator;

/// Render a float literal losslessly: 17 significant decimal digits in
/// scientific notation, which LLVM's parser accepts without rounding.
pub(crate) fn format_llvm_float(value: f64) -> String {
    format!("{:.16e}", value)
}

/// A zero of the given IR type, used as the recovery placeholder.
pub(crate) fn zero_value(ll_type: &str) -> String {
    if ll_type.ends_with('*') {
        "null".to_string()
    } else if ll_type == "double" {
        format_llvm_float(0.0)
    } else if ll_type.starts_with('{') || ll_type.starts_with('[') {
        "zeroinitializer".to_string()
    } else {
        "0".to_string()
    }
}

impl CodeGenerator<'_> {
    /// Lower a resolved type to its IR type string.
    ///
    /// Total over the resolved-type sum except `Projected`, which must be
    /// resolved away before lowering and maps to a type-mapping error.
    pub(crate) fn type_to_llvm(&mut self, ty: &ResolvedType, span: Span) -> CodegenResult<String> {
        match ty {
            ResolvedType::Primitive(p) => Ok(match p {
                Primitive::Void => "void",
                Primitive::Bool => "i1",
                Primitive::I8 | Primitive::U8 => "i8",
                Primitive::I16 | Primitive::U16 => "i16",
                Primitive::I32 | Primitive::U32 => "i32",
                Primitive::Int | Primitive::U64 | Primitive::Usize => "i64",
                Primitive::I128 | Primitive::U128 => "i128",
                Primitive::Float => "double",
                Primitive::Str => "%String*",
                Primitive::Nil => "i8*",
            }
            .to_string()),

            ResolvedType::Struct(s) => {
                let name = sanitize(&s.name);
                if !self.types.structs.contains_key(&name) {
                    self.types.add_struct(StructInfo {
                        name: name.clone(),
                        fields: s.fields.clone(),
                    });
                }
                Ok(format!("%struct.{}*", name))
            }

            ResolvedType::Enum(e) => {
                let name = sanitize(&e.name);
                if !self.types.enums.contains_key(&name) {
                    self.types.add_enum(EnumInfo {
                        name: name.clone(),
                        variants: e.variants.clone(),
                        type_params: e.type_params.clone(),
                    });
                }
                Ok(format!("%enum.{}*", name))
            }

            ResolvedType::Array { elem, len } => {
                let elem_ll = self.type_to_llvm(elem, span)?;
                Ok(format!("[{} x {}]*", len, elem_ll))
            }

            ResolvedType::Slice(_) => Ok("%Slice*".to_string()),
            ResolvedType::Map { .. } => Ok("%HashMap*".to_string()),
            ResolvedType::Channel(_) => Ok("%Channel*".to_string()),
            ResolvedType::Function(_) => Ok("%Closure*".to_string()),

            ResolvedType::Pointer(inner) | ResolvedType::Reference { inner, .. } => {
                let inner_ll = self.type_to_llvm(inner, span)?;
                if inner_ll.ends_with('*') {
                    Ok(inner_ll)
                } else {
                    Ok(format!("{}*", inner_ll))
                }
            }

            ResolvedType::Optional(inner) => {
                let inner_ll = self.type_to_llvm(inner, span)?;
                if inner_ll.ends_with('*') {
                    Ok(inner_ll)
                } else {
                    Ok(format!("{}*", inner_ll))
                }
            }

            ResolvedType::Tuple(elems) => {
                let lls = elems
                    .iter()
                    .map(|e| self.type_to_llvm(e, span))
                    .collect::<CodegenResult<Vec<_>>>()?;
                Ok(format!("{{ {} }}", lls.join(", ")))
            }

            ResolvedType::Named { name, referent } => {
                if let Some(inner) = referent {
                    return self.type_to_llvm(inner, span);
                }
                if let Some(p) = Primitive::from_name(name) {
                    return self.type_to_llvm(&ResolvedType::Primitive(p), span);
                }
                let sanitized = sanitize(name);
                if self.types.structs.contains_key(&sanitized) {
                    Ok(format!("%struct.{}*", sanitized))
                } else if self.types.enums.contains_key(&sanitized) {
                    Ok(format!("%enum.{}*", sanitized))
                } else if self.vtables.traits.contains_key(&sanitized) {
                    Ok(format!("%Existential.{}*", sanitized))
                } else {
                    // Deferred lookup: the struct may be declared later in
                    // the unit or in another module.
                    Ok(format!("%struct.{}*", sanitized))
                }
            }

            ResolvedType::GenericInstance { .. } => {
                let (name, is_enum) = self.ensure_instance(ty, span)?;
                if is_enum {
                    Ok(format!("%enum.{}*", name))
                } else {
                    Ok(format!("%struct.{}*", name))
                }
            }

            // Type parameters that survive to lowering are erased; the
            // casts at use sites bridge back to concrete types.
            ResolvedType::TypeParam(_) => Ok("i8*".to_string()),

            ResolvedType::Trait(t) => {
                self.ensure_trait_emitted(t);
                Ok(format!("%Existential.{}*", sanitize(&t.name)))
            }

            ResolvedType::Existential { bounds } => {
                let name = self.existential_name(bounds, span)?;
                Ok(format!("%Existential.{}*", name))
            }

            ResolvedType::Projected { base, assoc } => Err(CodegenError::TypeMapping {
                message: format!("unresolved associated type `{}::{}`", base, assoc),
                span,
            }),
        }
    }

    /// IR type name of an existential over the given bounds; emits the
    /// vtable and fat-pointer types on first sight.
    pub(crate) fn existential_name(
        &mut self,
        bounds: &[TraitType],
        span: Span,
    ) -> CodegenResult<String> {
        let first = bounds.first().ok_or_else(|| CodegenError::TypeMapping {
            message: "existential with no trait bound".to_string(),
            span,
        })?;
        self.ensure_trait_emitted(first);
        Ok(sanitize(&first.name))
    }

    /// Register and emit the specialized struct/enum for a generic
    /// instance. Returns its mangled name and whether it is an enum.
    pub(crate) fn ensure_instance(
        &mut self,
        ty: &ResolvedType,
        span: Span,
    ) -> CodegenResult<(String, bool)> {
        let ResolvedType::GenericInstance { base, args } = ty else {
            return Err(CodegenError::TypeMapping {
                message: format!("`{}` is not a generic instance", ty),
                span,
            });
        };

        let mangled = mangle_type(ty);
        if self.types.structs.contains_key(&mangled) {
            return Ok((mangled, false));
        }
        if self.types.enums.contains_key(&mangled) {
            return Ok((mangled, true));
        }

        let base_name = match base.as_ref() {
            ResolvedType::Struct(s) => s.name.clone(),
            ResolvedType::Enum(e) => e.name.clone(),
            ResolvedType::Named { name, .. } => name.clone(),
            other => {
                return Err(CodegenError::TypeMapping {
                    message: format!("cannot instantiate `{}`", other),
                    span,
                })
            }
        };

        // Struct instance
        if let Some(template) = self.types.struct_templates.get(&base_name).cloned() {
            let params = self
                .types
                .struct_template_params
                .get(&base_name)
                .cloned()
                .unwrap_or_default();
            let subst: std::collections::HashMap<String, ResolvedType> = params
                .iter()
                .cloned()
                .zip(args.iter().cloned())
                .collect();
            let fields: Vec<(String, ResolvedType)> = template
                .fields
                .iter()
                .map(|(n, t)| (n.clone(), rill_types::substitute_type(t, &subst)))
                .collect();
            self.types.add_struct(StructInfo {
                name: mangled.clone(),
                fields: fields.clone(),
            });
            let field_lls = fields
                .iter()
                .map(|(_, t)| self.type_to_llvm(t, span))
                .collect::<CodegenResult<Vec<_>>>()?;
            self.out.global_line(format!(
                "%struct.{} = type {{ {} }}",
                mangled,
                if field_lls.is_empty() {
                    "i8".to_string()
                } else {
                    field_lls.join(", ")
                }
            ));
            return Ok((mangled, false));
        }

        // Enum instance
        if let Some(template) = self.types.enum_templates.get(&base_name).cloned() {
            let subst: std::collections::HashMap<String, ResolvedType> = template
                .type_params
                .iter()
                .cloned()
                .zip(args.iter().cloned())
                .collect();
            let variants: Vec<(String, Vec<ResolvedType>)> = template
                .variants
                .iter()
                .map(|(n, payload)| {
                    (
                        n.clone(),
                        payload
                            .iter()
                            .map(|t| rill_types::substitute_type(t, &subst))
                            .collect(),
                    )
                })
                .collect();
            self.types.add_enum(EnumInfo {
                name: mangled.clone(),
                variants,
                type_params: vec![],
            });
            self.out
                .global_line(format!("%enum.{} = type {{ i64, i8* }}", mangled));
            return Ok((mangled, true));
        }

        Err(CodegenError::TypeMapping {
            message: format!("no generic declaration named `{}`", base_name),
            span,
        })
    }

    /// Size in bytes of one value of this type as it sits in a slot.
    /// Boxed aggregates count as one pointer.
    pub(crate) fn type_size(&self, ty: &ResolvedType) -> u64 {
        match ty {
            ResolvedType::Primitive(p) => match p {
                Primitive::Void => 0,
                Primitive::Bool | Primitive::I8 | Primitive::U8 => 1,
                Primitive::I16 | Primitive::U16 => 2,
                Primitive::I32 | Primitive::U32 => 4,
                Primitive::I128 | Primitive::U128 => 16,
                _ => 8,
            },
            ResolvedType::Array { elem, len } => self.type_size(elem) * len,
            ResolvedType::Tuple(elems) => {
                let mut size = 0u64;
                for e in elems {
                    size = align_to(size, self.type_align(e)) + self.type_size(e);
                }
                align_to(size, 8).max(8)
            }
            ResolvedType::Named { referent: Some(inner), .. } => self.type_size(inner),
            // Pointers, boxed structs/enums, runtime handles, closures,
            // existential fat-pointer handles, erased type params.
            _ => 8,
        }
    }

    /// Natural alignment used for env and wrapper struct packing.
    pub(crate) fn type_align(&self, ty: &ResolvedType) -> u64 {
        match ty {
            ResolvedType::Array { elem, .. } => self.type_align(elem),
            ResolvedType::Tuple(elems) => elems
                .iter()
                .map(|e| self.type_align(e))
                .max()
                .unwrap_or(8),
            _ => self.type_size(ty).clamp(1, 8),
        }
    }

    /// Heap allocation size for a struct with the given field types:
    /// the sum of the field sizes, rounded up to 8 bytes.
    pub(crate) fn struct_alloc_size(&self, fields: &[ResolvedType]) -> u64 {
        let sum: u64 = fields.iter().map(|t| self.type_size(t)).sum();
        align_to(sum, 8).max(8)
    }
}

pub(crate) fn align_to(offset: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn float_rendering_is_lossless() {
        let v = 0.1f64;
        let text = format_llvm_float(v);
        assert_eq!(text.parse::<f64>().unwrap(), v);
        assert_eq!(format_llvm_float(14.0), "1.4000000000000000e1");
    }

    #[test]
    fn zero_values_by_shape() {
        assert_eq!(zero_value("i64"), "0");
        assert_eq!(zero_value("%String*"), "null");
        assert_eq!(zero_value("{ i64, i64 }"), "zeroinitializer");
        assert_eq!(zero_value("double"), format_llvm_float(0.0));
    }

    #[test]
    fn align_to_rounds_up() {
        assert_eq!(align_to(0, 8), 0);
        assert_eq!(align_to(1, 8), 8);
        assert_eq!(align_to(12, 4), 12);
        assert_eq!(align_to(13, 4), 16);
    }
}
