//! Runtime extern surface and builtin dispatch tables
//!
//! The generator declares (and calls) exactly this set of C-ABI symbols.
//! Signatures here are bit-exact requirements on the linked runtime.

/// Extern declarations, emitted verbatim by the declaration pipeline.
///
/// Contract on the runtime: `runtime_slice_push` and friends may grow the
/// backing storage, but the `%Slice*` handle identity must survive growth;
/// callers keep using the handle they allocated.
pub(crate) const RUNTIME_EXTERNS: &[&str] = &[
    "declare void @runtime_gc_init()",
    "declare i8* @runtime_alloc(i64)",
    "declare %String* @runtime_string_new(i8*, i64)",
    "declare %String* @runtime_string_concat(%String*, %String*)",
    "declare i32 @runtime_string_equal(%String*, %String*)",
    "declare %String* @runtime_string_format(%String*, %String*, %String*, %String*, %String*)",
    "declare %String* @runtime_string_from_i64(i64)",
    "declare %String* @runtime_string_from_double(double)",
    "declare %String* @runtime_string_from_bool(i1)",
    "declare void @runtime_println_i64(i64)",
    "declare void @runtime_println_i32(i32)",
    "declare void @runtime_println_i8(i8)",
    "declare void @runtime_println_double(double)",
    "declare void @runtime_println_bool(i1)",
    "declare void @runtime_println_string(%String*)",
    "declare %Slice* @runtime_slice_new(i64, i64, i64)",
    "declare i8* @runtime_slice_get(%Slice*, i64)",
    "declare void @runtime_slice_set(%Slice*, i64, i8*)",
    "declare void @runtime_slice_push(%Slice*, i8*)",
    "declare i64 @runtime_slice_len(%Slice*)",
    "declare i8 @runtime_slice_is_empty(%Slice*)",
    "declare i64 @runtime_slice_cap(%Slice*)",
    "declare void @runtime_slice_reserve(%Slice*, i64)",
    "declare void @runtime_slice_clear(%Slice*)",
    "declare i8* @runtime_slice_pop(%Slice*)",
    "declare i8* @runtime_slice_remove(%Slice*, i64)",
    "declare void @runtime_slice_insert(%Slice*, i64, i8*)",
    "declare %Slice* @runtime_slice_copy(%Slice*)",
    "declare %Slice* @runtime_slice_subslice(%Slice*, i64, i64)",
    "declare %HashMap* @runtime_hashmap_new(i64, i64)",
    "declare void @runtime_hashmap_put(%HashMap*, i8*, i8*)",
    "declare i8* @runtime_hashmap_get(%HashMap*, i8*)",
    "declare i8 @runtime_hashmap_contains_key(%HashMap*, i8*)",
    "declare i64 @runtime_hashmap_len(%HashMap*)",
    "declare i8 @runtime_hashmap_is_empty(%HashMap*)",
    "declare void @runtime_hashmap_free(%HashMap*)",
    "declare %Channel* @runtime_channel_new(i64, i64)",
    "declare void @runtime_channel_send(%Channel*, i8*)",
    "declare i8* @runtime_channel_recv(%Channel*)",
    "declare void @runtime_channel_close(%Channel*)",
    "declare i8 @runtime_channel_is_closed(%Channel*)",
    "declare i8 @runtime_channel_try_send(%Channel*, i8*)",
    "declare i8 @runtime_channel_try_recv(%Channel*, i8**)",
    "declare void @runtime_channel_wait_for_send(%Channel*)",
    "declare void @runtime_channel_wait_for_recv(%Channel*)",
    "declare void @runtime_nanosleep(i64)",
    "declare i32 @pthread_create(i64*, i8*, i8* (i8*)*, i8*)",
    "declare i32 @pthread_join(i64, i8**)",
    "declare i32 @pthread_detach(i64)",
];

/// Opaque runtime types plus the uniform closure record.
pub(crate) const RUNTIME_TYPES: &[&str] = &[
    "%String = type opaque",
    "%Slice = type opaque",
    "%HashMap = type opaque",
    "%Channel = type opaque",
    "%Closure = type { i8* (i8*)*, i8* }",
];

/// Names resolved as builtins before any user scope is consulted, and
/// excluded from closure capture discovery.
pub(crate) const BUILTIN_NAMES: &[&str] = &["println", "format", "len", "append"];

pub(crate) fn is_builtin_name(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// Return type of a runtime symbol, for calls the type table has no entry
/// for.
pub(crate) fn runtime_return_type(symbol: &str) -> Option<&'static str> {
    for decl in RUNTIME_EXTERNS {
        let rest = decl.strip_prefix("declare ")?;
        let open = rest.find('(')?;
        let at = rest[..open].rfind('@')?;
        let name = rest[at + 1..open].trim();
        if name == symbol {
            return Some(rest[..at].trim_end());
        }
    }
    None
}

/// `Vec` instance methods redirected onto the slice runtime.
pub(crate) fn slice_method_symbol(method: &str) -> Option<&'static str> {
    Some(match method {
        "push" => "runtime_slice_push",
        "get" => "runtime_slice_get",
        "set" => "runtime_slice_set",
        "len" => "runtime_slice_len",
        "is_empty" => "runtime_slice_is_empty",
        "cap" => "runtime_slice_cap",
        "reserve" => "runtime_slice_reserve",
        "clear" => "runtime_slice_clear",
        "pop" => "runtime_slice_pop",
        "remove" => "runtime_slice_remove",
        "insert" => "runtime_slice_insert",
        "copy" => "runtime_slice_copy",
        "subslice" => "runtime_slice_subslice",
        _ => return None,
    })
}

/// `HashMap` instance methods redirected onto the hashmap runtime.
pub(crate) fn hashmap_method_symbol(method: &str) -> Option<&'static str> {
    Some(match method {
        "put" => "runtime_hashmap_put",
        "get" => "runtime_hashmap_get",
        "contains_key" => "runtime_hashmap_contains_key",
        "len" => "runtime_hashmap_len",
        "is_empty" => "runtime_hashmap_is_empty",
        "free" => "runtime_hashmap_free",
        _ => return None,
    })
}

/// `Channel` instance methods redirected onto the channel runtime.
pub(crate) fn channel_method_symbol(method: &str) -> Option<&'static str> {
    Some(match method {
        "send" => "runtime_channel_send",
        "recv" => "runtime_channel_recv",
        "close" => "runtime_channel_close",
        "is_closed" => "runtime_channel_is_closed",
        "try_send" => "runtime_channel_try_send",
        "try_recv" => "runtime_channel_try_recv",
        _ => return None,
    })
}

/// `println` runtime variant for an argument IR type.
pub(crate) fn println_symbol(ll_type: &str) -> Option<&'static str> {
    Some(match ll_type {
        "i64" => "runtime_println_i64",
        "i32" => "runtime_println_i32",
        "i8" => "runtime_println_i8",
        "double" => "runtime_println_double",
        "i1" => "runtime_println_bool",
        "%String*" => "runtime_println_string",
        _ => return None,
    })
}

/// `runtime_string_from_*` conversion for a `format` argument IR type.
/// Strings pass through without conversion.
pub(crate) fn string_from_symbol(ll_type: &str) -> Option<&'static str> {
    Some(match ll_type {
        "i64" => "runtime_string_from_i64",
        "double" => "runtime_string_from_double",
        "i1" => "runtime_string_from_bool",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn return_types_parse_out_of_declarations() {
        assert_eq!(runtime_return_type("runtime_slice_len"), Some("i64"));
        assert_eq!(runtime_return_type("runtime_slice_get"), Some("i8*"));
        assert_eq!(runtime_return_type("runtime_alloc"), Some("i8*"));
        assert_eq!(
            runtime_return_type("runtime_string_new"),
            Some("%String*")
        );
        assert_eq!(runtime_return_type("runtime_channel_send"), Some("void"));
        assert_eq!(runtime_return_type("not_a_symbol"), None);
    }

    #[test]
    fn println_dispatch_covers_printable_types() {
        assert_eq!(println_symbol("i64"), Some("runtime_println_i64"));
        assert_eq!(println_symbol("i1"), Some("runtime_println_bool"));
        assert_eq!(println_symbol("%String*"), Some("runtime_println_string"));
        assert_eq!(println_symbol("%Slice*"), None);
    }

    #[test]
    fn every_extern_is_well_formed() {
        for decl in RUNTIME_EXTERNS {
            assert!(decl.starts_with("declare "), "{}", decl);
            assert!(decl.contains('@') && decl.ends_with(')'), "{}", decl);
        }
    }
}
