use proc_macro2::{Span, TokenStream};
use syn::Attribute;

pub(crate) fn parse_int(lit: &syn::Lit, span: Span, field: &str) -> Result<usize, syn::Error> {
    match lit {
        syn::Lit::Int(lit) => lit.base10_parse::<usize>().map_err(|e| {
            syn::Error::new(
                span,
                format!("Failed to parse value of `{field}` as integer: {e}"),
            )
        }),
        _ => Err(syn::Error::new(
            span,
            format!("Failed to parse value of `{field}` as integer."),
        )),
    }
}

pub(crate) fn parse_bool(lit: &syn::Lit, span: Span, field: &str) -> Result<bool, syn::Error> {
    match lit {
        syn::Lit::Bool(b) => Ok(b.value),
        _ => Err(syn::Error::new(
            span,
            format!("Failed to parse value of `{field}` as bool."),
        )),
    }
}

/// Whether `attr` is `#[test]`, `#[core::prelude::*::test]` or
/// `#[std::prelude::*::test]`.
pub(crate) fn is_test_attribute(attr: &Attribute) -> bool {
    let syn::Meta::Path(path) = &attr.meta else {
        return false;
    };

    if path.leading_colon.is_none() && path.is_ident("test") {
        return true;
    }

    let segments: Vec<_> = path.segments.iter().collect();
    let [root, prelude, _, test] = segments.as_slice() else {
        return false;
    };

    segments.iter().all(|s| s.arguments.is_none())
        && (root.ident == "core" || root.ident == "std")
        && prelude.ident == "prelude"
        && test.ident == "test"
}

/// Emits `tokens` followed by `error`, so IDEs still see the annotated item.
pub(crate) fn token_stream_with_error(mut tokens: TokenStream, error: syn::Error) -> TokenStream {
    tokens.extend(error.into_compile_error());
    tokens
}
