use proc_macro2::{Span, TokenStream};
use quote::{quote, quote_spanned};
use syn::parse::Parser;
use syn::spanned::Spanned;

use crate::parse::*;

// syn::AttributeArgs does not implement syn::Parse
type AttributeArgs = syn::punctuated::Punctuated<syn::Meta, syn::Token![,]>;

const KNOWN_ATTRIBUTES: &str = "`worker_threads`, `pin_workers`";

#[derive(Default)]
struct Config {
    worker_threads: Option<usize>,
    pin_workers: Option<bool>,
}

/// Expands:
///
/// ```no_compile
/// #[corelane::main(worker_threads = 2)]
/// async fn main() {
///     println!("Hello world");
/// }
/// ```
///
/// into a plain `fn main` that builds a runtime and blocks on the body.
pub(crate) fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    let input: syn::ItemFn = match syn::parse2(item.clone()) {
        Ok(it) => it,
        Err(e) => return token_stream_with_error(item, e),
    };

    let config = if input.sig.ident == "main" && !input.sig.inputs.is_empty() {
        let msg = "the main function cannot accept arguments";
        Err(syn::Error::new_spanned(&input.sig.ident, msg))
    } else {
        AttributeArgs::parse_terminated
            .parse2(args)
            .and_then(|args| build_config(&input, args))
    };

    match config {
        Ok(config) => expand(input, false, config),
        Err(e) => token_stream_with_error(expand(input, false, Config::default()), e),
    }
}

pub(crate) fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    let input: syn::ItemFn = match syn::parse2(item.clone()) {
        Ok(it) => it,
        Err(e) => return token_stream_with_error(item, e),
    };

    let config = if let Some(attr) = input.attrs.iter().find(|attr| is_test_attribute(attr)) {
        let msg = "second test attribute is supplied, consider removing or changing the order of your test attributes";
        Err(syn::Error::new_spanned(attr, msg))
    } else if !input.sig.inputs.is_empty() {
        let msg = "test functions cannot accept arguments";
        Err(syn::Error::new_spanned(&input.sig.inputs, msg))
    } else {
        AttributeArgs::parse_terminated
            .parse2(args)
            .and_then(|args| build_config(&input, args))
    };

    match config {
        Ok(config) => expand(input, true, config),
        Err(e) => token_stream_with_error(expand(input, true, Config::default()), e),
    }
}

fn build_config(input: &syn::ItemFn, args: AttributeArgs) -> Result<Config, syn::Error> {
    if input.sig.asyncness.is_none() {
        let msg = "the `async` keyword is missing from the function declaration";
        return Err(syn::Error::new_spanned(input.sig.fn_token, msg));
    }

    let mut config = Config::default();

    for arg in args {
        let namevalue = match arg {
            syn::Meta::NameValue(namevalue) => namevalue,
            other => {
                let msg = format!("Attributes take a value, expected one of: {KNOWN_ATTRIBUTES}.");
                return Err(syn::Error::new_spanned(other, msg));
            }
        };

        let ident = namevalue
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new_spanned(&namevalue, "Must have specified ident"))?
            .to_string();

        let lit = match &namevalue.value {
            syn::Expr::Lit(syn::ExprLit { lit, .. }) => lit,
            expr => return Err(syn::Error::new_spanned(expr, "Must be a literal")),
        };
        let span = lit.span();

        match ident.as_str() {
            "worker_threads" => {
                if config.worker_threads.is_some() {
                    return Err(syn::Error::new(span, "`worker_threads` set multiple times."));
                }

                let n = parse_int(lit, span, "worker_threads")?;
                if n == 0 {
                    return Err(syn::Error::new(span, "`worker_threads` may not be 0."));
                }
                config.worker_threads = Some(n);
            }
            "pin_workers" => {
                if config.pin_workers.is_some() {
                    return Err(syn::Error::new(span, "`pin_workers` set multiple times."));
                }
                config.pin_workers = Some(parse_bool(lit, span, "pin_workers")?);
            }
            name => {
                let msg =
                    format!("Unknown attribute {name} is specified; expected one of: {KNOWN_ATTRIBUTES}.");
                return Err(syn::Error::new_spanned(namevalue, msg));
            }
        }
    }

    Ok(config)
}

fn expand(mut input: syn::ItemFn, is_test: bool, config: Config) -> TokenStream {
    input.sig.asyncness = None;

    // Type mismatches are reported on the last statement of the body.
    let span = input
        .block
        .stmts
        .last()
        .map_or_else(Span::call_site, |stmt| stmt.span());

    let mut rt = quote_spanned! {span=> corelane::runtime::Builder::new() };

    if let Some(n) = config.worker_threads {
        rt = quote_spanned! {span=> #rt.worker_threads(#n) };
    }

    if let Some(pin) = config.pin_workers {
        rt = quote_spanned! {span=> #rt.pin_workers(#pin) };
    }

    if is_test {
        input.attrs.push(syn::parse_quote! { #[::core::prelude::v1::test] });
    }

    // `?` in the body needs the output type spelled out.
    let output_type = match &input.sig.output {
        syn::ReturnType::Default => quote! { () },
        syn::ReturnType::Type(_, ret_type) => quote! { #ret_type },
    };

    // The body is moved onto the runtime's workers, so it is not pinned on
    // this stack like a test body usually would be.
    let body = &input.block;
    let block_on = quote_spanned! {span=>
        #[allow(clippy::expect_used, clippy::needless_return)]
        {
            let body = async move {
                let output: #output_type = #body;
                output
            };

            return #rt
                .try_build()
                .expect("Failed building the Runtime")
                .block_on(body);
        }
    };

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;

    quote! {
        #(#attrs)*
        #vis #sig {
            #block_on
        }
    }
}
