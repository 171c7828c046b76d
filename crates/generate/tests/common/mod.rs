//! Helpers for pattern-matching generated modules.
//!
//! Generated output is parsed with `syn` and matched structurally, so tests
//! assert on the shape of the emitted items rather than on exact source
//! text. Token strings are normalized through `proc_macro2` before
//! comparison, keeping the expectations readable.

#![allow(dead_code)]

use syn::{File, Item, ItemFn, ItemStruct};
use thunkgen_generate::{generate, GuestAbi, Library};

pub struct GenOutput {
    pub guest: File,
    pub host: File,
    pub guest_text: String,
    pub host_text: String,
}

/// Runs the generator and parses both modules, failing the test on invalid
/// Rust output.
pub fn run(lib: &Library, abi: GuestAbi) -> GenOutput {
    let out = generate(lib, abi).expect("generation should succeed");
    GenOutput {
        guest: parse(&out.guest, "guest"),
        host: parse(&out.host, "host"),
        guest_text: out.guest,
        host_text: out.host,
    }
}

fn parse(text: &str, side: &str) -> File {
    syn::parse_file(text)
        .unwrap_or_else(|err| panic!("generated {side} module does not parse: {err}\n{text}"))
}

/// Normalizes a source snippet to `proc_macro2` token spelling, for
/// comparison against printed token streams.
pub fn tokens(source: &str) -> String {
    source
        .parse::<proc_macro2::TokenStream>()
        .unwrap_or_else(|err| panic!("bad expectation snippet `{source}`: {err}"))
        .to_string()
}

pub fn find_fn<'a>(file: &'a File, name: &str) -> Option<&'a ItemFn> {
    file.items.iter().find_map(|item| match item {
        Item::Fn(f) if f.sig.ident == name => Some(f),
        _ => None,
    })
}

pub fn expect_fn<'a>(file: &'a File, name: &str) -> &'a ItemFn {
    find_fn(file, name).unwrap_or_else(|| panic!("no function `{name}` in generated module"))
}

pub fn find_struct<'a>(file: &'a File, name: &str) -> Option<&'a ItemStruct> {
    file.items.iter().find_map(|item| match item {
        Item::Struct(s) if s.ident == name => Some(s),
        _ => None,
    })
}

pub fn expect_struct<'a>(file: &'a File, name: &str) -> &'a ItemStruct {
    find_struct(file, name).unwrap_or_else(|| panic!("no struct `{name}` in generated module"))
}

/// The token spelling of each parameter type of a function.
pub fn param_types(f: &ItemFn) -> Vec<String> {
    f.sig
        .inputs
        .iter()
        .map(|input| match input {
            syn::FnArg::Typed(pat) => {
                let ty = &pat.ty;
                quote::quote!(#ty).to_string()
            }
            syn::FnArg::Receiver(_) => panic!("generated functions take no self"),
        })
        .collect()
}

/// The token spelling of the return type, `""` for unit.
pub fn return_type(f: &ItemFn) -> String {
    match &f.sig.output {
        syn::ReturnType::Default => String::new(),
        syn::ReturnType::Type(_, ty) => quote::quote!(#ty).to_string(),
    }
}

/// Field names and type spellings of a struct, in declaration order.
pub fn field_types(s: &ItemStruct) -> Vec<(String, String)> {
    s.fields
        .iter()
        .map(|field| {
            let name = field.ident.as_ref().expect("named field").to_string();
            let ty = &field.ty;
            (name, quote::quote!(#ty).to_string())
        })
        .collect()
}

/// Length of a `static name: [ExportEntry; N]` array.
pub fn static_array_len(file: &File, name: &str) -> usize {
    let item = file
        .items
        .iter()
        .find_map(|item| match item {
            Item::Static(s) if s.ident == name => Some(s),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no static `{name}` in generated module"));
    let syn::Type::Array(array) = &*item.ty else {
        panic!("static `{name}` is not an array");
    };
    let syn::Expr::Lit(lit) = &array.len else {
        panic!("static `{name}` has a non-literal length");
    };
    let syn::Lit::Int(int) = &lit.lit else {
        panic!("static `{name}` has a non-integer length");
    };
    int.base10_parse().expect("array length parses")
}

/// All top-level invocations of a macro whose path ends in `name`, as
/// printed argument token strings.
pub fn macro_invocations(file: &File, name: &str) -> Vec<String> {
    file.items
        .iter()
        .filter_map(|item| match item {
            Item::Macro(m)
                if m.mac.path.segments.last().map(|s| s.ident == name).unwrap_or(false) =>
            {
                Some(m.mac.tokens.to_string())
            }
            _ => None,
        })
        .collect()
}

/// Whether the file contains a `impl GuestTransfer for <self_ty>` block,
/// returning its `GuestRepr` spelling.
pub fn guest_transfer_repr(file: &File, self_ty: &str) -> Option<String> {
    file.items.iter().find_map(|item| {
        let Item::Impl(imp) = item else { return None };
        let is_transfer = imp
            .trait_
            .as_ref()
            .map(|(_, path, _)| path.segments.last().map(|s| s.ident == "GuestTransfer").unwrap_or(false))
            .unwrap_or(false);
        if !is_transfer {
            return None;
        }
        let ty = &imp.self_ty;
        if quote::quote!(#ty).to_string() != tokens(self_ty) {
            return None;
        }
        imp.items.iter().find_map(|item| match item {
            syn::ImplItem::Type(t) if t.ident == "GuestRepr" => {
                let ty = &t.ty;
                Some(quote::quote!(#ty).to_string())
            }
            _ => None,
        })
    })
}

/// Whether the printed token stream of a function's body contains the given
/// snippet (token-normalized).
pub fn body_contains(f: &ItemFn, snippet: &str) -> bool {
    let block = &f.block;
    quote::quote!(#block).to_string().contains(&tokens(snippet))
}
