//! Naming of emitted symbols and types, digest computation, and the token
//! spellings shared by both emitters.
//!
//! Every name that is part of the contract with the emulator is produced
//! here: `fexfn_pack_*`, `fexfn_unpack_<lib>_*`, `fexldr_*`,
//! `fexthunks_exports_<lib>`, and the per-export SHA-256 digests the
//! emulator binds call sites by.

use heck::ToUpperCamelCase;
use proc_macro2::{Literal, TokenStream};
use quote::{format_ident, quote};
use sha2::{Digest, Sha256};

use crate::abi::GuestAbi;
use crate::interface::{Scalar, Signature, Type};

pub fn arg(index: usize) -> proc_macro2::Ident {
    format_ident!("a_{}", index)
}

pub fn pack_fn(function: &str, variadic: bool) -> proc_macro2::Ident {
    if variadic {
        format_ident!("fexfn_pack_{}_internal", function)
    } else {
        format_ident!("fexfn_pack_{}", function)
    }
}

pub fn thunk_fn(lib: &str, function: &str) -> proc_macro2::Ident {
    format_ident!("fexthunks_{}_{}", lib, function)
}

pub fn unpack_fn(lib: &str, function: &str) -> proc_macro2::Ident {
    format_ident!("fexfn_unpack_{}_{}", lib, function)
}

pub fn type_erased_unpack_fn(lib: &str, function: &str) -> proc_macro2::Ident {
    format_ident!("fexfn_type_erased_unpack_{}_{}", lib, function)
}

pub fn packed_args_struct(lib: &str, function: &str) -> proc_macro2::Ident {
    format_ident!("fexfn_packed_args_{}_{}", lib, function)
}

pub fn ldr_ptr(lib: &str, function: &str) -> proc_macro2::Ident {
    format_ident!("fexldr_ptr_{}_{}", lib, function)
}

pub fn impl_fn(lib: &str, function: &str) -> proc_macro2::Ident {
    format_ident!("fexfn_impl_{}_{}", lib, function)
}

pub fn init_fn(lib: &str) -> proc_macro2::Ident {
    format_ident!("fexldr_init_{}", lib)
}

pub fn exports_fn(lib: &str) -> proc_macro2::Ident {
    format_ident!("fexthunks_exports_{}", lib)
}

pub fn lib_handle(lib: &str) -> proc_macro2::Ident {
    format_ident!("fexldr_lib_{}", lib)
}

pub fn callback_marker(index: usize) -> proc_macro2::Ident {
    format_ident!("callback_{}", index)
}

pub fn guestcall_packer(index: usize) -> proc_macro2::Ident {
    format_ident!("fexfn_guestcall_packer_{}", index)
}

pub fn callback_unpack_fn(index: usize) -> proc_macro2::Ident {
    format_ident!("fexfn_unpack_callback_{}", index)
}

/// Name of the emitted guest-view struct for a repackable aggregate.
pub fn guest_struct(name: &str) -> proc_macro2::Ident {
    format_ident!("Guest{}", name.to_upper_camel_case())
}

/// Digest identifying one thunked function: SHA-256 over `"<lib>:<name>"`.
pub fn function_digest(lib: &str, function: &str) -> [u8; 32] {
    Sha256::digest(format!("{lib}:{function}")).into()
}

/// Digest identifying one callback signature, independent of any library.
pub fn callback_digest(signature_spelling: &str) -> [u8; 32] {
    Sha256::digest(format!("fexcallback_{signature_spelling}")).into()
}

/// Spells a digest as a `[u8; 32]` literal.
pub fn digest_tokens(digest: &[u8; 32]) -> TokenStream {
    let bytes = digest.iter().map(|b| Literal::u8_suffixed(*b));
    quote!([#(#bytes),*])
}

/// The C spelling of a type, used in diagnostics and digest inputs.
pub fn c_spelling(ty: &Type) -> String {
    match ty {
        Type::Void => "void".to_string(),
        Type::Scalar(s) => scalar_spelling(*s).to_string(),
        Type::Enum(name) | Type::Struct(name) => name.clone(),
        Type::Pointer(inner) => format!("{} *", c_spelling(inner)),
        Type::FunctionPointer(sig) => {
            format!("{} (*)({})", c_spelling(&sig.ret), params_spelling(&sig.params))
        }
        Type::Array(inner, n) => format!("{} [{}]", c_spelling(inner), n),
    }
}

/// The C spelling of a bare signature, e.g. `"int (char, char)"`.
pub fn signature_spelling(sig: &Signature) -> String {
    format!("{} ({})", c_spelling(&sig.ret), params_spelling(&sig.params))
}

fn params_spelling(params: &[Type]) -> String {
    if params.is_empty() {
        return "void".to_string();
    }
    params.iter().map(c_spelling).collect::<Vec<_>>().join(", ")
}

fn scalar_spelling(s: Scalar) -> &'static str {
    match s {
        Scalar::Char => "char",
        Scalar::SChar => "signed char",
        Scalar::UChar => "unsigned char",
        Scalar::Short => "short",
        Scalar::UShort => "unsigned short",
        Scalar::Int => "int",
        Scalar::UInt => "unsigned int",
        Scalar::Long => "long",
        Scalar::ULong => "unsigned long",
        Scalar::LongLong => "long long",
        Scalar::ULongLong => "unsigned long long",
        Scalar::Float => "float",
        Scalar::Double => "double",
        Scalar::SizeT => "size_t",
    }
}

/// The host Rust spelling of a C scalar. Generated modules glob-import
/// `core::ffi`, so the `c_*` aliases resolve there.
pub fn scalar_tokens(s: Scalar) -> TokenStream {
    match s {
        Scalar::Char => quote!(c_char),
        Scalar::SChar => quote!(c_schar),
        Scalar::UChar => quote!(c_uchar),
        Scalar::Short => quote!(c_short),
        Scalar::UShort => quote!(c_ushort),
        Scalar::Int => quote!(c_int),
        Scalar::UInt => quote!(c_uint),
        Scalar::Long => quote!(c_long),
        Scalar::ULong => quote!(c_ulong),
        Scalar::LongLong => quote!(c_longlong),
        Scalar::ULongLong => quote!(c_ulonglong),
        Scalar::Float => quote!(c_float),
        Scalar::Double => quote!(c_double),
        Scalar::SizeT => quote!(usize),
    }
}

/// The spelling used for a scalar slot in guest layout: fixed-width where
/// the guest width differs from the host's.
pub fn guest_scalar_tokens(s: Scalar, abi: GuestAbi) -> TokenStream {
    if abi == GuestAbi::X86_32 {
        match s {
            Scalar::Long => return quote!(i32),
            Scalar::ULong => return quote!(u32),
            Scalar::SizeT => return quote!(u32),
            _ => {}
        }
    }
    scalar_tokens(s)
}

/// Whether a scalar's width matches between this guest ABI and the host.
pub fn scalar_width_matches(s: Scalar, abi: GuestAbi) -> bool {
    abi.scalar(s).size == crate::abi::HOST_ABI.scalar(s).size
}

/// The host Rust spelling of a type.
pub fn host_type_tokens(ty: &Type) -> TokenStream {
    match ty {
        Type::Void => quote!(c_void),
        Type::Scalar(s) => scalar_tokens(*s),
        Type::Enum(name) | Type::Struct(name) => {
            let ident = format_ident!("{}", name);
            quote!(#ident)
        }
        Type::Pointer(inner) => {
            let inner = host_type_tokens(inner);
            quote!(*mut #inner)
        }
        Type::FunctionPointer(sig) => fn_ptr_tokens(sig),
        Type::Array(inner, n) => {
            let inner = host_type_tokens(inner);
            let n = Literal::u64_unsuffixed(*n);
            quote!([#inner; #n])
        }
    }
}

/// The Rust spelling of a C function-pointer type.
pub fn fn_ptr_tokens(sig: &Signature) -> TokenStream {
    let params = sig.params.iter().map(host_type_tokens);
    match &sig.ret {
        Type::Void => quote!(unsafe extern "C" fn(#(#params),*)),
        ret => {
            let ret = host_type_tokens(ret);
            quote!(unsafe extern "C" fn(#(#params),*) -> #ret)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spellings_match_c_syntax() {
        let sig = Signature::parse("int (char, char)").unwrap();
        assert_eq!(signature_spelling(&sig), "int (char, char)");
        assert_eq!(
            c_spelling(&Type::parse("int (*)(char, char)").unwrap()),
            "int (*)(char, char)"
        );
        assert_eq!(c_spelling(&Type::parse("unsigned long").unwrap()), "unsigned long");
        assert_eq!(c_spelling(&Type::parse("TestStruct *").unwrap()), "TestStruct *");
    }

    #[test]
    fn digests_are_stable_and_distinct() {
        let a = function_digest("libtest", "func");
        let b = function_digest("libtest", "func");
        let c = function_digest("libtest", "other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, callback_digest("int (char, char)"));
    }

    #[test]
    fn guest_scalar_width_adjustment() {
        assert_eq!(
            guest_scalar_tokens(Scalar::ULong, GuestAbi::X86_32).to_string(),
            "u32"
        );
        assert_eq!(
            guest_scalar_tokens(Scalar::ULong, GuestAbi::X86_64).to_string(),
            "c_ulong"
        );
        assert!(!scalar_width_matches(Scalar::Long, GuestAbi::X86_32));
        assert!(scalar_width_matches(Scalar::Int, GuestAbi::X86_32));
    }
}
