//! Emits the host thunk module.
//!
//! The host module runs on the 64-bit host, so guest images must be spelled
//! out explicitly: packed-argument records and repack structs are built from
//! the `GuestScalar`/`GuestPtr` wrapper family of the selected guest ABI,
//! and every generated record carries `offset_of!` assertions pinning it to
//! the offsets computed from the guest ABI rules.
//!
//! Contents, in emission order: host type declarations, layout wrappers
//! (dependency-first), per-function packed records and unpackers, callback
//! packers/unpackers, the `exports` table, the lazy loader, and the
//! `fexthunks_exports_<lib>` accessor.

use proc_macro2::{Ident, Literal, TokenStream};
use quote::{format_ident, quote};

use crate::abi::{self, GuestAbi, LayoutSide};
use crate::compat::{Analysis, CallbackPlan, FunctionPlan, ParamStrategy, RetStrategy, TypeCompat};
use crate::interface::{Library, Type};
use crate::names;

pub fn generate_host(lib: &Library, analysis: &Analysis) -> TokenStream {
    let libname = lib.sanitized_name();
    let abi_module = match analysis.abi {
        GuestAbi::X86_32 => quote!(abi32),
        GuestAbi::X86_64 => quote!(abi64),
    };

    let mut out = quote! {
        #![allow(non_camel_case_types, non_snake_case, non_upper_case_globals)]
        #![allow(dead_code, unused_imports, unused_mut, clippy::missing_safety_doc)]

        use core::ffi::*;
        use thunkgen_runtime::#abi_module::*;
        use thunkgen_runtime::loader::open_host_library;
        use thunkgen_runtime::{ExportEntry, LibraryHandle, SymbolCell};
    };

    out.extend(type_declarations(lib));
    out.extend(layout_wrappers(lib, analysis));

    for plan in &analysis.functions {
        out.extend(packed_args_record(lib, analysis, plan, &libname));
        if !plan.custom_host_impl {
            out.extend(symbol_cell(plan, &libname));
        } else {
            out.extend(custom_impl_decl(plan, &libname));
        }
        out.extend(unpacker(analysis, plan, &libname));
    }

    for callback in &analysis.callbacks {
        out.extend(guestcall_packer(analysis, callback));
        if !callback.use_generic_wrapper {
            out.extend(callback_unpacker(analysis, callback));
        }
    }

    out.extend(exports_table(analysis, &libname));
    out.extend(loader(lib, analysis, &libname));

    out
}

/// Host-view declarations of every named type in the interface.
fn type_declarations(lib: &Library) -> TokenStream {
    let mut out = TokenStream::new();
    for def in lib.structs() {
        let ident = format_ident!("{}", def.name);
        if def.opaque {
            out.extend(quote! {
                #[repr(C)]
                pub struct #ident {
                    _opaque: [u8; 0],
                }
            });
            continue;
        }
        let fields = def.members.iter().map(|member| {
            let name = format_ident!("{}", member.name);
            let ty = member_host_tokens(&member.ty);
            quote!(pub #name: #ty)
        });
        out.extend(quote! {
            #[repr(C)]
            #[derive(Copy, Clone)]
            pub struct #ident {
                #(#fields,)*
            }
        });
    }
    for def in lib.enums() {
        let ident = format_ident!("{}", def.name);
        let underlying = names::scalar_tokens(def.underlying);
        out.extend(quote! {
            pub type #ident = #underlying;
        });
    }
    out
}

/// Struct members spell function pointers as `Option<..>` so that the
/// nulled-out value produced by repacking is representable.
fn member_host_tokens(ty: &Type) -> TokenStream {
    match ty {
        Type::FunctionPointer(sig) => {
            let f = names::fn_ptr_tokens(sig);
            quote!(Option<#f>)
        }
        other => names::host_type_tokens(other),
    }
}

/// The guest-image spelling of a type, as used for record slots and repack
/// struct fields.
fn slot_tokens(lib: &Library, analysis: &Analysis, ty: &Type) -> TokenStream {
    match ty {
        Type::Scalar(s) => {
            let inner = names::guest_scalar_tokens(*s, analysis.abi);
            quote!(GuestScalar<#inner>)
        }
        Type::Enum(name) => {
            let def = lib.enum_def(name).expect("enum declared");
            let underlying = def.guest_underlying.unwrap_or(def.underlying);
            let inner = names::guest_scalar_tokens(underlying, analysis.abi);
            quote!(GuestScalar<#inner>)
        }
        Type::Pointer(pointee) => {
            let inner = names::host_type_tokens(pointee);
            quote!(GuestPtr<#inner>)
        }
        Type::FunctionPointer(sig) => {
            let f = names::fn_ptr_tokens(sig);
            quote!(GuestPtr<#f>)
        }
        Type::Struct(name) => {
            if analysis.has_guest_view(name) {
                let ident = names::guest_struct(name);
                quote!(#ident)
            } else {
                let ident = format_ident!("{}", name);
                quote!(#ident)
            }
        }
        Type::Array(elem, n) => {
            let inner = slot_tokens(lib, analysis, elem);
            let n = Literal::u64_unsuffixed(*n);
            quote!([#inner; #n])
        }
        Type::Void => quote!(GuestScalar<()>),
    }
}

/// Member function pointers repack to null: a guest function pointer is not
/// host-callable without a trampoline, and nothing here can allocate one.
fn to_guest_expr(lib: &Library, analysis: &Analysis, ty: &Type, value: TokenStream) -> TokenStream {
    match ty {
        Type::Scalar(s) => {
            if names::scalar_width_matches(*s, analysis.abi) {
                quote!(GuestScalar::new(#value))
            } else {
                let guest = names::guest_scalar_tokens(*s, analysis.abi);
                quote!(GuestScalar::new(#value as #guest))
            }
        }
        Type::Enum(name) => {
            let def = lib.enum_def(name).expect("enum declared");
            let underlying = def.guest_underlying.unwrap_or(def.underlying);
            if names::scalar_width_matches(underlying, analysis.abi) {
                quote!(GuestScalar::new(#value))
            } else {
                let guest = names::guest_scalar_tokens(underlying, analysis.abi);
                quote!(GuestScalar::new(#value as #guest))
            }
        }
        Type::Pointer(_) => quote!(GuestPtr::from_host_ptr(#value)),
        Type::FunctionPointer(_) => quote!(GuestPtr::null()),
        Type::Struct(_) => quote!(GuestTransfer::to_guest(#value)),
        Type::Array(elem, _) => {
            let per_elem = to_guest_expr(lib, analysis, elem, quote!(v));
            quote!(#value.map(|v| #per_elem))
        }
        Type::Void => quote!(()),
    }
}

fn from_guest_expr(
    lib: &Library,
    analysis: &Analysis,
    ty: &Type,
    repr: TokenStream,
) -> TokenStream {
    match ty {
        Type::Scalar(s) => {
            if names::scalar_width_matches(*s, analysis.abi) {
                quote!(#repr.get())
            } else {
                let host = names::scalar_tokens(*s);
                quote!(#repr.get() as #host)
            }
        }
        Type::Enum(name) => {
            let def = lib.enum_def(name).expect("enum declared");
            let underlying = def.guest_underlying.unwrap_or(def.underlying);
            if names::scalar_width_matches(underlying, analysis.abi) {
                quote!(#repr.get())
            } else {
                let host = names::scalar_tokens(underlying);
                quote!(#repr.get() as #host)
            }
        }
        Type::Pointer(_) => quote!(#repr.as_host_ptr()),
        Type::FunctionPointer(_) => quote!(None),
        Type::Struct(_) => quote!(GuestTransfer::from_guest(#repr)),
        Type::Array(elem, _) => {
            let per_elem = from_guest_expr(lib, analysis, elem, quote!(v));
            quote!(#repr.map(|v| #per_elem))
        }
        Type::Void => quote!(()),
    }
}

/// Layout wrappers for every classified aggregate, dependency-first.
///
/// * Identical: the host struct is its own guest image; an identity
///   `GuestTransfer` impl is emitted.
/// * Repackable (and incompatible types forced with `emit_layout_wrappers`):
///   a `Guest<Name>` struct with one wrapped field per guest member, plus a
///   field-wise `GuestTransfer` impl keyed by member name.
/// * Incompatible without override: nothing. The missing impl is what makes
///   any use of the type across the boundary fail to compile.
fn layout_wrappers(lib: &Library, analysis: &Analysis) -> TokenStream {
    let mut out = TokenStream::new();
    for name in &analysis.wrapper_order {
        let compat = analysis.struct_compat(name).expect("classified");
        let ident = format_ident!("{}", name);
        match compat {
            TypeCompat::Identical => {
                out.extend(quote! {
                    impl GuestTransfer for #ident {
                        type GuestRepr = #ident;

                        fn to_guest(self) -> #ident {
                            self
                        }

                        fn from_guest(repr: #ident) -> #ident {
                            repr
                        }
                    }
                });
            }
            TypeCompat::Repackable | TypeCompat::Incompatible { .. } => {
                out.extend(repack_wrapper(lib, analysis, name));
            }
            TypeCompat::Opaque => {}
        }
    }
    out
}

fn repack_wrapper(lib: &Library, analysis: &Analysis, name: &str) -> TokenStream {
    let def = lib.struct_def(name).expect("struct declared");
    let host_ident = format_ident!("{}", name);
    let guest_ident = names::guest_struct(name);

    let fields = def.guest_view().iter().map(|member| {
        let field = format_ident!("{}", member.name);
        let ty = slot_tokens(lib, analysis, &member.ty);
        quote!(pub #field: #ty)
    });

    let to_guest_fields = def.guest_view().iter().map(|member| {
        let field = format_ident!("{}", member.name);
        let expr = to_guest_expr(lib, analysis, &member.ty, quote!(self.#field));
        quote!(#field: #expr)
    });

    let from_guest_fields = def.members.iter().map(|member| {
        let field = format_ident!("{}", member.name);
        let repr = quote!(repr.#field);
        let expr = from_guest_expr(lib, analysis, &member.ty, repr);
        quote!(#field: #expr)
    });

    let assertions = guest_struct_assertions(lib, analysis, name, &guest_ident);

    quote! {
        #[repr(C)]
        #[derive(Copy, Clone)]
        pub struct #guest_ident {
            #(#fields,)*
        }

        #assertions

        impl GuestTransfer for #host_ident {
            type GuestRepr = #guest_ident;

            fn to_guest(self) -> #guest_ident {
                #guest_ident {
                    #(#to_guest_fields,)*
                }
            }

            fn from_guest(repr: #guest_ident) -> #host_ident {
                #host_ident {
                    #(#from_guest_fields,)*
                }
            }
        }
    }
}

/// Pins the emitted guest-view struct to the offsets the guest ABI computes
/// for the guest declaration.
fn guest_struct_assertions(
    lib: &Library,
    analysis: &Analysis,
    name: &str,
    guest_ident: &Ident,
) -> TokenStream {
    let Ok(layout) = abi::struct_layout(lib, analysis.abi, LayoutSide::Guest, name) else {
        return quote!();
    };
    let mut checks = TokenStream::new();
    for member in &layout.members {
        let field = format_ident!("{}", member.name);
        let offset = Literal::u64_unsuffixed(member.offset);
        checks.extend(quote! {
            assert!(core::mem::offset_of!(#guest_ident, #field) == #offset);
        });
    }
    let size = Literal::u64_unsuffixed(layout.size);
    quote! {
        const _: () = {
            #checks
            assert!(core::mem::size_of::<#guest_ident>() == #size);
        };
    }
}

fn packed_args_record(
    lib: &Library,
    analysis: &Analysis,
    plan: &FunctionPlan,
    libname: &str,
) -> TokenStream {
    let record = names::packed_args_struct(libname, &plan.name);

    let mut fields = TokenStream::new();
    if plan.ret_strategy != RetStrategy::Void {
        let rv = slot_tokens(lib, analysis, &plan.ret);
        fields.extend(quote!(pub rv: #rv,));
    }
    for (idx, p) in plan.params.iter().enumerate() {
        let name = names::arg(idx);
        let ty = slot_tokens(lib, analysis, &p.ty);
        fields.extend(quote!(pub #name: #ty,));
    }

    let assertions = record_assertions(lib, analysis, plan, &record);

    quote! {
        #[repr(C)]
        pub struct #record {
            #fields
        }

        #assertions
    }
}

fn record_assertions(
    lib: &Library,
    analysis: &Analysis,
    plan: &FunctionPlan,
    record: &Ident,
) -> TokenStream {
    let Some(slots) = crate::guest::record_slot_layouts(lib, analysis.abi, plan) else {
        return quote!();
    };
    let (offsets, size) = abi::record_offsets(&slots);

    let mut field_names = Vec::new();
    if plan.ret_strategy != RetStrategy::Void {
        field_names.push(format_ident!("rv"));
    }
    for idx in 0..plan.params.len() {
        field_names.push(names::arg(idx));
    }

    let mut checks = TokenStream::new();
    for (field, offset) in field_names.iter().zip(&offsets) {
        let offset = Literal::u64_unsuffixed(*offset);
        checks.extend(quote! {
            assert!(core::mem::offset_of!(#record, #field) == #offset);
        });
    }
    let size = Literal::u64_unsuffixed(size);
    quote! {
        const _: () = {
            #checks
            assert!(core::mem::size_of::<#record>() == #size);
        };
    }
}

/// The host signature of the real native symbol.
fn host_fn_type(plan: &FunctionPlan) -> TokenStream {
    let params = plan.params.iter().map(|p| names::host_type_tokens(&p.ty));
    match &plan.ret {
        Type::Void => quote!(unsafe extern "C" fn(#(#params),*)),
        ret => {
            let ret = names::host_type_tokens(ret);
            quote!(unsafe extern "C" fn(#(#params),*) -> #ret)
        }
    }
}

fn symbol_cell(plan: &FunctionPlan, libname: &str) -> TokenStream {
    let cell = names::ldr_ptr(libname, &plan.name);
    let fn_ty = host_fn_type(plan);
    quote! {
        static #cell: SymbolCell<#fn_ty> = SymbolCell::new();
    }
}

/// Forward declaration of a user-provided host implementation. Passthrough
/// parameters surface as raw guest pointers.
fn custom_impl_decl(plan: &FunctionPlan, libname: &str) -> TokenStream {
    let name = names::impl_fn(libname, &plan.name);
    let params = plan.params.iter().enumerate().map(|(idx, p)| {
        let arg = names::arg(idx);
        let ty = match (&p.strategy, &p.ty) {
            (ParamStrategy::Passthrough, Type::Pointer(pointee)) => {
                let inner = names::host_type_tokens(pointee);
                quote!(GuestPtr<#inner>)
            }
            _ => names::host_type_tokens(&p.ty),
        };
        quote!(#arg: #ty)
    });
    let arrow = match &plan.ret {
        Type::Void => quote!(),
        ret => {
            let ret = names::host_type_tokens(ret);
            quote!(-> #ret)
        }
    };
    quote! {
        extern "C" {
            fn #name(#(#params),*) #arrow;
        }
    }
}

fn unpacker(analysis: &Analysis, plan: &FunctionPlan, libname: &str) -> TokenStream {
    let lib = analysis.lib;
    let unpack = names::unpack_fn(libname, &plan.name);
    let erased = names::type_erased_unpack_fn(libname, &plan.name);
    let record = names::packed_args_struct(libname, &plan.name);

    let mut prologue = TokenStream::new();
    let mut epilogue = TokenStream::new();
    let mut call_args = Vec::new();

    for (idx, p) in plan.params.iter().enumerate() {
        let arg = names::arg(idx);
        match p.strategy {
            ParamStrategy::Direct | ParamStrategy::WidthCast => {
                let ty = names::host_type_tokens(&p.ty);
                let expr = from_guest_expr(lib, analysis, &p.ty, quote!(args.#arg));
                prologue.extend(quote!(let #arg: #ty = #expr;));
                call_args.push(quote!(#arg));
            }
            ParamStrategy::AggregateIdentical => {
                let ty = names::host_type_tokens(&p.ty);
                prologue.extend(quote!(let #arg: #ty = args.#arg;));
                call_args.push(quote!(#arg));
            }
            ParamStrategy::AggregateRepack => {
                let ty = names::host_type_tokens(&p.ty);
                prologue.extend(quote! {
                    let #arg: #ty = GuestTransfer::from_guest(args.#arg);
                });
                call_args.push(quote!(#arg));
            }
            ParamStrategy::PointerDirect => {
                let ty = names::host_type_tokens(&p.ty);
                prologue.extend(quote!(let #arg: #ty = args.#arg.as_host_ptr();));
                call_args.push(quote!(#arg));
            }
            ParamStrategy::PointerRepack => {
                let Type::Pointer(pointee) = &p.ty else { unreachable!() };
                let host_pointee = names::host_type_tokens(pointee);
                let guest_pointee = slot_tokens(lib, analysis, pointee);
                let guest_ptr = format_ident!("{}_guest", arg);
                let host_val = format_ident!("{}_host", arg);
                let from = from_guest_expr(lib, analysis, pointee, quote!((*#guest_ptr)));
                let back = to_guest_expr(lib, analysis, pointee, quote!(#host_val));
                prologue.extend(quote! {
                    let #guest_ptr: *mut #guest_pointee = args.#arg.cast::<#guest_pointee>().as_host_ptr();
                    let mut #host_val: #host_pointee = if #guest_ptr.is_null() {
                        core::mem::zeroed()
                    } else {
                        #from
                    };
                    let #arg: *mut #host_pointee = if #guest_ptr.is_null() {
                        core::ptr::null_mut()
                    } else {
                        &mut #host_val
                    };
                });
                epilogue.extend(quote! {
                    if !#guest_ptr.is_null() {
                        *#guest_ptr = #back;
                    }
                });
                call_args.push(quote!(#arg));
            }
            ParamStrategy::Passthrough => {
                if plan.custom_host_impl {
                    call_args.push(quote!(args.#arg));
                } else {
                    // The native symbol takes the real pointer type; only the
                    // address crosses, the pointee is the guest's business.
                    let ty = names::host_type_tokens(&p.ty);
                    prologue.extend(quote!(let #arg: #ty = args.#arg.as_host_ptr();));
                    call_args.push(quote!(#arg));
                }
            }
            ParamStrategy::Callback(index) => {
                let Type::FunctionPointer(sig) = &p.ty else { unreachable!() };
                let fn_ty = names::fn_ptr_tokens(sig);
                let packer = names::guestcall_packer(index);
                prologue.extend(quote! {
                    FinalizeHostTrampolineForGuestFunction(
                        args.#arg,
                        #packer as usize as *const c_void,
                    );
                    let #arg: #fn_ty = core::mem::transmute(args.#arg.addr() as usize);
                });
                call_args.push(quote!(#arg));
            }
        }
    }

    let callee = if plan.custom_host_impl {
        let name = names::impl_fn(libname, &plan.name);
        quote!(#name)
    } else {
        let cell = names::ldr_ptr(libname, &plan.name);
        quote!((#cell.get()))
    };

    let call = match plan.ret_strategy {
        RetStrategy::Void => quote! {
            #callee(#(#call_args),*);
        },
        RetStrategy::GuestFunctionPointer => quote! {
            let rv = #callee(#(#call_args),*);
            args.rv = GuestPtr::from_addr(rv as usize as u64);
        },
        _ => {
            let back = to_guest_expr(lib, analysis, &plan.ret, quote!(rv));
            let store = match plan.ret_strategy {
                RetStrategy::AggregateIdentical => quote!(args.rv = rv;),
                _ => quote!(args.rv = #back;),
            };
            quote! {
                let rv = #callee(#(#call_args),*);
                #store
            }
        }
    };

    quote! {
        pub unsafe extern "C" fn #unpack(args: *mut #record) {
            let args = &mut *args;
            #prologue
            #call
            #epilogue
        }

        unsafe extern "C" fn #erased(argsv: *mut c_void) {
            #unpack(argsv.cast());
        }
    }
}

/// Host packer for one callback signature: the native-ABI entry point an
/// emulator trampoline jumps to when the native library invokes a guest
/// function pointer. Reading the hidden register must stay the first
/// statement.
fn guestcall_packer(analysis: &Analysis, callback: &CallbackPlan) -> TokenStream {
    let lib = analysis.lib;
    let name = names::guestcall_packer(callback.index);
    let sig = &callback.signature;

    let params = sig.params.iter().enumerate().map(|(idx, ty)| {
        let arg = names::arg(idx);
        let tok = names::host_type_tokens(ty);
        quote!(#arg: #tok)
    });
    let arrow = match &sig.ret {
        Type::Void => quote!(),
        ret => {
            let tok = names::host_type_tokens(ret);
            quote!(-> #tok)
        }
    };

    let mut fields = TokenStream::new();
    if sig.ret != Type::Void {
        let rv = slot_tokens(lib, analysis, &sig.ret);
        fields.extend(quote!(rv: #rv,));
    }
    for (idx, ty) in sig.params.iter().enumerate() {
        let arg = names::arg(idx);
        let tok = slot_tokens(lib, analysis, ty);
        fields.extend(quote!(#arg: #tok,));
    }

    let stores = sig.params.iter().enumerate().map(|(idx, ty)| {
        let arg = names::arg(idx);
        let expr = to_guest_expr(lib, analysis, ty, quote!(#arg));
        quote!(packed.#arg = #expr;)
    });

    let ret = match &sig.ret {
        Type::Void => quote!(),
        ret => from_guest_expr(lib, analysis, ret, quote!(packed.rv)),
    };

    quote! {
        pub unsafe extern "C" fn #name(#(#params),*) #arrow {
            let guestcall = thunkgen_runtime::guestcall_info();
            #[repr(C)]
            struct Packed {
                #fields
            }
            let mut packed: Packed = core::mem::zeroed();
            #(#stores)*
            ((*guestcall).call_callback)(
                (*guestcall).guest_unpacker,
                (*guestcall).guest_target,
                &mut packed as *mut Packed as *mut c_void,
            );
            #ret
        }
    }
}

/// Dedicated unpacker for a callback signature the generic wrapper cannot
/// handle: per-parameter projection decided here, at generation time.
fn callback_unpacker(analysis: &Analysis, callback: &CallbackPlan) -> TokenStream {
    let lib = analysis.lib;
    let name = names::callback_unpack_fn(callback.index);
    let sig = &callback.signature;

    let mut fields = TokenStream::new();
    if sig.ret != Type::Void {
        let rv = slot_tokens(lib, analysis, &sig.ret);
        fields.extend(quote!(rv: #rv,));
    }
    for (idx, ty) in sig.params.iter().enumerate() {
        let arg = names::arg(idx);
        let tok = slot_tokens(lib, analysis, ty);
        fields.extend(quote!(#arg: #tok,));
    }
    fields.extend(quote!(cb: GuestPtr<c_void>,));

    let mut target_params = Vec::new();
    let mut target_args = Vec::new();
    for (idx, ty) in sig.params.iter().enumerate() {
        let arg = names::arg(idx);
        let config = callback.params.get(&idx).copied().unwrap_or_default();
        if config.ptr_passthrough {
            let tok = slot_tokens(lib, analysis, ty);
            target_params.push(quote!(#tok));
            target_args.push(quote!(args.#arg));
        } else if config.assume_compatible {
            let tok = names::host_type_tokens(ty);
            target_params.push(quote!(#tok));
            target_args.push(quote!(args.#arg.as_host_ptr()));
        } else {
            let tok = names::host_type_tokens(ty);
            let expr = from_guest_expr(lib, analysis, ty, quote!(args.#arg));
            target_params.push(quote!(#tok));
            target_args.push(expr);
        }
    }

    let (target_ty, call) = match &sig.ret {
        Type::Void => (
            quote!(unsafe extern "C" fn(#(#target_params),*)),
            quote! {
                target(#(#target_args),*);
            },
        ),
        ret => {
            let ret_tok = names::host_type_tokens(ret);
            let back = to_guest_expr(lib, analysis, ret, quote!(rv));
            (
                quote!(unsafe extern "C" fn(#(#target_params),*) -> #ret_tok),
                quote! {
                    let rv = target(#(#target_args),*);
                    args.rv = #back;
                },
            )
        }
    };

    quote! {
        pub unsafe extern "C" fn #name(argsv: *mut c_void) {
            #[repr(C)]
            struct Packed {
                #fields
            }
            let args = &mut *argsv.cast::<Packed>();
            let target: #target_ty = core::mem::transmute(args.cb.addr() as usize);
            #call
        }
    }
}

fn exports_table(analysis: &Analysis, libname: &str) -> TokenStream {
    let mut digests = TokenStream::new();
    let mut entries = Vec::new();

    for plan in &analysis.functions {
        let digest = names::digest_tokens(&plan.digest);
        let digest_name = format_ident!("fexfn_digest_{}_{}", libname, plan.name);
        let erased = names::type_erased_unpack_fn(libname, &plan.name);
        digests.extend(quote! {
            static #digest_name: [u8; 32] = #digest;
        });
        entries.push(quote! {
            ExportEntry { sha256: Some(&#digest_name), invoke: Some(#erased) }
        });
    }

    for callback in &analysis.callbacks {
        let digest = names::digest_tokens(&callback.digest);
        let digest_name = format_ident!("fexfn_digest_callback_{}", callback.index);
        digests.extend(quote! {
            static #digest_name: [u8; 32] = #digest;
        });
        let invoke = if callback.use_generic_wrapper {
            let sig = names::fn_ptr_tokens(&callback.signature);
            quote!(GuestWrapperForHostFunction::<#sig>::call)
        } else {
            let unpack = names::callback_unpack_fn(callback.index);
            quote!(#unpack)
        };
        entries.push(quote! {
            ExportEntry { sha256: Some(&#digest_name), invoke: Some(#invoke) }
        });
    }

    entries.push(quote! {
        ExportEntry { sha256: None, invoke: None }
    });
    let count = Literal::usize_unsuffixed(entries.len());

    quote! {
        #digests

        static exports: [ExportEntry; #count] = [
            #(#entries,)*
        ];
    }
}

fn loader(lib: &Library, analysis: &Analysis, libname: &str) -> TokenStream {
    let handle = names::lib_handle(libname);
    let init = names::init_fn(libname);
    let accessor = names::exports_fn(libname);
    let filename = lib.so_filename();

    let resolutions = analysis.functions.iter().filter(|p| !p.custom_host_impl).map(|plan| {
        let cell = names::ldr_ptr(libname, &plan.name);
        let symbol = &plan.name;
        quote! {
            #cell.resolve(&lib, #symbol)?;
        }
    });

    quote! {
        static #handle: LibraryHandle = LibraryHandle::new();

        #[no_mangle]
        pub unsafe extern "C" fn #init() -> bool {
            #handle.init(|| unsafe {
                let lib = open_host_library(#filename)?;
                #(#resolutions)*
                Ok(lib)
            })
        }

        #[no_mangle]
        pub unsafe extern "C" fn #accessor() -> *const ExportEntry {
            if !#init() {
                return core::ptr::null();
            }
            exports.as_ptr()
        }
    }
}
