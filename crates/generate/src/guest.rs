//! Emits the guest thunk module.
//!
//! The guest module is compiled *for the guest target*, so it declares types
//! exactly as the guest translation unit sees them and its packed-argument
//! records use plain C types: the guest compiler produces the guest layout
//! by construction. What the module contains per function:
//!
//! * the hypercall binding (`make_thunk!` with the export digest inline),
//! * the internal packer `fexfn_pack_<name>` building the record on the
//!   stack and issuing the hypercall,
//! * a public symbol with the original C signature forwarding to the packer
//!   (except for variadics, which Rust cannot define; those get only the
//!   `_internal` packer and a one-line C shim in the guest build),
//! * one `make_callback_thunk!` marker per distinct function-pointer
//!   signature in the interface.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::abi::{GuestAbi, LayoutSide};
use crate::compat::{Analysis, ParamStrategy, RetStrategy};
use crate::interface::{Library, Type};
use crate::names;

pub fn generate_guest(lib: &Library, analysis: &Analysis) -> TokenStream {
    let libname = lib.sanitized_name();

    let mut out = quote! {
        #![allow(non_camel_case_types, non_snake_case, non_upper_case_globals)]
        #![allow(dead_code, unused_imports, clippy::missing_safety_doc)]

        use core::ffi::*;
        use thunkgen_runtime::guest::AllocateHostTrampolineForGuestFunction;
    };

    out.extend(type_declarations(lib));

    for plan in &analysis.functions {
        let thunk = names::thunk_fn(&libname, &plan.name);
        let digest = names::digest_tokens(&plan.digest);
        out.extend(quote! {
            thunkgen_runtime::make_thunk!(#thunk, #digest);
        });

        out.extend(packer(lib, analysis, plan, &libname));

        if !plan.variadic {
            out.extend(public_alias(plan));
        }
    }

    for callback in &analysis.callbacks {
        let marker = names::callback_marker(callback.index);
        let sig = names::fn_ptr_tokens(&callback.signature);
        let digest = names::digest_tokens(&callback.digest);
        out.extend(quote! {
            thunkgen_runtime::make_callback_thunk!(#marker, #sig, #digest);
        });
    }

    out
}

/// Guest-view declarations of every named type in the interface.
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
        let fields = def.guest_view().iter().map(|member| {
            let name = format_ident!("{}", member.name);
            let ty = member_decl_tokens(&member.ty);
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
        let underlying = names::scalar_tokens(def.guest_underlying.unwrap_or(def.underlying));
        out.extend(quote! {
            pub type #ident = #underlying;
        });
    }
    out
}

/// Struct members spell function pointers as `Option<..>` so that a zeroed
/// value is the C null pointer.
fn member_decl_tokens(ty: &Type) -> TokenStream {
    match ty {
        Type::FunctionPointer(sig) => {
            let f = names::fn_ptr_tokens(sig);
            quote!(Option<#f>)
        }
        other => names::host_type_tokens(other),
    }
}

fn ret_arrow(ty: &Type) -> TokenStream {
    match ty {
        Type::Void => quote!(),
        other => {
            let tok = names::host_type_tokens(other);
            quote!(-> #tok)
        }
    }
}

/// The slot type inside the guest packer record. Function-pointer slots are
/// address-sized integers because they hold whatever trampoline address the
/// guest runtime handed back, and a zeroed record must stay valid.
fn guest_slot_tokens(ty: &Type) -> TokenStream {
    match ty {
        Type::FunctionPointer(_) => quote!(usize),
        other => names::host_type_tokens(other),
    }
}

fn packer(
    lib: &Library,
    analysis: &Analysis,
    plan: &crate::compat::FunctionPlan,
    libname: &str,
) -> TokenStream {
    let pack = names::pack_fn(&plan.name, plan.variadic);
    let thunk = names::thunk_fn(libname, &plan.name);
    let arrow = ret_arrow(&plan.ret);

    let params = plan.params.iter().enumerate().map(|(idx, p)| {
        let name = names::arg(idx);
        let ty = names::host_type_tokens(&p.ty);
        quote!(#name: #ty)
    });

    let mut record_fields = TokenStream::new();
    if plan.ret_strategy != RetStrategy::Void {
        let rv = guest_slot_tokens(&plan.ret);
        record_fields.extend(quote!(rv: #rv,));
    }
    for (idx, p) in plan.params.iter().enumerate() {
        let name = names::arg(idx);
        let ty = guest_slot_tokens(&p.ty);
        record_fields.extend(quote!(#name: #ty,));
    }

    let stores = plan.params.iter().enumerate().map(|(idx, p)| {
        let name = names::arg(idx);
        match p.strategy {
            // Guest function pointers get wrapped in a host-callable
            // trampoline before they cross the boundary.
            ParamStrategy::Callback(_) => quote! {
                args.#name = AllocateHostTrampolineForGuestFunction(#name as usize as u64) as usize;
            },
            _ => quote! {
                args.#name = #name;
            },
        }
    });

    let ret = match plan.ret_strategy {
        RetStrategy::Void => quote!(),
        RetStrategy::GuestFunctionPointer => {
            let ty = names::host_type_tokens(&plan.ret);
            quote!(core::mem::transmute::<usize, #ty>(args.rv))
        }
        _ => quote!(args.rv),
    };

    let offset_checks = guest_record_assertions(lib, analysis, plan);

    quote! {
        #[no_mangle]
        pub unsafe extern "C" fn #pack(#(#params),*) #arrow {
            #[repr(C)]
            struct PackedArgs {
                #record_fields
            }
            #offset_checks
            let mut args: PackedArgs = core::mem::zeroed();
            #(#stores)*
            #thunk(&mut args as *mut PackedArgs as *mut c_void);
            #ret
        }
    }
}

/// Offset assertions pinning the record to the layout the host side computes
/// from the guest ABI rules. They hold when this module is compiled for its
/// guest target, which is the only correct way to build it.
fn guest_record_assertions(
    lib: &Library,
    analysis: &Analysis,
    plan: &crate::compat::FunctionPlan,
) -> TokenStream {
    let Some(slots) = record_slot_layouts(lib, analysis.abi, plan) else {
        return quote!();
    };
    let mut checks = TokenStream::new();
    let mut names_in_order = Vec::new();
    if plan.ret_strategy != RetStrategy::Void {
        names_in_order.push(format_ident!("rv"));
    }
    for idx in 0..plan.params.len() {
        names_in_order.push(names::arg(idx));
    }
    let (offsets, size) = crate::abi::record_offsets(&slots);
    for (name, offset) in names_in_order.iter().zip(&offsets) {
        let offset = proc_macro2::Literal::u64_unsuffixed(*offset);
        checks.extend(quote! {
            assert!(core::mem::offset_of!(PackedArgs, #name) == #offset);
        });
    }
    let size = proc_macro2::Literal::u64_unsuffixed(size);
    checks.extend(quote! {
        assert!(core::mem::size_of::<PackedArgs>() == #size);
    });
    quote! {
        const _: () = {
            #checks
        };
    }
}

/// Guest sizes of the record's slots, or `None` when some slot has no
/// computable layout (only possible for passthrough-annotated opaque types,
/// whose slots are plain pointers anyway).
pub(crate) fn record_slot_layouts(
    lib: &Library,
    abi: GuestAbi,
    plan: &crate::compat::FunctionPlan,
) -> Option<Vec<crate::abi::SizeAlign>> {
    let mut slots = Vec::new();
    if plan.ret_strategy != RetStrategy::Void {
        slots.push(slot_layout(lib, abi, &plan.ret)?);
    }
    for p in &plan.params {
        slots.push(slot_layout(lib, abi, &p.ty)?);
    }
    Some(slots)
}

fn slot_layout(lib: &Library, abi: GuestAbi, ty: &Type) -> Option<crate::abi::SizeAlign> {
    match ty {
        // Pointer slots never need the pointee's layout.
        Type::Pointer(_) | Type::FunctionPointer(_) => Some(abi.pointer()),
        other => crate::abi::layout_of(lib, abi, LayoutSide::Guest, other).ok(),
    }
}

fn public_alias(plan: &crate::compat::FunctionPlan) -> TokenStream {
    let public = format_ident!("{}", plan.name);
    let pack = names::pack_fn(&plan.name, false);
    let arrow = ret_arrow(&plan.ret);

    let params: Vec<_> = plan
        .params
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            let name = names::arg(idx);
            let ty = names::host_type_tokens(&p.ty);
            quote!(#name: #ty)
        })
        .collect();
    let args = (0..plan.params.len()).map(names::arg);

    quote! {
        #[no_mangle]
        pub unsafe extern "C" fn #public(#(#params),*) #arrow {
            #pack(#(#args),*)
        }
    }
}
