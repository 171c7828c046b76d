//! Internal macros shared by the `abi32`/`abi64` module pair.

// Defines one generic packed-argument record plus the matching
// `GuestCallSignature` impl for a single arity. The record mirrors the wire
// format of a guest-to-host call through a function pointer: return slot
// first, then one slot per argument, then the trailing callback-target slot.
//
// Invoked inside each ABI module so that `GuestTransfer`, `GuestPtr` and
// `GuestCallSignature` resolve to that module's definitions.
macro_rules! packed_arguments_record {
    ($name:ident $(, $A:ident $a:ident)*) => {
        #[repr(C)]
        pub struct $name<R: GuestTransfer $(, $A: GuestTransfer)*> {
            pub rv: R::GuestRepr,
            $(pub $a: $A::GuestRepr,)*
            pub cb: GuestPtr<::core::ffi::c_void>,
        }

        impl<R: GuestTransfer $(, $A: GuestTransfer)*> GuestCallSignature
            for unsafe extern "C" fn($($A),*) -> R
        {
            unsafe fn unpack_and_call(argsv: *mut ::core::ffi::c_void) {
                let args = &mut *argsv.cast::<$name<R $(, $A)*>>();
                let target: unsafe extern "C" fn($($A),*) -> R =
                    ::core::mem::transmute(args.cb.addr() as usize);
                let rv = target($($A::from_guest(args.$a)),*);
                args.rv = R::to_guest(rv);
            }
        }
    };
}

// Instantiates the records for every sanctioned argument count; the list
// must stay in sync with `crate::packed::ALLOWED_ARITIES`.
macro_rules! define_packed_arguments_table {
    () => {
        packed_arguments_record!(PackedArguments0);
        packed_arguments_record!(PackedArguments1, A0 a_0);
        packed_arguments_record!(PackedArguments2, A0 a_0, A1 a_1);
        packed_arguments_record!(PackedArguments3, A0 a_0, A1 a_1, A2 a_2);
        packed_arguments_record!(PackedArguments4, A0 a_0, A1 a_1, A2 a_2, A3 a_3);
        packed_arguments_record!(PackedArguments5, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4);
        packed_arguments_record!(PackedArguments6, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5);
        packed_arguments_record!(PackedArguments7, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6);
        packed_arguments_record!(PackedArguments8, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7);
        packed_arguments_record!(PackedArguments9, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7, A8 a_8);
        packed_arguments_record!(PackedArguments10, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7, A8 a_8, A9 a_9);
        packed_arguments_record!(PackedArguments11, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7, A8 a_8, A9 a_9, A10 a_10);
        packed_arguments_record!(PackedArguments12, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7, A8 a_8, A9 a_9, A10 a_10, A11 a_11);
        packed_arguments_record!(PackedArguments13, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7, A8 a_8, A9 a_9, A10 a_10, A11 a_11, A12 a_12);
        packed_arguments_record!(PackedArguments14, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7, A8 a_8, A9 a_9, A10 a_10, A11 a_11, A12 a_12, A13 a_13);
        packed_arguments_record!(PackedArguments15, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7, A8 a_8, A9 a_9, A10 a_10, A11 a_11, A12 a_12, A13 a_13, A14 a_14);
        packed_arguments_record!(PackedArguments16, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7, A8 a_8, A9 a_9, A10 a_10, A11 a_11, A12 a_12, A13 a_13, A14 a_14, A15 a_15);
        packed_arguments_record!(PackedArguments17, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7, A8 a_8, A9 a_9, A10 a_10, A11 a_11, A12 a_12, A13 a_13, A14 a_14, A15 a_15, A16 a_16);
        packed_arguments_record!(PackedArguments18, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7, A8 a_8, A9 a_9, A10 a_10, A11 a_11, A12 a_12, A13 a_13, A14 a_14, A15 a_15, A16 a_16, A17 a_17);
        packed_arguments_record!(PackedArguments23, A0 a_0, A1 a_1, A2 a_2, A3 a_3, A4 a_4, A5 a_5, A6 a_6, A7 a_7, A8 a_8, A9 a_9, A10 a_10, A11 a_11, A12 a_12, A13 a_13, A14 a_14, A15 a_15, A16 a_16, A17 a_17, A18 a_18, A19 a_19, A20 a_20, A21 a_21, A22 a_22);
    };
}
