//! Guest-side primitives used by generated guest modules.
//!
//! The actual control transfer out of the guest is a single scalar hypercall
//! whose encoding belongs to the emulator; the guest module only ever sees
//! the two externs below, both provided by the emulator's guest runtime.

use core::ffi::c_void;

extern "C" {
    /// Transfers control to the host half of the thunk library. The emulator
    /// matches `sha256` against the host module's export table and invokes
    /// the bound unpacker with `args`.
    pub fn thunkgen_guest_hypercall(sha256: *const u8, args: *mut c_void);

    /// Wraps a guest function pointer in a host-callable trampoline before
    /// it crosses the boundary, returning the trampoline's guest-visible
    /// address.
    #[allow(non_snake_case)]
    pub fn AllocateHostTrampolineForGuestFunction(guest_fn: u64) -> u64;
}

/// Issues the hypercall for one packed-argument record.
///
/// # Safety
///
/// `args` must point at the packed record for the export identified by
/// `sha256`, and the calling thread must be a guest thread.
pub unsafe fn hypercall(sha256: &[u8; 32], args: *mut c_void) {
    thunkgen_guest_hypercall(sha256.as_ptr(), args);
}

/// Marker implemented by `make_callback_thunk!` registrations. The guest
/// runtime walks these to register one trampoline class per distinct
/// function-pointer signature appearing in the library's interface.
pub trait CallbackThunk {
    type Signature;
    const DIGEST: [u8; 32];
}

/// Defines the guest-to-host transition point for one thunked function:
/// an `extern "C"` symbol that forwards its packed-argument record through
/// the hypercall, tagged with the export digest computed at generation time.
#[macro_export]
macro_rules! make_thunk {
    ($name:ident, $digest:expr) => {
        #[no_mangle]
        pub unsafe extern "C" fn $name(args: *mut ::core::ffi::c_void) {
            static DIGEST: [u8; 32] = $digest;
            $crate::guest::hypercall(&DIGEST, args);
        }
    };
}

/// Registers a trampoline class for one function-pointer signature, so the
/// guest runtime can route calls through host function pointers of that
/// signature back across the boundary.
#[macro_export]
macro_rules! make_callback_thunk {
    ($name:ident, $sig:ty, $digest:expr) => {
        #[allow(non_camel_case_types)]
        pub struct $name;

        impl $crate::guest::CallbackThunk for $name {
            type Signature = $sig;
            const DIGEST: [u8; 32] = $digest;
        }
    };
}
