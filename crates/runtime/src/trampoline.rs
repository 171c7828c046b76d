//! The host-to-guest callback protocol.
//!
//! When a native library invokes a guest-supplied function pointer it really
//! calls a trampoline the emulator allocated for that guest address. The
//! trampoline has the *exact* native signature of the original pointer, so
//! there is no parameter left to carry context; instead the emulator seeds a
//! [`GuestcallInfo`] pointer into a reserved register (`r11` on x86-64,
//! `x11` on AArch64) right before entering the host packer. The packer reads
//! it with [`guestcall_info`], packs its native arguments into a
//! packed-argument record on the stack, and re-enters guest context through
//! `call_callback`.
//!
//! The two emulator primitives below are optional symbols: a thunk library
//! without callbacks must load fine under an emulator build that does not
//! provide them, so they are resolved lazily from the default namespace and
//! every callback path checks for their absence.

use std::ffi::c_void;

use cfg_if::cfg_if;
use once_cell::sync::OnceCell;

/// Re-enters guest context at `guest_unpacker(guest_target, argsrv)`.
pub type CallCallbackFn = unsafe extern "C" fn(guest_unpacker: u64, guest_target: u64, argsrv: *mut c_void);

/// Descriptor for one guest callback, seeded into the hidden register by the
/// emulator before the host packer runs. Owned by the emulator's trampoline
/// table; generated code only ever reads it.
#[repr(C)]
pub struct GuestcallInfo {
    pub host_packer: u64,
    pub call_callback: CallCallbackFn,
    pub guest_unpacker: u64,
    pub guest_target: u64,
}

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Reads the [`GuestcallInfo`] pointer from the hidden register.
        ///
        /// # Safety
        ///
        /// Must be the first statement of a host packer entered through an
        /// emulator trampoline; anywhere else the register holds garbage.
        #[inline(always)]
        pub unsafe fn guestcall_info() -> *const GuestcallInfo {
            let ptr: *const GuestcallInfo;
            core::arch::asm!("mov {}, r11", out(reg) ptr, options(nostack, nomem, preserves_flags));
            ptr
        }
    } else if #[cfg(target_arch = "aarch64")] {
        /// Reads the [`GuestcallInfo`] pointer from the hidden register.
        ///
        /// # Safety
        ///
        /// Must be the first statement of a host packer entered through an
        /// emulator trampoline; anywhere else the register holds garbage.
        #[inline(always)]
        pub unsafe fn guestcall_info() -> *const GuestcallInfo {
            let ptr: *const GuestcallInfo;
            core::arch::asm!("mov {}, x11", out(reg) ptr, options(nostack, nomem, preserves_flags));
            ptr
        }
    } else {
        compile_error!("no hidden-register convention defined for this architecture; \
                        see the trampoline module docs for what a port must provide");
    }
}

type MakeHostTrampolineFn =
    unsafe extern "C" fn(host_packer: *const c_void, guest_target: u64, guest_unpacker: u64) -> *mut c_void;
type FinalizeHostTrampolineFn =
    unsafe extern "C" fn(trampoline: *mut c_void, host_packer: *const c_void) -> *mut c_void;

static MAKE_HOST_TRAMPOLINE: OnceCell<Option<MakeHostTrampolineFn>> = OnceCell::new();
static FINALIZE_HOST_TRAMPOLINE: OnceCell<Option<FinalizeHostTrampolineFn>> = OnceCell::new();

fn emulator_symbol(name: &str) -> Option<*mut c_void> {
    let this = libloading::os::unix::Library::this();
    unsafe { this.get::<*mut c_void>(name.as_bytes()) }
        .ok()
        .map(|sym| *sym)
        .filter(|addr| !addr.is_null())
}

/// Allocates (or reuses) the host trampoline for `guest_target`. The
/// trampoline outlives all callers; it is released only at process teardown.
///
/// Returns null when the emulator does not provide the primitive.
///
/// # Safety
///
/// `host_packer` must be a packer for the signature `guest_target` expects.
pub unsafe fn make_host_trampoline(
    host_packer: *const c_void,
    guest_target: u64,
    guest_unpacker: u64,
) -> *mut c_void {
    let resolved = MAKE_HOST_TRAMPOLINE.get_or_init(|| {
        emulator_symbol("MakeHostTrampolineForGuestFunction")
            .map(|addr| core::mem::transmute::<*mut c_void, MakeHostTrampolineFn>(addr))
    });
    match resolved {
        Some(make) => make(host_packer, guest_target, guest_unpacker),
        None => {
            log::warn!("emulator provides no MakeHostTrampolineForGuestFunction; callback dropped");
            core::ptr::null_mut()
        }
    }
}

/// Attaches `host_packer` to a trampoline the guest pre-allocated for one of
/// its function pointers.
///
/// # Safety
///
/// `trampoline` must be a trampoline address received from the guest and
/// `host_packer` a packer for the matching signature.
pub unsafe fn finalize_host_trampoline(trampoline: u64, host_packer: *const c_void) {
    let resolved = FINALIZE_HOST_TRAMPOLINE.get_or_init(|| {
        emulator_symbol("FinalizeHostTrampolineForGuestFunction")
            .map(|addr| core::mem::transmute::<*mut c_void, FinalizeHostTrampolineFn>(addr))
    });
    match resolved {
        Some(finalize) => {
            finalize(trampoline as usize as *mut c_void, host_packer);
        }
        None => {
            log::warn!("emulator provides no FinalizeHostTrampolineForGuestFunction; callback dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guestcall_info_layout() {
        assert_eq!(core::mem::offset_of!(GuestcallInfo, host_packer), 0);
        assert_eq!(core::mem::offset_of!(GuestcallInfo, call_callback), 8);
        assert_eq!(core::mem::offset_of!(GuestcallInfo, guest_unpacker), 16);
        assert_eq!(core::mem::offset_of!(GuestcallInfo, guest_target), 24);
    }

    #[test]
    fn absent_primitives_degrade_gracefully() {
        // The test binary is not an emulator, so neither primitive resolves;
        // the callback paths must turn into no-ops instead of crashing.
        unsafe {
            let t = make_host_trampoline(core::ptr::null(), 0x1000, 0x2000);
            assert!(t.is_null());
            finalize_host_trampoline(0x1000, core::ptr::null());
        }
    }
}
