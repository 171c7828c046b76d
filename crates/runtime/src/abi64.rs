//! Layout wrappers for 64-bit x86 guests.
//!
//! A 64-bit guest and the 64-bit host agree on every scalar width and
//! alignment, so `GuestScalar` is a transparent wrapper and pointers travel
//! as their full 64-bit bit pattern. The wrappers still exist as distinct
//! types so that generated code cannot accidentally mix a guest image with a
//! host value.

use core::ffi::c_void;
use core::marker::PhantomData;

/// A scalar value as laid out in guest memory.
#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct GuestScalar<T: Copy>(T);

impl<T: Copy> GuestScalar<T> {
    pub fn new(value: T) -> Self {
        GuestScalar(value)
    }

    pub fn get(self) -> T {
        self.0
    }
}

/// The guest-visible address bit pattern of a `T*`.
pub struct GuestPtr<T> {
    addr: u64,
    _pointee: PhantomData<*mut T>,
}

impl<T> Copy for GuestPtr<T> {}
impl<T> Clone for GuestPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> GuestPtr<T> {
    pub fn from_addr(addr: u64) -> Self {
        GuestPtr { addr, _pointee: PhantomData }
    }

    pub fn from_host_ptr(ptr: *mut T) -> Self {
        Self::from_addr(ptr as usize as u64)
    }

    pub fn null() -> Self {
        Self::from_addr(0)
    }

    pub fn addr(self) -> u64 {
        self.addr
    }

    pub fn is_null(self) -> bool {
        self.addr == 0
    }

    /// Reinterprets the guest address as a host pointer. The pointee is
    /// whatever the guest put there; callers decide whether that image needs
    /// conversion before use.
    pub fn as_host_ptr(self) -> *mut T {
        self.addr as usize as *mut T
    }

    pub fn cast<U>(self) -> GuestPtr<U> {
        GuestPtr::from_addr(self.addr)
    }
}

/// Conversion between the host image and the guest image of a value.
///
/// This module implements it for scalars and pointers; generated host
/// modules add one impl per aggregate whose layout conversion is defined.
/// The absence of an impl is what makes an incompatible aggregate unusable
/// across the boundary.
pub trait GuestTransfer: Sized {
    type GuestRepr: Copy;

    fn to_guest(self) -> Self::GuestRepr;
    fn from_guest(repr: Self::GuestRepr) -> Self;
}

macro_rules! identity_scalars {
    ($($t:ty),* $(,)?) => {$(
        impl GuestTransfer for $t {
            type GuestRepr = GuestScalar<$t>;

            fn to_guest(self) -> GuestScalar<$t> {
                GuestScalar::new(self)
            }

            fn from_guest(repr: GuestScalar<$t>) -> $t {
                repr.get()
            }
        }
    )*};
}

identity_scalars!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64, usize, isize);

impl GuestTransfer for () {
    type GuestRepr = ();

    fn to_guest(self) -> Self::GuestRepr {}
    fn from_guest(_repr: Self::GuestRepr) -> Self {}
}

impl<T> GuestTransfer for *mut T {
    type GuestRepr = GuestPtr<T>;

    fn to_guest(self) -> GuestPtr<T> {
        GuestPtr::from_host_ptr(self)
    }

    fn from_guest(repr: GuestPtr<T>) -> Self {
        repr.as_host_ptr()
    }
}

impl<T> GuestTransfer for *const T {
    type GuestRepr = GuestPtr<T>;

    fn to_guest(self) -> GuestPtr<T> {
        GuestPtr::from_host_ptr(self as *mut T)
    }

    fn from_guest(repr: GuestPtr<T>) -> Self {
        repr.as_host_ptr() as *const T
    }
}

/// A callback signature whose packed-argument record can be unpacked by the
/// generic wrapper below. Implemented for `unsafe extern "C" fn` pointer
/// types of every sanctioned arity.
pub trait GuestCallSignature {
    /// # Safety
    ///
    /// `argsv` must point at a live packed-argument record for this
    /// signature, with the trailing slot holding a callable host address.
    unsafe fn unpack_and_call(argsv: *mut c_void);
}

/// Host-side unpacker for guest calls through a host function pointer.
///
/// One export-table entry per distinct callback signature references
/// `GuestWrapperForHostFunction::<S>::call`; signatures that need
/// per-parameter projection get a dedicated generated unpacker instead.
pub struct GuestWrapperForHostFunction<S>(PhantomData<S>);

impl<S: GuestCallSignature> GuestWrapperForHostFunction<S> {
    /// # Safety
    ///
    /// See [`GuestCallSignature::unpack_and_call`].
    pub unsafe extern "C" fn call(argsv: *mut c_void) {
        S::unpack_and_call(argsv)
    }
}

define_packed_arguments_table!();

/// Attaches the per-signature host packer to a trampoline the guest
/// allocated for one of its function pointers. Must run before the pointer
/// is forwarded to the native library.
///
/// # Safety
///
/// `trampoline` must carry a trampoline address produced by the guest-side
/// allocation primitive, and `host_packer` must be the packer emitted for
/// exactly the signature `F`.
#[allow(non_snake_case)]
pub unsafe fn FinalizeHostTrampolineForGuestFunction<F>(
    trampoline: GuestPtr<F>,
    host_packer: *const c_void,
) {
    crate::trampoline::finalize_host_trampoline(trampoline.addr(), host_packer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let g = 0x1122_3344_5566_7788u64.to_guest();
        assert_eq!(u64::from_guest(g), 0x1122_3344_5566_7788);
        assert_eq!(core::mem::size_of::<GuestScalar<u64>>(), 8);
        assert_eq!(core::mem::align_of::<GuestScalar<u64>>(), 8);
    }

    #[test]
    fn pointer_roundtrip() {
        let mut value = 7i32;
        let p: *mut i32 = &mut value;
        let g = p.to_guest();
        assert_eq!(g.addr(), p as usize as u64);
        assert_eq!(<*mut i32>::from_guest(g), p);
        assert!(GuestPtr::<i32>::null().is_null());
    }

    #[test]
    fn packed_record_layout() {
        // Return slot first, then arguments, then the callback-target slot.
        type Rec = PackedArguments2<i32, i64, u8>;
        assert_eq!(core::mem::offset_of!(Rec, rv), 0);
        assert_eq!(core::mem::offset_of!(Rec, a_0), 8);
        assert_eq!(core::mem::offset_of!(Rec, a_1), 16);
        assert_eq!(core::mem::offset_of!(Rec, cb), 24);
    }

    #[test]
    fn wrapper_invokes_target() {
        unsafe extern "C" fn add(a: i32, b: i32) -> i32 {
            a + b
        }

        let mut record = PackedArguments2::<i32, i32, i32> {
            rv: GuestScalar::new(0),
            a_0: GuestScalar::new(30),
            a_1: GuestScalar::new(12),
            cb: GuestPtr::from_addr(add as usize as u64),
        };
        unsafe {
            GuestWrapperForHostFunction::<unsafe extern "C" fn(i32, i32) -> i32>::call(
                &mut record as *mut _ as *mut c_void,
            );
        }
        assert_eq!(record.rv.get(), 42);
    }
}
