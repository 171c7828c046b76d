//! Layout wrappers for 32-bit x86 guests.
//!
//! i386 aggregate rules cap member alignment at 4 bytes (8-byte scalars are
//! 4-aligned inside structs), so `GuestScalar` carries `packed(4)`. Pointers
//! are 4 bytes wide; the wrapper stores the 32-bit guest address and
//! zero-extends it on the way to the host.
//!
//! Scalars whose *width* differs between guest and host (`long`, `size_t`)
//! have no `GuestTransfer` impl here; the generator spells their slots with
//! fixed-width integers and emits the widening/narrowing conversions
//! explicitly.

use core::ffi::c_void;
use core::marker::PhantomData;

/// A scalar value as laid out in guest memory.
#[repr(C, packed(4))]
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

/// The guest-visible address bit pattern of a `T*`, 4 bytes wide.
pub struct GuestPtr<T> {
    addr: u32,
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
        debug_assert!(addr <= u32::MAX as u64, "address does not fit the guest pointer width");
        GuestPtr { addr: addr as u32, _pointee: PhantomData }
    }

    pub fn from_host_ptr(ptr: *mut T) -> Self {
        Self::from_addr(ptr as usize as u64)
    }

    pub fn null() -> Self {
        Self::from_addr(0)
    }

    pub fn addr(self) -> u64 {
        self.addr as u64
    }

    pub fn is_null(self) -> bool {
        self.addr == 0
    }

    /// Zero-extends the guest address into a host pointer. The pointee is
    /// whatever the guest put there; callers decide whether that image needs
    /// conversion before use.
    pub fn as_host_ptr(self) -> *mut T {
        self.addr as usize as *mut T
    }

    pub fn cast<U>(self) -> GuestPtr<U> {
        GuestPtr::from_addr(self.addr())
    }
}

/// Conversion between the host image and the guest image of a value.
///
/// See [`crate::abi64::GuestTransfer`]; the 32-bit flavor only covers the
/// scalars whose width matches across the boundary.
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

identity_scalars!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

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

/// See [`crate::abi64::GuestCallSignature`].
pub trait GuestCallSignature {
    /// # Safety
    ///
    /// `argsv` must point at a live packed-argument record for this
    /// signature, with the trailing slot holding a callable host address.
    unsafe fn unpack_and_call(argsv: *mut c_void);
}

/// See [`crate::abi64::GuestWrapperForHostFunction`].
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

/// See [`crate::abi64::FinalizeHostTrampolineForGuestFunction`].
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
