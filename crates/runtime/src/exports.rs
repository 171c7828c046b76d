//! The export table a host thunk module hands to the emulator.

use core::ffi::c_void;

/// One entry of a host module's `exports` array.
///
/// The emulator binds guest call sites to host unpackers by comparing the
/// 32-byte digest; symbol names never cross the boundary. The array is
/// terminated by an entry with both fields null.
#[repr(C)]
pub struct ExportEntry {
    /// Digest of the fully qualified export signature, computed at
    /// generation time.
    pub sha256: Option<&'static [u8; 32]>,
    /// Type-erased unpacker for the export.
    pub invoke: Option<unsafe extern "C" fn(*mut c_void)>,
}

impl ExportEntry {
    /// The all-null sentinel closing an `exports` array.
    pub const TERMINATOR: ExportEntry = ExportEntry { sha256: None, invoke: None };

    pub fn is_terminator(&self) -> bool {
        self.sha256.is_none() && self.invoke.is_none()
    }
}
