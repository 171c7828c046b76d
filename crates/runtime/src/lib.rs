//! Runtime support for generated thunk modules.
//!
//! A thunk library comes in two generated halves: a *guest* module linked
//! into the emulated binary, and a *host* module loaded by the emulator.
//! Both halves are emitted by `thunkgen-generate` and lean on this crate for
//! everything that is not specific to a single function signature:
//!
//! * the guest/host data layout wrappers and conversions ([`abi32`]/[`abi64`]),
//! * the packed-argument calling convention shared by both directions
//!   ([`packed`]),
//! * lazy loading of the real native library and symbol resolution
//!   ([`loader`]),
//! * the host-to-guest callback trampoline protocol ([`trampoline`]),
//! * the export table consumed by the emulator ([`exports`]).
//!
//! Nothing in here allocates per call: generated code keeps all per-call
//! state on the stack or inside the packed-argument record, so unpackers are
//! reentrant and may run on any number of guest threads at once.

#[macro_use]
mod macros;

pub mod abi32;
pub mod abi64;
pub mod exports;
pub mod guest;
pub mod loader;
pub mod packed;
pub mod trampoline;

pub use exports::ExportEntry;
pub use loader::{dlsym_default, open_host_library, LibraryHandle, LoadError, SymbolCell};
pub use trampoline::{guestcall_info, GuestcallInfo};
