//! Lazy loading of the real native library behind a host thunk module.
//!
//! Initialization is a one-shot latch: the first caller of
//! `fexthunks_exports_<lib>` drives `Unloaded -> Loading -> Ready | Failed`,
//! and both terminal states stick for the process lifetime. Subsequent
//! callers take a lock-free fast path.

use std::ffi::c_void;

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_LAZY};
use once_cell::sync::OnceCell;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open host library `{name}`: {source}")]
    Open {
        name: String,
        #[source]
        source: libloading::Error,
    },
    #[error("symbol `{0}` is missing from the host library")]
    MissingSymbol(String),
}

/// Opens the real native library in the global symbol namespace, mirroring
/// how such libraries are linked in a non-emulated process (GL and Vulkan
/// loaders expect their symbols to be globally visible).
pub fn open_host_library(filename: &str) -> Result<Library, LoadError> {
    unsafe { Library::open(Some(filename), RTLD_GLOBAL | RTLD_LAZY) }.map_err(|source| {
        LoadError::Open { name: filename.to_string(), source }
    })
}

/// Resolves `symbol` through the process default namespace.
///
/// The `_handle` parameter is deliberately ignored: lookups must follow
/// symbol interposition rules so that an `LD_PRELOAD`ed definition wins over
/// the one in the freshly opened library.
///
/// # Safety
///
/// The returned address is only as valid as the libraries it came from.
pub unsafe fn dlsym_default(_handle: &Library, symbol: &str) -> Result<*mut c_void, LoadError> {
    let this = Library::this();
    let addr = this
        .get::<*mut c_void>(symbol.as_bytes())
        .map(|sym| *sym)
        .map_err(|_| LoadError::MissingSymbol(symbol.to_string()))?;
    if addr.is_null() {
        return Err(LoadError::MissingSymbol(symbol.to_string()));
    }
    Ok(addr)
}

/// Storage for one resolved symbol of the real library.
///
/// Generated host modules declare one `SymbolCell` static per thunked
/// function (`fexldr_ptr_<lib>_<name>`); the loader fills them all before
/// the library is marked ready, so unpackers may read them unconditionally.
pub struct SymbolCell<F: Copy> {
    cell: OnceCell<F>,
}

impl<F: Copy> SymbolCell<F> {
    pub const fn new() -> Self {
        SymbolCell { cell: OnceCell::new() }
    }

    /// Resolves `symbol` and stores it as an `F`.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type matching the real
    /// symbol's signature.
    pub unsafe fn resolve(&self, handle: &Library, symbol: &str) -> Result<(), LoadError> {
        let addr = dlsym_default(handle, symbol)?;
        let f = core::mem::transmute_copy::<*mut c_void, F>(&addr);
        let _ = self.cell.set(f);
        Ok(())
    }

    /// Returns the resolved function.
    ///
    /// Unpackers are only reachable once `fexldr_init_<lib>` has resolved
    /// every symbol, so an empty cell here is a generator bug.
    pub fn get(&self) -> F {
        *self.cell.get().expect("symbol resolved during library initialization")
    }
}

/// The per-library initialization latch.
pub struct LibraryHandle {
    state: OnceCell<Option<Library>>,
}

impl LibraryHandle {
    pub const fn new() -> Self {
        LibraryHandle { state: OnceCell::new() }
    }

    /// Runs `load` exactly once; concurrent first callers serialize on the
    /// latch and every later call is a plain read. Returns whether the
    /// library is ready. A failed load is terminal: `load` never runs again
    /// and all subsequent calls return `false`.
    pub fn init<F>(&self, load: F) -> bool
    where
        F: FnOnce() -> Result<Library, LoadError>,
    {
        self.state
            .get_or_init(|| match load() {
                Ok(lib) => Some(lib),
                Err(err) => {
                    log::error!("thunk library initialization failed: {err}");
                    None
                }
            })
            .is_some()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state.get(), Some(Some(_)))
    }
}

/// Registers `$init` to run when the host module is `dlopen`ed, for
/// libraries that need setup before their first call.
#[macro_export]
macro_rules! load_lib_init {
    ($init:path) => {
        #[used]
        #[link_section = ".init_array"]
        static __THUNKGEN_LIB_CTOR: unsafe extern "C" fn() = {
            unsafe extern "C" fn __thunkgen_ctor() {
                $init();
            }
            __thunkgen_ctor
        };
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_load_is_terminal() {
        let handle = LibraryHandle::new();
        let mut attempts = 0;
        for _ in 0..3 {
            let ready = handle.init(|| {
                attempts += 1;
                open_host_library("libthunkgen-does-not-exist.so")
            });
            assert!(!ready);
        }
        assert_eq!(attempts, 1);
        assert!(!handle.is_ready());
    }

    #[test]
    fn default_namespace_lookup_finds_process_symbols() {
        // The loader ignores its handle, so any library works as one. libc
        // symbols are visible through the default namespace in every test
        // environment.
        let this = Library::this();
        let addr = unsafe { dlsym_default(&this, "strlen") }.unwrap();
        assert!(!addr.is_null());

        let missing = unsafe { dlsym_default(&this, "thunkgen_no_such_symbol") };
        assert!(matches!(missing, Err(LoadError::MissingSymbol(_))));
    }

    #[test]
    fn symbol_cell_resolves_and_calls() {
        let this = Library::this();
        let cell: SymbolCell<unsafe extern "C" fn(*const core::ffi::c_char) -> usize> =
            SymbolCell::new();
        unsafe {
            cell.resolve(&this, "strlen").unwrap();
            assert_eq!(cell.get()(c"four".as_ptr()), 4);
        }
    }
}
