/*
 *  loader/resolver.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Symbol resolver - maps shared libraries and looks up exports
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use log::{debug, info};
use libloading::Library;

use crate::error::{ExtensionError, Result};
use super::bootstrap::ensure_runtime_initialized;
#[cfg(windows)]
use super::decoration::decorated_candidates;

/// An open shared library and the path it was opened from
///
/// Lookups borrow the handle and may run concurrently. `close` consumes it,
/// so it cannot happen twice and cannot overlap a borrowed lookup; raw
/// addresses already handed out are the caller's to stop using.
#[derive(Debug)]
pub struct LibraryHandle {
    library: Library,
    path: PathBuf,
}

impl LibraryHandle {
    /// Maps an extension library. The companion runtime is preloaded first
    /// so the extension's references to server symbols resolve.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        ensure_runtime_initialized();
        Self::open_unbootstrapped(path)
    }

    /// Maps a library without touching the companion runtime, for libraries
    /// that do not call back into the server
    pub fn open_unbootstrapped(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let library = map_library(path).map_err(|e| ExtensionError::LoadFailure {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        info!("Loaded library: {}", path.display());
        Ok(Self {
            library,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Address of the export `name`.
    ///
    /// Unix looks the name up exactly. Windows tries each spelling from
    /// `decorated_candidates` and takes the first that resolves.
    pub fn lookup(&self, name: &str) -> Result<usize> {
        #[cfg(windows)]
        {
            for candidate in decorated_candidates(name) {
                if let Some(address) = self.raw_lookup(&candidate) {
                    debug!("Resolved {} as {} at {:#x}", name, candidate, address);
                    return Ok(address);
                }
            }
        }

        #[cfg(not(windows))]
        {
            if let Some(address) = self.raw_lookup(name) {
                debug!("Resolved {} at {:#x}", name, address);
                return Ok(address);
            }
        }

        Err(ExtensionError::SymbolNotFound {
            name: name.to_string(),
            path: self.path.clone(),
        })
    }

    /// Exact-name lookup; a symbol that resolves to null counts as missing
    fn raw_lookup(&self, name: &str) -> Option<usize> {
        // SAFETY: only the address is read, never called here
        let symbol = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        let address = *symbol as usize;
        (address != 0).then_some(address)
    }

    /// Unmaps the library. Every address looked up through this handle is
    /// dangling afterwards.
    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.library.close().map_err(|e| ExtensionError::CloseFailure {
            path: path.clone(),
            message: e.to_string(),
        })?;
        info!("Closed library: {}", path.display());
        Ok(())
    }
}

#[cfg(unix)]
fn map_library(path: &Path) -> std::result::Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_LAZY};

    // SAFETY: running library initializers is inherent to loading extensions
    unsafe { UnixLibrary::open(Some(path), RTLD_LAZY | RTLD_GLOBAL) }.map(Library::from)
}

#[cfg(not(unix))]
fn map_library(path: &Path) -> std::result::Result<Library, libloading::Error> {
    // SAFETY: running library initializers is inherent to loading extensions
    unsafe { Library::new(path) }
}

#[cfg(all(test, any(target_os = "linux", target_os = "macos")))]
mod tests {
    use super::*;
    use std::ffi::c_int;

    #[cfg(target_os = "linux")]
    const SYSTEM_LIBRARY: &str = "libc.so.6";

    #[cfg(target_os = "macos")]
    const SYSTEM_LIBRARY: &str = "/usr/lib/libSystem.B.dylib";

    type AbsFn = unsafe extern "C" fn(c_int) -> c_int;

    fn call_abs(address: usize, value: c_int) -> c_int {
        // SAFETY: address resolves `abs` from the C library
        unsafe {
            let f: AbsFn = std::mem::transmute::<usize, AbsFn>(address);
            f(value)
        }
    }

    #[test]
    fn test_open_missing_library() {
        let err = LibraryHandle::open_unbootstrapped("/nonexistent/dir/libnothing.so").unwrap_err();
        match err {
            ExtensionError::LoadFailure { path, message } => {
                assert_eq!(path, PathBuf::from("/nonexistent/dir/libnothing.so"));
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_lookup_and_single_close() {
        let handle = LibraryHandle::open_unbootstrapped(SYSTEM_LIBRARY).unwrap();
        let address = handle.lookup("abs").unwrap();
        assert_eq!(call_abs(address, -17), 17);
        handle.close().unwrap();
    }

    #[test]
    fn test_missing_symbol() {
        let handle = LibraryHandle::open_unbootstrapped(SYSTEM_LIBRARY).unwrap();
        let err = handle.lookup("pgext_no_such_symbol_anywhere").unwrap_err();
        assert!(matches!(err, ExtensionError::SymbolNotFound { ref name, .. } if name == "pgext_no_such_symbol_anywhere"));
        handle.close().unwrap();
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let handle = LibraryHandle::open_unbootstrapped(SYSTEM_LIBRARY).unwrap();
        let first = handle.lookup("strlen").unwrap();
        for _ in 0..8 {
            assert_eq!(handle.lookup("strlen").unwrap(), first);
        }
        handle.close().unwrap();
    }

    #[test]
    fn test_two_handles_to_one_library() {
        let first = LibraryHandle::open_unbootstrapped(SYSTEM_LIBRARY).unwrap();
        let second = LibraryHandle::open_unbootstrapped(SYSTEM_LIBRARY).unwrap();
        let a = first.lookup("abs").unwrap();
        let b = second.lookup("abs").unwrap();

        assert_eq!(call_abs(a, -3), 3);
        first.close().unwrap();

        // The second handle keeps the mapping alive on its own
        assert_eq!(call_abs(b, -4), 4);
        assert_eq!(second.lookup("abs").unwrap(), b);
        second.close().unwrap();
    }
}
