/*
 *  loader/library.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Loaded extension library and its resolved function table
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

use std::collections::BTreeMap;
use std::ffi::CStr;
use std::mem::size_of;
use std::path::Path;
use log::{debug, info, warn};

use crate::error::Result;
use crate::fmgr::ffi::{
    FMGR_API_VERSION,
    FUNC_MAX_ARGS,
    PG_FINFO_PREFIX,
    PG_MAGIC_FUNCTION_NAME,
    PgFinfoFunction,
    PgFunction,
    PgMagicFunction,
    PgMagicHeader,
    PgMagicStruct,
};
use super::resolver::LibraryHandle;

/// A resolved export
///
/// Holds a raw address with no tie to the library it came from: once that
/// library is closed the address dangles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFunction {
    name: String,
    address: usize,
    api_version: Option<i32>,
}

impl ExportedFunction {
    pub(crate) fn new(name: impl Into<String>, address: usize, api_version: Option<i32>) -> Self {
        Self {
            name: name.into(),
            address,
            api_version,
        }
    }

    /// Wraps a function that lives in this process rather than a library
    pub fn from_pg_function(name: impl Into<String>, function: PgFunction) -> Self {
        Self::new(name, function as usize, Some(FMGR_API_VERSION))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> usize {
        self.address
    }

    /// fmgr API version from the `pg_finfo_<name>` record, when exported
    pub fn api_version(&self) -> Option<i32> {
        self.api_version
    }

    /// The address as an fmgr V1 function pointer.
    ///
    /// # Safety
    /// The address must be non-null, still mapped, and really be a V1
    /// function.
    pub unsafe fn as_pg_function(&self) -> PgFunction {
        // SAFETY: forwarded caller contract
        unsafe { std::mem::transmute::<usize, PgFunction>(self.address) }
    }
}

/// The extension's `Pg_magic_func` compatibility record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgMagic {
    pub len: i32,
    /// Server major version times 100 (1700 for 17)
    pub version: i32,
    pub func_max_args: i32,
    pub index_max_keys: i32,
    pub name_data_len: i32,
    pub float8_by_val: bool,
    /// ABI tag string, empty for servers older than 15
    pub abi_extra: String,
}

impl PgMagic {
    /// Server major version this library was built for
    pub fn server_major(&self) -> i32 {
        self.version / 100
    }
}

/// How strictly declared names must resolve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Warn about declared names the library lacks instead of failing
    pub skip_missing_symbols: bool,
}

/// A library plus the functions its registration scripts declare
///
/// Every entry of the function table was resolved against this library's own
/// handle. Closing the library invalidates all of them.
#[derive(Debug)]
pub struct LoadedLibrary {
    handle: LibraryHandle,
    functions: BTreeMap<String, ExportedFunction>,
    magic: Option<PgMagic>,
}

impl LoadedLibrary {
    /// Opens `path` and resolves each name in `function_names`.
    ///
    /// This performs the following steps:
    /// 1. Preload the companion runtime (first call only) and map the library
    /// 2. Read the `Pg_magic_func` record and check the frame size matches
    /// 3. Resolve every declared name, with its `pg_finfo_` record if present
    pub fn load(path: impl AsRef<Path>, function_names: &[String], options: &LoadOptions) -> Result<Self> {
        let handle = LibraryHandle::open(path)?;
        Self::from_handle(handle, function_names, options)
    }

    /// Builds the table on an already open handle. The handle is closed again
    /// if resolution fails.
    pub fn from_handle(handle: LibraryHandle, function_names: &[String], options: &LoadOptions) -> Result<Self> {
        let magic = read_magic(&handle);
        match magic.as_ref() {
            Some(m) => {
                debug!("{}: Pg_magic version={} maxArgs={} nameDataLen={}",
                    handle.path().display(), m.version, m.func_max_args, m.name_data_len);
                if m.func_max_args != FUNC_MAX_ARGS as i32 {
                    warn!("{} was built for FUNC_MAX_ARGS={}, call frames assume {}",
                        handle.path().display(), m.func_max_args, FUNC_MAX_ARGS);
                }
            }
            None => warn!("{} exports no {}; ABI compatibility unknown",
                handle.path().display(), PG_MAGIC_FUNCTION_NAME),
        }

        let mut functions = BTreeMap::new();
        for name in function_names {
            let address = match handle.lookup(name) {
                Ok(address) => address,
                Err(e) if options.skip_missing_symbols => {
                    warn!("Skipping declared function: {}", e);
                    continue;
                }
                Err(e) => {
                    if let Err(close_err) = handle.close() {
                        warn!("{}", close_err);
                    }
                    return Err(e);
                }
            };
            let api_version = read_finfo(&handle, name);
            if let Some(v) = api_version.filter(|v| *v != FMGR_API_VERSION) {
                warn!("{} declares fmgr API version {}; only {} is supported", name, v, FMGR_API_VERSION);
            }
            functions.insert(name.clone(), ExportedFunction::new(name.clone(), address, api_version));
        }

        info!("Resolved {} of {} declared functions in {}",
            functions.len(), function_names.len(), handle.path().display());

        Ok(Self {
            handle,
            functions,
            magic,
        })
    }

    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    pub fn magic(&self) -> Option<&PgMagic> {
        self.magic.as_ref()
    }

    pub fn function(&self, name: &str) -> Option<&ExportedFunction> {
        self.functions.get(name)
    }

    /// Resolved functions in name order
    pub fn functions(&self) -> impl Iterator<Item = &ExportedFunction> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Lookups outside the declared set go through the handle
    pub fn handle(&self) -> &LibraryHandle {
        &self.handle
    }

    /// Closes the library; every `ExportedFunction` from it dangles afterwards
    pub fn close(self) -> Result<()> {
        self.handle.close()
    }
}

fn read_magic(handle: &LibraryHandle) -> Option<PgMagic> {
    let address = handle.lookup(PG_MAGIC_FUNCTION_NAME).ok()?;
    // SAFETY: Pg_magic_func has this signature in every server version
    let record = unsafe {
        let magic_func = std::mem::transmute::<usize, PgMagicFunction>(address);
        magic_func()
    };
    if record.is_null() {
        return None;
    }

    // SAFETY: every version's record starts with the header fields; the
    // ABI tag is only read when the record says it is long enough
    unsafe {
        let header = *(record as *const PgMagicHeader);
        let abi_extra = if header.len as usize >= size_of::<PgMagicStruct>() {
            let extra = &(*record).abi_extra;
            let bytes = std::slice::from_raw_parts(extra.as_ptr() as *const u8, extra.len());
            CStr::from_bytes_until_nul(bytes)
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            String::new()
        };
        Some(PgMagic {
            len: header.len,
            version: header.version,
            func_max_args: header.funcmaxargs,
            index_max_keys: header.indexmaxkeys,
            name_data_len: header.namedatalen,
            float8_by_val: header.float8byval != 0,
            abi_extra,
        })
    }
}

fn read_finfo(handle: &LibraryHandle, name: &str) -> Option<i32> {
    let address = handle.lookup(&format!("{}{}", PG_FINFO_PREFIX, name)).ok()?;
    // SAFETY: PG_FUNCTION_INFO_V1 emits exactly this signature
    unsafe {
        let finfo = std::mem::transmute::<usize, PgFinfoFunction>(address);
        finfo().as_ref().map(|record| record.api_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmgr::ffi::{Datum, FunctionCallInfoBaseData};

    unsafe extern "C" fn identity(fcinfo: *mut FunctionCallInfoBaseData) -> Datum {
        unsafe { (*fcinfo).args[0].value }
    }

    #[test]
    fn test_exported_function_from_pg_function() {
        let function = ExportedFunction::from_pg_function("identity", identity);
        assert_eq!(function.name(), "identity");
        assert_ne!(function.address(), 0);
        assert_eq!(function.api_version(), Some(1));
    }

    #[test]
    fn test_server_major() {
        let magic = PgMagic {
            len: 56,
            version: 1700,
            func_max_args: 100,
            index_max_keys: 32,
            name_data_len: 64,
            float8_by_val: true,
            abi_extra: "PostgreSQL".into(),
        };
        assert_eq!(magic.server_major(), 17);
    }

    #[test]
    fn test_load_options_default_is_strict() {
        assert!(!LoadOptions::default().skip_missing_symbols);
    }
}
