/*
 *  lib.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Host side of the extension loader
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

//! Load compiled Postgres extensions and call their C functions without a
//! running server.
//!
//! ## Architecture
//!
//! 1. **Descriptor loader** (`extension.rs`) - finds an extension's control
//!    file, registration scripts and shared library, and extracts the C
//!    symbols its `CREATE FUNCTION ... LANGUAGE C` statements need
//! 2. **Symbol resolver** (`loader/`) - maps the library, resolves symbols
//!    (with Windows name decoration), preloads the companion runtime once
//! 3. **Call adapter** (`fmgr/`) - builds an fmgr V1 call frame, invokes the
//!    function pointer and reads back the result and null flag
//!
//! Callbacks the extension makes into "the server" (`palloc`, `ereport`,
//! `text_to_cstring`, ...) land in the `pgext-runtime` companion library,
//! which the host preloads into the global symbol namespace. Reports that
//! runtime emits come back to the host through [`diagnostics`].

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extension;
pub mod fmgr;
pub mod loader;

pub use error::{ExtensionError, Result};
pub use extension::{ExtensionFiles, InstallLayout, load_extensions};
pub use fmgr::{CallAdapter, CallArg, CallPolicy, CallRequest, CallResult, Datum, TaggedDatum};
pub use loader::{
    ExportedFunction, LibraryHandle, LoadOptions, LoadedLibrary, PgMagic, RuntimeConfig,
    ensure_runtime_initialized, set_runtime_config,
};
