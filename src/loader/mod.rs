/*
 *  loader/mod.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Dynamic library loading for extension modules
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

//! Dynamic loading of compiled extension modules
//!
//! ## Architecture
//!
//! 1. **Bootstrap** (`bootstrap.rs`) - preloads the companion runtime once
//! 2. **Resolver** (`resolver.rs`) - maps a library and looks up exports
//! 3. **Decoration** (`decoration.rs`) - Windows export name spellings
//! 4. **Library** (`library.rs`) - the declared function table of one library
//!
//! ## Library Naming Convention
//!
//! - Linux: `<module>.so`
//! - macOS: `<module>.dylib` (or `.so`, as the server builds them)
//! - Windows: `<module>.dll`

pub mod bootstrap;
pub mod decoration;
pub mod library;
pub mod resolver;

pub use bootstrap::{
    RuntimeConfig,
    RUNTIME_PATH_ENV,
    ensure_runtime_initialized,
    locate_runtime,
    runtime_initialized,
    runtime_path,
    set_runtime_config,
};
pub use decoration::decorated_candidates;
pub use library::{ExportedFunction, LoadOptions, LoadedLibrary, PgMagic};
pub use resolver::LibraryHandle;

/// Platform suffix of a loadable module
pub fn library_suffix() -> &'static str {
    if cfg!(target_os = "windows") {
        "dll"
    } else if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    }
}
