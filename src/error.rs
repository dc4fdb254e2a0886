/*
 *  error.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Error taxonomy for loading, resolving and calling extensions
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

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the resolver, the descriptor loader and the call adapter
///
/// Loader diagnostics are carried verbatim: binary incompatibility is the
/// usual failure and the native message is what explains it.
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// The shared library could not be mapped
    #[error("error while loading extension `{}`\n{message}", .path.display())]
    LoadFailure { path: PathBuf, message: String },

    /// No candidate spelling of the symbol exists in the library
    #[error("symbol {name} not found in `{}`", .path.display())]
    SymbolNotFound { name: String, path: PathBuf },

    /// Unmapping the library failed
    #[error("error while closing extension `{}`\n{message}", .path.display())]
    CloseFailure { path: PathBuf, message: String },

    /// Discovery found no compiled library for the extension
    #[error("extension `{0}` does not reference a library")]
    NoLibraryReference(String),

    /// A control file, registration script or directory could not be read
    #[error("I/O error on `{}`: {source}", .path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The call could not be made, or the callee raised an error report
    #[error("call to {function} failed: {message}")]
    CallFailure { function: String, message: String },
}

impl ExtensionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExtensionError::IoFailure { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, ExtensionError>;
