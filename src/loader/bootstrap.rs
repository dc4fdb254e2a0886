/*
 *  loader/bootstrap.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  One-time preload of the companion runtime library
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

//! Extensions are linked against the server and leave `palloc`, `errmsg` and
//! friends undefined. Before the first extension is mapped, the companion
//! runtime (`pgext-runtime`) is mapped into the global namespace so those
//! references bind to it. This happens once per process; if it fails nothing
//! else can work, so it aborts the process.
//!
//! ## Runtime search order
//!
//! 1. `RuntimeConfig::runtime_path` (`$PGEXT_RUNTIME_PATH` by default)
//! 2. the directory of the running executable
//! 3. its parent (test binaries run from `target/<profile>/deps`)
//! 4. `lib/` next to the executable

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use log::{Level, debug, error, info, log_enabled, warn};
use libloading::Library;

use crate::diagnostics;
use crate::fmgr::ffi::{
    InstallSinkFunction,
    ReportSink,
    RuntimeAbiVersionFunction,
    RUNTIME_ABI_VERSION,
    RUNTIME_ABI_VERSION_SYMBOL,
    RUNTIME_INSTALL_SINK_SYMBOL,
};

/// Environment override for the runtime location
pub const RUNTIME_PATH_ENV: &str = "PGEXT_RUNTIME_PATH";

/// How to find the companion runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Explicit path to the runtime library; searched first
    pub runtime_path: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Configuration taken from `$PGEXT_RUNTIME_PATH`
    pub fn from_env() -> Self {
        Self {
            runtime_path: std::env::var_os(RUNTIME_PATH_ENV).map(PathBuf::from),
        }
    }
}

/// The mapped runtime, kept for the life of the process
struct RuntimeLibrary {
    #[allow(dead_code)]
    library: Library,
    path: PathBuf,
}

static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();
static RUNTIME: OnceLock<RuntimeLibrary> = OnceLock::new();

/// Installs the runtime configuration. Only the first call counts, and only
/// if it happens before the first extension is opened.
pub fn set_runtime_config(config: RuntimeConfig) -> bool {
    match RUNTIME_CONFIG.set(config) {
        Ok(()) => true,
        Err(config) => {
            warn!("Runtime configuration already fixed; ignoring {:?}", config);
            false
        }
    }
}

fn runtime_config() -> &'static RuntimeConfig {
    RUNTIME_CONFIG.get_or_init(RuntimeConfig::from_env)
}

/// Platform file name of the companion runtime
pub fn runtime_file_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "pgext_runtime.dll"
    } else if cfg!(target_os = "macos") {
        "libpgext_runtime.dylib"
    } else {
        "libpgext_runtime.so"
    }
}

/// Every location the runtime may live at, in priority order
pub fn runtime_search_paths(config: &RuntimeConfig) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(path) = config.runtime_path.as_ref() {
        paths.push(path.clone());
    }

    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        paths.push(exe_dir.join(runtime_file_name()));
        if let Some(parent) = exe_dir.parent() {
            paths.push(parent.join(runtime_file_name()));
        }
        paths.push(exe_dir.join("lib").join(runtime_file_name()));
    }

    paths
}

/// First existing runtime library for `config`
pub fn locate_runtime(config: &RuntimeConfig) -> Option<PathBuf> {
    let found = runtime_search_paths(config).into_iter().find(|p| p.is_file());
    match found.as_ref() {
        Some(path) => debug!("Found companion runtime at: {}", path.display()),
        None => debug!("Companion runtime {} not found", runtime_file_name()),
    }
    found
}

/// Maps the companion runtime into the global namespace and connects its
/// report channel, exactly once per process. Concurrent first callers block
/// until the first one finishes.
///
/// A failure ends the process: the reason is logged (or written to stderr
/// when no logger is installed) and the process aborts, whatever the panic
/// strategy of the binary. No caller ever sees a half initialized runtime,
/// and the bootstrap is never retried.
pub fn ensure_runtime_initialized() {
    RUNTIME.get_or_init(|| {
        let config = runtime_config();
        let Some(path) = locate_runtime(config) else {
            bootstrap_failed(format!(
                "cannot find the companion runtime {} (searched {:?}); set {}",
                runtime_file_name(),
                runtime_search_paths(config),
                RUNTIME_PATH_ENV
            ));
        };

        let library = match map_runtime(&path) {
            Ok(library) => library,
            Err(e) => bootstrap_failed(format!(
                "cannot load the companion runtime `{}`\n{}", path.display(), e
            )),
        };
        if let Err(e) = connect_runtime(&library) {
            bootstrap_failed(format!("companion runtime `{}` is unusable: {}", path.display(), e));
        }

        info!("Companion runtime loaded from: {}", path.display());
        RuntimeLibrary { library, path }
    });
}

fn bootstrap_failed(message: String) -> ! {
    if log_enabled!(Level::Error) {
        error!("{}", message);
    } else {
        eprintln!("pgext: {}", message);
    }
    std::process::abort()
}

/// Whether the bootstrap has completed in this process
pub fn runtime_initialized() -> bool {
    RUNTIME.get().is_some()
}

/// Where the runtime was loaded from, once initialized
pub fn runtime_path() -> Option<&'static Path> {
    RUNTIME.get().map(|r| r.path.as_path())
}

#[cfg(unix)]
fn map_runtime(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};

    // SAFETY: the runtime has no initializers with preconditions
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }.map(Library::from)
}

#[cfg(windows)]
fn map_runtime(path: &Path) -> Result<Library, libloading::Error> {
    use std::os::windows::ffi::OsStrExt;

    #[link(name = "kernel32")]
    unsafe extern "system" {
        fn SetDllDirectoryW(path_name: *const u16) -> i32;
    }

    // Let extension DLLs find the runtime (and anything next to it) by name
    if let Some(dir) = path.parent() {
        let wide: Vec<u16> = dir.as_os_str().encode_wide().chain(std::iter::once(0)).collect();
        // SAFETY: NUL terminated UTF-16 path that outlives the call
        if unsafe { SetDllDirectoryW(wide.as_ptr()) } == 0 {
            warn!("SetDllDirectoryW({}) failed", dir.display());
        }
    }

    // SAFETY: the runtime has no initializers with preconditions
    unsafe { Library::new(path) }
}

fn connect_runtime(library: &Library) -> Result<(), String> {
    // SAFETY: symbol types match the runtime's exports
    unsafe {
        let abi_version = library
            .get::<RuntimeAbiVersionFunction>(RUNTIME_ABI_VERSION_SYMBOL.as_bytes())
            .map_err(|e| e.to_string())?;
        let found = abi_version();
        if found != RUNTIME_ABI_VERSION {
            return Err(format!(
                "ABI version mismatch: runtime {} incompatible with host {}",
                found, RUNTIME_ABI_VERSION
            ));
        }

        let install_sink = library
            .get::<InstallSinkFunction>(RUNTIME_INSTALL_SINK_SYMBOL.as_bytes())
            .map_err(|e| e.to_string())?;
        install_sink(Some(diagnostics::report_sink as ReportSink));
    }
    Ok(())
}
