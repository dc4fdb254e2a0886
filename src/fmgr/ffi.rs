/*
 *  fmgr/ffi.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  C ABI types of the Postgres function manager
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

//! FFI types for the fmgr V1 calling convention
//!
//! These mirror `fmgr.h` and `postgres.h` for a 64-bit server build. The
//! companion runtime and the fixture extension carry their own copies, which
//! must match these exactly.

use std::ffi::{c_char, c_int, c_void};
use std::mem::{offset_of, size_of};

/// Pointer sized word passed for every argument and result
pub type Datum = usize;

/// Postgres object identifier
pub type Oid = u32;

/// Maximum number of arguments a server build accepts (`FUNC_MAX_ARGS`)
pub const FUNC_MAX_ARGS: usize = 100;

/// Only call frames built for this fmgr API are supported
pub const FMGR_API_VERSION: c_int = 1;

/// `NAMEDATALEN` of a stock server build
pub const NAMEDATALEN: c_int = 64;

/// `INDEX_MAX_KEYS` of a stock server build
pub const INDEX_MAX_KEYS: c_int = 32;

/// Size of the free-form ABI tag at the end of the magic block
pub const PG_MAGIC_ABI_EXTRA_SIZE: usize = 32;

/// Symbol every extension exports for its compatibility record
pub const PG_MAGIC_FUNCTION_NAME: &str = "Pg_magic_func";

/// Prefix of the per-function info record emitted by `PG_FUNCTION_INFO_V1`
pub const PG_FINFO_PREFIX: &str = "pg_finfo_";

/// One argument slot of a call frame
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullableDatum {
    pub value: Datum,
    pub isnull: bool,
}

/// `FunctionCallInfoBaseData` sized for `FUNC_MAX_ARGS` arguments
///
/// The server declares `args` as a flexible array member; sizing it to the
/// maximum gives every frame the layout of `SizeForFunctionCallInfo(FUNC_MAX_ARGS)`.
#[repr(C)]
pub struct FunctionCallInfoBaseData {
    pub flinfo: *mut c_void,
    pub context: *mut c_void,
    pub resultinfo: *mut c_void,
    pub fncollation: Oid,
    pub isnull: bool,
    pub nargs: i16,
    pub args: [NullableDatum; FUNC_MAX_ARGS],
}

/// Byte size of a full frame, `SZ_FCINFO` in the C headers
pub const SIZE_OF_CALL_FRAME: usize = size_of::<FunctionCallInfoBaseData>();

/// Offset of the argument array inside a frame
pub const CALL_FRAME_ARGS_OFFSET: usize = offset_of!(FunctionCallInfoBaseData, args);

/// fmgr V1 function signature
pub type PgFunction = unsafe extern "C" fn(fcinfo: *mut FunctionCallInfoBaseData) -> Datum;

/// `Pg_magic_struct` as laid out by servers 15 and later
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PgMagicStruct {
    pub len: c_int,
    pub version: c_int,
    pub funcmaxargs: c_int,
    pub indexmaxkeys: c_int,
    pub namedatalen: c_int,
    pub float8byval: c_int,
    pub abi_extra: [c_char; PG_MAGIC_ABI_EXTRA_SIZE],
}

/// The fields every server version has had, read when `len` is too short
/// for [`PgMagicStruct`]
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PgMagicHeader {
    pub len: c_int,
    pub version: c_int,
    pub funcmaxargs: c_int,
    pub indexmaxkeys: c_int,
    pub namedatalen: c_int,
    pub float8byval: c_int,
}

/// Signature of `Pg_magic_func`
pub type PgMagicFunction = unsafe extern "C" fn() -> *const PgMagicStruct;

/// `Pg_finfo_record`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PgFinfoRecord {
    pub api_version: c_int,
}

/// Signature of `pg_finfo_<name>`
pub type PgFinfoFunction = unsafe extern "C" fn() -> *const PgFinfoRecord;

/// Report callback the runtime calls from `errfinish`
pub type ReportSink = unsafe extern "C" fn(
    elevel: c_int,
    message: *const c_char,
    detail: *const c_char,
    hint: *const c_char,
);

/// Runtime export that installs a [`ReportSink`]
pub type InstallSinkFunction = unsafe extern "C" fn(sink: Option<ReportSink>);

/// Runtime export reporting its ABI revision
pub type RuntimeAbiVersionFunction = unsafe extern "C" fn() -> u32;

/// Symbol names the host resolves in the companion runtime
pub const RUNTIME_INSTALL_SINK_SYMBOL: &str = "pgext_runtime_install_sink";
pub const RUNTIME_ABI_VERSION_SYMBOL: &str = "pgext_runtime_abi_version";

/// Revision of the host/runtime contract; bumped whenever the frame layout or
/// the sink signature changes
pub const RUNTIME_ABI_VERSION: u32 = 1;
