/*
 *  PgExt Runtime - FFI Types
 *
 *  C ABI types of the fmgr V1 calling convention and the host contract
 *  These types must match exactly with the host's FFI types
 */

use std::ffi::{c_char, c_int, c_void};

/// Pointer sized argument and result word
pub type Datum = usize;

/// Postgres object identifier
pub type Oid = u32;

/// `FUNC_MAX_ARGS` of a stock server build
pub const FUNC_MAX_ARGS: usize = 100;

/// Revision of the host/runtime contract
pub const RUNTIME_ABI_VERSION: u32 = 1;

/// One argument slot of a call frame
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NullableDatum {
    pub value: Datum,
    pub isnull: bool,
}

/// Call frame sized for `FUNC_MAX_ARGS` arguments
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

/// fmgr V1 function signature
pub type PgFunction = unsafe extern "C" fn(fcinfo: *mut FunctionCallInfoBaseData) -> Datum;

/// Host callback receiving every finished report
pub type ReportSink = unsafe extern "C" fn(
    elevel: c_int,
    message: *const c_char,
    detail: *const c_char,
    hint: *const c_char,
);
