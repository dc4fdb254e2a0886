/*
 *  PgExt Fixture - FFI Types
 *
 *  fmgr V1 types and the server symbols this extension calls
 *  These types must match exactly with the host's FFI types
 */

#![allow(non_snake_case)]

use std::ffi::{c_char, c_int, c_void};
use std::mem::size_of;

pub type Datum = usize;
pub type Oid = u32;

pub const FUNC_MAX_ARGS: usize = 100;
pub const PG_MAGIC_ABI_EXTRA_SIZE: usize = 32;

pub const ERROR: c_int = 21;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NullableDatum {
    pub value: Datum,
    pub isnull: bool,
}

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

pub type PgFunction = unsafe extern "C" fn(fcinfo: *mut FunctionCallInfoBaseData) -> Datum;

#[repr(C)]
pub struct PgMagicStruct {
    pub len: c_int,
    pub version: c_int,
    pub funcmaxargs: c_int,
    pub indexmaxkeys: c_int,
    pub namedatalen: c_int,
    pub float8byval: c_int,
    pub abi_extra: [c_char; PG_MAGIC_ABI_EXTRA_SIZE],
}

impl PgMagicStruct {
    /// The record a server 17 build of this extension would carry
    pub const fn server17() -> Self {
        Self {
            len: size_of::<PgMagicStruct>() as c_int,
            version: 1700,
            funcmaxargs: FUNC_MAX_ARGS as c_int,
            indexmaxkeys: 32,
            namedatalen: 64,
            float8byval: 1,
            abi_extra: abi_tag(b"PostgreSQL"),
        }
    }
}

const fn abi_tag(tag: &[u8]) -> [c_char; PG_MAGIC_ABI_EXTRA_SIZE] {
    let mut out = [0 as c_char; PG_MAGIC_ABI_EXTRA_SIZE];
    let mut i = 0;
    while i < tag.len() && i < PG_MAGIC_ABI_EXTRA_SIZE - 1 {
        out[i] = tag[i] as c_char;
        i += 1;
    }
    out
}

#[repr(C)]
pub struct PgFinfoRecord {
    pub api_version: c_int,
}

/// `MAKE_SQLSTATE` from elog.h
pub const fn make_sqlstate(code: &[u8; 5]) -> c_int {
    let mut value = 0;
    let mut i = 0;
    while i < 5 {
        value += (((code[i] as c_int) - b'0' as c_int) & 0x3F) << (6 * i);
        i += 1;
    }
    value
}

pub const ERRCODE_INVALID_PARAMETER_VALUE: c_int = make_sqlstate(b"22023");

// Resolved against the server (here: the preloaded pgext runtime) at load time
#[cfg_attr(windows, link(name = "pgext_runtime", kind = "raw-dylib"))]
extern "C" {
    pub fn palloc(size: usize) -> *mut c_void;
    pub fn pfree(pointer: *mut c_void);

    pub fn errstart(elevel: c_int, domain: *const c_char) -> bool;
    pub fn errcode(sqlerrcode: c_int) -> c_int;
    pub fn errmsg(fmt: *const c_char, ...) -> c_int;
    pub fn errhint(fmt: *const c_char, ...) -> c_int;
    pub fn errfinish(filename: *const c_char, lineno: c_int, funcname: *const c_char);

    pub fn cstring_to_text(s: *const c_char) -> *mut c_void;
    pub fn text_to_cstring(t: *const c_void) -> *mut c_char;

    pub fn uuid_in(fcinfo: *mut FunctionCallInfoBaseData) -> Datum;
    pub fn uuid_out(fcinfo: *mut FunctionCallInfoBaseData) -> Datum;
    pub fn DirectFunctionCall1Coll(function: PgFunction, collation: Oid, arg1: Datum) -> Datum;
}
