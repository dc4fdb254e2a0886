/*
 *  PgExt Fixture
 *
 *  A tiny extension built the way a server extension is: fmgr V1
 *  functions, a magic block, and server symbols left for the loader.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 */

//! # PgExt fixture extension
//!
//! The SQL side lives in `sql/`: `pgext_fixture.control` and its scripts
//! register every function below as `LANGUAGE C`. Nothing here links to
//! the runtime crate; `palloc`, `errmsg` and the rest bind when the host
//! loads this library after the runtime.

#![allow(non_snake_case)]

mod ffi;

use std::ffi::{c_int, c_void};
use std::ptr;

use ffi::*;

/// What `fixture_fixed_bytes` returns
pub const FIXED: &[u8; 16] = b"pgext-fixture-16";

static MAGIC: PgMagicStruct = PgMagicStruct::server17();
static FINFO_V1: PgFinfoRecord = PgFinfoRecord { api_version: 1 };

#[no_mangle]
pub extern "C" fn Pg_magic_func() -> *const PgMagicStruct {
    &MAGIC
}

/// `PG_FUNCTION_INFO_V1` for each named record
macro_rules! pg_function_info_v1 {
    ($($finfo:ident),* $(,)?) => {
        $(
            #[no_mangle]
            pub extern "C" fn $finfo() -> *const PgFinfoRecord {
                &FINFO_V1
            }
        )*
    };
}

pg_function_info_v1!(
    pg_finfo_fixture_fixed_bytes,
    pg_finfo_fixture_add_one,
    pg_finfo_fixture_null,
    pg_finfo_fixture_raise,
    pg_finfo_fixture_uuid_roundtrip,
    pg_finfo_fixture_text_echo,
);

/// `fixture_fixed_bytes() -> bytea`: 16 palloc'd bytes
///
/// # Safety
/// Called through an fmgr frame.
#[no_mangle]
pub unsafe extern "C" fn fixture_fixed_bytes(_fcinfo: *mut FunctionCallInfoBaseData) -> Datum {
    let dst = palloc(FIXED.len()) as *mut u8;
    if dst.is_null() {
        return 0;
    }
    ptr::copy_nonoverlapping(FIXED.as_ptr(), dst, FIXED.len());
    dst as Datum
}

/// # Safety
/// Called through an fmgr frame with one by-value argument.
#[no_mangle]
pub unsafe extern "C" fn fixture_add_one(fcinfo: *mut FunctionCallInfoBaseData) -> Datum {
    (*fcinfo).args[0].value.wrapping_add(1)
}

/// Returns null with garbage in the result word
///
/// # Safety
/// Called through an fmgr frame.
#[no_mangle]
pub unsafe extern "C" fn fixture_null(fcinfo: *mut FunctionCallInfoBaseData) -> Datum {
    (*fcinfo).isnull = true;
    0xDEAD
}

/// `ereport(ERROR, ...)` the way the C macro expands it
///
/// # Safety
/// Called through an fmgr frame.
#[no_mangle]
pub unsafe extern "C" fn fixture_raise(_fcinfo: *mut FunctionCallInfoBaseData) -> Datum {
    if errstart(ERROR, ptr::null()) {
        errcode(ERRCODE_INVALID_PARAMETER_VALUE);
        errmsg(c"fixture raised %s (%d)".as_ptr(), c"on purpose".as_ptr(), 42 as c_int);
        errhint(c"this report is expected".as_ptr());
        errfinish(c"lib.rs".as_ptr(), line!() as c_int, c"fixture_raise".as_ptr());
    }
    0
}

/// `fixture_uuid_roundtrip(cstring) -> cstring` through `uuid_in` and
/// `uuid_out`
///
/// # Safety
/// Called through an fmgr frame whose argument is a C string.
#[no_mangle]
pub unsafe extern "C" fn fixture_uuid_roundtrip(fcinfo: *mut FunctionCallInfoBaseData) -> Datum {
    let bytes = DirectFunctionCall1Coll(uuid_in, 0, (*fcinfo).args[0].value);
    if bytes == 0 {
        (*fcinfo).isnull = true;
        return 0;
    }
    let text = DirectFunctionCall1Coll(uuid_out, 0, bytes);
    pfree(bytes as *mut c_void);
    text
}

/// `fixture_text_echo(cstring) -> cstring` through a `text` value
///
/// # Safety
/// Called through an fmgr frame whose argument is a C string.
#[no_mangle]
pub unsafe extern "C" fn fixture_text_echo(fcinfo: *mut FunctionCallInfoBaseData) -> Datum {
    let text = cstring_to_text((*fcinfo).args[0].value as *const _);
    let echoed = text_to_cstring(text);
    pfree(text);
    echoed as Datum
}
