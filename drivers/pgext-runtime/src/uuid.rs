/*
 *  PgExt Runtime - UUID I/O
 *
 *  uuid_in / uuid_out as fmgr V1 functions
 */

use std::ffi::{c_char, CStr};

use crate::elog::{report, ERROR};
use crate::ffi::{Datum, FunctionCallInfoBaseData};
use crate::memory::palloc_copy;
use crate::varlena::cstring_from_bytes;

pub const UUID_LEN: usize = 16;

/// Parses the server's accepted spellings: 32 hex digits, optionally in
/// braces, with an optional hyphen after any group of four digits.
pub fn parse_uuid(input: &[u8]) -> Option<[u8; UUID_LEN]> {
    let mut src = input;
    let braces = src.first() == Some(&b'{');
    if braces {
        src = &src[1..];
    }

    let mut out = [0u8; UUID_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        let (hi, lo) = match src {
            [hi, lo, ..] => (hex_value(*hi)?, hex_value(*lo)?),
            _ => return None,
        };
        *byte = (hi << 4) | lo;
        src = &src[2..];
        if src.first() == Some(&b'-') && i % 2 == 1 && i < UUID_LEN - 1 {
            src = &src[1..];
        }
    }

    if braces {
        src = src.strip_prefix(b"}")?;
    }
    src.is_empty().then_some(out)
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Canonical lower case `8-4-4-4-12` form
pub fn format_uuid(bytes: &[u8; UUID_LEN]) -> String {
    ::uuid::Uuid::from_bytes(*bytes).hyphenated().to_string()
}

/// `uuid_in(cstring) -> uuid`: a palloc'd 16 byte value. Bad input raises
/// an ERROR report and yields a null result.
///
/// # Safety
/// `fcinfo` is a valid frame whose first argument is a C string.
#[no_mangle]
pub unsafe extern "C" fn uuid_in(fcinfo: *mut FunctionCallInfoBaseData) -> Datum {
    let fcinfo = &mut *fcinfo;
    let input = fcinfo.args[0].value as *const c_char;
    if input.is_null() {
        fcinfo.isnull = true;
        return 0;
    }
    let text = CStr::from_ptr(input);
    match parse_uuid(text.to_bytes()) {
        Some(bytes) => palloc_copy(&bytes) as Datum,
        None => {
            report(ERROR, &format!(
                "invalid input syntax for type uuid: \"{}\"",
                text.to_string_lossy()
            ));
            fcinfo.isnull = true;
            0
        }
    }
}

/// `uuid_out(uuid) -> cstring`: a palloc'd canonical string
///
/// # Safety
/// `fcinfo` is a valid frame whose first argument points at 16 bytes.
#[no_mangle]
pub unsafe extern "C" fn uuid_out(fcinfo: *mut FunctionCallInfoBaseData) -> Datum {
    let fcinfo = &mut *fcinfo;
    let value = fcinfo.args[0].value as *const [u8; UUID_LEN];
    if value.is_null() {
        fcinfo.isnull = true;
        return 0;
    }
    cstring_from_bytes(format_uuid(&*value).as_bytes()) as Datum
}
