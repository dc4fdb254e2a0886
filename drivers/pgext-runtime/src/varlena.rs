/*
 *  PgExt Runtime - Text Helpers
 *
 *  varlena decoding and the text/cstring conversions
 */

//! A `text` value is a varlena: a length header followed by the bytes. The
//! header is one byte for short values and four bytes otherwise, with the
//! tag bits at the low end on little endian builds and the high end on big
//! endian ones. Compressed and out-of-line (TOAST) values are not expanded.

use std::ffi::{c_char, c_void, CStr};
use std::ptr;

use crate::memory::{palloc, palloc_copy};

/// What `text_to_cstring` returns for values it cannot expand
pub const UNDECODED_TEXT: &[u8] = b"returned_from_text_to_cstring";

const VARHDRSZ: usize = 4;

/// Largest length a 4-byte header can hold
const VARLENA_MAX: usize = 0x3FFF_FFFF;

/// Decoded varlena header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Varlena {
    /// Plain value: payload offset and payload length
    Inline { offset: usize, len: usize },
    /// Inline but compressed
    Compressed,
    /// TOAST pointer to data stored elsewhere
    External,
}

/// Reads the header at `ptr`.
///
/// # Safety
/// `ptr` must point at a readable varlena header.
pub unsafe fn decode_header(ptr: *const u8) -> Varlena {
    let first = *ptr;

    #[cfg(target_endian = "little")]
    {
        if first == 0x01 {
            return Varlena::External;
        }
        if first & 0x01 == 0x01 {
            let total = (first >> 1) as usize;
            return Varlena::Inline { offset: 1, len: total.saturating_sub(1) };
        }
        let header = u32::from_le_bytes(ptr::read_unaligned(ptr as *const [u8; 4]));
        if header & 0x03 == 0x02 {
            return Varlena::Compressed;
        }
        let total = (header >> 2) as usize;
        Varlena::Inline { offset: VARHDRSZ, len: total.saturating_sub(VARHDRSZ) }
    }

    #[cfg(target_endian = "big")]
    {
        if first == 0x80 {
            return Varlena::External;
        }
        if first & 0x80 == 0x80 {
            let total = (first & 0x7F) as usize;
            return Varlena::Inline { offset: 1, len: total.saturating_sub(1) };
        }
        let header = u32::from_be_bytes(ptr::read_unaligned(ptr as *const [u8; 4]));
        if header & 0xC000_0000 == 0x4000_0000 {
            return Varlena::Compressed;
        }
        let total = (header & 0x3FFF_FFFF) as usize;
        Varlena::Inline { offset: VARHDRSZ, len: total.saturating_sub(VARHDRSZ) }
    }
}

/// Header of an uncompressed value with 4-byte header and `total` bytes
fn set_varsize_4b(total: usize) -> [u8; 4] {
    #[cfg(target_endian = "little")]
    {
        ((total as u32) << 2).to_le_bytes()
    }

    #[cfg(target_endian = "big")]
    {
        ((total as u32) & 0x3FFF_FFFF).to_be_bytes()
    }
}

/// Builds a palloc'd text value from raw bytes
pub(crate) fn text_from_bytes(bytes: &[u8]) -> *mut c_void {
    let len = bytes.len().min(VARLENA_MAX - VARHDRSZ);
    let total = len + VARHDRSZ;
    let dst = palloc(total) as *mut u8;
    if dst.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: dst has room for the header plus len bytes
    unsafe {
        ptr::copy_nonoverlapping(set_varsize_4b(total).as_ptr(), dst, VARHDRSZ);
        ptr::copy_nonoverlapping(bytes.as_ptr(), dst.add(VARHDRSZ), len);
    }
    dst as *mut c_void
}

/// Copies `bytes` into a palloc'd NUL terminated string
pub(crate) fn cstring_from_bytes(bytes: &[u8]) -> *mut c_char {
    let mut owned = Vec::with_capacity(bytes.len() + 1);
    owned.extend_from_slice(bytes);
    owned.push(0);
    palloc_copy(&owned) as *mut c_char
}

/// Values are never stored out of line here, so this is the identity
#[no_mangle]
pub extern "C" fn pg_detoast_datum_packed(datum: *mut c_void) -> *mut c_void {
    datum
}

#[no_mangle]
pub extern "C" fn pg_detoast_datum(datum: *mut c_void) -> *mut c_void {
    datum
}

/// Plain text becomes a palloc'd C string. Compressed and TOASTed values
/// (and null) come back as the `returned_from_text_to_cstring` placeholder.
///
/// # Safety
/// `text` is null or points at a complete varlena.
#[no_mangle]
pub unsafe extern "C" fn text_to_cstring(text: *const c_void) -> *mut c_char {
    if text.is_null() {
        return cstring_from_bytes(UNDECODED_TEXT);
    }
    let base = text as *const u8;
    match decode_header(base) {
        Varlena::Inline { offset, len } => {
            let payload = std::slice::from_raw_parts(base.add(offset), len);
            // An embedded NUL ends the string, as strcpy would
            let end = payload.iter().position(|b| *b == 0).unwrap_or(len);
            cstring_from_bytes(&payload[..end])
        }
        Varlena::Compressed | Varlena::External => cstring_from_bytes(UNDECODED_TEXT),
    }
}

/// # Safety
/// `s` is a NUL terminated string.
#[no_mangle]
pub unsafe extern "C" fn cstring_to_text(s: *const c_char) -> *mut c_void {
    if s.is_null() {
        return text_from_bytes(&[]);
    }
    text_from_bytes(CStr::from_ptr(s).to_bytes())
}

/// # Safety
/// `s` points at `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn cstring_to_text_with_len(s: *const c_char, len: i32) -> *mut c_void {
    if s.is_null() || len <= 0 {
        return text_from_bytes(&[]);
    }
    text_from_bytes(std::slice::from_raw_parts(s as *const u8, len as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::pfree;

    unsafe fn take_cstring(p: *mut c_char) -> String {
        let s = CStr::from_ptr(p).to_string_lossy().into_owned();
        pfree(p as *mut c_void);
        s
    }

    #[test]
    fn test_text_round_trip() {
        unsafe {
            let text = cstring_to_text(c"hello, world".as_ptr());
            assert_eq!(decode_header(text as *const u8), Varlena::Inline { offset: 4, len: 12 });
            assert_eq!(take_cstring(text_to_cstring(text)), "hello, world");
            pfree(text);

            let text = cstring_to_text_with_len(c"abcdef".as_ptr(), 3);
            assert_eq!(take_cstring(text_to_cstring(text)), "abc");
            pfree(text);
        }
    }

    #[test]
    #[cfg(target_endian = "little")]
    fn test_short_header() {
        // 1-byte header: total length 6 (header + "short") shifted with tag bit
        let value = [(6u8 << 1) | 1, b's', b'h', b'o', b'r', b't'];
        unsafe {
            assert_eq!(decode_header(value.as_ptr()), Varlena::Inline { offset: 1, len: 5 });
            let s = text_to_cstring(value.as_ptr() as *const c_void);
            assert_eq!(take_cstring(s), "short");
        }
    }

    #[test]
    #[cfg(target_endian = "little")]
    fn test_compressed_and_external_get_placeholder() {
        let compressed = [0x02u8 | (40 << 2), 0, 0, 0, 0, 0, 0, 0];
        let external = [0x01u8, 18, 0, 0];
        unsafe {
            assert_eq!(decode_header(compressed.as_ptr()), Varlena::Compressed);
            assert_eq!(decode_header(external.as_ptr()), Varlena::External);
            let s = text_to_cstring(compressed.as_ptr() as *const c_void);
            assert_eq!(take_cstring(s), "returned_from_text_to_cstring");
            let s = text_to_cstring(external.as_ptr() as *const c_void);
            assert_eq!(take_cstring(s), "returned_from_text_to_cstring");
        }
    }

    #[test]
    fn test_detoast_is_identity() {
        let mut value = [0u8; 8];
        let p = value.as_mut_ptr() as *mut c_void;
        assert_eq!(pg_detoast_datum_packed(p), p);
        assert_eq!(pg_detoast_datum(p), p);
    }
}
