/*
 *  fmgr/datum.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Datum provenance and conversions
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

//! A Datum is one machine word. The server uses the same word for by-value
//! scalars, pointers into static data, pointers into the caller's stack and
//! `palloc`'d memory, so nothing in the word says who may free it.
//! [`TaggedDatum`] puts that provenance back at the Rust boundary and
//! [`DatumLedger`] remembers it per address for callers that track results.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_void};
use std::ptr;
use log::{debug, warn};

use super::ffi::Datum;

/// Datum with its provenance made explicit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggedDatum {
    /// By-value scalar; the bits are the value
    Inline(Datum),

    /// Points at memory someone else owns (static data, a frame, a buffer
    /// the host keeps alive)
    BorrowedRef(Datum),

    /// Points at C heap memory the holder must release with `free`
    OwnedRef(Datum),
}

impl TaggedDatum {
    /// The raw word passed across the ABI
    pub fn raw(self) -> Datum {
        match self {
            TaggedDatum::Inline(bits) => bits,
            TaggedDatum::BorrowedRef(addr) | TaggedDatum::OwnedRef(addr) => addr,
        }
    }

    /// A zero reference is the null sentinel; a zero scalar is just zero
    pub fn is_null_ref(self) -> bool {
        match self {
            TaggedDatum::Inline(_) => false,
            TaggedDatum::BorrowedRef(addr) | TaggedDatum::OwnedRef(addr) => addr == 0,
        }
    }
}

/// Converts a datum to a reference of the pointed-to type.
///
/// # Safety
/// `datum` must be zero or point at a live, aligned `T`.
pub unsafe fn from_datum<'a, T>(datum: Datum) -> Option<&'a T> {
    if datum == 0 {
        return None;
    }
    // SAFETY: non-zero and valid per the caller's contract
    unsafe { (datum as *const T).as_ref() }
}

/// Converts a pointer to a datum; null becomes the zero sentinel.
pub fn to_datum<T>(value: *const T) -> Datum {
    value as Datum
}

/// Copies `len` bytes out of the memory a datum points at.
///
/// # Safety
/// `datum` must be zero or point at `len` readable bytes.
pub unsafe fn datum_bytes(datum: Datum, len: usize) -> Option<Vec<u8>> {
    if datum == 0 {
        return None;
    }
    // SAFETY: readable per the caller's contract
    let bytes = unsafe { std::slice::from_raw_parts(datum as *const u8, len) };
    Some(bytes.to_vec())
}

/// Reads a NUL terminated C string a datum points at.
///
/// # Safety
/// `datum` must be zero or point at a NUL terminated string.
pub unsafe fn datum_cstring(datum: Datum) -> Option<String> {
    if datum == 0 {
        return None;
    }
    // SAFETY: NUL terminated per the caller's contract
    let s = unsafe { CStr::from_ptr(datum as *const std::ffi::c_char) };
    Some(s.to_string_lossy().into_owned())
}

/// Allocates a zeroed `T` on the C heap; release it with [`free_datum`].
pub fn alloc_zeroed<T>() -> *mut T {
    // SAFETY: calloc either fails with null or returns zeroed memory
    unsafe { libc::calloc(1, std::mem::size_of::<T>().max(1)) as *mut T }
}

/// Copies `value` into a NUL terminated C heap string and returns it as an
/// owned datum, the way the server passes `cstring` arguments.
pub fn alloc_cstring(value: &str) -> Option<TaggedDatum> {
    let c_value = CString::new(value).ok()?;
    let bytes = c_value.as_bytes_with_nul();
    // SAFETY: destination has room for every byte including the terminator
    unsafe {
        let dst = libc::malloc(bytes.len()) as *mut u8;
        if dst.is_null() {
            return None;
        }
        ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        Some(TaggedDatum::OwnedRef(dst as Datum))
    }
}

/// Frees C heap memory behind a datum.
///
/// # Safety
/// The datum must come from `malloc` (directly or through the runtime's
/// `palloc` family) and must not be freed twice. Datums pointing at static
/// or stack memory crash the process here.
pub unsafe fn free_datum(datum: Datum) {
    // SAFETY: heap pointer per the caller's contract; free(NULL) is a no-op
    unsafe { libc::free(datum as *mut c_void) }
}

/// Who is responsible for the memory behind an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Borrowed,
    Owned,
}

/// Side table of datum provenance, keyed by address
///
/// Callers that keep results around record them here and release through the
/// ledger, which refuses to free anything not recorded as owned. Addresses
/// that were never recorded fall back to whatever the caller asserts.
#[derive(Debug, Default)]
pub struct DatumLedger {
    entries: HashMap<Datum, Provenance>,
}

impl DatumLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a datum's provenance; inline and zero datums are ignored
    pub fn record(&mut self, datum: TaggedDatum) {
        match datum {
            TaggedDatum::Inline(_) => {}
            TaggedDatum::BorrowedRef(0) | TaggedDatum::OwnedRef(0) => {}
            TaggedDatum::BorrowedRef(addr) => {
                self.entries.insert(addr, Provenance::Borrowed);
            }
            TaggedDatum::OwnedRef(addr) => {
                self.entries.insert(addr, Provenance::Owned);
            }
        }
    }

    pub fn provenance(&self, datum: Datum) -> Option<Provenance> {
        self.entries.get(&datum).copied()
    }

    /// Tag a raw datum from the table, or with the caller's assertion when
    /// the address was never recorded
    pub fn tag(&self, datum: Datum, asserted: Provenance) -> TaggedDatum {
        match self.provenance(datum).unwrap_or(asserted) {
            Provenance::Borrowed => TaggedDatum::BorrowedRef(datum),
            Provenance::Owned => TaggedDatum::OwnedRef(datum),
        }
    }

    /// Free a recorded owned datum and forget it. Returns whether memory was
    /// released; borrowed and unknown addresses are left alone.
    pub fn release(&mut self, datum: Datum) -> bool {
        match self.entries.get(&datum) {
            Some(Provenance::Owned) => {
                self.entries.remove(&datum);
                debug!("Releasing owned datum {:#x}", datum);
                // SAFETY: only addresses recorded as owned reach here, once
                unsafe { free_datum(datum) };
                true
            }
            Some(Provenance::Borrowed) => {
                warn!("Refusing to free borrowed datum {:#x}", datum);
                false
            }
            None => {
                warn!("Refusing to free untracked datum {:#x}", datum);
                false
            }
        }
    }

    /// Release every owned datum still recorded
    pub fn release_all(&mut self) -> usize {
        let owned: Vec<Datum> = self.entries.iter()
            .filter(|(_, p)| **p == Provenance::Owned)
            .map(|(addr, _)| *addr)
            .collect();
        owned.into_iter().filter(|addr| self.release(*addr)).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for DatumLedger {
    fn drop(&mut self) {
        let freed = self.release_all();
        if freed > 0 {
            debug!("Datum ledger released {} owned datums on drop", freed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static STATIC_BYTES: [u8; 4] = [1, 2, 3, 4];

    #[test]
    fn test_null_sentinel() {
        assert!(unsafe { from_datum::<u64>(0) }.is_none());
        assert!(unsafe { datum_bytes(0, 16) }.is_none());
        assert!(TaggedDatum::OwnedRef(0).is_null_ref());
        assert!(!TaggedDatum::Inline(0).is_null_ref());
    }

    #[test]
    fn test_cstring_allocation() {
        let datum = alloc_cstring("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        assert!(matches!(datum, TaggedDatum::OwnedRef(_)));
        let text = unsafe { datum_cstring(datum.raw()) }.unwrap();
        assert_eq!(text, "6ba7b810-9dad-11d1-80b4-00c04fd430c8");
        unsafe { free_datum(datum.raw()) };

        assert!(alloc_cstring("inner\0nul").is_none());
    }

    #[test]
    fn test_ledger_only_frees_owned() {
        let mut ledger = DatumLedger::new();
        let owned = alloc_cstring("owned").unwrap();
        let borrowed = TaggedDatum::BorrowedRef(STATIC_BYTES.as_ptr() as Datum);

        ledger.record(owned);
        ledger.record(borrowed);
        ledger.record(TaggedDatum::Inline(42));
        assert_eq!(ledger.len(), 2);

        assert!(!ledger.release(borrowed.raw()));
        assert!(!ledger.release(0xdead_beef));
        assert!(ledger.release(owned.raw()));
        assert!(!ledger.release(owned.raw()));
        assert_eq!(ledger.provenance(borrowed.raw()), Some(Provenance::Borrowed));
    }

    #[test]
    fn test_ledger_tag_falls_back_to_assertion() {
        let mut ledger = DatumLedger::new();
        let addr = STATIC_BYTES.as_ptr() as Datum;
        assert_eq!(ledger.tag(addr, Provenance::Owned), TaggedDatum::OwnedRef(addr));
        ledger.record(TaggedDatum::BorrowedRef(addr));
        assert_eq!(ledger.tag(addr, Provenance::Owned), TaggedDatum::BorrowedRef(addr));
    }

    #[test]
    fn test_alloc_zeroed() {
        let p = alloc_zeroed::<[u64; 4]>();
        assert!(!p.is_null());
        assert_eq!(unsafe { *p }, [0u64; 4]);
        unsafe { free_datum(to_datum(p)) };
    }
}
