/*
 *  PgExt Runtime - Memory
 *
 *  palloc family on top of the C heap
 */

//! Memory contexts are accepted and ignored: every allocation comes from
//! `malloc`, nothing is tracked, and nothing is freed when a context would
//! have been reset. Whatever an extension returns by reference must be
//! released by the host with `free`.

#![allow(non_snake_case)]

use std::ffi::{c_int, c_void};
use std::ptr;
use std::sync::atomic::AtomicPtr;

use crate::elog::{report, ERROR};

pub const MCXT_ALLOC_NO_OOM: c_int = 0x02;
pub const MCXT_ALLOC_ZERO: c_int = 0x04;

/// `MemoryContext` globals; always null here
#[no_mangle]
#[allow(non_upper_case_globals)]
pub static CurrentMemoryContext: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

#[no_mangle]
#[allow(non_upper_case_globals)]
pub static TopMemoryContext: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

fn allocate(size: usize, flags: c_int) -> *mut c_void {
    // Zero byte requests still get a unique pointer
    let size = size.max(1);
    // SAFETY: plain C heap allocation
    let ptr = unsafe {
        if flags & MCXT_ALLOC_ZERO != 0 {
            libc::calloc(1, size)
        } else {
            libc::malloc(size)
        }
    };
    if ptr.is_null() && flags & MCXT_ALLOC_NO_OOM == 0 {
        report(ERROR, &format!("out of memory: failed on request of size {}", size));
    }
    ptr
}

#[no_mangle]
pub extern "C" fn palloc(size: usize) -> *mut c_void {
    allocate(size, 0)
}

#[no_mangle]
pub extern "C" fn palloc0(size: usize) -> *mut c_void {
    allocate(size, MCXT_ALLOC_ZERO)
}

#[no_mangle]
pub extern "C" fn palloc_extended(size: usize, flags: c_int) -> *mut c_void {
    allocate(size, flags)
}

#[no_mangle]
pub extern "C" fn MemoryContextAlloc(_context: *mut c_void, size: usize) -> *mut c_void {
    allocate(size, 0)
}

#[no_mangle]
pub extern "C" fn MemoryContextAllocZero(_context: *mut c_void, size: usize) -> *mut c_void {
    allocate(size, MCXT_ALLOC_ZERO)
}

#[no_mangle]
pub extern "C" fn MemoryContextAllocExtended(_context: *mut c_void, size: usize, flags: c_int) -> *mut c_void {
    allocate(size, flags)
}

/// # Safety
/// `pointer` is null or came from this allocator and was not freed.
#[no_mangle]
pub unsafe extern "C" fn repalloc(pointer: *mut c_void, size: usize) -> *mut c_void {
    let resized = libc::realloc(pointer, size.max(1));
    if resized.is_null() {
        report(ERROR, &format!("out of memory: failed on request of size {}", size));
    }
    resized
}

/// # Safety
/// `pointer` is null or came from this allocator and was not freed.
#[no_mangle]
pub unsafe extern "C" fn pfree(pointer: *mut c_void) {
    libc::free(pointer)
}

/// Copies `bytes` into a fresh allocation
pub(crate) fn palloc_copy(bytes: &[u8]) -> *mut u8 {
    let dst = palloc(bytes.len()) as *mut u8;
    if !dst.is_null() {
        // SAFETY: dst has room for bytes.len() bytes
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
    }
    dst
}
