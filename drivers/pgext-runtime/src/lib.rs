/*
 *  PgExt Runtime
 *
 *  The subset of server symbols a compiled Postgres extension calls back
 *  into, for use outside a running server.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 */

//! # PgExt companion runtime
//!
//! Extensions are linked against the server binary and leave its symbols
//! undefined. The `pgext` host maps this library into the global symbol
//! namespace before loading any extension, so those references bind here.
//!
//! ## Exported symbols
//!
//! - Error reporting: `errstart`, `errstart_cold`, `errcode`, `errmsg`,
//!   `errmsg_internal`, `errdetail`, `errhint`, `errfinish`
//! - Memory: `palloc`, `palloc0`, `palloc_extended`, `MemoryContextAlloc`,
//!   `MemoryContextAllocZero`, `MemoryContextAllocExtended`, `repalloc`,
//!   `pfree`, `CurrentMemoryContext`, `TopMemoryContext`
//! - Types: `pg_detoast_datum`, `pg_detoast_datum_packed`, `text_to_cstring`,
//!   `cstring_to_text`, `cstring_to_text_with_len`, `uuid_in`, `uuid_out`
//! - fmgr: `DirectFunctionCall1Coll`
//! - Host contract: `pgext_runtime_install_sink`, `pgext_runtime_abi_version`
//!
//! ## Reduced fidelity
//!
//! - Memory contexts are ignored; every allocation is `malloc` and is never
//!   reclaimed behind the caller's back.
//! - `errfinish` returns at ERROR and above instead of unwinding the call.
//! - `errmsg` and friends expand integer and string arguments only, and none
//!   at all on Apple arm64 (see `format.rs`).
//! - `text_to_cstring` does not decompress or fetch TOASTed values.

mod elog;
mod ffi;
mod fmgr;
mod format;
mod memory;
mod uuid;
mod varlena;

pub use elog::{errfinish, errstart, pgext_runtime_abi_version, pgext_runtime_install_sink};
pub use fmgr::DirectFunctionCall1Coll;
pub use memory::{palloc, palloc0, pfree};

/// Serializes unit tests that raise reports
#[cfg(test)]
pub(crate) static REPORT_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
