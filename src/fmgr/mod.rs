/*
 *  fmgr/mod.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Function manager emulation
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

//! The server's function manager (fmgr) calls every C function with a
//! single pointer to a `FunctionCallInfoBaseData` frame and receives one
//! Datum back, with nullness reported through the frame.
//!
//! - `ffi.rs` - `#[repr(C)]` layouts of the frame and the magic records
//! - `datum.rs` - Datum provenance and conversion helpers
//! - `call.rs` - the call adapter

pub mod call;
pub mod datum;
pub mod ffi;

pub use call::{CallAdapter, CallArg, CallPolicy, CallRequest, CallResult};
pub use datum::{DatumLedger, Provenance, TaggedDatum};
pub use ffi::{Datum, FUNC_MAX_ARGS, FunctionCallInfoBaseData, NullableDatum, PgFunction};
