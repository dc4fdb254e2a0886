/*
 *  fmgr/call.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Call adapter - drives an fmgr V1 function through a call frame
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

use log::{debug, warn};

use crate::diagnostics;
use crate::error::{ExtensionError, Result};
use crate::loader::ExportedFunction;
use super::ffi::{Datum, FUNC_MAX_ARGS, FunctionCallInfoBaseData, Oid, PgFunction};

/// Result word and null flag read back from the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallResult {
    pub datum: Datum,
    /// False when the callee set the frame's null flag; `datum` must then not
    /// be dereferenced whatever its bits are
    pub is_not_null: bool,
}

/// One argument of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallArg {
    pub value: Datum,
    pub is_null: bool,
}

impl CallArg {
    pub fn value(value: Datum) -> Self {
        Self { value, is_null: false }
    }

    pub fn null() -> Self {
        Self { value: 0, is_null: true }
    }
}

/// Arguments and collation of a call
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub collation: Oid,
    pub args: Vec<CallArg>,
}

impl CallRequest {
    pub fn new(args: Vec<CallArg>) -> Self {
        Self { collation: 0, args }
    }

    pub fn with_collation(mut self, collation: Oid) -> Self {
        self.collation = collation;
        self
    }
}

/// What to do when the callee raises an ERROR report through the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallPolicy {
    /// Log the report and return the callee's result
    #[default]
    Log,

    /// Turn the report into `CallFailure`
    Fail,
}

/// Builds call frames and invokes resolved functions
#[derive(Debug, Clone, Copy, Default)]
pub struct CallAdapter {
    policy: CallPolicy,
}

impl CallAdapter {
    pub fn new(policy: CallPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CallPolicy {
        self.policy
    }

    /// Direct call with one non-null argument and no collation.
    ///
    /// # Safety
    /// The library `function` came from must still be open and the function
    /// must follow the fmgr V1 convention for the argument it is given.
    pub unsafe fn invoke(&self, function: &ExportedFunction, arg: Datum) -> Result<CallResult> {
        // SAFETY: forwarded caller contract
        unsafe { self.invoke_with(function, &CallRequest::new(vec![CallArg::value(arg)])) }
    }

    /// Direct call with no arguments.
    ///
    /// # Safety
    /// Same as [`CallAdapter::invoke`].
    pub unsafe fn invoke0(&self, function: &ExportedFunction) -> Result<CallResult> {
        // SAFETY: forwarded caller contract
        unsafe { self.invoke_with(function, &CallRequest::default()) }
    }

    /// General direct call with up to `FUNC_MAX_ARGS` arguments.
    ///
    /// # Safety
    /// Same as [`CallAdapter::invoke`].
    pub unsafe fn invoke_with(&self, function: &ExportedFunction, request: &CallRequest) -> Result<CallResult> {
        if function.address() == 0 {
            return Err(ExtensionError::CallFailure {
                function: function.name().to_string(),
                message: "function address is null".to_string(),
            });
        }
        if request.args.len() > FUNC_MAX_ARGS {
            return Err(ExtensionError::CallFailure {
                function: function.name().to_string(),
                message: format!(
                    "{} arguments exceed the maximum of {}",
                    request.args.len(),
                    FUNC_MAX_ARGS
                ),
            });
        }

        let first_report = diagnostics::report_sequence();
        // SAFETY: address is non-null and the caller vouches for the signature
        let result = unsafe { call_frame(function.as_pg_function(), request) };
        debug!(
            "{}({} args) -> {:#x}{}",
            function.name(),
            request.args.len(),
            result.datum,
            if result.is_not_null { "" } else { " [null]" }
        );

        if let Some(report) = diagnostics::last_error_since(first_report) {
            match self.policy {
                CallPolicy::Log => {
                    warn!("{} raised {} during the call; returning its result anyway",
                        function.name(), diagnostics::level_name(report.level));
                }
                CallPolicy::Fail => {
                    return Err(ExtensionError::CallFailure {
                        function: function.name().to_string(),
                        message: report.message,
                    });
                }
            }
        }
        Ok(result)
    }
}

/// Builds a zero-filled frame, fills in the request, calls `function` through
/// it and reads back the result. The frame is freed on return.
///
/// # Safety
/// `function` must be a live fmgr V1 function and `request.args.len()` must
/// not exceed `FUNC_MAX_ARGS`.
pub unsafe fn call_frame(function: PgFunction, request: &CallRequest) -> CallResult {
    // Every slot past nargs stays zero as well, not just the fields set below
    // SAFETY: all-zero bits are a valid frame (null pointers, false, zero)
    let mut frame: Box<FunctionCallInfoBaseData> = unsafe { Box::new_zeroed().assume_init() };

    frame.isnull = false;
    frame.fncollation = request.collation;
    frame.nargs = request.args.len() as i16;
    // Field stores keep the zeroed padding of each slot intact
    for (slot, arg) in frame.args.iter_mut().zip(&request.args) {
        slot.value = arg.value;
        slot.isnull = arg.is_null;
    }

    let frame_ptr: *mut FunctionCallInfoBaseData = &mut *frame;
    // SAFETY: frame outlives the call; the caller vouches for the function
    let datum = unsafe { function(frame_ptr) };

    CallResult {
        datum,
        is_not_null: !frame.isnull,
    }
}
