/*
 *  PgExt Runtime - Direct Calls
 *
 *  DirectFunctionCall1Coll for extensions calling other fmgr functions
 */

#![allow(non_snake_case)]

use crate::elog::{report, ERROR, WARNING};
use crate::ffi::{Datum, FunctionCallInfoBaseData, Oid, PgFunction};

/// Calls `function` with one non-null argument through a fresh zeroed frame.
///
/// The server raises an ERROR when the callee returns null; here that is a
/// WARNING and the raw result word is returned.
///
/// # Safety
/// `function` must be an fmgr V1 function accepting `arg1`.
#[no_mangle]
pub unsafe extern "C" fn DirectFunctionCall1Coll(function: Option<PgFunction>, collation: Oid, arg1: Datum) -> Datum {
    let Some(function) = function else {
        report(ERROR, "DirectFunctionCall1Coll called with a null function");
        return 0;
    };

    // SAFETY: all-zero bits are a valid frame
    let mut frame: Box<FunctionCallInfoBaseData> = Box::new_zeroed().assume_init();
    frame.fncollation = collation;
    frame.nargs = 1;
    frame.args[0].value = arg1;
    frame.args[0].isnull = false;

    let result = function(&mut *frame);
    if frame.isnull {
        report(WARNING, &format!("function {:p} returned NULL", function as *const ()));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::pfree;
    use crate::uuid::{uuid_in, uuid_out};
    use std::ffi::{c_void, CStr};

    unsafe extern "C" fn frame_echo(fcinfo: *mut FunctionCallInfoBaseData) -> Datum {
        let fcinfo = &*fcinfo;
        let dirty = fcinfo.args[1..].iter().filter(|a| a.value != 0 || a.isnull).count();
        (fcinfo.args[0].value + 1) * 1000 + (fcinfo.fncollation as usize) * 10 + dirty
    }

    #[test]
    fn test_frame_is_clean() {
        let result = unsafe { DirectFunctionCall1Coll(Some(frame_echo), 7, 41) };
        assert_eq!(result, 42 * 1000 + 70);
    }

    #[test]
    fn test_uuid_round_trip() {
        let _serial = crate::REPORT_TEST_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let input = c"{A0EEBC99-9C0B-4EF8-BB6D-6BB9BD380A11}";
        unsafe {
            let bytes = DirectFunctionCall1Coll(Some(uuid_in), 0, input.as_ptr() as Datum);
            assert_ne!(bytes, 0);
            let text = DirectFunctionCall1Coll(Some(uuid_out), 0, bytes);
            assert_eq!(
                CStr::from_ptr(text as *const _).to_str().unwrap(),
                "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"
            );
            pfree(bytes as *mut c_void);
            pfree(text as *mut c_void);

            let bad = DirectFunctionCall1Coll(Some(uuid_in), 0, c"not-a-uuid".as_ptr() as Datum);
            assert_eq!(bad, 0);
        }
    }
}
