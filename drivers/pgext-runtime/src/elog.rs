/*
 *  PgExt Runtime - Error Reporting
 *
 *  errstart/errmsg/errfinish and the report channel to the host
 */

//! `ereport(level, errcode(...), errmsg(...))` expands to `errstart`, one
//! call per auxiliary function, then `errfinish`. The state in between lives
//! in one process-wide slot. The slot is locked per call, not per report, so
//! reports from concurrent threads can still mix their pieces.
//!
//! A real server never returns from `errfinish` at ERROR or above; this one
//! does, and the extension carries on after the report.

use std::ffi::{c_char, c_int, CStr, CString};
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use crate::ffi::{ReportSink, RUNTIME_ABI_VERSION};
use crate::format::{expand, ARG_WORDS, VARIADIC_IN_REGISTERS};

pub const DEBUG1: c_int = 14;
pub const LOG: c_int = 15;
pub const INFO: c_int = 17;
pub const NOTICE: c_int = 18;
pub const WARNING: c_int = 19;
pub const ERROR: c_int = 21;
pub const FATAL: c_int = 22;
pub const PANIC: c_int = 23;

struct ErrorState {
    level: c_int,
    #[cfg_attr(not(feature = "debug-logging"), allow(dead_code))]
    sqlerrcode: c_int,
    message: Option<CString>,
    detail: Option<CString>,
    hint: Option<CString>,
}

impl ErrorState {
    const fn empty() -> Self {
        Self {
            level: 0,
            sqlerrcode: 0,
            message: None,
            detail: None,
            hint: None,
        }
    }
}

static STATE: Mutex<ErrorState> = Mutex::new(ErrorState::empty());
static SINK: RwLock<Option<ReportSink>> = RwLock::new(None);

fn state() -> MutexGuard<'static, ErrorState> {
    STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

fn level_name(level: c_int) -> &'static str {
    match level {
        ..=DEBUG1 => "DEBUG",
        LOG | 16 => "LOG",
        INFO => "INFO",
        NOTICE => "NOTICE",
        WARNING | 20 => "WARNING",
        ERROR => "ERROR",
        FATAL => "FATAL",
        PANIC => "PANIC",
        _ => "???",
    }
}

/// Formats one auxiliary message from the caller's format and words
unsafe fn message(fmt: *const c_char, words: [usize; ARG_WORDS]) -> Option<CString> {
    if fmt.is_null() {
        return None;
    }
    let words: &[usize] = if VARIADIC_IN_REGISTERS { &words } else { &[] };
    let text = expand(CStr::from_ptr(fmt), words);
    CString::new(text).ok()
}

/// Starts a report. Servers before 14 pass filename, line and function
/// before the domain; only `elevel` is read either way.
#[no_mangle]
pub extern "C" fn errstart(elevel: c_int, _domain: *const c_char) -> c_int {
    let mut state = state();
    *state = ErrorState::empty();
    state.level = elevel;
    1
}

#[no_mangle]
pub extern "C" fn errstart_cold(elevel: c_int, domain: *const c_char) -> c_int {
    errstart(elevel, domain)
}

#[no_mangle]
pub extern "C" fn errcode(sqlerrcode: c_int) -> c_int {
    state().sqlerrcode = sqlerrcode;
    sqlerrcode
}

/// Sets the primary message; a second call replaces the first.
///
/// # Safety
/// `fmt` is a printf format whose `%s` arguments are valid C strings.
#[no_mangle]
pub unsafe extern "C" fn errmsg(fmt: *const c_char, a0: usize, a1: usize, a2: usize, a3: usize, a4: usize) -> c_int {
    let text = message(fmt, [a0, a1, a2, a3, a4]);
    state().message = text;
    0
}

/// # Safety
/// Same as [`errmsg`].
#[no_mangle]
pub unsafe extern "C" fn errmsg_internal(fmt: *const c_char, a0: usize, a1: usize, a2: usize, a3: usize, a4: usize) -> c_int {
    errmsg(fmt, a0, a1, a2, a3, a4)
}

/// # Safety
/// Same as [`errmsg`].
#[no_mangle]
pub unsafe extern "C" fn errdetail(fmt: *const c_char, a0: usize, a1: usize, a2: usize, a3: usize, a4: usize) -> c_int {
    let text = message(fmt, [a0, a1, a2, a3, a4]);
    state().detail = text;
    0
}

/// # Safety
/// Same as [`errmsg`].
#[no_mangle]
pub unsafe extern "C" fn errhint(fmt: *const c_char, a0: usize, a1: usize, a2: usize, a3: usize, a4: usize) -> c_int {
    let text = message(fmt, [a0, a1, a2, a3, a4]);
    state().hint = text;
    0
}

/// Emits the pending report to the host sink, or to stderr when no host has
/// connected, and clears the slot. Location arguments are ignored.
#[no_mangle]
pub extern "C" fn errfinish(_filename: *const c_char, _lineno: c_int, _funcname: *const c_char) {
    let report = std::mem::replace(&mut *state(), ErrorState::empty());
    emit(report);
}

fn emit(report: ErrorState) {
    let sink = *SINK.read().unwrap_or_else(PoisonError::into_inner);
    let message = report.message.unwrap_or_default();

    #[cfg(feature = "debug-logging")]
    log::debug!("report level={} sqlstate={} {:?}", report.level, report.sqlerrcode, message);

    match sink {
        Some(sink) => {
            let as_ptr = |s: &Option<CString>| s.as_ref().map_or(std::ptr::null(), |s| s.as_ptr());
            // SAFETY: all strings outlive the call
            unsafe { sink(report.level, message.as_ptr(), as_ptr(&report.detail), as_ptr(&report.hint)) }
        }
        None => {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "Postgres {}: {}", level_name(report.level), message.to_string_lossy());
            if let Some(detail) = report.detail.as_ref() {
                let _ = writeln!(stderr, "DETAIL: {}", detail.to_string_lossy());
            }
            if let Some(hint) = report.hint.as_ref() {
                let _ = writeln!(stderr, "HINT: {}", hint.to_string_lossy());
            }
        }
    }
}

/// Raises a complete report from inside the runtime
pub(crate) fn report(level: c_int, text: &str) {
    let message = CString::new(text.replace('\0', "")).ok();
    {
        let mut state = state();
        *state = ErrorState::empty();
        state.level = level;
        state.message = message;
    }
    errfinish(std::ptr::null(), 0, std::ptr::null());
}

/// Routes every later report to `sink`; `None` falls back to stderr.
#[no_mangle]
pub extern "C" fn pgext_runtime_install_sink(sink: Option<ReportSink>) {
    *SINK.write().unwrap_or_else(PoisonError::into_inner) = sink;
}

#[no_mangle]
pub extern "C" fn pgext_runtime_abi_version() -> u32 {
    RUNTIME_ABI_VERSION
}
