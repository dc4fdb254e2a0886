/*
 *  diagnostics.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Host end of the runtime's error reporting channel
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

//! Extensions report problems with `ereport`, which the companion runtime
//! turns into one call of the sink installed here per `errfinish`. Reports
//! are logged and a short history is kept for inspection. The latest ERROR
//! is also held outside the history, so a call that raises an ERROR and then
//! floods the history with lesser reports is still seen as failed.
//!
//! The runtime keeps a single process-wide report slot, so two extension
//! calls reporting at the same time on different threads can interleave
//! their messages. That is a known limitation, not something fixed here.

use std::collections::VecDeque;
use std::ffi::{CStr, c_char, c_int};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

// Error levels from elog.h (server 14 and later numbering)
pub const DEBUG5: c_int = 10;
pub const DEBUG1: c_int = 14;
pub const LOG: c_int = 15;
pub const INFO: c_int = 17;
pub const NOTICE: c_int = 18;
pub const WARNING: c_int = 19;
pub const ERROR: c_int = 21;
pub const FATAL: c_int = 22;
pub const PANIC: c_int = 23;

const HISTORY_LIMIT: usize = 32;

/// One finished `ereport`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub level: c_int,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Position in the process-wide report stream, starting at 1
    pub sequence: u64,
}

impl ErrorReport {
    pub fn is_error(&self) -> bool {
        self.level >= ERROR
    }
}

struct ReportLog {
    next_sequence: u64,
    history: VecDeque<ErrorReport>,
    last_error: Option<ErrorReport>,
}

static REPORTS: Mutex<ReportLog> = Mutex::new(ReportLog {
    next_sequence: 1,
    history: VecDeque::new(),
    last_error: None,
});

/// Serializes unit tests that depend on the shape of the report history
#[cfg(test)]
pub(crate) static REPORT_TEST_LOCK: Mutex<()> = Mutex::new(());

/// Server name of an error level, as printed in its log lines
pub fn level_name(level: c_int) -> &'static str {
    match level {
        DEBUG5..=DEBUG1 => "DEBUG",
        LOG | 16 => "LOG",
        INFO => "INFO",
        NOTICE => "NOTICE",
        WARNING | 20 => "WARNING",
        ERROR => "ERROR",
        FATAL => "FATAL",
        PANIC => "PANIC",
        _ => "UNKNOWN",
    }
}

/// Record a report and log it at the matching level
pub fn record(level: c_int, message: String, detail: Option<String>, hint: Option<String>) -> ErrorReport {
    let report = {
        let mut log = REPORTS.lock();
        let report = ErrorReport {
            level,
            message,
            detail,
            hint,
            sequence: log.next_sequence,
        };
        log.next_sequence += 1;
        if log.history.len() == HISTORY_LIMIT {
            log.history.pop_front();
        }
        log.history.push_back(report.clone());
        if report.is_error() {
            log.last_error = Some(report.clone());
        }
        report
    };

    let name = level_name(level);
    let suffix = match (&report.detail, &report.hint) {
        (Some(d), Some(h)) => format!(" (detail: {d}; hint: {h})"),
        (Some(d), None) => format!(" (detail: {d})"),
        (None, Some(h)) => format!(" (hint: {h})"),
        (None, None) => String::new(),
    };
    match level {
        l if l >= ERROR => error!("Postgres {}: {}{}", name, report.message, suffix),
        WARNING | 20 => warn!("Postgres {}: {}{}", name, report.message, suffix),
        LOG..=NOTICE => info!("Postgres {}: {}{}", name, report.message, suffix),
        _ => debug!("Postgres {}: {}{}", name, report.message, suffix),
    }
    report
}

/// Sequence number the next report will receive
pub fn report_sequence() -> u64 {
    REPORTS.lock().next_sequence
}

/// The latest ERROR-or-worse report numbered at or after `sequence`, even
/// when it has since dropped out of the history
pub fn last_error_since(sequence: u64) -> Option<ErrorReport> {
    REPORTS.lock()
        .last_error
        .as_ref()
        .filter(|r| r.sequence >= sequence)
        .cloned()
}

/// Every retained report numbered at or after `sequence`, oldest first
pub fn reports_since(sequence: u64) -> Vec<ErrorReport> {
    REPORTS.lock()
        .history
        .iter()
        .filter(|r| r.sequence >= sequence)
        .cloned()
        .collect()
}

fn optional_text(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: the runtime passes NUL terminated strings valid for the call
    let text = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    if text.is_empty() { None } else { Some(text) }
}

/// Sink handed to the runtime during bootstrap
pub(crate) unsafe extern "C" fn report_sink(
    elevel: c_int,
    message: *const c_char,
    detail: *const c_char,
    hint: *const c_char,
) {
    let message = optional_text(message).unwrap_or_default();
    record(elevel, message, optional_text(detail), optional_text(hint));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_level_names() {
        assert_eq!(level_name(ERROR), "ERROR");
        assert_eq!(level_name(12), "DEBUG");
        assert_eq!(level_name(WARNING), "WARNING");
        assert_eq!(level_name(99), "UNKNOWN");
    }

    #[test]
    fn test_sink_records_reports() {
        let _serial = REPORT_TEST_LOCK.lock();
        let start = report_sequence();
        let msg = CString::new("invalid input syntax for type uuid").unwrap();
        let hint = CString::new("use 32 hex digits").unwrap();
        unsafe { report_sink(ERROR, msg.as_ptr(), std::ptr::null(), hint.as_ptr()) };

        // Other tests may report concurrently; look for ours by content
        let ours: Vec<_> = reports_since(start)
            .into_iter()
            .filter(|r| r.message == "invalid input syntax for type uuid")
            .collect();
        assert_eq!(ours.len(), 1);
        assert_eq!(ours[0].hint.as_deref(), Some("use 32 hex digits"));
        assert_eq!(ours[0].detail, None);
        assert!(last_error_since(start).is_some());
    }

    #[test]
    fn test_notice_is_not_an_error() {
        let _serial = REPORT_TEST_LOCK.lock();
        let start = report_sequence();
        let report = record(NOTICE, "relation exists, skipping".into(), None, None);
        assert!(!report.is_error());
        assert!(report.sequence >= 1);
        assert!(last_error_since(start).is_none());
    }

    #[test]
    fn test_error_outlives_history_eviction() {
        let _serial = REPORT_TEST_LOCK.lock();
        let start = report_sequence();
        let raised = record(ERROR, "division by zero".into(), None, None);
        for i in 0..HISTORY_LIMIT + 8 {
            record(NOTICE, format!("notice {i}"), None, None);
        }

        let retained = reports_since(start);
        assert_eq!(retained.len(), HISTORY_LIMIT);
        assert!(retained.iter().all(|r| !r.is_error()));
        assert_eq!(last_error_since(start), Some(raised.clone()));
        assert!(last_error_since(raised.sequence + 1).is_none());
    }
}
