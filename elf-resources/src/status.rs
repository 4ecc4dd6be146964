// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-thread record of the most recent operation outcome.
//!
//! Every public operation on [crate::ResourceFile] returns a [crate::Result].
//! In addition, the outcome is mirrored into a thread-local slot so callers
//! ported from status-code based APIs can ask "what went wrong last?" without
//! threading the error value around. Each operation overwrites the slot.
//! Operations on different threads never observe each other's status.

use {
    crate::error::{ElfResourceError, StatusCode},
    std::cell::RefCell,
};

/// Outcome of the most recent operation on the current thread.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Status {
    /// Numeric status code.
    pub code: StatusCode,
    /// Human readable description. `None` on success.
    pub message: Option<String>,
    /// Name of the operation that produced this status.
    pub function: &'static str,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

thread_local! {
    static LAST_STATUS: RefCell<Option<Status>> = RefCell::new(None);
}

fn set(status: Status) {
    LAST_STATUS.with(|slot| {
        slot.replace(Some(status));
    });
}

/// Record the outcome of `function` and hand the result back unchanged.
pub(crate) fn record<T>(
    function: &'static str,
    result: Result<T, ElfResourceError>,
) -> Result<T, ElfResourceError> {
    match &result {
        Ok(_) => set(Status {
            code: StatusCode::Ok,
            message: None,
            function,
        }),
        Err(e) => set(Status {
            code: e.code(),
            message: Some(e.to_string()),
            function,
        }),
    }

    result
}

/// The status recorded by the last operation on this thread, if any.
pub fn last_error() -> Option<Status> {
    LAST_STATUS.with(|slot| slot.borrow().clone())
}

/// The status code of the last operation on this thread.
///
/// Returns [StatusCode::Ok] if nothing has been recorded yet.
pub fn last_error_code() -> StatusCode {
    last_error().map(|s| s.code).unwrap_or(StatusCode::Ok)
}

/// The message of the last failed operation on this thread.
pub fn last_error_message() -> Option<String> {
    last_error().and_then(|s| s.message)
}
