use std::cell::RefCell;
use std::ffi::CString;
use std::fmt;

use qs_session::SessionError;

use crate::types::QSStatus;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for later retrieval via `qs_last_error`.
pub fn set_last_error(msg: impl fmt::Display) {
    // Interior NULs would truncate the message on the C side.
    let text = msg.to_string().replace('\0', " ");
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(text).ok();
    });
}

/// Take the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Record `err` and map it to the status returned across the boundary.
pub fn report(err: &SessionError) -> QSStatus {
    set_last_error(err);
    match err {
        SessionError::Model(_) => QSStatus::ErrorModelLoad,
        SessionError::SessionNotReady { .. } => QSStatus::ErrorNotReady,
        SessionError::PositionContractViolation { .. } | SessionError::EmptyPrompt => {
            QSStatus::ErrorInvalidArgument
        }
        SessionError::ContextExhausted { .. } | SessionError::Engine(_) => QSStatus::ErrorGenerate,
    }
}
