mod context;
mod error;
mod types;

pub use context::*;
pub use error::*;
pub use types::*;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;
use std::path::Path;

use qs_session::Session;

/// Execute a closure that returns a `QSStatus`, catching any panics
/// and converting them into `QSStatus::ErrorInternal`.
///
/// A session that panicked mid-call should be destroyed, not reused.
fn catch_panic<F: FnOnce() -> QSStatus>(f: F) -> QSStatus {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(_) => {
            set_last_error("internal panic");
            QSStatus::ErrorInternal
        }
    }
}

/// Install a `tracing` subscriber that writes to stderr.
///
/// The filter comes from `RUST_LOG`, defaulting to `info` for the qs crates.
/// Calling this more than once, or after the host installed its own
/// subscriber, is harmless and returns `QSStatus::Ok`.
#[no_mangle]
pub extern "C" fn qs_init_logging() -> QSStatus {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    catch_panic(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "qs_model=info,qs_session=info,qs_ffi=info".into());
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
        QSStatus::Ok
    })
}

/// Create a runtime.
///
/// On success, writes a heap-allocated `QSRuntime` pointer into `*runtime_out`.
/// The caller must later call `qs_runtime_destroy`.
#[no_mangle]
pub extern "C" fn qs_runtime_create(runtime_out: *mut *mut QSRuntime) -> QSStatus {
    catch_panic(|| {
        if runtime_out.is_null() {
            set_last_error("runtime_out is null");
            return QSStatus::ErrorInvalidArgument;
        }
        let runtime = Box::new(QSRuntime::new());
        unsafe {
            *runtime_out = Box::into_raw(runtime);
        }
        QSStatus::Ok
    })
}

/// Destroy a runtime. Sessions opened through it stay valid.
///
/// Passing a null pointer is a no-op and returns `QSStatus::Ok`.
///
/// # Safety
/// `runtime` must be null or a pointer from `qs_runtime_create` that has not
/// been destroyed yet.
#[no_mangle]
pub unsafe extern "C" fn qs_runtime_destroy(runtime: *mut QSRuntime) -> QSStatus {
    if runtime.is_null() {
        return QSStatus::Ok;
    }
    drop(Box::from_raw(runtime));
    QSStatus::Ok
}

/// Open a session on the model directory at `model_dir`
/// (`config.json` plus `*.safetensors` shards).
///
/// # Safety
/// `runtime` must come from `qs_runtime_create`; `model_dir` must be a valid
/// NUL-terminated string; `session_out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn qs_session_open(
    runtime: *const QSRuntime,
    model_dir: *const c_char,
    session_out: *mut *mut QSSession,
) -> QSStatus {
    catch_panic(|| {
        if runtime.is_null() || model_dir.is_null() || session_out.is_null() {
            set_last_error("null argument");
            return QSStatus::ErrorInvalidArgument;
        }
        let runtime = unsafe { &*runtime };
        let dir = match unsafe { CStr::from_ptr(model_dir) }.to_str() {
            Ok(s) => s,
            Err(e) => {
                set_last_error(format!("invalid path: {}", e));
                return QSStatus::ErrorInvalidArgument;
            }
        };

        match Session::open(Path::new(dir), &runtime.factory) {
            Ok(session) => {
                let handle = Box::new(QSSession { session });
                unsafe {
                    *session_out = Box::into_raw(handle);
                }
                QSStatus::Ok
            }
            Err(e) => report(&e),
        }
    })
}

/// Destroy a session and release its engine.
///
/// Passing a null pointer is a no-op and returns `QSStatus::Ok`.
///
/// # Safety
/// `session` must be null or a pointer from `qs_session_open` that has not
/// been destroyed yet.
#[no_mangle]
pub unsafe extern "C" fn qs_session_destroy(session: *mut QSSession) -> QSStatus {
    if session.is_null() {
        return QSStatus::Ok;
    }
    drop(Box::from_raw(session));
    QSStatus::Ok
}

/// Rewind the session to position 0 and clear the engine's cache.
///
/// # Safety
/// `session` must be a live pointer from `qs_session_open`.
#[no_mangle]
pub unsafe extern "C" fn qs_session_reset(session: *mut QSSession) -> QSStatus {
    catch_panic(|| {
        if session.is_null() {
            set_last_error("session is null");
            return QSStatus::ErrorInvalidArgument;
        }
        let session = unsafe { &mut *session };
        match session.session.reset() {
            Ok(()) => QSStatus::Ok,
            Err(e) => report(&e),
        }
    })
}

/// Run one forward step. `position` must equal the number of forward calls
/// since the last reset.
///
/// # Safety
/// `session` must be a live pointer from `qs_session_open`; `token_out` must
/// be writable.
#[no_mangle]
pub unsafe extern "C" fn qs_forward(
    session: *mut QSSession,
    token: u32,
    position: u32,
    token_out: *mut u32,
) -> QSStatus {
    catch_panic(|| {
        if session.is_null() || token_out.is_null() {
            set_last_error("null argument");
            return QSStatus::ErrorInvalidArgument;
        }
        let session = unsafe { &mut *session };
        match session.session.forward(token, position as usize) {
            Ok(next) => {
                unsafe { *token_out = next };
                QSStatus::Ok
            }
            Err(e) => report(&e),
        }
    })
}

/// Default generation parameters: greedy, 200 new tokens, no stop token.
#[no_mangle]
pub extern "C" fn qs_generate_params_default() -> QSGenerateParams {
    QSGenerateParams::default()
}

/// Generate a continuation of `prompt` into the caller's buffer.
///
/// At most `out_capacity` tokens are produced. `*out_len` receives the number
/// of tokens written, also when generation fails part way. A null `params`
/// uses `qs_generate_params_default()`.
///
/// # Safety
/// `session` must be a live pointer from `qs_session_open`; `prompt` must
/// point to `prompt_len` tokens; `out_tokens` must have room for
/// `out_capacity` tokens; `out_len` must be writable.
#[no_mangle]
pub unsafe extern "C" fn qs_generate(
    session: *mut QSSession,
    prompt: *const u32,
    prompt_len: usize,
    params: *const QSGenerateParams,
    out_tokens: *mut u32,
    out_capacity: usize,
    out_len: *mut usize,
) -> QSStatus {
    catch_panic(|| {
        if session.is_null() || prompt.is_null() || out_tokens.is_null() || out_len.is_null() {
            set_last_error("null argument");
            return QSStatus::ErrorInvalidArgument;
        }
        unsafe { *out_len = 0 };

        let session = unsafe { &mut *session };
        let prompt = unsafe { std::slice::from_raw_parts(prompt, prompt_len) };
        let params = if params.is_null() {
            QSGenerateParams::default()
        } else {
            unsafe { *params }
        };
        let params = params.to_generate_params(out_capacity);

        let (tokens, status) = match session.session.generate(prompt, &params) {
            Ok(tokens) => (tokens, QSStatus::Ok),
            Err(e) => {
                let status = report(&e.source);
                (e.produced, status)
            }
        };

        let n = tokens.len().min(out_capacity);
        let out = unsafe { std::slice::from_raw_parts_mut(out_tokens, out_capacity) };
        out[..n].copy_from_slice(&tokens[..n]);
        unsafe { *out_len = n };
        status
    })
}

/// Retrieve the last error message of the calling thread.
///
/// Returns null if no error has occurred. The caller must free the returned
/// string with `qs_free_string`.
#[no_mangle]
pub extern "C" fn qs_last_error() -> *mut c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null_mut(),
    }
}

/// Free a string previously returned by `qs_last_error`.
///
/// # Safety
/// `s` must be null or a pointer returned by `qs_last_error`, freed once.
#[no_mangle]
pub unsafe extern "C" fn qs_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
