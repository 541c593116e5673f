use core::ffi::{c_int, c_long, c_ulong};
use core::fmt;
use core::ptr;
use std::cell::RefCell;
use std::collections::VecDeque;

use rustls::AlertDescription;

use crate::constants::{self, SSL_ERROR_SSL, SSL_ERROR_SYSCALL, SSL_ERROR_WANT_READ};
use crate::constants::{SSL_ERROR_WANT_WRITE, SSL_ERROR_ZERO_RETURN};

// Packing follows openssl/err.h so codes read the same in `ERR_error_string_n`
// output as the library this replaces.

#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(i32)]
enum Lib {
    /// This is `ERR_LIB_SSL`.
    Ssl = 20,

    /// This is `ERR_LIB_USER`.
    User = 128,
}

const ERR_LIB_OFFSET: u32 = 23;
const ERR_REASON_MASK: c_ulong = 0x7f_ffff;
const ERR_RFLAGS_OFFSET: i32 = 18;
const ERR_RFLAG_FATAL: i32 = 0x1 << ERR_RFLAGS_OFFSET;
const ERR_RFLAG_COMMON: i32 = 0x2 << ERR_RFLAGS_OFFSET;

/// OpenSSL keeps at most this many entries per thread.
const ERR_NUM_ERRORS: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Reason {
    PassedNullParameter,
    InternalError,
    OperationFailed,
    Unsupported,
    WantRead,
    WantWrite,
    /// The peer closed the connection with `close_notify`.
    ZeroReturn,
    /// The transport failed or hit EOF without `close_notify`.
    Syscall,
    /// We detected a fatal condition and sent this alert.
    Alert(AlertDescription),
    /// The peer sent this fatal alert.
    AlertReceived(AlertDescription),
}

impl From<Reason> for c_int {
    fn from(r: Reason) -> Self {
        use Reason::*;
        match r {
            // see `err.h.in` for magic numbers.
            PassedNullParameter => ERR_RFLAG_FATAL | ERR_RFLAG_COMMON | 258,
            InternalError => ERR_RFLAG_FATAL | ERR_RFLAG_COMMON | 259,
            OperationFailed => ERR_RFLAG_FATAL | ERR_RFLAG_COMMON | 263,
            Unsupported => ERR_RFLAG_COMMON | 268,
            WantRead | WantWrite | ZeroReturn => 0,
            Syscall => ERR_RFLAG_COMMON | 2,
            // `sslerr.h`
            Alert(alert) | AlertReceived(alert) => 1000 + c_int::from(u8::from(alert)),
        }
    }
}

#[derive(Debug)]
pub struct Error {
    lib: Lib,
    reason: Reason,
    string: Option<String>,
}

impl Error {
    pub fn unexpected_panic() -> Self {
        Self {
            lib: Lib::Ssl,
            reason: Reason::InternalError,
            string: None,
        }
    }

    pub fn null_pointer() -> Self {
        Self {
            lib: Lib::Ssl,
            reason: Reason::PassedNullParameter,
            string: None,
        }
    }

    pub fn cannot_lock() -> Self {
        Self::internal("cannot lock object: poisoned by an earlier panic")
    }

    pub fn not_supported(hint: &str) -> Self {
        Self {
            lib: Lib::Ssl,
            reason: Reason::Unsupported,
            string: Some(hint.to_string()),
        }
    }

    pub fn bad_data(hint: &str) -> Self {
        Self {
            lib: Lib::Ssl,
            reason: Reason::OperationFailed,
            string: Some(hint.to_string()),
        }
    }

    pub fn internal(hint: &str) -> Self {
        Self {
            lib: Lib::Ssl,
            reason: Reason::InternalError,
            string: Some(hint.to_string()),
        }
    }

    /// A protocol failure that must be reported to the peer with `alert`.
    pub fn alert(alert: AlertDescription, hint: &str) -> Self {
        Self {
            lib: Lib::Ssl,
            reason: Reason::Alert(alert),
            string: Some(format!("{hint} (sending {alert:?})")),
        }
    }

    pub fn alert_received(alert: AlertDescription) -> Self {
        Self {
            lib: Lib::Ssl,
            reason: Reason::AlertReceived(alert),
            string: Some(format!("SSL alert number {}", u8::from(alert))),
        }
    }

    pub fn want_read() -> Self {
        Self {
            lib: Lib::Ssl,
            reason: Reason::WantRead,
            string: None,
        }
    }

    pub fn want_write() -> Self {
        Self {
            lib: Lib::Ssl,
            reason: Reason::WantWrite,
            string: None,
        }
    }

    pub fn zero_return() -> Self {
        Self {
            lib: Lib::Ssl,
            reason: Reason::ZeroReturn,
            string: None,
        }
    }

    pub fn syscall(hint: &str) -> Self {
        Self {
            lib: Lib::User,
            reason: Reason::Syscall,
            string: Some(hint.to_string()),
        }
    }

    pub fn from_io(err: std::io::Error) -> Self {
        Self::syscall(&err.to_string())
    }

    /// The alert this error obliges us to send, if any.
    pub fn alert_to_send(&self) -> Option<AlertDescription> {
        match self.reason {
            Reason::Alert(alert) => Some(alert),
            _ => None,
        }
    }

    /// The `SSL_ERROR_*` class reported by `SSL_get_error`.
    pub fn ssl_error_code(&self) -> c_int {
        match self.reason {
            Reason::WantRead => SSL_ERROR_WANT_READ,
            Reason::WantWrite => SSL_ERROR_WANT_WRITE,
            Reason::ZeroReturn => SSL_ERROR_ZERO_RETURN,
            Reason::Syscall => SSL_ERROR_SYSCALL,
            _ => SSL_ERROR_SSL,
        }
    }

    /// Whether this error can be retried once the transport is ready.
    pub fn is_retryable(&self) -> bool {
        matches!(self.reason, Reason::WantRead | Reason::WantWrite)
    }

    /// Add this error to the thread's error queue.
    pub fn raise(self) -> Self {
        if self.quiet() {
            return self;
        }

        log::error!("raising {self:?}");
        push_error(QueuedError {
            code: self.packed(),
            string: self.string.clone(),
        });
        self
    }

    /// Retry and orderly-close conditions never make it on the error queue.
    ///
    /// They are usual in the use of non-blocking sockets.
    fn quiet(&self) -> bool {
        matches!(
            self.reason,
            Reason::WantRead | Reason::WantWrite | Reason::ZeroReturn
        )
    }

    fn packed(&self) -> c_ulong {
        let reason = c_int::from(self.reason) as c_ulong & ERR_REASON_MASK;
        ((self.lib as c_ulong) << ERR_LIB_OFFSET) | reason
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.string {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "{:?}", self.reason),
        }
    }
}

impl std::error::Error for Error {}

struct QueuedError {
    code: c_ulong,
    string: Option<String>,
}

thread_local! {
    static ERROR_QUEUE: RefCell<VecDeque<QueuedError>> = const { RefCell::new(VecDeque::new()) };
}

fn push_error(err: QueuedError) {
    let _ = ERROR_QUEUE.try_with(|q| {
        let mut q = q.borrow_mut();
        if q.len() == ERR_NUM_ERRORS {
            q.pop_front();
        }
        q.push_back(err);
    });
}

/// Removes and returns the oldest queued error code, or 0.
pub fn get_error() -> c_ulong {
    ERROR_QUEUE
        .try_with(|q| q.borrow_mut().pop_front().map(|e| e.code))
        .ok()
        .flatten()
        .unwrap_or(0)
}

pub fn peek_error() -> c_ulong {
    ERROR_QUEUE
        .try_with(|q| q.borrow().front().map(|e| e.code))
        .ok()
        .flatten()
        .unwrap_or(0)
}

/// The detail string recorded with the oldest queued error.
pub fn peek_error_string() -> Option<String> {
    ERROR_QUEUE
        .try_with(|q| q.borrow().front().and_then(|e| e.string.clone()))
        .ok()
        .flatten()
}

pub fn clear_errors() {
    let _ = ERROR_QUEUE.try_with(|q| q.borrow_mut().clear());
}

/// Renders `code` the way `ERR_error_string_n` does:
/// `error:<code>:<library>::<reason>`.
pub fn error_string(code: c_ulong) -> String {
    let lib = (code >> ERR_LIB_OFFSET) as c_int;
    let reason = (code & ERR_REASON_MASK) as c_int;
    let lib_name = match lib {
        l if l == Lib::Ssl as c_int => "SSL routines",
        l if l == Lib::User as c_int => "user library",
        _ => "unknown library",
    };
    format!("error:{code:08X}:{lib_name}::{}", reason_string(reason))
}

fn reason_string(reason: c_int) -> String {
    let plain = reason & ((1 << ERR_RFLAGS_OFFSET) - 1);
    match plain {
        258 => "passed a null parameter".into(),
        259 => "internal error".into(),
        263 => "operation fail".into(),
        268 => "unsupported".into(),
        2 => "system lib".into(),
        1000..=1255 => format!(
            "ssl/tls alert {}",
            constants::alert_desc_to_long_string(plain - 1000)
                .to_string_lossy()
                .to_lowercase()
        ),
        other => format!("reason({other})"),
    }
}

// These conversions determine how errors are reported from entry point
// functions.

impl<T> From<Error> for *const T {
    fn from(_: Error) -> Self {
        ptr::null()
    }
}

impl<T> From<Error> for *mut T {
    fn from(_: Error) -> Self {
        ptr::null_mut()
    }
}

impl From<Error> for c_int {
    fn from(_: Error) -> Self {
        // for typical OpenSSL functions (return 0 on error)
        0
    }
}

impl From<Error> for usize {
    fn from(_: Error) -> Self {
        // ditto
        0
    }
}

impl From<Error> for c_long {
    fn from(_: Error) -> Self {
        // ditto
        0
    }
}

impl From<Error> for c_ulong {
    fn from(_: Error) -> Self {
        // for `ERR_get_error` and `ERR_peek_error`: an empty queue
        0
    }
}

impl From<Error> for u32 {
    fn from(_: Error) -> Self {
        // for `SSL_CIPHER_get_id`
        0
    }
}

impl From<Error> for u16 {
    fn from(_: Error) -> Self {
        // for `SSL_CIPHER_get_protocol_id`
        0
    }
}

impl From<Error> for () {
    fn from(_: Error) {
        // for void functions (return early on error)
    }
}

#[macro_export]
macro_rules! ffi_panic_boundary {
    ( $($tt:tt)* ) => {
        match ::std::panic::catch_unwind(
            ::std::panic::AssertUnwindSafe(|| {
                $($tt)*
        })) {
            Ok(ret) => ret,
            Err(_) => return $crate::error::Error::unexpected_panic()
                .raise()
                .into(),
        }
    }
}

pub(crate) use ffi_panic_boundary;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn queue_is_fifo_and_bounded() {
        clear_errors();
        for _ in 0..ERR_NUM_ERRORS + 4 {
            Error::bad_data("one").raise();
        }
        Error::null_pointer().raise();

        let mut seen = 0;
        let mut last = 0;
        loop {
            let code = get_error();
            if code == 0 {
                break;
            }
            last = code;
            seen += 1;
        }
        assert_eq!(seen, ERR_NUM_ERRORS);
        assert_eq!(last, Error::null_pointer().packed());
    }

    #[test]
    fn retry_conditions_are_not_queued() {
        clear_errors();
        Error::want_read().raise();
        Error::want_write().raise();
        Error::zero_return().raise();
        assert_eq!(peek_error(), 0);
    }

    #[test]
    fn alert_errors_render_their_description() {
        clear_errors();
        Error::alert(AlertDescription::BadRecordMac, "mac mismatch").raise();
        let code = peek_error();
        assert_eq!(code & ERR_REASON_MASK, 1020);
        assert_eq!(
            error_string(code),
            "error:0A0003FC:SSL routines::ssl/tls alert bad record mac"
        );
        assert_eq!(
            peek_error_string().as_deref(),
            Some("mac mismatch (sending BadRecordMac)")
        );
        clear_errors();
    }

    #[test]
    fn failure_values() {
        clear_errors();
        assert_eq!(c_ulong::from(Error::null_pointer()), 0);
        assert_eq!(c_int::from(Error::null_pointer()), 0);
        assert_eq!(c_long::from(Error::null_pointer()), 0);
        assert!(<*const u8>::from(Error::null_pointer()).is_null());
        // converting does not raise
        assert_eq!(peek_error(), 0);
    }

    #[test]
    fn error_classes() {
        assert_eq!(Error::want_read().ssl_error_code(), SSL_ERROR_WANT_READ);
        assert_eq!(Error::want_write().ssl_error_code(), SSL_ERROR_WANT_WRITE);
        assert_eq!(Error::zero_return().ssl_error_code(), SSL_ERROR_ZERO_RETURN);
        assert_eq!(Error::syscall("eof").ssl_error_code(), SSL_ERROR_SYSCALL);
        assert_eq!(
            Error::alert_received(AlertDescription::HandshakeFailure).ssl_error_code(),
            SSL_ERROR_SSL
        );
        assert_eq!(
            Error::alert(AlertDescription::UnknownCA, "x").alert_to_send(),
            Some(AlertDescription::UnknownCA)
        );
    }
}
