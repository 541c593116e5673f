//! The exported `SSL_*`, `SSL_CTX_*`, `SSL_CIPHER_*` and `ERR_*` symbols.
//!
//! Each one checks its pointers, takes the object lock and calls into
//! [`crate::SslContext`] or [`crate::Ssl`]. Failures are raised onto the
//! error queue and turned into the return value OpenSSL callers expect.

use core::{mem, ptr};
use std::os::raw::{c_char, c_int, c_long, c_uchar, c_uint, c_ulong, c_void};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::bio::Bio;
use crate::constants::{
    alert_desc_to_long_string, alert_desc_to_short_string, alert_level_to_long_string,
    alert_level_to_short_string, SSL_ERROR_NONE, SSL_ERROR_ZERO_RETURN, TLSEXT_NAMETYPE_HOST_NAME,
    X509_V_ERR_UNSPECIFIED,
};
use crate::error::{self, ffi_panic_boundary, Error};
use crate::ffi::{
    free_arc, str_from_cstring, to_arc_mut_ptr, try_clone_arc, try_from, try_mut_slice_int,
    try_ref_from_ptr, try_slice, try_slice_int, try_str, Castable, OwnershipArc, OwnershipRef,
};
use crate::ShutdownResult;

/// Makes a entry function definition.
///
/// The body is wrapped in `ffi_panic_boundary`, the name is `#[no_mangle]`,
/// and is `extern "C"`.
macro_rules! entry {
    (pub fn $name:ident($($args:tt)*) $body:block) => {
        #[no_mangle]
        pub extern "C" fn $name($($args)*) { ffi_panic_boundary! { $body } }
    };
    (pub fn $name:ident($($args:tt)*) -> $ret:ty $body:block) => {
        #[no_mangle]
        pub extern "C" fn $name($($args)*) -> $ret { ffi_panic_boundary! { $body } }
    };
}

pub struct OpenSslInitSettings;
type OPENSSL_INIT_SETTINGS = OpenSslInitSettings;

entry! {
    pub fn OPENSSL_init_ssl(_opts: u64, settings: *const OPENSSL_INIT_SETTINGS) -> c_int {
        const VERSION: &str = env!("CARGO_PKG_VERSION");

        if !settings.is_null() {
            return Error::not_supported("settings").raise().into();
        }
        // callers may initialise any number of times
        let _ = env_logger::try_init();
        log::trace!("OPENSSL_init_ssl in kryptonssl {VERSION}");
        C_INT_SUCCESS
    }
}

entry! {
    pub fn SSL_library_init() -> c_int {
        OPENSSL_init_ssl(0, ptr::null())
    }
}

entry! {
    pub fn SSL_alert_desc_string_long(value: c_int) -> *const c_char {
        alert_desc_to_long_string(value).as_ptr()
    }
}

entry! {
    pub fn SSL_alert_desc_string(value: c_int) -> *const c_char {
        alert_desc_to_short_string(value).as_ptr()
    }
}

entry! {
    pub fn SSL_alert_type_string_long(value: c_int) -> *const c_char {
        alert_level_to_long_string(value).as_ptr()
    }
}

entry! {
    pub fn SSL_alert_type_string(value: c_int) -> *const c_char {
        alert_level_to_short_string(value).as_ptr()
    }
}

entry! {
    pub fn ERR_get_error() -> c_ulong {
        error::get_error()
    }
}

entry! {
    pub fn ERR_peek_error() -> c_ulong {
        error::peek_error()
    }
}

entry! {
    pub fn ERR_clear_error() {
        error::clear_errors();
    }
}

entry! {
    pub fn ERR_error_string_n(e: c_ulong, buf: *mut c_char, len: usize) {
        if buf.is_null() || len == 0 {
            return;
        }
        let text = error::error_string(e);
        let count = text.len().min(len - 1);
        unsafe {
            ptr::copy_nonoverlapping(text.as_ptr() as *const c_char, buf, count);
            ptr::write(buf.add(count), 0);
        }
    }
}

type SSL_METHOD = crate::SslMethod;

entry! {
    pub fn TLS_method() -> *const SSL_METHOD {
        &crate::TLS_METHOD
    }
}

entry! {
    pub fn TLS_server_method() -> *const SSL_METHOD {
        &crate::TLS_SERVER_METHOD
    }
}

entry! {
    pub fn TLS_client_method() -> *const SSL_METHOD {
        &crate::TLS_CLIENT_METHOD
    }
}

// Older names; all of them negotiate TLS 1.2.

entry! {
    pub fn SSLv23_method() -> *const SSL_METHOD {
        &crate::TLS_METHOD
    }
}

entry! {
    pub fn SSLv23_server_method() -> *const SSL_METHOD {
        &crate::TLS_SERVER_METHOD
    }
}

entry! {
    pub fn SSLv23_client_method() -> *const SSL_METHOD {
        &crate::TLS_CLIENT_METHOD
    }
}

entry! {
    pub fn TLSv1_2_method() -> *const SSL_METHOD {
        &crate::TLS_METHOD
    }
}

entry! {
    pub fn TLSv1_2_server_method() -> *const SSL_METHOD {
        &crate::TLS_SERVER_METHOD
    }
}

entry! {
    pub fn TLSv1_2_client_method() -> *const SSL_METHOD {
        &crate::TLS_CLIENT_METHOD
    }
}

impl Castable for SSL_METHOD {
    type Ownership = OwnershipRef;
    type RustType = SSL_METHOD;
}

pub type SSL_CTX = crate::SslContext;

entry! {
    pub fn SSL_CTX_new(meth: *const SSL_METHOD) -> *mut SSL_CTX {
        let method = try_ref_from_ptr!(meth);
        to_arc_mut_ptr(Mutex::new(crate::SslContext::new(method)))
    }
}

entry! {
    pub fn SSL_CTX_up_ref(ctx: *mut SSL_CTX) -> c_int {
        let ctx = try_clone_arc!(ctx);
        mem::forget(ctx.clone());
        C_INT_SUCCESS
    }
}

entry! {
    pub fn SSL_CTX_free(ctx: *mut SSL_CTX) {
        free_arc(ctx);
    }
}

entry! {
    pub fn SSL_CTX_set_verify(ctx: *mut SSL_CTX, mode: c_int, callback: SSL_verify_cb) {
        let ctx = try_clone_arc!(ctx);

        if callback.is_some() {
            // verification is done entirely inside the handshake; there is
            // no X509_STORE_CTX to hand to a callback.
            return Error::not_supported("verify callback").raise().into();
        }

        ctx.lock()
            .ok()
            .map(|mut ctx| ctx.set_verify(crate::VerifyMode::from(mode)))
            .unwrap_or_default();
    }
}

entry! {
    pub fn SSL_CTX_get_verify_mode(ctx: *const SSL_CTX) -> c_int {
        let ctx = try_clone_arc!(ctx);
        ctx.lock()
            .ok()
            .map(|ctx| ctx.get_verify_mode().into())
            .unwrap_or_default()
    }
}

entry! {
    pub fn SSL_CTX_set_verify_depth(ctx: *mut SSL_CTX, depth: c_int) {
        let ctx = try_clone_arc!(ctx);
        if let Ok(mut inner) = ctx.lock() {
            inner.set_verify_depth(depth);
        };
    }
}

entry! {
    pub fn SSL_CTX_get_verify_depth(ctx: *mut SSL_CTX) -> c_int {
        let ctx = try_clone_arc!(ctx);
        ctx.lock()
            .ok()
            .map(|ctx| ctx.get_verify_depth())
            .unwrap_or_default()
    }
}

/// Opaque: verify callbacks are refused.
pub enum X509_STORE_CTX {}

pub type SSL_verify_cb =
    Option<unsafe extern "C" fn(preverify_ok: c_int, x509_ctx: *mut X509_STORE_CTX) -> c_int>;

entry! {
    pub fn SSL_CTX_kr_set_verify_name(ctx: *mut SSL_CTX, name: *const c_char) -> c_int {
        let ctx = try_clone_arc!(ctx);
        let name = str_from_cstring(name);
        match ctx
            .lock()
            .map_err(|_| Error::cannot_lock())
            .map(|mut ctx| ctx.set_verify_name(name))
        {
            Err(e) => e.raise().into(),
            Ok(()) => C_INT_SUCCESS,
        }
    }
}

entry! {
    pub fn SSL_CTX_load_verify_locations(
        ctx: *mut SSL_CTX,
        ca_file: *const c_char,
        ca_path: *const c_char,
    ) -> c_int {
        let ctx = try_clone_arc!(ctx);
        let ca_file = str_from_cstring(ca_file).map(Path::new);
        let ca_path = str_from_cstring(ca_path).map(Path::new);

        match ctx
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ctx| ctx.load_verify_locations(ca_file, ca_path))
        {
            Err(e) => e.raise().into(),
            Ok(()) => C_INT_SUCCESS,
        }
    }
}

entry! {
    pub fn SSL_CTX_set_default_verify_paths(ctx: *mut SSL_CTX) -> c_int {
        let ctx = try_clone_arc!(ctx);
        match ctx
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ctx| ctx.set_default_verify_paths())
        {
            Err(e) => e.raise().into(),
            Ok(()) => C_INT_SUCCESS,
        }
    }
}

entry! {
    pub fn SSL_CTX_set_cipher_list(ctx: *mut SSL_CTX, s: *const c_char) -> c_int {
        let ctx = try_clone_arc!(ctx);
        let list = try_str!(s);
        match ctx
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ctx| ctx.set_cipher_list(list))
        {
            Err(e) => e.raise().into(),
            Ok(()) => C_INT_SUCCESS,
        }
    }
}

entry! {
    pub fn SSL_CTX_use_certificate_chain_file(
        ctx: *mut SSL_CTX,
        file_name: *const c_char,
    ) -> c_int {
        let ctx = try_clone_arc!(ctx);
        let file_name = try_str!(file_name);

        match ctx
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ctx| ctx.use_certificate_chain_file(Path::new(file_name)))
        {
            Err(e) => e.raise().into(),
            Ok(()) => C_INT_SUCCESS,
        }
    }
}

entry! {
    pub fn SSL_CTX_use_certificate_file(
        ctx: *mut SSL_CTX,
        file_name: *const c_char,
        file_type: c_int,
    ) -> c_int {
        let ctx = try_clone_arc!(ctx);
        let file_name = try_str!(file_name);

        match ctx
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ctx| ctx.use_certificate_file(Path::new(file_name), file_type))
        {
            Err(e) => e.raise().into(),
            Ok(()) => C_INT_SUCCESS,
        }
    }
}

entry! {
    pub fn SSL_CTX_use_PrivateKey_file(
        ctx: *mut SSL_CTX,
        file_name: *const c_char,
        file_type: c_int,
    ) -> c_int {
        let ctx = try_clone_arc!(ctx);
        let file_name = try_str!(file_name);

        match ctx
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ctx| ctx.use_private_key_file(Path::new(file_name), file_type))
        {
            Err(e) => e.raise().into(),
            Ok(()) => C_INT_SUCCESS,
        }
    }
}

entry! {
    pub fn SSL_CTX_use_RSAPrivateKey_file(
        ctx: *mut SSL_CTX,
        file_name: *const c_char,
        file_type: c_int,
    ) -> c_int {
        SSL_CTX_use_PrivateKey_file(ctx, file_name, file_type)
    }
}

entry! {
    pub fn SSL_CTX_check_private_key(ctx: *const SSL_CTX) -> c_int {
        let ctx = try_clone_arc!(ctx);
        match ctx
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|ctx| ctx.check_private_key())
        {
            Err(e) => e.raise().into(),
            Ok(()) => C_INT_SUCCESS,
        }
    }
}

impl Castable for SSL_CTX {
    type Ownership = OwnershipArc;
    type RustType = Mutex<SSL_CTX>;
}

pub type SSL = crate::Ssl;

entry! {
    pub fn SSL_new(ctx: *mut SSL_CTX) -> *mut SSL {
        let ctx = try_clone_arc!(ctx);

        let ssl_ctx = match ctx.lock().ok() {
            Some(ssl_ctx) => ssl_ctx,
            None => return ptr::null_mut(),
        };

        let ssl = match crate::Ssl::new(ctx.clone(), &ssl_ctx).ok() {
            Some(ssl) => ssl,
            None => return ptr::null_mut(),
        };

        to_arc_mut_ptr(Mutex::new(ssl))
    }
}

entry! {
    pub fn SSL_up_ref(ssl: *mut SSL) -> c_int {
        let ssl = try_clone_arc!(ssl);
        mem::forget(ssl.clone());
        C_INT_SUCCESS
    }
}

entry! {
    pub fn SSL_free(ssl: *mut SSL) {
        free_arc(ssl);
    }
}

entry! {
    pub fn SSL_get_SSL_CTX(ssl: *const SSL) -> *mut SSL_CTX {
        let ssl = try_clone_arc!(ssl);
        ssl.lock()
            .ok()
            .map(|ssl| Arc::as_ptr(ssl.context()) as *mut SSL_CTX)
            .unwrap_or_else(ptr::null_mut)
    }
}

entry! {
    pub fn SSL_ctrl(ssl: *mut SSL, cmd: c_int, larg: c_long, parg: *mut c_void) -> c_long {
        let ssl = try_clone_arc!(ssl);

        match SslCtrl::try_from(cmd) {
            Ok(SslCtrl::Mode) => {
                log::warn!("unimplemented SSL_set_mode()");
                0
            }
            Ok(SslCtrl::SetTlsExtHostname) => {
                if larg != TLSEXT_NAMETYPE_HOST_NAME {
                    return Error::not_supported("server name type").raise().into();
                }
                let hostname = try_str!(parg as *const c_char);
                ssl.lock()
                    .ok()
                    .map(|mut ssl| ssl.set_sni_hostname(hostname))
                    .unwrap_or_default() as c_long
            }
            Err(()) => {
                log::warn!("unimplemented SSL_ctrl(..., {cmd}, {larg}, ...)");
                0
            }
        }
    }
}

entry! {
    pub fn SSL_set_connect_state(ssl: *mut SSL) {
        let ssl = try_clone_arc!(ssl);
        let _ = ssl.lock().ok().map(|mut ssl| ssl.set_client_mode());
    }
}

entry! {
    pub fn SSL_set_accept_state(ssl: *mut SSL) {
        let ssl = try_clone_arc!(ssl);
        let _ = ssl.lock().ok().map(|mut ssl| ssl.set_server_mode());
    }
}

entry! {
    pub fn SSL_is_server(ssl: *const SSL) -> c_int {
        let ssl = try_clone_arc!(ssl);
        ssl.lock()
            .ok()
            .map(|ssl| ssl.is_server())
            .unwrap_or_default() as c_int
    }
}

entry! {
    pub fn SSL_set1_host(ssl: *mut SSL, hostname: *const c_char) -> c_int {
        let ssl = try_clone_arc!(ssl);
        let maybe_hostname = str_from_cstring(hostname);
        ssl.lock()
            .ok()
            .map(|mut ssl| {
                ssl.set_verify_hostname(maybe_hostname);
                true
            })
            .unwrap_or_default() as c_int
    }
}

entry! {
    pub fn SSL_set_verify(ssl: *mut SSL, mode: c_int, callback: SSL_verify_cb) {
        let ssl = try_clone_arc!(ssl);

        if callback.is_some() {
            return Error::not_supported("verify callback").raise().into();
        }

        ssl.lock()
            .ok()
            .map(|mut ssl| ssl.set_verify(crate::VerifyMode::from(mode)))
            .unwrap_or_default();
    }
}

entry! {
    pub fn SSL_set_verify_depth(ssl: *mut SSL, depth: c_int) {
        let ssl = try_clone_arc!(ssl);
        if let Ok(mut inner) = ssl.lock() {
            inner.set_verify_depth(depth);
        };
    }
}

entry! {
    pub fn SSL_set_fd(ssl: *mut SSL, fd: c_int) -> c_int {
        let ssl = try_clone_arc!(ssl);
        if fd < 0 {
            return Error::bad_data("negative file descriptor").raise().into();
        }
        let bio = Bio::new_fd_no_close(fd);
        ssl.lock()
            .ok()
            .map(|mut ssl| {
                ssl.set_bio(bio);
                true
            })
            .unwrap_or_default() as c_int
    }
}

entry! {
    pub fn SSL_get_fd(ssl: *const SSL) -> c_int {
        const ERROR: c_int = -1;
        let ssl = try_clone_arc!(ssl, ERROR);
        ssl.lock()
            .ok()
            .and_then(|ssl| ssl.get_fd())
            .unwrap_or(ERROR)
    }
}

entry! {
    pub fn SSL_connect(ssl: *mut SSL) -> c_int {
        let ssl = try_clone_arc!(ssl, HANDSHAKE_ERROR);

        match ssl
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ssl| ssl.connect())
            .map_err(|err| err.raise())
        {
            Err(e) => handshake_failure(e),
            Ok(()) => C_INT_SUCCESS,
        }
    }
}

entry! {
    pub fn SSL_accept(ssl: *mut SSL) -> c_int {
        let ssl = try_clone_arc!(ssl, HANDSHAKE_ERROR);

        match ssl
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ssl| ssl.accept())
            .map_err(|err| err.raise())
        {
            Err(e) => handshake_failure(e),
            Ok(()) => C_INT_SUCCESS,
        }
    }
}

entry! {
    pub fn SSL_do_handshake(ssl: *mut SSL) -> c_int {
        let ssl = try_clone_arc!(ssl, HANDSHAKE_ERROR);

        match ssl
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ssl| ssl.handshake())
            .map_err(|err| err.raise())
        {
            Err(e) => handshake_failure(e),
            Ok(()) => C_INT_SUCCESS,
        }
    }
}

const HANDSHAKE_ERROR: c_int = -1;

/// `SSL_connect` and friends return 0 for a handshake the peer closed
/// cleanly, and -1 otherwise.
fn handshake_failure(err: Error) -> c_int {
    match err.ssl_error_code() {
        SSL_ERROR_ZERO_RETURN => 0,
        _ => HANDSHAKE_ERROR,
    }
}

entry! {
    pub fn SSL_write(ssl: *mut SSL, buf: *const c_void, num: c_int) -> c_int {
        const ERROR: c_int = -1;
        let ssl = try_clone_arc!(ssl, ERROR);
        let slice = try_slice_int!(buf as *const u8, num, ERROR);

        if slice.is_empty() {
            return ERROR;
        }

        match ssl
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ssl| ssl.write(slice))
            .map_err(|err| err.raise())
        {
            Err(_e) => ERROR,
            Ok(written) => written as c_int,
        }
    }
}

entry! {
    pub fn SSL_read(ssl: *mut SSL, buf: *mut c_void, num: c_int) -> c_int {
        const ERROR: c_int = -1;
        let ssl = try_clone_arc!(ssl, ERROR);
        let slice = try_mut_slice_int!(buf as *mut u8, num, ERROR);

        match ssl
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ssl| ssl.read(slice))
            .map_err(|err| err.raise())
        {
            Err(e) if e.ssl_error_code() == SSL_ERROR_ZERO_RETURN => 0,
            Err(_e) => ERROR,
            Ok(read) => read as c_int,
        }
    }
}

entry! {
    pub fn SSL_shutdown(ssl: *mut SSL) -> c_int {
        const ERROR: c_int = -1;
        let ssl = try_clone_arc!(ssl, ERROR);

        match ssl
            .lock()
            .map_err(|_| Error::cannot_lock())
            .and_then(|mut ssl| ssl.try_shutdown())
            .map_err(|err| err.raise())
        {
            Err(_e) => ERROR,
            Ok(result) => match result {
                ShutdownResult::Sent => 0,
                ShutdownResult::Received => 1,
            },
        }
    }
}

entry! {
    pub fn SSL_get_shutdown(ssl: *const SSL) -> c_int {
        let ssl = try_clone_arc!(ssl);

        ssl.lock().map(|ssl| ssl.get_shutdown()).unwrap_or_default()
    }
}

entry! {
    pub fn SSL_set_shutdown(ssl: *mut SSL, flags: c_int) {
        let ssl = try_clone_arc!(ssl);

        ssl.lock()
            .map_err(|_| Error::cannot_lock())
            .map(|mut ssl| ssl.set_shutdown(flags))
            .map_err(|err| err.raise())
            .unwrap_or_default()
    }
}

entry! {
    pub fn SSL_set_quiet_shutdown(ssl: *mut SSL, mode: c_int) {
        let ssl = try_clone_arc!(ssl);

        ssl.lock()
            .map_err(|_| Error::cannot_lock())
            .map(|mut ssl| ssl.set_quiet_shutdown(mode != 0))
            .map_err(|err| err.raise())
            .unwrap_or_default()
    }
}

entry! {
    pub fn SSL_get_quiet_shutdown(ssl: *const SSL) -> c_int {
        let ssl = try_clone_arc!(ssl);

        ssl.lock()
            .map(|ssl| ssl.get_quiet_shutdown() as c_int)
            .unwrap_or_default()
    }
}

entry! {
    pub fn SSL_pending(ssl: *const SSL) -> c_int {
        let ssl = try_clone_arc!(ssl);

        ssl.lock()
            .map_err(|_| Error::cannot_lock())
            .map(|ssl| ssl.get_pending_plaintext() as c_int)
            .map_err(|err| err.raise())
            .unwrap_or_default()
    }
}

entry! {
    pub fn SSL_has_pending(ssl: *const SSL) -> c_int {
        (SSL_pending(ssl) > 0) as c_int
    }
}

entry! {
    pub fn SSL_get_error(ssl: *const SSL, ret_code: c_int) -> c_int {
        if ret_code > 0 {
            return SSL_ERROR_NONE;
        }

        let ssl = try_clone_arc!(ssl);
        ssl.lock()
            .map_err(|_| Error::cannot_lock())
            .map(|ssl| ssl.get_error())
            .map_err(|err| err.raise())
            .unwrap_or_default()
    }
}

entry! {
    pub fn SSL_get_current_cipher(ssl: *const SSL) -> *const SSL_CIPHER {
        let ssl = try_clone_arc!(ssl);
        ssl.lock()
            .ok()
            .and_then(|ssl| ssl.get_negotiated_cipher())
            .map(|cipher| cipher as *const SSL_CIPHER)
            .unwrap_or_else(ptr::null)
    }
}

entry! {
    pub fn SSL_get_version(ssl: *const SSL) -> *const c_char {
        let ssl = try_clone_arc!(ssl);
        ssl.lock()
            .ok()
            .filter(|ssl| ssl.is_established())
            .map(|_| c"TLSv1.2".as_ptr())
            .unwrap_or_else(|| c"unknown".as_ptr())
    }
}

entry! {
    pub fn SSL_get_verify_result(ssl: *const SSL) -> c_long {
        let ssl = try_clone_arc!(ssl);
        ssl.lock()
            .ok()
            .map(|ssl| ssl.get_last_verification_result())
            .unwrap_or(X509_V_ERR_UNSPECIFIED.into())
    }
}

entry! {
    // nb. 0 is a reasonable OSSL_HANDSHAKE_STATE, it is OSSL_HANDSHAKE_STATE_TLS_ST_BEFORE
    pub fn SSL_get_state(ssl: *const SSL) -> c_uint {
        let ssl = try_clone_arc!(ssl);
        ssl.lock()
            .ok()
            .map(|ssl| ssl.handshake_state().into())
            .unwrap_or_default()
    }
}

entry! {
    pub fn SSL_in_init(ssl: *const SSL) -> c_int {
        let ssl = try_clone_arc!(ssl);
        ssl.lock()
            .ok()
            .map(|ssl| ssl.handshake_state().in_init())
            .unwrap_or_default() as c_int
    }
}

entry! {
    pub fn SSL_is_init_finished(ssl: *const SSL) -> c_int {
        let ssl = try_clone_arc!(ssl);
        ssl.lock()
            .ok()
            .map(|ssl| ssl.handshake_state() == crate::HandshakeState::Finished)
            .unwrap_or_default() as c_int
    }
}

impl Castable for SSL {
    type Ownership = OwnershipArc;
    type RustType = Mutex<SSL>;
}

pub type SSL_CIPHER = crate::SslCipher;

entry! {
    pub fn SSL_CIPHER_find(_ssl: *const SSL, ptr: *const c_uchar) -> *const SSL_CIPHER {
        let slice = try_slice!(ptr, 2);
        let id = u16::from_be_bytes([slice[0], slice[1]]);
        crate::SslCipher::find_by_id(rustls::CipherSuite::from(id))
            .map(|cipher| cipher as *const SSL_CIPHER)
            .unwrap_or_else(ptr::null)
    }
}

entry! {
    pub fn SSL_CIPHER_get_bits(cipher: *const SSL_CIPHER, alg_bits: *mut c_int) -> c_int {
        let cipher = try_ref_from_ptr!(cipher);
        let bits = cipher.bits as c_int;
        if !alg_bits.is_null() {
            unsafe { ptr::write(alg_bits, bits) };
        }
        bits
    }
}

entry! {
    pub fn SSL_CIPHER_get_version(cipher: *const SSL_CIPHER) -> *const c_char {
        match try_from(cipher) {
            Some(cipher) => cipher.version,
            None => c"(NONE)",
        }
        .as_ptr()
    }
}

entry! {
    pub fn SSL_CIPHER_get_name(cipher: *const SSL_CIPHER) -> *const c_char {
        match try_from(cipher) {
            Some(cipher) => cipher.openssl_name,
            None => c"(NONE)",
        }
        .as_ptr()
    }
}

entry! {
    pub fn SSL_CIPHER_standard_name(cipher: *const SSL_CIPHER) -> *const c_char {
        match try_from(cipher) {
            Some(cipher) => cipher.standard_name,
            None => c"(NONE)",
        }
        .as_ptr()
    }
}

entry! {
    pub fn SSL_CIPHER_get_id(cipher: *const SSL_CIPHER) -> u32 {
        let cipher = try_ref_from_ptr!(cipher);
        cipher.openssl_id()
    }
}

entry! {
    pub fn SSL_CIPHER_get_protocol_id(cipher: *const SSL_CIPHER) -> u16 {
        let cipher = try_ref_from_ptr!(cipher);
        cipher.protocol_id()
    }
}

entry! {
    pub fn SSL_CIPHER_description(
        cipher: *const SSL_CIPHER,
        buf: *mut c_char,
        size: c_int,
    ) -> *mut c_char {
        let cipher = try_ref_from_ptr!(cipher);
        let required_len = cipher.description.to_bytes_with_nul().len();

        if buf.is_null() {
            return Error::not_supported("SSL_CIPHER_description allocation")
                .raise()
                .into();
        } else if size < (required_len as i32) {
            return ptr::null_mut();
        }

        unsafe {
            ptr::copy_nonoverlapping(cipher.description.as_ptr(), buf, required_len);
        };
        buf
    }
}

impl Castable for SSL_CIPHER {
    type Ownership = OwnershipRef;
    type RustType = SSL_CIPHER;
}

/// Normal OpenSSL return value convention success indicator.
const C_INT_SUCCESS: c_int = 1;

/// Define an enum that can round trip through a c_int, with no
/// UB for unknown values.
macro_rules! num_enum {
    ($enum_vis:vis enum $enum_name:ident
    { $( $enum_var:ident = $enum_val:expr ),* $(,)? }
    ) => {
        #[derive(Debug, PartialEq, Clone, Copy)]
        $enum_vis enum $enum_name {
            $( $enum_var),*
        }

        impl From<$enum_name> for c_int {
            fn from(item: $enum_name) -> Self {
                match item {
                    $( $enum_name::$enum_var => $enum_val),*
                }
            }
        }

        impl TryFrom<c_int> for $enum_name {
            type Error = ();
            fn try_from(i: c_int) -> Result<Self, ()> {
                match i {
                    $( $enum_val => Ok(Self::$enum_var), )*
                    _ => Err(()),
                }
            }
        }
    }
}

// See `ssl.h` for macros starting `SSL_CTRL_`.
num_enum! {
    enum SslCtrl {
        Mode = 33,
        SetTlsExtHostname = 55,
    }
}
