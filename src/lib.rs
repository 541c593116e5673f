use core::ffi::{c_int, c_uint, CStr};
use core::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rustls::{CipherSuite, ProtocolVersion};

use crate::bio::Bio;
use crate::constants::{SSL_ERROR_NONE, SSL_FILETYPE_ASN1, SSL_FILETYPE_PEM, X509_V_ERR_UNSPECIFIED};
use crate::crypto::cipher::{CipherInfo, AES128_CBC, RC4_128};
use crate::crypto::{HashAlg, MD5, SHA1, SHA256};
use crate::error::Error;
use crate::handshake::{Connection, HandshakeConfig, Role};
use crate::pem::PemKind;
use crate::store::CaStore;
use crate::verifier::PeerVerifier;
use crate::x509::X509;

pub mod asn1;
pub mod bignum;
pub mod bio;
mod constants;
pub mod crypto;
#[allow(
    // relax naming convention lints for openssl API
    non_camel_case_types,
    non_snake_case,
    clippy::upper_case_acronyms,
    // false positives on extern entrypoints
    dead_code,
)]
pub mod entry;
pub mod error;
#[macro_use]
#[allow(unused_macros, dead_code, unused_imports)]
mod ffi;
pub mod handshake;
pub mod pem;
pub mod record;
pub mod rsa;
pub mod sign;
pub mod store;
pub mod verifier;
pub mod x509;

/// OpenSSL's default for `SSL_CTX_set_verify_depth`.
const DEFAULT_VERIFY_DEPTH: usize = 100;

/// `SSL_METHOD` underlying type.
///
/// # Lifetime
/// Functions that return SSL_METHOD, like `TLS_method()`, give static-lifetime pointers.
pub struct SslMethod {
    client_versions: &'static [ProtocolVersion],
    server_versions: &'static [ProtocolVersion],
}

impl SslMethod {
    fn mode(&self) -> ConnMode {
        match (
            self.client_versions.is_empty(),
            self.server_versions.is_empty(),
        ) {
            (true, false) => ConnMode::Server,
            (false, true) => ConnMode::Client,
            (_, _) => ConnMode::Unknown,
        }
    }
}

/// Only TLS 1.2 has a PRF implementation here.
static TLS12_ONLY: &[ProtocolVersion] = &[ProtocolVersion::TLSv1_2];

pub static TLS_CLIENT_METHOD: SslMethod = SslMethod {
    client_versions: TLS12_ONLY,
    server_versions: &[],
};
pub static TLS_SERVER_METHOD: SslMethod = SslMethod {
    client_versions: &[],
    server_versions: TLS12_ONLY,
};
pub static TLS_METHOD: SslMethod = SslMethod {
    client_versions: TLS12_ONLY,
    server_versions: TLS12_ONLY,
};

/// `SSL_CIPHER` underlying type.
///
/// # Lifetime
/// Functions that return `SSL_CIPHER` give static-lifetime pointers.
pub struct SslCipher {
    pub bits: usize,
    pub openssl_name: &'static CStr,
    pub standard_name: &'static CStr,
    pub version: &'static CStr,
    pub description: &'static CStr,
    /// Bulk cipher protecting records.
    pub cipher: &'static CipherInfo,
    /// Hash for the record MAC.
    pub mac: &'static HashAlg,
    id: u16,
}

impl SslCipher {
    /// Every suite we implement, most preferred first.
    pub fn all() -> impl Iterator<Item = &'static Self> {
        ALL_CIPHERS.iter().copied()
    }

    pub fn find_by_id(id: CipherSuite) -> Option<&'static Self> {
        let id = u16::from(id);
        Self::all().find(|cipher| cipher.id == id)
    }

    /// Looks up an OpenSSL (`AES128-SHA`) or IANA (`TLS_RSA_WITH_AES_128_CBC_SHA`) name.
    pub fn find_by_name(name: &str) -> Option<&'static Self> {
        Self::all().find(|cipher| {
            cipher.openssl_name.to_bytes() == name.as_bytes()
                || cipher.standard_name.to_bytes() == name.as_bytes()
        })
    }

    pub fn suite(&self) -> CipherSuite {
        CipherSuite::from(self.id)
    }

    pub fn protocol_id(&self) -> u16 {
        self.id
    }

    pub fn openssl_id(&self) -> u32 {
        0x03000000u32 | (self.protocol_id() as u32)
    }
}

impl PartialEq for SslCipher {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for SslCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.openssl_name.to_string_lossy())
    }
}

static ALL_CIPHERS: [&SslCipher; 4] = [
    &TLS_RSA_WITH_AES_128_CBC_SHA256,
    &TLS_RSA_WITH_AES_128_CBC_SHA,
    &TLS_RSA_WITH_RC4_128_SHA,
    &TLS_RSA_WITH_RC4_128_MD5,
];

static TLS_RSA_WITH_AES_128_CBC_SHA256: SslCipher = SslCipher {
    id: 0x003c,
    cipher: &AES128_CBC,
    mac: &SHA256,
    bits: 128,
    openssl_name: c"AES128-SHA256",
    standard_name: c"TLS_RSA_WITH_AES_128_CBC_SHA256",
    version: c"TLSv1.2",
    description: c"AES128-SHA256                  TLSv1.2 Kx=RSA      Au=RSA   Enc=AES(128)               Mac=SHA256\n",
};

static TLS_RSA_WITH_AES_128_CBC_SHA: SslCipher = SslCipher {
    id: 0x002f,
    cipher: &AES128_CBC,
    mac: &SHA1,
    bits: 128,
    openssl_name: c"AES128-SHA",
    standard_name: c"TLS_RSA_WITH_AES_128_CBC_SHA",
    version: c"SSLv3",
    description: c"AES128-SHA                     SSLv3 Kx=RSA      Au=RSA   Enc=AES(128)               Mac=SHA1\n",
};

static TLS_RSA_WITH_RC4_128_SHA: SslCipher = SslCipher {
    id: 0x0005,
    cipher: &RC4_128,
    mac: &SHA1,
    bits: 128,
    openssl_name: c"RC4-SHA",
    standard_name: c"TLS_RSA_WITH_RC4_128_SHA",
    version: c"SSLv3",
    description: c"RC4-SHA                        SSLv3 Kx=RSA      Au=RSA   Enc=RC4(128)               Mac=SHA1\n",
};

static TLS_RSA_WITH_RC4_128_MD5: SslCipher = SslCipher {
    id: 0x0004,
    cipher: &RC4_128,
    mac: &MD5,
    bits: 128,
    openssl_name: c"RC4-MD5",
    standard_name: c"TLS_RSA_WITH_RC4_128_MD5",
    version: c"SSLv3",
    description: c"RC4-MD5                        SSLv3 Kx=RSA      Au=RSA   Enc=RC4(128)               Mac=MD5\n",
};

/// Parses an OpenSSL cipher list: names separated by `:`, `,` or spaces.
///
/// `ALL` and `DEFAULT` stand for every suite; `!NAME` removes one for
/// good. Unknown names are skipped, but the result must not be empty.
fn parse_cipher_list(list: &str) -> Result<Vec<&'static SslCipher>, Error> {
    let mut chosen: Vec<&'static SslCipher> = Vec::new();
    let mut banned: Vec<&'static SslCipher> = Vec::new();

    for item in list
        .split([':', ',', ' '])
        .filter(|item| !item.is_empty())
    {
        if let Some(name) = item.strip_prefix('!') {
            banned.extend(SslCipher::find_by_name(name));
            continue;
        }

        let found: Vec<&'static SslCipher> = match item {
            "ALL" | "DEFAULT" => SslCipher::all().collect(),
            name => SslCipher::find_by_name(name).into_iter().collect(),
        };
        if found.is_empty() {
            log::warn!("ignoring unknown cipher {item:?}");
        }
        for cipher in found {
            if !chosen.contains(&cipher) {
                chosen.push(cipher);
            }
        }
    }

    chosen.retain(|cipher| !banned.contains(cipher));
    match chosen.is_empty() {
        true => Err(Error::bad_data("no cipher match")),
        false => Ok(chosen),
    }
}

pub struct SslContext {
    method: &'static SslMethod,
    verify_mode: VerifyMode,
    verify_depth: c_int,
    ca_store: Arc<CaStore>,
    suites: Vec<&'static SslCipher>,
    verify_name: Option<String>,
    auth_keys: sign::CertifiedKeySet,
}

impl SslContext {
    pub fn new(method: &'static SslMethod) -> Self {
        Self {
            method,
            verify_mode: VerifyMode::default(),
            verify_depth: -1,
            ca_store: Arc::new(CaStore::default()),
            suites: SslCipher::all().collect(),
            verify_name: None,
            auth_keys: sign::CertifiedKeySet::default(),
        }
    }

    pub fn set_verify(&mut self, mode: VerifyMode) {
        self.verify_mode = mode;
    }

    pub fn get_verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    pub fn set_verify_depth(&mut self, depth: c_int) {
        self.verify_depth = depth;
    }

    pub fn get_verify_depth(&self) -> c_int {
        self.verify_depth
    }

    /// For `SSL_CTX_kr_set_verify_name`: the name every server certificate
    /// must carry, whatever host name is sent in SNI.
    pub fn set_verify_name(&mut self, name: Option<&str>) {
        self.verify_name = name.filter(|n| !n.is_empty()).map(str::to_owned);
    }

    pub fn set_default_verify_paths(&mut self) -> Result<(), Error> {
        Arc::make_mut(&mut self.ca_store).add_default_paths()
    }

    pub fn load_verify_locations(
        &mut self,
        file: Option<&Path>,
        dir: Option<&Path>,
    ) -> Result<(), Error> {
        if file.is_none() && dir.is_none() {
            return Err(Error::null_pointer());
        }

        let store = Arc::make_mut(&mut self.ca_store);
        if let Some(file) = file {
            store.load_file(file)?;
        }
        if let Some(dir) = dir {
            store.load_dir(dir)?;
        }
        Ok(())
    }

    pub fn set_cipher_list(&mut self, list: &str) -> Result<(), Error> {
        self.suites = parse_cipher_list(list)?;
        log::debug!("cipher list now {:?}", self.suites);
        Ok(())
    }

    pub fn ciphers(&self) -> &[&'static SslCipher] {
        &self.suites
    }

    /// Loads all certificates of a PEM file, end-entity first.
    pub fn use_certificate_chain_file(&mut self, path: &Path) -> Result<(), Error> {
        let chain = pem::load_file(path, |obj| obj.kind == PemKind::Certificate)?
            .into_iter()
            .map(|obj| obj.der)
            .collect::<Vec<_>>();
        if chain.is_empty() {
            return Err(Error::bad_data("no certificates in file"));
        }
        self.auth_keys.stage_certificate_full_chain(chain)
    }

    pub fn use_certificate_file(&mut self, path: &Path, file_type: c_int) -> Result<(), Error> {
        let der = read_first_object(path, file_type, |kind| kind == PemKind::Certificate)?;
        self.auth_keys.stage_certificate_end_entity(der)
    }

    /// Accepts PKCS#1 or PKCS#8 RSA keys.
    pub fn use_private_key_file(&mut self, path: &Path, file_type: c_int) -> Result<(), Error> {
        let der = read_first_object(path, file_type, |kind| kind.is_private_key())?;
        let key = asn1::parse_private_key(&der)?;
        self.auth_keys.commit_private_key(key)
    }

    pub fn check_private_key(&self) -> Result<(), Error> {
        self.auth_keys.check_private_key()
    }
}

/// The DER of the first matching object in a PEM file, or a whole DER file.
fn read_first_object(
    path: &Path,
    file_type: c_int,
    wanted: impl Fn(PemKind) -> bool,
) -> Result<Vec<u8>, Error> {
    match file_type {
        SSL_FILETYPE_PEM => pem::open(path)?
            .filter_map(|obj| match obj {
                Ok(obj) if wanted(obj.kind) => Some(Ok(obj.der)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
            .next()
            .unwrap_or_else(|| {
                log::trace!("nothing usable in {}", path.display());
                Err(Error::bad_data("pem file"))
            }),
        SSL_FILETYPE_ASN1 => std::fs::read(path).map_err(|err| {
            log::trace!("Failed to read {}: {err:?}", path.display());
            Error::from_io(err)
        }),
        _ => Err(Error::not_supported("file_type not in (PEM, ASN1)")),
    }
}

pub struct Ssl {
    ctx: Arc<Mutex<SslContext>>,
    mode: ConnMode,
    verify_mode: VerifyMode,
    verify_depth: c_int,
    ca_store: Arc<CaStore>,
    suites: Vec<&'static SslCipher>,
    /// Pinned on the context; checked in preference to the names below.
    verify_server_name: Option<String>,
    /// From `SSL_set1_host`.
    verify_host: Option<String>,
    sni_server_name: Option<String>,
    bio: Option<Bio>,
    conn: Option<Connection>,
    shutdown_flags: ShutdownFlags,
    auth_keys: sign::CertifiedKeySet,
    /// `SSL_ERROR_*` class of the last I/O operation.
    last_error: c_int,
}

impl Ssl {
    pub fn new(ctx: Arc<Mutex<SslContext>>, inner: &SslContext) -> Result<Self, Error> {
        Ok(Self {
            ctx,
            mode: inner.method.mode(),
            verify_mode: inner.verify_mode,
            verify_depth: inner.verify_depth,
            ca_store: Arc::clone(&inner.ca_store),
            suites: inner.suites.clone(),
            verify_server_name: inner.verify_name.clone(),
            verify_host: None,
            sni_server_name: None,
            bio: None,
            conn: None,
            shutdown_flags: ShutdownFlags::default(),
            auth_keys: inner.auth_keys.clone(),
            last_error: SSL_ERROR_NONE,
        })
    }

    pub fn context(&self) -> &Arc<Mutex<SslContext>> {
        &self.ctx
    }

    pub fn set_client_mode(&mut self) {
        // nb. don't fill in `conn` until the last minute.
        // SSL_set_connect_state() .. SSL_set_tlsext_host_name() .. SSL_connect() is a valid
        // sequence of calls.
        self.mode = ConnMode::Client;
    }

    pub fn set_server_mode(&mut self) {
        self.mode = ConnMode::Server;
    }

    pub fn is_server(&self) -> bool {
        self.mode == ConnMode::Server
    }

    pub fn set_verify(&mut self, mode: VerifyMode) {
        self.verify_mode = mode;
    }

    pub fn set_verify_depth(&mut self, depth: c_int) {
        self.verify_depth = depth;
    }
    /// For `SSL_set1_host`: `None` or empty clears the name.
    /// For `SSL_set1_host`: `None` or empty disables name checks.
    pub fn set_verify_hostname(&mut self, hostname: Option<&str>) {
        self.verify_host = hostname.filter(|h| !h.is_empty()).map(str::to_owned);
    }

    /// The name the server certificate must carry, if any.
    fn expected_server_name(&self) -> Option<String> {
        self.verify_server_name
            .as_ref()
            .or(self.verify_host.as_ref())
            .or(self.sni_server_name.as_ref())
            .cloned()
    }

    pub fn set_sni_hostname(&mut self, hostname: &str) -> bool {
        if hostname.is_empty() || hostname.len() > 255 || hostname.parse::<std::net::IpAddr>().is_ok()
        {
            return false;
        }
        self.sni_server_name = Some(hostname.to_owned());
        true
    }

    /// Client: the name we send. Server: the name the client sent.
    pub fn server_name(&self) -> Option<&str> {
        match self.mode {
            ConnMode::Server => self
                .conn
                .as_ref()
                .and_then(|conn| conn.requested_server_name()),
            ConnMode::Client | ConnMode::Unknown => self.sni_server_name.as_deref(),
        }
    }

    pub fn set_bio(&mut self, bio: Bio) {
        self.bio = Some(bio);
    }

    pub fn get_fd(&self) -> Option<c_int> {
        self.bio.as_ref().and_then(|bio| bio.fd())
    }

    pub fn handshake(&mut self) -> Result<(), Error> {
        match self.mode {
            ConnMode::Client => self.connect(),
            ConnMode::Server => self.accept(),
            ConnMode::Unknown => Err(Error::bad_data("connection mode required")),
        }
    }

    pub fn connect(&mut self) -> Result<(), Error> {
        if let ConnMode::Unknown = self.mode {
            self.set_client_mode();
        }
        if self.is_server() {
            return Err(Error::bad_data("SSL_connect on a server"));
        }
        self.with_connection(|conn, bio| conn.complete_handshake(bio))
    }

    pub fn accept(&mut self) -> Result<(), Error> {
        if let ConnMode::Unknown = self.mode {
            self.set_server_mode();
        }
        if !self.is_server() {
            return Err(Error::bad_data("SSL_accept on a client"));
        }
        self.with_connection(|conn, bio| conn.complete_handshake(bio))
    }

    pub fn write(&mut self, slice: &[u8]) -> Result<usize, Error> {
        self.with_connection(|conn, bio| conn.write(bio, slice))
    }

    pub fn read(&mut self, slice: &mut [u8]) -> Result<usize, Error> {
        self.with_connection(|conn, bio| conn.read(bio, slice))
    }

    pub fn try_shutdown(&mut self) -> Result<ShutdownResult, Error> {
        if self.shutdown_flags.quiet() {
            self.shutdown_flags.set_sent();
            self.shutdown_flags.set_received();
            return Ok(ShutdownResult::Received);
        }

        if self.conn.is_none() {
            return Err(Error::bad_data("shutdown while in init"));
        }

        let received = self.with_connection(|conn, bio| conn.shutdown(bio))?;
        Ok(match received {
            true => ShutdownResult::Received,
            false => ShutdownResult::Sent,
        })
    }

    pub fn get_shutdown(&self) -> i32 {
        self.shutdown_flags.get()
    }

    pub fn set_shutdown(&mut self, flags: i32) {
        self.shutdown_flags.set(flags);
    }

    pub fn set_quiet_shutdown(&mut self, enabled: bool) {
        self.shutdown_flags.set_quiet(enabled);
    }

    pub fn get_quiet_shutdown(&self) -> bool {
        self.shutdown_flags.quiet()
    }

    pub fn get_pending_plaintext(&self) -> usize {
        self.conn
            .as_ref()
            .map(|conn| conn.pending())
            .unwrap_or_default()
    }

    /// `SSL_get_error`'s answer for the last I/O call.
    pub fn get_error(&self) -> c_int {
        self.last_error
    }

    pub fn get_negotiated_cipher(&self) -> Option<&'static SslCipher> {
        self.conn.as_ref().and_then(|conn| conn.negotiated_suite())
    }

    pub fn get_peer_cert(&self) -> Option<&X509> {
        self.conn.as_ref().and_then(|conn| conn.peer_certificate())
    }

    pub fn get_last_verification_result(&self) -> i64 {
        match &self.conn {
            Some(conn) => conn.verify_result(),
            None => X509_V_ERR_UNSPECIFIED as i64,
        }
    }

    pub fn is_established(&self) -> bool {
        self.conn.as_ref().is_some_and(|conn| !conn.is_handshaking())
    }

    pub fn handshake_state(&self) -> HandshakeState {
        match &self.conn {
            Some(conn) if conn.is_fatal() => HandshakeState::Error,
            Some(conn) => match (self.mode, conn.is_handshaking()) {
                (ConnMode::Server, true) => HandshakeState::ServerAwaitingClientHello,
                (ConnMode::Client, true) => HandshakeState::ClientAwaitingServerHello,
                (ConnMode::Unknown, true) => HandshakeState::Before,
                (_, false) => HandshakeState::Finished,
            },
            None => HandshakeState::Before,
        }
    }

    /// Runs `op` on the connection (starting one if needed) and the
    /// transport, recording the outcome for `SSL_get_error` and
    /// `SSL_get_shutdown`.
    fn with_connection<T>(
        &mut self,
        op: impl FnOnce(&mut Connection, &mut Bio) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let result = self.init_conn().and_then(|()| match (&mut self.conn, &mut self.bio) {
            (Some(conn), Some(bio)) => op(conn, bio),
            (_, None) => Err(Error::bad_data("no transport attached")),
            (None, _) => Err(Error::internal("connection missing")),
        });

        if let Some(conn) = &self.conn {
            if conn.sent_close() {
                self.shutdown_flags.set_sent();
            }
            if conn.received_close() {
                self.shutdown_flags.set_received();
            }
        }

        self.last_error = match &result {
            Ok(_) => SSL_ERROR_NONE,
            Err(e) => e.ssl_error_code(),
        };
        result
    }

    fn init_conn(&mut self) -> Result<(), Error> {
        if self.conn.is_some() {
            return Ok(());
        }

        let role = match self.mode {
            ConnMode::Client => Role::Client,
            ConnMode::Server => Role::Server,
            ConnMode::Unknown => return Err(Error::bad_data("connection mode required")),
        };

        let max_depth = match usize::try_from(self.verify_depth) {
            Ok(depth) => depth,
            Err(_) => DEFAULT_VERIFY_DEPTH,
        };

        let certified_key = self.auth_keys.certified_key();
        let verifier = match role {
            Role::Client => PeerVerifier::for_server(
                Arc::clone(&self.ca_store),
                self.verify_mode,
                max_depth,
                self.expected_server_name(),
            ),
            Role::Server => {
                if certified_key.is_none() {
                    return Err(Error::bad_data("missing server keys"));
                }
                PeerVerifier::for_client(Arc::clone(&self.ca_store), self.verify_mode, max_depth)
            }
        };

        log::debug!("starting {role:?} connection");
        self.conn = Some(Connection::new(
            role,
            HandshakeConfig {
                suites: self.suites.clone(),
                certified_key,
                verifier,
                server_name: self.sni_server_name.clone(),
            },
        ));
        Ok(())
    }
}

/// This is a reduced-fidelity version of `OSSL_HANDSHAKE_STATE`.
#[derive(Debug, PartialEq)]
pub enum HandshakeState {
    Before,
    Finished,
    Error,
    ClientAwaitingServerHello,
    ServerAwaitingClientHello,
}

impl HandshakeState {
    pub fn in_init(&self) -> bool {
        // nb. SSL_in_init becomes 1 on sending a fatal alert
        !matches!(self, Self::Finished)
    }
}

impl From<HandshakeState> for c_uint {
    fn from(hs: HandshakeState) -> c_uint {
        match hs {
            HandshakeState::Before => 0,
            HandshakeState::Finished => 1,
            // error resets openssl state machine to the start
            HandshakeState::Error => 1,
            // aka OSSL_HANDSHAKE_STATE_TLS_ST_CR_SRVR_HELLO
            HandshakeState::ClientAwaitingServerHello => 3,
            // aka OSSL_HANDSHAKE_STATE_TLS_ST_SR_CLNT_HELLO
            HandshakeState::ServerAwaitingClientHello => 22,
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
enum ConnMode {
    Unknown,
    Client,
    Server,
}

#[derive(Debug, PartialEq)]
#[repr(i32)]
pub enum ShutdownResult {
    Sent = 0,
    Received = 1,
}

#[derive(Default)]
struct ShutdownFlags(i32);

impl ShutdownFlags {
    const SENT: i32 = 1;
    const RECEIVED: i32 = 2;
    const PUBLIC: i32 = Self::SENT | Self::RECEIVED;

    const PRIV_QUIET: i32 = 4;

    fn set_sent(&mut self) {
        self.0 |= Self::SENT;
    }

    fn set_received(&mut self) {
        self.0 |= Self::RECEIVED;
    }

    fn set(&mut self, flags: i32) {
        self.0 = (self.0 & !Self::PUBLIC) | (flags & Self::PUBLIC);
    }

    fn get(&self) -> i32 {
        self.0 & Self::PUBLIC
    }

    fn set_quiet(&mut self, enabled: bool) {
        if enabled {
            self.0 |= Self::PRIV_QUIET;
        } else {
            self.0 &= !Self::PRIV_QUIET;
        }
    }

    fn quiet(&self) -> bool {
        self.0 & Self::PRIV_QUIET == Self::PRIV_QUIET
    }
}

#[derive(Default, Debug, Clone, Copy)]
pub struct VerifyMode(i32);

impl VerifyMode {
    pub const NONE: i32 = 0x0;
    pub const PEER: i32 = 0x1;
    pub const FAIL_IF_NO_PEER_CERT: i32 = 0x2;
    // other flags not mentioned here are not implemented.

    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub fn client_must_verify_server(&self) -> bool {
        self.0 & Self::PEER == Self::PEER
    }

    pub fn server_must_attempt_client_auth(&self) -> bool {
        self.0 & Self::PEER == Self::PEER
    }

    pub fn server_must_verify_client(&self) -> bool {
        let bitmap = Self::PEER | Self::FAIL_IF_NO_PEER_CERT;
        self.0 & bitmap == bitmap
    }
}

impl From<i32> for VerifyMode {
    fn from(i: i32) -> Self {
        Self(i)
    }
}

impl From<VerifyMode> for i32 {
    fn from(v: VerifyMode) -> Self {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SSL_ERROR_SSL;
    use pretty_assertions::assert_eq;

    fn data(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/data")
            .join(name)
    }

    #[test]
    fn cipher_table() {
        let names = SslCipher::all()
            .map(|c| c.openssl_name.to_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names, ["AES128-SHA256", "AES128-SHA", "RC4-SHA", "RC4-MD5"]);

        let rc4 = SslCipher::find_by_id(CipherSuite::from(0x0004u16)).unwrap();
        assert_eq!(rc4.openssl_name, c"RC4-MD5");
        assert_eq!(rc4.openssl_id(), 0x0300_0004);
        assert_eq!(rc4.mac, &MD5);
        assert!(SslCipher::find_by_id(CipherSuite::from(0x1301u16)).is_none());

        assert_eq!(
            SslCipher::find_by_name("TLS_RSA_WITH_AES_128_CBC_SHA"),
            SslCipher::find_by_name("AES128-SHA")
        );
        assert_eq!(SslCipher::find_by_name("aes128-sha"), None);
    }

    #[test]
    fn cipher_lists() {
        let names = |list: &str| {
            parse_cipher_list(list).map(|suites| {
                suites
                    .iter()
                    .map(|c| c.openssl_name.to_str().unwrap())
                    .collect::<Vec<_>>()
            })
        };

        assert_eq!(names("RC4-MD5:AES128-SHA").unwrap(), ["RC4-MD5", "AES128-SHA"]);
        assert_eq!(
            names("ALL:!RC4-MD5:!RC4-SHA").unwrap(),
            ["AES128-SHA256", "AES128-SHA"]
        );
        assert_eq!(
            names("ECDHE-RSA-AES128-GCM-SHA256, RC4-SHA RC4-SHA").unwrap(),
            ["RC4-SHA"]
        );
        assert!(names("ECDHE-RSA-AES128-GCM-SHA256").is_err());
        assert!(names("").is_err());
    }

    #[test]
    fn verify_mode_bits() {
        let none = VerifyMode::default();
        assert!(!none.client_must_verify_server());
        assert!(!none.server_must_attempt_client_auth());

        let peer = VerifyMode::from(VerifyMode::PEER);
        assert!(peer.client_must_verify_server());
        assert!(peer.server_must_attempt_client_auth());
        assert!(!peer.server_must_verify_client());

        let strict = VerifyMode::from_bits(VerifyMode::PEER | VerifyMode::FAIL_IF_NO_PEER_CERT);
        assert!(strict.server_must_verify_client());
        assert_eq!(i32::from(strict), 3);

        // FAIL_IF_NO_PEER_CERT means nothing without PEER
        assert!(!VerifyMode::from(VerifyMode::FAIL_IF_NO_PEER_CERT).server_must_verify_client());
    }

    #[test]
    fn shutdown_flags() {
        let mut flags = ShutdownFlags::default();
        assert_eq!(flags.get(), 0);
        flags.set_quiet(true);
        assert!(flags.quiet());
        assert_eq!(flags.get(), 0);
        flags.set_sent();
        assert_eq!(flags.get(), ShutdownFlags::SENT);
        flags.set(0xff);
        assert_eq!(flags.get(), ShutdownFlags::PUBLIC);
        flags.set(ShutdownFlags::RECEIVED);
        assert_eq!(flags.get(), ShutdownFlags::RECEIVED);
        flags.set(0);
        assert_eq!(flags.get(), 0);
        assert!(flags.quiet());
        flags.set_quiet(false);
        assert!(!flags.quiet());
    }

    #[test]
    fn methods_pick_modes() {
        assert_eq!(TLS_METHOD.mode(), ConnMode::Unknown);
        assert_eq!(TLS_CLIENT_METHOD.mode(), ConnMode::Client);
        assert_eq!(TLS_SERVER_METHOD.mode(), ConnMode::Server);
    }

    #[test]
    fn context_loads_keys_and_anchors() {
        let mut ctx = SslContext::new(&TLS_SERVER_METHOD);
        assert!(ctx.check_private_key().is_err());

        ctx.use_certificate_chain_file(&data("leaf-chain.pem"))
            .unwrap();
        ctx.use_private_key_file(&data("server-rsa.key"), SSL_FILETYPE_PEM)
            .unwrap();
        assert!(ctx.check_private_key().is_err());

        ctx.use_private_key_file(&data("leaf.key"), SSL_FILETYPE_PEM)
            .unwrap();
        ctx.check_private_key().unwrap();

        ctx.use_certificate_file(&data("server.pem"), SSL_FILETYPE_PEM)
            .unwrap();
        ctx.use_private_key_file(&data("server.key"), SSL_FILETYPE_PEM)
            .unwrap();
        ctx.check_private_key().unwrap();

        assert!(ctx
            .use_private_key_file(&data("server.pem"), SSL_FILETYPE_PEM)
            .is_err());
        assert!(ctx
            .use_private_key_file(&data("server.key"), 42)
            .is_err());
        assert!(ctx
            .use_certificate_chain_file(&data("missing.pem"))
            .is_err());

        assert!(ctx.load_verify_locations(None, None).is_err());
        ctx.load_verify_locations(Some(&data("ca.pem")), None)
            .unwrap();
        ctx.load_verify_locations(None, Some(&data(""))).unwrap();
        assert!(!ctx.ca_store.is_empty());
    }

    #[test]
    fn ssl_inherits_context() {
        let mut ctx = SslContext::new(&TLS_METHOD);
        ctx.set_verify(VerifyMode::from(VerifyMode::PEER));
        ctx.set_verify_depth(3);
        ctx.set_verify_name(Some("pinned.example.com"));
        ctx.set_cipher_list("RC4-SHA").unwrap();
        let ctx = Arc::new(Mutex::new(ctx));

        let mut ssl = {
            let inner = ctx.lock().unwrap();
            Ssl::new(ctx.clone(), &inner).unwrap()
        };
        assert!(ssl.verify_mode.client_must_verify_server());
        assert_eq!(ssl.verify_depth, 3);
        assert_eq!(ssl.verify_server_name.as_deref(), Some("pinned.example.com"));
        assert_eq!(ssl.suites, vec![&TLS_RSA_WITH_RC4_128_SHA]);

        // nothing happens before a role is chosen
        assert_eq!(ssl.handshake_state(), HandshakeState::Before);
        assert!(ssl.handshake().is_err());
        assert!(ssl.read(&mut [0u8; 4]).is_err());
        assert_eq!(ssl.get_error(), SSL_ERROR_SSL);

        ssl.set_client_mode();
        assert!(ssl.set_sni_hostname("www.example.com"));
        assert!(!ssl.set_sni_hostname("10.0.0.1"));
        assert!(!ssl.set_sni_hostname(""));
        assert_eq!(ssl.server_name(), Some("www.example.com"));

        // the context pin outranks SSL_set1_host, which outranks SNI
        ssl.set_verify_hostname(Some("host.example.com"));
        assert_eq!(ssl.expected_server_name().as_deref(), Some("pinned.example.com"));
        ssl.verify_server_name = None;
        assert_eq!(ssl.expected_server_name().as_deref(), Some("host.example.com"));
        ssl.set_verify_hostname(Some(""));
        assert_eq!(ssl.expected_server_name().as_deref(), Some("www.example.com"));

        // no transport yet
        assert!(ssl.connect().is_err());
        assert_eq!(ssl.get_error(), SSL_ERROR_SSL);
        assert_eq!(ssl.handshake_state(), HandshakeState::ClientAwaitingServerHello);
        assert!(ssl.handshake_state().in_init());
        assert_eq!(ssl.get_last_verification_result(), X509_V_ERR_UNSPECIFIED as i64);
        assert!(ssl.try_shutdown().is_err());

        ssl.set_quiet_shutdown(true);
        assert_eq!(ssl.try_shutdown().unwrap(), ShutdownResult::Received);
        assert_eq!(ssl.get_shutdown(), ShutdownFlags::PUBLIC);
    }

    #[test]
    fn server_needs_keys() {
        let ctx = Arc::new(Mutex::new(SslContext::new(&TLS_SERVER_METHOD)));
        let mut ssl = {
            let inner = ctx.lock().unwrap();
            Ssl::new(ctx.clone(), &inner).unwrap()
        };
        ssl.set_bio(Bio::new(std::io::Cursor::new(Vec::new())));
        assert!(ssl.is_server());
        assert!(ssl.connect().is_err());
        let err = ssl.accept().unwrap_err();
        assert_eq!(err.to_string(), "missing server keys");
    }
}
