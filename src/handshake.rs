//! The TLS 1.2 handshake, and the connection it establishes.
//!
//! [`Connection`] owns a [`RecordLayer`] and drives either side of an RSA key
//! exchange handshake over a [`Transport`]. Every operation is non-blocking:
//! when the transport cannot make progress the call fails with a
//! `want_read`/`want_write` error and may simply be repeated later.
//!
//! Keys live in a [`Security`] context. While a handshake runs there are two
//! of them: the `current` one protecting records (none for the first
//! handshake) and the `next` one being negotiated. Each direction switches to
//! `next` at its ChangeCipherSpec, and once both Finished messages have been
//! checked `next` becomes the established context.

use core::mem;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use rustls::{AlertDescription, ContentType, HandshakeType, ProtocolVersion, SignatureScheme};

use crate::bio::Transport;
use crate::constants::{ALERT_LEVEL_FATAL, ALERT_LEVEL_WARNING, SSL_ERROR_ZERO_RETURN};
use crate::crypto::prf::prf;
use crate::crypto::sha256::Sha256;
use crate::crypto::{constant_time_eq, wipe, SHA256};
use crate::error::Error;
use crate::record::{DirectionState, Record, RecordLayer};
use crate::sign::CertifiedKey;
use crate::verifier::PeerVerifier;
use crate::x509::X509;
use crate::SslCipher;

const TLS12: ProtocolVersion = ProtocolVersion::TLSv1_2;

const RANDOM_LEN: usize = 32;
const MAX_SESSION_ID_LEN: usize = 32;
const MASTER_SECRET_LEN: usize = 48;
const PREMASTER_SECRET_LEN: usize = 48;
const VERIFY_DATA_LEN: usize = 12;
const HANDSHAKE_HEADER_LEN: usize = 4;

/// Largest handshake message we will reassemble.
const MAX_HANDSHAKE_LEN: usize = 0x10000;

/// Signals RFC 5746 support without an extension.
const EMPTY_RENEGOTIATION_INFO_SCSV: u16 = 0x00ff;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
const EXT_RENEGOTIATION_INFO: u16 = 0xff01;

const SNI_HOST_NAME: u8 = 0;
const COMPRESSION_NULL: u8 = 0;
const CERT_TYPE_RSA_SIGN: u8 = 1;
const CHANGE_CIPHER_SPEC: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Where a connection is in its handshake.
///
/// The server has no states between sending its first flight and
/// finishing: which client messages have arrived is tracked separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Initial,
    ClientHelloSent,
    AwaitClientHello,
    ClientHelloReceived,
    ServerHelloSent,
    ServerHelloReceived,
    ServerCertReceived,
    ServerDoneReceived,
    ClientFinished,
    Established,
    Closing,
}

/// What a new [`Connection`] negotiates with.
pub struct HandshakeConfig {
    /// In order of preference.
    pub suites: Vec<&'static SslCipher>,
    /// Required for servers; clients send it if asked.
    pub certified_key: Option<Arc<CertifiedKey>>,
    pub verifier: PeerVerifier,
    /// Sent by clients in the server_name extension.
    pub server_name: Option<String>,
}

/// Negotiated parameters and keys for one epoch of a connection.
struct TlsSecurity {
    suite: Option<&'static SslCipher>,
    client_random: [u8; RANDOM_LEN],
    server_random: [u8; RANDOM_LEN],
    master_secret: [u8; MASTER_SECRET_LEN],
    transcript: Sha256,
    tx: Option<DirectionState>,
    rx: Option<DirectionState>,
    tx_active: bool,
    rx_active: bool,
}

impl TlsSecurity {
    fn new() -> Self {
        Self {
            suite: None,
            client_random: [0; RANDOM_LEN],
            server_random: [0; RANDOM_LEN],
            master_secret: [0; MASTER_SECRET_LEN],
            transcript: Sha256::new(),
            tx: None,
            rx: None,
            tx_active: false,
            rx_active: false,
        }
    }

    /// Computes the master secret from `pre_master` and prepares (but does
    /// not activate) both directions.
    fn derive_keys(&mut self, pre_master: &[u8], role: Role) -> Result<(), Error> {
        let suite = self
            .suite
            .ok_or_else(|| Error::internal("keys derived before suite negotiated"))?;

        let mut seed = [0u8; 2 * RANDOM_LEN];
        seed[..RANDOM_LEN].copy_from_slice(&self.client_random);
        seed[RANDOM_LEN..].copy_from_slice(&self.server_random);
        prf(pre_master, b"master secret", &seed, &mut self.master_secret);

        seed[..RANDOM_LEN].copy_from_slice(&self.server_random);
        seed[RANDOM_LEN..].copy_from_slice(&self.client_random);

        // CBC records carry an explicit IV, so no fixed IVs are drawn
        let mac_len = suite.mac.digest_len;
        let key_len = suite.cipher.key_len;
        let mut block = vec![0u8; 2 * (mac_len + key_len)];
        prf(&self.master_secret, b"key expansion", &seed, &mut block);

        let (client_mac, rest) = block.split_at(mac_len);
        let (server_mac, rest) = rest.split_at(mac_len);
        let (client_key, server_key) = rest.split_at(key_len);

        let ((tx_key, tx_mac), (rx_key, rx_mac)) = match role {
            Role::Client => ((client_key, client_mac), (server_key, server_mac)),
            Role::Server => ((server_key, server_mac), (client_key, client_mac)),
        };
        self.tx = Some(DirectionState::new(
            suite.cipher,
            suite.mac,
            tx_key,
            tx_mac,
            true,
        ));
        self.rx = Some(DirectionState::new(
            suite.cipher,
            suite.mac,
            rx_key,
            rx_mac,
            false,
        ));

        wipe(&mut block);
        Ok(())
    }

    fn verify_data(&self, label: &[u8], handshake_hash: &[u8]) -> [u8; VERIFY_DATA_LEN] {
        let mut out = [0u8; VERIFY_DATA_LEN];
        prf(&self.master_secret, label, handshake_hash, &mut out);
        out
    }
}

impl Drop for TlsSecurity {
    fn drop(&mut self) {
        wipe(&mut self.master_secret);
    }
}

enum Security {
    Negotiating {
        current: Option<Box<TlsSecurity>>,
        next: Box<TlsSecurity>,
    },
    Established(Box<TlsSecurity>),
}

impl Security {
    fn next(&self) -> Option<&TlsSecurity> {
        match self {
            Self::Negotiating { next, .. } => Some(&**next),
            Self::Established(_) => None,
        }
    }

    fn next_mut(&mut self) -> Result<&mut TlsSecurity, Error> {
        match self {
            Self::Negotiating { next, .. } => Ok(&mut **next),
            Self::Established(_) => Err(Error::internal("no handshake in progress")),
        }
    }

    fn write_state(&mut self) -> Option<&mut DirectionState> {
        match self {
            Self::Negotiating { current, next } => match next.tx_active {
                true => next.tx.as_mut(),
                false => current.as_mut().and_then(|c| c.tx.as_mut()),
            },
            Self::Established(sec) => sec.tx.as_mut(),
        }
    }

    fn read_state(&mut self) -> Option<&mut DirectionState> {
        match self {
            Self::Negotiating { current, next } => match next.rx_active {
                true => next.rx.as_mut(),
                false => current.as_mut().and_then(|c| c.rx.as_mut()),
            },
            Self::Established(sec) => sec.rx.as_mut(),
        }
    }

    fn suite(&self) -> Option<&'static SslCipher> {
        match self {
            Self::Negotiating { next, .. } => next.suite,
            Self::Established(sec) => sec.suite,
        }
    }

    /// Makes the negotiated context the established one, discarding the old.
    fn promote(&mut self) {
        if let Self::Negotiating { next, .. } = self {
            let next = mem::replace(next, Box::new(TlsSecurity::new()));
            *self = Self::Established(next);
        }
    }
}

/// One end of a TLS 1.2 connection.
pub struct Connection {
    role: Role,
    config: HandshakeConfig,
    state: HandshakeState,
    security: Security,
    records: RecordLayer,

    /// Handshake bytes not yet forming a whole message.
    handshake_buf: Vec<u8>,
    /// Decrypted application data not yet read.
    appdata: Vec<u8>,

    fatal: bool,
    close_sent: bool,
    close_received: bool,

    peer_chain: Option<X509>,
    /// Client: the server asked for a certificate. Server: we asked for one.
    cert_requested: bool,
    secure_renegotiation: bool,
    /// Server: name from the client's server_name extension.
    requested_server_name: Option<String>,
    /// Server: version from the ClientHello, checked in the premaster secret.
    client_version: u16,

    // server: which parts of the client's second flight have arrived
    peer_cert_seen: bool,
    key_exchanged: bool,
    verify_pending: bool,
}

impl Connection {
    pub fn new(role: Role, config: HandshakeConfig) -> Self {
        Self {
            role,
            config,
            state: HandshakeState::Initial,
            security: Security::Negotiating {
                current: None,
                next: Box::new(TlsSecurity::new()),
            },
            records: RecordLayer::default(),
            handshake_buf: Vec::new(),
            appdata: Vec::new(),
            fatal: false,
            close_sent: false,
            close_received: false,
            peer_chain: None,
            cert_requested: false,
            secure_renegotiation: false,
            requested_server_name: None,
            client_version: 0,
            peer_cert_seen: false,
            key_exchanged: false,
            verify_pending: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_handshaking(&self) -> bool {
        !self.handshake_done()
    }

    pub fn negotiated_suite(&self) -> Option<&'static SslCipher> {
        self.security.suite()
    }

    /// The peer's certificate chain, end-entity first.
    pub fn peer_certificate(&self) -> Option<&X509> {
        self.peer_chain.as_ref()
    }

    /// `X509_V_*` result of the last peer certificate verification.
    pub fn verify_result(&self) -> i64 {
        self.config.verifier.last_result()
    }

    /// Server: host name the client asked for.
    pub fn requested_server_name(&self) -> Option<&str> {
        self.requested_server_name.as_deref()
    }

    pub fn secure_renegotiation(&self) -> bool {
        self.secure_renegotiation
    }

    /// Bytes of application data that can be read without touching the transport.
    pub fn pending(&self) -> usize {
        self.appdata.len()
    }

    pub fn wants_write(&self) -> bool {
        self.records.has_pending_write()
    }

    /// A fatal alert was sent or received; the connection is unusable.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn sent_close(&self) -> bool {
        self.close_sent
    }

    pub fn received_close(&self) -> bool {
        self.close_received
    }

    pub fn complete_handshake(&mut self, io: &mut dyn Transport) -> Result<(), Error> {
        self.drive(io, Self::handshake_done)
    }

    /// Reads application data, completing the handshake first if needed.
    ///
    /// Fails with `zero_return` once the peer's close_notify has been
    /// received and all earlier data has been read.
    pub fn read(&mut self, io: &mut dyn Transport, buf: &mut [u8]) -> Result<usize, Error> {
        if self.appdata.is_empty() {
            self.drive(io, |conn| {
                conn.handshake_done() && (!conn.appdata.is_empty() || conn.close_received)
            })?;
        }
        if self.appdata.is_empty() {
            return Err(Error::zero_return());
        }

        let n = buf.len().min(self.appdata.len());
        buf[..n].copy_from_slice(&self.appdata[..n]);
        self.appdata.drain(..n);
        Ok(n)
    }

    /// Writes all of `data`, completing the handshake first if needed.
    ///
    /// Once the records are encoded the data counts as written; if the
    /// transport cannot take them yet they go out on a later call.
    pub fn write(&mut self, io: &mut dyn Transport, data: &[u8]) -> Result<usize, Error> {
        self.complete_handshake(io)?;
        if self.close_sent {
            return Err(Error::bad_data("write after close_notify"));
        }
        if data.is_empty() {
            return Ok(0);
        }

        self.records.write_record(
            ContentType::ApplicationData,
            data,
            self.security.write_state(),
        );
        match self.records.flush(io) {
            Err(e) if !e.is_retryable() => Err(self.fail(e, io)),
            _ => Ok(data.len()),
        }
    }

    /// Sends our close_notify (once), then reports whether the peer's has
    /// arrived. A second call waits for it, discarding unread data.
    pub fn shutdown(&mut self, io: &mut dyn Transport) -> Result<bool, Error> {
        if self.fatal {
            return Err(Error::bad_data("connection failed earlier"));
        }
        if !self.handshake_done() {
            return Err(Error::bad_data("shutdown while in handshake"));
        }

        if !self.close_sent {
            log::debug!("sending close_notify");
            self.send_alert(ALERT_LEVEL_WARNING, AlertDescription::CloseNotify);
            self.close_sent = true;
            self.state = HandshakeState::Closing;
            if let Err(e) = self.records.flush(io) {
                return Err(self.fail(e, io));
            }
            return Ok(self.close_received);
        }

        if !self.close_received {
            self.appdata.clear();
            self.drive(io, |conn| conn.close_received)?;
        }
        Ok(true)
    }

    fn handshake_done(&self) -> bool {
        matches!(
            self.state,
            HandshakeState::Established | HandshakeState::Closing
        )
    }

    /// Runs the connection until `until` holds, the transport would block,
    /// or something fails.
    fn drive(&mut self, io: &mut dyn Transport, until: fn(&Self) -> bool) -> Result<(), Error> {
        if self.fatal {
            return Err(Error::bad_data("connection failed earlier"));
        }
        match self.drive_inner(io, until) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e, io)),
        }
    }

    fn drive_inner(&mut self, io: &mut dyn Transport, until: fn(&Self) -> bool) -> Result<(), Error> {
        if self.state == HandshakeState::Initial {
            self.start()?;
        }

        loop {
            self.records.flush(io)?;
            if until(self) {
                return Ok(());
            }
            if self.close_received {
                return Err(Error::zero_return());
            }
            if self.process_buffered()? {
                continue;
            }
            if self.records.fill(io)? == 0 {
                return Err(Error::syscall("unexpected EOF from peer"));
            }
        }
    }

    /// Handles every complete record already received. Returns whether
    /// there were any.
    fn process_buffered(&mut self) -> Result<bool, Error> {
        let mut progressed = false;
        while let Some(record) = self.records.next_record(self.security.read_state())? {
            progressed = true;
            self.handle_record(record)?;
            if self.close_received {
                break;
            }
        }
        Ok(progressed)
    }

    /// Sends the alert `err` calls for, and poisons the connection unless
    /// `err` is a retry or orderly close.
    fn fail(&mut self, err: Error, io: &mut dyn Transport) -> Error {
        if err.is_retryable() || err.ssl_error_code() == SSL_ERROR_ZERO_RETURN {
            return err;
        }

        if let Some(alert) = err.alert_to_send() {
            log::warn!("sending fatal alert: {err}");
            self.send_alert(ALERT_LEVEL_FATAL, alert);
            // best effort: the connection is dead either way
            let _ = self.records.flush(io);
        }
        self.fatal = true;
        err
    }

    fn start(&mut self) -> Result<(), Error> {
        match self.role {
            Role::Client => self.send_client_hello(),
            Role::Server => {
                if self.config.certified_key.is_none() {
                    return Err(Error::bad_data("server has no certificate and key"));
                }
                self.state = HandshakeState::AwaitClientHello;
                Ok(())
            }
        }
    }

    fn handle_record(&mut self, record: Record) -> Result<(), Error> {
        match record.typ {
            ContentType::Alert => self.handle_alert(&record.payload),
            ContentType::ChangeCipherSpec => self.handle_change_cipher_spec(&record.payload),
            ContentType::Handshake => {
                if record.payload.is_empty() {
                    return Err(unexpected_message("empty handshake record"));
                }
                self.handshake_buf.extend_from_slice(&record.payload);
                while let Some(message) = self.take_handshake_message()? {
                    self.handle_message(message)?;
                }
                Ok(())
            }
            ContentType::ApplicationData if self.handshake_done() => {
                self.appdata.extend_from_slice(&record.payload);
                Ok(())
            }
            typ => Err(unexpected_message(&format!("{typ:?} record during handshake"))),
        }
    }

    fn take_handshake_message(&mut self) -> Result<Option<Vec<u8>>, Error> {
        if self.handshake_buf.len() < HANDSHAKE_HEADER_LEN {
            return Ok(None);
        }
        let len = u24(&self.handshake_buf[1..4]);
        if len > MAX_HANDSHAKE_LEN {
            return Err(Error::alert(
                AlertDescription::DecodeError,
                "handshake message too long",
            ));
        }
        if self.handshake_buf.len() < HANDSHAKE_HEADER_LEN + len {
            return Ok(None);
        }
        Ok(Some(
            self.handshake_buf
                .drain(..HANDSHAKE_HEADER_LEN + len)
                .collect(),
        ))
    }

    fn handle_alert(&mut self, payload: &[u8]) -> Result<(), Error> {
        let &[level, desc] = payload else {
            return Err(Error::alert(AlertDescription::DecodeError, "malformed alert"));
        };
        let desc = AlertDescription::from(desc);

        if desc == AlertDescription::CloseNotify {
            log::debug!("received close_notify");
            self.close_received = true;
            if self.handshake_done() {
                self.state = HandshakeState::Closing;
            }
            return Ok(());
        }

        if level == ALERT_LEVEL_WARNING {
            log::info!("received warning alert {desc:?}");
            return Ok(());
        }

        log::warn!("received fatal alert {desc:?}");
        Err(Error::alert_received(desc))
    }

    fn ccs_expected(&self) -> bool {
        let Some(next) = self.security.next() else {
            return false;
        };
        let ready = match self.role {
            Role::Client => self.state == HandshakeState::ClientFinished,
            Role::Server => {
                self.state == HandshakeState::ServerHelloSent
                    && self.key_exchanged
                    && !self.verify_pending
            }
        };
        ready && !next.rx_active && next.rx.is_some()
    }

    fn handle_change_cipher_spec(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload != [CHANGE_CIPHER_SPEC] {
            return Err(Error::alert(
                AlertDescription::DecodeError,
                "malformed ChangeCipherSpec",
            ));
        }
        if !self.handshake_buf.is_empty() || !self.ccs_expected() {
            return Err(unexpected_message("unexpected ChangeCipherSpec"));
        }
        log::trace!("rx ChangeCipherSpec");
        self.security.next_mut()?.rx_active = true;
        Ok(())
    }

    fn handle_message(&mut self, message: Vec<u8>) -> Result<(), Error> {
        let typ = HandshakeType::from(message[0]);
        let body = &message[HANDSHAKE_HEADER_LEN..];
        log::trace!("rx handshake {typ:?}, {} bytes", body.len());

        if typ == HandshakeType::HelloRequest && self.role == Role::Client {
            if !body.is_empty() {
                return Err(decode_error());
            }
            // ignored mid-handshake, refused afterwards
            if self.handshake_done() {
                self.refuse_renegotiation();
            }
            return Ok(());
        }

        if self.handshake_done() {
            return match (self.role, typ) {
                (Role::Server, HandshakeType::ClientHello) => {
                    self.refuse_renegotiation();
                    Ok(())
                }
                _ => Err(unexpected_message(&format!("{typ:?} after handshake"))),
            };
        }

        let next = self.security.next_mut()?;
        let prior_hash = next.transcript.snapshot();
        let rx_active = next.rx_active;
        next.transcript.update(&message);

        use HandshakeState::*;
        match (self.role, self.state, typ) {
            (Role::Client, ClientHelloSent, HandshakeType::ServerHello) => {
                self.client_handle_server_hello(body)
            }
            (Role::Client, ServerHelloReceived, HandshakeType::Certificate) => {
                self.client_handle_certificate(body)
            }
            (Role::Client, ServerCertReceived, HandshakeType::CertificateRequest)
                if !self.cert_requested =>
            {
                self.client_handle_certificate_request(body)
            }
            (Role::Client, ServerCertReceived, HandshakeType::ServerHelloDone) => {
                self.client_handle_server_hello_done(body)
            }
            (Role::Client, ClientFinished, HandshakeType::Finished) if rx_active => {
                self.client_handle_finished(body, &prior_hash)
            }
            (Role::Server, AwaitClientHello, HandshakeType::ClientHello) => {
                self.server_handle_client_hello(body)
            }
            (Role::Server, ServerHelloSent, HandshakeType::Certificate)
                if self.cert_requested && !self.peer_cert_seen && !self.key_exchanged =>
            {
                self.server_handle_certificate(body)
            }
            (Role::Server, ServerHelloSent, HandshakeType::ClientKeyExchange)
                if !self.key_exchanged && (self.peer_cert_seen || !self.cert_requested) =>
            {
                self.server_handle_client_key_exchange(body)
            }
            (Role::Server, ServerHelloSent, HandshakeType::CertificateVerify)
                if self.key_exchanged && self.verify_pending =>
            {
                self.server_handle_certificate_verify(body, &prior_hash)
            }
            (Role::Server, ServerHelloSent, HandshakeType::Finished) if rx_active => {
                self.server_handle_finished(body, &prior_hash)
            }
            (_, state, typ) => Err(unexpected_message(&format!(
                "{typ:?} in state {state:?}"
            ))),
        }
    }

    fn refuse_renegotiation(&mut self) {
        log::info!("refusing renegotiation");
        self.send_alert(ALERT_LEVEL_WARNING, AlertDescription::NoRenegotiation);
    }

    fn send_handshake(&mut self, typ: HandshakeType, body: &[u8]) -> Result<(), Error> {
        let mut message = Vec::with_capacity(HANDSHAKE_HEADER_LEN + body.len());
        message.push(u8::from(typ));
        put_u24(&mut message, body.len());
        message.extend_from_slice(body);

        self.security.next_mut()?.transcript.update(&message);
        log::trace!("tx handshake {typ:?}, {} bytes", body.len());
        self.records.write_record(
            ContentType::Handshake,
            &message,
            self.security.write_state(),
        );
        Ok(())
    }

    fn send_alert(&mut self, level: u8, desc: AlertDescription) {
        self.records.write_record(
            ContentType::Alert,
            &[level, u8::from(desc)],
            self.security.write_state(),
        );
    }

    /// Sends ChangeCipherSpec and switches our direction to the new keys.
    fn send_change_cipher_spec(&mut self) -> Result<(), Error> {
        self.records.write_record(
            ContentType::ChangeCipherSpec,
            &[CHANGE_CIPHER_SPEC],
            self.security.write_state(),
        );
        let next = self.security.next_mut()?;
        if next.tx.is_none() {
            return Err(Error::internal("no keys to change to"));
        }
        next.tx_active = true;
        Ok(())
    }

    fn send_finished(&mut self, label: &[u8]) -> Result<(), Error> {
        let next = self.security.next_mut()?;
        let hash = next.transcript.snapshot();
        let verify_data = next.verify_data(label, &hash);
        self.send_handshake(HandshakeType::Finished, &verify_data)
    }

    fn check_finished(&mut self, body: &[u8], label: &[u8], prior_hash: &[u8]) -> Result<(), Error> {
        if body.len() != VERIFY_DATA_LEN {
            return Err(decode_error());
        }
        let expected = self.security.next_mut()?.verify_data(label, prior_hash);
        if !constant_time_eq(&expected, body) {
            return Err(Error::alert(
                AlertDescription::DecryptError,
                "Finished verify_data mismatch",
            ));
        }
        Ok(())
    }

    fn establish(&mut self) {
        self.security.promote();
        self.state = HandshakeState::Established;
        log::debug!(
            "handshake complete as {:?} with {}",
            self.role,
            self.negotiated_suite()
                .map(|s| s.openssl_name.to_string_lossy())
                .unwrap_or_default()
        );
    }

    fn send_client_hello(&mut self) -> Result<(), Error> {
        let mut random = [0u8; RANDOM_LEN];
        OsRng.fill_bytes(&mut random);
        self.security.next_mut()?.client_random = random;

        let mut body = Vec::new();
        put_u16(&mut body, u16::from(TLS12));
        body.extend_from_slice(&random);
        body.push(0); // no session id

        let mut suites = Vec::new();
        for suite in &self.config.suites {
            put_u16(&mut suites, suite.protocol_id());
        }
        put_u16(&mut suites, EMPTY_RENEGOTIATION_INFO_SCSV);
        put_vec16(&mut body, &suites);
        put_vec8(&mut body, &[COMPRESSION_NULL]);

        let mut extensions = Vec::new();
        if let Some(name) = &self.config.server_name {
            let mut entry = vec![SNI_HOST_NAME];
            put_vec16(&mut entry, name.as_bytes());
            let mut list = Vec::new();
            put_vec16(&mut list, &entry);
            put_extension(&mut extensions, EXT_SERVER_NAME, &list);
        }
        let mut schemes = Vec::new();
        put_vec16(
            &mut schemes,
            &u16::from(SignatureScheme::RSA_PKCS1_SHA256).to_be_bytes(),
        );
        put_extension(&mut extensions, EXT_SIGNATURE_ALGORITHMS, &schemes);
        put_vec16(&mut body, &extensions);

        self.send_handshake(HandshakeType::ClientHello, &body)?;
        self.state = HandshakeState::ClientHelloSent;
        Ok(())
    }

    fn client_handle_server_hello(&mut self, body: &[u8]) -> Result<(), Error> {
        let mut r = Reader::new(body);
        let version = r.u16()?;
        if version != u16::from(TLS12) {
            return Err(Error::alert(
                AlertDescription::ProtocolVersion,
                "server chose a version other than TLS 1.2",
            ));
        }
        let random = r.take(RANDOM_LEN)?;
        let session_id = r.vec8()?;
        if session_id.len() > MAX_SESSION_ID_LEN {
            return Err(decode_error());
        }
        let suite_id = r.u16()?;
        let Some(suite) = self
            .config
            .suites
            .iter()
            .find(|s| s.protocol_id() == suite_id)
            .copied()
        else {
            return Err(Error::alert(
                AlertDescription::IllegalParameter,
                "server chose a cipher suite we did not offer",
            ));
        };
        if r.u8()? != COMPRESSION_NULL {
            return Err(Error::alert(
                AlertDescription::IllegalParameter,
                "server chose compression",
            ));
        }

        if !r.is_empty() {
            let mut extensions = Reader::new(r.vec16()?);
            r.expect_empty()?;
            while !extensions.is_empty() {
                let typ = extensions.u16()?;
                let data = extensions.vec16()?;
                match typ {
                    EXT_RENEGOTIATION_INFO if data == [0] => self.secure_renegotiation = true,
                    EXT_RENEGOTIATION_INFO => {
                        return Err(Error::alert(
                            AlertDescription::HandshakeFailure,
                            "renegotiation_info not empty on initial handshake",
                        ))
                    }
                    EXT_SERVER_NAME if data.is_empty() => {}
                    _ => {
                        return Err(Error::alert(
                            AlertDescription::UnsupportedExtension,
                            "server sent an extension we did not offer",
                        ))
                    }
                }
            }
        }

        let next = self.security.next_mut()?;
        next.server_random.copy_from_slice(random);
        next.suite = Some(suite);
        log::debug!("server chose {}", suite.openssl_name.to_string_lossy());
        self.state = HandshakeState::ServerHelloReceived;
        Ok(())
    }

    fn client_handle_certificate(&mut self, body: &[u8]) -> Result<(), Error> {
        let Some(chain) = parse_certificate_list(body)? else {
            return Err(Error::alert(
                AlertDescription::HandshakeFailure,
                "server sent no certificate",
            ));
        };
        self.config.verifier.verify_server_cert(&chain)?;
        self.peer_chain = Some(chain);
        self.state = HandshakeState::ServerCertReceived;
        Ok(())
    }

    fn client_handle_certificate_request(&mut self, body: &[u8]) -> Result<(), Error> {
        let mut r = Reader::new(body);
        let types = r.vec8()?;
        let schemes = r.vec16()?;
        let _authorities = r.vec16()?;
        r.expect_empty()?;

        if !types.contains(&CERT_TYPE_RSA_SIGN) {
            log::debug!("server wants certificate types {types:?}");
        }
        if !schemes
            .chunks(2)
            .any(|s| s == u16::from(SignatureScheme::RSA_PKCS1_SHA256).to_be_bytes())
        {
            log::debug!("server does not list rsa_pkcs1_sha256 for client auth");
        }
        self.cert_requested = true;
        Ok(())
    }

    fn client_handle_server_hello_done(&mut self, body: &[u8]) -> Result<(), Error> {
        if !body.is_empty() {
            return Err(decode_error());
        }
        self.state = HandshakeState::ServerDoneReceived;

        // our certificate, if asked; an empty list if we have none
        let mut signer = None;
        if self.cert_requested {
            let chain = match &self.config.certified_key {
                Some(ck) => {
                    signer = Some(Arc::clone(ck));
                    ck.chain().to_vec()
                }
                None => {
                    log::debug!("server asked for a certificate, but we have none");
                    Vec::new()
                }
            };
            self.send_handshake(HandshakeType::Certificate, &encode_certificate_list(&chain))?;
        }

        let server_key = match &self.peer_chain {
            Some(chain) => Arc::clone(chain.public_key()),
            None => return Err(Error::internal("no server certificate")),
        };
        let mut pre_master = [0u8; PREMASTER_SECRET_LEN];
        pre_master[..2].copy_from_slice(&u16::from(TLS12).to_be_bytes());
        OsRng.fill_bytes(&mut pre_master[2..]);
        let encrypted = server_key.encrypt(&pre_master, false)?;

        let mut cke = Vec::new();
        put_vec16(&mut cke, &encrypted);
        self.send_handshake(HandshakeType::ClientKeyExchange, &cke)?;

        let derived = self
            .security
            .next_mut()
            .and_then(|next| next.derive_keys(&pre_master, Role::Client));
        wipe(&mut pre_master);
        derived?;

        if let Some(signer) = signer {
            let hash = self.security.next_mut()?.transcript.snapshot();
            let signature = signer.sign(&SHA256, &hash)?;
            let mut cv = Vec::new();
            put_u16(&mut cv, u16::from(SignatureScheme::RSA_PKCS1_SHA256));
            put_vec16(&mut cv, &signature);
            self.send_handshake(HandshakeType::CertificateVerify, &cv)?;
        }

        self.send_change_cipher_spec()?;
        self.send_finished(b"client finished")?;
        self.state = HandshakeState::ClientFinished;
        Ok(())
    }

    fn client_handle_finished(&mut self, body: &[u8], prior_hash: &[u8]) -> Result<(), Error> {
        self.check_finished(body, b"server finished", prior_hash)?;
        self.establish();
        Ok(())
    }

    fn server_handle_client_hello(&mut self, body: &[u8]) -> Result<(), Error> {
        let mut r = Reader::new(body);
        let version = r.u16()?;
        if version < u16::from(TLS12) {
            return Err(Error::alert(
                AlertDescription::ProtocolVersion,
                "client does not support TLS 1.2",
            ));
        }
        let random = r.take(RANDOM_LEN)?;
        if r.vec8()?.len() > MAX_SESSION_ID_LEN {
            return Err(decode_error());
        }
        let offered = r.vec16()?;
        if offered.is_empty() || offered.len() % 2 != 0 {
            return Err(decode_error());
        }
        let offered = offered
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        if !r.vec8()?.contains(&COMPRESSION_NULL) {
            return Err(Error::alert(
                AlertDescription::IllegalParameter,
                "client does not offer null compression",
            ));
        }

        if offered.contains(&EMPTY_RENEGOTIATION_INFO_SCSV) {
            self.secure_renegotiation = true;
        }
        if !r.is_empty() {
            let mut extensions = Reader::new(r.vec16()?);
            r.expect_empty()?;
            while !extensions.is_empty() {
                let typ = extensions.u16()?;
                let data = extensions.vec16()?;
                match typ {
                    EXT_SERVER_NAME => self.requested_server_name = parse_server_name(data)?,
                    EXT_RENEGOTIATION_INFO if data == [0] => self.secure_renegotiation = true,
                    EXT_RENEGOTIATION_INFO => {
                        return Err(Error::alert(
                            AlertDescription::HandshakeFailure,
                            "renegotiation_info not empty on initial handshake",
                        ))
                    }
                    _ => {}
                }
            }
        }

        // our preference order decides
        let Some(suite) = self
            .config
            .suites
            .iter()
            .find(|s| offered.contains(&s.protocol_id()))
            .copied()
        else {
            return Err(Error::alert(
                AlertDescription::HandshakeFailure,
                "no cipher suite in common",
            ));
        };
        log::debug!(
            "client offered {} suites, chose {}",
            offered.len(),
            suite.openssl_name.to_string_lossy()
        );

        let mut server_random = [0u8; RANDOM_LEN];
        OsRng.fill_bytes(&mut server_random);
        let next = self.security.next_mut()?;
        next.client_random.copy_from_slice(random);
        next.server_random = server_random;
        next.suite = Some(suite);
        self.client_version = version;
        self.state = HandshakeState::ClientHelloReceived;

        self.send_server_flight(suite, &server_random)
    }

    fn send_server_flight(
        &mut self,
        suite: &'static SslCipher,
        server_random: &[u8; RANDOM_LEN],
    ) -> Result<(), Error> {
        let Some(ck) = self.config.certified_key.clone() else {
            return Err(Error::internal("server has no certificate"));
        };

        let mut hello = Vec::new();
        put_u16(&mut hello, u16::from(TLS12));
        hello.extend_from_slice(server_random);
        hello.push(0); // no session id: nothing is resumable
        put_u16(&mut hello, suite.protocol_id());
        hello.push(COMPRESSION_NULL);
        if self.secure_renegotiation {
            let mut extensions = Vec::new();
            put_extension(&mut extensions, EXT_RENEGOTIATION_INFO, &[0]);
            put_vec16(&mut hello, &extensions);
        }
        self.send_handshake(HandshakeType::ServerHello, &hello)?;

        self.send_handshake(
            HandshakeType::Certificate,
            &encode_certificate_list(ck.chain()),
        )?;

        if self.config.verifier.offer_client_auth() {
            let mut request = Vec::new();
            put_vec8(&mut request, &[CERT_TYPE_RSA_SIGN]);
            put_vec16(
                &mut request,
                &u16::from(SignatureScheme::RSA_PKCS1_SHA256).to_be_bytes(),
            );
            put_vec16(&mut request, &[]);
            self.send_handshake(HandshakeType::CertificateRequest, &request)?;
            self.cert_requested = true;
        }

        self.send_handshake(HandshakeType::ServerHelloDone, &[])?;
        self.state = HandshakeState::ServerHelloSent;
        Ok(())
    }

    fn server_handle_certificate(&mut self, body: &[u8]) -> Result<(), Error> {
        let chain = parse_certificate_list(body)?;
        self.peer_cert_seen = true;
        self.config.verifier.verify_client_cert(chain.as_ref())?;
        self.verify_pending = chain.is_some();
        self.peer_chain = chain;
        Ok(())
    }

    fn server_handle_client_key_exchange(&mut self, body: &[u8]) -> Result<(), Error> {
        let Some(ck) = self.config.certified_key.clone() else {
            return Err(Error::internal("server has no certificate"));
        };
        let mut r = Reader::new(body);
        let encrypted = r.vec16()?;
        r.expect_empty()?;
        if encrypted.len() != ck.key_octets() {
            return Err(decode_error());
        }

        // Any failure continues with a random secret, so the outcome is only
        // visible as a Finished mismatch.
        let mut pre_master = [0u8; PREMASTER_SECRET_LEN];
        OsRng.fill_bytes(&mut pre_master);
        match ck.decrypt(encrypted) {
            Ok(mut decrypted)
                if decrypted.len() == PREMASTER_SECRET_LEN
                    && decrypted[..2] == self.client_version.to_be_bytes() =>
            {
                pre_master.copy_from_slice(&decrypted);
                wipe(&mut decrypted);
            }
            Ok(mut decrypted) => {
                log::debug!("premaster secret has wrong length or version");
                wipe(&mut decrypted);
            }
            Err(e) => log::debug!("premaster secret did not decrypt: {e}"),
        }

        let derived = self
            .security
            .next_mut()
            .and_then(|next| next.derive_keys(&pre_master, Role::Server));
        wipe(&mut pre_master);
        derived?;
        self.key_exchanged = true;
        Ok(())
    }

    fn server_handle_certificate_verify(
        &mut self,
        body: &[u8],
        prior_hash: &[u8],
    ) -> Result<(), Error> {
        let mut r = Reader::new(body);
        let scheme = SignatureScheme::from(r.u16()?);
        let signature = r.vec16()?;
        r.expect_empty()?;

        if scheme != SignatureScheme::RSA_PKCS1_SHA256 {
            return Err(Error::alert(
                AlertDescription::IllegalParameter,
                "unsupported CertificateVerify scheme",
            ));
        }
        let Some(chain) = &self.peer_chain else {
            return Err(Error::internal("no client certificate"));
        };
        if !chain
            .public_key()
            .verify_digest(signature, &SHA256, prior_hash)
        {
            return Err(Error::alert(
                AlertDescription::DecryptError,
                "CertificateVerify signature invalid",
            ));
        }
        self.verify_pending = false;
        Ok(())
    }

    fn server_handle_finished(&mut self, body: &[u8], prior_hash: &[u8]) -> Result<(), Error> {
        self.check_finished(body, b"client finished", prior_hash)?;
        self.send_change_cipher_spec()?;
        self.send_finished(b"server finished")?;
        self.establish();
        Ok(())
    }
}

fn unexpected_message(hint: &str) -> Error {
    Error::alert(AlertDescription::UnexpectedMessage, hint)
}

fn decode_error() -> Error {
    Error::alert(AlertDescription::DecodeError, "malformed handshake message")
}

/// Returns `None` for an empty list.
fn parse_certificate_list(body: &[u8]) -> Result<Option<X509>, Error> {
    let mut r = Reader::new(body);
    let mut list = Reader::new(r.vec24()?);
    r.expect_empty()?;

    let mut certs = Vec::new();
    while !list.is_empty() {
        certs.push(list.vec24()?);
    }
    X509::new_chain(certs).map_err(|e| {
        log::warn!("cannot parse peer certificate: {e}");
        Error::alert(
            AlertDescription::BadCertificate,
            "unparsable peer certificate",
        )
    })
}

fn encode_certificate_list(chain: &[Vec<u8>]) -> Vec<u8> {
    let mut list = Vec::new();
    for cert in chain {
        put_vec24(&mut list, cert);
    }
    let mut body = Vec::with_capacity(list.len() + 3);
    put_vec24(&mut body, &list);
    body
}

/// The host_name entry of a server_name extension.
fn parse_server_name(data: &[u8]) -> Result<Option<String>, Error> {
    let mut r = Reader::new(data);
    let mut list = Reader::new(r.vec16()?);
    r.expect_empty()?;
    while !list.is_empty() {
        let typ = list.u8()?;
        let name = list.vec16()?;
        if typ == SNI_HOST_NAME {
            return match core::str::from_utf8(name) {
                Ok(name) => Ok(Some(name.to_string())),
                Err(_) => Err(decode_error()),
            };
        }
    }
    Ok(None)
}

fn u24(bytes: &[u8]) -> usize {
    (usize::from(bytes[0]) << 16) | (usize::from(bytes[1]) << 8) | usize::from(bytes[2])
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u24(out: &mut Vec<u8>, v: usize) {
    out.extend_from_slice(&(v as u32).to_be_bytes()[1..]);
}

fn put_vec8(out: &mut Vec<u8>, data: &[u8]) {
    out.push(data.len() as u8);
    out.extend_from_slice(data);
}

fn put_vec16(out: &mut Vec<u8>, data: &[u8]) {
    put_u16(out, data.len() as u16);
    out.extend_from_slice(data);
}

fn put_vec24(out: &mut Vec<u8>, data: &[u8]) {
    put_u24(out, data.len());
    out.extend_from_slice(data);
}

fn put_extension(out: &mut Vec<u8>, typ: u16, data: &[u8]) {
    put_u16(out, typ);
    put_vec16(out, data);
}

/// Cursor over a handshake message body. Running short is a decode_error.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn expect_empty(&self) -> Result<(), Error> {
        match self.buf.is_empty() {
            true => Ok(()),
            false => Err(decode_error()),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.buf.len() < n {
            return Err(decode_error());
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn vec8(&mut self) -> Result<&'a [u8], Error> {
        let len = self.u8()?;
        self.take(usize::from(len))
    }

    fn vec16(&mut self) -> Result<&'a [u8], Error> {
        let len = self.u16()?;
        self.take(usize::from(len))
    }

    fn vec24(&mut self) -> Result<&'a [u8], Error> {
        let len = u24(self.take(3)?);
        self.take(len)
    }
}
