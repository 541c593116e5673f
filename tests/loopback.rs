//! Client and server talking over a non-blocking socket pair in one thread.

use std::io::{self, Read, Write};
use std::os::raw::c_int;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use rustls::AlertDescription;
use ssl::bio::Bio;
use ssl::error::Error;
use ssl::{ShutdownResult, Ssl, SslContext, VerifyMode};

const FILETYPE_PEM: c_int = 1;
const ERROR_WANT_READ: c_int = 2;
const ERROR_ZERO_RETURN: c_int = 6;

fn data(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

fn server_ctx() -> SslContext {
    let mut ctx = SslContext::new(&ssl::TLS_SERVER_METHOD);
    ctx.use_certificate_chain_file(&data("leaf-chain.pem"))
        .unwrap();
    ctx.use_private_key_file(&data("leaf.key"), FILETYPE_PEM)
        .unwrap();
    ctx.check_private_key().unwrap();
    ctx
}

fn client_ctx(anchors: &str) -> SslContext {
    let mut ctx = SslContext::new(&ssl::TLS_CLIENT_METHOD);
    ctx.load_verify_locations(Some(&data(anchors)), None)
        .unwrap();
    ctx.set_verify(VerifyMode::from_bits(VerifyMode::PEER));
    ctx
}

fn ssl_for(ctx: SslContext, transport: impl Read + Write + Send + 'static) -> Ssl {
    let ctx = Arc::new(Mutex::new(ctx));
    let mut ssl = {
        let inner = ctx.lock().unwrap();
        Ssl::new(ctx.clone(), &inner).unwrap()
    };
    ssl.set_bio(Bio::new(transport));
    ssl
}

fn socket_pair() -> (UnixStream, UnixStream) {
    let (a, b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();
    (a, b)
}

/// Alternates between the two ends until both finish the handshake or fail.
fn handshake(client: &mut Ssl, server: &mut Ssl) -> (Result<(), Error>, Result<(), Error>) {
    let (mut c, mut s) = (None, None);
    for _ in 0..50 {
        if c.is_none() {
            match client.connect() {
                Err(e) if e.is_retryable() => assert_eq!(client.get_error(), ERROR_WANT_READ),
                result => c = Some(result),
            }
        }
        if s.is_none() {
            match server.accept() {
                Err(e) if e.is_retryable() => assert_eq!(server.get_error(), ERROR_WANT_READ),
                result => s = Some(result),
            }
        }
        if c.is_some() && s.is_some() {
            break;
        }
    }
    (
        c.unwrap_or_else(|| Err(Error::want_read())),
        s.unwrap_or_else(|| Err(Error::want_read())),
    )
}

fn connected(client_ctx: SslContext, server_ctx: SslContext) -> (Ssl, Ssl) {
    let (a, b) = socket_pair();
    let mut client = ssl_for(client_ctx, a);
    assert!(client.set_sni_hostname("www.example.com"));
    let mut server = ssl_for(server_ctx, b);
    let (c, s) = handshake(&mut client, &mut server);
    c.unwrap();
    s.unwrap();
    (client, server)
}

#[test]
fn hello_and_clean_shutdown() {
    let (mut client, mut server) = connected(client_ctx("ca.pem"), server_ctx());
    assert!(client.is_established());
    assert!(server.is_established());
    assert_eq!(client.get_last_verification_result(), 0);
    assert_eq!(server.server_name(), Some("www.example.com"));
    assert_eq!(
        client.get_negotiated_cipher(),
        server.get_negotiated_cipher()
    );

    assert_eq!(client.write(b"hello, world!").unwrap(), 13);
    let mut buf = [0u8; 64];
    let n = server.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello, world!");

    // nothing more to read yet
    assert!(server.read(&mut buf).unwrap_err().is_retryable());
    assert_eq!(server.get_error(), ERROR_WANT_READ);

    assert_eq!(client.try_shutdown().unwrap(), ShutdownResult::Sent);
    assert_eq!(client.get_shutdown(), 1);

    server.read(&mut buf).unwrap_err();
    assert_eq!(server.get_error(), ERROR_ZERO_RETURN);
    assert_eq!(server.get_shutdown(), 2);
    assert_eq!(server.try_shutdown().unwrap(), ShutdownResult::Received);
    assert_eq!(server.get_shutdown(), 3);

    assert_eq!(client.try_shutdown().unwrap(), ShutdownResult::Received);
    assert_eq!(client.get_shutdown(), 3);
}

#[test]
fn each_cipher_suite_negotiates() {
    for name in ["AES128-SHA256", "AES128-SHA", "RC4-SHA", "RC4-MD5"] {
        let mut cctx = client_ctx("ca.pem");
        cctx.set_cipher_list(name).unwrap();
        let (mut client, mut server) = connected(cctx, server_ctx());

        let cipher = client.get_negotiated_cipher().unwrap();
        assert_eq!(cipher.openssl_name.to_str().unwrap(), name);

        // spans two records
        let payload = vec![0xa5; 20_000];
        assert_eq!(server.write(&payload).unwrap(), payload.len());
        let mut got = Vec::new();
        let mut buf = [0u8; 4096];
        while got.len() < payload.len() {
            let n = client.read(&mut buf).unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, payload);
    }
}

/// Corrupts the last byte of one write once armed.
struct Tamper {
    inner: UnixStream,
    armed: Arc<AtomicBool>,
}

impl Read for Tamper {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for Tamper {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() && self.armed.swap(false, Ordering::SeqCst) {
            let mut copy = buf.to_vec();
            *copy.last_mut().unwrap() ^= 0x01;
            return self.inner.write(&copy);
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[test]
fn tampered_record_is_rejected() {
    let (a, b) = socket_pair();
    let armed = Arc::new(AtomicBool::new(false));
    let mut client = ssl_for(
        client_ctx("ca.pem"),
        Tamper {
            inner: a,
            armed: armed.clone(),
        },
    );
    let mut server = ssl_for(server_ctx(), b);
    let (c, s) = handshake(&mut client, &mut server);
    c.unwrap();
    s.unwrap();

    armed.store(true, Ordering::SeqCst);
    client.write(b"attack at dawn").unwrap();

    let mut buf = [0u8; 64];
    let err = server.read(&mut buf).unwrap_err();
    assert_eq!(err.alert_to_send(), Some(AlertDescription::BadRecordMac));
    assert_eq!(server.get_error(), 1);

    // the client hears about it, and the connection stays dead
    let err = client.read(&mut buf).unwrap_err();
    assert!(!err.is_retryable());
    assert!(server.write(b"more").is_err());
}

#[test]
fn untrusted_server_is_rejected() {
    let (a, b) = socket_pair();
    let mut client = ssl_for(client_ctx("other-ca.pem"), a);
    let mut server = ssl_for(server_ctx(), b);

    let (c, s) = handshake(&mut client, &mut server);
    assert_eq!(
        c.unwrap_err().alert_to_send(),
        Some(AlertDescription::UnknownCA)
    );
    assert!(s.is_err());
    assert_eq!(client.get_last_verification_result(), 20);
    assert!(!client.is_established());
}

#[test]
fn unverified_client_tolerates_unknown_issuer() {
    let mut cctx = client_ctx("other-ca.pem");
    cctx.set_verify(VerifyMode::from_bits(VerifyMode::NONE));
    let (client, _server) = connected(cctx, server_ctx());
    assert_eq!(client.get_last_verification_result(), 20);
}

#[test]
fn server_name_checks() {
    // wildcard match against `*.example.com`
    let (a, b) = socket_pair();
    let mut client = ssl_for(client_ctx("ca.pem"), a);
    client.set_verify_hostname(Some("bar.example.com"));
    let mut server = ssl_for(server_ctx(), b);
    let (c, s) = handshake(&mut client, &mut server);
    c.unwrap();
    s.unwrap();

    // SNI name is checked when no other name is configured
    let (a, b) = socket_pair();
    let mut client = ssl_for(client_ctx("ca.pem"), a);
    assert!(client.set_sni_hostname("example.net"));
    let mut server = ssl_for(server_ctx(), b);
    let (c, _) = handshake(&mut client, &mut server);
    assert_eq!(
        c.unwrap_err().alert_to_send(),
        Some(AlertDescription::BadCertificate)
    );
    assert_eq!(client.get_last_verification_result(), 62);

    // a pinned name wins over SNI
    let mut cctx = client_ctx("ca.pem");
    cctx.set_verify_name(Some("example.org"));
    let (a, b) = socket_pair();
    let mut client = ssl_for(cctx, a);
    assert!(client.set_sni_hostname("example.net"));
    let mut server = ssl_for(server_ctx(), b);
    let (c, s) = handshake(&mut client, &mut server);
    c.unwrap();
    s.unwrap();

    // a pinned name wins over SSL_set1_host too, even when that one would match
    let mut cctx = client_ctx("ca.pem");
    cctx.set_verify_name(Some("example.net"));
    let (a, b) = socket_pair();
    let mut client = ssl_for(cctx, a);
    client.set_verify_hostname(Some("bar.example.com"));
    assert!(client.set_sni_hostname("foo.example.com"));
    let mut server = ssl_for(server_ctx(), b);
    let (c, _) = handshake(&mut client, &mut server);
    assert_eq!(
        c.unwrap_err().alert_to_send(),
        Some(AlertDescription::BadCertificate)
    );
    assert_eq!(client.get_last_verification_result(), 62);

    // SSL_set1_host wins over SNI
    let (a, b) = socket_pair();
    let mut client = ssl_for(client_ctx("ca.pem"), a);
    client.set_verify_hostname(Some("example.net"));
    assert!(client.set_sni_hostname("foo.example.com"));
    let mut server = ssl_for(server_ctx(), b);
    let (c, _) = handshake(&mut client, &mut server);
    assert_eq!(
        c.unwrap_err().alert_to_send(),
        Some(AlertDescription::BadCertificate)
    );
    assert_eq!(client.get_last_verification_result(), 62);
}

#[test]
fn client_certificates() {
    let required = || {
        let mut ctx = server_ctx();
        ctx.load_verify_locations(Some(&data("ca.pem")), None)
            .unwrap();
        ctx.set_verify(VerifyMode::from_bits(
            VerifyMode::PEER | VerifyMode::FAIL_IF_NO_PEER_CERT,
        ));
        ctx
    };

    let mut cctx = client_ctx("ca.pem");
    cctx.use_certificate_file(&data("leaf.pem"), FILETYPE_PEM)
        .unwrap();
    cctx.use_private_key_file(&data("leaf.key"), FILETYPE_PEM)
        .unwrap();
    let (_client, server) = connected(cctx, required());
    assert!(server.get_peer_cert().is_some());
    assert_eq!(server.get_last_verification_result(), 0);

    let (a, b) = socket_pair();
    let mut client = ssl_for(client_ctx("ca.pem"), a);
    let mut server = ssl_for(required(), b);
    let (c, s) = handshake(&mut client, &mut server);
    assert_eq!(
        s.unwrap_err().alert_to_send(),
        Some(AlertDescription::HandshakeFailure)
    );
    assert!(c.is_err());
}

#[test]
fn quiet_shutdown_sends_nothing() {
    let (mut client, mut server) = connected(client_ctx("ca.pem"), server_ctx());
    client.set_quiet_shutdown(true);
    assert!(client.get_quiet_shutdown());
    assert_eq!(client.try_shutdown().unwrap(), ShutdownResult::Received);
    assert_eq!(client.get_shutdown(), 3);

    let mut buf = [0u8; 8];
    assert!(server.read(&mut buf).unwrap_err().is_retryable());
}

#[test]
fn self_signed_server_with_pkcs1_key() {
    let mut sctx = SslContext::new(&ssl::TLS_SERVER_METHOD);
    sctx.use_certificate_file(&data("server.pem"), FILETYPE_PEM)
        .unwrap();
    sctx.use_private_key_file(&data("server-rsa.key"), FILETYPE_PEM)
        .unwrap();
    sctx.check_private_key().unwrap();

    let (a, b) = socket_pair();
    let mut client = ssl_for(client_ctx("server.pem"), a);
    assert!(client.set_sni_hostname("localhost"));
    let mut server = ssl_for(sctx, b);
    let (c, s) = handshake(&mut client, &mut server);
    c.unwrap();
    s.unwrap();

    assert_eq!(server.write(b"hello, world!").unwrap(), 13);
    let mut buf = [0u8; 13];
    assert_eq!(client.read(&mut buf).unwrap(), 13);
    assert_eq!(&buf, b"hello, world!");
}
