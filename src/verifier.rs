use std::sync::Arc;

use rustls::AlertDescription;

use crate::constants::{X509_V_ERR_UNSPECIFIED, X509_V_OK};
use crate::error::Error;
use crate::store::CaStore;
use crate::x509::{verify_chain, VerifyError, X509};
use crate::VerifyMode;

/// Checks the peer's certificate chain against our trust anchors, and
/// decides (according to `mode`) whether a failure ends the handshake.
///
/// This implements the selection of bad ideas from OpenSSL:
///
/// - that the SNI name and verified certificate server name are unrelated
/// - that the server name can be empty, and that implicitly disables hostname verification
/// - that the behaviour defaults to verifying nothing
#[derive(Debug)]
pub struct PeerVerifier {
    store: Arc<CaStore>,

    mode: VerifyMode,

    /// Certificates allowed above the end-entity.
    max_depth: usize,

    /// Expected server name.
    ///
    /// `None` means server name verification is disabled.
    verify_hostname: Option<String>,

    last_result: i64,
}

impl PeerVerifier {
    /// A client's view of the server.
    pub fn for_server(
        store: Arc<CaStore>,
        mode: VerifyMode,
        max_depth: usize,
        hostname: Option<String>,
    ) -> Self {
        Self {
            store,
            mode,
            max_depth,
            verify_hostname: hostname,
            last_result: X509_V_ERR_UNSPECIFIED as i64,
        }
    }

    /// A server's view of its clients.
    pub fn for_client(store: Arc<CaStore>, mode: VerifyMode, max_depth: usize) -> Self {
        let initial_result = match mode.server_must_attempt_client_auth() {
            true => X509_V_ERR_UNSPECIFIED,
            false => X509_V_OK,
        };
        Self {
            store,
            mode,
            max_depth,
            verify_hostname: None,
            last_result: initial_result as i64,
        }
    }

    pub fn last_result(&self) -> i64 {
        self.last_result
    }

    pub fn offer_client_auth(&self) -> bool {
        self.mode.server_must_attempt_client_auth()
    }

    pub fn client_auth_mandatory(&self) -> bool {
        self.mode.server_must_verify_client()
    }

    pub fn verify_server_cert(&mut self, chain: &X509) -> Result<(), Error> {
        let mut result = verify_chain(chain, &self.store, self.max_depth);
        if let (Ok(()), Some(name)) = (&result, &self.verify_hostname) {
            if !chain.verify_name(name) {
                result = Err(VerifyError::HostnameMismatch);
            }
        }

        self.last_result = translate_verify_result(&result);

        // Call it success if it succeeded, or the `mode` says not to care.
        match result {
            Err(err) if self.mode.client_must_verify_server() => Err(verify_alert(err)),
            Err(err) => {
                log::debug!("ignoring server certificate failure {err:?}");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// `chain` is `None` when the client sent an empty certificate list.
    pub fn verify_client_cert(&mut self, chain: Option<&X509>) -> Result<(), Error> {
        let Some(chain) = chain else {
            if self.client_auth_mandatory() {
                return Err(Error::alert(
                    AlertDescription::HandshakeFailure,
                    "peer did not return a certificate",
                ));
            }
            self.last_result = X509_V_OK as i64;
            return Ok(());
        };

        let result = verify_chain(chain, &self.store, self.max_depth);
        self.last_result = translate_verify_result(&result);

        // A certificate that was offered must be good whenever we asked for one.
        match result {
            Err(err) if self.mode.server_must_attempt_client_auth() => Err(verify_alert(err)),
            Err(err) => {
                log::debug!("ignoring client certificate failure {err:?}");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}

fn verify_alert(err: VerifyError) -> Error {
    match err {
        VerifyError::UnableToGetIssuerLocally => {
            Error::alert(AlertDescription::UnknownCA, "certificate issuer not trusted")
        }
        VerifyError::HostnameMismatch => Error::alert(
            AlertDescription::BadCertificate,
            "certificate not valid for name",
        ),
        _ => Error::alert(
            AlertDescription::BadCertificate,
            "certificate chain verification failed",
        ),
    }
}

fn translate_verify_result(result: &Result<(), VerifyError>) -> i64 {
    match result {
        Ok(()) => X509_V_OK as i64,
        Err(err) => *err as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{
        X509_V_ERR_CERT_CHAIN_TOO_LONG, X509_V_ERR_HOSTNAME_MISMATCH,
        X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY,
    };
    use crate::pem;
    use pretty_assertions::assert_eq;

    fn chain(bytes: &[u8]) -> X509 {
        let objs = pem::parse(bytes).unwrap();
        X509::new_chain(objs.iter().map(|o| o.der.as_slice()))
            .unwrap()
            .unwrap()
    }

    fn store() -> Arc<CaStore> {
        let mut store = CaStore::default();
        store.add(chain(include_bytes!("../tests/data/ca.pem")));
        Arc::new(store)
    }

    const NONE: VerifyMode = VerifyMode::from_bits(0);
    const PEER: VerifyMode = VerifyMode::from_bits(1);
    const REQUIRE: VerifyMode = VerifyMode::from_bits(3);

    #[test]
    fn server_chain_and_name() {
        let leaf = chain(include_bytes!("../tests/data/leaf-chain.pem"));

        let mut v = PeerVerifier::for_server(store(), PEER, 100, Some("www.example.com".into()));
        assert_eq!(v.last_result(), X509_V_ERR_UNSPECIFIED as i64);
        v.verify_server_cert(&leaf).unwrap();
        assert_eq!(v.last_result(), X509_V_OK as i64);

        let mut v = PeerVerifier::for_server(store(), PEER, 100, Some("example.net".into()));
        let err = v.verify_server_cert(&leaf).unwrap_err();
        assert_eq!(err.alert_to_send(), Some(AlertDescription::BadCertificate));
        assert_eq!(v.last_result(), X509_V_ERR_HOSTNAME_MISMATCH as i64);

        let mut v = PeerVerifier::for_server(store(), PEER, 0, None);
        assert!(v.verify_server_cert(&leaf).is_err());
        assert_eq!(v.last_result(), X509_V_ERR_CERT_CHAIN_TOO_LONG as i64);
    }

    #[test]
    fn unverified_mode_records_but_tolerates_failure() {
        let stranger = chain(include_bytes!("../tests/data/server.pem"));

        let mut v = PeerVerifier::for_server(store(), NONE, 100, None);
        v.verify_server_cert(&stranger).unwrap();
        assert_eq!(
            v.last_result(),
            X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY as i64
        );

        let mut v = PeerVerifier::for_server(store(), PEER, 100, None);
        let err = v.verify_server_cert(&stranger).unwrap_err();
        assert_eq!(err.alert_to_send(), Some(AlertDescription::UnknownCA));
    }

    #[test]
    fn client_certificates() {
        let leaf = chain(include_bytes!("../tests/data/leaf.pem"));

        let v = PeerVerifier::for_client(store(), NONE, 100);
        assert!(!v.offer_client_auth());
        assert_eq!(v.last_result(), X509_V_OK as i64);

        let mut v = PeerVerifier::for_client(store(), PEER, 100);
        assert!(v.offer_client_auth());
        assert!(!v.client_auth_mandatory());
        v.verify_client_cert(None).unwrap();
        assert_eq!(v.last_result(), X509_V_OK as i64);
        v.verify_client_cert(Some(&leaf)).unwrap();

        let mut v = PeerVerifier::for_client(store(), REQUIRE, 100);
        assert!(v.client_auth_mandatory());
        let err = v.verify_client_cert(None).unwrap_err();
        assert_eq!(err.alert_to_send(), Some(AlertDescription::HandshakeFailure));

        let stranger = chain(include_bytes!("../tests/data/server.pem"));
        let mut v = PeerVerifier::for_client(store(), PEER, 100);
        assert!(v.verify_client_cert(Some(&stranger)).is_err());
    }
}
