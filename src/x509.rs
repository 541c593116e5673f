//! X.509 certificates.
//!
//! Only RSA subject keys and PKCS#1 v1.5 signatures over MD5, SHA-1 or
//! SHA-256 are understood. Names are kept as their raw DER encoding and
//! compared bytewise.

use core::fmt;
use std::sync::Arc;

use crate::asn1::{self, oid, Der};
use crate::crypto::{HashAlg, MD5, SHA1, SHA256};
use crate::error::Error;
use crate::rsa::RsaKey;
use crate::store::CaStore;

/// dNSName in a `GeneralNames` sequence: `[2] IMPLICIT IA5String`.
const GENERAL_NAME_DNS: u8 = asn1::context_primitive(2);

/// A parsed certificate, optionally heading a leaf-first chain.
#[derive(Clone)]
pub struct X509 {
    der: Vec<u8>,
    issuer: Vec<u8>,
    subject: Vec<u8>,
    pub_key: Arc<RsaKey>,
    sig: Vec<u8>,
    /// Contents of the subjectAltName `GeneralNames` sequence.
    alt_names: Option<Vec<u8>>,
    hash_alg: &'static HashAlg,
    is_ca: bool,
    is_self_signed: bool,
    tbs_digest: Vec<u8>,
    pub next: Option<Box<X509>>,
}

impl X509 {
    pub fn new(der: &[u8]) -> Result<Self, Error> {
        let mut outer = Der::new(der);
        let cert_raw = outer.expect_raw(asn1::SEQUENCE)?;
        let mut cert = Der::new(outer_contents(cert_raw)?);

        let tbs_raw = cert.expect_raw(asn1::SEQUENCE)?;
        let outer_alg = cert.algorithm()?;
        let sig = cert.bit_string()?;

        let mut tbs = Der::new(outer_contents(tbs_raw)?);
        if let Some(version) = tbs.optional(asn1::context_constructed(0))? {
            let v = Der::new(version).small_integer()?;
            if v > 2 {
                return Err(Error::bad_data("unknown certificate version"));
            }
        }
        // serial numbers may be negative in the wild; we never look at them
        tbs.expect(asn1::INTEGER)?;
        let tbs_alg = tbs.algorithm()?;
        if tbs_alg != outer_alg {
            return Err(Error::bad_data("certificate signature algorithms differ"));
        }
        let hash_alg = signature_hash(outer_alg)?;

        let issuer = tbs.expect_raw(asn1::SEQUENCE)?.to_vec();
        check_validity(tbs.expect(asn1::SEQUENCE)?)?;
        let subject = tbs.expect_raw(asn1::SEQUENCE)?.to_vec();
        let pub_key = asn1::parse_public_key_info(tbs.expect(asn1::SEQUENCE)?)?;

        // issuerUniqueID, subjectUniqueID
        tbs.optional(asn1::context_primitive(1))?;
        tbs.optional(asn1::context_primitive(2))?;

        let mut is_ca = false;
        let mut alt_names = None;
        if let Some(explicit) = tbs.optional(asn1::context_constructed(3))? {
            let mut wrapper = Der::new(explicit);
            let mut extensions = Der::new(wrapper.expect(asn1::SEQUENCE)?);
            while !extensions.is_empty() {
                let mut ext = Der::new(extensions.expect(asn1::SEQUENCE)?);
                let id = ext.expect(asn1::OID)?;
                let critical = match ext.peek() {
                    Some(asn1::BOOLEAN) => ext.boolean()?,
                    _ => false,
                };
                let value = ext.expect(asn1::OCTET_STRING)?;

                match id {
                    oid::BASIC_CONSTRAINTS => is_ca = basic_constraints_ca(value)?,
                    oid::SUBJECT_ALT_NAME => {
                        let mut san = Der::new(value);
                        alt_names = Some(san.expect(asn1::SEQUENCE)?.to_vec());
                    }
                    _ if critical => {
                        log::warn!("unsupported critical extension {id:02x?}");
                        return Err(Error::not_supported("critical certificate extension"));
                    }
                    _ => {}
                }
            }
        }

        let tbs_digest = hash_alg.digest(&[tbs_raw]);
        let is_self_signed = issuer == subject;

        Ok(Self {
            der: cert_raw.to_vec(),
            issuer,
            subject,
            pub_key: Arc::new(pub_key),
            sig: sig.to_vec(),
            alt_names,
            hash_alg,
            is_ca,
            is_self_signed,
            tbs_digest,
            next: None,
        })
    }

    /// Builds a leaf-first chain from DER certificates.
    pub fn new_chain<'a>(ders: impl IntoIterator<Item = &'a [u8]>) -> Result<Option<Self>, Error> {
        let mut certs = ders
            .into_iter()
            .map(Self::new)
            .collect::<Result<Vec<_>, _>>()?;

        let mut head: Option<Self> = None;
        while let Some(mut cert) = certs.pop() {
            cert.next = head.map(Box::new);
            head = Some(cert);
        }
        Ok(head)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn issuer(&self) -> &[u8] {
        &self.issuer
    }

    pub fn subject(&self) -> &[u8] {
        &self.subject
    }

    pub fn public_key(&self) -> &Arc<RsaKey> {
        &self.pub_key
    }

    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    pub fn is_self_signed(&self) -> bool {
        self.is_self_signed
    }

    /// This certificate followed by the rest of its chain.
    pub fn iter(&self) -> impl Iterator<Item = &Self> {
        core::iter::successors(Some(self), |cert| cert.next.as_deref())
    }

    /// Checks this certificate's signature against `issuer_key`.
    pub fn verify_signature(&self, issuer_key: &RsaKey) -> bool {
        issuer_key.verify_digest(&self.sig, self.hash_alg, &self.tbs_digest)
    }

    /// The last commonName in the subject.
    pub fn common_name(&self) -> Option<&str> {
        let mut names = Der::new(&self.subject);
        let mut rdns = Der::new(names.expect(asn1::SEQUENCE).ok()?);
        let mut found = None;
        while !rdns.is_empty() {
            let mut set = Der::new(rdns.expect(asn1::SET).ok()?);
            while !set.is_empty() {
                let mut atv = Der::new(set.expect(asn1::SEQUENCE).ok()?);
                if atv.expect(asn1::OID).ok()? != oid::COMMON_NAME {
                    continue;
                }
                let value = atv.next_element().ok()?;
                if matches!(
                    value.ident,
                    asn1::UTF8_STRING
                        | asn1::PRINTABLE_STRING
                        | asn1::IA5_STRING
                        | asn1::T61_STRING
                ) {
                    found = core::str::from_utf8(value.contents).ok();
                }
            }
        }
        found
    }

    /// dNSName entries of the subjectAltName extension.
    pub fn dns_names(&self) -> impl Iterator<Item = &[u8]> {
        let mut names = Der::new(self.alt_names.as_deref().unwrap_or_default());
        core::iter::from_fn(move || {
            while !names.is_empty() {
                let name = names.next_element().ok()?;
                if name.ident == GENERAL_NAME_DNS {
                    return Some(name.contents);
                }
            }
            None
        })
    }

    /// Checks `name` against the subject commonName and the
    /// subjectAltName dNSNames.
    pub fn verify_name(&self, name: &str) -> bool {
        let name = name.as_bytes();
        if self
            .common_name()
            .is_some_and(|cn| match_domain_name(cn.as_bytes(), name))
        {
            return true;
        }
        self.dns_names()
            .any(|pattern| match_domain_name(pattern, name))
    }
}

impl Drop for X509 {
    fn drop(&mut self) {
        // unlink iteratively so long chains cannot exhaust the stack
        let mut next = self.next.take();
        while let Some(mut cert) = next {
            next = cert.next.take();
        }
    }
}

impl fmt::Debug for X509 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509")
            .field("cn", &self.common_name())
            .field("hash", &self.hash_alg)
            .field("is_ca", &self.is_ca)
            .field("is_self_signed", &self.is_self_signed)
            .field("key", &self.pub_key)
            .finish_non_exhaustive()
    }
}

/// The contents of a DER element whose whole encoding is `raw`.
fn outer_contents(raw: &[u8]) -> Result<&[u8], Error> {
    Ok(Der::new(raw).next_element()?.contents)
}

fn signature_hash(alg: &[u8]) -> Result<&'static HashAlg, Error> {
    match alg {
        oid::MD5_WITH_RSA => Ok(&MD5),
        oid::SHA1_WITH_RSA => Ok(&SHA1),
        oid::SHA256_WITH_RSA => Ok(&SHA256),
        _ => {
            log::debug!("unsupported signature algorithm {alg:02x?}");
            Err(Error::not_supported("certificate signature algorithm"))
        }
    }
}

/// Validity dates are decoded for well-formedness only; expiry is not enforced.
fn check_validity(validity: &[u8]) -> Result<(), Error> {
    let mut times = Der::new(validity);
    for _ in 0..2 {
        let time = times.next_element()?;
        if !matches!(time.ident, asn1::UTC_TIME | asn1::GENERALIZED_TIME) {
            return Err(Error::bad_data("malformed certificate validity"));
        }
        log::trace!("validity bound {}", String::from_utf8_lossy(time.contents));
    }
    Ok(())
}

fn basic_constraints_ca(value: &[u8]) -> Result<bool, Error> {
    let mut outer = Der::new(value);
    let mut constraints = Der::new(outer.expect(asn1::SEQUENCE)?);
    match constraints.peek() {
        Some(asn1::BOOLEAN) => constraints.boolean(),
        _ => Ok(false),
    }
}

/// Matches a host name against a certificate name, label by label from the
/// right, ignoring ASCII case. A leftmost `*` label in `pattern` matches
/// exactly one non-empty label, and only when at least two literal labels
/// follow it.
pub fn match_domain_name(pattern: &[u8], name: &[u8]) -> bool {
    let pattern = pattern.strip_suffix(b".").unwrap_or(pattern);
    let name = name.strip_suffix(b".").unwrap_or(name);
    if pattern.is_empty() || name.is_empty() {
        return false;
    }

    let pattern_labels = pattern.split(|b| *b == b'.').collect::<Vec<_>>();
    let name_labels = name.split(|b| *b == b'.').collect::<Vec<_>>();
    if pattern_labels.len() != name_labels.len() {
        return false;
    }

    let last = pattern_labels.len() - 1;
    pattern_labels
        .iter()
        .rev()
        .zip(name_labels.iter().rev())
        .enumerate()
        .all(|(i, (p, n))| {
            if n.is_empty() {
                return false;
            }
            if *p == b"*" {
                return i == last && pattern_labels.len() >= 3;
            }
            p.eq_ignore_ascii_case(n)
        })
}

/// Why a chain failed verification. The values are the matching
/// `X509_V_ERR_*` codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyError {
    SignatureFailure = 7,
    UnableToGetIssuerLocally = 20,
    ChainTooLong = 22,
    InvalidCa = 24,
    HostnameMismatch = 62,
}

/// Verifies the chain headed by `leaf` against the trust anchors in `store`.
///
/// Starting at the leaf, each certificate is first looked up in `store` by
/// issuer; the walk stops at the first one signed by a trust anchor, so any
/// certificates presented after it are ignored. Until then every certificate
/// must be signed by its successor, which must be a CA.
/// `max_depth` bounds the number of certificates above the leaf.
pub fn verify_chain(leaf: &X509, store: &CaStore, max_depth: usize) -> Result<(), VerifyError> {
    let chain = leaf.iter().collect::<Vec<_>>();
    if chain.len() > max_depth + 1 {
        return Err(VerifyError::ChainTooLong);
    }

    let mut certs = chain.iter().peekable();
    while let Some(cert) = certs.next() {
        match store.find_issuer(cert.issuer()) {
            Ok(Some(anchor)) => {
                if !cert.verify_signature(anchor.public_key()) {
                    return Err(VerifyError::SignatureFailure);
                }
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("trust store lookup failed: {e}");
                return Err(VerifyError::UnableToGetIssuerLocally);
            }
        }

        let Some(parent) = certs.peek() else {
            log::debug!("no trust anchor for {:?}", cert.common_name());
            break;
        };
        if cert.issuer() != parent.subject() {
            return Err(VerifyError::UnableToGetIssuerLocally);
        }
        if !parent.is_ca() {
            return Err(VerifyError::InvalidCa);
        }
        if !cert.verify_signature(parent.public_key()) {
            return Err(VerifyError::SignatureFailure);
        }
    }

    Err(VerifyError::UnableToGetIssuerLocally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pem;
    use pretty_assertions::assert_eq;

    fn load(bytes: &[u8]) -> Vec<X509> {
        pem::parse(bytes)
            .unwrap()
            .iter()
            .map(|obj| X509::new(&obj.der).unwrap())
            .collect()
    }

    fn store_of(bytes: &[u8]) -> CaStore {
        let mut store = CaStore::default();
        for cert in load(bytes) {
            store.add(cert);
        }
        store
    }

    #[test]
    fn parses_self_signed_certificate() {
        let cert = load(include_bytes!("../tests/data/server.pem")).remove(0);
        assert!(cert.is_self_signed());
        assert_eq!(cert.common_name(), Some("localhost"));
        assert_eq!(cert.hash_alg, &SHA256);
        assert_eq!(cert.public_key().num_octets(), 256);
        assert!(cert.verify_signature(cert.public_key()));
        assert_eq!(cert.dns_names().collect::<Vec<_>>(), vec![&b"localhost"[..]]);
    }

    #[test]
    fn parses_extensions() {
        let ca = load(include_bytes!("../tests/data/ca.pem")).remove(0);
        assert!(ca.is_ca());
        assert!(ca.is_self_signed());

        let leaf = load(include_bytes!("../tests/data/leaf.pem")).remove(0);
        assert!(!leaf.is_ca());
        assert!(!leaf.is_self_signed());
        assert_eq!(leaf.issuer(), ca.subject());
        assert_eq!(
            leaf.dns_names().collect::<Vec<_>>(),
            vec![&b"*.example.com"[..], &b"example.org"[..]]
        );

        let sha1 = load(include_bytes!("../tests/data/leaf-sha1.pem")).remove(0);
        assert_eq!(sha1.hash_alg, &SHA1);
        assert!(sha1.verify_signature(ca.public_key()));
    }

    #[test]
    fn unknown_critical_extension_is_rejected() {
        let der = pem::parse(include_bytes!("../tests/data/critical-ext.pem"))
            .unwrap()
            .remove(0)
            .der;
        assert!(X509::new(&der).is_err());
    }

    #[test]
    fn corrupted_certificates_fail_to_parse_or_verify() {
        let der = pem::parse(include_bytes!("../tests/data/leaf.pem"))
            .unwrap()
            .remove(0)
            .der;
        let ca = load(include_bytes!("../tests/data/ca.pem")).remove(0);

        for cut in [0, 4, der.len() / 3, der.len() - 1] {
            assert!(X509::new(&der[..cut]).is_err());
        }

        // flip a bit inside the subject: still parses, signature no longer verifies
        let leaf = X509::new(&der).unwrap();
        let subject_at = der
            .windows(leaf.subject().len())
            .position(|w| w == leaf.subject())
            .unwrap();
        let mut tampered = der.clone();
        tampered[subject_at + leaf.subject().len() - 1] ^= 0x01;
        let tampered = X509::new(&tampered).unwrap();
        assert!(!tampered.verify_signature(ca.public_key()));
    }

    #[test]
    fn wildcard_matching() {
        assert!(match_domain_name(b"*.example.com", b"foo.example.com"));
        assert!(match_domain_name(b"*.example.com", b"FOO.Example.COM"));
        assert!(!match_domain_name(b"*.example.com", b"foo.bar.example.com"));
        assert!(!match_domain_name(b"*.example.com", b"example.com"));
        assert!(!match_domain_name(b"*.example.com", b".example.com"));
        assert!(!match_domain_name(b"*.com", b"example.com"));
        assert!(!match_domain_name(b"foo.*.com", b"foo.bar.com"));
        assert!(match_domain_name(b"localhost", b"LOCALHOST"));
        assert!(match_domain_name(b"example.org.", b"example.org"));
        assert!(!match_domain_name(b"", b""));
    }

    #[test]
    fn verify_name_uses_cn_and_san() {
        let leaf = load(include_bytes!("../tests/data/leaf.pem")).remove(0);
        assert!(leaf.verify_name("foo.example.com"));
        assert!(leaf.verify_name("bar.example.com"));
        assert!(leaf.verify_name("example.org"));
        assert!(!leaf.verify_name("foo.bar.example.com"));
        assert!(!leaf.verify_name("example.com"));
        assert!(!leaf.verify_name("www.example.org"));
    }

    #[test]
    fn chain_verification() {
        let store = store_of(include_bytes!("../tests/data/ca.pem"));
        let chain = pem::parse(include_bytes!("../tests/data/leaf-chain.pem")).unwrap();
        let leaf = X509::new_chain(chain.iter().map(|o| o.der.as_slice()))
            .unwrap()
            .unwrap();
        assert_eq!(leaf.iter().count(), 2);
        assert_eq!(verify_chain(&leaf, &store, 100), Ok(()));
        assert_eq!(verify_chain(&leaf, &store, 0), Err(VerifyError::ChainTooLong));

        let alone = load(include_bytes!("../tests/data/leaf.pem")).remove(0);
        assert_eq!(verify_chain(&alone, &store, 100), Ok(()));
    }

    #[test]
    fn trailing_certificates_after_the_anchor_are_ignored() {
        let store = store_of(include_bytes!("../tests/data/ca.pem"));
        let mut leaf = load(include_bytes!("../tests/data/leaf.pem")).remove(0);
        let unrelated = load(include_bytes!("../tests/data/other-ca.pem")).remove(0);
        leaf.next = Some(Box::new(unrelated));
        assert_eq!(verify_chain(&leaf, &store, 100), Ok(()));

        // with no anchor for the leaf, the next certificate has to be its issuer
        let other = store_of(include_bytes!("../tests/data/other-ca.pem"));
        assert_eq!(
            verify_chain(&leaf, &other, 100),
            Err(VerifyError::UnableToGetIssuerLocally)
        );
    }

    #[test]
    fn missing_anchor_is_rejected() {
        let leaf = load(include_bytes!("../tests/data/leaf.pem")).remove(0);
        let other = store_of(include_bytes!("../tests/data/other-ca.pem"));
        assert_eq!(
            verify_chain(&leaf, &other, 100),
            Err(VerifyError::UnableToGetIssuerLocally)
        );
        assert_eq!(
            verify_chain(&leaf, &CaStore::default(), 100),
            Err(VerifyError::UnableToGetIssuerLocally)
        );
    }

    #[test]
    fn self_signed_anchor() {
        let server = load(include_bytes!("../tests/data/server.pem")).remove(0);
        let store = store_of(include_bytes!("../tests/data/server.pem"));
        assert_eq!(verify_chain(&server, &store, 100), Ok(()));
    }

    #[test]
    fn unlinked_chain_is_rejected() {
        // the leaf was not issued by the certificate presented after it
        let mut leaf = load(include_bytes!("../tests/data/leaf.pem")).remove(0);
        let server = load(include_bytes!("../tests/data/server.pem")).remove(0);
        leaf.next = Some(Box::new(server));
        let store = store_of(include_bytes!("../tests/data/server.pem"));
        assert_eq!(
            verify_chain(&leaf, &store, 100),
            Err(VerifyError::UnableToGetIssuerLocally)
        );
    }

    #[test]
    fn long_chains_drop_without_recursion() {
        let cert = load(include_bytes!("../tests/data/server.pem")).remove(0);
        let mut head = cert.clone();
        for _ in 0..5_000 {
            let mut next = cert.clone();
            next.next = Some(Box::new(head));
            head = next;
        }
        assert_eq!(head.iter().count(), 5_001);
        drop(head);
    }
}
