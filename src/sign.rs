use std::sync::Arc;

use crate::crypto::HashAlg;
use crate::error::Error;
use crate::rsa::RsaKey;
use crate::x509::X509;

/// This matches up to the implied state machine in `SSL_CTX_use_certificate_chain_file`
/// and `SSL_CTX_use_PrivateKey_file`, and matching man pages.
#[derive(Clone, Default, Debug)]
pub struct CertifiedKeySet {
    item: KeySetItem,
}

impl CertifiedKeySet {
    /// Set the entirety of the current certificate chain to `chain`.
    ///
    /// `chain[0]` is the end-entity cert.
    pub fn stage_certificate_full_chain(&mut self, mut chain: Vec<Vec<u8>>) -> Result<(), Error> {
        match chain.is_empty() {
            false => {
                let end_entity = chain.remove(0);
                self.item.cert_chain_tail = Some(chain);
                self.stage_certificate_end_entity(end_entity)
            }
            true => Err(Error::bad_data("empty certificate full chain")),
        }
    }

    /// Replaces only the end-entity certificate; an earlier chain tail is kept.
    pub fn stage_certificate_end_entity(&mut self, end: Vec<u8>) -> Result<(), Error> {
        let leaf = X509::new(&end)?;
        self.item.cert_end_entity = Some((end, leaf));
        self.item.promote();
        Ok(())
    }

    pub fn commit_private_key(&mut self, key: RsaKey) -> Result<(), Error> {
        if !key.is_private() {
            return Err(Error::bad_data("not a private key"));
        }
        self.item.key = Some(Arc::new(key));
        self.item.promote();
        Ok(())
    }

    /// For `SSL_CTX_check_private_key`.
    pub fn check_private_key(&self) -> Result<(), Error> {
        match &self.item.constructed {
            Some(ck) if ck.keys_match() => Ok(()),
            Some(_) => Err(Error::bad_data("private key does not match certificate")),
            None if self.item.key.is_none() => Err(Error::bad_data("no private key assigned")),
            None => Err(Error::bad_data("no certificate assigned")),
        }
    }

    /// The key and chain to authenticate with, once both are present.
    pub fn certified_key(&self) -> Option<Arc<CertifiedKey>> {
        self.item.constructed.clone()
    }
}

#[derive(Clone, Debug, Default)]
struct KeySetItem {
    /// Most recent certificate chain tail.
    cert_chain_tail: Option<Vec<Vec<u8>>>,

    /// Most recent end-entity certificate, with its parsed form.
    cert_end_entity: Option<(Vec<u8>, X509)>,

    /// Most recent value from `SSL_CTX_use_PrivateKey_file`
    key: Option<Arc<RsaKey>>,

    /// The key and certificate we're currently using.
    constructed: Option<Arc<CertifiedKey>>,
}

impl KeySetItem {
    /// If `self` has enough parts (a key and at least an end-entity cert) then fill in
    /// `constructed`.
    fn promote(&mut self) {
        let (Some(key), Some((end_entity, leaf))) = (&self.key, &self.cert_end_entity) else {
            return;
        };

        let mut chain = vec![end_entity.clone()];
        if let Some(tail) = &self.cert_chain_tail {
            chain.extend(tail.iter().cloned());
        }

        self.constructed = Some(Arc::new(CertifiedKey {
            chain,
            leaf_key: Arc::clone(leaf.public_key()),
            key: Arc::clone(key),
        }));
    }
}

/// A certificate chain and the private key for its end-entity certificate.
#[derive(Debug)]
pub struct CertifiedKey {
    chain: Vec<Vec<u8>>,
    leaf_key: Arc<RsaKey>,
    key: Arc<RsaKey>,
}

impl CertifiedKey {
    /// DER certificates, end-entity first.
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    pub fn keys_match(&self) -> bool {
        self.leaf_key.modulus() == self.key.modulus()
            && self.leaf_key.public_exponent() == self.key.public_exponent()
    }

    /// PKCS#1 v1.5 signature over an already computed digest.
    pub fn sign(&self, hash: &HashAlg, digest: &[u8]) -> Result<Vec<u8>, Error> {
        self.key.sign_digest(hash, digest)
    }

    /// Removes PKCS#1 v1.5 encryption padding with the private key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        self.key.decrypt(ciphertext, true)
    }

    pub fn key_octets(&self) -> usize {
        self.key.num_octets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::parse_private_key;
    use crate::crypto::SHA256;
    use crate::pem;
    use pretty_assertions::assert_eq;

    fn der_of(bytes: &[u8]) -> Vec<Vec<u8>> {
        pem::parse(bytes)
            .unwrap()
            .into_iter()
            .map(|obj| obj.der)
            .collect()
    }

    fn key_of(bytes: &[u8]) -> RsaKey {
        parse_private_key(&der_of(bytes)[0]).unwrap()
    }

    #[test]
    fn staged_parts_promote_in_any_order() {
        let mut set = CertifiedKeySet::default();
        assert!(set.check_private_key().is_err());

        set.commit_private_key(key_of(include_bytes!("../tests/data/leaf.key")))
            .unwrap();
        assert!(set.certified_key().is_none());
        assert!(set.check_private_key().is_err());

        set.stage_certificate_full_chain(der_of(include_bytes!("../tests/data/leaf-chain.pem")))
            .unwrap();
        let ck = set.certified_key().unwrap();
        assert_eq!(ck.chain().len(), 2);
        assert!(set.check_private_key().is_ok());

        // a new end-entity keeps the chain tail
        let leaf = der_of(include_bytes!("../tests/data/leaf.pem")).remove(0);
        set.stage_certificate_end_entity(leaf).unwrap();
        assert_eq!(set.certified_key().unwrap().chain().len(), 2);
    }

    #[test]
    fn mismatched_key_is_detected() {
        let mut set = CertifiedKeySet::default();
        set.stage_certificate_full_chain(der_of(include_bytes!("../tests/data/server.pem")))
            .unwrap();
        set.commit_private_key(key_of(include_bytes!("../tests/data/leaf.key")))
            .unwrap();
        assert!(set.check_private_key().is_err());

        set.commit_private_key(key_of(include_bytes!("../tests/data/server-rsa.key")))
            .unwrap();
        assert!(set.check_private_key().is_ok());
    }

    #[test]
    fn rejects_bad_inputs() {
        let mut set = CertifiedKeySet::default();
        assert!(set.stage_certificate_full_chain(vec![]).is_err());
        assert!(set.stage_certificate_end_entity(vec![0x30, 0x00]).is_err());

        let cert = der_of(include_bytes!("../tests/data/server.pem")).remove(0);
        let cert = X509::new(&cert).unwrap();
        let key = cert.public_key();
        let public = RsaKey::pub_key_new(
            &key.modulus().to_bytes(key.num_octets()).unwrap(),
            &[1, 0, 1],
        )
        .unwrap();
        assert!(set.commit_private_key(public).is_err());
    }

    #[test]
    fn signs_with_the_private_key() {
        let mut set = CertifiedKeySet::default();
        set.stage_certificate_full_chain(der_of(include_bytes!("../tests/data/server.pem")))
            .unwrap();
        set.commit_private_key(key_of(include_bytes!("../tests/data/server.key")))
            .unwrap();
        let ck = set.certified_key().unwrap();
        assert_eq!(ck.key_octets(), 256);

        let digest = SHA256.digest(&[&b"transcript"[..]]);
        let sig = ck.sign(&SHA256, &digest).unwrap();
        assert!(ck.leaf_key.verify_digest(&sig, &SHA256, &digest));
    }
}
