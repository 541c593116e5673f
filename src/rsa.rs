//! RSA keys and PKCS#1 v1.5 encryption and signatures.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::bignum::{BiCtx, Bigint, ModOffset, Modulus};
use crate::crypto::{constant_time_eq, HashAlg};
use crate::error::Error;

/// Smallest modulus accepted, in bytes.
const MIN_MODULUS_OCTETS: usize = 64;

/// Minimum run of padding bytes in a PKCS#1 v1.5 block.
const MIN_PADDING: usize = 8;

const BLOCK_TYPE_SIGNATURE: u8 = 0x01;
const BLOCK_TYPE_ENCRYPTION: u8 = 0x02;

/// Big-endian components of an RSA private key, as in PKCS#1 `RSAPrivateKey`.
pub struct RsaPrivateComponents<'a> {
    pub modulus: &'a [u8],
    pub public_exponent: &'a [u8],
    pub private_exponent: &'a [u8],
    pub prime1: &'a [u8],
    pub prime2: &'a [u8],
    pub exponent1: &'a [u8],
    pub exponent2: &'a [u8],
    pub coefficient: &'a [u8],
}

struct PrivateParts {
    d: Bigint,
    dp: Bigint,
    dq: Bigint,
    qinv: Bigint,
}

/// An RSA key. Immutable once built, so it can be shared between
/// connections behind an `Arc`.
pub struct RsaKey {
    ctx: BiCtx,
    num_octets: usize,
    e: Bigint,
    private: Option<PrivateParts>,
}

impl RsaKey {
    pub fn pub_key_new(modulus: &[u8], pub_exp: &[u8]) -> Result<Self, Error> {
        let n = Bigint::import(modulus);
        let e = Bigint::import(pub_exp);
        check_modulus(&n)?;
        if e.is_zero() {
            return Err(Error::bad_data("zero RSA public exponent"));
        }

        let num_octets = n.byte_len();
        let mut ctx = BiCtx::new();
        ctx.set_mod(n, ModOffset::Modulus)?;

        Ok(Self {
            ctx,
            num_octets,
            e,
            private: None,
        })
    }

    pub fn priv_key_new(c: &RsaPrivateComponents<'_>) -> Result<Self, Error> {
        let mut key = Self::pub_key_new(c.modulus, c.public_exponent)?;

        let p = Bigint::import(c.prime1);
        let q = Bigint::import(c.prime2);
        if !p.is_odd() || !q.is_odd() || p.clone().multiply(q.clone()) != *key.modulus() {
            return Err(Error::bad_data("RSA primes do not match modulus"));
        }

        key.ctx.set_mod(p, ModOffset::P)?;
        key.ctx.set_mod(q, ModOffset::Q)?;
        key.private = Some(PrivateParts {
            d: Bigint::import(c.private_exponent),
            dp: Bigint::import(c.exponent1),
            dq: Bigint::import(c.exponent2),
            qinv: Bigint::import(c.coefficient),
        });
        Ok(key)
    }

    /// Length of the modulus, and of every ciphertext and signature, in bytes.
    pub fn num_octets(&self) -> usize {
        self.num_octets
    }

    pub fn is_private(&self) -> bool {
        self.private.is_some()
    }

    fn n(&self) -> &Modulus {
        // set in `pub_key_new`, never freed
        match self.ctx.modulus(ModOffset::Modulus) {
            Some(m) => m,
            None => unreachable!("RSA key without modulus"),
        }
    }

    pub fn modulus(&self) -> &Bigint {
        self.n().value()
    }

    pub fn public_exponent(&self) -> &Bigint {
        &self.e
    }

    /// `m^e mod n`.
    pub fn public(&self, m: Bigint) -> Bigint {
        self.n().mod_power(m, &self.e)
    }

    /// `c^d mod n`, by CRT.
    pub fn private(&self, c: Bigint) -> Result<Bigint, Error> {
        let parts = self
            .private
            .as_ref()
            .ok_or_else(|| Error::bad_data("not an RSA private key"))?;
        match self.ctx.crt(c.clone(), &parts.dp, &parts.dq, &parts.qinv) {
            Some(m) => Ok(m),
            None => Ok(self.n().mod_power(c, &parts.d)),
        }
    }

    /// PKCS#1 v1.5 padding followed by the RSA operation.
    ///
    /// Signing pads with block type 1 and uses the private key; otherwise
    /// block type 2 with random non-zero padding and the public key.
    pub fn encrypt(&self, msg: &[u8], is_signing: bool) -> Result<Vec<u8>, Error> {
        let k = self.num_octets;
        if msg.len() + MIN_PADDING + 3 > k {
            return Err(Error::bad_data("message too long for RSA modulus"));
        }

        let mut block = vec![0u8; k];
        let pad_end = k - msg.len() - 1;
        if is_signing {
            block[1] = BLOCK_TYPE_SIGNATURE;
            block[2..pad_end].fill(0xff);
        } else {
            block[1] = BLOCK_TYPE_ENCRYPTION;
            fill_nonzero_random(&mut block[2..pad_end]);
        }
        block[k - msg.len()..].copy_from_slice(msg);

        let m = Bigint::import(&block);
        crate::crypto::wipe(&mut block);
        let c = if is_signing {
            self.private(m)?
        } else {
            self.public(m)
        };
        c.to_bytes(k)
    }

    /// Inverse of [`RsaKey::encrypt`]: `is_decryption` selects the private
    /// key and block type 2, otherwise the public key recovers a block
    /// type 1 signature. Returns the unpadded message.
    pub fn decrypt(&self, input: &[u8], is_decryption: bool) -> Result<Vec<u8>, Error> {
        let k = self.num_octets;
        if input.len() != k {
            return Err(Error::bad_data("RSA input has wrong length"));
        }
        let c = Bigint::import(input);
        if c >= *self.modulus() {
            return Err(Error::bad_data("RSA input out of range"));
        }

        let m = if is_decryption {
            self.private(c)?
        } else {
            self.public(c)
        };
        let mut block = m.to_bytes(k)?;
        let result = unpad(&block, is_decryption);
        crate::crypto::wipe(&mut block);
        result
    }

    /// Signs a precomputed digest: `DigestInfo || digest` with block type 1.
    pub fn sign_digest(&self, hash: &HashAlg, digest: &[u8]) -> Result<Vec<u8>, Error> {
        self.encrypt(&hash.digest_info(digest), true)
    }

    /// Recovers a signature and compares it against `DigestInfo || digest`.
    pub fn verify_digest(&self, sig: &[u8], hash: &HashAlg, digest: &[u8]) -> bool {
        match self.decrypt(sig, false) {
            Ok(recovered) => constant_time_eq(&recovered, &hash.digest_info(digest)),
            Err(_) => false,
        }
    }
}

impl core::fmt::Debug for RsaKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RsaKey")
            .field("bits", &self.modulus().bit_len())
            .field("private", &self.is_private())
            .finish()
    }
}

fn check_modulus(n: &Bigint) -> Result<(), Error> {
    if n.byte_len() < MIN_MODULUS_OCTETS {
        return Err(Error::bad_data("RSA modulus too small"));
    }
    if !n.is_odd() {
        return Err(Error::bad_data("RSA modulus is even"));
    }
    Ok(())
}

fn fill_nonzero_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
    for byte in buf.iter_mut() {
        while *byte == 0 {
            let mut one = [0u8; 1];
            OsRng.fill_bytes(&mut one);
            *byte = one[0];
        }
    }
}

fn unpad(block: &[u8], is_decryption: bool) -> Result<Vec<u8>, Error> {
    let block_type = if is_decryption {
        BLOCK_TYPE_ENCRYPTION
    } else {
        BLOCK_TYPE_SIGNATURE
    };
    if block.len() < MIN_PADDING + 3 || block[0] != 0x00 || block[1] != block_type {
        return Err(Error::bad_data("bad PKCS#1 block header"));
    }

    let padding = &block[2..];
    let sep = if is_decryption {
        padding.iter().position(|b| *b == 0x00)
    } else {
        match padding.iter().position(|b| *b != 0xff) {
            Some(i) if padding[i] == 0x00 => Some(i),
            _ => None,
        }
    };

    match sep {
        Some(len) if len >= MIN_PADDING => Ok(padding[len + 1..].to_vec()),
        _ => Err(Error::bad_data("bad PKCS#1 padding")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1;
    use crate::crypto::SHA256;
    use crate::pem;
    use pretty_assertions::assert_eq;

    pub(crate) fn test_key() -> RsaKey {
        let objects = pem::parse(include_bytes!("../tests/data/server-rsa.key")).unwrap();
        asn1::parse_private_key(&objects[0].der).unwrap()
    }

    #[test]
    fn round_trips_both_padding_modes() {
        let key = test_key();
        assert_eq!(key.num_octets(), 256);

        for msg in [&b""[..], &b"hello, world!"[..], &[0u8; 245][..]] {
            let c = key.encrypt(msg, false).unwrap();
            assert_eq!(c.len(), 256);
            assert_eq!(key.decrypt(&c, true).unwrap(), msg);

            let s = key.encrypt(msg, true).unwrap();
            assert_eq!(key.decrypt(&s, false).unwrap(), msg);
        }
    }

    #[test]
    fn oversized_message_is_rejected() {
        let key = test_key();
        assert!(key.encrypt(&[1u8; 246], false).is_err());
    }

    #[test]
    fn encryption_is_randomised() {
        let key = test_key();
        assert_ne!(
            key.encrypt(b"same", false).unwrap(),
            key.encrypt(b"same", false).unwrap()
        );
    }

    #[test]
    fn crt_agrees_with_public_operation() {
        let key = test_key();
        let m = Bigint::import(b"some value below the modulus");
        let c = key.public(m.clone());
        assert_eq!(key.private(c).unwrap(), m);
    }

    #[test]
    fn wrong_block_type_is_rejected() {
        let key = test_key();
        let sig = key.encrypt(b"data", true).unwrap();
        assert!(key.decrypt(&sig, true).is_err());

        let ct = key.encrypt(b"data", false).unwrap();
        assert!(key.decrypt(&ct, false).is_err());
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let key = test_key();
        assert!(key.decrypt(&[0u8; 255], true).is_err());
        assert!(key.decrypt(&[0xffu8; 256], true).is_err());
        assert!(key.decrypt(&[0u8; 256], true).is_err());
    }

    #[test]
    fn unpad_rules() {
        let mut block = vec![0x00, 0x02];
        block.extend_from_slice(&[0x55; 7]);
        block.push(0x00);
        block.extend_from_slice(b"abc");
        // seven bytes of padding is one short
        assert!(unpad(&block, true).is_err());

        block.insert(2, 0x55);
        assert_eq!(unpad(&block, true).unwrap(), b"abc");

        let mut sig = vec![0x00, 0x01];
        sig.extend_from_slice(&[0xff; 8]);
        sig.push(0x00);
        sig.extend_from_slice(b"xyz");
        assert_eq!(unpad(&sig, false).unwrap(), b"xyz");
        sig[5] = 0x12;
        assert!(unpad(&sig, false).is_err());
    }

    #[test]
    fn digest_signatures() {
        let key = test_key();
        let digest = SHA256.digest(&[b"handshake transcript"]);
        let sig = key.sign_digest(&SHA256, &digest).unwrap();
        assert!(key.verify_digest(&sig, &SHA256, &digest));

        let other = SHA256.digest(&[b"something else"]);
        assert!(!key.verify_digest(&sig, &SHA256, &other));

        let mut bad = sig.clone();
        bad[100] ^= 1;
        assert!(!key.verify_digest(&bad, &SHA256, &digest));
    }

    #[test]
    fn public_keys_cannot_sign() {
        let key = test_key();
        let n = key.modulus().to_bytes(key.num_octets()).unwrap();
        let public = RsaKey::pub_key_new(&n, &[1, 0, 1]).unwrap();
        assert!(!public.is_private());
        assert!(public.encrypt(b"x", true).is_err());
        let ct = public.encrypt(b"to the private half", false).unwrap();
        assert_eq!(key.decrypt(&ct, true).unwrap(), b"to the private half");
    }

    #[test]
    fn tiny_or_even_moduli_are_rejected() {
        assert!(RsaKey::pub_key_new(&[0xc5; 32], &[3]).is_err());
        let mut even = vec![0xc5u8; 128];
        even[127] = 0x02;
        assert!(RsaKey::pub_key_new(&even, &[3]).is_err());
    }
}
