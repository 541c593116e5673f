//! BER/DER decoding, enough for X.509 certificates and RSA keys.
//!
//! Every slice handed out is a sub-slice of the caller's buffer whose
//! bounds have been checked against the declared lengths, so malformed
//! input surfaces as an error and never as an out-of-range read.

use crate::error::Error;
use crate::rsa::{RsaKey, RsaPrivateComponents};

// Identifier octets, class/constructed bits included.
pub const BOOLEAN: u8 = 0x01;
pub const INTEGER: u8 = 0x02;
pub const BIT_STRING: u8 = 0x03;
pub const OCTET_STRING: u8 = 0x04;
pub const NULL: u8 = 0x05;
pub const OID: u8 = 0x06;
pub const UTF8_STRING: u8 = 0x0c;
pub const PRINTABLE_STRING: u8 = 0x13;
pub const T61_STRING: u8 = 0x14;
pub const IA5_STRING: u8 = 0x16;
pub const UTC_TIME: u8 = 0x17;
pub const GENERALIZED_TIME: u8 = 0x18;
pub const BMP_STRING: u8 = 0x1e;
pub const SEQUENCE: u8 = 0x30;
pub const SET: u8 = 0x31;

/// `[n]` EXPLICIT, constructed context-specific.
pub const fn context_constructed(n: u8) -> u8 {
    0xa0 | n
}

/// `[n]` IMPLICIT over a primitive type.
pub const fn context_primitive(n: u8) -> u8 {
    0x80 | n
}

pub mod oid {
    pub const RSA_ENCRYPTION: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
    pub const MD5_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x04];
    pub const SHA1_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x05];
    pub const SHA256_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];
    pub const COMMON_NAME: &[u8] = &[0x55, 0x04, 0x03];
    pub const SUBJECT_ALT_NAME: &[u8] = &[0x55, 0x1d, 0x11];
    pub const BASIC_CONSTRAINTS: &[u8] = &[0x55, 0x1d, 0x13];
}

pub const CLASS_UNIVERSAL: u8 = 0;
pub const CLASS_APPLICATION: u8 = 1;
pub const CLASS_CONTEXT: u8 = 2;
pub const CLASS_PRIVATE: u8 = 3;

/// Longest length field accepted, in octets after the `0x8N` prefix.
const MAX_LENGTH_OCTETS: usize = 4;
/// Longest high tag number accepted, in base-128 octets.
const MAX_TAG_OCTETS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BerTag {
    pub class: u8,
    pub constructed: bool,
    pub number: u32,
    /// Length of the contents that follow the header.
    pub len: usize,
}

/// Decodes the identifier and length octets at the start of `buf`.
///
/// Returns the tag and the header length. On success
/// `header_len + tag.len <= buf.len()`.
pub fn ber_decode_tag(buf: &[u8]) -> Result<(BerTag, usize), Error> {
    let truncated = || Error::bad_data("truncated BER header");

    let first = *buf.first().ok_or_else(truncated)?;
    let class = first >> 6;
    let constructed = first & 0x20 != 0;
    let mut pos = 1;

    let number = if first & 0x1f == 0x1f {
        let mut number: u32 = 0;
        loop {
            if pos > MAX_TAG_OCTETS {
                return Err(Error::bad_data("BER tag number too large"));
            }
            let byte = *buf.get(pos).ok_or_else(truncated)?;
            pos += 1;
            number = (number << 7) | u32::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                break;
            }
        }
        number
    } else {
        u32::from(first & 0x1f)
    };

    let len_byte = *buf.get(pos).ok_or_else(truncated)?;
    pos += 1;
    let len = if len_byte & 0x80 == 0 {
        usize::from(len_byte)
    } else {
        let octets = usize::from(len_byte & 0x7f);
        if octets == 0 {
            return Err(Error::bad_data("indefinite BER length"));
        }
        if octets > MAX_LENGTH_OCTETS {
            return Err(Error::bad_data("BER length too large"));
        }
        let bytes = buf.get(pos..pos + octets).ok_or_else(truncated)?;
        pos += octets;
        bytes
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
    };

    match pos.checked_add(len) {
        Some(end) if end <= buf.len() => {}
        _ => return Err(Error::bad_data("BER length exceeds buffer")),
    }

    Ok((
        BerTag {
            class,
            constructed,
            number,
            len,
        },
        pos,
    ))
}

/// Sequential reader over the elements of a DER encoding.
#[derive(Clone, Copy, Debug)]
pub struct Der<'a> {
    buf: &'a [u8],
}

/// One decoded element.
#[derive(Clone, Copy, Debug)]
pub struct Element<'a> {
    pub tag: BerTag,
    /// First identifier octet.
    pub ident: u8,
    pub contents: &'a [u8],
    /// The whole encoding, header included.
    pub raw: &'a [u8],
}

impl<'a> Der<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Identifier octet of the next element.
    pub fn peek(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    pub fn next_element(&mut self) -> Result<Element<'a>, Error> {
        let (tag, header) = ber_decode_tag(self.buf)?;
        let end = header + tag.len;
        let element = Element {
            tag,
            ident: self.buf[0],
            contents: &self.buf[header..end],
            raw: &self.buf[..end],
        };
        self.buf = &self.buf[end..];
        Ok(element)
    }

    /// Reads an element that must carry identifier `ident`; returns its contents.
    pub fn expect(&mut self, ident: u8) -> Result<&'a [u8], Error> {
        Ok(self.expect_element(ident)?.contents)
    }

    /// Like [`Der::expect`] but returns the whole encoding.
    pub fn expect_raw(&mut self, ident: u8) -> Result<&'a [u8], Error> {
        Ok(self.expect_element(ident)?.raw)
    }

    fn expect_element(&mut self, ident: u8) -> Result<Element<'a>, Error> {
        match self.peek() {
            Some(found) if found == ident => self.next_element(),
            Some(found) => {
                log::debug!("expected DER identifier {ident:#04x}, found {found:#04x}");
                Err(Error::bad_data("unexpected DER element"))
            }
            None => Err(Error::bad_data("missing DER element")),
        }
    }

    /// Reads the next element only if it carries identifier `ident`.
    pub fn optional(&mut self, ident: u8) -> Result<Option<&'a [u8]>, Error> {
        match self.peek() {
            Some(found) if found == ident => Ok(Some(self.next_element()?.contents)),
            _ => Ok(None),
        }
    }

    pub fn skip(&mut self) -> Result<(), Error> {
        self.next_element().map(|_| ())
    }

    /// A non-negative INTEGER as big-endian magnitude, sign octet stripped.
    pub fn unsigned_integer(&mut self) -> Result<&'a [u8], Error> {
        let contents = self.expect(INTEGER)?;
        match contents {
            [] => Err(Error::bad_data("empty INTEGER")),
            [first, ..] if first & 0x80 != 0 => Err(Error::bad_data("negative INTEGER")),
            [0, rest @ ..] if !rest.is_empty() => Ok(rest),
            _ => Ok(contents),
        }
    }

    /// A small non-negative INTEGER, such as a version number.
    pub fn small_integer(&mut self) -> Result<u32, Error> {
        let magnitude = self.unsigned_integer()?;
        if magnitude.len() > 4 {
            return Err(Error::bad_data("INTEGER too large"));
        }
        Ok(magnitude
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
    }

    /// A BIT STRING without unused bits.
    pub fn bit_string(&mut self) -> Result<&'a [u8], Error> {
        match self.expect(BIT_STRING)? {
            [0, rest @ ..] => Ok(rest),
            _ => Err(Error::bad_data("BIT STRING with unused bits")),
        }
    }

    pub fn boolean(&mut self) -> Result<bool, Error> {
        match self.expect(BOOLEAN)? {
            [value] => Ok(*value != 0),
            _ => Err(Error::bad_data("malformed BOOLEAN")),
        }
    }

    /// Reads an AlgorithmIdentifier and returns its OID, ignoring parameters.
    pub fn algorithm(&mut self) -> Result<&'a [u8], Error> {
        let mut alg = Der::new(self.expect(SEQUENCE)?);
        alg.expect(OID)
    }
}

/// Parses an RSA private key in either PKCS#1 `RSAPrivateKey` or PKCS#8
/// `PrivateKeyInfo` form.
pub fn parse_private_key(der: &[u8]) -> Result<RsaKey, Error> {
    let mut outer = Der::new(der);
    let mut seq = Der::new(outer.expect(SEQUENCE)?);
    let version = seq.small_integer()?;

    if seq.peek() == Some(SEQUENCE) {
        if seq.algorithm()? != oid::RSA_ENCRYPTION {
            return Err(Error::not_supported("private key algorithm"));
        }
        let inner = seq.expect(OCTET_STRING)?;
        return parse_pkcs1_private_key(inner);
    }

    if version != 0 {
        return Err(Error::not_supported("multi-prime RSA key"));
    }
    pkcs1_private_fields(seq)
}

/// Parses a PKCS#1 `RSAPrivateKey`.
pub fn parse_pkcs1_private_key(der: &[u8]) -> Result<RsaKey, Error> {
    let mut outer = Der::new(der);
    let mut seq = Der::new(outer.expect(SEQUENCE)?);
    if seq.small_integer()? != 0 {
        return Err(Error::not_supported("multi-prime RSA key"));
    }
    pkcs1_private_fields(seq)
}

fn pkcs1_private_fields(mut seq: Der<'_>) -> Result<RsaKey, Error> {
    let modulus = seq.unsigned_integer()?;
    let public_exponent = seq.unsigned_integer()?;
    let private_exponent = seq.unsigned_integer()?;
    let prime1 = seq.unsigned_integer()?;
    let prime2 = seq.unsigned_integer()?;
    let exponent1 = seq.unsigned_integer()?;
    let exponent2 = seq.unsigned_integer()?;
    let coefficient = seq.unsigned_integer()?;

    RsaKey::priv_key_new(&RsaPrivateComponents {
        modulus,
        public_exponent,
        private_exponent,
        prime1,
        prime2,
        exponent1,
        exponent2,
        coefficient,
    })
}

/// Parses the contents of a `SubjectPublicKeyInfo` holding an RSA key.
pub fn parse_public_key_info(spki: &[u8]) -> Result<RsaKey, Error> {
    let mut seq = Der::new(spki);
    if seq.algorithm()? != oid::RSA_ENCRYPTION {
        return Err(Error::not_supported("public key algorithm"));
    }
    let mut key_der = Der::new(seq.bit_string()?);
    let mut key = Der::new(key_der.expect(SEQUENCE)?);
    let modulus = key.unsigned_integer()?;
    let exponent = key.unsigned_integer()?;
    RsaKey::pub_key_new(modulus, exponent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pem;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cert_der() -> Vec<u8> {
        pem::parse(include_bytes!("../tests/data/server.pem"))
            .unwrap()
            .remove(0)
            .der
    }

    #[test]
    fn short_and_long_form_lengths() {
        let (tag, header) = ber_decode_tag(&[0x02, 0x01, 0x05]).unwrap();
        assert_eq!(
            tag,
            BerTag {
                class: CLASS_UNIVERSAL,
                constructed: false,
                number: 2,
                len: 1
            }
        );
        assert_eq!(header, 2);

        let mut buf = vec![0x30, 0x82, 0x01, 0x00];
        buf.resize(4 + 256, 0);
        let (tag, header) = ber_decode_tag(&buf).unwrap();
        assert!(tag.constructed);
        assert_eq!((tag.len, header), (256, 4));
    }

    #[test]
    fn high_tag_numbers() {
        let (tag, header) = ber_decode_tag(&[0xbf, 0x87, 0x68, 0x00]).unwrap();
        assert_eq!(tag.class, CLASS_CONTEXT);
        assert!(tag.constructed);
        assert_eq!(tag.number, (7 << 7) | 0x68);
        assert_eq!((tag.len, header), (0, 4));

        let (tag, _) = ber_decode_tag(&[0x5f, 0x01, 0x00]).unwrap();
        assert_eq!(tag.class, CLASS_APPLICATION);
        let (tag, _) = ber_decode_tag(&[0xc1, 0x00]).unwrap();
        assert_eq!(tag.class, CLASS_PRIVATE);
    }

    #[test]
    fn malformed_headers_are_rejected() {
        for bad in [
            &[0u8; 0][..],
            &[0x30][..],
            &[0x30, 0x80][..],
            &[0x30, 0x85, 1, 1, 1, 1, 1][..],
            &[0x30, 0x82, 0x01][..],
            &[0x30, 0x05, 0x00][..],
            &[0x1f, 0x81, 0x81, 0x81, 0x81, 0x01, 0x00][..],
            &[0x1f, 0x81][..],
            &[0x30, 0x84, 0xff, 0xff, 0xff, 0xff][..],
        ] {
            assert!(ber_decode_tag(bad).is_err(), "{bad:02x?}");
        }
    }

    #[test]
    fn never_points_past_the_buffer() {
        let mut rng = StdRng::seed_from_u64(7);
        let der = cert_der();

        let mut inputs: Vec<Vec<u8>> = (0..der.len()).map(|n| der[..n].to_vec()).collect();
        for _ in 0..2000 {
            let len = rng.gen_range(0..12);
            inputs.push((0..len).map(|_| rng.gen()).collect());
        }
        for _ in 0..500 {
            let mut mutated = der.clone();
            let at = rng.gen_range(0..mutated.len());
            mutated[at] = rng.gen();
            inputs.push(mutated);
        }

        for input in &inputs {
            if let Ok((tag, header)) = ber_decode_tag(input) {
                assert!(header + tag.len <= input.len());
            }
            // walking the whole structure must terminate without panicking
            walk(input, 0);
        }
    }

    fn walk(buf: &[u8], depth: usize) {
        if depth > 16 {
            return;
        }
        let mut der = Der::new(buf);
        while !der.is_empty() {
            match der.next_element() {
                Ok(el) if el.tag.constructed => walk(el.contents, depth + 1),
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    #[test]
    fn reader_helpers() {
        // SEQUENCE { INTEGER 0x00ff, BOOLEAN TRUE, [0] { NULL } }
        let der = [
            0x30, 0x0b, 0x02, 0x02, 0x00, 0xff, 0x01, 0x01, 0xff, 0xa0, 0x02, 0x05, 0x00,
        ];
        let mut outer = Der::new(&der);
        let mut seq = Der::new(outer.expect(SEQUENCE).unwrap());
        assert!(outer.is_empty());
        assert_eq!(seq.unsigned_integer().unwrap(), &[0xff]);
        assert_eq!(seq.optional(INTEGER).unwrap(), None);
        assert!(seq.boolean().unwrap());
        let explicit = seq.optional(context_constructed(0)).unwrap().unwrap();
        assert_eq!(explicit, &[0x05, 0x00]);
        assert!(seq.expect(NULL).is_err());
    }

    #[test]
    fn negative_integers_are_rejected() {
        let mut der = Der::new(&[0x02, 0x01, 0x80]);
        assert!(der.unsigned_integer().is_err());
    }

    #[test]
    fn pkcs1_and_pkcs8_keys_agree() {
        let pkcs8 = pem::parse(include_bytes!("../tests/data/server.key")).unwrap();
        let pkcs1 = pem::parse(include_bytes!("../tests/data/server-rsa.key")).unwrap();
        assert_eq!(pkcs8[0].kind, pem::PemKind::PrivateKey);
        assert_eq!(pkcs1[0].kind, pem::PemKind::RsaPrivateKey);

        let a = parse_private_key(&pkcs8[0].der).unwrap();
        let b = parse_private_key(&pkcs1[0].der).unwrap();
        let c = parse_pkcs1_private_key(&pkcs1[0].der).unwrap();
        assert!(a.is_private());
        assert_eq!(a.modulus(), b.modulus());
        assert_eq!(b.modulus(), c.modulus());
        assert_eq!(a.public_exponent(), &crate::bignum::Bigint::from_int(65537));
    }

    #[test]
    fn truncated_keys_fail_cleanly() {
        let pkcs1 = pem::parse(include_bytes!("../tests/data/server-rsa.key")).unwrap();
        let der = &pkcs1[0].der;
        for cut in [0, 1, 10, der.len() / 2, der.len() - 1] {
            assert!(parse_private_key(&der[..cut]).is_err());
        }
    }
}
