//! TLS record layer: framing, MAC-then-encrypt protection and buffering.
//!
//! Received bytes collect in a receive buffer and are decrypted in place
//! there; outgoing records are encoded into a transmit buffer that is
//! flushed to the transport as it accepts writes.

use core::ops::Range;
use std::io::{self, Read, Write};

use rand::rngs::OsRng;
use rand::RngCore;
use rustls::{AlertDescription, ContentType, ProtocolVersion};

use crate::crypto::cipher::{CipherInfo, RecordCipher};
use crate::crypto::hmac::hmac_v;
use crate::crypto::{constant_time_eq, wipe, HashAlg};
use crate::error::Error;

pub const HEADER_LEN: usize = 5;
pub const MAX_FRAGMENT_LEN: usize = 1 << 14;
pub const MAX_CIPHERTEXT_LEN: usize = MAX_FRAGMENT_LEN + 2048;

/// Version written on every outgoing record.
pub const RECORD_VERSION: ProtocolVersion = ProtocolVersion::TLSv1_2;

const READ_CHUNK: usize = 4096;

/// Keys and sequence number protecting one direction of a connection.
pub struct DirectionState {
    cipher: Box<dyn RecordCipher>,
    info: &'static CipherInfo,
    mac: &'static HashAlg,
    mac_key: Vec<u8>,
    seq: u64,
}

impl DirectionState {
    pub fn new(
        info: &'static CipherInfo,
        mac: &'static HashAlg,
        key: &[u8],
        mac_key: &[u8],
        encrypting: bool,
    ) -> Self {
        let cipher = match encrypting {
            true => (info.setup_encrypt)(key),
            false => (info.setup_decrypt)(key),
        };
        Self {
            cipher,
            info,
            mac,
            mac_key: mac_key.to_vec(),
            seq: 0,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// HMAC over `seq || type || version || length || data`.
    fn record_mac(&self, typ: ContentType, version: [u8; 2], data: &[u8]) -> Vec<u8> {
        let mut pseudo = [0u8; 13];
        pseudo[..8].copy_from_slice(&self.seq.to_be_bytes());
        pseudo[8] = u8::from(typ);
        pseudo[9..11].copy_from_slice(&version);
        pseudo[11..].copy_from_slice(&(data.len() as u16).to_be_bytes());

        let mut out = vec![0u8; self.mac.digest_len];
        hmac_v(self.mac, &self.mac_key, &[&pseudo, data], &mut out);
        out
    }

    /// Protects `payload`, returning the record fragment: for block ciphers
    /// `IV || E(payload || MAC || padding)`, for stream ciphers
    /// `E(payload || MAC)`.
    pub fn seal(&mut self, typ: ContentType, version: [u8; 2], payload: &[u8]) -> Vec<u8> {
        let mac = self.record_mac(typ, version, payload);
        let block_len = self.info.block_len;

        let out = if self.info.is_block() {
            let mut iv = vec![0u8; block_len];
            OsRng.fill_bytes(&mut iv);

            let pad = (block_len - (payload.len() + mac.len() + 1) % block_len) % block_len;
            let mut out = Vec::with_capacity(block_len + payload.len() + mac.len() + pad + 1);
            out.extend_from_slice(&iv);
            out.extend_from_slice(payload);
            out.extend_from_slice(&mac);
            out.resize(out.len() + pad + 1, pad as u8);
            self.cipher.encrypt(&iv, &mut out[block_len..]);
            out
        } else {
            let mut out = Vec::with_capacity(payload.len() + mac.len());
            out.extend_from_slice(payload);
            out.extend_from_slice(&mac);
            self.cipher.encrypt(&[], &mut out);
            out
        };

        self.seq += 1;
        out
    }

    /// Decrypts and authenticates `fragment` in place, returning the range
    /// of the plaintext within it.
    ///
    /// Padding and MAC failures are reported identically.
    pub fn open(
        &mut self,
        typ: ContentType,
        version: [u8; 2],
        fragment: &mut [u8],
    ) -> Result<Range<usize>, Error> {
        let bad_mac = || Error::alert(AlertDescription::BadRecordMac, "record failed authentication");
        let mac_len = self.mac.digest_len;

        let (start, end) = if self.info.is_block() {
            let block_len = self.info.block_len;
            if fragment.len() < 2 * block_len
                || fragment.len() < block_len + mac_len + 1
                || (fragment.len() - block_len) % block_len != 0
            {
                return Err(bad_mac());
            }
            let (iv, body) = fragment.split_at_mut(block_len);
            self.cipher.decrypt(iv, body);

            let pad = usize::from(body[body.len() - 1]);
            let mut good = pad + 1 + mac_len <= body.len();
            let checked = (pad + 1).min(body.len());
            for b in &body[body.len() - checked..] {
                good &= usize::from(*b) == pad;
            }
            if !good {
                return Err(bad_mac());
            }
            (block_len, block_len + body.len() - pad - 1)
        } else {
            if fragment.len() < mac_len {
                return Err(bad_mac());
            }
            self.cipher.decrypt(&[], fragment);
            (0, fragment.len())
        };

        let data_end = end - mac_len;
        let expected = self.record_mac(typ, version, &fragment[start..data_end]);
        if !constant_time_eq(&expected, &fragment[data_end..end]) {
            return Err(bad_mac());
        }
        if data_end - start > MAX_FRAGMENT_LEN {
            return Err(Error::alert(
                AlertDescription::RecordOverflow,
                "decrypted record too long",
            ));
        }

        self.seq += 1;
        Ok(start..data_end)
    }
}

impl Drop for DirectionState {
    fn drop(&mut self) {
        wipe(&mut self.mac_key);
    }
}

/// A received record, decrypted if protection was active.
#[derive(Debug, PartialEq)]
pub struct Record {
    pub typ: ContentType,
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub struct RecordLayer {
    rx: Vec<u8>,
    tx: Vec<u8>,
}

impl RecordLayer {
    /// Encodes `payload` as one or more records of type `typ` onto the
    /// transmit buffer, protected by `state` if given.
    pub fn write_record(
        &mut self,
        typ: ContentType,
        payload: &[u8],
        mut state: Option<&mut DirectionState>,
    ) {
        let version = u16::from(RECORD_VERSION).to_be_bytes();
        // an empty payload still produces one record
        let mut chunks = payload.chunks(MAX_FRAGMENT_LEN).peekable();
        if chunks.peek().is_none() {
            self.push_fragment(typ, version, &[], state.as_deref_mut());
            return;
        }
        for chunk in chunks {
            self.push_fragment(typ, version, chunk, state.as_deref_mut());
        }
    }

    fn push_fragment(
        &mut self,
        typ: ContentType,
        version: [u8; 2],
        chunk: &[u8],
        state: Option<&mut DirectionState>,
    ) {
        let sealed;
        let fragment = match state {
            Some(state) => {
                sealed = state.seal(typ, version, chunk);
                &sealed[..]
            }
            None => chunk,
        };
        log::trace!("tx {typ:?} record, {} bytes", fragment.len());

        self.tx.push(u8::from(typ));
        self.tx.extend_from_slice(&version);
        self.tx
            .extend_from_slice(&(fragment.len() as u16).to_be_bytes());
        self.tx.extend_from_slice(fragment);
    }

    pub fn has_pending_write(&self) -> bool {
        !self.tx.is_empty()
    }

    /// Bytes received but not yet consumed as records.
    pub fn buffered_read(&self) -> usize {
        self.rx.len()
    }

    /// Writes as much of the transmit buffer as the transport accepts.
    pub fn flush<W: Write + ?Sized>(&mut self, io: &mut W) -> Result<(), Error> {
        while !self.tx.is_empty() {
            match io.write(&self.tx) {
                Ok(0) => return Err(Error::syscall("transport closed for writing")),
                Ok(n) => {
                    self.tx.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(Error::want_write())
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from_io(e)),
            }
        }
        io.flush().map_err(Error::from_io)
    }

    /// Reads one chunk from the transport. `Ok(0)` means end of stream.
    pub fn fill<R: Read + ?Sized>(&mut self, io: &mut R) -> Result<usize, Error> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match io.read(&mut chunk) {
                Ok(n) => {
                    self.rx.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(Error::want_read()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from_io(e)),
            }
        }
    }

    /// Takes the next complete record from the receive buffer, if any.
    pub fn next_record(
        &mut self,
        state: Option<&mut DirectionState>,
    ) -> Result<Option<Record>, Error> {
        if self.rx.len() < HEADER_LEN {
            return Ok(None);
        }

        let typ = ContentType::from(self.rx[0]);
        if !matches!(
            typ,
            ContentType::ChangeCipherSpec
                | ContentType::Alert
                | ContentType::Handshake
                | ContentType::ApplicationData
        ) {
            return Err(Error::alert(
                AlertDescription::UnexpectedMessage,
                "unknown record type",
            ));
        }
        let version = [self.rx[1], self.rx[2]];
        if version[0] != 3 {
            return Err(Error::alert(
                AlertDescription::ProtocolVersion,
                "record version is not 3.x",
            ));
        }
        let len = usize::from(u16::from_be_bytes([self.rx[3], self.rx[4]]));
        if len > MAX_CIPHERTEXT_LEN || (state.is_none() && len > MAX_FRAGMENT_LEN) {
            return Err(Error::alert(
                AlertDescription::RecordOverflow,
                "record too long",
            ));
        }
        if self.rx.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let fragment = &mut self.rx[HEADER_LEN..HEADER_LEN + len];
        let plain = match state {
            Some(state) => state.open(typ, version, fragment)?,
            None => 0..len,
        };
        let payload = fragment[plain].to_vec();
        self.rx.drain(..HEADER_LEN + len);

        log::trace!("rx {typ:?} record, {} bytes", payload.len());
        Ok(Some(Record { typ, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::{AES128_CBC, RC4_128};
    use crate::crypto::{MD5, SHA1, SHA256};
    use pretty_assertions::assert_eq;

    fn pair(info: &'static CipherInfo, mac: &'static HashAlg) -> (DirectionState, DirectionState) {
        let key = [0x42u8; 16];
        let mac_key = vec![0x17u8; mac.digest_len];
        (
            DirectionState::new(info, mac, &key, &mac_key, true),
            DirectionState::new(info, mac, &key, &mac_key, false),
        )
    }

    fn suites() -> [(&'static CipherInfo, &'static HashAlg); 4] {
        [
            (&RC4_128, &MD5),
            (&RC4_128, &SHA1),
            (&AES128_CBC, &SHA1),
            (&AES128_CBC, &SHA256),
        ]
    }

    #[test]
    fn protected_records_pass_through() {
        for (info, mac) in suites() {
            let (mut tx, mut rx) = pair(info, mac);
            let mut sender = RecordLayer::default();
            let mut receiver = RecordLayer::default();

            for msg in [&b"hello, world!"[..], &[0u8; 0][..], &[7u8; 1000][..]] {
                sender.write_record(ContentType::ApplicationData, msg, Some(&mut tx));
                receiver.rx.append(&mut sender.tx);
                let record = receiver.next_record(Some(&mut rx)).unwrap().unwrap();
                assert_eq!(record.typ, ContentType::ApplicationData);
                assert_eq!(record.payload, msg);
            }
            assert_eq!(tx.sequence(), 3);
            assert_eq!(rx.sequence(), 3);
            assert_eq!(receiver.buffered_read(), 0);
        }
    }

    #[test]
    fn tampering_anywhere_is_bad_record_mac() {
        for (info, mac) in suites() {
            let (mut tx, _) = pair(info, mac);
            let mut sender = RecordLayer::default();
            sender.write_record(ContentType::ApplicationData, b"hello, world!", Some(&mut tx));
            let record = sender.tx.clone();

            // first byte (IV for CBC), a middle byte, and the last byte (MAC/padding)
            for at in [HEADER_LEN, HEADER_LEN + record.len() / 3, record.len() - 1] {
                let (_, mut rx) = pair(info, mac);
                let mut receiver = RecordLayer::default();
                receiver.rx = record.clone();
                receiver.rx[at] ^= 0x01;
                let err = receiver.next_record(Some(&mut rx)).unwrap_err();
                assert_eq!(
                    err.alert_to_send(),
                    Some(AlertDescription::BadRecordMac),
                    "{info:?}/{mac:?} at {at}"
                );
            }
        }
    }

    #[test]
    fn replayed_record_fails() {
        let (mut tx, mut rx) = pair(&AES128_CBC, &SHA256);
        let mut sender = RecordLayer::default();
        sender.write_record(ContentType::ApplicationData, b"once", Some(&mut tx));
        let record = sender.tx.clone();

        let mut receiver = RecordLayer::default();
        receiver.rx = record.clone();
        assert!(receiver.next_record(Some(&mut rx)).unwrap().is_some());
        receiver.rx = record;
        assert!(receiver.next_record(Some(&mut rx)).is_err());
    }

    #[test]
    fn short_or_misaligned_cbc_fragments_are_rejected() {
        let (_, mut rx) = pair(&AES128_CBC, &SHA1);
        for len in [0usize, 16, 31, 33] {
            let mut receiver = RecordLayer::default();
            receiver.rx = vec![23, 3, 3, 0, len as u8];
            receiver.rx.resize(HEADER_LEN + len, 0);
            let err = receiver.next_record(Some(&mut rx)).unwrap_err();
            assert_eq!(err.alert_to_send(), Some(AlertDescription::BadRecordMac));
        }
    }

    #[test]
    fn plaintext_framing() {
        let mut layer = RecordLayer::default();
        layer.write_record(ContentType::Handshake, &[1, 2, 3], None);
        assert_eq!(layer.tx, vec![22, 3, 3, 0, 3, 1, 2, 3]);

        layer.rx = layer.tx.split_off(0);
        // incomplete record waits for more bytes
        let full = layer.rx.clone();
        layer.rx.truncate(6);
        assert_eq!(layer.next_record(None).unwrap(), None);
        layer.rx = full;
        assert_eq!(
            layer.next_record(None).unwrap(),
            Some(Record {
                typ: ContentType::Handshake,
                payload: vec![1, 2, 3]
            })
        );
    }

    #[test]
    fn large_payloads_are_fragmented() {
        let mut layer = RecordLayer::default();
        let payload = vec![9u8; MAX_FRAGMENT_LEN * 2 + 10];
        layer.write_record(ContentType::ApplicationData, &payload, None);
        layer.rx = layer.tx.split_off(0);

        let mut lens = vec![];
        while let Some(record) = layer.next_record(None).unwrap() {
            lens.push(record.payload.len());
        }
        assert_eq!(lens, vec![MAX_FRAGMENT_LEN, MAX_FRAGMENT_LEN, 10]);
    }

    #[test]
    fn header_checks() {
        let mut layer = RecordLayer::default();
        layer.rx = vec![22, 2, 0, 0, 1, 0];
        let err = layer.next_record(None).unwrap_err();
        assert_eq!(err.alert_to_send(), Some(AlertDescription::ProtocolVersion));

        layer.rx = vec![23, 3, 3, 0x48, 0x01];
        let err = layer.next_record(None).unwrap_err();
        assert_eq!(err.alert_to_send(), Some(AlertDescription::RecordOverflow));

        layer.rx = vec![99, 3, 3, 0, 0];
        let err = layer.next_record(None).unwrap_err();
        assert_eq!(err.alert_to_send(), Some(AlertDescription::UnexpectedMessage));
    }

    struct Trickle {
        written: Vec<u8>,
        budget: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.budget).min(3);
            self.budget -= n;
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn flush_resumes_after_would_block() {
        let mut layer = RecordLayer::default();
        layer.write_record(ContentType::Handshake, &[1, 2, 3, 4, 5], None);
        let mut io = Trickle {
            written: vec![],
            budget: 4,
        };
        assert!(layer.flush(&mut io).unwrap_err().is_retryable());
        assert!(layer.has_pending_write());
        io.budget = 100;
        layer.flush(&mut io).unwrap();
        assert!(!layer.has_pending_write());
        assert_eq!(io.written, vec![22, 3, 3, 0, 5, 1, 2, 3, 4, 5]);
    }
}
