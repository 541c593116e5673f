//! Symmetric primitives: digests, HMAC, the TLS 1.2 PRF and the record ciphers.

pub mod aes;
pub mod cipher;
pub mod hmac;
pub mod md5;
pub mod prf;
pub mod rc4;
pub mod sha1;
pub mod sha256;

/// A hash function usable for HMAC, the PRF and PKCS#1 signatures.
///
/// `hash_v` digests the concatenation of its input slices; the digest
/// buffer must be at least `digest_len` long.
pub struct HashAlg {
    pub name: &'static str,
    pub digest_len: usize,
    pub block_len: usize,
    pub hash_v: fn(&[&[u8]], &mut [u8]),
    /// DER `DigestInfo` header preceding the digest in PKCS#1 v1.5 signatures.
    pub digest_info_prefix: &'static [u8],
}

impl HashAlg {
    pub fn digest(&self, msgs: &[&[u8]]) -> Vec<u8> {
        let mut out = vec![0u8; self.digest_len];
        (self.hash_v)(msgs, &mut out);
        out
    }

    /// `DigestInfo || digest`, the payload of an RSA PKCS#1 v1.5 signature.
    pub fn digest_info(&self, digest: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.digest_info_prefix.len() + digest.len());
        out.extend_from_slice(self.digest_info_prefix);
        out.extend_from_slice(digest);
        out
    }
}

impl core::fmt::Debug for HashAlg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name)
    }
}

impl PartialEq for HashAlg {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

pub static MD5: HashAlg = HashAlg {
    name: "md5",
    digest_len: md5::DIGEST_LEN,
    block_len: 64,
    hash_v: md5::md5_v,
    digest_info_prefix: &[
        0x30, 0x20, 0x30, 0x0c, 0x06, 0x08, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x02, 0x05, 0x05,
        0x00, 0x04, 0x10,
    ],
};

pub static SHA1: HashAlg = HashAlg {
    name: "sha1",
    digest_len: sha1::DIGEST_LEN,
    block_len: 64,
    hash_v: sha1::sha1_v,
    digest_info_prefix: &[
        0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04, 0x14,
    ],
};

pub static SHA256: HashAlg = HashAlg {
    name: "sha256",
    digest_len: sha256::DIGEST_LEN,
    block_len: 64,
    hash_v: sha256::sha256_v,
    digest_info_prefix: &[
        0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
        0x05, 0x00, 0x04, 0x20,
    ],
};

/// Compares two byte strings without an early exit on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Overwrites `buf` with zeroes in a way the optimiser will not elide.
pub fn wipe(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, aligned, exclusive reference.
        unsafe { core::ptr::write_volatile(byte, 0) };
    }
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

/// Merkle-Damgard input buffering shared by the 64-byte-block digests.
#[derive(Clone)]
pub(crate) struct BlockBuffer {
    block: [u8; 64],
    used: usize,
    total: u64,
}

impl Default for BlockBuffer {
    fn default() -> Self {
        Self {
            block: [0u8; 64],
            used: 0,
            total: 0,
        }
    }
}

impl BlockBuffer {
    pub(crate) fn input(&mut self, mut data: &[u8], mut compress: impl FnMut(&[u8; 64])) {
        self.total = self.total.wrapping_add(data.len() as u64);

        if self.used > 0 {
            let take = (64 - self.used).min(data.len());
            self.block[self.used..self.used + take].copy_from_slice(&data[..take]);
            self.used += take;
            data = &data[take..];
            if self.used < 64 {
                return;
            }
            compress(&self.block);
            self.used = 0;
        }

        let mut chunks = data.chunks_exact(64);
        for chunk in &mut chunks {
            let mut block = [0u8; 64];
            block.copy_from_slice(chunk);
            compress(&block);
        }

        let rest = chunks.remainder();
        self.block[..rest.len()].copy_from_slice(rest);
        self.used = rest.len();
    }

    /// Appends the 0x80 terminator and the bit length encoded by `encode_len`.
    pub(crate) fn finish(
        &mut self,
        encode_len: impl FnOnce(u64) -> [u8; 8],
        mut compress: impl FnMut(&[u8; 64]),
    ) {
        let bit_len = encode_len(self.total.wrapping_mul(8));

        self.block[self.used] = 0x80;
        self.block[self.used + 1..].fill(0);
        if self.used >= 56 {
            compress(&self.block);
            self.block.fill(0);
        }
        self.block[56..].copy_from_slice(&bit_len);
        compress(&self.block);
        self.used = 0;
    }
}
