//! Bulk ciphers as used by the record layer.
//!
//! A [`CipherInfo`] describes a cipher's shape and knows how to build a keyed
//! [`RecordCipher`] for either direction. Block ciphers run in CBC mode with
//! the IV supplied per record; stream ciphers ignore the IV.

use super::aes::{self, Aes128};
use super::rc4::Rc4;

pub trait RecordCipher: Send {
    /// Encrypts `data` in place. For block ciphers `data.len()` is a
    /// multiple of the block length and `iv` is one block.
    fn encrypt(&mut self, iv: &[u8], data: &mut [u8]);

    fn decrypt(&mut self, iv: &[u8], data: &mut [u8]);
}

pub struct CipherInfo {
    pub name: &'static str,
    /// 1 for stream ciphers.
    pub block_len: usize,
    pub key_len: usize,
    /// Length of the per-direction IV in the key block.
    pub iv_len: usize,
    pub setup_encrypt: fn(&[u8]) -> Box<dyn RecordCipher>,
    pub setup_decrypt: fn(&[u8]) -> Box<dyn RecordCipher>,
}

impl CipherInfo {
    pub fn is_block(&self) -> bool {
        self.block_len > 1
    }
}

impl core::fmt::Debug for CipherInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name)
    }
}

pub static AES128_CBC: CipherInfo = CipherInfo {
    name: "AES-128-CBC",
    block_len: aes::BLOCK_LEN,
    key_len: aes::KEY_LEN,
    iv_len: aes::BLOCK_LEN,
    setup_encrypt: aes_cbc_setup,
    setup_decrypt: aes_cbc_setup,
};

pub static RC4_128: CipherInfo = CipherInfo {
    name: "RC4",
    block_len: 1,
    key_len: 16,
    iv_len: 0,
    setup_encrypt: rc4_setup,
    setup_decrypt: rc4_setup,
};

/// A block cipher that CBC mode can drive.
pub trait BlockCipher {
    fn block_len(&self) -> usize;
    fn encrypt_block(&self, block: &mut [u8]);
    fn decrypt_block(&self, block: &mut [u8]);
}

impl BlockCipher for Aes128 {
    fn block_len(&self) -> usize {
        aes::BLOCK_LEN
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        Self::encrypt_block(self, block)
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        Self::decrypt_block(self, block)
    }
}

pub fn cbc_encrypt(cipher: &impl BlockCipher, iv: &[u8], data: &mut [u8]) {
    let bl = cipher.block_len();
    debug_assert_eq!(iv.len(), bl);
    debug_assert_eq!(data.len() % bl, 0);

    let mut chain = iv.to_vec();
    for block in data.chunks_exact_mut(bl) {
        for (b, c) in block.iter_mut().zip(&chain) {
            *b ^= c;
        }
        cipher.encrypt_block(block);
        chain.copy_from_slice(block);
    }
}

pub fn cbc_decrypt(cipher: &impl BlockCipher, iv: &[u8], data: &mut [u8]) {
    let bl = cipher.block_len();
    debug_assert_eq!(iv.len(), bl);
    debug_assert_eq!(data.len() % bl, 0);

    let mut chain = iv.to_vec();
    let mut saved = vec![0u8; bl];
    for block in data.chunks_exact_mut(bl) {
        saved.copy_from_slice(block);
        cipher.decrypt_block(block);
        for (b, c) in block.iter_mut().zip(&chain) {
            *b ^= c;
        }
        core::mem::swap(&mut chain, &mut saved);
    }
}

struct AesCbc(Aes128);

impl RecordCipher for AesCbc {
    fn encrypt(&mut self, iv: &[u8], data: &mut [u8]) {
        cbc_encrypt(&self.0, iv, data);
    }

    fn decrypt(&mut self, iv: &[u8], data: &mut [u8]) {
        cbc_decrypt(&self.0, iv, data);
    }
}

fn aes_cbc_setup(key: &[u8]) -> Box<dyn RecordCipher> {
    let mut k = [0u8; aes::KEY_LEN];
    k.copy_from_slice(&key[..aes::KEY_LEN]);
    let cipher = Box::new(AesCbc(Aes128::new(&k)));
    super::wipe(&mut k);
    cipher
}

struct Rc4Stream(Rc4);

impl RecordCipher for Rc4Stream {
    fn encrypt(&mut self, _iv: &[u8], data: &mut [u8]) {
        self.0.apply(data);
    }

    fn decrypt(&mut self, _iv: &[u8], data: &mut [u8]) {
        self.0.apply(data);
    }
}

fn rc4_setup(key: &[u8]) -> Box<dyn RecordCipher> {
    Box::new(Rc4Stream(Rc4::new(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tests::unhex;

    #[test]
    fn sp800_38a_cbc_aes128() {
        let key = unhex("2b7e151628aed2a6abf7158809cf4f3c");
        let iv = unhex("000102030405060708090a0b0c0d0e0f");
        let mut data = unhex(
            "6bc1bee22e409f96e93d7e117393172a ae2d8a571e03ac9c9eb76fac45af8e51
             30c81c46a35ce411e5fbc1191a0a52ef f69f2445df4f9b17ad2b417be66c3710",
        );
        let plain = data.clone();

        (AES128_CBC.setup_encrypt)(&key).encrypt(&iv, &mut data);
        assert_eq!(
            hex::encode(&data),
            "7649abac8119b246cee98e9b12e9197d5086cb9b507219ee95db113a917678b2\
             73bed6b8e3c1743b7116e69e222295163ff1caa1681fac09120eca307586e1a7"
        );

        (AES128_CBC.setup_decrypt)(&key).decrypt(&iv, &mut data);
        assert_eq!(data, plain);
    }

    #[test]
    fn stream_cipher_keeps_state_between_records() {
        let key = [7u8; 16];
        let mut tx = (RC4_128.setup_encrypt)(&key);
        let mut rx = (RC4_128.setup_decrypt)(&key);

        for msg in [&b"first record"[..], &b"second"[..]] {
            let mut buf = msg.to_vec();
            tx.encrypt(&[], &mut buf);
            assert_ne!(buf, msg);
            rx.decrypt(&[], &mut buf);
            assert_eq!(buf, msg);
        }
        assert!(!RC4_128.is_block());
        assert!(AES128_CBC.is_block());
    }
}
