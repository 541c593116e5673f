//! The TLS 1.2 pseudo-random function, `P_SHA256` (RFC 5246 section 5).

use super::hmac::hmac_v;
use super::SHA256;

/// Fills `out` with `PRF(secret, label, seed)`.
pub fn prf(secret: &[u8], label: &[u8], seed: &[u8], out: &mut [u8]) {
    let mut a = [0u8; 32];
    hmac_v(&SHA256, secret, &[label, seed], &mut a);

    let mut block = [0u8; 32];
    for chunk in out.chunks_mut(32) {
        hmac_v(&SHA256, secret, &[&a, label, seed], &mut block);
        chunk.copy_from_slice(&block[..chunk.len()]);

        let prev = a;
        hmac_v(&SHA256, secret, &[&prev], &mut a);
    }

    super::wipe(&mut a);
    super::wipe(&mut block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tests::unhex;

    #[test]
    fn known_answer() {
        // widely circulated P_SHA256 test vector for TLS 1.2
        let secret = unhex("9bbe436ba940f017b17652849a71db35");
        let seed = unhex("a0ba9f936cda311827a6f796ffd5198c");
        let mut out = [0u8; 100];
        prf(&secret, b"test label", &seed, &mut out);
        assert_eq!(
            hex::encode(&out),
            "e3f229ba727be17b8d122620557cd453c2aab21d07c3d495329b52d4e61edb5a\
             6b301791e90d35c9c9a46b4e14baf9af0fa022f7077def17abfd3797c0564bab\
             4fbc91666e9def9b97fce34f796789baa48082d122ee42c5a72e5a5110fff701\
             87347b66"
        );
    }

    #[test]
    fn prefix_is_stable_across_lengths() {
        let mut short = [0u8; 12];
        let mut long = [0u8; 48];
        prf(b"secret", b"client finished", b"seed", &mut short);
        prf(b"secret", b"client finished", b"seed", &mut long);
        assert_eq!(short, long[..12]);
    }
}
