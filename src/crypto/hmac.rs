//! HMAC (RFC 2104) over any [`HashAlg`], taking its message as a vector of
//! slices so record MACs never need to assemble a contiguous buffer.

use super::HashAlg;

const IPAD: u8 = 0x36;
const OPAD: u8 = 0x5c;

/// HMAC of the concatenation of `msgs`, written to `digest[..hash.digest_len]`.
///
/// TLS never keys HMAC with more than a block of material; longer keys are
/// first hashed as RFC 2104 prescribes.
pub fn hmac_v(hash: &HashAlg, key: &[u8], msgs: &[&[u8]], digest: &mut [u8]) {
    let mut k = [0u8; 64];
    debug_assert!(hash.block_len <= k.len());
    if key.len() > hash.block_len {
        (hash.hash_v)(&[key], &mut k);
    } else {
        k[..key.len()].copy_from_slice(key);
    }

    let mut pad = [0u8; 64];
    for (p, k) in pad.iter_mut().zip(k.iter()) {
        *p = k ^ IPAD;
    }

    let mut inner_msgs: Vec<&[u8]> = Vec::with_capacity(msgs.len() + 1);
    inner_msgs.push(&pad[..hash.block_len]);
    inner_msgs.extend_from_slice(msgs);

    let mut inner = [0u8; 64];
    (hash.hash_v)(&inner_msgs, &mut inner);
    drop(inner_msgs);

    for (p, k) in pad.iter_mut().zip(k.iter()) {
        *p = k ^ OPAD;
    }
    (hash.hash_v)(
        &[&pad[..hash.block_len], &inner[..hash.digest_len]],
        digest,
    );

    super::wipe(&mut k);
    super::wipe(&mut pad);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{MD5, SHA1, SHA256};

    fn hmac(hash: &HashAlg, key: &[u8], msg: &[u8]) -> String {
        let mut out = vec![0u8; hash.digest_len];
        hmac_v(hash, key, &[msg], &mut out);
        hex::encode(&out)
    }

    #[test]
    fn rfc2202_md5_and_sha1() {
        assert_eq!(
            hmac(&MD5, &[0x0b; 16], b"Hi There"),
            "9294727a3638bb1c13f48ef8158bfc9d"
        );
        assert_eq!(
            hmac(&MD5, b"Jefe", b"what do ya want for nothing?"),
            "750c783e6ab0b503eaa86e310a5db738"
        );
        assert_eq!(
            hmac(&SHA1, &[0x0b; 20], b"Hi There"),
            "b617318655057264e28bc0b6fb378c8ef146be00"
        );
        assert_eq!(
            hmac(&SHA1, b"Jefe", b"what do ya want for nothing?"),
            "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"
        );
    }

    #[test]
    fn rfc4231_sha256() {
        assert_eq!(
            hmac(&SHA256, &[0x0b; 20], b"Hi There"),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
        assert_eq!(
            hmac(&SHA256, b"Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn oversized_key_is_hashed_first() {
        // RFC 4231 test case 6
        let key = [0xaa; 131];
        assert_eq!(
            hmac(
                &SHA256,
                &key,
                b"Test Using Larger Than Block-Size Key - Hash Key First"
            ),
            "60e431591ee0b67f0d8a26aacbf5b77f8e0bc6213728c5140546040f0ee37f54"
        );
    }

    #[test]
    fn vector_input_equals_concatenation() {
        let mut split = [0u8; 32];
        hmac_v(&SHA256, b"Jefe", &[b"what do ya ", b"want for nothing?"], &mut split);
        assert_eq!(
            hex::encode(&split),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
