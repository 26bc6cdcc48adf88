//! Poly1305 one-time MAC over the RFC 8439 AEAD construction: `aad || pad16(aad) || ciphertext
//! || pad16(ciphertext) || len64(aad) || len64(ciphertext)`, via the RustCrypto `poly1305` crate.

use poly1305::universal_hash::{KeyInit, UniversalHash};
use poly1305::{Key, Poly1305};

/// Computes the tag for `aad`/`ciphertext` under the one-time key `otk` (the first 32 bytes of
/// a ChaCha20 block with counter 0, per §4.13).
pub fn tag(otk: &[u8; 32], aad: &[u8], ciphertext: &[u8]) -> [u8; 16] {
    let mut mac = Poly1305::new(Key::from_slice(otk));
    mac.update_padded(aad);
    mac.update_padded(ciphertext);

    let mut lengths = [0u8; 16];
    lengths[0..8].copy_from_slice(&(aad.len() as u64).to_le_bytes());
    lengths[8..16].copy_from_slice(&(ciphertext.len() as u64).to_le_bytes());
    mac.update_padded(&lengths);

    mac.finalize().into()
}

/// Constant-time comparison — tag verification must not leak timing information about where
/// the first mismatching byte is.
pub fn verify(expected: &[u8; 16], candidate: &[u8; 16]) -> bool {
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(candidate.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_deterministic() {
        let key = [7u8; 32];
        let t1 = tag(&key, b"header", b"ciphertext-bytes");
        let t2 = tag(&key, b"header", b"ciphertext-bytes");
        assert_eq!(t1, t2);
    }

    #[test]
    fn tag_changes_with_aad() {
        let key = [7u8; 32];
        let t1 = tag(&key, b"header-a", b"body");
        let t2 = tag(&key, b"header-b", b"body");
        assert_ne!(t1, t2);
    }

    #[test]
    fn verify_rejects_any_single_bit_flip() {
        let key = [3u8; 32];
        let good = tag(&key, b"aad", b"body");
        for i in 0..16 {
            let mut bad = good;
            bad[i] ^= 0x01;
            assert!(!verify(&good, &bad));
        }
        assert!(verify(&good, &good));
    }
}
