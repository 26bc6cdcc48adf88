//! ChaCha20-Poly1305 AEAD: one-time key derivation from block 0, encryption from block 1
//! onward, and authentication over `aad || ciphertext` (§4.13).

use alloc::vec::Vec;

use crate::{chacha, poly, CryptoError};

fn one_time_key(key: &[u8; 32], nonce: &[u8; 12]) -> [u8; 32] {
    let block0 = chacha::block(key, nonce, 0);
    let mut otk = [0u8; 32];
    otk.copy_from_slice(&block0[..32]);
    otk
}

/// Encrypts `plaintext` with keystream starting at counter 1 and returns `(ciphertext, tag)`.
pub fn seal(key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> (Vec<u8>, [u8; 16]) {
    let otk = one_time_key(key, nonce);
    let mut ciphertext = Vec::from(plaintext);
    chacha::apply_keystream(key, nonce, 1, &mut ciphertext);
    let tag = poly::tag(&otk, aad, &ciphertext);
    (ciphertext, tag)
}

/// Verifies `tag` over `aad`/`ciphertext` and, if it matches, decrypts in place (keystream is
/// its own inverse under XOR).
pub fn open(
    key: &[u8; 32],
    nonce: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
    expected_tag: &[u8; 16],
) -> Result<Vec<u8>, CryptoError> {
    let otk = one_time_key(key, nonce);
    let computed = poly::tag(&otk, aad, ciphertext);
    if !poly::verify(expected_tag, &computed) {
        return Err(CryptoError::AuthenticationFailed);
    }
    let mut plaintext = Vec::from(ciphertext);
    chacha::apply_keystream(key, nonce, 1, &mut plaintext);
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let key = [5u8; 32];
        let nonce = [9u8; 12];
        let aad = b"header-fields";
        let plaintext = b"the sealed blob's secret payload bytes";

        let (ciphertext, tag) = seal(&key, &nonce, aad, plaintext);
        assert_ne!(ciphertext, plaintext);

        let recovered = open(&key, &nonce, aad, &ciphertext, &tag).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn flipped_ciphertext_byte_fails_to_open() {
        let key = [5u8; 32];
        let nonce = [9u8; 12];
        let aad = b"aad";
        let (mut ciphertext, tag) = seal(&key, &nonce, aad, b"some secret data");
        ciphertext[0] ^= 0x01;
        assert_eq!(open(&key, &nonce, aad, &ciphertext, &tag), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn flipped_tag_byte_fails_to_open() {
        let key = [5u8; 32];
        let nonce = [9u8; 12];
        let aad = b"aad";
        let (ciphertext, mut tag) = seal(&key, &nonce, aad, b"some secret data");
        tag[0] ^= 0x01;
        assert_eq!(
            open(&key, &nonce, aad, &ciphertext, &tag),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn wrong_aad_length_fails_to_open() {
        let key = [5u8; 32];
        let nonce = [9u8; 12];
        let (ciphertext, tag) = seal(&key, &nonce, b"aad", b"some secret data");
        assert_eq!(
            open(&key, &nonce, b"aad-longer", &ciphertext, &tag),
            Err(CryptoError::AuthenticationFailed)
        );
    }
}
