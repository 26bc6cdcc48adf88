//! The `SSB1 v1` sealed-blob wire format: header + ChaCha20-Poly1305 ciphertext (§4.13).
//!
//! ```text
//! offset  size  field
//! 0       4     magic "SSB1"
//! 4       4     version (LE u32, = 1)
//! 8       4     plaintext length (LE u32)
//! 12      12    nonce
//! 24      16    tag
//! 40      len   ciphertext
//! ```
//! The MAC's associated data is the header up to (not including) the tag: magic, version,
//! length, and nonce.

use alloc::vec::Vec;

use crate::{aead, entropy::EntropyPool, CryptoError};

pub const MAGIC: &[u8; 4] = b"SSB1";
pub const VERSION: u32 = 1;
const AAD_LEN: usize = 4 + 4 + 4 + 12; // magic + version + length + nonce
pub const HEADER_LEN: usize = AAD_LEN + 16; // + tag

/// Generates a fresh nonce, encrypts `plaintext` under `wrap_key`, and serialises the `SSB1`
/// header and ciphertext.
pub fn write_sealed_blob(wrap_key: &[u8; 32], entropy: &mut EntropyPool, plaintext: &[u8]) -> Vec<u8> {
    let mut nonce = [0u8; 12];
    entropy.fill_random(&mut nonce);

    let mut aad = [0u8; AAD_LEN];
    aad[0..4].copy_from_slice(MAGIC);
    aad[4..8].copy_from_slice(&VERSION.to_le_bytes());
    aad[8..12].copy_from_slice(&(plaintext.len() as u32).to_le_bytes());
    aad[12..24].copy_from_slice(&nonce);

    let (ciphertext, tag) = aead::seal(wrap_key, &nonce, &aad, plaintext);

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(&aad);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&ciphertext);
    out
}

/// Verifies magic/version/length, checks the tag in constant time, and decrypts.
pub fn read_sealed_blob(wrap_key: &[u8; 32], bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if bytes.len() < HEADER_LEN {
        return Err(CryptoError::InvalidFormat);
    }
    if &bytes[0..4] != MAGIC {
        return Err(CryptoError::InvalidFormat);
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != VERSION {
        return Err(CryptoError::InvalidFormat);
    }
    let length = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    if bytes.len() != HEADER_LEN + length {
        return Err(CryptoError::InvalidFormat);
    }

    let aad = &bytes[0..AAD_LEN];
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&bytes[12..24]);
    let mut tag = [0u8; 16];
    tag.copy_from_slice(&bytes[24..40]);
    let ciphertext = &bytes[HEADER_LEN..];

    aead::open(wrap_key, &nonce, aad, ciphertext, &tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_plaintext() {
        let wrap_key = [0x5Au8; 32];
        let mut entropy = EntropyPool::new();
        entropy.add_entropy(b"test seed");

        let plaintext: Vec<u8> = (0u8..96).collect();
        let blob = write_sealed_blob(&wrap_key, &mut entropy, &plaintext);
        let recovered = read_sealed_blob(&wrap_key, &blob).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn flipping_any_ciphertext_or_tag_byte_breaks_verification() {
        let wrap_key = [0x5Au8; 32];
        let mut entropy = EntropyPool::new();
        entropy.add_entropy(b"test seed");
        let blob = write_sealed_blob(&wrap_key, &mut entropy, b"some sealed payload of bytes");

        for i in HEADER_LEN - 16..blob.len() {
            let mut corrupt = blob.clone();
            corrupt[i] ^= 0x01;
            assert_eq!(read_sealed_blob(&wrap_key, &corrupt), Err(CryptoError::AuthenticationFailed));
        }
    }

    #[test]
    fn wrong_wrap_key_fails_to_open() {
        let mut entropy = EntropyPool::new();
        entropy.add_entropy(b"seed");
        let blob = write_sealed_blob(&[1u8; 32], &mut entropy, b"secret");
        assert_eq!(
            read_sealed_blob(&[2u8; 32], &blob),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn truncated_blob_is_rejected_as_malformed() {
        let wrap_key = [7u8; 32];
        let mut entropy = EntropyPool::new();
        entropy.add_entropy(b"seed");
        let blob = write_sealed_blob(&wrap_key, &mut entropy, b"payload");
        assert_eq!(
            read_sealed_blob(&wrap_key, &blob[..HEADER_LEN - 1]),
            Err(CryptoError::InvalidFormat)
        );
    }

    #[test]
    fn bad_magic_is_rejected() {
        let wrap_key = [7u8; 32];
        let mut entropy = EntropyPool::new();
        entropy.add_entropy(b"seed");
        let mut blob = write_sealed_blob(&wrap_key, &mut entropy, b"payload");
        blob[0] = b'X';
        assert_eq!(read_sealed_blob(&wrap_key, &blob), Err(CryptoError::InvalidFormat));
    }
}
