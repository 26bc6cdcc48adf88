//! Entropy pool, ChaCha20-Poly1305 AEAD framing, and the `SSB1` sealed-blob format (§4.13).
//!
//! The primitives themselves (the ChaCha20 block function and the Poly1305 one-time MAC) come
//! from the RustCrypto `chacha20`/`poly1305` crates; the entropy pool's rekey state machine and
//! the AEAD/sealed-blob framing around them are this crate's own contract.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod aead;
mod chacha;
mod entropy;
mod poly;
mod sealed;

pub use entropy::EntropyPool;
pub use sealed::{read_sealed_blob, write_sealed_blob, HEADER_LEN, MAGIC, VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// The blob is too short, carries the wrong magic/version, or its declared length doesn't
    /// match the remaining bytes.
    InvalidFormat,
    /// The Poly1305 tag didn't verify; the blob is corrupt or was tampered with.
    AuthenticationFailed,
}
