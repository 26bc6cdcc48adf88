//! Entropy pool: a small ChaCha20-backed DRBG seeded from caller-supplied entropy (device
//! jitter, interrupt timing, …) and, before the first seed, from raw TSC jitter (§4.13).

use zeroize::Zeroize;

use crate::chacha;

/// `{seeded, 256-bit key, 96-bit nonce, 32-bit counter}` from §3.
pub struct EntropyPool {
    seeded: bool,
    key: [u8; 32],
    nonce: [u8; 12],
    counter: u32,
}

impl EntropyPool {
    pub const fn new() -> Self {
        Self {
            seeded: false,
            key: [0u8; 32],
            nonce: [0u8; 12],
            counter: 0,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// XORs `data` into the key (indexed `i % 32`) and nonce (indexed `i % 12`), marks the pool
    /// seeded, and rekeys.
    pub fn add_entropy(&mut self, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.key[i % 32] ^= b;
            self.nonce[i % 12] ^= b;
        }
        self.seeded = true;
        self.rekey();
    }

    /// Encrypts a 64-byte zero block under the current state, overwrites the key with the
    /// first 32 bytes of the result, and XORs the remaining 12 bytes into the nonce.
    fn rekey(&mut self) {
        let block = chacha::block(&self.key, &self.nonce, self.counter);
        self.key.copy_from_slice(&block[0..32]);
        for i in 0..12 {
            self.nonce[i] ^= block[32 + i];
        }
    }

    /// Stirs raw TSC read jitter into the key. Only meaningful before the first `add_entropy`
    /// call — once a real entropy source has been mixed in, `fill_random` stops calling this.
    fn stir_tsc_jitter(&mut self) {
        let mut prev = read_tsc();
        for i in 0..32 {
            let now = read_tsc();
            let jitter = now.wrapping_sub(prev);
            self.key[i] ^= jitter as u8;
            prev = now;
        }
    }

    /// Emits ChaCha20 keystream blocks, advancing the counter, until `out` is full, then
    /// rekeys for forward secrecy. Before the pool has ever seen `add_entropy`, stirs TSC
    /// jitter into the key first.
    pub fn fill_random(&mut self, out: &mut [u8]) {
        if !self.seeded {
            self.stir_tsc_jitter();
        }
        let mut produced = 0;
        while produced < out.len() {
            let block = chacha::block(&self.key, &self.nonce, self.counter);
            self.counter = self.counter.wrapping_add(1);
            let n = core::cmp::min(64, out.len() - produced);
            out[produced..produced + n].copy_from_slice(&block[..n]);
            produced += n;
        }
        self.rekey();
    }
}

impl Default for EntropyPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EntropyPool {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
    }
}

#[cfg(target_arch = "x86_64")]
fn read_tsc() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_arch = "x86_64"))]
fn read_tsc() -> u64 {
    // No TSC on this host architecture; the counter-derived state still differs call to call
    // because `EntropyPool::counter` advances, it just isn't mixing in real hardware jitter.
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseeded_pool_still_produces_distinct_blocks() {
        let mut pool = EntropyPool::new();
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        pool.fill_random(&mut a);
        pool.fill_random(&mut b);
        assert_ne!(a, b, "consecutive fill_random calls must never repeat a keystream block");
    }

    #[test]
    fn add_entropy_marks_pool_seeded() {
        let mut pool = EntropyPool::new();
        assert!(!pool.is_seeded());
        pool.add_entropy(b"some jitter bytes from a device");
        assert!(pool.is_seeded());
    }

    #[test]
    fn same_initial_state_and_inputs_reproduce_the_same_keystream() {
        let mut a = EntropyPool {
            seeded: true,
            key: [0x11; 32],
            nonce: [0x22; 12],
            counter: 0,
        };
        let mut b = EntropyPool {
            seeded: true,
            key: [0x11; 32],
            nonce: [0x22; 12],
            counter: 0,
        };
        let mut out_a = [0u8; 32];
        let mut out_b = [0u8; 32];
        a.fill_random(&mut out_a);
        b.fill_random(&mut out_b);
        assert_eq!(out_a, out_b);
    }
}
