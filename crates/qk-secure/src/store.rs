//! The secure store proper: validates a key against the on-disk namespace, resolves it under the
//! store's base directory, and seals/opens `SSB1` blobs through the acquired wrap key (§4.13).

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use qk_crypto::EntropyPool;
use qk_tpm::CrbTransport;
use qk_vfs::Vfs;

use crate::error::SecureError;
use crate::key_name;
use crate::wrap_key::{self, WrapKeyPolicy};

const DEFAULT_BASE_DIR: &str = "/system/sc";

/// A sealed-blob key/value store rooted at a single VFS directory (default `/system/sc`,
/// created recursively on first use).
pub struct SecureStore {
    base_dir: String,
}

impl SecureStore {
    pub fn new(base_dir: Option<&str>) -> Self {
        Self {
            base_dir: base_dir.unwrap_or(DEFAULT_BASE_DIR).to_string(),
        }
    }

    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    fn resolve(&self, key: &str) -> Result<String, SecureError> {
        key_name::validate(key)?;
        Ok(qk_vfs::path::join(&self.base_dir, key))
    }

    /// Seals `plaintext` under `key`. Creates the store's base directory if it does not already
    /// exist and, on first use of `policy`, generates and persists a fresh wrap key.
    pub fn seal(
        &self,
        vfs: &mut Vfs,
        entropy: &mut EntropyPool,
        policy: WrapKeyPolicy,
        transport: Option<&mut CrbTransport>,
        key: &str,
        plaintext: &[u8],
    ) -> Result<(), SecureError> {
        let path = self.resolve(key)?;
        vfs.ensure_dir(&self.base_dir)?;
        let wrap_key = wrap_key::acquire(vfs, entropy, &self.base_dir, policy, transport)?;
        let blob = qk_crypto::write_sealed_blob(&wrap_key, entropy, plaintext);
        wrap_key::write_whole(vfs, &path, &blob)
    }

    /// Reads back and authenticates the blob stored under `key`, returning its plaintext.
    pub fn unseal(
        &self,
        vfs: &mut Vfs,
        entropy: &mut EntropyPool,
        policy: WrapKeyPolicy,
        transport: Option<&mut CrbTransport>,
        key: &str,
    ) -> Result<Vec<u8>, SecureError> {
        let path = self.resolve(key)?;
        let blob = wrap_key::read_whole(vfs, &path)?.ok_or(SecureError::NotFound)?;
        let wrap_key = wrap_key::acquire(vfs, entropy, &self.base_dir, policy, transport)?;
        Ok(qk_crypto::read_sealed_blob(&wrap_key, &blob)?)
    }

    /// True if a blob is currently stored under `key`.
    pub fn exists(&self, vfs: &mut Vfs, key: &str) -> Result<bool, SecureError> {
        let path = self.resolve(key)?;
        match vfs.stat(&path) {
            Ok(_) => Ok(true),
            Err(qk_vfs::VfsError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::string::String;
    use qk_block::MemoryBlockDevice;
    use qk_cache::SectorCache;
    use qk_fat::FatFileSystem;
    use qk_vfs::FatAdapter;

    const BYTES_PER_SECTOR: u32 = 512;

    /// A minimal FAT16 image with one throwaway root file, so the root directory and FAT tables
    /// are well-formed without needing this filesystem's (unsupported) directory creation. Mirrors
    /// `qk_vfs`'s own FAT16 test fixture.
    fn fat16_image(total_sectors: u32) -> Vec<u8> {
        let sectors_per_cluster = 1u8;
        let reserved = 1u32;
        let fat_count = 2u32;
        let root_entries = 16u32;
        let sectors_per_fat = 4u32;

        let mut image = alloc::vec![0u8; (total_sectors * BYTES_PER_SECTOR) as usize];
        image[0x0B..0x0D].copy_from_slice(&(BYTES_PER_SECTOR as u16).to_le_bytes());
        image[0x0D] = sectors_per_cluster;
        image[0x0E..0x10].copy_from_slice(&(reserved as u16).to_le_bytes());
        image[0x10] = fat_count as u8;
        image[0x11..0x13].copy_from_slice(&(root_entries as u16).to_le_bytes());
        image[0x16..0x18].copy_from_slice(&(sectors_per_fat as u16).to_le_bytes());
        image[0x20..0x24].copy_from_slice(&total_sectors.to_le_bytes());
        image[510] = 0x55;
        image[511] = 0xAA;
        image
    }

    /// A VFS with a single FAT16 volume mounted at `/`. The secure store lives at `/` here
    /// rather than the default `/system/sc`, since this FAT implementation only creates files in
    /// an already-existing directory; a deployed kernel is expected to lay down `/system/sc` at
    /// image-build time rather than rely on `ensure_dir` to create it at runtime.
    fn new_vfs() -> Vfs {
        let image = fat16_image(4096);
        let dev = MemoryBlockDevice::from_image(BYTES_PER_SECTOR as usize, image);
        let cache = SectorCache::new(dev, 64 * BYTES_PER_SECTOR as usize);
        let fs = FatFileSystem::mount(cache).expect("mount");
        let mut vfs = Vfs::new();
        vfs.mount(String::from("/"), Box::new(FatAdapter::new(fs)));
        vfs
    }

    #[test]
    fn seal_then_unseal_round_trips_plaintext() {
        let mut vfs = new_vfs();
        let mut entropy = EntropyPool::new();
        entropy.add_entropy(b"test seed material");
        let store = SecureStore::new(Some("/"));

        store
            .seal(&mut vfs, &mut entropy, WrapKeyPolicy::Plaintext, None, "SECRET", b"hello world")
            .expect("seal");
        let out = store
            .unseal(&mut vfs, &mut entropy, WrapKeyPolicy::Plaintext, None, "SECRET")
            .expect("unseal");
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn reseal_reuses_the_persisted_wrap_key() {
        let mut vfs = new_vfs();
        let mut entropy = EntropyPool::new();
        entropy.add_entropy(b"more seed material");
        let store = SecureStore::new(Some("/"));

        store
            .seal(&mut vfs, &mut entropy, WrapKeyPolicy::Plaintext, None, "ONE", b"first")
            .expect("seal one");
        store
            .seal(&mut vfs, &mut entropy, WrapKeyPolicy::Plaintext, None, "TWO", b"second")
            .expect("seal two");

        assert_eq!(
            store
                .unseal(&mut vfs, &mut entropy, WrapKeyPolicy::Plaintext, None, "ONE")
                .unwrap(),
            b"first"
        );
        assert_eq!(
            store
                .unseal(&mut vfs, &mut entropy, WrapKeyPolicy::Plaintext, None, "TWO")
                .unwrap(),
            b"second"
        );
    }

    #[test]
    fn unseal_of_missing_key_is_not_found() {
        let mut vfs = new_vfs();
        let mut entropy = EntropyPool::new();
        let store = SecureStore::new(Some("/"));
        let err = store
            .unseal(&mut vfs, &mut entropy, WrapKeyPolicy::Plaintext, None, "NOPE")
            .unwrap_err();
        assert_eq!(err, SecureError::NotFound);
    }

    #[test]
    fn invalid_key_name_is_rejected_before_touching_the_vfs() {
        let mut vfs = new_vfs();
        let mut entropy = EntropyPool::new();
        let store = SecureStore::new(Some("/"));
        let err = store
            .seal(&mut vfs, &mut entropy, WrapKeyPolicy::Plaintext, None, "../escape", b"x")
            .unwrap_err();
        assert_eq!(err, SecureError::InvalidKeyName);
    }

    #[test]
    fn tpm_policy_without_a_transport_is_invalid_param() {
        let mut vfs = new_vfs();
        let mut entropy = EntropyPool::new();
        let store = SecureStore::new(Some("/"));
        let err = store
            .seal(&mut vfs, &mut entropy, WrapKeyPolicy::Tpm, None, "SECRET", b"x")
            .unwrap_err();
        assert_eq!(err, SecureError::InvalidParam);
    }

    #[test]
    fn default_base_dir_is_system_sc() {
        assert_eq!(SecureStore::new(None).base_dir(), "/system/sc");
    }
}
