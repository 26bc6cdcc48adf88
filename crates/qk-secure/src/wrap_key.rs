//! Wrap-key acquisition and persistence: `WRAPKEY.BIN` (plaintext) or `WRAPKEY.TPM` (TPM-sealed),
//! per §4.13. Which one is current is a runtime decision the caller makes through
//! [`WrapKeyPolicy`], matching `SC_MODE`/`SC_BYPASS` from the startup config rather than a
//! compile-time feature — see `DESIGN.md`.

use alloc::vec;
use alloc::vec::Vec;

use qk_crypto::EntropyPool;
use qk_fat::OpenMode;
use qk_tpm::CrbTransport;
use qk_vfs::{Vfs, VfsError};

use crate::error::SecureError;

const WRAP_KEY_LEN: usize = 32;
const PLAINTEXT_NAME: &str = "WRAPKEY.BIN";
const TPM_NAME: &str = "WRAPKEY.TPM";

/// Which wrap-key backing the secure store should use. A caller-supplied value, not a
/// compile-time feature: the kernel picks `Tpm` or `Plaintext` per call based on `SC_MODE`/
/// `SC_BYPASS`, and retries a failed `Tpm` acquisition as `Plaintext` itself when that fallback is
/// allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapKeyPolicy {
    Tpm,
    Plaintext,
}

pub(crate) fn read_whole(vfs: &mut Vfs, path: &str) -> Result<Option<Vec<u8>>, SecureError> {
    let meta = match vfs.stat(path) {
        Ok(m) => m,
        Err(VfsError::NotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let file = vfs.open(path, OpenMode::Read)?;
    let mut buf = vec![0u8; meta.size as usize];
    let mut read = 0;
    while read < buf.len() {
        let n = vfs.read(file, &mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    vfs.close(file)?;
    buf.truncate(read);
    Ok(Some(buf))
}

pub(crate) fn write_whole(vfs: &mut Vfs, path: &str, data: &[u8]) -> Result<(), SecureError> {
    let file = vfs.open(path, OpenMode::CreateTruncate)?;
    let mut written = 0;
    while written < data.len() {
        let n = vfs.write(file, &data[written..])?;
        if n == 0 {
            break;
        }
        written += n;
    }
    vfs.close(file)?;
    Ok(())
}

/// Obtains the 32-byte wrap key living under `base_dir`, per `policy`: reads the existing
/// plaintext or TPM-sealed blob, or generates and persists a fresh key via `entropy` on first use.
pub fn acquire(
    vfs: &mut Vfs,
    entropy: &mut EntropyPool,
    base_dir: &str,
    policy: WrapKeyPolicy,
    transport: Option<&mut CrbTransport>,
) -> Result<[u8; WRAP_KEY_LEN], SecureError> {
    match policy {
        WrapKeyPolicy::Plaintext => {
            let path = qk_vfs::path::join(base_dir, PLAINTEXT_NAME);
            if let Some(bytes) = read_whole(vfs, &path)? {
                if bytes.len() != WRAP_KEY_LEN {
                    return Err(SecureError::Error);
                }
                let mut key = [0u8; WRAP_KEY_LEN];
                key.copy_from_slice(&bytes);
                Ok(key)
            } else {
                let mut key = [0u8; WRAP_KEY_LEN];
                entropy.fill_random(&mut key);
                write_whole(vfs, &path, &key)?;
                Ok(key)
            }
        }
        WrapKeyPolicy::Tpm => {
            let transport = transport.ok_or(SecureError::InvalidParam)?;
            let path = qk_vfs::path::join(base_dir, TPM_NAME);
            if let Some(blob) = read_whole(vfs, &path)? {
                Ok(qk_tpm::unseal_wrap_key(transport, &blob)?)
            } else {
                let mut key = [0u8; WRAP_KEY_LEN];
                entropy.fill_random(&mut key);
                let blob = qk_tpm::seal_wrap_key(transport, &key)?;
                write_whole(vfs, &path, &blob)?;
                Ok(key)
            }
        }
    }
}
