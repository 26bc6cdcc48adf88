//! The `WKT1 v1` wrap-key blob: a TPM-sealed 32-byte key, plus the seal/unseal flow that
//! produces and consumes it (§4.13, §4.14).
//!
//! ```text
//! offset  size  field
//! 0       4     magic "WKT1"
//! 4       4     version (LE u32, = 1)
//! 8       4     privLen (LE u32)
//! 12      4     pubLen (LE u32)
//! 16      privLen  TPM2B_PRIVATE bytes from TPM2_Create
//! ..      pubLen   TPM2B_PUBLIC bytes from TPM2_Create
//! ```

use alloc::vec::Vec;

use crate::control_area::CrbTransport;
use crate::error::TpmError;
use crate::tpm2;

pub const MAGIC: &[u8; 4] = b"WKT1";
pub const VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 4;

fn encode(private: &[u8], public: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + private.len() + public.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(private.len() as u32).to_le_bytes());
    out.extend_from_slice(&(public.len() as u32).to_le_bytes());
    out.extend_from_slice(private);
    out.extend_from_slice(public);
    out
}

fn decode(blob: &[u8]) -> Result<(&[u8], &[u8]), TpmError> {
    if blob.len() < HEADER_LEN || &blob[0..4] != MAGIC {
        return Err(TpmError::InvalidFormat);
    }
    let version = u32::from_le_bytes(blob[4..8].try_into().unwrap());
    if version != VERSION {
        return Err(TpmError::InvalidFormat);
    }
    let priv_len = u32::from_le_bytes(blob[8..12].try_into().unwrap()) as usize;
    let pub_len = u32::from_le_bytes(blob[12..16].try_into().unwrap()) as usize;
    if blob.len() != HEADER_LEN + priv_len + pub_len {
        return Err(TpmError::InvalidFormat);
    }
    let private = &blob[HEADER_LEN..HEADER_LEN + priv_len];
    let public = &blob[HEADER_LEN + priv_len..];
    Ok((private, public))
}

/// Computes the PCR-7 policy digest a trial session would bind to, without leaving a session
/// open.
fn pcr7_policy_digest(transport: &mut CrbTransport) -> Result<Vec<u8>, TpmError> {
    let (trial_handle, _nonce) = tpm2::start_auth_session(transport, &[0u8; 16], true)?;
    tpm2::policy_pcr(transport, trial_handle)?;
    let digest = tpm2::policy_get_digest(transport, trial_handle)?;
    tpm2::flush_context(transport, trial_handle)?;
    Ok(digest)
}

/// Seals `wrap_key` under a fresh RSA storage primary with `adminWithPolicy` bound to the
/// current PCR 7 value, and serialises the result as a `WKT1` blob.
pub fn seal_wrap_key(transport: &mut CrbTransport, wrap_key: &[u8; 32]) -> Result<Vec<u8>, TpmError> {
    let policy_digest = pcr7_policy_digest(transport)?;
    let (primary_handle, _primary_public) = tpm2::create_primary_storage_key(transport)?;
    let result = tpm2::create_sealed_object(transport, primary_handle, wrap_key, &policy_digest);
    tpm2::flush_context(transport, primary_handle)?;
    let (private, public) = result?;
    Ok(encode(&private, &public))
}

/// Recovers the 32-byte wrap key from a `WKT1` blob: loads the sealed object under a fresh
/// primary and unseals it with a policy session that has satisfied PCR 7.
pub fn unseal_wrap_key(transport: &mut CrbTransport, blob: &[u8]) -> Result<[u8; 32], TpmError> {
    let (private, public) = decode(blob)?;

    let (primary_handle, _primary_public) = tpm2::create_primary_storage_key(transport)?;
    let load_result = tpm2::load(transport, primary_handle, private, public);
    let item_handle = match load_result {
        Ok(h) => h,
        Err(e) => {
            let _ = tpm2::flush_context(transport, primary_handle);
            return Err(e);
        }
    };

    let session_result = tpm2::start_auth_session(transport, &[0u8; 16], false);
    let unseal_result = match session_result {
        Ok((policy_handle, _nonce)) => {
            let r = tpm2::policy_pcr(transport, policy_handle)
                .and_then(|()| tpm2::unseal(transport, item_handle, policy_handle));
            let _ = tpm2::flush_context(transport, policy_handle);
            r
        }
        Err(e) => Err(e),
    };

    let _ = tpm2::flush_context(transport, item_handle);
    let _ = tpm2::flush_context(transport, primary_handle);

    let data = unseal_result?;
    if data.len() != 32 {
        return Err(TpmError::InvalidFormat);
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&data);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wkt1_round_trips_through_encode_decode() {
        let blob = encode(&[1, 2, 3, 4, 5], &[9, 9, 9]);
        let (private, public) = decode(&blob).unwrap();
        assert_eq!(private, &[1, 2, 3, 4, 5]);
        assert_eq!(public, &[9, 9, 9]);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut blob = encode(&[1], &[2]);
        blob[0] = b'X';
        assert_eq!(decode(&blob), Err(TpmError::InvalidFormat));
    }

    #[test]
    fn decode_rejects_truncated_blob() {
        let blob = encode(&[1, 2, 3], &[4, 5]);
        assert_eq!(decode(&blob[..blob.len() - 1]), Err(TpmError::InvalidFormat));
    }
}
