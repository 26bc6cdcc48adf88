//! Uniform error taxonomy (§7) for the secure store.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureError {
    /// A key name failed the 8.3 on-disk namespace validator.
    InvalidKeyName,
    /// `WrapKeyPolicy::Tpm` was requested with no transport supplied.
    InvalidParam,
    NotFound,
    OutOfMemory,
    Timeout,
    /// The wrap-key or payload blob failed authentication, or was malformed.
    Error,
}

impl From<qk_vfs::VfsError> for SecureError {
    fn from(e: qk_vfs::VfsError) -> Self {
        match e {
            qk_vfs::VfsError::InvalidParam => SecureError::InvalidParam,
            qk_vfs::VfsError::NotFound => SecureError::NotFound,
            qk_vfs::VfsError::NotSupported => SecureError::Error,
            qk_vfs::VfsError::Busy => SecureError::Timeout,
            qk_vfs::VfsError::OutOfMemory => SecureError::OutOfMemory,
            qk_vfs::VfsError::Timeout => SecureError::Timeout,
            qk_vfs::VfsError::Error => SecureError::Error,
        }
    }
}

impl From<qk_crypto::CryptoError> for SecureError {
    fn from(e: qk_crypto::CryptoError) -> Self {
        match e {
            qk_crypto::CryptoError::InvalidFormat => SecureError::Error,
            qk_crypto::CryptoError::AuthenticationFailed => SecureError::Error,
        }
    }
}

impl From<qk_tpm::TpmError> for SecureError {
    fn from(e: qk_tpm::TpmError) -> Self {
        match e {
            qk_tpm::TpmError::Timeout => SecureError::Timeout,
            qk_tpm::TpmError::ResponseCode(_) => SecureError::Error,
            qk_tpm::TpmError::InvalidFormat => SecureError::Error,
            qk_tpm::TpmError::InvalidParam => SecureError::InvalidParam,
        }
    }
}
