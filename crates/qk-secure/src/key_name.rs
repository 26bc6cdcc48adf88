//! The on-disk key namespace (§4.13): keys are plain 8.3 names with no path separators, joined
//! onto the store's base directory. Mirrors the 8.3 acceptance rules `qk_fat`'s short-name
//! encoder enforces, without the FAT-specific packing.

use crate::error::SecureError;

/// Validates `name` as an 8.3 key: base 1-8 chars, optional `.` plus a 1-3 char extension, ASCII,
/// no path separators, no `..`.
pub fn validate(name: &str) -> Result<(), SecureError> {
    if !name.is_ascii() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(SecureError::InvalidKeyName);
    }
    let (base, ext) = match name.split_once('.') {
        Some((b, e)) => (b, Some(e)),
        None => (name, None),
    };
    if base.is_empty() || base.len() > 8 {
        return Err(SecureError::InvalidKeyName);
    }
    if let Some(ext) = ext {
        if ext.is_empty() || ext.len() > 3 || ext.contains('.') {
            return Err(SecureError::InvalidKeyName);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_8_3_names() {
        assert!(validate("WRAPKEY.BIN").is_ok());
        assert!(validate("A").is_ok());
        assert!(validate("LONGNAME").is_ok());
        assert!(validate("F.T").is_ok());
    }

    #[test]
    fn rejects_oversized_base_or_extension() {
        assert_eq!(validate("TOOLONGBASE"), Err(SecureError::InvalidKeyName));
        assert_eq!(validate("NAME.TOOLONG"), Err(SecureError::InvalidKeyName));
    }

    #[test]
    fn rejects_path_separators_and_traversal() {
        assert_eq!(validate("../ETC"), Err(SecureError::InvalidKeyName));
        assert_eq!(validate("A/B"), Err(SecureError::InvalidKeyName));
        assert_eq!(validate("A\\B"), Err(SecureError::InvalidKeyName));
    }

    #[test]
    fn rejects_empty_base_or_extension() {
        assert_eq!(validate(""), Err(SecureError::InvalidKeyName));
        assert_eq!(validate(".BIN"), Err(SecureError::InvalidKeyName));
        assert_eq!(validate("NAME."), Err(SecureError::InvalidKeyName));
    }

    #[test]
    fn rejects_non_ascii() {
        assert_eq!(validate("caf\u{e9}"), Err(SecureError::InvalidKeyName));
    }
}
