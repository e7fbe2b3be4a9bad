//! Extended attributes (xattr) on attribute records
//!
//! Each record carries its own name → value map. Lookups of names that were
//! never set yield an empty value rather than an error, and removing an
//! unset name succeeds.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::trace;

/// Maximum xattr name length (Linux standard)
pub const XATTR_NAME_MAX: usize = 255;

/// Maximum xattr value size (64KB)
pub const XATTR_SIZE_MAX: usize = 65536;

/// Validate xattr name
///
/// Ensures the name is not empty, fits the platform limit and contains no
/// NUL bytes (names are NUL-separated in listxattr replies).
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidXattr(
            "Extended attribute name cannot be empty".to_string(),
        ));
    }

    if name.len() > XATTR_NAME_MAX {
        return Err(Error::InvalidXattr(format!(
            "Extended attribute name too long: {} bytes (max {})",
            name.len(),
            XATTR_NAME_MAX
        )));
    }

    if name.contains('\0') {
        return Err(Error::InvalidXattr(
            "Extended attribute name cannot contain null bytes".to_string(),
        ));
    }

    Ok(())
}

/// Set an attribute, replacing any previous value
pub fn set(xattrs: &mut BTreeMap<String, Vec<u8>>, name: &str, value: &[u8]) -> Result<()> {
    validate_name(name)?;

    if value.len() > XATTR_SIZE_MAX {
        return Err(Error::InvalidXattr(format!(
            "Extended attribute value too large: {} bytes (max {})",
            value.len(),
            XATTR_SIZE_MAX
        )));
    }

    xattrs.insert(name.to_string(), value.to_vec());
    trace!("Set xattr {} ({} bytes)", name, value.len());
    Ok(())
}

/// Get an attribute value; unset names yield an empty value
pub fn get(xattrs: &BTreeMap<String, Vec<u8>>, name: &str) -> Result<Vec<u8>> {
    validate_name(name)?;
    Ok(xattrs.get(name).cloned().unwrap_or_default())
}

/// Remove an attribute; unset names are not an error
pub fn remove(xattrs: &mut BTreeMap<String, Vec<u8>>, name: &str) -> Result<()> {
    validate_name(name)?;
    if xattrs.remove(name).is_none() {
        trace!("Xattr {} was not set", name);
    }
    Ok(())
}

/// All attribute names, sorted
pub fn list(xattrs: &BTreeMap<String, Vec<u8>>) -> Vec<String> {
    xattrs.keys().cloned().collect()
}

/// Encode names the way listxattr(2) returns them: each NUL-terminated
pub fn encode_names(names: &[String]) -> Vec<u8> {
    let mut out = Vec::with_capacity(names.iter().map(|n| n.len() + 1).sum());
    for name in names {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut xattrs = BTreeMap::new();
        set(&mut xattrs, "user.test", b"test value").unwrap();
        assert_eq!(get(&xattrs, "user.test").unwrap(), b"test value");
    }

    #[test]
    fn test_get_unset_is_empty() {
        let xattrs = BTreeMap::new();
        assert!(get(&xattrs, "user.nonexistent").unwrap().is_empty());
    }

    #[test]
    fn test_update_value() {
        let mut xattrs = BTreeMap::new();
        set(&mut xattrs, "user.test", b"original").unwrap();
        set(&mut xattrs, "user.test", b"updated").unwrap();
        assert_eq!(get(&xattrs, "user.test").unwrap(), b"updated");
    }

    #[test]
    fn test_remove_and_remove_unset() {
        let mut xattrs = BTreeMap::new();
        set(&mut xattrs, "user.test", b"value").unwrap();
        remove(&mut xattrs, "user.test").unwrap();
        assert!(xattrs.is_empty());

        remove(&mut xattrs, "user.test").unwrap();
    }

    #[test]
    fn test_list_sorted() {
        let mut xattrs = BTreeMap::new();
        set(&mut xattrs, "user.b", b"2").unwrap();
        set(&mut xattrs, "com.apple.test", b"3").unwrap();
        set(&mut xattrs, "user.a", b"1").unwrap();

        assert_eq!(list(&xattrs), vec!["com.apple.test", "user.a", "user.b"]);
    }

    #[test]
    fn test_binary_values() {
        let mut xattrs = BTreeMap::new();
        let value: Vec<u8> = vec![0x00, 0xFF, 0x42, 0xAB, 0xCD, 0xEF];
        set(&mut xattrs, "user.binary", &value).unwrap();
        assert_eq!(get(&xattrs, "user.binary").unwrap(), value);
    }

    #[test]
    fn test_invalid_names() {
        let mut xattrs = BTreeMap::new();
        assert!(set(&mut xattrs, "", b"value").is_err());
        assert!(set(&mut xattrs, "user.test\0null", b"value").is_err());

        let long_name = format!("user.{}", "a".repeat(XATTR_NAME_MAX));
        assert!(matches!(
            set(&mut xattrs, &long_name, b"value"),
            Err(Error::InvalidXattr(_))
        ));
        assert!(get(&xattrs, "").is_err());
    }

    #[test]
    fn test_value_too_large() {
        let mut xattrs = BTreeMap::new();
        let large_value = vec![0u8; XATTR_SIZE_MAX + 1];
        assert!(set(&mut xattrs, "user.test", &large_value).is_err());
    }

    #[test]
    fn test_encode_names() {
        let names = vec!["user.a".to_string(), "user.bc".to_string()];
        assert_eq!(encode_names(&names), b"user.a\0user.bc\0");
        assert!(encode_names(&[]).is_empty());
    }
}
