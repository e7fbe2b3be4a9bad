//! AES-256-GCM Encryption Implementation
//!
//! Every file blob is sealed as a whole with AES-256-GCM, which provides:
//! - Confidentiality: Data is encrypted
//! - Integrity: Any tampering is detected
//! - Authentication: Verifies the data came from the key holder
//!
//! Token layout: `version (1) || nonce (12) || ciphertext || tag (16)`.
//! The version byte is authenticated as associated data.

use crate::crypto::{DataKey, BLOB_VERSION, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use std::fmt;

/// A parsed token: nonce plus ciphertext with appended authentication tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    /// Nonce used for encryption (unique per encryption)
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with appended authentication tag
    pub ciphertext: Vec<u8>,
}

impl SealedBlob {
    /// Smallest valid token: an encrypted empty plaintext
    pub const MIN_LEN: usize = 1 + NONCE_SIZE + TAG_SIZE;

    /// Get the total size of the serialized token
    pub fn size(&self) -> usize {
        1 + self.nonce.len() + self.ciphertext.len()
    }

    /// Serialize to token bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size());
        bytes.push(BLOB_VERSION);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parse token bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::MIN_LEN {
            return Err(Error::Decryption(format!(
                "Token too short: {} bytes",
                bytes.len()
            )));
        }

        if bytes[0] != BLOB_VERSION {
            return Err(Error::Decryption(format!(
                "Unsupported token version: {}",
                bytes[0]
            )));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[1..1 + NONCE_SIZE]);

        Ok(SealedBlob {
            nonce,
            ciphertext: bytes[1 + NONCE_SIZE..].to_vec(),
        })
    }
}

/// Authenticated encryption over opaque byte blobs with one fixed key.
///
/// Each call is independent: no chunking and no plaintext is retained
/// between calls.
pub struct Cipher {
    key: LessSafeKey,
}

impl Cipher {
    /// Build a cipher from the active data key
    pub fn new(key: &DataKey) -> Result<Self> {
        let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes())
            .map_err(|_| Error::Encryption("Failed to create encryption key".to_string()))?;

        Ok(Cipher {
            key: LessSafeKey::new(unbound_key),
        })
    }

    /// Encrypt a whole plaintext into a token
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.seal(plaintext).map(|sealed| sealed.to_bytes())
    }

    /// Decrypt a token produced by [`Cipher::encrypt`] under the same key
    pub fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>> {
        let sealed = SealedBlob::from_bytes(token)?;
        self.open(&sealed)
    }

    /// Encrypt into the structured form
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedBlob> {
        // Generate random nonce
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        // Prepare buffer: plaintext + space for tag
        let mut in_out = Vec::with_capacity(plaintext.len() + TAG_SIZE);
        in_out.extend_from_slice(plaintext);

        self.key
            .seal_in_place_append_tag(nonce, Aad::from([BLOB_VERSION]), &mut in_out)
            .map_err(|_| Error::Encryption("Encryption failed".to_string()))?;

        Ok(SealedBlob {
            nonce: nonce_bytes,
            ciphertext: in_out,
        })
    }

    /// Decrypt the structured form
    pub fn open(&self, sealed: &SealedBlob) -> Result<Vec<u8>> {
        if sealed.ciphertext.len() < TAG_SIZE {
            return Err(Error::Decryption("Ciphertext too short".to_string()));
        }

        let nonce = Nonce::assume_unique_for_key(sealed.nonce);

        // Decrypt in place
        let mut in_out = sealed.ciphertext.clone();
        let len = self
            .key
            .open_in_place(nonce, Aad::from([BLOB_VERSION]), &mut in_out)
            .map_err(|_| {
                Error::Decryption("Decryption failed: data corrupted or wrong key".to_string())
            })?
            .len();

        // Drop the tag; the buffer now holds only plaintext
        in_out.truncate(len);
        Ok(in_out)
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("algorithm", &"AES-256-GCM")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> Cipher {
        Cipher::new(&DataKey::generate()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = test_cipher();
        let plaintext = b"Hello, flatcryptfs!";

        let token = cipher.encrypt(plaintext).unwrap();
        let decrypted = cipher.decrypt(&token).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_tokens_are_not_deterministic() {
        let cipher = test_cipher();

        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();

        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
    }

    #[test]
    fn test_ciphertext_hides_plaintext() {
        let cipher = test_cipher();
        let plaintext = b"attack at dawn, attack at dawn";

        let token = cipher.encrypt(plaintext).unwrap();
        assert!(!token.windows(plaintext.len()).any(|w| w == plaintext));
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher1 = test_cipher();
        let cipher2 = test_cipher();

        let token = cipher1.encrypt(b"Secret data").unwrap();
        let result = cipher2.decrypt(&token);

        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_every_bit_flip_fails() {
        let cipher = test_cipher();
        let token = cipher.encrypt(b"tamper").unwrap();

        for byte in 0..token.len() {
            for bit in 0..8 {
                let mut tampered = token.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    matches!(cipher.decrypt(&tampered), Err(Error::Decryption(_))),
                    "flip of byte {} bit {} was accepted",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_truncation_fails() {
        let cipher = test_cipher();
        let token = cipher.encrypt(b"truncate me").unwrap();

        for len in 0..token.len() {
            assert!(matches!(
                cipher.decrypt(&token[..len]),
                Err(Error::Decryption(_))
            ));
        }
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = test_cipher();

        let token = cipher.encrypt(b"").unwrap();
        assert_eq!(token.len(), SealedBlob::MIN_LEN);
        assert!(cipher.decrypt(&token).unwrap().is_empty());
    }

    #[test]
    fn test_large_plaintext() {
        let cipher = test_cipher();
        let plaintext = vec![0x42u8; 1024 * 1024]; // 1MB

        let token = cipher.encrypt(&plaintext).unwrap();
        let decrypted = cipher.decrypt(&token).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_sealed_blob_layout() {
        let cipher = test_cipher();

        let sealed = cipher.seal(b"layout").unwrap();
        let bytes = sealed.to_bytes();

        assert_eq!(bytes[0], BLOB_VERSION);
        assert_eq!(bytes.len(), sealed.size());
        assert_eq!(SealedBlob::from_bytes(&bytes).unwrap(), sealed);
        assert_eq!(cipher.open(&sealed).unwrap(), b"layout");
    }

    #[test]
    fn test_debug_hides_key() {
        let cipher = test_cipher();
        let rendered = format!("{:?}", cipher);
        assert!(rendered.contains("AES-256-GCM"));
    }
}
