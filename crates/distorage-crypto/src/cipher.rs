//! Symmetric encryption
//!
//! File ciphertext format (binary):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! `encrypt_block` is raw single-block AES-256 with no mode and no
//! authentication. It exists only for the session identity proof.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt};
use aes::Aes256;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use crate::{CryptoError, BLOCK_SIZE, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// A long-lived 256-bit client file key. Zeroized on drop.
#[derive(Clone)]
pub struct FileKey {
    bytes: [u8; KEY_SIZE],
}

impl FileKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Generate a random file key.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::Entropy(e.to_string()))?;
        Ok(Self { bytes })
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypt with AES-256-GCM under a fresh random nonce.
///
/// Returns: `[12-byte nonce][ciphertext][16-byte tag]`
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::AuthenticationFailed(format!("encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt the output of [`encrypt`].
pub fn decrypt(key: &[u8; KEY_SIZE], encrypted: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if encrypted.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::AuthenticationFailed(format!(
            "ciphertext too short: {} bytes (minimum {})",
            encrypted.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }

    let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(key.into());

    cipher.decrypt(nonce, ciphertext).map_err(|_| {
        CryptoError::AuthenticationFailed("decryption failed: wrong key or corrupted data".into())
    })
}

/// Encrypt exactly one 16-byte block with AES-256 (ECB of a single block).
pub fn encrypt_block(key: &[u8; KEY_SIZE], block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&buf);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key() -> [u8; KEY_SIZE] {
        *FileKey::generate().unwrap().as_bytes()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = key();
        let plaintext = b"hello, encrypted world!";

        let encrypted = encrypt(&key, plaintext).unwrap();
        assert_eq!(encrypted.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

        let decrypted = decrypt(&key, &encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encrypt(&key(), b"secret").unwrap();
        let err = decrypt(&key(), &encrypted).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed(_)));
    }

    #[test]
    fn test_too_short_fails() {
        let err = decrypt(&key(), &[0u8; NONCE_SIZE + TAG_SIZE - 1]).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed(_)));
    }

    #[test]
    fn test_nonce_is_fresh() {
        let key = key();
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_encrypt_block_fips197_vector() {
        // FIPS-197 appendix C.3
        let key: [u8; 32] = core::array::from_fn(|i| i as u8);
        let block: [u8; 16] = core::array::from_fn(|i| (i as u8) * 0x11);
        assert_eq!(
            hex::encode(encrypt_block(&key, &block)),
            "8ea2b7ca516745bfeafc49904b496089"
        );
    }

    #[test]
    fn test_file_key_debug_is_redacted() {
        let dbg = format!("{:?}", FileKey::from_bytes([7u8; 32]));
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("7, 7"));
    }

    proptest! {
        #[test]
        fn roundtrip_any_message(msg in proptest::collection::vec(any::<u8>(), 0..=2048)) {
            let key = [0x42u8; KEY_SIZE];
            let encrypted = encrypt(&key, &msg).unwrap();
            prop_assert_eq!(decrypt(&key, &encrypted).unwrap(), msg);
        }

        #[test]
        fn flipping_any_byte_fails(
            msg in proptest::collection::vec(any::<u8>(), 1..=256),
            pos in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let key = [0x17u8; KEY_SIZE];
            let mut encrypted = encrypt(&key, &msg).unwrap();
            let i = pos.index(encrypted.len());
            encrypted[i] ^= 1 << bit;
            prop_assert!(matches!(
                decrypt(&key, &encrypted),
                Err(CryptoError::AuthenticationFailed(_))
            ));
        }
    }
}
