//! Ephemeral X25519 key exchange
//!
//! Public keys travel in their standard SubjectPublicKeyInfo DER form:
//! ```text
//! 30 2a 30 05 06 03 2b 65 6e 03 21 00 || 32-byte key   (44 bytes total)
//! ```

use rand::{rngs::OsRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{CryptoError, KEY_SIZE};

/// DER header of an X25519 SubjectPublicKeyInfo (OID 1.3.101.110)
const X25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00,
];

/// Encoded length of an X25519 SPKI public key
pub const EXCHANGE_PUBLIC_KEY_LEN: usize = X25519_SPKI_PREFIX.len() + KEY_SIZE;

/// Key pair for one session. Never reused across connections.
pub struct ExchangeKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ExchangeKeyPair {
    /// Public half in SPKI DER form, ready to be sent as one frame.
    pub fn public_key_der(&self) -> Vec<u8> {
        encode_public_key(&self.public)
    }
}

impl std::fmt::Debug for ExchangeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeKeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Raw 32-byte X25519 shared secret. Zeroized on drop.
#[derive(Clone)]
pub struct SharedSecret {
    bytes: [u8; KEY_SIZE],
}

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh ephemeral key pair from the OS entropy source.
pub fn generate_key_exchange_keypair() -> Result<ExchangeKeyPair, CryptoError> {
    let mut seed = [0u8; KEY_SIZE];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| CryptoError::Entropy(e.to_string()))?;
    let secret = StaticSecret::from(seed);
    seed.zeroize();
    let public = PublicKey::from(&secret);
    Ok(ExchangeKeyPair { secret, public })
}

/// Decode the remote's SPKI public key and run X25519 against our secret.
///
/// Fails with `MalformedKey` if the bytes are not an X25519 SPKI, or if the
/// remote point is of low order (all-zero shared secret).
pub fn compute_shared_secret(
    own: &ExchangeKeyPair,
    remote_public_der: &[u8],
) -> Result<SharedSecret, CryptoError> {
    let remote = decode_public_key(remote_public_der)?;
    let shared = own.secret.diffie_hellman(&remote);
    if !shared.was_contributory() {
        return Err(CryptoError::MalformedKey(
            "remote key exchange point is of low order".into(),
        ));
    }
    Ok(SharedSecret::from_bytes(*shared.as_bytes()))
}

fn encode_public_key(key: &PublicKey) -> Vec<u8> {
    let mut der = Vec::with_capacity(EXCHANGE_PUBLIC_KEY_LEN);
    der.extend_from_slice(&X25519_SPKI_PREFIX);
    der.extend_from_slice(key.as_bytes());
    der
}

fn decode_public_key(der: &[u8]) -> Result<PublicKey, CryptoError> {
    if der.len() != EXCHANGE_PUBLIC_KEY_LEN {
        return Err(CryptoError::MalformedKey(format!(
            "key exchange public key must be {EXCHANGE_PUBLIC_KEY_LEN} bytes, got {}",
            der.len()
        )));
    }
    let (prefix, raw) = der.split_at(X25519_SPKI_PREFIX.len());
    if prefix != X25519_SPKI_PREFIX {
        return Err(CryptoError::MalformedKey(
            "key exchange public key is not an X25519 SubjectPublicKeyInfo".into(),
        ));
    }
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(raw);
    Ok(PublicKey::from(bytes))
}
