//! Long-term P-256 ECDSA identity
//!
//! The SubjectPublicKeyInfo DER of the verifying key is what goes over the
//! wire and what the address is derived from. Signatures are ASN.1 DER over a
//! 32-byte digest, used directly as the ECDSA prehash.

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::hashing::{derive_address, Address, Digest};
use crate::{CryptoError, KEY_SIZE};

/// A signing key together with its encoded public half and address.
#[derive(Clone)]
pub struct SigningIdentity {
    key: SigningKey,
    public_der: Vec<u8>,
    address: Address,
}

impl SigningIdentity {
    /// Generate a new random identity.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = Zeroizing::new([0u8; KEY_SIZE]);
        // A scalar of zero or >= n is rejected; the odds are ~2^-32, so retry.
        loop {
            OsRng
                .try_fill_bytes(&mut seed[..])
                .map_err(|e| CryptoError::Entropy(e.to_string()))?;
            if let Ok(identity) = Self::from_secret_bytes(&seed[..]) {
                return Ok(identity);
            }
        }
    }

    /// Rebuild an identity from the 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key = SigningKey::from_slice(bytes)
            .map_err(|e| CryptoError::MalformedKey(format!("invalid P-256 secret key: {e}")))?;
        let public_der = key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::MalformedKey(format!("encoding public key: {e}")))?
            .as_bytes()
            .to_vec();
        let address = derive_address(&public_der);
        Ok(Self {
            key,
            public_der,
            address,
        })
    }

    /// The 32-byte secret scalar. Zeroized when the returned buffer drops.
    pub fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.key.to_bytes().to_vec())
    }

    pub fn public_key_der(&self) -> Vec<u8> {
        self.public_der.clone()
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("address", &self.address)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Sign a digest, returning the DER-encoded signature.
pub fn sign(identity: &SigningIdentity, digest: &Digest) -> Result<Vec<u8>, CryptoError> {
    let signature: Signature = identity
        .key
        .sign_prehash(digest)
        .map_err(|e| CryptoError::AuthenticationFailed(format!("signing failed: {e}")))?;
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Verify a DER signature over `digest` against an SPKI DER public key.
///
/// Undecodable keys or signatures verify as `false`.
pub fn verify(public_key_der: &[u8], digest: &Digest, signature: &[u8]) -> bool {
    let Ok(key) = decode_public_key(public_key_der) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(signature) else {
        return false;
    };
    key.verify_prehash(digest, &signature).is_ok()
}

/// Decode an SPKI DER P-256 public key.
pub fn decode_public_key(public_key_der: &[u8]) -> Result<VerifyingKey, CryptoError> {
    VerifyingKey::from_public_key_der(public_key_der)
        .map_err(|e| CryptoError::MalformedKey(format!("invalid P-256 public key: {e}")))
}
