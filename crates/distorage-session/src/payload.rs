//! Request payload codec
//!
//! ```text
//! [16 bytes: nonce][72 bytes: DER signature, zero padded][N bytes: body]
//! ```
//!
//! The signature length comes from its own DER header (`30 len ...`).

use distorage_core::{DistorageError, DistorageResult};
use distorage_crypto::{BLOCK_SIZE, MAX_SIGNATURE_SIZE};

/// Bytes before the body
pub const HEADER_LEN: usize = BLOCK_SIZE + MAX_SIGNATURE_SIZE;

const DER_SEQUENCE: u8 = 0x30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPayload {
    pub nonce: [u8; BLOCK_SIZE],
    pub signature: Vec<u8>,
    pub body: Vec<u8>,
}

impl RequestPayload {
    pub fn encode(&self) -> DistorageResult<Vec<u8>> {
        if self.signature.len() > MAX_SIGNATURE_SIZE {
            return Err(DistorageError::Protocol(format!(
                "signature is {} bytes, slot holds {MAX_SIGNATURE_SIZE}",
                self.signature.len()
            )));
        }
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.signature);
        out.resize(HEADER_LEN, 0);
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    pub fn decode(raw: &[u8]) -> DistorageResult<Self> {
        if raw.len() < HEADER_LEN {
            return Err(DistorageError::AuthenticationFailed(format!(
                "request payload too short: {} bytes (minimum {HEADER_LEN})",
                raw.len()
            )));
        }
        let (nonce, rest) = raw.split_at(BLOCK_SIZE);
        let (slot, body) = rest.split_at(MAX_SIGNATURE_SIZE);

        // Short-form DER length only; a P-256 signature never needs more.
        if slot[0] != DER_SEQUENCE || slot[1] >= 0x80 {
            return Err(DistorageError::AuthenticationFailed(
                "signature slot does not hold a DER sequence".into(),
            ));
        }
        let sig_len = 2 + slot[1] as usize;
        if sig_len > MAX_SIGNATURE_SIZE {
            return Err(DistorageError::AuthenticationFailed(format!(
                "signature length {sig_len} exceeds slot"
            )));
        }

        let mut nonce_bytes = [0u8; BLOCK_SIZE];
        nonce_bytes.copy_from_slice(nonce);
        Ok(Self {
            nonce: nonce_bytes,
            signature: slot[..sig_len].to_vec(),
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn der_like(len: usize) -> Vec<u8> {
        let mut sig = vec![DER_SEQUENCE, (len - 2) as u8];
        sig.resize(len, 0xab);
        sig
    }

    #[test]
    fn layout_is_fixed() {
        let payload = RequestPayload {
            nonce: [9u8; BLOCK_SIZE],
            signature: der_like(70),
            body: b"chunk".to_vec(),
        };
        let raw = payload.encode().unwrap();

        assert_eq!(raw.len(), HEADER_LEN + 5);
        assert_eq!(&raw[..16], &[9u8; 16]);
        assert_eq!(&raw[16 + 70..HEADER_LEN], &[0u8, 0]);
        assert_eq!(&raw[HEADER_LEN..], b"chunk");
        assert_eq!(RequestPayload::decode(&raw).unwrap(), payload);
    }

    #[test]
    fn empty_body_is_allowed() {
        let payload = RequestPayload {
            nonce: [0u8; BLOCK_SIZE],
            signature: der_like(72),
            body: Vec::new(),
        };
        let raw = payload.encode().unwrap();
        assert_eq!(raw.len(), HEADER_LEN);
        assert!(RequestPayload::decode(&raw).unwrap().body.is_empty());
    }

    #[test]
    fn oversized_signature_is_rejected_on_encode() {
        let payload = RequestPayload {
            nonce: [0u8; BLOCK_SIZE],
            signature: vec![DER_SEQUENCE; 73],
            body: Vec::new(),
        };
        assert!(payload.encode().is_err());
    }

    #[test]
    fn short_payload_fails_authentication() {
        let err = RequestPayload::decode(&[0u8; HEADER_LEN - 1]).unwrap_err();
        assert!(matches!(err, DistorageError::AuthenticationFailed(_)));
    }

    #[test]
    fn non_der_slot_fails_authentication() {
        let mut raw = vec![0u8; HEADER_LEN];
        raw[BLOCK_SIZE] = 0x31;
        assert!(matches!(
            RequestPayload::decode(&raw),
            Err(DistorageError::AuthenticationFailed(_))
        ));

        raw[BLOCK_SIZE] = DER_SEQUENCE;
        raw[BLOCK_SIZE + 1] = 71;
        assert!(matches!(
            RequestPayload::decode(&raw),
            Err(DistorageError::AuthenticationFailed(_))
        ));
    }

    proptest! {
        #[test]
        fn body_survives_codec(
            body in proptest::collection::vec(any::<u8>(), 0..=1024),
            sig_len in 8usize..=72,
        ) {
            let payload = RequestPayload {
                nonce: [3u8; BLOCK_SIZE],
                signature: der_like(sig_len),
                body,
            };
            let decoded = RequestPayload::decode(&payload.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, payload);
        }
    }
}
