use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// A public key could not be decoded, or is not of the expected curve.
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// Tag check, signature check, or identity proof failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("entropy source failure: {0}")]
    Entropy(String),

    #[error("key file error: {0}")]
    KeyFile(String),
}
