use distorage_crypto::CryptoError;
use thiserror::Error;

pub type DistorageResult<T> = Result<T, DistorageError>;

#[derive(Debug, Error)]
pub enum DistorageError {
    /// Dial failure, timeout, or dropped connection. The caller moves on to
    /// the next replica.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("integrity failure: {0}")]
    Integrity(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("bad identifier: {0}")]
    BadIdentifier(String),

    /// Every candidate replica for one chunk failed.
    #[error("{reason}")]
    Exhausted { chunk: u64, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("directory error: {0}")]
    Directory(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DistorageError {
    pub fn upload_exhausted(chunk: u64) -> Self {
        Self::Exhausted {
            chunk,
            reason: format!("failed to upload chunk {chunk} to any node"),
        }
    }

    pub fn download_exhausted(chunk: u64) -> Self {
        Self::Exhausted {
            chunk,
            reason: format!("no nodes available for chunk {chunk}"),
        }
    }

    /// Whether trying another replica could succeed where this one failed.
    pub fn is_replica_local(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure(_)
                | Self::Protocol(_)
                | Self::MalformedKey(_)
                | Self::AuthenticationFailed(_)
                | Self::Integrity(_)
                | Self::NotAuthorized(_)
                | Self::NotFound(_)
                | Self::BadIdentifier(_)
        )
    }
}

impl From<CryptoError> for DistorageError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::MalformedKey(m) => Self::MalformedKey(m),
            CryptoError::AuthenticationFailed(m) => Self::AuthenticationFailed(m),
            CryptoError::KeyFile(m) => Self::Config(m),
            CryptoError::Entropy(m) => Self::Other(anyhow::anyhow!("entropy source failure: {m}")),
        }
    }
}
