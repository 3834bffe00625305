//! Client key material persisted as `keys.json`
//!
//! ```json
//! { "file_key": "<64 hex>", "signing_key": "<64 hex>" }
//! ```
//!
//! Nodes load the same file and ignore the file key.

use std::path::Path;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::cipher::FileKey;
use crate::hashing::Address;
use crate::signing::SigningIdentity;
use crate::{CryptoError, KEY_SIZE};

#[derive(Serialize, Deserialize)]
struct KeyFile {
    file_key: String,
    signing_key: String,
}

/// File key plus long-term signing identity.
#[derive(Clone, Debug)]
pub struct ClientKeys {
    pub file_key: FileKey,
    pub identity: SigningIdentity,
}

impl ClientKeys {
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self {
            file_key: FileKey::generate()?,
            identity: SigningIdentity::generate()?,
        })
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let raw = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            CryptoError::KeyFile(format!("reading {}: {e}", path.display()))
        })?);
        let file: KeyFile = serde_json::from_str(&raw)
            .map_err(|e| CryptoError::KeyFile(format!("parsing {}: {e}", path.display())))?;
        let file = Zeroizing::new(file);

        let key_bytes = Zeroizing::new(
            hex::decode(&file.file_key)
                .map_err(|e| CryptoError::KeyFile(format!("file_key is not hex: {e}")))?,
        );
        let key: [u8; KEY_SIZE] = key_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::KeyFile(format!(
                "file_key must be {KEY_SIZE} bytes, got {}",
                key_bytes.len()
            ))
        })?;

        let signing_bytes = Zeroizing::new(
            hex::decode(&file.signing_key)
                .map_err(|e| CryptoError::KeyFile(format!("signing_key is not hex: {e}")))?,
        );
        let identity = SigningIdentity::from_secret_bytes(&signing_bytes)?;

        Ok(Self {
            file_key: FileKey::from_bytes(key),
            identity,
        })
    }

    /// Write the key file, creating parent directories. Owner-only on unix.
    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CryptoError::KeyFile(format!("creating {}: {e}", parent.display()))
                })?;
            }
        }

        let file = Zeroizing::new(KeyFile {
            file_key: hex::encode(self.file_key.as_bytes()),
            signing_key: hex::encode(self.identity.secret_bytes().as_slice()),
        });
        let json = Zeroizing::new(
            serde_json::to_string_pretty(&*file)
                .map_err(|e| CryptoError::KeyFile(format!("serializing keys: {e}")))?,
        );

        // Written under a temp name with its final mode, then renamed over
        let tmp_path = path.with_extension("tmp");
        let _ = std::fs::remove_file(&tmp_path);
        if let Err(e) = write_private(&tmp_path, json.as_bytes()) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(CryptoError::KeyFile(format!(
                "writing {}: {e}",
                tmp_path.display()
            )));
        }
        std::fs::rename(&tmp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            CryptoError::KeyFile(format!("renaming into {}: {e}", path.display()))
        })?;

        Ok(())
    }
}

/// Create `path` (which must not exist) readable by the owner only, and sync it.
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

impl zeroize::Zeroize for KeyFile {
    fn zeroize(&mut self) {
        self.file_key.zeroize();
        self.signing_key.zeroize();
    }
}
