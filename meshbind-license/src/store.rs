//! Encrypted on-disk license store.
//!
//! Persists a single license record as `base64(iv ++ ciphertext)` under a
//! key derived from the current machine's fingerprint digest. The key is
//! never stored; moving the file to another machine makes decryption fail
//! outright. Absence of the file means "not activated", not an error.

use crate::error::StoreError;
use crate::record::LicenseRecord;
use chrono::{DateTime, Utc};
use meshbind_crypto::{decrypt, derive_key, encrypt, EncryptedData};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// On-disk format version, carried inside the encrypted plaintext.
pub const FORMAT_VERSION: &str = "1";

/// Plaintext envelope around the record.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEnvelope {
    format_version: String,
    saved_at: DateTime<Utc>,
    record: LicenseRecord,
}

/// Stores the license record encrypted at a fixed per-user location.
#[derive(Debug, Clone)]
pub struct EncryptedLicenseStore {
    path: PathBuf,
}

impl EncryptedLicenseStore {
    /// Creates a store at the given path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the default per-user store path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));

        #[cfg(target_os = "linux")]
        let dir = base.join("meshbind");
        #[cfg(not(target_os = "linux"))]
        let dir = base.join("Meshbind");

        dir.join("license.dat")
    }

    /// Returns the store path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if a license file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Encrypts and writes the record under a key derived from
    /// `key_seed` (the current fingerprint digest).
    pub fn save(&self, record: &LicenseRecord, key_seed: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::WriteFailure(e.to_string()))?;
        }

        let envelope = StoredEnvelope {
            format_version: FORMAT_VERSION.to_string(),
            saved_at: Utc::now(),
            record: record.clone(),
        };
        let plaintext = serde_json::to_vec(&envelope)?;

        let key = derive_key(key_seed);
        let encrypted =
            encrypt(&key, &plaintext).map_err(|e| StoreError::WriteFailure(e.to_string()))?;

        std::fs::write(&self.path, encrypted.to_base64())
            .map_err(|e| StoreError::WriteFailure(e.to_string()))?;
        restrict_permissions(&self.path)?;

        debug!(path = %self.path.display(), "license record saved");
        Ok(())
    }

    /// Loads and decrypts the record.
    ///
    /// Returns `Ok(None)` when no file exists or when the format version
    /// is unknown (forward migration); returns `DecryptFailure` when the
    /// envelope cannot be opened with the current machine's key.
    pub fn load(&self, key_seed: &str) -> Result<Option<LicenseRecord>, StoreError> {
        let encoded = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::ReadFailure(e.to_string())),
        };

        let encrypted = EncryptedData::from_base64(&encoded)
            .map_err(|e| StoreError::DecryptFailure(e.to_string()))?;

        let key = derive_key(key_seed);
        let plaintext =
            decrypt(&key, &encrypted).map_err(|e| StoreError::DecryptFailure(e.to_string()))?;

        let envelope: StoredEnvelope = serde_json::from_slice(&plaintext)?;
        if envelope.format_version != FORMAT_VERSION {
            info!(
                found = %envelope.format_version,
                "license file has an unknown format version, treating as absent"
            );
            return Ok(None);
        }

        Ok(Some(envelope.record))
    }

    /// Deletes the license file. Idempotent: returns `Ok(false)` when
    /// there was nothing to delete.
    pub fn delete(&self) -> Result<bool, StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::WriteFailure(e.to_string())),
        }
    }
}

/// Restricts the license file to the owning user.
///
/// Hardening only; the real boundary is the key being unrecoverable
/// off-machine.
fn restrict_permissions(path: &Path) -> Result<(), StoreError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| StoreError::WriteFailure(e.to_string()))?;
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}
