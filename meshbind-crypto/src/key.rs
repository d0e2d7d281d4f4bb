//! Key derivation from machine identity.
//!
//! The license store key is derived with PBKDF2-HMAC-SHA256 from the
//! hardware fingerprint digest. The key is never written to disk; it is
//! recomputed from the live fingerprint on every save and load, so an
//! envelope copied to another machine cannot be opened there.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// PBKDF2 iteration count for store-key derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Fixed application salt for store-key derivation.
///
/// The salt does not need to be secret: uniqueness of the derived key
/// comes from the per-machine fingerprint seed.
pub const APP_SALT: &[u8] = b"meshbind-license-store-v1";

/// A derived encryption key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Creates a derived key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derives an AES-256 key from a fingerprint seed using PBKDF2-HMAC-SHA256
/// with the fixed application salt.
pub fn derive_key(seed: &str) -> DerivedKey {
    derive_key_with(seed, APP_SALT, PBKDF2_ITERATIONS)
}

/// Derives a key with explicit salt and iteration count.
pub fn derive_key_with(seed: &str, salt: &[u8], iterations: u32) -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(seed.as_bytes(), salt, iterations, &mut bytes);
    DerivedKey::from_bytes(bytes)
}
