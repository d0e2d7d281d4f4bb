//! Fingerprint-keyed encryption layer for Meshbind.
//!
//! Provides the primitives the license store is built on:
//! - PBKDF2-HMAC-SHA256 key derivation from the hardware fingerprint digest
//! - AES-256-CBC envelope encryption with a random IV per save
//! - `base64(iv ++ ciphertext)` envelope encoding
//!
//! The derived key is never persisted. It is recomputed from the live
//! machine identity on every use, which is the actual binding boundary:
//! the envelope is opaque on any machine whose fingerprint differs.

mod cipher;
mod error;
mod key;

pub use cipher::{
    decrypt, decrypt_string, encrypt, encrypt_string, EncryptedData, BLOCK_SIZE, IV_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, derive_key_with, DerivedKey, APP_SALT, KEY_SIZE, PBKDF2_ITERATIONS};
