//! License envelope encryption using AES-256-CBC.
//!
//! The on-disk envelope is `base64(iv ++ ciphertext)` with a fresh random
//! IV per encryption. CBC with PKCS#7 padding matches the envelope format
//! the license server tooling expects; a wrong key surfaces as a padding
//! error, which is reported as a decryption failure rather than garbage
//! plaintext.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Size of the CBC initialization vector in bytes.
pub const IV_SIZE: usize = 16;

/// AES block size in bytes; the ciphertext is always a multiple of this.
pub const BLOCK_SIZE: usize = 16;

/// Encrypted data with the metadata needed for decryption.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedData {
    /// The IV used for encryption (unique per encryption).
    pub iv: [u8; IV_SIZE],
    /// The encrypted ciphertext.
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Returns the total envelope size.
    pub fn len(&self) -> usize {
        IV_SIZE + self.ciphertext.len()
    }

    /// Returns true if the ciphertext is empty.
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Encodes to base64 for storage: `base64(iv ++ ciphertext)`.
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.ciphertext);
        BASE64.encode(&bytes)
    }

    /// Decodes from base64.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;

        if bytes.len() < IV_SIZE + BLOCK_SIZE {
            return Err(CryptoError::Decryption("envelope too short".to_string()));
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes[..IV_SIZE]);
        let ciphertext = bytes[IV_SIZE..].to_vec();

        Ok(Self { iv, ciphertext })
    }
}

/// Encrypts plaintext with AES-256-CBC under a fresh random IV.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(key.as_bytes().into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    Ok(EncryptedData { iv, ciphertext })
}

/// Decrypts AES-256-CBC ciphertext.
///
/// Fails if the key is wrong or the envelope was tampered with; padding
/// validation rejects virtually all wrong-key decryptions.
pub fn decrypt(key: &DerivedKey, encrypted: &EncryptedData) -> CryptoResult<Vec<u8>> {
    Aes256CbcDec::new(key.as_bytes().into(), &encrypted.iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&encrypted.ciphertext)
        .map_err(|_| {
            CryptoError::Decryption("decryption failed (wrong key or corrupted data)".to_string())
        })
}

/// Encrypts a string and returns the base64 envelope.
pub fn encrypt_string(key: &DerivedKey, plaintext: &str) -> CryptoResult<String> {
    let encrypted = encrypt(key, plaintext.as_bytes())?;
    Ok(encrypted.to_base64())
}

/// Decrypts a base64 envelope back into a string.
pub fn decrypt_string(key: &DerivedKey, encoded: &str) -> CryptoResult<String> {
    let encrypted = EncryptedData::from_base64(encoded)?;
    let plaintext = decrypt(key, &encrypted)?;
    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::Decryption(format!("invalid UTF-8: {e}")))
}
