//! AES-256-CBC encryption for credential tokens.
//!
//! The key is the SHA-256 digest of a configured secret, so any non-empty secret
//! yields a 32-byte key. Every encryption uses a fresh random 16-byte IV and the
//! output is `base64(IV || ciphertext)`. The format matches what the browser client
//! decrypts, so it must not change.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Size of the initialization vector in bytes (one AES block)
const IV_SIZE: usize = 16;

/// Errors raised by [`TokenCipher`].
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption secret is not configured")]
    KeyMissing,

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("decryption failed (wrong key or tampered data)")]
    Decrypt,
}

/// Stateless symmetric cipher keyed from the process-wide secret.
///
/// Cloning is cheap; the cipher holds only the derived key.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Derives the cipher key from `secret`.
    ///
    /// # Returns
    /// * `Ok(TokenCipher)` - Ready to use
    /// * `Err(CipherError::KeyMissing)` - If the secret is empty
    pub fn new(secret: &str) -> Result<Self, CipherError> {
        if secret.is_empty() {
            return Err(CipherError::KeyMissing);
        }

        let key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        Ok(Self { key })
    }

    /// Encrypts `plaintext` with a random IV.
    ///
    /// Empty input yields `None` rather than an encrypted empty string.
    pub fn encrypt(&self, plaintext: &str) -> Option<String> {
        if plaintext.is_empty() {
            return None;
        }

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut combined = Vec::with_capacity(IV_SIZE + ciphertext.len());
        combined.extend_from_slice(&iv);
        combined.extend_from_slice(&ciphertext);

        Some(BASE64.encode(combined))
    }

    /// Decrypts a value produced by [`TokenCipher::encrypt`].
    ///
    /// # Returns
    /// * `Ok(Some(String))` - Decrypted plaintext
    /// * `Ok(None)` - Input was empty
    /// * `Err` - Not base64, truncated, bad padding, or not UTF-8
    pub fn decrypt(&self, ciphertext: &str) -> Result<Option<String>, CipherError> {
        if ciphertext.is_empty() {
            return Ok(None);
        }

        let bytes = BASE64
            .decode(ciphertext)
            .map_err(|e| CipherError::Malformed(format!("invalid base64: {}", e)))?;

        // IV plus at least one full block
        if bytes.len() < IV_SIZE * 2 || bytes.len() % IV_SIZE != 0 {
            return Err(CipherError::Malformed(format!(
                "unexpected length {} bytes",
                bytes.len()
            )));
        }

        let (iv, body) = bytes.split_at(IV_SIZE);
        let mut iv_block = [0u8; IV_SIZE];
        iv_block.copy_from_slice(iv);

        let plaintext = Aes256CbcDec::new(&self.key.into(), &iv_block.into())
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| CipherError::Decrypt)?;

        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| CipherError::Decrypt)
    }
}
