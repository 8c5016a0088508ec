//! Symmetric encryption using ChaCha20-Poly1305
//!
//! Every key in the cryptree is a [`SymmetricKey`]. Keys are used two ways:
//! - **Sealing**: encrypt a small plaintext (another key, a property blob,
//!   a child list) under a fresh random nonce that is stored alongside
//!   the ciphertext.
//! - **Chunk encryption**: encrypt file content under an explicit nonce
//!   derived by the caller, so the nonce can be stored in the chunk header.

use std::fmt;

use chacha20poly1305::Key;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce as AeadNonce,
};
use serde::{Deserialize, Serialize};

/// Size of ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of ChaCha20-Poly1305 key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;
/// Size of BLAKE3 hash in bytes (256 bits)
pub const BLAKE3_HASH_SIZE: usize = 32;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum SymmetricKeyError {
    /// Authentication failed: wrong key or tampered ciphertext.
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("invalid key size, expected {expected}, got {got}")]
    InvalidKeySize { expected: usize, got: usize },
    #[error("random generator error: {0}")]
    Random(String),
}

fn random_error(e: getrandom::Error) -> SymmetricKeyError {
    SymmetricKeyError::Random(e.to_string())
}

/// A per-use nonce for chunk encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

impl From<[u8; NONCE_SIZE]> for Nonce {
    fn from(bytes: [u8; NONCE_SIZE]) -> Self {
        Nonce(bytes)
    }
}

/// A 256-bit symmetric key.
///
/// The sealed format produced by [`SymmetricKey::encrypt`] is:
/// `nonce (12 bytes) || encrypted(hash(32 bytes) || plaintext) || tag (16 bytes)`.
/// The BLAKE3 hash of the plaintext is verified after decryption, so a
/// successful decrypt guarantees both the key and the content are right.
///
/// # Examples
///
/// ```ignore
/// let key = SymmetricKey::generate()?;
/// let sealed = key.encrypt(b"sensitive data")?;
/// assert_eq!(key.decrypt(&sealed)?, b"sensitive data");
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymmetricKey([u8; KEY_SIZE]);

// keys never show up in logs
impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey({}..)", hex::encode(&self.0[..4]))
    }
}

impl From<[u8; KEY_SIZE]> for SymmetricKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        SymmetricKey(bytes)
    }
}

impl SymmetricKey {
    /// Generate a new random key using the OS RNG
    pub fn generate() -> Result<Self, SymmetricKeyError> {
        let mut buff = [0; KEY_SIZE];
        getrandom::getrandom(&mut buff).map_err(random_error)?;
        Ok(Self(buff))
    }

    /// Create a key from a byte slice
    pub fn from_slice(data: &[u8]) -> Result<Self, SymmetricKeyError> {
        if data.len() != KEY_SIZE {
            return Err(SymmetricKeyError::InvalidKeySize {
                expected: KEY_SIZE,
                got: data.len(),
            });
        }
        let mut buff = [0; KEY_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// Derive a fresh random nonce for use with this key
    pub fn create_nonce(&self) -> Result<Nonce, SymmetricKeyError> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce).map_err(random_error)?;
        Ok(Nonce(nonce))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.bytes()))
    }

    /// Seal data under a random nonce.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, SymmetricKeyError> {
        let nonce = self.create_nonce()?;
        let ciphertext = self.encrypt_with_nonce(&nonce, data)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(nonce.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open data produced by [`SymmetricKey::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SymmetricKeyError> {
        if data.len() < NONCE_SIZE {
            return Err(SymmetricKeyError::Decryption(
                "data too short for nonce".to_string(),
            ));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&data[..NONCE_SIZE]);
        self.decrypt_with_nonce(&Nonce(nonce), &data[NONCE_SIZE..])
    }

    /// Encrypt with an explicit nonce. The output does not contain the nonce.
    pub fn encrypt_with_nonce(
        &self,
        nonce: &Nonce,
        data: &[u8],
    ) -> Result<Vec<u8>, SymmetricKeyError> {
        let plaintext_hash = blake3::hash(data);

        let mut data_with_hash = Vec::with_capacity(BLAKE3_HASH_SIZE + data.len());
        data_with_hash.extend_from_slice(plaintext_hash.as_bytes());
        data_with_hash.extend_from_slice(data);

        self.cipher()
            .encrypt(AeadNonce::from_slice(nonce.as_bytes()), data_with_hash.as_ref())
            .map_err(|e| SymmetricKeyError::Encryption(e.to_string()))
    }

    /// Decrypt data produced by [`SymmetricKey::encrypt_with_nonce`].
    pub fn decrypt_with_nonce(
        &self,
        nonce: &Nonce,
        data: &[u8],
    ) -> Result<Vec<u8>, SymmetricKeyError> {
        let decrypted = self
            .cipher()
            .decrypt(AeadNonce::from_slice(nonce.as_bytes()), data)
            .map_err(|_| SymmetricKeyError::Decryption("authentication failed".to_string()))?;

        if decrypted.len() < BLAKE3_HASH_SIZE {
            return Err(SymmetricKeyError::Decryption(
                "decrypted data too short for hash header".to_string(),
            ));
        }

        let (stored_hash, plaintext) = decrypted.split_at(BLAKE3_HASH_SIZE);
        if stored_hash != blake3::hash(plaintext).as_bytes() {
            return Err(SymmetricKeyError::Decryption(
                "hash verification failed - data corrupted".to_string(),
            ));
        }

        Ok(plaintext.to_vec())
    }

    /// Seal another key under this one
    pub fn wrap(&self, key: &SymmetricKey) -> Result<Vec<u8>, SymmetricKeyError> {
        self.encrypt(key.bytes())
    }

    /// Recover a key sealed with [`SymmetricKey::wrap`]
    pub fn unwrap_key(&self, wrapped: &[u8]) -> Result<SymmetricKey, SymmetricKeyError> {
        let bytes = self.decrypt(wrapped)?;
        SymmetricKey::from_slice(&bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_random_error_keeps_message() {
        let err = random_error(getrandom::Error::UNSUPPORTED);
        assert!(matches!(&err, SymmetricKeyError::Random(msg) if !msg.is_empty()));
        assert!(err.to_string().starts_with("random generator error"));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = SymmetricKey::generate().unwrap();
        let data = b"hello world, this is a test message for encryption";

        let encrypted = key.encrypt(data).unwrap();
        let decrypted = key.decrypt(&encrypted).unwrap();

        assert_eq!(data.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_wrong_key_is_decryption_error() {
        let key = SymmetricKey::generate().unwrap();
        let other = SymmetricKey::generate().unwrap();

        let encrypted = key.encrypt(b"secret").unwrap();
        let result = other.decrypt(&encrypted);
        assert!(matches!(result, Err(SymmetricKeyError::Decryption(_))));
    }

    #[test]
    fn test_nonce_encryption() {
        let key = SymmetricKey::generate().unwrap();
        let nonce = key.create_nonce().unwrap();
        let data = vec![7u8; 1000];

        let encrypted = key.encrypt_with_nonce(&nonce, &data).unwrap();
        assert_eq!(key.decrypt_with_nonce(&nonce, &encrypted).unwrap(), data);

        let other_nonce = key.create_nonce().unwrap();
        assert!(key.decrypt_with_nonce(&other_nonce, &encrypted).is_err());
    }

    #[test]
    fn test_wrap_unwrap() {
        let outer = SymmetricKey::generate().unwrap();
        let inner = SymmetricKey::generate().unwrap();

        let wrapped = outer.wrap(&inner).unwrap();
        assert_eq!(outer.unwrap_key(&wrapped).unwrap(), inner);
        assert!(inner.unwrap_key(&wrapped).is_err());
    }

    #[test]
    fn test_key_size_validation() {
        assert!(SymmetricKey::from_slice(&[1u8; 16]).is_err());
        assert!(SymmetricKey::from_slice(&[1u8; 64]).is_err());
        assert!(SymmetricKey::from_slice(&[1u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = SymmetricKey::generate().unwrap();
        let mut encrypted = key.encrypt(b"test data for integrity check").unwrap();
        encrypted[NONCE_SIZE + 10] ^= 0xFF;
        assert!(key.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_empty_data_encryption() {
        let key = SymmetricKey::generate().unwrap();
        let encrypted = key.encrypt(b"").unwrap();
        assert!(key.decrypt(&encrypted).unwrap().is_empty());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = SymmetricKey::from([0xAB; KEY_SIZE]);
        let debug = format!("{:?}", key);
        assert_eq!(debug, "SymmetricKey(abababab..)");
    }
}
