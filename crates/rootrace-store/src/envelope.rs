//! Encrypted envelope for the store file.
//!
//! Layout (before base64): `iv (16 bytes) || tag (16 bytes) || ciphertext`,
//! AES-256-GCM with a 16-byte nonce and no associated data. The plaintext is
//! the JSON text of the wrapped value.

use std::fmt;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::rand_core::RngCore as _;
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

const ENVELOPE_KEY_BYTES: usize = 32;
const ENVELOPE_IV_BYTES: usize = 16;
const ENVELOPE_TAG_BYTES: usize = 16;
const DEFAULT_SECRET_PHRASE: &str = "rootrace-default-secret";

pub const ENCRYPTION_KEY_ENV: &str = "ROOTRACE_ENCRYPTION_KEY";
pub const SECRET_PHRASE_ENV: &str = "ROOTRACE_SECRET_PHRASE";

type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Errors raised while building keys or sealing/opening envelopes.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid encryption key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("encryption key is not valid base64")]
    InvalidKeyEncoding,
    #[error("envelope is not valid base64")]
    InvalidEncoding,
    #[error("envelope is truncated ({0} bytes)")]
    Truncated(usize),
    #[error("envelope encryption failed")]
    Seal,
    #[error("envelope integrity check failed")]
    Integrity,
    #[error("envelope plaintext is not valid UTF-8")]
    Utf8,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// 256-bit key material. Formatting never reveals the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvelopeKey([u8; ENVELOPE_KEY_BYTES]);

impl EnvelopeKey {
    pub fn from_bytes(bytes: [u8; ENVELOPE_KEY_BYTES]) -> Self {
        Self(bytes)
    }

    /// SHA-256 of the phrase.
    pub fn from_phrase(phrase: &str) -> Self {
        let digest = Sha256::digest(phrase.as_bytes());
        let mut material = [0u8; ENVELOPE_KEY_BYTES];
        material.copy_from_slice(&digest);
        Self(material)
    }

    /// Decodes a base64 key that must be exactly 32 bytes long.
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let raw = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|_| CipherError::InvalidKeyEncoding)?;
        let material: [u8; ENVELOPE_KEY_BYTES] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength {
                expected: ENVELOPE_KEY_BYTES,
                actual: raw.len(),
            })?;
        Ok(Self(material))
    }

    /// Explicit key first, then a secret phrase, then the built-in phrase.
    pub fn derive_from(
        encoded_key: Option<&str>,
        phrase: Option<&str>,
    ) -> Result<Self, CipherError> {
        if let Some(encoded) = encoded_key.map(str::trim).filter(|value| !value.is_empty()) {
            return Self::from_base64(encoded);
        }
        let phrase = phrase
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_SECRET_PHRASE);
        Ok(Self::from_phrase(phrase))
    }

    /// Resolves key material from `ROOTRACE_ENCRYPTION_KEY` / `ROOTRACE_SECRET_PHRASE`.
    pub fn derive_or_load() -> Result<Self, CipherError> {
        let encoded_key = std::env::var(ENCRYPTION_KEY_ENV).ok();
        let phrase = std::env::var(SECRET_PHRASE_ENV).ok();
        Self::derive_from(encoded_key.as_deref(), phrase.as_deref())
    }

    fn as_bytes(&self) -> &[u8; ENVELOPE_KEY_BYTES] {
        &self.0
    }
}

impl fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnvelopeKey([REDACTED])")
    }
}

/// Injectable encode/decode pair the store codec uses for encrypted files.
pub trait EnvelopeCipher: Send + Sync + fmt::Debug {
    fn encode(&self, value: &Value) -> Result<String, CipherError>;
    fn decode(&self, envelope: &str) -> Result<Value, CipherError>;
}

/// AES-256-GCM implementation of [`EnvelopeCipher`].
#[derive(Debug, Clone)]
pub struct AesGcmEnvelope {
    key: EnvelopeKey,
}

impl AesGcmEnvelope {
    pub fn new(key: EnvelopeKey) -> Self {
        Self { key }
    }

    pub fn from_env() -> Result<Self, CipherError> {
        Ok(Self::new(EnvelopeKey::derive_or_load()?))
    }

    fn cipher(&self) -> Aes256Gcm16 {
        Aes256Gcm16::new(GenericArray::from_slice(self.key.as_bytes()))
    }

    pub fn seal_bytes(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let mut iv = [0u8; ENVELOPE_IV_BYTES];
        OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher()
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CipherError::Seal)?;

        let mut payload =
            Vec::with_capacity(ENVELOPE_IV_BYTES + ENVELOPE_TAG_BYTES + buffer.len());
        payload.extend_from_slice(&iv);
        payload.extend_from_slice(&tag);
        payload.extend_from_slice(&buffer);
        Ok(BASE64_STANDARD.encode(payload))
    }

    pub fn open_bytes(&self, envelope: &str) -> Result<Vec<u8>, CipherError> {
        let raw = BASE64_STANDARD
            .decode(envelope.trim())
            .map_err(|_| CipherError::InvalidEncoding)?;
        if raw.len() < ENVELOPE_IV_BYTES + ENVELOPE_TAG_BYTES {
            return Err(CipherError::Truncated(raw.len()));
        }

        let (iv, rest) = raw.split_at(ENVELOPE_IV_BYTES);
        let (tag, ciphertext) = rest.split_at(ENVELOPE_TAG_BYTES);
        let mut buffer = ciphertext.to_vec();
        self.cipher()
            .decrypt_in_place_detached(
                GenericArray::from_slice(iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| CipherError::Integrity)?;
        Ok(buffer)
    }
}

impl EnvelopeCipher for AesGcmEnvelope {
    fn encode(&self, value: &Value) -> Result<String, CipherError> {
        let plaintext = serde_json::to_vec(value)?;
        self.seal_bytes(&plaintext)
    }

    fn decode(&self, envelope: &str) -> Result<Value, CipherError> {
        let plaintext = self.open_bytes(envelope)?;
        let text = String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)?;
        Ok(serde_json::from_str(&text)?)
    }
}
