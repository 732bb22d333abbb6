//! AES-256-GCM at-rest encryption envelope.
//!
//! Wire shape: `{iv, encryptedData, authTag, algorithm}`, all hex-encoded
//! except `algorithm` which is always the literal `"aes-256-gcm"`. A
//! 16-byte IV is used (rather than the more common 12-byte GCM nonce),
//! so the cipher is instantiated over a custom nonce size rather than the
//! crate's default `Aes256Gcm` alias.

use aes_gcm::{
    aead::{consts::U16, generic_array::GenericArray, Aead, KeyInit},
    aes::Aes256,
    AesGcm,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

type Cipher = AesGcm<Aes256, U16>;

const AUTH_TAG_LEN: usize = 16;

/// An encrypted message body as stored on disk and on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Hex-encoded 16-byte IV, freshly random per call.
    pub iv: String,
    /// Hex-encoded ciphertext (excludes the authentication tag).
    #[serde(rename = "encryptedData")]
    pub encrypted_data: String,
    /// Hex-encoded 16-byte GCM authentication tag.
    #[serde(rename = "authTag")]
    pub auth_tag: String,
    /// Always `"aes-256-gcm"`.
    pub algorithm: String,
}

/// Encrypt `plaintext` under `key`, generating a fresh random IV.
///
/// # Errors
///
/// Returns [`Error::EncryptionFailure`] if the underlying AEAD operation
/// fails.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Envelope> {
    let cipher = Cipher::new(GenericArray::from_slice(key));

    let mut iv = [0u8; 16];
    rand::rng().fill_bytes(&mut iv);
    let nonce = GenericArray::from_slice(&iv);

    let combined = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::EncryptionFailure(e.to_string()))?;

    let split_at = combined.len().saturating_sub(AUTH_TAG_LEN);
    let (data, tag) = combined.split_at(split_at);

    Ok(Envelope {
        iv: hex::encode(iv),
        encrypted_data: hex::encode(data),
        auth_tag: hex::encode(tag),
        algorithm: "aes-256-gcm".to_string(),
    })
}

/// Decrypt an [`Envelope`] under `key`.
///
/// # Errors
///
/// Returns [`Error::DecryptionFailure`] if the hex fields are malformed or
/// the AEAD tag doesn't verify.
pub fn decrypt(key: &[u8; 32], envelope: &Envelope) -> Result<Vec<u8>> {
    let cipher = Cipher::new(GenericArray::from_slice(key));

    let iv = hex::decode(&envelope.iv).map_err(|e| Error::DecryptionFailure(e.to_string()))?;
    let mut combined = hex::decode(&envelope.encrypted_data).map_err(|e| Error::DecryptionFailure(e.to_string()))?;
    let tag = hex::decode(&envelope.auth_tag).map_err(|e| Error::DecryptionFailure(e.to_string()))?;
    combined.extend_from_slice(&tag);

    let nonce = GenericArray::from_slice(&iv);
    cipher.decrypt(nonce, combined.as_ref()).map_err(|e| Error::DecryptionFailure(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = [7u8; 32];
        let plaintext = b"{\"hello\":\"world\"}";

        let envelope = encrypt(&key, plaintext).unwrap();
        assert_eq!(envelope.algorithm, "aes-256-gcm");
        assert_eq!(envelope.iv.len(), 32);
        assert_eq!(envelope.auth_tag.len(), 32);

        let decrypted = decrypt(&key, &envelope).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_fails_with_wrong_key() {
        let key = [1u8; 32];
        let wrong_key = [2u8; 32];
        let envelope = encrypt(&key, b"secret").unwrap();
        assert!(decrypt(&wrong_key, &envelope).is_err());
    }

    #[test]
    fn two_encryptions_use_different_ivs() {
        let key = [9u8; 32];
        let a = encrypt(&key, b"same-plaintext").unwrap();
        let b = encrypt(&key, b"same-plaintext").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.encrypted_data, b.encrypted_data);
    }

    #[test]
    fn decrypt_fails_on_tampered_ciphertext() {
        let key = [3u8; 32];
        let mut envelope = encrypt(&key, b"tamper me").unwrap();
        let mut bytes = hex::decode(&envelope.encrypted_data).unwrap();
        bytes[0] ^= 0xFF;
        envelope.encrypted_data = hex::encode(bytes);
        assert!(decrypt(&key, &envelope).is_err());
    }
}
