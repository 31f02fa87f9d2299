//! Payload sealing primitives.
//!
//! The Authority's algorithm is pluggable behind [`PayloadCipher`] and
//! [`KeyUnwrap`]. The defaults seal with AES-GCM (random 12-byte nonce
//! prefixed to the ciphertext) and sign the base64 content with HMAC-SHA256
//! under the same symmetric key.

use std::fmt::Debug;
use std::io::{Read, Write};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::envelope::DataBlock;
use crate::error::{GatewayError, GatewayResult};
use crate::types::KeyMaterial;

const NONCE_LEN: usize = 12;

/// Symmetric encrypt/decrypt and sign/verify with the current key.
pub trait PayloadCipher: Debug + Send + Sync {
    fn encrypt(&self, key: &KeyMaterial, plaintext: &[u8]) -> GatewayResult<Vec<u8>>;

    /// Fails with `Integrity` on any authentication or format error.
    fn decrypt(&self, key: &KeyMaterial, ciphertext: &[u8]) -> GatewayResult<Vec<u8>>;

    fn sign(&self, key: &KeyMaterial, content: &[u8]) -> GatewayResult<String>;

    /// Fails with `Integrity` when `signature` does not match `content`.
    fn verify(&self, key: &KeyMaterial, content: &[u8], signature: &str) -> GatewayResult<()>;
}

/// Turns the wrapped key delivered by the key exchange into key material.
pub trait KeyUnwrap: Debug + Send + Sync {
    fn unwrap_key(&self, wrapped: &str) -> GatewayResult<KeyMaterial>;
}

/// AES-128/256-GCM sealing with HMAC-SHA256 signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

enum GcmKey {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl GcmKey {
    fn new(key: &KeyMaterial) -> GatewayResult<Self> {
        let bytes = key.as_bytes();
        match bytes.len() {
            16 => Aes128Gcm::new_from_slice(bytes)
                .map(|c| Self::Aes128(Box::new(c)))
                .map_err(|_| GatewayError::integrity("cipher init failed")),
            32 => Aes256Gcm::new_from_slice(bytes)
                .map(|c| Self::Aes256(Box::new(c)))
                .map_err(|_| GatewayError::integrity("cipher init failed")),
            n => Err(GatewayError::integrity(format!(
                "unsupported key length: {n} bytes"
            ))),
        }
    }
}

impl PayloadCipher for AesGcmCipher {
    fn encrypt(&self, key: &KeyMaterial, plaintext: &[u8]) -> GatewayResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = match GcmKey::new(key)? {
            GcmKey::Aes128(c) => c.encrypt(Nonce::from_slice(&nonce), plaintext),
            GcmKey::Aes256(c) => c.encrypt(Nonce::from_slice(&nonce), plaintext),
        }
        .map_err(|_| GatewayError::integrity("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, key: &KeyMaterial, ciphertext: &[u8]) -> GatewayResult<Vec<u8>> {
        if ciphertext.len() <= NONCE_LEN {
            return Err(GatewayError::integrity("ciphertext too short"));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);

        match GcmKey::new(key)? {
            GcmKey::Aes128(c) => c.decrypt(Nonce::from_slice(nonce), body),
            GcmKey::Aes256(c) => c.decrypt(Nonce::from_slice(nonce), body),
        }
        .map_err(|_| GatewayError::integrity("decryption failed (wrong key or tampered content)"))
    }

    fn sign(&self, key: &KeyMaterial, content: &[u8]) -> GatewayResult<String> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes())
            .map_err(|e| GatewayError::integrity(format!("signing key rejected: {e}")))?;
        mac.update(content);
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, key: &KeyMaterial, content: &[u8], signature: &str) -> GatewayResult<()> {
        let expected = BASE64
            .decode(signature.trim())
            .map_err(|_| GatewayError::integrity("signature is not base64"))?;
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes())
            .map_err(|e| GatewayError::integrity(format!("signing key rejected: {e}")))?;
        mac.update(content);
        mac.verify_slice(&expected)
            .map_err(|_| GatewayError::integrity("signature mismatch"))
    }
}

/// Key delivered as base64 (optionally base64 of base64 text).
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64KeyUnwrap;

impl KeyUnwrap for Base64KeyUnwrap {
    fn unwrap_key(&self, wrapped: &str) -> GatewayResult<KeyMaterial> {
        let decoded = BASE64
            .decode(wrapped.trim())
            .map_err(|_| GatewayError::integrity("wrapped key is not base64"))?;

        let bytes = if is_aes_key_len(decoded.len()) {
            decoded
        } else {
            std::str::from_utf8(&decoded)
                .ok()
                .and_then(|inner| BASE64.decode(inner.trim()).ok())
                .filter(|inner| is_aes_key_len(inner.len()))
                .ok_or_else(|| {
                    GatewayError::integrity(format!(
                        "invalid key length after unwrap: {} bytes",
                        decoded.len()
                    ))
                })?
        };
        Ok(KeyMaterial::new(bytes))
    }
}

fn is_aes_key_len(len: usize) -> bool {
    matches!(len, 16 | 32)
}

/// Serialize, encrypt and sign `payload`; returns the sealed data block.
pub fn seal_json(
    cipher: &dyn PayloadCipher,
    key: &KeyMaterial,
    payload: &serde_json::Value,
) -> GatewayResult<DataBlock> {
    let plaintext = serde_json::to_vec(payload)
        .map_err(|e| GatewayError::validation(format!("payload not serializable: {e}")))?;
    let content = BASE64.encode(cipher.encrypt(key, &plaintext)?);
    let signature = cipher.sign(key, content.as_bytes())?;
    Ok(DataBlock::sealed(content, signature))
}

/// Plain (unsealed) base64 JSON data block.
pub fn plain_json(payload: &serde_json::Value) -> GatewayResult<DataBlock> {
    let bytes = serde_json::to_vec(payload)
        .map_err(|e| GatewayError::validation(format!("payload not serializable: {e}")))?;
    Ok(DataBlock::plain(BASE64.encode(bytes)))
}

/// Decode the content of a reply.
///
/// With a key, the content must be sealed and signed; it is verified and
/// then decrypted. Without one, content is treated as plain base64. Zipped content is
/// inflated last. Every failure is an `Integrity` error.
pub fn open_json(
    cipher: &dyn PayloadCipher,
    key: Option<&KeyMaterial>,
    data: &DataBlock,
) -> GatewayResult<Option<serde_json::Value>> {
    let content = data.content.trim();
    if content.is_empty() {
        return Ok(None);
    }

    let raw = BASE64
        .decode(content)
        .map_err(|_| GatewayError::integrity("response content is not base64"))?;

    let bytes = match key {
        Some(_) if !data.data_description.is_encrypted() => {
            return Err(GatewayError::integrity("unsealed reply to a signed request"));
        }
        Some(_) if data.signature.trim().is_empty() => {
            return Err(GatewayError::integrity("sealed reply carries no signature"));
        }
        Some(key) => {
            cipher.verify(key, content.as_bytes(), &data.signature)?;
            cipher.decrypt(key, &raw)?
        }
        None => raw,
    };

    let bytes = if data.data_description.is_zipped() {
        gunzip(&bytes)?
    } else {
        bytes
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| GatewayError::integrity(format!("response content is not JSON: {e}")))
}

pub fn gunzip(bytes: &[u8]) -> GatewayResult<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| GatewayError::integrity(format!("failed to inflate content: {e}")))?;
    Ok(out)
}

pub fn gzip(bytes: &[u8]) -> GatewayResult<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| GatewayError::integrity(format!("failed to compress content: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> KeyMaterial {
        KeyMaterial::new(b"0123456789abcdef".to_vec())
    }

    #[test]
    fn test_seal_then_open() {
        let payload = json!({"tin": "1000023516", "ninBrn": ""});
        let block = seal_json(&AesGcmCipher, &key(), &payload).unwrap();
        assert!(block.data_description.is_encrypted());

        let opened = open_json(&AesGcmCipher, Some(&key()), &block).unwrap();
        assert_eq!(opened, Some(payload));
    }

    #[test]
    fn test_open_with_other_key_is_integrity_error() {
        let block = seal_json(&AesGcmCipher, &key(), &json!({"a": 1})).unwrap();
        let other = KeyMaterial::new(vec![9; 32]);

        let err = open_json(&AesGcmCipher, Some(&other), &block).unwrap_err();
        assert!(matches!(err, GatewayError::Integrity { .. }));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let mut block = seal_json(&AesGcmCipher, &key(), &json!({"a": 1})).unwrap();
        block.signature = BASE64.encode([0u8; 32]);

        let err = open_json(&AesGcmCipher, Some(&key()), &block).unwrap_err();
        assert_eq!(err, GatewayError::integrity("signature mismatch"));
    }

    #[test]
    fn test_plain_content_rejected_when_key_expected() {
        let block = plain_json(&json!({"records": [{"stock": "999999"}]})).unwrap();

        let err = open_json(&AesGcmCipher, Some(&key()), &block).unwrap_err();
        assert_eq!(err, GatewayError::integrity("unsealed reply to a signed request"));
    }

    #[test]
    fn test_sealed_content_without_signature_rejected() {
        let mut block = seal_json(&AesGcmCipher, &key(), &json!({"a": 1})).unwrap();
        block.signature.clear();

        let err = open_json(&AesGcmCipher, Some(&key()), &block).unwrap_err();
        assert_eq!(err, GatewayError::integrity("sealed reply carries no signature"));
    }

    #[test]
    fn test_open_zipped_plain_content() {
        let zipped = gzip(br#"{"rateUnit":[]}"#).unwrap();
        let mut block = DataBlock::plain(BASE64.encode(zipped));
        block.data_description.zip_code = "1".into();

        let opened = open_json(&AesGcmCipher, None, &block).unwrap();
        assert_eq!(opened, Some(json!({"rateUnit": []})));
    }

    #[test]
    fn test_empty_content_is_none() {
        let opened = open_json(&AesGcmCipher, Some(&key()), &DataBlock::default()).unwrap();
        assert!(opened.is_none());
    }

    #[test]
    fn test_unwrap_accepts_single_and_double_base64() {
        let raw = vec![5u8; 32];
        let single = BASE64.encode(&raw);
        let double = BASE64.encode(single.as_bytes());

        assert_eq!(Base64KeyUnwrap.unwrap_key(&single).unwrap().as_bytes(), &raw[..]);
        assert_eq!(Base64KeyUnwrap.unwrap_key(&double).unwrap().as_bytes(), &raw[..]);
        assert!(Base64KeyUnwrap.unwrap_key(&BASE64.encode([1u8; 7])).is_err());
    }
}
