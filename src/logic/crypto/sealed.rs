//! Sealed at-rest key storage
//!
//! The durable form of [`KeyMaterial`] is bound to the local machine:
//! the sealing key is derived from a machine fingerprint, so a record
//! copied to another host fails verification and the caller falls
//! back to generating fresh material. No plaintext key bytes ever
//! reach durable storage.
//!
//! The record uses the same encrypt-then-MAC shape as the control
//! channel itself: AES-256-CBC over `key || version`, HMAC-SHA256
//! over the encoded fields, verified in constant time before any
//! decryption.

use std::fs;
use std::path::Path;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::keys::{KeyMaterial, SecretKey};
use super::{CryptoError, IV_LEN, TAG_LEN};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Domain separation for the derived sealing key.
const SEAL_CONTEXT: &str = "HostGuard_Sealed_Key_v1_";

/// Plaintext layout inside the record: 32 key bytes + 8 version bytes.
const SEALED_PLAINTEXT_LEN: usize = 40;

/// Durable, machine-bound representation of the active key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedKeyRecord {
    /// Hex ciphertext of `key || version`.
    data: String,

    /// Hex IV used for this record.
    iv: String,

    /// Hex HMAC-SHA256 over `iv || data`.
    signature: String,

    /// Record format version.
    format_version: u32,
}

impl SealedKeyRecord {
    /// Seal the given material under the machine-bound sealing key.
    pub fn seal(material: &KeyMaterial) -> Result<Self, CryptoError> {
        let seal_key = sealing_key();

        let mut iv = [0u8; IV_LEN];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|e| CryptoError::EntropyUnavailable {
                source: e.to_string(),
            })?;

        let mut plain = Vec::with_capacity(SEALED_PLAINTEXT_LEN);
        plain.extend_from_slice(material.key().as_bytes());
        plain.extend_from_slice(&material.version().to_le_bytes());

        let ciphertext = Aes256CbcEnc::new((&seal_key).into(), (&iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(&plain);
        plain.zeroize();

        let data = hex::encode(&ciphertext);
        let iv_hex = hex::encode(iv);
        let signature = hex::encode(sign(&seal_key, &iv_hex, &data));

        Ok(Self {
            data,
            iv: iv_hex,
            signature,
            format_version: 1,
        })
    }

    /// Recover the key material. Fails with `KeyUnavailable` when the
    /// sealing context does not match (wrong host/user) or the record
    /// is corrupted.
    pub fn unseal(&self) -> Result<KeyMaterial, CryptoError> {
        let seal_key = sealing_key();

        // Signature check comes first; nothing is decrypted until the
        // record proves it was sealed on this machine.
        let expected = sign(&seal_key, &self.iv, &self.data);
        let candidate = hex::decode(&self.signature).map_err(|_| CryptoError::KeyUnavailable {
            reason: "signature is not valid hex".to_string(),
        })?;
        if candidate.len() != TAG_LEN || !bool::from(expected[..].ct_eq(&candidate)) {
            return Err(CryptoError::KeyUnavailable {
                reason: "sealing context mismatch or corrupted record".to_string(),
            });
        }

        let iv: [u8; IV_LEN] = hex::decode(&self.iv)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| CryptoError::KeyUnavailable {
                reason: "invalid record IV".to_string(),
            })?;
        let ciphertext = hex::decode(&self.data).map_err(|_| CryptoError::KeyUnavailable {
            reason: "record data is not valid hex".to_string(),
        })?;

        let mut plain = Aes256CbcDec::new((&seal_key).into(), (&iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::KeyUnavailable {
                reason: "record decryption failed".to_string(),
            })?;

        if plain.len() != SEALED_PLAINTEXT_LEN {
            plain.zeroize();
            return Err(CryptoError::KeyUnavailable {
                reason: "unexpected record layout".to_string(),
            });
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&plain[..32]);
        let mut version_bytes = [0u8; 8];
        version_bytes.copy_from_slice(&plain[32..]);
        plain.zeroize();

        Ok(KeyMaterial::new(
            SecretKey::from_bytes(key),
            u64::from_le_bytes(version_bytes),
        ))
    }

    /// Read a record from disk.
    pub fn read(path: &Path) -> Result<Self, CryptoError> {
        let content = fs::read_to_string(path).map_err(|e| CryptoError::KeyUnavailable {
            reason: format!("cannot read sealed record: {}", e),
        })?;
        serde_json::from_str(&content).map_err(|e| CryptoError::KeyUnavailable {
            reason: format!("cannot parse sealed record: {}", e),
        })
    }

    /// Write the record to disk, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(dir) = path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                log::warn!("Cannot create key directory {}: {}", dir.display(), e);
            }
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| CryptoError::KeyUnavailable {
            reason: format!("cannot serialize sealed record: {}", e),
        })?;
        fs::write(path, content).map_err(|e| CryptoError::KeyUnavailable {
            reason: format!("cannot write sealed record: {}", e),
        })
    }
}

/// Derive the machine-bound sealing key: SHA-256 over a fixed context
/// string and the machine fingerprint.
fn sealing_key() -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SEAL_CONTEXT.as_bytes());
    hasher.update(machine_fingerprint().as_bytes());
    hasher.finalize().into()
}

/// Hostname plus the OS machine id where available.
fn machine_fingerprint() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let machine_id = fs::read_to_string("/etc/machine-id")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    format!("{}:{}", host, machine_id)
}

fn sign(key: &[u8; 32], iv_hex: &str, data_hex: &str) -> [u8; TAG_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(iv_hex.as_bytes());
    mac.update(data_hex.as_bytes());
    let result = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&result);
    tag
}
