//! Key Store & Codec
//!
//! Owns the active key material and provides the encryption,
//! decryption and authentication primitives the secure channel is
//! built on. Contract: encrypt-then-MAC (HMAC-SHA256 over the
//! ciphertext), AES-256-CBC with PKCS#7 padding and a fresh random IV
//! per message.
//!
//! All operations serialize on one exclusive lock scoped to the
//! store, so rotation never interleaves with an in-progress encrypt
//! or decrypt.

mod keys;
mod sealed;

pub use keys::{KeyMaterial, SecretKey};
pub use sealed::SealedKeyRecord;

use std::path::PathBuf;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// AES block / IV size in bytes.
pub const IV_LEN: usize = 16;

/// HMAC-SHA256 tag size in bytes.
pub const TAG_LEN: usize = 32;

// ============================================================================
// KEY STORE
// ============================================================================

/// Exclusive owner of the active [`KeyMaterial`].
pub struct KeyStore {
    material: Mutex<KeyMaterial>,
    sealed_path: Option<PathBuf>,
}

impl KeyStore {
    /// Open a store backed by a sealed record at `path`.
    ///
    /// Unseals existing material when the record is present and bound
    /// to this machine; otherwise generates fresh material and seals
    /// it. Fails only when the secure random source itself is
    /// unavailable - that is fatal to the caller, since no safe
    /// channel can exist without it.
    pub fn open(path: PathBuf) -> Result<Self, CryptoError> {
        let material = match SealedKeyRecord::read(&path).and_then(|r| r.unseal()) {
            Ok(material) => {
                log::info!("Unsealed key record (version {})", material.version());
                material
            }
            Err(e) => {
                log::warn!("Sealed key record unavailable: {} - generating fresh material", e);
                let material = KeyMaterial::generate()?;
                SealedKeyRecord::seal(&material)?.write(&path)?;
                material
            }
        };
        Ok(Self {
            material: Mutex::new(material),
            sealed_path: Some(path),
        })
    }

    /// In-memory store without a durable record. Used by peers that
    /// re-derive material out of band, and by tests.
    pub fn ephemeral() -> Result<Self, CryptoError> {
        Ok(Self {
            material: Mutex::new(KeyMaterial::generate()?),
            sealed_path: None,
        })
    }

    /// Version counter of the active material.
    pub fn version(&self) -> u64 {
        self.material.lock().version()
    }

    /// Encrypt under the active key with a fresh random IV. Returns
    /// the ciphertext and the IV that must travel with it.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; IV_LEN]), CryptoError> {
        let material = self.material.lock();
        let mut iv = [0u8; IV_LEN];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|e| CryptoError::EntropyUnavailable {
                source: e.to_string(),
            })?;
        let ciphertext = Aes256CbcEnc::new(material.key().as_bytes().into(), (&iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        Ok((ciphertext, iv))
    }

    /// Decrypt a ciphertext produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8; IV_LEN]) -> Result<Vec<u8>, CryptoError> {
        let material = self.material.lock();
        if ciphertext.is_empty() || ciphertext.len() % IV_LEN != 0 {
            return Err(CryptoError::MalformedCiphertext {
                reason: "length is not a multiple of the block size".to_string(),
            });
        }
        Aes256CbcDec::new(material.key().as_bytes().into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::MalformedCiphertext {
                reason: "invalid padding".to_string(),
            })
    }

    /// HMAC-SHA256 over `data`, keyed by the active key.
    pub fn authenticate(&self, data: &[u8]) -> [u8; TAG_LEN] {
        let material = self.material.lock();
        let mut mac = HmacSha256::new_from_slice(material.key().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(data);
        let result = mac.finalize().into_bytes();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&result);
        tag
    }

    /// Verify a tag over `data`. The comparison runs over the entire
    /// tag in constant time regardless of where a mismatch occurs.
    pub fn verify(&self, data: &[u8], tag: &[u8]) -> bool {
        if tag.len() != TAG_LEN {
            return false;
        }
        let expected = self.authenticate(data);
        bool::from(expected[..].ct_eq(tag))
    }

    /// Atomically swap in freshly generated material. The old key is
    /// zeroed on drop and never retained for backward decryption.
    /// Reseals the durable record when one is configured. Returns the
    /// new version counter.
    pub fn rotate(&self) -> Result<u64, CryptoError> {
        let mut material = self.material.lock();
        let next_version = material.version() + 1;
        let key = SecretKey::generate()?;
        *material = KeyMaterial::new(key, next_version);
        if let Some(path) = &self.sealed_path {
            SealedKeyRecord::seal(&material)?.write(path)?;
        }
        log::info!("Key material rotated to version {}", next_version);
        Ok(next_version)
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone)]
pub enum CryptoError {
    /// The OS secure random source could not be read. Startup-fatal:
    /// no safe channel can exist without it.
    EntropyUnavailable { source: String },

    /// The sealed key record could not be read, is corrupted, or is
    /// bound to a different machine/user. Caller falls back to
    /// generating fresh material.
    KeyUnavailable { reason: String },

    /// Ciphertext with invalid length or padding.
    MalformedCiphertext { reason: String },
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EntropyUnavailable { source } => {
                write!(f, "secure random source unavailable: {}", source)
            }
            Self::KeyUnavailable { reason } => write!(f, "key unavailable: {}", reason),
            Self::MalformedCiphertext { reason } => write!(f, "malformed ciphertext: {}", reason),
        }
    }
}

impl std::error::Error for CryptoError {}

// ============================================================================
// TESTS
// ============================================================================
