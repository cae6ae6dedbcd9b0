//! Active key material for the current rotation epoch.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use super::CryptoError;

/// 256-bit symmetric key. Zeroed on drop so retired material never
/// lingers in memory after rotation.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh key from the OS secure random source.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::EntropyUnavailable {
                source: e.to_string(),
            })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// The active key material: one key, one monotonically increasing
/// version counter. Exactly one instance exists at a time, owned by
/// the key store.
///
/// The per-message IV is deliberately not part of the material: every
/// encrypt call draws a fresh IV and the envelope carries it.
pub struct KeyMaterial {
    key: SecretKey,
    version: u64,
}

impl KeyMaterial {
    pub fn new(key: SecretKey, version: u64) -> Self {
        Self { key, version }
    }

    /// First-epoch material with a freshly generated key.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self {
            key: SecretKey::generate()?,
            version: 1,
        })
    }

    pub fn key(&self) -> &SecretKey {
        &self.key
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_differ() {
        let a = SecretKey::generate().unwrap();
        let b = SecretKey::generate().unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_first_epoch_version() {
        let material = KeyMaterial::generate().unwrap();
        assert_eq!(material.version(), 1);
    }
}
