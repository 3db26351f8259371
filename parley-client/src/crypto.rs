//! Cryptographic primitives for the at-rest cache.
//!
//! This module provides:
//! - Device-adaptive Argon2id key derivation (12-64 MiB based on RAM)
//! - XChaCha20-Poly1305 sealing with 192-bit nonces
//! - StorageKey with a value-encryption subkey and a key-blinding subkey
//!
//! # Security Notes
//!
//! - XChaCha20 uses 192-bit nonces (24 bytes), safe for random generation
//! - Argon2id parameters scale with available RAM for mobile/desktop parity
//! - Subkeys are derived via HKDF-SHA256 for cryptographic separation
//! - Key material is zeroized on drop

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error).
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Sealed value is shorter than a nonce.
    #[error("sealed value too short: {0} bytes")]
    Truncated(usize),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// The OS random source failed.
    #[error("random source failed: {0}")]
    Random(String),
}

/// Argon2id parameters for device-adaptive key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    memory_mib: u32,
    iterations: u32,
    parallelism: u32,
}

impl Argon2Params {
    /// Create parameters based on available RAM in MB.
    ///
    /// Scaling:
    /// - < 2000 MB: 12 MiB, 3 iterations (low-end mobile)
    /// - < 4000 MB: 19 MiB, 2 iterations (mid-range mobile)
    /// - < 8000 MB: 46 MiB, 1 iteration (high-end mobile)
    /// - >= 8000 MB: 64 MiB, 3 iterations (desktop)
    pub fn for_ram_mb(ram_mb: u64) -> Self {
        let (memory_mib, iterations, parallelism) = match ram_mb {
            0..=1999 => (12, 3, 1),
            2000..=3999 => (19, 2, 1),
            4000..=7999 => (46, 1, 1),
            _ => (64, 3, 4),
        };
        Self {
            memory_mib,
            iterations,
            parallelism,
        }
    }

    /// Get memory in MiB.
    pub fn memory_mib(&self) -> u32 {
        self.memory_mib
    }

    /// Get iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn to_argon2_params(self) -> Result<Params, CryptoError> {
        Params::new(
            self.memory_mib * 1024, // MiB to KiB
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))
    }
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self::for_ram_mb(detect_available_ram_mb())
    }
}

/// Detect available RAM in megabytes.
pub fn detect_available_ram_mb() -> u64 {
    use sysinfo::System;
    let sys = System::new_all();
    sys.total_memory() / (1024 * 1024)
}

fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(bytes)
}

/// Key protecting the at-rest cache.
///
/// Holds two subkeys derived from a root secret: one seals values, the
/// other blinds storage key names so they do not leak what is stored.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StorageKey {
    encryption_key: [u8; KEY_SIZE],
    blinding_key: [u8; KEY_SIZE],
}

impl StorageKey {
    /// Derive from a passphrase with device-adaptive Argon2id parameters.
    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        Self::from_passphrase_with_params(passphrase, salt, Argon2Params::default())
    }

    /// Derive from a passphrase with explicit Argon2id parameters.
    pub fn from_passphrase_with_params(
        passphrase: &str,
        salt: &[u8],
        params: Argon2Params,
    ) -> Result<Self, CryptoError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2_params()?);

        let mut root = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut root)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

        let key = Self::from_root(&root);
        root.zeroize();
        key
    }

    /// Create a random key (for testing and ephemeral caches).
    pub fn random() -> Result<Self, CryptoError> {
        let mut root = random_bytes::<KEY_SIZE>()?;
        let key = Self::from_root(&root);
        root.zeroize();
        key
    }

    fn from_root(root: &[u8; KEY_SIZE]) -> Result<Self, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(b"parley-storage-key-v1"), root);

        let mut encryption_key = [0u8; KEY_SIZE];
        let mut blinding_key = [0u8; KEY_SIZE];
        hkdf.expand(b"value-encryption", &mut encryption_key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        hkdf.expand(b"key-blinding", &mut blinding_key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

        Ok(Self {
            encryption_key,
            blinding_key,
        })
    }

    /// Opaque storage name for a logical key.
    pub fn blind(&self, name: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.blinding_key);
        hasher.update(name.as_bytes());
        hasher.finalize().into()
    }

    /// Encrypt with a fresh random nonce. Output is `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes = random_bytes::<NONCE_SIZE>()?;
        let nonce = XNonce::from_slice(&nonce_bytes);

        let cipher = XChaCha20Poly1305::new_from_slice(&self.encryption_key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a value produced by [`StorageKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::Truncated(sealed.len()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        let cipher = XChaCha20Poly1305::new_from_slice(&self.encryption_key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

// Don't leak keys in debug output
impl std::fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> Argon2Params {
        Argon2Params::for_ram_mb(1500)
    }

    // ===========================================
    // Argon2 Parameter Tests
    // ===========================================

    #[test]
    fn argon2_parameters_scale_with_ram() {
        assert_eq!(Argon2Params::for_ram_mb(1500).memory_mib(), 12);
        assert_eq!(Argon2Params::for_ram_mb(1500).iterations(), 3);
        assert_eq!(Argon2Params::for_ram_mb(3000).memory_mib(), 19);
        assert_eq!(Argon2Params::for_ram_mb(6000).memory_mib(), 46);
        assert_eq!(Argon2Params::for_ram_mb(6000).iterations(), 1);
        assert_eq!(Argon2Params::for_ram_mb(16000).memory_mib(), 64);
    }

    #[test]
    fn passphrase_derivation_is_deterministic() {
        let a = StorageKey::from_passphrase_with_params("pass", b"parley-salt-0001", fast()).unwrap();
        let b = StorageKey::from_passphrase_with_params("pass", b"parley-salt-0001", fast()).unwrap();
        let c = StorageKey::from_passphrase_with_params("other", b"parley-salt-0001", fast()).unwrap();

        assert_eq!(a.blind("k"), b.blind("k"));
        assert_ne!(a.blind("k"), c.blind("k"));

        let sealed = a.seal(b"hello").unwrap();
        assert_eq!(b.open(&sealed).unwrap(), b"hello");
    }

    #[test]
    fn short_salt_is_an_error() {
        assert!(StorageKey::from_passphrase_with_params("pass", b"x", fast()).is_err());
    }

    // ===========================================
    // Sealing Tests (192-bit nonces)
    // ===========================================

    #[test]
    fn sealed_value_carries_192_bit_nonce() {
        let key = StorageKey::random().unwrap();
        let sealed = key.seal(b"data").unwrap();
        // nonce + plaintext + 16-byte tag
        assert_eq!(sealed.len(), NONCE_SIZE + 4 + 16);
    }

    #[test]
    fn same_plaintext_seals_differently() {
        let key = StorageKey::random().unwrap();
        let s1 = key.seal(b"same").unwrap();
        let s2 = key.seal(b"same").unwrap();

        assert_ne!(s1, s2);
        assert_eq!(key.open(&s1).unwrap(), key.open(&s2).unwrap());
    }

    #[test]
    fn wrong_key_fails_open() {
        let sealed = StorageKey::random().unwrap().seal(b"secret").unwrap();
        let result = StorageKey::random().unwrap().open(&sealed);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn corrupted_or_truncated_value_fails_open() {
        let key = StorageKey::random().unwrap();
        let mut sealed = key.seal(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;

        assert!(key.open(&sealed).is_err());
        assert!(matches!(key.open(&[0u8; 5]), Err(CryptoError::Truncated(5))));
    }

    #[test]
    fn blinded_names_differ_per_key_and_name() {
        let key = StorageKey::random().unwrap();
        assert_ne!(key.blind("secret"), key.blind("paging"));
        assert_ne!(key.blind("secret"), StorageKey::random().unwrap().blind("secret"));
    }

    #[test]
    fn debug_is_redacted() {
        let key = StorageKey::random().unwrap();
        assert!(format!("{:?}", key).contains("REDACTED"));
    }

    #[test]
    fn detect_ram_returns_reasonable_value() {
        let ram_mb = detect_available_ram_mb();
        assert!(ram_mb >= 256, "Detected RAM: {} MB", ram_mb);
        assert!(ram_mb < 1024 * 1024, "Detected RAM: {} MB", ram_mb);
    }
}
