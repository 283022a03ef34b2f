//! Master key generation and fingerprinting.
//!
//! The master key is 256 bits from the OS CSPRNG. It never leaves the
//! secure store except inside a [`MasterKey`] that is zeroized on drop.

use crate::error::CryptoError;
use crate::memory::SecretBytes;

/// Master key length in bytes (256 bits).
pub const MASTER_KEY_LEN: usize = 32;

/// BLAKE3 domain-separation context for key fingerprints.
const FINGERPRINT_CONTEXT: &str = "keysafe 2024 master-key fingerprint v1";

/// Number of fingerprint bytes rendered (64 bits is plenty to tell keys apart in logs).
const FINGERPRINT_LEN: usize = 8;

/// A 256-bit symmetric master key.
pub type MasterKey = SecretBytes<MASTER_KEY_LEN>;

/// Generate a fresh master key from the OS CSPRNG.
///
/// # Errors
///
/// Returns `CryptoError::SecureMemory` if the CSPRNG fails.
pub fn generate_master_key() -> Result<MasterKey, CryptoError> {
    MasterKey::random()
}

/// Rebuild a master key from stored bytes.
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyMaterial` if `bytes` is not exactly 32 bytes.
pub fn master_key_from_bytes(bytes: &[u8]) -> Result<MasterKey, CryptoError> {
    MasterKey::from_slice(bytes)
}

/// Short, non-reversible identifier for a key, safe to write to logs.
///
/// Derived with BLAKE3 in key-derivation mode so the fingerprint cannot be
/// confused with any other hash of the key.
#[must_use]
pub fn key_fingerprint(key: &MasterKey) -> String {
    let digest = blake3::derive_key(FINGERPRINT_CONTEXT, key.expose());
    data_encoding::HEXLOWER.encode(&digest[..FINGERPRINT_LEN])
}
