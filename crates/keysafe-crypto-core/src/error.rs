//! Cryptographic error types for `keysafe-crypto-core`.

use std::fmt;

use thiserror::Error;

/// Diagnostic code attached to [`CryptoError::CryptoFailure`].
///
/// Codes are stable and safe to log. They must never be shown to end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    /// The key handed to the cipher was not 256 bits.
    InvalidKeyLength,
    /// The IV or nonce handed to the cipher had the wrong size.
    InvalidIvLength,
    /// Ciphertext length is not a multiple of the AES block size.
    NotBlockAligned,
    /// PKCS#7 padding did not verify after decryption (wrong key or corrupted data).
    BadPadding,
    /// AEAD authentication tag mismatch (tampered data or wrong key).
    TagMismatch,
    /// The AEAD primitive refused to seal.
    SealFailed,
    /// The OS random number generator failed.
    RandomSource,
}

impl FailureCode {
    /// Numeric form used in structured logs.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::InvalidKeyLength => 1,
            Self::InvalidIvLength => 2,
            Self::NotBlockAligned => 3,
            Self::BadPadding => 4,
            Self::TagMismatch => 5,
            Self::SealFailed => 6,
            Self::RandomSource => 7,
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Errors produced by cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Input cannot be a sealed payload (too short to hold the IV or nonce).
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The cipher primitive reported an error.
    #[error("crypto failure (code {0})")]
    CryptoFailure(FailureCode),

    /// Invalid key material (wrong length, corrupted bytes).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Secure memory allocation or CSPRNG failure.
    #[error("secure memory error: {0}")]
    SecureMemory(String),

    /// PIN does not have the required shape.
    #[error("invalid PIN: {0}")]
    InvalidPin(String),
}
