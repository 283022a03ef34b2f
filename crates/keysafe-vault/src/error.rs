//! Error types for `keysafe-vault`, one enum per component.

use keysafe_crypto_core::{CryptoError, FailureCode};
use thiserror::Error;

/// Errors produced by a [`crate::store::SecretStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No value is stored under the key.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// The stored bytes cannot be interpreted as the expected encoding.
    #[error("secret has invalid format: {0}")]
    InvalidFormat(String),

    /// The backend reported more than one entry for a key and could not
    /// resolve it. Indicates a bug, not a normal outcome.
    #[error("duplicate secure store entry for {0}")]
    DuplicateEntryRace(String),

    /// Any other backend failure.
    #[error("secure store error: {0}")]
    Unknown(String),
}

impl From<keyring::Error> for StoreError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoEntry => Self::NotFound("no keyring entry".into()),
            keyring::Error::BadEncoding(_) => Self::InvalidFormat("keyring entry is not UTF-8".into()),
            keyring::Error::Ambiguous(creds) => {
                Self::DuplicateEntryRace(format!("{} matching credentials", creds.len()))
            }
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Errors produced by the [`crate::engine::EncryptionEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The master key could not be read or created.
    #[error("encryption key unavailable: {0}")]
    KeyUnavailable(String),

    /// The payload is too short to contain an IV.
    #[error("malformed sealed payload: {0}")]
    MalformedInput(String),

    /// The cipher primitive reported an error.
    #[error("crypto failure (code {0})")]
    CryptoFailure(FailureCode),
}

impl From<CryptoError> for EngineError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::MalformedInput(msg) => Self::MalformedInput(msg),
            CryptoError::CryptoFailure(code) => Self::CryptoFailure(code),
            CryptoError::InvalidKeyMaterial(msg)
            | CryptoError::SecureMemory(msg)
            | CryptoError::InvalidPin(msg) => Self::KeyUnavailable(msg),
        }
    }
}

impl EngineError {
    /// Message suitable for end users. Never includes internal codes.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::KeyUnavailable(_) => "Secure storage is unavailable on this device.",
            Self::MalformedInput(_) | Self::CryptoFailure(_) => {
                "This data could not be unlocked."
            }
        }
    }
}

/// Errors from the settings side of the [`crate::auth::LocalAuthGate`]
/// (PIN and biometric policy changes).
#[derive(Debug, Error)]
pub enum AuthError {
    /// PIN does not have the required shape.
    #[error(transparent)]
    InvalidPin(#[from] CryptoError),

    /// Reading or writing the secure store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors produced by the [`crate::retention::RetentionCoordinator`].
#[derive(Debug, Error)]
pub enum RetentionError {
    /// A wipe could not remove every secret. No new key was provisioned.
    #[error("wipe incomplete: {0}")]
    Unknown(String),

    /// The fresh key could not be provisioned after a successful purge.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The retention state file could not be written.
    #[error("retention state I/O error: {0}")]
    State(#[from] std::io::Error),
}

/// Errors from [`crate::session::Keysafe`] calls spanning several components.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The PIN check itself failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The use could not be recorded.
    #[error(transparent)]
    Retention(#[from] RetentionError),
}
