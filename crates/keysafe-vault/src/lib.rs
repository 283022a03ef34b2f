//! `keysafe-vault` — Local secret protection for KEYSAFE.
//!
//! Custody of the device master key in the OS credential vault, payload
//! encryption, biometric/PIN gating, and the retention wipe.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;
pub mod store;

pub mod engine;

pub mod auth;

pub mod retention;

pub mod config;
mod settings_file;

pub mod session;

pub use auth::{
    AuthOutcome, AuthReply, BiometricCapability, BiometricModality, BiometricProvider,
    DenialReason, GateState, LocalAuthGate, NullBiometricProvider, PlatformFailure,
};
pub use config::KeysafeConfig;
pub use engine::{CipherSuite, EncryptionEngine};
pub use error::{AuthError, EngineError, RetentionError, SessionError, StoreError};
pub use retention::{Clock, RetentionCoordinator, RetentionState, SystemClock};
pub use session::Keysafe;
pub use store::{CredentialBackend, IndexedStore, KeyringStore, MemoryStore, OsKeyring, SecretStore};
