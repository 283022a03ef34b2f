//! `keysafe-crypto-core` — Pure cryptographic primitives for KEYSAFE.
//!
//! Zero I/O, zero logging, zero async. Everything that touches the secure
//! store or the filesystem lives in `keysafe-vault`.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;
pub mod memory;

pub mod keys;
pub mod symmetric;

pub mod aead;

pub mod pin;

pub use aead::AeadPayload;
pub use error::{CryptoError, FailureCode};
pub use keys::{generate_master_key, key_fingerprint, master_key_from_bytes, MasterKey, MASTER_KEY_LEN};
pub use memory::{SecretBuffer, SecretBytes};
pub use pin::{pins_match, validate_pin_format, PIN_LEN};
pub use symmetric::{decrypt, encrypt, SealedPayload, IV_LEN};
