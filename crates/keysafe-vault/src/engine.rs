//! Encryption engine — seals and opens payloads under the device master key.
//!
//! The master key lives in the [`SecretStore`]; the engine borrows it for a
//! single operation and drops (zeroizes) it immediately afterwards.
//!
//! # Locking
//!
//! ```text
//! crypto_state: RwLock<()>   read  = encrypt / decrypt / fingerprint
//!                            write = key regeneration (wipe)
//! provision:    Mutex<()>    serializes first-use key creation
//! ```
//!
//! Holding the read side across "fetch key + cipher" guarantees a wipe can
//! never interleave with an in-flight operation.

use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

use keysafe_crypto_core::{
    aead, generate_master_key, key_fingerprint, master_key_from_bytes, symmetric, MasterKey,
    SecretBuffer,
};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, StoreError};
use crate::store::{SecretStore, MASTER_KEY_ID};

/// Cipher used for new payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CipherSuite {
    /// `IV(16) || AES-256-CBC/PKCS#7 ciphertext` — compatible with existing payloads.
    #[default]
    #[serde(rename = "aes-256-cbc")]
    Aes256Cbc,
    /// `nonce(12) || AES-256-GCM ciphertext || tag(16)` — detects tampering.
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

/// Seals and opens opaque byte payloads.
pub struct EncryptionEngine {
    store: Arc<dyn SecretStore>,
    suite: CipherSuite,
    crypto_state: RwLock<()>,
    provision: Mutex<()>,
}

impl std::fmt::Debug for EncryptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionEngine")
            .field("store", &self.store)
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

impl EncryptionEngine {
    /// Create an engine over `store` producing payloads with `suite`.
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>, suite: CipherSuite) -> Self {
        Self {
            store,
            suite,
            crypto_state: RwLock::new(()),
            provision: Mutex::new(()),
        }
    }

    /// The cipher suite used by this engine.
    #[must_use]
    pub const fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Encrypt `plaintext`, provisioning the master key on first use.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::KeyUnavailable`] if the key cannot be read or
    /// created, [`EngineError::CryptoFailure`] if the cipher fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
        let _state = self.read_state()?;
        let key = self.fetch_or_provision()?;
        let sealed = match self.suite {
            CipherSuite::Aes256Cbc => {
                symmetric::encrypt(plaintext, key.expose()).map(|s| s.to_bytes())
            }
            CipherSuite::Aes256Gcm => aead::seal(plaintext, key.expose()).map(|s| s.to_bytes()),
        };
        sealed.map_err(|e| log_failure("encrypt", e.into()))
    }

    /// Decrypt a payload produced by [`EncryptionEngine::encrypt`].
    ///
    /// Payloads sealed before a wipe fail here; that is expected and must not
    /// be retried.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedInput`] if the payload is too short,
    /// [`EngineError::CryptoFailure`] if it does not decrypt under the current
    /// key, [`EngineError::KeyUnavailable`] if the key cannot be read.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<SecretBuffer, EngineError> {
        let _state = self.read_state()?;
        let key = self.fetch_or_provision()?;
        let opened = match self.suite {
            CipherSuite::Aes256Cbc => symmetric::SealedPayload::from_bytes(sealed)
                .and_then(|payload| symmetric::decrypt(&payload, key.expose())),
            CipherSuite::Aes256Gcm => aead::AeadPayload::from_bytes(sealed)
                .and_then(|payload| aead::open(&payload, key.expose())),
        };
        opened.map_err(|e| log_failure("decrypt", e.into()))
    }

    /// Make sure a master key exists, creating one if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::KeyUnavailable`] if the key cannot be read or created.
    pub fn ensure_key(&self) -> Result<(), EngineError> {
        let _state = self.read_state()?;
        self.fetch_or_provision().map(drop)
    }

    /// Diagnostic fingerprint of the current master key, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::KeyUnavailable`] if the stored key is unreadable.
    pub fn key_fingerprint(&self) -> Result<Option<String>, EngineError> {
        let _state = self.read_state()?;
        match self.load_key() {
            Ok(key) => Ok(Some(key_fingerprint(&key))),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(EngineError::KeyUnavailable(e.to_string())),
        }
    }

    /// Run `purge` with exclusive access to the crypto state, then replace the
    /// master key with a fresh one.
    ///
    /// If `purge` fails, the error is returned and no key is provisioned, so a
    /// half-wiped store is never papered over with a new key.
    ///
    /// # Errors
    ///
    /// Returns `purge`'s error, or the provisioning error converted into `E`.
    pub fn regenerate_key_after<E, F>(&self, purge: F) -> Result<(), E>
    where
        F: FnOnce(&dyn SecretStore) -> Result<(), E>,
        E: From<EngineError>,
    {
        let _state = self
            .crypto_state
            .write()
            .map_err(|_| EngineError::KeyUnavailable("crypto state lock poisoned".into()))?;
        purge(self.store.as_ref())?;
        self.store
            .delete(MASTER_KEY_ID)
            .map_err(|e| EngineError::KeyUnavailable(e.to_string()))?;
        let key = self.create_key()?;
        tracing::info!(fingerprint = %key_fingerprint(&key), "master key regenerated");
        Ok(())
    }

    // -- internals ---------------------------------------------------------

    fn read_state(&self) -> Result<RwLockReadGuard<'_, ()>, EngineError> {
        self.crypto_state
            .read()
            .map_err(|_| EngineError::KeyUnavailable("crypto state lock poisoned".into()))
    }

    fn load_key(&self) -> Result<MasterKey, StoreError> {
        let bytes = self.store.get(MASTER_KEY_ID)?;
        master_key_from_bytes(bytes.expose())
            .map_err(|e| StoreError::InvalidFormat(format!("{MASTER_KEY_ID}: {e}")))
    }

    /// Atomic check-then-create-or-fetch. Caller holds the crypto state.
    fn fetch_or_provision(&self) -> Result<MasterKey, EngineError> {
        match self.load_key() {
            Ok(key) => return Ok(key),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(EngineError::KeyUnavailable(e.to_string())),
        }

        let _provision = self
            .provision
            .lock()
            .map_err(|_| EngineError::KeyUnavailable("provisioning lock poisoned".into()))?;

        // Another caller may have created the key while we waited.
        match self.load_key() {
            Ok(key) => Ok(key),
            Err(StoreError::NotFound(_)) => {
                let key = self.create_key()?;
                tracing::info!(fingerprint = %key_fingerprint(&key), "master key provisioned");
                Ok(key)
            }
            Err(e) => Err(EngineError::KeyUnavailable(e.to_string())),
        }
    }

    fn create_key(&self) -> Result<MasterKey, EngineError> {
        let key = generate_master_key()?;
        self.store
            .save(MASTER_KEY_ID, key.expose())
            .map_err(|e| EngineError::KeyUnavailable(e.to_string()))?;
        Ok(key)
    }
}

fn log_failure(operation: &'static str, err: EngineError) -> EngineError {
    match &err {
        EngineError::CryptoFailure(code) => {
            tracing::warn!(operation, code = code.as_u32(), "cipher operation failed");
        }
        EngineError::MalformedInput(detail) => {
            tracing::warn!(operation, %detail, "malformed sealed payload");
        }
        EngineError::KeyUnavailable(detail) => {
            tracing::warn!(operation, %detail, "master key unavailable");
        }
    }
    err
}
