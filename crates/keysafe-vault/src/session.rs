//! `Keysafe` — one explicitly constructed instance wiring the components
//! together for the host application.
//!
//! ```text
//! host ──authorize_session──► LocalAuthGate ──► RetentionCoordinator::record_use
//!      ──encrypt / decrypt──► EncryptionEngine ──► SecretStore
//!      ──enforce_retention──► RetentionCoordinator ──► wipe + fresh key
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keysafe_crypto_core::SecretBuffer;

use crate::auth::{AuthOutcome, BiometricCapability, BiometricProvider, LocalAuthGate};
use crate::config::KeysafeConfig;
use crate::engine::EncryptionEngine;
use crate::error::{AuthError, EngineError, RetentionError, SessionError};
use crate::retention::{Clock, RetentionCoordinator, SystemClock};
use crate::store::{KeyringStore, SecretStore};

/// Local secret-protection core.
#[derive(Debug)]
pub struct Keysafe {
    config: KeysafeConfig,
    engine: Arc<EncryptionEngine>,
    gate: LocalAuthGate,
    retention: RetentionCoordinator,
}

impl Keysafe {
    /// Assemble the core from explicit collaborators.
    #[must_use]
    pub fn new(
        config: KeysafeConfig,
        data_dir: impl Into<PathBuf>,
        store: Arc<dyn SecretStore>,
        provider: Arc<dyn BiometricProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = Arc::new(EncryptionEngine::new(Arc::clone(&store), config.cipher_suite));
        let gate = LocalAuthGate::new(store, provider);
        let retention = RetentionCoordinator::new(Arc::clone(&engine), data_dir.into(), clock);
        Self {
            config,
            engine,
            gate,
            retention,
        }
    }

    /// Open the core for `data_dir` backed by the OS credential vault.
    ///
    /// Creates `data_dir` if needed and loads `{data_dir}/keysafe.json`.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if `data_dir` cannot be created.
    pub fn open(data_dir: &Path, provider: Arc<dyn BiometricProvider>) -> std::io::Result<Self> {
        fs::create_dir_all(data_dir)?;
        let config = KeysafeConfig::load(data_dir);
        let store = Arc::new(KeyringStore::new(config.service_name.clone()));
        tracing::info!(
            service = %config.service_name,
            suite = ?config.cipher_suite,
            "keysafe opened"
        );
        Ok(Self::new(config, data_dir, store, provider, Arc::new(SystemClock)))
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &KeysafeConfig {
        &self.config
    }

    // -- Authentication ----------------------------------------------------

    /// Report the biometric modality available right now.
    #[must_use]
    pub fn capability(&self) -> BiometricCapability {
        self.gate.capability()
    }

    /// Run a biometric challenge. Does not touch the retention clock.
    pub fn authenticate(&self, reason: &str) -> AuthOutcome {
        self.gate.authenticate(reason)
    }

    /// Run a biometric challenge and record the use when it succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::State`] if the use cannot be recorded.
    pub fn authorize_session(&self, reason: &str) -> Result<AuthOutcome, RetentionError> {
        let outcome = self.gate.authenticate(reason);
        if outcome.is_authorized() {
            self.retention.record_use()?;
        }
        Ok(outcome)
    }

    /// Check `pin` and record the use when it matches.
    ///
    /// The PIN counterpart of [`Self::authorize_session`]: a successful PIN
    /// unlock keeps the retention window open just like a biometric one.
    ///
    /// # Errors
    ///
    /// [`SessionError::Auth`] if the stored PIN cannot be read,
    /// [`SessionError::Retention`] if the use cannot be recorded.
    pub fn authorize_with_pin(&self, pin: &str) -> Result<bool, SessionError> {
        let matched = self.gate.validate_pin(pin)?;
        if matched {
            self.retention.record_use()?;
        } else {
            tracing::warn!("PIN rejected");
        }
        Ok(matched)
    }

    /// See [`LocalAuthGate::is_biometric_enabled`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the flag cannot be read.
    pub fn is_biometric_enabled(&self, user_id: &str) -> Result<bool, AuthError> {
        self.gate.is_biometric_enabled(user_id)
    }

    /// See [`LocalAuthGate::set_biometric_enabled`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the flag cannot be written.
    pub fn set_biometric_enabled(&self, enabled: bool, user_id: &str) -> Result<(), AuthError> {
        self.gate.set_biometric_enabled(enabled, user_id)
    }

    /// See [`LocalAuthGate::remember_login`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the login cannot be stored.
    pub fn remember_login(&self, user_id: &str, login: &str) -> Result<(), AuthError> {
        self.gate.remember_login(user_id, login)
    }

    /// See [`LocalAuthGate::remembered_login`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the entry cannot be read.
    pub fn remembered_login(&self, user_id: &str) -> Result<Option<String>, AuthError> {
        self.gate.remembered_login(user_id)
    }

    /// See [`LocalAuthGate::is_pin_enabled`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the store cannot be read.
    pub fn is_pin_enabled(&self) -> Result<bool, AuthError> {
        self.gate.is_pin_enabled()
    }

    /// See [`LocalAuthGate::set_pin`].
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidPin`] or [`AuthError::Store`].
    pub fn set_pin(&self, pin: &str) -> Result<(), AuthError> {
        self.gate.set_pin(pin)
    }

    /// See [`LocalAuthGate::validate_pin`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the stored PIN cannot be read.
    pub fn validate_pin(&self, pin: &str) -> Result<bool, AuthError> {
        self.gate.validate_pin(pin)
    }

    /// See [`LocalAuthGate::clear_pin`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the PIN cannot be removed.
    pub fn clear_pin(&self) -> Result<(), AuthError> {
        self.gate.clear_pin()
    }

    // -- Encryption --------------------------------------------------------

    /// See [`EncryptionEngine::encrypt`].
    ///
    /// # Errors
    ///
    /// [`EngineError::KeyUnavailable`] or [`EngineError::CryptoFailure`].
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.engine.encrypt(plaintext)
    }

    /// See [`EncryptionEngine::decrypt`].
    ///
    /// # Errors
    ///
    /// [`EngineError::MalformedInput`], [`EngineError::KeyUnavailable`] or
    /// [`EngineError::CryptoFailure`].
    pub fn decrypt(&self, sealed: &[u8]) -> Result<SecretBuffer, EngineError> {
        self.engine.decrypt(sealed)
    }

    /// Fingerprint of the current master key, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::KeyUnavailable`] if the stored key is unreadable.
    pub fn key_fingerprint(&self) -> Result<Option<String>, EngineError> {
        self.engine.key_fingerprint()
    }

    // -- Retention ---------------------------------------------------------

    /// See [`RetentionCoordinator::record_use`].
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::State`] if the state file cannot be written.
    pub fn record_use(&self) -> Result<(), RetentionError> {
        self.retention.record_use()
    }

    /// See [`RetentionCoordinator::should_wipe`].
    #[must_use]
    pub fn should_wipe(&self, retention_days: u32) -> bool {
        self.retention.should_wipe(retention_days)
    }

    /// See [`RetentionCoordinator::wipe`].
    ///
    /// # Errors
    ///
    /// [`RetentionError::Unknown`] or [`RetentionError::Engine`].
    pub fn wipe(&self) -> Result<(), RetentionError> {
        self.retention.wipe()
    }

    /// Wipe if the configured retention window has elapsed.
    ///
    /// Returns whether a wipe happened. Never runs on its own; the host
    /// decides when to call it (typically on foreground).
    ///
    /// # Errors
    ///
    /// See [`Self::wipe`].
    pub fn enforce_retention(&self) -> Result<bool, RetentionError> {
        if !self.retention.should_wipe(self.config.retention_days) {
            return Ok(false);
        }
        tracing::info!(
            retention_days = self.config.retention_days,
            "retention window elapsed"
        );
        self.retention.wipe()?;
        Ok(true)
    }

    /// Destroy all local secrets on explicit account deletion.
    ///
    /// # Errors
    ///
    /// See [`Self::wipe`].
    pub fn delete_account(&self) -> Result<(), RetentionError> {
        tracing::info!("account deletion requested");
        self.retention.wipe()
    }
}
