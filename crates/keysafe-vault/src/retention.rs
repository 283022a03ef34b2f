//! Retention window and irreversible wipe.
//!
//! The last-use timestamp is not secret: it lives in `{data_dir}/retention.json`
//! next to the config file, not in the secure store. A missing timestamp never
//! triggers a wipe.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::engine::EncryptionEngine;
use crate::error::{RetentionError, StoreError};
use crate::settings_file;
use crate::store::{
    SecretStore, BIOMETRIC_ENABLED_PREFIX, LOGIN_RESUME_PREFIX, MASTER_KEY_ID, PIN_ENABLED_ID,
    PIN_ID,
};

const RETENTION_FILE: &str = "retention.json";

/// Seconds per retention day.
pub const SECONDS_PER_DAY: u64 = 86_400;

// ── Clock ──────────────────────────────────────────────────────────

/// Source of the current time, in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current unix time in seconds.
    fn now(&self) -> u64;
}

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        // A clock set before 1970 reads as the epoch.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }
}

// ── Persisted state ────────────────────────────────────────────────

/// Persisted retention state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionState {
    /// Unix seconds of the last successful authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_use: Option<u64>,
}

impl RetentionState {
    /// Load state from `{data_dir}/retention.json`.
    ///
    /// A missing file is a fresh install. A corrupt file is logged and read
    /// as empty, which exempts it from wiping.
    #[must_use]
    pub fn load(data_dir: &Path) -> Self {
        settings_file::read_json_or_default(data_dir, RETENTION_FILE)
    }

    /// Persist state atomically (write `.tmp`, then rename), owner-only on Unix.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the directory does not exist or the write
    /// or rename fails.
    pub fn save(&self, data_dir: &Path) -> std::io::Result<()> {
        settings_file::write_private_json(data_dir, RETENTION_FILE, self)
    }

    /// Remove the state file. Absence is not an error.
    fn clear(data_dir: &Path) -> std::io::Result<()> {
        settings_file::remove_if_present(data_dir, RETENTION_FILE)
    }
}

/// `true` when `now` is strictly past `last_use + days`.
///
/// A deadline that does not fit in `u64` is never reached.
#[must_use]
pub fn retention_expired(last_use: u64, retention_days: u32, now: u64) -> bool {
    u64::from(retention_days)
        .checked_mul(SECONDS_PER_DAY)
        .and_then(|window| last_use.checked_add(window))
        .is_some_and(|deadline| now > deadline)
}

// ── Coordinator ────────────────────────────────────────────────────

/// Decides when local secrets must be destroyed and destroys them.
#[derive(Debug)]
pub struct RetentionCoordinator {
    engine: Arc<EncryptionEngine>,
    data_dir: PathBuf,
    clock: Arc<dyn Clock>,
    state_lock: Mutex<()>,
}

impl RetentionCoordinator {
    /// Create a coordinator persisting its state under `data_dir`.
    #[must_use]
    pub fn new(engine: Arc<EncryptionEngine>, data_dir: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            data_dir,
            clock,
            state_lock: Mutex::new(()),
        }
    }

    /// Recorded last-use time, if any.
    #[must_use]
    pub fn last_use(&self) -> Option<u64> {
        RetentionState::load(&self.data_dir).last_use
    }

    /// Record a successful authorization at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::State`] if the state file cannot be written.
    pub fn record_use(&self) -> Result<(), RetentionError> {
        let _guard = self.lock_state()?;
        let state = RetentionState {
            last_use: Some(self.clock.now()),
        };
        state.save(&self.data_dir)?;
        tracing::debug!("last use recorded");
        Ok(())
    }

    /// Whether more than `retention_days` have elapsed since the last use.
    ///
    /// Always `false` when no use has been recorded.
    #[must_use]
    pub fn should_wipe(&self, retention_days: u32) -> bool {
        self.last_use()
            .is_some_and(|last_use| retention_expired(last_use, retention_days, self.clock.now()))
    }

    /// Destroy every local secret and provision a fresh master key.
    ///
    /// Runs with encryption and decryption blocked. Deletes the master key,
    /// all biometric flags, all remembered logins, the PIN and the last-use
    /// timestamp. If any deletion fails the wipe stops with
    /// [`RetentionError::Unknown`] and no new key is created.
    ///
    /// Anything sealed before the wipe is permanently unreadable afterwards.
    ///
    /// # Errors
    ///
    /// [`RetentionError::Unknown`] on a failed deletion,
    /// [`RetentionError::Engine`] if the fresh key cannot be provisioned.
    pub fn wipe(&self) -> Result<(), RetentionError> {
        tracing::info!("wipe started");
        let _guard = self.lock_state()?;
        self.engine
            .regenerate_key_after(|store| self.purge(store))
            .inspect_err(|e| tracing::warn!(error = %e, "wipe failed"))?;
        tracing::info!("wipe finished");
        Ok(())
    }

    fn purge(&self, store: &dyn SecretStore) -> Result<(), RetentionError> {
        store.delete(MASTER_KEY_ID).map_err(incomplete)?;
        let flags = store
            .delete_all_with_prefix(BIOMETRIC_ENABLED_PREFIX)
            .map_err(incomplete)?;
        let logins = store
            .delete_all_with_prefix(LOGIN_RESUME_PREFIX)
            .map_err(incomplete)?;
        store.delete(PIN_ENABLED_ID).map_err(incomplete)?;
        store.delete(PIN_ID).map_err(incomplete)?;
        RetentionState::clear(&self.data_dir)
            .map_err(|e| RetentionError::Unknown(format!("retention state: {e}")))?;
        tracing::debug!(flags, logins, "secrets purged");
        Ok(())
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, ()>, RetentionError> {
        self.state_lock
            .lock()
            .map_err(|_| RetentionError::Unknown("retention lock poisoned".into()))
    }
}

fn incomplete(err: StoreError) -> RetentionError {
    RetentionError::Unknown(err.to_string())
}

// ── Tests ──────────────────────────────────────────────────────────
