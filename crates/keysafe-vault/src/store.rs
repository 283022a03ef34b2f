//! Secure secret storage — trait, key layout, OS keyring and in-memory backends.
//!
//! Every secret this crate persists goes through a [`SecretStore`]. Nothing
//! secret is ever written to the plain settings files in `data_dir`.
//!
//! # Key layout
//!
//! ```text
//! keysafe.master_key                    256-bit master key
//! keysafe.pin                           6-digit PIN
//! keysafe.pin_enabled                   "1" / "0"
//! keysafe.biometric_enabled_<userId>    "1" / "0"
//! keysafe.login_resume_<userId>         login identifier for biometric resume
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use keysafe_crypto_core::SecretBuffer;
use zeroize::Zeroize;

use crate::error::StoreError;

/// Key holding the master key.
pub const MASTER_KEY_ID: &str = "keysafe.master_key";

/// Key holding the PIN secret.
pub const PIN_ID: &str = "keysafe.pin";

/// Key holding the PIN enabled flag.
pub const PIN_ENABLED_ID: &str = "keysafe.pin_enabled";

/// Prefix of the per-user biometric enabled flags.
pub const BIOMETRIC_ENABLED_PREFIX: &str = "keysafe.biometric_enabled_";

/// Prefix of the per-user login identifiers used to resume after biometrics.
pub const LOGIN_RESUME_PREFIX: &str = "keysafe.login_resume_";

/// Stored form of a `true` flag.
pub(crate) const FLAG_ON: &[u8] = b"1";

/// Stored form of a `false` flag.
pub(crate) const FLAG_OFF: &[u8] = b"0";

/// Secure store key for a user's biometric enabled flag.
#[must_use]
pub fn biometric_enabled_key(user_id: &str) -> String {
    format!("{BIOMETRIC_ENABLED_PREFIX}{user_id}")
}

/// Secure store key for a user's login resume identifier.
#[must_use]
pub fn login_resume_key(user_id: &str) -> String {
    format!("{LOGIN_RESUME_PREFIX}{user_id}")
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Key/value store for small opaque secrets.
///
/// All calls are blocking and may touch the OS credential vault.
pub trait SecretStore: fmt::Debug + Send + Sync {
    /// Store `value` under `key`, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateEntryRace`] if the backend holds
    /// duplicates it cannot resolve, [`StoreError::Unknown`] on other failures.
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if absent, [`StoreError::InvalidFormat`]
    /// if the stored bytes cannot be decoded.
    fn get(&self, key: &str) -> Result<SecretBuffer, StoreError>;

    /// Remove `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unknown`] if the backend fails.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List every key currently held.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unknown`] if the backend cannot enumerate.
    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Delete every key starting with `prefix`, returning how many were removed.
    ///
    /// All matching keys are attempted even if one fails.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unknown`] naming the keys that could not be deleted.
    fn delete_all_with_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut deleted = 0usize;
        let mut failures = Vec::new();
        for key in self.keys()?.into_iter().filter(|k| k.starts_with(prefix)) {
            match self.delete(&key) {
                Ok(()) => deleted = deleted.saturating_add(1),
                Err(e) => failures.push(format!("{key}: {e}")),
            }
        }
        if failures.is_empty() {
            Ok(deleted)
        } else {
            Err(StoreError::Unknown(format!(
                "failed to delete {} of {} entries with prefix {prefix}: {}",
                failures.len(),
                deleted.saturating_add(failures.len()),
                failures.join("; ")
            )))
        }
    }

    /// Read a value as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Same as [`SecretStore::get`]; non-UTF-8 bytes yield
    /// [`StoreError::InvalidFormat`].
    fn get_string(&self, key: &str) -> Result<String, StoreError> {
        let value = self.get(key)?;
        String::from_utf8(value.expose().to_vec()).map_err(|e| {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            StoreError::InvalidFormat(format!("{key} is not valid UTF-8"))
        })
    }

    /// Read a boolean flag. Absent means `false`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidFormat`] for anything other than `"1"`/`"0"`.
    fn get_flag(&self, key: &str) -> Result<bool, StoreError> {
        match self.get(key) {
            Ok(value) => match value.expose() {
                FLAG_ON => Ok(true),
                FLAG_OFF => Ok(false),
                _ => Err(StoreError::InvalidFormat(format!("{key} is not a flag"))),
            },
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write a boolean flag.
    ///
    /// # Errors
    ///
    /// Same as [`SecretStore::save`].
    fn set_flag(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.save(key, if value { FLAG_ON } else { FLAG_OFF })
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Process-local store for tests and for hosts without an OS vault.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unknown("memory store lock poisoned".into()))
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.entries.lock().map(|e| e.len()).unwrap_or_default();
        f.debug_struct("MemoryStore").field("entries", &count).finish()
    }
}

impl SecretStore for MemoryStore {
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        if let Some(mut old) = entries.insert(key.to_string(), value.to_vec()) {
            old.zeroize();
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<SecretBuffer, StoreError> {
        let entries = self.lock()?;
        let value = entries
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        SecretBuffer::new(value).map_err(|e| StoreError::Unknown(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        if let Some(mut old) = self.lock()?.remove(key) {
            old.zeroize();
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// OS keyring backend
// ---------------------------------------------------------------------------

/// Default keyring service name.
pub const DEFAULT_SERVICE: &str = "keysafe";

/// Reserved entry holding the JSON index of known keys.
///
/// The OS vaults cannot enumerate entries, so prefix deletion walks this index.
const INDEX_KEY: &str = "__keysafe_index__";

/// Raw credential vault: read, write and remove single entries, no listing.
pub trait CredentialBackend: fmt::Debug + Send + Sync {
    /// Namespace the entries live in (the keyring service name).
    fn namespace(&self) -> &str;

    /// Create `key` or overwrite it in place.
    ///
    /// # Errors
    ///
    /// Backend failure mapped to [`StoreError`].
    fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Read `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if absent.
    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Remove `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if absent.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// OS credential vault through the `keyring` crate.
///
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service (gnome-keyring / `KWallet`)
#[derive(Debug, Clone)]
pub struct OsKeyring {
    service: String,
}

impl OsKeyring {
    /// Backend scoped to `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, key).map_err(StoreError::from)
    }
}

impl CredentialBackend for OsKeyring {
    fn namespace(&self) -> &str {
        &self.service
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        // The platform backends add the credential or update it in place.
        self.entry(key)?
            .set_secret(value)
            .map_err(|e| match StoreError::from(e) {
                StoreError::DuplicateEntryRace(detail) => {
                    StoreError::DuplicateEntryRace(format!("{key} ({detail})"))
                }
                other => other,
            })
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        match self.entry(key)?.get_secret() {
            Ok(bytes) => Ok(bytes),
            Err(keyring::Error::NoEntry) => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Index lock for `namespace`, shared by every store in the process.
fn index_lock(namespace: &str) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();
    // The map only hands out locks; a panic while holding it leaves it intact.
    let mut locks = LOCKS
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(namespace.to_string()).or_default())
}

/// [`SecretStore`] over a [`CredentialBackend`], keeping a JSON index of keys
/// inside the backend so prefix deletion can enumerate.
///
/// The index is updated before a secret is written and after it is removed,
/// so it always lists at least every stored key.
pub struct IndexedStore<B> {
    backend: B,
    /// Serializes index read-modify-write cycles for the namespace.
    index_lock: Arc<Mutex<()>>,
}

/// Store backed by the OS credential vault.
pub type KeyringStore = IndexedStore<OsKeyring>;

impl<B: CredentialBackend> IndexedStore<B> {
    /// Wrap `backend`.
    #[must_use]
    pub fn with_backend(backend: B) -> Self {
        let index_lock = index_lock(backend.namespace());
        Self {
            backend,
            index_lock,
        }
    }

    fn load_index(&self) -> Result<BTreeSet<String>, StoreError> {
        match self.backend.read(INDEX_KEY) {
            Ok(json) => serde_json::from_slice(&json)
                .map_err(|e| StoreError::InvalidFormat(format!("corrupted key index: {e}"))),
            Err(StoreError::NotFound(_)) => Ok(BTreeSet::new()),
            Err(e) => Err(e),
        }
    }

    fn save_index(&self, index: &BTreeSet<String>) -> Result<(), StoreError> {
        let json = serde_json::to_vec(index)
            .map_err(|e| StoreError::Unknown(format!("failed to serialize key index: {e}")))?;
        self.backend.write(INDEX_KEY, &json)
    }

    fn update_index(&self, f: impl FnOnce(&mut BTreeSet<String>) -> bool) -> Result<(), StoreError> {
        let _guard = self
            .index_lock
            .lock()
            .map_err(|_| StoreError::Unknown("keyring index lock poisoned".into()))?;
        let mut index = self.load_index()?;
        if f(&mut index) {
            self.save_index(&index)?;
        }
        Ok(())
    }
}

impl KeyringStore {
    /// Create a store scoped to keyring `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_backend(OsKeyring::new(service))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

impl<B: fmt::Debug> fmt::Debug for IndexedStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedStore")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl<B: CredentialBackend> SecretStore for IndexedStore<B> {
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.update_index(|index| index.insert(key.to_string()))?;
        self.backend.write(key, value)?;
        tracing::debug!(key, "secure store entry saved");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<SecretBuffer, StoreError> {
        self.backend.read(key).map(SecretBuffer::from_vec)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.backend.remove(key) {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        tracing::debug!(key, "secure store entry deleted");
        self.update_index(|index| index.remove(key))
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.load_index()?.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
