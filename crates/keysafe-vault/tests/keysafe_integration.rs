#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! End-to-end tests through the `Keysafe` facade: session authorization,
//! PIN semantics, retention gating, and irreversible wipe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use keysafe_crypto_core::SecretBuffer;
use keysafe_vault::{
    AuthOutcome, AuthReply, BiometricModality, BiometricProvider, CipherSuite, Clock,
    DenialReason, EngineError, Keysafe, KeysafeConfig, MemoryStore, PlatformFailure,
    RetentionError, SecretStore, StoreError,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

const DAY: u64 = 86_400;

#[derive(Debug)]
struct ManualClock(AtomicU64);

impl ManualClock {
    fn new() -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(1_700_000_000)))
    }

    fn advance_days(&self, days: u64) {
        self.0.fetch_add(days * DAY, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Provider whose next answer is set by the test and delivered from another
/// thread, the way platform callbacks arrive.
struct ScriptedProvider {
    modality: BiometricModality,
    next: Mutex<Option<Result<(), PlatformFailure>>>,
}

impl ScriptedProvider {
    fn new(modality: BiometricModality) -> Arc<Self> {
        Arc::new(Self {
            modality,
            next: Mutex::new(None),
        })
    }

    fn answer(&self, result: Result<(), PlatformFailure>) {
        *self.next.lock().unwrap() = Some(result);
    }
}

impl BiometricProvider for ScriptedProvider {
    fn modality(&self) -> BiometricModality {
        self.modality
    }

    fn provider_name(&self) -> &'static str {
        "Scripted"
    }

    fn evaluate(&self, _reason: &str, reply: AuthReply) {
        let next = self.next.lock().unwrap().take();
        thread::spawn(move || match next {
            Some(Ok(())) => reply.succeed(),
            Some(Err(failure)) => reply.fail(failure),
            None => drop(reply),
        });
    }
}

/// Store that fails deletes for keys starting with `poisoned`.
#[derive(Debug)]
struct FlakyStore {
    inner: MemoryStore,
    poisoned: &'static str,
}

impl SecretStore for FlakyStore {
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.inner.save(key, value)
    }

    fn get(&self, key: &str) -> Result<SecretBuffer, StoreError> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        if key.starts_with(self.poisoned) {
            return Err(StoreError::Unknown("errSecInteractionNotAllowed".into()));
        }
        self.inner.delete(key)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys()
    }
}

struct Fixture {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    provider: Arc<ScriptedProvider>,
    keysafe: Keysafe,
}

fn fixture_with(suite: CipherSuite, store: Arc<dyn SecretStore>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new();
    let provider = ScriptedProvider::new(BiometricModality::Face);
    let config = KeysafeConfig {
        cipher_suite: suite,
        ..KeysafeConfig::default()
    };
    let keysafe = Keysafe::new(config, dir.path(), store, provider.clone(), clock.clone());
    Fixture {
        _dir: dir,
        clock,
        provider,
        keysafe,
    }
}

fn fixture(suite: CipherSuite) -> Fixture {
    fixture_with(suite, Arc::new(MemoryStore::new()))
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[test]
fn authorized_session_records_use() {
    let f = fixture(CipherSuite::Aes256Cbc);
    f.provider.answer(Ok(()));
    assert_eq!(
        f.keysafe.authorize_session("Unlock your band space").unwrap(),
        AuthOutcome::Authorized
    );
    assert!(!f.keysafe.should_wipe(30));
    f.clock.advance_days(31);
    assert!(f.keysafe.should_wipe(30));
}

#[test]
fn denied_session_does_not_record_use() {
    let f = fixture(CipherSuite::Aes256Cbc);
    f.provider.answer(Err(PlatformFailure::AuthenticationFailed));
    let outcome = f.keysafe.authorize_session("unlock").unwrap();
    assert_eq!(outcome, AuthOutcome::Denied(DenialReason::AuthenticationFailed));
    f.clock.advance_days(365);
    assert!(!f.keysafe.should_wipe(30), "no recorded use, nothing to expire");
}

#[test]
fn not_enrolled_is_reported() {
    let f = fixture(CipherSuite::Aes256Cbc);
    f.provider.answer(Err(PlatformFailure::NotEnrolled));
    let AuthOutcome::Denied(reason) = f.keysafe.authenticate("unlock") else {
        panic!("expected denial");
    };
    assert_eq!(reason, DenialReason::BiometryNotEnrolled);
    assert!(reason.user_message().is_some());
}

#[test]
fn cancellation_is_silent() {
    let f = fixture(CipherSuite::Aes256Cbc);
    f.provider.answer(Err(PlatformFailure::UserCancel));
    let AuthOutcome::Denied(reason) = f.keysafe.authenticate("unlock") else {
        panic!("expected denial");
    };
    assert_eq!(reason, DenialReason::UserCancelled);
    assert!(reason.user_message().is_none());
}

#[test]
fn unanswered_challenge_resolves_as_cancelled() {
    let f = fixture(CipherSuite::Aes256Cbc);
    // No scripted answer: the provider drops the reply on another thread.
    assert_eq!(
        f.keysafe.authenticate("unlock"),
        AuthOutcome::Denied(DenialReason::UserCancelled)
    );
}

// ---------------------------------------------------------------------------
// PIN
// ---------------------------------------------------------------------------

#[test]
fn pin_semantics() {
    let f = fixture(CipherSuite::Aes256Cbc);
    assert!(!f.keysafe.validate_pin("123456").unwrap());
    assert!(!f.keysafe.is_pin_enabled().unwrap());

    f.keysafe.set_pin("123456").unwrap();
    assert!(f.keysafe.is_pin_enabled().unwrap());
    assert!(f.keysafe.validate_pin("123456").unwrap());
    assert!(!f.keysafe.validate_pin("000000").unwrap());
    assert!(!f.keysafe.validate_pin("1234567").unwrap());
}

#[test]
fn daily_pin_unlocks_keep_retention_open() {
    let f = fixture(CipherSuite::Aes256Gcm);
    f.provider.answer(Ok(()));
    assert!(f.keysafe.authorize_session("unlock").unwrap().is_authorized());
    f.keysafe.set_pin("123456").unwrap();
    let sealed = f.keysafe.encrypt(b"tour budget").unwrap();

    for _ in 0..45 {
        f.clock.advance_days(1);
        assert!(f.keysafe.authorize_with_pin("123456").unwrap());
    }

    assert!(!f.keysafe.enforce_retention().unwrap());
    assert_eq!(f.keysafe.decrypt(&sealed).unwrap().expose(), b"tour budget");
}

#[test]
fn wrong_pin_does_not_record_use() {
    let f = fixture(CipherSuite::Aes256Cbc);
    f.keysafe.set_pin("123456").unwrap();
    f.keysafe.record_use().unwrap();

    f.clock.advance_days(31);
    assert!(!f.keysafe.authorize_with_pin("654321").unwrap());
    assert!(f.keysafe.should_wipe(30));
}

// ---------------------------------------------------------------------------
// Wipe
// ---------------------------------------------------------------------------

#[test]
fn wipe_invalidates_gcm_payloads() {
    let f = fixture(CipherSuite::Aes256Gcm);
    let sealed = f.keysafe.encrypt(b"bank details").unwrap();
    f.keysafe.wipe().unwrap();
    assert!(matches!(
        f.keysafe.decrypt(&sealed),
        Err(EngineError::CryptoFailure(_))
    ));
    // New payloads still work.
    let fresh = f.keysafe.encrypt(b"after wipe").unwrap();
    assert_eq!(f.keysafe.decrypt(&fresh).unwrap().expose(), b"after wipe");
}

#[test]
fn wipe_never_recovers_cbc_plaintext() {
    let f = fixture(CipherSuite::Aes256Cbc);
    let plaintext = b"rehearsal room door code 4711";
    let sealed = f.keysafe.encrypt(plaintext).unwrap();
    f.keysafe.wipe().unwrap();
    match f.keysafe.decrypt(&sealed) {
        Err(err) => assert!(matches!(err, EngineError::CryptoFailure(_))),
        Ok(garbage) => assert_ne!(garbage.expose(), plaintext),
    }
}

#[test]
fn delete_account_clears_user_settings() {
    let f = fixture(CipherSuite::Aes256Cbc);
    f.keysafe.set_pin("246810").unwrap();
    f.keysafe.set_biometric_enabled(true, "user-1").unwrap();
    f.keysafe.remember_login("user-1", "drummer@example.com").unwrap();
    f.keysafe.record_use().unwrap();
    let before = f.keysafe.key_fingerprint().unwrap();

    f.keysafe.delete_account().unwrap();

    assert!(!f.keysafe.is_pin_enabled().unwrap());
    assert!(!f.keysafe.is_biometric_enabled("user-1").unwrap());
    assert!(f.keysafe.remembered_login("user-1").unwrap().is_none());
    assert!(!f.keysafe.should_wipe(0));
    let after = f.keysafe.key_fingerprint().unwrap();
    assert!(after.is_some());
    assert_ne!(before, after);
}

#[test]
fn partial_wipe_reports_unknown_without_fresh_key() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        poisoned: "keysafe.biometric_enabled_",
    });
    let f = fixture_with(CipherSuite::Aes256Gcm, store);
    let sealed = f.keysafe.encrypt(b"payload").unwrap();
    f.keysafe.set_biometric_enabled(true, "user-1").unwrap();

    let err = f.keysafe.wipe().unwrap_err();
    assert!(matches!(err, RetentionError::Unknown(_)), "{err:?}");

    // No fresh key was laid over the half-wiped store.
    assert!(f.keysafe.key_fingerprint().unwrap().is_none());
    assert!(f.keysafe.decrypt(&sealed).is_err());
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

#[test]
fn enforce_retention_wipes_only_after_window() {
    let f = fixture(CipherSuite::Aes256Gcm);
    assert!(!f.keysafe.enforce_retention().unwrap(), "fresh install is exempt");

    let sealed = f.keysafe.encrypt(b"cached roster").unwrap();
    f.keysafe.record_use().unwrap();
    f.clock.advance_days(29);
    assert!(!f.keysafe.enforce_retention().unwrap());
    assert_eq!(f.keysafe.decrypt(&sealed).unwrap().expose(), b"cached roster");

    f.clock.advance_days(2);
    assert!(f.keysafe.enforce_retention().unwrap());
    assert!(f.keysafe.decrypt(&sealed).is_err());
    // lastUse was cleared with everything else.
    assert!(!f.keysafe.enforce_retention().unwrap());
}
