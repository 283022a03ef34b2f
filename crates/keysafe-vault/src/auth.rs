//! Local authentication gate — biometric challenge, PIN fallback, per-user policy.
//!
//! # Attempt lifecycle
//!
//! ```text
//! Idle ──authenticate()──► Evaluating ──► Authorized
//!                                     └─► Denied(reason)
//! ```
//!
//! The platform challenge is abstracted behind [`BiometricProvider`]. The
//! provider answers through an [`AuthReply`], which is consumed on use, so a
//! challenge resolves exactly once. A reply dropped unanswered counts as a
//! user cancellation.

use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};

use keysafe_crypto_core::{pins_match, validate_pin_format};
use thiserror::Error;

use crate::error::{AuthError, StoreError};
use crate::store::{
    biometric_enabled_key, login_resume_key, SecretStore, PIN_ENABLED_ID, PIN_ID,
};

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Class of biometric sensor available on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometricModality {
    /// No usable biometric sensor.
    None,
    /// Fingerprint-class sensor (Touch ID, fingerprint readers).
    Fingerprint,
    /// Face-class sensor (Face ID, Windows Hello face).
    Face,
}

impl BiometricModality {
    /// String representation for the host UI.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Fingerprint => "fingerprint",
            Self::Face => "face",
        }
    }
}

/// Point-in-time result of a capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiometricCapability {
    /// Modality currently usable.
    pub modality: BiometricModality,
    /// Human-readable provider name (e.g. "Touch ID").
    pub provider_name: String,
}

impl BiometricCapability {
    /// Whether a biometric challenge can be attempted right now.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.modality != BiometricModality::None
    }
}

// ---------------------------------------------------------------------------
// Provider seam
// ---------------------------------------------------------------------------

/// Failure reported by the platform biometric API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformFailure {
    /// The user dismissed the prompt.
    UserCancel,
    /// The user chose the fallback button (e.g. "Enter PIN").
    UserFallback,
    /// The system or app interrupted the prompt.
    SystemCancel,
    /// Hardware present but no biometric is enrolled.
    NotEnrolled,
    /// Too many failed attempts; biometry is locked.
    Lockout,
    /// Biometric did not match.
    AuthenticationFailed,
    /// Hardware became unavailable during the challenge.
    NotAvailable,
    /// Anything else, with the platform's description.
    Other(String),
}

/// One-shot channel a provider uses to answer a challenge.
///
/// Consumed by [`AuthReply::succeed`] or [`AuthReply::fail`]; dropping it
/// without answering resolves the challenge as a user cancellation.
#[derive(Debug)]
pub struct AuthReply {
    tx: mpsc::SyncSender<Result<(), PlatformFailure>>,
}

impl AuthReply {
    /// Report a successful biometric match.
    pub fn succeed(self) {
        // The gate may have stopped waiting; nothing to do then.
        let _ = self.tx.send(Ok(()));
    }

    /// Report a failed challenge.
    pub fn fail(self, failure: PlatformFailure) {
        let _ = self.tx.send(Err(failure));
    }
}

/// Platform biometric provider abstraction.
///
/// The host application supplies the implementation (Touch ID, Windows
/// Hello, Android `BiometricPrompt`, ...). `evaluate` may answer inline or
/// hand the reply to another thread.
pub trait BiometricProvider: Send + Sync {
    /// Report the modality usable right now. Must not be cached: enrollment
    /// can change between launches.
    fn modality(&self) -> BiometricModality;

    /// Human-readable provider name.
    fn provider_name(&self) -> &'static str;

    /// Show the platform challenge with `reason` and answer through `reply`.
    fn evaluate(&self, reason: &str, reply: AuthReply);
}

/// Fallback provider when no biometric hardware is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBiometricProvider;

impl BiometricProvider for NullBiometricProvider {
    fn modality(&self) -> BiometricModality {
        BiometricModality::None
    }

    fn provider_name(&self) -> &'static str {
        "None"
    }

    fn evaluate(&self, _reason: &str, reply: AuthReply) {
        reply.fail(PlatformFailure::NotAvailable);
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why an authentication attempt was denied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenialReason {
    /// Biometric did not match.
    #[error("Authentication failed. Please try again.")]
    AuthenticationFailed,
    /// The user cancelled the prompt.
    #[error("Authentication was cancelled.")]
    UserCancelled,
    /// The device has no usable biometric sensor.
    #[error("Biometric authentication is not available on this device.")]
    BiometryNotAvailable,
    /// No biometric is enrolled on the device.
    #[error("No biometrics are enrolled. Set up Face ID or a fingerprint in system settings.")]
    BiometryNotEnrolled,
    /// Biometry is locked after too many attempts.
    #[error("Biometric authentication is locked. Unlock your device with its passcode and try again.")]
    BiometryLockout,
    /// Any other platform failure.
    #[error("Authentication could not be completed.")]
    Unknown(String),
}

impl DenialReason {
    /// `true` for the single outcome that must not surface an error to the user.
    #[must_use]
    pub const fn is_silent(&self) -> bool {
        matches!(self, Self::UserCancelled)
    }

    /// Message to show the user, or `None` when the denial is silent.
    #[must_use]
    pub fn user_message(&self) -> Option<String> {
        (!self.is_silent()).then(|| self.to_string())
    }
}

impl From<PlatformFailure> for DenialReason {
    fn from(failure: PlatformFailure) -> Self {
        match failure {
            PlatformFailure::UserCancel
            | PlatformFailure::UserFallback
            | PlatformFailure::SystemCancel => Self::UserCancelled,
            PlatformFailure::NotEnrolled => Self::BiometryNotEnrolled,
            PlatformFailure::Lockout => Self::BiometryLockout,
            PlatformFailure::AuthenticationFailed => Self::AuthenticationFailed,
            PlatformFailure::NotAvailable => Self::BiometryNotAvailable,
            PlatformFailure::Other(detail) => Self::Unknown(detail),
        }
    }
}

/// Final result of [`LocalAuthGate::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The user passed the challenge.
    Authorized,
    /// The challenge did not succeed.
    Denied(DenialReason),
}

impl AuthOutcome {
    /// Whether the session may proceed.
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }
}

/// Observable state of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// No attempt made yet.
    Idle,
    /// A challenge is on screen.
    Evaluating,
    /// The last attempt succeeded.
    Authorized,
    /// The last attempt was denied.
    Denied(DenialReason),
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Decides whether and how to challenge the user, and owns PIN and
/// per-user biometric settings.
pub struct LocalAuthGate {
    store: Arc<dyn SecretStore>,
    provider: Arc<dyn BiometricProvider>,
    state: Mutex<GateState>,
}

impl fmt::Debug for LocalAuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAuthGate")
            .field("provider", &self.provider.provider_name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LocalAuthGate {
    /// Create a gate over `store` using `provider` for biometric challenges.
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>, provider: Arc<dyn BiometricProvider>) -> Self {
        Self {
            store,
            provider,
            state: Mutex::new(GateState::Idle),
        }
    }

    /// Current gate state.
    #[must_use]
    pub fn state(&self) -> GateState {
        self.state
            .lock()
            .map_or(GateState::Idle, |state| state.clone())
    }

    /// Report the biometric modality available right now.
    #[must_use]
    pub fn capability(&self) -> BiometricCapability {
        BiometricCapability {
            modality: self.provider.modality(),
            provider_name: self.provider.provider_name().to_string(),
        }
    }

    /// Run one biometric challenge and block until it resolves.
    ///
    /// Never fails: every error path is an [`AuthOutcome::Denied`].
    pub fn authenticate(&self, reason: &str) -> AuthOutcome {
        let Some(attempt) = self.begin_attempt() else {
            return AuthOutcome::Denied(DenialReason::Unknown(
                "authentication already in progress".into(),
            ));
        };

        let capability = self.capability();
        let outcome = if capability.is_available() {
            let (tx, rx) = mpsc::sync_channel(1);
            self.provider.evaluate(reason, AuthReply { tx });
            match rx.recv() {
                Ok(Ok(())) => AuthOutcome::Authorized,
                Ok(Err(failure)) => AuthOutcome::Denied(failure.into()),
                // Reply dropped unanswered.
                Err(mpsc::RecvError) => AuthOutcome::Denied(DenialReason::UserCancelled),
            }
        } else {
            AuthOutcome::Denied(DenialReason::BiometryNotAvailable)
        };

        match &outcome {
            AuthOutcome::Authorized => {
                tracing::info!(modality = capability.modality.as_str(), "biometric challenge passed");
            }
            AuthOutcome::Denied(reason) if reason.is_silent() => {
                tracing::debug!("biometric challenge cancelled by user");
            }
            AuthOutcome::Denied(reason) => {
                tracing::warn!(?reason, modality = capability.modality.as_str(), "biometric challenge denied");
            }
        }
        attempt.finish(&outcome);
        outcome
    }

    fn begin_attempt(&self) -> Option<Attempt<'_>> {
        let mut state = self.state.lock().ok()?;
        if *state == GateState::Evaluating {
            return None;
        }
        *state = GateState::Evaluating;
        Some(Attempt {
            state: &self.state,
            finished: false,
        })
    }

    // -- PIN ---------------------------------------------------------------

    /// Whether a PIN is set and enabled.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the secure store cannot be read.
    pub fn is_pin_enabled(&self) -> Result<bool, AuthError> {
        if !self.store.get_flag(PIN_ENABLED_ID)? {
            return Ok(false);
        }
        match self.store.get(PIN_ID) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Set the PIN (exactly six digits) and enable it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPin`] for a malformed PIN, [`AuthError::Store`]
    /// if it cannot be persisted.
    pub fn set_pin(&self, pin: &str) -> Result<(), AuthError> {
        validate_pin_format(pin)?;
        self.store.save(PIN_ID, pin.as_bytes())?;
        self.store.set_flag(PIN_ENABLED_ID, true)?;
        tracing::info!("PIN set");
        Ok(())
    }

    /// Remove the PIN and disable it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if either entry cannot be deleted.
    pub fn clear_pin(&self) -> Result<(), AuthError> {
        // Flag first, so a failure in between never leaves "enabled" without a PIN.
        self.store.delete(PIN_ENABLED_ID)?;
        self.store.delete(PIN_ID)?;
        tracing::info!("PIN cleared");
        Ok(())
    }

    /// Compare `candidate` against the stored PIN in constant time.
    ///
    /// Returns `false` when no PIN has been set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the stored PIN cannot be read.
    pub fn validate_pin(&self, candidate: &str) -> Result<bool, AuthError> {
        match self.store.get(PIN_ID) {
            Ok(stored) => Ok(pins_match(stored.expose(), candidate.as_bytes())),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    // -- Biometric policy --------------------------------------------------

    /// Whether `user_id` opted into biometric unlock.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the flag cannot be read.
    pub fn is_biometric_enabled(&self, user_id: &str) -> Result<bool, AuthError> {
        Ok(self.store.get_flag(&biometric_enabled_key(user_id))?)
    }

    /// Record `user_id`'s explicit biometric choice. Disabling also forgets
    /// the remembered login.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the secure store cannot be written.
    pub fn set_biometric_enabled(&self, enabled: bool, user_id: &str) -> Result<(), AuthError> {
        self.store.set_flag(&biometric_enabled_key(user_id), enabled)?;
        if !enabled {
            self.store.delete(&login_resume_key(user_id))?;
        }
        tracing::info!(user_id, enabled, "biometric policy updated");
        Ok(())
    }

    /// Store the login identifier used to resume `user_id`'s session after a
    /// biometric challenge.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the secure store cannot be written.
    pub fn remember_login(&self, user_id: &str, login: &str) -> Result<(), AuthError> {
        self.store.save(&login_resume_key(user_id), login.as_bytes())?;
        Ok(())
    }

    /// The remembered login identifier for `user_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the entry exists but cannot be read.
    pub fn remembered_login(&self, user_id: &str) -> Result<Option<String>, AuthError> {
        match self.store.get_string(&login_resume_key(user_id)) {
            Ok(login) => Ok(Some(login)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Gate state for one in-flight challenge.
///
/// Leaves `Evaluating` on every exit: [`Attempt::finish`] records the outcome,
/// and unwinding out of a provider records `Denied(Unknown)`.
struct Attempt<'a> {
    state: &'a Mutex<GateState>,
    finished: bool,
}

impl Attempt<'_> {
    fn finish(mut self, outcome: &AuthOutcome) {
        self.set(match outcome {
            AuthOutcome::Authorized => GateState::Authorized,
            AuthOutcome::Denied(reason) => GateState::Denied(reason.clone()),
        });
        self.finished = true;
    }

    fn set(&self, next: GateState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("biometric challenge interrupted");
            self.set(GateState::Denied(DenialReason::Unknown(
                "authentication interrupted".into(),
            )));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    /// Provider answering every challenge with a fixed result.
    struct Scripted {
        modality: BiometricModality,
        answer: Option<Result<(), PlatformFailure>>,
    }

    impl BiometricProvider for Scripted {
        fn modality(&self) -> BiometricModality {
            self.modality
        }
        fn provider_name(&self) -> &'static str {
            "Scripted"
        }
        fn evaluate(&self, _reason: &str, reply: AuthReply) {
            match self.answer.clone() {
                Some(Ok(())) => reply.succeed(),
                Some(Err(failure)) => reply.fail(failure),
                None => drop(reply),
            }
        }
    }

    fn gate(modality: BiometricModality, answer: Option<Result<(), PlatformFailure>>) -> LocalAuthGate {
        LocalAuthGate::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Scripted { modality, answer }),
        )
    }

    #[test]
    fn starts_idle() {
        assert_eq!(gate(BiometricModality::Face, None).state(), GateState::Idle);
    }

    #[test]
    fn successful_challenge_authorizes() {
        let gate = gate(BiometricModality::Face, Some(Ok(())));
        assert_eq!(gate.authenticate("unlock"), AuthOutcome::Authorized);
        assert_eq!(gate.state(), GateState::Authorized);
    }

    #[test]
    fn no_modality_is_not_available() {
        let gate = gate(BiometricModality::None, Some(Ok(())));
        assert_eq!(
            gate.authenticate("unlock"),
            AuthOutcome::Denied(DenialReason::BiometryNotAvailable)
        );
    }

    #[test]
    fn dropped_reply_is_user_cancelled() {
        let gate = gate(BiometricModality::Fingerprint, None);
        assert_eq!(
            gate.authenticate("unlock"),
            AuthOutcome::Denied(DenialReason::UserCancelled)
        );
    }

    #[test]
    fn platform_failures_map_to_denials() {
        let cases = [
            (PlatformFailure::UserCancel, DenialReason::UserCancelled),
            (PlatformFailure::UserFallback, DenialReason::UserCancelled),
            (PlatformFailure::SystemCancel, DenialReason::UserCancelled),
            (PlatformFailure::NotEnrolled, DenialReason::BiometryNotEnrolled),
            (PlatformFailure::Lockout, DenialReason::BiometryLockout),
            (PlatformFailure::AuthenticationFailed, DenialReason::AuthenticationFailed),
            (PlatformFailure::NotAvailable, DenialReason::BiometryNotAvailable),
            (PlatformFailure::Other("x".into()), DenialReason::Unknown("x".into())),
        ];
        for (failure, expected) in cases {
            let gate = gate(BiometricModality::Face, Some(Err(failure)));
            assert_eq!(gate.authenticate("unlock"), AuthOutcome::Denied(expected));
        }
    }

    #[test]
    fn only_cancellation_is_silent() {
        assert!(DenialReason::UserCancelled.user_message().is_none());
        for reason in [
            DenialReason::AuthenticationFailed,
            DenialReason::BiometryNotAvailable,
            DenialReason::BiometryNotEnrolled,
            DenialReason::BiometryLockout,
            DenialReason::Unknown("code -1000".into()),
        ] {
            let msg = reason.user_message().expect("visible message");
            assert!(!msg.is_empty());
            assert!(!msg.contains("-1000"));
        }
    }

    /// Provider whose first challenge panics; later ones succeed.
    struct PanicsOnce(std::sync::atomic::AtomicBool);

    impl BiometricProvider for PanicsOnce {
        fn modality(&self) -> BiometricModality {
            BiometricModality::Fingerprint
        }
        fn provider_name(&self) -> &'static str {
            "PanicsOnce"
        }
        fn evaluate(&self, _reason: &str, reply: AuthReply) {
            if !self.0.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("platform binding failed");
            }
            reply.succeed();
        }
    }

    #[test]
    fn provider_panic_does_not_wedge_the_gate() {
        let gate = LocalAuthGate::new(
            Arc::new(MemoryStore::new()),
            Arc::new(PanicsOnce(std::sync::atomic::AtomicBool::new(false))),
        );

        let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            gate.authenticate("unlock")
        }));
        assert!(first.is_err());
        assert!(matches!(
            gate.state(),
            GateState::Denied(DenialReason::Unknown(_))
        ));

        assert_eq!(gate.authenticate("unlock"), AuthOutcome::Authorized);
        assert_eq!(gate.state(), GateState::Authorized);
    }

    #[test]
    fn null_provider_denies() {
        let gate = LocalAuthGate::new(Arc::new(MemoryStore::new()), Arc::new(NullBiometricProvider));
        assert!(!gate.capability().is_available());
        assert_eq!(gate.capability().provider_name, "None");
        assert!(!gate.authenticate("unlock").is_authorized());
    }

    #[test]
    fn pin_unset_never_matches() {
        let gate = gate(BiometricModality::None, None);
        assert!(!gate.validate_pin("123456").unwrap());
        assert!(!gate.validate_pin("").unwrap());
        assert!(!gate.is_pin_enabled().unwrap());
    }

    #[test]
    fn pin_set_and_validate() {
        let gate = gate(BiometricModality::None, None);
        gate.set_pin("123456").unwrap();
        assert!(gate.is_pin_enabled().unwrap());
        assert!(gate.validate_pin("123456").unwrap());
        assert!(!gate.validate_pin("000000").unwrap());
    }

    #[test]
    fn set_pin_rejects_bad_format_and_keeps_state() {
        let gate = gate(BiometricModality::None, None);
        assert!(matches!(gate.set_pin("12345"), Err(AuthError::InvalidPin(_))));
        assert!(matches!(gate.set_pin("abcdef"), Err(AuthError::InvalidPin(_))));
        assert!(!gate.is_pin_enabled().unwrap());
    }

    #[test]
    fn clear_pin_disables() {
        let gate = gate(BiometricModality::None, None);
        gate.set_pin("654321").unwrap();
        gate.clear_pin().unwrap();
        assert!(!gate.is_pin_enabled().unwrap());
        assert!(!gate.validate_pin("654321").unwrap());
    }

    #[test]
    fn biometric_policy_is_explicit_and_per_user() {
        let gate = gate(BiometricModality::Face, Some(Ok(())));
        // Hardware being available does not enable anything.
        assert!(!gate.is_biometric_enabled("alice").unwrap());
        gate.authenticate("unlock");
        assert!(!gate.is_biometric_enabled("alice").unwrap());

        gate.set_biometric_enabled(true, "alice").unwrap();
        assert!(gate.is_biometric_enabled("alice").unwrap());
        assert!(!gate.is_biometric_enabled("bob").unwrap());
    }

    #[test]
    fn disabling_biometrics_forgets_login() {
        let gate = gate(BiometricModality::Face, None);
        gate.set_biometric_enabled(true, "alice").unwrap();
        gate.remember_login("alice", "alice@example.com").unwrap();
        assert_eq!(
            gate.remembered_login("alice").unwrap().as_deref(),
            Some("alice@example.com")
        );
        gate.set_biometric_enabled(false, "alice").unwrap();
        assert!(gate.remembered_login("alice").unwrap().is_none());
    }
}
