//! PIN format rules and constant-time comparison.

use crate::error::CryptoError;

/// Required PIN length in characters.
pub const PIN_LEN: usize = 6;

/// Check that `pin` is exactly six ASCII digits.
///
/// # Errors
///
/// Returns `CryptoError::InvalidPin` describing the first violated rule.
pub fn validate_pin_format(pin: &str) -> Result<(), CryptoError> {
    if pin.len() != PIN_LEN {
        return Err(CryptoError::InvalidPin(format!(
            "PIN must be exactly {PIN_LEN} digits"
        )));
    }
    if !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CryptoError::InvalidPin("PIN must contain only digits".into()));
    }
    Ok(())
}

/// Constant-time comparison of a candidate PIN against the stored one.
///
/// Uses bitwise OR accumulation to avoid short-circuit timing leaks. The
/// early return on length mismatch only reveals the length, which is public.
#[must_use]
pub fn pins_match(stored: &[u8], candidate: &[u8]) -> bool {
    if stored.len() != candidate.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in stored.iter().zip(candidate.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
