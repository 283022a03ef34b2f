//! AES-256-GCM sealed payloads — the authenticated alternative to CBC.
//!
//! Wire format: `nonce (12 bytes) || ciphertext (variable) || tag (16 bytes)`.
//!
//! Unlike [`crate::symmetric`], any modification of the nonce, ciphertext
//! or tag, and any decryption under a different key, is always rejected.

use crate::error::{CryptoError, FailureCode};
use crate::memory::SecretBuffer;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// AES-256-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Minimum valid serialized length: nonce + empty ciphertext + tag.
const MIN_SEALED_LEN: usize = NONCE_LEN + TAG_LEN;

/// Authenticated ciphertext container — nonce + ciphertext + tag.
#[must_use = "encrypted data must be stored or transmitted"]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AeadPayload {
    /// 96-bit random nonce, unique per encryption.
    pub nonce: [u8; NONCE_LEN],
    /// Encrypted data (same length as the plaintext).
    pub ciphertext: Vec<u8>,
    /// 128-bit authentication tag.
    pub tag: [u8; TAG_LEN],
}

impl AeadPayload {
    /// Serialize to wire format: `nonce || ciphertext || tag`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let capacity = MIN_SEALED_LEN.saturating_add(self.ciphertext.len());
        let mut out = Vec::with_capacity(capacity);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Deserialize from wire format: `nonce || ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::MalformedInput` if the input is shorter than 28 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let too_short = || {
            CryptoError::MalformedInput(format!(
                "sealed payload too short: {} bytes (minimum {MIN_SEALED_LEN})",
                bytes.len()
            ))
        };
        let (nonce, rest) = bytes
            .split_first_chunk::<NONCE_LEN>()
            .ok_or_else(too_short)?;
        let (ciphertext, tag) = rest.split_last_chunk::<TAG_LEN>().ok_or_else(too_short)?;

        Ok(Self {
            nonce: *nonce,
            ciphertext: ciphertext.to_vec(),
            tag: *tag,
        })
    }
}

fn sealing_key(key: &[u8]) -> Result<aead::LessSafeKey, CryptoError> {
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| CryptoError::CryptoFailure(FailureCode::InvalidKeyLength))?;
    Ok(aead::LessSafeKey::new(unbound))
}

/// Encrypt plaintext using AES-256-GCM with a random 96-bit nonce.
///
/// # Errors
///
/// Returns `CryptoError::CryptoFailure` if the key is not 32 bytes, the
/// CSPRNG fails, or sealing fails.
pub fn seal(plaintext: &[u8], key: &[u8]) -> Result<AeadPayload, CryptoError> {
    let key = sealing_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|_| CryptoError::CryptoFailure(FailureCode::RandomSource))?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    let Ok(tag) = key.seal_in_place_separate_tag(nonce, aead::Aad::empty(), &mut in_out) else {
        in_out.zeroize();
        return Err(CryptoError::CryptoFailure(FailureCode::SealFailed));
    };

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_ref());

    Ok(AeadPayload {
        nonce: nonce_bytes,
        ciphertext: in_out,
        tag: tag_bytes,
    })
}

/// Decrypt and authenticate an AES-256-GCM payload.
///
/// # Errors
///
/// Returns `CryptoError::CryptoFailure(TagMismatch)` if authentication fails
/// (tampered data or wrong key), or `InvalidKeyLength` for a bad key.
pub fn open(sealed: &AeadPayload, key: &[u8]) -> Result<SecretBuffer, CryptoError> {
    let key = sealing_key(key)?;
    let nonce = aead::Nonce::assume_unique_for_key(sealed.nonce);

    let mut ct_tag = Vec::with_capacity(sealed.ciphertext.len().saturating_add(TAG_LEN));
    ct_tag.extend_from_slice(&sealed.ciphertext);
    ct_tag.extend_from_slice(&sealed.tag);

    let opened = key
        .open_in_place(nonce, aead::Aad::empty(), &mut ct_tag)
        .map(|plaintext| plaintext.len());
    let Ok(len) = opened else {
        ct_tag.zeroize();
        return Err(CryptoError::CryptoFailure(FailureCode::TagMismatch));
    };
    ct_tag.truncate(len);
    Ok(SecretBuffer::from_vec(ct_tag))
}
