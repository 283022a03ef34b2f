//! AES-256-CBC sealed payloads with PKCS#7 padding.
//!
//! This module provides:
//! - [`encrypt`] — encrypt plaintext under a fresh random IV, returning [`SealedPayload`]
//! - [`decrypt`] — decrypt a [`SealedPayload`], returning [`SecretBuffer`]
//! - [`SealedPayload`] — IV + ciphertext container (serializable)
//!
//! CBC carries no integrity check. It is kept as the default wire format so
//! payloads written by earlier clients stay readable; see [`crate::aead`] for
//! the authenticated alternative.

use crate::error::{CryptoError, FailureCode};
use crate::memory::SecretBuffer;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// IV length in bytes (one AES block).
pub const IV_LEN: usize = 16;

/// AES block length in bytes.
pub const BLOCK_LEN: usize = 16;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Encrypted blob — public IV followed by ciphertext.
///
/// Wire format: `iv (16 bytes) || ciphertext (multiple of 16 bytes)`.
#[must_use = "encrypted data must be stored or transmitted"]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// 128-bit random IV, fresh per encryption.
    pub iv: [u8; IV_LEN],
    /// PKCS#7-padded ciphertext.
    pub ciphertext: Vec<u8>,
}

impl SealedPayload {
    /// Serialize to wire format: `iv || ciphertext`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_LEN.saturating_add(self.ciphertext.len()));
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Deserialize from wire format: `iv || ciphertext`.
    ///
    /// Only the IV length is checked here; block alignment is reported by
    /// [`decrypt`] as a crypto failure.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::MalformedInput` if the input is shorter than 16 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let Some((iv_bytes, ciphertext)) = bytes.split_first_chunk::<IV_LEN>() else {
            return Err(CryptoError::MalformedInput(format!(
                "sealed payload too short: {} bytes (minimum {IV_LEN})",
                bytes.len()
            )));
        };
        Ok(Self {
            iv: *iv_bytes,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Core encryption
// ---------------------------------------------------------------------------

/// Encrypt plaintext with AES-256-CBC/PKCS#7 under a random IV from `OsRng`.
///
/// # Errors
///
/// Returns `CryptoError::CryptoFailure` if the key is not exactly 32 bytes
/// or the CSPRNG fails.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<SealedPayload, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::CryptoFailure(FailureCode::InvalidKeyLength));
    }

    let mut iv = [0u8; IV_LEN];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|_| CryptoError::CryptoFailure(FailureCode::RandomSource))?;

    let cipher = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|_| CryptoError::CryptoFailure(FailureCode::InvalidKeyLength))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    Ok(SealedPayload { iv, ciphertext })
}

/// Decrypt an AES-256-CBC/PKCS#7 sealed payload.
///
/// A wrong key is only detected when the padding fails to verify, which
/// happens with high but not absolute probability.
///
/// # Errors
///
/// Returns `CryptoError::CryptoFailure` if the key length is wrong, the
/// ciphertext is not block aligned, or the padding does not verify.
pub fn decrypt(sealed: &SealedPayload, key: &[u8]) -> Result<SecretBuffer, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::CryptoFailure(FailureCode::InvalidKeyLength));
    }
    if sealed.ciphertext.is_empty() || sealed.ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::CryptoFailure(FailureCode::NotBlockAligned));
    }

    let cipher = Aes256CbcDec::new_from_slices(key, &sealed.iv)
        .map_err(|_| CryptoError::CryptoFailure(FailureCode::InvalidIvLength))?;

    let mut buf = sealed.ciphertext.clone();
    let unpadded = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map(<[u8]>::len);
    match unpadded {
        Ok(len) => {
            if let Some(padding) = buf.get_mut(len..) {
                padding.zeroize();
            }
            buf.truncate(len);
            Ok(SecretBuffer::from_vec(buf))
        }
        Err(_) => {
            buf.zeroize();
            Err(CryptoError::CryptoFailure(FailureCode::BadPadding))
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
