//! Archive sealing using scrypt + AES-256-GCM
//!
//! This module implements passphrase-based encryption for configuration
//! backups using:
//! - scrypt (N=2^15, r=8, p=1) for key derivation from passphrase
//! - AES-256-GCM for authenticated encryption
//!
//! The binary format is:
//! - salt: 16 bytes
//! - nonce: 12 bytes
//! - ciphertext: variable length (includes the 16-byte GCM tag)
//!
//! There is no magic marker; sealed archives only travel through explicit
//! import/export paths.

use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use scrypt::{Params, scrypt};
use zeroize::Zeroizing;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Length of derived key in bytes
const KEY_LEN: usize = 32;

/// scrypt N parameter (CPU/memory cost)
const SCRYPT_N: u32 = 32768;

/// scrypt r parameter (block size)
const SCRYPT_R: u32 = 8;

/// scrypt p parameter (parallelization)
const SCRYPT_P: u32 = 1;

/// Derive a 32-byte key from a passphrase and salt using scrypt
fn derive_key(passphrase: &[u8], salt: &[u8; SALT_LEN]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let params = Params::new(SCRYPT_N.ilog2() as u8, SCRYPT_R, SCRYPT_P, KEY_LEN).map_err(|e| {
        ConanError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::ScryptFailure,
            format!("failed to create scrypt params: {}", e),
        )
    })?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt(passphrase, salt, &params, &mut key[..]).map_err(|e| {
        ConanError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::ScryptFailure,
            format!("scrypt key derivation failed: {}", e),
        )
    })?;

    Ok(key)
}

fn cipher(key: &[u8; KEY_LEN]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key).map_err(|e| {
        ConanError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::CipherFailure,
            format!("failed to initialize AES-256-GCM: {}", e),
        )
    })
}

/// Encrypt plaintext with a passphrase using random salt and nonce
///
/// Returns the binary format: salt(16) + nonce(12) + ciphertext(variable)
pub fn encrypt(passphrase: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .and_then(|()| OsRng.try_fill_bytes(&mut nonce))
        .map_err(|e| {
            ConanError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::RandomFailure,
                "failed to generate salt and nonce",
                e,
            )
        })?;

    encrypt_deterministic(passphrase, plaintext, &salt, &nonce)
}

/// Encrypt plaintext with a passphrase using provided salt and nonce
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt()` which generates random salt/nonce.
pub fn encrypt_deterministic(
    passphrase: &[u8],
    plaintext: &[u8],
    salt: &[u8; SALT_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let key = derive_key(passphrase, salt)?;

    let ciphertext = cipher(&key)?
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| {
            ConanError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::CipherFailure,
                format!("encryption failed: {}", e),
            )
        })?;

    let mut output = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    output.extend_from_slice(salt);
    output.extend_from_slice(nonce);
    output.extend_from_slice(&ciphertext);

    Ok(output)
}

/// Decrypt data produced by [`encrypt`] with a passphrase
pub fn decrypt(passphrase: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < SALT_LEN + NONCE_LEN {
        return Err(ConanError::with_kind(
            ErrorCategory::User,
            ErrorKind::ShortCiphertext,
            "input likely truncated; shorter than salt and nonce",
        ));
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&data[..SALT_LEN]);
    let (nonce, ciphertext) = data[SALT_LEN..].split_at(NONCE_LEN);

    let key = derive_key(passphrase, &salt)?;
    cipher(&key)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| {
            ConanError::with_kind(
                ErrorCategory::User,
                ErrorKind::AuthenticationFailed,
                "corrupt input, tampered-with data, or bad passphrase",
            )
        })
}
