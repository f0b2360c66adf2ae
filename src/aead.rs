//! String encryption using SHA-256 key derivation + AES-256-GCM
//!
//! This is the scheme used for the settings file and for per-server
//! passwords. The key is SHA-256 of the passphrase bytes, with no salt, so the
//! same passphrase always yields the same key.
//!
//! The sealed binary format is:
//! - nonce: 12 bytes
//! - ciphertext: variable length, followed by the 16-byte GCM tag
//!
//! Encrypted strings are the standard base64 encoding of the sealed bytes.
//! Magic-framed strings additionally carry the [`armor::MAGIC`] prefix.

use crate::armor;
use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Length of nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Length of derived key in bytes
pub const KEY_LEN: usize = 32;

/// Alphabet for generated keys and passwords
const PASSWORD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()-_=+[]{}<>?/";

/// Derive a 32-byte key from a passphrase using SHA-256
pub fn derive_key(passphrase: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&Sha256::digest(passphrase));
    key
}

fn cipher(passphrase: &[u8]) -> Result<Aes256Gcm> {
    let key = derive_key(passphrase);
    Aes256Gcm::new_from_slice(&key[..]).map_err(|e| {
        ConanError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::CipherFailure,
            format!("failed to initialize AES-256-GCM: {}", e),
        )
    })
}

/// Seal plaintext with a passphrase using a random nonce
///
/// Returns the binary format: nonce(12) + ciphertext||tag
pub fn seal(passphrase: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.try_fill_bytes(&mut nonce).map_err(|e| {
        ConanError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::RandomFailure,
            "failed to generate nonce",
            e,
        )
    })?;

    seal_deterministic(passphrase, plaintext, &nonce)
}

/// Seal plaintext with a passphrase using the provided nonce
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `seal()` which generates a random nonce.
pub fn seal_deterministic(
    passphrase: &[u8],
    plaintext: &[u8],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let sealed = cipher(passphrase)?
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| {
            ConanError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::CipherFailure,
                format!("encryption failed: {}", e),
            )
        })?;

    let mut output = Vec::with_capacity(NONCE_LEN + sealed.len());
    output.extend_from_slice(nonce);
    output.extend_from_slice(&sealed);
    Ok(output)
}

/// Open bytes produced by [`seal`]
pub fn open(passphrase: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(ConanError::with_kind(
            ErrorCategory::User,
            ErrorKind::ShortCiphertext,
            "ciphertext too short",
        ));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    cipher(passphrase)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| {
            ConanError::with_kind(
                ErrorCategory::User,
                ErrorKind::AuthenticationFailed,
                "corrupt input, tampered-with data, or bad passphrase",
            )
        })
}

fn into_utf8(plaintext: Vec<u8>) -> Result<String> {
    String::from_utf8(plaintext).map_err(|e| {
        ConanError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::InvalidUtf8,
            "decrypted data is not valid UTF-8",
            e,
        )
    })
}

/// Encrypt a string, returning base64 of nonce||ciphertext
///
/// An empty plaintext yields an empty string, which callers treat as
/// "nothing stored" rather than as a ciphertext.
pub fn encrypt(plaintext: &str, passphrase: &str) -> Result<String> {
    if plaintext.is_empty() {
        return Ok(String::new());
    }
    let sealed = seal(passphrase.as_bytes(), plaintext.as_bytes())?;
    Ok(STANDARD.encode(sealed))
}

/// Reverse of [`encrypt`]; an empty input decrypts to an empty string.
pub fn decrypt(encoded: &str, passphrase: &str) -> Result<String> {
    if encoded.is_empty() {
        return Ok(String::new());
    }
    let sealed = armor::decode_base64(encoded)?;
    into_utf8(open(passphrase.as_bytes(), &sealed)?)
}

/// Encrypt a string and frame it with the magic marker.
///
/// Unlike [`encrypt`], an empty plaintext is still sealed so the output is
/// always recognizable as encrypted.
pub fn encrypt_with_magic(plaintext: &str, passphrase: &str) -> Result<String> {
    let sealed = seal(passphrase.as_bytes(), plaintext.as_bytes())?;
    Ok(armor::wrap(&sealed))
}

/// Decrypt a magic-framed string. Fails with `MissingMagic` without
/// attempting decryption if the marker is absent.
pub fn decrypt_with_magic(armored: &str, passphrase: &str) -> Result<String> {
    let sealed = armor::unwrap(armored)?;
    into_utf8(open(passphrase.as_bytes(), &sealed)?)
}

/// Generate a random password drawn uniformly from a fixed alphabet of
/// letters, digits and symbols.
pub fn generate_password(length: usize) -> Result<String> {
    let mut rng = StdRng::from_rng(OsRng).map_err(|e| {
        ConanError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::RandomFailure,
            "failed to seed random generator",
            e,
        )
    })?;
    let alphabet = Uniform::from(0..PASSWORD_CHARSET.len());

    Ok((0..length)
        .map(|_| char::from(PASSWORD_CHARSET[alphabet.sample(&mut rng)]))
        .collect())
}
