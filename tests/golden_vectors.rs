//! Golden test vector validation
//!
//! Vectors fix the nonce (and salt, for archives) so encryption output can
//! be compared byte for byte with files written by other implementations.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct GoldenVector {
    /// `string`, `magic` or `archive`
    scheme: String,
    plaintext: String,
    ciphertext: String,
    passphrase: String,
    nonce: String,
    salt: String,
    comment: String,
}

fn load_golden_vectors() -> serde_json::Result<Vec<GoldenVector>> {
    let json_data = include_str!("../testdata/golden-vectors.json");
    serde_json::from_str(json_data)
}

/// Encrypt deterministically and decrypt back; returns a failure
/// description for the first step that does not match.
fn check_vector(vector: &GoldenVector) -> Result<(), String> {
    let plaintext = BASE64_STANDARD
        .decode(&vector.plaintext)
        .expect("failed to decode plaintext");
    let passphrase = BASE64_STANDARD
        .decode(&vector.passphrase)
        .expect("failed to decode passphrase");
    let nonce: [u8; 12] = BASE64_STANDARD
        .decode(&vector.nonce)
        .expect("failed to decode nonce")
        .try_into()
        .map_err(|n: Vec<u8>| format!("nonce must be 12 bytes, got {}", n.len()))?;

    match vector.scheme.as_str() {
        "string" | "magic" => {
            let sealed = conan::aead::seal_deterministic(&passphrase, &plaintext, &nonce)
                .map_err(|e| format!("failed to encrypt - {}", e))?;
            let encoded = if vector.scheme == "magic" {
                conan::armor::wrap(&sealed)
            } else {
                BASE64_STANDARD.encode(&sealed)
            };
            if encoded != vector.ciphertext {
                return Err(format!(
                    "ciphertext mismatch\n  Expected: {}\n  Actual:   {}",
                    vector.ciphertext, encoded
                ));
            }

            let passphrase = String::from_utf8(passphrase).map_err(|e| e.to_string())?;
            let decrypted = if vector.scheme == "magic" {
                conan::aead::decrypt_with_magic(&vector.ciphertext, &passphrase)
            } else {
                conan::aead::decrypt(&vector.ciphertext, &passphrase)
            }
            .map_err(|e| format!("failed to decrypt - {}", e))?;
            if decrypted.as_bytes() != plaintext.as_slice() {
                return Err("plaintext mismatch".to_owned());
            }
        }
        "archive" => {
            let salt: [u8; 16] = BASE64_STANDARD
                .decode(&vector.salt)
                .expect("failed to decode salt")
                .try_into()
                .map_err(|s: Vec<u8>| format!("salt must be 16 bytes, got {}", s.len()))?;
            let sealed =
                conan::secretcrypt::encrypt_deterministic(&passphrase, &plaintext, &salt, &nonce)
                    .map_err(|e| format!("failed to encrypt - {}", e))?;
            let encoded = BASE64_STANDARD.encode(&sealed);
            if encoded != vector.ciphertext {
                return Err(format!(
                    "ciphertext mismatch\n  Expected: {}\n  Actual:   {}",
                    vector.ciphertext, encoded
                ));
            }

            let decrypted = conan::secretcrypt::decrypt(&passphrase, &sealed)
                .map_err(|e| format!("failed to decrypt - {}", e))?;
            if decrypted != plaintext {
                return Err(format!(
                    "plaintext mismatch (expected {} bytes, got {})",
                    plaintext.len(),
                    decrypted.len()
                ));
            }
        }
        other => return Err(format!("unknown scheme {}", other)),
    }
    Ok(())
}

/// Run golden vector tests on specified schemes
///
/// If `schemes` is None, tests all vectors.
fn run_golden_vector_tests(schemes: Option<&[&str]>) {
    let vectors = load_golden_vectors().expect("failed to load golden vectors");

    let mut passed = 0;
    let mut failed = 0;

    for (i, vector) in vectors.iter().enumerate() {
        if schemes.is_some_and(|s| !s.contains(&vector.scheme.as_str())) {
            continue;
        }
        match check_vector(vector) {
            Ok(()) => passed += 1,
            Err(why) => {
                eprintln!("Vector {}: FAILED - {}", i, why);
                eprintln!("  Comment: {}", vector.comment);
                failed += 1;
            }
        }
    }

    println!(
        "Results: {} passed, {} failed out of {} total",
        passed,
        failed,
        passed + failed
    );

    assert_eq!(failed, 0, "Some golden vectors failed validation");
    assert!(passed > 0, "No golden vectors were tested");
}

#[test]
fn test_string_codec_vectors() {
    run_golden_vector_tests(Some(&["string", "magic"]));
}

/// Archive vectors run scrypt once per vector.
#[test]
fn test_archive_vectors() {
    run_golden_vector_tests(Some(&["archive"]));
}
