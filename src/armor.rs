//! Magic-prefixed armoring for encrypted files
//!
//! An armored blob is the fixed marker `HMACENCv1:` followed by the standard
//! (padded) base64 encoding of the sealed bytes. The marker alone decides
//! whether a file is encrypted, so detection never needs the passphrase.

use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use base64::{Engine, engine::general_purpose::STANDARD};

/// Marker prepended to every armored blob. There is no other version field.
pub const MAGIC: &str = "HMACENCv1:";

/// True if `data` starts with the magic marker.
pub fn is_armored(data: &[u8]) -> bool {
    data.starts_with(MAGIC.as_bytes())
}

/// Wrap sealed bytes in armor, returning the armored string
pub fn wrap(body: &[u8]) -> String {
    format!("{}{}", MAGIC, STANDARD.encode(body))
}

/// Unwrap an armored string, returning the sealed bytes
///
/// Fails with `MissingMagic` before looking at the payload if the marker is
/// absent.
pub fn unwrap(armored: &str) -> Result<Vec<u8>> {
    let Some(encoded) = armored.strip_prefix(MAGIC) else {
        return Err(ConanError::with_kind(
            ErrorCategory::User,
            ErrorKind::MissingMagic,
            "missing magic prefix; not encrypted by this scheme",
        ));
    };
    decode_base64(encoded)
}

/// Standard base64 decoding that skips line breaks, so armored files that
/// were wrapped or gained a trailing newline in an editor still decode.
pub(crate) fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    STANDARD.decode(compact.as_bytes()).map_err(|e| {
        ConanError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Base64Decode,
            format!("base64 decoding failed: {}", e),
            e,
        )
    })
}
