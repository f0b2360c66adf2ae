//! Offline half of Gist sync: turning a bound server list into the payload
//! that is uploaded, and a downloaded payload back into the file.
//!
//! The payload is the server list text encrypted with the string codec
//! under the Gist's own `enckey`. Transport is left to the caller.

use crate::aead;
use crate::config::GistConfig;
use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use crate::file_ops;
use std::path::Path;
use tracing::info;

fn sync_error(msg: String) -> ConanError {
    ConanError::with_kind(ErrorCategory::User, ErrorKind::SyncConfig, msg)
}

/// Check that a Gist config is usable for sync.
pub fn validate(gist: &GistConfig) -> Result<()> {
    if gist.enc_key.is_empty() {
        return Err(sync_error(format!("Gist {} has no encryption key set", gist.name)));
    }
    if gist.gist_id.is_empty() {
        return Err(sync_error(format!("Gist {} has no ID set", gist.name)));
    }
    if gist.gist_secret.is_empty() {
        return Err(sync_error(format!("Gist {} has no Secret ID set", gist.name)));
    }
    Ok(())
}

/// Validate every config, stopping at the first bad one.
pub fn validate_all(gists: &[GistConfig]) -> Result<()> {
    gists.iter().try_for_each(validate)
}

fn bound_path(gist: &GistConfig) -> Result<&Path> {
    gist.path.as_deref().ok_or_else(|| {
        sync_error(format!(
            "unable to determine the server list file for Gist {}",
            gist.name
        ))
    })
}

/// Encrypt the bound server list file into an upload payload.
pub fn seal_server_file(gist: &GistConfig) -> Result<String> {
    validate(gist)?;
    let path = bound_path(gist)?;
    let raw = file_ops::read_file(path)?;
    let text = String::from_utf8(raw).map_err(|e| {
        ConanError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::InvalidUtf8,
            format!("server list {} is not valid UTF-8", path.display()),
            e,
        )
    })?;
    aead::encrypt(&text, &gist.enc_key).map_err(|e| {
        let msg = format!("error encrypting servers data for file {}", path.display());
        e.with_context(msg)
    })
}

/// Decrypt a downloaded payload and replace the bound file with it.
///
/// The bound file must already exist; a payload that does not decrypt
/// leaves it untouched.
pub fn restore_server_file(gist: &GistConfig, payload: &str) -> Result<()> {
    validate(gist)?;
    let plain = aead::decrypt(payload.trim(), &gist.enc_key)?;
    let path = bound_path(gist)?;
    if !path.is_file() {
        return Err(ConanError::with_kind(
            ErrorCategory::User,
            ErrorKind::NotFound,
            format!("file does not exist {}", path.display()),
        ));
    }
    file_ops::write_atomic(path, plain.as_bytes())?;
    info!(gist = %gist.name, path = %path.display(), "server list restored from payload");
    Ok(())
}
