//! Per-server password encryption
//!
//! A record's password is encrypted with the string codec from [`crate::aead`].
//! The key is the `enckey` of the Gist config whose name equals the record's
//! source file base name, or the global `enckey` when there is no such Gist
//! or its key is empty.

use crate::aead;
use crate::config::AppSettings;
use crate::error::Result;
use crate::servers::Server;
use tracing::warn;
use zeroize::Zeroizing;

/// Key material needed to encrypt and decrypt server passwords.
#[derive(Clone)]
pub struct CredentialCodec {
    global_key: Zeroizing<String>,
    /// (source name, key) for every Gist with its own key.
    source_keys: Vec<(String, Zeroizing<String>)>,
}

impl std::fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCodec")
            .field(
                "sources",
                &self.source_keys.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl CredentialCodec {
    pub fn new(global_key: impl Into<String>) -> Self {
        Self {
            global_key: Zeroizing::new(global_key.into()),
            source_keys: Vec::new(),
        }
    }

    /// Use `key` for records loaded from the file named `source_name`.
    pub fn with_source_key(mut self, source_name: impl Into<String>, key: impl Into<String>) -> Self {
        self.source_keys
            .push((source_name.into(), Zeroizing::new(key.into())));
        self
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        settings
            .gists
            .iter()
            .filter(|g| !g.enc_key.is_empty())
            .fold(Self::new(settings.enc_key.clone()), |codec, g| {
                codec.with_source_key(g.name.clone(), g.enc_key.clone())
            })
    }

    /// Key that applies to records from `source_name`.
    pub fn key_for(&self, source_name: &str) -> &str {
        self.source_keys
            .iter()
            .find(|(name, key)| name == source_name && !key.is_empty())
            .map(|(_, key)| key.as_str())
            .unwrap_or(self.global_key.as_str())
    }

    pub fn global_key(&self) -> &str {
        &self.global_key
    }

    /// Encrypt `plaintext` for storage in `server`. An empty password stays
    /// empty. Encryption failures propagate; the plaintext is never stored
    /// as a fallback.
    pub fn encrypt_password(&self, server: &Server, plaintext: &str) -> Result<String> {
        aead::encrypt(plaintext, self.key_for(&server.source_name))
    }

    /// Decrypt the stored password of `server`.
    ///
    /// Any failure (wrong key, corrupt data) yields an empty string and a
    /// warning.
    pub fn decrypt_password(&self, server: &Server) -> Zeroizing<String> {
        match aead::decrypt(&server.password, self.key_for(&server.source_name)) {
            Ok(plain) => Zeroizing::new(plain),
            Err(e) => {
                warn!(host = %server.host, source = %server.source_name, error = %e, "password decryption failed");
                Zeroizing::new(String::new())
            }
        }
    }

    /// Encrypt `plaintext` and store it in `server.password`.
    pub fn set_password(&self, server: &mut Server, plaintext: &str) -> Result<()> {
        server.password = self.encrypt_password(server, plaintext)?;
        Ok(())
    }
}
