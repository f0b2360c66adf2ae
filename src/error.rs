use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example due to a user error - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The user provided invalid input (a wrong passphrase, a missing file,
    /// a malformed server list) or asked for something that does not exist.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A file is encrypted but no passphrase was configured.
    PassphraseRequired,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Two passphrase entries that had to agree did not.
    PassphraseMismatch,
    /// AEAD tag verification failed: wrong passphrase, tampering or corruption.
    AuthenticationFailed,
    /// Input lacks the magic marker and was not encrypted by this scheme.
    MissingMagic,
    /// Ciphertext is shorter than the framing it must contain.
    ShortCiphertext,
    /// Base64 decoding of an encrypted payload or a stored blob failed.
    Base64Decode,
    /// Decrypted or stored bytes were expected to be UTF-8 and are not.
    InvalidUtf8,
    /// A settings accessor asked for a key that does not exist.
    MissingKey,
    /// A stored settings value could not be converted to the requested type.
    InvalidValue,
    /// The settings file could not be parsed as INI.
    SettingsFormat,
    /// A server list file could not be parsed or rendered as YAML.
    ServerListFormat,
    /// A backup archive is not a readable ZIP stream.
    ArchiveFormat,
    /// An archive entry would be extracted outside the destination directory.
    PathTraversal,
    /// A named file or directory could not be found.
    NotFound,
    /// A server record identifier is not present in the repository.
    UnknownRecord,
    /// A Gist sync configuration is incomplete or not bound to a file.
    SyncConfig,
    /// Low-level scrypt key derivation failed.
    ScryptFailure,
    /// AES-GCM failed to initialize or seal data.
    CipherFailure,
    /// The operating system random source failed.
    RandomFailure,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct ConanError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl ConanError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// The plain message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// True if this error is tagged with `kind`.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == Some(kind)
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    pub(crate) fn passphrase_required(what: &str) -> Self {
        Self::with_kind(
            ErrorCategory::User,
            ErrorKind::PassphraseRequired,
            format!("{} is encrypted, but no passphrase provided", what),
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ConanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_kind_and_category() {
        let err = ConanError::with_kind(
            ErrorCategory::User,
            ErrorKind::AuthenticationFailed,
            "bad passphrase",
        )
        .with_context("failed to load settings");

        assert_eq!(err.to_string(), "failed to load settings");
        assert_eq!(err.category, ErrorCategory::User);
        assert!(err.is(ErrorKind::AuthenticationFailed));
        assert_eq!(
            err.source_error().map(|s| s.to_string()).as_deref(),
            Some("bad passphrase")
        );
    }

    #[test]
    fn test_plain_error_has_no_kind() {
        let err = ConanError::new(ErrorCategory::Internal, "boom");
        assert_eq!(err.kind, None);
        assert!(err.source_error().is_none());
        assert_eq!(err.message(), "boom");
    }
}
