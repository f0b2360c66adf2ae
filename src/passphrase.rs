//! Passphrase reading functionality

use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use std::io::{self, BufRead, BufReader, IsTerminal, Read, Write};
use zeroize::Zeroizing;

/// Trait for reading passphrases from various sources
pub trait PassphraseReader {
    /// Read one passphrase.
    ///
    /// Returns the passphrase wrapped in `Zeroizing` to ensure it is securely
    /// wiped from memory when dropped.
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>>;
}

/// Returns a fixed passphrase, for tests and non-interactive callers
pub struct ConstantPassphraseReader {
    passphrase: Zeroizing<String>,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        Ok(self.passphrase.clone())
    }
}

/// Reads one passphrase per line from any io::Read source
///
/// Each call consumes a single line; the trailing line terminator is not
/// part of the passphrase. This lets a script pipe several passphrases (for
/// example the settings passphrase followed by a backup password) on stdin.
pub struct ReaderPassphraseReader {
    reader: BufReader<Box<dyn Read>>,
}

impl ReaderPassphraseReader {
    pub fn new(reader: Box<dyn Read>) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }
}

impl PassphraseReader for ReaderPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        let mut line = Zeroizing::new(String::new());
        let read = self.reader.read_line(&mut line).map_err(|e| {
            ConanError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("error reading passphrase: {}", e),
                e,
            )
        })?;
        if read == 0 {
            return Err(ConanError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "no passphrase available on input",
            ));
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(line)
    }
}

/// Reads passphrase from terminal with no echo
pub struct TerminalPassphraseReader {
    prompt: String,
}

impl TerminalPassphraseReader {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Default for TerminalPassphraseReader {
    fn default() -> Self {
        Self::new("Passphrase (conan): ")
    }
}

impl PassphraseReader for TerminalPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        if !io::stdin().is_terminal() {
            return Err(ConanError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "cannot read passphrase from terminal - stdin is not a terminal",
            ));
        }

        io::stderr()
            .write_all(self.prompt.as_bytes())
            .and_then(|()| io::stderr().flush())
            .map_err(|e| {
                ConanError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to write prompt: {}", e),
                    e,
                )
            })?;

        // Read password *without echo*
        let passphrase = rpassword::read_password().map_err(|e| {
            ConanError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failure reading passphrase: {}", e),
                e,
            )
        })?;

        Ok(Zeroizing::new(passphrase))
    }
}

/// Asks the upstream reader twice and only accepts matching entries
///
/// Used when choosing a new passphrase (backup export, encrypting the
/// settings file) where a typo would lock the user out.
pub struct ConfirmingPassphraseReader<R> {
    upstream: R,
}

impl<R: PassphraseReader> ConfirmingPassphraseReader<R> {
    pub fn new(upstream: R) -> Self {
        Self { upstream }
    }
}

impl<R: PassphraseReader> PassphraseReader for ConfirmingPassphraseReader<R> {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        let first = self.upstream.read_passphrase()?;
        let second = self.upstream.read_passphrase()?;
        if *first != *second {
            return Err(ConanError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseMismatch,
                "passphrases do not match",
            ));
        }
        Ok(first)
    }
}

impl<R: PassphraseReader + ?Sized> PassphraseReader for &mut R {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        (**self).read_passphrase()
    }
}

impl<R: PassphraseReader + ?Sized> PassphraseReader for Box<R> {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        (**self).read_passphrase()
    }
}
