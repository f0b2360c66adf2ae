//! Encrypted INI settings store
//!
//! The settings file is either plain INI text or the armored form
//! `HMACENCv1:` + base64(nonce || AES-GCM(ini text)) with the key derived from
//! the settings passphrase (see [`crate::aead`]).
//!
//! The in-memory tree is never trusted across calls: every accessor and
//! mutator reloads the file first, and every mutator saves immediately. There
//! is no locking, so two writers racing on the same file can still lose an
//! update; the reload only narrows the window.

use crate::aead;
use crate::armor;
use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use crate::file_ops;
use base64::{Engine, engine::general_purpose::STANDARD};
use ini::{Ini, ParseOption};
use std::borrow::Cow;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use zeroize::Zeroizing;

/// A value accepted by [`SettingsStore::set`], rendered to its canonical
/// string form before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl Value {
    /// Canonical text stored in the INI file: booleans as `true`/`false`,
    /// integers in decimal, floats fixed-point with six decimals, byte blobs
    /// as standard base64.
    pub fn render(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{:.6}", f),
            Value::Bytes(b) => STANDARD.encode(b),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Str(v.clone())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! int_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

int_value!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

/// Settings file handle. See the module documentation for the reload
/// discipline.
pub struct SettingsStore {
    path: PathBuf,
    passphrase: Option<Zeroizing<String>>,
    ini: Ini,
}

impl SettingsStore {
    /// Open the settings file at `path`.
    ///
    /// A missing file is treated as empty; it is created by the first write.
    /// Fails with `PassphraseRequired` if the file is encrypted and no
    /// (non-empty) passphrase is given.
    pub fn open(path: impl Into<PathBuf>, passphrase: Option<Zeroizing<String>>) -> Result<Self> {
        let mut store = Self {
            path: path.into(),
            passphrase: passphrase.filter(|p| !p.is_empty()),
            ini: Ini::new(),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the passphrase used to read and write an encrypted file.
    pub fn set_passphrase(&mut self, passphrase: Option<Zeroizing<String>>) {
        self.passphrase = passphrase.filter(|p| !p.is_empty());
    }

    /// Sniff the file on disk for the magic marker.
    pub fn is_encrypted(&self) -> Result<bool> {
        is_encrypted_ini(&self.path)
    }

    /// Re-read the file from disk, replacing the in-memory tree.
    pub fn reload(&mut self) -> Result<()> {
        let encrypted = self.is_encrypted()?;
        let passphrase = self.required_passphrase(encrypted)?;
        self.ini = read_ini(&self.path, passphrase)?;
        debug!(path = %self.path.display(), encrypted, "settings reloaded");
        Ok(())
    }

    /// Reload and return the current tree, for callers that need to walk
    /// every section.
    pub fn current(&mut self) -> Result<&Ini> {
        self.reload()?;
        Ok(&self.ini)
    }

    pub fn get_string(&mut self, section: &str, key: &str) -> Result<String> {
        self.reload()?;
        self.ini
            .get_from(Some(section), key)
            .map(str::to_owned)
            .ok_or_else(|| missing_key(section, key))
    }

    pub fn get_int(&mut self, section: &str, key: &str) -> Result<i64> {
        let raw = self.get_string(section, key)?;
        raw.trim()
            .parse()
            .map_err(|e| invalid_value(section, key, "an integer", e))
    }

    /// Accepts `true/false`, `1/0`, `yes/no`, `on/off` (any case).
    pub fn get_bool(&mut self, section: &str, key: &str) -> Result<bool> {
        let raw = self.get_string(section, key)?;
        parse_bool(&raw).ok_or_else(|| {
            ConanError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidValue,
                format!("value of [{}]{} is not a boolean: {:?}", section, key, raw),
            )
        })
    }

    pub fn get_float(&mut self, section: &str, key: &str) -> Result<f64> {
        let raw = self.get_string(section, key)?;
        raw.trim()
            .parse()
            .map_err(|e| invalid_value(section, key, "a number", e))
    }

    /// Base64-decodes the stored string.
    pub fn get_bytes(&mut self, section: &str, key: &str) -> Result<Vec<u8>> {
        let raw = self.get_string(section, key)?;
        armor::decode_base64(&raw)
            .map_err(|e| e.with_context(format!("value of [{}]{} is not base64", section, key)))
    }

    /// Reload, set one key, save.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<Value>) -> Result<()> {
        self.set_many(section, [(key, value.into())])
    }

    /// Reload, set every key of `values` in `section`, save once.
    pub fn set_many<I, K, V>(&mut self, section: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.reload()
            .map_err(|e| e.with_context("refusing to modify settings that could not be reloaded"))?;
        {
            let mut setter = self.ini.with_section(Some(section));
            for (key, value) in values {
                setter.set(key, value.into().render());
            }
        }
        self.save()
    }

    /// Reload, delete a key if present, save.
    pub fn remove_key(&mut self, section: &str, key: &str) -> Result<bool> {
        self.reload()?;
        let removed = self.ini.delete_from(Some(section), key).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn has_section(&mut self, section: &str) -> Result<bool> {
        self.reload()?;
        Ok(self.ini.section(Some(section)).is_some())
    }

    pub fn has_key(&mut self, section: &str, key: &str) -> Result<bool> {
        self.reload()?;
        Ok(self
            .ini
            .section(Some(section))
            .is_some_and(|props| props.contains_key(key)))
    }

    /// Rewrite the file in encrypted form under `passphrase`, which becomes
    /// the store's passphrase.
    pub fn encrypt_with(&mut self, passphrase: Zeroizing<String>) -> Result<()> {
        self.reload()?;
        save_encrypted_ini(&self.ini, &self.path, &passphrase)?;
        self.passphrase = Some(passphrase);
        Ok(())
    }

    /// Rewrite an encrypted file as plain INI text.
    pub fn decrypt_to_plain(&mut self) -> Result<()> {
        self.reload()?;
        file_ops::write_atomic(&self.path, render_ini(&self.ini)?.as_bytes())?;
        Ok(())
    }

    /// Persist the tree, keeping whatever form (plain or encrypted) the file
    /// on disk currently has.
    fn save(&self) -> Result<()> {
        let encrypted = self.is_encrypted()?;
        match self.required_passphrase(encrypted)? {
            Some(passphrase) => save_encrypted_ini(&self.ini, &self.path, passphrase),
            None => file_ops::write_atomic(&self.path, render_ini(&self.ini)?.as_bytes()),
        }
    }

    fn required_passphrase(&self, encrypted: bool) -> Result<Option<&str>> {
        if !encrypted {
            return Ok(None);
        }
        match &self.passphrase {
            Some(p) => Ok(Some(p.as_str())),
            None => Err(ConanError::passphrase_required("settings file")),
        }
    }
}

/// True if the file at `path` starts with the magic marker. A missing file
/// is not encrypted.
pub fn is_encrypted_ini(path: &Path) -> Result<bool> {
    match std::fs::read(path) {
        Ok(raw) => Ok(armor::is_armored(&raw)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(file_ops::read_error(path, e)),
    }
}

/// Read and parse `path`, decrypting it first if it carries the marker.
/// Plain files load as-is regardless of `passphrase`.
pub fn load_encrypted_ini(path: &Path, passphrase: &str) -> Result<Ini> {
    let raw = file_ops::read_file(path)?;
    parse_ini_bytes(path, &raw, Some(passphrase))
}

/// Render `ini`, encrypt it under `passphrase` and atomically write the
/// armored text to `path`.
pub fn save_encrypted_ini(ini: &Ini, path: &Path, passphrase: &str) -> Result<()> {
    let text = render_ini(ini)?;
    let armored = aead::encrypt_with_magic(&text, passphrase)
        .map_err(|e| e.with_context("failed to encrypt settings"))?;
    file_ops::write_atomic(path, armored.as_bytes())
}

fn read_ini(path: &Path, passphrase: Option<&str>) -> Result<Ini> {
    match std::fs::read(path) {
        Ok(raw) => parse_ini_bytes(path, &raw, passphrase),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Ini::new()),
        Err(e) => Err(file_ops::read_error(path, e)),
    }
}

fn parse_ini_bytes(path: &Path, raw: &[u8], passphrase: Option<&str>) -> Result<Ini> {
    let text = std::str::from_utf8(raw).map_err(|e| {
        ConanError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::InvalidUtf8,
            format!("settings file {} is not valid UTF-8", path.display()),
            e,
        )
    })?;

    let decrypted;
    let content = if armor::is_armored(raw) {
        let passphrase = passphrase.ok_or_else(|| ConanError::passphrase_required("settings file"))?;
        decrypted = Zeroizing::new(
            aead::decrypt_with_magic(text, passphrase)
                .map_err(|e| e.with_context(format!("failed to decrypt {}", path.display())))?,
        );
        decrypted.as_str()
    } else {
        text
    };

    let option = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let parsed = Ini::load_from_str_opt(content, option).map_err(|e| {
        ConanError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::SettingsFormat,
            format!("failed to parse {}: {}", path.display(), e),
            e,
        )
    })?;

    let mut ini = Ini::new();
    for (section, props) in parsed.iter() {
        let mut setter = ini.with_section(section);
        for (key, value) in props.iter() {
            setter.set(key, unquote_value(value));
        }
    }
    Ok(ini)
}

/// Strip the quoting forms settings files use around values:
/// `"""…"""`, `` `…` ``, `"…"` and `'…'`.
fn unquote_value(raw: &str) -> &str {
    for quote in ["\"\"\"", "`", "\"", "'"] {
        if raw.len() >= 2 * quote.len() && raw.starts_with(quote) && raw.ends_with(quote) {
            return &raw[quote.len()..raw.len() - quote.len()];
        }
    }
    raw
}

/// Inverse of [`unquote_value`]: backticks around values holding a comment
/// character or a quote, triple quotes when the value itself has a backtick,
/// double quotes to keep surrounding whitespace.
fn quote_value(value: &str) -> Cow<'_, str> {
    if value.contains('`') {
        Cow::Owned(format!("\"\"\"{}\"\"\"", value))
    } else if value.contains(['#', ';', '"', '\'']) {
        Cow::Owned(format!("`{}`", value))
    } else if value.trim() != value {
        Cow::Owned(format!("\"{}\"", value))
    } else {
        Cow::Borrowed(value)
    }
}

fn render_ini(ini: &Ini) -> Result<String> {
    let mut text = String::new();
    for (section, props) in ini.iter() {
        if section.is_none() && props.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push('\n');
        }
        if let Some(name) = section {
            text.push_str(&format!("[{}]\n", name));
        }
        for (key, value) in props.iter() {
            if value.contains(['\n', '\r']) {
                return Err(ConanError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::InvalidValue,
                    format!("value of [{}]{} spans several lines", section.unwrap_or_default(), key),
                ));
            }
            text.push_str(&format!("{}={}\n", key, quote_value(value)));
        }
    }
    Ok(text)
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "t" | "y" => Some(true),
        "false" | "0" | "no" | "off" | "f" | "n" => Some(false),
        _ => None,
    }
}

fn missing_key(section: &str, key: &str) -> ConanError {
    ConanError::with_kind(
        ErrorCategory::User,
        ErrorKind::MissingKey,
        format!("missing key: [{}]{}", section, key),
    )
}

fn invalid_value(
    section: &str,
    key: &str,
    expected: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> ConanError {
    ConanError::with_kind_and_source(
        ErrorCategory::User,
        ErrorKind::InvalidValue,
        format!("value of [{}]{} is not {}", section, key, expected),
        source,
    )
}
