//! Server list files: YAML model, discovery, load and atomic save

use crate::aead;
use crate::config::AppSettings;
use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use crate::file_ops;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connection protocol of a server record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerType {
    #[default]
    #[serde(rename = "SSH")]
    Ssh,
    #[serde(rename = "RDP")]
    Rdp,
    #[serde(rename = "VNC")]
    Vnc,
    #[serde(rename = "Telnet")]
    Telnet,
    #[serde(rename = "Serial")]
    Serial,
    #[serde(rename = "WINBOX")]
    Winbox,
}

impl ServerType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerType::Ssh => "SSH",
            ServerType::Rdp => "RDP",
            ServerType::Vnc => "VNC",
            ServerType::Telnet => "Telnet",
            ServerType::Serial => "Serial",
            ServerType::Winbox => "WINBOX",
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the last reachability probe. Never written to disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Availability {
    #[default]
    Unknown,
    Available,
    Unavailable,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Availability::Unknown => "",
            Availability::Available => "available",
            Availability::Unavailable => "unavailable",
        })
    }
}

/// One entry of a server list file.
///
/// `id`, `source_path`, `source_name` and `availability` exist only at
/// runtime; they are assigned on load and never serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    #[serde(skip)]
    pub id: Uuid,
    #[serde(skip)]
    pub source_path: PathBuf,
    #[serde(skip)]
    pub source_name: String,

    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub ip: String,
    #[serde(rename = "username", default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Encrypted password, or empty when none is stored.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(rename = "privatekey", default, skip_serializing_if = "String::is_empty")]
    pub private_key: String,
    #[serde(
        default,
        deserialize_with = "port_from_yaml",
        skip_serializing_if = "String::is_empty"
    )]
    pub port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Required; a record without it fails to parse like an unknown type.
    #[serde(rename = "type")]
    pub server_type: ServerType,
    /// Comma-separated.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags: String,

    #[serde(skip)]
    pub availability: Availability,
}

impl Server {
    /// Tags split on commas and trimmed; empty when no tags are set.
    pub fn tags_list(&self) -> Vec<String> {
        if self.tags.trim().is_empty() {
            return Vec::new();
        }
        self.tags.split(',').map(|t| t.trim().to_owned()).collect()
    }

    /// Attach the record to the file it belongs to.
    pub fn bind_source(&mut self, path: &Path) {
        self.source_path = path.to_path_buf();
        self.source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
}

/// Ports are written as strings but hand-edited files often use numbers.
fn port_from_yaml<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u64),
    }

    Ok(match Option::<Port>::deserialize(deserializer)? {
        Some(Port::Text(s)) => s,
        Some(Port::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

/// Parse one server list file. Records get fresh identifiers and are bound
/// to `path`. An empty file is an empty list.
pub fn parse_server_file(path: &Path) -> Result<Vec<Server>> {
    let raw = file_ops::read_file(path)?;
    let text = std::str::from_utf8(&raw).map_err(|e| {
        ConanError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::InvalidUtf8,
            format!("server list {} is not valid UTF-8", path.display()),
            e,
        )
    })?;
    let mut servers = parse_server_yaml(text).map_err(|e| {
        let msg = format!("failed to parse {}: {}", path.display(), e);
        e.with_context(msg)
    })?;
    for server in &mut servers {
        server.id = Uuid::new_v4();
        server.bind_source(path);
    }
    Ok(servers)
}

fn parse_server_yaml(text: &str) -> Result<Vec<Server>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let servers: Option<Vec<Server>> = serde_yaml::from_str(text).map_err(|e| {
        ConanError::with_kind(
            ErrorCategory::User,
            ErrorKind::ServerListFormat,
            format!("invalid server list: {}", e),
        )
    })?;
    Ok(servers.unwrap_or_default())
}

fn render_server_yaml<S: Serialize>(servers: &[S], path: &Path) -> Result<String> {
    serde_yaml::to_string(servers).map_err(|e| {
        ConanError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::ServerListFormat,
            format!("failed to serialize servers for {}: {}", path.display(), e),
        )
    })
}

/// Load every file in `files` into one flat list, in file order.
///
/// A file that is missing or unreadable or unparsable is logged and
/// skipped. Identifiers are regenerated on every call.
pub fn load_servers(files: &[PathBuf]) -> Vec<Server> {
    load_server_files(files).0
}

/// Like [`load_servers`], also returning the files that were read
/// successfully.
pub fn load_server_files(files: &[PathBuf]) -> (Vec<Server>, Vec<PathBuf>) {
    let mut servers = Vec::new();
    let mut loaded = Vec::new();
    for file in files {
        match parse_server_file(file) {
            Ok(mut list) => {
                debug!(path = %file.display(), count = list.len(), "loaded server list");
                servers.append(&mut list);
                loaded.push(file.clone());
            }
            Err(e) => {
                warn!(path = %file.display(), error = %e, "skipping server list");
            }
        }
    }
    (servers, loaded)
}

/// Write `servers` back to their source files.
///
/// Records are grouped by `source_path` (files in first-seen order, records
/// in slice order) and each file is replaced atomically. Records without a
/// source path are dropped with a warning. Every file is attempted; the
/// first failure is returned after all have been tried.
pub fn save_servers(servers: &[Server]) -> Result<()> {
    save_servers_to(&[], servers)
}

/// [`save_servers`], additionally rewriting each of `files` that no record
/// points at as an empty list.
pub fn save_servers_to(files: &[PathBuf], servers: &[Server]) -> Result<()> {
    let mut groups: Vec<(&Path, Vec<&Server>)> =
        files.iter().map(|f| (f.as_path(), Vec::new())).collect();
    for server in servers {
        if server.source_path.as_os_str().is_empty() {
            warn!(host = %server.host, "skip server: no source path");
            continue;
        }
        match groups
            .iter_mut()
            .find(|(path, _)| *path == server.source_path.as_path())
        {
            Some((_, list)) => list.push(server),
            None => groups.push((server.source_path.as_path(), vec![server])),
        }
    }

    let mut first_error = None;
    for (path, list) in groups {
        let written = render_server_yaml(&list, path)
            .and_then(|yaml| file_ops::write_atomic(path, yaml.as_bytes()));
        match written {
            Ok(()) => info!(path = %path.display(), count = list.len(), "saved servers"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to save servers");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// List `*.yml` files in each search directory, skipping ignored names.
///
/// Files within one directory are sorted by name; directories keep their
/// priority order. Missing directories are skipped.
pub fn find_server_files(search_dirs: &[PathBuf], settings: &AppSettings) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in search_dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "server search directory not readable");
                continue;
            }
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "yml") && p.is_file())
            .collect();
        files.sort();

        for file in files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if settings.is_ignored(&name) {
                info!(path = %file.display(), "skipping ignored server list");
                continue;
            }
            debug!(path = %file.display(), "found server list");
            found.push(file);
        }
    }
    found
}

/// Resolve a server list by name (`.yml` appended when missing) to the first
/// existing, non-ignored match in the search directories.
pub fn locate_server_file(
    search_dirs: &[PathBuf],
    name: &str,
    settings: &AppSettings,
) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(ConanError::with_kind(
            ErrorCategory::User,
            ErrorKind::NotFound,
            "server list file not specified",
        ));
    }
    let file_name = if name.ends_with(".yml") {
        name.to_owned()
    } else {
        format!("{}.yml", name)
    };

    for dir in search_dirs {
        let candidate = dir.join(&file_name);
        let base = candidate
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if settings.is_ignored(&base) {
            info!(path = %candidate.display(), "skipping ignored server list");
            continue;
        }
        if candidate.is_file() {
            debug!(path = %candidate.display(), "located server list");
            return Ok(candidate);
        }
    }

    Err(ConanError::with_kind(
        ErrorCategory::User,
        ErrorKind::NotFound,
        format!("server list {} not found", file_name),
    ))
}

/// Re-encrypt every stored password in `path` from `old_key` to `new_key`.
///
/// Passwords are always decrypted with `old_key`, whatever Gist key would
/// apply to the file during normal loading. Records whose password does not
/// decrypt are left unchanged with a warning. The file is replaced
/// atomically. Returns the number of re-encrypted records.
pub fn change_encryption_key(path: &Path, old_key: &str, new_key: &str) -> Result<usize> {
    let mut servers = parse_server_file(path)?;
    let mut changed = 0;

    for server in servers.iter_mut().filter(|s| !s.password.is_empty()) {
        let plain = match aead::decrypt(&server.password, old_key) {
            Ok(plain) => zeroize::Zeroizing::new(plain),
            Err(e) => {
                warn!(host = %server.host, error = %e, "cannot decrypt password, leaving it unchanged");
                continue;
            }
        };
        server.password = aead::encrypt(&plain, new_key)
            .map_err(|e| e.with_context(format!("failed to encrypt password for {}", server.host)))?;
        changed += 1;
    }

    let yaml = render_server_yaml(&servers, path)?;
    file_ops::write_atomic(path, yaml.as_bytes())?;
    info!(path = %path.display(), changed, "encryption key changed");
    Ok(changed)
}
