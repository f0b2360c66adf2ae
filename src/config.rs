//! Runtime environment and the typed view of the settings file

use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use crate::settings;
use directories::BaseDirs;
use ini::Ini;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name used for the configuration directory.
pub const APP_NAME: &str = "conan";

/// Settings file name inside the configuration directory.
pub const SETTINGS_FILE_NAME: &str = "settings.ini";

const GENERAL: &str = "General";
const GIST_PREFIX: &str = "gist ";

/// Where things live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
    /// Directory holding the running executable, if it can be determined.
    pub app_dir: Option<PathBuf>,
    /// Operating system name as used in settings keys (`linux`, `darwin`,
    /// `windows`, ...).
    pub os: String,
}

impl Environment {
    /// Resolve `~/.config/conan`. Fails if the home directory is unknown.
    pub fn discover() -> Result<Self> {
        let base = BaseDirs::new().ok_or_else(|| {
            ConanError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::NotFound,
                "unable to determine the user home folder",
            )
        })?;
        Ok(Self::with_config_dir(
            base.home_dir().join(".config").join(APP_NAME),
        ))
    }

    /// Use an explicit configuration directory.
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let app_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        Self {
            settings_file: config_dir.join(SETTINGS_FILE_NAME),
            config_dir,
            app_dir,
            os: current_os().to_owned(),
        }
    }

    /// Directories searched for `*.yml` server lists, in priority order.
    pub fn server_search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.config_dir.join("servers"), self.config_dir.clone()];
        if let Some(app_dir) = &self.app_dir {
            if !dirs.contains(app_dir) {
                dirs.push(app_dir.clone());
            }
        }
        dirs
    }
}

/// OS name in the spelling the settings keys use.
pub fn current_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// External command templates that can be configured per operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Ssh,
    Rdp,
    Winbox,
}

impl CommandKind {
    fn suffix(self) -> &'static str {
        match self {
            CommandKind::Ssh => "ssh",
            CommandKind::Rdp => "rdp",
            CommandKind::Winbox => "winbox",
        }
    }

    /// `[General]` key holding this template on `os`, e.g. `linux_ssh`.
    pub fn settings_key(self, os: &str) -> String {
        format!("{}_{}", os, self.suffix())
    }
}

/// Sync settings for one server list, from a `[gist <name>]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GistConfig {
    /// Base name of the server list file this Gist mirrors.
    pub name: String,
    /// Path of that file once discovered on disk.
    pub path: Option<PathBuf>,
    pub gist_id: String,
    pub gist_secret: String,
    /// Per-file password encryption key; empty means the global key.
    pub enc_key: String,
    pub encrypt_notes: bool,
}

/// Typed snapshot of the settings the core cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    pub enc_key: String,
    pub ssh_client: String,
    pub ssh_command: Option<String>,
    pub rdp_command: Option<String>,
    pub winbox_command: Option<String>,
    pub sync: bool,
    pub ignore: String,
    pub default_ssh_key: String,
    pub gists: Vec<GistConfig>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            enc_key: String::new(),
            ssh_client: "builtin".to_owned(),
            ssh_command: None,
            rdp_command: None,
            winbox_command: None,
            sync: false,
            ignore: String::new(),
            default_ssh_key: String::new(),
            gists: Vec::new(),
        }
    }
}

impl AppSettings {
    /// Build the view from a parsed settings tree for the given OS.
    ///
    /// Gist sections need both `gistid` and `gistsec`; sections whose name
    /// is in the ignore list are skipped.
    pub fn from_ini(ini: &Ini, os: &str) -> Self {
        let get = |key: &str| ini.get_from(Some(GENERAL), key).map(str::to_owned);
        let command = |kind: CommandKind| {
            let key = kind.settings_key(os);
            let value = get(&key);
            if value.is_none() {
                debug!(key = %key, "no command template configured");
            }
            value
        };

        let mut view = Self {
            enc_key: get("enckey").unwrap_or_default(),
            ssh_client: get("ssh_client").unwrap_or_else(|| "builtin".to_owned()),
            ssh_command: command(CommandKind::Ssh),
            rdp_command: command(CommandKind::Rdp),
            winbox_command: command(CommandKind::Winbox),
            sync: get("sync")
                .and_then(|v| settings::parse_bool(&v))
                .unwrap_or(false),
            ignore: get("ignore").unwrap_or_default(),
            default_ssh_key: get("defaultsshkey").unwrap_or_default(),
            gists: Vec::new(),
        };

        for (name, props) in ini.iter() {
            let Some(name) = name.and_then(|n| n.strip_prefix(GIST_PREFIX)) else {
                continue;
            };
            let (Some(gist_id), Some(gist_secret)) = (props.get("gistid"), props.get("gistsec"))
            else {
                continue;
            };
            if view.is_ignored(name) {
                continue;
            }
            view.gists.push(GistConfig {
                name: name.to_owned(),
                path: None,
                gist_id: gist_id.to_owned(),
                gist_secret: gist_secret.to_owned(),
                enc_key: props.get("enckey").unwrap_or_default().to_owned(),
                encrypt_notes: props
                    .get("encrypt_notes")
                    .and_then(settings::parse_bool)
                    .unwrap_or(false),
            });
        }
        view
    }

    /// Configured command template for `kind`, if any.
    pub fn command_template(&self, kind: CommandKind) -> Option<&str> {
        match kind {
            CommandKind::Ssh => self.ssh_command.as_deref(),
            CommandKind::Rdp => self.rdp_command.as_deref(),
            CommandKind::Winbox => self.winbox_command.as_deref(),
        }
    }

    pub fn gist(&self, name: &str) -> Option<&GistConfig> {
        self.gists.iter().find(|g| g.name == name)
    }

    /// True if `file_name` appears in the comma-separated ignore list.
    pub fn is_ignored(&self, file_name: &str) -> bool {
        self.ignore
            .split(',')
            .map(str::trim)
            .any(|entry| !entry.is_empty() && entry == file_name)
    }

    /// Record the on-disk location of every Gist whose name matches the
    /// base name of one of `files`.
    pub fn bind_gist_paths(&mut self, files: &[PathBuf]) {
        for file in files {
            let Some(base) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            for gist in self.gists.iter_mut().filter(|g| g.name == base) {
                gist.path = Some(file.clone());
            }
        }
    }
}
