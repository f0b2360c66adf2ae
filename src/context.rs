//! Application context built once at startup and passed to every caller

use crate::archive;
use crate::config::{AppSettings, Environment, GistConfig};
use crate::credentials::CredentialCodec;
use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use crate::repository::ServerRepository;
use crate::servers::{self, Server};
use crate::settings::SettingsStore;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Which server lists to open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServerSelection {
    /// Every `*.yml` file in the search directories.
    #[default]
    Discover,
    /// One list, looked up by name in the search directories.
    Named(String),
}

pub struct AppContext {
    pub env: Environment,
    pub store: SettingsStore,
    pub settings: AppSettings,
    pub servers: ServerRepository,
}

impl AppContext {
    /// Open the settings file, build the typed view, locate the server
    /// lists and load them.
    pub fn open(
        env: Environment,
        passphrase: Option<Zeroizing<String>>,
        selection: &ServerSelection,
    ) -> Result<Self> {
        let mut store = SettingsStore::open(env.settings_file.clone(), passphrase)?;
        let mut settings = AppSettings::from_ini(store.current()?, &env.os);

        let search_dirs = env.server_search_dirs();
        let files = match selection {
            ServerSelection::Discover => servers::find_server_files(&search_dirs, &settings),
            ServerSelection::Named(name) => {
                vec![servers::locate_server_file(&search_dirs, name, &settings)?]
            }
        };
        settings.bind_gist_paths(&files);

        let repository = ServerRepository::new(files);
        let count = repository.reload();
        info!(config = %env.config_dir.display(), servers = count, "application context ready");

        Ok(Self {
            env,
            store,
            settings,
            servers: repository,
        })
    }

    /// Rebuild the typed settings view from disk.
    pub fn refresh_settings(&mut self) -> Result<()> {
        let mut settings = AppSettings::from_ini(self.store.current()?, &self.env.os);
        settings.bind_gist_paths(&self.servers.files());
        self.settings = settings;
        Ok(())
    }

    pub fn server_files(&self) -> Vec<PathBuf> {
        self.servers.files()
    }

    pub fn codec(&self) -> CredentialCodec {
        CredentialCodec::from_settings(&self.settings)
    }

    pub fn decrypt_password(&self, server: &Server) -> Zeroizing<String> {
        self.codec().decrypt_password(server)
    }

    /// Encrypt and store a new password for the record `id`.
    pub fn set_server_password(&self, id: Uuid, plaintext: &str) -> Result<()> {
        let mut server = self.servers.get(id).ok_or_else(|| {
            ConanError::with_kind(
                ErrorCategory::User,
                ErrorKind::UnknownRecord,
                format!("no server with id {}", id),
            )
        })?;
        self.codec().set_password(&mut server, plaintext)?;
        self.servers.update(server)
    }

    /// Re-encrypt every password in `file` from the global key to
    /// `new_key`, then reload the repository.
    pub fn change_encryption_key(&self, file: &Path, new_key: &str) -> Result<usize> {
        let changed = servers::change_encryption_key(file, &self.settings.enc_key, new_key)?;
        self.servers.reload();
        Ok(changed)
    }

    pub fn gist(&self, name: &str) -> Result<&GistConfig> {
        self.settings.gist(name).ok_or_else(|| {
            ConanError::with_kind(
                ErrorCategory::User,
                ErrorKind::SyncConfig,
                format!("no Gist configured for {}", name),
            )
        })
    }

    pub fn export_config(&self, password: &str, output: &Path) -> Result<()> {
        archive::export_config_to_file(&self.env.config_dir, password, output)
    }
}
