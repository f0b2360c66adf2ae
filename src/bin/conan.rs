//! Conan CLI - maintenance commands for the encrypted settings and server
//! lists.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

use conan::config::Environment;
use conan::context::{AppContext, ServerSelection};
use conan::passphrase::{
    ConfirmingPassphraseReader, PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader,
};
use conan::{ConanError, ErrorCategory, ErrorKind, Result, aead, archive, file_ops, settings, sync};

#[derive(Parser)]
#[command(name = "conan")]
#[command(version)]
#[command(about = "Encrypted settings and server lists for the conan connection manager.", long_about = None)]
struct Cli {
    /// Read passphrases from stdin, one per line, instead of from the terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// Configuration directory (default: ~/.config/conan)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Use only this server list (name with or without .yml)
    #[arg(long, global = true, value_name = "NAME")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a random encryption key
    Mkey,

    /// List the server list files in use
    Dbs,

    /// List servers
    List,

    /// Re-encrypt every password in a server list with a new key
    Chgkey {
        /// Server list file to rewrite
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        /// New encryption key
        #[arg(short, long)]
        key: String,
    },

    /// Print a settings value
    Get { section: String, key: String },

    /// Store a settings value
    Set {
        section: String,
        key: String,
        value: String,
    },

    /// Encrypt the settings file with a new passphrase
    EncryptSettings,

    /// Store the settings file as plain text
    DecryptSettings,

    /// Write an encrypted backup of the configuration directory
    ExportSettings {
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Restore the configuration directory from an encrypted backup
    ImportSettings {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },

    /// Print the encrypted sync payload of a server list
    GistSeal {
        /// Server list name as used in its [gist NAME] section
        name: String,
    },

    /// Replace a server list with a decrypted sync payload
    GistRestore {
        name: String,

        /// File holding the payload
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },
}

/// Passphrase source for the whole invocation. With `--passphrase-stdin`
/// every request consumes the next line of stdin.
struct Prompts {
    stdin: Option<ReaderPassphraseReader>,
}

impl Prompts {
    fn new(use_stdin: bool) -> Self {
        Self {
            stdin: use_stdin.then(|| ReaderPassphraseReader::new(Box::new(std::io::stdin()))),
        }
    }

    fn read(&mut self, prompt: &str) -> Result<Zeroizing<String>> {
        match &mut self.stdin {
            Some(reader) => reader.read_passphrase(),
            None => TerminalPassphraseReader::new(prompt).read_passphrase(),
        }
    }

    /// Ask twice and refuse an empty answer.
    fn read_new(&mut self, prompt: &str) -> Result<Zeroizing<String>> {
        let passphrase = match &mut self.stdin {
            Some(reader) => ConfirmingPassphraseReader::new(reader).read_passphrase()?,
            None => ConfirmingPassphraseReader::new(TerminalPassphraseReader::new(prompt))
                .read_passphrase()?,
        };
        if passphrase.is_empty() {
            return Err(ConanError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "passphrase must not be empty",
            ));
        }
        Ok(passphrase)
    }
}

fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Unable to set global default subscriber");
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let env = match &cli.config_dir {
        Some(dir) => Environment::with_config_dir(dir),
        None => Environment::discover()?,
    };
    let selection = match &cli.db {
        Some(name) => ServerSelection::Named(name.clone()),
        None => ServerSelection::Discover,
    };
    let mut prompts = Prompts::new(cli.passphrase_stdin);

    match cli.command {
        Commands::Mkey => {
            println!("{}", aead::generate_password(32)?);
        }
        Commands::ImportSettings { input } => {
            let password = prompts.read("Backup password: ")?;
            archive::import_config_from_file(&input, &password, &env.config_dir)?;
            println!("Restore succeeded, configuration written to {}", env.config_dir.display());
        }
        command => {
            let passphrase = settings_passphrase(&env, &mut prompts)?;
            let mut ctx = AppContext::open(env, passphrase, &selection)?;
            run_with_context(command, &mut ctx, &mut prompts)?;
        }
    }
    Ok(())
}

fn settings_passphrase(env: &Environment, prompts: &mut Prompts) -> Result<Option<Zeroizing<String>>> {
    if settings::is_encrypted_ini(&env.settings_file)? {
        Ok(Some(prompts.read("Settings passphrase: ")?))
    } else {
        Ok(None)
    }
}

fn run_with_context(command: Commands, ctx: &mut AppContext, prompts: &mut Prompts) -> Result<()> {
    match command {
        Commands::Dbs => {
            for file in ctx.server_files() {
                println!("{}", file.display());
            }
        }
        Commands::List => {
            for server in ctx.servers.snapshot() {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    server.host, server.ip, server.server_type, server.source_name, server.tags
                );
            }
        }
        Commands::Chgkey { file, key } => {
            let changed = ctx.change_encryption_key(&file, &key)?;
            println!("Re-encrypted {} password(s) in {}", changed, file.display());
        }
        Commands::Get { section, key } => {
            println!("{}", ctx.store.get_string(&section, &key)?);
        }
        Commands::Set {
            section,
            key,
            value,
        } => {
            ctx.store.set(&section, &key, value)?;
            ctx.refresh_settings()?;
        }
        Commands::EncryptSettings => {
            let passphrase = prompts.read_new("New settings passphrase: ")?;
            ctx.store.encrypt_with(passphrase)?;
            println!("Settings file encrypted");
        }
        Commands::DecryptSettings => {
            ctx.store.decrypt_to_plain()?;
            println!("Settings file stored as plain text");
        }
        Commands::ExportSettings { output } => {
            let password = prompts.read_new("Backup password: ")?;
            ctx.export_config(&password, &output)?;
            println!("Export is complete, file is located at {}", output.display());
        }
        Commands::GistSeal { name } => {
            println!("{}", sync::seal_server_file(ctx.gist(&name)?)?);
        }
        Commands::GistRestore { name, input } => {
            let payload = read_payload(&input)?;
            sync::restore_server_file(ctx.gist(&name)?, &payload)?;
            ctx.servers.reload();
            println!("Server list {} restored", name);
        }
        Commands::Mkey | Commands::ImportSettings { .. } => {
            unreachable!("mkey and import-settings run before the settings are opened")
        }
    }
    Ok(())
}

fn read_payload(path: &Path) -> Result<String> {
    let raw = file_ops::read_file(path)?;
    String::from_utf8(raw).map_err(|e| {
        ConanError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::InvalidUtf8,
            format!("payload {} is not valid UTF-8", path.display()),
            e,
        )
    })
}
