//! CLI integration tests
//!
//! Tests the command-line interface end-to-end against a throwaway
//! configuration directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Get path to the conan binary
fn conan_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_conan"))
}

/// Run conan against `config_dir`, feeding `stdin_lines` (one passphrase
/// per line) to `--passphrase-stdin`.
fn run_conan(config_dir: &Path, args: &[&str], stdin_lines: &[&str]) -> Output {
    let mut child = Command::new(conan_bin())
        .arg("--passphrase-stdin")
        .arg("--config-dir")
        .arg(config_dir)
        .args(args)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn conan");

    {
        let stdin = child.stdin.as_mut().expect("failed to open stdin");
        // Ignore BrokenPipe errors - the command may exit before reading stdin
        for line in stdin_lines {
            let _ = writeln!(stdin, "{}", line);
        }
    }

    child.wait_with_output().expect("failed to wait for conan")
}

fn assert_success(output: &Output, what: &str) {
    assert!(
        output.status.success(),
        "{} failed: {}",
        what,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Config dir with global key K1 and one server list holding a password.
fn seeded_config(temp_dir: &TempDir) -> PathBuf {
    let config_dir = temp_dir.path().join("conan");
    fs::create_dir_all(config_dir.join("servers")).unwrap();
    fs::write(config_dir.join("settings.ini"), "[General]\nenckey=K1\n").unwrap();
    let secret = conan::aead::encrypt("secret", "K1").unwrap();
    fs::write(
        config_dir.join("servers").join("servers.yml"),
        format!(
            "- host: web1\n  ip: 10.0.0.1\n  password: {}\n  type: SSH\n  tags: prod\n\
             - host: dc\n  ip: 10.0.0.2\n  type: RDP\n",
            secret
        ),
    )
    .unwrap();
    config_dir
}

#[test]
fn test_mkey_prints_32_chars() {
    let temp_dir = TempDir::new().unwrap();
    let output = run_conan(temp_dir.path(), &["mkey"], &[]);
    assert_success(&output, "mkey");
    assert_eq!(stdout(&output).trim_end().chars().count(), 32);
}

#[test]
fn test_mkey_does_not_open_encrypted_settings() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = seeded_config(&temp_dir);
    let output = run_conan(&config_dir, &["encrypt-settings"], &["hunter2", "hunter2"]);
    assert_success(&output, "encrypt-settings");

    // No settings passphrase on stdin: mkey must not ask for one.
    let output = run_conan(&config_dir, &["mkey"], &[]);
    assert_success(&output, "mkey");
    assert_eq!(stdout(&output).trim_end().chars().count(), 32);
}

#[test]
fn test_list_and_dbs() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = seeded_config(&temp_dir);

    let output = run_conan(&config_dir, &["list"], &[]);
    assert_success(&output, "list");
    let listing = stdout(&output);
    assert!(listing.contains("web1\t10.0.0.1\tSSH\tservers.yml\tprod"));
    assert!(listing.contains("dc\t10.0.0.2\tRDP\tservers.yml\t"));

    let output = run_conan(&config_dir, &["dbs"], &[]);
    assert_success(&output, "dbs");
    assert!(stdout(&output).contains("servers.yml"));
}

#[test]
fn test_set_then_get() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = seeded_config(&temp_dir);

    let output = run_conan(&config_dir, &["set", "General", "ssh_client", "external"], &[]);
    assert_success(&output, "set");

    let output = run_conan(&config_dir, &["get", "General", "ssh_client"], &[]);
    assert_success(&output, "get");
    assert_eq!(stdout(&output).trim_end(), "external");

    let output = run_conan(&config_dir, &["get", "General", "nope"], &[]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error: missing key: [General]nope"));
}

#[test]
fn test_encrypt_and_decrypt_settings() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = seeded_config(&temp_dir);
    let settings = config_dir.join("settings.ini");

    let output = run_conan(&config_dir, &["encrypt-settings"], &["hunter2", "hunter2"]);
    assert_success(&output, "encrypt-settings");
    assert!(fs::read_to_string(&settings).unwrap().starts_with("HMACENCv1:"));

    // The settings passphrase is requested first once the file is encrypted.
    let output = run_conan(&config_dir, &["get", "General", "enckey"], &["hunter2"]);
    assert_success(&output, "get");
    assert_eq!(stdout(&output).trim_end(), "K1");

    let output = run_conan(&config_dir, &["get", "General", "enckey"], &["wrong"]);
    assert!(!output.status.success());

    let output = run_conan(&config_dir, &["decrypt-settings"], &["hunter2"]);
    assert_success(&output, "decrypt-settings");
    assert!(fs::read_to_string(&settings).unwrap().contains("enckey=K1"));
}

#[test]
fn test_encrypt_settings_mismatch() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = seeded_config(&temp_dir);

    let output = run_conan(&config_dir, &["encrypt-settings"], &["hunter2", "hunter3"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("passphrases do not match"));
    assert!(
        fs::read_to_string(config_dir.join("settings.ini"))
            .unwrap()
            .contains("enckey=K1")
    );
}

#[test]
fn test_chgkey() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = seeded_config(&temp_dir);
    let file = config_dir.join("servers").join("servers.yml");

    let output = run_conan(
        &config_dir,
        &["chgkey", "--file", file.to_str().unwrap(), "--key", "K2"],
        &[],
    );
    assert_success(&output, "chgkey");
    assert!(stdout(&output).contains("Re-encrypted 1 password(s)"));

    let servers = conan::servers::parse_server_file(&file).unwrap();
    assert_eq!(conan::aead::decrypt(&servers[0].password, "K2").unwrap(), "secret");
}

#[test]
fn test_chgkey_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = seeded_config(&temp_dir);
    let missing = temp_dir.path().join("missing.yml");

    let output = run_conan(
        &config_dir,
        &["chgkey", "--file", missing.to_str().unwrap(), "--key", "K2"],
        &[],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("Error: "));
}

#[test]
fn test_export_import_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = seeded_config(&temp_dir);
    let backup = temp_dir.path().join("backup.cnn");
    let restored = temp_dir.path().join("restored");

    let output = run_conan(
        &config_dir,
        &["export-settings", "--output", backup.to_str().unwrap()],
        &["hunter2", "hunter2"],
    );
    assert_success(&output, "export-settings");

    let output = run_conan(
        &restored,
        &["import-settings", "--input", backup.to_str().unwrap()],
        &["wrong"],
    );
    assert!(!output.status.success());
    assert!(!restored.join("settings.ini").exists());

    let output = run_conan(
        &restored,
        &["import-settings", "--input", backup.to_str().unwrap()],
        &["hunter2"],
    );
    assert_success(&output, "import-settings");
    assert_eq!(
        fs::read(restored.join("settings.ini")).unwrap(),
        fs::read(config_dir.join("settings.ini")).unwrap()
    );
    assert_eq!(
        fs::read(restored.join("servers").join("servers.yml")).unwrap(),
        fs::read(config_dir.join("servers").join("servers.yml")).unwrap()
    );
}

#[test]
fn test_gist_seal_and_restore() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = seeded_config(&temp_dir);
    fs::write(
        config_dir.join("settings.ini"),
        "[General]\nenckey=K1\n\n[gist servers.yml]\ngistid=abc\ngistsec=tok\nenckey=G1\n",
    )
    .unwrap();
    let list = config_dir.join("servers").join("servers.yml");
    let original = fs::read_to_string(&list).unwrap();

    let output = run_conan(&config_dir, &["gist-seal", "servers.yml"], &[]);
    assert_success(&output, "gist-seal");
    let payload_path = temp_dir.path().join("payload.txt");
    fs::write(&payload_path, stdout(&output)).unwrap();

    fs::write(&list, "- host: stale\n  ip: x\n  type: SSH\n").unwrap();
    let output = run_conan(
        &config_dir,
        &[
            "gist-restore",
            "servers.yml",
            "--input",
            payload_path.to_str().unwrap(),
        ],
        &[],
    );
    assert_success(&output, "gist-restore");
    assert_eq!(fs::read_to_string(&list).unwrap(), original);

    let output = run_conan(&config_dir, &["gist-seal", "unknown.yml"], &[]);
    assert!(!output.status.success());
}

#[test]
fn test_db_flag_selects_one_list() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = seeded_config(&temp_dir);
    fs::write(
        config_dir.join("servers").join("lab.yml"),
        "- host: lab1\n  ip: 10.9.0.1\n  type: VNC\n",
    )
    .unwrap();

    let output = run_conan(&config_dir, &["--db", "lab", "list"], &[]);
    assert_success(&output, "list --db");
    let listing = stdout(&output);
    assert!(listing.contains("lab1"));
    assert!(!listing.contains("web1"));

    let output = run_conan(&config_dir, &["--db", "nope", "list"], &[]);
    assert!(!output.status.success());
}
