//! Configuration backups: a directory zipped in memory, then sealed with
//! [`crate::secretcrypt`].
//!
//! Entry names are relative to the parent of the exported directory, so an
//! export of `~/.config/conan` holds `conan/`, `conan/settings.ini`, ...
//! Import strips such a common top-level folder again, which lets archives
//! made with or without an enclosing folder restore to the same layout.

use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use crate::file_ops;
use crate::secretcrypt;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Zip `dir` recursively into memory. Directory entries (named with a
/// trailing `/`) are kept so empty directories survive a round trip.
pub fn compress_dir(dir: &Path) -> Result<Vec<u8>> {
    let top = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ConanError::with_kind(
                ErrorCategory::User,
                ErrorKind::NotFound,
                format!("cannot export {}: not a named directory", dir.display()),
            )
        })?
        .to_owned();
    if !dir.is_dir() {
        return Err(ConanError::with_kind(
            ErrorCategory::User,
            ErrorKind::NotFound,
            format!("cannot export {}: directory not found", dir.display()),
        ));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    add_dir(&mut writer, dir, &top)?;
    let cursor = writer.finish().map_err(|e| zip_error("failed to finish archive", e))?;
    Ok(cursor.into_inner())
}

fn add_dir(writer: &mut ZipWriter<Cursor<Vec<u8>>>, dir: &Path, name: &str) -> Result<()> {
    writer
        .add_directory(format!("{}/", name), entry_options(dir)?)
        .map_err(|e| zip_error("failed to add directory entry", e))?;

    let mut children: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| file_ops::io_error(ErrorCategory::User, "failed to list", dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<_>>()
        .map_err(|e| file_ops::io_error(ErrorCategory::User, "failed to list", dir, e))?;
    children.sort();

    for child in children {
        let child_name = format!("{}/{}", name, child.file_name().unwrap_or_default().to_string_lossy());
        let file_type = fs::symlink_metadata(&child)
            .map_err(|e| file_ops::io_error(ErrorCategory::User, "failed to stat", &child, e))?
            .file_type();
        if file_type.is_symlink() {
            warn!(path = %child.display(), "skipping symbolic link");
            continue;
        }
        if file_type.is_dir() {
            add_dir(writer, &child, &child_name)?;
        } else {
            let contents = file_ops::read_file(&child)?;
            writer
                .start_file(child_name.as_str(), entry_options(&child)?)
                .map_err(|e| zip_error("failed to add file entry", e))?;
            writer
                .write_all(&contents)
                .map_err(|e| file_ops::io_error(ErrorCategory::Internal, "failed to archive", &child, e))?;
            debug!(entry = %child_name, bytes = contents.len(), "archived");
        }
    }
    Ok(())
}

fn entry_options(path: &Path) -> Result<SimpleFileOptions> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let meta = fs::metadata(path)
            .map_err(|e| file_ops::io_error(ErrorCategory::User, "failed to stat", path, e))?;
        Ok(options.unix_permissions(meta.permissions().mode() & 0o777))
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(options)
    }
}

struct Entry {
    index: usize,
    relative: Vec<String>,
    is_dir: bool,
    mode: Option<u32>,
}

/// Unpack a zip stream into `dest`.
///
/// Every entry is checked before anything is written: an entry that is
/// absolute or whose `..` segments climb above `dest` aborts the whole
/// import with `PathTraversal`, and nothing is extracted.
pub fn decompress_to_dir(zip_data: &[u8], dest: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(Cursor::new(zip_data))
        .map_err(|e| zip_error("failed to read archive", e))?;

    let mut names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive
            .by_index_raw(index)
            .map_err(|e| zip_error("failed to read archive entry", e))?;
        names.push((file.name().to_owned(), file.is_dir(), file.unix_mode()));
    }

    let root = common_root(names.iter().map(|(n, _, _)| n.as_str()));
    if let Some(root) = &root {
        debug!(root = %root, "stripping common archive root");
    }

    let mut entries = Vec::with_capacity(names.len());
    for (index, (name, is_dir, mode)) in names.into_iter().enumerate() {
        let mut relative = resolve_entry(&name)?;
        if let Some(root) = &root {
            if relative.first() == Some(root) {
                relative.remove(0);
            }
        }
        if relative.is_empty() {
            continue;
        }
        entries.push(Entry {
            index,
            relative,
            is_dir,
            mode,
        });
    }

    file_ops::create_dir_all(dest)?;
    for entry in entries {
        let out_path = entry
            .relative
            .iter()
            .fold(dest.to_path_buf(), |path, part| path.join(part));

        if entry.is_dir {
            file_ops::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            file_ops::create_dir_all(parent)?;
        }

        let mut file = archive
            .by_index(entry.index)
            .map_err(|e| zip_error("failed to open archive entry", e))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|e| file_ops::io_error(ErrorCategory::User, "failed to extract", &out_path, e))?;
        fs::write(&out_path, &contents)
            .map_err(|e| file_ops::io_error(ErrorCategory::User, "failed to write", &out_path, e))?;
        set_mode(&out_path, entry.mode)?;
        debug!(path = %out_path.display(), bytes = contents.len(), "extracted");
    }
    Ok(())
}

/// Split an entry name into normal path segments, resolving `.` and `..`.
fn resolve_entry(name: &str) -> Result<Vec<String>> {
    let traversal = || {
        ConanError::with_kind(
            ErrorCategory::User,
            ErrorKind::PathTraversal,
            format!("illegal file path in archive: {}", name),
        )
    };
    if name.starts_with('/') || name.starts_with('\\') || name.contains(':') {
        return Err(traversal());
    }

    let mut parts: Vec<String> = Vec::new();
    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(traversal());
                }
            }
            other => parts.push(other.to_owned()),
        }
    }
    Ok(parts)
}

/// The first segment shared by every entry, if it names a directory.
fn common_root<'a>(names: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut root: Option<&str> = None;
    let mut nested = false;
    for name in names {
        let mut segments = name
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".");
        let first = segments.next()?;
        if segments.next().is_some() || name.ends_with('/') {
            nested = true;
        }
        match root {
            None => root = Some(first),
            Some(r) if r == first => {}
            Some(_) => return None,
        }
    }
    root.filter(|r| nested && *r != "..").map(str::to_owned)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let Some(mode) = mode.map(|m| m & 0o7777).filter(|m| *m != 0) else {
        return Ok(());
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| file_ops::io_error(ErrorCategory::Internal, "failed to set permissions on", path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// Zip `dir` and seal it under `password`.
pub fn export_config(dir: &Path, password: &str) -> Result<Vec<u8>> {
    let zip_data = compress_dir(dir)?;
    let sealed = secretcrypt::encrypt(password.as_bytes(), &zip_data)?;
    info!(dir = %dir.display(), bytes = sealed.len(), "configuration exported");
    Ok(sealed)
}

/// Open a sealed backup and unpack it into `dest`. Nothing is written if
/// the password is wrong or the data was tampered with.
pub fn import_config(sealed: &[u8], password: &str, dest: &Path) -> Result<()> {
    let zip_data = secretcrypt::decrypt(password.as_bytes(), sealed)?;
    decompress_to_dir(&zip_data, dest)?;
    info!(dest = %dest.display(), "configuration imported");
    Ok(())
}

/// [`export_config`] written atomically to `output` with owner-only
/// permissions.
pub fn export_config_to_file(dir: &Path, password: &str, output: &Path) -> Result<()> {
    let sealed = export_config(dir, password)?;
    file_ops::write_atomic(output, &sealed)
}

pub fn import_config_from_file(input: &Path, password: &str, dest: &Path) -> Result<()> {
    let sealed = file_ops::read_file(input)?;
    import_config(&sealed, password, dest)
}

fn zip_error(msg: &str, err: zip::result::ZipError) -> ConanError {
    ConanError::with_kind_and_source(
        ErrorCategory::User,
        ErrorKind::ArchiveFormat,
        format!("{}: {}", msg, err),
        err,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(name.to_string(), SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer
                    .start_file(name.to_string(), SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(contents).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn sample_config(root: &Path) -> PathBuf {
        let cfg = root.join("conan");
        fs::create_dir_all(cfg.join("servers")).unwrap();
        fs::create_dir_all(cfg.join("themes")).unwrap();
        fs::write(cfg.join("settings.ini"), "[General]\nenckey=K1\n").unwrap();
        fs::write(cfg.join("servers").join("servers.yml"), "- host: a\n  ip: b\n  type: SSH\n").unwrap();
        cfg
    }

    #[test]
    fn test_compress_names_include_top_folder() {
        let temp_dir = TempDir::new().unwrap();
        let cfg = sample_config(temp_dir.path());

        let zip_data = compress_dir(&cfg).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(zip_data)).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "conan/",
                "conan/servers/",
                "conan/servers/servers.yml",
                "conan/settings.ini",
                "conan/themes/",
            ]
        );
    }

    #[test]
    fn test_roundtrip_strips_root_and_keeps_empty_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let cfg = sample_config(temp_dir.path());
        let restore = temp_dir.path().join("restore");

        decompress_to_dir(&compress_dir(&cfg).unwrap(), &restore).unwrap();

        assert_eq!(
            fs::read(restore.join("settings.ini")).unwrap(),
            fs::read(cfg.join("settings.ini")).unwrap()
        );
        assert_eq!(
            fs::read(restore.join("servers").join("servers.yml")).unwrap(),
            fs::read(cfg.join("servers").join("servers.yml")).unwrap()
        );
        assert!(restore.join("themes").is_dir());
        assert!(!restore.join("conan").exists());
    }

    #[test]
    fn test_flat_archive_is_not_stripped() {
        let temp_dir = TempDir::new().unwrap();
        let zip_data = build_zip(&[("settings.ini", b"x"), ("servers.yml", b"y")]);

        decompress_to_dir(&zip_data, temp_dir.path()).unwrap();

        assert_eq!(fs::read(temp_dir.path().join("settings.ini")).unwrap(), b"x");
        assert_eq!(fs::read(temp_dir.path().join("servers.yml")).unwrap(), b"y");
    }

    #[test]
    fn test_single_top_level_file_is_not_stripped() {
        let temp_dir = TempDir::new().unwrap();
        let zip_data = build_zip(&[("settings.ini", b"x")]);

        decompress_to_dir(&zip_data, temp_dir.path()).unwrap();

        assert_eq!(fs::read(temp_dir.path().join("settings.ini")).unwrap(), b"x");
    }

    #[test]
    fn test_path_traversal_rejected_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a").join("b");
        let zip_data = build_zip(&[
            ("conan/settings.ini", b"ok"),
            ("conan/../../../etc/passwd", b"root::0:0"),
        ]);

        let err = decompress_to_dir(&zip_data, &dest).expect_err("traversal must fail");
        assert_eq!(err.kind, Some(ErrorKind::PathTraversal));
        assert!(!temp_dir.path().join("etc").exists());
        assert!(!dest.join("settings.ini").exists());
    }

    #[test]
    fn test_absolute_entry_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let zip_data = build_zip(&[("/etc/passwd", b"x")]);

        let err = decompress_to_dir(&zip_data, temp_dir.path()).expect_err("absolute path");
        assert_eq!(err.kind, Some(ErrorKind::PathTraversal));
    }

    #[test]
    fn test_inner_dotdot_within_dest_allowed() {
        let temp_dir = TempDir::new().unwrap();
        let zip_data = build_zip(&[("a/", b""), ("a/b/../c.txt", b"c")]);

        decompress_to_dir(&zip_data, temp_dir.path()).unwrap();
        assert_eq!(fs::read(temp_dir.path().join("c.txt")).unwrap(), b"c");
    }

    #[test]
    fn test_resolve_entry() {
        assert_eq!(resolve_entry("a/./b/../c").unwrap(), vec!["a", "c"]);
        assert!(resolve_entry("..").is_err());
        assert!(resolve_entry("C:\\windows").is_err());
        assert!(resolve_entry("a\\..\\..\\x").is_err());
    }

    #[test]
    fn test_not_a_zip() {
        let temp_dir = TempDir::new().unwrap();
        let err = decompress_to_dir(b"definitely not a zip", temp_dir.path())
            .expect_err("garbage input");
        assert_eq!(err.kind, Some(ErrorKind::ArchiveFormat));
    }

    #[test]
    #[cfg(unix)]
    fn test_mode_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let cfg = sample_config(temp_dir.path());
        let script = cfg.join("hook.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();
        let restore = temp_dir.path().join("restore");

        decompress_to_dir(&compress_dir(&cfg).unwrap(), &restore).unwrap();

        let mode = fs::metadata(restore.join("hook.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[test]
    #[cfg(unix)]
    #[traced_test]
    fn test_symlinks_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let cfg = sample_config(temp_dir.path());
        // A link back to the exported directory forms a cycle.
        std::os::unix::fs::symlink(&cfg, cfg.join("servers").join("loop")).unwrap();
        std::os::unix::fs::symlink(cfg.join("settings.ini"), cfg.join("alias.ini")).unwrap();

        let zip_data = compress_dir(&cfg).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(zip_data)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_owned())
            .collect();
        assert_eq!(names.len(), 5);
        assert!(!names.iter().any(|n| n.starts_with("conan/servers/loop")));
        assert!(!names.iter().any(|n| n == "conan/alias.ini"));
        assert!(logs_contain("skipping symbolic link"));
    }

    #[test]
    fn test_sealed_roundtrip_and_wrong_password() {
        let temp_dir = TempDir::new().unwrap();
        let cfg = sample_config(temp_dir.path());
        let backup = temp_dir.path().join("backup.cnn");
        let restore = temp_dir.path().join("restore");

        export_config_to_file(&cfg, "hunter2", &backup).unwrap();

        let err = import_config_from_file(&backup, "hunter3", &restore).expect_err("wrong password");
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
        assert!(!restore.exists());

        import_config_from_file(&backup, "hunter2", &restore).unwrap();
        assert_eq!(
            fs::read_to_string(restore.join("settings.ini")).unwrap(),
            "[General]\nenckey=K1\n"
        );
    }
}
