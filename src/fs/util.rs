//! Filesystem helpers.
//!
//! Directory permission checks are probe-based: the concrete operations are
//! attempted and their outcome reported, which works the same way on Linux,
//! macOS and Windows regardless of permission-bit semantics.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Result of probing directory permissions for the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirPermissions {
    pub read: bool,
    pub write: bool,
    /// "traverse" on Unix; ability to canonicalize/enter the dir.
    pub execute: bool,
}

/// Probe read, write and traverse permissions on `dir` by attempting real
/// operations: listing entries, creating an ephemeral file, canonicalizing.
pub fn check_dir_permissions<P: AsRef<Path>>(dir: P) -> DirPermissions {
    let dir = dir.as_ref();

    match fs::metadata(dir) {
        Ok(md) if md.is_dir() => {}
        _ => {
            return DirPermissions {
                read: false,
                write: false,
                execute: false,
            };
        }
    }

    let read_ok = fs::read_dir(dir).is_ok();
    let exec_ok = fs::canonicalize(dir).is_ok();
    let write_ok = try_create_ephemeral_file(dir).unwrap_or(false);

    DirPermissions {
        read: read_ok,
        write: write_ok,
        execute: exec_ok,
    }
}

fn try_create_ephemeral_file(dir: &Path) -> io::Result<bool> {
    // The dot prefix keeps the probe file out of the event pipeline.
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let filename = format!(".perm_check_{}_{}.tmp", std::process::id(), millis);
    let path: PathBuf = dir.join(filename);

    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(file) => {
            drop(file);
            let _ = fs::remove_file(&path);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(true),
        Err(_) => Ok(false),
    }
}

/// Expand a leading `~/` (or a bare `~`) to `$HOME`. Other paths pass
/// through unchanged, as does everything when HOME is unset.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{}", home, rest);
        }
        return path.to_string();
    }
    if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return home;
        }
    }
    path.to_string()
}
