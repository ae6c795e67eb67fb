//! Post-render ownership and mode application

use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::{lchown, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::Result;
use crate::walker::{self, EntryKind};

const DEFAULT_MODE: u32 = 0o755;

/// Parse an octal mode string; blank means `0755`.
///
/// # Errors
///
/// Returns an error when the string is not a valid octal number.
pub fn parse_mode(value: &str) -> Result<u32> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(DEFAULT_MODE);
    }
    u32::from_str_radix(value, 8).with_context(|| format!("invalid octal mode {value:?}"))
}

/// Walk each non-blank root applying `lchown(uid, gid)` to every entry and
/// `chmod(mode)` to non-symlinks (chmod follows links, chown must not).
///
/// Permission-denied, read-only-filesystem, and not-found failures are
/// ignored so the pass works on read-only tmpfs mounts; anything else
/// aborts.
pub fn apply(roots: &[PathBuf], uid: u32, gid: u32, mode: u32) -> Result<()> {
    for root in roots {
        if root.as_os_str().is_empty() || root.to_string_lossy().trim().is_empty() {
            continue;
        }
        if !root.exists() {
            continue;
        }
        apply_one(root, fs::symlink_metadata(root).map(|m| m.is_symlink()), uid, gid, mode)?;
        for entry in walker::walk(root) {
            let entry = entry.with_context(|| format!("walk {}", root.display()))?;
            apply_one(
                &entry.path,
                Ok(entry.kind == EntryKind::Symlink),
                uid,
                gid,
                mode,
            )?;
        }
    }
    Ok(())
}

fn apply_one(
    path: &Path,
    is_symlink: io::Result<bool>,
    uid: u32,
    gid: u32,
    mode: u32,
) -> Result<()> {
    if let Err(e) = lchown(path, Some(uid), Some(gid)) {
        if !ignorable(&e) {
            return Err(e).with_context(|| format!("chown {}", path.display()));
        }
    }
    if let Ok(false) = is_symlink {
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
            if !ignorable(&e) {
                return Err(e).with_context(|| format!("chmod {}", path.display()));
            }
        }
    }
    Ok(())
}

fn ignorable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::PermissionDenied | ErrorKind::NotFound | ErrorKind::ReadOnlyFilesystem
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs as unix_fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_mode_blank_defaults() {
        assert_eq!(parse_mode("").unwrap(), 0o755);
        assert_eq!(parse_mode("  ").unwrap(), 0o755);
    }

    #[test]
    fn test_parse_mode_octal() {
        assert_eq!(parse_mode("0775").unwrap(), 0o775);
        assert_eq!(parse_mode("644").unwrap(), 0o644);
    }

    #[test]
    fn test_parse_mode_rejects_garbage() {
        assert!(parse_mode("rwxr-xr-x").is_err());
        assert!(parse_mode("999").is_err());
    }

    #[test]
    fn test_apply_chmods_files_but_not_symlinks() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        let file = root.join("plain.cfg");
        fs::write(&file, "x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o600)).unwrap();
        unix_fs::symlink(&file, root.join("alias.cfg")).unwrap();

        // Chown to the file's current ids is a no-op that always succeeds.
        use std::os::unix::fs::MetadataExt;
        let meta = fs::metadata(&file).unwrap();
        apply(&[root.clone()], meta.uid(), meta.gid(), 0o664).unwrap();

        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o664);
        assert!(fs::symlink_metadata(root.join("alias.cfg"))
            .unwrap()
            .is_symlink());
    }

    #[test]
    fn test_apply_skips_blank_and_missing_roots() {
        let tmp = TempDir::new().unwrap();
        apply(
            &[PathBuf::new(), tmp.path().join("absent")],
            0,
            0,
            0o755,
        )
        .unwrap();
    }
}
