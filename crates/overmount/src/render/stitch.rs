//! Symlink mirroring of one source tree into the view

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::warn;

use crate::error::Result;
use crate::walker::{self, EntryKind};

use std::os::unix::fs as unix_fs;
use std::os::unix::fs::PermissionsExt;

/// Mirror `src` into `dest`: directories become real directories preserving
/// mode bits, regular files become symlinks carrying the absolute source
/// path. Existing entries at a file's destination are replaced, so a later
/// layer wins over an earlier one. Non-regular non-directory entries are
/// skipped, as is everything below a path in `excludes`.
///
/// A missing `src` is logged and skipped; a non-directory `src` is an error.
pub fn stitch_tree(src: &Path, dest: &Path, excludes: &[PathBuf]) -> Result<()> {
    let meta = match fs::metadata(src) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(source = %src.display(), "source missing, skipping layer");
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("stat source {}", src.display()));
        }
    };
    if !meta.is_dir() {
        bail!("source {} is not a directory", src.display());
    }
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;

    for entry in walker::walk(src) {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        if is_excluded(&entry.rel, excludes) {
            continue;
        }
        let target = dest.join(&entry.rel);
        match entry.kind {
            EntryKind::Dir => {
                make_dir_preserving_mode(&target, entry.mode)?;
            }
            EntryKind::File => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create {}", parent.display()))?;
                }
                replace_with_symlink(&entry.path, &target)?;
            }
            EntryKind::Symlink | EntryKind::Other => {}
        }
    }
    Ok(())
}

/// `rel` is excluded when it equals an exclude path or lies below one.
fn is_excluded(rel: &Path, excludes: &[PathBuf]) -> bool {
    excludes.iter().any(|ex| rel.starts_with(ex))
}

fn make_dir_preserving_mode(target: &Path, mode: u32) -> Result<()> {
    if target.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(target).with_context(|| format!("create {}", target.display()))?;
    fs::set_permissions(target, fs::Permissions::from_mode(mode))
        .with_context(|| format!("chmod {}", target.display()))?;
    Ok(())
}

fn replace_with_symlink(source: &Path, target: &Path) -> Result<()> {
    match fs::remove_file(target) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("remove {}", target.display()));
        }
    }
    unix_fs::symlink(source, target)
        .with_context(|| format!("link {} -> {}", target.display(), source.display()))?;
    Ok(())
}
