//! Physical directory copies for templates and carve-out seeding

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, warn};

use crate::error::Result;
use crate::walker::{self, EntryKind};

use std::os::unix::fs as unix_fs;
use std::os::unix::fs::PermissionsExt;

/// Copy `src` into `dest` as physical entries.
///
/// `clean` wipes the destination tree first, then recreates it empty with
/// the source root's mode bits. Directories and regular files preserve the
/// source's permission bits; an existing file or symlink at a destination is
/// removed before the copy. Symlinks in the source are re-created verbatim
/// unless `dereference` is set, in which case the resolved file's bytes are
/// copied instead. Other entry types are skipped.
///
/// A missing source is logged and treated as success.
///
/// # Errors
///
/// Any other I/O failure aborts the copy.
pub fn copy_directory(src: &Path, dest: &Path, clean: bool, dereference: bool) -> Result<()> {
    let src_meta = match fs::metadata(src) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(source = %src.display(), "template source missing, skipping");
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("stat source {}", src.display()));
        }
    };
    debug!(src = %src.display(), dest = %dest.display(), clean, "copying directory");

    if clean {
        match fs::remove_dir_all(dest) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("clean {}", dest.display()));
            }
        }
    }
    create_dir_with_mode(dest, source_mode(&src_meta))?;

    for entry in walker::walk(src) {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let target = dest.join(&entry.rel);
        match entry.kind {
            EntryKind::Dir => {
                create_dir_with_mode(&target, entry.mode)?;
            }
            EntryKind::File => {
                copy_file(&entry.path, &target)?;
            }
            EntryKind::Symlink if dereference => {
                dereference_symlink(&entry.path, &target)?;
            }
            EntryKind::Symlink => {
                let link_target = fs::read_link(&entry.path)
                    .with_context(|| format!("readlink {}", entry.path.display()))?;
                remove_existing(&target)?;
                unix_fs::symlink(&link_target, &target).with_context(|| {
                    format!("link {} -> {}", target.display(), link_target.display())
                })?;
            }
            EntryKind::Other => {}
        }
    }
    Ok(())
}

fn source_mode(meta: &fs::Metadata) -> u32 {
    meta.permissions().mode() & 0o7777
}

fn create_dir_with_mode(dir: &Path, mode: u32) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    fs::set_permissions(dir, fs::Permissions::from_mode(mode))
        .with_context(|| format!("chmod {}", dir.display()))?;
    Ok(())
}

/// Byte-for-byte copy preserving permission bits; replaces whatever sits at
/// the destination.
fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    remove_existing(dest)?;
    fs::copy(src, dest)
        .with_context(|| format!("copy {} to {}", src.display(), dest.display()))?;
    Ok(())
}

/// Copy the bytes a source symlink resolves to. Dangling links and links to
/// non-files are logged and skipped.
fn dereference_symlink(src: &Path, dest: &Path) -> Result<()> {
    match fs::metadata(src) {
        Ok(meta) if meta.is_file() => copy_file(src, dest),
        Ok(_) => {
            debug!(source = %src.display(), "symlink does not resolve to a file, skipping");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(source = %src.display(), "dangling symlink in template, skipping");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("stat {}", src.display())),
    }
}

fn remove_existing(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}
