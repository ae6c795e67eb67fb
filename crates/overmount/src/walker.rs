//! Directory tree enumeration and entry classification
//!
//! Every tree-shaped pass in the renderer (stitching, template copies,
//! pruning, the permission pass) walks with the same rules: symlinks are
//! never followed, entries are classified up front, and paths are reported
//! relative to the walked root.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Classification of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A directory.
    Dir,
    /// A regular file.
    File,
    /// A symbolic link (target not inspected).
    Symlink,
    /// Sockets, fifos, devices; skipped by every consumer.
    Other,
}

/// One classified entry below a walked root.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// Path relative to the walked root; never empty.
    pub rel: PathBuf,
    /// Full path of the entry.
    pub path: PathBuf,
    /// Entry classification.
    pub kind: EntryKind,
    /// Permission bits, falling back to `0755` for directories and `0644`
    /// for everything else when metadata is unreadable.
    pub mode: u32,
}

const DIR_MODE_FALLBACK: u32 = 0o755;
const FILE_MODE_FALLBACK: u32 = 0o644;

/// Walk `root` depth-first without following symlinks, yielding classified
/// entries with root-relative paths. The root itself is not yielded.
///
/// Unreadable entries surface as the iterator's error items so each consumer
/// can decide between skipping and aborting.
pub fn walk(root: &Path) -> impl Iterator<Item = walkdir::Result<TreeEntry>> {
    let root = root.to_path_buf();
    WalkDir::new(&root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .map(move |entry| {
            let entry = entry?;
            let rel = entry
                .path()
                .strip_prefix(&root)
                .expect("walkdir yields paths below its root")
                .to_path_buf();
            let kind = classify(&entry);
            let mode = permission_bits(&entry, kind);
            Ok(TreeEntry {
                rel,
                path: entry.into_path(),
                kind,
                mode,
            })
        })
}

fn classify(entry: &walkdir::DirEntry) -> EntryKind {
    let ft = entry.file_type();
    if ft.is_symlink() {
        EntryKind::Symlink
    } else if ft.is_dir() {
        EntryKind::Dir
    } else if ft.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

fn permission_bits(entry: &walkdir::DirEntry, kind: EntryKind) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    entry
        .metadata()
        .map(|m| m.permissions().mode() & 0o7777)
        .unwrap_or(match kind {
            EntryKind::Dir => DIR_MODE_FALLBACK,
            _ => FILE_MODE_FALLBACK,
        })
}
