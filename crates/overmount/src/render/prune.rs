//! Dangling-symlink removal after a render pass

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::error::Result;
use crate::walker::{self, EntryKind};

/// Walk each root and unlink every symlink whose target no longer resolves.
///
/// Only a follow-stat failing with `NotFound` triggers removal; any other
/// stat error leaves the link alone, so carve-out links pointing at live
/// host paths survive even when those paths are unreadable to us.
///
/// # Errors
///
/// Walk failures and unlink failures abort the prune.
pub fn prune_dangling_symlinks(roots: &[&Path]) -> Result<()> {
    for root in roots {
        if !root.exists() {
            continue;
        }
        for entry in walker::walk(root) {
            let entry = entry.with_context(|| format!("walk {}", root.display()))?;
            if entry.kind != EntryKind::Symlink {
                continue;
            }
            match fs::metadata(&entry.path) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %entry.path.display(), "pruning dangling symlink");
                    match fs::remove_file(&entry.path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(e).with_context(|| {
                                format!("prune {}", entry.path.display())
                            });
                        }
                    }
                }
                // Unreadable targets are not our links to prune.
                Err(_) => {}
            }
        }
    }
    Ok(())
}
