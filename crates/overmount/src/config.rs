//! Configuration records and delivery
//!
//! All configuration reaches the process as a JSON document stored in an
//! environment variable whose name is selected per role on the command line.
//! This module owns the typed records for the renderer and the watcher,
//! the env-var loader, and path validation.

mod env;
mod types;

pub use env::from_env;
pub use types::{
    CopyTemplate, Overlay, PermissionPhase, TargetMode, ViewConfig, WatcherConfig, WritablePath,
    WritableTemplate,
};

use std::path::Path;

use crate::error::ConfigError;

/// Validate that a required configuration path is present and non-blank.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidPath`] when the value is empty or
/// whitespace-only.
pub fn validate_path(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() || path.to_string_lossy().trim().is_empty() {
        return Err(ConfigError::InvalidPath {
            field,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}
