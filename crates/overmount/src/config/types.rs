//! Configuration types shared by the renderer and the watcher

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Full description of one rendered view: the immutable base, the ordered
/// overlays stitched on top of it, the writable carve-outs, and the physical
/// template copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfig {
    /// Root of the immutable base tree.
    pub base_path: PathBuf,

    /// Root of the rendered view.
    pub target_base: PathBuf,

    /// Subdirectory of `target_base` into which overlays are stitched.
    /// Equal to `target_base` or a child of it.
    pub target_content: PathBuf,

    /// Ordered overlay layers; later entries win on path conflict.
    #[serde(default)]
    pub overlays: Vec<Overlay>,

    /// Subtrees of the view that must be physical writable directories.
    #[serde(default)]
    pub writable_paths: Vec<WritablePath>,

    /// Physical directory copies applied after overlay stitching.
    #[serde(default)]
    pub copy_templates: Vec<CopyTemplate>,

    /// Relative paths skipped during stitching. A listed path excludes its
    /// whole subtree, in the base as well as in every overlay.
    #[serde(default)]
    pub exclude_paths: Vec<PathBuf>,

    /// Optional post-render ownership and mode pass.
    #[serde(default)]
    pub permissions: PermissionPhase,
}

/// A named content layer stitched on top of the base via symlinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    /// Layer name, used only in log lines.
    pub name: String,
    /// Source directory for this layer.
    pub source_path: PathBuf,
}

/// A subtree of the view that must stay a physical directory so downstream
/// processes can write into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritablePath {
    /// Path relative to the view root.
    pub path: PathBuf,

    /// Optional host-side mount whose matching directory is created
    /// best-effort so the carve-out can be bind-mounted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_mount: Option<PathBuf>,

    /// Optional template used to seed the carve-out with physical files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<WritableTemplate>,
}

/// How to seed a writable carve-out from a source directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritableTemplate {
    /// Mount containing the template source.
    pub source_mount: PathBuf,
    /// Path of the template below the mount.
    pub source_path: PathBuf,
    /// Wipe the destination before copying.
    #[serde(default)]
    pub clean: bool,
}

/// Destination root for a [`CopyTemplate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    /// Copy below the view root.
    #[default]
    Base,
    /// Copy below the overlay content root.
    Writable,
}

/// A physical directory copy into the view, applied after stitching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyTemplate {
    /// Mount containing the copy source.
    pub source_mount: PathBuf,
    /// Path of the source below the mount.
    pub source_path: PathBuf,
    /// Destination path below the selected target root.
    pub target_path: PathBuf,
    /// Wipe the destination before copying.
    #[serde(default)]
    pub clean: bool,
    /// Which root the destination is resolved against.
    #[serde(default)]
    pub target_mode: TargetMode,
    /// Copy only on the very first render of a watcher's lifetime, so later
    /// re-renders never clobber files the server edited in place.
    #[serde(default)]
    pub only_on_init: bool,
    /// Copy symlink targets as file bytes instead of re-creating the links
    /// verbatim. Useful when template links point at paths that will not be
    /// visible inside the rendered view.
    #[serde(default)]
    pub dereference_symlinks: bool,
}

/// Post-render ownership and mode application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionPhase {
    /// Run the pass at the end of every render.
    #[serde(default)]
    pub apply_during_merge: bool,
    /// Roots to walk.
    #[serde(default)]
    pub apply_paths: Vec<PathBuf>,
    /// Owner uid.
    #[serde(default)]
    pub user: u32,
    /// Owner gid.
    #[serde(default)]
    pub group: u32,
    /// Octal mode string; blank means `0755`.
    #[serde(default)]
    pub mode: String,
}

/// Configuration for the filesystem watcher sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherConfig {
    /// Directories to subscribe to. Empty means poll-only mode.
    #[serde(default)]
    pub watch_paths: Vec<PathBuf>,

    /// Operations that trigger a debounced render, from
    /// `create`/`write`/`remove`/`rename` (case-insensitive). Empty means
    /// all four.
    #[serde(default)]
    pub events: Vec<String>,

    /// Quiescence window before a debounced render fires. Clamped to >= 1.
    #[serde(default)]
    pub debounce_seconds: u64,

    /// Interval of the immediate-lane poll ticker. 0 disables polling.
    #[serde(default)]
    pub poll_interval_seconds: u64,

    /// Subscribe to whole subtrees instead of only the listed directories.
    #[serde(default)]
    pub recursive: bool,
}
