//! # overmount
//!
//! Core library for the overmount content renderer.
//!
//! overmount projects an immutable base directory plus ordered overlay
//! directories into a single view directory as symlinks, carving out
//! configured subtrees as physical writable copies. A watcher sidecar
//! re-renders the view on debounced filesystem events, and a one-shot
//! decompression pipeline expands bzip2 payloads before the first render.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Core error types for the overmount library
pub mod error {
    use std::path::PathBuf;

    /// Result type alias using `anyhow::Error`
    pub type Result<T> = anyhow::Result<T>;

    /// Errors raised while loading configuration from the environment.
    ///
    /// Callers match on `MissingEnv` to distinguish "no config delivered"
    /// (the watcher falls back to defaults) from a malformed document
    /// (always fatal).
    #[derive(Debug, thiserror::Error)]
    pub enum ConfigError {
        /// The named environment variable is unset or blank.
        #[error("configuration env {0} is missing or blank")]
        MissingEnv(String),

        /// The environment variable held invalid JSON.
        #[error("cannot parse configuration env {env}: {source}")]
        Parse {
            /// Name of the offending environment variable.
            env: String,
            /// Underlying JSON error.
            #[source]
            source: serde_json::Error,
        },

        /// A required path field is blank or does not name a usable location.
        #[error("invalid {field}: {path:?}")]
        InvalidPath {
            /// Which configuration field failed validation.
            field: &'static str,
            /// The rejected value.
            path: PathBuf,
        },
    }

    /// Marker error for cooperative cancellation of a render pass.
    ///
    /// Propagated verbatim to the supervisor; never logged as an error.
    #[derive(Debug, thiserror::Error)]
    #[error("render interrupted by shutdown")]
    pub struct RenderInterrupted;
}

/// Typed configuration records and env-var JSON delivery
pub mod config;

/// Directory tree enumeration and entry classification
pub mod walker;

/// The projection engine: base + overlays -> view
pub mod render;

/// Filesystem watch scheduler with debounced and immediate lanes
pub mod watch;

/// bzip2 payload decompression with an optional SHA-256 cache
pub mod decompress;
