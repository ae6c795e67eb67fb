use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Game-server content tree renderer
///
/// Projects an immutable base plus ordered overlays into a view directory,
/// watches sources for changes, and expands bzip2 payloads before the first
/// render
#[derive(Parser, Debug)]
#[command(name = "overmount")]
#[command(about, long_about = None, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render the view once and exit
    Render {
        /// Environment variable holding the view configuration JSON
        #[arg(long, value_name = "NAME", default_value = "RENDER_CONFIG")]
        config_env: String,
    },

    /// Render, then re-render on filesystem changes until terminated
    Watch {
        /// Environment variable holding the view configuration JSON
        #[arg(long, value_name = "NAME", default_value = "RENDER_CONFIG")]
        config_env: String,

        /// Environment variable holding the watcher configuration JSON
        #[arg(long, value_name = "NAME", default_value = "WATCHER_CONFIG")]
        watcher_env: String,
    },

    /// Expand bzip2 payloads below the given roots
    Decompress {
        /// Directory to scan for .bz2 files and split-map folders; repeatable
        #[arg(long = "path", value_name = "DIR", required = true)]
        paths: Vec<PathBuf>,

        /// Cache file tracking decompressed artifacts by size and SHA-256
        #[arg(long, value_name = "FILE")]
        cache: Option<PathBuf>,

        /// Write artifacts below this directory instead of next to their
        /// sources (sources are then kept)
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
}
