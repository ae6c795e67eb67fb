//! One-shot decompression role

use std::path::{Path, PathBuf};

use tracing::info;

use overmount::decompress::Decompressor;

pub fn execute(
    paths: Vec<PathBuf>,
    cache: Option<&Path>,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!(roots = paths.len(), "decompressor starting");

    let mut pipeline = Decompressor::new(paths);
    if let Some(cache) = cache {
        pipeline = pipeline.with_cache(cache);
    }
    if let Some(dir) = output_dir {
        pipeline = pipeline.with_output_dir(dir);
    }
    pipeline.run()?;
    Ok(())
}
