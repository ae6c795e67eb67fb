//! One-shot render role

use std::time::Instant;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use overmount::config::{self, ViewConfig};
use overmount::render::Renderer;

pub fn execute(config_env: &str) -> anyhow::Result<()> {
    let cfg: ViewConfig = config::from_env(config_env).context("load view config")?;
    info!(
        base = %cfg.base_path.display(),
        target_base = %cfg.target_base.display(),
        target_content = %cfg.target_content.display(),
        overlays = cfg.overlays.len(),
        writable = cfg.writable_paths.len(),
        copies = cfg.copy_templates.len(),
        "render starting"
    );

    let renderer = Renderer::new(cfg)?;
    let start = Instant::now();
    renderer.run(&CancellationToken::new(), true)?;
    info!(elapsed = ?start.elapsed(), "render complete");
    Ok(())
}
