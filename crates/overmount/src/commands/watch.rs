//! Long-lived watcher role

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use overmount::config::{self, ViewConfig, WatcherConfig};
use overmount::error::{ConfigError, RenderInterrupted};
use overmount::render::Renderer;
use overmount::watch::WatchManager;

pub fn execute(config_env: &str, watcher_env: &str) -> anyhow::Result<()> {
    let view_cfg: ViewConfig = config::from_env(config_env).context("load view config")?;

    // A missing watcher document just means defaults; a malformed one is
    // still fatal.
    let watcher_cfg: WatcherConfig = match config::from_env(watcher_env) {
        Ok(cfg) => cfg,
        Err(ConfigError::MissingEnv(env)) => {
            warn!(env, "watcher config env missing, using defaults");
            WatcherConfig::default()
        }
        Err(e) => return Err(e).context("load watcher config"),
    };
    info!(
        base = %view_cfg.base_path.display(),
        target_base = %view_cfg.target_base.display(),
        watch_paths = watcher_cfg.watch_paths.len(),
        debounce_secs = watcher_cfg.debounce_seconds,
        poll_secs = watcher_cfg.poll_interval_seconds,
        "watcher starting"
    );

    let renderer = Renderer::new(view_cfg)?;
    let manager = WatchManager::new(renderer, watcher_cfg);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build runtime")?;

    runtime.block_on(async {
        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            signal_cancel.cancel();
        });

        match manager.run(cancel).await {
            Err(e) if e.is::<RenderInterrupted>() => {
                info!("watcher stopped");
                Ok(())
            }
            other => other,
        }
    })
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
