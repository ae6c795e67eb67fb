//! Filesystem watch scheduler
//!
//! Couples filesystem change notifications (and an optional poll ticker) to
//! render passes through two request lanes:
//!
//! - the **debounced lane** carries tokens derived from filesystem events;
//!   the merge loop waits for a quiescence window before rendering so a
//!   burst of events converges to a single pass;
//! - the **immediate lane** carries poll ticks; a tick cancels any armed
//!   debounce timer and renders at once.
//!
//! Both lanes are capacity-1 channels with drop-on-full sends, which is what
//! coalesces request storms. A single consumer owns the debounce timer, so
//! two renders can never run concurrently.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::error::{RenderInterrupted, Result};
use crate::render::Renderer;

/// Anything the scheduler can ask to re-render the view.
///
/// The watcher only needs this one operation; the seam keeps the merge-loop
/// state machine testable without touching a filesystem.
pub trait RenderTarget {
    /// Run one render pass. `initial` is true only for the first pass of a
    /// scheduler's lifetime.
    ///
    /// # Errors
    ///
    /// Implementations report render failures; cancellation surfaces as
    /// [`RenderInterrupted`].
    fn render(&self, cancel: &CancellationToken, initial: bool) -> Result<()>;
}

impl RenderTarget for Renderer {
    fn render(&self, cancel: &CancellationToken, initial: bool) -> Result<()> {
        self.run(cancel, initial)
    }
}

/// Which filesystem operations feed the debounced lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EventFilter {
    create: bool,
    write: bool,
    remove: bool,
    rename: bool,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            create: true,
            write: true,
            remove: true,
            rename: true,
        }
    }
}

impl EventFilter {
    /// Build a filter from configured operation names; an empty list keeps
    /// everything, unknown names are logged and ignored.
    fn from_names(names: &[String]) -> Self {
        if names.is_empty() {
            return Self::default();
        }
        let mut filter = Self {
            create: false,
            write: false,
            remove: false,
            rename: false,
        };
        for name in names {
            match name.to_ascii_lowercase().as_str() {
                "create" => filter.create = true,
                "write" => filter.write = true,
                "remove" => filter.remove = true,
                "rename" => filter.rename = true,
                other => warn!(event = other, "unknown watch event name, ignoring"),
            }
        }
        filter
    }

    fn allows(&self, kind: &EventKind) -> bool {
        match kind {
            EventKind::Create(_) => self.create,
            EventKind::Remove(_) => self.remove,
            EventKind::Modify(ModifyKind::Name(_)) => self.rename,
            EventKind::Modify(ModifyKind::Metadata(_)) => false,
            EventKind::Modify(_) => self.write,
            _ => false,
        }
    }
}

/// Long-lived scheduler tying a [`RenderTarget`] to filesystem activity.
pub struct WatchManager<R> {
    renderer: Arc<R>,
    cfg: WatcherConfig,
    debounce: Duration,
    filter: EventFilter,
}

impl<R: RenderTarget + Send + Sync + 'static> WatchManager<R> {
    /// Create a scheduler. The debounce window is clamped to at least one
    /// second.
    #[must_use]
    pub fn new(renderer: R, cfg: WatcherConfig) -> Self {
        let debounce = Duration::from_secs(cfg.debounce_seconds.max(1));
        let filter = EventFilter::from_names(&cfg.events);
        Self {
            renderer: Arc::new(renderer),
            cfg,
            debounce,
            filter,
        }
    }

    /// Run until cancelled.
    ///
    /// The first render pass runs synchronously and fail-stops, so a broken
    /// configuration surfaces immediately instead of entering a retry loop.
    /// Every later render failure is logged and the loop continues.
    ///
    /// # Errors
    ///
    /// Returns the initial render's error verbatim, or [`RenderInterrupted`]
    /// once `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("running initial render");
        self.renderer.render(&cancel, true).context("initial render")?;
        info!("initial render complete");

        let (debounced_tx, debounced_rx) = mpsc::channel::<()>(1);
        let (immediate_tx, immediate_rx) = mpsc::channel::<()>(1);

        let consumer = tokio::spawn(merge_loop(
            Arc::clone(&self.renderer),
            cancel.clone(),
            self.debounce,
            debounced_rx,
            immediate_rx,
        ));

        let result = self.event_loop(&cancel, debounced_tx, immediate_tx).await;
        let _ = consumer.await;
        result
    }

    /// Producer side: multiplex notify events and poll ticks into the lanes.
    async fn event_loop(
        &self,
        cancel: &CancellationToken,
        debounced_tx: mpsc::Sender<()>,
        immediate_tx: mpsc::Sender<()>,
    ) -> Result<()> {
        if self.cfg.watch_paths.is_empty() {
            let interval = self.poll_interval().unwrap_or(self.debounce);
            info!(interval_secs = interval.as_secs(), "no watch paths, polling only");
            return poll_only(cancel, &immediate_tx, interval).await;
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        match self.subscribe(raw_tx) {
            Ok(watcher) => {
                // Dropping the watcher tears down the subscriptions; keep it
                // alive for the whole loop.
                let _watcher = watcher;
                self.watch_loop(cancel, raw_rx, &debounced_tx, &immediate_tx)
                    .await
            }
            Err(e) => {
                let interval = self.poll_interval().unwrap_or(2 * self.debounce);
                warn!(
                    error = %format!("{e:#}"),
                    interval_secs = interval.as_secs(),
                    "filesystem subscription failed, falling back to polling"
                );
                poll_only(cancel, &immediate_tx, interval).await
            }
        }
    }

    /// Subscribe to every configured watch path, creating missing ones
    /// first. Any subscription failure makes the whole attempt fail so the
    /// caller can fall back to polling.
    fn subscribe(
        &self,
        raw_tx: mpsc::UnboundedSender<notify::Result<notify::Event>>,
    ) -> Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .context("create filesystem watcher")?;

        let mode = if self.cfg.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        for path in &self.cfg.watch_paths {
            if path.as_os_str().is_empty() {
                continue;
            }
            if let Err(e) = std::fs::create_dir_all(path) {
                warn!(path = %path.display(), error = %e, "cannot create watch path, skipping");
                continue;
            }
            watcher
                .watch(path, mode)
                .with_context(|| format!("add watch for {}", path.display()))?;
            debug!(path = %path.display(), "watching");
        }
        Ok(watcher)
    }

    async fn watch_loop(
        &self,
        cancel: &CancellationToken,
        mut raw_rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
        debounced_tx: &mpsc::Sender<()>,
        immediate_tx: &mpsc::Sender<()>,
    ) -> Result<()> {
        let mut poll = self.poll_interval().map(new_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(RenderInterrupted.into()),
                _ = tick(&mut poll) => {
                    request(immediate_tx);
                }
                event = raw_rx.recv() => match event {
                    Some(Ok(event)) => {
                        if self.filter.allows(&event.kind) {
                            request(debounced_tx);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "watch error"),
                    // The watcher handle outlives this loop, so the stream
                    // only closes on teardown.
                    None => anyhow::bail!("filesystem event stream closed"),
                },
            }
        }
    }

    fn poll_interval(&self) -> Option<Duration> {
        (self.cfg.poll_interval_seconds > 0)
            .then(|| Duration::from_secs(self.cfg.poll_interval_seconds))
    }
}

/// Immediate-lane loop for configurations without usable subscriptions.
async fn poll_only(
    cancel: &CancellationToken,
    immediate_tx: &mpsc::Sender<()>,
    interval: Duration,
) -> Result<()> {
    let mut ticker = new_interval(interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Err(RenderInterrupted.into()),
            _ = ticker.tick() => request(immediate_tx),
        }
    }
}

/// First tick one full period out; renders can outlast a period, so missed
/// ticks are delayed rather than bursted.
fn new_interval(period: Duration) -> time::Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(poll: &mut Option<time::Interval>) -> Instant {
    match poll {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}

/// Capacity-1 drop-on-full send; a full lane already guarantees a render.
fn request(lane: &mpsc::Sender<()>) {
    let _ = lane.try_send(());
}

/// Consumer side: the idle/debouncing state machine.
///
/// - idle + debounced token: arm the timer;
/// - debouncing + debounced token: drop (a pass is already due);
/// - immediate token: disarm the timer and render now;
/// - timer expiry: render and return to idle.
async fn merge_loop<R: RenderTarget>(
    renderer: Arc<R>,
    cancel: CancellationToken,
    debounce: Duration,
    mut debounced_rx: mpsc::Receiver<()>,
    mut immediate_rx: mpsc::Receiver<()>,
) {
    let timer = time::sleep(Duration::ZERO);
    tokio::pin!(timer);
    let mut pending = false;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            token = debounced_rx.recv() => match token {
                Some(()) => {
                    if !pending {
                        pending = true;
                        timer.as_mut().reset(Instant::now() + debounce);
                    }
                }
                // Producer gone; nothing further can arrive.
                None => return,
            },
            token = immediate_rx.recv() => match token {
                Some(()) => {
                    pending = false;
                    run_render(renderer.as_ref(), &cancel);
                }
                None => return,
            },
            () = timer.as_mut(), if pending => {
                pending = false;
                run_render(renderer.as_ref(), &cancel);
            }
        }
    }
}

fn run_render<R: RenderTarget>(renderer: &R, cancel: &CancellationToken) {
    debug!("render requested");
    if let Err(e) = renderer.render(cancel, false) {
        if e.is::<RenderInterrupted>() {
            return;
        }
        warn!(error = %format!("{e:#}"), "render failed");
    }
}
