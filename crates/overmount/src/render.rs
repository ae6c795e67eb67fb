//! The projection engine: base + overlays -> view
//!
//! A render pass stitches the immutable base into the view as symlinks,
//! stitches each overlay on top of it in declared order, ensures the
//! writable carve-outs are physical directories, applies the template
//! copies, prunes dangling symlinks, and optionally runs the ownership
//! pass. The pass is idempotent; partial progress is observable when a
//! destination error aborts it.

mod copy;
mod permissions;
mod prune;
mod stitch;

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{validate_path, TargetMode, ViewConfig};
use crate::error::{ConfigError, RenderInterrupted, Result};

pub use copy::copy_directory;
pub use prune::prune_dangling_symlinks;

/// Renders one view according to a [`ViewConfig`].
pub struct Renderer {
    cfg: ViewConfig,
}

impl Renderer {
    /// Create a renderer, validating the configured roots.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPath`] when `basePath`, `targetBase`
    /// or `targetContent` is blank.
    pub fn new(cfg: ViewConfig) -> std::result::Result<Self, ConfigError> {
        validate_path("basePath", &cfg.base_path)?;
        validate_path("targetBase", &cfg.target_base)?;
        validate_path("targetContent", &cfg.target_content)?;
        Ok(Self { cfg })
    }

    /// The configuration this renderer was built from.
    #[must_use]
    pub fn config(&self) -> &ViewConfig {
        &self.cfg
    }

    /// Execute one full render pass.
    ///
    /// `initial` is supplied by the caller (the watcher hands `true` only to
    /// its first synchronous pass); `onlyOnInit` template copies are skipped
    /// when it is `false`.
    ///
    /// Cancellation is observed between stages: once `cancel` fires the pass
    /// returns [`RenderInterrupted`] without running later stages.
    ///
    /// # Errors
    ///
    /// Any destination I/O failure aborts the pass, leaving the view in
    /// whatever partial state was reached. Missing source directories are
    /// logged and skipped.
    pub fn run(&self, cancel: &CancellationToken, initial: bool) -> Result<()> {
        self.check_cancel(cancel)?;
        stitch::stitch_tree(
            &self.cfg.base_path,
            &self.cfg.target_base,
            &self.cfg.exclude_paths,
        )
        .context("stitch base")?;

        for overlay in &self.cfg.overlays {
            self.check_cancel(cancel)?;
            stitch::stitch_tree(
                &overlay.source_path,
                &self.cfg.target_content,
                &self.cfg.exclude_paths,
            )
            .with_context(|| format!("stitch overlay {}", overlay.name))?;
        }

        self.check_cancel(cancel)?;
        self.ensure_writable_paths()?;
        self.copy_templates(initial)?;
        self.seed_writable_templates()?;

        self.check_cancel(cancel)?;
        prune::prune_dangling_symlinks(&[&self.cfg.target_base, &self.cfg.target_content])?;

        if self.cfg.permissions.apply_during_merge {
            let mode = permissions::parse_mode(&self.cfg.permissions.mode)
                .context("permissions mode")?;
            permissions::apply(
                &self.cfg.permissions.apply_paths,
                self.cfg.permissions.user,
                self.cfg.permissions.group,
                mode,
            )?;
        }
        Ok(())
    }

    fn check_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            bail!(RenderInterrupted);
        }
        Ok(())
    }

    /// Make every carve-out a physical directory, removing any symlink
    /// sitting at its root first. Host-mount preparation is best-effort.
    fn ensure_writable_paths(&self) -> Result<()> {
        for wp in &self.cfg.writable_paths {
            let dir = self.cfg.target_base.join(&wp.path);
            if fs::symlink_metadata(&dir).map(|m| m.is_symlink()).unwrap_or(false) {
                fs::remove_file(&dir).with_context(|| {
                    format!("replace symlink with writable dir {}", dir.display())
                })?;
            }
            fs::create_dir_all(&dir)
                .with_context(|| format!("ensure writable {}", wp.path.display()))?;

            if let Some(host_mount) = &wp.host_mount {
                let host_dir = host_mount.join(&wp.path);
                if let Err(e) = fs::create_dir_all(&host_dir) {
                    warn!(
                        host_mount = %host_mount.display(),
                        error = %e,
                        "unable to prep host mount, continuing"
                    );
                }
            }
        }
        Ok(())
    }

    fn copy_templates(&self, initial: bool) -> Result<()> {
        for tpl in &self.cfg.copy_templates {
            if tpl.only_on_init && !initial {
                debug!(
                    target_path = %tpl.target_path.display(),
                    "skipping init-only template on re-render"
                );
                continue;
            }
            let src = tpl.source_mount.join(&tpl.source_path);
            let dest_root: &Path = match tpl.target_mode {
                TargetMode::Writable => &self.cfg.target_content,
                TargetMode::Base => &self.cfg.target_base,
            };
            let dest = dest_root.join(&tpl.target_path);
            copy::copy_directory(&src, &dest, tpl.clean, tpl.dereference_symlinks)
                .with_context(|| {
                    format!("copy template {} -> {}", src.display(), dest.display())
                })?;
        }
        Ok(())
    }

    fn seed_writable_templates(&self) -> Result<()> {
        for wp in &self.cfg.writable_paths {
            let Some(template) = &wp.template else {
                continue;
            };
            let src = template.source_mount.join(&template.source_path);
            let dest = self.cfg.target_base.join(&wp.path);
            copy::copy_directory(&src, &dest, template.clean, false).with_context(|| {
                format!(
                    "seed writable template {} -> {}",
                    src.display(),
                    dest.display()
                )
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CopyTemplate, Overlay, WritablePath, WritableTemplate};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::fs as unix_fs;

    fn view_config(tmp: &TempDir) -> ViewConfig {
        let base = tmp.path().join("base");
        let view = tmp.path().join("view");
        fs::create_dir_all(&base).unwrap();
        ViewConfig {
            base_path: base,
            target_base: view.clone(),
            target_content: view.join("game"),
            overlays: Vec::new(),
            writable_paths: Vec::new(),
            copy_templates: Vec::new(),
            exclude_paths: Vec::new(),
            permissions: Default::default(),
        }
    }

    fn render(cfg: ViewConfig) {
        Renderer::new(cfg)
            .unwrap()
            .run(&CancellationToken::new(), true)
            .unwrap();
    }

    #[test]
    fn test_rejects_blank_roots() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = view_config(&tmp);
        cfg.target_content = PathBuf::new();
        assert!(Renderer::new(cfg).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_base_passthrough_symlinks_resolve_to_base_bytes() {
        let tmp = TempDir::new().unwrap();
        let cfg = view_config(&tmp);
        fs::write(cfg.base_path.join("file.txt"), "base").unwrap();

        render(cfg.clone());

        let rendered = cfg.target_base.join("file.txt");
        assert!(fs::symlink_metadata(&rendered).unwrap().is_symlink());
        assert_eq!(fs::read_to_string(&rendered).unwrap(), "base");
        // Targets are absolute and point into the base.
        let target = fs::read_link(&rendered).unwrap();
        assert!(target.is_absolute());
        assert!(target.starts_with(&cfg.base_path));
    }

    #[test]
    #[cfg(unix)]
    fn test_last_overlay_wins() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = view_config(&tmp);
        fs::write(cfg.base_path.join("x.cfg"), "b").unwrap();

        for (name, body) in [("o1", "o1"), ("o2", "o2")] {
            let src = tmp.path().join(name);
            fs::create_dir_all(&src).unwrap();
            fs::write(src.join("x.cfg"), body).unwrap();
            cfg.overlays.push(Overlay {
                name: name.to_string(),
                source_path: src,
            });
        }

        render(cfg.clone());

        assert_eq!(
            fs::read_to_string(cfg.target_content.join("x.cfg")).unwrap(),
            "o2"
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_writable_carveout_with_template_is_physical() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = view_config(&tmp);
        let mount = tmp.path().join("templates");
        fs::create_dir_all(mount.join("cfg")).unwrap();
        fs::write(mount.join("cfg/server.cfg"), "cfg").unwrap();
        cfg.writable_paths.push(WritablePath {
            path: PathBuf::from("tf/cfg"),
            host_mount: None,
            template: Some(WritableTemplate {
                source_mount: mount,
                source_path: PathBuf::from("cfg"),
                clean: true,
            }),
        });

        render(cfg.clone());

        let carveout = cfg.target_base.join("tf/cfg");
        assert!(carveout.is_dir());
        assert!(!fs::symlink_metadata(&carveout).unwrap().is_symlink());
        let seeded = carveout.join("server.cfg");
        assert!(!fs::symlink_metadata(&seeded).unwrap().is_symlink());
        assert_eq!(fs::read_to_string(&seeded).unwrap(), "cfg");
    }

    #[test]
    #[cfg(unix)]
    fn test_carveout_replaces_stitched_symlink() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = view_config(&tmp);
        fs::create_dir_all(cfg.base_path.join("data")).unwrap();
        fs::write(cfg.base_path.join("data/seed.txt"), "s").unwrap();
        render(cfg.clone());

        // A later config turns a stitched path into a carve-out root.
        unix_fs::symlink(&cfg.base_path, cfg.target_base.join("late")).unwrap();
        cfg.writable_paths.push(WritablePath {
            path: PathBuf::from("late"),
            host_mount: None,
            template: None,
        });
        render(cfg.clone());

        let root = cfg.target_base.join("late");
        assert!(root.is_dir());
        assert!(!fs::symlink_metadata(&root).unwrap().is_symlink());
    }

    #[test]
    #[cfg(unix)]
    fn test_only_on_init_preserves_edits() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = view_config(&tmp);
        let mount = tmp.path().join("templates");
        fs::create_dir_all(mount.join("seed")).unwrap();
        fs::write(mount.join("seed/initial.cfg"), "initial").unwrap();
        cfg.copy_templates.push(CopyTemplate {
            source_mount: mount,
            source_path: PathBuf::from("seed"),
            target_path: PathBuf::from("seed"),
            clean: false,
            target_mode: TargetMode::Base,
            only_on_init: true,
            dereference_symlinks: false,
        });

        let renderer = Renderer::new(cfg.clone()).unwrap();
        let cancel = CancellationToken::new();
        renderer.run(&cancel, true).unwrap();

        let seeded = cfg.target_base.join("seed/initial.cfg");
        assert_eq!(fs::read_to_string(&seeded).unwrap(), "initial");

        fs::write(&seeded, "modified").unwrap();
        renderer.run(&cancel, false).unwrap();
        assert_eq!(fs::read_to_string(&seeded).unwrap(), "modified");
    }

    #[test]
    #[cfg(unix)]
    fn test_exclude_paths_skip_subtrees() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = view_config(&tmp);
        fs::create_dir_all(cfg.base_path.join("logs")).unwrap();
        fs::write(cfg.base_path.join("logs/old.log"), "x").unwrap();
        fs::write(cfg.base_path.join("keep.txt"), "k").unwrap();
        cfg.exclude_paths.push(PathBuf::from("logs"));

        render(cfg.clone());

        assert!(cfg.target_base.join("keep.txt").exists());
        assert!(!cfg.target_base.join("logs").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_render_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = view_config(&tmp);
        fs::create_dir_all(cfg.base_path.join("maps")).unwrap();
        fs::write(cfg.base_path.join("maps/cp_a.bsp"), "map").unwrap();
        fs::write(cfg.base_path.join("motd.txt"), "hi").unwrap();
        let ov = tmp.path().join("ov");
        fs::create_dir_all(&ov).unwrap();
        fs::write(ov.join("motd.txt"), "ov").unwrap();
        cfg.overlays.push(Overlay {
            name: "ov".into(),
            source_path: ov,
        });

        render(cfg.clone());
        let snapshot = |root: &Path| -> Vec<(PathBuf, bool)> {
            let mut v: Vec<_> = crate::walker::walk(root)
                .map(|e| {
                    let e = e.unwrap();
                    (e.rel, e.kind == crate::walker::EntryKind::Symlink)
                })
                .collect();
            v.sort();
            v
        };
        let first = snapshot(&cfg.target_base);
        render(cfg.clone());
        assert_eq!(first, snapshot(&cfg.target_base));
    }

    #[test]
    #[cfg(unix)]
    fn test_prune_removes_links_to_vanished_sources() {
        let tmp = TempDir::new().unwrap();
        let cfg = view_config(&tmp);
        fs::write(cfg.base_path.join("gone.txt"), "g").unwrap();
        fs::write(cfg.base_path.join("stays.txt"), "s").unwrap();
        render(cfg.clone());

        fs::remove_file(cfg.base_path.join("gone.txt")).unwrap();
        render(cfg.clone());

        assert!(fs::symlink_metadata(cfg.target_base.join("gone.txt")).is_err());
        assert!(cfg.target_base.join("stays.txt").exists());
    }

    #[test]
    fn test_missing_overlay_source_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = view_config(&tmp);
        cfg.overlays.push(Overlay {
            name: "ghost".into(),
            source_path: tmp.path().join("does-not-exist"),
        });
        render(cfg);
    }

    #[test]
    fn test_cancelled_token_interrupts_before_work() {
        let tmp = TempDir::new().unwrap();
        let cfg = view_config(&tmp);
        fs::write(cfg.base_path.join("file.txt"), "base").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Renderer::new(cfg.clone())
            .unwrap()
            .run(&cancel, true)
            .unwrap_err();
        assert!(err.is::<RenderInterrupted>());
        assert!(!cfg.target_base.join("file.txt").exists());
    }
}
