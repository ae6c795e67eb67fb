//! bzip2 payload decompression
//!
//! One-shot pipeline run before the first render. Scans configured roots for
//! `.bz2` files and split-map folders (ordered `.bz2.part.*` fragments whose
//! concatenation is a single bzip2 stream), decompresses them in place or
//! under an alternate output directory, and optionally tracks results in a
//! SHA-256 cache so a later pass can detect artifacts clobbered by a sync
//! job (truncated files, Git-LFS pointers) and redo exactly those.

pub mod cache;

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use bzip2::read::BzDecoder;
use tracing::{debug, info, warn};

use crate::error::Result;
use cache::Cache;

/// Counters reported by one pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Single `.bz2` files decompressed for the first time.
    pub decompressed: usize,
    /// Split-map folders processed (assembled or already cached).
    pub split_maps: usize,
    /// Single files skipped because the output was already present/fresh.
    pub skipped: usize,
    /// Artifacts decompressed again after being overwritten on disk.
    pub redecompressed: usize,
}

impl RunSummary {
    fn any(&self) -> bool {
        self.decompressed > 0 || self.split_maps > 0 || self.skipped > 0 || self.redecompressed > 0
    }
}

/// Scans content roots and expands bzip2 payloads.
pub struct Decompressor {
    roots: Vec<PathBuf>,
    output_dir: Option<PathBuf>,
    cache: Option<Cache>,
}

impl Decompressor {
    /// Create a pipeline over the given scan roots, with no cache and
    /// in-place output.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            output_dir: None,
            cache: None,
        }
    }

    /// Track results in the cache document at `path`.
    #[must_use]
    pub fn with_cache(mut self, path: &Path) -> Self {
        self.cache = Some(Cache::load(path));
        self
    }

    /// Write decompressed artifacts under `dir` instead of next to their
    /// sources. Sources and parts folders are then left in place.
    #[must_use]
    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = Some(dir);
        self
    }

    /// Scan every root and process what was found.
    ///
    /// Per-item failures are logged and skipped; the only fatal condition is
    /// a root that cannot be stat'ed for a reason other than absence.
    ///
    /// # Errors
    ///
    /// Returns an error when a scan root is unreachable.
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        if self.roots.is_empty() {
            debug!("no scan roots configured, skipping");
            return Ok(summary);
        }

        let roots = self.roots.clone();
        for root in &roots {
            self.scan_root(root, &mut summary)
                .with_context(|| format!("decompress root {}", root.display()))?;
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save() {
                warn!(error = %e, "failed to save decompression cache");
            }
        }

        if summary.any() {
            info!(
                decompressed = summary.decompressed,
                split_maps = summary.split_maps,
                skipped = summary.skipped,
                redecompressed = summary.redecompressed,
                "decompression pass complete"
            );
        }
        Ok(summary)
    }

    fn scan_root(&mut self, root: &Path, summary: &mut RunSummary) -> Result<()> {
        match fs::metadata(root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                warn!(root = %root.display(), "scan root is not a directory, skipping");
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(root = %root.display(), "scan root does not exist, skipping");
                return Ok(());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("stat {}", root.display()));
            }
        }
        self.scan_dir(root, summary);
        Ok(())
    }

    /// Recursive scan. Split-map folders are processed without descending
    /// into them; every failure below the root is logged and skipped.
    fn scan_dir(&mut self, dir: &Path, summary: &mut RunSummary) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read directory, skipping");
                return;
            }
        };
        let mut paths: Vec<(PathBuf, bool)> = entries
            .filter_map(|entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "unreadable entry, skipping");
                        return None;
                    }
                };
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                Some((entry.path(), is_dir))
            })
            .collect();
        paths.sort();

        for (path, is_dir) in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if is_dir {
                if name.ends_with(".bsp") || name.ends_with(".bsp.bz2.parts") {
                    debug!(folder = %path.display(), "found split map folder");
                    match self.process_split_map(&path) {
                        Ok(()) => summary.split_maps += 1,
                        Err(e) => {
                            warn!(folder = %path.display(), error = %e, "split map failed");
                        }
                    }
                } else {
                    self.scan_dir(&path, summary);
                }
            } else if name.ends_with(".bz2") {
                self.handle_single_file(&path, summary);
            } else if self.cache.is_some() && self.output_dir.is_none() {
                self.handle_bare_artifact(&path, summary);
            }
        }
    }

    fn handle_single_file(&mut self, bzip_path: &Path, summary: &mut RunSummary) {
        let out_path = self.single_output_path(bzip_path);

        let mut overwrite = false;
        if let Some(cache) = &self.cache {
            match cache.staleness(&out_path) {
                None => {
                    debug!(file = %bzip_path.display(), "already decompressed and cached");
                    summary.skipped += 1;
                    return;
                }
                Some(reason) => {
                    if reason.is_overwrite() {
                        info!(file = %out_path.display(), %reason, "re-decompressing");
                        overwrite = true;
                    }
                }
            }
        } else if out_path.is_file() {
            debug!(file = %out_path.display(), "output already present");
            summary.skipped += 1;
            return;
        }

        debug!(src = %bzip_path.display(), dest = %out_path.display(), "decompressing");
        match self.decompress_into(bzip_path, &out_path) {
            Ok(written) => {
                debug!(bytes = written, "decompressed");
                if overwrite {
                    summary.redecompressed += 1;
                } else {
                    summary.decompressed += 1;
                }
                self.finish_artifact(bzip_path, &out_path);
            }
            Err(e) => {
                warn!(file = %bzip_path.display(), error = %e, "decompression failed");
            }
        }
    }

    /// A previously decompressed artifact that was clobbered on disk (size
    /// change, Git-LFS pointer) is decompressed again from its restored
    /// `.bz2` sibling, when one exists.
    fn handle_bare_artifact(&mut self, path: &Path, summary: &mut RunSummary) {
        let Some(cache) = &self.cache else { return };
        let Some(reason) = cache.staleness(path) else {
            return;
        };
        let bzip_path = append_suffix(path, ".bz2");
        if !bzip_path.exists() {
            return;
        }
        info!(file = %path.display(), %reason, "re-decompressing restored source");
        match self.decompress_into(&bzip_path, path) {
            Ok(_) => {
                summary.redecompressed += 1;
                self.finish_artifact(&bzip_path, path);
            }
            Err(e) => {
                warn!(file = %bzip_path.display(), error = %e, "re-decompression failed");
            }
        }
    }

    /// Record the artifact in the cache and, for in-place output, drop the
    /// source `.bz2`.
    fn finish_artifact(&mut self, bzip_path: &Path, out_path: &Path) {
        if let Some(cache) = &mut self.cache {
            if let Err(e) = cache.record(bzip_path, out_path) {
                warn!(file = %out_path.display(), error = %e, "failed to update cache");
            }
        }
        if self.output_dir.is_none() {
            if let Err(e) = fs::remove_file(bzip_path) {
                warn!(file = %bzip_path.display(), error = %e, "failed to remove source");
            }
        }
    }

    fn single_output_path(&self, bzip_path: &Path) -> PathBuf {
        let name = bzip_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = strip_suffix_ci(&name, ".bz2").unwrap_or(&name);
        match &self.output_dir {
            Some(dir) => dir.join(stem),
            None => bzip_path.with_file_name(stem),
        }
    }

    /// Stream-decode one bzip2 file. A partial output left by a failure is
    /// removed before the error propagates.
    fn decompress_into(&self, bzip_path: &Path, out_path: &Path) -> Result<u64> {
        let in_file =
            File::open(bzip_path).with_context(|| format!("open {}", bzip_path.display()))?;
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let out_file =
            File::create(out_path).with_context(|| format!("create {}", out_path.display()))?;

        let mut decoder = BzDecoder::new(BufReader::new(in_file));
        let mut writer = BufWriter::new(out_file);
        let copied = io::copy(&mut decoder, &mut writer).and_then(|n| {
            writer.flush()?;
            Ok(n)
        });
        match copied {
            Ok(written) => Ok(written),
            Err(e) => {
                drop(writer);
                let _ = fs::remove_file(out_path);
                Err(e).with_context(|| format!("decompress {}", bzip_path.display()))
            }
        }
    }

    /// Concatenate a folder's sorted `.bz2.part.*` fragments and decompress
    /// the result, replacing the final artifact atomically.
    fn process_split_map(&mut self, folder: &Path) -> Result<()> {
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output_name =
            strip_suffix_ci(&folder_name, ".bsp.bz2.parts").map_or(folder_name.as_str(), |base| {
                // Keep the `.bsp` itself, drop only the parts suffix.
                &folder_name[..base.len() + ".bsp".len()]
            });
        let output_path = match &self.output_dir {
            Some(dir) => dir.join(output_name),
            None => folder
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(output_name),
        };

        if let Some(cache) = &self.cache {
            match cache.staleness(&output_path) {
                None => {
                    debug!(folder = %folder.display(), "split map already assembled and cached");
                    return Ok(());
                }
                Some(reason) if reason.is_overwrite() => {
                    info!(folder = %folder.display(), %reason, "re-assembling split map");
                }
                Some(_) => {}
            }
        } else if output_path.is_file() {
            debug!(folder = %folder.display(), "split map output already present");
            return Ok(());
        }

        let parts = list_part_files(folder)?;
        if parts.is_empty() {
            warn!(folder = %folder.display(), "no .bz2.part.* files found");
            return Ok(());
        }
        debug!(folder = %folder.display(), parts = parts.len(), "assembling split map");

        let tmp_out_path = append_suffix(&output_path, ".tmp");
        let concat_path = append_suffix(&output_path, ".tmp.bz2");
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }

        if let Err(e) = concatenate_parts(&parts, &concat_path) {
            let _ = fs::remove_file(&concat_path);
            return Err(e);
        }

        if let Err(e) = self.decompress_into(&concat_path, &tmp_out_path) {
            // decompress_into already dropped its partial output.
            let _ = fs::remove_file(&concat_path);
            return Err(e);
        }

        let _ = fs::remove_file(&concat_path);

        if self.output_dir.is_none() {
            if let Err(e) = fs::remove_dir_all(folder) {
                let _ = fs::remove_file(&tmp_out_path);
                return Err(e).with_context(|| format!("remove folder {}", folder.display()));
            }
        }
        fs::rename(&tmp_out_path, &output_path).with_context(|| {
            format!(
                "rename {} -> {}",
                tmp_out_path.display(),
                output_path.display()
            )
        })?;
        debug!(output = %output_path.display(), "assembled split map");

        if let Some(cache) = &mut self.cache {
            if let Err(e) = cache.record(folder, &output_path) {
                warn!(file = %output_path.display(), error = %e, "failed to update cache");
            }
        }
        Ok(())
    }
}

/// Immediate children whose names contain `.bz2.part.`, lexicographically
/// sorted; the sort order defines concatenation order.
fn list_part_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(folder).with_context(|| format!("read dir {}", folder.display()))?;
    let mut parts = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir {}", folder.display()))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        if entry.file_name().to_string_lossy().contains(".bz2.part.") {
            parts.push(entry.path());
        }
    }
    parts.sort();
    Ok(parts)
}

fn concatenate_parts(parts: &[PathBuf], concat_path: &Path) -> Result<()> {
    let concat_file = File::create(concat_path)
        .with_context(|| format!("create {}", concat_path.display()))?;
    let mut writer = BufWriter::new(concat_file);
    for part in parts {
        let mut part_file =
            File::open(part).with_context(|| format!("open part {}", part.display()))?;
        io::copy(&mut part_file, &mut writer)
            .with_context(|| format!("concatenate part {}", part.display()))?;
    }
    writer.flush().with_context(|| format!("flush {}", concat_path.display()))?;
    Ok(())
}

/// Case-insensitive suffix strip; returns the shortened front on a match.
fn strip_suffix_ci<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let split = name.len().checked_sub(suffix.len())?;
    if !name.is_char_boundary(split) {
        return None;
    }
    if name[split..].eq_ignore_ascii_case(suffix) {
        Some(&name[..split])
    } else {
        None
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}
