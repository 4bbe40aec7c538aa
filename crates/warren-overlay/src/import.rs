//! Base-layer importer.
//!
//! Walks a host directory tree with an explicit stack and recreates it in
//! the warren filesystem under a mount path. `.git` is always skipped,
//! excluded paths are recorded, and per-entry host errors (unreadable
//! files, vanished entries) are skipped so a live working tree imports
//! cleanly.

use std::fs as hostfs;
use std::path::{Path, PathBuf};

use warren_fs::{paths, InodeFs, RemoveOptions};
use warren_sandbox::glob::compile_all;

use crate::error::{OverlayError, OverlayResult};

/// Configuration for an overlay import.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Host directory to import.
    pub base_path: PathBuf,
    /// Prefix within the filesystem the tree is placed under.
    pub mount_path: String,
    /// Glob patterns (relative to the base) excluded from the import.
    pub exclude_patterns: Vec<String>,
}

impl OverlayConfig {
    pub fn new(base_path: impl Into<PathBuf>, mount_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            mount_path: mount_path.into(),
            exclude_patterns: Vec::new(),
        }
    }

    pub fn with_excludes(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }
}

/// Counters for a completed import.
#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub files_imported: u64,
    pub directories_created: u64,
    pub bytes_imported: u64,
    /// Base-relative paths skipped by an exclude pattern.
    pub excluded_paths: Vec<String>,
}

/// Import the configured host tree into the filesystem.
#[tracing::instrument(skip(fs, config), fields(base = %config.base_path.display(), mount = %config.mount_path))]
pub async fn initialize(fs: &InodeFs, config: &OverlayConfig) -> OverlayResult<ImportSummary> {
    let meta = hostfs::metadata(&config.base_path)?;
    if !meta.is_dir() {
        return Err(OverlayError::NotADirectory(config.base_path.clone()));
    }

    let excludes = compile_all(&config.exclude_patterns);
    let mount = paths::normalize(&config.mount_path);
    fs.mkdir_all(&mount).await?;

    let mut summary = ImportSummary::default();
    let mut stack: Vec<PathBuf> = vec![config.base_path.clone()];

    while let Some(dir) = stack.pop() {
        let entries = match hostfs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries {
            let Ok(entry) = entry else { continue };
            if entry.file_name() == ".git" {
                continue;
            }
            let host_path = entry.path();
            let Some(rel) = relative_slash_path(&config.base_path, &host_path) else {
                continue;
            };
            if excludes.iter().any(|pattern| pattern.matches(&rel)) {
                summary.excluded_paths.push(rel);
                continue;
            }

            // DirEntry::file_type does not follow symlinks.
            let Ok(file_type) = entry.file_type() else { continue };
            let target = mounted_path(&mount, &rel);

            if file_type.is_symlink() {
                let Ok(link) = hostfs::read_link(&host_path) else {
                    continue;
                };
                fs.symlink(&link.to_string_lossy(), &target).await?;
            } else if file_type.is_dir() {
                if !fs.exists(&target).await? {
                    fs.mkdir_all(&target).await?;
                    summary.directories_created += 1;
                }
                stack.push(host_path);
            } else {
                let Ok(bytes) = hostfs::read(&host_path) else {
                    continue;
                };
                fs.write(&target, &bytes).await?;
                summary.files_imported += 1;
                summary.bytes_imported += bytes.len() as u64;
            }
        }
    }

    tracing::debug!(
        files = summary.files_imported,
        dirs = summary.directories_created,
        bytes = summary.bytes_imported,
        excluded = summary.excluded_paths.len(),
        "overlay import complete"
    );
    Ok(summary)
}

/// Clear the mount and re-run the import.
///
/// A root mount is cleared child by child; the root inode itself is never
/// removable.
#[tracing::instrument(skip(fs, config), fields(mount = %config.mount_path))]
pub async fn reset(fs: &InodeFs, config: &OverlayConfig) -> OverlayResult<ImportSummary> {
    let mount = paths::normalize(&config.mount_path);
    if mount == "/" {
        for name in fs.readdir("/").await? {
            fs.rm(&paths::join("/", &name), RemoveOptions::recursive().with_force())
                .await?;
        }
    } else {
        fs.rm(&mount, RemoveOptions::recursive().with_force())
            .await?;
    }
    initialize(fs, config).await
}

/// Base-relative path in `/a/b` form, or `None` for paths outside the base.
pub(crate) fn relative_slash_path(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let mut out = String::new();
    for component in rel.components() {
        if let std::path::Component::Normal(part) = component {
            out.push('/');
            out.push_str(&part.to_string_lossy());
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Place a base-relative `/a/b` path under the mount prefix.
pub(crate) fn mounted_path(mount: &str, rel: &str) -> String {
    if mount == "/" {
        rel.to_string()
    } else {
        format!("{mount}{rel}")
    }
}
