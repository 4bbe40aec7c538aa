//! Change detection between the live filesystem and the host base tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fs as hostfs;
use std::path::{Path, PathBuf};

use warren_fs::{paths, InodeFs};

use crate::error::OverlayResult;
use crate::import::{mounted_path, relative_slash_path};

/// How an entry differs from the base layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Present in the filesystem, absent from the base.
    Added,
    /// Present on both sides with different content.
    Modified,
    /// Present in the base, absent from the filesystem.
    Deleted,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        }
    }
}

/// One detected difference, carrying both byte images for patch export.
#[derive(Debug, Clone)]
pub struct OverlayChange {
    /// Base-relative path in `/a/b` form.
    pub path: String,
    pub kind: ChangeKind,
    /// Base-side content (`None` for additions).
    pub old: Option<Vec<u8>>,
    /// Filesystem-side content (`None` for deletions).
    pub new: Option<Vec<u8>>,
}

/// Compare the filesystem under `mount_path` against the host tree at
/// `base_path`.
///
/// Size mismatch short-circuits the byte comparison; equal sizes are
/// compared byte for byte. Directories only steer the walk; symlinks are
/// not diffed.
pub async fn changes(
    fs: &InodeFs,
    base_path: &Path,
    mount_path: &str,
) -> OverlayResult<Vec<OverlayChange>> {
    let base = collect_base_files(base_path);
    let mount = paths::normalize(mount_path);

    let mut out = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    if fs.exists(&mount).await? {
        let mut stack = vec![mount.clone()];
        while let Some(dir) = stack.pop() {
            for entry in fs.readdir_plus(&dir).await? {
                let full = paths::join(&dir, &entry.name);
                if entry.attr.is_dir() {
                    stack.push(full);
                    continue;
                }
                if entry.attr.is_symlink() {
                    continue;
                }
                let rel = relative_to_mount(&mount, &full);
                match base.get(&rel) {
                    None => {
                        let new = fs.read(&full).await?;
                        out.push(OverlayChange {
                            path: rel,
                            kind: ChangeKind::Added,
                            old: None,
                            new: Some(new),
                        });
                    }
                    Some(&host_size) => {
                        seen.insert(rel.clone());
                        let fs_size = entry.attr.size.max(0) as u64;
                        if fs_size != host_size {
                            let old = read_host(base_path, &rel);
                            let new = fs.read(&full).await?;
                            out.push(OverlayChange {
                                path: rel,
                                kind: ChangeKind::Modified,
                                old,
                                new: Some(new),
                            });
                        } else {
                            let Some(old) = read_host(base_path, &rel) else {
                                continue;
                            };
                            let new = fs.read(&full).await?;
                            if old != new {
                                out.push(OverlayChange {
                                    path: rel,
                                    kind: ChangeKind::Modified,
                                    old: Some(old),
                                    new: Some(new),
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    for rel in base.keys() {
        if !seen.contains(rel) {
            out.push(OverlayChange {
                path: rel.clone(),
                kind: ChangeKind::Deleted,
                old: read_host(base_path, rel),
                new: None,
            });
        }
    }

    Ok(out)
}

/// Map of base files: relative `/a/b` path to size. Explicit-stack walk,
/// `.git` skipped, unreadable entries skipped.
fn collect_base_files(base_path: &Path) -> BTreeMap<String, u64> {
    let mut map = BTreeMap::new();
    let mut stack: Vec<PathBuf> = vec![base_path.to_path_buf()];

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
            let Ok(file_type) = entry.file_type() else { continue };
            let host_path = entry.path();
            if file_type.is_dir() {
                stack.push(host_path);
            } else if file_type.is_file() {
                let Ok(meta) = entry.metadata() else { continue };
                if let Some(rel) = relative_slash_path(base_path, &host_path) {
                    map.insert(rel, meta.len());
                }
            }
        }
    }
    map
}

fn relative_to_mount(mount: &str, full: &str) -> String {
    if mount == "/" {
        full.to_string()
    } else {
        full.strip_prefix(mount).unwrap_or(full).to_string()
    }
}

fn read_host(base_path: &Path, rel: &str) -> Option<Vec<u8>> {
    hostfs::read(base_path.join(rel.trim_start_matches('/'))).ok()
}
