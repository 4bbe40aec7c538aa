//! Patch export.

use std::fmt::Write as _;

use crate::changes::{ChangeKind, OverlayChange};

/// Render changes as a unified-diff-like stream.
///
/// Coarse by design: one hunk per file, the whole old image as `-` lines
/// and the whole new image as `+` lines, with `/dev/null` endpoints for
/// additions and deletions. The output is a review/hand-off format; the
/// [`OverlayChange`] list is the machine-facing artifact.
pub fn export_patch(changes: &[OverlayChange]) -> String {
    let mut out = String::new();
    for change in changes {
        let path = &change.path;
        let old_lines = text_lines(change.old.as_deref());
        let new_lines = text_lines(change.new.as_deref());

        let _ = writeln!(out, "diff --git a{path} b{path}");
        match change.kind {
            ChangeKind::Added => {
                let _ = writeln!(out, "--- /dev/null");
                let _ = writeln!(out, "+++ b{path}");
            }
            ChangeKind::Deleted => {
                let _ = writeln!(out, "--- a{path}");
                let _ = writeln!(out, "+++ /dev/null");
            }
            ChangeKind::Modified => {
                let _ = writeln!(out, "--- a{path}");
                let _ = writeln!(out, "+++ b{path}");
            }
        }
        let _ = writeln!(
            out,
            "@@ -{},{} +{},{} @@",
            hunk_start(old_lines.len()),
            old_lines.len(),
            hunk_start(new_lines.len()),
            new_lines.len()
        );
        for line in &old_lines {
            let _ = writeln!(out, "-{line}");
        }
        for line in &new_lines {
            let _ = writeln!(out, "+{line}");
        }
    }
    out
}

fn hunk_start(len: usize) -> usize {
    if len == 0 {
        0
    } else {
        1
    }
}

fn text_lines(bytes: Option<&[u8]>) -> Vec<String> {
    match bytes {
        Some(bytes) if !bytes.is_empty() => String::from_utf8_lossy(bytes)
            .lines()
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
