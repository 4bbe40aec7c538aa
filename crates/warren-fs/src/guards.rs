//! Centralized invariant checks shared by filesystem operations.

use crate::error::{FsError, FsResult};
use crate::types::InodeAttr;

/// Reject operations that target the filesystem root.
pub(crate) fn ensure_not_root(syscall: &'static str, path: &str) -> FsResult<()> {
    if path == "/" {
        Err(FsError::root_forbidden(syscall))
    } else {
        Ok(())
    }
}

/// Require a directory inode.
pub(crate) fn ensure_dir(syscall: &'static str, path: &str, attr: &InodeAttr) -> FsResult<()> {
    if attr.is_dir() {
        Ok(())
    } else {
        Err(FsError::not_a_directory(syscall, path))
    }
}

/// Require a regular-file inode. Directories raise EISDIR; symlinks are
/// refused because no operation here dereferences them.
pub(crate) fn ensure_file(syscall: &'static str, path: &str, attr: &InodeAttr) -> FsResult<()> {
    if attr.is_dir() {
        Err(FsError::is_a_directory(syscall, path))
    } else if attr.is_symlink() {
        Err(FsError::symlink_unsupported(syscall, path))
    } else {
        Ok(())
    }
}

/// Refuse symlink inodes in operations that do not understand them.
pub(crate) fn ensure_not_symlink(
    syscall: &'static str,
    path: &str,
    attr: &InodeAttr,
) -> FsResult<()> {
    if attr.is_symlink() {
        Err(FsError::symlink_unsupported(syscall, path))
    } else {
        Ok(())
    }
}
