//! Filesystem error type.
//!
//! Errors are structured records: a POSIX errno code, the operation that
//! failed, the path it failed on, and a human-readable message. This is the
//! wire contract other clients of the database rely on.

use std::fmt;

use thiserror::Error;

use warren_store::StoreError;

/// POSIX-style error codes surfaced by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// No such file or directory.
    Enoent,
    /// File exists.
    Eexist,
    /// Not a directory.
    Enotdir,
    /// Is a directory.
    Eisdir,
    /// Directory not empty.
    Enotempty,
    /// Invalid argument.
    Einval,
    /// Operation not permitted.
    Eperm,
    /// Permission denied.
    Eacces,
    /// Operation not supported.
    Enosys,
    /// Input/output error (store failure).
    Eio,
}

impl Errno {
    pub fn as_str(self) -> &'static str {
        match self {
            Errno::Enoent => "ENOENT",
            Errno::Eexist => "EEXIST",
            Errno::Enotdir => "ENOTDIR",
            Errno::Eisdir => "EISDIR",
            Errno::Enotempty => "ENOTEMPTY",
            Errno::Einval => "EINVAL",
            Errno::Eperm => "EPERM",
            Errno::Eacces => "EACCES",
            Errno::Enosys => "ENOSYS",
            Errno::Eio => "EIO",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured filesystem error.
#[derive(Debug, Clone, Error)]
#[error("{code}: {syscall} '{path}': {message}")]
pub struct FsError {
    pub code: Errno,
    pub syscall: &'static str,
    pub path: String,
    pub message: String,
}

impl FsError {
    pub fn new(
        code: Errno,
        syscall: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            syscall,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn not_found(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(Errno::Enoent, syscall, path, "no such file or directory")
    }

    pub fn already_exists(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(Errno::Eexist, syscall, path, "file exists")
    }

    pub fn not_a_directory(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(Errno::Enotdir, syscall, path, "not a directory")
    }

    pub fn is_a_directory(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(Errno::Eisdir, syscall, path, "is a directory")
    }

    pub fn not_empty(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(Errno::Enotempty, syscall, path, "directory not empty")
    }

    pub fn invalid(
        syscall: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Errno::Einval, syscall, path, message)
    }

    pub fn root_forbidden(syscall: &'static str) -> Self {
        Self::new(Errno::Eperm, syscall, "/", "operation not permitted on root")
    }

    pub fn symlink_unsupported(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(
            Errno::Enosys,
            syscall,
            path,
            "symbolic links are not supported by this operation",
        )
    }

    pub fn io(syscall: &'static str, path: impl Into<String>, source: StoreError) -> Self {
        Self::new(Errno::Eio, syscall, path, source.to_string())
    }
}

/// Filesystem result type.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code_and_path() {
        let err = FsError::not_found("stat", "/missing");
        let text = err.to_string();
        assert!(text.contains("ENOENT"));
        assert!(text.contains("stat"));
        assert!(text.contains("/missing"));
    }
}
