//! Overlay error types.

use std::path::PathBuf;

use thiserror::Error;

use warren_fs::FsError;

/// Errors from overlay import and change detection.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error(transparent)]
    Fs(#[from] FsError),

    /// The configured base path does not name a directory.
    #[error("base path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Host-side failure on the base path itself. Per-entry host errors
    /// during a walk are skipped, not surfaced.
    #[error("host i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Overlay result type.
pub type OverlayResult<T> = Result<T, OverlayError>;
