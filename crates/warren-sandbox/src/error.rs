//! Sandbox error types.

use thiserror::Error;

use warren_fs::FsError;
use warren_store::StoreError;

use crate::policy::PermissionDenied;

/// Errors surfaced by the protected filesystem: either a policy denial
/// raised before delegation, or a filesystem error from the operation
/// itself.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Denied(#[from] PermissionDenied),

    #[error(transparent)]
    Fs(#[from] FsError),

    /// Policy metadata could not be read.
    #[error("metadata: {0}")]
    Store(#[from] StoreError),
}

impl SandboxError {
    /// The POSIX-style code string for this error.
    pub fn code(&self) -> &'static str {
        match self {
            SandboxError::Denied(denied) => denied.code,
            SandboxError::Fs(fs) => fs.code.as_str(),
            SandboxError::Store(_) => "EIO",
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, SandboxError::Denied(_))
    }
}

/// Sandbox result type.
pub type SandboxResult<T> = Result<T, SandboxError>;
