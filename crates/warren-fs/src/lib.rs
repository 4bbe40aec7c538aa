//! # warren-fs
//!
//! A POSIX-like filesystem whose entire state lives in relational tables:
//! inodes, directory entries, chunked file data, and symlink targets.
//!
//! Key properties:
//!
//! - **Lexical resolution**: paths are walked dentry by dentry from the
//!   root inode. No `.`/`..` interpretation, no symlink dereference.
//! - **Structured errors**: every failure carries a POSIX errno code, the
//!   operation name, and the path ([`FsError`]).
//! - **Path-bound handles**: [`FileHandle`] re-resolves its path on each
//!   call, so access-control wrappers can re-check permissions for the
//!   lifetime of the handle.
//! - **Transactional mutations**: rename and copy run inside a single
//!   transaction and roll back on error.

mod error;
mod fs;
mod guards;
mod handle;
pub mod paths;
mod types;

pub use error::{Errno, FsError, FsResult};
pub use fs::InodeFs;
pub use handle::FileHandle;
pub use types::{
    DirEntryPlus, FileKind, FsStats, InodeAttr, RemoveOptions, DIR_MODE, FILE_MODE, SYMLINK_MODE,
    S_IFDIR, S_IFLNK, S_IFMT, S_IFREG,
};
