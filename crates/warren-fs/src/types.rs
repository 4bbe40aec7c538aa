//! Inode attribute types and mode-bit helpers.

use serde::{Deserialize, Serialize};

/// Mask covering the file-type bits of a mode.
pub const S_IFMT: u32 = 0o170_000;
/// Regular-file type bits.
pub const S_IFREG: u32 = 0o100_000;
/// Directory type bits.
pub const S_IFDIR: u32 = 0o040_000;
/// Symlink type bits.
pub const S_IFLNK: u32 = 0o120_000;

/// Mode for directories created by the filesystem.
pub const DIR_MODE: u32 = S_IFDIR | 0o755;
/// Mode for regular files created by the filesystem.
pub const FILE_MODE: u32 = S_IFREG | 0o644;
/// Mode for symlink inodes.
pub const SYMLINK_MODE: u32 = S_IFLNK | 0o777;

/// Inode type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

impl FileKind {
    /// Classify mode bits. Unknown type bits read as regular files.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => FileKind::Directory,
            S_IFLNK => FileKind::Symlink,
            _ => FileKind::File,
        }
    }
}

/// Inode attributes plus the computed link count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InodeAttr {
    pub ino: i64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: i64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    /// Number of dentries referencing this inode.
    pub nlink: u32,
}

impl InodeAttr {
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    pub fn is_file(&self) -> bool {
        self.kind() == FileKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind() == FileKind::Symlink
    }
}

/// Directory entry with attributes, as returned by `readdir_plus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntryPlus {
    pub name: String,
    pub attr: InodeAttr,
}

/// Bulk filesystem counters for `statfs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub used_inodes: u64,
    pub block_size: u32,
}

/// Options for [`crate::InodeFs::rm`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Silence ENOENT for missing targets.
    pub force: bool,
    /// Allow removing directories and their contents.
    pub recursive: bool,
}

impl RemoveOptions {
    pub fn force() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_recursive(mut self) -> Self {
        self.recursive = true;
        self
    }
}
