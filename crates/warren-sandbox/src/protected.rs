//! Access-checked wrapper over the inode filesystem.
//!
//! Every entry point maps to one (or, for two-path operations, two) policy
//! checks before delegating. Handles are wrapped so writes re-check policy
//! at call time, which matters when a handle outlives a policy update.

use serde_json::Value;

use warren_fs::{
    DirEntryPlus, FileHandle, FsStats, InodeAttr, InodeFs, RemoveOptions,
};

use crate::error::SandboxResult;
use crate::policy::{AccessPolicy, Operation};

/// The protected filesystem surface.
#[derive(Debug, Clone)]
pub struct ProtectedFs {
    fs: InodeFs,
    policy: AccessPolicy,
}

impl ProtectedFs {
    pub fn new(fs: InodeFs, policy: AccessPolicy) -> Self {
        Self { fs, policy }
    }

    /// The unchecked filesystem. This is the surface access hooks must use
    /// if they need filesystem state while deciding.
    pub fn inner(&self) -> &InodeFs {
        &self.fs
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    async fn check(&self, operation: Operation, path: &str) -> SandboxResult<()> {
        self.policy.check_or_deny(operation, path, None).await
    }

    // ========================================================================
    // Reading
    // ========================================================================

    pub async fn read(&self, path: &str) -> SandboxResult<Vec<u8>> {
        self.check(Operation::Read, path).await?;
        Ok(self.fs.read(path).await?)
    }

    pub async fn read_to_string(&self, path: &str) -> SandboxResult<String> {
        self.check(Operation::Read, path).await?;
        Ok(self.fs.read_to_string(path).await?)
    }

    pub async fn readlink(&self, path: &str) -> SandboxResult<String> {
        self.check(Operation::Read, path).await?;
        Ok(self.fs.readlink(path).await?)
    }

    pub async fn stat(&self, path: &str) -> SandboxResult<InodeAttr> {
        self.check(Operation::Stat, path).await?;
        Ok(self.fs.stat(path).await?)
    }

    pub async fn lstat(&self, path: &str) -> SandboxResult<InodeAttr> {
        self.check(Operation::Stat, path).await?;
        Ok(self.fs.lstat(path).await?)
    }

    pub async fn access(&self, path: &str) -> SandboxResult<()> {
        self.check(Operation::Stat, path).await?;
        Ok(self.fs.access(path).await?)
    }

    pub async fn exists(&self, path: &str) -> SandboxResult<bool> {
        self.check(Operation::Stat, path).await?;
        Ok(self.fs.exists(path).await?)
    }

    pub async fn readdir(&self, path: &str) -> SandboxResult<Vec<String>> {
        self.check(Operation::Readdir, path).await?;
        Ok(self.fs.readdir(path).await?)
    }

    pub async fn readdir_plus(&self, path: &str) -> SandboxResult<Vec<DirEntryPlus>> {
        self.check(Operation::Readdir, path).await?;
        Ok(self.fs.readdir_plus(path).await?)
    }

    /// Not path-gated; there is no per-path notion of filesystem totals.
    pub async fn statfs(&self) -> SandboxResult<FsStats> {
        Ok(self.fs.statfs().await?)
    }

    // ========================================================================
    // Writing
    // ========================================================================

    pub async fn write(&self, path: &str, content: &[u8]) -> SandboxResult<()> {
        self.check(Operation::Write, path).await?;
        Ok(self.fs.write(path, content).await?)
    }

    pub async fn write_str(&self, path: &str, content: &str) -> SandboxResult<()> {
        self.check(Operation::Write, path).await?;
        Ok(self.fs.write_str(path, content).await?)
    }

    pub async fn mkdir(&self, path: &str) -> SandboxResult<InodeAttr> {
        self.check(Operation::Mkdir, path).await?;
        Ok(self.fs.mkdir(path).await?)
    }

    pub async fn mkdir_all(&self, path: &str) -> SandboxResult<()> {
        self.check(Operation::Mkdir, path).await?;
        Ok(self.fs.mkdir_all(path).await?)
    }

    pub async fn rmdir(&self, path: &str) -> SandboxResult<()> {
        self.check(Operation::Delete, path).await?;
        Ok(self.fs.rmdir(path).await?)
    }

    pub async fn unlink(&self, path: &str) -> SandboxResult<()> {
        self.check(Operation::Delete, path).await?;
        Ok(self.fs.unlink(path).await?)
    }

    pub async fn rm(&self, path: &str, opts: RemoveOptions) -> SandboxResult<()> {
        self.check(Operation::Delete, path).await?;
        Ok(self.fs.rm(path, opts).await?)
    }

    /// Checked as `rename` on the source and `write` on the destination.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> SandboxResult<()> {
        self.check(Operation::Rename, old_path).await?;
        self.check(Operation::Write, new_path).await?;
        Ok(self.fs.rename(old_path, new_path).await?)
    }

    /// Checked as `read` on the source and `write` on the destination.
    pub async fn copy_file(&self, src: &str, dest: &str) -> SandboxResult<()> {
        self.check(Operation::Read, src).await?;
        self.check(Operation::Write, dest).await?;
        Ok(self.fs.copy_file(src, dest).await?)
    }

    pub async fn symlink(&self, target: &str, linkpath: &str) -> SandboxResult<InodeAttr> {
        self.check(Operation::Symlink, linkpath).await?;
        Ok(self.fs.symlink(target, linkpath).await?)
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Open a file for positioned I/O. Read permission is verified here;
    /// the returned handle re-checks write permission on every mutation.
    pub async fn open(&self, path: &str) -> SandboxResult<GuardedHandle> {
        self.check(Operation::Read, path).await?;
        let handle = self.fs.open(path).await?;
        Ok(GuardedHandle {
            path: handle.path().to_string(),
            handle,
            policy: self.policy.clone(),
        })
    }

    /// Escape hatch for callers that need the policy decision itself.
    pub async fn check_access(
        &self,
        operation: Operation,
        path: &str,
        data: Option<Value>,
    ) -> SandboxResult<crate::AccessDecision> {
        Ok(self.policy.check(operation, path, data).await?)
    }
}

/// A [`FileHandle`] whose mutating calls re-check write permission.
///
/// `pread` rides on the read check performed at open time.
#[derive(Debug, Clone)]
pub struct GuardedHandle {
    handle: FileHandle,
    policy: AccessPolicy,
    path: String,
}

impl GuardedHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn pread(&self, offset: u64, size: u32) -> SandboxResult<Vec<u8>> {
        Ok(self.handle.pread(offset, size).await?)
    }

    pub async fn pwrite(&self, offset: u64, data: &[u8]) -> SandboxResult<u32> {
        self.policy
            .check_or_deny(Operation::Write, &self.path, None)
            .await?;
        Ok(self.handle.pwrite(offset, data).await?)
    }

    pub async fn truncate(&self, size: u64) -> SandboxResult<()> {
        self.policy
            .check_or_deny(Operation::Write, &self.path, None)
            .await?;
        Ok(self.handle.truncate(size).await?)
    }

    pub async fn fstat(&self) -> SandboxResult<InodeAttr> {
        Ok(self.handle.fstat().await?)
    }

    pub async fn fsync(&self) -> SandboxResult<()> {
        Ok(self.handle.fsync().await?)
    }
}
