//! The inode filesystem.
//!
//! Every operation resolves paths lexically (dentry walk from the root
//! inode) and maps store failures to EIO. Rename and copy are the only
//! multi-statement operations wrapped in a transaction; everything else
//! executes statement by statement, matching the store's serialized write
//! path.

use rusqlite::{params, Connection, OptionalExtension};

use warren_store::{unix_now, Database};

use crate::error::{Errno, FsError, FsResult};
use crate::guards;
use crate::handle::FileHandle;
use crate::paths;
use crate::types::{
    DirEntryPlus, FileKind, FsStats, InodeAttr, RemoveOptions, DIR_MODE, FILE_MODE, SYMLINK_MODE,
};

/// The root directory inode number.
pub(crate) const ROOT_INO: i64 = 1;

/// Synthesized inode capacity reported by statfs.
const STATFS_TOTAL_INODES: u64 = 1_048_576;
/// Synthesized byte capacity reported by statfs.
const STATFS_TOTAL_BYTES: u64 = 64 * 1024 * 1024 * 1024;

/// POSIX-like filesystem persisted in the shared database.
#[derive(Debug, Clone)]
pub struct InodeFs {
    db: Database,
}

impl InodeFs {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Resolve a path and return its inode attributes.
    pub async fn stat(&self, path: &str) -> FsResult<InodeAttr> {
        self.stat_impl("stat", path)
    }

    /// Like `stat`. The two diverge only once symlink dereference exists;
    /// resolution is lexical, so both return the entry as named.
    pub async fn lstat(&self, path: &str) -> FsResult<InodeAttr> {
        self.stat_impl("lstat", path)
    }

    fn stat_impl(&self, syscall: &'static str, path: &str) -> FsResult<InodeAttr> {
        let path = paths::normalize(path);
        let ino = self.resolve(syscall, &path)?;
        self.attr_of(syscall, &path, ino)
    }

    /// Existence probe (F_OK). ENOENT when the path does not resolve.
    pub async fn access(&self, path: &str) -> FsResult<()> {
        let path = paths::normalize(path);
        self.resolve("access", &path)?;
        Ok(())
    }

    /// Convenience wrapper over `access`.
    pub async fn exists(&self, path: &str) -> FsResult<bool> {
        let path = paths::normalize(path);
        Ok(self.resolve_opt("access", &path)?.is_some())
    }

    /// Bulk counters derived from the database.
    pub async fn statfs(&self) -> FsResult<FsStats> {
        let (used_inodes, used_bytes): (i64, i64) = self.run("statfs", "/", |conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM fs_inode",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        })?;
        let used_inodes = used_inodes.max(0) as u64;
        let used_bytes = used_bytes.max(0) as u64;
        Ok(FsStats {
            total_bytes: STATFS_TOTAL_BYTES,
            free_bytes: STATFS_TOTAL_BYTES.saturating_sub(used_bytes),
            used_bytes,
            total_inodes: STATFS_TOTAL_INODES,
            free_inodes: STATFS_TOTAL_INODES.saturating_sub(used_inodes),
            used_inodes,
            block_size: self.db.chunk_size() as u32,
        })
    }

    // ========================================================================
    // File contents
    // ========================================================================

    /// Read a whole regular file. Updates atime.
    pub async fn read(&self, path: &str) -> FsResult<Vec<u8>> {
        let path = paths::normalize(path);
        let ino = self.resolve("read", &path)?;
        let attr = self.attr_of("read", &path, ino)?;
        guards::ensure_file("read", &path, &attr)?;

        let data = self.run("read", &path, |conn| read_all_chunks(conn, ino))?;
        self.run("read", &path, |conn| {
            conn.execute(
                "UPDATE fs_inode SET atime = ?1 WHERE ino = ?2",
                params![unix_now(), ino],
            )
            .map(|_| ())
        })?;
        Ok(data)
    }

    /// Read a whole regular file as UTF-8 text.
    pub async fn read_to_string(&self, path: &str) -> FsResult<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes)
            .map_err(|_| FsError::invalid("read", paths::normalize(path), "invalid utf-8 in file"))
    }

    /// Write a whole regular file, creating it (and any missing parent
    /// directories) as needed. Replaces existing content.
    pub async fn write(&self, path: &str, content: &[u8]) -> FsResult<()> {
        let path = paths::normalize(path);
        let Some((parent, name)) = paths::split_parent(&path) else {
            return Err(FsError::is_a_directory("write", "/"));
        };
        let parent_ino = self.ensure_dir_path("write", &parent)?;

        let existing = self.run("write", &path, |conn| lookup(conn, parent_ino, &name))?;
        let now = unix_now();
        let chunk_size = self.db.chunk_size();
        let size = content.len() as i64;

        match existing {
            Some(ino) => {
                let attr = self.attr_of("write", &path, ino)?;
                guards::ensure_file("write", &path, &attr)?;
                self.run("write", &path, |conn| {
                    clear_chunks(conn, ino)?;
                    write_chunks(conn, ino, content, chunk_size)?;
                    conn.execute(
                        "UPDATE fs_inode SET size = ?1, mtime = ?2 WHERE ino = ?3",
                        params![size, now, ino],
                    )?;
                    Ok(())
                })
            }
            None => self.run("write", &path, |conn| {
                let ino = create_inode(conn, FILE_MODE, 0, 0, size, now)?;
                insert_dentry(conn, parent_ino, &name, ino)?;
                write_chunks(conn, ino, content, chunk_size)?;
                Ok(())
            }),
        }
    }

    /// Write UTF-8 text.
    pub async fn write_str(&self, path: &str, content: &str) -> FsResult<()> {
        self.write(path, content.as_bytes()).await
    }

    /// Transactionally copy a regular file. Destination parents are not
    /// created; an existing destination file is replaced in place.
    pub async fn copy_file(&self, src: &str, dest: &str) -> FsResult<()> {
        let src = paths::normalize(src);
        let dest = paths::normalize(dest);
        if src == dest {
            return Err(FsError::invalid(
                "copyfile",
                dest,
                "source and destination are the same file",
            ));
        }

        let src_ino = self.resolve("copyfile", &src)?;
        let src_attr = self.attr_of("copyfile", &src, src_ino)?;
        guards::ensure_file("copyfile", &src, &src_attr)?;

        let Some((dest_parent, dest_name)) = paths::split_parent(&dest) else {
            return Err(FsError::is_a_directory("copyfile", "/"));
        };
        let dest_parent_ino = self
            .resolve_opt("copyfile", &dest_parent)?
            .ok_or_else(|| FsError::not_found("copyfile", &dest))?;
        let parent_attr = self.attr_of("copyfile", &dest, dest_parent_ino)?;
        guards::ensure_dir("copyfile", &dest, &parent_attr)?;

        let existing = self.run("copyfile", &dest, |conn| {
            lookup(conn, dest_parent_ino, &dest_name)
        })?;
        let now = unix_now();

        if let Some(dest_ino) = existing {
            let dest_attr = self.attr_of("copyfile", &dest, dest_ino)?;
            guards::ensure_file("copyfile", &dest, &dest_attr)?;
            self.tx("copyfile", &dest, |conn| {
                clear_chunks(conn, dest_ino)?;
                copy_chunks(conn, src_ino, dest_ino)?;
                conn.execute(
                    "UPDATE fs_inode SET mode = ?1, uid = ?2, gid = ?3, size = ?4,
                            mtime = ?5, ctime = ?5
                     WHERE ino = ?6",
                    params![src_attr.mode, src_attr.uid, src_attr.gid, src_attr.size, now, dest_ino],
                )?;
                Ok(())
            })
        } else {
            self.tx("copyfile", &dest, |conn| {
                let ino = create_inode(
                    conn,
                    src_attr.mode,
                    src_attr.uid,
                    src_attr.gid,
                    src_attr.size,
                    now,
                )?;
                insert_dentry(conn, dest_parent_ino, &dest_name, ino)?;
                copy_chunks(conn, src_ino, ino)?;
                Ok(())
            })
        }
    }

    /// Open a regular file, returning a path-bound handle.
    pub async fn open(&self, path: &str) -> FsResult<FileHandle> {
        let path = paths::normalize(path);
        let ino = self.resolve("open", &path)?;
        let attr = self.attr_of("open", &path, ino)?;
        guards::ensure_file("open", &path, &attr)?;
        Ok(FileHandle::new(self.clone(), path))
    }

    // ========================================================================
    // Directories
    // ========================================================================

    /// List child names, sorted ascending.
    pub async fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let path = paths::normalize(path);
        let ino = self.resolve("readdir", &path)?;
        let attr = self.attr_of("readdir", &path, ino)?;
        guards::ensure_dir("readdir", &path, &attr)?;

        self.run("readdir", &path, |conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM fs_dentry WHERE parent_ino = ?1 ORDER BY name")?;
            let rows = stmt.query_map(params![ino], |row| row.get(0))?;
            rows.collect()
        })
    }

    /// List children with attributes, sorted ascending by name.
    pub async fn readdir_plus(&self, path: &str) -> FsResult<Vec<DirEntryPlus>> {
        let path = paths::normalize(path);
        let ino = self.resolve("readdir", &path)?;
        let attr = self.attr_of("readdir", &path, ino)?;
        guards::ensure_dir("readdir", &path, &attr)?;

        self.run("readdir", &path, |conn| {
            let mut stmt = conn.prepare(
                "SELECT d.name, i.ino, i.mode, i.uid, i.gid, i.size, i.atime, i.mtime, i.ctime,
                        (SELECT COUNT(*) FROM fs_dentry WHERE ino = i.ino)
                 FROM fs_dentry d JOIN fs_inode i ON i.ino = d.ino
                 WHERE d.parent_ino = ?1 ORDER BY d.name",
            )?;
            let rows = stmt.query_map(params![ino], |row| {
                let nlink: i64 = row.get(9)?;
                Ok(DirEntryPlus {
                    name: row.get(0)?,
                    attr: InodeAttr {
                        ino: row.get(1)?,
                        mode: row.get(2)?,
                        uid: row.get(3)?,
                        gid: row.get(4)?,
                        size: row.get(5)?,
                        atime: row.get(6)?,
                        mtime: row.get(7)?,
                        ctime: row.get(8)?,
                        nlink: nlink.max(0) as u32,
                    },
                })
            })?;
            rows.collect()
        })
    }

    /// Create a directory. Non-recursive: the parent must already exist.
    pub async fn mkdir(&self, path: &str) -> FsResult<InodeAttr> {
        let path = paths::normalize(path);
        if self.resolve_opt("mkdir", &path)?.is_some() {
            return Err(FsError::already_exists("mkdir", &path));
        }
        let Some((parent, name)) = paths::split_parent(&path) else {
            return Err(FsError::already_exists("mkdir", "/"));
        };
        let parent_ino = self
            .resolve_opt("mkdir", &parent)?
            .ok_or_else(|| FsError::not_found("mkdir", &path))?;
        let parent_attr = self.attr_of("mkdir", &path, parent_ino)?;
        guards::ensure_dir("mkdir", &path, &parent_attr)?;

        let now = unix_now();
        let ino = self.run("mkdir", &path, |conn| {
            let ino = create_inode(conn, DIR_MODE, 0, 0, 0, now)?;
            insert_dentry(conn, parent_ino, &name, ino)?;
            Ok(ino)
        })?;
        self.attr_of("mkdir", &path, ino)
    }

    /// Create a directory and any missing ancestors. Idempotent.
    pub async fn mkdir_all(&self, path: &str) -> FsResult<()> {
        let path = paths::normalize(path);
        self.ensure_dir_path("mkdir", &path)?;
        Ok(())
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        let path = paths::normalize(path);
        guards::ensure_not_root("rmdir", &path)?;
        let ino = self.resolve("rmdir", &path)?;
        let attr = self.attr_of("rmdir", &path, ino)?;
        guards::ensure_dir("rmdir", &path, &attr)?;

        let children = self.run("rmdir", &path, |conn| child_count(conn, ino))?;
        if children > 0 {
            return Err(FsError::not_empty("rmdir", &path));
        }

        let (parent, name) = parent_of(&path);
        let parent_ino = self.resolve("rmdir", &parent)?;
        self.run("rmdir", &path, |conn| {
            remove_child(conn, parent_ino, &name, ino)
        })
    }

    /// Remove a file's dentry; the inode and its data are purged when the
    /// last link disappears.
    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        let path = paths::normalize(path);
        guards::ensure_not_root("unlink", &path)?;
        let ino = self.resolve("unlink", &path)?;
        let attr = self.attr_of("unlink", &path, ino)?;
        if attr.is_dir() {
            return Err(FsError::is_a_directory("unlink", &path));
        }

        let (parent, name) = parent_of(&path);
        let parent_ino = self.resolve("unlink", &parent)?;
        self.run("unlink", &path, |conn| {
            remove_child(conn, parent_ino, &name, ino)
        })
    }

    /// Unified removal. Directories require `recursive`; missing targets are
    /// silenced by `force`; the root is always refused.
    pub async fn rm(&self, path: &str, opts: RemoveOptions) -> FsResult<()> {
        let path = paths::normalize(path);
        guards::ensure_not_root("rm", &path)?;

        let Some(ino) = self.resolve_opt("rm", &path)? else {
            if opts.force {
                return Ok(());
            }
            return Err(FsError::not_found("rm", &path));
        };
        let attr = self.attr_of("rm", &path, ino)?;
        guards::ensure_not_symlink("rm", &path, &attr)?;

        let (parent, name) = parent_of(&path);
        let parent_ino = self.resolve("rm", &parent)?;

        if !attr.is_dir() {
            return self.run("rm", &path, |conn| remove_child(conn, parent_ino, &name, ino));
        }
        if !opts.recursive {
            return Err(FsError::is_a_directory("rm", &path));
        }

        // Collect the subtree with an explicit stack, then delete in reverse
        // so children always go before their parents.
        struct Node {
            path: String,
            ino: i64,
            parent_ino: i64,
            name: String,
            is_dir: bool,
        }

        let mut stack = vec![Node {
            path: path.clone(),
            ino,
            parent_ino,
            name,
            is_dir: true,
        }];
        let mut ordered: Vec<Node> = Vec::new();

        while let Some(node) = stack.pop() {
            if node.is_dir {
                let children: Vec<(String, i64, u32)> =
                    self.run("rm", &node.path, |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT d.name, d.ino, i.mode
                             FROM fs_dentry d JOIN fs_inode i ON i.ino = d.ino
                             WHERE d.parent_ino = ?1",
                        )?;
                        let rows = stmt.query_map(params![node.ino], |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                        })?;
                        rows.collect()
                    })?;
                for (child_name, child_ino, child_mode) in children {
                    let child_path = paths::join(&node.path, &child_name);
                    match FileKind::from_mode(child_mode) {
                        FileKind::Symlink => {
                            return Err(FsError::symlink_unsupported("rm", child_path));
                        }
                        kind => stack.push(Node {
                            path: child_path,
                            ino: child_ino,
                            parent_ino: node.ino,
                            name: child_name,
                            is_dir: kind == FileKind::Directory,
                        }),
                    }
                }
            }
            ordered.push(node);
        }

        for node in ordered.iter().rev() {
            self.run("rm", &node.path, |conn| {
                remove_child(conn, node.parent_ino, &node.name, node.ino)
            })?;
        }
        Ok(())
    }

    /// Transactionally move a file or directory.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        let old = paths::normalize(old_path);
        let new = paths::normalize(new_path);
        if old == new {
            return Ok(());
        }
        guards::ensure_not_root("rename", &old)?;
        guards::ensure_not_root("rename", &new)?;

        let (old_parent, old_name) = parent_of(&old);
        let old_parent_ino = self
            .resolve_opt("rename", &old_parent)?
            .ok_or_else(|| FsError::not_found("rename", &old))?;
        let old_ino = self
            .run("rename", &old, |conn| lookup(conn, old_parent_ino, &old_name))?
            .ok_or_else(|| FsError::not_found("rename", &old))?;
        let old_attr = self.attr_of("rename", &old, old_ino)?;
        guards::ensure_not_symlink("rename", &old, &old_attr)?;

        let (new_parent, new_name) = parent_of(&new);
        let new_parent_ino = self
            .resolve_opt("rename", &new_parent)?
            .ok_or_else(|| FsError::not_found("rename", &new))?;
        let new_parent_attr = self.attr_of("rename", &new, new_parent_ino)?;
        guards::ensure_dir("rename", &new, &new_parent_attr)?;

        if old_attr.is_dir() && paths::is_descendant(&new, &old) {
            return Err(FsError::invalid(
                "rename",
                &new,
                "cannot move a directory into its own subtree",
            ));
        }

        let dest = self.run("rename", &new, |conn| {
            lookup(conn, new_parent_ino, &new_name)
        })?;
        if let Some(dest_ino) = dest {
            let dest_attr = self.attr_of("rename", &new, dest_ino)?;
            guards::ensure_not_symlink("rename", &new, &dest_attr)?;
            match (old_attr.is_dir(), dest_attr.is_dir()) {
                (true, false) => return Err(FsError::not_a_directory("rename", &new)),
                (false, true) => return Err(FsError::is_a_directory("rename", &new)),
                (true, true) => {
                    let children = self.run("rename", &new, |conn| child_count(conn, dest_ino))?;
                    if children > 0 {
                        return Err(FsError::not_empty("rename", &new));
                    }
                }
                (false, false) => {}
            }
        }

        let now = unix_now();
        self.tx("rename", &old, |conn| {
            if let Some(dest_ino) = dest {
                remove_child(conn, new_parent_ino, &new_name, dest_ino)?;
            }
            conn.execute(
                "UPDATE fs_dentry SET parent_ino = ?1, name = ?2
                 WHERE parent_ino = ?3 AND name = ?4",
                params![new_parent_ino, new_name, old_parent_ino, old_name],
            )?;
            conn.execute(
                "UPDATE fs_inode SET ctime = ?1 WHERE ino = ?2",
                params![now, old_ino],
            )?;
            conn.execute(
                "UPDATE fs_inode SET mtime = ?1, ctime = ?1 WHERE ino = ?2",
                params![now, old_parent_ino],
            )?;
            if new_parent_ino != old_parent_ino {
                conn.execute(
                    "UPDATE fs_inode SET mtime = ?1, ctime = ?1 WHERE ino = ?2",
                    params![now, new_parent_ino],
                )?;
            }
            Ok(())
        })
    }

    // ========================================================================
    // Symlinks
    // ========================================================================

    /// Create a symlink at `linkpath` storing `target` verbatim.
    pub async fn symlink(&self, target: &str, linkpath: &str) -> FsResult<InodeAttr> {
        let linkpath = paths::normalize(linkpath);
        if self.resolve_opt("symlink", &linkpath)?.is_some() {
            return Err(FsError::already_exists("symlink", &linkpath));
        }
        let Some((parent, name)) = paths::split_parent(&linkpath) else {
            return Err(FsError::already_exists("symlink", "/"));
        };
        let parent_ino = self
            .resolve_opt("symlink", &parent)?
            .ok_or_else(|| FsError::not_found("symlink", &linkpath))?;
        let parent_attr = self.attr_of("symlink", &linkpath, parent_ino)?;
        guards::ensure_dir("symlink", &linkpath, &parent_attr)?;

        let now = unix_now();
        let ino = self.run("symlink", &linkpath, |conn| {
            let ino = create_inode(conn, SYMLINK_MODE, 0, 0, target.len() as i64, now)?;
            conn.execute(
                "INSERT INTO fs_symlink (ino, target) VALUES (?1, ?2)",
                params![ino, target],
            )?;
            insert_dentry(conn, parent_ino, &name, ino)?;
            Ok(ino)
        })?;
        self.attr_of("symlink", &linkpath, ino)
    }

    /// Read a symlink's stored target.
    pub async fn readlink(&self, path: &str) -> FsResult<String> {
        let path = paths::normalize(path);
        let ino = self.resolve("readlink", &path)?;
        let attr = self.attr_of("readlink", &path, ino)?;
        if !attr.is_symlink() {
            return Err(FsError::invalid("readlink", &path, "not a symbolic link"));
        }
        self.run("readlink", &path, |conn| {
            conn.query_row(
                "SELECT target FROM fs_symlink WHERE ino = ?1",
                params![ino],
                |row| row.get(0),
            )
            .optional()
        })?
        .ok_or_else(|| FsError::new(Errno::Eio, "readlink", path, "symlink target row missing"))
    }

    // ========================================================================
    // Resolution internals
    // ========================================================================

    /// Walk dentries from the root. The only producer of ENOENT for
    /// intermediate components.
    fn resolve(&self, syscall: &'static str, path: &str) -> FsResult<i64> {
        self.resolve_opt(syscall, path)?
            .ok_or_else(|| FsError::not_found(syscall, path))
    }

    fn resolve_opt(&self, syscall: &'static str, path: &str) -> FsResult<Option<i64>> {
        let mut ino = ROOT_INO;
        for name in paths::components(path) {
            match self.run(syscall, path, |conn| lookup(conn, ino, name))? {
                Some(next) => ino = next,
                None => return Ok(None),
            }
        }
        Ok(Some(ino))
    }

    /// Walk a directory path, creating missing components with the default
    /// directory mode. Errors with ENOTDIR when a component is not a
    /// directory.
    fn ensure_dir_path(&self, syscall: &'static str, dir_path: &str) -> FsResult<i64> {
        let mut ino = ROOT_INO;
        let mut walked = String::from("/");
        for name in paths::components(dir_path) {
            walked = paths::join(&walked, name);
            let parent = ino;
            match self.run(syscall, &walked, |conn| lookup(conn, parent, name))? {
                Some(next) => {
                    let attr = self.attr_of(syscall, &walked, next)?;
                    if !attr.is_dir() {
                        return Err(FsError::not_a_directory(syscall, &walked));
                    }
                    ino = next;
                }
                None => {
                    let now = unix_now();
                    ino = self.run(syscall, &walked, |conn| {
                        let ino = create_inode(conn, DIR_MODE, 0, 0, 0, now)?;
                        insert_dentry(conn, parent, name, ino)?;
                        Ok(ino)
                    })?;
                }
            }
        }
        Ok(ino)
    }

    pub(crate) fn attr_of(
        &self,
        syscall: &'static str,
        path: &str,
        ino: i64,
    ) -> FsResult<InodeAttr> {
        self.run(syscall, path, |conn| {
            match read_inode(conn, ino)? {
                Some(row) => {
                    let nlink = dentry_count(conn, ino)?;
                    Ok(Some(row.into_attr(nlink.max(0) as u32)))
                }
                None => Ok(None),
            }
        })?
        .ok_or_else(|| {
            FsError::new(Errno::Eio, syscall, path, "dentry references a missing inode")
        })
    }

    /// Resolve a path that must name a regular file (for handles).
    pub(crate) fn resolve_file(
        &self,
        syscall: &'static str,
        path: &str,
    ) -> FsResult<(i64, InodeAttr)> {
        let ino = self.resolve(syscall, path)?;
        let attr = self.attr_of(syscall, path, ino)?;
        guards::ensure_file(syscall, path, &attr)?;
        Ok((ino, attr))
    }

    pub(crate) fn run<T>(
        &self,
        syscall: &'static str,
        path: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> FsResult<T> {
        self.db.with(f).map_err(|e| FsError::io(syscall, path, e))
    }

    fn tx<T>(
        &self,
        syscall: &'static str,
        path: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> FsResult<T> {
        self.db
            .transaction(f)
            .map_err(|e| FsError::io(syscall, path, e))
    }
}

/// `split_parent` for paths already known not to be the root.
fn parent_of(path: &str) -> (String, String) {
    paths::split_parent(path).unwrap_or_else(|| ("/".to_string(), String::new()))
}

// ============================================================================
// Row-level helpers
// ============================================================================

struct InodeRow {
    ino: i64,
    mode: u32,
    uid: u32,
    gid: u32,
    size: i64,
    atime: i64,
    mtime: i64,
    ctime: i64,
}

impl InodeRow {
    fn into_attr(self, nlink: u32) -> InodeAttr {
        InodeAttr {
            ino: self.ino,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            size: self.size,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            nlink,
        }
    }
}

fn read_inode(conn: &Connection, ino: i64) -> rusqlite::Result<Option<InodeRow>> {
    conn.query_row(
        "SELECT ino, mode, uid, gid, size, atime, mtime, ctime FROM fs_inode WHERE ino = ?1",
        params![ino],
        |row| {
            Ok(InodeRow {
                ino: row.get(0)?,
                mode: row.get(1)?,
                uid: row.get(2)?,
                gid: row.get(3)?,
                size: row.get(4)?,
                atime: row.get(5)?,
                mtime: row.get(6)?,
                ctime: row.get(7)?,
            })
        },
    )
    .optional()
}

fn lookup(conn: &Connection, parent_ino: i64, name: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT ino FROM fs_dentry WHERE parent_ino = ?1 AND name = ?2",
        params![parent_ino, name],
        |row| row.get(0),
    )
    .optional()
}

fn dentry_count(conn: &Connection, ino: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM fs_dentry WHERE ino = ?1",
        params![ino],
        |row| row.get(0),
    )
}

fn child_count(conn: &Connection, parent_ino: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM fs_dentry WHERE parent_ino = ?1",
        params![parent_ino],
        |row| row.get(0),
    )
}

fn create_inode(
    conn: &Connection,
    mode: u32,
    uid: u32,
    gid: u32,
    size: i64,
    now: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO fs_inode (mode, uid, gid, size, atime, mtime, ctime)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)",
        params![mode, uid, gid, size, now],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_dentry(
    conn: &Connection,
    parent_ino: i64,
    name: &str,
    ino: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO fs_dentry (name, parent_ino, ino) VALUES (?1, ?2, ?3)",
        params![name, parent_ino, ino],
    )?;
    Ok(())
}

/// Delete one dentry and purge the inode (data and symlink rows included)
/// if nothing references it any more.
fn remove_child(
    conn: &Connection,
    parent_ino: i64,
    name: &str,
    ino: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM fs_dentry WHERE parent_ino = ?1 AND name = ?2",
        params![parent_ino, name],
    )?;
    purge_if_orphaned(conn, ino)
}

fn purge_if_orphaned(conn: &Connection, ino: i64) -> rusqlite::Result<()> {
    if ino == ROOT_INO {
        return Ok(());
    }
    if dentry_count(conn, ino)? > 0 {
        return Ok(());
    }
    conn.execute("DELETE FROM fs_data WHERE ino = ?1", params![ino])?;
    conn.execute("DELETE FROM fs_symlink WHERE ino = ?1", params![ino])?;
    conn.execute("DELETE FROM fs_inode WHERE ino = ?1", params![ino])?;
    Ok(())
}

fn clear_chunks(conn: &Connection, ino: i64) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM fs_data WHERE ino = ?1", params![ino])?;
    Ok(())
}

fn write_chunks(
    conn: &Connection,
    ino: i64,
    data: &[u8],
    chunk_size: usize,
) -> rusqlite::Result<()> {
    let chunk_size = chunk_size.max(1);
    for (index, chunk) in data.chunks(chunk_size).enumerate() {
        conn.execute(
            "INSERT INTO fs_data (ino, chunk_index, data) VALUES (?1, ?2, ?3)",
            params![ino, index as i64, chunk],
        )?;
    }
    Ok(())
}

fn copy_chunks(conn: &Connection, src_ino: i64, dest_ino: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO fs_data (ino, chunk_index, data)
         SELECT ?1, chunk_index, data FROM fs_data WHERE ino = ?2",
        params![dest_ino, src_ino],
    )?;
    Ok(())
}

fn read_all_chunks(conn: &Connection, ino: i64) -> rusqlite::Result<Vec<u8>> {
    let mut stmt =
        conn.prepare("SELECT data FROM fs_data WHERE ino = ?1 ORDER BY chunk_index")?;
    let rows = stmt.query_map(params![ino], |row| row.get::<_, Vec<u8>>(0))?;
    let mut out = Vec::new();
    for chunk in rows {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Read-modify-write `data` into the chunk rows covering
/// `[offset, offset + data.len())`. Short or missing chunks are zero-filled
/// up to the written range. Does not touch the inode's size.
pub(crate) fn write_span(
    conn: &Connection,
    ino: i64,
    offset: u64,
    data: &[u8],
    chunk_size: u64,
) -> rusqlite::Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let end = offset + data.len() as u64;
    let mut index = offset / chunk_size;
    while index * chunk_size < end {
        let chunk_start = index * chunk_size;
        let lo = offset.max(chunk_start);
        let hi = end.min(chunk_start + chunk_size);
        let src = &data[(lo - offset) as usize..(hi - offset) as usize];

        if lo == chunk_start && hi == chunk_start + chunk_size {
            conn.execute(
                "INSERT OR REPLACE INTO fs_data (ino, chunk_index, data) VALUES (?1, ?2, ?3)",
                params![ino, index as i64, src],
            )?;
        } else {
            let existing: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT data FROM fs_data WHERE ino = ?1 AND chunk_index = ?2",
                    params![ino, index as i64],
                    |row| row.get(0),
                )
                .optional()?;
            let mut buf = existing.unwrap_or_default();
            let local_lo = (lo - chunk_start) as usize;
            let local_hi = (hi - chunk_start) as usize;
            if buf.len() < local_hi {
                buf.resize(local_hi, 0);
            }
            buf[local_lo..local_hi].copy_from_slice(src);
            conn.execute(
                "INSERT OR REPLACE INTO fs_data (ino, chunk_index, data) VALUES (?1, ?2, ?3)",
                params![ino, index as i64, buf],
            )?;
        }
        index += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RemoveOptions, S_IFMT, S_IFREG};

    fn fs() -> InodeFs {
        InodeFs::new(Database::in_memory().unwrap())
    }

    fn fs_with_chunk(chunk_size: usize) -> InodeFs {
        InodeFs::new(Database::in_memory_with_chunk_size(chunk_size).unwrap())
    }

    fn data_rows(fs: &InodeFs) -> i64 {
        fs.database()
            .with(|conn| conn.query_row("SELECT COUNT(*) FROM fs_data", [], |row| row.get(0)))
            .unwrap()
    }

    fn inode_rows(fs: &InodeFs) -> i64 {
        fs.database()
            .with(|conn| conn.query_row("SELECT COUNT(*) FROM fs_inode", [], |row| row.get(0)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_mkdir_write_stat_read() {
        let fs = fs();
        fs.mkdir("/w").await.unwrap();
        fs.write_str("/w/a.txt", "hi").await.unwrap();

        let attr = fs.stat("/w/a.txt").await.unwrap();
        assert_eq!(attr.mode & S_IFMT, S_IFREG);
        assert_eq!(attr.size, 2);
        assert_eq!(attr.nlink, 1);

        assert_eq!(fs.read_to_string("/w/a.txt").await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let fs = fs();
        fs.write_str("/a/b/c.txt", "x").await.unwrap();

        assert_eq!(fs.readdir("/a").await.unwrap(), vec!["b"]);
        assert_eq!(fs.readdir("/a/b").await.unwrap(), vec!["c.txt"]);
        assert!(fs.stat("/a").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_roundtrip_at_chunk_boundaries() {
        let cs = 8usize;
        let fs = fs_with_chunk(cs);
        for len in [0, 1, cs - 1, cs, cs + 1, 10 * cs] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            fs.write("/blob", &payload).await.unwrap();
            assert_eq!(fs.read("/blob").await.unwrap(), payload, "len {len}");
            assert_eq!(fs.stat("/blob").await.unwrap().size, len as i64);
        }
    }

    #[tokio::test]
    async fn test_rewrite_shrinks_chunk_rows() {
        let fs = fs_with_chunk(4);
        fs.write("/f", &[1u8; 12]).await.unwrap();
        assert_eq!(data_rows(&fs), 3);
        fs.write("/f", &[2u8; 3]).await.unwrap();
        assert_eq!(data_rows(&fs), 1);
        assert_eq!(fs.read("/f").await.unwrap(), vec![2u8; 3]);
    }

    #[tokio::test]
    async fn test_readdir_sorted_no_duplicates() {
        let fs = fs();
        fs.mkdir("/d").await.unwrap();
        for name in ["zeta", "alpha", "mid"] {
            fs.write_str(&format!("/d/{name}"), "x").await.unwrap();
        }
        let names = fs.readdir("/d").await.unwrap();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);

        let plus = fs.readdir_plus("/d").await.unwrap();
        assert_eq!(plus.len(), 3);
        assert_eq!(plus[0].name, "alpha");
        assert!(plus[0].attr.is_file());
    }

    #[tokio::test]
    async fn test_readdir_on_file_is_enotdir() {
        let fs = fs();
        fs.write_str("/f", "x").await.unwrap();
        let err = fs.readdir("/f").await.unwrap_err();
        assert_eq!(err.code, Errno::Enotdir);
    }

    #[tokio::test]
    async fn test_mkdir_errors() {
        let fs = fs();
        fs.mkdir("/d").await.unwrap();

        assert_eq!(fs.mkdir("/d").await.unwrap_err().code, Errno::Eexist);
        assert_eq!(fs.mkdir("/").await.unwrap_err().code, Errno::Eexist);
        assert_eq!(fs.mkdir("/no/parent").await.unwrap_err().code, Errno::Enoent);

        fs.write_str("/file", "x").await.unwrap();
        assert_eq!(fs.mkdir("/file/sub").await.unwrap_err().code, Errno::Enotdir);
    }

    #[tokio::test]
    async fn test_unlink_purges_orphan() {
        let fs = fs();
        fs.write_str("/f", "hello").await.unwrap();
        let before = inode_rows(&fs);
        assert!(data_rows(&fs) > 0);

        fs.unlink("/f").await.unwrap();
        assert_eq!(fs.stat("/f").await.unwrap_err().code, Errno::Enoent);
        assert_eq!(data_rows(&fs), 0);
        assert_eq!(inode_rows(&fs), before - 1);
    }

    #[tokio::test]
    async fn test_unlink_errors() {
        let fs = fs();
        assert_eq!(fs.unlink("/").await.unwrap_err().code, Errno::Eperm);
        assert_eq!(fs.unlink("/gone").await.unwrap_err().code, Errno::Enoent);
        fs.mkdir("/d").await.unwrap();
        assert_eq!(fs.unlink("/d").await.unwrap_err().code, Errno::Eisdir);
    }

    #[tokio::test]
    async fn test_rmdir() {
        let fs = fs();
        fs.mkdir("/d").await.unwrap();
        fs.rmdir("/d").await.unwrap();
        assert_eq!(fs.stat("/d").await.unwrap_err().code, Errno::Enoent);

        fs.mkdir("/e").await.unwrap();
        fs.write_str("/e/f", "x").await.unwrap();
        assert_eq!(fs.rmdir("/e").await.unwrap_err().code, Errno::Enotempty);
        assert_eq!(fs.rmdir("/").await.unwrap_err().code, Errno::Eperm);
        fs.write_str("/plain", "x").await.unwrap();
        assert_eq!(fs.rmdir("/plain").await.unwrap_err().code, Errno::Enotdir);
    }

    #[tokio::test]
    async fn test_rm_recursive_purges_everything() {
        let fs = fs();
        fs.mkdir("/d").await.unwrap();
        fs.write_str("/d/x", "1").await.unwrap();
        fs.write_str("/d/y", "2").await.unwrap();
        fs.mkdir("/d/sub").await.unwrap();
        fs.write_str("/d/sub/z", "3").await.unwrap();

        assert_eq!(fs.rm("/d", RemoveOptions::default()).await.unwrap_err().code, Errno::Eisdir);

        fs.rm("/d", RemoveOptions::recursive()).await.unwrap();
        assert_eq!(fs.stat("/d").await.unwrap_err().code, Errno::Enoent);
        assert_eq!(fs.stat("/d/x").await.unwrap_err().code, Errno::Enoent);
        assert_eq!(data_rows(&fs), 0);
        assert_eq!(inode_rows(&fs), 1); // only root left
    }

    #[tokio::test]
    async fn test_rm_force_silences_enoent() {
        let fs = fs();
        assert_eq!(fs.rm("/missing", RemoveOptions::default()).await.unwrap_err().code, Errno::Enoent);
        fs.rm("/missing", RemoveOptions::force()).await.unwrap();
        assert_eq!(fs.rm("/", RemoveOptions::force().with_recursive()).await.unwrap_err().code, Errno::Eperm);
    }

    #[tokio::test]
    async fn test_rm_refuses_symlink() {
        let fs = fs();
        fs.symlink("/target", "/link").await.unwrap();
        assert_eq!(fs.rm("/link", RemoveOptions::force()).await.unwrap_err().code, Errno::Enosys);

        fs.mkdir("/d").await.unwrap();
        fs.symlink("/target", "/d/link").await.unwrap();
        let err = fs.rm("/d", RemoveOptions::recursive()).await.unwrap_err();
        assert_eq!(err.code, Errno::Enosys);
        // Refusal happens before any deletion.
        assert!(fs.stat("/d").await.is_ok());
    }

    #[tokio::test]
    async fn test_rename_moves_file() {
        let fs = fs();
        fs.mkdir("/a").await.unwrap();
        fs.mkdir("/b").await.unwrap();
        fs.write_str("/a/f", "content").await.unwrap();

        fs.rename("/a/f", "/b/g").await.unwrap();
        assert_eq!(fs.stat("/a/f").await.unwrap_err().code, Errno::Enoent);
        assert_eq!(fs.read_to_string("/b/g").await.unwrap(), "content");
    }

    #[tokio::test]
    async fn test_rename_noop_and_root() {
        let fs = fs();
        fs.write_str("/f", "x").await.unwrap();
        fs.rename("/f", "/f").await.unwrap();
        assert_eq!(fs.rename("/", "/x").await.unwrap_err().code, Errno::Eperm);
        assert_eq!(fs.rename("/f", "/").await.unwrap_err().code, Errno::Eperm);
    }

    #[tokio::test]
    async fn test_rename_cycle_prevention() {
        let fs = fs();
        fs.mkdir("/a").await.unwrap();
        fs.mkdir("/a/b").await.unwrap();

        let err = fs.rename("/a", "/a/b/c").await.unwrap_err();
        assert_eq!(err.code, Errno::Einval);
        // Tree unchanged.
        assert!(fs.stat("/a").await.is_ok());
        assert!(fs.stat("/a/b").await.is_ok());
        assert_eq!(fs.readdir("/a/b").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_rename_destination_conflicts() {
        let fs = fs();
        fs.mkdir("/dir").await.unwrap();
        fs.mkdir("/dir2").await.unwrap();
        fs.write_str("/dir2/kid", "x").await.unwrap();
        fs.write_str("/file", "x").await.unwrap();

        // dir over file
        assert_eq!(fs.rename("/dir", "/file").await.unwrap_err().code, Errno::Enotdir);
        // file over dir
        assert_eq!(fs.rename("/file", "/dir").await.unwrap_err().code, Errno::Eisdir);
        // dir over non-empty dir
        assert_eq!(fs.rename("/dir", "/dir2").await.unwrap_err().code, Errno::Enotempty);

        // Failed renames leave both sides untouched.
        assert!(fs.stat("/dir").await.unwrap().is_dir());
        assert_eq!(fs.read_to_string("/file").await.unwrap(), "x");
        assert_eq!(fs.readdir("/dir2").await.unwrap(), vec!["kid"]);
    }

    #[tokio::test]
    async fn test_rename_replaces_file_and_empty_dir() {
        let fs = fs();
        fs.write_str("/src", "new").await.unwrap();
        fs.write_str("/dst", "old").await.unwrap();
        fs.rename("/src", "/dst").await.unwrap();
        assert_eq!(fs.read_to_string("/dst").await.unwrap(), "new");
        assert_eq!(data_rows(&fs), 1);

        fs.mkdir("/d1").await.unwrap();
        fs.mkdir("/d2").await.unwrap();
        fs.rename("/d1", "/d2").await.unwrap();
        assert_eq!(fs.stat("/d1").await.unwrap_err().code, Errno::Enoent);
        assert!(fs.stat("/d2").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_copy_file() {
        let fs = fs_with_chunk(4);
        fs.mkdir("/out").await.unwrap();
        fs.write("/src", &[7u8; 10]).await.unwrap();

        fs.copy_file("/src", "/out/dst").await.unwrap();
        assert_eq!(fs.read("/out/dst").await.unwrap(), vec![7u8; 10]);
        // Source untouched.
        assert_eq!(fs.read("/src").await.unwrap(), vec![7u8; 10]);

        // Replace an existing destination.
        fs.write("/src2", &[9u8; 3]).await.unwrap();
        fs.copy_file("/src2", "/out/dst").await.unwrap();
        assert_eq!(fs.read("/out/dst").await.unwrap(), vec![9u8; 3]);
    }

    #[tokio::test]
    async fn test_copy_file_errors() {
        let fs = fs();
        fs.write_str("/f", "x").await.unwrap();
        fs.mkdir("/d").await.unwrap();

        assert_eq!(fs.copy_file("/f", "/f").await.unwrap_err().code, Errno::Einval);
        assert_eq!(fs.copy_file("/gone", "/g").await.unwrap_err().code, Errno::Enoent);
        assert_eq!(fs.copy_file("/d", "/g").await.unwrap_err().code, Errno::Eisdir);
        // Destination parents are not created.
        assert_eq!(fs.copy_file("/f", "/no/dst").await.unwrap_err().code, Errno::Enoent);
        // Directory destination.
        assert_eq!(fs.copy_file("/f", "/d").await.unwrap_err().code, Errno::Eisdir);
    }

    #[tokio::test]
    async fn test_symlink_roundtrip() {
        let fs = fs();
        let attr = fs.symlink("../relative/target", "/link").await.unwrap();
        assert!(attr.is_symlink());
        assert_eq!(fs.readlink("/link").await.unwrap(), "../relative/target");
        assert_eq!(fs.symlink("x", "/link").await.unwrap_err().code, Errno::Eexist);

        fs.write_str("/f", "x").await.unwrap();
        assert_eq!(fs.readlink("/f").await.unwrap_err().code, Errno::Einval);
    }

    #[tokio::test]
    async fn test_access_and_exists() {
        let fs = fs();
        fs.access("/").await.unwrap();
        assert_eq!(fs.access("/nope").await.unwrap_err().code, Errno::Enoent);
        assert!(!fs.exists("/nope").await.unwrap());
        fs.write_str("/here", "x").await.unwrap();
        assert!(fs.exists("/here").await.unwrap());
    }

    #[tokio::test]
    async fn test_statfs_counts() {
        let fs = fs();
        fs.write_str("/f", "hello").await.unwrap();
        let stats = fs.statfs().await.unwrap();
        assert_eq!(stats.used_inodes, 2); // root + file
        assert_eq!(stats.used_bytes, 5);
        assert!(stats.free_inodes < stats.total_inodes);
    }

    #[tokio::test]
    async fn test_stat_reports_nlink_from_dentries() {
        let fs = fs();
        fs.write_str("/f", "x").await.unwrap();
        assert_eq!(fs.stat("/f").await.unwrap().nlink, 1);
        // No dentry names the root.
        assert_eq!(fs.stat("/").await.unwrap().nlink, 0);
    }
}
