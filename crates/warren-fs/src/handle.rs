//! Path-bound file handles.
//!
//! A handle stores the path it was opened with, not an inode number, and
//! re-resolves on every call. Access-control wrappers rely on this: a
//! policy change during the handle's lifetime applies to subsequent writes.

use rusqlite::{params, OptionalExtension};

use warren_store::unix_now;

use crate::error::FsResult;
use crate::fs::{write_span, InodeFs};
use crate::types::InodeAttr;

/// Handle to an open regular file.
#[derive(Debug, Clone)]
pub struct FileHandle {
    fs: InodeFs,
    path: String,
}

impl FileHandle {
    pub(crate) fn new(fs: InodeFs, path: String) -> Self {
        Self { fs, path }
    }

    /// The (normalized) path this handle was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read up to `size` bytes starting at `offset`. Returns fewer bytes at
    /// EOF; slices correctly across chunk boundaries. Updates atime.
    pub async fn pread(&self, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let (ino, attr) = self.fs.resolve_file("pread", &self.path)?;
        let file_size = attr.size.max(0) as u64;
        if offset >= file_size || size == 0 {
            return Ok(Vec::new());
        }
        let end = (offset + size as u64).min(file_size);
        let chunk_size = self.fs.database().chunk_size() as u64;
        let first = (offset / chunk_size) as i64;
        let last = ((end - 1) / chunk_size) as i64;

        let chunks: Vec<(i64, Vec<u8>)> = self.fs.run("pread", &self.path, |conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_index, data FROM fs_data
                 WHERE ino = ?1 AND chunk_index BETWEEN ?2 AND ?3
                 ORDER BY chunk_index",
            )?;
            let rows = stmt.query_map(params![ino, first, last], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect()
        })?;

        let mut out = Vec::with_capacity((end - offset) as usize);
        for (index, data) in chunks {
            let chunk_start = index as u64 * chunk_size;
            let chunk_end = chunk_start + data.len() as u64;
            let lo = offset.max(chunk_start);
            let hi = end.min(chunk_end);
            if hi > lo {
                out.extend_from_slice(&data[(lo - chunk_start) as usize..(hi - chunk_start) as usize]);
            }
        }

        self.fs.run("pread", &self.path, |conn| {
            conn.execute(
                "UPDATE fs_inode SET atime = ?1 WHERE ino = ?2",
                params![unix_now(), ino],
            )
            .map(|_| ())
        })?;
        Ok(out)
    }

    /// Write `data` at `offset`. Partially-touched boundary chunks are
    /// read-modify-written; writing past EOF zero-fills the gap and extends
    /// the file size.
    pub async fn pwrite(&self, offset: u64, data: &[u8]) -> FsResult<u32> {
        let (ino, attr) = self.fs.resolve_file("pwrite", &self.path)?;
        if data.is_empty() {
            return Ok(0);
        }
        let old_size = attr.size.max(0) as u64;
        let chunk_size = self.fs.database().chunk_size().max(1) as u64;
        let end = offset + data.len() as u64;
        let new_size = old_size.max(end);
        let now = unix_now();

        self.fs.run("pwrite", &self.path, |conn| {
            if offset > old_size {
                let gap = vec![0u8; (offset - old_size) as usize];
                write_span(conn, ino, old_size, &gap, chunk_size)?;
            }
            write_span(conn, ino, offset, data, chunk_size)?;
            conn.execute(
                "UPDATE fs_inode SET size = ?1, mtime = ?2 WHERE ino = ?3",
                params![new_size as i64, now, ino],
            )?;
            Ok(())
        })?;
        Ok(data.len() as u32)
    }

    /// Resize the file. Shrinking drops whole chunks past the new end and
    /// trims the final one; growing zero-extends.
    pub async fn truncate(&self, size: u64) -> FsResult<()> {
        let (ino, attr) = self.fs.resolve_file("truncate", &self.path)?;
        let old_size = attr.size.max(0) as u64;
        if size == old_size {
            return Ok(());
        }
        let chunk_size = self.fs.database().chunk_size().max(1) as u64;
        let now = unix_now();

        self.fs.run("truncate", &self.path, |conn| {
            if size < old_size {
                if size == 0 {
                    conn.execute("DELETE FROM fs_data WHERE ino = ?1", params![ino])?;
                } else {
                    let last = ((size - 1) / chunk_size) as i64;
                    conn.execute(
                        "DELETE FROM fs_data WHERE ino = ?1 AND chunk_index > ?2",
                        params![ino, last],
                    )?;
                    let keep = (size - last as u64 * chunk_size) as usize;
                    let tail: Option<Vec<u8>> = conn
                        .query_row(
                            "SELECT data FROM fs_data WHERE ino = ?1 AND chunk_index = ?2",
                            params![ino, last],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if let Some(mut tail) = tail {
                        if tail.len() > keep {
                            tail.truncate(keep);
                            conn.execute(
                                "INSERT OR REPLACE INTO fs_data (ino, chunk_index, data)
                                 VALUES (?1, ?2, ?3)",
                                params![ino, last, tail],
                            )?;
                        }
                    }
                }
            } else {
                let growth = vec![0u8; (size - old_size) as usize];
                write_span(conn, ino, old_size, &growth, chunk_size)?;
            }
            conn.execute(
                "UPDATE fs_inode SET size = ?1, mtime = ?2 WHERE ino = ?3",
                params![size as i64, now, ino],
            )?;
            Ok(())
        })
    }

    /// Current attributes of the file this handle points at.
    pub async fn fstat(&self) -> FsResult<InodeAttr> {
        let (_, attr) = self.fs.resolve_file("fstat", &self.path)?;
        Ok(attr)
    }

    /// No-op; the store commits each statement as it runs.
    pub async fn fsync(&self) -> FsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Errno;
    use warren_store::Database;

    fn fs_with_chunk(chunk_size: usize) -> InodeFs {
        InodeFs::new(Database::in_memory_with_chunk_size(chunk_size).unwrap())
    }

    #[tokio::test]
    async fn test_open_requires_regular_file() {
        let fs = fs_with_chunk(8);
        fs.mkdir("/d").await.unwrap();
        assert_eq!(fs.open("/d").await.unwrap_err().code, Errno::Eisdir);
        assert_eq!(fs.open("/nope").await.unwrap_err().code, Errno::Enoent);
    }

    #[tokio::test]
    async fn test_pread_spans_chunks() {
        let fs = fs_with_chunk(4);
        let payload: Vec<u8> = (0u8..20).collect();
        fs.write("/f", &payload).await.unwrap();

        let handle = fs.open("/f").await.unwrap();
        // Crosses three chunk boundaries.
        assert_eq!(handle.pread(3, 10).await.unwrap(), payload[3..13].to_vec());
        // Clamped at EOF.
        assert_eq!(handle.pread(18, 100).await.unwrap(), payload[18..].to_vec());
        // Past EOF.
        assert!(handle.pread(25, 4).await.unwrap().is_empty());
        assert!(handle.pread(0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pwrite_read_modify_write() {
        let fs = fs_with_chunk(4);
        fs.write("/f", &[0xAAu8; 12]).await.unwrap();

        let handle = fs.open("/f").await.unwrap();
        let written = handle.pwrite(3, &[0xBB; 6]).await.unwrap();
        assert_eq!(written, 6);

        let mut expected = vec![0xAAu8; 12];
        expected[3..9].copy_from_slice(&[0xBB; 6]);
        assert_eq!(fs.read("/f").await.unwrap(), expected);
        assert_eq!(fs.stat("/f").await.unwrap().size, 12);
    }

    #[tokio::test]
    async fn test_pwrite_extends_and_zero_fills_gap() {
        let fs = fs_with_chunk(4);
        fs.write("/f", &[1u8; 5]).await.unwrap();

        let handle = fs.open("/f").await.unwrap();
        handle.pwrite(10, &[2u8; 3]).await.unwrap();

        let mut expected = vec![1u8; 5];
        expected.extend_from_slice(&[0u8; 5]);
        expected.extend_from_slice(&[2u8; 3]);
        assert_eq!(fs.read("/f").await.unwrap(), expected);
        assert_eq!(fs.stat("/f").await.unwrap().size, 13);
    }

    #[tokio::test]
    async fn test_truncate_shrink_and_trim() {
        let fs = fs_with_chunk(4);
        fs.write("/f", &[7u8; 11]).await.unwrap();

        let handle = fs.open("/f").await.unwrap();
        handle.truncate(6).await.unwrap();
        assert_eq!(fs.read("/f").await.unwrap(), vec![7u8; 6]);

        let rows: i64 = fs
            .database()
            .with(|conn| conn.query_row("SELECT COUNT(*) FROM fs_data", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(rows, 2);

        handle.truncate(0).await.unwrap();
        assert!(fs.read("/f").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncate_grow_zero_extends() {
        let fs = fs_with_chunk(4);
        fs.write("/f", &[9u8; 3]).await.unwrap();

        let handle = fs.open("/f").await.unwrap();
        handle.truncate(10).await.unwrap();

        let mut expected = vec![9u8; 3];
        expected.extend_from_slice(&[0u8; 7]);
        assert_eq!(fs.read("/f").await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_handle_follows_path_after_replacement() {
        let fs = fs_with_chunk(8);
        fs.write_str("/f", "one").await.unwrap();
        let handle = fs.open("/f").await.unwrap();

        // Replace the file behind the handle's path.
        fs.unlink("/f").await.unwrap();
        fs.write_str("/f", "two!").await.unwrap();

        // Handle re-resolves by path, so it sees the new inode.
        assert_eq!(handle.pread(0, 16).await.unwrap(), b"two!".to_vec());

        fs.unlink("/f").await.unwrap();
        assert_eq!(handle.fstat().await.unwrap_err().code, Errno::Enoent);
    }

    #[tokio::test]
    async fn test_fstat_and_fsync() {
        let fs = fs_with_chunk(8);
        fs.write_str("/f", "abc").await.unwrap();
        let handle = fs.open("/f").await.unwrap();
        assert_eq!(handle.fstat().await.unwrap().size, 3);
        handle.fsync().await.unwrap();
    }
}
