//! Raw random-access file primitive: allocate, positioned read/write, rename, delete.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::common::{Result, VaultError};

pub struct BinaryFile {
    file: File,
    path: PathBuf,
}

impl BinaryFile {
    /// Creates (or truncates) `path` and sizes it to exactly `size` bytes.
    /// The unwritten range reads back as zeros.
    pub fn allocate(path: impl AsRef<Path>, size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let allocation_error = |source: io::Error| VaultError::Allocation {
            path: path.clone(),
            size,
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(allocation_error)?;
        file.set_len(size).map_err(allocation_error)?;

        Ok(Self { file, path })
    }

    /// Opens an existing file for positioned reads and writes.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => VaultError::not_found(path.display().to_string()),
                _ => VaultError::Io(e),
            })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        write_bytes_at(&self.file, offset, data)?;
        Ok(())
    }

    /// Reads exactly `len` bytes; a range running past the end of the file is
    /// reported as `OutOfBounds`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        read_bytes_at(&self.file, offset, &mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => VaultError::OutOfBounds {
                offset,
                len: len as u64,
                limit: self.file.metadata().map(|m| m.len()).unwrap_or(0),
            },
            _ => VaultError::Io(e),
        })?;
        Ok(buf)
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        let len = self.len()? as usize;
        self.read_at(0, len)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Closes the handle and moves the file to `target`.
    pub fn rename(self, target: impl AsRef<Path>) -> Result<PathBuf> {
        let target = target.as_ref().to_path_buf();
        let source = self.path.clone();
        drop(self.file);
        fs::rename(&source, &target)?;
        Ok(target)
    }

    /// Closes the handle and removes the file.
    pub fn delete(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.file);
        remove_if_exists(&path)
    }
}

pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::Io(e)),
    }
}

#[cfg(unix)]
fn read_bytes_at(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_bytes_at(file: &File, offset: u64, data: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(not(unix))]
fn read_bytes_at(mut file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

#[cfg(not(unix))]
fn write_bytes_at(mut file: &File, offset: u64, data: &[u8]) -> io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_zero_fills_and_positions_writes() {
        let dir = tempfile::tempdir().unwrap();
        let file = BinaryFile::allocate(dir.path().join("blob"), 16).unwrap();
        file.write_at(4, b"abcd").unwrap();

        let all = file.read_all().unwrap();
        assert_eq!(all.len(), 16);
        assert_eq!(&all[..4], &[0, 0, 0, 0]);
        assert_eq!(&all[4..8], b"abcd");
    }

    #[test]
    fn read_past_end_is_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let file = BinaryFile::allocate(dir.path().join("blob"), 8).unwrap();
        let err = file.read_at(4, 8).unwrap_err();
        assert!(matches!(err, VaultError::OutOfBounds { offset: 4, len: 8, limit: 8 }));
    }

    #[test]
    fn open_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = BinaryFile::open(dir.path().join("missing")).err().unwrap();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[test]
    fn rename_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        let file = BinaryFile::allocate(&src, 3).unwrap();
        file.rename(&dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::metadata(&dst).unwrap().len(), 3);
    }
}
