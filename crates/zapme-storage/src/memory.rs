//! In-memory storage backend
//!
//! Used by tests and benchmarks. Files live in a shared map so several handles
//! (and the test itself, via [`MemoryStorage::get`] / [`MemoryStorage::put`])
//! see the same bytes. A write budget simulates a card that fills up or fails
//! mid-write.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::rc::Rc;

use crate::file::{OpenMode, Storage, StorageFile};

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    /// Bytes that may still be written across all files; `None` is unlimited.
    write_budget: Option<usize>,
}

/// A cloneable handle to an in-memory filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Rc<RefCell<Inner>>,
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw file contents, bypassing any handle.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.borrow().files.get(&normalize(path)).cloned()
    }

    /// Replace raw file contents, bypassing any handle.
    pub fn put(&self, path: &str, data: Vec<u8>) {
        self.inner.borrow_mut().files.insert(normalize(path), data);
    }

    /// Limit how many more bytes may be written; later writes return 0.
    pub fn set_write_budget(&self, budget: Option<usize>) {
        self.inner.borrow_mut().write_budget = budget;
    }
}

impl Storage for MemoryStorage {
    type File = MemoryFile;

    fn open(&self, path: &str, mode: OpenMode) -> io::Result<MemoryFile> {
        let path = normalize(path);
        let mut inner = self.inner.borrow_mut();
        match mode {
            OpenMode::Read => {
                if !inner.files.contains_key(&path) {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no such file: {path}"),
                    ));
                }
            }
            OpenMode::Write => {
                inner.files.entry(path.clone()).or_default();
            }
        }
        Ok(MemoryFile {
            storage: self.clone(),
            path,
            mode,
            position: 0,
        })
    }

    fn exists(&self, path: &str) -> bool {
        let path = normalize(path);
        let inner = self.inner.borrow();
        inner.files.contains_key(&path) || inner.dirs.contains(&path)
    }

    fn mkdir(&self, path: &str) -> io::Result<()> {
        self.inner.borrow_mut().dirs.insert(normalize(path));
        Ok(())
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        let path = normalize(path);
        self.inner
            .borrow_mut()
            .files
            .remove(&path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such file: {path}")))
    }
}

/// An open in-memory file.
#[derive(Debug)]
pub struct MemoryFile {
    storage: MemoryStorage,
    path: String,
    mode: OpenMode,
    position: u64,
}

impl MemoryFile {
    fn missing(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("file removed while open: {}", self.path),
        )
    }
}

impl StorageFile for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = self.storage.inner.borrow();
        let data = inner.files.get(&self.path).ok_or_else(|| self.missing())?;
        let start = usize::try_from(self.position)
            .unwrap_or(usize::MAX)
            .min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        drop(inner);
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.mode != OpenMode::Write {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("file opened read-only: {}", self.path),
            ));
        }
        let mut inner = self.storage.inner.borrow_mut();
        let n = match inner.write_budget {
            Some(budget) => buf.len().min(budget),
            None => buf.len(),
        };
        if let Some(budget) = inner.write_budget.as_mut() {
            *budget -= n;
        }
        let start = usize::try_from(self.position).unwrap_or(usize::MAX);
        let data = inner.files.get_mut(&self.path).ok_or_else(|| self.missing())?;
        if data.len() < start + n {
            data.resize(start + n, 0);
        }
        data[start..start + n].copy_from_slice(&buf[..n]);
        drop(inner);
        self.position += n as u64;
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.storage
            .inner
            .borrow()
            .files
            .get(&self.path)
            .map(|d| d.len() as u64)
            .unwrap_or(0)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length too large"))?;
        let mut inner = self.storage.inner.borrow_mut();
        let data = inner.files.get_mut(&self.path).ok_or_else(|| self.missing())?;
        data.resize(len, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::write_full;

    #[test]
    fn test_handles_share_contents() {
        let storage = MemoryStorage::new();
        let mut w = storage.open("/a.bin", OpenMode::Write).unwrap();
        write_full(&mut w, b"shared").unwrap();

        let mut r = storage.open("a.bin", OpenMode::Read).unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(r.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"shared");
        assert_eq!(storage.get("/a.bin").unwrap(), b"shared");
    }

    #[test]
    fn test_write_budget_short_writes() {
        let storage = MemoryStorage::new();
        storage.set_write_budget(Some(4));

        let mut w = storage.open("/a.bin", OpenMode::Write).unwrap();
        assert_eq!(write_full(&mut w, b"abcdef").unwrap(), 4);
        assert_eq!(w.write(b"gh").unwrap(), 0);
        assert_eq!(storage.get("/a.bin").unwrap(), b"abcd");
    }

    #[test]
    fn test_read_only_handle_rejects_writes() {
        let storage = MemoryStorage::new();
        storage.put("/a.bin", b"x".to_vec());
        let mut r = storage.open("/a.bin", OpenMode::Read).unwrap();
        assert_eq!(
            r.write(b"y").unwrap_err().kind(),
            io::ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_truncate_and_remove() {
        let storage = MemoryStorage::new();
        storage.put("/a.bin", vec![7u8; 64]);
        let mut w = storage.open("/a.bin", OpenMode::Write).unwrap();
        w.truncate(16).unwrap();
        assert_eq!(w.size(), 16);

        storage.remove("/a.bin").unwrap();
        assert!(!storage.exists("/a.bin"));
        assert!(storage.open("/a.bin", OpenMode::Read).is_err());
    }
}
