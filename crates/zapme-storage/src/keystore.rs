//! Persistent key-record store
//!
//! Mirrors the on-board emulated EEPROM: a flat byte region is loaded with
//! [`KeyStore::begin`], edited in place through [`KeyStore::data_mut`], and
//! only reaches the medium on [`KeyStore::commit`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Byte value of erased flash.
pub const ERASED: u8 = 0xFF;

pub trait KeyStore {
    /// Load the first `size` bytes of the store into memory.
    fn begin(&mut self, size: usize) -> io::Result<()>;

    /// The region loaded by `begin`; empty before `begin` succeeds.
    fn data(&self) -> &[u8];

    fn data_mut(&mut self) -> &mut [u8];

    /// Persist the region. Nothing written through `data_mut` survives a
    /// restart until this returns `Ok`.
    fn commit(&mut self) -> io::Result<()>;
}

/// A flash sector emulated by an image file on the host.
#[derive(Debug)]
pub struct FlashStore {
    path: PathBuf,
    sector_size: usize,
    image: Vec<u8>,
    len: usize,
}

impl FlashStore {
    pub fn new(path: impl Into<PathBuf>, sector_size: usize) -> Self {
        Self {
            path: path.into(),
            sector_size,
            image: Vec::new(),
            len: 0,
        }
    }

    pub fn from_config(cfg: &zapme_core::config::KeyStoreConfig) -> Self {
        Self::new(cfg.path.clone(), cfg.sector_size)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_image(&self) -> io::Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(mut image) => {
                if image.len() != self.sector_size {
                    tracing::warn!(
                        path = %self.path.display(),
                        size = image.len(),
                        expected = self.sector_size,
                        "flash image has unexpected size, resizing"
                    );
                    image.resize(self.sector_size, ERASED);
                }
                Ok(image)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no flash image, starting erased");
                Ok(vec![ERASED; self.sector_size])
            }
            Err(e) => Err(e),
        }
    }
}

impl KeyStore for FlashStore {
    fn begin(&mut self, size: usize) -> io::Result<()> {
        if size > self.sector_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "requested {size} bytes from a {}-byte flash sector",
                    self.sector_size
                ),
            ));
        }
        self.image = self.load_image()?;
        self.len = size;
        Ok(())
    }

    fn data(&self) -> &[u8] {
        &self.image[..self.len]
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.image[..self.len]
    }

    fn commit(&mut self) -> io::Result<()> {
        if self.image.is_empty() {
            return Err(io::Error::other("commit before begin"));
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &self.image)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), "flash image committed");
        Ok(())
    }
}

/// An in-memory store for tests; clones of the backing bytes survive across
/// "restarts" by constructing a new store from [`MemoryKeyStore::persisted`].
#[derive(Debug, Clone)]
pub struct MemoryKeyStore {
    persisted: Vec<u8>,
    working: Vec<u8>,
    len: usize,
    commits: usize,
    fail_commit: bool,
    fail_begin: bool,
}

impl MemoryKeyStore {
    /// A fresh, fully erased store.
    pub fn erased(capacity: usize) -> Self {
        Self::from_bytes(vec![ERASED; capacity])
    }

    /// A store whose medium already holds `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            persisted: bytes,
            working: Vec::new(),
            len: 0,
            commits: 0,
            fail_commit: false,
            fail_begin: false,
        }
    }

    /// Bytes as they would be found after a power cycle.
    pub fn persisted(&self) -> &[u8] {
        &self.persisted
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn fail_commits(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.fail_begin = true;
        self
    }
}

impl KeyStore for MemoryKeyStore {
    fn begin(&mut self, size: usize) -> io::Result<()> {
        if self.fail_begin {
            return Err(io::Error::other("key store unavailable"));
        }
        if size > self.persisted.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("requested {size} bytes from a {}-byte store", self.persisted.len()),
            ));
        }
        self.working = self.persisted.clone();
        self.len = size;
        Ok(())
    }

    fn data(&self) -> &[u8] {
        &self.working[..self.len]
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.working[..self.len]
    }

    fn commit(&mut self) -> io::Result<()> {
        if self.fail_commit {
            return Err(io::Error::other("flash commit failed"));
        }
        self.persisted = self.working.clone();
        self.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_store_starts_erased() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlashStore::new(dir.path().join("flash.bin"), 4096);
        store.begin(56).unwrap();
        assert_eq!(store.data().len(), 56);
        assert!(store.data().iter().all(|&b| b == ERASED));
    }

    #[test]
    fn test_flash_store_uncommitted_changes_are_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");

        let mut store = FlashStore::new(&path, 4096);
        store.begin(8).unwrap();
        store.data_mut().copy_from_slice(b"ABCDEFGH");
        drop(store);

        let mut reopened = FlashStore::new(&path, 4096);
        reopened.begin(8).unwrap();
        assert_eq!(reopened.data(), &[ERASED; 8]);
    }

    #[test]
    fn test_flash_store_commit_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/flash.bin");

        let mut store = FlashStore::new(&path, 4096);
        store.begin(8).unwrap();
        store.data_mut().copy_from_slice(b"ABCDEFGH");
        store.commit().unwrap();

        let mut reopened = FlashStore::new(&path, 4096);
        reopened.begin(8).unwrap();
        assert_eq!(reopened.data(), b"ABCDEFGH");
        assert_eq!(fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn test_flash_store_rejects_oversized_begin() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlashStore::new(dir.path().join("flash.bin"), 32);
        assert!(store.begin(56).is_err());
    }

    #[test]
    fn test_memory_store_commit_and_failures() {
        let mut store = MemoryKeyStore::erased(64);
        store.begin(4).unwrap();
        store.data_mut().copy_from_slice(b"AESK");
        assert_eq!(&store.persisted()[..4], &[ERASED; 4]);
        store.commit().unwrap();
        assert_eq!(&store.persisted()[..4], b"AESK");
        assert_eq!(store.commits(), 1);

        let mut failing = MemoryKeyStore::erased(64).fail_commits();
        failing.begin(4).unwrap();
        assert!(failing.commit().is_err());

        let mut gone = MemoryKeyStore::erased(64).unavailable();
        assert!(gone.begin(4).is_err());
    }
}
