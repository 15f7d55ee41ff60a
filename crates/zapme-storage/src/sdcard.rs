//! SD card backend rooted at a host directory
//!
//! Device paths are absolute (`/config/ap-creds.bin`) and resolve below the
//! mount root. Opening for write creates missing parent directories, the same
//! way the card driver does on the device.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::Context;

use crate::file::{OpenMode, Storage, StorageFile};

/// A mounted SD card.
#[derive(Debug, Clone)]
pub struct SdCard {
    root: PathBuf,
}

impl SdCard {
    /// Mount an existing directory as the card root.
    pub fn mount(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating SD card root: {}", root.display()))?;
        let meta = fs::metadata(&root)
            .with_context(|| format!("reading SD card root: {}", root.display()))?;
        if !meta.is_dir() {
            anyhow::bail!("SD card root is not a directory: {}", root.display());
        }
        tracing::debug!(root = %root.display(), "SD card mounted");
        Ok(Self { root })
    }

    /// Mount the card described by the device configuration.
    pub fn from_config(cfg: &zapme_core::config::StorageConfig) -> anyhow::Result<Self> {
        Self::mount(cfg.root.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a device path onto the host filesystem.
    ///
    /// Only plain name components are accepted; `..`, drive prefixes and the
    /// like are rejected so nothing escapes the card root.
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(name) => resolved.push(name),
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("invalid device path: {path}"),
                    ))
                }
            }
        }
        if resolved == self.root {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("device path names the card root: {path:?}"),
            ));
        }
        Ok(resolved)
    }
}

impl Storage for SdCard {
    type File = SdFile;

    fn open(&self, path: &str, mode: OpenMode) -> io::Result<SdFile> {
        let host_path = self.resolve(path)?;
        let file = match mode {
            OpenMode::Read => File::open(&host_path)?,
            OpenMode::Write => {
                if let Some(parent) = host_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&host_path)?
            }
        };
        Ok(SdFile { file, position: 0 })
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn mkdir(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path)?)
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path)?)
    }
}

/// An open file on the SD card.
#[derive(Debug)]
pub struct SdFile {
    file: File,
    position: u64,
}

impl StorageFile for SdFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.file.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn close(self) -> io::Result<()> {
        self.file.sync_all()
    }
}
