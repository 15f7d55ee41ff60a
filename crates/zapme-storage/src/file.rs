//! Storage traits shared by every backend

use std::io;

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only, the file must exist.
    Read,
    /// Read-write, created (with parent directories) if missing.
    ///
    /// Existing contents are kept and the position starts at 0, so a writer
    /// that produces fewer bytes than were there must truncate on close.
    Write,
}

/// An open file handle.
///
/// Reads and writes are blocking but bounded and may transfer fewer bytes
/// than requested; callers decide whether a short transfer is fatal.
pub trait StorageFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Current file length in bytes.
    fn size(&self) -> u64;

    /// Current read/write offset.
    fn position(&self) -> u64;

    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Push buffered writes down to the medium.
    fn sync(&mut self) -> io::Result<()>;

    /// Close the handle. Dropping a handle also closes it, without reporting errors.
    fn close(self) -> io::Result<()>;
}

/// A mounted storage medium addressed by absolute device paths (`/config/x.bin`).
pub trait Storage {
    type File: StorageFile;

    fn open(&self, path: &str, mode: OpenMode) -> io::Result<Self::File>;

    fn exists(&self, path: &str) -> bool;

    /// Create a directory and any missing parents.
    fn mkdir(&self, path: &str) -> io::Result<()>;

    fn remove(&self, path: &str) -> io::Result<()>;
}

/// Read until `buf` is full or the file reports end of data.
///
/// Returns the number of bytes read; anything less than `buf.len()` means
/// the storage ran dry.
pub fn read_full<F: StorageFile + ?Sized>(file: &mut F, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Write `buf`, retrying partial writes until the storage stops accepting bytes.
///
/// Returns the number of bytes written.
pub fn write_full<F: StorageFile + ?Sized>(file: &mut F, buf: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        match file.write(&buf[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}
