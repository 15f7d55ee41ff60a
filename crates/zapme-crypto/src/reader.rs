//! Buffered decrypting reader
//!
//! Ciphertext is pulled from storage in whole blocks, decrypted in place into
//! a fixed buffer, and handed out byte by byte or in bulk. The buffer is not a
//! ring: unread bytes are shifted to the front before each refill.
//!
//! ```text
//! buffer: [ consumed | unread plaintext | free ]
//!         0      read_pos          write_pos    BUFFER_SIZE
//! ```

use std::io;
use std::sync::Arc;

use tracing::{debug, trace, warn};
use zapme_storage::file::read_full;
use zapme_storage::{OpenMode, Storage, StorageFile};
use zeroize::Zeroize;

use crate::context::CipherContext;
use crate::{StreamState, BLOCK_SIZE, BUFFER_SIZE, FILE_ID_SIZE, HEADER_SIZE, IV_SIZE};

pub struct EncryptedReader<F> {
    ctx: Arc<CipherContext>,
    path: String,
    file: Option<F>,
    buffer: [u8; BUFFER_SIZE],
    iv: [u8; IV_SIZE],
    read_pos: usize,
    write_pos: usize,
    state: StreamState,
}

impl<F: StorageFile> EncryptedReader<F> {
    /// Open `path` and validate its header.
    ///
    /// The returned reader is invalid if the file is missing, shorter than the
    /// header, not block aligned, or carries another device's file identity.
    pub fn open<S>(ctx: Arc<CipherContext>, storage: &S, path: &str) -> Self
    where
        S: Storage<File = F>,
    {
        let mut reader = Self {
            ctx,
            path: path.to_string(),
            file: None,
            buffer: [0u8; BUFFER_SIZE],
            iv: [0u8; IV_SIZE],
            read_pos: 0,
            write_pos: 0,
            state: StreamState::Invalid,
        };

        let mut file = match storage.open(path, OpenMode::Read) {
            Ok(file) => file,
            Err(e) => {
                warn!(path, error = %e, "cannot open encrypted file for reading");
                return reader;
            }
        };

        let size = file.size();
        let aligned = size % BLOCK_SIZE as u64 == 0;
        if size < HEADER_SIZE as u64 || !aligned {
            warn!(path, size, aligned, "cannot read encrypted file");
            let _ = file.close();
            return reader;
        }

        let mut file_id = [0u8; FILE_ID_SIZE];
        if !matches!(read_full(&mut file, &mut file_id), Ok(n) if n == FILE_ID_SIZE) {
            warn!(path, "failed to read file identity");
            let _ = file.close();
            return reader;
        }
        if !reader.ctx.verify_file_id(&file_id) {
            warn!(
                path,
                "file has a different file identity, encryption keys differ and decryption would \
                 produce garbage, aborting"
            );
            let _ = file.close();
            return reader;
        }

        if !matches!(read_full(&mut file, &mut reader.iv), Ok(n) if n == IV_SIZE) {
            warn!(path, "failed to read IV");
            let _ = file.close();
            return reader;
        }

        reader.file = Some(file);
        reader.state = StreamState::Open;
        reader.refill();
        reader
    }

    /// True while plaintext may still be read: until the reader is closed,
    /// invalidated, or a read finds the stream drained.
    pub fn is_valid(&self) -> bool {
        self.state == StreamState::Open
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Next plaintext byte, or `None` at end of stream or on an invalid stream.
    pub fn read_byte(&mut self) -> Option<u8> {
        if self.state != StreamState::Open {
            return None;
        }
        if self.buffered() == 0 {
            self.refill();
        }
        if self.buffered() == 0 {
            self.finish_if_drained();
            return None;
        }
        let byte = self.buffer[self.read_pos];
        self.read_pos += 1;
        self.finish_if_drained();
        Some(byte)
    }

    /// Copy up to `dest.len()` plaintext bytes; fewer only at end of stream
    /// or when corruption invalidates the stream.
    pub fn read_bytes(&mut self, dest: &mut [u8]) -> usize {
        if self.state != StreamState::Open {
            return 0;
        }

        let mut n_read = 0;
        while n_read < dest.len() {
            let available = (dest.len() - n_read).min(self.buffered());
            if available == 0 {
                if self.refill() == 0 {
                    break;
                }
                continue;
            }
            dest[n_read..n_read + available]
                .copy_from_slice(&self.buffer[self.read_pos..self.read_pos + available]);
            self.read_pos += available;
            n_read += available;
        }
        self.finish_if_drained();
        n_read
    }

    /// Close the reader. Buffered plaintext is discarded.
    pub fn close(&mut self) -> io::Result<()> {
        if self.state == StreamState::Open {
            self.state = StreamState::Closed;
        }
        self.discard_buffer();
        match self.file.take() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }

    /// Mark the stream closed once the file is released and every plaintext
    /// byte has been handed out.
    fn finish_if_drained(&mut self) {
        if self.state == StreamState::Open && self.file.is_none() && self.buffered() == 0 {
            debug!(path = %self.path, "encrypted stream drained");
            self.state = StreamState::Closed;
        }
    }

    fn buffered(&self) -> usize {
        debug_assert!(self.read_pos <= self.write_pos && self.write_pos <= BUFFER_SIZE);
        self.write_pos.saturating_sub(self.read_pos)
    }

    fn free(&self) -> usize {
        BUFFER_SIZE.saturating_sub(self.buffered())
    }

    /// Shift unread bytes to the front of the buffer.
    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        let used = self.buffered();
        trace!(used, shift = self.read_pos, "compacting read buffer");
        self.buffer.copy_within(self.read_pos..self.write_pos, 0);
        self.read_pos = 0;
        self.write_pos = used;
    }

    /// Pull as many whole blocks as fit from storage and decrypt them.
    ///
    /// Returns the number of ciphertext bytes consumed; 0 means no progress
    /// (buffer full, end of file, or the stream was just invalidated).
    fn refill(&mut self) -> usize {
        if self.state != StreamState::Open {
            return 0;
        }
        let remaining = match self.file.as_ref() {
            Some(file) => file.size().saturating_sub(file.position()),
            None => return 0,
        };

        let free = self.free();
        let fits = usize::try_from(remaining).map_or(free, |r| r.min(free));
        let to_read = fits - fits % BLOCK_SIZE;
        if to_read == 0 {
            if remaining == 0 {
                // Header-only file: nothing was ever encrypted into it.
                debug!(path = %self.path, "encrypted file has no ciphertext");
                self.release_file();
            } else {
                trace!(free, remaining, "no room to read a whole block");
            }
            return 0;
        }

        self.compact();

        let start = self.write_pos;
        let end = start + to_read;
        let Some(file) = self.file.as_mut() else {
            return 0;
        };
        match read_full(file, &mut self.buffer[start..end]) {
            Ok(n) if n == to_read => {}
            Ok(n) => {
                warn!(path = %self.path, expected = to_read, read = n, "short read from storage");
                self.invalidate();
                return 0;
            }
            Err(e) => {
                warn!(path = %self.path, error = %e, "read from storage failed");
                self.invalidate();
                return 0;
            }
        }

        self.ctx.decrypt(&mut self.buffer[start..end], &mut self.iv);
        self.write_pos = end;

        if remaining == to_read as u64 {
            if !self.strip_padding() {
                self.invalidate();
                return 0;
            }
            self.release_file();
        }

        to_read
    }

    /// Check and drop the trailing `P` bytes of value `P`.
    fn strip_padding(&mut self) -> bool {
        let padding = self.buffer[self.write_pos - 1];
        let len = usize::from(padding);
        if len == 0 || len > BLOCK_SIZE {
            warn!(path = %self.path, padding, "padding is invalid");
            return false;
        }
        let tail = &self.buffer[self.write_pos - len..self.write_pos];
        if tail.iter().any(|&b| b != padding) {
            warn!(path = %self.path, padding, "padding is invalid");
            return false;
        }
        self.write_pos -= len;
        true
    }

    fn release_file(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.close() {
                debug!(path = %self.path, error = %e, "closing drained file failed");
            }
        }
    }

    fn invalidate(&mut self) {
        self.state = StreamState::Invalid;
        self.discard_buffer();
        if let Some(file) = self.file.take() {
            let _ = file.close();
        }
    }

    fn discard_buffer(&mut self) {
        self.buffer.zeroize();
        self.read_pos = 0;
        self.write_pos = 0;
    }
}

impl<F> Drop for EncryptedReader<F> {
    fn drop(&mut self) {
        self.buffer.zeroize();
    }
}

impl<F: StorageFile> io::Read for EncryptedReader<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.state == StreamState::Invalid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("encrypted stream is invalid: {}", self.path),
            ));
        }
        let n = self.read_bytes(buf);
        if n == 0 && !buf.is_empty() && self.state == StreamState::Invalid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("encrypted stream is corrupt: {}", self.path),
            ));
        }
        Ok(n)
    }
}
