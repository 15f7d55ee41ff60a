//! Buffered encrypting writer
//!
//! Plaintext accumulates in a fixed buffer. Whenever the buffer fills it is
//! encrypted in place and written out; on close the tail is padded to a whole
//! block, encrypted, written, and the file is truncated to what this writer
//! produced so stale bytes from an older, longer file cannot linger.

use std::io;
use std::sync::Arc;

use tracing::{debug, error, warn};
use zapme_storage::file::write_full;
use zapme_storage::{OpenMode, Storage, StorageFile};
use zeroize::Zeroize;

use crate::context::CipherContext;
use crate::error::StreamError;
use crate::random::RandomSource;
use crate::{StreamState, BLOCK_SIZE, BUFFER_SIZE, FILE_ID_SIZE, HEADER_SIZE, IV_SIZE};

pub struct EncryptedWriter<F: StorageFile> {
    ctx: Arc<CipherContext>,
    path: String,
    file: Option<F>,
    buffer: [u8; BUFFER_SIZE],
    fill: usize,
    iv: [u8; IV_SIZE],
    file_written: u64,
    state: StreamState,
}

impl<F: StorageFile> EncryptedWriter<F> {
    /// Create or overwrite `path` and write the stream header.
    ///
    /// The existing file is not truncated here; that happens on close. A
    /// writer that could not open the file or write the full header is
    /// returned invalid.
    pub fn open<S, R>(ctx: Arc<CipherContext>, storage: &S, path: &str, rng: &mut R) -> Self
    where
        S: Storage<File = F>,
        R: RandomSource + ?Sized,
    {
        let mut writer = Self {
            ctx,
            path: path.to_string(),
            file: None,
            buffer: [0u8; BUFFER_SIZE],
            fill: 0,
            iv: [0u8; IV_SIZE],
            file_written: 0,
            state: StreamState::Invalid,
        };

        let mut file = match storage.open(path, OpenMode::Write) {
            Ok(file) => file,
            Err(e) => {
                warn!(path, error = %e, "cannot open encrypted file for writing");
                return writer;
            }
        };

        rng.fill(&mut writer.iv);

        let mut header = [0u8; HEADER_SIZE];
        header[..FILE_ID_SIZE].copy_from_slice(writer.ctx.file_id().as_bytes());
        header[FILE_ID_SIZE..].copy_from_slice(&writer.iv);
        match write_full(&mut file, &header) {
            Ok(n) if n == HEADER_SIZE => {}
            Ok(n) => {
                warn!(path, written = n, "short write of stream header");
                let _ = file.close();
                return writer;
            }
            Err(e) => {
                warn!(path, error = %e, "failed to write stream header");
                let _ = file.close();
                return writer;
            }
        }

        writer.file_written = HEADER_SIZE as u64;
        writer.file = Some(file);
        writer.state = StreamState::Open;
        writer
    }

    /// True until the writer is closed or invalidated.
    pub fn is_valid(&self) -> bool {
        self.state == StreamState::Open
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Bytes this writer has put on storage so far, header included.
    pub fn bytes_written(&self) -> u64 {
        self.file_written
    }

    /// Buffer one plaintext byte. Returns 1, or 0 if the writer is not open.
    pub fn write_byte(&mut self, byte: u8) -> usize {
        if self.state != StreamState::Open {
            return 0;
        }
        self.buffer[self.fill] = byte;
        self.fill += 1;
        if self.fill == BUFFER_SIZE {
            self.flush_full_buffer();
        }
        1
    }

    /// Buffer all of `data`, flushing whenever the buffer fills.
    ///
    /// Returns `data.len()`, or 0 if the writer is not open. Storage short
    /// writes during an intermediate flush are logged, not reported here.
    pub fn write_bytes(&mut self, data: &[u8]) -> usize {
        if self.state != StreamState::Open {
            return 0;
        }

        let mut written = 0;
        while written < data.len() {
            let take = (data.len() - written).min(BUFFER_SIZE - self.fill);
            self.buffer[self.fill..self.fill + take]
                .copy_from_slice(&data[written..written + take]);
            self.fill += take;
            written += take;
            if self.fill == BUFFER_SIZE {
                self.flush_full_buffer();
                if self.state != StreamState::Open {
                    break;
                }
            }
        }
        written
    }

    /// Push buffered data to storage.
    ///
    /// Without `closing`, only a full buffer is encrypted and written; any
    /// partial buffer stays in memory so the block chain is never cut short.
    /// `io::Write::flush` therefore leaves the tail buffered until close. With
    /// `closing`, the stream is padded, finalized, truncated, and closed.
    pub fn flush_buffer(&mut self, closing: bool) -> Result<(), StreamError> {
        match self.state {
            StreamState::Open => {}
            StreamState::Closed => return Err(StreamError::Closed),
            StreamState::Invalid => return Err(StreamError::Invalid),
        }
        if closing {
            return self.finalize();
        }

        if self.fill == BUFFER_SIZE {
            self.flush_full_buffer();
        }
        match self.state {
            StreamState::Open => Ok(()),
            _ => Err(StreamError::Invalid),
        }
    }

    /// Finalize the stream. Equivalent to `flush_buffer(true)`.
    pub fn close(&mut self) -> Result<(), StreamError> {
        self.flush_buffer(true)
    }

    fn flush_full_buffer(&mut self) {
        debug_assert_eq!(self.fill, BUFFER_SIZE);
        self.ctx.encrypt(&mut self.buffer, &mut self.iv);
        match self.write_out(BUFFER_SIZE) {
            Ok(n) if n < BUFFER_SIZE => {
                warn!(path = %self.path, expected = BUFFER_SIZE, written = n, "short write to storage");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(path = %self.path, error = %e, "write to storage failed");
                self.invalidate();
            }
        }
        self.fill = 0;
    }

    fn invalidate(&mut self) {
        self.state = StreamState::Invalid;
        self.buffer.zeroize();
        self.fill = 0;
        if let Some(file) = self.file.take() {
            let _ = file.close();
        }
    }

    /// Write `buffer[..len]` and account for what actually landed.
    fn write_out(&mut self, len: usize) -> io::Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let written = write_full(file, &self.buffer[..len])?;
        self.file_written = self.file_written.saturating_add(written as u64);
        Ok(written)
    }

    fn finalize(&mut self) -> Result<(), StreamError> {
        self.state = StreamState::Closed;

        let pad = BLOCK_SIZE - self.fill % BLOCK_SIZE;
        let end = self.fill + pad;
        debug_assert!(end <= BUFFER_SIZE);
        self.buffer[self.fill..end].fill(pad as u8);
        self.ctx.encrypt(&mut self.buffer[..end], &mut self.iv);

        let result = self.finish_file(end);
        self.buffer.zeroize();
        self.fill = 0;
        result
    }

    fn finish_file(&mut self, len: usize) -> Result<(), StreamError> {
        let written = self.write_out(len)?;
        let Some(mut file) = self.file.take() else {
            return Err(StreamError::Closed);
        };
        if written < len {
            error!(path = %self.path, expected = len, written, "short write of final block");
            let _ = file.close();
            return Err(StreamError::ShortWrite {
                expected: len,
                written,
            });
        }

        file.sync()?;
        let size = file.size();
        if size > self.file_written {
            debug!(path = %self.path, size, written = self.file_written, "truncating stale tail");
            file.truncate(self.file_written)?;
        }
        file.close()?;
        Ok(())
    }
}

impl<F: StorageFile> Drop for EncryptedWriter<F> {
    fn drop(&mut self) {
        if self.state == StreamState::Open {
            if let Err(e) = self.finalize() {
                error!(path = %self.path, error = %e, "failed to finalize encrypted file on drop");
            }
        }
        self.buffer.zeroize();
    }
}

impl<F: StorageFile> io::Write for EncryptedWriter<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state != StreamState::Open {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("encrypted stream is not open: {}", self.path),
            ));
        }
        Ok(self.write_bytes(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        EncryptedWriter::flush_buffer(self, false).map_err(io::Error::other)
    }
}
