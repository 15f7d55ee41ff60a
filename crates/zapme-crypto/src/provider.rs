//! Key provisioning and stream factory
//!
//! A [`CryptoProvider`] is constructed once at startup with the key store and
//! random source, and handed by reference to whatever needs encrypted files.
//! The first stream open derives the [`CipherContext`]; later opens reuse it.

use std::sync::Arc;

use tracing::{info, warn};
use zapme_storage::{KeyStore, Storage};
use zeroize::Zeroizing;

use crate::context::CipherContext;
use crate::error::CryptoError;
use crate::key_record::{KeyRecord, RECORD_SIZE};
use crate::random::RandomSource;
use crate::reader::EncryptedReader;
use crate::writer::EncryptedWriter;

pub struct CryptoProvider<K, R> {
    store: K,
    rng: R,
    context: Option<Arc<CipherContext>>,
}

impl<K: KeyStore, R: RandomSource> CryptoProvider<K, R> {
    pub fn new(store: K, rng: R) -> Self {
        Self {
            store,
            rng,
            context: None,
        }
    }

    /// Derive the cipher context, provisioning the key record first if the
    /// stored one is missing or corrupt.
    ///
    /// Idempotent: once a context exists it is returned unchanged. A
    /// regenerated record is committed before the context is built, so the
    /// device never encrypts under a key that would not survive a power loss.
    pub fn ensure_initialized(&mut self) -> Result<Arc<CipherContext>, CryptoError> {
        if let Some(ctx) = &self.context {
            return Ok(Arc::clone(ctx));
        }

        self.store
            .begin(RECORD_SIZE)
            .map_err(CryptoError::KeyStoreUnavailable)?;

        let mut raw = Zeroizing::new([0u8; RECORD_SIZE]);
        let stored = self.store.data().get(..RECORD_SIZE).ok_or_else(|| {
            CryptoError::KeyStoreUnavailable(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "key store region shorter than a key record",
            ))
        })?;
        raw.copy_from_slice(stored);

        let mut record = KeyRecord::from_bytes(&raw);
        if let Err(reason) = record.validate() {
            warn!(%reason, "invalid key record, generating a new one");
            record = KeyRecord::generate(&mut self.rng);
            self.store.data_mut()[..RECORD_SIZE].copy_from_slice(&record.to_bytes()[..]);
            self.store.commit().map_err(CryptoError::Commit)?;
            info!(file_id = %record.file_id(), "key record provisioned");
        }

        let ctx = Arc::new(CipherContext::from_record(&record));
        self.context = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    /// The cipher context, if a stream has been opened (or
    /// [`ensure_initialized`](Self::ensure_initialized) called) already.
    pub fn context(&self) -> Option<&Arc<CipherContext>> {
        self.context.as_ref()
    }

    /// Open an encrypted file for reading.
    ///
    /// Only provisioning failures are errors; a missing, misaligned, or
    /// foreign file yields a reader whose [`is_valid`](EncryptedReader::is_valid)
    /// is false.
    pub fn open_reader<S: Storage>(
        &mut self,
        storage: &S,
        path: &str,
    ) -> Result<EncryptedReader<S::File>, CryptoError> {
        let ctx = self.ensure_initialized()?;
        Ok(EncryptedReader::open(ctx, storage, path))
    }

    /// Create (or overwrite) an encrypted file.
    pub fn open_writer<S: Storage>(
        &mut self,
        storage: &S,
        path: &str,
    ) -> Result<EncryptedWriter<S::File>, CryptoError> {
        let ctx = self.ensure_initialized()?;
        Ok(EncryptedWriter::open(ctx, storage, path, &mut self.rng))
    }

    pub fn store(&self) -> &K {
        &self.store
    }

    /// Tear down the provider, returning the key store (e.g. to simulate a
    /// restart over the same flash contents).
    pub fn into_store(self) -> K {
        self.store
    }
}
