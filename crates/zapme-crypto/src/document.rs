//! Serde documents stored inside encrypted files
//!
//! Small configuration blobs (access point credentials and the like) are
//! kept as MessagePack maps with named fields inside an encrypted stream, the
//! encoding the device firmware reads and writes.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use zapme_storage::{KeyStore, Storage};

use crate::error::{DocumentError, StreamError};
use crate::provider::CryptoProvider;
use crate::random::RandomSource;

/// Decrypt and parse the document at `path`.
pub fn read_document<T, K, R, S>(
    provider: &mut CryptoProvider<K, R>,
    storage: &S,
    path: &str,
) -> Result<T, DocumentError>
where
    T: DeserializeOwned,
    K: KeyStore,
    R: RandomSource,
    S: Storage,
{
    let mut reader = provider.open_reader(storage, path)?;
    if !reader.is_valid() {
        return Err(DocumentError::Open(path.to_string()));
    }
    let document = rmp_serde::from_read(&mut reader)?;
    reader.close().map_err(StreamError::from)?;
    Ok(document)
}

/// Serialize `document` and store it encrypted at `path`, replacing any
/// previous contents.
pub fn write_document<T, K, R, S>(
    provider: &mut CryptoProvider<K, R>,
    storage: &S,
    path: &str,
    document: &T,
) -> Result<(), DocumentError>
where
    T: Serialize + ?Sized,
    K: KeyStore,
    R: RandomSource,
    S: Storage,
{
    let encoded = zeroize::Zeroizing::new(rmp_serde::to_vec_named(document)?);
    let mut writer = provider.open_writer(storage, path)?;
    if !writer.is_valid() {
        return Err(DocumentError::Open(path.to_string()));
    }
    writer.write_bytes(&encoded);
    writer.close()?;
    debug!(path, len = encoded.len(), "encrypted document written");
    Ok(())
}

/// Credentials of the device's own configuration access point.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApCredentials {
    pub ssid: String,
    pub psk: String,
}

impl ApCredentials {
    pub fn new(ssid: impl Into<String>, psk: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            psk: psk.into(),
        }
    }

    /// Load the stored credentials without touching the card.
    pub fn load<K, R, S>(
        provider: &mut CryptoProvider<K, R>,
        storage: &S,
        path: &str,
    ) -> Result<Self, DocumentError>
    where
        K: KeyStore,
        R: RandomSource,
        S: Storage,
    {
        read_document(provider, storage, path)
    }

    /// Load the stored credentials, writing `defaults` if none can be read.
    ///
    /// Only key provisioning failures are errors. A missing or unreadable
    /// credentials file falls back to `defaults`, which are persisted for the
    /// next boot; a failure to persist them is logged and the defaults are
    /// still returned.
    pub fn load_or_create<K, R, S>(
        provider: &mut CryptoProvider<K, R>,
        storage: &S,
        path: &str,
        defaults: ApCredentials,
    ) -> Result<Self, crate::error::CryptoError>
    where
        K: KeyStore,
        R: RandomSource,
        S: Storage,
    {
        match Self::load(provider, storage, path) {
            Ok(creds) => return Ok(creds),
            Err(DocumentError::Crypto(e)) => return Err(e),
            Err(e) => warn!(path, error = %e, "cannot load AP credentials, using defaults"),
        }

        match write_document(provider, storage, path, &defaults) {
            Ok(()) => info!(path, ssid = %defaults.ssid, "default AP credentials stored"),
            Err(DocumentError::Crypto(e)) => return Err(e),
            Err(e) => error!(path, error = %e, "failed to store default AP credentials"),
        }
        Ok(defaults)
    }
}

impl fmt::Debug for ApCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApCredentials")
            .field("ssid", &self.ssid)
            .field("psk", &"[REDACTED]")
            .finish()
    }
}
