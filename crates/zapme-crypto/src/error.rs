use thiserror::Error;

/// Failure to provision the device key material.
///
/// Fatal to encrypted storage, but not to the rest of the firmware.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key store unavailable: {0}")]
    KeyStoreUnavailable(#[source] std::io::Error),

    #[error("failed to persist regenerated key record: {0}")]
    Commit(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream is invalid")]
    Invalid,

    #[error("stream is already closed")]
    Closed,

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("cannot open encrypted file: {0}")]
    Open(String),

    #[error("document encoding: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("document decoding: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Why a persisted key record cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("invalid header: {0:02X?}")]
    BadHeader([u8; 4]),

    #[error("invalid checksum: {stored:08X} != {computed:08X}")]
    ChecksumMismatch { stored: u32, computed: u32 },
}
