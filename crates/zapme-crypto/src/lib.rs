//! zapme-crypto: device-bound encrypted file streams for the SD card
//!
//! Secrets stored on the removable card are encrypted with AES-256-CBC under a
//! master key that never leaves the device's on-board flash.
//!
//! Key provisioning:
//! ```text
//! KeyRecord (flash, 56 bytes: "AESK" | file identity | master key | CRC-32)
//!   └── CipherContext (runtime only: AES-256 enc/dec schedules + file identity)
//!         ├── EncryptedReader (per open file)
//!         └── EncryptedWriter (per open file)
//! ```
//!
//! Encrypted file format:
//! ```text
//! [16 bytes: file identity][16 bytes: random IV][N * 16 bytes: CBC ciphertext]
//! ```
//! The final plaintext block ends with `P` bytes of value `P` (1..=16).

pub mod cbc;
pub mod context;
pub mod document;
pub mod error;
pub mod key_record;
pub mod provider;
pub mod random;
pub mod reader;
pub mod writer;

pub use context::CipherContext;
pub use document::{read_document, write_document, ApCredentials};
pub use error::{CryptoError, DocumentError, RecordError, StreamError};
pub use key_record::{FileIdentity, KeyRecord, MasterKey};
pub use provider::CryptoProvider;
pub use random::RandomSource;
pub use reader::EncryptedReader;
pub use writer::EncryptedWriter;

/// Size of the AES-256 master key in bytes
pub const KEY_SIZE: usize = 32;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Size of the CBC initialization vector
pub const IV_SIZE: usize = 16;

/// Size of the per-device file identity tag
pub const FILE_ID_SIZE: usize = 16;

/// Unencrypted stream header: file identity followed by the IV
pub const HEADER_SIZE: usize = FILE_ID_SIZE + IV_SIZE;

/// Stream buffer capacity in cipher blocks
pub const BUFFER_BLOCKS: usize = 32;

/// Stream buffer capacity in bytes
pub const BUFFER_SIZE: usize = BLOCK_SIZE * BUFFER_BLOCKS;

/// Lifecycle of an encrypted stream.
///
/// `Invalid` and `Closed` are terminal; every operation on a stream in either
/// state is a no-op returning zero or no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Closed,
    Invalid,
}
