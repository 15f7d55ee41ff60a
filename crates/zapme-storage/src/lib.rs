//! zapme-storage: raw file storage and the persistent key-record store
//!
//! Two collaborators live here:
//! - [`Storage`] / [`StorageFile`]: the removable SD card, exposed as a
//!   blocking byte-file API (open, read, write, truncate, size, position).
//! - [`KeyStore`]: the small on-board flash region holding the device key
//!   record, accessed as a flat byte view and committed on demand.

pub mod file;
pub mod keystore;
pub mod memory;
pub mod sdcard;

pub use file::{OpenMode, Storage, StorageFile};
pub use keystore::{FlashStore, KeyStore, MemoryKeyStore};
pub use memory::{MemoryFile, MemoryStorage};
pub use sdcard::{SdCard, SdFile};
