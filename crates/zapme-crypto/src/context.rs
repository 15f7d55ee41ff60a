//! Runtime cipher context derived from the key record

use std::fmt;

use aes::cipher::{Key, KeyInit};
use aes::{Aes256Dec, Aes256Enc};

use crate::cbc;
use crate::key_record::{FileIdentity, KeyRecord, MasterKey};
use crate::IV_SIZE;

/// Expanded AES-256 round keys plus the device file identity.
///
/// Built once per process and shared read-only by every open stream. The
/// round keys are zeroized on drop.
pub struct CipherContext {
    enc: Aes256Enc,
    dec: Aes256Dec,
    file_id: FileIdentity,
}

impl CipherContext {
    pub fn new(file_id: FileIdentity, master_key: &MasterKey) -> Self {
        let key: &Key<Aes256Enc> = master_key.as_bytes().into();
        Self {
            enc: Aes256Enc::new(key),
            dec: Aes256Dec::new(key),
            file_id,
        }
    }

    pub fn from_record(record: &KeyRecord) -> Self {
        Self::new(*record.file_id(), record.master_key())
    }

    pub fn file_id(&self) -> &FileIdentity {
        &self.file_id
    }

    /// Whether a file header identity was written under this device's key.
    pub fn verify_file_id(&self, file_id: &[u8]) -> bool {
        file_id == self.file_id.as_bytes()
    }

    /// CBC-encrypt whole blocks in place, chaining through `iv`.
    pub fn encrypt(&self, data: &mut [u8], iv: &mut [u8; IV_SIZE]) {
        cbc::encrypt_in_place(&self.enc, iv, data);
    }

    /// CBC-decrypt whole blocks in place, chaining through `iv`.
    pub fn decrypt(&self, data: &mut [u8], iv: &mut [u8; IV_SIZE]) {
        cbc::decrypt_in_place(&self.dec, iv, data);
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("file_id", &self.file_id)
            .field("schedules", &"[REDACTED]")
            .finish()
    }
}
