//! Device key record persisted in on-board flash
//!
//! Layout (56 bytes):
//! ```text
//! 0  .. 4  : magic "AESK"
//! 4  .. 20 : file identity (16 random bytes)
//! 20 .. 52 : AES-256 master key (32 random bytes)
//! 52 .. 56 : CRC-32 over bytes 0..52, little-endian
//! ```

use std::fmt;

use zeroize::{Zeroize, Zeroizing};

use crate::error::RecordError;
use crate::random::RandomSource;
use crate::{FILE_ID_SIZE, KEY_SIZE};

/// Magic header of a trusted key record.
pub const MAGIC: [u8; 4] = *b"AESK";

/// Serialized size of a [`KeyRecord`].
pub const RECORD_SIZE: usize = MAGIC.len() + FILE_ID_SIZE + KEY_SIZE + 4;

const ID_OFFSET: usize = MAGIC.len();
const KEY_OFFSET: usize = ID_OFFSET + FILE_ID_SIZE;
const CHECKSUM_OFFSET: usize = KEY_OFFSET + KEY_SIZE;

/// The AES-256 master key. Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Per-device tag written at the start of every encrypted file.
///
/// Not secret; it only tells a reader whether a file was written under the
/// current master key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity([u8; FILE_ID_SIZE]);

impl FileIdentity {
    pub fn from_bytes(bytes: [u8; FILE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FILE_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The persisted key record.
#[derive(Clone)]
pub struct KeyRecord {
    header: [u8; 4],
    file_id: FileIdentity,
    master_key: MasterKey,
    checksum: u32,
}

impl KeyRecord {
    /// A fresh record with random identity and key and a matching checksum.
    pub fn generate<R: RandomSource + ?Sized>(rng: &mut R) -> Self {
        let mut file_id = [0u8; FILE_ID_SIZE];
        rng.fill(&mut file_id);
        let mut key = [0u8; KEY_SIZE];
        rng.fill(&mut key);

        let mut record = Self {
            header: MAGIC,
            file_id: FileIdentity(file_id),
            master_key: MasterKey::from_bytes(key),
            checksum: 0,
        };
        key.zeroize();
        record.checksum = record.calculate_checksum();
        record
    }

    /// Parse a record without validating it.
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut header = [0u8; 4];
        header.copy_from_slice(&bytes[..ID_OFFSET]);
        let mut file_id = [0u8; FILE_ID_SIZE];
        file_id.copy_from_slice(&bytes[ID_OFFSET..KEY_OFFSET]);
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes[KEY_OFFSET..CHECKSUM_OFFSET]);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&bytes[CHECKSUM_OFFSET..]);

        let record = Self {
            header,
            file_id: FileIdentity(file_id),
            master_key: MasterKey::from_bytes(key),
            checksum: u32::from_le_bytes(checksum),
        };
        key.zeroize();
        record
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; RECORD_SIZE]> {
        let mut bytes = Zeroizing::new([0u8; RECORD_SIZE]);
        bytes[..ID_OFFSET].copy_from_slice(&self.header);
        bytes[ID_OFFSET..KEY_OFFSET].copy_from_slice(self.file_id.as_bytes());
        bytes[KEY_OFFSET..CHECKSUM_OFFSET].copy_from_slice(self.master_key.as_bytes());
        bytes[CHECKSUM_OFFSET..].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// CRC-32 over header, identity and key.
    pub fn calculate_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.header);
        hasher.update(self.file_id.as_bytes());
        hasher.update(self.master_key.as_bytes());
        hasher.finalize()
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        if self.header != MAGIC {
            return Err(RecordError::BadHeader(self.header));
        }
        let computed = self.calculate_checksum();
        if self.checksum != computed {
            return Err(RecordError::ChecksumMismatch {
                stored: self.checksum,
                computed,
            });
        }
        Ok(())
    }

    pub fn file_id(&self) -> &FileIdentity {
        &self.file_id
    }

    pub fn master_key(&self) -> &MasterKey {
        &self.master_key
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("header", &self.header)
            .field("file_id", &self.file_id)
            .field("master_key", &self.master_key)
            .field("checksum", &format_args!("{:08X}", self.checksum))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_record() -> KeyRecord {
        KeyRecord::generate(&mut StdRng::seed_from_u64(1))
    }

    #[test]
    fn test_generated_record_is_valid() {
        let record = test_record();
        assert_eq!(record.validate(), Ok(()));
    }

    #[test]
    fn test_generate_differs() {
        let mut rng = StdRng::seed_from_u64(2);
        let a = KeyRecord::generate(&mut rng);
        let b = KeyRecord::generate(&mut rng);
        assert_ne!(a.file_id(), b.file_id());
        assert_ne!(a.master_key().as_bytes(), b.master_key().as_bytes());
    }

    #[test]
    fn test_wire_layout() {
        let record = test_record();
        let bytes = record.to_bytes();

        assert_eq!(RECORD_SIZE, 56);
        assert_eq!(&bytes[0..4], b"AESK");
        assert_eq!(&bytes[4..20], record.file_id().as_bytes());
        assert_eq!(&bytes[20..52], record.master_key().as_bytes());
        assert_eq!(
            u32::from_le_bytes(bytes[52..56].try_into().unwrap()),
            crc32fast::hash(&bytes[..52])
        );
    }

    #[test]
    fn test_parse_preserves_fields() {
        let record = test_record();
        let parsed = KeyRecord::from_bytes(&record.to_bytes());
        assert_eq!(parsed.validate(), Ok(()));
        assert_eq!(parsed.file_id(), record.file_id());
        assert_eq!(parsed.master_key().as_bytes(), record.master_key().as_bytes());
    }

    #[test]
    fn test_erased_flash_is_bad_header() {
        let parsed = KeyRecord::from_bytes(&[0xFF; RECORD_SIZE]);
        assert_eq!(parsed.validate(), Err(RecordError::BadHeader([0xFF; 4])));
    }

    #[test]
    fn test_corrupted_key_fails_checksum() {
        let record = test_record();
        let mut bytes = *record.to_bytes();
        bytes[30] ^= 0x01;

        let parsed = KeyRecord::from_bytes(&bytes);
        assert!(matches!(
            parsed.validate(),
            Err(RecordError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let record = test_record();
        let rendered = format!("{record:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(rendered.contains("FileIdentity"));
    }

    #[test]
    fn test_identity_hex_display() {
        let id = FileIdentity::from_bytes([0xAB; FILE_ID_SIZE]);
        assert_eq!(id.to_string(), "ab".repeat(FILE_ID_SIZE));
    }
}
