//! Key persistence across restarts, using the host-backed flash image and SD
//! card directory.

use rand::rngs::OsRng;
use tempfile::TempDir;
use zapme_crypto::{ApCredentials, CryptoProvider, KeyRecord};
use zapme_storage::{FlashStore, KeyStore, SdCard};

fn boot(dir: &TempDir) -> (CryptoProvider<FlashStore, OsRng>, SdCard) {
    let flash = FlashStore::new(dir.path().join("flash.bin"), 4096);
    let card = SdCard::mount(dir.path().join("sdcard")).expect("mount card");
    (CryptoProvider::new(flash, OsRng), card)
}

fn read_all(
    provider: &mut CryptoProvider<FlashStore, OsRng>,
    card: &SdCard,
    path: &str,
) -> Vec<u8> {
    let mut reader = provider.open_reader(card, path).unwrap();
    assert!(reader.is_valid());
    let mut out = Vec::new();
    while let Some(b) = reader.read_byte() {
        out.push(b);
    }
    out
}

#[test]
fn files_survive_restart() {
    let dir = TempDir::new().unwrap();
    let payload = b"shock collar pairing table".repeat(40);

    let first_id = {
        let (mut provider, card) = boot(&dir);
        let mut writer = provider.open_writer(&card, "/data/pairings.bin").unwrap();
        assert!(writer.is_valid());
        writer.write_bytes(&payload);
        writer.close().unwrap();
        *provider.context().unwrap().file_id()
    };

    let (mut provider, card) = boot(&dir);
    assert_eq!(read_all(&mut provider, &card, "/data/pairings.bin"), payload);
    assert_eq!(*provider.context().unwrap().file_id(), first_id);
}

#[test]
fn flash_image_holds_valid_record() {
    let dir = TempDir::new().unwrap();
    let (mut provider, _card) = boot(&dir);
    let ctx = provider.ensure_initialized().unwrap();

    let image = std::fs::read(dir.path().join("flash.bin")).unwrap();
    assert_eq!(image.len(), 4096);
    let record = KeyRecord::from_bytes(image[..56].try_into().unwrap());
    assert!(record.validate().is_ok());
    assert_eq!(record.file_id(), ctx.file_id());
}

#[test]
fn wiped_flash_orphans_old_files() {
    let dir = TempDir::new().unwrap();
    {
        let (mut provider, card) = boot(&dir);
        let mut writer = provider.open_writer(&card, "/old.bin").unwrap();
        writer.write_bytes(b"written under the old key");
        writer.close().unwrap();
    }

    std::fs::remove_file(dir.path().join("flash.bin")).unwrap();

    let (mut provider, card) = boot(&dir);
    let reader = provider.open_reader(&card, "/old.bin").unwrap();
    assert!(!reader.is_valid());
    assert_eq!(provider.store().data()[..4], *b"AESK");
}

#[test]
fn ap_credentials_persist() {
    let dir = TempDir::new().unwrap();
    let defaults = ApCredentials::new("ZapMe", "12345678");
    {
        let (mut provider, card) = boot(&dir);
        let creds =
            ApCredentials::load_or_create(&mut provider, &card, "/config/ap-creds.bin", defaults.clone())
                .unwrap();
        assert_eq!(creds, defaults);
        zapme_crypto::write_document(
            &mut provider,
            &card,
            "/config/ap-creds.bin",
            &ApCredentials::new("Kennel", "woofwoof"),
        )
        .unwrap();
    }

    let (mut provider, card) = boot(&dir);
    let creds =
        ApCredentials::load_or_create(&mut provider, &card, "/config/ap-creds.bin", defaults).unwrap();
    assert_eq!(creds, ApCredentials::new("Kennel", "woofwoof"));
    assert!(dir.path().join("sdcard/config/ap-creds.bin").exists());
}
