//! zapme: host tool for the device's encrypted SD card storage
//!
//! Commands:
//!   status                         - show the key record in the flash image
//!   init                           - provision the key record if needed
//!   encrypt <input> <device-path>  - store a host file encrypted on the card
//!   decrypt <device-path> [<out>]  - decrypt a card file to a host file or stdout
//!   ap-creds show | set            - access point credentials
//!   config show                    - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::OsRng;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use zapme_core::config::ZapmeConfig;
use zapme_crypto::key_record::RECORD_SIZE;
use zapme_crypto::{ApCredentials, CryptoProvider, KeyRecord};
use zapme_storage::{FlashStore, KeyStore, SdCard, Storage};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "zapme",
    version,
    about = "ZapMe encrypted storage tool",
    long_about = "zapme: inspect and provision the device key, and move files in and out of \
                  the encrypted SD card"
)]
struct Cli {
    /// Path to zapme.toml configuration file
    #[arg(long, short = 'c', env = "ZAPME_CONFIG", default_value = "zapme.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "ZAPME_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "ZAPME_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show whether the flash image holds a valid key record
    Status,

    /// Provision the key record (no-op when a valid one exists)
    Init,

    /// Encrypt a host file onto the SD card
    Encrypt {
        /// Host file to read
        input: PathBuf,
        /// Destination path on the card (e.g. /config/shockers.bin)
        path: String,
    },

    /// Decrypt a file from the SD card
    Decrypt {
        /// Source path on the card
        path: String,
        /// Host file to write (default: stdout)
        output: Option<PathBuf>,
    },

    /// Access point credentials
    #[command(name = "ap-creds")]
    ApCreds {
        #[command(subcommand)]
        action: ApCredsAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ApCredsAction {
    /// Print the stored credentials
    Show,
    /// Replace the stored credentials
    Set {
        #[arg(long)]
        ssid: String,
        #[arg(long, env = "ZAPME_AP_PSK")]
        psk: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ZapmeConfig::load(&cli.config)?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = match cli.log_format {
        Some(format) => format,
        None if config.logging.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(level, &format);

    match cli.command {
        Commands::Status => cmd_status(&config),
        Commands::Init => cmd_init(&config),
        Commands::Encrypt { input, path } => cmd_encrypt(&config, &input, &path),
        Commands::Decrypt { path, output } => cmd_decrypt(&config, &path, output.as_deref()),
        Commands::ApCreds { action: ApCredsAction::Show } => cmd_ap_creds_show(&config),
        Commands::ApCreds { action: ApCredsAction::Set { ssid, psk } } => {
            cmd_ap_creds_set(&config, ApCredentials::new(ssid, psk))
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

type Provider = CryptoProvider<FlashStore, OsRng>;

fn open_device(config: &ZapmeConfig) -> Result<(Provider, SdCard)> {
    let card = SdCard::from_config(&config.storage)?;
    let flash = FlashStore::from_config(&config.keystore);
    Ok((CryptoProvider::new(flash, OsRng), card))
}

// ── `zapme status` / `zapme init` ─────────────────────────────────────────────

fn cmd_status(config: &ZapmeConfig) -> Result<()> {
    println!("flash image: {}", config.keystore.path.display());
    println!("sd card:     {}", config.storage.root.display());

    let mut flash = FlashStore::from_config(&config.keystore);
    flash
        .begin(RECORD_SIZE)
        .with_context(|| format!("reading flash image {}", config.keystore.path.display()))?;
    let raw: [u8; RECORD_SIZE] = flash
        .data()
        .try_into()
        .context("flash region shorter than a key record")?;
    let record = KeyRecord::from_bytes(&raw);

    match record.validate() {
        Ok(()) => {
            println!("key record:  valid");
            println!("file id:     {}", record.file_id());
        }
        Err(reason) => {
            println!("key record:  missing or invalid ({reason})");
            println!("             run `zapme init` to provision a new one");
        }
    }
    Ok(())
}

fn cmd_init(config: &ZapmeConfig) -> Result<()> {
    let (mut provider, _card) = open_device(config)?;
    let ctx = provider
        .ensure_initialized()
        .context("provisioning key record")?;
    println!("file id: {}", ctx.file_id());
    Ok(())
}

// ── `zapme encrypt` / `zapme decrypt` ─────────────────────────────────────────

fn cmd_encrypt(config: &ZapmeConfig, input: &Path, path: &str) -> Result<()> {
    let (mut provider, card) = open_device(config)?;
    let mut source =
        File::open(input).with_context(|| format!("opening {}", input.display()))?;

    let mut writer = provider.open_writer(&card, path)?;
    anyhow::ensure!(writer.is_valid(), "cannot create encrypted file {path}");

    let copied = io::copy(&mut source, &mut writer)
        .with_context(|| format!("encrypting {} into {path}", input.display()))?;
    writer
        .close()
        .with_context(|| format!("finalizing {path}"))?;

    info!(input = %input.display(), path, bytes = copied, "file encrypted");
    println!("{copied} bytes -> {path}");
    Ok(())
}

fn cmd_decrypt(config: &ZapmeConfig, path: &str, output: Option<&Path>) -> Result<()> {
    let (mut provider, card) = open_device(config)?;
    let mut reader = provider.open_reader(&card, path)?;
    anyhow::ensure!(
        reader.is_valid(),
        "cannot decrypt {path}: missing, malformed, or written under another device key"
    );

    let copied = match output {
        Some(out) => {
            let mut file =
                File::create(out).with_context(|| format!("creating {}", out.display()))?;
            let n = io::copy(&mut reader, &mut file)
                .with_context(|| format!("decrypting {path}"))?;
            file.sync_all()?;
            n
        }
        None => {
            let mut stdout = io::stdout().lock();
            let n = io::copy(&mut reader, &mut stdout)
                .with_context(|| format!("decrypting {path}"))?;
            stdout.flush()?;
            n
        }
    };
    reader.close()?;

    info!(path, bytes = copied, "file decrypted");
    Ok(())
}

// ── `zapme ap-creds` ──────────────────────────────────────────────────────────

fn config_defaults(config: &ZapmeConfig) -> ApCredentials {
    ApCredentials::new(
        config.access_point.default_ssid.clone(),
        config.access_point.default_psk.clone(),
    )
}

fn cmd_ap_creds_show(config: &ZapmeConfig) -> Result<()> {
    let (mut provider, card) = open_device(config)?;
    let path = &config.access_point.credentials_file;
    if !card.exists(path) {
        anyhow::bail!(
            "no access point credentials at {path} (device default: {}); \
             run `zapme ap-creds set` to store some",
            config_defaults(config).ssid
        );
    }
    let creds = ApCredentials::load(&mut provider, &card, path)
        .with_context(|| format!("reading {path}"))?;
    println!("ssid: {}", creds.ssid);
    println!("psk:  {}", creds.psk);
    Ok(())
}

fn cmd_ap_creds_set(config: &ZapmeConfig, creds: ApCredentials) -> Result<()> {
    anyhow::ensure!(
        (1..=32).contains(&creds.ssid.len()),
        "SSID must be 1 to 32 bytes"
    );
    anyhow::ensure!(
        (8..=63).contains(&creds.psk.len()),
        "WPA2 pre-shared key must be 8 to 63 characters"
    );

    let (mut provider, card) = open_device(config)?;
    let path = &config.access_point.credentials_file;
    zapme_crypto::write_document(&mut provider, &card, path, &creds)
        .with_context(|| format!("writing {path}"))?;
    println!("access point credentials updated ({})", creds.ssid);
    Ok(())
}

// ── `zapme config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &ZapmeConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ap_creds_set() {
        let cli = Cli::try_parse_from([
            "zapme", "ap-creds", "set", "--ssid", "Kennel", "--psk", "woofwoof",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::ApCreds { action: ApCredsAction::Set { ref ssid, .. } } if ssid == "Kennel"
        ));
    }

    #[test]
    fn test_encrypt_then_decrypt_through_commands() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ZapmeConfig::default();
        config.storage.root = dir.path().join("sd");
        config.keystore.path = dir.path().join("flash.bin");

        let input = dir.path().join("in.txt");
        std::fs::write(&input, b"pairing table").unwrap();
        let output = dir.path().join("out.txt");

        cmd_encrypt(&config, &input, "/data/pairs.bin").unwrap();
        cmd_decrypt(&config, "/data/pairs.bin", Some(&output)).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"pairing table");
    }

    #[test]
    fn test_ap_creds_set_rejects_short_psk() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ZapmeConfig::default();
        config.storage.root = dir.path().join("sd");
        config.keystore.path = dir.path().join("flash.bin");

        assert!(cmd_ap_creds_set(&config, ApCredentials::new("Kennel", "short")).is_err());
    }

    #[test]
    fn test_ap_creds_show_does_not_rewrite_unreadable_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ZapmeConfig::default();
        config.storage.root = dir.path().join("sd");
        config.keystore.path = dir.path().join("flash.bin");

        let garbage = dir.path().join("garbage.txt");
        std::fs::write(&garbage, b"ssid=Kennel").unwrap();
        let path = config.access_point.credentials_file.clone();
        cmd_encrypt(&config, &garbage, &path).unwrap();

        let on_card = config.storage.root.join(path.trim_start_matches('/'));
        let before = std::fs::read(&on_card).unwrap();
        assert!(cmd_ap_creds_show(&config).is_err());
        assert_eq!(std::fs::read(&on_card).unwrap(), before);
    }

    #[test]
    fn test_ap_creds_show_missing_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ZapmeConfig::default();
        config.storage.root = dir.path().join("sd");
        config.keystore.path = dir.path().join("flash.bin");

        assert!(cmd_ap_creds_show(&config).is_err());
        let path = config.access_point.credentials_file.clone();
        assert!(!config.storage.root.join(path.trim_start_matches('/')).exists());
    }

    #[test]
    fn test_ap_creds_set_then_show() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ZapmeConfig::default();
        config.storage.root = dir.path().join("sd");
        config.keystore.path = dir.path().join("flash.bin");

        cmd_ap_creds_set(&config, ApCredentials::new("Kennel", "woofwoof")).unwrap();
        cmd_ap_creds_show(&config).unwrap();
    }
}
