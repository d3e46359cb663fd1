//! Integration tests for configuration files and the fee payer key provider

use std::io::Write;

use alt_orchestrator::config::{Config, ConfigError};
use alt_orchestrator::keys::{FileKeyProvider, KeyProvider};
use alt_orchestrator::ledger::Commitment;
use solana_sdk::signature::Signer;
use tempfile::{tempdir, NamedTempFile};

#[test]
fn test_config_file_with_partial_sections() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[rpc]
url = "https://api.devnet.solana.com"
commitment = "confirmed"

[table]
extend_batch_limit = 12

[transfer]
recipient_count = 40
compute_unit_price = 5000
"#
    )
    .unwrap();

    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.rpc.url, "https://api.devnet.solana.com");
    assert_eq!(config.rpc.commitment, Commitment::Confirmed);
    assert_eq!(config.table.extend_batch_limit, 12);
    assert_eq!(config.transfer.recipient_count, 40);
    assert_eq!(config.transfer.compute_unit_price, 5000);
    // untouched sections keep their defaults
    assert_eq!(config.table.visibility_delta_blocks, 1);
    assert_eq!(config.submitter.expiry_resubmits, 0);
}

#[test]
fn test_config_rejects_oversized_extend_batches() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[table]\nextend_batch_limit = 31").unwrap();

    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
}

#[test]
fn test_missing_config_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let err = Config::from_file(path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_key_provider_persists_generated_key() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wallets").join("payer.json");

    let provider = FileKeyProvider::new(&path, true).with_secret_env_var(None);
    let created = provider.get_or_create_signing_key().unwrap();
    assert!(path.exists());

    let reloaded = provider.get_or_create_signing_key().unwrap();
    assert_eq!(created.pubkey(), reloaded.pubkey());
}

#[test]
fn test_key_provider_without_create_fails_on_missing_file() {
    let dir = tempdir().unwrap();
    let provider = FileKeyProvider::new(dir.path().join("payer.json"), false).with_secret_env_var(None);

    assert!(provider.get_or_create_signing_key().is_err());
}
