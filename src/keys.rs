//! Signing key provider
//!
//! Keys are read from a Solana CLI keypair file (JSON array of 64 bytes) or,
//! when set, from a base58 secret in the environment. A missing file is
//! generated and persisted on first use if the provider allows it. Funding
//! the resulting account is left to the operator.

use anyhow::{Context, Result};
use solana_sdk::signature::{Keypair, Signer};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::config::WalletConfig;

/// Environment variable holding a base58-encoded 64-byte secret key
pub const SECRET_ENV_VAR: &str = "ALT_PAYER_SECRET";

pub trait KeyProvider: Send + Sync {
    fn get_or_create_signing_key(&self) -> Result<Keypair>;
}

/// File-backed provider, optionally overridden by [`SECRET_ENV_VAR`]
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    path: PathBuf,
    create_if_missing: bool,
    secret_env_var: Option<String>,
}

impl FileKeyProvider {
    pub fn new(path: impl Into<PathBuf>, create_if_missing: bool) -> Self {
        Self {
            path: path.into(),
            create_if_missing,
            secret_env_var: Some(SECRET_ENV_VAR.to_string()),
        }
    }

    pub fn from_config(config: &WalletConfig) -> Self {
        Self::new(&config.keypair_path, config.create_if_missing)
    }

    /// Read the secret from a different environment variable, or none at all
    pub fn with_secret_env_var(mut self, name: Option<&str>) -> Self {
        self.secret_env_var = name.map(str::to_string);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn secret_from_env(&self) -> Result<Option<Keypair>> {
        let Some(name) = &self.secret_env_var else {
            return Ok(None);
        };
        let Ok(mut encoded) = std::env::var(name) else {
            return Ok(None);
        };

        let decoded = bs58::decode(encoded.trim()).into_vec();
        encoded.zeroize();
        let mut bytes = decoded.with_context(|| format!("{} is not valid base58", name))?;
        let keypair = keypair_from_bytes(&bytes);
        bytes.zeroize();
        keypair.map(Some)
    }

    fn read_file(&self) -> Result<Keypair> {
        let mut raw = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read keypair file: {}", self.path.display()))?;
        let parsed: serde_json::Result<Vec<u8>> = serde_json::from_slice(&raw);
        raw.zeroize();

        let mut bytes = parsed.context("Failed to parse keypair JSON")?;
        let keypair = keypair_from_bytes(&bytes);
        bytes.zeroize();
        keypair
    }

    fn create_file(&self) -> Result<Keypair> {
        let keypair = Keypair::new();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut bytes = keypair.to_bytes().to_vec();
        let mut json = serde_json::to_string(&bytes)?;
        bytes.zeroize();
        let written = std::fs::write(&self.path, &json);
        json.zeroize();
        written.with_context(|| format!("Failed to write keypair file: {}", self.path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
            {
                warn!(path = %self.path.display(), error = %e, "Could not restrict keypair file permissions");
            }
        }

        info!(pubkey = %keypair.pubkey(), path = %self.path.display(), "Generated new signing key");
        Ok(keypair)
    }
}

impl KeyProvider for FileKeyProvider {
    fn get_or_create_signing_key(&self) -> Result<Keypair> {
        if let Some(keypair) = self.secret_from_env()? {
            return Ok(keypair);
        }

        if self.path.exists() {
            return self.read_file();
        }

        if !self.create_if_missing {
            anyhow::bail!("Keypair file not found: {}", self.path.display());
        }
        self.create_file()
    }
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.len() != 64 {
        anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
    }
    if bytes.iter().all(|&b| b == 0) {
        anyhow::bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(bytes).context("Invalid keypair bytes")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(path: PathBuf, create: bool) -> FileKeyProvider {
        FileKeyProvider::new(path, create).with_secret_env_var(None)
    }

    #[test]
    fn test_creates_then_reloads_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("payer.json");

        let created = provider(path.clone(), true).get_or_create_signing_key().unwrap();
        assert!(path.exists());

        let loaded = provider(path, false).get_or_create_signing_key().unwrap();
        assert_eq!(created.pubkey(), loaded.pubkey());
    }

    #[test]
    fn test_missing_file_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = provider(dir.path().join("absent.json"), false)
            .get_or_create_signing_key()
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_reads_cli_json_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli.json");
        let keypair = Keypair::new();
        std::fs::write(&path, serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap()).unwrap();

        let loaded = provider(path, false).get_or_create_signing_key().unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_rejects_all_zero_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.json");
        std::fs::write(&path, serde_json::to_string(&vec![0u8; 64]).unwrap()).unwrap();

        let err = provider(path, false).get_or_create_signing_key().unwrap_err();
        assert!(err.to_string().contains("all-zero"));
    }

    #[test]
    fn test_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.json");
        std::fs::write(&path, serde_json::to_string(&vec![1u8; 32]).unwrap()).unwrap();

        assert!(provider(path, false).get_or_create_signing_key().is_err());
    }

    #[test]
    fn test_env_secret_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = Keypair::new();
        let var = "ALT_PAYER_SECRET_KEYS_TEST";
        std::env::set_var(var, bs58::encode(keypair.to_bytes()).into_string());

        let loaded = FileKeyProvider::new(dir.path().join("unused.json"), false)
            .with_secret_env_var(Some(var))
            .get_or_create_signing_key()
            .unwrap();
        std::env::remove_var(var);

        assert_eq!(loaded.pubkey(), keypair.pubkey());
        assert!(!dir.path().join("unused.json").exists());
    }
}
