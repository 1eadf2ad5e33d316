//! Configuration for the signing service
//!
//! Configuration is layered:
//! 1. Built-in defaults
//! 2. An optional JSON config file (`--config`)
//! 3. Environment variables (see [`env`]), highest priority

pub mod env;

use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Key storage backend, selected once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Encrypted keystore files on local disk
    #[default]
    Local,
    /// Remote transit engine (HashiCorp Vault compatible)
    Vault,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Vault => "vault",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "vault" | "transit" => Ok(BackendKind::Vault),
            other => Err(Error::Config(format!("Unknown key manager backend: {}", other))),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Local keystore settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory holding one encrypted keystore file per account
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            key_dir: default_key_dir(),
        }
    }
}

/// Remote transit engine settings
#[derive(Debug, Deserialize)]
pub struct VaultConfig {
    /// Base address of the transit engine, e.g. `http://127.0.0.1:8200`
    #[serde(default = "default_vault_address")]
    pub address: String,
    /// Access token sent as `X-Vault-Token`
    #[serde(default)]
    pub token: Option<SecretString>,
    /// Mount path of the transit secrets engine
    #[serde(default = "default_transit_path")]
    pub transit_path: String,
    /// Key type requested when creating keys
    #[serde(default = "default_key_type")]
    pub key_type: String,
    /// Upper bound for a single transit request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl VaultConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: default_vault_address(),
            token: None,
            transit_path: default_transit_path(),
            key_type: default_key_type(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Key manager settings
#[derive(Debug, Default, Deserialize)]
pub struct KeyManagerConfig {
    /// Active backend (`local` or `vault`)
    #[serde(rename = "type", default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub vault: VaultConfig,
}

/// Request authentication settings
#[derive(Debug, Default, Deserialize)]
pub struct AuthConfig {
    /// Expected value of the `X-API-Key` header
    #[serde(default)]
    pub api_key: String,
    /// Shared secret for the `X-Signature` HMAC
    #[serde(default)]
    pub api_secret: Option<SecretString>,
}

/// Main configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub key_manager: KeyManagerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Config {
    /// Load configuration from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        env::apply(&mut config)?;
        Ok(config)
    }

    /// Parse a JSON config file without applying environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Check settings that cannot be defaulted
    pub fn validate(&self) -> Result<()> {
        if self.auth.api_key.trim().is_empty() {
            return Err(Error::Config("auth.api_key must be set".to_string()));
        }
        match &self.auth.api_secret {
            Some(secret) if !secret.expose_secret().is_empty() => {}
            _ => return Err(Error::Config("auth.api_secret must be set".to_string())),
        }

        if self.key_manager.backend == BackendKind::Vault {
            let vault = &self.key_manager.vault;
            match &vault.token {
                Some(token) if !token.expose_secret().is_empty() => {}
                _ => {
                    return Err(Error::Config(
                        "key_manager.vault.token must be set for the vault backend".to_string(),
                    ))
                }
            }
            if vault.transit_path.trim_matches('/').is_empty() {
                return Err(Error::Config(
                    "key_manager.vault.transit_path must not be empty".to_string(),
                ));
            }
            if vault.request_timeout_secs == 0 {
                return Err(Error::Config(
                    "key_manager.vault.request_timeout_secs must be greater than zero"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("keystore")
}

fn default_vault_address() -> String {
    "http://127.0.0.1:8200".to_string()
}

fn default_transit_path() -> String {
    "transit".to_string()
}

fn default_key_type() -> String {
    "secp256k1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}
