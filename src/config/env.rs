//! Environment variable overrides
//!
//! Every setting in the config file can be overridden from the environment,
//! which is how the service is usually configured in containers:
//!
//! ```bash
//! export SIGNER_BACKEND=vault
//! export VAULT_ADDR="https://vault.internal:8200"
//! export VAULT_TOKEN="s.xxxxx"
//! export SIGNER_API_KEY="client-key"
//! export SIGNER_API_SECRET="shared-hmac-secret"
//! ```

use super::{BackendKind, Config};
use crate::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;

/// Environment variable names
pub mod vars {
    pub const HOST: &str = "SIGNER_HOST";
    pub const PORT: &str = "SIGNER_PORT";
    pub const BACKEND: &str = "SIGNER_BACKEND";
    pub const KEY_DIR: &str = "SIGNER_KEY_DIR";

    pub const VAULT_ADDR: &str = "VAULT_ADDR";
    pub const VAULT_TOKEN: &str = "VAULT_TOKEN";
    pub const VAULT_TRANSIT_PATH: &str = "VAULT_TRANSIT_PATH";
    pub const VAULT_KEY_TYPE: &str = "VAULT_KEY_TYPE";
    pub const VAULT_REQUEST_TIMEOUT_SECS: &str = "VAULT_REQUEST_TIMEOUT_SECS";

    pub const API_KEY: &str = "SIGNER_API_KEY";
    pub const API_SECRET: &str = "SIGNER_API_SECRET";
}

/// Apply overrides from the process environment
pub fn apply(config: &mut Config) -> Result<()> {
    apply_from(config, |name| std::env::var(name).ok())
}

/// Apply overrides from an arbitrary variable source
///
/// Empty values are treated as unset.
pub fn apply_from<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(host) = get(vars::HOST) {
        config.server.host = host;
    }
    if let Some(port) = get(vars::PORT) {
        config.server.port = parse_number(vars::PORT, &port)?;
    }
    if let Some(backend) = get(vars::BACKEND) {
        config.key_manager.backend = backend.parse::<BackendKind>()?;
    }
    if let Some(dir) = get(vars::KEY_DIR) {
        config.key_manager.local.key_dir = PathBuf::from(dir);
    }

    let vault = &mut config.key_manager.vault;
    if let Some(address) = get(vars::VAULT_ADDR) {
        tracing::debug!("Using VAULT_ADDR for transit engine address");
        vault.address = address;
    }
    if let Some(token) = get(vars::VAULT_TOKEN) {
        vault.token = Some(SecretString::from(token));
    }
    if let Some(path) = get(vars::VAULT_TRANSIT_PATH) {
        vault.transit_path = path;
    }
    if let Some(key_type) = get(vars::VAULT_KEY_TYPE) {
        vault.key_type = key_type;
    }
    if let Some(timeout) = get(vars::VAULT_REQUEST_TIMEOUT_SECS) {
        vault.request_timeout_secs = parse_number(vars::VAULT_REQUEST_TIMEOUT_SECS, &timeout)?;
    }

    if let Some(api_key) = get(vars::API_KEY) {
        config.auth.api_key = api_key;
    }
    if let Some(api_secret) = get(vars::API_SECRET) {
        config.auth.api_secret = Some(SecretString::from(api_secret));
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{} is not a valid number: {}", name, e)))
}
