//! Local keystore backend
//!
//! Each account is one Web3 Secret Storage file (`<address>.json`) in the key
//! directory, encrypted with a random secret that is handed to the caller on
//! creation and required again for every signature.
//!
//! SECURITY NOTE:
//! - The secret is never written to disk or logged
//! - Decrypted keys live only for the duration of a single signing call
//! - The key directory is created owner-only (0700), key files are 0600

use super::backend::{BackendSignature, KeyBackend, KeyHandle, ProvisionedKey};
use crate::config::BackendKind;
use crate::{Error, Result};
use alloy::hex;
use alloy::primitives::{Address, B256};
use alloy::signers::local::{LocalSignerError, PrivateKeySigner};
use alloy::signers::SignerSync;
use async_trait::async_trait;
use eth_keystore::KeystoreError;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Random bytes in a generated keystore secret
const SECRET_BYTES: usize = 32;

const KEYSTORE_EXTENSION: &str = "json";

/// Backend storing encrypted keys on local disk
#[derive(Debug)]
pub struct LocalKeystore {
    key_dir: PathBuf,
}

impl LocalKeystore {
    /// Open (and create if needed) the key directory
    pub fn open(key_dir: impl Into<PathBuf>) -> Result<Self> {
        let key_dir = key_dir.into();
        std::fs::create_dir_all(&key_dir).map_err(|e| {
            Error::backend(
                format!("failed to create key directory {}", key_dir.display()),
                e,
            )
        })?;
        restrict_permissions(&key_dir, 0o700)?;

        tracing::info!(key_dir = %key_dir.display(), "Opened local keystore");
        Ok(Self { key_dir })
    }

    fn path_for(&self, handle: &KeyHandle) -> PathBuf {
        self.key_dir.join(handle.name())
    }
}

/// Only a MAC mismatch means the secret was wrong; anything else is a disk or
/// format problem with the keystore itself
fn decrypt_error(address: Address, e: LocalSignerError) -> Error {
    match e {
        LocalSignerError::EthKeystoreError(KeystoreError::MacMismatch) => {
            tracing::debug!(%address, "Keystore MAC mismatch");
            Error::InvalidSecret(address)
        }
        other => Error::backend(format!("failed to decrypt keystore for {}", address), other),
    }
}

/// Keystore file name for an address
fn file_name_for(address: Address) -> String {
    format!("{}.{}", address.to_checksum(None), KEYSTORE_EXTENSION)
}

/// Parse the address encoded in a keystore file name
fn address_from_file_name(name: &str) -> Option<Address> {
    let stem = name.strip_suffix(&format!(".{}", KEYSTORE_EXTENSION))?;
    Address::from_str(stem).ok()
}

/// Generate a high-entropy keystore secret (hex encoded)
fn generate_secret() -> SecretString {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    SecretString::from(hex::encode(bytes))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        Error::backend(
            format!("failed to restrict permissions on {}", path.display()),
            e,
        )
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[async_trait]
impl KeyBackend for LocalKeystore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn existing_keys(&self) -> Result<Vec<(Address, KeyHandle)>> {
        let mut entries = tokio::fs::read_dir(&self.key_dir).await.map_err(|e| {
            Error::backend(
                format!("failed to read key directory {}", self.key_dir.display()),
                e,
            )
        })?;

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match address_from_file_name(&name) {
                Some(address) => {
                    tracing::info!(%address, "Loaded local key");
                    keys.push((address, KeyHandle::new(name)));
                }
                None => tracing::debug!(file = %name, "Skipping non-keystore file"),
            }
        }

        Ok(keys)
    }

    async fn provision_key(&self) -> Result<ProvisionedKey> {
        let key_dir = self.key_dir.clone();

        // scrypt key derivation is CPU-bound
        tokio::task::spawn_blocking(move || {
            let signer = PrivateKeySigner::random();
            let name = file_name_for(signer.address());

            let path = key_dir.join(&name);
            if path.exists() {
                return Err(Error::backend_msg(format!(
                    "keystore file {} already exists",
                    path.display()
                )));
            }

            let secret = generate_secret();
            PrivateKeySigner::encrypt_keystore(
                &key_dir,
                &mut rand::thread_rng(),
                signer.credential().to_bytes(),
                secret.expose_secret().as_bytes(),
                Some(name.as_str()),
            )
            .map_err(|e| Error::backend("failed to encrypt keystore", e))?;

            let handle = KeyHandle::new(name);
            restrict_permissions(&path, 0o600)?;

            Ok(ProvisionedKey {
                handle,
                secret: Some(secret),
            })
        })
        .await
        .map_err(|e| Error::backend("keystore task failed", e))?
    }

    async fn derive_address(&self, handle: &KeyHandle) -> Result<Address> {
        address_from_file_name(handle.name()).ok_or_else(|| {
            Error::backend_msg(format!(
                "keystore file name {} does not encode an address",
                handle.name()
            ))
        })
    }

    async fn delete_key(&self, handle: &KeyHandle) -> Result<()> {
        let path = self.path_for(handle);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| Error::backend(format!("failed to remove {}", path.display()), e))
    }

    async fn sign_hash(
        &self,
        handle: &KeyHandle,
        hash: B256,
        secret: Option<&SecretString>,
    ) -> Result<BackendSignature> {
        let address = self.derive_address(handle).await?;
        let secret = secret.ok_or_else(|| {
            Error::Validation("secret is required to unlock a local account".to_string())
        })?;

        let path = self.path_for(handle);
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::backend_msg(format!(
                "keystore file for {} is missing",
                address
            )));
        }

        let password = SecretString::from(secret.expose_secret().to_owned());
        let signature = tokio::task::spawn_blocking(move || {
            let signer = PrivateKeySigner::decrypt_keystore(&path, password.expose_secret())
                .map_err(|e| decrypt_error(address, e))?;

            if signer.address() != address {
                return Err(Error::backend_msg(format!(
                    "keystore {} holds key for {}",
                    path.display(),
                    signer.address()
                )));
            }

            signer
                .sign_hash_sync(&hash)
                .map_err(|e| Error::backend("local signing failed", e))
        })
        .await
        .map_err(|e| Error::backend("keystore task failed", e))??;

        Ok(BackendSignature::Recoverable(signature))
    }
}
