//! Capability set shared by every key storage backend

use crate::config::BackendKind;
use crate::Result;
use alloy::primitives::{Address, Signature, B256, U256};
use async_trait::async_trait;
use secrecy::SecretString;

/// Opaque reference to key material held by a backend
///
/// For the local keystore this is the keystore file name, for the transit
/// engine it is the engine-assigned key name. Handles never leave the key
/// manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHandle(String);

impl KeyHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A key that exists in the backend but is not yet recorded in the address map
pub struct ProvisionedKey {
    pub handle: KeyHandle,
    /// Secret protecting the persisted key (local keystore only)
    pub secret: Option<SecretString>,
}

/// Signature as produced by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSignature {
    /// The backend knows the recovery id (local signing)
    Recoverable(Signature),
    /// Only (r, s) is available; the recovery id must be resolved
    Detached { r: U256, s: U256 },
}

/// Operations every key storage backend supports
#[async_trait]
pub trait KeyBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Enumerate keys that already exist in the backend, with their addresses
    async fn existing_keys(&self) -> Result<Vec<(Address, KeyHandle)>>;

    /// Create a new key
    async fn provision_key(&self) -> Result<ProvisionedKey>;

    /// Derive the account address of a key from its public key
    async fn derive_address(&self, handle: &KeyHandle) -> Result<Address>;

    /// Permanently remove a key
    async fn delete_key(&self, handle: &KeyHandle) -> Result<()>;

    /// Sign a 32-byte prehash
    ///
    /// `secret` unlocks password-protected keys; backends holding
    /// pre-authorized handles ignore it.
    async fn sign_hash(
        &self,
        handle: &KeyHandle,
        hash: B256,
        secret: Option<&SecretString>,
    ) -> Result<BackendSignature>;
}
