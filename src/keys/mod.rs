//! Key management
//!
//! The [`KeyManager`] owns the mapping from account address to backend key
//! handle and hides backend differences behind a single signing primitive.
//!
//! SECURITY: key material never crosses this module boundary. Callers see
//! addresses and signatures only; handles stay internal.

mod backend;
pub mod local;
pub mod recovery;
pub mod transit;

pub use backend::{BackendSignature, KeyBackend, KeyHandle, ProvisionedKey};
pub use local::LocalKeystore;
pub use recovery::{recoverable_signature, resolve_recovery_id};
pub use transit::TransitBackend;

use crate::config::{BackendKind, KeyManagerConfig};
use crate::{Error, Result};
use alloy::primitives::{Address, Signature, B256};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Address to key handle mapping
///
/// Append-only after startup. Reads take the shared lock; an insertion is a
/// single step under the exclusive lock, so readers observe either the set
/// before or after it.
#[derive(Debug, Default)]
pub struct AddressMap {
    entries: RwLock<HashMap<Address, KeyHandle>>,
}

impl AddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map from backend enumeration, rejecting duplicate addresses
    pub fn from_entries(entries: impl IntoIterator<Item = (Address, KeyHandle)>) -> Result<Self> {
        let mut map = HashMap::new();
        for (address, handle) in entries {
            if let Some(existing) = map.insert(address, handle) {
                return Err(Error::backend_msg(format!(
                    "backend holds more than one key for {} (also {})",
                    address,
                    existing.name()
                )));
            }
        }
        Ok(Self {
            entries: RwLock::new(map),
        })
    }

    /// All managed addresses, sorted
    pub async fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.entries.read().await.keys().copied().collect();
        addresses.sort();
        addresses
    }

    pub async fn handle_for(&self, address: &Address) -> Option<KeyHandle> {
        self.entries.read().await.get(address).cloned()
    }

    /// Record a new account; fails if the address is already mapped
    pub async fn insert_new(&self, address: Address, handle: KeyHandle) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&address) {
            return Err(Error::backend_msg(format!(
                "address {} is already managed",
                address
            )));
        }
        entries.insert(address, handle);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Result of account creation
pub struct CreatedAccount {
    pub address: Address,
    /// Keystore secret for local accounts; shown to the caller exactly once
    pub secret: Option<SecretString>,
}

impl std::fmt::Debug for CreatedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedAccount")
            .field("address", &self.address)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A backend key that has not been recorded in the address map yet
///
/// Unless committed, the key is deleted: explicitly through [`roll_back`],
/// or from `Drop` when the creating future is cancelled.
///
/// [`roll_back`]: PendingKey::roll_back
struct PendingKey {
    backend: Arc<dyn KeyBackend>,
    handle: KeyHandle,
    armed: bool,
}

impl PendingKey {
    fn new(backend: Arc<dyn KeyBackend>, handle: KeyHandle) -> Self {
        Self {
            backend,
            handle,
            armed: true,
        }
    }

    fn handle(&self) -> &KeyHandle {
        &self.handle
    }

    fn commit(mut self) {
        self.armed = false;
    }

    /// Best-effort deletion after a failed creation; never replaces `cause`
    async fn roll_back(mut self, cause: &Error) {
        self.armed = false;
        match self.backend.delete_key(&self.handle).await {
            Ok(()) => {
                tracing::info!(key = %self.handle.name(), error = %cause, "Rolled back key after failed creation");
            }
            Err(e) => {
                tracing::error!(
                    key = %self.handle.name(),
                    error = %e,
                    cause = %cause,
                    "Failed to delete key after failed creation"
                );
            }
        }
    }
}

impl Drop for PendingKey {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let backend = Arc::clone(&self.backend);
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(key = %handle.name(), "Key creation cancelled, scheduling deletion");
                runtime.spawn(async move {
                    if let Err(e) = backend.delete_key(&handle).await {
                        tracing::error!(key = %handle.name(), error = %e, "Failed to delete key of cancelled creation");
                    }
                });
            }
            Err(_) => {
                tracing::error!(key = %handle.name(), "Key creation cancelled outside a runtime, key left in backend");
            }
        }
    }
}

/// Backend-agnostic key manager
pub struct KeyManager {
    backend: Arc<dyn KeyBackend>,
    accounts: AddressMap,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("backend", &self.backend.kind())
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Create a manager and populate the address map from the backend
    pub async fn new(backend: Arc<dyn KeyBackend>) -> Result<Self> {
        let accounts = AddressMap::from_entries(backend.existing_keys().await?)?;
        tracing::info!(
            backend = backend.kind().name(),
            accounts = accounts.len().await,
            "Key manager ready"
        );
        Ok(Self { backend, accounts })
    }

    /// Build the configured backend, then the manager on top of it
    pub async fn from_config(config: &KeyManagerConfig) -> Result<Self> {
        let backend: Arc<dyn KeyBackend> = match config.backend {
            BackendKind::Local => Arc::new(LocalKeystore::open(&config.local.key_dir)?),
            BackendKind::Vault => Arc::new(TransitBackend::connect(&config.vault).await?),
        };
        Self::new(backend).await
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Managed accounts, from the in-memory map only
    pub async fn list_accounts(&self) -> Vec<Address> {
        self.accounts.addresses().await
    }

    /// Create a key in the backend and start managing its address
    ///
    /// If anything fails after the backend created the key, the key is
    /// deleted again and the original error is returned.
    pub async fn create_key(&self) -> Result<CreatedAccount> {
        let provisioned = self.backend.provision_key().await?;
        let pending = PendingKey::new(Arc::clone(&self.backend), provisioned.handle);

        let address = match self.backend.derive_address(pending.handle()).await {
            Ok(address) => address,
            Err(e) => {
                pending.roll_back(&e).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .accounts
            .insert_new(address, pending.handle().clone())
            .await
        {
            pending.roll_back(&e).await;
            return Err(e);
        }
        pending.commit();

        tracing::info!(%address, backend = self.backend.kind().name(), "Created account");
        Ok(CreatedAccount {
            address,
            secret: provisioned.secret,
        })
    }

    /// Sign a transaction signing hash
    pub async fn sign_transaction_hash(
        &self,
        address: Address,
        hash: B256,
        secret: Option<&SecretString>,
    ) -> Result<Signature> {
        self.sign_hash(address, hash, secret).await
    }

    /// Sign an arbitrary 32-byte hash (e.g. a prefixed message hash)
    pub async fn sign_arbitrary_hash(
        &self,
        address: Address,
        hash: B256,
        secret: Option<&SecretString>,
    ) -> Result<Signature> {
        self.sign_hash(address, hash, secret).await
    }

    async fn sign_hash(
        &self,
        address: Address,
        hash: B256,
        secret: Option<&SecretString>,
    ) -> Result<Signature> {
        let handle = self
            .accounts
            .handle_for(&address)
            .await
            .ok_or(Error::AccountNotFound(address))?;

        match self.backend.sign_hash(&handle, hash, secret).await? {
            BackendSignature::Recoverable(signature) => Ok(signature),
            BackendSignature::Detached { r, s } => recoverable_signature(&hash, r, s, address),
        }
    }
}
