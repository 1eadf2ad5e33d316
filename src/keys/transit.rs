//! Remote transit engine backend (HashiCorp Vault transit compatible)
//!
//! Keys are generated inside the engine and never leave it. The engine signs
//! prehashed input and returns only `(r, s)`, so every signature produced here
//! is [`BackendSignature::Detached`].

use super::backend::{BackendSignature, KeyBackend, KeyHandle, ProvisionedKey};
use crate::config::{BackendKind, VaultConfig};
use crate::{Error, Result};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::pkcs8::DecodePublicKey;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Prefix for engine-side key names
const KEY_NAME_PREFIX: &str = "eth-key-";

#[derive(Debug, Serialize)]
struct CreateKeyRequest<'a> {
    #[serde(rename = "type")]
    key_type: &'a str,
}

#[derive(Debug, Serialize)]
struct MountRequest<'a> {
    #[serde(rename = "type")]
    engine: &'a str,
}

#[derive(Debug, Serialize)]
struct SignRequest {
    input: String,
    prehashed: bool,
    marshaling_algorithm: &'static str,
}

#[derive(Debug, Serialize)]
struct KeyConfigRequest {
    deletion_allowed: bool,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct KeyInfo {
    #[serde(default)]
    keys: HashMap<String, KeyVersion>,
}

#[derive(Debug, Deserialize)]
struct KeyVersion {
    #[serde(default)]
    public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signature: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// Transit engine client
pub struct TransitBackend {
    client: Client,
    base: Url,
    token: SecretString,
    mount: String,
    key_type: String,
}

impl std::fmt::Debug for TransitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitBackend")
            .field("base", &self.base.as_str())
            .field("mount", &self.mount)
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

impl TransitBackend {
    /// Connect to the engine and make sure the transit mount exists
    pub async fn connect(config: &VaultConfig) -> Result<Self> {
        let token = config
            .token
            .as_ref()
            .map(|t| SecretString::from(t.expose_secret().to_owned()))
            .ok_or_else(|| Error::Config("vault token is not configured".to_string()))?;

        let backend = Self::new(
            &config.address,
            token,
            &config.transit_path,
            &config.key_type,
            config.request_timeout(),
        )?;
        backend.ensure_mount().await?;
        Ok(backend)
    }

    fn new(
        address: &str,
        token: SecretString,
        transit_path: &str,
        key_type: &str,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let mut base = Url::parse(address)
            .map_err(|e| Error::Config(format!("invalid vault address {}: {}", address, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::backend("failed to build transit engine client", e))?;

        Ok(Self {
            client,
            base,
            token,
            mount: transit_path.trim_matches('/').to_string(),
            key_type: key_type.to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(&format!("v1/{}", path))
            .map_err(|e| Error::backend(format!("invalid transit path {}", path), e))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self
            .client
            .request(method, self.url(path)?)
            .header(TOKEN_HEADER, self.token.expose_secret()))
    }

    fn key_path(&self, handle: &KeyHandle) -> String {
        format!("{}/keys/{}", self.mount, handle.name())
    }

    /// Enable the transit engine at the configured mount if it is missing
    async fn ensure_mount(&self) -> Result<()> {
        let response = self.request(Method::GET, "sys/mounts")?.send().await?;
        let mounts: Value = check(response, "failed to list secrets engines")
            .await?
            .json()
            .await?;

        let mount_key = format!("{}/", self.mount);
        let mounted = mounts.get(&mount_key).is_some()
            || mounts
                .get("data")
                .and_then(|data| data.get(&mount_key))
                .is_some();

        if mounted {
            tracing::info!(mount = %self.mount, "Transit engine already enabled");
            return Ok(());
        }

        tracing::info!(mount = %self.mount, "Transit engine not found, enabling it");
        let response = self
            .request(Method::POST, &format!("sys/mounts/{}", self.mount))?
            .json(&MountRequest { engine: "transit" })
            .send()
            .await?;
        check(response, "failed to enable transit engine").await?;
        Ok(())
    }

    async fn list_key_names(&self) -> Result<Vec<String>> {
        let mut url = self.url(&format!("{}/keys", self.mount))?;
        url.query_pairs_mut().append_pair("list", "true");

        let response = self
            .client
            .get(url)
            .header(TOKEN_HEADER, self.token.expose_secret())
            .send()
            .await?;

        // The engine answers 404 when no keys exist yet
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let list: DataEnvelope<KeyList> = check(response, "failed to list transit keys")
            .await?
            .json()
            .await?;
        Ok(list.data.keys)
    }

    async fn public_key(&self, handle: &KeyHandle) -> Result<String> {
        let response = self
            .request(Method::GET, &self.key_path(handle))?
            .send()
            .await?;
        let info: DataEnvelope<KeyInfo> =
            check(response, &format!("failed to read transit key {}", handle.name()))
                .await?
                .json()
                .await?;

        latest_public_key(info.data.keys).ok_or_else(|| {
            Error::backend_msg(format!(
                "transit key {} has no public key",
                handle.name()
            ))
        })
    }
}

/// Fail with the engine's error messages on a non-success status
async fn check(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        _ => body,
    };
    Err(Error::backend_msg(format!(
        "{}: HTTP {}: {}",
        context, status, detail
    )))
}

/// Public key of the highest key version
fn latest_public_key(versions: HashMap<String, KeyVersion>) -> Option<String> {
    versions
        .into_iter()
        .filter_map(|(version, info)| Some((version.parse::<u64>().ok()?, info.public_key?)))
        .max_by_key(|(version, _)| *version)
        .map(|(_, public_key)| public_key)
}

/// Derive the account address from a transit public key
///
/// Accepts PEM encoded SubjectPublicKeyInfo, or base64 of either SEC1 point
/// bytes or DER SubjectPublicKeyInfo.
pub fn address_from_public_key(encoded: &str) -> Result<Address> {
    let encoded = encoded.trim();
    let public_key = if encoded.starts_with("-----BEGIN") {
        k256::PublicKey::from_public_key_pem(encoded)
            .map_err(|e| Error::backend("failed to parse PEM public key", e))?
    } else {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| Error::backend("public key is neither PEM nor base64", e))?;
        match k256::PublicKey::from_sec1_bytes(&bytes) {
            Ok(key) => key,
            Err(_) => k256::PublicKey::from_public_key_der(&bytes)
                .map_err(|e| Error::backend("failed to parse DER public key", e))?,
        }
    };

    let point = public_key.to_encoded_point(false);
    Ok(Address::from_raw_public_key(&point.as_bytes()[1..]))
}

/// Extract `(r, s)` from a transit signature string `vault:v<N>:<payload>`
///
/// The payload is base64 (URL-safe or standard) of either the raw 64-byte
/// `r || s` concatenation or an ASN.1 DER signature. High-s values are
/// normalized to the lower half of the curve order.
pub fn parse_transit_signature(signature: &str) -> Result<(U256, U256)> {
    let mut parts = signature.splitn(3, ':');
    let (prefix, version, payload) = match (parts.next(), parts.next(), parts.next()) {
        (Some(prefix), Some(version), Some(payload)) => (prefix, version, payload),
        _ => {
            return Err(Error::backend_msg(format!(
                "malformed transit signature: {}",
                signature
            )))
        }
    };
    if prefix != "vault" || !version.starts_with('v') {
        return Err(Error::backend_msg(format!(
            "unexpected transit signature prefix: {}:{}",
            prefix, version
        )));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .or_else(|_| STANDARD.decode(payload))
        .map_err(|e| Error::backend("failed to decode transit signature", e))?;

    let parsed = if bytes.len() == 64 {
        k256::ecdsa::Signature::from_slice(&bytes)
    } else {
        k256::ecdsa::Signature::from_der(&bytes)
    }
    .map_err(|e| Error::backend("invalid transit signature encoding", e))?;

    let normalized = parsed.normalize_s().unwrap_or(parsed);
    let (r, s) = normalized.split_bytes();
    Ok((U256::from_be_slice(&r), U256::from_be_slice(&s)))
}

#[async_trait]
impl KeyBackend for TransitBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vault
    }

    async fn existing_keys(&self) -> Result<Vec<(Address, KeyHandle)>> {
        let names = self.list_key_names().await?;
        if names.is_empty() {
            tracing::info!("No existing keys found in transit engine");
        }

        let mut keys = Vec::with_capacity(names.len());
        for name in names {
            let handle = KeyHandle::new(name);
            match self.derive_address(&handle).await {
                Ok(address) => {
                    tracing::info!(key = %handle.name(), %address, "Loaded transit key");
                    keys.push((address, handle));
                }
                Err(e) => {
                    tracing::warn!(key = %handle.name(), error = %e, "Skipping transit key without usable public key");
                }
            }
        }
        Ok(keys)
    }

    async fn provision_key(&self) -> Result<ProvisionedKey> {
        let handle = KeyHandle::new(format!("{}{}", KEY_NAME_PREFIX, uuid::Uuid::new_v4()));

        let response = self
            .request(Method::POST, &self.key_path(&handle))?
            .json(&CreateKeyRequest {
                key_type: &self.key_type,
            })
            .send()
            .await?;
        check(response, "failed to create transit key").await?;

        tracing::debug!(key = %handle.name(), "Created transit key");
        Ok(ProvisionedKey {
            handle,
            secret: None,
        })
    }

    async fn derive_address(&self, handle: &KeyHandle) -> Result<Address> {
        let public_key = self.public_key(handle).await?;
        address_from_public_key(&public_key)
    }

    async fn delete_key(&self, handle: &KeyHandle) -> Result<()> {
        let path = self.key_path(handle);

        let response = self
            .request(Method::POST, &format!("{}/config", path))?
            .json(&KeyConfigRequest {
                deletion_allowed: true,
            })
            .send()
            .await?;
        check(response, "failed to allow transit key deletion").await?;

        let response = self.request(Method::DELETE, &path)?.send().await?;
        check(response, "failed to delete transit key").await?;
        Ok(())
    }

    async fn sign_hash(
        &self,
        handle: &KeyHandle,
        hash: B256,
        _secret: Option<&SecretString>,
    ) -> Result<BackendSignature> {
        let response = self
            .request(Method::POST, &format!("{}/sign/{}", self.mount, handle.name()))?
            .json(&SignRequest {
                input: STANDARD.encode(hash.as_slice()),
                prehashed: true,
                marshaling_algorithm: "jws",
            })
            .send()
            .await?;
        let signed: DataEnvelope<SignResponse> =
            check(response, &format!("transit signing with {} failed", handle.name()))
                .await?
                .json()
                .await?;

        let (r, s) = parse_transit_signature(&signed.data.signature)?;
        Ok(BackendSignature::Detached { r, s })
    }
}
