//! Test doubles shared by the unit tests

use crate::config::{BackendKind, VaultConfig};
use crate::keys::{BackendSignature, KeyBackend, KeyHandle, ProvisionedKey};
use crate::{Error, Result};
use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::SigningKey;
use k256::pkcs8::{EncodePublicKey, LineEnding};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// How [`FakeBackend`] reports signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMode {
    /// Recovery id included, like the local keystore
    Recoverable,
    /// Only (r, s), like the transit engine
    Detached,
}

/// Pauses the next address derivation until released
#[derive(Clone, Default)]
pub struct Gate {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// In-memory backend with failure injection
pub struct FakeBackend {
    mode: SignatureMode,
    keys: Mutex<HashMap<String, PrivateKeySigner>>,
    deleted: Mutex<Vec<KeyHandle>>,
    gate: Mutex<Option<Gate>>,
    counter: AtomicUsize,
    fail_derivation: AtomicBool,
    fail_deletion: AtomicBool,
    foreign_key: AtomicBool,
}

impl FakeBackend {
    pub fn new(mode: SignatureMode) -> Self {
        Self {
            mode,
            keys: Mutex::new(HashMap::new()),
            deleted: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            counter: AtomicUsize::new(0),
            fail_derivation: AtomicBool::new(false),
            fail_deletion: AtomicBool::new(false),
            foreign_key: AtomicBool::new(false),
        }
    }

    /// Add a key directly, as if it existed before startup
    pub fn insert_random_key(&self) -> Address {
        let signer = PrivateKeySigner::random();
        let address = signer.address();
        let name = self.next_name();
        self.keys.lock().unwrap().insert(name, signer);
        address
    }

    pub fn key_count(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    pub fn deleted(&self) -> Vec<KeyHandle> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn fail_derivation(&self, fail: bool) {
        self.fail_derivation.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletion(&self, fail: bool) {
        self.fail_deletion.store(fail, Ordering::SeqCst);
    }

    /// Sign with an unrelated key so recovery cannot succeed
    pub fn sign_with_foreign_key(&self, foreign: bool) {
        self.foreign_key.store(foreign, Ordering::SeqCst);
    }

    pub fn hold_derivation(&self) -> Gate {
        let gate = Gate::default();
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn next_name(&self) -> String {
        format!("fake-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn signer(&self, handle: &KeyHandle) -> Result<PrivateKeySigner> {
        self.keys
            .lock()
            .unwrap()
            .get(handle.name())
            .cloned()
            .ok_or_else(|| Error::backend_msg(format!("no key named {}", handle.name())))
    }
}

#[async_trait]
impl KeyBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn existing_keys(&self) -> Result<Vec<(Address, KeyHandle)>> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .iter()
            .map(|(name, signer)| (signer.address(), KeyHandle::new(name.clone())))
            .collect())
    }

    async fn provision_key(&self) -> Result<ProvisionedKey> {
        let name = self.next_name();
        self.keys
            .lock()
            .unwrap()
            .insert(name.clone(), PrivateKeySigner::random());
        Ok(ProvisionedKey {
            handle: KeyHandle::new(name),
            secret: None,
        })
    }

    async fn derive_address(&self, handle: &KeyHandle) -> Result<Address> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }

        if self.fail_derivation.load(Ordering::SeqCst) {
            return Err(Error::backend_msg("injected derivation failure"));
        }
        Ok(self.signer(handle)?.address())
    }

    async fn delete_key(&self, handle: &KeyHandle) -> Result<()> {
        if self.fail_deletion.load(Ordering::SeqCst) {
            return Err(Error::backend_msg("injected deletion failure"));
        }
        self.keys.lock().unwrap().remove(handle.name());
        self.deleted.lock().unwrap().push(handle.clone());
        Ok(())
    }

    async fn sign_hash(
        &self,
        handle: &KeyHandle,
        hash: B256,
        _secret: Option<&SecretString>,
    ) -> Result<BackendSignature> {
        let signer = if self.foreign_key.load(Ordering::SeqCst) {
            PrivateKeySigner::random()
        } else {
            self.signer(handle)?
        };
        let signature = signer
            .sign_hash_sync(&hash)
            .map_err(|e| Error::backend("fake signing failed", e))?;

        Ok(match self.mode {
            SignatureMode::Recoverable => BackendSignature::Recoverable(signature),
            SignatureMode::Detached => BackendSignature::Detached {
                r: signature.r(),
                s: signature.s(),
            },
        })
    }
}

pub const MOCK_VAULT_TOKEN: &str = "mock-root-token";
const MOCK_MOUNT: &str = "transit";

struct MockKey {
    signing_key: SigningKey,
    deletion_allowed: bool,
}

#[derive(Default)]
struct MockState {
    mounted: bool,
    keys: HashMap<String, MockKey>,
    fail_public_key_reads: bool,
}

type SharedMock = Arc<Mutex<MockState>>;

/// In-process transit engine speaking the subset of the Vault API we use
///
/// Signs with k256 and, like the real engine, returns only `(r, s)`.
pub struct MockTransit {
    address: std::net::SocketAddr,
    state: SharedMock,
}

impl MockTransit {
    pub async fn start() -> Self {
        let state = SharedMock::default();
        let app = Router::new()
            .route("/v1/sys/mounts", get(list_mounts))
            .route("/v1/sys/mounts/{path}", post(enable_mount))
            .route("/v1/transit/keys", get(list_keys))
            .route(
                "/v1/transit/keys/{name}",
                post(create_key).get(read_key).delete(delete_key),
            )
            .route("/v1/transit/keys/{name}/config", post(configure_key))
            .route("/v1/transit/sign/{name}", post(sign))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { address, state }
    }

    pub fn config(&self) -> VaultConfig {
        VaultConfig {
            address: format!("http://{}", self.address),
            token: Some(SecretString::from(MOCK_VAULT_TOKEN.to_string())),
            transit_path: MOCK_MOUNT.to_string(),
            request_timeout_secs: 5,
            ..Default::default()
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.state.lock().unwrap().mounted
    }

    pub fn key_count(&self) -> usize {
        self.state.lock().unwrap().keys.len()
    }

    pub fn fail_public_key_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_public_key_reads = fail;
    }
}

fn vault_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "errors": [message] }))).into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("X-Vault-Token")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == MOCK_VAULT_TOKEN)
        .unwrap_or(false)
}

async fn list_mounts(State(state): State<SharedMock>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return vault_error(StatusCode::FORBIDDEN, "permission denied");
    }
    let mut data = json!({ "sys/": { "type": "system" } });
    if state.lock().unwrap().mounted {
        data[format!("{}/", MOCK_MOUNT)] = json!({ "type": "transit" });
    }
    Json(json!({ "data": data })).into_response()
}

async fn enable_mount(
    State(state): State<SharedMock>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return vault_error(StatusCode::FORBIDDEN, "permission denied");
    }
    if path != MOCK_MOUNT {
        return vault_error(StatusCode::BAD_REQUEST, "unsupported mount");
    }
    state.lock().unwrap().mounted = true;
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
struct ListQuery {
    list: Option<String>,
}

async fn list_keys(
    State(state): State<SharedMock>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return vault_error(StatusCode::FORBIDDEN, "permission denied");
    }
    if query.list.as_deref() != Some("true") {
        return vault_error(StatusCode::METHOD_NOT_ALLOWED, "list required");
    }
    let state = state.lock().unwrap();
    if state.keys.is_empty() {
        return vault_error(StatusCode::NOT_FOUND, "no keys");
    }
    let names: Vec<&String> = state.keys.keys().collect();
    Json(json!({ "data": { "keys": names } })).into_response()
}

#[derive(Deserialize)]
struct CreateBody {
    #[serde(rename = "type")]
    key_type: String,
}

async fn create_key(
    State(state): State<SharedMock>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateBody>,
) -> Response {
    if !authorized(&headers) {
        return vault_error(StatusCode::FORBIDDEN, "permission denied");
    }
    if body.key_type != "secp256k1" {
        return vault_error(StatusCode::BAD_REQUEST, "unsupported key type");
    }
    let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
    state.lock().unwrap().keys.insert(
        name,
        MockKey {
            signing_key,
            deletion_allowed: false,
        },
    );
    StatusCode::NO_CONTENT.into_response()
}

async fn read_key(
    State(state): State<SharedMock>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return vault_error(StatusCode::FORBIDDEN, "permission denied");
    }
    let state = state.lock().unwrap();
    if state.fail_public_key_reads {
        return vault_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable");
    }
    let Some(signing_key) = state.keys.get(&name).map(|k| &k.signing_key) else {
        return vault_error(StatusCode::NOT_FOUND, "key not found");
    };
    let public_key = k256::PublicKey::from(signing_key.verifying_key());
    let pem = match public_key.to_public_key_pem(LineEnding::LF) {
        Ok(pem) => pem,
        Err(_) => return vault_error(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed"),
    };
    Json(json!({
        "data": {
            "name": name,
            "type": "ecdsa-secp256k1",
            "latest_version": 1,
            "keys": { "1": { "public_key": pem } }
        }
    }))
    .into_response()
}

#[derive(Deserialize)]
struct ConfigBody {
    deletion_allowed: bool,
}

async fn configure_key(
    State(state): State<SharedMock>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ConfigBody>,
) -> Response {
    if !authorized(&headers) {
        return vault_error(StatusCode::FORBIDDEN, "permission denied");
    }
    match state.lock().unwrap().keys.get_mut(&name) {
        Some(key) => {
            key.deletion_allowed = body.deletion_allowed;
            StatusCode::NO_CONTENT.into_response()
        }
        None => vault_error(StatusCode::NOT_FOUND, "key not found"),
    }
}

async fn delete_key(
    State(state): State<SharedMock>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return vault_error(StatusCode::FORBIDDEN, "permission denied");
    }
    let mut state = state.lock().unwrap();
    match state.keys.get(&name).map(|key| key.deletion_allowed) {
        Some(true) => {
            state.keys.remove(&name);
            StatusCode::NO_CONTENT.into_response()
        }
        Some(false) => vault_error(StatusCode::BAD_REQUEST, "deletion is not allowed for this key"),
        None => vault_error(StatusCode::NOT_FOUND, "key not found"),
    }
}

#[derive(Deserialize)]
struct SignBody {
    input: String,
    #[serde(default)]
    prehashed: bool,
    marshaling_algorithm: Option<String>,
}

async fn sign(
    State(state): State<SharedMock>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SignBody>,
) -> Response {
    if !authorized(&headers) {
        return vault_error(StatusCode::FORBIDDEN, "permission denied");
    }
    if !body.prehashed || body.marshaling_algorithm.as_deref() != Some("jws") {
        return vault_error(StatusCode::BAD_REQUEST, "expected prehashed jws request");
    }
    let Ok(prehash) = STANDARD.decode(&body.input) else {
        return vault_error(StatusCode::BAD_REQUEST, "input is not base64");
    };

    let state = state.lock().unwrap();
    let Some(signing_key) = state.keys.get(&name).map(|k| &k.signing_key) else {
        return vault_error(StatusCode::NOT_FOUND, &format!("signing key {} not found", name));
    };
    let signature: k256::ecdsa::Signature = match signing_key.sign_prehash(&prehash) {
        Ok(signature) => signature,
        Err(_) => return vault_error(StatusCode::BAD_REQUEST, "invalid prehash"),
    };

    let encoded = URL_SAFE_NO_PAD.encode(signature.to_bytes());
    Json(json!({ "data": { "signature": format!("vault:v1:{}", encoded), "key_version": 1 } }))
        .into_response()
}
