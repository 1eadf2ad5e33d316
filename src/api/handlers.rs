//! REST handlers

use super::types::{
    CreateAccountResponse, ErrorResponse, HealthResponse, SignMessageRequest, SignMessageResponse,
    SignTransactionRequest, SignTransactionResponse,
};
use super::AppState;
use crate::Error;
use alloy::primitives::hex;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use secrecy::ExposeSecret;

// ==================== Error Handling ====================

pub struct ApiError(pub StatusCode, pub Json<ErrorResponse>);

impl ApiError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        ApiError(status, Json(ErrorResponse { error: msg.into() }))
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match &e {
            Error::Validation(_) | Error::InvalidSecret(_) => ApiError::bad_request(e.to_string()),
            Error::Auth(_) => ApiError::unauthorized(e.to_string()),
            Error::AccountNotFound(_) => ApiError::not_found(e.to_string()),
            Error::Backend { .. } | Error::Recovery { .. } | Error::Config(_) => {
                // Cause is logged, not returned
                match std::error::Error::source(&e) {
                    Some(cause) => tracing::error!(error = %e, cause = %cause, "Request failed"),
                    None => tracing::error!(error = %e, "Request failed"),
                }
                ApiError::internal(e.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

// ==================== Handlers ====================

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn list_accounts(State(state): State<AppState>) -> Json<Vec<String>> {
    let accounts = state.signer.keys().list_accounts().await;
    Json(
        accounts
            .into_iter()
            .map(|address| address.to_checksum(None))
            .collect(),
    )
}

pub async fn create_account(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateAccountResponse>), ApiError> {
    let account = state.signer.keys().create_key().await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateAccountResponse {
            address: account.address.to_checksum(None),
            secret: account
                .secret
                .as_ref()
                .map(|secret| secret.expose_secret().to_owned()),
        }),
    ))
}

pub async fn sign_transaction(
    State(state): State<AppState>,
    payload: Result<Json<SignTransactionRequest>, JsonRejection>,
) -> Result<Json<SignTransactionResponse>, ApiError> {
    let Json(request) = payload?;
    let chain_id = request.chain_id()?;
    let tx = request.to_transaction()?;

    let signed = state
        .signer
        .sign_transaction(request.from, &tx, chain_id, request.secret.as_ref())
        .await?;

    Ok(Json(SignTransactionResponse {
        raw_tx: format!("0x{}", hex::encode(&signed.raw)),
    }))
}

pub async fn sign_message(
    State(state): State<AppState>,
    payload: Result<Json<SignMessageRequest>, JsonRejection>,
) -> Result<Json<SignMessageResponse>, ApiError> {
    let Json(request) = payload?;

    let signature = state
        .signer
        .sign_message(
            request.from,
            request.message.as_bytes(),
            request.secret.as_ref(),
        )
        .await?;

    Ok(Json(SignMessageResponse {
        signature: signature.to_hex(),
    }))
}
