//! Error types for the signing service

use alloy::primitives::Address;
use thiserror::Error;

/// Boxed cause carried by backend failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, missing field or unsupported transaction shape
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Account not found or not managed by this signer: {0}")]
    AccountNotFound(Address),

    /// The keystore secret supplied for a local account did not unlock it
    #[error("Invalid secret for account {0}")]
    InvalidSecret(Address),

    #[error("Backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Neither recovery candidate reproduced the expected signer
    #[error("Could not find a recovery id that reproduces address {expected}")]
    Recovery { expected: Address },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Backend failure with the underlying cause preserved
    pub fn backend(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Backend {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// Backend failure without an underlying error value
    pub fn backend_msg(context: impl Into<String>) -> Self {
        Error::Backend {
            context: context.into(),
            source: None,
        }
    }

    /// Whether the error was caused by the caller rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::AccountNotFound(_)
                | Error::InvalidSecret(_)
                | Error::Auth(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::backend("transit engine request failed", e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::backend("I/O failure", e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
