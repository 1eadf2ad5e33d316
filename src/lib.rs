//! Ethereum Signing Service
//!
//! Signs transactions and messages for accounts whose keys live in one of two
//! interchangeable backends:
//! - An encrypted on-disk keystore (one Web3 Secret Storage file per account)
//! - A remote transit engine that never reveals private keys
//!
//! # Security Model
//!
//! - Private keys never leave the backend that holds them
//! - Keystore secrets and tokens are held as `SecretString` and never logged
//! - Every API route except `/health` requires HMAC request authentication

pub mod api;
pub mod config;
pub mod keys;
pub mod wallet;

mod error;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{BackendKind, Config};
pub use error::{Error, Result};
pub use keys::KeyManager;
pub use wallet::Signer;
