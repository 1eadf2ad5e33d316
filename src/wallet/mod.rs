//! Transaction and message signing on behalf of managed accounts
//!
//! Builds the canonical signing hash, delegates to the key manager and
//! assembles the final signature or encoded transaction.

mod signer;
mod transaction;

pub use signer::{MessageSignature, SignedTransaction, Signer};
pub use transaction::{DynamicFeeTransaction, LegacyTransaction, Transaction};
