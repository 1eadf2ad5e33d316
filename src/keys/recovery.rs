//! Recovery id resolution for detached (r, s) signatures
//!
//! Remote signing oracles return only the (r, s) pair. Two public keys are
//! consistent with any such pair; the recovery id selects one of them. The
//! resolver tries both candidates and keeps the one whose address matches the
//! account the signature was requested for.

use crate::{Error, Result};
use alloy::primitives::{Address, Signature, B256, U256};

/// Candidate recovery ids, in the order they are tried
const CANDIDATES: [u8; 2] = [0, 1];

/// Determine which recovery id makes `(r, s)` recover to `expected`
///
/// Returns `0` or `1`. Fails with [`Error::Recovery`] when neither candidate
/// matches, which means the backend produced a signature for a different key
/// or the signature is corrupt. The result is never guessed.
pub fn resolve_recovery_id(hash: &B256, r: U256, s: U256, expected: Address) -> Result<u8> {
    for recovery_id in CANDIDATES {
        let candidate = Signature::new(r, s, recovery_id == 1);
        match candidate.recover_address_from_prehash(hash) {
            Ok(recovered) if recovered == expected => return Ok(recovery_id),
            Ok(recovered) => {
                tracing::trace!(recovery_id, %recovered, "Recovery candidate rejected");
            }
            Err(e) => {
                tracing::trace!(recovery_id, error = %e, "Public key recovery failed");
            }
        }
    }

    Err(Error::Recovery { expected })
}

/// Attach the resolved recovery id to a detached signature
pub fn recoverable_signature(hash: &B256, r: U256, s: U256, expected: Address) -> Result<Signature> {
    let recovery_id = resolve_recovery_id(hash, r, s, expected)?;
    Ok(Signature::new(r, s, recovery_id == 1))
}
