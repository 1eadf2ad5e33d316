//! Transaction and message signing
//!
//! SECURITY NOTE:
//! - Private keys never reach this module; it only sees hashes and signatures
//! - Keystore secrets are passed through to the key manager and never logged

use super::transaction::Transaction;
use crate::keys::KeyManager;
use crate::{Error, Result};
use alloy::consensus::{SignableTransaction, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{eip191_hash_message, hex, keccak256, Address, Bytes, Signature, B256};
use secrecy::SecretString;
use std::sync::Arc;

/// An encoded, signed transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// EIP-2718 encoding (plain RLP for legacy transactions)
    pub raw: Bytes,
    pub hash: B256,
    /// Final `v`: EIP-155 value for legacy, bare parity for dynamic-fee
    pub v: u64,
    pub signature: Signature,
}

/// 65-byte `r || s || v` message signature, `v` in {27, 28}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSignature([u8; 65]);

impl MessageSignature {
    fn new(signature: &Signature) -> Self {
        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(&signature.r().to_be_bytes::<32>());
        bytes[32..64].copy_from_slice(&signature.s().to_be_bytes::<32>());
        bytes[64] = 27 + signature.v() as u8;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    pub fn v(&self) -> u8 {
        self.0[64]
    }

    /// 0x-prefixed hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

/// EIP-155 `v` for a legacy transaction
fn eip155_v(recovery_id: u8, chain_id: u64) -> Result<u64> {
    chain_id
        .checked_mul(2)
        .and_then(|v| v.checked_add(35 + u64::from(recovery_id)))
        .ok_or_else(|| Error::Validation(format!("chain id {} is out of range", chain_id)))
}

/// Signs on behalf of managed accounts
#[derive(Debug, Clone)]
pub struct Signer {
    keys: Arc<KeyManager>,
}

impl Signer {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Sign `tx` for `chain_id` with the key of `from`
    pub async fn sign_transaction(
        &self,
        from: Address,
        tx: &Transaction,
        chain_id: u64,
        secret: Option<&SecretString>,
    ) -> Result<SignedTransaction> {
        if chain_id == 0 {
            return Err(Error::Validation("chainId must be non-zero".to_string()));
        }

        let hash = tx.signing_hash(chain_id);
        let signature = self
            .keys
            .sign_transaction_hash(from, hash, secret)
            .await?;
        let recovery_id = signature.v() as u8;

        let (envelope, v) = match tx {
            Transaction::Legacy(legacy) => {
                let v = eip155_v(recovery_id, chain_id)?;
                let signed = legacy.to_consensus(chain_id).into_signed(signature);
                (TxEnvelope::Legacy(signed), v)
            }
            Transaction::DynamicFee(dynamic) => {
                let signed = dynamic.to_consensus(chain_id).into_signed(signature);
                (TxEnvelope::Eip1559(signed), u64::from(recovery_id))
            }
        };

        let raw = Bytes::from(envelope.encoded_2718());
        let tx_hash = keccak256(&raw);

        tracing::info!(
            %from,
            chain_id,
            kind = tx.kind(),
            nonce = tx.nonce(),
            tx_hash = %tx_hash,
            "Signed transaction"
        );

        Ok(SignedTransaction {
            raw,
            hash: tx_hash,
            v,
            signature,
        })
    }

    /// Sign `message` under the EIP-191 personal message prefix
    pub async fn sign_message(
        &self,
        from: Address,
        message: &[u8],
        secret: Option<&SecretString>,
    ) -> Result<MessageSignature> {
        let hash = eip191_hash_message(message);
        let signature = self.keys.sign_arbitrary_hash(from, hash, secret).await?;

        tracing::info!(%from, message_len = message.len(), "Signed message");
        Ok(MessageSignature::new(&signature))
    }
}
