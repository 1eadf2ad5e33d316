//! Unsigned transaction variants and their signing hashes

use alloy::consensus::{SignableTransaction, TxEip1559, TxLegacy};
use alloy::eips::eip2930::AccessList;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};

/// Pre-EIP-2718 transaction, replay-protected with EIP-155
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` creates a contract
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

/// EIP-1559 fee-market transaction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DynamicFeeTransaction {
    pub nonce: u64,
    /// `maxPriorityFeePerGas`
    pub gas_tip_cap: u128,
    /// `maxFeePerGas`
    pub gas_fee_cap: u128,
    pub gas_limit: u64,
    /// `None` creates a contract
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub access_list: AccessList,
}

/// A transaction to be signed; the chain id travels alongside
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Legacy(LegacyTransaction),
    DynamicFee(DynamicFeeTransaction),
}

impl Transaction {
    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::Legacy(_) => "legacy",
            Transaction::DynamicFee(_) => "dynamic-fee",
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            Transaction::Legacy(tx) => tx.nonce,
            Transaction::DynamicFee(tx) => tx.nonce,
        }
    }

    /// Hash the key signs for this transaction on `chain_id`
    pub fn signing_hash(&self, chain_id: u64) -> B256 {
        match self {
            Transaction::Legacy(tx) => tx.to_consensus(chain_id).signature_hash(),
            Transaction::DynamicFee(tx) => tx.to_consensus(chain_id).signature_hash(),
        }
    }
}

fn tx_kind(to: Option<Address>) -> TxKind {
    match to {
        Some(address) => TxKind::Call(address),
        None => TxKind::Create,
    }
}

impl LegacyTransaction {
    /// Consensus form; hashing it yields the EIP-155 preimage
    /// `rlp(nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0)`
    pub(crate) fn to_consensus(&self, chain_id: u64) -> TxLegacy {
        TxLegacy {
            chain_id: Some(chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: tx_kind(self.to),
            value: self.value,
            input: self.data.clone(),
        }
    }
}

impl DynamicFeeTransaction {
    /// Consensus form; hashing it yields `keccak(0x02 || rlp(...))`
    pub(crate) fn to_consensus(&self, chain_id: u64) -> TxEip1559 {
        TxEip1559 {
            chain_id,
            nonce: self.nonce,
            gas_limit: self.gas_limit,
            max_fee_per_gas: self.gas_fee_cap,
            max_priority_fee_per_gas: self.gas_tip_cap,
            to: tx_kind(self.to),
            value: self.value,
            access_list: self.access_list.clone(),
            input: self.data.clone(),
        }
    }
}
