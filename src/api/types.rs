//! Request and response bodies

use crate::wallet::{DynamicFeeTransaction, LegacyTransaction, Transaction};
use crate::{Error, Result};
use alloy::eips::eip2930::AccessList;
use alloy::primitives::{hex, Address, Bytes, U256};
use secrecy::SecretString;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Numeric quantity given as a JSON number, a decimal string or a 0x-hex string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quantity(pub U256);

impl FromStr for Quantity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some("") => return Err("empty hex quantity".to_string()),
            Some(digits) => U256::from_str_radix(digits, 16),
            None if s.is_empty() => return Err("empty quantity".to_string()),
            None => U256::from_str_radix(s, 10),
        };
        parsed
            .map(Quantity)
            .map_err(|e| format!("invalid quantity {:?}: {}", s, e))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Numbers keep their exact digits (arbitrary precision), so values
        // beyond u64 survive
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Number(n) => {
                let digits = n.to_string();
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(de::Error::custom(format!(
                        "quantity must be a non-negative integer, got {}",
                        digits
                    )));
                }
                U256::from_str_radix(&digits, 10)
                    .map(Quantity)
                    .map_err(|e| de::Error::custom(format!("invalid quantity {}: {}", digits, e)))
            }
            serde_json::Value::String(s) => s.parse().map_err(de::Error::custom),
            other => Err(de::Error::custom(format!(
                "expected a number or string quantity, got {}",
                other
            ))),
        }
    }
}

impl Quantity {
    fn to_u64(self, field: &str) -> Result<u64> {
        u64::try_from(self.0)
            .map_err(|_| Error::Validation(format!("{} does not fit in 64 bits", field)))
    }

    fn to_u128(self, field: &str) -> Result<u128> {
        u128::try_from(self.0)
            .map_err(|_| Error::Validation(format!("{} does not fit in 128 bits", field)))
    }
}

/// `to` may be omitted, null or empty for contract creation
fn deserialize_optional_address<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => Address::from_str(s.trim())
            .map(Some)
            .map_err(de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionRequest {
    pub from: Address,
    #[serde(default, deserialize_with = "deserialize_optional_address")]
    pub to: Option<Address>,
    #[serde(default)]
    pub nonce: Option<Quantity>,
    #[serde(default)]
    pub value: Option<Quantity>,
    /// 0x-hex calldata
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub gas_limit: Option<Quantity>,
    #[serde(default)]
    pub gas_price: Option<Quantity>,
    #[serde(default)]
    pub gas_fee_cap: Option<Quantity>,
    #[serde(default)]
    pub gas_tip_cap: Option<Quantity>,
    #[serde(default)]
    pub chain_id: Option<Quantity>,
    #[serde(default)]
    pub access_list: Option<AccessList>,
    #[serde(default)]
    pub secret: Option<SecretString>,
}

impl SignTransactionRequest {
    pub fn chain_id(&self) -> Result<u64> {
        self.chain_id
            .ok_or_else(|| Error::Validation("chainId is required".to_string()))?
            .to_u64("chainId")
    }

    /// Pick the transaction variant from the fee fields present
    ///
    /// `gasFeeCap` + `gasTipCap` select dynamic-fee, `gasPrice` alone selects
    /// legacy; every other combination is rejected.
    pub fn to_transaction(&self) -> Result<Transaction> {
        let nonce = self.nonce.unwrap_or_default().to_u64("nonce")?;
        let gas_limit = self.gas_limit.unwrap_or_default().to_u64("gasLimit")?;
        let value = self.value.unwrap_or_default().0;
        let data = decode_data(self.data.as_deref())?;

        match (self.gas_price, self.gas_fee_cap, self.gas_tip_cap) {
            (Some(gas_price), None, None) => {
                if self.access_list.is_some() {
                    return Err(Error::Validation(
                        "accessList is only supported for dynamic-fee transactions".to_string(),
                    ));
                }
                Ok(Transaction::Legacy(LegacyTransaction {
                    nonce,
                    gas_price: gas_price.to_u128("gasPrice")?,
                    gas_limit,
                    to: self.to,
                    value,
                    data,
                }))
            }
            (None, Some(fee_cap), Some(tip_cap)) => {
                Ok(Transaction::DynamicFee(DynamicFeeTransaction {
                    nonce,
                    gas_tip_cap: tip_cap.to_u128("gasTipCap")?,
                    gas_fee_cap: fee_cap.to_u128("gasFeeCap")?,
                    gas_limit,
                    to: self.to,
                    value,
                    data,
                    access_list: self.access_list.clone().unwrap_or_default(),
                }))
            }
            _ => Err(Error::Validation(
                "unsupported transaction shape: provide gasPrice, or both gasFeeCap and gasTipCap"
                    .to_string(),
            )),
        }
    }
}

fn decode_data(data: Option<&str>) -> Result<Bytes> {
    match data.map(str::trim) {
        None | Some("") | Some("0x") => Ok(Bytes::new()),
        Some(encoded) => hex::decode(encoded)
            .map(Bytes::from)
            .map_err(|e| Error::Validation(format!("data is not valid hex: {}", e))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageRequest {
    pub from: Address,
    /// Signed as its UTF-8 bytes
    pub message: String,
    #[serde(default)]
    pub secret: Option<SecretString>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountResponse {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionResponse {
    pub raw_tx: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageResponse {
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
