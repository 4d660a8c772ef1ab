// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger types, address validation and amount conversion.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Decimals of the native ledger asset (wei).
pub const NATIVE_DECIMALS: u8 = 18;

/// Gas consumed by a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Ledger network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: String,
    /// Chain ID
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Confirmation depth that counts as committed
    pub confirmations: u64,
}

/// Native balance of an address.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NativeBalance {
    /// Queried address
    pub wallet: String,
    /// Balance in the smallest unit (wei)
    pub balance_raw: String,
    /// Balance formatted with decimals
    pub balance_formatted: String,
}

/// Value of a transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferValue {
    /// Move exactly this many base units.
    Exact(#[serde(with = "amount_serde")] u128),
    /// Move the whole balance minus the transaction cost.
    Sweep,
}

/// A value transfer to be signed by an ephemeral account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub to: String,
    pub value: TransferValue,
    pub nonce: u64,
}

/// A transfer that has been signed but not necessarily broadcast.
///
/// The raw encoding is kept so the exact same transaction can be
/// re-broadcast without touching key material again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransfer {
    /// Transaction hash, used as the signature identifier.
    pub signature: String,
    /// 0x-prefixed EIP-2718 encoding.
    pub raw: String,
    pub from: String,
    pub to: String,
    #[serde(with = "amount_serde")]
    pub value: u128,
    pub nonce: u64,
}

/// On-chain state of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Not known to the node (dropped or not yet propagated).
    Unknown,
    /// Included, but not yet at the required depth.
    Pending { confirmations: u64 },
    /// Included at or beyond the required depth.
    Confirmed { block_number: u64 },
    /// Included and reverted.
    Reverted,
}

/// Amount parsing failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Invalid amount format")]
    Format,
    #[error("Too many decimal places (max {0})")]
    Precision(u8),
    #[error("Amount overflow")]
    Overflow,
}

/// Address validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Address must start with 0x")]
    MissingPrefix,
    #[error("Address must be 42 characters (0x + 40 hex)")]
    Length,
    #[error("Address must contain only hex characters")]
    NotHex,
}

/// A validated, lowercase ledger address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Validate and normalize a raw `0x` address.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let raw = raw.trim();
        if !raw.starts_with("0x") && !raw.starts_with("0X") {
            return Err(AddressError::MissingPrefix);
        }
        if raw.len() != 42 {
            return Err(AddressError::Length);
        }
        if !raw[2..].chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::NotHex);
        }
        Ok(Self(format!("0x{}", raw[2..].to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a human-readable amount to base units.
///
/// # Arguments
/// * `amount` - Amount as a string (e.g., "1.5")
/// * `decimals` - Number of decimals (18 for the native asset)
pub fn parse_amount(amount: &str, decimals: u8) -> Result<u128, AmountError> {
    let amount = amount.trim();
    let parts: Vec<&str> = amount.split('.').collect();

    if parts.len() > 2 || amount.is_empty() {
        return Err(AmountError::Format);
    }
    if !parts
        .iter()
        .all(|p| p.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(AmountError::Format);
    }
    if parts[0].is_empty() && parts.get(1).map_or(true, |d| d.is_empty()) {
        return Err(AmountError::Format);
    }

    let whole = if parts[0].is_empty() {
        0
    } else {
        parts[0].parse::<u128>().map_err(|_| AmountError::Overflow)?
    };

    let decimal_part = match parts.get(1) {
        Some(dec_str) if !dec_str.is_empty() => {
            if dec_str.len() > decimals as usize {
                return Err(AmountError::Precision(decimals));
            }
            // Pad with zeros to match decimals
            let padded = format!("{:0<width$}", dec_str, width = decimals as usize);
            padded.parse::<u128>().map_err(|_| AmountError::Format)?
        }
        _ => 0,
    };

    let multiplier = 10u128.pow(decimals as u32);
    whole
        .checked_mul(multiplier)
        .and_then(|w| w.checked_add(decimal_part))
        .ok_or(AmountError::Overflow)
}

/// Format base units to a human-readable amount.
pub fn format_amount(amount: u128, decimals: u8) -> String {
    if amount == 0 {
        return "0".to_string();
    }

    let divisor = 10u128.pow(decimals as u32);
    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder == 0 {
        whole.to_string()
    } else {
        let decimal_str = format!("{:0>width$}", remainder, width = decimals as usize);
        let trimmed = decimal_str.trim_end_matches('0');
        format!("{}.{}", whole, trimmed)
    }
}

/// Serialize `u128` base-unit amounts as decimal strings.
///
/// JSON consumers cannot represent 128-bit integers faithfully.
pub mod amount_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>().map_err(D::Error::custom)
    }

    /// Same encoding for optional amounts.
    pub mod option {
        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<u128>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_some(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u128>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|s| s.parse::<u128>().map_err(D::Error::custom))
                .transpose()
        }
    }
}
