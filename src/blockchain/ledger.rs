// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger collaborator boundary.
//!
//! The routing engine only talks to the chain through [`Ledger`]. The
//! production implementation is [`super::client::EvmLedger`]; tests use a
//! scripted in-memory ledger.

use async_trait::async_trait;

use super::signing::SigningCapability;
use super::types::{SignedTransfer, TransferRequest, TxStatus};

/// Errors surfaced by ledger operations, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    // Transient
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Confirmation timed out for {0}")]
    ConfirmationTimeout(String),

    // Fatal
    #[error("Malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Signing key has been retired")]
    KeyRetired,

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LedgerError> },
}

impl LedgerError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::RateLimited(_)
                | LedgerError::Network(_)
                | LedgerError::Server(_)
                | LedgerError::ConfirmationTimeout(_)
        )
    }

    /// Classify a raw RPC failure from its HTTP status, JSON-RPC code and
    /// message.
    pub fn classify(http_status: Option<u16>, rpc_code: Option<i64>, message: &str) -> Self {
        let msg = message.to_ascii_lowercase();
        let owned = message.to_string();

        if http_status == Some(429)
            || rpc_code == Some(-32005)
            || msg.contains("rate limit")
            || msg.contains("too many requests")
        {
            return LedgerError::RateLimited(owned);
        }
        if msg.contains("insufficient funds") || msg.contains("insufficient balance") {
            return LedgerError::InsufficientBalance(owned);
        }
        if msg.contains("invalid signature")
            || msg.contains("invalid sender")
            || msg.contains("signer")
        {
            return LedgerError::Signature(owned);
        }
        if msg.contains("execution reverted") {
            return LedgerError::Reverted(owned);
        }
        if rpc_code == Some(-32602)
            || rpc_code == Some(-32600)
            || msg.contains("invalid transaction")
            || msg.contains("intrinsic gas too low")
            || msg.contains("rlp")
        {
            return LedgerError::MalformedTransaction(owned);
        }
        if let Some(status) = http_status {
            if status >= 500 {
                return LedgerError::Server(owned);
            }
        }
        if matches!(rpc_code, Some(code) if (-32099..=-32000).contains(&code))
            || rpc_code == Some(-32603)
        {
            return LedgerError::Server(owned);
        }
        LedgerError::Network(owned)
    }
}

/// Read and submit access to the underlying ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current chain head.
    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// Native balance of an address in base units.
    async fn balance(&self, address: &str) -> Result<u128, LedgerError>;

    /// Total value received by a single-use account.
    ///
    /// Accounts used by the relay never spend before they are funded, so
    /// the balance is the received total until the first forward.
    async fn received_total(&self, address: &str) -> Result<u128, LedgerError> {
        self.balance(address).await
    }

    /// ERC-20 balance of `holder` for the token at `token`.
    async fn token_balance(&self, holder: &str, token: &str) -> Result<u128, LedgerError>;

    /// Sign a value transfer with the capability's key.
    async fn sign_transfer(
        &self,
        signer: &SigningCapability,
        request: &TransferRequest,
    ) -> Result<SignedTransfer, LedgerError>;

    /// Broadcast a signed transfer. Re-broadcasting an already known
    /// transaction succeeds.
    async fn broadcast(&self, transfer: &SignedTransfer) -> Result<(), LedgerError>;

    /// Inclusion state of a broadcast transaction.
    async fn transaction_status(&self, signature: &str) -> Result<TxStatus, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rate_limits_as_transient() {
        let err = LedgerError::classify(Some(429), None, "slow down");
        assert!(matches!(err, LedgerError::RateLimited(_)));
        assert!(err.is_transient());

        let err = LedgerError::classify(None, Some(-32005), "limit exceeded");
        assert!(matches!(err, LedgerError::RateLimited(_)));
    }

    #[test]
    fn classify_fatal_errors() {
        assert!(matches!(
            LedgerError::classify(None, Some(-32000), "insufficient funds for gas * price + value"),
            LedgerError::InsufficientBalance(_)
        ));
        assert!(matches!(
            LedgerError::classify(None, Some(-32000), "invalid sender"),
            LedgerError::Signature(_)
        ));
        assert!(matches!(
            LedgerError::classify(None, Some(-32602), "bad params"),
            LedgerError::MalformedTransaction(_)
        ));
        assert!(!LedgerError::classify(None, None, "rlp: expected input list").is_transient());
    }

    #[test]
    fn classify_server_and_network() {
        assert!(matches!(
            LedgerError::classify(Some(503), None, "unavailable"),
            LedgerError::Server(_)
        ));
        assert!(matches!(
            LedgerError::classify(None, None, "connection reset"),
            LedgerError::Network(_)
        ));
    }

    #[test]
    fn exhausted_retries_are_not_transient() {
        let err = LedgerError::RetriesExhausted {
            attempts: 3,
            last: Box::new(LedgerError::Network("down".into())),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("3 attempts"));
    }
}
