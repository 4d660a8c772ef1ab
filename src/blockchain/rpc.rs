// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Retrying wrapper around the [`Ledger`].
//!
//! Every read and submit goes through [`RpcClient::call`]: transient failures
//! (rate limits, network and server errors) are retried with exponential
//! backoff plus jitter, fatal failures abort on the first attempt. A
//! transient error that outlives the attempt budget is returned as
//! [`LedgerError::RetriesExhausted`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use super::ledger::{Ledger, LedgerError};
use super::signing::SigningCapability;
use super::types::{SignedTransfer, TransferRequest, TxStatus};
use crate::routing::entropy::Entropy;

/// Bounded retry policy for ledger calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Result of a retried call together with the attempts it consumed.
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T, LedgerError>,
    pub attempts: u32,
}

impl<T> Retried<T> {
    pub fn into_result(self) -> Result<T, LedgerError> {
        self.result
    }
}

/// Confirmation settings for submitted transactions.
#[derive(Debug, Clone)]
pub struct ConfirmationPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Ledger access with bounded retry.
pub struct RpcClient {
    ledger: Arc<dyn Ledger>,
    policy: RetryPolicy,
    confirmation: ConfirmationPolicy,
    entropy: Entropy,
}

impl RpcClient {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        policy: RetryPolicy,
        confirmation: ConfirmationPolicy,
        entropy: Entropy,
    ) -> Self {
        Self {
            ledger,
            policy,
            confirmation,
            entropy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `f` until it succeeds, fails fatally, or the budget is spent.
    pub async fn call<T, F, Fut>(&self, op: &'static str, mut f: F) -> Retried<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match f().await {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let base = self.policy.backoff(attempt);
                    let delay = base + self.entropy.backoff_jitter(base);
                    tracing::warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Ledger call failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(op, attempt, error = %e, "Ledger call retries exhausted");
                    return Retried {
                        result: Err(LedgerError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        }),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    tracing::warn!(op, attempt, error = %e, "Ledger call failed fatally");
                    return Retried {
                        result: Err(e),
                        attempts: attempt,
                    };
                }
            }
        }
    }

    pub async fn block_number(&self) -> Result<u64, LedgerError> {
        self.call("block_number", || self.ledger.block_number())
            .await
            .into_result()
    }

    pub async fn balance(&self, address: &str) -> Result<u128, LedgerError> {
        self.call("balance", || self.ledger.balance(address))
            .await
            .into_result()
    }

    pub async fn received_total(&self, address: &str) -> Result<u128, LedgerError> {
        self.call("received_total", || self.ledger.received_total(address))
            .await
            .into_result()
    }

    pub async fn token_balance(&self, holder: &str, token: &str) -> Result<u128, LedgerError> {
        self.call("token_balance", || self.ledger.token_balance(holder, token))
            .await
            .into_result()
    }

    pub async fn sign_transfer(
        &self,
        signer: &SigningCapability,
        request: &TransferRequest,
    ) -> Result<SignedTransfer, LedgerError> {
        self.call("sign_transfer", || self.ledger.sign_transfer(signer, request))
            .await
            .into_result()
    }

    /// Broadcast with retry; the attempt count is reported to the caller.
    pub async fn broadcast(&self, transfer: &SignedTransfer) -> Retried<()> {
        self.call("broadcast", || self.ledger.broadcast(transfer))
            .await
    }

    /// Poll until the transaction reaches the configured commitment depth.
    pub async fn await_confirmation(&self, signature: &str) -> Result<u64, LedgerError> {
        let deadline = Instant::now() + self.confirmation.timeout;

        loop {
            let status = self
                .call("transaction_status", || {
                    self.ledger.transaction_status(signature)
                })
                .await
                .into_result()?;

            match status {
                TxStatus::Confirmed { block_number } => return Ok(block_number),
                TxStatus::Reverted => {
                    return Err(LedgerError::Reverted(signature.to_string()));
                }
                TxStatus::Unknown | TxStatus::Pending { .. } => {}
            }

            if Instant::now() >= deadline {
                return Err(LedgerError::ConfirmationTimeout(signature.to_string()));
            }
            sleep(self.confirmation.poll_interval).await;
        }
    }
}
