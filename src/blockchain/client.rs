// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM JSON-RPC ledger client.

use std::str::FromStr;

use alloy::{
    eips::eip2718::Encodable2718,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, TxHash, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    transports::{RpcError, TransportErrorKind},
};
use async_trait::async_trait;

use super::erc20::Erc20Contract;
use super::ledger::{Ledger, LedgerError};
use super::signing::SigningCapability;
use super::types::*;

/// Ledger client for an EVM-compatible chain.
pub struct EvmLedger {
    /// Network configuration
    network: NetworkConfig,
    /// Alloy HTTP provider (read-only, no wallet attached)
    provider: DynProvider,
}

impl EvmLedger {
    /// Create a new client for the specified network.
    pub fn new(network: NetworkConfig) -> Result<Self, LedgerError> {
        let url: url::Url = network
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| LedgerError::MalformedTransaction(format!(
                "Invalid RPC URL: {e}"
            )))?;

        let provider = ProviderBuilder::new().connect_http(url).erased();

        Ok(Self { network, provider })
    }

    /// Get the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        self.provider.get_gas_price().await.map_err(classify_rpc_error)
    }
}

#[async_trait]
impl Ledger for EvmLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.provider
            .get_block_number()
            .await
            .map_err(classify_rpc_error)
    }

    async fn balance(&self, address: &str) -> Result<u128, LedgerError> {
        let addr = parse_address(address)?;
        let balance = self
            .provider
            .get_balance(addr)
            .await
            .map_err(classify_rpc_error)?;
        u256_to_u128(balance)
    }

    async fn token_balance(&self, holder: &str, token: &str) -> Result<u128, LedgerError> {
        let contract = Erc20Contract::new(&self.provider, token)?;
        contract.balance_of(holder).await
    }

    async fn sign_transfer(
        &self,
        signer: &SigningCapability,
        request: &TransferRequest,
    ) -> Result<SignedTransfer, LedgerError> {
        let from = parse_address(signer.address())?;
        let to = parse_address(&request.to)?;

        // Legacy pricing keeps the sweep exact: cost = gas_limit * gas_price.
        let gas_price = self.gas_price().await?;
        let gas_cost = u128::from(TRANSFER_GAS_LIMIT)
            .checked_mul(gas_price)
            .ok_or_else(|| LedgerError::Server("gas cost overflow".to_string()))?;

        let value = match request.value {
            TransferValue::Exact(value) => value,
            TransferValue::Sweep => {
                let balance = self.balance(signer.address()).await?;
                balance.checked_sub(gas_cost).filter(|v| *v > 0).ok_or_else(|| {
                    LedgerError::InsufficientBalance(format!(
                        "balance {balance} does not cover gas {gas_cost}"
                    ))
                })?
            }
        };

        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_value(U256::from(value))
            .with_nonce(request.nonce)
            .with_chain_id(self.network.chain_id)
            .with_gas_limit(TRANSFER_GAS_LIMIT)
            .with_gas_price(gas_price);

        // The key is held only for this block.
        let envelope = {
            let wallet = EthereumWallet::from(signer.signer()?);
            tx.build(&wallet)
                .await
                .map_err(|e| LedgerError::Signature(e.to_string()))?
        };

        Ok(SignedTransfer {
            signature: format!("{:?}", envelope.tx_hash()),
            raw: format!("0x{}", alloy::hex::encode(envelope.encoded_2718())),
            from: signer.address().to_string(),
            to: request.to.clone(),
            value,
            nonce: request.nonce,
        })
    }

    async fn broadcast(&self, transfer: &SignedTransfer) -> Result<(), LedgerError> {
        let raw = alloy::hex::decode(&transfer.raw)
            .map_err(|e| LedgerError::MalformedTransaction(e.to_string()))?;

        match self.provider.send_raw_transaction(&raw).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.to_string().to_ascii_lowercase();
                // The node already has this exact transaction.
                if msg.contains("already known")
                    || msg.contains("known transaction")
                    || msg.contains("nonce too low")
                {
                    tracing::debug!(signature = %transfer.signature, "Transaction already known");
                    Ok(())
                } else {
                    Err(classify_rpc_error(e))
                }
            }
        }
    }

    async fn transaction_status(&self, signature: &str) -> Result<TxStatus, LedgerError> {
        let hash = TxHash::from_str(signature)
            .map_err(|e| LedgerError::MalformedTransaction(format!("Invalid tx hash: {e}")))?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(classify_rpc_error)?;

        let Some(receipt) = receipt else {
            return Ok(TxStatus::Unknown);
        };

        if !receipt.status() {
            return Ok(TxStatus::Reverted);
        }

        let Some(block_number) = receipt.block_number else {
            return Ok(TxStatus::Pending { confirmations: 0 });
        };

        let head = self.block_number().await?;
        let confirmations = head.saturating_sub(block_number) + 1;

        if confirmations >= self.network.confirmations {
            Ok(TxStatus::Confirmed { block_number })
        } else {
            Ok(TxStatus::Pending { confirmations })
        }
    }
}

fn parse_address(address: &str) -> Result<Address, LedgerError> {
    Address::from_str(address).map_err(|e| LedgerError::InvalidAddress(e.to_string()))
}

fn u256_to_u128(value: U256) -> Result<u128, LedgerError> {
    u128::try_from(value).map_err(|_| LedgerError::Server(format!("value out of range: {value}")))
}

/// Map an alloy transport failure onto the ledger error classes.
fn classify_rpc_error(error: RpcError<TransportErrorKind>) -> LedgerError {
    match &error {
        RpcError::ErrorResp(payload) => {
            LedgerError::classify(None, Some(payload.code), &payload.message)
        }
        RpcError::Transport(TransportErrorKind::HttpError(http)) => {
            LedgerError::classify(Some(http.status), None, &http.body)
        }
        RpcError::Transport(_) => LedgerError::Network(error.to_string()),
        RpcError::SerError(_) => LedgerError::MalformedTransaction(error.to_string()),
        _ => LedgerError::classify(None, None, &error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> NetworkConfig {
        NetworkConfig {
            name: "local".to_string(),
            chain_id: 31337,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            confirmations: 1,
        }
    }

    #[test]
    fn new_rejects_invalid_rpc_url() {
        let mut config = network();
        config.rpc_url = "not a url".to_string();
        assert!(EvmLedger::new(config).is_err());
    }

    #[test]
    fn new_accepts_http_url() {
        let ledger = EvmLedger::new(network()).unwrap();
        assert_eq!(ledger.network().chain_id, 31337);
    }

    #[test]
    fn classify_http_rate_limit() {
        let err = classify_rpc_error(RpcError::Transport(TransportErrorKind::HttpError(
            alloy::transports::HttpError {
                status: 429,
                body: "Too Many Requests".to_string(),
            },
        )));
        assert!(matches!(err, LedgerError::RateLimited(_)));
    }

    #[test]
    fn u256_conversion_checks_range() {
        assert_eq!(u256_to_u128(U256::from(42u64)).unwrap(), 42);
        assert!(u256_to_u128(U256::MAX).is_err());
    }
}
