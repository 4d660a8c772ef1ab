// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ERC-20 balance lookups used for fee-exemption checks.

use std::str::FromStr;

use alloy::{
    primitives::{Address, U256},
    providers::Provider,
    sol,
};

use super::ledger::LedgerError;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
    }
}

/// ERC-20 contract wrapper.
pub struct Erc20Contract<P> {
    contract: IERC20::IERC20Instance<P>,
}

impl<P: Provider + Clone> Erc20Contract<P> {
    /// Create a new ERC-20 contract instance.
    pub fn new(provider: &P, contract_address: &str) -> Result<Self, LedgerError> {
        let address = Address::from_str(contract_address)
            .map_err(|e| LedgerError::InvalidAddress(e.to_string()))?;

        let contract = IERC20::new(address, provider.clone());

        Ok(Self { contract })
    }

    /// Get the raw balance of an address.
    pub async fn balance_of(&self, wallet_address: &str) -> Result<u128, LedgerError> {
        let addr = Address::from_str(wallet_address)
            .map_err(|e| LedgerError::InvalidAddress(e.to_string()))?;

        let balance: U256 = self
            .contract
            .balanceOf(addr)
            .call()
            .await
            .map_err(|e| LedgerError::classify(None, None, &e.to_string()))?;

        u128::try_from(balance)
            .map_err(|_| LedgerError::Server(format!("token balance out of range: {balance}")))
    }
}
