// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger integration for EVM-compatible chains.
//!
//! This module provides functionality for:
//! - Querying native and ERC-20 balances
//! - Signing value transfers with ephemeral hop keys
//! - Broadcasting and confirming transfers with bounded retry

pub mod client;
pub mod erc20;
pub mod ledger;
pub mod rpc;
pub mod signing;
pub mod types;

pub use client::EvmLedger;
pub use ledger::{Ledger, LedgerError};
pub use rpc::{ConfirmationPolicy, Retried, RetryPolicy, RpcClient};
pub use signing::SigningCapability;
pub use types::*;
