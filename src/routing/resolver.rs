// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Destination alias resolution and fee exemption lookups.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::blockchain::{Address, LedgerError, RpcClient};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Failed to load name directory: {0}")]
    Load(String),

    #[error("Name service unavailable: {0}")]
    Unavailable(String),
}

/// Resolves human-readable aliases (e.g. `alice.pay`) to raw addresses.
#[async_trait]
pub trait DomainResolver: Send + Sync {
    /// `Ok(None)` when the alias is not registered.
    async fn resolve(&self, name: &str) -> Result<Option<String>, ResolveError>;
}

/// Alias directory loaded from a JSON object of `name -> address`.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    entries: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, address)| (name.trim().to_lowercase(), address))
                .collect(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ResolveError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ResolveError::Load(format!("{}: {e}", path.display())))?;
        let entries: HashMap<String, String> =
            serde_json::from_str(&content).map_err(|e| ResolveError::Load(e.to_string()))?;
        Ok(Self::new(entries))
    }
}

#[async_trait]
impl DomainResolver for StaticDirectory {
    async fn resolve(&self, name: &str) -> Result<Option<String>, ResolveError> {
        Ok(self.entries.get(&name.trim().to_lowercase()).cloned())
    }
}

/// Whether a sender is exempt from the relay fee.
#[async_trait]
pub trait FeeExemption: Send + Sync {
    async fn is_exempt(&self, sender: &str) -> Result<bool, LedgerError>;
}

/// Everyone pays.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExemption;

#[async_trait]
impl FeeExemption for NoExemption {
    async fn is_exempt(&self, _sender: &str) -> Result<bool, LedgerError> {
        Ok(false)
    }
}

/// Holders of at least `min_balance` of an ERC-20 token are exempt.
pub struct TokenHolderExemption {
    rpc: Arc<RpcClient>,
    token: Address,
    min_balance: u128,
}

impl TokenHolderExemption {
    pub fn new(rpc: Arc<RpcClient>, token: Address, min_balance: u128) -> Self {
        Self {
            rpc,
            token,
            min_balance,
        }
    }
}

#[async_trait]
impl FeeExemption for TokenHolderExemption {
    async fn is_exempt(&self, sender: &str) -> Result<bool, LedgerError> {
        let held = self.rpc.token_balance(sender, self.token.as_str()).await?;
        Ok(held >= self.min_balance.max(1))
    }
}
