// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::blockchain::{Ledger, RpcClient};
use crate::config::EngineConfig;
use crate::routing::compliance::{
    ComplianceError, ComplianceGate, HttpSanctionsSource, SanctionsSource, StaticSanctionsList,
};
use crate::routing::resolver::{
    DomainResolver, FeeExemption, NoExemption, ResolveError, StaticDirectory,
    TokenHolderExemption,
};
use crate::routing::{Entropy, KeyLifecycleManager, PlanManager, RoutingContext};
use crate::storage::{AuditLog, EncryptedStorage, PlanStore, StorageError, StoragePaths, StoreError};

/// Timeout for a single sanctions screening request.
const SCREENING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Storage initialization failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Plan store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Sanctions source unavailable: {0}")]
    Compliance(#[from] ComplianceError),

    #[error("Name directory unavailable: {0}")]
    Directory(#[from] ResolveError),
}

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PlanManager>,
    pub rpc: Arc<RpcClient>,
    pub storage: Arc<EncryptedStorage>,
}

impl AppState {
    /// Wire the engine over `ledger` from configuration.
    pub fn build(
        config: &EngineConfig,
        ledger: Arc<dyn Ledger>,
        shutdown: CancellationToken,
    ) -> Result<Self, StartupError> {
        let paths = StoragePaths::new(&config.data_dir);
        let store = Arc::new(PlanStore::open(&paths.plan_db())?);
        let mut storage = EncryptedStorage::new(paths);
        storage.initialize()?;
        let storage = Arc::new(storage);
        let audit = AuditLog::new(storage.clone());

        let entropy = match config.rng_seed {
            Some(seed) => Entropy::seeded(seed),
            None => Entropy::from_os(),
        };
        let rpc = Arc::new(RpcClient::new(
            ledger,
            config.retry.clone(),
            config.confirmation.clone(),
            entropy.clone(),
        ));
        let keys = Arc::new(KeyLifecycleManager::new(
            store.clone(),
            storage.clone(),
            audit.clone(),
        ));

        let sanctions: Arc<dyn SanctionsSource> = match (
            &config.compliance.sanctions_api_url,
            &config.compliance.sanctions_list_path,
        ) {
            (Some(url), _) => Arc::new(HttpSanctionsSource::new(url.clone(), SCREENING_TIMEOUT)?),
            (None, Some(path)) => {
                let list = StaticSanctionsList::from_file(path)?;
                tracing::info!(entries = list.len(), "Loaded sanctions list");
                Arc::new(list)
            }
            (None, None) => Arc::new(StaticSanctionsList::default()),
        };
        let compliance = Arc::new(ComplianceGate::new(
            sanctions,
            config.compliance.cache_capacity,
            config.compliance.cache_ttl,
        ));

        let resolver: Arc<dyn DomainResolver> = match &config.name_directory_path {
            Some(path) => Arc::new(StaticDirectory::from_file(path)?),
            None => Arc::new(StaticDirectory::default()),
        };
        let exemption: Arc<dyn FeeExemption> = match &config.fee_exemption {
            Some(exempt) => Arc::new(TokenHolderExemption::new(
                rpc.clone(),
                exempt.token.clone(),
                exempt.min_balance,
            )),
            None => Arc::new(NoExemption),
        };

        let ctx = RoutingContext {
            config: Arc::new(config.routing.clone()),
            store,
            keys,
            rpc: rpc.clone(),
            audit,
            entropy,
        };
        let manager = Arc::new(PlanManager::new(
            ctx, compliance, resolver, exemption, shutdown,
        ));

        Ok(Self {
            manager,
            rpc,
            storage,
        })
    }
}
