// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for unit tests: temp storage, a scripted in-memory
//! ledger and a fully wired engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::blockchain::{
    parse_amount, Address, ConfirmationPolicy, Ledger, LedgerError, RetryPolicy, RpcClient,
    SignedTransfer, SigningCapability, TransferRequest, TransferValue, TxStatus,
    NATIVE_DECIMALS,
};
use crate::config::RoutingConfig;
use crate::routing::compliance::{ComplianceGate, StaticSanctionsList};
use crate::routing::entropy::Entropy;
use crate::routing::keys::KeyLifecycleManager;
use crate::routing::manager::PlanManager;
use crate::routing::resolver::{NoExemption, StaticDirectory};
use crate::routing::RoutingContext;
use crate::storage::{AuditLog, EncryptedStorage, PlanStore, StoragePaths};

/// Gas cost the mock charges per transfer (21000 gas at 1 wei).
pub(crate) const MOCK_GAS_COST: u128 = 21_000;

pub(crate) const FEE_COLLECTOR: &str = "0x5555555555555555555555555555555555555555";
pub(crate) const SENDER: &str = "0x1111111111111111111111111111111111111111";
pub(crate) const DESTINATION: &str = "0x2222222222222222222222222222222222222222";
pub(crate) const SANCTIONED: &str = "0x000000000000000000000000000000000000dead";

pub(crate) fn eth(amount: &str) -> u128 {
    parse_amount(amount, NATIVE_DECIMALS).unwrap()
}

/// Temp data directory with an open plan store, key storage and audit log.
pub(crate) struct TestDirs {
    pub _temp: TempDir,
    pub store: Arc<PlanStore>,
    pub storage: Arc<EncryptedStorage>,
    pub audit: AuditLog,
}

impl TestDirs {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let paths = StoragePaths::new(temp.path());
        let store = Arc::new(PlanStore::open(&paths.plan_db()).unwrap());
        let mut storage = EncryptedStorage::new(paths);
        storage.initialize().unwrap();
        let storage = Arc::new(storage);
        let audit = AuditLog::new(storage.clone());
        Self {
            _temp: temp,
            store,
            storage,
            audit,
        }
    }
}

#[derive(Default)]
struct MockState {
    balances: HashMap<String, u128>,
    token_balances: HashMap<(String, String), u128>,
    /// Signatures in first-broadcast order.
    seen: Vec<String>,
    /// Queued failures keyed by 1-based first-broadcast ordinal.
    scripts: HashMap<usize, VecDeque<LedgerError>>,
    applied: Vec<SignedTransfer>,
    applied_signatures: HashSet<String>,
    spent_nonces: HashSet<(String, u64)>,
    broadcast_calls: usize,
    failing_reads: Option<LedgerError>,
}

/// In-memory ledger with deterministic signatures and scripted failures.
pub(crate) struct MockLedger {
    state: Mutex<MockState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn credit(&self, address: &str, amount: u128) {
        let mut state = self.state.lock().unwrap();
        *state.balances.entry(address.to_lowercase()).or_default() += amount;
    }

    pub fn set_token_balance(&self, holder: &str, token: &str, amount: u128) {
        self.state
            .lock()
            .unwrap()
            .token_balances
            .insert((holder.to_lowercase(), token.to_lowercase()), amount);
    }

    /// Fail the `ordinal`-th distinct transaction's broadcasts with `errors`,
    /// one per call, before letting it through.
    pub fn script_broadcast(&self, ordinal: usize, errors: Vec<LedgerError>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(ordinal, errors.into());
    }

    /// Make balance reads fail until cleared with `None`.
    pub fn fail_reads(&self, error: Option<LedgerError>) {
        self.state.lock().unwrap().failing_reads = error;
    }

    pub fn balance_of(&self, address: &str) -> u128 {
        let state = self.state.lock().unwrap();
        state
            .balances
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn applied(&self) -> Vec<SignedTransfer> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn transfers_from(&self, address: &str) -> Vec<SignedTransfer> {
        let address = address.to_lowercase();
        self.applied()
            .into_iter()
            .filter(|t| t.from == address)
            .collect()
    }

    pub fn broadcast_calls(&self) -> usize {
        self.state.lock().unwrap().broadcast_calls
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        Ok(self.state.lock().unwrap().applied.len() as u64)
    }

    async fn balance(&self, address: &str) -> Result<u128, LedgerError> {
        if let Some(err) = self.state.lock().unwrap().failing_reads.clone() {
            return Err(err);
        }
        Ok(self.balance_of(address))
    }

    async fn token_balance(&self, holder: &str, token: &str) -> Result<u128, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .token_balances
            .get(&(holder.to_lowercase(), token.to_lowercase()))
            .copied()
            .unwrap_or(0))
    }

    async fn sign_transfer(
        &self,
        signer: &SigningCapability,
        request: &TransferRequest,
    ) -> Result<SignedTransfer, LedgerError> {
        signer.signer()?;
        let from = signer.address().to_string();
        let value = match request.value {
            TransferValue::Exact(value) => value,
            TransferValue::Sweep => self
                .balance_of(&from)
                .checked_sub(MOCK_GAS_COST)
                .filter(|v| *v > 0)
                .ok_or_else(|| LedgerError::InsufficientBalance(from.clone()))?,
        };
        Ok(SignedTransfer {
            signature: format!("0xsig-{from}-{}", request.nonce),
            raw: format!("0xraw-{from}-{}-{value}-{}", request.to, request.nonce),
            from,
            to: request.to.to_lowercase(),
            value,
            nonce: request.nonce,
        })
    }

    async fn broadcast(&self, transfer: &SignedTransfer) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.broadcast_calls += 1;

        if state.applied_signatures.contains(&transfer.signature) {
            return Ok(());
        }

        let ordinal = match state.seen.iter().position(|s| *s == transfer.signature) {
            Some(pos) => pos + 1,
            None => {
                state.seen.push(transfer.signature.clone());
                state.seen.len()
            }
        };
        if let Some(err) = state.scripts.get_mut(&ordinal).and_then(VecDeque::pop_front) {
            return Err(err);
        }

        if !state
            .spent_nonces
            .insert((transfer.from.clone(), transfer.nonce))
        {
            return Err(LedgerError::MalformedTransaction("nonce too low".into()));
        }
        let available = state.balances.get(&transfer.from).copied().unwrap_or(0);
        let debit = transfer.value + MOCK_GAS_COST;
        if available < debit {
            return Err(LedgerError::InsufficientBalance(transfer.from.clone()));
        }
        state.balances.insert(transfer.from.clone(), available - debit);
        *state.balances.entry(transfer.to.clone()).or_default() += transfer.value;
        state.applied_signatures.insert(transfer.signature.clone());
        state.applied.push(transfer.clone());
        Ok(())
    }

    async fn transaction_status(&self, signature: &str) -> Result<TxStatus, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(
            match state.applied.iter().position(|t| t.signature == signature) {
                Some(pos) => TxStatus::Confirmed {
                    block_number: pos as u64 + 1,
                },
                None => TxStatus::Unknown,
            },
        )
    }
}

/// Retry policy with millisecond backoff so tests stay fast.
pub(crate) fn fast_rpc(ledger: Arc<MockLedger>, entropy: Entropy) -> Arc<RpcClient> {
    Arc::new(RpcClient::new(
        ledger,
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        },
        ConfirmationPolicy {
            timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(2),
        },
        entropy,
    ))
}

/// Production defaults with zero jitter.
pub(crate) fn routing_config() -> RoutingConfig {
    RoutingConfig {
        fee_collector: Address::parse(FEE_COLLECTOR).unwrap(),
        fee_bps: 100,
        min_hops: 7,
        max_hops: 12,
        jitter_min_ms: 0,
        jitter_max_ms: 0,
        funding_window: Duration::from_secs(600),
        funding_tolerance_bps: 50,
        min_transfer_amount: eth("0.001"),
        max_hop_attempts: 6,
        step_lease: Duration::from_secs(300),
        estimated_confirmation_ms: 2000,
    }
}

/// A complete engine over a [`MockLedger`].
pub(crate) struct TestEngine {
    pub dirs: TestDirs,
    pub ledger: Arc<MockLedger>,
    pub ctx: RoutingContext,
    pub manager: Arc<PlanManager>,
    pub shutdown: CancellationToken,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(routing_config())
    }

    pub fn with_config(config: RoutingConfig) -> Self {
        let dirs = TestDirs::new();
        let ledger = Arc::new(MockLedger::new());
        let entropy = Entropy::seeded(42);
        let rpc = fast_rpc(ledger.clone(), entropy.clone());
        let keys = Arc::new(KeyLifecycleManager::new(
            dirs.store.clone(),
            dirs.storage.clone(),
            dirs.audit.clone(),
        ));
        let ctx = RoutingContext {
            config: Arc::new(config),
            store: dirs.store.clone(),
            keys,
            rpc,
            audit: dirs.audit.clone(),
            entropy,
        };
        let compliance = Arc::new(ComplianceGate::new(
            Arc::new(StaticSanctionsList::new([SANCTIONED])),
            64,
            Duration::from_secs(60),
        ));
        let directory = StaticDirectory::new(HashMap::from([(
            "alice.pay".to_string(),
            DESTINATION.to_string(),
        )]));
        let shutdown = CancellationToken::new();
        let manager = Arc::new(PlanManager::new(
            ctx.clone(),
            compliance,
            Arc::new(directory),
            Arc::new(NoExemption),
            shutdown.clone(),
        ));
        Self {
            dirs,
            ledger,
            ctx,
            manager,
            shutdown,
        }
    }

    /// Create a plan for `amount` and fund its deposit account in full.
    pub async fn funded_plan(&self, amount: &str) -> String {
        let plan = self
            .manager
            .create_plan(SENDER, DESTINATION, amount)
            .await
            .unwrap();
        self.ledger.credit(&plan.deposit_address, plan.amount);
        plan.plan_id
    }
}
