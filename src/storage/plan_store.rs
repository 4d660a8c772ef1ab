// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded plan database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `plans`: plan_id → serialized TransferPlan
//! - `routing_steps`: `plan_id|hop` → serialized RoutingStep (current record)
//! - `step_attempts`: `plan_id|hop|seq` → serialized StepAttempt (append-only)
//! - `ephemeral_accounts`: `plan_id|hop` → serialized EphemeralAccount
//! - `account_index`: address → `plan_id|hop`
//!
//! ## Check-and-set
//!
//! Every record carries the `revision` it was read at. A write commits only
//! if the stored revision still matches, inside a single write transaction,
//! and bumps the revision by one. A stale write fails with
//! [`StoreError::Conflict`] and leaves the database untouched.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableHandle};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::routing::keys::EphemeralAccount;
use crate::routing::plan::TransferPlan;
use crate::routing::step::{RoutingStep, StepAttempt};

// =============================================================================
// Table Definitions
// =============================================================================

/// Tables holding JSON-encoded records keyed by string.
type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

const PLANS: JsonTable = TableDefinition::new("plans");

const ROUTING_STEPS: JsonTable = TableDefinition::new("routing_steps");

const STEP_ATTEMPTS: JsonTable = TableDefinition::new("step_attempts");

const EPHEMERAL_ACCOUNTS: JsonTable = TableDefinition::new("ephemeral_accounts");

const ACCOUNT_INDEX: TableDefinition<&str, &str> = TableDefinition::new("account_index");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("write conflict on {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Keys and revisions
// =============================================================================

fn hop_key(plan_id: &str, hop_index: u8) -> String {
    format!("{plan_id}|{hop_index:04}")
}

/// Half-open range covering every key that starts with `prefix|`.
fn prefix_range(prefix: &str) -> (String, String) {
    (format!("{prefix}|"), format!("{prefix}}}"))
}

/// Records guarded by optimistic concurrency.
trait Revisioned: Serialize + Clone {
    fn revision(&self) -> u64;
    fn set_revision(&mut self, revision: u64);
}

macro_rules! revisioned {
    ($($ty:ty),*) => {
        $(impl Revisioned for $ty {
            fn revision(&self) -> u64 {
                self.revision
            }
            fn set_revision(&mut self, revision: u64) {
                self.revision = revision;
            }
        })*
    };
}

revisioned!(TransferPlan, RoutingStep, EphemeralAccount);

#[derive(Deserialize)]
struct RevisionProbe {
    #[serde(default)]
    revision: u64,
}

fn stored_revision(bytes: &[u8]) -> StoreResult<u64> {
    Ok(serde_json::from_slice::<RevisionProbe>(bytes)?.revision)
}

// =============================================================================
// PlanStore
// =============================================================================

/// Durable keyed state for plans, hops and ephemeral accounts.
pub struct PlanStore {
    db: Database,
}

impl PlanStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PLANS)?;
            let _ = write_txn.open_table(ROUTING_STEPS)?;
            let _ = write_txn.open_table(STEP_ATTEMPTS)?;
            let _ = write_txn.open_table(EPHEMERAL_ACCOUNTS)?;
            let _ = write_txn.open_table(ACCOUNT_INDEX)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Write `record` at `key` if its revision matches the stored one.
    ///
    /// Revision 0 means "must not exist yet".
    fn compare_and_set<T: Revisioned>(
        &self,
        table_def: JsonTable,
        key: &str,
        record: &T,
    ) -> StoreResult<T> {
        let mut next = record.clone();
        next.set_revision(record.revision() + 1);
        let json = serde_json::to_vec(&next)?;

        let write_txn = self.db.begin_write()?;
        let committed = {
            let mut table = write_txn.open_table(table_def)?;
            let current = match table.get(key)? {
                Some(value) => Some(stored_revision(value.value())?),
                None => None,
            };
            let matches = match current {
                None => record.revision() == 0,
                Some(rev) => rev == record.revision(),
            };
            if matches {
                table.insert(key, json.as_slice())?;
            }
            matches
        };

        if !committed {
            write_txn.abort()?;
            return Err(StoreError::Conflict(format!(
                "{}:{key}",
                table_def.name()
            )));
        }
        write_txn.commit()?;
        Ok(next)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        table_def: JsonTable,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        match table.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn scan_prefix<T: DeserializeOwned>(
        &self,
        table_def: JsonTable,
        prefix: &str,
    ) -> StoreResult<Vec<T>> {
        let (start, end) = prefix_range(prefix);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;

        let mut records = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }

    // =========================================================================
    // Plans
    // =========================================================================

    /// Persist a new plan. Fails with `Conflict` if the id is taken.
    pub fn insert_plan(&self, plan: &TransferPlan) -> StoreResult<TransferPlan> {
        let mut fresh = plan.clone();
        fresh.revision = 0;
        self.compare_and_set(PLANS, &plan.plan_id, &fresh)
    }

    /// Replace a plan read at `plan.revision`.
    pub fn update_plan(&self, plan: &TransferPlan) -> StoreResult<TransferPlan> {
        if plan.revision == 0 {
            return Err(StoreError::Conflict(format!("plans:{}", plan.plan_id)));
        }
        self.compare_and_set(PLANS, &plan.plan_id, plan)
    }

    pub fn get_plan(&self, plan_id: &str) -> StoreResult<Option<TransferPlan>> {
        self.get_json(PLANS, plan_id)
    }

    pub fn list_plans(&self) -> StoreResult<Vec<TransferPlan>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PLANS)?;

        let mut plans = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            plans.push(serde_json::from_slice(value.value())?);
        }
        Ok(plans)
    }

    /// Ids of all non-terminal plans.
    pub fn active_plan_ids(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .list_plans()?
            .into_iter()
            .filter(|p| !p.state.is_terminal())
            .map(|p| p.plan_id)
            .collect())
    }

    // =========================================================================
    // Routing steps
    // =========================================================================

    /// Persist the first record for a hop. Fails with `Conflict` if present.
    pub fn insert_step(&self, step: &RoutingStep) -> StoreResult<RoutingStep> {
        let mut fresh = step.clone();
        fresh.revision = 0;
        self.compare_and_set(ROUTING_STEPS, &hop_key(&step.plan_id, step.hop_index), &fresh)
    }

    pub fn update_step(&self, step: &RoutingStep) -> StoreResult<RoutingStep> {
        if step.revision == 0 {
            return Err(StoreError::Conflict(hop_key(&step.plan_id, step.hop_index)));
        }
        self.compare_and_set(ROUTING_STEPS, &hop_key(&step.plan_id, step.hop_index), step)
    }

    pub fn get_step(&self, plan_id: &str, hop_index: u8) -> StoreResult<Option<RoutingStep>> {
        self.get_json(ROUTING_STEPS, &hop_key(plan_id, hop_index))
    }

    /// All hop records of a plan in hop order.
    pub fn steps_for_plan(&self, plan_id: &str) -> StoreResult<Vec<RoutingStep>> {
        self.scan_prefix(ROUTING_STEPS, plan_id)
    }

    /// Append an audit entry for one pass over a hop.
    pub fn append_attempt(&self, attempt: &StepAttempt) -> StoreResult<()> {
        let json = serde_json::to_vec(attempt)?;
        let prefix = hop_key(&attempt.plan_id, attempt.hop_index);
        let (start, end) = prefix_range(&prefix);

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STEP_ATTEMPTS)?;
            let seq = table.range(start.as_str()..end.as_str())?.count() + 1;
            let key = format!("{prefix}|{seq:06}");
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Attempt history of a hop, oldest first.
    pub fn attempts_for_step(&self, plan_id: &str, hop_index: u8) -> StoreResult<Vec<StepAttempt>> {
        self.scan_prefix(STEP_ATTEMPTS, &hop_key(plan_id, hop_index))
    }

    // =========================================================================
    // Ephemeral accounts
    // =========================================================================

    /// Register a new account for `(plan_id, hop_index)` and index its address.
    ///
    /// Fails with `Conflict` if the slot or the address is already owned.
    pub fn insert_account(&self, account: &EphemeralAccount) -> StoreResult<EphemeralAccount> {
        let key = hop_key(&account.plan_id, account.hop_index);
        let mut stored = account.clone();
        stored.revision = 1;
        let json = serde_json::to_vec(&stored)?;

        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut accounts = write_txn.open_table(EPHEMERAL_ACCOUNTS)?;
            let mut index = write_txn.open_table(ACCOUNT_INDEX)?;
            let taken = accounts.get(key.as_str())?.is_some()
                || index.get(account.address.as_str())?.is_some();
            if !taken {
                accounts.insert(key.as_str(), json.as_slice())?;
                index.insert(account.address.as_str(), key.as_str())?;
            }
            !taken
        };

        if !inserted {
            write_txn.abort()?;
            return Err(StoreError::Conflict(format!("ephemeral_accounts:{key}")));
        }
        write_txn.commit()?;
        Ok(stored)
    }

    pub fn update_account(&self, account: &EphemeralAccount) -> StoreResult<EphemeralAccount> {
        let key = hop_key(&account.plan_id, account.hop_index);
        if account.revision == 0 {
            return Err(StoreError::Conflict(key));
        }
        self.compare_and_set(EPHEMERAL_ACCOUNTS, &key, account)
    }

    pub fn get_account(
        &self,
        plan_id: &str,
        hop_index: u8,
    ) -> StoreResult<Option<EphemeralAccount>> {
        self.get_json(EPHEMERAL_ACCOUNTS, &hop_key(plan_id, hop_index))
    }

    /// Look up an account by its address.
    pub fn account_by_address(&self, address: &str) -> StoreResult<Option<EphemeralAccount>> {
        let addr = address.to_lowercase();
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ACCOUNT_INDEX)?;
        let key = match index.get(addr.as_str())? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };
        let accounts = read_txn.open_table(EPHEMERAL_ACCOUNTS)?;
        match accounts.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn accounts_for_plan(&self, plan_id: &str) -> StoreResult<Vec<EphemeralAccount>> {
        self.scan_prefix(EPHEMERAL_ACCOUNTS, plan_id)
    }
}
