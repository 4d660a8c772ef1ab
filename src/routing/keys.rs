// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ephemeral key lifecycle.
//!
//! Each hop account gets a fresh secp256k1 key, generated on demand and
//! owned by exactly one `(plan_id, hop_index)` slot. Callers never see key
//! bytes: they check out a [`SigningCapability`], which stops working the
//! moment the account is retired. Retirement also deletes the key file.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use alloy::signers::local::PrivateKeySigner;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::blockchain::signing::{
    generate_keypair, signer_from_pem, KeyMaterialError, SignerSlot, SigningCapability,
};
use crate::storage::{
    AuditEvent, AuditEventType, AuditLog, EncryptedStorage, PlanStore, StorageError, StoreError,
};

/// Bounded re-reads when an account update races another writer.
const CAS_RETRIES: usize = 8;

/// Lifecycle of an ephemeral account. Ordered: states only move forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Pending,
    Funded,
    Forwarded,
    Retired,
}

/// A single-use signing identity bound to one hop of one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralAccount {
    pub address: String,
    pub plan_id: String,
    pub hop_index: u8,
    pub state: AccountState,
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revision: u64,
}

impl EphemeralAccount {
    pub fn new(plan_id: &str, hop_index: u8, address: String) -> Self {
        Self {
            address: address.to_lowercase(),
            plan_id: plan_id.to_string(),
            hop_index,
            state: AccountState::Pending,
            created_at: Utc::now(),
            funded_at: None,
            retired_at: None,
            revision: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Ephemeral account {0} has been retired")]
    Retired(String),

    #[error("Unknown ephemeral account {0}")]
    UnknownAccount(String),

    #[error("Key material error: {0}")]
    Material(#[from] KeyMaterialError),

    #[error("Key storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Account store error: {0}")]
    Store(#[from] StoreError),

    #[error("Key registry lock poisoned")]
    Poisoned,
}

/// Generates, custodies and retires per-hop signing keys.
pub struct KeyLifecycleManager {
    store: Arc<PlanStore>,
    storage: Arc<EncryptedStorage>,
    audit: AuditLog,
    /// Signers currently checked out, by address. Entries die with the
    /// last outstanding capability.
    live: Mutex<HashMap<String, Weak<Mutex<Option<PrivateKeySigner>>>>>,
}

impl KeyLifecycleManager {
    pub fn new(store: Arc<PlanStore>, storage: Arc<EncryptedStorage>, audit: AuditLog) -> Self {
        Self {
            store,
            storage,
            audit,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Account for `(plan_id, hop_index)`, creating its key on first use.
    ///
    /// Concurrent callers for the same slot all receive the same account.
    /// Fails with [`KeyError::Retired`] once the slot's account is retired.
    pub fn issue(&self, plan_id: &str, hop_index: u8) -> Result<EphemeralAccount, KeyError> {
        if let Some(existing) = self.store.get_account(plan_id, hop_index)? {
            return live_or_retired(existing);
        }

        let key = generate_keypair()?;
        let path = self.storage.paths().key_file(plan_id, &key.address);
        self.storage
            .create_secret(&path, key.private_key_pem.as_bytes())?;

        let account = EphemeralAccount::new(plan_id, hop_index, key.address);
        match self.store.insert_account(&account) {
            Ok(stored) => {
                tracing::debug!(plan_id, hop = hop_index, "Issued ephemeral key");
                self.audit.record(
                    AuditEvent::new(AuditEventType::KeyIssued)
                        .with_plan(plan_id)
                        .with_hop(hop_index),
                );
                Ok(stored)
            }
            Err(StoreError::Conflict(_)) => {
                // Another worker won the slot; discard our key.
                self.discard_key_file(&path);
                let existing = self
                    .store
                    .get_account(plan_id, hop_index)?
                    .ok_or_else(|| KeyError::UnknownAccount(format!("{plan_id}/{hop_index}")))?;
                live_or_retired(existing)
            }
            Err(e) => {
                self.discard_key_file(&path);
                Err(e.into())
            }
        }
    }

    /// Existing account for a slot, without creating one.
    pub fn account(
        &self,
        plan_id: &str,
        hop_index: u8,
    ) -> Result<Option<EphemeralAccount>, KeyError> {
        Ok(self.store.get_account(plan_id, hop_index)?)
    }

    /// Load a signing capability for a live account.
    pub fn checkout(&self, address: &str) -> Result<SigningCapability, KeyError> {
        let mut live = self.live.lock().map_err(|_| KeyError::Poisoned)?;

        let account = self.require_account(address)?;
        if account.state == AccountState::Retired {
            return Err(KeyError::Retired(account.address));
        }

        if let Some(slot) = live.get(&account.address).and_then(Weak::upgrade) {
            return Ok(SigningCapability::new(account.address, slot));
        }

        let path = self
            .storage
            .paths()
            .key_file(&account.plan_id, &account.address);
        let pem = Zeroizing::new(self.storage.read_raw(&path)?);
        let signer = signer_from_pem(&pem)?;

        let slot: SignerSlot = Arc::new(Mutex::new(Some(signer)));
        live.retain(|_, weak| weak.strong_count() > 0);
        live.insert(account.address.clone(), Arc::downgrade(&slot));

        Ok(SigningCapability::new(account.address, slot))
    }

    pub fn mark_funded(&self, address: &str) -> Result<EphemeralAccount, KeyError> {
        self.advance_state(address, AccountState::Funded)
    }

    pub fn mark_forwarded(&self, address: &str) -> Result<EphemeralAccount, KeyError> {
        self.advance_state(address, AccountState::Forwarded)
    }

    /// Retire an account: invalidate every outstanding capability and
    /// delete the key file. Idempotent.
    pub fn retire(&self, address: &str) -> Result<EphemeralAccount, KeyError> {
        let retired = {
            let mut live = self.live.lock().map_err(|_| KeyError::Poisoned)?;
            let retired = self.advance_state(address, AccountState::Retired)?;

            if let Some(slot) = live.remove(&retired.address).and_then(|w| w.upgrade()) {
                let mut signer = slot.lock().map_err(|_| KeyError::Poisoned)?;
                signer.take();
            }
            retired
        };

        let path = self
            .storage
            .paths()
            .key_file(&retired.plan_id, &retired.address);
        self.storage.delete(&path)?;

        tracing::debug!(
            plan_id = %retired.plan_id,
            hop = retired.hop_index,
            "Retired ephemeral key"
        );
        self.audit.record(
            AuditEvent::new(AuditEventType::KeyRetired)
                .with_plan(&retired.plan_id)
                .with_hop(retired.hop_index),
        );
        Ok(retired)
    }

    fn require_account(&self, address: &str) -> Result<EphemeralAccount, KeyError> {
        self.store
            .account_by_address(address)?
            .ok_or_else(|| KeyError::UnknownAccount(address.to_string()))
    }

    /// Move an account forward to `target`; a no-op if it is already there.
    fn advance_state(
        &self,
        address: &str,
        target: AccountState,
    ) -> Result<EphemeralAccount, KeyError> {
        for _ in 0..CAS_RETRIES {
            let account = self.require_account(address)?;
            if account.state == AccountState::Retired && target != AccountState::Retired {
                return Err(KeyError::Retired(account.address));
            }
            if account.state >= target {
                return Ok(account);
            }

            let now = Utc::now();
            let mut next = account.clone();
            next.state = target;
            match target {
                AccountState::Funded => next.funded_at = Some(now),
                AccountState::Retired => next.retired_at = Some(now),
                _ => {}
            }

            match self.store.update_account(&next) {
                Ok(stored) => return Ok(stored),
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict(address.to_string()).into())
    }

    fn discard_key_file(&self, path: &std::path::Path) {
        if let Err(e) = self.storage.delete(path) {
            tracing::warn!(error = %e, "Failed to delete orphaned key file");
        }
    }
}

fn live_or_retired(account: EphemeralAccount) -> Result<EphemeralAccount, KeyError> {
    if account.state == AccountState::Retired {
        Err(KeyError::Retired(account.address))
    } else {
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::LedgerError;
    use crate::test_support::TestDirs;

    fn manager(dirs: &TestDirs) -> KeyLifecycleManager {
        KeyLifecycleManager::new(dirs.store.clone(), dirs.storage.clone(), dirs.audit.clone())
    }

    fn key_files(dirs: &TestDirs, plan_id: &str) -> usize {
        std::fs::read_dir(dirs.storage.paths().plan_keys_dir(plan_id))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn issue_is_idempotent_per_slot() {
        let dirs = TestDirs::new();
        let keys = manager(&dirs);

        let first = keys.issue("plan", 0).unwrap();
        let again = keys.issue("plan", 0).unwrap();
        let other = keys.issue("plan", 1).unwrap();

        assert_eq!(first.address, again.address);
        assert_ne!(first.address, other.address);
        assert_eq!(first.state, AccountState::Pending);
        assert_eq!(key_files(&dirs, "plan"), 2);
    }

    #[test]
    fn concurrent_issue_yields_one_account() {
        let dirs = TestDirs::new();
        let keys = manager(&dirs);

        let addresses: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| keys.issue("plan", 3).unwrap().address))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(key_files(&dirs, "plan"), 1);
    }

    #[test]
    fn checkout_signs_for_the_account_address() {
        let dirs = TestDirs::new();
        let keys = manager(&dirs);
        let account = keys.issue("plan", 0).unwrap();

        let capability = keys.checkout(&account.address).unwrap();
        assert_eq!(capability.address(), account.address);

        let signer = capability.signer().unwrap();
        assert_eq!(
            format!("{:?}", signer.address()).to_lowercase(),
            account.address
        );
    }

    #[test]
    fn retired_account_never_signs_again() {
        let dirs = TestDirs::new();
        let keys = manager(&dirs);
        let account = keys.issue("plan", 0).unwrap();
        let outstanding = keys.checkout(&account.address).unwrap();

        keys.mark_funded(&account.address).unwrap();
        keys.mark_forwarded(&account.address).unwrap();
        let retired = keys.retire(&account.address).unwrap();

        assert_eq!(retired.state, AccountState::Retired);
        assert!(retired.retired_at.is_some());
        assert_eq!(outstanding.ensure_live(), Err(LedgerError::KeyRetired));
        assert!(matches!(outstanding.signer(), Err(LedgerError::KeyRetired)));
        assert!(matches!(
            keys.checkout(&account.address),
            Err(KeyError::Retired(_))
        ));
        assert!(matches!(keys.issue("plan", 0), Err(KeyError::Retired(_))));
        assert!(matches!(
            keys.mark_funded(&account.address),
            Err(KeyError::Retired(_))
        ));
        assert_eq!(key_files(&dirs, "plan"), 0);

        // Retiring twice is harmless.
        assert_eq!(
            keys.retire(&account.address).unwrap().state,
            AccountState::Retired
        );
    }

    #[test]
    fn state_only_moves_forward() {
        let dirs = TestDirs::new();
        let keys = manager(&dirs);
        let account = keys.issue("plan", 0).unwrap();

        keys.mark_forwarded(&account.address).unwrap();
        let after = keys.mark_funded(&account.address).unwrap();
        assert_eq!(after.state, AccountState::Forwarded);
    }

    #[test]
    fn unknown_account_is_rejected() {
        let dirs = TestDirs::new();
        let keys = manager(&dirs);
        assert!(matches!(
            keys.checkout("0x0000000000000000000000000000000000000000"),
            Err(KeyError::UnknownAccount(_))
        ));
    }
}
