// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Relay Storage Module
//!
//! Persistent state of the relay lives under a single data directory, which
//! should be mounted on an encrypted volume.
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   relay.redb                   # Plans, hop records, accounts (redb)
//!   keys/{plan_id}/{address}.pem # Ephemeral private keys (deleted on retire)
//!   audit/{date}/events.jsonl    # Daily audit logs
//! ```
//!
//! ## Important Notes
//!
//! - Key files are only ever read by the key lifecycle manager
//! - Plan records never contain key material

pub mod audit;
pub mod encrypted_fs;
pub mod paths;
pub mod plan_store;

pub use audit::{AuditEvent, AuditEventType, AuditLog};
pub use encrypted_fs::{EncryptedStorage, StorageError, StorageResult};
pub use paths::StoragePaths;
pub use plan_store::{PlanStore, StoreError, StoreResult};
